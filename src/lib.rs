// Keepsake media core: resilient loading and playback of story recordings,
// and batch uploads of the files attached to a story.

pub mod ai;
pub mod config;
pub mod context;
pub mod error;
pub mod player;
pub mod resource;
pub mod scheduler;
pub mod store;
pub mod ui;
pub mod upload;
