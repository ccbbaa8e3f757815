pub mod audio;
pub mod session;

pub use audio::{EngineFactory, PlaybackEngine, RodioEngineFactory};
pub use session::{PlaybackSession, SessionEvent, SessionEventKind, SessionSnapshot};
