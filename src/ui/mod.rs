pub mod app;

pub use app::PlayerApp;
