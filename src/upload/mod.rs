pub mod preview;
pub mod session;

pub use preview::{PreviewRef, PreviewRegistry};
pub use session::{
    BatchReport, CleanupReport, ItemOutcome, ItemResult, LocalFile, UploadEntryView, UploadSession,
    UploadState,
};
