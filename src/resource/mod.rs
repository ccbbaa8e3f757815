pub mod handle;
pub mod retry;

pub use handle::{
    FailureReason, HandleState, ResourceHandle, ResourceId, ResourceMetadata, ResourceSource,
};
pub use retry::{RetryDecision, RetryPolicy};
