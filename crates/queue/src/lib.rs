pub mod error;
pub mod provider;
pub mod sqs;

pub use error::QueueError;
pub use provider::{QueueMessage, QueueProvider};
pub use sqs::SqsQueueProvider;
