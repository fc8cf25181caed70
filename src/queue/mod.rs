pub mod sqs;

pub use sqs::SqsQueue;

/// One unit read from the queue. The body stays opaque until the request
/// router parses it; the receipt handle is what `delete` needs to commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub body: String,
    pub receipt_handle: String,
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("failed to connect to queue {url}: {reason}")]
    Connect { url: String, reason: String },
    #[error("failed to receive from queue {url}: {reason}")]
    Receive { url: String, reason: String },
    #[error("failed to delete message from queue {url}: {reason}")]
    Delete { url: String, reason: String },
    #[error("queue {url} delivered a message without a body or receipt handle")]
    IncompleteMessage { url: String },
}

/// Durable at-least-once transport. A received envelope is redelivered after
/// its visibility timeout unless `delete` is called; callers delete only
/// after the whole request-handling sequence, so a crash mid-handling causes
/// reprocessing rather than loss.
pub trait QueueTransport {
    fn receive(&self) -> Result<Option<Envelope>, QueueError>;
    fn delete(&self, receipt_handle: &str) -> Result<(), QueueError>;
}
