use super::{Envelope, QueueError, QueueTransport};
use aws_config::BehaviorVersion;
use aws_sdk_sqs::config::Region;
use tokio::runtime::Runtime;

/// SQS caps long-poll waits at 20 seconds; an empty result falls back to the
/// main loop's fixed idle sleep.
pub const RECEIVE_WAIT_SECONDS: i32 = 20;
pub const VISIBILITY_TIMEOUT_SECONDS: i32 = 30;

pub struct SqsQueue {
    runtime: Runtime,
    client: aws_sdk_sqs::Client,
    queue_url: String,
}

impl SqsQueue {
    pub fn connect(region: &str, queue_url: &str) -> Result<Self, QueueError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| QueueError::Connect {
                url: queue_url.to_string(),
                reason: err.to_string(),
            })?;

        let config = runtime.block_on(
            aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(region.to_string()))
                .load(),
        );
        let client = aws_sdk_sqs::Client::new(&config);

        Ok(Self {
            runtime,
            client,
            queue_url: queue_url.to_string(),
        })
    }
}

impl QueueTransport for SqsQueue {
    fn receive(&self) -> Result<Option<Envelope>, QueueError> {
        let output = self
            .runtime
            .block_on(
                self.client
                    .receive_message()
                    .queue_url(&self.queue_url)
                    .max_number_of_messages(1)
                    .wait_time_seconds(RECEIVE_WAIT_SECONDS)
                    .visibility_timeout(VISIBILITY_TIMEOUT_SECONDS)
                    .send(),
            )
            .map_err(|err| QueueError::Receive {
                url: self.queue_url.clone(),
                reason: err.to_string(),
            })?;

        let Some(message) = output.messages.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };
        let (Some(body), Some(receipt_handle)) = (message.body, message.receipt_handle) else {
            return Err(QueueError::IncompleteMessage {
                url: self.queue_url.clone(),
            });
        };

        Ok(Some(Envelope {
            body,
            receipt_handle,
        }))
    }

    fn delete(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.runtime
            .block_on(
                self.client
                    .delete_message()
                    .queue_url(&self.queue_url)
                    .receipt_handle(receipt_handle)
                    .send(),
            )
            .map_err(|err| QueueError::Delete {
                url: self.queue_url.clone(),
                reason: err.to_string(),
            })?;
        Ok(())
    }
}
