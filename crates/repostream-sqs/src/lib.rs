//! # repostream-sqs
//!
//! `DeliverySink` that sends each envelope as one Amazon SQS message.
//! Credentials and region come from the standard AWS provider chain.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_sqs::error::{DisplayErrorContext, SdkError};
use aws_sdk_sqs::operation::send_message::SendMessageError;
use aws_sdk_sqs::Client;
use tracing::{debug, info};

use repostream_core::error::DeliveryError;
use repostream_core::sink::DeliverySink;

/// Largest message body SQS accepts (256 KiB).
pub const MAX_MESSAGE_BYTES: usize = 262_144;

pub struct SqsSink {
    client: Client,
    queue_url: String,
}

impl SqsSink {
    /// Build a client from the environment (`AWS_REGION`, credentials chain).
    pub async fn from_env(queue_url: impl Into<String>) -> Self {
        let config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let sink = Self::new(Client::new(&config), queue_url);
        info!(
            queue_url = %sink.queue_url,
            region = ?config.region(),
            "SQS sink ready"
        );
        sink
    }

    pub fn new(client: Client, queue_url: impl Into<String>) -> Self {
        Self {
            client,
            queue_url: queue_url.into(),
        }
    }

    pub fn queue_url(&self) -> &str {
        &self.queue_url
    }
}

#[async_trait]
impl DeliverySink for SqsSink {
    fn name(&self) -> &str {
        "sqs"
    }

    async fn deliver(&self, message: &str) -> Result<(), DeliveryError> {
        if message.len() > MAX_MESSAGE_BYTES {
            return Err(DeliveryError::Rejected {
                sink: "sqs".into(),
                reason: format!("message is {} bytes, limit is {MAX_MESSAGE_BYTES}", message.len()),
            });
        }

        let output = self
            .client
            .send_message()
            .queue_url(&self.queue_url)
            .message_body(message)
            .send()
            .await
            .map_err(classify)?;
        debug!(message_id = output.message_id().unwrap_or(""), "sent to SQS");
        Ok(())
    }
}

/// Service-side refusals are permanent unless the queue is throttling us;
/// transport problems and timeouts are worth retrying.
fn classify(err: SdkError<SendMessageError>) -> DeliveryError {
    let reason = DisplayErrorContext(&err).to_string();
    match &err {
        SdkError::ServiceError(ctx) if !ctx.err().is_request_throttled() => DeliveryError::Rejected {
            sink: "sqs".into(),
            reason,
        },
        _ => DeliveryError::Unavailable {
            sink: "sqs".into(),
            reason,
        },
    }
}
