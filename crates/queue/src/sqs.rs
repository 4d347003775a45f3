//! AWS SQS queue provider.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_sqs::config::BehaviorVersion;
use aws_sdk_sqs::Client;
use tokio::sync::RwLock;
use tracing::{debug, info};

use fahrplan_core::config::QueueConfig;

use crate::error::QueueError;
use crate::provider::{QueueMessage, QueueProvider};

/// SQS-backed queue provider for the scheduler's input, dispatch, and DCM
/// queues, plus the per-service outbound queues.
pub struct SqsQueueProvider {
    client: Client,
    input_queue_url: String,
    dispatch_queue_url: String,
    dcm_queue_url: String,
    /// Cache of resolved per-service queue URLs, keyed by queue topic.
    service_queue_urls: RwLock<HashMap<String, String>>,
    watch_delay_secs: i32,
    visibility_timeout_secs: i32,
}

impl SqsQueueProvider {
    /// Create the provider and resolve the three scheduler queue URLs.
    pub async fn new(config: &QueueConfig) -> Result<Self, QueueError> {
        let region = aws_sdk_sqs::config::Region::new(config.region.clone());

        // Build the SQS client config directly rather than from ambient AWS
        // defaults, so a stray AWS_ENDPOINT_URL in the environment cannot
        // route queue traffic to the wrong service.
        let mut sqs_config = aws_sdk_sqs::Config::builder()
            .region(region)
            .behavior_version(BehaviorVersion::latest());

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            let creds = Credentials::new(
                key_id,
                secret,
                config.session_token.clone(),
                None,
                "fahrplan-queue-static",
            );
            sqs_config = sqs_config.credentials_provider(creds);
        }

        if let Some(ref endpoint) = config.endpoint {
            if !endpoint.is_empty() {
                let url = if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
                    endpoint.clone()
                } else {
                    format!("https://{endpoint}")
                };
                sqs_config = sqs_config.endpoint_url(&url);
            }
        }

        let client = Client::from_conf(sqs_config.build());

        let input_queue_url = Self::resolve_queue_url(&client, &config.input_queue, "").await?;
        let dispatch_queue_url =
            Self::resolve_queue_url(&client, &config.dispatch_queue, "").await?;
        let dcm_queue_url = Self::resolve_queue_url(&client, &config.dcm_queue, "").await?;

        info!(
            input_queue = %config.input_queue,
            dispatch_queue = %config.dispatch_queue,
            dcm_queue = %config.dcm_queue,
            region = %config.region,
            "SQS queue provider initialized"
        );

        Ok(Self {
            client,
            input_queue_url,
            dispatch_queue_url,
            dcm_queue_url,
            service_queue_urls: RwLock::new(HashMap::new()),
            watch_delay_secs: config.watch_delay_secs as i32,
            visibility_timeout_secs: config.visibility_timeout_secs as i32,
        })
    }

    async fn resolve_queue_url(
        client: &Client,
        queue_name: &str,
        owner_account: &str,
    ) -> Result<String, QueueError> {
        let mut request = client.get_queue_url().queue_name(queue_name);
        if !owner_account.is_empty() {
            request = request.queue_owner_aws_account_id(owner_account);
        }
        let result = request
            .send()
            .await
            .map_err(|e| QueueError::NotFound(format!("{queue_name}: {e:?}")))?;
        result
            .queue_url()
            .map(str::to_string)
            .ok_or_else(|| QueueError::NotFound(queue_name.to_string()))
    }

    /// Resolve and cache the queue URL for a service's outbound topic.
    async fn service_queue_url(
        &self,
        queue_topic: &str,
        owner_account: &str,
    ) -> Result<String, QueueError> {
        if let Some(url) = self.service_queue_urls.read().await.get(queue_topic) {
            return Ok(url.clone());
        }

        let url = Self::resolve_queue_url(&self.client, queue_topic, owner_account).await?;
        self.service_queue_urls
            .write()
            .await
            .insert(queue_topic.to_string(), url.clone());
        Ok(url)
    }

    /// Receive a single message from the queue at `queue_url`, waiting up to
    /// the configured watch delay.
    async fn receive_one(&self, queue_url: &str) -> Result<Option<QueueMessage>, QueueError> {
        let result = self
            .client
            .receive_message()
            .queue_url(queue_url)
            .max_number_of_messages(1)
            .visibility_timeout(self.visibility_timeout_secs)
            .wait_time_seconds(self.watch_delay_secs)
            .send()
            .await
            .map_err(|e| QueueError::Receive(format!("{e:?}")))?;

        let Some(msg) = result.messages.unwrap_or_default().into_iter().next() else {
            return Ok(None);
        };

        let receipt_handle = msg
            .receipt_handle()
            .ok_or_else(|| QueueError::Receive("missing receipt handle".into()))?
            .to_string();

        Ok(Some(QueueMessage {
            id: msg.message_id().unwrap_or("unknown").to_string(),
            body: msg.body().unwrap_or("").to_string(),
            receipt_handle,
        }))
    }

    async fn delete_one(&self, queue_url: &str, receipt_handle: &str) -> Result<(), QueueError> {
        debug!(receipt_handle, "deleting queue message");
        self.client
            .delete_message()
            .queue_url(queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
            .map_err(|e| QueueError::Delete(format!("{e:?}")))?;
        Ok(())
    }

    async fn send_one(&self, queue_url: &str, body: &str) -> Result<(), QueueError> {
        self.client
            .send_message()
            .queue_url(queue_url)
            .message_body(body)
            .send()
            .await
            .map_err(|e| QueueError::Send(format!("{e:?}")))?;
        Ok(())
    }
}

#[async_trait]
impl QueueProvider for SqsQueueProvider {
    async fn receive_input(&self) -> Result<Option<QueueMessage>, QueueError> {
        self.receive_one(&self.input_queue_url).await
    }

    async fn delete_input(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.delete_one(&self.input_queue_url, receipt_handle).await
    }

    async fn receive_dispatch(&self) -> Result<Option<QueueMessage>, QueueError> {
        self.receive_one(&self.dispatch_queue_url).await
    }

    async fn delete_dispatch(&self, receipt_handle: &str) -> Result<(), QueueError> {
        self.delete_one(&self.dispatch_queue_url, receipt_handle)
            .await
    }

    async fn send_dispatch(&self, body: &str) -> Result<(), QueueError> {
        debug!("sending message to the scheduler dispatch queue");
        self.send_one(&self.dispatch_queue_url, body).await
    }

    async fn send_service_message(
        &self,
        queue_topic: &str,
        owner_account: &str,
        body: &str,
    ) -> Result<(), QueueError> {
        let queue_url = self.service_queue_url(queue_topic, owner_account).await?;
        self.send_one(&queue_url, body).await?;
        info!(queue_topic, "sent message to service queue");
        Ok(())
    }

    async fn send_dcm(&self, body: &str) -> Result<(), QueueError> {
        self.send_one(&self.dcm_queue_url, body).await
    }
}
