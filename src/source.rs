use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use tracing::{debug, warn};

use crate::config::SourceConfig;
use crate::governor::RateGovernor;
use crate::http::{check_response, RequestError};
use crate::models::{Message, MessageId};
use crate::relay::MessageSource;
use crate::retry::BackoffPolicy;

/// Polls one channel's message list through the source rate governor.
///
/// Every fetch retries until it gets an answer: throttling pauses the
/// governor, anything else backs off. Callers always receive a batch, which
/// makes progress depend on the remote API eventually recovering.
pub struct ChannelSource {
    client: reqwest::Client,
    messages_url: String,
    authorization: String,
    page_limit: u32,
    governor: RateGovernor,
    backoff: BackoffPolicy,
}

impl ChannelSource {
    pub fn new(
        config: &SourceConfig,
        governor: RateGovernor,
        backoff: BackoffPolicy,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build source HTTP client")?;

        Ok(Self {
            client,
            messages_url: format!(
                "{}/channels/{}/messages",
                config.api_base.trim_end_matches('/'),
                config.channel_id
            ),
            authorization: config.authorization(),
            page_limit: config.page_limit(),
            governor,
            backoff,
        })
    }

    async fn request_once(&self, query: &[(&str, String)]) -> Result<Vec<Message>, RequestError> {
        let response = self
            .client
            .get(&self.messages_url)
            .header(AUTHORIZATION, &self.authorization)
            .query(query)
            .send()
            .await?;
        let response = check_response(response).await?;
        let body = response.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    /// Issue `query` until it succeeds and return the batch oldest-first
    async fn fetch(&self, query: &[(&str, String)]) -> Vec<Message> {
        let mut failures = 0u32;
        loop {
            self.governor.acquire().await;
            match self.request_once(query).await {
                Ok(mut batch) => {
                    // The API answers newest-first
                    batch.sort_by(|a, b| a.id.cmp(&b.id));
                    debug!("Fetched {} messages ({:?})", batch.len(), query);
                    return batch;
                }
                Err(RequestError::Throttled { retry_after }) => {
                    self.governor.on_throttled(retry_after).await;
                }
                Err(e) => {
                    failures += 1;
                    let delay = self.backoff.delay_for(failures);
                    warn!(
                        "Fetching messages failed (attempt {}): {}; retrying in {:?}",
                        failures, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[async_trait]
impl MessageSource for ChannelSource {
    async fn fetch_latest(&self) -> Option<Message> {
        self.fetch(&[("limit", "1".to_string())]).await.pop()
    }

    async fn fetch_after(&self, cursor: Option<&MessageId>) -> Vec<Message> {
        // No cursor means the channel was empty at startup, so everything
        // after id 0 is new and the oldest page comes back first
        let after = cursor.map_or_else(|| "0".to_string(), MessageId::to_string);
        let query = [("limit", self.page_limit.to_string()), ("after", after)];
        self.fetch(&query).await
    }
}
