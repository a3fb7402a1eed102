use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{error, warn};

use crate::config::SinkConfig;
use crate::governor::RateGovernor;
use crate::http::{check_response, RequestError};
use crate::relay::MessageSink;
use crate::retry::BackoffPolicy;
use crate::transform::DeliveryPayload;

/// How many times a payload the webhook refuses is re-sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionPolicy {
    /// One attempt, then give up on the message
    Drop,
    /// Up to `n` further attempts
    Bounded(u32),
    /// Keep trying; one bad payload stalls the relay
    Forever,
}

impl RejectionPolicy {
    fn allows_retry(self, rejections: u32) -> bool {
        match self {
            Self::Drop => false,
            Self::Bounded(max) => rejections <= max,
            Self::Forever => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    /// The webhook refused the payload and the rejection policy is exhausted
    Rejected { status: StatusCode },
    /// Transport retries exhausted without an answer
    Unreachable,
}

/// Posts payloads to the webhook one at a time through the sink governor.
pub struct WebhookSink {
    client: reqwest::Client,
    url: String,
    governor: RateGovernor,
    rejection_policy: RejectionPolicy,
    transport_backoff: BackoffPolicy,
}

impl WebhookSink {
    pub fn new(config: &SinkConfig, governor: RateGovernor) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .context("Failed to build webhook HTTP client")?;

        Ok(Self {
            client,
            url: config.webhook_url.clone(),
            governor,
            rejection_policy: config.rejection_policy(),
            transport_backoff: config.transport_backoff(),
        })
    }

    async fn post_once(&self, payload: &DeliveryPayload) -> Result<(), RequestError> {
        let response = self.client.post(&self.url).json(payload).send().await?;
        check_response(response).await?;
        Ok(())
    }
}

#[async_trait]
impl MessageSink for WebhookSink {
    /// Throttling is retried without limit; 4xx rejections follow the
    /// rejection policy; 5xx and transport faults follow the transport backoff.
    async fn deliver(&self, payload: &DeliveryPayload) -> DeliveryOutcome {
        let mut rejections = 0u32;
        let mut transport_failures = 0u32;

        loop {
            self.governor.acquire().await;
            match self.post_once(payload).await {
                Ok(()) => return DeliveryOutcome::Delivered,
                Err(RequestError::Throttled { retry_after }) => {
                    self.governor.on_throttled(retry_after).await;
                }
                // 5xx is transient and falls through to the transport backoff
                Err(RequestError::Status { status, body }) if !status.is_server_error() => {
                    rejections += 1;
                    if !self.rejection_policy.allows_retry(rejections) {
                        error!(
                            "Webhook rejected message from {} ({}): {}",
                            payload.username, status, body
                        );
                        return DeliveryOutcome::Rejected { status };
                    }
                    let delay = self.transport_backoff.delay_for(rejections);
                    warn!(
                        "Webhook rejected message from {} ({}), attempt {}; retrying in {:?}",
                        payload.username, status, rejections, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    transport_failures += 1;
                    if !self.transport_backoff.allows_retry(transport_failures) {
                        error!(
                            "Giving up on message from {} after {} failed attempts: {}",
                            payload.username, transport_failures, e
                        );
                        return DeliveryOutcome::Unreachable;
                    }
                    let delay = self.transport_backoff.delay_for(transport_failures);
                    warn!(
                        "Webhook request failed (attempt {}): {}; retrying in {:?}",
                        transport_failures, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RateLimitConfig, RejectionMode};
    use crate::transform::PayloadAttachment;
    use serde_json::json;
    use std::time::{Duration, Instant};
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn governor() -> RateGovernor {
        RateGovernor::new(
            "sink",
            &RateLimitConfig {
                max_requests: 100,
                window_ms: 1000,
                throttle_jitter_ms: 0,
            },
        )
    }

    fn sink_config(url: String) -> SinkConfig {
        SinkConfig {
            webhook_url: url,
            transport_retries: 2,
            transport_retry_delay_ms: 10,
            ..SinkConfig::default()
        }
    }

    fn sink(config: &SinkConfig) -> WebhookSink {
        WebhookSink::new(config, governor()).unwrap()
    }

    fn payload() -> DeliveryPayload {
        DeliveryPayload {
            content: Some("hello".to_string()),
            username: "alice".to_string(),
            avatar_url: None,
            embeds: Vec::new(),
            attachments: vec![PayloadAttachment {
                url: "https://cdn.example/a.png".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn test_no_content_is_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(body_json(json!({
                "content": "hello",
                "username": "alice",
                "embeds": [],
                "attachments": [{"url": "https://cdn.example/a.png"}]
            })))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = sink(&sink_config(format!("{}/hook", server.uri())))
            .deliver(&payload())
            .await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_throttled_delivery_waits_retry_after() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"retry_after": 2})))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let start = Instant::now();
        let outcome = sink(&sink_config(server.uri())).deliver(&payload()).await;
        assert!(start.elapsed() >= Duration::from_secs(2));
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_repeated_throttling_is_never_dropped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429).set_body_json(json!({"retry_after": 0.01})))
            .up_to_n_times(6)
            .expect(6)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = sink(&sink_config(server.uri())).deliver(&payload()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_rejection_dropped_after_one_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(400).set_body_string("Cannot send an empty message"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let outcome = sink(&sink_config(server.uri())).deliver(&payload()).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Rejected {
                status: StatusCode::BAD_REQUEST
            }
        );
    }

    #[tokio::test]
    async fn test_server_error_is_retried_then_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .up_to_n_times(1)
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = sink(&sink_config(server.uri())).deliver(&payload()).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered);
    }

    #[tokio::test]
    async fn test_persistent_server_error_ends_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(3)
            .mount(&server)
            .await;

        let outcome = sink(&sink_config(server.uri())).deliver(&payload()).await;
        assert_eq!(outcome, DeliveryOutcome::Unreachable);
    }

    #[tokio::test]
    async fn test_bounded_rejection_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(404))
            .expect(3)
            .mount(&server)
            .await;

        let config = SinkConfig {
            rejection_policy: RejectionMode::Retry,
            rejection_retries: 2,
            ..sink_config(server.uri())
        };
        let outcome = sink(&config).deliver(&payload()).await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Rejected {
                status: StatusCode::NOT_FOUND
            }
        );
    }

    #[tokio::test]
    async fn test_bounded_rejection_recovers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let config = SinkConfig {
            rejection_policy: RejectionMode::Retry,
            ..sink_config(server.uri())
        };
        assert_eq!(
            sink(&config).deliver(&payload()).await,
            DeliveryOutcome::Delivered
        );
    }

    #[tokio::test]
    async fn test_unreachable_webhook_gives_up() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let outcome = sink(&sink_config(format!("http://{}/hook", addr)))
            .deliver(&payload())
            .await;
        assert_eq!(outcome, DeliveryOutcome::Unreachable);
    }

    #[test]
    fn test_rejection_policy_limits() {
        assert!(!RejectionPolicy::Drop.allows_retry(1));
        assert!(RejectionPolicy::Bounded(2).allows_retry(2));
        assert!(!RejectionPolicy::Bounded(2).allows_retry(3));
        assert!(RejectionPolicy::Forever.allows_retry(1000));
    }
}
