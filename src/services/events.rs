//! Domain event publisher.
//!
//! Events are flat JSON records POSTed to a configured webhook. Delivery is
//! at-least-once with exponential backoff; a Redis SET NX claim keyed on the
//! event's idempotency key keeps a replayed workflow step from handing the
//! same event to the delivery path twice. With no webhook configured events
//! are logged and dropped, which keeps local development free of external
//! wiring.

use anyhow::{anyhow, Context, Result};
use backoff::ExponentialBackoff;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::domain::events::DomainEvent;
use crate::services::cache::RedisCache;

#[derive(Clone)]
pub struct EventPublisher {
    client: Client,
    webhook_url: Option<String>,
    token: String,
    cache: RedisCache,
    idempotency_ttl: Duration,
}

impl EventPublisher {
    pub fn new(settings: &Settings, cache: RedisCache) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .context("Failed to create HTTP client")?;

        if settings.event_webhook_url.is_none() {
            tracing::info!("EVENT_WEBHOOK_URL not set; domain events will be logged only");
        }

        Ok(Self {
            client,
            webhook_url: settings.event_webhook_url.clone(),
            token: settings.event_webhook_token.clone(),
            cache,
            idempotency_ttl: Duration::from_secs(settings.event_idempotency_ttl_seconds),
        })
    }

    /// Publish an event. Never fails the calling workflow: delivery happens
    /// in the background and failures are logged.
    pub async fn publish(&self, event: DomainEvent) {
        let key = format!("event:{}", event.idempotency_key());

        match self.cache.set_nx(&key, self.idempotency_ttl).await {
            Ok(true) => {}
            Ok(false) => {
                debug!(topic = event.topic(), key = %key, "Event already published, skipping");
                return;
            }
            Err(e) => {
                // Delivery is at-least-once; a guard failure must not
                // suppress the event.
                warn!(error = %e, topic = event.topic(), "Idempotency guard unavailable");
            }
        }

        let Some(url) = self.webhook_url.clone() else {
            info!(topic = event.topic(), event = ?event, "Domain event (no webhook configured)");
            return;
        };

        let publisher = self.clone();
        tokio::spawn(async move {
            if let Err(e) = publisher.deliver(&url, &event).await {
                error!(error = %e, topic = event.topic(), "Event delivery failed");
                // Release the claim so a later workflow retry can republish.
                if let Err(e) = publisher.cache.delete(&key).await {
                    warn!(error = %e, key = %key, "Failed to release idempotency key");
                }
            } else {
                debug!(topic = event.topic(), "Event delivered");
            }
        });
    }

    async fn deliver(&self, url: &str, event: &DomainEvent) -> Result<()> {
        let policy = ExponentialBackoff {
            max_elapsed_time: Some(Duration::from_secs(60)),
            ..ExponentialBackoff::default()
        };

        backoff::future::retry(policy, || async {
            let response = self
                .client
                .post(url)
                .header("X-Webhook-Token", &self.token)
                .json(event)
                .send()
                .await
                .map_err(|e| backoff::Error::transient(anyhow!("webhook request failed: {e}")))?;

            let status = response.status();
            if status.is_success() {
                Ok(())
            } else if status.is_server_error() {
                Err(backoff::Error::transient(anyhow!(
                    "webhook returned {status}"
                )))
            } else {
                Err(backoff::Error::permanent(anyhow!(
                    "webhook rejected event with {status}"
                )))
            }
        })
        .await
    }
}
