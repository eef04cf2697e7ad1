//! Outbound delivery adapters.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use super::Delivery;
use crate::config::DeliveryConfig;
use crate::error::{ConfigError, DeliveryError};

/// Hands each message to an HTTP webhook that performs the platform send.
///
/// The webhook receives `{"subject": ..., "message": ...}` and must answer 2xx.
pub struct WebhookDelivery {
    client: reqwest::Client,
    url: String,
    token: Option<SecretString>,
}

impl WebhookDelivery {
    pub fn new(config: &DeliveryConfig) -> Result<Self, ConfigError> {
        let url = config
            .webhook_url
            .clone()
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "CADENCE_DELIVERY_URL".into(),
                hint: "Set it to the webhook that sends platform messages.".into(),
            })?;

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ConfigError::ParseError(format!("HTTP client: {e}")))?;

        Ok(Self {
            client,
            url,
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl Delivery for WebhookDelivery {
    async fn deliver(&self, subject: &str, message: &str) -> Result<(), DeliveryError> {
        let body = serde_json::json!({
            "subject": subject,
            "message": message,
        });

        let mut request = self.client.post(&self.url).json(&body);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token.expose_secret());
        }

        let resp = request.send().await.map_err(|e| DeliveryError {
            subject: subject.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(DeliveryError {
                subject: subject.to_string(),
                reason: format!("webhook returned {status}: {text}"),
            });
        }

        debug!(subject = %subject, "Webhook delivery accepted");
        Ok(())
    }
}

/// Logs instead of sending. Used when no webhook is configured.
#[derive(Debug, Default)]
pub struct DryRunDelivery;

#[async_trait]
impl Delivery for DryRunDelivery {
    async fn deliver(&self, subject: &str, message: &str) -> Result<(), DeliveryError> {
        info!(
            subject = %subject,
            preview = %message.chars().take(80).collect::<String>(),
            "Dry-run delivery"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use axum::{Json, Router, http::StatusCode, routing::post};
    use tokio::net::TcpListener;

    async fn start_webhook(status: StatusCode) -> String {
        let app = Router::new().route(
            "/send",
            post(move |Json(body): Json<serde_json::Value>| async move {
                assert!(body.get("subject").is_some());
                assert!(body.get("message").is_some());
                status
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://127.0.0.1:{port}/send")
    }

    fn config_for(url: String) -> DeliveryConfig {
        DeliveryConfig {
            webhook_url: Some(url),
            ..DeliveryConfig::default()
        }
    }

    #[test]
    fn webhook_requires_url() {
        let result = WebhookDelivery::new(&DeliveryConfig::default());
        assert!(matches!(result, Err(ConfigError::MissingRequired { .. })));
    }

    #[tokio::test]
    async fn webhook_success() {
        let url = start_webhook(StatusCode::OK).await;
        let delivery = WebhookDelivery::new(&config_for(url)).unwrap();
        delivery.deliver("42", "hello").await.unwrap();
    }

    #[tokio::test]
    async fn webhook_error_status_is_failure() {
        let url = start_webhook(StatusCode::INTERNAL_SERVER_ERROR).await;
        let delivery = WebhookDelivery::new(&config_for(url)).unwrap();
        let err = delivery.deliver("42", "hello").await.unwrap_err();
        assert_eq!(err.subject, "42");
        assert!(err.reason.contains("500"));
    }

    #[tokio::test]
    async fn dry_run_always_succeeds() {
        DryRunDelivery.deliver("x", "msg").await.unwrap();
    }
}
