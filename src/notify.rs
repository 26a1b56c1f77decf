// 📣 Notification delivery
//
// The run hands a (target, title, body) triple to a Notifier after the table
// is saved. Delivery problems are the caller's to log; they never fail a run.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

pub trait Notifier {
    fn send(&self, target: &str, title: &str, body: &str) -> Result<()>;
}

/// JSON body posted to the webhook (push-service style: token, title, content)
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    token: &'a str,
    title: &'a str,
    content: &'a str,
    template: &'a str,
}

/// Posts the message to an HTTP webhook
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl WebhookNotifier {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;

        Ok(WebhookNotifier {
            client,
            endpoint: endpoint.into(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Notifier for WebhookNotifier {
    fn send(&self, target: &str, title: &str, body: &str) -> Result<()> {
        let payload = WebhookPayload {
            token: target,
            title,
            content: body,
            template: "txt",
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .with_context(|| format!("POST {} failed", self.endpoint))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().unwrap_or_default();
            bail!("webhook returned {}: {}", status, text.trim());
        }

        info!(endpoint = %self.endpoint, "notification delivered");
        Ok(())
    }
}

/// Writes the message to the log instead of sending it
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn send(&self, target: &str, title: &str, body: &str) -> Result<()> {
        info!(target_id = %target, title = %title, "notification (log only)\n{}", body);
        Ok(())
    }
}
