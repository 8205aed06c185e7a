//! Chat notifications through a Slack incoming webhook.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest_middleware::ClientWithMiddleware;
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use orgbot_core::middleware::create_http_client;
use orgbot_core::{Notification, NotificationField, NotificationSink};

pub const BOT_USERNAME: &str = "orgbot";

#[derive(Debug, Serialize, PartialEq)]
struct SlackPost<'a> {
    channel: &'a str,
    username: &'a str,
    icon_emoji: &'a str,
    attachments: [SlackAttachment<'a>; 1],
}

#[derive(Debug, Serialize, PartialEq)]
struct SlackAttachment<'a> {
    color: &'a str,
    pretext: &'a str,
    fields: &'a [NotificationField],
}

pub struct SlackNotifier {
    client: ClientWithMiddleware,
    webhook_url: String,
    channel: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String, channel: String, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: create_http_client("slack", timeout)?,
            webhook_url,
            channel,
        })
    }

    fn payload<'a>(&'a self, notification: &'a Notification) -> SlackPost<'a> {
        SlackPost {
            channel: &self.channel,
            username: BOT_USERNAME,
            icon_emoji: &notification.icon_emoji,
            attachments: [SlackAttachment {
                color: &notification.color,
                pretext: &notification.title,
                fields: &notification.fields,
            }],
        }
    }
}

#[async_trait]
impl NotificationSink for SlackNotifier {
    async fn notify(&self, notification: &Notification) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&self.payload(notification))
            .send()
            .await
            .context("Failed to send Slack notification")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("Slack webhook error: {} - {}", status, error_text);
            return Err(anyhow!("Slack webhook error: {} - {}", status, error_text));
        }

        info!("Posted notification to {}: {}", self.channel, notification.title);
        Ok(())
    }
}
