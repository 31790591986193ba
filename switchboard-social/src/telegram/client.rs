//! Thin Bot API wrapper over the shared HTTP client.
//!
//! The bot token lives in the URL path, so it is registered as a secret
//! segment and never reaches the logs.
use crate::telegram::types::{ApiResponse, Update};
use anyhow::{Result, anyhow};
use serde_json::Value;
use std::borrow::Cow;
use std::time::Duration;
use switchboard_http::{HttpClient, HttpError, RequestOpts};

pub const DEFAULT_API_BASE: &str = "https://api.telegram.org";

/// Slack on top of the long-poll timeout before the request itself times out.
const LONG_POLL_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct TelegramApi {
    http: HttpClient,
    token_segment: String,
}

impl TelegramApi {
    pub fn new(api_base: &str, bot_token: &str) -> Result<Self, HttpError> {
        let token_segment = format!("bot{bot_token}");
        let http = HttpClient::new(api_base)?.with_secret_segment(token_segment.clone());
        Ok(Self {
            http,
            token_segment,
        })
    }

    fn path(&self, method: &str) -> String {
        format!("/{}/{method}", self.token_segment)
    }

    /// Long-poll for updates at or after `offset`.
    pub async fn get_updates(
        &self,
        offset: i64,
        timeout_sec: u64,
        allowed_updates: Option<&[String]>,
    ) -> Result<Vec<Update>> {
        let mut query: Vec<(&str, Cow<'_, str>)> = vec![
            ("timeout", timeout_sec.to_string().into()),
            ("offset", offset.to_string().into()),
        ];
        if let Some(allowed) = allowed_updates.filter(|a| !a.is_empty()) {
            query.push(("allowed_updates", serde_json::to_string(allowed)?.into()));
        }

        let resp: ApiResponse<Vec<Update>> = self
            .http
            .get_json(
                &self.path("getUpdates"),
                RequestOpts {
                    timeout: Some(Duration::from_secs(timeout_sec) + LONG_POLL_GRACE),
                    // the poll loop owns retry pacing
                    retries: Some(0),
                    query: Some(query),
                    ..Default::default()
                },
            )
            .await?;

        match (resp.ok, resp.result) {
            (true, Some(updates)) => Ok(updates),
            _ => Err(anyhow!(
                "getUpdates rejected: {}",
                resp.description.as_deref().unwrap_or("malformed response")
            )),
        }
    }

    /// Register `url` as the bot's webhook.
    pub async fn set_webhook(
        &self,
        url: &str,
        secret_token: Option<&str>,
        allowed_updates: Option<&[String]>,
    ) -> Result<()> {
        let mut form = vec![("url", url.to_string())];
        if let Some(secret) = secret_token {
            form.push(("secret_token", secret.to_string()));
        }
        if let Some(allowed) = allowed_updates.filter(|a| !a.is_empty()) {
            form.push(("allowed_updates", serde_json::to_string(allowed)?));
        }

        let resp: ApiResponse<Value> = self
            .http
            .post_form(&self.path("setWebhook"), &form, RequestOpts::default())
            .await?;
        if resp.ok {
            Ok(())
        } else {
            Err(anyhow!(
                "setWebhook rejected: {}",
                resp.description.as_deref().unwrap_or("unknown reason")
            ))
        }
    }
}
