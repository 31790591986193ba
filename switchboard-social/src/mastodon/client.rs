use crate::mastodon::types::Timeline;
use anyhow::Result;
use serde_json::Value;
use std::borrow::Cow;
use switchboard_http::{Auth, HttpClient, HttpError, RequestOpts};

/// Items fetched per round.
pub const PAGE_SIZE: u32 = 20;

#[derive(Clone)]
pub struct MastodonApi {
    http: HttpClient,
    access_token: String,
}

impl MastodonApi {
    pub fn new(base_url: &str, access_token: impl Into<String>) -> Result<Self, HttpError> {
        Ok(Self {
            http: HttpClient::new(base_url)?,
            access_token: access_token.into(),
        })
    }

    /// One page of `timeline`, newer than `since_id` when given.
    ///
    /// Items are returned as raw JSON; the caller decides which ones carry
    /// a status.
    pub async fn fetch(&self, timeline: Timeline, since_id: Option<&str>) -> Result<Vec<Value>> {
        let mut query: Vec<(&str, Cow<'_, str>)> = timeline
            .feed_params()
            .iter()
            .map(|(k, v)| (*k, Cow::Borrowed(*v)))
            .collect();
        query.push(("limit", PAGE_SIZE.to_string().into()));
        if let Some(since) = since_id {
            query.push(("since_id", since.into()));
        }

        let items: Vec<Value> = self
            .http
            .get_json(
                timeline.path(),
                RequestOpts {
                    auth: Some(Auth::Bearer(&self.access_token)),
                    query: Some(query),
                    ..Default::default()
                },
            )
            .await?;
        Ok(items)
    }
}
