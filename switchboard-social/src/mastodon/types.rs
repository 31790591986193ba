use crate::ids::IdValue;
use serde::Deserialize;

/// Which feed a Mastodon connector polls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum Timeline {
    #[default]
    #[serde(rename = "mentions")]
    Mentions,
    #[serde(rename = "home")]
    Home,
    #[serde(rename = "public")]
    Public,
    #[serde(rename = "public:local")]
    PublicLocal,
}

impl Timeline {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeline::Mentions => "mentions",
            Timeline::Home => "home",
            Timeline::Public => "public",
            Timeline::PublicLocal => "public:local",
        }
    }

    pub fn path(&self) -> &'static str {
        match self {
            Timeline::Mentions => "/api/v1/notifications",
            Timeline::Home => "/api/v1/timelines/home",
            Timeline::Public | Timeline::PublicLocal => "/api/v1/timelines/public",
        }
    }

    /// Fixed query parameters selecting the feed.
    pub fn feed_params(&self) -> &'static [(&'static str, &'static str)] {
        match self {
            Timeline::Mentions => &[("types[]", "mention")],
            Timeline::PublicLocal => &[("local", "true")],
            Timeline::Home | Timeline::Public => &[],
        }
    }
}

/// Fields of a status that feed normalization.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub id: Option<IdValue>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub visibility: Option<String>,
    #[serde(default)]
    pub account: Option<Account>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Account {
    #[serde(default)]
    pub id: Option<IdValue>,
}
