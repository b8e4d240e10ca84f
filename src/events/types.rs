//! Event and subscription types.

use crate::types::{RecordId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One notification channel per persisted collection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    Pets,
    Photos,
    Feed,
    Vaccines,
    Family,
    Users,
    Follows,
    Settings,
}

impl Topic {
    pub const ALL: [Topic; 8] = [
        Topic::Pets,
        Topic::Photos,
        Topic::Feed,
        Topic::Vaccines,
        Topic::Family,
        Topic::Users,
        Topic::Follows,
        Topic::Settings,
    ];

    /// Storage key holding this collection.
    pub fn storage_key(self) -> &'static str {
        match self {
            Topic::Pets => "pets",
            Topic::Photos => "photos",
            Topic::Feed => "feed",
            Topic::Vaccines => "vaccines",
            Topic::Family => "family",
            Topic::Users => "users",
            Topic::Follows => "follows",
            Topic::Settings => "settings",
        }
    }

    /// Event name the web client used for this collection.
    pub fn event_name(self) -> &'static str {
        match self {
            Topic::Pets => "pets-updated",
            Topic::Photos => "photos-updated",
            Topic::Feed => "feed-updated",
            Topic::Vaccines => "vaccines-updated",
            Topic::Family => "family-updated",
            Topic::Users => "users-updated",
            Topic::Follows => "follows-updated",
            Topic::Settings => "settings-updated",
        }
    }

    /// Topic owning a storage key, if any.
    pub fn from_storage_key(key: &str) -> Option<Topic> {
        Topic::ALL.into_iter().find(|t| t.storage_key() == key)
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.event_name())
    }
}

/// What happened to a collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Change {
    Added { id: RecordId },
    Updated { id: RecordId },
    Removed { id: RecordId },
    /// The whole collection was rewritten.
    Replaced,
    /// Contents were restored from a backup.
    Imported,
}

/// A change to one collection.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub topic: Topic,
    pub change: Change,
    /// Oldest entries the save pipeline dropped to fit the quota.
    #[serde(default)]
    pub trimmed: usize,
    pub at: Timestamp,
}

impl ChangeEvent {
    pub fn new(topic: Topic, change: Change) -> Self {
        Self {
            topic,
            change,
            trimmed: 0,
            at: Timestamp::now(),
        }
    }

    pub fn with_trimmed(mut self, trimmed: usize) -> Self {
        self.trimmed = trimmed;
        self
    }
}

/// Events delivered through a channel subscription.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NestEvent {
    Changed(ChangeEvent),
    /// Subscription was dropped; no further events follow.
    Dropped { reason: DropReason },
}

/// Why a subscription was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Which topics a subscriber wants.
#[derive(Clone, Debug, Default)]
pub struct TopicFilter {
    /// None = every topic.
    pub topics: Option<Vec<Topic>>,
}

impl TopicFilter {
    pub fn all() -> Self {
        Self { topics: None }
    }

    pub fn only(topic: Topic) -> Self {
        Self {
            topics: Some(vec![topic]),
        }
    }

    pub fn topics(topics: Vec<Topic>) -> Self {
        Self {
            topics: Some(topics),
        }
    }

    pub fn matches(&self, topic: Topic) -> bool {
        match &self.topics {
            Some(topics) => topics.contains(&topic),
            None => true,
        }
    }
}

/// Configuration for a channel subscription.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before the subscriber is dropped.
    /// Default: 256
    pub buffer_size: usize,

    /// Filter criteria.
    pub filter: TopicFilter,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            buffer_size: 256,
            filter: TopicFilter::default(),
        }
    }
}

/// Unique identifier for a subscription or listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);
