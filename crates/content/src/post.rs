use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use marketdesk_core::{DomainError, PostId};

/// Per-platform publication status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublicationStatus {
    Draft,
    Scheduled,
    Published,
    Failed,
}

/// Publication state of a post on one platform (e.g. "facebook").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformEntry {
    pub platform: String,
    pub status: PublicationStatus,
    pub published_at: Option<DateTime<Utc>>,
}

impl PlatformEntry {
    pub fn new(platform: impl Into<String>, status: PublicationStatus) -> Self {
        Self {
            platform: platform.into(),
            status,
            published_at: None,
        }
    }
}

/// Content record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: PostId,
    pub title: String,
    pub platforms: Vec<PlatformEntry>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Post {
    /// Creation flow: a post queued for release on `platforms` at `scheduled_at`.
    pub fn schedule(
        title: impl Into<String>,
        platforms: &[&str],
        scheduled_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        let title = title.into();
        if title.trim().is_empty() {
            return Err(DomainError::validation("title is required"));
        }
        if platforms.is_empty() {
            return Err(DomainError::validation("at least one platform is required"));
        }

        let mut entries: Vec<PlatformEntry> = Vec::with_capacity(platforms.len());
        for p in platforms {
            let name = p.trim();
            if name.is_empty() {
                return Err(DomainError::validation("platform name must not be empty"));
            }
            if entries.iter().any(|e| e.platform == name) {
                return Err(DomainError::validation(format!(
                    "platform listed twice: {name}"
                )));
            }
            entries.push(PlatformEntry::new(name, PublicationStatus::Scheduled));
        }

        Ok(Self {
            id: PostId::new(),
            title,
            platforms: entries,
            scheduled_at: Some(scheduled_at),
            updated_at: now,
        })
    }

    /// True when the release time is set and has been reached.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_at.is_some_and(|at| at <= now)
    }

    pub fn has_scheduled_entries(&self) -> bool {
        self.platforms
            .iter()
            .any(|e| e.status == PublicationStatus::Scheduled)
    }

    /// Flip every `Scheduled` entry to `Published` if the post is due.
    ///
    /// Returns the number of entries changed. Entries in any other status are
    /// left alone, and nothing changes when the post is not due.
    pub fn publish_due(&mut self, now: DateTime<Utc>) -> usize {
        if !self.is_due(now) {
            return 0;
        }

        let mut flipped = 0;
        for entry in self
            .platforms
            .iter_mut()
            .filter(|e| e.status == PublicationStatus::Scheduled)
        {
            entry.status = PublicationStatus::Published;
            entry.published_at = Some(now);
            flipped += 1;
        }

        if flipped > 0 {
            self.updated_at = now;
        }
        flipped
    }
}
