//! Scheduled content publisher sweep.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, instrument};

use marketdesk_core::{Clock, SystemClock};

use crate::repositories::{PostRepository, RepositoryError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepReport {
    /// Posts with at least one entry flipped and persisted.
    pub updated_count: usize,
    /// Posts whose write failed; they stay eligible for the next sweep.
    pub failed_count: usize,
    pub swept_at: DateTime<Utc>,
}

/// Flips due `scheduled` platform entries to `published`.
///
/// Each post is written on its own. A failed write does not roll back posts
/// already written in the same sweep.
pub struct ScheduledPostPublisher {
    posts: Arc<dyn PostRepository>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for ScheduledPostPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScheduledPostPublisher").finish_non_exhaustive()
    }
}

impl ScheduledPostPublisher {
    pub fn new(posts: Arc<dyn PostRepository>) -> Self {
        Self {
            posts,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[instrument(skip(self), err)]
    pub async fn sweep(&self) -> Result<SweepReport, RepositoryError> {
        let now = self.clock.now();
        let candidates = self.posts.list_due(now).await?;

        let mut updated_count = 0;
        let mut failed_count = 0;

        for mut post in candidates {
            // The store's filter is a hint; the domain rule decides.
            let flipped = post.publish_due(now);
            if flipped == 0 {
                continue;
            }

            match self.posts.update_platforms(post.id, &post.platforms, post.updated_at).await {
                Ok(()) => {
                    updated_count += 1;
                    info!(post_id = %post.id, entries = flipped, "post published");
                }
                Err(err) => {
                    failed_count += 1;
                    error!(post_id = %post.id, error = %err, "failed to persist published post");
                }
            }
        }

        info!(updated_count, failed_count, "scheduled post sweep finished");
        Ok(SweepReport {
            updated_count,
            failed_count,
            swept_at: now,
        })
    }
}
