//! Cascading account deletion.
//!
//! Nothing enforces referential integrity between the stores, so purging an
//! account walks each of them in turn. Steps take one collection lock at a
//! time and are each idempotent: a cascade that stopped halfway can simply be
//! run again. There is no rollback.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info, warn};

use crate::db;
use crate::domain::{DrawingId, Game, InternalId};
use crate::models::{AccountStatus, Accounts, Drawings, Leaderboard};
use crate::services::blog::sync_blog_counters;
use crate::store::{RecordStore, StoreError, collection};

/// The cascade, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadeStep {
    SoftDelete,
    RemoveAccount,
    RemoveDrawings,
    RemovePosts,
    StripLikes,
    ScrubLeaderboards,
}

impl CascadeStep {
    pub const ORDER: [Self; 6] = [
        Self::SoftDelete,
        Self::RemoveAccount,
        Self::RemoveDrawings,
        Self::RemovePosts,
        Self::StripLikes,
        Self::ScrubLeaderboards,
    ];
}

impl fmt::Display for CascadeStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SoftDelete => "soft_delete",
            Self::RemoveAccount => "remove_account",
            Self::RemoveDrawings => "remove_drawings",
            Self::RemovePosts => "remove_posts",
            Self::StripLikes => "strip_likes",
            Self::ScrubLeaderboards => "scrub_leaderboards",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepFailure {
    pub step: CascadeStep,
    pub error: String,
}

/// What one cascade run changed. A second run over the same id reports zeros.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub internal_id: InternalId,
    pub account_removed: bool,
    pub drawings_removed: usize,
    pub posts_removed: u64,
    pub comments_removed: u64,
    pub likes_stripped: usize,
    pub leaderboard_entries_removed: usize,
    pub completed: Vec<CascadeStep>,
    pub failed: Vec<StepFailure>,
}

impl CascadeReport {
    fn new(internal_id: InternalId) -> Self {
        Self {
            internal_id,
            account_removed: false,
            drawings_removed: 0,
            posts_removed: 0,
            comments_removed: 0,
            likes_stripped: 0,
            leaderboard_entries_removed: 0,
            completed: Vec::new(),
            failed: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    /// True when the run found nothing left to clean.
    #[must_use]
    pub const fn changed_nothing(&self) -> bool {
        !self.account_removed
            && self.drawings_removed == 0
            && self.posts_removed == 0
            && self.comments_removed == 0
            && self.likes_stripped == 0
            && self.leaderboard_entries_removed == 0
    }

    fn record(&mut self, step: CascadeStep, result: Result<(), String>) {
        match result {
            Ok(()) => self.completed.push(step),
            Err(e) => {
                error!(internal_id = %self.internal_id, step = %step, error = %e, "Cascade step failed");
                self.failed.push(StepFailure { step, error: e });
            }
        }
    }
}

#[derive(Clone)]
pub struct DeletionCoordinator {
    store: RecordStore,
    db: db::Store,
}

impl DeletionCoordinator {
    #[must_use]
    pub const fn new(store: RecordStore, db: db::Store) -> Self {
        Self { store, db }
    }

    /// Step 1 on its own. Returns whether the status changed.
    pub async fn soft_delete(&self, id: InternalId) -> Result<bool, StoreError> {
        let changed = self
            .store
            .with_exclusive_lock(&collection::users(), move |accounts: &mut Accounts| {
                let Some(account) = accounts.get_mut(&id) else {
                    return Ok::<_, StoreError>(false);
                };
                if account.status == AccountStatus::Deleted {
                    return Ok(false);
                }
                account.status = AccountStatus::Deleted;
                account.touch();
                Ok(true)
            })
            .await?;

        if changed {
            info!(internal_id = %id, "Account soft-deleted");
        }
        Ok(changed)
    }

    /// Runs the steps of [`CascadeStep::ORDER`] for `id`. Check
    /// [`CascadeReport::is_complete`]; an incomplete run is finished by running
    /// it again.
    ///
    /// If the account cannot be marked deleted, nothing else is touched: it
    /// would stay reachable while its artifacts disappear. Once it is marked,
    /// a failing step is recorded and the remaining ones still run.
    pub async fn hard_delete_account(&self, id: InternalId) -> CascadeReport {
        let mut report = CascadeReport::new(id);
        info!(internal_id = %id, "Starting account cascade");

        for step in CascadeStep::ORDER {
            let result = self.run_step(step, &mut report).await;
            let stop = step == CascadeStep::SoftDelete && result.is_err();
            report.record(step, result);
            if stop {
                warn!(internal_id = %id, "Account could not be marked deleted; cascade stopped");
                return report;
            }
        }

        if report.is_complete() {
            info!(
                internal_id = %id,
                drawings = report.drawings_removed,
                posts = report.posts_removed,
                comments = report.comments_removed,
                likes = report.likes_stripped,
                leaderboard_entries = report.leaderboard_entries_removed,
                "Account cascade finished"
            );
        } else {
            warn!(
                internal_id = %id,
                failed = report.failed.len(),
                "Account cascade incomplete; run it again to finish"
            );
        }
        report
    }

    async fn run_step(&self, step: CascadeStep, report: &mut CascadeReport) -> Result<(), String> {
        let id = report.internal_id;
        match step {
            CascadeStep::SoftDelete => self
                .soft_delete(id)
                .await
                .map(|_| ())
                .map_err(|e| e.to_string()),
            CascadeStep::RemoveAccount => {
                report.account_removed =
                    self.remove_account(id).await.map_err(|e| e.to_string())?;
                Ok(())
            }
            CascadeStep::RemoveDrawings => {
                report.drawings_removed =
                    self.remove_drawings(id).await.map_err(|e| e.to_string())?;
                Ok(())
            }
            CascadeStep::RemovePosts => {
                let purge = self.db.purge_author(id).await.map_err(|e| e.to_string())?;
                report.posts_removed = purge.posts;
                report.comments_removed = purge.comments;
                // Other people's comments on the purged posts went too. The
                // recount covers every account, so a rerun repairs counters
                // even when the rows were removed by an earlier run.
                sync_blog_counters(&self.db, &self.store, None)
                    .await
                    .map(|_| ())
                    .map_err(|e| e.to_string())
            }
            CascadeStep::StripLikes => {
                report.likes_stripped = self.strip_likes(id).await.map_err(|e| e.to_string())?;
                Ok(())
            }
            CascadeStep::ScrubLeaderboards => {
                report.leaderboard_entries_removed =
                    self.scrub_leaderboards(id).await.map_err(|e| e.to_string())?;
                Ok(())
            }
        }
    }

    async fn remove_account(&self, id: InternalId) -> Result<bool, StoreError> {
        self.store
            .with_exclusive_lock(&collection::users(), move |accounts: &mut Accounts| {
                Ok::<_, StoreError>(accounts.remove(&id).is_some())
            })
            .await
    }

    /// Image files go first so that a crash leaves metadata to find them by.
    async fn remove_drawings(&self, id: InternalId) -> Result<usize, StoreError> {
        let drawings = self.store.snapshot(&collection::drawings()).await?;
        let owned: Vec<DrawingId> = drawings
            .values()
            .filter(|d| d.artist_id == id)
            .map(|d| d.id)
            .collect();

        if owned.is_empty() {
            return Ok(0);
        }

        let dir = self.store.drawings_dir();
        for drawing_id in &owned {
            remove_image(dir.join(format!("{drawing_id}.png"))).await?;
        }

        self.store
            .with_exclusive_lock(&collection::drawings(), move |drawings: &mut Drawings| {
                let before = drawings.len();
                drawings.retain(|_, d| d.artist_id != id);
                Ok::<_, StoreError>(before - drawings.len())
            })
            .await
    }

    /// Drops the deleted id from the likers of the remaining drawings, then
    /// drops likes that point at drawings which no longer exist.
    ///
    /// The drawings are read after the users lock is taken. A like reaches the
    /// users collection only after its drawing is stored, so a drawing missing
    /// from that read is really gone.
    async fn strip_likes(&self, id: InternalId) -> Result<usize, StoreError> {
        let removed_from_drawings = self
            .store
            .with_exclusive_lock(&collection::drawings(), move |drawings: &mut Drawings| {
                let mut removed = 0;
                for drawing in drawings.values_mut() {
                    let before = drawing.liked_by.len();
                    drawing.liked_by.retain(|liker| *liker != id);
                    removed += before - drawing.liked_by.len();
                }
                Ok::<_, StoreError>(removed)
            })
            .await?;

        let store = self.store.clone();
        let existing_drawings = async move {
            let drawings = store.snapshot(&collection::drawings()).await?;
            Ok::<HashSet<DrawingId>, StoreError>(drawings.into_keys().collect())
        };

        let removed_from_accounts = self
            .store
            .with_exclusive_lock_after(
                &collection::users(),
                existing_drawings,
                |accounts: &mut Accounts, existing: HashSet<DrawingId>| {
                    let mut removed = 0;
                    for account in accounts.values_mut() {
                        let before = account.liked_drawings.len();
                        account.liked_drawings.retain(|d| existing.contains(d));
                        removed += before - account.liked_drawings.len();
                    }
                    Ok::<_, StoreError>(removed)
                },
            )
            .await?;

        Ok(removed_from_drawings + removed_from_accounts)
    }

    async fn scrub_leaderboards(&self, id: InternalId) -> Result<usize, StoreError> {
        let mut removed = 0;
        for game in Game::ALL {
            removed += self
                .store
                .with_exclusive_lock(&collection::leaderboard(game), move |entries: &mut Leaderboard| {
                    let before = entries.len();
                    entries.retain(|e| e.player_id != id);
                    Ok::<_, StoreError>(before - entries.len())
                })
                .await?;
        }
        Ok(removed)
    }
}

async fn remove_image(path: PathBuf) -> Result<(), StoreError> {
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StoreError::Io {
            collection: "drawings".to_string(),
            source,
        }),
    }
}
