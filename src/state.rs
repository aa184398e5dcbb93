use anyhow::Context;
use std::sync::Arc;
use tracing::info;

use crate::auth::TokenCodec;
use crate::config::Config;
use crate::db::Store;
use crate::identity::IdentityResolver;
use crate::services::{
    AccountService, BlogService, DeletionCoordinator, DrawingService, LeaderboardService,
    StoreAccountService,
};
use crate::store::RecordStore;

/// Long-lived handles shared by the HTTP layer and the CLI.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    /// Blog posts and comments.
    pub db: Store,

    /// JSON collections: users, drawings, leaderboards.
    pub records: RecordStore,

    pub identity: IdentityResolver,

    pub accounts: Arc<dyn AccountService>,

    pub leaderboard: LeaderboardService,

    pub drawings: DrawingService,

    pub blog: BlogService,

    pub coordinator: DeletionCoordinator,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let db = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await
        .context("Failed to open blog database")?;

        let records = RecordStore::open(config.data_dir())?;
        Self::with_stores(config, db, records)
    }

    /// Wires services around already-open stores.
    pub fn with_stores(config: Config, db: Store, records: RecordStore) -> anyhow::Result<Self> {
        let codec = TokenCodec::from_config(&config.security)?;
        let identity = IdentityResolver::new(records.clone());
        let coordinator = DeletionCoordinator::new(records.clone(), db.clone());

        let accounts: Arc<dyn AccountService> = Arc::new(StoreAccountService::new(
            records.clone(),
            identity.clone(),
            codec,
            config.security.clone(),
            coordinator.clone(),
        ));

        info!(
            data_dir = %records.root().display(),
            token_ttl_seconds = config.security.token_ttl_seconds,
            "Services initialized"
        );

        Ok(Self {
            leaderboard: LeaderboardService::new(records.clone(), identity.clone()),
            drawings: DrawingService::new(records.clone(), identity.clone()),
            blog: BlogService::new(db.clone(), records.clone(), identity.clone()),
            config: Arc::new(config),
            db,
            records,
            identity,
            accounts,
            coordinator,
        })
    }
}
