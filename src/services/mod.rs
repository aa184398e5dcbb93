pub mod account_service;
pub mod account_service_impl;
pub use account_service::{
    AccountError, AccountService, AccountUpdate, AccountView, LoginResult, ProfileFieldUpdate,
    PublicProfile, UpdateResult,
};
pub use account_service_impl::StoreAccountService;

pub mod cascade;
pub use cascade::{CascadeReport, CascadeStep, DeletionCoordinator};

pub mod leaderboard;
pub use leaderboard::{GameError, LeaderboardService, RankedScore, ScoreReceipt};

pub mod drawing;
pub use drawing::{DrawingError, DrawingService, DrawingView, LikeResult};

pub mod blog;
pub use blog::{BlogError, BlogService, CommentView, PostView};

use crate::domain::InternalId;
use crate::models::{Account, Accounts};
use crate::store::{RecordStore, StoreError, collection};

/// Applies `f` to one active account under the users lock. `None` when the
/// account is gone or soft-deleted.
pub(crate) async fn update_active_account<R, F>(
    store: &RecordStore,
    id: InternalId,
    f: F,
) -> Result<Option<R>, StoreError>
where
    R: Send + 'static,
    F: FnOnce(&mut Account) -> R + Send + 'static,
{
    store
        .with_exclusive_lock(&collection::users(), move |accounts: &mut Accounts| {
            Ok::<_, StoreError>(
                accounts
                    .get_mut(&id)
                    .filter(|a| a.is_active())
                    .map(|account| {
                        let result = f(account);
                        account.touch();
                        result
                    }),
            )
        })
        .await
}
