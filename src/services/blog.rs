//! Micro-blog posts and comments.
//!
//! Rows live in SQLite and carry only the author's internal id. Account
//! counters (`post_count`, `comment_count`) are recounted from the rows after
//! every change, so a write that failed halfway is repaired by the next one.

use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;
use tracing::info;

use crate::db::{self, AuthorTotals, Comment, Post};
use crate::domain::InternalId;
use crate::identity::{Directory, IdentityResolver};
use crate::models::Accounts;
use crate::store::{RecordStore, StoreError, collection};

pub const MAX_BODY_LENGTH: usize = 2000;
pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Post not found")]
    NotFound,

    #[error("Only the author can delete this post")]
    Forbidden,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<anyhow::Error> for BlogError {
    fn from(err: anyhow::Error) -> Self {
        Self::Database(err.to_string())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: i32,
    pub author: String,
    pub body: String,
    pub created_at: String,
    pub comment_count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    pub id: i32,
    pub post_id: i32,
    pub author: String,
    pub body: String,
    pub created_at: String,
}

fn comment_view(comment: Comment, author: String) -> CommentView {
    CommentView {
        id: comment.id,
        post_id: comment.post_id,
        author,
        body: comment.body,
        created_at: comment.created_at,
    }
}

fn validate_body(body: &str) -> Result<String, BlogError> {
    let body = body.trim();
    if body.is_empty() {
        return Err(BlogError::Validation("Body cannot be empty".to_string()));
    }
    if body.chars().count() > MAX_BODY_LENGTH {
        return Err(BlogError::Validation(format!(
            "Body must be at most {MAX_BODY_LENGTH} characters"
        )));
    }
    Ok(body.to_string())
}

#[derive(Clone)]
pub struct BlogService {
    db: db::Store,
    store: RecordStore,
    identity: IdentityResolver,
}

impl BlogService {
    #[must_use]
    pub const fn new(db: db::Store, store: RecordStore, identity: IdentityResolver) -> Self {
        Self {
            db,
            store,
            identity,
        }
    }

    pub async fn create_post(
        &self,
        author: InternalId,
        author_name: &str,
        body: &str,
    ) -> Result<PostView, BlogError> {
        let body = validate_body(body)?;
        let post = self.db.create_post(author, &body).await?;

        sync_blog_counters(&self.db, &self.store, Some(vec![author])).await?;
        info!(post_id = post.id, author = %author, "Post created");

        Ok(PostView {
            id: post.id,
            author: author_name.to_string(),
            body: post.body,
            created_at: post.created_at,
            comment_count: 0,
        })
    }

    /// Newest first. Posts whose author no longer resolves are skipped.
    pub async fn list_posts(&self, limit: u64, offset: u64) -> Result<Vec<PostView>, BlogError> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let posts = self.db.list_posts(limit, offset).await?;
        let ids: Vec<i32> = posts.iter().map(|p| p.id).collect();
        let counts = self.db.comment_counts(&ids).await?;
        let directory = self.identity.resolve_many().await?;

        Ok(posts
            .into_iter()
            .filter_map(|post| post_view(post, &directory, &counts))
            .collect())
    }

    /// Deletes the post and its comments, and moves every affected counter.
    pub async fn delete_post(&self, actor: InternalId, post_id: i32) -> Result<(), BlogError> {
        let post = self.db.get_post(post_id).await?.ok_or(BlogError::NotFound)?;
        if post.author_id != actor {
            return Err(BlogError::Forbidden);
        }

        let Some(removed) = self.db.delete_post(post_id).await? else {
            return Err(BlogError::NotFound);
        };

        let author = post.author_id;
        let mut affected: Vec<InternalId> = removed.into_keys().collect();
        affected.push(author);
        sync_blog_counters(&self.db, &self.store, Some(affected)).await?;

        info!(post_id, author = %author, "Post deleted");
        Ok(())
    }

    pub async fn comment(
        &self,
        author: InternalId,
        author_name: &str,
        post_id: i32,
        body: &str,
    ) -> Result<CommentView, BlogError> {
        let body = validate_body(body)?;
        if self.db.get_post(post_id).await?.is_none() {
            return Err(BlogError::NotFound);
        }

        let comment = self.db.create_comment(post_id, author, &body).await?;
        sync_blog_counters(&self.db, &self.store, Some(vec![author])).await?;

        Ok(comment_view(comment, author_name.to_string()))
    }

    /// Oldest first. Comments whose author no longer resolves are skipped.
    pub async fn list_comments(&self, post_id: i32) -> Result<Vec<CommentView>, BlogError> {
        if self.db.get_post(post_id).await?.is_none() {
            return Err(BlogError::NotFound);
        }

        let comments = self.db.list_comments(post_id).await?;
        let directory = self.identity.resolve_many().await?;

        Ok(comments
            .into_iter()
            .filter_map(|comment| {
                let author = directory.username(&comment.author_id)?.to_string();
                Some(comment_view(comment, author))
            })
            .collect())
    }
}

fn post_view(post: Post, directory: &Directory, counts: &HashMap<i32, u64>) -> Option<PostView> {
    let author = directory.username(&post.author_id)?.to_string();
    Some(PostView {
        comment_count: counts.get(&post.id).copied().unwrap_or(0),
        id: post.id,
        author,
        body: post.body,
        created_at: post.created_at,
    })
}

/// Sets `post_count` and `comment_count` from the database rows, for the
/// given accounts or for every account. Returns how many records changed.
///
/// The rows are counted with the users lock held. Every writer commits its rows
/// before taking that lock, so whoever writes the counters last has seen every
/// committed row.
pub(crate) async fn sync_blog_counters(
    db: &db::Store,
    store: &RecordStore,
    only: Option<Vec<InternalId>>,
) -> Result<usize, BlogError> {
    let db = db.clone();
    let scope = only.clone();
    let count_rows = async move {
        db.author_totals(scope.as_deref())
            .await
            .map_err(BlogError::from)
    };

    store
        .with_exclusive_lock_after(
            &collection::users(),
            count_rows,
            move |accounts: &mut Accounts, totals: HashMap<InternalId, AuthorTotals>| {
                Ok(apply_blog_totals(accounts, only.as_deref(), &totals))
            },
        )
        .await
}

fn apply_blog_totals(
    accounts: &mut Accounts,
    only: Option<&[InternalId]>,
    totals: &HashMap<InternalId, AuthorTotals>,
) -> usize {
    let mut changed = 0;
    for account in accounts.values_mut() {
        if only.is_some_and(|ids| !ids.contains(&account.internal_id)) {
            continue;
        }
        let counted = totals.get(&account.internal_id).copied().unwrap_or_default();
        if account.post_count != counted.posts || account.comment_count != counted.comments {
            account.post_count = counted.posts;
            account.comment_count = counted.comments;
            account.touch();
            changed += 1;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;

    #[test]
    fn body_is_trimmed_and_bounded() {
        assert_eq!(validate_body("  hi  ").unwrap(), "hi");
        assert!(matches!(validate_body("   "), Err(BlogError::Validation(_))));
        assert!(validate_body(&"x".repeat(MAX_BODY_LENGTH + 1)).is_err());
    }

    #[test]
    fn totals_overwrite_drifted_counters_in_scope_only() {
        let mut drifted = Account::new("bob".to_string(), "h".to_string(), "s".to_string());
        drifted.comment_count = 3;
        drifted.post_count = 1;
        let bob = drifted.internal_id;
        let mut untouched = Account::new("cy".to_string(), "h".to_string(), "s".to_string());
        untouched.comment_count = 9;
        let cy = untouched.internal_id;

        let mut accounts = Accounts::new();
        accounts.insert(bob, drifted);
        accounts.insert(cy, untouched);

        let totals = HashMap::from([(bob, AuthorTotals { posts: 1, comments: 1 })]);
        assert_eq!(apply_blog_totals(&mut accounts, Some(&[bob]), &totals), 1);
        assert_eq!(accounts[&bob].comment_count, 1);
        assert_eq!(accounts[&cy].comment_count, 9);

        // No rows at all means zero.
        assert_eq!(apply_blog_totals(&mut accounts, None, &totals), 1);
        assert_eq!(accounts[&cy].comment_count, 0);
        assert_eq!(apply_blog_totals(&mut accounts, None, &totals), 0);
    }
}
