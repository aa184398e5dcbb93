use anyhow::{Context, Result};
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use std::collections::HashMap;
use tracing::{info, warn};

use crate::domain::InternalId;
use crate::entities::{comments, prelude::*, posts};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    pub id: i32,
    pub author_id: InternalId,
    pub body: String,
    pub created_at: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: i32,
    pub post_id: i32,
    pub author_id: InternalId,
    pub body: String,
    pub created_at: String,
}

/// Rows removed on behalf of one author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorPurge {
    pub posts: u64,
    pub comments: u64,
}

/// Rows currently attributed to one author.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AuthorTotals {
    pub posts: u64,
    pub comments: u64,
}

fn tally_authors(author_ids: Vec<String>) -> HashMap<InternalId, u64> {
    let mut tally = HashMap::new();
    for author in author_ids {
        if let Ok(id) = author.parse() {
            *tally.entry(id).or_insert(0) += 1;
        }
    }
    tally
}

/// Repository for micro-blog posts and their comments
pub struct PostRepository {
    conn: DatabaseConnection,
}

impl PostRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    // ========================================================================
    // Model Conversion Helpers
    // ========================================================================

    fn map_post(model: posts::Model) -> Option<Post> {
        let Ok(author_id) = model.author_id.parse() else {
            warn!(post_id = model.id, author_id = %model.author_id, "Skipping post with invalid author id");
            return None;
        };
        Some(Post {
            id: model.id,
            author_id,
            body: model.body,
            created_at: model.created_at,
        })
    }

    fn map_comment(model: comments::Model) -> Option<Comment> {
        let Ok(author_id) = model.author_id.parse() else {
            warn!(comment_id = model.id, author_id = %model.author_id, "Skipping comment with invalid author id");
            return None;
        };
        Some(Comment {
            id: model.id,
            post_id: model.post_id,
            author_id,
            body: model.body,
            created_at: model.created_at,
        })
    }

    // ========================================================================
    // Posts
    // ========================================================================

    pub async fn create_post(&self, author_id: InternalId, body: &str) -> Result<Post> {
        let now = chrono::Utc::now().to_rfc3339();
        let active = posts::ActiveModel {
            author_id: Set(author_id.to_string()),
            body: Set(body.to_string()),
            created_at: Set(now.clone()),
            ..Default::default()
        };

        let res = Posts::insert(active)
            .exec(&self.conn)
            .await
            .context("Failed to insert post")?;

        Ok(Post {
            id: res.last_insert_id,
            author_id,
            body: body.to_string(),
            created_at: now,
        })
    }

    pub async fn get_post(&self, id: i32) -> Result<Option<Post>> {
        let row = Posts::find_by_id(id).one(&self.conn).await?;
        Ok(row.and_then(Self::map_post))
    }

    /// Newest first.
    pub async fn list_posts(&self, limit: u64, offset: u64) -> Result<Vec<Post>> {
        let rows = Posts::find()
            .order_by_desc(posts::Column::Id)
            .limit(limit)
            .offset(offset)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().filter_map(Self::map_post).collect())
    }

    pub async fn comment_counts(&self, post_ids: &[i32]) -> Result<HashMap<i32, u64>> {
        if post_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let rows = Comments::find()
            .filter(comments::Column::PostId.is_in(post_ids.iter().copied()))
            .all(&self.conn)
            .await?;

        let mut counts = HashMap::new();
        for row in rows {
            *counts.entry(row.post_id).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// Removes a post and every comment on it. Returns the removed comments
    /// per comment author, or `None` if the post did not exist.
    pub async fn delete_post(&self, id: i32) -> Result<Option<HashMap<InternalId, u64>>> {
        let txn = self.conn.begin().await?;

        let comment_authors: Vec<String> = Comments::find()
            .select_only()
            .column(comments::Column::AuthorId)
            .filter(comments::Column::PostId.eq(id))
            .into_tuple()
            .all(&txn)
            .await?;

        let removed_comments = Comments::delete_many()
            .filter(comments::Column::PostId.eq(id))
            .exec(&txn)
            .await?
            .rows_affected;
        let removed_posts = Posts::delete_by_id(id).exec(&txn).await?.rows_affected;

        txn.commit().await?;

        if removed_posts == 0 {
            return Ok(None);
        }
        info!(post_id = id, removed_comments, "Deleted post");
        Ok(Some(tally_authors(comment_authors)))
    }

    // ========================================================================
    // Comments
    // ========================================================================

    pub async fn create_comment(
        &self,
        post_id: i32,
        author_id: InternalId,
        body: &str,
    ) -> Result<Comment> {
        let now = chrono::Utc::now().to_rfc3339();
        let active = comments::ActiveModel {
            post_id: Set(post_id),
            author_id: Set(author_id.to_string()),
            body: Set(body.to_string()),
            created_at: Set(now.clone()),
            ..Default::default()
        };

        let res = Comments::insert(active)
            .exec(&self.conn)
            .await
            .context("Failed to insert comment")?;

        Ok(Comment {
            id: res.last_insert_id,
            post_id,
            author_id,
            body: body.to_string(),
            created_at: now,
        })
    }

    /// Oldest first.
    pub async fn list_comments(&self, post_id: i32) -> Result<Vec<Comment>> {
        let rows = Comments::find()
            .filter(comments::Column::PostId.eq(post_id))
            .order_by_asc(comments::Column::Id)
            .all(&self.conn)
            .await?;

        Ok(rows.into_iter().filter_map(Self::map_comment).collect())
    }

    // ========================================================================
    // Author-wide operations
    // ========================================================================

    /// Posts and comments currently attributed to the author.
    pub async fn count_by_author(&self, author_id: InternalId) -> Result<(u64, u64)> {
        let author = author_id.to_string();
        let posts = Posts::find()
            .filter(posts::Column::AuthorId.eq(author.clone()))
            .count(&self.conn)
            .await?;
        let comments = Comments::find()
            .filter(comments::Column::AuthorId.eq(author))
            .count(&self.conn)
            .await?;
        Ok((posts, comments))
    }

    /// Deletes the author's posts, all comments on those posts and every
    /// comment the author wrote elsewhere. Safe to repeat.
    pub async fn purge_author(&self, author_id: InternalId) -> Result<AuthorPurge> {
        let author = author_id.to_string();
        let txn = self.conn.begin().await?;

        let owned_posts: Vec<i32> = Posts::find()
            .select_only()
            .column(posts::Column::Id)
            .filter(posts::Column::AuthorId.eq(author.clone()))
            .into_tuple()
            .all(&txn)
            .await?;

        let doomed = Condition::any()
            .add(comments::Column::AuthorId.eq(author.clone()))
            .add(comments::Column::PostId.is_in(owned_posts.iter().copied()));

        let comments = Comments::delete_many()
            .filter(doomed)
            .exec(&txn)
            .await?
            .rows_affected;

        let posts = Posts::delete_many()
            .filter(posts::Column::AuthorId.eq(author))
            .exec(&txn)
            .await?
            .rows_affected;

        txn.commit().await?;

        Ok(AuthorPurge { posts, comments })
    }

    /// Post and comment totals per author, for every author with at least
    /// one row, or only for `authors` when given.
    pub async fn author_totals(
        &self,
        authors: Option<&[InternalId]>,
    ) -> Result<HashMap<InternalId, AuthorTotals>> {
        let scope: Option<Vec<String>> =
            authors.map(|ids| ids.iter().map(ToString::to_string).collect());

        let mut post_query = Posts::find()
            .select_only()
            .column(posts::Column::AuthorId)
            .column_as(posts::Column::Id.count(), "count")
            .group_by(posts::Column::AuthorId);
        let mut comment_query = Comments::find()
            .select_only()
            .column(comments::Column::AuthorId)
            .column_as(comments::Column::Id.count(), "count")
            .group_by(comments::Column::AuthorId);
        if let Some(scope) = &scope {
            post_query = post_query.filter(posts::Column::AuthorId.is_in(scope.clone()));
            comment_query = comment_query.filter(comments::Column::AuthorId.is_in(scope.clone()));
        }

        let post_rows: Vec<(String, i64)> = post_query.into_tuple().all(&self.conn).await?;
        let comment_rows: Vec<(String, i64)> = comment_query.into_tuple().all(&self.conn).await?;

        let mut totals: HashMap<InternalId, AuthorTotals> = HashMap::new();
        for (author, count) in post_rows {
            if let Ok(id) = author.parse() {
                totals.entry(id).or_default().posts = count.unsigned_abs();
            }
        }
        for (author, count) in comment_rows {
            if let Ok(id) = author.parse() {
                totals.entry(id).or_default().comments = count.unsigned_abs();
            }
        }
        Ok(totals)
    }
}
