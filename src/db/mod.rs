use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::domain::InternalId;

pub mod migrator;
pub mod repositories;

pub use repositories::post::{AuthorPurge, AuthorTotals, Comment, Post};

/// Relational store for the micro-blog.
#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        if !db_url.contains(":memory:") {
            let path_str = db_url.trim_start_matches("sqlite:");
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    /// Single-connection in-memory database, for tests and dry runs.
    pub async fn in_memory() -> Result<Self> {
        Self::with_pool_options("sqlite::memory:", 1, 1).await
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn post_repo(&self) -> repositories::post::PostRepository {
        repositories::post::PostRepository::new(self.conn.clone())
    }

    pub async fn create_post(&self, author_id: InternalId, body: &str) -> Result<Post> {
        self.post_repo().create_post(author_id, body).await
    }

    pub async fn get_post(&self, id: i32) -> Result<Option<Post>> {
        self.post_repo().get_post(id).await
    }

    pub async fn list_posts(&self, limit: u64, offset: u64) -> Result<Vec<Post>> {
        self.post_repo().list_posts(limit, offset).await
    }

    pub async fn comment_counts(&self, post_ids: &[i32]) -> Result<HashMap<i32, u64>> {
        self.post_repo().comment_counts(post_ids).await
    }

    pub async fn delete_post(&self, id: i32) -> Result<Option<HashMap<InternalId, u64>>> {
        self.post_repo().delete_post(id).await
    }

    pub async fn create_comment(
        &self,
        post_id: i32,
        author_id: InternalId,
        body: &str,
    ) -> Result<Comment> {
        self.post_repo()
            .create_comment(post_id, author_id, body)
            .await
    }

    pub async fn list_comments(&self, post_id: i32) -> Result<Vec<Comment>> {
        self.post_repo().list_comments(post_id).await
    }

    pub async fn count_by_author(&self, author_id: InternalId) -> Result<(u64, u64)> {
        self.post_repo().count_by_author(author_id).await
    }

    pub async fn purge_author(&self, author_id: InternalId) -> Result<AuthorPurge> {
        self.post_repo().purge_author(author_id).await
    }

    pub async fn author_totals(
        &self,
        authors: Option<&[InternalId]>,
    ) -> Result<HashMap<InternalId, AuthorTotals>> {
        self.post_repo().author_totals(authors).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn purge_author_takes_comments_on_owned_posts() {
        let db = Store::in_memory().await.unwrap();
        let author = InternalId::generate();
        let other = InternalId::generate();

        let own = db.create_post(author, "mine").await.unwrap();
        let foreign = db.create_post(other, "theirs").await.unwrap();
        db.create_comment(own.id, other, "on mine").await.unwrap();
        db.create_comment(foreign.id, author, "on theirs").await.unwrap();
        db.create_comment(foreign.id, other, "stays").await.unwrap();

        let purge = db.purge_author(author).await.unwrap();
        assert_eq!(purge.posts, 1);
        assert_eq!(purge.comments, 2);

        assert!(db.get_post(own.id).await.unwrap().is_none());
        let remaining = db.list_comments(foreign.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].body, "stays");

        let again = db.purge_author(author).await.unwrap();
        assert_eq!(again, AuthorPurge::default());
    }

    #[tokio::test]
    async fn delete_post_reports_comment_authors() {
        let db = Store::in_memory().await.unwrap();
        let author = InternalId::generate();
        let reader = InternalId::generate();

        let post = db.create_post(author, "hello").await.unwrap();
        db.create_comment(post.id, reader, "hi").await.unwrap();
        db.create_comment(post.id, reader, "again").await.unwrap();

        let removed = db.delete_post(post.id).await.unwrap().unwrap();
        assert_eq!(removed.get(&reader), Some(&2));
        assert!(db.delete_post(post.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn author_totals_follow_the_rows() {
        let db = Store::in_memory().await.unwrap();
        let author = InternalId::generate();
        let reader = InternalId::generate();
        let silent = InternalId::generate();

        let post = db.create_post(author, "hello").await.unwrap();
        db.create_post(author, "again").await.unwrap();
        db.create_comment(post.id, reader, "hi").await.unwrap();
        db.create_comment(post.id, reader, "hi again").await.unwrap();
        db.create_comment(post.id, author, "thanks").await.unwrap();

        let all = db.author_totals(None).await.unwrap();
        assert_eq!(all[&author], AuthorTotals { posts: 2, comments: 1 });
        assert_eq!(all[&reader], AuthorTotals { posts: 0, comments: 2 });
        assert!(!all.contains_key(&silent));

        let scoped = db.author_totals(Some(&[reader, silent])).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[&reader].comments, 2);

        db.purge_author(author).await.unwrap();
        assert!(db.author_totals(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_posts_newest_first_with_counts() {
        let db = Store::in_memory().await.unwrap();
        let author = InternalId::generate();
        let first = db.create_post(author, "one").await.unwrap();
        let second = db.create_post(author, "two").await.unwrap();
        db.create_comment(first.id, author, "c").await.unwrap();

        let posts = db.list_posts(10, 0).await.unwrap();
        assert_eq!(posts[0].id, second.id);
        assert_eq!(posts[1].id, first.id);

        let counts = db.comment_counts(&[first.id, second.id]).await.unwrap();
        assert_eq!(counts.get(&first.id), Some(&1));
        assert_eq!(counts.get(&second.id), None);
    }
}
