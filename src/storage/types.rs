use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// An author with this name already exists for the outlet
    #[error("Author '{name}' already exists for outlet {outlet_id}")]
    DuplicateAuthor { outlet_id: i64, name: String },

    /// A tag with this term already exists
    #[error("Tag '{0}' already exists")]
    DuplicateTag(String),

    /// A stored timestamp could not be represented as a UTC instant
    #[error("Stored timestamp out of range: {0}")]
    InvalidTimestamp(i64),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

/// An article with the same URL has already been stored.
///
/// This is the expected outcome when a feed still lists an item that an
/// earlier pass ingested, so callers treat it as a skip rather than a failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Article with URL '{url}' already exists")]
pub struct DuplicateArticleError {
    pub url: String,
}

/// Failure modes of [`Database::create_article`](super::Database::create_article).
#[derive(Debug, Error)]
pub enum CreateArticleError {
    #[error(transparent)]
    Duplicate(#[from] DuplicateArticleError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<sqlx::Error> for CreateArticleError {
    fn from(err: sqlx::Error) -> Self {
        CreateArticleError::Database(DatabaseError::Other(err))
    }
}

/// True when the error is a UNIQUE constraint violation.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

pub(crate) fn from_timestamp(secs: i64) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::from_timestamp(secs, 0).ok_or(DatabaseError::InvalidTimestamp(secs))
}

// ============================================================================
// Input Types
// ============================================================================

/// Outlet fields supplied when registering a feed source
#[derive(Debug, Clone)]
pub struct NewOutlet {
    pub name: String,
    pub url: String,
    pub rss_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
}

/// Article ready to be persisted, already linked to resolved authors and tags
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub outlet_id: i64,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub pub_date: DateTime<Utc>,
    pub content: Option<String>,
    pub author_ids: Vec<i64>,
    pub tag_ids: Vec<i64>,
}

/// Filters for [`Database::list_articles`](super::Database::list_articles).
///
/// All filters combine with AND. `search` matches case-insensitively against
/// title, summary, content, tag terms and author names.
#[derive(Debug, Clone, Default)]
pub struct ArticleFilter {
    pub outlet_id: Option<i64>,
    pub tag: Option<String>,
    pub search: Option<String>,
    pub limit: Option<i64>,
}

/// Filters for [`Database::list_authors`](super::Database::list_authors).
#[derive(Debug, Clone, Default)]
pub struct AuthorFilter {
    pub outlet_id: Option<i64>,
    pub name_contains: Option<String>,
}

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct OutletDbRow {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub rss_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub updated_at: Option<i64>,
}

impl OutletDbRow {
    pub(crate) fn into_outlet(self) -> Result<Outlet, DatabaseError> {
        Ok(Outlet {
            id: self.id,
            name: self.name,
            url: self.url,
            rss_url: self.rss_url,
            description: self.description,
            language: self.language,
            updated_at: self.updated_at.map(from_timestamp).transpose()?,
        })
    }
}

/// Article columns without the many-to-many links, which are loaded in a
/// second batch query.
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub outlet_id: i64,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub pub_date: i64,
    pub content: Option<String>,
}

impl ArticleDbRow {
    pub(crate) fn into_article(
        self,
        author_ids: Vec<i64>,
        tags: Vec<String>,
    ) -> Result<Article, DatabaseError> {
        Ok(Article {
            id: self.id,
            outlet_id: self.outlet_id,
            title: self.title,
            summary: self.summary,
            url: self.url,
            pub_date: from_timestamp(self.pub_date)?,
            content: self.content,
            author_ids,
            tags,
        })
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// A registered feed source.
///
/// `updated_at` is the watermark: the last channel update time this outlet
/// was ingested through. `None` until the first successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Outlet {
    pub id: i64,
    pub name: String,
    pub url: String,
    pub rss_url: String,
    pub description: Option<String>,
    pub language: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Author scoped to a single outlet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Author {
    pub id: i64,
    pub outlet_id: i64,
    pub name: String,
    pub profile: Option<String>,
    pub twitter: Option<String>,
}

/// Tag shared across all outlets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, sqlx::FromRow)]
pub struct Tag {
    pub id: i64,
    pub term: String,
}

/// Stored article with its author ids and tag terms
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Article {
    pub id: i64,
    pub outlet_id: i64,
    pub title: String,
    pub summary: String,
    pub url: String,
    pub pub_date: DateTime<Utc>,
    pub content: Option<String>,
    pub author_ids: Vec<i64>,
    pub tags: Vec<String>,
}
