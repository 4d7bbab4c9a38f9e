use sqlx::QueryBuilder;
use std::collections::HashMap;

use super::schema::Database;
use super::types::{
    is_unique_violation, Article, ArticleDbRow, ArticleFilter, CreateArticleError, DatabaseError,
    DuplicateArticleError, NewArticle,
};

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Default page size when the caller gives no limit
const DEFAULT_ARTICLE_LIMIT: i64 = 500;

/// Ids per IN (...) clause when loading article links
const LINK_BATCH_SIZE: usize = 500;

impl Database {
    // ========================================================================
    // Article Operations
    // ========================================================================

    /// Persist a new article together with its author and tag links.
    ///
    /// The article row and its links are written in one transaction. A URL
    /// that is already stored yields [`CreateArticleError::Duplicate`]; the
    /// existing article is never updated.
    pub async fn create_article(&self, article: &NewArticle) -> Result<Article, CreateArticleError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            INSERT INTO articles (outlet_id, title, summary, url, pub_date, content)
            VALUES (?, ?, ?, ?, ?, ?)
            RETURNING id, outlet_id, title, summary, url, pub_date, content
        "#,
        )
        .bind(article.outlet_id)
        .bind(&article.title)
        .bind(&article.summary)
        .bind(&article.url)
        .bind(article.pub_date.timestamp())
        .bind(&article.content)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                CreateArticleError::Duplicate(DuplicateArticleError {
                    url: article.url.clone(),
                })
            } else {
                CreateArticleError::from(e)
            }
        })?;

        // OR IGNORE collapses an author or tag listed twice on the same entry
        for author_id in &article.author_ids {
            sqlx::query("INSERT OR IGNORE INTO article_authors (article_id, author_id) VALUES (?, ?)")
                .bind(row.id)
                .bind(author_id)
                .execute(&mut *tx)
                .await?;
        }
        for tag_id in &article.tag_ids {
            sqlx::query("INSERT OR IGNORE INTO article_tags (article_id, tag_id) VALUES (?, ?)")
                .bind(row.id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
        }

        let author_ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT author_id FROM article_authors WHERE article_id = ? ORDER BY author_id",
        )
        .bind(row.id)
        .fetch_all(&mut *tx)
        .await?;
        let tags: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT t.term FROM article_tags at
            JOIN tags t ON t.id = at.tag_id
            WHERE at.article_id = ?
            ORDER BY t.term
        "#,
        )
        .bind(row.id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(row.into_article(
            author_ids.into_iter().map(|(id,)| id).collect(),
            tags.into_iter().map(|(term,)| term).collect(),
        )?)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>, DatabaseError> {
        let row = sqlx::query_as::<_, ArticleDbRow>(
            r#"
            SELECT id, outlet_id, title, summary, url, pub_date, content
            FROM articles
            WHERE id = ?
        "#,
        )
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(self.attach_links(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    /// List articles newest first.
    ///
    /// A search that matches an article through several fields (say its
    /// title and one of its tags) still returns that article once, because
    /// related tables are only checked through `EXISTS`.
    ///
    /// The limit defaults to 500 and is capped at `MAX_ARTICLES` (2000).
    pub async fn list_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, DatabaseError> {
        let limit = filter
            .limit
            .unwrap_or(DEFAULT_ARTICLE_LIMIT)
            .clamp(0, MAX_ARTICLES);

        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT a.id, a.outlet_id, a.title, a.summary, a.url, a.pub_date, a.content \
             FROM articles a WHERE 1 = 1",
        );

        if let Some(outlet_id) = filter.outlet_id {
            builder.push(" AND a.outlet_id = ");
            builder.push_bind(outlet_id);
        }

        if let Some(term) = filter.tag.as_deref() {
            builder.push(
                " AND EXISTS (SELECT 1 FROM article_tags at JOIN tags t ON t.id = at.tag_id \
                 WHERE at.article_id = a.id AND t.term = ",
            );
            builder.push_bind(term.to_string());
            builder.push(")");
        }

        if let Some(query) = filter.search.as_deref().map(str::trim) {
            if !query.is_empty() {
                let pattern = super::like_pattern(query);
                builder.push(" AND (lower(a.title) LIKE ");
                builder.push_bind(pattern.clone());
                builder.push(" ESCAPE '\\' OR lower(a.summary) LIKE ");
                builder.push_bind(pattern.clone());
                builder.push(" ESCAPE '\\' OR lower(COALESCE(a.content, '')) LIKE ");
                builder.push_bind(pattern.clone());
                builder.push(
                    " ESCAPE '\\' OR EXISTS (SELECT 1 FROM article_tags at JOIN tags t ON t.id = at.tag_id \
                     WHERE at.article_id = a.id AND lower(t.term) LIKE ",
                );
                builder.push_bind(pattern.clone());
                builder.push(
                    " ESCAPE '\\') OR EXISTS (SELECT 1 FROM article_authors aa JOIN authors au ON au.id = aa.author_id \
                     WHERE aa.article_id = a.id AND lower(au.name) LIKE ",
                );
                builder.push_bind(pattern);
                builder.push(" ESCAPE '\\'))");
            }
        }

        builder.push(" ORDER BY a.pub_date DESC, a.id DESC LIMIT ");
        builder.push_bind(limit);

        tracing::debug!(limit = limit, ?filter, "list_articles");

        let rows = builder
            .build_query_as::<ArticleDbRow>()
            .fetch_all(&self.pool)
            .await?;

        self.attach_links(rows).await
    }

    /// Load author ids and tag terms for a page of articles in batched
    /// queries, then build the public [`Article`] values in input order.
    async fn attach_links(&self, rows: Vec<ArticleDbRow>) -> Result<Vec<Article>, DatabaseError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = rows.iter().map(|r| r.id).collect();
        let mut authors: HashMap<i64, Vec<i64>> = HashMap::new();
        let mut tags: HashMap<i64, Vec<String>> = HashMap::new();

        for chunk in ids.chunks(LINK_BATCH_SIZE) {
            let mut author_query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "SELECT article_id, author_id FROM article_authors WHERE article_id IN (",
            );
            let mut separated = author_query.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY article_id, author_id");

            let pairs: Vec<(i64, i64)> = author_query.build_query_as().fetch_all(&self.pool).await?;
            for (article_id, author_id) in pairs {
                authors.entry(article_id).or_default().push(author_id);
            }

            let mut tag_query: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                "SELECT at.article_id, t.term FROM article_tags at \
                 JOIN tags t ON t.id = at.tag_id WHERE at.article_id IN (",
            );
            let mut separated = tag_query.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(") ORDER BY at.article_id, t.term");

            let pairs: Vec<(i64, String)> = tag_query.build_query_as().fetch_all(&self.pool).await?;
            for (article_id, term) in pairs {
                tags.entry(article_id).or_default().push(term);
            }
        }

        rows.into_iter()
            .map(|row| {
                let id = row.id;
                row.into_article(
                    authors.remove(&id).unwrap_or_default(),
                    tags.remove(&id).unwrap_or_default(),
                )
            })
            .collect()
    }
}
