use super::schema::Database;
use super::types::{is_unique_violation, DatabaseError, Tag};

impl Database {
    // ========================================================================
    // Tag Operations
    // ========================================================================

    /// Look up a tag by exact, case-sensitive term
    pub async fn find_tag(&self, term: &str) -> Result<Option<Tag>, DatabaseError> {
        let tag = sqlx::query_as::<_, Tag>("SELECT id, term FROM tags WHERE term = ?")
            .bind(term)
            .fetch_optional(&self.pool)
            .await?;
        Ok(tag)
    }

    /// Create a tag; fails with [`DatabaseError::DuplicateTag`] if the term exists
    pub async fn create_tag(&self, term: &str) -> Result<Tag, DatabaseError> {
        sqlx::query_as::<_, Tag>("INSERT INTO tags (term) VALUES (?) RETURNING id, term")
            .bind(term)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    DatabaseError::DuplicateTag(term.to_string())
                } else {
                    DatabaseError::Other(e)
                }
            })
    }

    /// All tags ordered by term ascending
    pub async fn list_tags(&self) -> Result<Vec<Tag>, DatabaseError> {
        let tags = sqlx::query_as::<_, Tag>("SELECT id, term FROM tags ORDER BY term")
            .fetch_all(&self.pool)
            .await?;
        Ok(tags)
    }
}
