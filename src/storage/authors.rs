use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{is_unique_violation, Author, AuthorFilter, DatabaseError};

impl Database {
    // ========================================================================
    // Author Operations
    // ========================================================================

    /// Look up an author by name within one outlet (exact match)
    pub async fn find_author(
        &self,
        outlet_id: i64,
        name: &str,
    ) -> Result<Option<Author>, DatabaseError> {
        let author = sqlx::query_as::<_, Author>(
            "SELECT id, outlet_id, name, profile, twitter FROM authors WHERE outlet_id = ? AND name = ?",
        )
        .bind(outlet_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(author)
    }

    pub async fn get_author(&self, author_id: i64) -> Result<Option<Author>, DatabaseError> {
        let author = sqlx::query_as::<_, Author>(
            "SELECT id, outlet_id, name, profile, twitter FROM authors WHERE id = ?",
        )
        .bind(author_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(author)
    }

    /// Create an author with only a name.
    ///
    /// Profile and twitter are never present in feed data, so they start
    /// empty. Fails with [`DatabaseError::DuplicateAuthor`] if the outlet
    /// already has an author with this name.
    pub async fn create_author(&self, outlet_id: i64, name: &str) -> Result<Author, DatabaseError> {
        sqlx::query_as::<_, Author>(
            r#"
            INSERT INTO authors (outlet_id, name)
            VALUES (?, ?)
            RETURNING id, outlet_id, name, profile, twitter
        "#,
        )
        .bind(outlet_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                DatabaseError::DuplicateAuthor {
                    outlet_id,
                    name: name.to_string(),
                }
            } else {
                DatabaseError::Other(e)
            }
        })
    }

    /// List authors ordered by name ascending
    pub async fn list_authors(&self, filter: &AuthorFilter) -> Result<Vec<Author>, DatabaseError> {
        let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
            "SELECT id, outlet_id, name, profile, twitter FROM authors WHERE 1 = 1",
        );

        if let Some(outlet_id) = filter.outlet_id {
            builder.push(" AND outlet_id = ");
            builder.push_bind(outlet_id);
        }
        if let Some(needle) = filter.name_contains.as_deref() {
            builder.push(" AND lower(name) LIKE ");
            builder.push_bind(super::like_pattern(needle));
            builder.push(" ESCAPE '\\'");
        }
        builder.push(" ORDER BY name, id");

        let authors = builder
            .build_query_as::<Author>()
            .fetch_all(&self.pool)
            .await?;
        Ok(authors)
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{AuthorFilter, Database, DatabaseError, NewOutlet};

    async fn setup() -> (Database, i64, i64) {
        let db = Database::open(":memory:").await.unwrap();
        let mut ids = Vec::new();
        for i in 1..=2 {
            let outlet = db
                .insert_outlet(&NewOutlet {
                    name: format!("Outlet {}", i),
                    url: format!("https://o{}.example.com/", i),
                    rss_url: format!("https://o{}.example.com/rss", i),
                    description: None,
                    language: None,
                })
                .await
                .unwrap();
            ids.push(outlet.id);
        }
        (db, ids[0], ids[1])
    }

    #[tokio::test]
    async fn test_create_and_find_author() {
        let (db, outlet_id, _) = setup().await;

        let created = db.create_author(outlet_id, "Jane Doe").await.unwrap();
        assert_eq!(created.name, "Jane Doe");
        assert!(created.profile.is_none());
        assert!(created.twitter.is_none());

        let found = db.find_author(outlet_id, "Jane Doe").await.unwrap();
        assert_eq!(found, Some(created.clone()));

        assert_eq!(db.get_author(created.id).await.unwrap(), Some(created));
        assert!(db.get_author(-1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_author_names_are_scoped_per_outlet() {
        let (db, first, second) = setup().await;

        let a = db.create_author(first, "Jane Doe").await.unwrap();
        let b = db.create_author(second, "Jane Doe").await.unwrap();
        assert_ne!(a.id, b.id);

        assert!(db.find_author(second, "John Roe").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_author_twice_is_duplicate() {
        let (db, outlet_id, _) = setup().await;

        db.create_author(outlet_id, "Jane Doe").await.unwrap();
        let err = db.create_author(outlet_id, "Jane Doe").await.unwrap_err();
        assert!(matches!(err, DatabaseError::DuplicateAuthor { .. }));
    }

    #[tokio::test]
    async fn test_list_authors_filters_and_orders() {
        let (db, first, second) = setup().await;
        db.create_author(first, "Zed").await.unwrap();
        db.create_author(first, "Amy").await.unwrap();
        db.create_author(second, "Bob").await.unwrap();

        let all = db.list_authors(&AuthorFilter::default()).await.unwrap();
        let names: Vec<&str> = all.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["Amy", "Bob", "Zed"]);

        let scoped = db
            .list_authors(&AuthorFilter {
                outlet_id: Some(first),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(scoped.len(), 2);

        let searched = db
            .list_authors(&AuthorFilter {
                name_contains: Some("ZE".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].name, "Zed");
    }
}
