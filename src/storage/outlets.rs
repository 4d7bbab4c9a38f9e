use chrono::{DateTime, Utc};

use super::schema::Database;
use super::types::{DatabaseError, NewOutlet, Outlet, OutletDbRow};

impl Database {
    // ========================================================================
    // Outlet Operations
    // ========================================================================

    /// Insert an outlet or refresh the channel metadata of an existing one.
    ///
    /// Keyed by `rss_url`. Re-registering an outlet clears its watermark so
    /// the next pass ingests the whole feed again (duplicates are rejected
    /// downstream by URL).
    pub async fn insert_outlet(&self, outlet: &NewOutlet) -> Result<Outlet, DatabaseError> {
        let row = sqlx::query_as::<_, OutletDbRow>(
            r#"
            INSERT INTO outlets (name, url, rss_url, description, language, updated_at)
            VALUES (?, ?, ?, ?, ?, NULL)
            ON CONFLICT(rss_url) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                description = excluded.description,
                language = excluded.language,
                updated_at = NULL
            RETURNING id, name, url, rss_url, description, language, updated_at
        "#,
        )
        .bind(&outlet.name)
        .bind(&outlet.url)
        .bind(&outlet.rss_url)
        .bind(&outlet.description)
        .bind(&outlet.language)
        .fetch_one(&self.pool)
        .await?;

        row.into_outlet()
    }

    /// Upsert an outlet by id, writing every column including the watermark.
    pub async fn save_outlet(&self, outlet: &Outlet) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO outlets (id, name, url, rss_url, description, language, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                url = excluded.url,
                rss_url = excluded.rss_url,
                description = excluded.description,
                language = excluded.language,
                updated_at = excluded.updated_at
        "#,
        )
        .bind(outlet.id)
        .bind(&outlet.name)
        .bind(&outlet.url)
        .bind(&outlet.rss_url)
        .bind(&outlet.description)
        .bind(&outlet.language)
        .bind(outlet.updated_at.map(|t| t.timestamp()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Advance only the watermark, leaving the channel metadata untouched.
    ///
    /// Returns `false` when no outlet has this id.
    pub async fn set_outlet_watermark(
        &self,
        outlet_id: i64,
        watermark: DateTime<Utc>,
    ) -> Result<bool, DatabaseError> {
        let result = sqlx::query("UPDATE outlets SET updated_at = ? WHERE id = ?")
            .bind(watermark.timestamp())
            .bind(outlet_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn get_outlet(&self, outlet_id: i64) -> Result<Option<Outlet>, DatabaseError> {
        let row = sqlx::query_as::<_, OutletDbRow>(
            r#"
            SELECT id, name, url, rss_url, description, language, updated_at
            FROM outlets
            WHERE id = ?
        "#,
        )
        .bind(outlet_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutletDbRow::into_outlet).transpose()
    }

    pub async fn find_outlet_by_feed_url(
        &self,
        rss_url: &str,
    ) -> Result<Option<Outlet>, DatabaseError> {
        let row = sqlx::query_as::<_, OutletDbRow>(
            r#"
            SELECT id, name, url, rss_url, description, language, updated_at
            FROM outlets
            WHERE rss_url = ?
        "#,
        )
        .bind(rss_url)
        .fetch_optional(&self.pool)
        .await?;

        row.map(OutletDbRow::into_outlet).transpose()
    }

    /// All outlets ordered by name (ties broken by id so the order is stable)
    pub async fn list_outlets(&self) -> Result<Vec<Outlet>, DatabaseError> {
        let rows = sqlx::query_as::<_, OutletDbRow>(
            r#"
            SELECT id, name, url, rss_url, description, language, updated_at
            FROM outlets
            ORDER BY name, id
        "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(OutletDbRow::into_outlet).collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::storage::{Database, NewOutlet};
    use chrono::{TimeZone, Utc};

    async fn test_db() -> Database {
        Database::open(":memory:").await.unwrap()
    }

    fn test_outlet(id: i64) -> NewOutlet {
        NewOutlet {
            name: format!("Outlet {}", id),
            url: format!("https://outlet{}.example.com/", id),
            rss_url: format!("https://outlet{}.example.com/rss", id),
            description: Some("Test outlet".to_string()),
            language: Some("en".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_outlet_starts_without_watermark() {
        let db = test_db().await;
        let outlet = db.insert_outlet(&test_outlet(1)).await.unwrap();

        assert!(outlet.id > 0);
        assert_eq!(outlet.name, "Outlet 1");
        assert_eq!(outlet.updated_at, None);
    }

    #[tokio::test]
    async fn test_insert_outlet_same_feed_url_updates_metadata() {
        let db = test_db().await;
        let first = db.insert_outlet(&test_outlet(1)).await.unwrap();

        let mut renamed = test_outlet(1);
        renamed.name = "Renamed".to_string();
        let second = db.insert_outlet(&renamed).await.unwrap();

        assert_eq!(first.id, second.id);
        let outlets = db.list_outlets().await.unwrap();
        assert_eq!(outlets.len(), 1);
        assert_eq!(outlets[0].name, "Renamed");
    }

    #[tokio::test]
    async fn test_save_outlet_persists_watermark() {
        let db = test_db().await;
        let mut outlet = db.insert_outlet(&test_outlet(1)).await.unwrap();

        let watermark = Utc.with_ymd_and_hms(2002, 9, 7, 0, 0, 1).unwrap();
        outlet.updated_at = Some(watermark);
        db.save_outlet(&outlet).await.unwrap();

        let stored = db.get_outlet(outlet.id).await.unwrap().unwrap();
        assert_eq!(stored.updated_at, Some(watermark));
    }

    #[tokio::test]
    async fn test_set_outlet_watermark_keeps_metadata() {
        let db = test_db().await;
        let stale = db.insert_outlet(&test_outlet(1)).await.unwrap();

        let mut renamed = test_outlet(1);
        renamed.name = "Renamed".to_string();
        db.insert_outlet(&renamed).await.unwrap();

        let watermark = Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap();
        assert!(db.set_outlet_watermark(stale.id, watermark).await.unwrap());

        let stored = db.get_outlet(stale.id).await.unwrap().unwrap();
        assert_eq!(stored.name, "Renamed");
        assert_eq!(stored.updated_at, Some(watermark));

        assert!(!db.set_outlet_watermark(stale.id + 100, watermark).await.unwrap());
    }

    #[tokio::test]
    async fn test_find_outlet_by_feed_url() {
        let db = test_db().await;
        db.insert_outlet(&test_outlet(1)).await.unwrap();
        db.insert_outlet(&test_outlet(2)).await.unwrap();

        let found = db
            .find_outlet_by_feed_url("https://outlet2.example.com/rss")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.name, "Outlet 2");

        let missing = db
            .find_outlet_by_feed_url("https://nowhere.example.com/rss")
            .await
            .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_list_outlets_ordered_by_name() {
        let db = test_db().await;
        let mut b = test_outlet(1);
        b.name = "Beta".to_string();
        let mut a = test_outlet(2);
        a.name = "Alpha".to_string();
        db.insert_outlet(&b).await.unwrap();
        db.insert_outlet(&a).await.unwrap();

        let names: Vec<String> = db
            .list_outlets()
            .await
            .unwrap()
            .into_iter()
            .map(|o| o.name)
            .collect();
        assert_eq!(names, vec!["Alpha", "Beta"]);
    }
}
