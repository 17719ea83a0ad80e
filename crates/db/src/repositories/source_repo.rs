//! Repository for the `sources` table.

use chrono::Utc;
use sqlx::SqlitePool;

use plinth_core::types::DbId;

use crate::models::source::{Source, SourceFilter, SourceProjection, UpdateSource};

/// Column list for `sources` SELECT queries.
const COLUMNS: &str =
    "id, name, type, lang, content, compiled, active, method, url, cron, tag, last_modified_date";

/// Orderings a caller may request. Anything else falls back to newest-first.
const SORTS: &[&str] = &[
    "rowid asc",
    "rowid desc",
    "name asc",
    "name desc",
    "last_modified_date asc",
    "last_modified_date desc",
];

/// Provides CRUD and lookup operations for the script source registry.
pub struct SourceRepo;

impl SourceRepo {
    /// Insert a new source and return its row id.
    ///
    /// Uniqueness of `(name, type)` and of routable URLs is probed by the
    /// caller first; the table constraint is only a backstop.
    pub async fn create(pool: &SqlitePool, source: &Source) -> Result<DbId, sqlx::Error> {
        let query = "\
            INSERT INTO sources (\
                name, type, lang, content, compiled, active, \
                method, url, cron, tag, last_modified_date\
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
            RETURNING id";

        sqlx::query_scalar(query)
            .bind(&source.name)
            .bind(&source.kind)
            .bind(&source.lang)
            .bind(&source.content)
            .bind(&source.compiled)
            .bind(source.active)
            .bind(&source.method)
            .bind(&source.url)
            .bind(&source.cron)
            .bind(&source.tag)
            .bind(Utc::now())
            .fetch_one(pool)
            .await
    }

    /// Find a source by its name and type.
    pub async fn find_by_name_and_kind(
        pool: &SqlitePool,
        name: &str,
        kind: &str,
    ) -> Result<Option<Source>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM sources WHERE name = ? AND type = ?");
        sqlx::query_as::<_, Source>(&query)
            .bind(name)
            .bind(kind)
            .fetch_optional(pool)
            .await
    }

    /// Find an active source by its name and type.
    pub async fn find_active_by_name_and_kind(
        pool: &SqlitePool,
        name: &str,
        kind: &str,
    ) -> Result<Option<Source>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM sources WHERE name = ? AND type = ? AND active = TRUE");
        sqlx::query_as::<_, Source>(&query)
            .bind(name)
            .bind(kind)
            .fetch_optional(pool)
            .await
    }

    /// List every active source of one type, oldest first.
    pub async fn list_active_by_kind(
        pool: &SqlitePool,
        kind: &str,
    ) -> Result<Vec<Source>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM sources WHERE type = ? AND active = TRUE ORDER BY id");
        sqlx::query_as::<_, Source>(&query)
            .bind(kind)
            .fetch_all(pool)
            .await
    }

    /// Find the active resource serving a URL path.
    pub async fn find_active_resource_by_url(
        pool: &SqlitePool,
        url: &str,
    ) -> Result<Option<Source>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM sources \
             WHERE type = 'resource' AND url = ? AND active = TRUE"
        );
        sqlx::query_as::<_, Source>(&query)
            .bind(url)
            .fetch_optional(pool)
            .await
    }

    /// Whether a source with this name and type already exists.
    pub async fn exists(pool: &SqlitePool, name: &str, kind: &str) -> Result<bool, sqlx::Error> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(1) FROM sources WHERE name = ? AND type = ?")
                .bind(name)
                .bind(kind)
                .fetch_one(pool)
                .await?;
        Ok(count > 0)
    }

    /// Whether another source of the same type already claims this URL.
    ///
    /// `active_only` restricts the probe to active rows; updates tolerate an
    /// inactive duplicate, creation does not.
    pub async fn url_taken(
        pool: &SqlitePool,
        kind: &str,
        url: &str,
        exclude_name: &str,
        active_only: bool,
    ) -> Result<bool, sqlx::Error> {
        let query = if active_only {
            "SELECT COUNT(1) FROM sources \
             WHERE type = ? AND url = ? AND active = TRUE AND name != ?"
        } else {
            "SELECT COUNT(1) FROM sources WHERE type = ? AND url = ? AND name != ?"
        };
        let count: i64 = sqlx::query_scalar(query)
            .bind(kind)
            .bind(url)
            .bind(exclude_name)
            .fetch_one(pool)
            .await?;
        Ok(count > 0)
    }

    /// Count the sources matching a filter.
    pub async fn count(pool: &SqlitePool, filter: &SourceFilter) -> Result<i64, sqlx::Error> {
        let (condition, params) = Self::condition(filter);
        let query = format!("SELECT COUNT(1) FROM sources WHERE {condition}");

        let mut q = sqlx::query_scalar::<_, i64>(&query);
        for param in &params {
            q = q.bind(param);
        }
        q.fetch_one(pool).await
    }

    /// List the sources matching a filter, with ordering and paging applied.
    pub async fn list(pool: &SqlitePool, filter: &SourceFilter) -> Result<Vec<Source>, sqlx::Error> {
        let (condition, params) = Self::condition(filter);
        let orders = filter
            .sort
            .as_deref()
            .filter(|sort| SORTS.contains(sort))
            .unwrap_or("rowid desc");
        let query = format!(
            "SELECT {} FROM sources WHERE {condition} ORDER BY {orders} LIMIT ?, ?",
            Self::columns(filter.projection)
        );

        let mut q = sqlx::query_as::<_, Source>(&query);
        for param in &params {
            q = q.bind(param);
        }
        q.bind(filter.from).bind(filter.size).fetch_all(pool).await
    }

    /// Update a source. Only non-`None` fields in the DTO are applied.
    /// Returns the number of rows affected (zero when the source is missing).
    pub async fn update(
        pool: &SqlitePool,
        name: &str,
        kind: &str,
        dto: &UpdateSource,
    ) -> Result<u64, sqlx::Error> {
        let query = "\
            UPDATE sources SET \
                last_modified_date = ?, \
                content = COALESCE(?, content), \
                compiled = COALESCE(?, compiled), \
                active = COALESCE(?, active), \
                method = COALESCE(?, method), \
                url = COALESCE(?, url), \
                cron = COALESCE(?, cron), \
                tag = COALESCE(?, tag) \
            WHERE name = ? AND type = ?";

        let rows_affected = sqlx::query(query)
            .bind(Utc::now())
            .bind(&dto.content)
            .bind(&dto.compiled)
            .bind(dto.active)
            .bind(&dto.method)
            .bind(&dto.url)
            .bind(&dto.cron)
            .bind(&dto.tag)
            .bind(name)
            .bind(kind)
            .execute(pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    /// Delete a source. Returns the number of rows affected.
    pub async fn delete(pool: &SqlitePool, name: &str, kind: &str) -> Result<u64, sqlx::Error> {
        let rows_affected = sqlx::query("DELETE FROM sources WHERE name = ? AND type = ?")
            .bind(name)
            .bind(kind)
            .execute(pool)
            .await?
            .rows_affected();

        Ok(rows_affected)
    }

    /// Insert or replace sources wholesale, keyed by row id.
    ///
    /// Used by registry import. Rows without a name or type are skipped;
    /// rows without an id are inserted fresh. Returns how many rows were
    /// written.
    pub async fn bulk_upsert(pool: &SqlitePool, sources: &[Source]) -> Result<u64, sqlx::Error> {
        let mut tx = pool.begin().await?;
        let mut written = 0;

        for source in sources {
            if source.name.is_empty() || source.kind.is_empty() {
                continue;
            }
            sqlx::query(
                "INSERT OR REPLACE INTO sources (\
                    id, name, type, lang, content, compiled, active, \
                    method, url, cron, tag, last_modified_date\
                ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind((source.id != 0).then_some(source.id))
            .bind(&source.name)
            .bind(&source.kind)
            .bind(&source.lang)
            .bind(&source.content)
            .bind(&source.compiled)
            .bind(source.active)
            .bind(&source.method)
            .bind(&source.url)
            .bind(&source.cron)
            .bind(&source.tag)
            .bind(source.last_modified_date)
            .execute(&mut *tx)
            .await?;
            written += 1;
        }

        tx.commit().await?;
        Ok(written)
    }

    /// Shared WHERE clause for listing and counting.
    fn condition(filter: &SourceFilter) -> (String, Vec<String>) {
        let mut condition = String::from("name LIKE ? AND type LIKE ?");
        let mut params = vec![filter.name.clone(), filter.kind.clone()];

        if !filter.tag.is_empty() {
            condition.push_str(" AND (1 != 1");
            for term in filter.tag.split(',') {
                condition.push_str(" OR tag LIKE ?");
                params.push(format!("%{term}%"));
            }
            condition.push(')');
        }

        (condition, params)
    }

    /// Column list for a projection. Blanked columns keep their names so
    /// each projection decodes into the same row struct.
    fn columns(projection: SourceProjection) -> String {
        let mut columns = COLUMNS.to_string();
        match projection {
            SourceProjection::Full => {}
            SourceProjection::Content => {
                columns = columns.replacen(", compiled", ", '' AS compiled", 1);
            }
            SourceProjection::Basic => {
                columns = columns.replacen(", content", ", '' AS content", 1);
                columns = columns.replacen(", compiled", ", '' AS compiled", 1);
            }
        }
        columns
    }
}
