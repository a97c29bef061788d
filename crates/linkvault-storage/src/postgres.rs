use crate::batch::validate_batch;
use async_trait::async_trait;
use linkvault_core::{NewUrl, Resolution, Result, StorageError, UrlStorage, UserId, UserUrl};
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, trace};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const SHORT_URL_CONSTRAINT: &str = "url_mappings_short_url_key";
const LONG_URL_CONSTRAINT: &str = "url_mappings_user_long_url_key";

const INSERT_URL: &str = r#"
    INSERT INTO url_mappings (short_url, long_url, user_id)
    VALUES ($1, $2, $3)
"#;

/// PostgreSQL implementation of the storage contract.
///
/// Soft delete is implemented with `deleted_at`. A deleted row keeps its
/// short id forever, so resolution can tell "gone" from "never existed", and
/// it releases its long URL so the owner may shorten it again.
///
/// Creates look up the caller's live rows for the long URL first. The
/// partial unique index over `(user_id, long_url)` stays the authority when
/// two creates race past that lookup.
#[derive(Debug, Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a storage from an existing pool. Does not run migrations.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects, verifies the connection and brings the schema up to date.
    ///
    /// Any failure is returned as-is; callers treat it as fatal.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .connect(database_url)
            .await
            .map_err(|e| StorageError::Unavailable(e.to_string()))?;

        let storage = Self::new(pool);
        storage.health_check().await?;
        storage.migrate().await?;
        Ok(storage)
    }

    /// Applies pending migrations. Already-applied migrations are skipped.
    pub async fn migrate(&self) -> Result<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| StorageError::Migration(e.to_string()))?;
        info!("database schema is up to date");
        Ok(())
    }

    /// Returns a reference to the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_short_id(&self, user: UserId, long_url: &str) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>(
            r#"
            SELECT short_url
            FROM url_mappings
            WHERE user_id = $1
              AND long_url = $2
              AND deleted_at IS NULL
            LIMIT 1
            "#,
        )
        .bind(user.get())
        .bind(long_url)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)
    }

    /// Tells a taken short id apart from a repeat of the caller's own create.
    ///
    /// The short id constraint is checked before the long URL index, so a
    /// repeated `(user, short id, long URL)` insert trips the former.
    async fn conflict_or_duplicate(
        &self,
        user: UserId,
        short_id: &str,
        long_url: &str,
    ) -> StorageError {
        match self.find_short_id(user, long_url).await {
            Ok(Some(existing)) => StorageError::DuplicateUrl(existing),
            Ok(None) => StorageError::Conflict(short_id.to_owned()),
            Err(err) => err,
        }
    }

    /// Turns a long URL uniqueness violation into the duplicate signal.
    async fn duplicate_of(&self, user: UserId, long_url: &str) -> StorageError {
        match self.find_short_id(user, long_url).await {
            Ok(Some(existing)) => {
                debug!(user_id = %user, short_id = %existing, "url already shortened");
                StorageError::DuplicateUrl(existing)
            }
            Ok(None) => StorageError::Query(format!(
                "duplicate of '{long_url}' reported but no live row was found"
            )),
            Err(err) => err,
        }
    }
}

fn violated_constraint(err: &sqlx::Error) -> Option<&str> {
    err.as_database_error()
        .filter(|db| db.is_unique_violation())
        .and_then(|db| db.constraint())
}

fn map_sqlx_error(err: sqlx::Error) -> StorageError {
    let message = err.to_string();

    match err {
        sqlx::Error::PoolTimedOut => StorageError::Timeout(message),
        sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed
        | sqlx::Error::Io(_)
        | sqlx::Error::Tls(_) => StorageError::Unavailable(message),
        sqlx::Error::ColumnIndexOutOfBounds { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::TypeNotFound { .. }
        | sqlx::Error::Decode(_)
        | sqlx::Error::RowNotFound => StorageError::InvalidData(message),
        _ => StorageError::Query(message),
    }
}

#[async_trait]
impl UrlStorage for PostgresStorage {
    async fn create_url(&self, user: UserId, short_id: &str, long_url: &str) -> Result<()> {
        if short_id.is_empty() {
            return Err(StorageError::EmptyIdentifier);
        }

        if let Some(existing) = self.find_short_id(user, long_url).await? {
            debug!(user_id = %user, short_id = %existing, "url already shortened");
            return Err(StorageError::DuplicateUrl(existing));
        }

        let result = sqlx::query(INSERT_URL)
            .bind(short_id)
            .bind(long_url)
            .bind(user.get())
            .execute(&self.pool)
            .await;

        match result {
            Ok(_) => {
                trace!(user_id = %user, short_id, "stored url");
                Ok(())
            }
            Err(err) => match violated_constraint(&err) {
                Some(LONG_URL_CONSTRAINT) => Err(self.duplicate_of(user, long_url).await),
                Some(SHORT_URL_CONSTRAINT) => {
                    Err(self.conflict_or_duplicate(user, short_id, long_url).await)
                }
                _ => Err(map_sqlx_error(err)),
            },
        }
    }

    async fn batch_create_urls(&self, user: UserId, records: &[NewUrl]) -> Result<()> {
        validate_batch(records)?;
        if records.is_empty() {
            return Ok(());
        }

        // Dropping the transaction without commit rolls it back, which also
        // covers a caller that gives up mid-batch.
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        for record in records {
            // The statement is prepared once per connection and reused.
            let result = sqlx::query(INSERT_URL)
                .bind(&record.short_id)
                .bind(&record.long_url)
                .bind(user.get())
                .execute(&mut *tx)
                .await;

            if let Err(err) = result {
                let constraint = violated_constraint(&err).map(str::to_owned);
                drop(tx);
                return Err(match constraint.as_deref() {
                    Some(LONG_URL_CONSTRAINT) => self.duplicate_of(user, &record.long_url).await,
                    Some(SHORT_URL_CONSTRAINT) => {
                        self.conflict_or_duplicate(user, &record.short_id, &record.long_url)
                            .await
                    }
                    _ => map_sqlx_error(err),
                });
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        debug!(user_id = %user, count = records.len(), "stored url batch");
        Ok(())
    }

    async fn resolve_url(&self, short_id: &str) -> Result<Resolution> {
        let row = sqlx::query(
            r#"
            SELECT long_url, deleted_at IS NOT NULL AS deleted
            FROM url_mappings
            WHERE short_url = $1
            LIMIT 1
            "#,
        )
        .bind(short_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        let Some(row) = row else {
            return Ok(Resolution::NotFound);
        };

        let deleted: bool = row.try_get("deleted").map_err(map_sqlx_error)?;
        if deleted {
            return Ok(Resolution::Gone);
        }

        let long_url: String = row.try_get("long_url").map_err(map_sqlx_error)?;
        Ok(Resolution::Found(long_url))
    }

    async fn list_user_urls(&self, user: UserId) -> Result<Vec<UserUrl>> {
        let rows = sqlx::query(
            r#"
            SELECT short_url, long_url
            FROM url_mappings
            WHERE user_id = $1
              AND deleted_at IS NULL
            "#,
        )
        .bind(user.get())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        rows.into_iter()
            .map(|row| {
                Ok(UserUrl {
                    short_id: row.try_get("short_url").map_err(map_sqlx_error)?,
                    long_url: row.try_get("long_url").map_err(map_sqlx_error)?,
                })
            })
            .collect()
    }

    async fn delete_urls(&self, short_ids: &[String]) -> Result<()> {
        if short_ids.is_empty() {
            return Ok(());
        }

        let result = sqlx::query(
            r#"
            UPDATE url_mappings
            SET deleted_at = now()
            WHERE short_url = ANY($1)
              AND deleted_at IS NULL
            "#,
        )
        .bind(short_ids)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(
            requested = short_ids.len(),
            deleted = result.rows_affected(),
            "soft-deleted urls"
        );
        Ok(())
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| StorageError::Unavailable(e.to_string()))
    }

    async fn allocate_user_id(&self) -> Result<UserId> {
        let id = sqlx::query_scalar::<_, i64>("INSERT INTO users DEFAULT VALUES RETURNING id")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(UserId::new(id))
    }
}
