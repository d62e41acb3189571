use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{
    IdempotencyKey, InstanceId, InstanceQuery, InstanceRecord, InstanceStoreError, KeyClaim,
    Result, Version, store::InstanceStore,
};

const SELECT_COLUMNS: &str = "SELECT id, definition_name, idempotency_key, status, terminal, version, payload, created_at, updated_at FROM saga_instances";

/// PostgreSQL-backed instance store implementation.
#[derive(Clone)]
pub struct PostgresInstanceStore {
    pool: PgPool,
}

impl PostgresInstanceStore {
    /// Creates a new PostgreSQL instance store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database at `url` and creates a store.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_record(row: PgRow) -> Result<InstanceRecord> {
        Ok(InstanceRecord {
            instance_id: InstanceId::from_uuid(row.try_get::<Uuid, _>("id")?),
            definition_name: row.try_get("definition_name")?,
            idempotency_key: IdempotencyKey::new(row.try_get::<String, _>("idempotency_key")?),
            status: row.try_get("status")?,
            terminal: row.try_get("terminal")?,
            version: Version::new(row.try_get("version")?),
            payload: row.try_get("payload")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

#[async_trait]
impl InstanceStore for PostgresInstanceStore {
    async fn create(&self, record: InstanceRecord, claim: KeyClaim) -> Result<Version> {
        let instance_id = record.instance_id;
        let version = Version::first();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO saga_instances
                (id, definition_name, idempotency_key, status, terminal, version, payload, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(instance_id.as_uuid())
        .bind(&record.definition_name)
        .bind(record.idempotency_key.as_str())
        .bind(&record.status)
        .bind(record.terminal)
        .bind(version.as_i64())
        .bind(&record.payload)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("saga_instances_pkey")
            {
                return InstanceStoreError::AlreadyExists(instance_id);
            }
            InstanceStoreError::Database(e)
        })?;

        let claimed = match claim {
            KeyClaim::New => sqlx::query(
                r#"
                INSERT INTO idempotency_keys (key, instance_id)
                VALUES ($1, $2)
                ON CONFLICT (key) DO NOTHING
                "#,
            )
            .bind(record.idempotency_key.as_str())
            .bind(instance_id.as_uuid())
            .execute(&mut *tx)
            .await?
            .rows_affected(),
            KeyClaim::Supersede(previous) => sqlx::query(
                r#"
                UPDATE idempotency_keys
                SET instance_id = $2
                WHERE key = $1 AND instance_id = $3
                "#,
            )
            .bind(record.idempotency_key.as_str())
            .bind(instance_id.as_uuid())
            .bind(previous.as_uuid())
            .execute(&mut *tx)
            .await?
            .rows_affected(),
        };

        if claimed == 0 {
            tx.rollback().await?;
            tracing::debug!(
                key = %record.idempotency_key,
                %instance_id,
                "Idempotency key claim lost"
            );
            return Err(InstanceStoreError::IdempotencyConflict {
                key: record.idempotency_key,
            });
        }

        tx.commit().await?;
        Ok(version)
    }

    async fn update(&self, record: InstanceRecord, expected: Version) -> Result<Version> {
        let instance_id = record.instance_id;
        let next = expected.next();

        let updated = sqlx::query(
            r#"
            UPDATE saga_instances
            SET status = $3, terminal = $4, version = $5, payload = $6, updated_at = NOW()
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(instance_id.as_uuid())
        .bind(expected.as_i64())
        .bind(&record.status)
        .bind(record.terminal)
        .bind(next.as_i64())
        .bind(&record.payload)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if updated == 1 {
            return Ok(next);
        }

        // Distinguish a lost race from a missing row.
        let actual: Option<i64> =
            sqlx::query_scalar("SELECT version FROM saga_instances WHERE id = $1")
                .bind(instance_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        match actual {
            Some(actual) => {
                tracing::debug!(%instance_id, %expected, actual, "Conditional update rejected");
                Err(InstanceStoreError::ConcurrencyConflict {
                    instance_id,
                    expected,
                    actual: Version::new(actual),
                })
            }
            None => Err(InstanceStoreError::NotFound(instance_id)),
        }
    }

    async fn get(&self, instance_id: InstanceId) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query(&format!("{SELECT_COLUMNS} WHERE id = $1"))
            .bind(instance_id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn find_by_idempotency_key(
        &self,
        key: &IdempotencyKey,
    ) -> Result<Option<InstanceRecord>> {
        let row = sqlx::query(&format!(
            "{SELECT_COLUMNS} WHERE id = (SELECT instance_id FROM idempotency_keys WHERE key = $1)"
        ))
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_record).transpose()
    }

    async fn query(&self, query: InstanceQuery) -> Result<Vec<InstanceRecord>> {
        let mut sql = format!("{SELECT_COLUMNS} WHERE 1=1");
        let mut param_count = 0;

        if query.active_only {
            sql.push_str(" AND terminal = FALSE");
        }
        if query.definition_name.is_some() {
            param_count += 1;
            sql.push_str(&format!(" AND definition_name = ${param_count}"));
        }

        sql.push_str(" ORDER BY created_at ASC, id ASC");

        if query.limit.is_some() {
            param_count += 1;
            sql.push_str(&format!(" LIMIT ${param_count}"));
        }

        let mut sqlx_query = sqlx::query(&sql);

        if let Some(name) = query.definition_name {
            sqlx_query = sqlx_query.bind(name);
        }
        if let Some(limit) = query.limit {
            sqlx_query = sqlx_query.bind(limit as i64);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;
        rows.into_iter().map(Self::row_to_record).collect()
    }

    async fn request_cancellation(&self, instance_id: InstanceId) -> Result<()> {
        let updated = sqlx::query("UPDATE saga_instances SET cancel_requested = TRUE WHERE id = $1")
            .bind(instance_id.as_uuid())
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(InstanceStoreError::NotFound(instance_id));
        }
        Ok(())
    }

    async fn is_cancellation_requested(&self, instance_id: InstanceId) -> Result<bool> {
        let flag: Option<bool> =
            sqlx::query_scalar("SELECT cancel_requested FROM saga_instances WHERE id = $1")
                .bind(instance_id.as_uuid())
                .fetch_optional(&self.pool)
                .await?;

        Ok(flag.unwrap_or(false))
    }
}
