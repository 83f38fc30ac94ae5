//! PostgreSQL implementation of EntityStore
//!
//! Every status change is a single `UPDATE ... WHERE status = <expected>`,
//! so concurrent ticks resolve races through row-level atomicity instead of
//! in-process locks. The same pool also serves the resource catalog and the
//! style lookup.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use super::store::*;
use crate::model::{Job, NewJob, NewUnit, Platform, Resource, TaskStatus, Unit};
use crate::platform::{kind_for_path, PlatformError, ResourceProvider, StyleLookup};

type PgQuery<'q> = sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>;

const JOB_COLUMNS: &str = "id, kind, params, owner, status, progress, result_resource_id, \
                           created_at, updated_at, deleted";

const UNIT_COLUMNS: &str = "id, job_id, kind, seq, params, status, result, platform, \
                            correlation_id, predecessors, created_at, updated_at, deleted";

/// PostgreSQL implementation of EntityStore
///
/// # Example
///
/// ```ignore
/// use flashcast_orchestrator::PostgresEntityStore;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/flashcast").await?;
/// let store = PostgresEntityStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresEntityStore {
    pool: PgPool,
}

impl PostgresEntityStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    /// Run an UPDATE guarded by its WHERE clause; true when a row changed
    async fn conditional_update(&self, query: PgQuery<'_>) -> Result<bool, StoreError> {
        let result = query.execute(&self.pool).await.map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    error!(error = %e, "database query failed");
    StoreError::Database(e.to_string())
}

fn parse_column<T>(row: &PgRow, column: &str) -> Result<T, StoreError>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(column);
    raw.parse().map_err(StoreError::Serialization)
}

fn row_to_job(row: &PgRow) -> Result<Job, StoreError> {
    Ok(Job {
        id: row.get("id"),
        kind: parse_column(row, "kind")?,
        params: row.get("params"),
        owner: row.get("owner"),
        status: parse_column(row, "status")?,
        progress: row.get("progress"),
        result_resource_id: row.get("result_resource_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted: row.get("deleted"),
    })
}

fn row_to_unit(row: &PgRow) -> Result<Unit, StoreError> {
    Ok(Unit {
        id: row.get("id"),
        job_id: row.get("job_id"),
        kind: parse_column(row, "kind")?,
        seq: row.get("seq"),
        params: row.get("params"),
        status: parse_column(row, "status")?,
        result: row.get("result"),
        platform: parse_column(row, "platform")?,
        correlation_id: row.get("correlation_id"),
        predecessors: row.get("predecessors"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        deleted: row.get("deleted"),
    })
}

fn rows_to_units(rows: Vec<PgRow>) -> Result<Vec<Unit>, StoreError> {
    rows.iter().map(row_to_unit).collect()
}

fn status_strings(statuses: &[TaskStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    #[instrument(skip(self, job, units), fields(kind = %job.kind, steps = units.len()))]
    async fn insert_job(
        &self,
        job: NewJob,
        units: Vec<NewUnit>,
    ) -> Result<(Job, Vec<Unit>), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO flashcast_jobs (kind, params, owner, status, progress)
            VALUES ($1, $2, $3, 'pending', 0)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(job.kind.as_str())
        .bind(&job.params)
        .bind(&job.owner)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        let created_job = row_to_job(&row)?;

        let mut assigned: Vec<i64> = Vec::with_capacity(units.len());
        let mut created_units = Vec::with_capacity(units.len());
        for (index, unit) in units.iter().enumerate() {
            let predecessors = predecessor_ids(index, unit, &assigned)?;
            let row = sqlx::query(&format!(
                r#"
                INSERT INTO flashcast_units (job_id, kind, seq, params, status, platform, predecessors)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING {UNIT_COLUMNS}
                "#
            ))
            .bind(created_job.id)
            .bind(unit.kind.as_str())
            .bind(index as i32)
            .bind(&unit.params)
            .bind(unit.status.as_str())
            .bind(unit.platform.as_str())
            .bind(&predecessors)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_error)?;
            let created = row_to_unit(&row)?;
            assigned.push(created.id);
            created_units.push(created);
        }

        tx.commit().await.map_err(db_error)?;

        debug!(job_id = created_job.id, "inserted job");
        Ok((created_job, created_units))
    }

    #[instrument(skip(self))]
    async fn get_job(&self, id: i64) -> Result<Job, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM flashcast_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(StoreError::JobNotFound(id))?;
        row_to_job(&row)
    }

    #[instrument(skip(self))]
    async fn get_jobs(&self, ids: &[i64]) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM flashcast_jobs WHERE id = ANY($1) ORDER BY id"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn list_jobs(&self, statuses: &[TaskStatus]) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS} FROM flashcast_jobs
            WHERE status = ANY($1) AND NOT deleted
            ORDER BY id
            "#
        ))
        .bind(status_strings(statuses))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows.iter().map(row_to_job).collect()
    }

    #[instrument(skip(self))]
    async fn mark_job_running(&self, id: i64) -> Result<bool, StoreError> {
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE flashcast_jobs SET status = 'running', updated_at = NOW()
                WHERE id = $1 AND status = 'pending'
                "#,
            )
            .bind(id),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn update_job_progress(
        &self,
        id: i64,
        status: TaskStatus,
        progress: i32,
    ) -> Result<bool, StoreError> {
        if status.is_terminal() {
            return Ok(false);
        }
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE flashcast_jobs SET status = $2, progress = $3, updated_at = NOW()
                WHERE id = $1 AND status IN ('pending', 'running')
                "#,
            )
            .bind(id)
            .bind(status.as_str())
            .bind(progress),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn finish_job(
        &self,
        id: i64,
        status: TaskStatus,
        progress: Option<i32>,
    ) -> Result<bool, StoreError> {
        if !status.is_terminal() {
            return Ok(false);
        }
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE flashcast_jobs
                SET status = $2, progress = COALESCE($3, progress), updated_at = NOW()
                WHERE id = $1 AND status IN ('pending', 'running')
                "#,
            )
            .bind(id)
            .bind(status.as_str())
            .bind(progress),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn set_job_result(&self, id: i64, resource_id: i64) -> Result<(), StoreError> {
        let updated = self
            .conditional_update(
                sqlx::query(
                    r#"
                    UPDATE flashcast_jobs SET result_resource_id = $2, updated_at = NOW()
                    WHERE id = $1
                    "#,
                )
                .bind(id)
                .bind(resource_id),
            )
            .await?;
        if !updated {
            return Err(StoreError::JobNotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn soft_delete_job(&self, id: i64) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let result = sqlx::query("UPDATE flashcast_jobs SET deleted = TRUE, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::JobNotFound(id));
        }

        sqlx::query("UPDATE flashcast_units SET deleted = TRUE, updated_at = NOW() WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }

    #[instrument(skip(self))]
    async fn get_unit(&self, id: i64) -> Result<Unit, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {UNIT_COLUMNS} FROM flashcast_units WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(StoreError::UnitNotFound(id))?;
        row_to_unit(&row)
    }

    #[instrument(skip(self))]
    async fn get_units(&self, ids: &[i64]) -> Result<Vec<Unit>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {UNIT_COLUMNS} FROM flashcast_units
            WHERE id = ANY($1)
            ORDER BY array_position($1, id)
            "#
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows_to_units(rows)
    }

    #[instrument(skip(self))]
    async fn units_for_job(&self, job_id: i64) -> Result<Vec<Unit>, StoreError> {
        self.units_for_jobs(&[job_id]).await
    }

    #[instrument(skip(self))]
    async fn units_for_jobs(&self, job_ids: &[i64]) -> Result<Vec<Unit>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {UNIT_COLUMNS} FROM flashcast_units
            WHERE job_id = ANY($1) AND NOT deleted
            ORDER BY job_id, seq
            "#
        ))
        .bind(job_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows_to_units(rows)
    }

    #[instrument(skip(self))]
    async fn pending_units_before(
        &self,
        before: Option<i64>,
        limit: usize,
    ) -> Result<Vec<Unit>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {UNIT_COLUMNS} FROM flashcast_units
            WHERE status = 'pending' AND NOT deleted AND ($1::BIGINT IS NULL OR id < $1)
            ORDER BY id DESC
            LIMIT $2
            "#
        ))
        .bind(before)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows_to_units(rows)
    }

    #[instrument(skip(self))]
    async fn running_units(&self, platform: Platform) -> Result<Vec<Unit>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {UNIT_COLUMNS} FROM flashcast_units
            WHERE status = 'running' AND platform = $1 AND NOT deleted
            ORDER BY id
            "#
        ))
        .bind(platform.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        rows_to_units(rows)
    }

    #[instrument(skip(self))]
    async fn transition_unit(
        &self,
        id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Result<bool, StoreError> {
        if !from.can_transition_to(to) {
            return Ok(false);
        }
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE flashcast_units SET status = $3, updated_at = NOW()
                WHERE id = $1 AND status = $2
                "#,
            )
            .bind(id)
            .bind(from.as_str())
            .bind(to.as_str()),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn record_submission(&self, id: i64, correlation_id: &str) -> Result<bool, StoreError> {
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE flashcast_units SET correlation_id = $2, updated_at = NOW()
                WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(id)
            .bind(correlation_id),
        )
        .await
    }

    #[instrument(skip(self, result))]
    async fn complete_unit(
        &self,
        id: i64,
        status: TaskStatus,
        result: Option<String>,
    ) -> Result<bool, StoreError> {
        if !status.is_terminal() {
            return Ok(false);
        }
        self.conditional_update(
            sqlx::query(
                r#"
                UPDATE flashcast_units SET status = $2, result = $3, updated_at = NOW()
                WHERE id = $1 AND status = 'running'
                "#,
            )
            .bind(id)
            .bind(status.as_str())
            .bind(result),
        )
        .await
    }

    #[instrument(skip(self))]
    async fn reclaim_units(&self, ids: &[i64]) -> Result<Vec<i64>, StoreError> {
        let rows = sqlx::query(
            r#"
            UPDATE flashcast_units
            SET status = 'pending', correlation_id = NULL, updated_at = NOW()
            WHERE id = ANY($1) AND status = 'running'
            RETURNING id
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;
        let mut reclaimed: Vec<i64> = rows.iter().map(|row| row.get("id")).collect();
        reclaimed.sort_unstable();
        Ok(reclaimed)
    }
}

fn row_to_resource(row: &PgRow) -> Result<Resource, PlatformError> {
    let kind: String = row.get("kind");
    Ok(Resource {
        id: row.get("id"),
        path: row.get("path"),
        kind: kind.parse().map_err(PlatformError::Rejected)?,
        job_id: row.get("job_id"),
    })
}

fn unavailable(e: sqlx::Error) -> PlatformError {
    error!(error = %e, "resource query failed");
    PlatformError::Unavailable(e.to_string())
}

#[async_trait]
impl ResourceProvider for PostgresEntityStore {
    #[instrument(skip(self))]
    async fn get(&self, id: i64) -> Result<Resource, PlatformError> {
        let row = sqlx::query("SELECT id, path, kind, job_id FROM flashcast_resources WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| PlatformError::NotFound(format!("resource {id}")))?;
        row_to_resource(&row)
    }

    #[instrument(skip(self))]
    async fn find_by_job(&self, job_id: i64) -> Result<Vec<Resource>, PlatformError> {
        let rows = sqlx::query(
            "SELECT id, path, kind, job_id FROM flashcast_resources WHERE job_id = $1 ORDER BY id",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unavailable)?;
        rows.iter().map(row_to_resource).collect()
    }

    #[instrument(skip(self))]
    async fn add(&self, path: &str, job_id: Option<i64>) -> Result<i64, PlatformError> {
        let kind = kind_for_path(path)?;
        let row = sqlx::query(
            "INSERT INTO flashcast_resources (path, kind, job_id) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(path)
        .bind(kind.as_str())
        .bind(job_id)
        .fetch_one(&self.pool)
        .await
        .map_err(unavailable)?;
        Ok(row.get("id"))
    }
}

#[async_trait]
impl StyleLookup for PostgresEntityStore {
    #[instrument(skip(self))]
    async fn style_content(&self, id: i64) -> Result<Option<String>, PlatformError> {
        let row = sqlx::query("SELECT content FROM flashcast_styles WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        Ok(row.map(|row| row.get("content")))
    }
}
