//! SQLite storage backend implementation
//!
//! ## Features
//!
//! - **Embedded**: No separate database server required
//! - **WAL mode**: Better concurrency for reads during writes
//! - **Connection pooling**: Efficient resource usage
//! - **Migrations**: Automatic schema versioning with sqlx
//!
//! Timestamps are stored as unix milliseconds. Metric values, tags,
//! collector configs and rule definitions are stored as JSON text.
//!
//! The "one open alert per (rule, resource)" invariant is enforced by a
//! partial unique index; a violating insert surfaces as
//! `StorageError::Conflict`.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Pool, QueryBuilder, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use super::backend::{BackendHealth, BackendStats, MetricQuery, StorageBackend};
use super::error::{StorageError, StorageResult};
use super::schema::{CollectorRegistration, ExecutionRecord, NotificationLogEntry};
use crate::alerts::{AlertFilter, AlertInstance, AlertRule, AlertStatus, NewAlert};
use crate::health::HealthStatus;
use crate::{MetricPoint, MetricValue, Tags};

const ALERT_COLUMNS: &str = "id, rule_id, resource_id, status, severity, triggered_at, \
     acknowledged_at, acknowledged_by, resolved_at, resolved_by, snoozed_until, last_value";

const POINT_COLUMNS: &str = "collector_id, metric_name, time, value, tags";

/// SQLite storage backend
pub struct SqliteBackend {
    pool: Pool<Sqlite>,
    db_path: String,
}

impl SqliteBackend {
    /// Open (or create) the database file and run migrations
    ///
    /// ```no_run
    /// # use hearth::storage::sqlite::SqliteBackend;
    /// # async fn example() -> anyhow::Result<()> {
    /// let backend = SqliteBackend::new("./hearth.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip_all)]
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite backend at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
        })
    }

    fn to_millis(dt: &DateTime<Utc>) -> i64 {
        dt.timestamp_millis()
    }

    fn from_millis(millis: i64) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(millis).unwrap_or(DateTime::UNIX_EPOCH)
    }

    fn opt_from_millis(millis: Option<i64>) -> Option<DateTime<Utc>> {
        millis.map(Self::from_millis)
    }

    fn registration_from_row(row: &SqliteRow) -> StorageResult<CollectorRegistration> {
        let config: String = row.try_get("config")?;
        let timeout_ms: Option<i64> = row.try_get("timeout_ms")?;
        Ok(CollectorRegistration {
            id: row.try_get("id")?,
            display_name: row.try_get("display_name")?,
            category: row.try_get("category")?,
            kind: row.try_get("kind")?,
            enabled: row.try_get("enabled")?,
            interval: Duration::from_millis(row.try_get::<i64, _>("interval_ms")?.max(0) as u64),
            timeout: timeout_ms.map(|ms| Duration::from_millis(ms.max(0) as u64)),
            config: serde_json::from_str(&config)?,
            created_at: Self::from_millis(row.try_get("created_at")?),
        })
    }

    fn point_from_row(row: &SqliteRow) -> StorageResult<MetricPoint> {
        let value: String = row.try_get("value")?;
        let tags: String = row.try_get("tags")?;
        Ok(MetricPoint {
            time: Self::from_millis(row.try_get("time")?),
            collector_id: row.try_get("collector_id")?,
            metric_name: row.try_get("metric_name")?,
            value: serde_json::from_str::<MetricValue>(&value)?,
            tags: serde_json::from_str::<Tags>(&tags)?,
        })
    }

    fn execution_from_row(row: &SqliteRow) -> StorageResult<ExecutionRecord> {
        let status: String = row.try_get("status")?;
        Ok(ExecutionRecord {
            id: Some(row.try_get("id")?),
            collector_id: row.try_get("collector_id")?,
            started_at: Self::from_millis(row.try_get("started_at")?),
            completed_at: Self::from_millis(row.try_get("completed_at")?),
            status: status.parse().map_err(StorageError::SerializationError)?,
            error_message: row.try_get("error_message")?,
            metric_count: row.try_get::<i64, _>("metric_count")?.max(0) as usize,
            duration_ms: row.try_get::<i64, _>("duration_ms")?.max(0) as u64,
        })
    }

    fn health_from_row(row: &SqliteRow) -> StorageResult<HealthStatus> {
        let state: String = row.try_get("state")?;
        Ok(HealthStatus {
            collector_id: row.try_get("collector_id")?,
            last_run: Self::opt_from_millis(row.try_get("last_run")?),
            last_success: Self::opt_from_millis(row.try_get("last_success")?),
            consecutive_errors: row.try_get::<i64, _>("consecutive_errors")?.max(0) as u32,
            state: state.parse().map_err(StorageError::SerializationError)?,
            last_error: row.try_get("last_error")?,
        })
    }

    fn alert_from_row(row: &SqliteRow) -> StorageResult<AlertInstance> {
        let status: String = row.try_get("status")?;
        let severity: String = row.try_get("severity")?;
        let last_value: Option<String> = row.try_get("last_value")?;
        Ok(AlertInstance {
            id: row.try_get("id")?,
            rule_id: row.try_get("rule_id")?,
            resource_id: row.try_get("resource_id")?,
            status: status.parse().map_err(StorageError::SerializationError)?,
            severity: severity.parse().map_err(StorageError::SerializationError)?,
            triggered_at: Self::from_millis(row.try_get("triggered_at")?),
            acknowledged_at: Self::opt_from_millis(row.try_get("acknowledged_at")?),
            acknowledged_by: row.try_get("acknowledged_by")?,
            resolved_at: Self::opt_from_millis(row.try_get("resolved_at")?),
            resolved_by: row.try_get("resolved_by")?,
            snoozed_until: Self::opt_from_millis(row.try_get("snoozed_until")?),
            last_value: last_value
                .map(|v| serde_json::from_str::<MetricValue>(&v))
                .transpose()?,
        })
    }

    fn notification_from_row(row: &SqliteRow) -> StorageResult<NotificationLogEntry> {
        let transition: String = row.try_get("transition")?;
        Ok(NotificationLogEntry {
            id: Some(row.try_get("id")?),
            alert_id: row.try_get("alert_id")?,
            channel_id: row.try_get("channel_id")?,
            transition: transition.parse().map_err(StorageError::SerializationError)?,
            sent_at: Self::from_millis(row.try_get("sent_at")?),
            success: row.try_get("success")?,
            error: row.try_get("error")?,
        })
    }

    async fn insert_point<'e, E>(executor: E, point: &MetricPoint) -> StorageResult<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(
            r#"
            INSERT INTO metric_points (collector_id, metric_name, time, value, tags)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (collector_id, metric_name, time) DO NOTHING
            "#,
        )
        .bind(&point.collector_id)
        .bind(&point.metric_name)
        .bind(Self::to_millis(&point.time))
        .bind(serde_json::to_string(&point.value)?)
        .bind(serde_json::to_string(&point.tags)?)
        .execute(executor)
        .await?;
        Ok(())
    }

    async fn count(&self, sql: &str) -> StorageResult<u64> {
        let row: (i64,) = sqlx::query_as(sql).fetch_one(&self.pool).await?;
        Ok(row.0.max(0) as u64)
    }
}

#[async_trait]
impl StorageBackend for SqliteBackend {
    #[instrument(skip(self, registration), fields(id = %registration.id))]
    async fn insert_collector(&self, registration: CollectorRegistration) -> StorageResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO collectors (
                id, display_name, category, kind, enabled,
                interval_ms, timeout_ms, config, created_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(&registration.id)
        .bind(&registration.display_name)
        .bind(&registration.category)
        .bind(&registration.kind)
        .bind(registration.enabled)
        .bind(registration.interval.as_millis() as i64)
        .bind(registration.timeout.map(|t| t.as_millis() as i64))
        .bind(serde_json::to_string(&registration.config)?)
        .bind(Self::to_millis(&registration.created_at))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_collectors(&self) -> StorageResult<Vec<CollectorRegistration>> {
        let rows = sqlx::query("SELECT * FROM collectors ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::registration_from_row).collect()
    }

    async fn get_collector(&self, id: &str) -> StorageResult<Option<CollectorRegistration>> {
        let row = sqlx::query("SELECT * FROM collectors WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::registration_from_row).transpose()
    }

    async fn set_collector_enabled(&self, id: &str, enabled: bool) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE collectors SET enabled = ? WHERE id = ?")
            .bind(enabled)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_collector_config(
        &self,
        id: &str,
        config: serde_json::Value,
    ) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE collectors SET config = ? WHERE id = ?")
            .bind(serde_json::to_string(&config)?)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn update_collector_interval(&self, id: &str, interval: Duration) -> StorageResult<bool> {
        let result = sqlx::query("UPDATE collectors SET interval_ms = ? WHERE id = ?")
            .bind(interval.as_millis() as i64)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, points), fields(count = points.len()))]
    async fn insert_batch(&self, points: Vec<MetricPoint>) -> StorageResult<()> {
        if points.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for point in &points {
            Self::insert_point(&mut *tx, point).await?;
        }
        tx.commit().await?;

        debug!("batch insert complete");
        Ok(())
    }

    #[instrument(skip(self), fields(collector_id = %query.collector_id))]
    async fn query_range(&self, query: MetricQuery) -> StorageResult<Vec<MetricPoint>> {
        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {POINT_COLUMNS} FROM metric_points WHERE collector_id = "
        ));
        builder.push_bind(query.collector_id);
        builder.push(" AND time >= ");
        builder.push_bind(Self::to_millis(&query.start));
        builder.push(" AND time <= ");
        builder.push_bind(Self::to_millis(&query.end));
        if let Some(name) = query.metric_name {
            builder.push(" AND metric_name = ");
            builder.push_bind(name);
        }
        builder.push(" ORDER BY time ASC, metric_name ASC");
        if let Some(limit) = query.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        let points: Vec<MetricPoint> = rows
            .iter()
            .map(Self::point_from_row)
            .collect::<StorageResult<_>>()?;

        debug!("query returned {} points", points.len());
        Ok(points)
    }

    async fn query_latest(
        &self,
        collector_id: &str,
        metric_name: &str,
    ) -> StorageResult<Option<MetricPoint>> {
        let row = sqlx::query(&format!(
            "SELECT {POINT_COLUMNS} FROM metric_points \
             WHERE collector_id = ? AND metric_name = ? ORDER BY time DESC LIMIT 1"
        ))
        .bind(collector_id)
        .bind(metric_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::point_from_row).transpose()
    }

    async fn query_recent(
        &self,
        collector_id: &str,
        metric_name: &str,
        limit: usize,
    ) -> StorageResult<Vec<MetricPoint>> {
        let rows = sqlx::query(&format!(
            "SELECT {POINT_COLUMNS} FROM metric_points \
             WHERE collector_id = ? AND metric_name = ? ORDER BY time DESC LIMIT ?"
        ))
        .bind(collector_id)
        .bind(metric_name)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut points: Vec<MetricPoint> = rows
            .iter()
            .map(Self::point_from_row)
            .collect::<StorageResult<_>>()?;
        // oldest first
        points.reverse();
        Ok(points)
    }

    async fn latest_values(&self, collector_id: &str) -> StorageResult<Vec<MetricPoint>> {
        let rows = sqlx::query(
            r#"
            SELECT p.collector_id, p.metric_name, p.time, p.value, p.tags
            FROM metric_points p
            JOIN (
                SELECT metric_name, MAX(time) AS time
                FROM metric_points
                WHERE collector_id = ?
                GROUP BY metric_name
            ) newest ON newest.metric_name = p.metric_name AND newest.time = p.time
            WHERE p.collector_id = ?
            ORDER BY p.metric_name ASC
            "#,
        )
        .bind(collector_id)
        .bind(collector_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::point_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_metrics(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM metric_points WHERE time < ?")
            .bind(Self::to_millis(&before))
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old metric points", deleted);
        Ok(deleted)
    }

    #[instrument(
        skip(self, record, points, health),
        fields(collector_id = %record.collector_id, count = points.len())
    )]
    async fn commit_run(
        &self,
        record: ExecutionRecord,
        points: Vec<MetricPoint>,
        health: HealthStatus,
    ) -> StorageResult<i64> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            INSERT INTO executions (
                collector_id, started_at, completed_at, status,
                error_message, metric_count, duration_ms
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.collector_id)
        .bind(Self::to_millis(&record.started_at))
        .bind(Self::to_millis(&record.completed_at))
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.metric_count as i64)
        .bind(record.duration_ms as i64)
        .execute(&mut *tx)
        .await?;
        let id = result.last_insert_rowid();

        for point in &points {
            Self::insert_point(&mut *tx, point).await?;
        }

        sqlx::query(
            r#"
            INSERT INTO collector_health (
                collector_id, last_run, last_success, consecutive_errors, state, last_error
            )
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT (collector_id) DO UPDATE SET
                last_run = excluded.last_run,
                last_success = excluded.last_success,
                consecutive_errors = excluded.consecutive_errors,
                state = excluded.state,
                last_error = excluded.last_error
            "#,
        )
        .bind(&health.collector_id)
        .bind(health.last_run.as_ref().map(Self::to_millis))
        .bind(health.last_success.as_ref().map(Self::to_millis))
        .bind(health.consecutive_errors as i64)
        .bind(health.state.as_str())
        .bind(&health.last_error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(id)
    }

    async fn query_executions(
        &self,
        collector_id: &str,
        limit: usize,
    ) -> StorageResult<Vec<ExecutionRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM executions WHERE collector_id = ? \
             ORDER BY started_at DESC, id DESC LIMIT ?",
        )
        .bind(collector_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::execution_from_row).collect()
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn cleanup_old_executions(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let result = sqlx::query("DELETE FROM executions WHERE started_at < ?")
            .bind(Self::to_millis(&before))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    #[instrument(skip(self))]
    async fn trim_executions(&self, keep: usize) -> StorageResult<usize> {
        let result = sqlx::query(
            r#"
            DELETE FROM executions WHERE id IN (
                SELECT id FROM (
                    SELECT id, ROW_NUMBER() OVER (
                        PARTITION BY collector_id ORDER BY started_at DESC, id DESC
                    ) AS rn
                    FROM executions
                )
                WHERE rn > ?
            )
            "#,
        )
        .bind(keep as i64)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() as usize)
    }

    async fn get_health(&self, collector_id: &str) -> StorageResult<Option<HealthStatus>> {
        let row = sqlx::query("SELECT * FROM collector_health WHERE collector_id = ?")
            .bind(collector_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::health_from_row).transpose()
    }

    async fn list_health(&self) -> StorageResult<Vec<HealthStatus>> {
        let rows = sqlx::query("SELECT * FROM collector_health ORDER BY collector_id ASC")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(Self::health_from_row).collect()
    }

    #[instrument(skip(self, rule), fields(rule_id = %rule.id))]
    async fn upsert_rule(&self, rule: AlertRule) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO alert_rules (id, definition, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT (id) DO UPDATE SET
                definition = excluded.definition,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&rule.id)
        .bind(serde_json::to_string(&rule)?)
        .bind(Self::to_millis(&Utc::now()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rule(&self, id: &str) -> StorageResult<Option<AlertRule>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT definition FROM alert_rules WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(definition,)| serde_json::from_str(&definition).map_err(StorageError::from))
            .transpose()
    }

    async fn list_rules(&self) -> StorageResult<Vec<AlertRule>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT definition FROM alert_rules ORDER BY id ASC")
                .fetch_all(&self.pool)
                .await?;
        rows.into_iter()
            .map(|(definition,)| serde_json::from_str(&definition).map_err(StorageError::from))
            .collect()
    }

    #[instrument(
        skip(self, alert),
        fields(rule_id = %alert.rule_id, resource_id = %alert.resource_id)
    )]
    async fn insert_alert(&self, alert: NewAlert) -> StorageResult<AlertInstance> {
        let last_value = alert
            .last_value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            INSERT INTO alerts (rule_id, resource_id, status, severity, triggered_at, last_value)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&alert.rule_id)
        .bind(&alert.resource_id)
        .bind(AlertStatus::Active.as_str())
        .bind(alert.severity.as_str())
        .bind(Self::to_millis(&alert.triggered_at))
        .bind(last_value)
        .execute(&self.pool)
        .await?;

        Ok(AlertInstance {
            id: result.last_insert_rowid(),
            rule_id: alert.rule_id,
            resource_id: alert.resource_id,
            status: AlertStatus::Active,
            severity: alert.severity,
            triggered_at: crate::util::millis_precision(alert.triggered_at),
            acknowledged_at: None,
            acknowledged_by: None,
            resolved_at: None,
            resolved_by: None,
            snoozed_until: None,
            last_value: alert.last_value,
        })
    }

    #[instrument(skip(self, alert), fields(alert_id = alert.id))]
    async fn update_alert(&self, alert: &AlertInstance) -> StorageResult<()> {
        let last_value = alert
            .last_value
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE alerts SET
                status = ?, severity = ?, acknowledged_at = ?, acknowledged_by = ?,
                resolved_at = ?, resolved_by = ?, snoozed_until = ?, last_value = ?
            WHERE id = ?
            "#,
        )
        .bind(alert.status.as_str())
        .bind(alert.severity.as_str())
        .bind(alert.acknowledged_at.as_ref().map(Self::to_millis))
        .bind(&alert.acknowledged_by)
        .bind(alert.resolved_at.as_ref().map(Self::to_millis))
        .bind(&alert.resolved_by)
        .bind(alert.snoozed_until.as_ref().map(Self::to_millis))
        .bind(last_value)
        .bind(alert.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::QueryFailed(format!(
                "alert {} does not exist",
                alert.id
            )));
        }
        Ok(())
    }

    async fn get_alert(&self, id: i64) -> StorageResult<Option<AlertInstance>> {
        let row = sqlx::query(&format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE id = ?"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn open_alert(
        &self,
        rule_id: &str,
        resource_id: &str,
    ) -> StorageResult<Option<AlertInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts \
             WHERE rule_id = ? AND resource_id = ? AND status != 'resolved'"
        ))
        .bind(rule_id)
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn last_alert(
        &self,
        rule_id: &str,
        resource_id: &str,
    ) -> StorageResult<Option<AlertInstance>> {
        let row = sqlx::query(&format!(
            "SELECT {ALERT_COLUMNS} FROM alerts WHERE rule_id = ? AND resource_id = ? \
             ORDER BY triggered_at DESC, id DESC LIMIT 1"
        ))
        .bind(rule_id)
        .bind(resource_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::alert_from_row).transpose()
    }

    async fn list_alerts(&self, filter: AlertFilter) -> StorageResult<Vec<AlertInstance>> {
        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {ALERT_COLUMNS} FROM alerts WHERE 1 = 1"));
        if filter.open_only {
            builder.push(" AND status != 'resolved'");
        }
        if let Some(status) = filter.status {
            builder.push(" AND status = ");
            builder.push_bind(status.as_str());
        }
        if let Some(rule_id) = filter.rule_id {
            builder.push(" AND rule_id = ");
            builder.push_bind(rule_id);
        }
        if let Some(resource_id) = filter.resource_id {
            builder.push(" AND resource_id = ");
            builder.push_bind(resource_id);
        }
        builder.push(" ORDER BY triggered_at DESC, id DESC");
        if let Some(limit) = filter.limit {
            builder.push(" LIMIT ");
            builder.push_bind(limit as i64);
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(Self::alert_from_row).collect()
    }

    async fn append_notification(&self, entry: NotificationLogEntry) -> StorageResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO notification_log (alert_id, channel_id, transition, sent_at, success, error)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(entry.alert_id)
        .bind(&entry.channel_id)
        .bind(entry.transition.as_str())
        .bind(Self::to_millis(&entry.sent_at))
        .bind(entry.success)
        .bind(&entry.error)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    async fn list_notifications(
        &self,
        alert_id: Option<i64>,
    ) -> StorageResult<Vec<NotificationLogEntry>> {
        let rows = match alert_id {
            Some(id) => {
                sqlx::query("SELECT * FROM notification_log WHERE alert_id = ? ORDER BY id ASC")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("SELECT * FROM notification_log ORDER BY id ASC")
                    .fetch_all(&self.pool)
                    .await?
            }
        };
        rows.iter().map(Self::notification_from_row).collect()
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<BackendHealth> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => {
                let mut metadata = HashMap::new();
                metadata.insert("backend".to_string(), "sqlite".to_string());
                metadata.insert("db_path".to_string(), self.db_path.clone());

                Ok(BackendHealth {
                    healthy: true,
                    message: "SQLite backend operational".to_string(),
                    metadata,
                })
            }
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(BackendHealth {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    #[instrument(skip(self))]
    async fn get_stats(&self) -> StorageResult<BackendStats> {
        let range: (Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT MIN(time), MAX(time) FROM metric_points")
                .fetch_one(&self.pool)
                .await?;

        let size_bytes = std::fs::metadata(&self.db_path).map(|m| m.len()).ok();

        Ok(BackendStats {
            backend: "sqlite".to_string(),
            collectors: self.count("SELECT COUNT(*) FROM collectors").await?,
            metric_points: self.count("SELECT COUNT(*) FROM metric_points").await?,
            executions: self.count("SELECT COUNT(*) FROM executions").await?,
            rules: self.count("SELECT COUNT(*) FROM alert_rules").await?,
            alerts: self.count("SELECT COUNT(*) FROM alerts").await?,
            open_alerts: self
                .count("SELECT COUNT(*) FROM alerts WHERE status != 'resolved'")
                .await?,
            notifications: self.count("SELECT COUNT(*) FROM notification_log").await?,
            oldest_point: Self::opt_from_millis(range.0),
            newest_point: Self::opt_from_millis(range.1),
            size_bytes,
        })
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing SQLite backend");
        self.pool.close().await;
        Ok(())
    }
}
