//! PostgreSQL 仓储实现
//!
//! 实体以 JSONB 整体存储，检索与乐观锁需要的列单独冗余出来。

use crate::connection::DatabasePool;
use crate::repository::{OrderRepository, PriorValue};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use clinlab_core::{
    Alert, ClinlabError, ExternalLab, LabResult, LabTest, NotificationRecord, Order, OrderStatus,
    Result, ResultStatus, ResultValue,
};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

/// PostgreSQL 仓储
pub struct PgRepository {
    pool: DatabasePool,
}

fn result_status_str(status: ResultStatus) -> &'static str {
    match status {
        ResultStatus::PendingReview => "PENDING_REVIEW",
        ResultStatus::Reviewed => "REVIEWED",
    }
}

fn order_from_row(row: Option<PgRow>) -> Result<Option<Order>> {
    Ok(row
        .map(|row| row.try_get::<Json<Order>, _>("body"))
        .transpose()?
        .map(|body| body.0))
}

impl PgRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// 创建数据库表与索引
    pub async fn migrate(&self) -> Result<()> {
        let pool = self.pool.pool();

        let tables = [
            r#"
            CREATE TABLE IF NOT EXISTS lab_tests (
                id UUID PRIMARY KEY,
                code VARCHAR(64) NOT NULL,
                body JSONB NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS external_labs (
                id UUID PRIMARY KEY,
                body JSONB NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS lab_orders (
                id UUID PRIMARY KEY,
                order_number VARCHAR(32) UNIQUE NOT NULL,
                status VARCHAR(20) NOT NULL,
                external_order_id VARCHAR(128),
                order_date TIMESTAMP WITH TIME ZONE NOT NULL,
                version BIGINT NOT NULL DEFAULT 0,
                body JSONB NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS lab_order_items (
                id UUID PRIMARY KEY,
                order_id UUID NOT NULL REFERENCES lab_orders(id)
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS lab_results (
                id UUID PRIMARY KEY,
                order_id UUID NOT NULL REFERENCES lab_orders(id),
                status VARCHAR(20) NOT NULL,
                message_id VARCHAR(128) UNIQUE,
                result_date TIMESTAMP WITH TIME ZONE NOT NULL,
                version BIGINT NOT NULL DEFAULT 0,
                body JSONB NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS lab_result_values (
                id UUID PRIMARY KEY,
                result_id UUID NOT NULL REFERENCES lab_results(id),
                patient_id UUID NOT NULL,
                component_id UUID NOT NULL,
                result_date TIMESTAMP WITH TIME ZONE NOT NULL,
                body JSONB NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS lab_alerts (
                id UUID PRIMARY KEY,
                order_id UUID NOT NULL,
                acknowledged BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMP WITH TIME ZONE NOT NULL,
                body JSONB NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS alert_notifications (
                id UUID PRIMARY KEY,
                alert_id UUID NOT NULL REFERENCES lab_alerts(id),
                attempted_at TIMESTAMP WITH TIME ZONE NOT NULL,
                body JSONB NOT NULL
            )"#,
            r#"
            CREATE TABLE IF NOT EXISTS order_sequences (
                day DATE PRIMARY KEY,
                last_value INTEGER NOT NULL
            )"#,
        ];

        for sql in tables {
            sqlx::query(sql).execute(pool).await?;
        }

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_lab_orders_status ON lab_orders(status)",
            "CREATE INDEX IF NOT EXISTS idx_lab_orders_external_id ON lab_orders(external_order_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_order_items_order ON lab_order_items(order_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_order ON lab_results(order_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_results_status ON lab_results(status)",
            "CREATE INDEX IF NOT EXISTS idx_result_values_history ON lab_result_values(patient_id, component_id, result_date DESC)",
            "CREATE INDEX IF NOT EXISTS idx_lab_alerts_order ON lab_alerts(order_id)",
            "CREATE INDEX IF NOT EXISTS idx_lab_alerts_open ON lab_alerts(acknowledged) WHERE NOT acknowledged",
            "CREATE INDEX IF NOT EXISTS idx_alert_notifications_alert ON alert_notifications(alert_id)",
        ];

        for sql in indexes {
            sqlx::query(sql).execute(pool).await?;
        }

        tracing::info!("Database schema migrated");
        Ok(())
    }

    async fn fetch_order_by_id(&self, sql: &str, id: Uuid) -> Result<Option<Order>> {
        let row = sqlx::query(sql)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        order_from_row(row)
    }

    async fn write_result_values(tx: &mut Transaction<'_, Postgres>, result: &LabResult) -> Result<()> {
        sqlx::query("DELETE FROM lab_result_values WHERE result_id = $1")
            .bind(result.id)
            .execute(&mut **tx)
            .await?;

        for value in result.values() {
            sqlx::query(
                r#"
                INSERT INTO lab_result_values (id, result_id, patient_id, component_id, result_date, body)
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(value.id)
            .bind(result.id)
            .bind(result.patient_id)
            .bind(value.component_id)
            .bind(result.result_date)
            .bind(Json(value))
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// 带版本检查的医嘱更新，未命中时区分并发冲突与不存在
    async fn write_order(&self, tx: &mut Transaction<'_, Postgres>, order: &Order) -> Result<i64> {
        let mut updated = order.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();

        let affected = sqlx::query(
            r#"
            UPDATE lab_orders
            SET status = $1, external_order_id = $2, version = $3, body = $4
            WHERE id = $5 AND version = $6
            "#,
        )
        .bind(updated.status.as_str())
        .bind(&updated.external_order_id)
        .bind(updated.version)
        .bind(Json(&updated))
        .bind(order.id)
        .bind(order.version)
        .execute(&mut **tx)
        .await?
        .rows_affected();

        if affected == 0 {
            if self.exists("lab_orders", order.id).await? {
                return Err(ClinlabError::Concurrency {
                    entity: "order",
                    id: order.id,
                    expected_version: order.version,
                });
            }
            return Err(ClinlabError::NotFound(format!("order {}", order.id)));
        }

        Ok(updated.version)
    }

    async fn write_result(tx: &mut Transaction<'_, Postgres>, result: &LabResult) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lab_results (id, order_id, status, message_id, result_date, version, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(result.id)
        .bind(result.order_id)
        .bind(result_status_str(result.status))
        .bind(&result.source_message_id)
        .bind(result.result_date)
        .bind(result.version)
        .bind(Json(result))
        .execute(&mut **tx)
        .await?;

        Self::write_result_values(tx, result).await
    }

    async fn exists(&self, table: &str, id: Uuid) -> Result<bool> {
        let sql = format!("SELECT 1 FROM {} WHERE id = $1", table);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl OrderRepository for PgRepository {
    async fn upsert_test(&self, test: &LabTest) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lab_tests (id, code, body) VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE SET code = EXCLUDED.code, body = EXCLUDED.body
            "#,
        )
        .bind(test.id)
        .bind(&test.code)
        .bind(Json(test))
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn get_test(&self, id: Uuid) -> Result<Option<LabTest>> {
        let row = sqlx::query("SELECT body FROM lab_tests WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<Json<LabTest>, _>("body"))
            .transpose()?
            .map(|body| body.0))
    }

    async fn upsert_external_lab(&self, lab: &ExternalLab) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO external_labs (id, body) VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET body = EXCLUDED.body
            "#,
        )
        .bind(lab.id)
        .bind(Json(lab))
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn get_external_lab(&self, id: Uuid) -> Result<Option<ExternalLab>> {
        let row = sqlx::query("SELECT body FROM external_labs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<Json<ExternalLab>, _>("body"))
            .transpose()?
            .map(|body| body.0))
    }

    async fn next_order_sequence(&self, day: NaiveDate) -> Result<u32> {
        let row = sqlx::query(
            r#"
            INSERT INTO order_sequences (day, last_value) VALUES ($1, 1)
            ON CONFLICT (day) DO UPDATE SET last_value = order_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(day)
        .fetch_one(self.pool.pool())
        .await?;

        let value: i32 = row.try_get("last_value")?;
        u32::try_from(value)
            .map_err(|_| ClinlabError::Internal(format!("invalid order sequence {}", value)))
    }

    async fn insert_order(&self, order: &Order) -> Result<()> {
        let mut tx = self.pool.pool().begin().await?;

        sqlx::query(
            r#"
            INSERT INTO lab_orders (id, order_number, status, external_order_id, order_date, version, body)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(order.id)
        .bind(&order.order_number)
        .bind(order.status.as_str())
        .bind(&order.external_order_id)
        .bind(order.order_date)
        .bind(order.version)
        .bind(Json(order))
        .execute(&mut *tx)
        .await?;

        for item in &order.items {
            sqlx::query("INSERT INTO lab_order_items (id, order_id) VALUES ($1, $2)")
                .bind(item.id)
                .bind(order.id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> Result<Option<Order>> {
        self.fetch_order_by_id("SELECT body FROM lab_orders WHERE id = $1", id)
            .await
    }

    async fn find_order_by_item(&self, item_id: Uuid) -> Result<Option<Order>> {
        self.fetch_order_by_id(
            r#"
            SELECT o.body FROM lab_orders o
            JOIN lab_order_items i ON i.order_id = o.id
            WHERE i.id = $1
            "#,
            item_id,
        )
        .await
    }

    async fn find_order_by_external_id(&self, external_order_id: &str) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT body FROM lab_orders WHERE external_order_id = $1 LIMIT 1")
            .bind(external_order_id)
            .fetch_optional(self.pool.pool())
            .await?;
        order_from_row(row)
    }

    async fn update_order(&self, order: &Order) -> Result<i64> {
        let mut tx = self.pool.pool().begin().await?;
        let version = self.write_order(&mut tx, order).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query("SELECT body FROM lab_orders WHERE status = $1 ORDER BY order_date")
            .bind(status.as_str())
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<Json<Order>, _>("body")?.0))
            .collect()
    }

    async fn insert_result(&self, result: &LabResult) -> Result<()> {
        let mut tx = self.pool.pool().begin().await?;
        Self::write_result(&mut tx, result).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_result(&self, order: &Order, result: &LabResult) -> Result<i64> {
        let mut tx = self.pool.pool().begin().await?;
        let version = self.write_order(&mut tx, order).await?;
        Self::write_result(&mut tx, result).await?;
        tx.commit().await?;
        Ok(version)
    }

    async fn get_result(&self, id: Uuid) -> Result<Option<LabResult>> {
        let row = sqlx::query("SELECT body FROM lab_results WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<Json<LabResult>, _>("body"))
            .transpose()?
            .map(|body| body.0))
    }

    async fn update_result(&self, result: &LabResult) -> Result<i64> {
        let mut updated = result.clone();
        updated.version += 1;

        let mut tx = self.pool.pool().begin().await?;
        let affected = sqlx::query(
            r#"
            UPDATE lab_results SET status = $1, version = $2, body = $3
            WHERE id = $4 AND version = $5
            "#,
        )
        .bind(result_status_str(updated.status))
        .bind(updated.version)
        .bind(Json(&updated))
        .bind(result.id)
        .bind(result.version)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            tx.rollback().await?;
            if self.exists("lab_results", result.id).await? {
                return Err(ClinlabError::Concurrency {
                    entity: "result",
                    id: result.id,
                    expected_version: result.version,
                });
            }
            return Err(ClinlabError::NotFound(format!("result {}", result.id)));
        }

        Self::write_result_values(&mut tx, &updated).await?;
        tx.commit().await?;
        Ok(updated.version)
    }

    async fn results_for_order(&self, order_id: Uuid) -> Result<Vec<LabResult>> {
        let rows = sqlx::query("SELECT body FROM lab_results WHERE order_id = $1 ORDER BY result_date")
            .bind(order_id)
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<Json<LabResult>, _>("body")?.0))
            .collect()
    }

    async fn find_result_by_message_id(&self, message_id: &str) -> Result<Option<LabResult>> {
        let row = sqlx::query("SELECT body FROM lab_results WHERE message_id = $1")
            .bind(message_id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<Json<LabResult>, _>("body"))
            .transpose()?
            .map(|body| body.0))
    }

    async fn results_by_status(&self, status: ResultStatus) -> Result<Vec<LabResult>> {
        let rows = sqlx::query("SELECT body FROM lab_results WHERE status = $1 ORDER BY result_date")
            .bind(result_status_str(status))
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<Json<LabResult>, _>("body")?.0))
            .collect()
    }

    async fn latest_value_before(
        &self,
        patient_id: Uuid,
        component_id: Uuid,
        before: DateTime<Utc>,
    ) -> Result<Option<PriorValue>> {
        let row = sqlx::query(
            r#"
            SELECT body, result_date FROM lab_result_values
            WHERE patient_id = $1 AND component_id = $2 AND result_date < $3
            ORDER BY result_date DESC
            LIMIT 1
            "#,
        )
        .bind(patient_id)
        .bind(component_id)
        .bind(before)
        .fetch_optional(self.pool.pool())
        .await?;

        match row {
            Some(row) => {
                let value = row.try_get::<Json<ResultValue>, _>("body")?.0;
                let result_date: DateTime<Utc> = row.try_get("result_date")?;
                Ok(Some(PriorValue {
                    raw_value: value.raw_value,
                    value: value.value,
                    result_date,
                }))
            }
            None => Ok(None),
        }
    }

    async fn insert_alert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO lab_alerts (id, order_id, acknowledged, created_at, body)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(alert.id)
        .bind(alert.order_id)
        .bind(alert.is_acknowledged())
        .bind(alert.created_at)
        .bind(Json(alert))
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn get_alert(&self, id: Uuid) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT body FROM lab_alerts WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;
        Ok(row
            .map(|row| row.try_get::<Json<Alert>, _>("body"))
            .transpose()?
            .map(|body| body.0))
    }

    async fn acknowledge_alert(&self, id: Uuid, user_id: Uuid, at: DateTime<Utc>) -> Result<Alert> {
        let mut tx = self.pool.pool().begin().await?;

        let row = sqlx::query("SELECT body FROM lab_alerts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| ClinlabError::NotFound(format!("alert {}", id)))?;
        let mut alert = row.try_get::<Json<Alert>, _>("body")?.0;

        if alert.acknowledge(user_id, at) {
            sqlx::query("UPDATE lab_alerts SET acknowledged = TRUE, body = $1 WHERE id = $2")
                .bind(Json(&alert))
                .bind(id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(alert)
    }

    async fn unacknowledged_alerts(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT body FROM lab_alerts WHERE NOT acknowledged ORDER BY created_at")
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<Json<Alert>, _>("body")?.0))
            .collect()
    }

    async fn alerts_for_order(&self, order_id: Uuid) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT body FROM lab_alerts WHERE order_id = $1 ORDER BY created_at")
            .bind(order_id)
            .fetch_all(self.pool.pool())
            .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<Json<Alert>, _>("body")?.0))
            .collect()
    }

    async fn append_notification(&self, record: &NotificationRecord) -> Result<()> {
        sqlx::query(
            "INSERT INTO alert_notifications (id, alert_id, attempted_at, body) VALUES ($1, $2, $3, $4)",
        )
        .bind(record.id)
        .bind(record.alert_id)
        .bind(record.attempted_at)
        .bind(Json(record))
        .execute(self.pool.pool())
        .await?;
        Ok(())
    }

    async fn notification_records(&self, alert_id: Uuid) -> Result<Vec<NotificationRecord>> {
        let rows = sqlx::query(
            "SELECT body FROM alert_notifications WHERE alert_id = $1 ORDER BY attempted_at",
        )
        .bind(alert_id)
        .fetch_all(self.pool.pool())
        .await?;

        rows.into_iter()
            .map(|row| Ok(row.try_get::<Json<NotificationRecord>, _>("body")?.0))
            .collect()
    }
}
