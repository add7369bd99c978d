//! PostgreSQL store backed by a `sqlx` connection pool.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::Store;
use crate::error::{AppError, Result};
use crate::models::{
    ChatMessage, Conversation, CreateMachineRequest, Machine, MachineSummary, MachineType,
    MessageRole, NewConversation, NewReading, Prediction, ReadingWithMachine, SensorReading,
};

const MACHINE_COLUMNS: &str = "id, product_id, machine_type, status, location, created_at";

const READING_COLUMNS: &str =
    "id, machine_id, recorded_at, air_temp, process_temp, rotational_speed, torque, tool_wear";

const CONVERSATION_COLUMNS: &str =
    "id, title, machine_id, total_messages, last_message_at, created_at";

const MESSAGE_COLUMNS: &str = "id, conversation_id, role, content, created_at";

// ---

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    // ---
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

/// Map constraint violations to [`AppError::Conflict`]; anything else stays a
/// database error.
fn map_constraint(err: sqlx::Error, conflict: impl FnOnce() -> String) -> AppError {
    // ---
    match &err {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            AppError::Conflict(conflict())
        }
        _ => AppError::Database(err),
    }
}

/// Flat row of a reading joined with its machine.
#[derive(sqlx::FromRow)]
struct JoinedRow {
    // ---
    id: i64,
    machine_id: Uuid,
    recorded_at: DateTime<Utc>,
    air_temp: f64,
    process_temp: f64,
    rotational_speed: i32,
    torque: f64,
    tool_wear: i32,
    m_product_id: String,
    #[sqlx(try_from = "String")]
    m_machine_type: MachineType,
    m_status: String,
    m_location: Option<String>,
    m_created_at: DateTime<Utc>,
}

impl From<JoinedRow> for ReadingWithMachine {
    fn from(row: JoinedRow) -> Self {
        ReadingWithMachine {
            reading: SensorReading {
                id: row.id,
                machine_id: row.machine_id,
                timestamp: row.recorded_at,
                air_temp: row.air_temp,
                process_temp: row.process_temp,
                rotational_speed: row.rotational_speed,
                torque: row.torque,
                tool_wear: row.tool_wear,
            },
            machine: Machine {
                id: row.machine_id,
                product_id: row.m_product_id,
                machine_type: row.m_machine_type,
                status: row.m_status,
                location: row.m_location,
                created_at: row.m_created_at,
            },
        }
    }
}

#[derive(sqlx::FromRow)]
struct MachineCountRow {
    // ---
    #[sqlx(flatten)]
    machine: Machine,
    reading_count: i64,
}

#[async_trait]
impl Store for PgStore {
    // ---
    async fn insert_machine(&self, req: &CreateMachineRequest) -> Result<Machine> {
        // ---
        let sql = format!(
            "INSERT INTO machines (id, product_id, machine_type) VALUES ($1, $2, $3) RETURNING {}",
            MACHINE_COLUMNS
        );
        sqlx::query_as::<_, Machine>(&sql)
            .bind(Uuid::new_v4())
            .bind(&req.product_id)
            .bind(req.machine_type.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                map_constraint(e, || {
                    format!("Machine with product ID {} already exists", req.product_id)
                })
            })
    }

    async fn list_machines(&self, with_counts: bool) -> Result<Vec<MachineSummary>> {
        // ---
        if !with_counts {
            let sql = format!(
                "SELECT {} FROM machines ORDER BY product_id ASC",
                MACHINE_COLUMNS
            );
            let machines = sqlx::query_as::<_, Machine>(&sql)
                .fetch_all(&self.pool)
                .await?;
            return Ok(machines
                .into_iter()
                .map(|machine| MachineSummary {
                    machine,
                    reading_count: None,
                })
                .collect());
        }

        let rows = sqlx::query_as::<_, MachineCountRow>(
            r#"
            SELECT m.id, m.product_id, m.machine_type, m.status, m.location, m.created_at,
                   COUNT(r.id) AS reading_count
            FROM machines m
            LEFT JOIN sensor_readings r ON r.machine_id = m.id
            GROUP BY m.id
            ORDER BY m.product_id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| MachineSummary {
                machine: row.machine,
                reading_count: Some(row.reading_count),
            })
            .collect())
    }

    async fn get_machine(&self, id: Uuid) -> Result<Option<Machine>> {
        // ---
        let sql = format!("SELECT {} FROM machines WHERE id = $1", MACHINE_COLUMNS);
        Ok(sqlx::query_as::<_, Machine>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_machine_by_product_id(&self, product_id: &str) -> Result<Option<Machine>> {
        // ---
        let sql = format!(
            "SELECT {} FROM machines WHERE product_id = $1",
            MACHINE_COLUMNS
        );
        Ok(sqlx::query_as::<_, Machine>(&sql)
            .bind(product_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn delete_machine(&self, id: Uuid) -> Result<bool> {
        // ---
        let result = sqlx::query("DELETE FROM machines WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                map_constraint(e, || {
                    format!(
                        "Machine {} still has sensor readings and cannot be deleted",
                        id
                    )
                })
            })?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_readings(&self, machine_id: Uuid) -> Result<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM sensor_readings WHERE machine_id = $1")
                .bind(machine_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn count_predictions(&self, machine_id: Uuid) -> Result<i64> {
        Ok(
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM predictions WHERE machine_id = $1")
                .bind(machine_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn insert_reading(&self, new: &NewReading) -> Result<SensorReading> {
        // ---
        let m = &new.measurements;
        let sql = format!(
            r#"
            INSERT INTO sensor_readings (
                machine_id, recorded_at,
                air_temp, process_temp, rotational_speed, torque, tool_wear
            ) VALUES ($1, COALESCE($2, NOW()), $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            READING_COLUMNS
        );

        sqlx::query_as::<_, SensorReading>(&sql)
            .bind(new.machine_id)
            .bind(new.timestamp)
            .bind(m.air_temp)
            .bind(m.process_temp)
            .bind(m.rotational_speed)
            .bind(m.torque)
            .bind(m.tool_wear)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    AppError::machine_not_found(new.machine_id)
                }
                _ => AppError::Database(e),
            })
    }

    async fn list_readings(
        &self,
        machine_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ReadingWithMachine>> {
        // ---
        let rows = sqlx::query_as::<_, JoinedRow>(
            r#"
            SELECT r.id, r.machine_id, r.recorded_at,
                   r.air_temp, r.process_temp, r.rotational_speed, r.torque, r.tool_wear,
                   m.product_id   AS m_product_id,
                   m.machine_type AS m_machine_type,
                   m.status       AS m_status,
                   m.location     AS m_location,
                   m.created_at   AS m_created_at
            FROM sensor_readings r
            JOIN machines m ON m.id = r.machine_id
            WHERE ($1::uuid IS NULL OR r.machine_id = $1)
            ORDER BY r.recorded_at DESC, r.id DESC
            LIMIT $2
            "#,
        )
        .bind(machine_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ReadingWithMachine::from).collect())
    }

    async fn recent_readings(&self, machine_id: Uuid, limit: i64) -> Result<Vec<SensorReading>> {
        // ---
        let sql = format!(
            "SELECT {} FROM sensor_readings WHERE machine_id = $1 \
             ORDER BY recorded_at DESC, id DESC LIMIT $2",
            READING_COLUMNS
        );
        Ok(sqlx::query_as::<_, SensorReading>(&sql)
            .bind(machine_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn readings_since(
        &self,
        machine_id: Uuid,
        since: DateTime<Utc>,
    ) -> Result<Vec<SensorReading>> {
        // ---
        let sql = format!(
            "SELECT {} FROM sensor_readings WHERE machine_id = $1 AND recorded_at >= $2 \
             ORDER BY recorded_at DESC, id DESC",
            READING_COLUMNS
        );
        Ok(sqlx::query_as::<_, SensorReading>(&sql)
            .bind(machine_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn recent_predictions(&self, machine_id: Uuid, limit: i64) -> Result<Vec<Prediction>> {
        // ---
        Ok(sqlx::query_as::<_, Prediction>(
            r#"
            SELECT id, machine_id, predicted_at, risk_score, failure_predicted,
                   failure_type, confidence, predicted_failure_time
            FROM predictions
            WHERE machine_id = $1
            ORDER BY predicted_at DESC, id DESC
            LIMIT $2
            "#,
        )
        .bind(machine_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn insert_conversation(&self, new: &NewConversation) -> Result<Conversation> {
        // ---
        let sql = format!(
            "INSERT INTO chat_conversations (id, title, machine_id) VALUES ($1, $2, $3) \
             RETURNING {}",
            CONVERSATION_COLUMNS
        );
        sqlx::query_as::<_, Conversation>(&sql)
            .bind(Uuid::new_v4())
            .bind(&new.title)
            .bind(new.machine_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match (&e, new.machine_id) {
                (sqlx::Error::Database(db), Some(machine_id)) if db.is_foreign_key_violation() => {
                    AppError::machine_not_found(machine_id)
                }
                _ => AppError::Database(e),
            })
    }

    async fn get_conversation(&self, id: Uuid) -> Result<Option<Conversation>> {
        // ---
        let sql = format!(
            "SELECT {} FROM chat_conversations WHERE id = $1",
            CONVERSATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Conversation>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_conversations(
        &self,
        machine_id: Option<Uuid>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conversation>> {
        // ---
        let sql = format!(
            "SELECT {} FROM chat_conversations \
             WHERE ($1::uuid IS NULL OR machine_id = $1) \
             ORDER BY last_message_at DESC NULLS LAST, created_at DESC \
             LIMIT $2 OFFSET $3",
            CONVERSATION_COLUMNS
        );
        Ok(sqlx::query_as::<_, Conversation>(&sql)
            .bind(machine_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete_conversation(&self, id: Uuid) -> Result<bool> {
        // ---
        // Messages go with it (ON DELETE CASCADE)
        let result = sqlx::query("DELETE FROM chat_conversations WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn append_message(
        &self,
        conversation_id: Uuid,
        role: MessageRole,
        content: &str,
    ) -> Result<ChatMessage> {
        // ---
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "INSERT INTO chat_messages (id, conversation_id, role, content) \
             VALUES ($1, $2, $3, $4) RETURNING {}",
            MESSAGE_COLUMNS
        );
        let message = sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(Uuid::new_v4())
            .bind(conversation_id)
            .bind(role.as_str())
            .bind(content)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) if db.is_foreign_key_violation() => {
                    AppError::conversation_not_found(conversation_id)
                }
                _ => AppError::Database(e),
            })?;

        sqlx::query(
            "UPDATE chat_conversations \
             SET total_messages = total_messages + 1, last_message_at = $2 \
             WHERE id = $1",
        )
        .bind(conversation_id)
        .bind(message.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(message)
    }

    async fn recent_messages(&self, conversation_id: Uuid, limit: i64) -> Result<Vec<ChatMessage>> {
        // ---
        let sql = format!(
            "SELECT {cols} FROM ( \
                 SELECT {cols} FROM chat_messages WHERE conversation_id = $1 \
                 ORDER BY created_at DESC LIMIT $2 \
             ) recent ORDER BY created_at ASC",
            cols = MESSAGE_COLUMNS
        );
        Ok(sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(conversation_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn conversation_messages(&self, conversation_id: Uuid) -> Result<Vec<ChatMessage>> {
        // ---
        let sql = format!(
            "SELECT {} FROM chat_messages WHERE conversation_id = $1 ORDER BY created_at ASC",
            MESSAGE_COLUMNS
        );
        Ok(sqlx::query_as::<_, ChatMessage>(&sql)
            .bind(conversation_id)
            .fetch_all(&self.pool)
            .await?)
    }
}
