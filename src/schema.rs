//! Database schema management for `codemetal-machinewatch`.
//!
//! Ensures required tables, indexes and the change-feed trigger exist before
//! serving requests. Applied once on startup from `main.rs` (EMBP: single
//! gateway call).

use anyhow::{bail, Result};
use sqlx::PgPool;

// ---

/// Create or update the database schema (idempotent).
///
/// Creates `machines`, `sensor_readings`, `predictions` and the chat
/// history tables (`chat_conversations`, `chat_messages`), plus a trigger
/// that publishes every insert or update on `sensor_readings` to the
/// `notify_channel` as `{operation, table, record}` JSON. Safe to call on
/// every startup; no-op if objects already exist.
///
/// Errors are propagated if any SQL execution fails.
pub async fn create_schema(pool: &PgPool, notify_channel: &str) -> Result<()> {
    // ---
    if !is_identifier(notify_channel) {
        bail!("Invalid notify channel name '{}'", notify_channel);
    }

    let mut tx = pool.begin().await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS machines (
            id            UUID        PRIMARY KEY,
            product_id    VARCHAR(50) NOT NULL UNIQUE,
            machine_type  CHAR(1)     NOT NULL CHECK (machine_type IN ('L', 'M', 'H')),
            status        TEXT        NOT NULL DEFAULT 'active',
            location      TEXT,
            created_at    TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Readings keep their machine alive (ON DELETE RESTRICT)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor_readings (
            id                BIGSERIAL PRIMARY KEY,
            machine_id        UUID             NOT NULL
                              REFERENCES machines (id) ON DELETE RESTRICT,
            recorded_at       TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
            air_temp          DOUBLE PRECISION NOT NULL,
            process_temp      DOUBLE PRECISION NOT NULL,
            rotational_speed  INTEGER          NOT NULL,
            torque            DOUBLE PRECISION NOT NULL,
            tool_wear         INTEGER          NOT NULL
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Written by the external prediction job, read by the chat assistant
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS predictions (
            id                      BIGSERIAL PRIMARY KEY,
            machine_id              UUID             NOT NULL
                                    REFERENCES machines (id) ON DELETE CASCADE,
            predicted_at            TIMESTAMPTZ      NOT NULL DEFAULT NOW(),
            risk_score              DOUBLE PRECISION NOT NULL,
            failure_predicted       BOOLEAN          NOT NULL DEFAULT FALSE,
            failure_type            TEXT,
            confidence              DOUBLE PRECISION,
            predicted_failure_time  TIMESTAMPTZ
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    // Conversations survive their machine; messages do not survive their conversation
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_conversations (
            id               UUID        PRIMARY KEY,
            title            TEXT        NOT NULL,
            machine_id       UUID        REFERENCES machines (id) ON DELETE SET NULL,
            total_messages   INTEGER     NOT NULL DEFAULT 0,
            last_message_at  TIMESTAMPTZ,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT NOW()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chat_messages (
            id               UUID        PRIMARY KEY,
            conversation_id  UUID        NOT NULL
                             REFERENCES chat_conversations (id) ON DELETE CASCADE,
            role             TEXT        NOT NULL CHECK (role IN ('user', 'assistant', 'system')),
            content          TEXT        NOT NULL,
            created_at       TIMESTAMPTZ NOT NULL DEFAULT clock_timestamp()
        );
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_chat_messages_conversation_time
            ON chat_messages (conversation_id, created_at);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_sensor_readings_machine_time
            ON sensor_readings (machine_id, recorded_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_predictions_machine_time
            ON predictions (machine_id, predicted_at DESC);
        "#,
    )
    .execute(&mut *tx)
    .await?;

    let notify_fn = format!(
        r#"
        CREATE OR REPLACE FUNCTION notify_sensor_reading_change() RETURNS trigger AS $$
        BEGIN
            PERFORM pg_notify(
                '{channel}',
                json_build_object(
                    'operation', TG_OP,
                    'table', TG_TABLE_NAME,
                    'record', row_to_json(NEW)
                )::text
            );
            RETURN NEW;
        END;
        $$ LANGUAGE plpgsql;
        "#,
        channel = notify_channel
    );
    sqlx::query(&notify_fn).execute(&mut *tx).await?;

    sqlx::query("DROP TRIGGER IF EXISTS sensor_readings_notify ON sensor_readings;")
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        CREATE TRIGGER sensor_readings_notify
            AFTER INSERT OR UPDATE ON sensor_readings
            FOR EACH ROW EXECUTE FUNCTION notify_sensor_reading_change();
        "#,
    )
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Plain lowercase SQL identifier: `[a-z_][a-z0-9_]*`, at most 63 bytes.
pub fn is_identifier(name: &str) -> bool {
    // ---
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    name.len() <= 63 && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_')
}
