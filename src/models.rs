//! Data models for machines, sensor readings, predictions and chat conversations.
//!
//! HTTP payloads use camelCase field names; database rows use snake_case
//! columns. Measurement validation lives here so that every ingress path
//! (HTTP body, change-feed payload) applies the same range policy.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FieldError;

// ---

/// Machine quality class from the predictive-maintenance dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MachineType {
    // ---
    /// Low quality variant.
    L,
    /// Medium quality variant.
    M,
    /// High quality variant.
    H,
}

impl MachineType {
    // ---
    pub fn as_str(&self) -> &'static str {
        match self {
            MachineType::L => "L",
            MachineType::M => "M",
            MachineType::H => "H",
        }
    }
}

impl TryFrom<String> for MachineType {
    // ---
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "L" => Ok(MachineType::L),
            "M" => Ok(MachineType::M),
            "H" => Ok(MachineType::H),
            other => Err(format!("unknown machine type '{}'", other)),
        }
    }
}

impl std::fmt::Display for MachineType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A monitored machine.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Machine {
    // ---
    pub id: Uuid,
    pub product_id: String,
    #[serde(rename = "type")]
    #[sqlx(try_from = "String")]
    pub machine_type: MachineType,
    pub status: String,
    pub location: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Machine listing entry, optionally annotated with its reading count.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineSummary {
    // ---
    #[serde(flatten)]
    pub machine: Machine,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reading_count: Option<i64>,
}

/// Machine with its reading count and most recent readings.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineDetails {
    // ---
    #[serde(flatten)]
    pub machine: Machine,
    pub reading_count: i64,
    pub latest_readings: Vec<SensorReading>,
}

/// Body of `POST /machines`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMachineRequest {
    // ---
    pub product_id: String,
    #[serde(rename = "type")]
    pub machine_type: MachineType,
}

/// Maximum accepted product id length.
pub const PRODUCT_ID_MAX_LEN: usize = 50;

impl CreateMachineRequest {
    // ---
    /// Trim and check the product id; returns the normalized request.
    pub fn validate(self) -> Result<Self, Vec<FieldError>> {
        // ---
        let product_id = self.product_id.trim().to_string();
        if product_id.is_empty() {
            return Err(vec![FieldError::new("productId", "must not be empty")]);
        }
        if product_id.chars().count() > PRODUCT_ID_MAX_LEN {
            return Err(vec![FieldError::new(
                "productId",
                format!("must not exceed {} characters", PRODUCT_ID_MAX_LEN),
            )]);
        }
        Ok(Self {
            product_id,
            machine_type: self.machine_type,
        })
    }
}

/// The five validated measurements of one reading.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Measurements {
    // ---
    /// Air temperature in Kelvin.
    pub air_temp: f64,
    /// Process temperature in Kelvin.
    pub process_temp: f64,
    /// Rotational speed in RPM.
    pub rotational_speed: i32,
    /// Torque in Newton-meters.
    pub torque: f64,
    /// Tool wear in minutes.
    pub tool_wear: i32,
}

/// Declared valid range of one measurement channel (inclusive).
#[derive(Debug, Clone, Copy)]
pub struct ValidRange {
    // ---
    pub field: &'static str,
    pub min: f64,
    pub max: f64,
    pub unit: &'static str,
    pub integer: bool,
}

impl ValidRange {
    // ---
    fn check(&self, value: f64) -> Result<f64, FieldError> {
        // ---
        if !value.is_finite() {
            return Err(FieldError::new(self.field, "must be a finite number"));
        }
        if self.integer && value.fract() != 0.0 {
            return Err(FieldError::new(self.field, "must be an integer"));
        }
        if value < self.min || value > self.max {
            return Err(FieldError::new(
                self.field,
                format!(
                    "must be between {} and {} {}",
                    self.min, self.max, self.unit
                ),
            ));
        }
        Ok(value)
    }
}

pub const AIR_TEMP_RANGE: ValidRange = ValidRange {
    field: "airTemp",
    min: 0.0,
    max: 500.0,
    unit: "Kelvin",
    integer: false,
};
pub const PROCESS_TEMP_RANGE: ValidRange = ValidRange {
    field: "processTemp",
    min: 0.0,
    max: 500.0,
    unit: "Kelvin",
    integer: false,
};
pub const ROTATIONAL_SPEED_RANGE: ValidRange = ValidRange {
    field: "rotationalSpeed",
    min: 0.0,
    max: 10_000.0,
    unit: "RPM",
    integer: true,
};
pub const TORQUE_RANGE: ValidRange = ValidRange {
    field: "torque",
    min: 0.0,
    max: 200.0,
    unit: "Nm",
    integer: false,
};
pub const TOOL_WEAR_RANGE: ValidRange = ValidRange {
    field: "toolWear",
    min: 0.0,
    max: 1000.0,
    unit: "minutes",
    integer: true,
};

/// Unvalidated measurements as they arrive on the wire.
///
/// Integer channels are carried as `f64` so that `1500.5` is reported as a
/// field error rather than a generic body rejection.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMeasurements {
    // ---
    pub air_temp: f64,
    pub process_temp: f64,
    pub rotational_speed: f64,
    pub torque: f64,
    pub tool_wear: f64,
}

impl RawMeasurements {
    // ---
    /// Check every channel against its declared range.
    ///
    /// All failing fields are reported, not just the first.
    pub fn validate(&self) -> Result<Measurements, Vec<FieldError>> {
        // ---
        let mut errors = Vec::new();
        let mut take = |range: &ValidRange, value: f64| match range.check(value) {
            Ok(v) => v,
            Err(e) => {
                errors.push(e);
                0.0
            }
        };

        let air_temp = take(&AIR_TEMP_RANGE, self.air_temp);
        let process_temp = take(&PROCESS_TEMP_RANGE, self.process_temp);
        let rotational_speed = take(&ROTATIONAL_SPEED_RANGE, self.rotational_speed);
        let torque = take(&TORQUE_RANGE, self.torque);
        let tool_wear = take(&TOOL_WEAR_RANGE, self.tool_wear);

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Measurements {
            air_temp,
            process_temp,
            rotational_speed: rotational_speed as i32,
            torque,
            tool_wear: tool_wear as i32,
        })
    }
}

impl From<Measurements> for RawMeasurements {
    fn from(m: Measurements) -> Self {
        RawMeasurements {
            air_temp: m.air_temp,
            process_temp: m.process_temp,
            rotational_speed: f64::from(m.rotational_speed),
            torque: m.torque,
            tool_wear: f64::from(m.tool_wear),
        }
    }
}

/// Body of `POST /sensors/readings`.
///
/// The target machine is given either by internal id or by product id.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateReadingRequest {
    // ---
    pub machine_id: Option<String>,
    pub product_id: Option<String>,
    #[serde(flatten)]
    pub measurements: RawMeasurements,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A validated reading ready to be persisted.
#[derive(Debug, Clone)]
pub struct NewReading {
    // ---
    pub machine_id: Uuid,
    pub timestamp: Option<DateTime<Utc>>,
    pub measurements: Measurements,
}

/// A persisted sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct SensorReading {
    // ---
    pub id: i64,
    pub machine_id: Uuid,
    #[sqlx(rename = "recorded_at")]
    pub timestamp: DateTime<Utc>,
    pub air_temp: f64,
    pub process_temp: f64,
    pub rotational_speed: i32,
    pub torque: f64,
    pub tool_wear: i32,
}

impl SensorReading {
    // ---
    pub fn measurements(&self) -> Measurements {
        Measurements {
            air_temp: self.air_temp,
            process_temp: self.process_temp,
            rotational_speed: self.rotational_speed,
            torque: self.torque,
            tool_wear: self.tool_wear,
        }
    }
}

/// A reading joined with the machine that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingWithMachine {
    // ---
    #[serde(flatten)]
    pub reading: SensorReading,
    pub machine: Machine,
}

/// Failure prediction written by the external model job.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    // ---
    pub id: i64,
    pub machine_id: Uuid,
    pub predicted_at: DateTime<Utc>,
    pub risk_score: f64,
    pub failure_predicted: bool,
    pub failure_type: Option<String>,
    pub confidence: Option<f64>,
    pub predicted_failure_time: Option<DateTime<Utc>>,
}

/// Author of a stored chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

impl MessageRole {
    // ---
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
            MessageRole::System => "system",
        }
    }
}

impl TryFrom<String> for MessageRole {
    // ---
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "user" => Ok(MessageRole::User),
            "assistant" => Ok(MessageRole::Assistant),
            "system" => Ok(MessageRole::System),
            other => Err(format!("unknown message role '{}'", other)),
        }
    }
}

/// A persisted chat conversation.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    // ---
    pub id: Uuid,
    pub title: String,
    /// Machine the conversation is pinned to; cleared if the machine is deleted.
    pub machine_id: Option<Uuid>,
    pub total_messages: i32,
    pub last_message_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields chosen when a conversation is started.
#[derive(Debug, Clone)]
pub struct NewConversation {
    // ---
    pub title: String,
    pub machine_id: Option<Uuid>,
}

/// One message of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    // ---
    pub id: Uuid,
    #[serde(skip)]
    pub conversation_id: Uuid,
    #[sqlx(try_from = "String")]
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Conversation with its messages, oldest first.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationDetails {
    // ---
    #[serde(flatten)]
    pub conversation: Conversation,
    pub messages: Vec<ChatMessage>,
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn raw(air: f64, process: f64, speed: f64, torque: f64, wear: f64) -> RawMeasurements {
        // ---
        RawMeasurements {
            air_temp: air,
            process_temp: process,
            rotational_speed: speed,
            torque,
            tool_wear: wear,
        }
    }

    #[test]
    fn test_valid_measurements_pass() {
        // ---
        let m = raw(300.0, 310.5, 1500.0, 40.2, 120.0).validate().unwrap();
        assert_eq!(m.rotational_speed, 1500);
        assert_eq!(m.tool_wear, 120);
        assert_eq!(m.process_temp, 310.5);
    }

    #[test]
    fn test_range_boundaries_are_inclusive() {
        // ---
        assert!(raw(0.0, 500.0, 0.0, 200.0, 1000.0).validate().is_ok());
        assert!(raw(500.0, 0.0, 10_000.0, 0.0, 0.0).validate().is_ok());
    }

    #[test]
    fn test_air_temp_out_of_range_rejected() {
        // ---
        let errors = raw(600.0, 300.0, 1000.0, 40.0, 50.0)
            .validate()
            .unwrap_err();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].field, "airTemp");
    }

    #[test]
    fn test_all_failing_fields_reported() {
        // ---
        let errors = raw(-1.0, 501.0, 1500.5, 250.0, 1001.0)
            .validate()
            .unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert_eq!(
            fields,
            vec!["airTemp", "processTemp", "rotationalSpeed", "torque", "toolWear"]
        );
        assert!(errors[2].message.contains("integer"));
    }

    #[test]
    fn test_non_finite_rejected() {
        // ---
        let errors = raw(f64::NAN, 300.0, 1000.0, 40.0, 50.0)
            .validate()
            .unwrap_err();
        assert_eq!(errors[0].field, "airTemp");
    }

    #[test]
    fn test_machine_type_parsing() {
        // ---
        assert_eq!(MachineType::try_from("H".to_string()), Ok(MachineType::H));
        assert!(MachineType::try_from("X".to_string()).is_err());
        assert_eq!(MachineType::M.to_string(), "M");
    }

    #[test]
    fn test_create_machine_request_trims_and_checks_length() {
        // ---
        let req = CreateMachineRequest {
            product_id: "  M23839 ".to_string(),
            machine_type: MachineType::M,
        };
        assert_eq!(req.validate().unwrap().product_id, "M23839");

        let empty = CreateMachineRequest {
            product_id: "   ".to_string(),
            machine_type: MachineType::L,
        };
        assert_eq!(empty.validate().unwrap_err()[0].field, "productId");

        let long = CreateMachineRequest {
            product_id: "X".repeat(PRODUCT_ID_MAX_LEN + 1),
            machine_type: MachineType::L,
        };
        assert!(long.validate().is_err());
    }

    #[test]
    fn test_reading_request_deserializes_camel_case() {
        // ---
        let body = r#"{
            "productId": "L56160",
            "airTemp": 298.1,
            "processTemp": 308.6,
            "rotationalSpeed": 1551,
            "torque": 42.8,
            "toolWear": 0
        }"#;
        let req: CreateReadingRequest = serde_json::from_str(body).unwrap();
        assert_eq!(req.product_id.as_deref(), Some("L56160"));
        assert!(req.machine_id.is_none());
        assert!(req.timestamp.is_none());
        assert_eq!(req.measurements.rotational_speed, 1551.0);
    }

    #[test]
    fn test_machine_serializes_type_letter() {
        // ---
        let machine = Machine {
            id: Uuid::nil(),
            product_id: "H38406".to_string(),
            machine_type: MachineType::H,
            status: "active".to_string(),
            location: None,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&machine).unwrap();
        assert_eq!(json["type"], "H");
        assert_eq!(json["productId"], "H38406");
    }

    #[test]
    fn test_chat_message_serializes_role_without_conversation_id() {
        // ---
        let message = ChatMessage {
            id: Uuid::nil(),
            conversation_id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            content: "All good.".to_string(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("conversationId").is_none());
        assert_eq!(
            MessageRole::try_from("system".to_string()),
            Ok(MessageRole::System)
        );
        assert!(MessageRole::try_from("model".to_string()).is_err());
    }
}
