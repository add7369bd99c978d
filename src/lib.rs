//! Predictive-maintenance backend.
//!
//! Machines are registered through the registry, sensor readings are
//! validated and stored by the ingestion service, and every stored reading
//! comes back through the database change feed into the realtime bridge,
//! which runs the anomaly detector and fans events out to WebSocket
//! clients. A chat assistant answers questions grounded in the stored data.
//!
//! Modules follow the Explicit Module Boundary Pattern (EMBP): each one
//! exposes a small surface re-exported here, and `main.rs` only wires them.

pub mod anomaly;
pub mod chat;
pub mod config;
pub mod error;
pub mod models;
pub mod realtime;
pub mod routes;
pub mod schema;
pub mod services;
pub mod simulation;
pub mod stats;
pub mod store;

pub use config::Config;
pub use error::{AppError, FieldError};
pub use routes::{router, AppState};
