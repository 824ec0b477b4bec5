//! Pharos Node Agent Library
//!
//! The node agent runs on each edge device and manages compose applications.
//! It deploys, starts, stops, updates and deletes apps through the container
//! engine, persists their state locally, registers with the anchor and keeps
//! pinging it, and forwards container events to subscribed listeners.
//!
//! ## Architecture
//!
//! ```text
//! Agent
//! ├── DeploymentController   (app lifecycle, the only writer of app state)
//! ├── AppEventMonitor        (per-app engine event streams, per-app locks)
//! ├── NotificationDispatcher (events -> anchor notifications)
//! └── HealthChecker          (registration and ping ticker)
//! ```
//!
//! ## Modules
//!
//! - `api`: REST surface under `/api/v1`
//! - `engine`: compose driver over the container engine
//! - `store`, `repository`: local KV persistence of apps, subscriptions, properties
//! - `anchor`: outbound client to the anchor

pub mod agent;
pub mod anchor;
pub mod api;
pub mod config;
pub mod controller;
pub mod descriptor;
pub mod device;
pub mod engine;
pub mod error;
pub mod health;
pub mod model;
pub mod monitor;
pub mod notification;
pub mod repository;
pub mod resources;
pub mod store;

// Re-export commonly used types
pub use agent::{Agent, AgentParts};
pub use error::AgentError;
pub use engine::{ComposeDriver, MockComposeDriver};
