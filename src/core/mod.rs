// src/core/mod.rs

//! The central module containing the core logic and data structures of the
//! orchestration daemon: the data model, the event bus, the three monitor
//! actors (imon, nmon, hbctrl), and the orchestration API.

pub mod errors;
pub mod events;
pub mod hbctrl;
pub mod imon;
pub mod metrics;
pub mod model;
pub mod nmon;
pub mod path;

pub use errors::OrchestratorError;
pub use events::{BusMessage, EventBus};
pub use path::Path;
