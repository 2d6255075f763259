//! Sarathi ground station: operator-side half of a walking-robot
//! teleoperation link.
//!
//! Discovers the robot through UDP announce broadcasts, optionally deploys
//! and starts the onboard server, then drives it over a stateless-refresh
//! control channel while journaling every state change for offline replay.

pub mod app;
pub mod config;
pub mod deploy;
pub mod discovery;
pub mod error;
pub mod events;
pub mod input;
pub mod journal;
pub mod message_log;
pub mod overlay;
pub mod protocol;
pub mod session;
pub mod station;

// Re-export commonly used types
pub use app::StationApp;
pub use config::{Options, StationConfig};
pub use error::{Error, Result};
