//! Shared Essence client library so the binary and tests agree on the backend contract.

pub mod capture;
pub mod config;
pub mod connection;
pub mod http_fallback;
mod lock;
mod logging;
pub mod messages;
pub mod playback;
pub mod protocol;
pub mod render;
pub mod report;
pub mod session;
mod telemetry;
pub mod toast;
pub mod turn;

pub use logging::{init_logging, log_debug, log_debug_content, log_file_path};
pub(crate) use lock::lock_or_recover;
pub use telemetry::init_tracing;
