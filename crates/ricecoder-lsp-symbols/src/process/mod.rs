//! LSP server process management

pub mod health;
pub mod launcher;
pub mod manager;

pub use health::HealthChecker;
pub use launcher::{LaunchedServer, ServerLauncher, StdioLauncher};
pub use manager::{calculate_exponential_backoff, ProcessManager};
