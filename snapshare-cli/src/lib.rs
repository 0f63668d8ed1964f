pub mod application;
pub mod infrastructure;

pub use application::{describe, Inbox, InputCommand};
pub use infrastructure::{CliError, LogConfig, Result};
