mod config;
mod discovery;
mod dispatcher;
mod session_manager;

pub use config::SessionConfig;
pub use discovery::{Browser, DiscoveryFacade};
pub use dispatcher::{EventDispatcher, EventHandler, EventSubscription};
pub use session_manager::SessionManager;
