mod event;
mod service;

pub use event::SessionEvent;
pub use service::{HostCandidate, ServiceType, ServiceTypeError, DEFAULT_SERVICE_TYPE};
