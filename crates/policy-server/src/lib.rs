pub mod config;
pub mod error;
pub mod handlers;
pub mod registry;
pub mod server;
pub mod service;
pub mod session;

pub use config::ServerConfig;
pub use error::ServiceError;
pub use registry::{BroadcastReport, ConnectionRegistry, Subscriber};
pub use server::{build_router, start, AppState, ServerHandle};
pub use service::PolicyService;
pub use session::{CloseReason, SessionConfig};
