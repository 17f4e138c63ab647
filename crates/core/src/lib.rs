pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::{Config, ConfigLoader, ConfigValidator, GatewayConfig, PresenceConfig};
pub use error::{ChatroomError, DomainError, InfraError};
