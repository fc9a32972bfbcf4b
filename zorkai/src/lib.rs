pub mod client;
pub mod config;
pub mod providers;
pub mod types;

// Re-exports for convenience
pub use client::{Chat, Completions, Gateway, GatewayBuilder};
pub use config::{ConfigError, GatewayConfig, RetryPolicy};
pub use providers::breaker::CircuitBreaker;
pub use providers::compatible::{HttpTransport, RequestBuilder};
pub use providers::{AttemptFailure, ErrorKind, GatewayError, HttpReply, Transport, TransportFailure};
pub use types::*;
