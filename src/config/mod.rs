pub mod schema;

pub use schema::{AgentConfig, Config, ObservabilityConfig, SessionsConfig};
