// Re-export needed modules for testing
pub mod batcher;
pub mod config;
pub mod directory;
pub mod error;
pub mod irc; // IRC line codec, classifier and transport
pub mod models;
pub mod provider;
mod session;
pub mod view;

// Re-export main types for convenience
pub use config::{AdapterConfig, Credentials, LoginOptions, DEFAULT_PORT};
pub use error::{ErrorCode, SocialError, SocialResult};
pub use models::*;
pub use provider::IrcSocialProvider;
