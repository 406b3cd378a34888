// src/lib.rs
// Connection-handling and session-key-issuance core for a local IoT Auth
// service. A host binary (out of scope here) owns the TCP acceptor, the
// persistent repository, config/CLI loading, and logging sink; it wires
// those around `handle_connection`.

pub mod config;
pub mod crypto;
pub mod error;
pub mod federation;
pub mod handler;
pub mod policy;
pub mod registry;
pub mod session_key;
pub mod wire;

pub use config::HandlerConfig;
pub use error::{AuthError, CryptoError, WireError};
pub use handler::{handle_connection, HandlerContext};
