//! Gateway server implementation

pub mod auth;
mod mcp;
mod router;
mod server;

pub use auth::{AuthGate, auth_middleware};
pub use mcp::{McpHandler, ParsedRequest, parse_request};
pub use router::{AppState, create_router};
pub use server::{Gateway, build_app};
