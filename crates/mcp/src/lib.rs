// MCP (Model Context Protocol) server exposing chat operations as tools

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tools;

pub use error::{FieldError, RegistryError, ToolError};
pub use server::McpServer;
pub use tools::Dispatcher;
