//! Transport layer for the chat gateway.

pub mod http;

pub use http::{HttpTransport, SESSION_HEADER};
