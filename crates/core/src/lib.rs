// Chat model and session layer for chatgate

pub mod config;
pub mod error;
pub mod export;
pub mod gateway;
pub mod memory;
pub mod session;
pub mod transport;
pub mod types;

pub use config::{Credentials, GatewayConfig, RetryConfig};
pub use error::{ChatError, ChatResult};
pub use export::{ExportError, ExportFormat, ExportRecord, ExportSink, FileExportSink};
pub use gateway::HttpSessionProvider;
pub use memory::MemoryChatService;
pub use session::{ChatSession, Session, SessionProvider};
pub use types::*;
