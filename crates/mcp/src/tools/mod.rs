pub mod args;
pub mod dialogs;
pub mod envelope;
pub mod hashtags;
pub mod messages;
mod registry;

pub use args::{describe, ArgumentSpec, BoxedArgs, ToolArgs};
pub use dialogs::{ListDialogs, ListDialogsTool};
pub use envelope::Dispatcher;
pub use hashtags::{SearchHashtags, SearchHashtagsTool};
pub use messages::{ListMessages, ListMessagesTool};
pub use registry::{ToolHandler, ToolRegistry, ToolRegistryBuilder};

use crate::error::RegistryError;
use chatgate_core::{ExportSink, SessionProvider};
use std::sync::Arc;

/// Registry with every chat tool bound to the given collaborators.
pub fn chat_tools(
    sessions: Arc<dyn SessionProvider>,
    sink: Arc<dyn ExportSink>,
) -> Result<ToolRegistry, RegistryError> {
    Ok(ToolRegistry::builder()
        .register(ListDialogsTool::new(sessions.clone()))?
        .register(ListMessagesTool::new(sessions.clone()))?
        .register(SearchHashtagsTool::new(sessions, sink))?
        .build())
}
