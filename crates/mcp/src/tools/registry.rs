// Tool registry: argument type → handler
//
// Built once at startup through `ToolRegistryBuilder`; duplicate names or
// argument types are rejected there. The finished registry is immutable and
// shared behind an `Arc` by every in-flight call.

use crate::error::{RegistryError, ToolError};
use crate::protocol::{ContentItem, ToolSchema};
use crate::tools::args::{ArgumentSpec, BoxedArgs, ToolArgs};
use std::any::{type_name, TypeId};
use std::collections::HashMap;
use tracing::info;

/// Async handler for one tool.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    type Args: ToolArgs;

    async fn call(&self, args: Self::Args) -> Result<Vec<ContentItem>, ToolError>;
}

#[async_trait::async_trait]
trait ErasedHandler: Send + Sync {
    async fn call_boxed(&self, args: BoxedArgs) -> Result<Vec<ContentItem>, ToolError>;
}

struct Bound<H> {
    name: String,
    handler: H,
}

#[async_trait::async_trait]
impl<H: ToolHandler> ErasedHandler for Bound<H> {
    async fn call_boxed(&self, args: BoxedArgs) -> Result<Vec<ContentItem>, ToolError> {
        let args = args
            .downcast::<H::Args>()
            .map_err(|_| ToolError::UnsupportedTool(type_name::<H::Args>().to_string()))?;
        info!("method[{}] args[{:?}]", self.name, args);
        self.handler.call(*args).await
    }
}

/// Immutable after [`ToolRegistryBuilder::build`].
pub struct ToolRegistry {
    specs: HashMap<String, ArgumentSpec>,
    /// Names in registration order, for a stable `tools/list`
    order: Vec<String>,
    handlers: HashMap<TypeId, Box<dyn ErasedHandler>>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder {
            registry: Self {
                specs: HashMap::new(),
                order: Vec::new(),
                handlers: HashMap::new(),
            },
        }
    }

    /// Get the argument spec of a tool by name
    pub fn spec(&self, name: &str) -> Option<&ArgumentSpec> {
        self.specs.get(name)
    }

    /// List all tool schemas, in registration order
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.order
            .iter()
            .filter_map(|name| self.specs.get(name))
            .map(|spec| spec.schema().clone())
            .collect()
    }

    /// Check if a tool exists
    pub fn contains(&self, name: &str) -> bool {
        self.specs.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Invoke the handler bound to the runtime type of `args`.
    pub async fn dispatch(&self, args: BoxedArgs) -> Result<Vec<ContentItem>, ToolError> {
        let type_id = (*args).type_id();
        match self.handlers.get(&type_id) {
            Some(handler) => handler.call_boxed(args).await,
            None => Err(ToolError::UnsupportedTool(format!("{:?}", type_id))),
        }
    }
}

pub struct ToolRegistryBuilder {
    registry: ToolRegistry,
}

impl ToolRegistryBuilder {
    /// Bind `handler` to its argument type. Fails on a duplicate type or tool name.
    pub fn register<H: ToolHandler>(mut self, handler: H) -> Result<Self, RegistryError> {
        let type_id = TypeId::of::<H::Args>();
        if self.registry.handlers.contains_key(&type_id) {
            return Err(RegistryError::DuplicateArgumentType(type_name::<H::Args>()));
        }

        let spec = ArgumentSpec::of::<H::Args>()?;
        let name = spec.name().to_string();
        if self.registry.specs.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }

        self.registry.handlers.insert(
            type_id,
            Box::new(Bound {
                name: name.clone(),
                handler,
            }),
        );
        self.registry.specs.insert(name.clone(), spec);
        self.registry.order.push(name);
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Echo a message back.
    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Echo {
        message: String,
    }

    impl ToolArgs for Echo {}

    /// Count calls.
    #[derive(Debug, Serialize, Deserialize, JsonSchema)]
    struct Count {}

    impl ToolArgs for Count {}

    mod shadow {
        use super::*;

        /// Another echo with the same name.
        #[derive(Debug, Serialize, Deserialize, JsonSchema)]
        pub struct Echo {
            pub text: String,
        }

        impl ToolArgs for Echo {}
    }

    struct EchoHandler;

    #[async_trait::async_trait]
    impl ToolHandler for EchoHandler {
        type Args = Echo;

        async fn call(&self, args: Echo) -> Result<Vec<ContentItem>, ToolError> {
            Ok(vec![ContentItem::text(args.message)])
        }
    }

    struct ShadowHandler;

    #[async_trait::async_trait]
    impl ToolHandler for ShadowHandler {
        type Args = shadow::Echo;

        async fn call(&self, args: shadow::Echo) -> Result<Vec<ContentItem>, ToolError> {
            Ok(vec![ContentItem::text(args.text)])
        }
    }

    struct CountHandler(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ToolHandler for CountHandler {
        type Args = Count;

        async fn call(&self, _args: Count) -> Result<Vec<ContentItem>, ToolError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_dispatch_by_argument_type() {
        let calls = Arc::new(AtomicUsize::new(0));
        let registry = ToolRegistry::builder()
            .register(EchoHandler)
            .unwrap()
            .register(CountHandler(calls.clone()))
            .unwrap()
            .build();

        let content = registry
            .dispatch(Box::new(Echo {
                message: "hi".to_string(),
            }))
            .await
            .unwrap();
        assert_eq!(content, vec![ContentItem::text("hi")]);

        registry.dispatch(Box::new(Count {})).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unbound_type_is_unsupported() {
        let registry = ToolRegistry::builder().register(EchoHandler).unwrap().build();

        let result = registry.dispatch(Box::new(Count {})).await;
        assert!(matches!(result, Err(ToolError::UnsupportedTool(_))));
    }

    #[test]
    fn test_duplicate_argument_type_rejected() {
        let result = ToolRegistry::builder()
            .register(EchoHandler)
            .unwrap()
            .register(EchoHandler);
        assert!(matches!(result, Err(RegistryError::DuplicateArgumentType(_))));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let result = ToolRegistry::builder()
            .register(EchoHandler)
            .unwrap()
            .register(ShadowHandler);
        assert!(matches!(result, Err(RegistryError::DuplicateTool(name)) if name == "Echo"));
    }

    #[test]
    fn test_list_schemas_in_registration_order() {
        let registry = ToolRegistry::builder()
            .register(CountHandler(Arc::new(AtomicUsize::new(0))))
            .unwrap()
            .register(EchoHandler)
            .unwrap()
            .build();

        let names: Vec<String> = registry.list_schemas().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Count", "Echo"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("Echo"));
        assert!(!registry.contains("Missing"));
    }
}
