//! Resolves `(server, name)` pairs into callable bindings.

use std::sync::Arc;

use serde_json::Value;

use crate::catalog::ToolFn;
use crate::{Arguments, Catalog, Error, Result, ToolDescriptor, ToolRef};

/// Turns catalog references into [`ToolBinding`]s.
#[derive(Debug, Clone)]
pub struct ToolLoader {
    catalog: Arc<Catalog>,
}

impl ToolLoader {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Load a tool. Repeated loads return equivalent bindings and never touch
    /// the catalog.
    pub fn load_tool(&self, server: &str, name: &str) -> Result<ToolBinding> {
        let entry = self
            .catalog
            .entry(server, name)
            .ok_or_else(|| Error::ToolNotFound(ToolRef::new(server, name)))?;

        tracing::debug!(server, name, "loaded tool");
        Ok(ToolBinding {
            descriptor: Arc::clone(&entry.descriptor),
            handler: Arc::clone(&entry.handler),
        })
    }
}

/// A loaded, callable tool.
#[derive(Clone)]
pub struct ToolBinding {
    descriptor: Arc<ToolDescriptor>,
    handler: ToolFn,
}

impl ToolBinding {
    pub fn descriptor(&self) -> &ToolDescriptor {
        &self.descriptor
    }

    pub fn tool_ref(&self) -> ToolRef {
        self.descriptor.tool_ref()
    }

    /// Validate `args` against the descriptor and call the tool.
    ///
    /// Arguments are forwarded unmodified. Tool failures are wrapped with
    /// their original message; nothing is retried.
    pub fn invoke(&self, args: &Arguments) -> Result<Value> {
        self.descriptor
            .validate(args)
            .map_err(|reason| Error::InvalidArguments {
                tool: self.tool_ref(),
                reason,
            })?;

        (self.handler)(args).map_err(|failure| Error::InvocationFailed {
            tool: self.tool_ref(),
            message: failure.0,
        })
    }
}

impl PartialEq for ToolBinding {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && Arc::ptr_eq(&self.handler, &other.handler)
    }
}

impl std::fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolBinding")
            .field("tool", &self.tool_ref().to_string())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ParamKind, ParamSpec, ToolFailure};
    use serde_json::json;

    fn loader() -> ToolLoader {
        let catalog = Catalog::builder()
            .with(
                ToolDescriptor::new("math", "double", "Double a number")
                    .with_param(ParamSpec::required("x", ParamKind::Number)),
                |args| Ok(json!(args.require_f64("x")? * 2.0)),
            )
            .unwrap()
            .with(ToolDescriptor::new("math", "explode", "Always fails"), |_| {
                Err(ToolFailure::new("boom"))
            })
            .unwrap()
            .build();
        ToolLoader::new(Arc::new(catalog))
    }

    #[test]
    fn load_and_invoke() {
        let binding = loader().load_tool("math", "double").unwrap();
        let out = binding.invoke(&Arguments::new().with("x", 21)).unwrap();
        assert_eq!(out, json!(42.0));
    }

    #[test]
    fn loading_is_idempotent() {
        let loader = loader();
        let a = loader.load_tool("math", "double").unwrap();
        let b = loader.load_tool("math", "double").unwrap();
        assert_eq!(a, b);
        assert_eq!(loader.catalog().len(), 2);
    }

    #[test]
    fn unknown_tool_is_not_found() {
        let err = loader().load_tool("math", "triple").unwrap_err();
        assert!(matches!(err, Error::ToolNotFound(_)));
        assert_eq!(err.to_string(), "tool math/triple not found");
    }

    #[test]
    fn failure_keeps_original_message() {
        let binding = loader().load_tool("math", "explode").unwrap();
        let err = binding.invoke(&Arguments::new()).unwrap_err();
        assert_eq!(err.to_string(), "math/explode failed: boom");
    }

    #[test]
    fn arguments_validated_before_call() {
        let binding = loader().load_tool("math", "double").unwrap();
        let err = binding.invoke(&Arguments::new().with("y", 1)).unwrap_err();
        assert!(matches!(err, Error::InvalidArguments { .. }));
    }
}
