//! Host tool table and dispatch.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::{Value, json};

use crate::config::ToolDefinition;
use crate::error::{DuplexError, Result};
use crate::protocol::{FunctionResponse, ToolInvocation};

/// Handler for tool calls from the remote peer.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute a tool call and return the result.
    async fn execute(&self, call: &ToolInvocation) -> Result<Value>;
}

/// A simple function-based tool handler.
pub struct FnToolHandler<F>
where
    F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync,
{
    handler: F,
}

impl<F> FnToolHandler<F>
where
    F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync,
{
    /// Create a new function-based tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, call: &ToolInvocation) -> Result<Value> {
        (self.handler)(call)
    }
}

/// Async function-based tool handler.
pub struct AsyncToolHandler<F, Fut>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    handler: F,
}

impl<F, Fut> AsyncToolHandler<F, Fut>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    /// Create a new async tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F, Fut> ToolHandler for AsyncToolHandler<F, Fut>
where
    F: Fn(ToolInvocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send,
{
    async fn execute(&self, call: &ToolInvocation) -> Result<Value> {
        (self.handler)(call.clone()).await
    }
}

/// The fixed table of tools a session exposes.
///
/// Lookup is by exact name. Every dispatch yields exactly one
/// [`FunctionResponse`] carrying the invocation id, whatever the handler does.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, Arc<dyn ToolHandler>)>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with its handler. A later registration replaces an earlier one.
    pub fn register(&mut self, definition: ToolDefinition, handler: impl ToolHandler + 'static) {
        let name = definition.name.clone();
        self.tools.insert(name, (definition, Arc::new(handler)));
    }

    /// Register a tool with a sync function handler.
    pub fn register_fn<F>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(&ToolInvocation) -> Result<Value> + Send + Sync + 'static,
    {
        self.register(definition, FnToolHandler::new(handler));
    }

    /// Register a tool with an async function handler.
    pub fn register_async<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(ToolInvocation) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.register(definition, AsyncToolHandler::new(handler));
    }

    /// Declarations for the session setup, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|(def, _)| def.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether a tool with this name is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one invocation to completion.
    ///
    /// Unknown tools answer `{"result": "Unrecognized tool: <name>"}`. Handler
    /// errors, panics and timeouts answer `{"error": ...}`.
    pub fn dispatch(
        &self,
        call: ToolInvocation,
        timeout: Option<Duration>,
    ) -> BoxFuture<'static, FunctionResponse> {
        let Some(handler) = self.tools.get(&call.name).map(|(_, h)| h.clone()) else {
            tracing::warn!(tool = %call.name, id = %call.id, "unrecognized tool");
            let text = format!("Unrecognized tool: {}", call.name);
            return futures::future::ready(FunctionResponse::result(call.id, call.name, json!(text)))
                .boxed();
        };

        async move {
            tracing::debug!(tool = %call.name, id = %call.id, "executing tool");
            let guarded = AssertUnwindSafe(handler.execute(&call)).catch_unwind();
            let outcome = match timeout {
                Some(limit) => match tokio::time::timeout(limit, guarded).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        tracing::warn!(tool = %call.name, id = %call.id, "tool timed out");
                        return FunctionResponse::error(call.id, call.name, "tool timed out");
                    }
                },
                None => guarded.await,
            };

            match outcome {
                Ok(Ok(value)) => FunctionResponse::result(call.id, call.name, value),
                Ok(Err(err)) => {
                    tracing::warn!(tool = %call.name, id = %call.id, error = %err, "tool failed");
                    let message = match err {
                        DuplexError::ToolError(msg) => msg,
                        other => other.to_string(),
                    };
                    FunctionResponse::error(call.id, call.name, message)
                }
                Err(panic) => {
                    let message = panic_message(panic.as_ref());
                    tracing::warn!(tool = %call.name, id = %call.id, panic = %message, "tool panicked");
                    FunctionResponse::error(call.id, call.name, format!("tool panicked: {}", message))
                }
            }
        }
        .boxed()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
