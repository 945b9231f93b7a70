//! Tool registry and dispatch.
//!
//! Tools are registered once at startup and are immutable afterwards. Each
//! tool pairs a unique name and description with an [`InputSchema`] and a
//! [`ToolHandler`].
//!
//! - [`schema`] — declarative input schemas
//! - [`dispatch`] — validates a call, runs the handler, wraps the outcome
//! - [`news`] — the News API tools exposed by this server

pub mod dispatch;
pub mod news;
pub mod schema;

pub use dispatch::dispatch;
pub use schema::{InputSchema, ParamSpec, ParamType};

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HandlerError, RegistryError};

/// Arguments that passed schema validation, with defaults applied.
pub type ValidatedInput = Map<String, Value>;

/// A tool implementation.
///
/// Handlers receive input that already satisfies the tool's schema and
/// return a serialisable result. Closures of the shape
/// `Fn(ValidatedInput) -> impl Future<Output = Result<Value, HandlerError>>`
/// implement this trait.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Runs the tool.
    async fn call(&self, input: ValidatedInput) -> Result<Value, HandlerError>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(ValidatedInput) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, input: ValidatedInput) -> Result<Value, HandlerError> {
        self(input).await
    }
}

/// A registered tool.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    schema: InputSchema,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for Tool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Tool {
    /// Returns the tool name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the tool description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the input schema.
    #[must_use]
    pub const fn schema(&self) -> &InputSchema {
        &self.schema
    }

    /// Returns a shared handle to the handler.
    #[must_use]
    pub fn handler(&self) -> Arc<dyn ToolHandler> {
        Arc::clone(&self.handler)
    }

    /// Returns the wire definition for `tools/list`.
    #[must_use]
    pub fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: Some(self.description.clone()),
            input_schema: self.schema.to_json_schema(),
        }
    }
}

/// Named tools, in registration order.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    tools: IndexMap<String, Tool>,
}

impl ToolRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a tool.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::DuplicateTool`] if `name` is already taken.
    /// Callers treat this as a fatal configuration error.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        description: impl Into<String>,
        schema: InputSchema,
        handler: impl ToolHandler + 'static,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if self.tools.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }

        tracing::debug!(tool = %name, "Registered tool");

        self.tools.insert(
            name.clone(),
            Tool {
                name,
                description: description.into(),
                schema,
                handler: Arc::new(handler),
            },
        );
        Ok(())
    }

    /// Looks up a tool by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.get(name)
    }

    /// Returns the number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Returns `true` if no tools are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Iterates over tools in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.values()
    }

    /// Returns every tool's wire definition.
    #[must_use]
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(Tool::definition).collect()
    }
}

/// A tool definition for tools/list response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON Schema for the tool's input parameters.
    pub input_schema: Value,
}

/// Parameters for tools/call request.
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCallParams {
    /// Name of the tool to call.
    pub name: String,
    /// Arguments for the tool.
    #[serde(default)]
    pub arguments: Value,
    /// Request metadata, e.g. a progress token.
    #[serde(rename = "_meta", default)]
    pub meta: Option<Value>,
}

impl ToolCallParams {
    /// Returns the progress token, if the client asked for progress updates.
    #[must_use]
    pub fn progress_token(&self) -> Option<&Value> {
        self.meta
            .as_ref()
            .and_then(|m| m.get("progressToken"))
            .filter(|t| t.is_string() || t.is_number())
    }
}

/// Content item in a tool call response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ToolContent {
    /// Text content.
    Text {
        /// The text content.
        text: String,
    },
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content returned by the tool.
    pub content: Vec<ToolContent>,
    /// Whether the tool call resulted in an error.
    #[serde(skip_serializing_if = "is_false")]
    pub is_error: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's skip_serializing_if requires a predicate fn(&T) -> bool, so we must take &bool here
const fn is_false(b: &bool) -> bool {
    !*b
}

impl ToolCallResult {
    /// Creates a successful text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// Creates an error text result.
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::Text {
                text: message.into(),
            }],
            is_error: true,
        }
    }

    /// Returns the text of the first content block.
    #[must_use]
    pub fn first_text(&self) -> Option<&str> {
        self.content.first().map(|c| match c {
            ToolContent::Text { text } => text.as_str(),
        })
    }
}
