//! Dispatch bridge between `tools/call` and tool handlers.
//!
//! Dispatch happens in two phases so the session transport can stream an
//! intermediate event between them:
//!
//! 1. [`prepare`] looks the tool up and validates the arguments against its
//!    schema. Failures are [`ValidationError`]s and the handler never runs.
//! 2. [`PreparedCall::run`] invokes the handler and wraps the outcome as a
//!    [`ToolCallResult`]: one text block carrying the pretty-printed result,
//!    or an error block carrying the failure message.
//!
//! A failing or panicking handler never propagates past this module.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::Value;

use super::{ToolCallParams, ToolCallResult, ToolHandler, ToolRegistry, ValidatedInput};
use crate::error::{HandlerError, ValidationError};

/// A validated call, ready to run.
pub struct PreparedCall {
    tool: String,
    input: ValidatedInput,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for PreparedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedCall")
            .field("tool", &self.tool)
            .field("input", &self.input)
            .finish_non_exhaustive()
    }
}

impl PreparedCall {
    /// Returns the tool name.
    #[must_use]
    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Returns the normalised input the handler will receive.
    #[must_use]
    pub const fn input(&self) -> &ValidatedInput {
        &self.input
    }

    /// Invokes the handler and wraps its outcome.
    pub async fn run(self) -> ToolCallResult {
        let outcome = AssertUnwindSafe(self.handler.call(self.input))
            .catch_unwind()
            .await
            .unwrap_or(Err(HandlerError::Panicked));

        match outcome {
            Ok(value) => wrap_success(&value),
            Err(e) => {
                tracing::warn!(tool = %self.tool, error = %e, "Tool handler failed");
                ToolCallResult::error(e.to_string())
            }
        }
    }
}

/// Looks up the tool and validates the call's arguments.
///
/// # Errors
///
/// Returns [`ValidationError::UnknownTool`] if no such tool is registered, or
/// [`ValidationError::InvalidArguments`] listing every schema violation.
pub fn prepare(
    registry: &ToolRegistry,
    params: ToolCallParams,
) -> Result<PreparedCall, ValidationError> {
    let tool = registry
        .get(&params.name)
        .ok_or_else(|| ValidationError::UnknownTool(params.name.clone()))?;

    let input = tool
        .schema()
        .validate(&params.arguments)
        .map_err(|issues| ValidationError::InvalidArguments {
            tool: params.name.clone(),
            issues,
        })?;

    Ok(PreparedCall {
        tool: params.name,
        input,
        handler: tool.handler(),
    })
}

/// Validates and runs a call in one step.
///
/// # Errors
///
/// Returns a [`ValidationError`] if the call is rejected before the handler
/// runs. Handler failures are reported inside the returned result.
pub async fn dispatch(
    registry: &ToolRegistry,
    params: ToolCallParams,
) -> Result<ToolCallResult, ValidationError> {
    let call = prepare(registry, params)?;
    Ok(call.run().await)
}

/// Wraps a handler result as a single pretty-printed text block.
fn wrap_success(value: &Value) -> ToolCallResult {
    let text = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
    ToolCallResult::text(text)
}
