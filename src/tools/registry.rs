//! Tool registry.
//!
//! Tools are declared with a [`ToolSpec`] (name, description, typed
//! parameters, handler) and collected by a [`RegistryBuilder`]. Building
//! freezes the set into an immutable [`ToolRegistry`] that is shared behind an
//! `Arc` and read without locks.

use std::collections::{BTreeMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::error::{RegistryError, ToolError};
use crate::model::{ToolArgs, ToolCallRequest, ToolCallResult};

/// JSON type of a declared parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Boolean => value.is_boolean(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamSpec {
    pub name: String,
    pub param_type: ParamType,
    pub required: bool,
    pub description: String,
}

impl ParamSpec {
    pub fn required(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            param_type,
            required: true,
            description: description.into(),
        }
    }

    pub fn optional(name: impl Into<String>, param_type: ParamType, description: impl Into<String>) -> Self {
        Self {
            required: false,
            ..Self::required(name, param_type, description)
        }
    }
}

/// Executes a tool with validated arguments. `Err` carries a message for the model.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs) -> Result<String, String>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(ToolArgs) -> Fut + Send + Sync,
    Fut: Future<Output = Result<String, String>> + Send + 'static,
{
    async fn call(&self, args: ToolArgs) -> Result<String, String> {
        (self)(args).await
    }
}

/// A registered capability.
#[derive(Clone)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub params: Vec<ParamSpec>,
    handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolSpec")
            .field("name", &self.name)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl ToolSpec {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        handler: impl ToolHandler + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            params: Vec::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn param(mut self, param: ParamSpec) -> Self {
        self.params.push(param);
        self
    }

    /// JSON-Schema view of this tool, as sent to the model.
    pub fn schema(&self) -> ToolSchema {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.params {
            properties.insert(
                p.name.clone(),
                json!({ "type": p.param_type.as_str(), "description": p.description }),
            );
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }

        ToolSchema {
            name: self.name.clone(),
            description: self.description.clone(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }),
        }
    }

    /// Check arguments against the declared parameters. Null optionals are dropped.
    fn validate(&self, arguments: Value) -> Result<ToolArgs, ToolError> {
        let invalid = |reason: String| ToolError::InvalidArguments {
            tool: self.name.clone(),
            reason,
        };

        let mut args = match arguments {
            Value::Object(map) => map,
            Value::Null => ToolArgs::new(),
            other => return Err(invalid(format!("arguments must be a JSON object, got {other}"))),
        };

        if let Some(extra) = args
            .keys()
            .find(|k| !self.params.iter().any(|p| &p.name == *k))
        {
            return Err(invalid(format!("unexpected parameter `{extra}`")));
        }

        for p in &self.params {
            let type_ok = match args.get(&p.name) {
                None | Some(Value::Null) => None,
                Some(v) => Some(p.param_type.matches(v)),
            };
            match type_ok {
                None if p.required => {
                    return Err(invalid(format!("missing required parameter `{}`", p.name)));
                }
                None => {
                    args.remove(&p.name);
                }
                Some(false) => {
                    return Err(invalid(format!(
                        "parameter `{}` must be {}",
                        p.name,
                        p.param_type.as_str()
                    )));
                }
                Some(true) => {}
            }
        }

        Ok(args)
    }
}

/// Tool definition in the shape the model expects.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Collects tools at start-up.
#[derive(Default)]
pub struct RegistryBuilder {
    tools: BTreeMap<String, ToolSpec>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: ToolSpec) -> Result<(), RegistryError> {
        if self.tools.contains_key(&spec.name) {
            return Err(RegistryError::DuplicateTool(spec.name));
        }
        let mut seen = HashSet::new();
        for p in &spec.params {
            if !seen.insert(p.name.as_str()) {
                return Err(RegistryError::DuplicateParameter {
                    tool: spec.name.clone(),
                    param: p.name.clone(),
                });
            }
        }
        debug!(tool = %spec.name, params = spec.params.len(), "tool registered");
        self.tools.insert(spec.name.clone(), spec);
        Ok(())
    }

    pub fn build(self) -> ToolRegistry {
        info!(count = self.tools.len(), "tool registry frozen");
        ToolRegistry { tools: self.tools }
    }
}

/// Immutable set of tools.
#[derive(Debug)]
pub struct ToolRegistry {
    tools: BTreeMap<String, ToolSpec>,
}

impl ToolRegistry {
    pub fn get(&self, name: &str) -> Option<&ToolSpec> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Schemas for every tool, sorted by name.
    pub fn list_schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(ToolSpec::schema).collect()
    }

    /// Validate and run one tool under `timeout`.
    ///
    /// The handler runs on its own task, so a panic surfaces as
    /// `ExecutionFailed` and a timed-out handler is aborted.
    pub async fn invoke(&self, name: &str, arguments: Value, timeout: Duration) -> Result<String, ToolError> {
        let spec = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = spec.validate(arguments)?;

        let handler = Arc::clone(&spec.handler);
        let mut task = tokio::spawn(async move { handler.call(args).await });

        match tokio::time::timeout(timeout, &mut task).await {
            Err(_) => {
                task.abort();
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    timeout,
                })
            }
            Ok(Err(join_err)) => Err(ToolError::ExecutionFailed {
                tool: name.to_string(),
                reason: format!("handler panicked: {join_err}"),
            }),
            Ok(Ok(Err(reason))) => Err(ToolError::ExecutionFailed {
                tool: name.to_string(),
                reason,
            }),
            Ok(Ok(Ok(text))) => Ok(text),
        }
    }

    /// Orchestrator-facing form of [`invoke`](Self::invoke): never fails, every
    /// error becomes an `"Error: ..."` result for the model.
    pub async fn execute(&self, request: &ToolCallRequest, timeout: Duration) -> ToolCallResult {
        let started = Instant::now();
        let outcome = self
            .invoke(&request.tool_name, request.arguments.clone(), timeout)
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(text) => {
                info!(tool = %request.tool_name, call_id = %request.call_id, elapsed_ms, "tool call succeeded");
                ToolCallResult {
                    call_id: request.call_id.clone(),
                    result_text: text,
                    is_error: false,
                }
            }
            Err(e) => {
                warn!(tool = %request.tool_name, call_id = %request.call_id, elapsed_ms, error = %e, "tool call failed");
                ToolCallResult {
                    call_id: request.call_id.clone(),
                    result_text: format!("Error: {e}"),
                    is_error: true,
                }
            }
        }
    }
}
