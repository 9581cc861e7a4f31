use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// The fixed set of tool identities a step can be dispatched to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    CodeSearch,
    LogSearch,
    DatabaseQuery,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [
        ToolKind::CodeSearch,
        ToolKind::LogSearch,
        ToolKind::DatabaseQuery,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::CodeSearch => "code_search",
            ToolKind::LogSearch => "log_search",
            ToolKind::DatabaseQuery => "database_query",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }
}

impl fmt::Display for ToolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Log query used when a step names no usable pattern.
pub const DEFAULT_LOG_QUERY: &str = "error OR exception";

/// Structured tool input, snapshotted into the step result.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolInput {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_start: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_end: Option<usize>,
    pub max_results: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<String>,
}

impl ToolInput {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            line_start: None,
            line_end: None,
            max_results: 100,
            time_range: None,
        }
    }

    pub fn with_lines(mut self, start: Option<usize>, end: Option<usize>) -> Self {
        self.line_start = start;
        self.line_end = end;
        self
    }

    pub fn with_max_results(mut self, max_results: usize) -> Self {
        self.max_results = max_results;
        self
    }

    pub fn with_time_range(mut self, time_range: impl Into<String>) -> Self {
        self.time_range = Some(time_range.into());
        self
    }

    pub fn snapshot(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("Tool not registered: {0}")]
    NotRegistered(ToolKind),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Cancelled")]
    Cancelled,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn kind(&self) -> ToolKind;

    fn description(&self) -> &str;

    /// Run once. Long loops inside must poll `cancel` and bail out with
    /// `ToolError::Cancelled`.
    async fn invoke(&self, input: &ToolInput, cancel: &CancellationToken)
        -> Result<String, ToolError>;
}

pub type SharedTool = Arc<dyn Tool>;

/// Explicit `ToolKind -> Tool` map. Registering a kind twice replaces the
/// earlier tool.
pub struct ToolRegistry {
    tools: DashMap<ToolKind, SharedTool>,
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: DashMap::new(),
        }
    }

    pub fn register<T>(&self, tool: T) -> Option<SharedTool>
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool))
    }

    pub fn register_shared(&self, tool: SharedTool) -> Option<SharedTool> {
        self.tools.insert(tool.kind(), tool)
    }

    pub fn get(&self, kind: ToolKind) -> Option<SharedTool> {
        self.tools.get(&kind).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, kind: ToolKind) -> bool {
        self.tools.contains_key(&kind)
    }

    /// Registered tools as `(kind, description)`, in `ToolKind::ALL` order.
    pub fn describe(&self) -> Vec<(ToolKind, String)> {
        ToolKind::ALL
            .into_iter()
            .filter_map(|kind| {
                self.get(kind)
                    .map(|tool| (kind, tool.description().to_string()))
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn invoke(
        &self,
        kind: ToolKind,
        input: &ToolInput,
        cancel: &CancellationToken,
    ) -> Result<String, ToolError> {
        if cancel.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        // Clone the Arc out so no map guard is held across the await.
        let tool = self.get(kind).ok_or(ToolError::NotRegistered(kind))?;
        tool.invoke(input, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn kind(&self) -> ToolKind {
            ToolKind::LogSearch
        }

        fn description(&self) -> &str {
            "echoes the query"
        }

        async fn invoke(
            &self,
            input: &ToolInput,
            _cancel: &CancellationToken,
        ) -> Result<String, ToolError> {
            Ok(format!("echo: {}", input.query))
        }
    }

    #[test]
    fn kind_names_round_trip() {
        for kind in ToolKind::ALL {
            assert_eq!(ToolKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(ToolKind::from_name("shell"), None);
        assert_eq!(
            serde_json::to_value(ToolKind::DatabaseQuery).unwrap(),
            "database_query"
        );
    }

    #[tokio::test]
    async fn invokes_registered_tool() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool);

        let out = registry
            .invoke(
                ToolKind::LogSearch,
                &ToolInput::new("timeout"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(out, "echo: timeout");
        assert_eq!(registry.describe().len(), 1);
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke(
                ToolKind::DatabaseQuery,
                &ToolInput::new("select 1"),
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::NotRegistered(ToolKind::DatabaseQuery));
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let registry = ToolRegistry::new();
        registry.register(EchoTool);
        let token = CancellationToken::new();
        token.cancel();

        let err = registry
            .invoke(ToolKind::LogSearch, &ToolInput::new("x"), &token)
            .await
            .unwrap_err();
        assert_eq!(err, ToolError::Cancelled);
    }

    #[test]
    fn snapshot_skips_empty_bounds() {
        let snapshot = ToolInput::new("config.json").snapshot();
        assert_eq!(snapshot["query"], "config.json");
        assert_eq!(snapshot["max_results"], 100);
        assert!(snapshot.get("line_start").is_none());
    }
}
