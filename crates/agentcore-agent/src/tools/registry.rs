//! Tool Registry — thread-safe store of available tools.
//!
//! The agent loop registers tools here, validates arguments against each
//! tool's JSON-schema-like parameter definition, and dispatches LLM
//! tool-call requests by name.

use std::collections::HashMap;
use std::sync::Arc;

use agentcore_core::types::ToolDefinition;
use tracing::{info, warn};

use super::base::Tool;

/// Appended to every error string the LLM sees from a failed tool call, so
/// it knows to reconsider rather than retry the identical call.
const RETRY_HINT: &str = "\n\n[Analyze the error above and try a different approach.]";

// ─────────────────────────────────────────────
// Registry
// ─────────────────────────────────────────────

/// Stores tools keyed by name and dispatches calls.
///
/// Owns `Arc<dyn Tool>` so tools can be shared across threads.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool. Overwrites any previous tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        info!(tool = tool.name(), "registered tool");
        self.tools.insert(tool.name().to_string(), tool);
    }

    /// Unregister a tool by name. Returns the removed tool, if any.
    pub fn unregister(&mut self, name: &str) -> Option<Arc<dyn Tool>> {
        let removed = self.tools.remove(name);
        if removed.is_some() {
            info!(tool = name, "unregistered tool");
        }
        removed
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    /// Check if a tool is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Names of all registered tools, sorted for determinism.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the LLM-facing definitions for all registered tools.
    pub fn get_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.function.name.cmp(&b.function.name));
        defs
    }

    /// Execute a tool by name with the given parameters.
    ///
    /// The LLM always gets a `String` back, even on failure: unknown tool,
    /// schema-invalid arguments, and raised errors are all reified into an
    /// error string fed back into the conversation rather than propagated.
    pub async fn execute(&self, name: &str, params: HashMap<String, serde_json::Value>) -> String {
        let tool = match self.tools.get(name) {
            Some(t) => t,
            None => {
                warn!(tool = name, "tool not found");
                return format!(
                    "Error: Tool '{name}' not found. Available: {}",
                    self.tool_names().join(", ")
                );
            }
        };

        if let Err(errors) = validate_params(&tool.parameters(), &params) {
            warn!(tool = name, errors = %errors.join("; "), "invalid tool parameters");
            return format!(
                "Error: Invalid parameters for tool '{name}': {}{RETRY_HINT}",
                errors.join("; ")
            );
        }

        match tool.execute(params).await {
            Ok(result) => {
                if result.starts_with("Error") {
                    format!("{result}{RETRY_HINT}")
                } else {
                    result
                }
            }
            Err(e) => {
                warn!(tool = name, error = %e, "tool execution failed");
                format!("Error executing {name}: {e}{RETRY_HINT}")
            }
        }
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────
// Parameter validation
// ─────────────────────────────────────────────

/// Recursively validate `params` against a JSON-schema-like `schema`.
/// Returns all violations found (not just the first), or `Ok(())`.
///
/// Supported schema vocabulary: `type` (string, integer, number, boolean,
/// array, object), `required`, `properties`, `items`, `enum`, `minimum`/
/// `maximum` (numeric range), `minLength`/`maxLength` (string length),
/// `minItems`/`maxItems` (array length). Extra properties not listed in
/// `properties` are tolerated.
fn validate_params(
    schema: &serde_json::Value,
    params: &HashMap<String, serde_json::Value>,
) -> Result<(), Vec<String>> {
    let value = serde_json::to_value(params).unwrap_or(serde_json::Value::Null);
    let mut errors = Vec::new();
    validate_value("", schema, &value, &mut errors);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_value(path: &str, schema: &serde_json::Value, value: &serde_json::Value, errors: &mut Vec<String>) {
    let label = if path.is_empty() { "value".to_string() } else { path.to_string() };

    let Some(ty) = schema.get("type").and_then(|t| t.as_str()) else {
        return;
    };

    let type_ok = match ty {
        "string" => value.is_string(),
        "integer" => value.is_i64() || value.is_u64(),
        "number" => value.is_number(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        _ => true,
    };

    if !type_ok {
        errors.push(format!("{label} must be of type {ty}"));
        return;
    }

    if let Some(allowed) = schema.get("enum").and_then(|e| e.as_array()) {
        if !allowed.iter().any(|v| v == value) {
            let choices = allowed.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", ");
            errors.push(format!("{label} must be one of [{choices}]"));
        }
    }

    match ty {
        "integer" | "number" => {
            if let Some(n) = value.as_f64() {
                if let Some(min) = schema.get("minimum").and_then(|m| m.as_f64()) {
                    if n < min {
                        errors.push(format!("{label} must be >= {min}"));
                    }
                }
                if let Some(max) = schema.get("maximum").and_then(|m| m.as_f64()) {
                    if n > max {
                        errors.push(format!("{label} must be <= {max}"));
                    }
                }
            }
        }
        "string" => {
            if let Some(s) = value.as_str() {
                let len = s.chars().count();
                if let Some(min) = schema.get("minLength").and_then(|m| m.as_u64()) {
                    if (len as u64) < min {
                        errors.push(format!("{label} must have length >= {min}"));
                    }
                }
                if let Some(max) = schema.get("maxLength").and_then(|m| m.as_u64()) {
                    if (len as u64) > max {
                        errors.push(format!("{label} must have length <= {max}"));
                    }
                }
            }
        }
        "array" => {
            if let Some(items) = value.as_array() {
                let len = items.len() as u64;
                if let Some(min) = schema.get("minItems").and_then(|m| m.as_u64()) {
                    if len < min {
                        errors.push(format!("{label} must have at least {min} items"));
                    }
                }
                if let Some(max) = schema.get("maxItems").and_then(|m| m.as_u64()) {
                    if len > max {
                        errors.push(format!("{label} must have at most {max} items"));
                    }
                }
            }
        }
        _ => {}
    }

    match ty {
        "object" => {
            let required = schema
                .get("required")
                .and_then(|r| r.as_array())
                .map(|a| a.iter().filter_map(|v| v.as_str()).collect::<Vec<_>>())
                .unwrap_or_default();

            let obj = value.as_object().cloned().unwrap_or_default();
            for key in &required {
                if !obj.contains_key(*key) {
                    let field = if path.is_empty() {
                        key.to_string()
                    } else {
                        format!("{path}.{key}")
                    };
                    errors.push(format!("missing required parameter: {field}"));
                }
            }

            if let Some(properties) = schema.get("properties").and_then(|p| p.as_object()) {
                for (key, sub_schema) in properties {
                    if let Some(sub_value) = obj.get(key) {
                        let sub_path = if path.is_empty() {
                            key.clone()
                        } else {
                            format!("{path}.{key}")
                        };
                        validate_value(&sub_path, sub_schema, sub_value, errors);
                    }
                }
            }
        }
        "array" => {
            if let Some(item_schema) = schema.get("items") {
                if let Some(items) = value.as_array() {
                    for (i, item) in items.iter().enumerate() {
                        validate_value(&format!("{label}[{i}]"), item_schema, item, errors);
                    }
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    /// Minimal test tool.
    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes back the input"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({
                "type": "object",
                "properties": {
                    "text": { "type": "string", "description": "Text to echo" }
                },
                "required": ["text"]
            })
        }
        async fn execute(&self, params: HashMap<String, serde_json::Value>) -> anyhow::Result<String> {
            let text = params
                .get("text")
                .and_then(|v| v.as_str())
                .unwrap_or("(empty)");
            Ok(format!("Echo: {text}"))
        }
    }

    /// Tool that always fails.
    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "Always fails"
        }
        fn parameters(&self) -> serde_json::Value {
            json!({"type": "object", "properties": {}, "required": []})
        }
        async fn execute(&self, _params: HashMap<String, serde_json::Value>) -> anyhow::Result<String> {
            anyhow::bail!("intentional failure")
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.has("echo"));
        assert!(!reg.has("nope"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_unregister() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        assert!(reg.unregister("echo").is_some());
        assert!(!reg.has("echo"));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_tool_names_sorted() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));
        reg.register(Arc::new(EchoTool));
        assert_eq!(reg.tool_names(), vec!["echo", "fail"]);
    }

    #[test]
    fn test_get_definitions() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let defs = reg.get_definitions();
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "echo");
        assert_eq!(defs[0].tool_type, "function");
    }

    #[tokio::test]
    async fn test_execute_success() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let mut params = HashMap::new();
        params.insert("text".into(), json!("hello"));
        let result = reg.execute("echo", params).await;
        assert_eq!(result, "Echo: hello");
    }

    #[tokio::test]
    async fn test_execute_not_found_lists_available() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let result = reg.execute("missing", HashMap::new()).await;
        assert!(result.starts_with("Error: Tool 'missing' not found"));
        assert!(result.contains("Available: echo"));
    }

    #[tokio::test]
    async fn test_execute_error_caught_with_hint() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(FailTool));
        let result = reg.execute("fail", HashMap::new()).await;
        assert!(result.starts_with("Error executing fail:"));
        assert!(result.contains("intentional failure"));
        assert!(result.contains("[Analyze the error above"));
    }

    #[tokio::test]
    async fn test_execute_missing_required_param_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let result = reg.execute("echo", HashMap::new()).await;
        assert!(result.starts_with("Error: Invalid parameters for tool 'echo'"));
        assert!(result.contains("missing required parameter: text"));
        assert!(result.contains("[Analyze the error above"));
    }

    #[tokio::test]
    async fn test_execute_wrong_type_rejected() {
        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(EchoTool));
        let mut params = HashMap::new();
        params.insert("text".into(), json!(42));
        let result = reg.execute("echo", params).await;
        assert!(result.contains("must be of type string"));
    }

    #[tokio::test]
    async fn test_execute_result_with_error_prefix_gets_hint() {
        struct ErrStringTool;
        #[async_trait]
        impl Tool for ErrStringTool {
            fn name(&self) -> &str {
                "err_string"
            }
            fn description(&self) -> &str {
                "returns an error-shaped string without raising"
            }
            fn parameters(&self) -> serde_json::Value {
                json!({"type": "object", "properties": {}, "required": []})
            }
            async fn execute(&self, _params: HashMap<String, serde_json::Value>) -> anyhow::Result<String> {
                Ok("Error: something went wrong".to_string())
            }
        }

        let mut reg = ToolRegistry::new();
        reg.register(Arc::new(ErrStringTool));
        let result = reg.execute("err_string", HashMap::new()).await;
        assert!(result.contains("[Analyze the error above"));
    }

    #[test]
    fn test_validate_nested_object_and_array() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}}
            },
            "required": ["name"]
        });
        let mut params = HashMap::new();
        params.insert("name".into(), json!("x"));
        params.insert("tags".into(), json!(["a", 1]));
        let result = validate_params(&schema, &params);
        assert!(result.is_err());
        let errors = result.unwrap_err();
        assert!(errors.iter().any(|e| e.contains("tags[1]")));
    }

    #[test]
    fn test_validate_extra_properties_tolerated() {
        let schema = json!({
            "type": "object",
            "properties": {"name": {"type": "string"}},
            "required": ["name"]
        });
        let mut params = HashMap::new();
        params.insert("name".into(), json!("x"));
        params.insert("extra".into(), json!("ignored"));
        assert!(validate_params(&schema, &params).is_ok());
    }

    #[test]
    fn test_validate_enum_rejects_unlisted_value() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "enum": ["fast", "accurate"]}
            },
            "required": ["mode"]
        });
        let mut params = HashMap::new();
        params.insert("mode".into(), json!("slow"));
        let errors = validate_params(&schema, &params).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("mode must be one of")));
    }

    #[test]
    fn test_validate_enum_accepts_listed_value() {
        let schema = json!({
            "type": "object",
            "properties": {
                "mode": {"type": "string", "enum": ["fast", "accurate"]}
            },
            "required": ["mode"]
        });
        let mut params = HashMap::new();
        params.insert("mode".into(), json!("fast"));
        assert!(validate_params(&schema, &params).is_ok());
    }

    #[test]
    fn test_validate_numeric_range() {
        let schema = json!({
            "type": "object",
            "properties": {
                "count": {"type": "integer", "minimum": 1, "maximum": 10}
            },
            "required": ["count"]
        });

        let mut too_low = HashMap::new();
        too_low.insert("count".into(), json!(0));
        let errors = validate_params(&schema, &too_low).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("count must be >= 1")));

        let mut too_high = HashMap::new();
        too_high.insert("count".into(), json!(11));
        let errors = validate_params(&schema, &too_high).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("count must be <= 10")));

        let mut ok = HashMap::new();
        ok.insert("count".into(), json!(5));
        assert!(validate_params(&schema, &ok).is_ok());
    }

    #[test]
    fn test_validate_string_length() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string", "minLength": 2, "maxLength": 4}
            },
            "required": ["name"]
        });

        let mut too_short = HashMap::new();
        too_short.insert("name".into(), json!("a"));
        let errors = validate_params(&schema, &too_short).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("name must have length >= 2")));

        let mut too_long = HashMap::new();
        too_long.insert("name".into(), json!("abcdef"));
        let errors = validate_params(&schema, &too_long).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("name must have length <= 4")));
    }

    #[test]
    fn test_validate_array_length() {
        let schema = json!({
            "type": "object",
            "properties": {
                "tags": {"type": "array", "items": {"type": "string"}, "minItems": 1, "maxItems": 2}
            },
            "required": ["tags"]
        });

        let mut empty = HashMap::new();
        empty.insert("tags".into(), json!([]));
        let errors = validate_params(&schema, &empty).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("tags must have at least 1 items")));

        let mut too_many = HashMap::new();
        too_many.insert("tags".into(), json!(["a", "b", "c"]));
        let errors = validate_params(&schema, &too_many).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("tags must have at most 2 items")));
    }

    #[test]
    fn test_default() {
        let reg = ToolRegistry::default();
        assert!(reg.is_empty());
    }
}
