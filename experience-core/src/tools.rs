//! Tool-call dispatch for inference jobs.
//!
//! When a job reports `requires_action`, each requested tool call is
//! resolved here into a textual "action" directive plus a success flag.
//! The directives are instructions to the platform; the engine submits
//! them back to the job verbatim. Unknown tool names are never fatal.

use assistants::{ToolCall, ToolOutput};
use serde_json::Value;

/// Result of resolving one tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReply {
    /// Directive describing the action the platform should take.
    pub action: String,
    pub success: bool,
}

impl ToolReply {
    fn ok(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            success: true,
        }
    }
}

/// Name-keyed dispatch table for the tool calls the backend may request.
#[derive(Debug, Clone, Default)]
pub struct ToolDispatcher;

impl ToolDispatcher {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a tool call into the output submitted back to its job.
    pub fn dispatch(&self, call: &ToolCall) -> ToolOutput {
        let reply = self.resolve(call);
        let output = serde_json::json!({
            "action": reply.action,
            "success": reply.success,
        });
        ToolOutput {
            tool_call_id: call.id.clone(),
            output: output.to_string(),
        }
    }

    fn resolve(&self, call: &ToolCall) -> ToolReply {
        let args = &call.arguments;
        match call.name.as_str() {
            "rename_item" => {
                let name = arg_str(args, "name").unwrap_or("Untitled");
                ToolReply::ok(format!("rename the current item to '{name}'"))
            }
            "summarize_item" => {
                let summary = arg_str(args, "summary").unwrap_or_default();
                ToolReply::ok(format!("record item summary: {summary}"))
            }
            "confirm_registration" => {
                ToolReply::ok("confirm the member's registration")
            }
            "create_account" => ToolReply::ok("create an account for the member"),
            "obscure_content" => {
                let reason = arg_str(args, "reason").unwrap_or("content policy");
                ToolReply::ok(format!("obscure the flagged content ({reason})"))
            }
            "end_session" => ToolReply::ok("end the current session"),
            other => {
                tracing::warn!(tool = other, "unrecognized tool call");
                ToolReply {
                    action: "apologize to the member and continue gracefully".to_string(),
                    success: false,
                }
            }
        }
    }
}

fn arg_str<'a>(args: &'a Value, key: &str) -> Option<&'a str> {
    args.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    #[test]
    fn test_rename_item() {
        let dispatcher = ToolDispatcher::new();
        let output = dispatcher.dispatch(&call("rename_item", json!({"name": "Journal"})));
        assert_eq!(output.tool_call_id, "call_1");
        let parsed: Value = serde_json::from_str(&output.output).unwrap();
        assert_eq!(parsed["success"], true);
        assert!(parsed["action"].as_str().unwrap().contains("Journal"));
    }

    #[test]
    fn test_end_session() {
        let dispatcher = ToolDispatcher::new();
        let reply = dispatcher.resolve(&call("end_session", json!({})));
        assert!(reply.success);
        assert_eq!(reply.action, "end the current session");
    }

    #[test]
    fn test_obscure_content_default_reason() {
        let dispatcher = ToolDispatcher::new();
        let reply = dispatcher.resolve(&call("obscure_content", json!({})));
        assert!(reply.success);
        assert!(reply.action.contains("content policy"));
    }

    #[test]
    fn test_unknown_tool_is_nonfatal_apology() {
        let dispatcher = ToolDispatcher::new();
        let reply = dispatcher.resolve(&call("launch_fireworks", json!({})));
        assert!(!reply.success);
        assert!(reply.action.contains("apologize"));
    }
}
