//! JSON-RPC message serde types for the server wire protocol.

use std::path::Path;

use serde::Serialize;
use serde_json::Value;

use traverse_types::CommandRequest;

pub(crate) const EXECUTE_COMMAND: &str = "workspace/executeCommand";

#[derive(Debug, Serialize)]
pub(crate) struct Request {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: u64, method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// `initialize` params announcing the workspace to the server.
pub(crate) fn initialize_params(workspace_root: &Path) -> Value {
    serde_json::json!({
        "processId": std::process::id(),
        "rootPath": workspace_root.to_string_lossy(),
        "capabilities": {}
    })
}

/// `workspace/executeCommand` params for one analysis invocation.
pub(crate) fn execute_command_params(request: &CommandRequest) -> Value {
    serde_json::json!({
        "command": request.kind().wire_command(),
        "arguments": [{
            "workspace_folder": request.workspace_root().to_string_lossy(),
            "chunking": request.chunking(),
        }]
    })
}
