use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Tool classification by semantic purpose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolType {
    FileRead,
    FileWrite,
    FileEdit,
    BashExec,
    WebFetch,
    AgentSpawn,
    Mcp,
    Unknown,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::FileRead => "file_read",
            ToolType::FileWrite => "file_write",
            ToolType::FileEdit => "file_edit",
            ToolType::BashExec => "bash_exec",
            ToolType::WebFetch => "web_fetch",
            ToolType::AgentSpawn => "agent_spawn",
            ToolType::Mcp => "mcp",
            ToolType::Unknown => "unknown",
        }
    }

    pub fn is_file_op(&self) -> bool {
        matches!(
            self,
            ToolType::FileRead | ToolType::FileWrite | ToolType::FileEdit
        )
    }
}

/// File operation performed by a file-op tool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Read,
    Write,
    Edit,
}

/// Classify a provider tool name.
///
/// Matching is on the lower-cased name; `mcp__server__tool` handles are
/// recognized by prefix before the name table is consulted.
pub fn classify_tool(tool_name: &str) -> ToolType {
    let lower = tool_name.to_lowercase();

    if lower.starts_with("mcp__") {
        return ToolType::Mcp;
    }

    match lower.as_str() {
        "read" | "glob" | "ls" | "notebookread" => ToolType::FileRead,
        "write" | "notebookedit" => ToolType::FileWrite,
        "edit" | "multiedit" | "str_replace_editor" => ToolType::FileEdit,
        "bash" | "shell" | "run_shell_command" => ToolType::BashExec,
        "webfetch" | "websearch" | "web_fetch" | "google_web_search" => ToolType::WebFetch,
        "task" | "agent" | "dispatch_agent" => ToolType::AgentSpawn,
        _ => ToolType::Unknown,
    }
}

/// File action implied by a tool type
pub fn file_action_for(tool_type: ToolType) -> Option<FileAction> {
    match tool_type {
        ToolType::FileRead => Some(FileAction::Read),
        ToolType::FileWrite => Some(FileAction::Write),
        ToolType::FileEdit => Some(FileAction::Edit),
        _ => None,
    }
}

/// Extract the file path from file-op tool arguments.
///
/// Providers disagree on the key; check the common spellings in order.
pub fn extract_file_path(args: &Value) -> Option<String> {
    for key in ["file_path", "path", "filePath", "notebook_path"] {
        if let Some(path) = args.get(key).and_then(|v| v.as_str()) {
            return Some(path.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_standard_tools() {
        assert_eq!(classify_tool("Read"), ToolType::FileRead);
        assert_eq!(classify_tool("Write"), ToolType::FileWrite);
        assert_eq!(classify_tool("Edit"), ToolType::FileEdit);
        assert_eq!(classify_tool("Bash"), ToolType::BashExec);
        assert_eq!(classify_tool("WebFetch"), ToolType::WebFetch);
        assert_eq!(classify_tool("Task"), ToolType::AgentSpawn);
    }

    #[test]
    fn test_classify_is_case_insensitive() {
        assert_eq!(classify_tool("BASH"), ToolType::BashExec);
        assert_eq!(classify_tool("read"), ToolType::FileRead);
    }

    #[test]
    fn test_classify_mcp_prefix() {
        assert_eq!(classify_tool("mcp__sqlite__query"), ToolType::Mcp);
        assert_eq!(classify_tool("MCP__server__tool"), ToolType::Mcp);
    }

    #[test]
    fn test_classify_unknown() {
        assert_eq!(classify_tool("SomeCustomTool"), ToolType::Unknown);
    }

    #[test]
    fn test_extract_file_path_variants() {
        assert_eq!(
            extract_file_path(&serde_json::json!({"file_path": "/a.rs"})).as_deref(),
            Some("/a.rs")
        );
        assert_eq!(
            extract_file_path(&serde_json::json!({"path": "/b.rs"})).as_deref(),
            Some("/b.rs")
        );
        assert_eq!(extract_file_path(&serde_json::json!({"command": "ls"})), None);
    }
}
