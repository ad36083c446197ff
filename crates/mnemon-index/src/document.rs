use mnemon_types::NodeCreated;
use serde_json::{json, Value};

/// Node labels the indexer accepts
const ACCEPTED_LABELS: &[&str] = &["Thought", "CodeArtifact", "Turn", "Memory", "Reasoning"];

/// One unit of indexable text
#[derive(Debug, Clone)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub metadata: Value,
}

/// Build the indexable document for a node-created event, or None when
/// the label set or content is not indexable.
pub fn document_for(event: &NodeCreated) -> Option<Document> {
    if !event
        .labels
        .iter()
        .any(|label| ACCEPTED_LABELS.contains(&label.as_str()))
    {
        return None;
    }

    let content = extract_content(event)?;
    if content.trim().is_empty() {
        return None;
    }

    Some(Document {
        id: event.id.clone(),
        content,
        metadata: json!({
            "labels": event.labels,
            "session_id": event.session_id,
            "created_at": event.created_at,
        }),
    })
}

/// The text lives under a label-dependent property.
fn extract_content(event: &NodeCreated) -> Option<String> {
    let props = &event.properties;
    let get = |key: &str| props.get(key).and_then(|v| v.as_str());

    if event.labels.iter().any(|l| l == "Turn") {
        let user = get("user_content").unwrap_or_default();
        let assistant = get("assistant_preview").unwrap_or_default();
        let joined = [user, assistant]
            .iter()
            .filter(|s| !s.is_empty())
            .copied()
            .collect::<Vec<_>>()
            .join("\n");
        return Some(joined);
    }

    get("content")
        .or_else(|| get("preview"))
        .or_else(|| get("content_preview"))
        .or_else(|| get("text"))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(labels: &[&str], properties: Value) -> NodeCreated {
        NodeCreated {
            id: "n-1".to_string(),
            labels: labels.iter().map(|l| l.to_string()).collect(),
            properties,
            session_id: Some("s-1".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_accepts_memory_and_reasoning() {
        let memory = event(&["Memory"], json!({"content": "use sqlite"}));
        assert_eq!(document_for(&memory).unwrap().content, "use sqlite");

        let reasoning = event(&["Reasoning"], json!({"preview": "plan A"}));
        assert_eq!(document_for(&reasoning).unwrap().content, "plan A");
    }

    #[test]
    fn test_turn_joins_user_and_assistant() {
        let turn = event(
            &["Turn"],
            json!({"user_content": "question", "assistant_preview": "answer"}),
        );
        assert_eq!(document_for(&turn).unwrap().content, "question\nanswer");
    }

    #[test]
    fn test_rejects_other_labels() {
        let session = event(&["Session"], json!({"session_id": "s-1"}));
        assert!(document_for(&session).is_none());

        let tool_call = event(&["ToolCall"], json!({"tool_name": "Bash"}));
        assert!(document_for(&tool_call).is_none());
    }

    #[test]
    fn test_rejects_empty_content() {
        let memory = event(&["Memory"], json!({"content": "   "}));
        assert!(document_for(&memory).is_none());
        let turn = event(&["Turn"], json!({}));
        assert!(document_for(&turn).is_none());
    }

    #[test]
    fn test_metadata_carries_session() {
        let memory = event(&["Memory"], json!({"content": "x"}));
        let doc = document_for(&memory).unwrap();
        assert_eq!(doc.metadata["session_id"], "s-1");
        assert_eq!(doc.metadata["labels"][0], "Memory");
    }
}
