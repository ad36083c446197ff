use uuid::Uuid;

/// Deterministic node id builder for one session.
///
/// Ids are UUID v5 over the session namespace and a structural name,
/// so replaying the same event stream regenerates the same ids and
/// duplicate observations collapse instead of forking the graph.
#[derive(Debug, Clone)]
pub struct NodeIds {
    namespace: Uuid,
}

impl NodeIds {
    pub fn new(session_id: &str) -> Self {
        Self {
            namespace: Uuid::new_v5(&Uuid::NAMESPACE_OID, session_id.as_bytes()),
        }
    }

    fn derive(&self, name: &str) -> String {
        Uuid::new_v5(&self.namespace, name.as_bytes()).to_string()
    }

    pub fn session(&self) -> String {
        self.derive("session")
    }

    pub fn turn(&self, turn_index: u64) -> String {
        self.derive(&format!("turn:{}", turn_index))
    }

    pub fn reasoning(&self, turn_index: u64, block_seq: u64) -> String {
        self.derive(&format!("turn:{}:reasoning:{}", turn_index, block_seq))
    }

    pub fn tool_call(&self, call_id: &str) -> String {
        self.derive(&format!("call:{}", call_id))
    }

    pub fn observation(&self, call_id: &str) -> String {
        self.derive(&format!("call:{}:observation", call_id))
    }
}
