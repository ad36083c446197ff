use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use mnemon_dedup::content_hash;
use mnemon_store::{GraphStore, MessageBus};
use mnemon_types::{
    classify_tool, extract_file_path, file_action_for, topics, BlockKind, Delta, DeltaKind,
    EdgeKind, EdgeRecord, Envelope, NodeCreated, NodeLabel, NodeRecord, ObservationProps,
    ReasoningProps, Role, SessionProps, ToolCallProps, ToolStatus, TurnProps,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::state::{SessionState, TurnState};
use crate::{Error, Result};

/// Aggregator configuration
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Preview fields are truncated to this many chars
    pub preview_len: usize,
    /// An open turn with no events for this long is finalized
    pub turn_idle_timeout: Duration,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            preview_len: 200,
            turn_idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Why a turn is being finalized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinalizeCause {
    /// Terminating result envelope
    Result,
    /// Session went idle past the threshold
    Idle,
    /// A new user-query cycle started
    UserBoundary,
}

/// The turn aggregator: consumes ordered `(session, envelope, deltas)`
/// tuples and materializes the lineage graph.
///
/// Per-session state sits behind a per-session async lock; the runtime
/// partitions envelopes by session id, so processing within a session
/// is single-writer and in arrival order, and sessions never contend.
pub struct TurnAggregator {
    graph: Arc<dyn GraphStore>,
    bus: Arc<dyn MessageBus>,
    config: AggregatorConfig,
    sessions: parking_lot::Mutex<HashMap<String, Arc<tokio::sync::Mutex<SessionState>>>>,
}

impl TurnAggregator {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        bus: Arc<dyn MessageBus>,
        config: AggregatorConfig,
    ) -> Self {
        Self {
            graph,
            bus,
            config,
            sessions: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    /// Process one envelope's deltas. Returns the `memory.nodes.created`
    /// events that were committed (and best-effort published).
    pub async fn process(
        &self,
        session_id: &str,
        envelope: &Envelope,
        deltas: &[Delta],
    ) -> Result<Vec<NodeCreated>> {
        if session_id.is_empty() {
            return Err(Error::Validation("missing session id".to_string()));
        }

        let entry = {
            let mut sessions = self.sessions.lock();
            sessions
                .entry(session_id.to_string())
                .or_insert_with(|| {
                    Arc::new(tokio::sync::Mutex::new(SessionState::new(
                        session_id,
                        envelope.ingest_timestamp,
                    )))
                })
                .clone()
        };
        let mut state = entry.lock().await;

        let now = envelope.ingest_timestamp;
        let mut out = Vec::new();

        if !state.session_created {
            self.create_session(session_id, &mut state, now, &mut out)
                .await?;
        }
        state.last_event_at = now;

        for delta in deltas {
            self.apply_delta(session_id, &mut state, delta, now, &mut out)
                .await?;
        }

        Ok(out)
    }

    /// Finalize turns that went idle past the configured threshold.
    /// Pending tool calls of an idle turn are cancelled.
    pub async fn sweep_idle(&self, now: DateTime<Utc>) -> Result<usize> {
        let entries: Vec<(String, Arc<tokio::sync::Mutex<SessionState>>)> = {
            let sessions = self.sessions.lock();
            sessions
                .iter()
                .map(|(id, entry)| (id.clone(), entry.clone()))
                .collect()
        };

        let idle_after = chrono::Duration::from_std(self.config.turn_idle_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(120));
        let mut finalized = 0;

        for (session_id, entry) in entries {
            let mut state = entry.lock().await;
            if state.open_turn.is_some() && state.last_event_at + idle_after <= now {
                let mut out = Vec::new();
                self.finalize_turn(
                    &session_id,
                    &mut state,
                    FinalizeCause::Idle,
                    None,
                    now,
                    &mut out,
                )
                .await?;
                finalized += 1;
            }
        }
        Ok(finalized)
    }

    // --- delta handling ---

    async fn apply_delta(
        &self,
        session_id: &str,
        state: &mut SessionState,
        delta: &Delta,
        now: DateTime<Utc>,
        out: &mut Vec<NodeCreated>,
    ) -> Result<()> {
        match delta.kind {
            DeltaKind::Content => match (delta.role, delta.block) {
                (Some(Role::User), _) => {
                    let text = delta.content.clone().unwrap_or_default();
                    // A user message starts a new cycle; close any turn
                    // still open from the previous one
                    if state.open_turn.is_some() {
                        self.finalize_turn(
                            session_id,
                            state,
                            FinalizeCause::UserBoundary,
                            None,
                            now,
                            out,
                        )
                        .await?;
                    }
                    match &mut state.pending_user {
                        Some(pending) => {
                            pending.push('\n');
                            pending.push_str(&text);
                        }
                        None => state.pending_user = Some(text),
                    }
                }
                (_, Some(BlockKind::Thinking)) => {
                    let text = delta.content.as_deref().unwrap_or_default();
                    self.handle_thinking(session_id, state, text, now, out).await?;
                }
                (_, Some(BlockKind::Text)) => {
                    let text = delta.content.as_deref().unwrap_or_default();
                    self.ensure_turn(session_id, state, now, out).await?;
                    let preview_len = self.config.preview_len;
                    let turn = state.open_turn.as_mut().expect("turn ensured");
                    turn.next_block();
                    // Text does not drain pending reasonings: reasoning
                    // may precede a mixture of text and tool_use
                    if !turn.assistant_preview.is_empty() {
                        turn.assistant_preview.push('\n');
                    }
                    turn.assistant_preview.push_str(text);
                    turn.assistant_preview = preview(&turn.assistant_preview, preview_len);
                }
                _ => {}
            },

            DeltaKind::ToolCall => {
                if let Some(call) = &delta.tool_call {
                    self.handle_tool_call(session_id, state, call, now, out)
                        .await?;
                }
            }

            DeltaKind::ToolResult => {
                if let Some(result) = &delta.tool_result {
                    self.handle_tool_result(session_id, state, result, now, out)
                        .await?;
                }
            }

            DeltaKind::Usage => {
                if let (Some(usage), Some(turn)) = (delta.usage, state.open_turn.as_mut()) {
                    turn.usage.merge_max(&usage);
                }
            }

            DeltaKind::Stop => {
                self.finalize_turn(
                    session_id,
                    state,
                    FinalizeCause::Result,
                    Some(delta),
                    now,
                    out,
                )
                .await?;
            }
        }
        Ok(())
    }

    async fn handle_thinking(
        &self,
        session_id: &str,
        state: &mut SessionState,
        text: &str,
        now: DateTime<Utc>,
        out: &mut Vec<NodeCreated>,
    ) -> Result<()> {
        let hash = content_hash("reasoning", text, None, session_id);
        if !self.graph.record_content_hash(session_id, hash).await? {
            debug!(session_id, "duplicate reasoning dropped");
            return Ok(());
        }

        self.ensure_turn(session_id, state, now, out).await?;
        let preview_len = self.config.preview_len;
        let turn = state.open_turn.as_mut().expect("turn ensured");
        let seq = turn.next_block();
        let node_id = state.ids.reasoning(turn.sequence_index, seq);

        let node = NodeRecord::new(
            node_id.clone(),
            NodeLabel::Reasoning,
            serde_json::to_value(ReasoningProps {
                sequence_index: seq,
                preview: preview(text, preview_len),
                content_hash: hash,
            })
            .map_err(mnemon_store::Error::from)?,
            Some(session_id.to_string()),
            now,
        );
        self.graph.insert_node(&node).await?;
        self.graph
            .insert_edge(&EdgeRecord::new(
                EdgeKind::Contains,
                turn.node_id.clone(),
                node_id.clone(),
            ))
            .await?;

        turn.pending_reasonings.push(node_id);
        turn.last_reasoning_sequence = Some(seq);
        self.publish(out, &node).await;
        Ok(())
    }

    async fn handle_tool_call(
        &self,
        session_id: &str,
        state: &mut SessionState,
        call: &mnemon_types::ToolCallDelta,
        now: DateTime<Utc>,
        out: &mut Vec<NodeCreated>,
    ) -> Result<()> {
        let arguments_json = call.args.to_string();
        let hash = content_hash("tool_call", &arguments_json, Some(&call.name), session_id);
        if !self.graph.record_content_hash(session_id, hash).await? {
            debug!(session_id, call_id = %call.id, "duplicate tool call dropped");
            return Ok(());
        }

        self.ensure_turn(session_id, state, now, out).await?;
        let turn = state.open_turn.as_mut().expect("turn ensured");
        let seq = turn.next_block();
        let node_id = state.ids.tool_call(&call.id);

        let tool_type = classify_tool(&call.name);
        let file_path = tool_type
            .is_file_op()
            .then(|| extract_file_path(&call.args))
            .flatten();

        let node = NodeRecord::new(
            node_id.clone(),
            NodeLabel::ToolCall,
            serde_json::to_value(ToolCallProps {
                call_id: call.id.clone(),
                tool_name: call.name.clone(),
                tool_type,
                arguments_json,
                sequence_index: seq,
                reasoning_sequence: turn.last_reasoning_sequence,
                status: ToolStatus::Pending,
                file_path,
                file_action: file_action_for(tool_type),
            })
            .map_err(mnemon_store::Error::from)?,
            Some(session_id.to_string()),
            now,
        );
        self.graph.insert_node(&node).await?;
        self.graph
            .insert_edge(&EdgeRecord::new(
                EdgeKind::Invokes,
                turn.node_id.clone(),
                node_id.clone(),
            ))
            .await?;

        // Every reasoning since the last tool_use triggered this call
        for reasoning_id in turn.pending_reasonings.drain(..) {
            self.graph
                .insert_edge(&EdgeRecord::new(
                    EdgeKind::Triggers,
                    reasoning_id,
                    node_id.clone(),
                ))
                .await?;
        }

        turn.tool_call_count += 1;
        turn.pending_calls.push(node_id.clone());
        state.call_ids.insert(call.id.clone(), node_id);
        self.publish(out, &node).await;
        Ok(())
    }

    async fn handle_tool_result(
        &self,
        session_id: &str,
        state: &mut SessionState,
        result: &mnemon_types::ToolResultDelta,
        now: DateTime<Utc>,
        out: &mut Vec<NodeCreated>,
    ) -> Result<()> {
        let Some(call_node_id) = state.call_ids.get(&result.call_id).cloned() else {
            // Upstream contract breach: log and discard
            warn!(
                session_id,
                call_id = %result.call_id,
                "tool_result for unknown call_id, dropping"
            );
            return Ok(());
        };

        let hash = content_hash("tool_result", &result.content, None, session_id);
        if !self.graph.record_content_hash(session_id, hash).await? {
            debug!(session_id, call_id = %result.call_id, "duplicate tool result dropped");
            return Ok(());
        }

        let node_id = state.ids.observation(&result.call_id);
        let node = NodeRecord::new(
            node_id.clone(),
            NodeLabel::Observation,
            serde_json::to_value(ObservationProps {
                tool_call_id: call_node_id.clone(),
                content_preview: preview(&result.content, self.config.preview_len),
                is_error: result.is_error,
            })
            .map_err(mnemon_store::Error::from)?,
            Some(session_id.to_string()),
            now,
        );
        self.graph.insert_node(&node).await?;
        self.graph
            .insert_edge(&EdgeRecord::new(
                EdgeKind::Yields,
                call_node_id.clone(),
                node_id.clone(),
            ))
            .await?;

        // pending -> success | error, atomically with the observation
        let status = if result.is_error {
            ToolStatus::Error
        } else {
            ToolStatus::Success
        };
        let amended = self
            .graph
            .amend_node(&call_node_id, json!({"status": status}), now)
            .await?;

        if let Some(turn) = state.open_turn.as_mut() {
            turn.pending_calls.retain(|id| id != &call_node_id);
        }

        self.publish(out, &node).await;
        self.publish(out, &amended).await;
        Ok(())
    }

    // --- session / turn materialization ---

    async fn create_session(
        &self,
        session_id: &str,
        state: &mut SessionState,
        now: DateTime<Utc>,
        out: &mut Vec<NodeCreated>,
    ) -> Result<()> {
        let node = NodeRecord::new(
            state.session_node_id.clone(),
            NodeLabel::Session,
            serde_json::to_value(SessionProps {
                session_id: session_id.to_string(),
                user_id: None,
                started_at: now,
                last_event_at: now,
                title: None,
            })
            .map_err(mnemon_store::Error::from)?,
            Some(session_id.to_string()),
            now,
        );
        self.graph.insert_node(&node).await?;
        state.session_created = true;
        self.publish(out, &node).await;
        Ok(())
    }

    /// Create a turn on the first assistant content of a cycle.
    async fn ensure_turn(
        &self,
        session_id: &str,
        state: &mut SessionState,
        now: DateTime<Utc>,
        out: &mut Vec<NodeCreated>,
    ) -> Result<()> {
        if state.open_turn.is_some() {
            return Ok(());
        }

        let sequence_index = state.next_turn_index;
        state.next_turn_index += 1;
        let node_id = state.ids.turn(sequence_index);
        let user_content = state.pending_user.take().unwrap_or_default();

        let node = NodeRecord::new(
            node_id.clone(),
            NodeLabel::Turn,
            serde_json::to_value(TurnProps {
                sequence_index,
                user_content,
                assistant_preview: String::new(),
                input_tokens: 0,
                output_tokens: 0,
                stop_reason: None,
                complete: false,
            })
            .map_err(mnemon_store::Error::from)?,
            Some(session_id.to_string()),
            now,
        );
        self.graph.insert_node(&node).await?;
        self.graph
            .insert_edge(&EdgeRecord::new(
                EdgeKind::HasTurn,
                state.session_node_id.clone(),
                node_id.clone(),
            ))
            .await?;
        if let Some(previous) = &state.last_turn_node {
            self.graph
                .insert_edge(&EdgeRecord::new(
                    EdgeKind::Next,
                    previous.clone(),
                    node_id.clone(),
                ))
                .await?;
        }

        state.open_turn = Some(TurnState::new(node_id, sequence_index, now));
        self.publish(out, &node).await;
        Ok(())
    }

    async fn finalize_turn(
        &self,
        session_id: &str,
        state: &mut SessionState,
        cause: FinalizeCause,
        stop: Option<&Delta>,
        now: DateTime<Utc>,
        out: &mut Vec<NodeCreated>,
    ) -> Result<()> {
        let Some(mut turn) = state.open_turn.take() else {
            return Ok(());
        };

        if let Some(delta) = stop {
            if let Some(usage) = delta.usage {
                turn.usage.merge_max(&usage);
            }
            turn.stop_reason = delta.stop_reason.clone();
        }
        if cause == FinalizeCause::Idle {
            turn.stop_reason.get_or_insert_with(|| "idle".to_string());
            // Calls that never resolved are cancelled
            for call_node_id in &turn.pending_calls {
                let amended = self
                    .graph
                    .amend_node(call_node_id, json!({"status": ToolStatus::Cancelled}), now)
                    .await?;
                self.publish(out, &amended).await;
            }
        }

        let amended = self
            .graph
            .amend_node(
                &turn.node_id,
                json!({
                    "assistant_preview": turn.assistant_preview,
                    "input_tokens": turn.usage.input + turn.usage.cache_read,
                    "output_tokens": turn.usage.output,
                    "stop_reason": turn.stop_reason,
                    "tool_call_count": turn.tool_call_count,
                    "duration_ms": (now - turn.started_at).num_milliseconds().max(0),
                    "complete": true,
                }),
                now,
            )
            .await?;

        // Sequential chain edge, idempotent if already present
        if let Some(previous) = &state.last_turn_node {
            self.graph
                .insert_edge(&EdgeRecord::new(
                    EdgeKind::Next,
                    previous.clone(),
                    turn.node_id.clone(),
                ))
                .await?;
        }
        state.last_turn_node = Some(turn.node_id.clone());

        self.graph
            .amend_node(
                &state.session_node_id,
                json!({"last_event_at": now}),
                now,
            )
            .await?;

        self.publish(out, &amended).await;
        Ok(())
    }

    /// Best-effort emission: failures are logged and never roll back
    /// the graph write.
    async fn publish(&self, out: &mut Vec<NodeCreated>, node: &NodeRecord) {
        let event = NodeCreated::from_node(node);
        match serde_json::to_value(&event) {
            Ok(payload) => {
                if let Err(err) = self.bus.publish(topics::NODES_CREATED, payload).await {
                    warn!(node_id = %event.id, error = %err, "node-created publish failed");
                }
            }
            Err(err) => warn!(node_id = %event.id, error = %err, "node-created encode failed"),
        }
        out.push(event);
    }
}

fn preview(text: &str, len: usize) -> String {
    text.chars().take(len).collect()
}
