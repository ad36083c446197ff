//! Graph-shape assertions shared by the pipeline test suites.

use anyhow::{bail, Context, Result};
use mnemon_types::EdgeKind;

use crate::MockGraphStore;

/// Turn sequence indices of a session form {0, 1, ..., N-1}.
pub fn assert_turn_contiguity(store: &MockGraphStore, session_id: &str) -> Result<()> {
    let mut indices: Vec<u64> = store
        .current_nodes()
        .into_iter()
        .filter(|n| n.session_id.as_deref() == Some(session_id) && n.has_label("Turn"))
        .map(|n| {
            n.prop_u64("sequence_index")
                .context("Turn missing sequence_index")
        })
        .collect::<Result<_>>()?;
    indices.sort_unstable();

    for (expected, actual) in indices.iter().enumerate() {
        if *actual != expected as u64 {
            bail!(
                "turn indices for {} not contiguous: expected {}, found {} (all: {:?})",
                session_id,
                expected,
                actual,
                indices
            );
        }
    }
    Ok(())
}

/// Every TRIGGERS edge points from a Reasoning with a strictly smaller
/// sequence index, within the same turn.
pub fn assert_triggers_causality(store: &MockGraphStore) -> Result<()> {
    let nodes = store.current_nodes();
    let edges = store.all_edges();

    let node = |id: &str| {
        nodes
            .iter()
            .find(|n| n.id == id)
            .with_context(|| format!("edge references unknown node {}", id))
    };
    let turn_of = |id: &str, kind: EdgeKind| -> Option<String> {
        edges
            .iter()
            .find(|e| e.kind == kind && e.to == id)
            .map(|e| e.from.clone())
    };

    for edge in edges.iter().filter(|e| e.kind == EdgeKind::Triggers) {
        let reasoning = node(&edge.from)?;
        let tool_call = node(&edge.to)?;

        if !reasoning.has_label("Reasoning") {
            bail!("TRIGGERS source {} is not a Reasoning", edge.from);
        }
        if !tool_call.has_label("ToolCall") {
            bail!("TRIGGERS target {} is not a ToolCall", edge.to);
        }

        let r_seq = reasoning
            .prop_u64("sequence_index")
            .context("Reasoning missing sequence_index")?;
        let tc_seq = tool_call
            .prop_u64("sequence_index")
            .context("ToolCall missing sequence_index")?;
        if r_seq >= tc_seq {
            bail!(
                "TRIGGERS({} -> {}) violates causality: {} >= {}",
                edge.from,
                edge.to,
                r_seq,
                tc_seq
            );
        }

        let r_turn = turn_of(&edge.from, EdgeKind::Contains);
        let tc_turn = turn_of(&edge.to, EdgeKind::Invokes);
        if r_turn != tc_turn {
            bail!(
                "TRIGGERS({} -> {}) crosses turns: {:?} vs {:?}",
                edge.from,
                edge.to,
                r_turn,
                tc_turn
            );
        }
    }
    Ok(())
}

/// Each ToolCall has at most one Observation; pending calls have none;
/// resolved calls have a status matching the observation's error flag.
pub fn assert_observation_uniqueness(store: &MockGraphStore) -> Result<()> {
    let nodes = store.current_nodes();
    let edges = store.all_edges();

    for tool_call in nodes.iter().filter(|n| n.has_label("ToolCall")) {
        let yields: Vec<_> = edges
            .iter()
            .filter(|e| e.kind == EdgeKind::Yields && e.from == tool_call.id)
            .collect();
        if yields.len() > 1 {
            bail!("ToolCall {} has {} observations", tool_call.id, yields.len());
        }

        let status = tool_call
            .prop_str("status")
            .context("ToolCall missing status")?
            .to_string();

        match yields.first() {
            None => {
                if status != "pending" && status != "cancelled" {
                    bail!(
                        "ToolCall {} has status {} but no observation",
                        tool_call.id,
                        status
                    );
                }
            }
            Some(edge) => {
                let observation = nodes
                    .iter()
                    .find(|n| n.id == edge.to)
                    .with_context(|| format!("missing observation {}", edge.to))?;
                let is_error = observation
                    .properties
                    .get("is_error")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let expected = if is_error { "error" } else { "success" };
                if status != expected {
                    bail!(
                        "ToolCall {} status {} does not match observation is_error={}",
                        tool_call.id,
                        status,
                        is_error
                    );
                }
            }
        }
    }
    Ok(())
}

/// Every ToolCall has exactly one INVOKES predecessor and every
/// Observation exactly one YIELDS predecessor.
pub fn assert_edge_cardinality(store: &MockGraphStore) -> Result<()> {
    let nodes = store.current_nodes();
    let edges = store.all_edges();

    for node in &nodes {
        if node.has_label("ToolCall") {
            let invokes = edges
                .iter()
                .filter(|e| e.kind == EdgeKind::Invokes && e.to == node.id)
                .count();
            if invokes != 1 {
                bail!("ToolCall {} has {} INVOKES predecessors", node.id, invokes);
            }
        }
        if node.has_label("Observation") {
            let yields = edges
                .iter()
                .filter(|e| e.kind == EdgeKind::Yields && e.to == node.id)
                .count();
            if yields != 1 {
                bail!("Observation {} has {} YIELDS predecessors", node.id, yields);
            }
        }
    }
    Ok(())
}
