//! Replaying the same event stream into a cold aggregator reproduces
//! the original graph.

use std::collections::BTreeSet;
use std::sync::Arc;

use mnemon_engine::{AggregatorConfig, TurnAggregator};
use mnemon_store::MemoryBus;
use mnemon_testing::{
    assistant_envelope, result_envelope, text_block, thinking_block, tool_result_envelope,
    tool_use_block, user_text_envelope, MockGraphStore,
};
use mnemon_types::Envelope;

fn stream() -> Vec<Envelope> {
    vec![
        user_text_envelope("s-replay", "fix the flaky test"),
        assistant_envelope(
            "s-replay",
            vec![
                thinking_block("look at the test first"),
                tool_use_block(
                    "toolu_read",
                    "Read",
                    serde_json::json!({"file_path": "/tests/flaky.rs"}),
                ),
            ],
        ),
        tool_result_envelope("s-replay", "toolu_read", "fn test_flaky() { ... }", false),
        assistant_envelope(
            "s-replay",
            vec![
                thinking_block("the sleep is the problem"),
                text_block("Removing the sleep."),
                tool_use_block(
                    "toolu_edit",
                    "Edit",
                    serde_json::json!({"file_path": "/tests/flaky.rs", "old_string": "sleep", "new_string": ""}),
                ),
            ],
        ),
        tool_result_envelope("s-replay", "toolu_edit", "ok", false),
        result_envelope("s-replay"),
    ]
}

async fn run(stream: &[Envelope]) -> Arc<MockGraphStore> {
    let graph = Arc::new(MockGraphStore::new());
    let aggregator = TurnAggregator::new(
        graph.clone(),
        Arc::new(MemoryBus::new()),
        AggregatorConfig::default(),
    );
    for envelope in stream {
        let deltas = mnemon_providers::parse_envelope(envelope);
        aggregator
            .process(
                envelope.headers.session_id.as_deref().unwrap(),
                envelope,
                &deltas,
            )
            .await
            .unwrap();
    }
    graph
}

fn shape(graph: &MockGraphStore) -> (BTreeSet<String>, BTreeSet<String>) {
    let nodes = graph
        .current_nodes()
        .into_iter()
        .map(|n| format!("{}|{}|{}", n.id, n.labels.join(","), n.properties))
        .collect();
    let edges = graph
        .all_edges()
        .into_iter()
        .map(|e| format!("{}|{}|{}", e.kind.as_str(), e.from, e.to))
        .collect();
    (nodes, edges)
}

#[tokio::test]
async fn test_cold_replay_is_isomorphic() {
    let stream = stream();
    let first = run(&stream).await;
    let second = run(&stream).await;

    // Deterministic ids make the isomorphism an equality
    assert_eq!(shape(&first), shape(&second));

    mnemon_testing::assert_turn_contiguity(&first, "s-replay").unwrap();
    mnemon_testing::assert_triggers_causality(&first).unwrap();
    mnemon_testing::assert_observation_uniqueness(&first).unwrap();
    mnemon_testing::assert_edge_cardinality(&first).unwrap();
}

#[tokio::test]
async fn test_warm_replay_is_a_noop() {
    let stream = stream();
    let graph = Arc::new(MockGraphStore::new());
    let aggregator = TurnAggregator::new(
        graph.clone(),
        Arc::new(MemoryBus::new()),
        AggregatorConfig::default(),
    );

    for envelope in &stream {
        let deltas = mnemon_providers::parse_envelope(envelope);
        aggregator
            .process("s-replay", envelope, &deltas)
            .await
            .unwrap();
    }
    let baseline = shape(&graph);
    let baseline_rows = graph.row_count();

    // Feed the content-bearing envelopes again: durable dedup drops
    // every block before mutation
    for envelope in &stream[1..2] {
        let deltas = mnemon_providers::parse_envelope(envelope);
        aggregator
            .process("s-replay", envelope, &deltas)
            .await
            .unwrap();
    }

    assert_eq!(shape(&graph), baseline);
    assert_eq!(graph.row_count(), baseline_rows);
}
