//! End-to-end batch conversion tests
//!
//! Exercises the orchestrator-level guarantees: at-most-once dispatch,
//! idempotent upsert, deferred resolution completeness, no silent loss,
//! the fatal threshold, and cooperative cancellation.

use std::time::Duration;

use modelport::{
    convert_inbound, convert_outbound, BatchOptions, CancelFlag, Category, Document, ElementKind,
    ExchangeError, NewElement, Node, NodeBody, Settings, Status,
};

fn options() -> BatchOptions {
    BatchOptions {
        // dependency settling never succeeds in-process; do not sleep for it
        settle_timeout: Duration::ZERO,
        ..BatchOptions::default()
    }
}

fn wall_node(app_id: &str) -> Node {
    Node::new(NodeBody::Wall {
        base_line: [[0.0, 0.0, 0.0], [4.0, 0.0, 0.0]],
        height: 3.0,
        level_id: None,
    })
    .with_application_id(app_id)
}

fn floor_node(app_id: &str) -> Node {
    Node::new(NodeBody::Floor {
        outline: vec![[0.0, 0.0, 0.0], [4.0, 0.0, 0.0], [4.0, 4.0, 0.0]],
        level_id: None,
    })
    .with_application_id(app_id)
}

fn connection_node(app_id: &str, deps: &[&str]) -> Node {
    Node::new(NodeBody::Connection {
        family: "CF".into(),
        type_name: "C1".into(),
        base_point: Some([1.0, 0.0, 0.0]),
        rotation: 0.0,
        connected_ids: deps.iter().map(|s| s.to_string()).collect(),
    })
    .with_application_id(app_id)
}

fn solid_wall(doc: &mut Document, name: &str) -> modelport::ElementId {
    let mut spec = NewElement::new(ElementKind::Wall, name);
    spec.footprint = vec![[0.0, 0.0, 0.0], [4.0, 0.0, 3.0]];
    doc.add(spec)
}

// =============================================================================
// Inbound scenarios
// =============================================================================

#[test]
fn test_three_node_dependency_batch() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    let nodes = vec![
        wall_node("a"),
        connection_node("b", &["a"]),
        connection_node("c", &["nonexistent"]),
    ];

    let (results, report) = convert_inbound(&mut doc, &nodes, &settings, options()).unwrap();

    // no silent loss: one terminal entry per input object
    assert_eq!(report.len(), 3);
    assert_eq!(results.len(), 3);

    assert_eq!(report.get("a").unwrap().status, Status::Created);
    assert_eq!(report.get("b").unwrap().status, Status::Created);

    let c = report.get("c").unwrap();
    assert_eq!(c.status, Status::Failed);
    assert!(
        c.notes.iter().any(|n| n.contains("missing dependency")),
        "expected a missing-dependency note, got {:?}",
        c.notes
    );
}

#[test]
fn test_rerun_updates_instead_of_duplicating() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    let nodes = vec![
        wall_node("a"),
        connection_node("b", &["a"]),
        connection_node("c", &["nonexistent"]),
    ];

    convert_inbound(&mut doc, &nodes, &settings, options()).unwrap();
    let count_after_first = doc.len();

    let (_, report) = convert_inbound(&mut doc, &nodes, &settings, options()).unwrap();

    assert_eq!(report.get("a").unwrap().status, Status::Updated);
    assert_eq!(report.get("b").unwrap().status, Status::Updated);
    assert_eq!(report.get("c").unwrap().status, Status::Failed);
    assert_eq!(doc.len(), count_after_first);
}

#[test]
fn test_deferred_unlock_between_connections() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    // b depends on d, which appears later in the same group; b must go
    // through Pending and be unlocked when d's identity is recorded
    let nodes = vec![
        connection_node("b", &["d"]),
        connection_node("d", &["a"]),
        wall_node("a"),
    ];

    let (_, report) = convert_inbound(&mut doc, &nodes, &settings, options()).unwrap();

    assert_eq!(report.len(), 3);
    assert_eq!(report.get("a").unwrap().status, Status::Created);
    assert_eq!(report.get("d").unwrap().status, Status::Created);
    let b = report.get("b").unwrap();
    assert_eq!(b.status, Status::Created);
    assert!(
        b.notes.iter().any(|n| n.contains("deferred")),
        "entry should record its deferral before turning terminal: {:?}",
        b.notes
    );
}

#[test]
fn test_connection_prefers_face_placement() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    let nodes = vec![wall_node("a"), connection_node("b", &["a"])];
    convert_inbound(&mut doc, &nodes, &settings, options()).unwrap();

    let conn = doc
        .elements()
        .find(|e| e.category == Category::Connections)
        .expect("connection element created");
    assert!(conn.host.is_some(), "connection should be hosted on a face");
}

#[test]
fn test_recreate_on_kind_change_across_batches() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    convert_inbound(&mut doc, &[wall_node("x")], &settings, options()).unwrap();
    let old_kind = doc.elements().next().unwrap().kind;
    assert_eq!(old_kind, ElementKind::Wall);

    // a fresh batch means a fresh session; identity comes back via the
    // stamped attribute, and the kind change forces delete-and-recreate
    let (_, report) = convert_inbound(&mut doc, &[floor_node("x")], &settings, options()).unwrap();

    assert_eq!(report.get("x").unwrap().status, Status::Created);
    assert_eq!(doc.len(), 1);
    assert_eq!(doc.elements().next().unwrap().kind, ElementKind::Floor);
}

#[test]
fn test_inbound_fatal_when_nothing_succeeds() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    let nodes = vec![connection_node("c", &["ghost"])];
    let err = convert_inbound(&mut doc, &nodes, &settings, options()).unwrap_err();
    assert!(matches!(err, ExchangeError::NothingConverted));

    // one success lifts the batch above the fatal threshold
    let nodes = vec![wall_node("a"), connection_node("c", &["ghost"])];
    let (_, report) = convert_inbound(&mut doc, &nodes, &settings, options()).unwrap();
    assert_eq!(report.successes(), 1);
    assert_eq!(report.count(Status::Failed), 1);
}

#[test]
fn test_inbound_at_most_once_per_key() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    // the same node arriving twice is converted once
    let nodes = vec![wall_node("a"), wall_node("a")];
    let (_, report) = convert_inbound(&mut doc, &nodes, &settings, options()).unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(doc.len(), 1);
}

// =============================================================================
// Outbound scenarios
// =============================================================================

#[test]
fn test_outbound_four_of_five_survive_one_failure() {
    let mut doc = Document::new();
    let settings = Settings::empty();

    let mut selection: Vec<_> = (0..4)
        .map(|i| solid_wall(&mut doc, &format!("Wall {i}")))
        .collect();
    // this one's conversion routine rejects it
    selection.push(doc.add(NewElement::new(ElementKind::Wall, "broken")));

    let (root, report) =
        convert_outbound(&doc, &selection, &settings, BatchOptions::default()).unwrap();

    assert_eq!(report.len(), 5);
    assert_eq!(report.count(Status::Created), 4);
    assert_eq!(report.count(Status::Failed), 1);
    assert_eq!(root.children.len(), 4);
}

#[test]
fn test_outbound_at_most_once_with_duplicate_selection() {
    let mut doc = Document::new();
    let settings = Settings::empty();
    let wall = solid_wall(&mut doc, "Wall");

    let (root, report) =
        convert_outbound(&doc, &[wall, wall, wall], &settings, BatchOptions::default()).unwrap();

    assert_eq!(report.len(), 1);
    assert_eq!(root.children.len(), 1);
}

#[test]
fn test_outbound_empty_selection_is_an_error() {
    let doc = Document::new();
    let settings = Settings::empty();
    let err = convert_outbound(&doc, &[], &settings, BatchOptions::default()).unwrap_err();
    assert!(matches!(err, ExchangeError::EmptySelection));
}

#[test]
fn test_outbound_fatal_when_everything_skips() {
    let mut doc = Document::new();
    let settings = Settings::empty();
    let run = doc.add(NewElement::new(ElementKind::StairRun, "run"));
    let landing = doc.add(NewElement::new(ElementKind::StairLanding, "landing"));

    let err =
        convert_outbound(&doc, &[run, landing], &settings, BatchOptions::default()).unwrap_err();
    assert!(matches!(err, ExchangeError::NothingConverted));
}

#[test]
fn test_outbound_cancellation_preserves_partial_report() {
    let mut doc = Document::new();
    let settings = Settings::empty();
    let selection: Vec<_> = (0..5)
        .map(|i| solid_wall(&mut doc, &format!("Wall {i}")))
        .collect();

    let cancel = CancelFlag::new();
    let hook_flag = cancel.clone();
    let options = BatchOptions {
        cancel,
        // the yield hook trips the flag, so the batch stops after item one
        yield_hook: Some(Box::new(move || hook_flag.cancel())),
        yield_interval: Duration::ZERO,
        ..BatchOptions::default()
    };

    let err = convert_outbound(&doc, &selection, &settings, options).unwrap_err();
    match err {
        ExchangeError::Cancelled { report, total } => {
            assert_eq!(total, 5);
            assert_eq!(report.len(), 1);
            assert_eq!(report.count(Status::Created), 1);
        }
        other => panic!("expected Cancelled, got {:?}", other),
    }
}

// =============================================================================
// Round trip
// =============================================================================

#[test]
fn test_send_then_receive_round_trip() {
    let mut source = Document::new();
    let settings = Settings::empty();

    let host_wall = solid_wall(&mut source, "Wall A");
    let mut conn_spec = NewElement::new(ElementKind::FamilyInstance, "Conn");
    conn_spec.category = Category::Connections;
    conn_spec.family = Some("CF".into());
    conn_spec.type_name = Some("C1".into());
    conn_spec.base_point = Some([1.0, 0.0, 0.0]);
    let conn = source.add(conn_spec);
    source.get_mut(conn).unwrap().connected.push(host_wall);

    let (root, send_report) =
        convert_outbound(&source, &[host_wall, conn], &settings, BatchOptions::default()).unwrap();
    assert_eq!(send_report.count(Status::Created), 2);

    // the graph survives the transport boundary
    let json = serde_json::to_string(&root).unwrap();
    let root: Node = serde_json::from_str(&json).unwrap();
    let nodes: Vec<Node> = root.children.into_iter().map(|link| link.node).collect();

    let mut target = Document::new();
    let (_, receive_report) =
        convert_inbound(&mut target, &nodes, &settings, options()).unwrap();

    assert_eq!(receive_report.len(), 2);
    assert_eq!(receive_report.successes(), 2);
    assert!(target
        .elements()
        .any(|e| e.category == Category::Connections && e.host.is_some()));
}
