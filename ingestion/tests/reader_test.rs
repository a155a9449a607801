use ingestion::{DocumentError, DocumentReader, ReadError};
use std::fs::File;
use std::io::Write;
use storage::Network;
use tempfile::tempdir;
use unfurl_core::config::ReaderConfig;
use unfurl_core::model::{EntityKind, Namespace};

const DOC: &str = r#"[[["name"],["A"],["B"]], [["src","trg","w"],[0,1,5]], []]"#;

fn config(duplicate_edges: bool) -> ReaderConfig {
    ReaderConfig {
        directed_edges: false,
        duplicate_edges,
    }
}

#[test]
fn test_reload_with_join_column_reuses_nodes() {
    let mut net = Network::new();

    let first = DocumentReader::basic(&config(false))
        .read(DOC.as_bytes(), &mut net)
        .unwrap();
    assert_eq!(net.root().node_count(), 2);
    assert_eq!(net.root().edge_count(), 1);
    assert_eq!(
        net.attributes()
            .get_long(Namespace::Default, EntityKind::Edge, first.edges[0], "w")
            .unwrap(),
        Some(5)
    );

    let second = DocumentReader::joined("name", &config(false))
        .read(DOC.as_bytes(), &mut net)
        .unwrap();
    assert_eq!(second.nodes, first.nodes);
    assert_eq!(second.reused_nodes, 2);
    assert_eq!(net.root().node_count(), 2);
    // duplicate suppression matches the existing edge
    assert_eq!(net.root().edge_count(), 1);
    assert_eq!(second.edges, first.edges);
}

#[test]
fn test_reload_with_duplicate_edges_allowed() {
    let mut net = Network::new();
    DocumentReader::basic(&config(true))
        .read(DOC.as_bytes(), &mut net)
        .unwrap();
    DocumentReader::joined("name", &config(true))
        .read(DOC.as_bytes(), &mut net)
        .unwrap();

    assert_eq!(net.root().node_count(), 2);
    assert_eq!(net.root().edge_count(), 2);
}

#[test]
fn test_reload_without_join_column_doubles_nodes() {
    let mut net = Network::new();
    let mut reader = DocumentReader::basic(&config(false));
    reader.read(DOC.as_bytes(), &mut net).unwrap();
    reader.read(DOC.as_bytes(), &mut net).unwrap();

    assert_eq!(net.root().node_count(), 4);
    assert_eq!(net.view().node_count(), 4);
    assert_eq!(net.root().edge_count(), 2);
}

#[test]
fn test_reused_node_gets_new_attributes() {
    let mut net = Network::new();
    let first = DocumentReader::basic(&config(false))
        .read(r#"[[["name"],["A"]]]"#.as_bytes(), &mut net)
        .unwrap();
    DocumentReader::joined("name", &config(false))
        .read(r#"[[["name","size"],["A",3]]]"#.as_bytes(), &mut net)
        .unwrap();

    assert_eq!(
        net.attributes()
            .get_long(Namespace::Default, EntityKind::Node, first.nodes[0], "size")
            .unwrap(),
        Some(3)
    );
}

#[test]
fn test_type_conflict_against_existing_column() {
    let mut net = Network::new();
    let mut reader = DocumentReader::basic(&config(false));
    reader
        .read(r#"[[["size"],[1]]]"#.as_bytes(), &mut net)
        .unwrap();

    let err = reader
        .read(r#"[[["size"],["big"]]]"#.as_bytes(), &mut net)
        .unwrap_err();
    let DocumentError::Tables { failures, summary } = err else {
        panic!("expected table failure");
    };
    assert!(matches!(failures[0].error, ReadError::TypeConflict { row: 0, .. }));
    assert!(failures[0].to_string().contains("size"));
    // the node was created before its attributes were rejected
    assert!(summary.nodes.is_empty());
    assert_eq!(net.root().node_count(), 2);
}

#[test]
fn test_malformed_json_is_fatal() {
    let mut net = Network::new();
    let err = DocumentReader::basic(&config(false))
        .read(r#"[[["name"],["A"] [["s","t"]]]"#.as_bytes(), &mut net)
        .unwrap_err();
    assert!(matches!(err, DocumentError::Read(ReadError::Syntax { .. })));
    assert_eq!(net.root().node_count(), 1);
}

#[test]
fn test_read_from_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("graph.json");
    let mut file = File::create(&path).unwrap();
    write!(
        file,
        "{}",
        r#"{
            "nodes": [["id", "label"], [10, "ten"], [20, "twenty"], [30, null]],
            "edges": [["s", "t", "kind"], [0, 1, "link"], [1, 2, null]],
            "network": [["primary-key", "title"], [1, "file graph"]]
        }"#
    )
    .unwrap();

    let mut net = Network::new();
    let summary = DocumentReader::basic(&config(false))
        .read(File::open(&path).unwrap(), &mut net)
        .unwrap();

    assert_eq!(summary.nodes.len(), 3);
    assert_eq!(summary.edges.len(), 2);
    let attrs = net.attributes();
    assert_eq!(
        attrs
            .get_string(Namespace::Default, EntityKind::Node, summary.nodes[2], "label")
            .unwrap(),
        None
    );
    assert_eq!(
        attrs
            .get_string(Namespace::Default, EntityKind::Network, 1, "title")
            .unwrap()
            .as_deref(),
        Some("file graph")
    );
}
