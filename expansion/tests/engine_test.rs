use std::sync::Arc;

use expansion::metadata::hidden_parents;
use expansion::{
    EngineError, ExpandSource, ExpansionAction, ExpansionEngine, ScriptedFetchClient,
    SourceMetadata, SourceResponse,
};
use unfurl_core::audit::{AuditOperation, AuditOutcome, InMemoryAuditSink};
use unfurl_core::config::AppConfig;
use unfurl_core::error::{ErrorCode, UnfurlError};
use unfurl_core::model::{EntityKind, Namespace, NodeId, Value};

const URL: &str = "http://source.test/graph";
const ROOT_DOC: &str = r#"[[["name"],["A"],["B"]], [["s","t"],[0,1]], []]"#;
const A_CHILDREN: &str = r#"[[["name"],["A"],["C"],["D"]], [["s","t"],[0,1],[1,2]]]"#;

fn source(action: &str) -> SourceResponse {
    SourceResponse::new(ROOT_DOC)
        .with_header("X-Unfurl-Action", action)
        .with_header("X-Unfurl-Join-Column", "name")
}

async fn open(client: Arc<ScriptedFetchClient>) -> ExpansionEngine {
    let engine = ExpansionEngine::new(client, AppConfig::default());
    engine.open(URL).await.unwrap();
    engine
}

fn scripted(action: &str) -> Arc<ScriptedFetchClient> {
    Arc::new(
        ScriptedFetchClient::new()
            .with_source(URL, source(action))
            .with_expansion("A", A_CHILDREN)
            .with_expansion("C", r#"[[["name"],["E"]]]"#),
    )
}

async fn id_of(engine: &ExpansionEngine, name: &str) -> NodeId {
    let network = engine.network();
    let network = network.read().await;
    let ids = network
        .attributes()
        .find_entities_with_value(Namespace::Default, EntityKind::Node, "name", &Value::from(name))
        .unwrap();
    ids.into_iter().next().unwrap()
}

async fn visible(engine: &ExpansionEngine, id: NodeId) -> bool {
    engine.network().read().await.is_visible(id)
}

#[tokio::test]
async fn test_replace_expand_collapse_round_trip() {
    let client = scripted("replace");
    let engine = open(client.clone()).await;
    let a = id_of(&engine, "A").await;
    let b = id_of(&engine, "B").await;

    let outcome = engine.expand(a).await.unwrap();
    assert_eq!(outcome.source, ExpandSource::Remote);
    let c = id_of(&engine, "C").await;
    let d = id_of(&engine, "D").await;
    assert_eq!(outcome.revealed, vec![c, d]);

    assert!(!visible(&engine, a).await);
    assert!(visible(&engine, b).await && visible(&engine, c).await && visible(&engine, d).await);
    {
        let network = engine.network();
        let network = network.read().await;
        assert_eq!(hidden_parents(&network).unwrap(), vec![a]);
        // A-B and A-C left the view with A
        assert_eq!(network.view().edge_count(), 1);
        assert_eq!(network.root().edge_count(), 3);
    }

    let requests = client.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].target, "A");
    assert_eq!(requests[0].extant_nodes, vec!["B".to_string()]);

    assert!(engine.is_collapse_ready(c).await.unwrap());
    let collapsed = engine.collapse(c, false).await.unwrap();
    assert_eq!(collapsed.parent, a);
    assert_eq!(collapsed.hidden, vec![c, d]);
    assert!(collapsed.deleted.is_empty());
    assert!(collapsed.restored_parent);
    assert!(visible(&engine, a).await);
    assert!(!visible(&engine, c).await);
    {
        let network = engine.network();
        let network = network.read().await;
        assert!(hidden_parents(&network).unwrap().is_empty());
        assert_eq!(network.view().edge_count(), 1);
        assert!(network.contains_node(c));
    }

    // children are cached in the root graph now
    assert!(engine.is_expand_ready(a).await.unwrap());
    let again = engine.expand(a).await.unwrap();
    assert_eq!(again.source, ExpandSource::Cache);
    assert_eq!(again.revealed, vec![c, d]);
    assert_eq!(client.requests().len(), 1);

    let metrics = engine.metrics();
    assert_eq!(metrics.total_expands, 2);
    assert_eq!(metrics.cache_hits, 1);
    assert_eq!(metrics.remote_fetches, 1);
    assert_eq!(metrics.total_collapses, 1);
}

#[tokio::test]
async fn test_augment_keeps_expanded_node() {
    let engine = open(scripted("augment")).await;
    let a = id_of(&engine, "A").await;

    assert!(!engine.is_collapse_ready(a).await.unwrap());
    engine.expand(a).await.unwrap();
    let c = id_of(&engine, "C").await;
    let d = id_of(&engine, "D").await;

    assert!(visible(&engine, a).await && visible(&engine, c).await);
    {
        let network = engine.network();
        let network = network.read().await;
        assert_eq!(network.view().edge_count(), 3);
        assert!(hidden_parents(&network).unwrap().is_empty());
    }
    assert!(!engine.is_expand_ready(a).await.unwrap());
    assert!(engine.is_collapse_ready(a).await.unwrap());

    let collapsed = engine.collapse(a, false).await.unwrap();
    assert_eq!(collapsed.parent, a);
    assert_eq!(collapsed.hidden, vec![c, d]);
    assert!(!collapsed.restored_parent);
    assert!(visible(&engine, a).await);
    assert!(!visible(&engine, d).await);
    assert!(!engine.is_collapse_ready(a).await.unwrap());
}

#[tokio::test]
async fn test_clear_collapse_forces_refetch() {
    let client = scripted("replace");
    let engine = open(client.clone()).await;
    let a = id_of(&engine, "A").await;

    engine.expand(a).await.unwrap();
    let c = id_of(&engine, "C").await;
    let d = id_of(&engine, "D").await;

    let collapsed = engine.collapse(c, true).await.unwrap();
    assert_eq!(collapsed.deleted, vec![c, d]);
    assert!(collapsed.restored_parent);
    {
        let network = engine.network();
        let network = network.read().await;
        assert!(!network.contains_node(c));
        assert_eq!(network.root().node_count(), 2);
        assert!(network
            .attributes()
            .raw(Namespace::Default, EntityKind::Node, c, "name")
            .is_none());
    }

    let again = engine.expand(a).await.unwrap();
    assert_eq!(again.source, ExpandSource::Remote);
    assert_eq!(client.requests().len(), 2);
    assert!(!again.revealed.contains(&c));
}

#[tokio::test]
async fn test_collapse_takes_descendants_along() {
    let client = scripted("augment");
    let engine = open(client.clone()).await;
    let a = id_of(&engine, "A").await;

    engine.expand(a).await.unwrap();
    let c = id_of(&engine, "C").await;
    engine.expand(c).await.unwrap();
    let e = id_of(&engine, "E").await;
    assert!(visible(&engine, e).await);

    let collapsed = engine.collapse(a, false).await.unwrap();
    assert!(collapsed.hidden.contains(&e));
    assert!(!visible(&engine, e).await);
    // C was reset, so it can be expanded again from cache
    assert!(engine.is_expand_ready(c).await.unwrap());

    engine.expand(a).await.unwrap();
    let collapsed = engine.collapse(a, true).await.unwrap();
    assert_eq!(collapsed.deleted.len(), 3);
    assert_eq!(engine.network().read().await.root().node_count(), 2);
}

#[tokio::test]
async fn test_extant_nodes_include_hidden_parents() {
    let client = scripted("replace");
    let engine = open(client.clone()).await;
    let a = id_of(&engine, "A").await;

    engine.expand(a).await.unwrap();
    let c = id_of(&engine, "C").await;
    engine.expand(c).await.unwrap();

    let requests = client.requests();
    assert_eq!(requests[1].target, "C");
    assert_eq!(
        requests[1].extant_nodes,
        vec!["B".to_string(), "D".to_string(), "A".to_string()]
    );

    let e = id_of(&engine, "E").await;
    {
        let network = engine.network();
        let network = network.read().await;
        assert_eq!(hidden_parents(&network).unwrap(), vec![a, c]);
    }

    let collapsed = engine.collapse(e, false).await.unwrap();
    assert_eq!(collapsed.parent, c);
    assert!(visible(&engine, c).await);
    let network = engine.network();
    let network = network.read().await;
    assert_eq!(hidden_parents(&network).unwrap(), vec![a]);
}

#[tokio::test]
async fn test_failed_fetch_leaves_node_unexpanded() {
    let sink = Arc::new(InMemoryAuditSink::default());
    let engine = ExpansionEngine::new(scripted("replace"), AppConfig::default())
        .with_audit_sink(sink.clone());
    engine.open(URL).await.unwrap();
    let b = id_of(&engine, "B").await;

    let err = engine.expand(b).await.unwrap_err();
    assert!(matches!(err, EngineError::RemoteFetchFailure(_)));
    assert_eq!(err.error_code(), ErrorCode::Unavailable);
    assert!(engine.is_expand_ready(b).await.unwrap());
    assert!(visible(&engine, b).await);
    assert_eq!(engine.metrics().failed_expands, 1);

    let events = sink.events().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(
        events[0].operation,
        AuditOperation::Load {
            source_url: URL.to_string()
        }
    );
    assert_eq!(events[1].operation, AuditOperation::Expand { node_id: b });
    assert_eq!(events[1].outcome, AuditOutcome::Failed);
    assert_eq!(events[1].node_id(), Some(b));
    assert_eq!(events[0].network_id, events[1].network_id);
    assert!(events[1].error.is_some());
}

#[tokio::test]
async fn test_failed_merge_is_refetched_on_retry() {
    let client = Arc::new(
        ScriptedFetchClient::new()
            .with_source(URL, source("replace"))
            .with_expansion("A", r#"[[["name","w"],["C",1],["D","x"]]]"#),
    );
    let engine = open(client.clone()).await;
    let a = id_of(&engine, "A").await;

    let err = engine.expand(a).await.unwrap_err();
    assert!(matches!(err, EngineError::Document(_)));
    {
        let network = engine.network();
        let network = network.read().await;
        assert_eq!(network.root().node_count(), 2);
        assert!(network.is_visible(a));
        assert!(hidden_parents(&network).unwrap().is_empty());
    }
    assert!(engine.is_expand_ready(a).await.unwrap());

    // nothing cached from the failed attempt, so the retry goes back to the source
    let err = engine.expand(a).await.unwrap_err();
    assert!(matches!(err, EngineError::Document(_)));
    assert_eq!(client.requests().len(), 2);
    assert_eq!(engine.metrics().cache_hits, 0);
    assert_eq!(engine.metrics().failed_expands, 2);
}

#[tokio::test]
async fn test_open_falls_back_to_default_action() {
    let client = Arc::new(ScriptedFetchClient::new().with_source(
        URL,
        SourceResponse::new(ROOT_DOC).with_header("x-unfurl-join-column", "name"),
    ));
    let engine = ExpansionEngine::new(client, AppConfig::default());
    engine.open(URL).await.unwrap();

    let network = engine.network();
    let network = network.read().await;
    let metadata = SourceMetadata::load(&network).unwrap();
    assert_eq!(metadata.action, ExpansionAction::Replace);
    assert_eq!(metadata.url, URL);
}

#[tokio::test]
async fn test_open_requires_join_column_header() {
    let client = Arc::new(
        ScriptedFetchClient::new().with_source(URL, SourceResponse::new(ROOT_DOC)),
    );
    let engine = ExpansionEngine::new(client, AppConfig::default());
    let err = engine.open(URL).await.unwrap_err();
    assert!(matches!(err, EngineError::MissingSourceMetadata(_)));
    assert_eq!(err.error_code(), ErrorCode::FailedPrecondition);

    let err = engine.open("http://elsewhere.test").await.unwrap_err();
    assert!(matches!(err, EngineError::RemoteFetchFailure(_)));
}

#[tokio::test]
async fn test_unknown_node() {
    let engine = open(scripted("replace")).await;
    assert!(matches!(
        engine.expand(u64::MAX).await,
        Err(EngineError::UnknownNode(_))
    ));
    assert!(matches!(
        engine.collapse(u64::MAX, false).await,
        Err(EngineError::UnknownNode(_))
    ));
}
