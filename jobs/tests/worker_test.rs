use std::sync::{Arc, Mutex};

use expansion::{ExpansionEngine, ScriptedFetchClient, SourceResponse};
use jobs::{ChannelCommandQueue, Command, CommandQueue, ViewChange, ViewListener, Worker};
use unfurl_core::config::AppConfig;
use unfurl_core::model::{EntityKind, Namespace, NodeId, Value};

const URL: &str = "http://source.test/graph";

#[derive(Default)]
struct RecordingListener {
    changes: Mutex<Vec<ViewChange>>,
}

impl ViewListener for RecordingListener {
    fn view_changed(&self, change: &ViewChange) {
        self.changes.lock().unwrap().push(change.clone());
    }
}

async fn engine(action: &str) -> Arc<ExpansionEngine> {
    let client = ScriptedFetchClient::new()
        .with_source(
            URL,
            SourceResponse::new(r#"[[["name"],["A"],["B"]], [["s","t"],[0,1]]]"#)
                .with_header("X-Unfurl-Action", action)
                .with_header("X-Unfurl-Join-Column", "name"),
        )
        .with_expansion("A", r#"[[["name"],["C"],["D"]]]"#);
    let engine = ExpansionEngine::new(Arc::new(client), AppConfig::default());
    engine.open(URL).await.unwrap();
    Arc::new(engine)
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

#[tokio::test]
async fn test_worker_applies_commands_in_order() {
    unfurl_core::init_tracing();
    let engine = engine("augment").await;
    let a = id_of(&engine, "A").await;
    let listener = Arc::new(RecordingListener::default());

    let (queue, receiver) = ChannelCommandQueue::channel(16);
    let worker = Worker::new(receiver, engine.clone()).with_listener(listener.clone());
    let handle = tokio::spawn(worker.run());

    queue.enqueue(Command::Expand { node: a }).await.unwrap();
    // already expanded: skipped
    queue.enqueue(Command::Expand { node: a }).await.unwrap();
    queue
        .enqueue(Command::Collapse { node: a, clear: false })
        .await
        .unwrap();
    queue.enqueue(Command::Expand { node: u64::MAX }).await.unwrap();
    drop(queue);

    let report = handle.await.unwrap();
    assert_eq!(report.processed, 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 1);

    let changes = listener.changes.lock().unwrap();
    assert_eq!(changes.len(), 2);
    match (&changes[0], &changes[1]) {
        (ViewChange::Expanded(expanded), ViewChange::Collapsed(collapsed)) => {
            assert_eq!(expanded.node, a);
            assert_eq!(expanded.revealed.len(), 2);
            assert_eq!(collapsed.hidden, expanded.revealed);
        }
        other => panic!("unexpected changes {:?}", other),
    }
}

#[tokio::test]
async fn test_collapse_of_root_node_is_skipped_under_replace() {
    let engine = engine("replace").await;
    let b = id_of(&engine, "B").await;

    let (queue, receiver) = ChannelCommandQueue::channel(4);
    let handle = tokio::spawn(Worker::new(receiver, engine.clone()).run());
    queue
        .enqueue(Command::Collapse { node: b, clear: true })
        .await
        .unwrap();
    drop(queue);

    let report = handle.await.unwrap();
    assert_eq!(report.skipped, 1);
    assert!(engine.network().read().await.contains_node(b));
}
