//! Several nodes sharing one store and one message bus

use std::sync::Arc;
use std::time::Duration;

use ballot_cluster::{Broker, MemoryBus, PresenceListener, SessionHub};
use ballot_core::models::{MemberRole, SessionEvent, SessionId, SessionState, User};
use ballot_core::service::VotingService;
use ballot_core::store::{KeyedStore, MemoryStore};
use ballot_core::KeyBuilder;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Node {
    hub: Arc<SessionHub>,
    service: VotingService,
}

impl Node {
    fn start(bus: &Arc<MemoryBus>, store: &Arc<dyn KeyedStore>, cancel: &CancellationToken) -> Self {
        let keys = KeyBuilder::default();
        let presence_broker: Arc<dyn Broker> = Arc::new(bus.broker());
        let hub = Arc::new(
            SessionHub::new(Arc::new(bus.broker()), keys.clone())
                .with_presence(Arc::clone(&presence_broker)),
        );
        let service = VotingService::new(Arc::clone(store), hub.clone(), keys.clone());
        let presence = PresenceListener::new(presence_broker, service.clone(), hub.clone(), keys);

        tokio::spawn(Arc::clone(&hub).run(cancel.clone()));
        tokio::spawn(presence.run(cancel.clone()));

        Self { hub, service }
    }

    /// Open a connection watching `session`, optionally on behalf of `user`
    async fn connect(
        &self,
        connection_id: &str,
        session: &SessionId,
        user: Option<&User>,
    ) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.hub.subscribe(connection_id, session, tx).await.unwrap();
        if let Some(user) = user {
            self.service.join_session(session, &user.id).await.unwrap();
            self.hub
                .associate_user(connection_id, user.id.clone(), user.role())
                .await;
        }
        rx
    }
}

/// Everything received until the connection has been quiet for a while
async fn drain(rx: &mut mpsc::UnboundedReceiver<String>) -> Vec<SessionEvent> {
    let mut events = Vec::new();
    while let Ok(Some(frame)) = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
        events.push(serde_json::from_str(&frame).unwrap());
    }
    events
}

fn cluster() -> (Arc<MemoryBus>, Arc<dyn KeyedStore>, CancellationToken) {
    let store: Arc<dyn KeyedStore> = Arc::new(MemoryStore::new(Duration::from_secs(60)));
    (MemoryBus::new(), store, CancellationToken::new())
}

#[tokio::test]
async fn events_reach_connections_on_every_node() {
    let (bus, store, cancel) = cluster();
    let node_a = Node::start(&bus, &store, &cancel);
    let node_b = Node::start(&bus, &store, &cancel);

    let session = node_a.service.create_session().await.unwrap().id;
    let mut on_a = node_a.connect("a1", &session, None).await;
    let mut on_b = node_b.connect("b1", &session, None).await;

    node_b.service.start_vote(&session).await.unwrap();

    assert_eq!(drain(&mut on_a).await, vec![SessionEvent::VoteStarted]);
    assert_eq!(drain(&mut on_b).await, vec![SessionEvent::VoteStarted]);

    cancel.cancel();
}

#[tokio::test]
async fn departure_finishes_round_once_across_nodes() {
    let (bus, store, cancel) = cluster();
    let node_a = Node::start(&bus, &store, &cancel);
    let node_b = Node::start(&bus, &store, &cancel);

    let session = node_a.service.create_session().await.unwrap().id;
    let alice = node_a
        .service
        .create_user(&session, "Alice", true, false)
        .await
        .unwrap();
    let bob = node_b
        .service
        .create_user(&session, "Bob", false, false)
        .await
        .unwrap();

    let mut watcher = node_a.connect("watcher", &session, None).await;
    let _alice_conn = node_a.connect("alice", &session, Some(&alice)).await;
    let _bob_conn = node_b.connect("bob", &session, Some(&bob)).await;

    node_a.service.start_vote(&session).await.unwrap();
    node_a
        .service
        .cast_vote(&session, &alice.id, "5")
        .await
        .unwrap();
    drain(&mut watcher).await;

    // Bob's socket closes on node B before he votes; both nodes' presence
    // listeners see the departure
    node_b.hub.unsubscribe_all("bob").await.unwrap();

    let events = drain(&mut watcher).await;
    let left = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::UserLeft { user_id, .. } if *user_id == bob.id))
        .count();
    assert_eq!(left, 1);

    let finished: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            SessionEvent::VoteFinished { users, tally } => Some((users, tally)),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 1, "VOTE_FINISHED must fire once: {events:?}");
    assert_eq!(finished[0].1, "5");
    assert_eq!(finished[0].0.len(), 1);
    assert_eq!(finished[0].0[0].id, alice.id);

    assert_eq!(
        node_b.service.session_state(&session).await.unwrap(),
        SessionState::NotVoting
    );
    assert_eq!(node_a.hub.subscriber_count(&session).await, 2);
    assert_eq!(node_b.hub.subscriber_count(&session).await, 0);

    cancel.cancel();
}

#[tokio::test]
async fn observer_departure_updates_membership() {
    let (bus, store, cancel) = cluster();
    let node_a = Node::start(&bus, &store, &cancel);
    let node_b = Node::start(&bus, &store, &cancel);

    let session = node_a.service.create_session().await.unwrap().id;
    let carol = node_b
        .service
        .create_user(&session, "Carol", false, true)
        .await
        .unwrap();
    assert_eq!(carol.role(), MemberRole::Observer);

    let mut watcher = node_a.connect("watcher", &session, None).await;
    let _carol_conn = node_b.connect("carol", &session, Some(&carol)).await;
    let joined = drain(&mut watcher).await;
    assert!(matches!(joined.as_slice(), [SessionEvent::ObserverAdded(user)] if user.id == carol.id));

    node_b.hub.unsubscribe_all("carol").await.unwrap();
    let events = drain(&mut watcher).await;
    assert!(matches!(events.as_slice(), [SessionEvent::ObserverLeft { .. }]));

    let SessionEvent::Watching { observers, .. } =
        node_a.service.session_snapshot(&session).await.unwrap()
    else {
        panic!("expected a WATCHING snapshot");
    };
    assert!(observers.is_empty());

    cancel.cancel();
}
