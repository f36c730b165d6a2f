use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;

use directmq::message::*;

use crate::config::Config;
use crate::edge::reason;
use crate::test::logger;
use crate::test::simulator::Simulation;

type Inbox = Arc<Mutex<Vec<(String, Vec<u8>)>>>;

/// A handler that records what it receives.
fn recorder() -> (Inbox, impl FnMut(&str, &[u8]) + Send + 'static) {
    let inbox = Inbox::default();
    let handler = {
        let inbox = inbox.clone();
        move |topic: &str, payload: &[u8]| {
            inbox
                .lock()
                .unwrap()
                .push((topic.to_owned(), payload.to_vec()))
        }
    };
    (inbox, handler)
}

fn received(inbox: &Inbox) -> Vec<(String, Vec<u8>)> {
    inbox.lock().unwrap().clone()
}

fn topics(list: Vec<Arc<str>>) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

/// Three nodes linked in a line: `alice - bob - carol`.
fn chain(sim: &mut Simulation) -> (NodeId, NodeId, NodeId) {
    let alice = sim.node("alice");
    let bob = sim.node("bob");
    let carol = sim.node("carol");

    sim.connect(&alice, &bob);
    sim.connect(&bob, &carol);
    sim.run();

    (alice, bob, carol)
}

#[test]
fn test_handshake() {
    logger::init(log::Level::Debug);

    let mut sim = Simulation::new(1);
    let alice = sim.node("alice");
    let bob = sim.node("bob");
    let established = Arc::new(AtomicUsize::new(0));

    sim.get(&bob).diagnostics().on_connection_established({
        let established = established.clone();
        move |_, peer| {
            assert_eq!(peer, &NodeId::from("alice"));
            established.fetch_add(1, Ordering::SeqCst);
        }
    });
    let link = sim.connect(&alice, &bob);
    sim.run();

    assert_eq!(sim.get(&alice).bridged_node_ids(), vec![bob.clone()]);
    assert_eq!(sim.get(&bob).bridged_node_ids(), vec![alice.clone()]);
    assert_eq!(established.load(Ordering::SeqCst), 1);

    let (_, edge) = link.initiator();
    let edge = sim.get(&alice).edges().find(|e| e.id() == edge).unwrap();
    assert_eq!(edge.info().version, PROTOCOL_VERSION);
    assert_eq!(edge.info().max_message_size, NO_MAX_SIZE);
}

#[test]
fn test_publish_across_nodes() {
    let mut sim = Simulation::new(1);
    let (alice, bob, carol) = chain(&mut sim);
    let (inbox, handler) = recorder();

    sim.get(&carol).subscribe("news/*", handler).unwrap();
    sim.run();

    assert_eq!(topics(sim.get(&alice).subscribed_topics()), vec!["news/*"]);
    assert_eq!(topics(sim.get(&bob).subscribed_topics()), vec!["news/*"]);

    sim.get(&alice)
        .publish("news/today", b"hello".to_vec(), DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.get(&alice)
        .publish("sports/today", b"nope".to_vec(), DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.run();

    assert_eq!(
        received(&inbox),
        vec![(String::from("news/today"), b"hello".to_vec())]
    );
}

#[test]
fn test_subscription_advertised_on_connect() {
    let mut sim = Simulation::new(1);
    let alice = sim.node("alice");
    let carol = sim.node("carol");
    let (inbox, handler) = recorder();

    sim.get(&carol).subscribe("a/**", handler).unwrap();
    sim.connect(&alice, &carol);
    sim.run();

    assert_eq!(topics(sim.get(&alice).subscribed_topics()), vec!["a/**"]);

    sim.get(&alice)
        .publish("a/b/c", vec![1], DeliveryStrategy::AtMostOnce)
        .unwrap();
    sim.run();

    assert_eq!(received(&inbox), vec![(String::from("a/b/c"), vec![1])]);
}

#[test]
fn test_at_most_once() {
    let mut sim = Simulation::new(1);
    let alice = sim.node("alice");
    let bob = sim.node("bob");
    let carol = sim.node("carol");
    let (bob_inbox, bob_handler) = recorder();
    let (carol_inbox, carol_handler) = recorder();

    sim.connect(&alice, &bob);
    sim.connect(&alice, &carol);
    sim.run();

    sim.get(&bob).subscribe("jobs", bob_handler).unwrap();
    sim.get(&carol).subscribe("jobs", carol_handler).unwrap();
    sim.run();

    for i in 0..50u8 {
        sim.get(&alice)
            .publish("jobs", vec![i], DeliveryStrategy::AtMostOnce)
            .unwrap();
        sim.run();
    }
    let bob_jobs = received(&bob_inbox).len();
    let carol_jobs = received(&carol_inbox).len();

    assert_eq!(bob_jobs + carol_jobs, 50);
    assert!(bob_jobs > 0, "bob should get some of the work");
    assert!(carol_jobs > 0, "carol should get some of the work");
}

#[test]
fn test_at_least_once() {
    let mut sim = Simulation::new(1);
    let alice = sim.node("alice");
    let bob = sim.node("bob");
    let carol = sim.node("carol");
    let (bob_inbox, bob_handler) = recorder();
    let (carol_inbox, carol_handler) = recorder();

    sim.connect(&alice, &bob);
    sim.connect(&alice, &carol);
    sim.run();

    sim.get(&bob).subscribe("jobs", bob_handler).unwrap();
    sim.get(&carol).subscribe("jobs", carol_handler).unwrap();
    sim.run();

    sim.get(&alice)
        .publish("jobs", vec![1], DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.run();

    assert_eq!(received(&bob_inbox).len(), 1);
    assert_eq!(received(&carol_inbox).len(), 1);
}

#[test]
fn test_unsubscribe_propagates() {
    let mut sim = Simulation::new(1);
    let (alice, bob, carol) = chain(&mut sim);
    let (inbox, handler) = recorder();

    let id = sim.get(&carol).subscribe("news/*", handler).unwrap();
    sim.run();
    assert_eq!(topics(sim.get(&alice).subscribed_topics()), vec!["news/*"]);

    sim.get(&carol).unsubscribe(id);
    sim.run();

    assert!(sim.get(&alice).subscribed_topics().is_empty());
    assert!(sim.get(&bob).subscribed_topics().is_empty());

    sim.get(&alice)
        .publish("news/today", vec![1], DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.run();

    assert!(received(&inbox).is_empty());
}

#[test]
fn test_overlapping_subscriptions() {
    let mut sim = Simulation::new(1);
    let (alice, _, carol) = chain(&mut sim);

    let sport = sim.get(&carol).subscribe("news/sport", |_, _| {}).unwrap();
    sim.run();
    assert_eq!(topics(sim.get(&alice).subscribed_topics()), vec!["news/sport"]);

    sim.get(&carol).subscribe("news/*", |_, _| {}).unwrap();
    sim.run();
    assert_eq!(topics(sim.get(&alice).subscribed_topics()), vec!["news/*"]);

    // Still covered by `news/*`.
    sim.get(&carol).unsubscribe(sport);
    sim.run();
    assert_eq!(topics(sim.get(&alice).subscribed_topics()), vec!["news/*"]);
}

#[test]
fn test_disconnect_revokes_subscriptions() {
    let mut sim = Simulation::new(1);
    let alice = sim.node("alice");
    let bob = sim.node("bob");
    let carol = sim.node("carol");

    sim.connect(&alice, &bob);
    let link = sim.connect(&bob, &carol);
    sim.run();

    sim.get(&carol).subscribe("news/*", |_, _| {}).unwrap();
    sim.run();
    assert_eq!(topics(sim.get(&alice).subscribed_topics()), vec!["news/*"]);

    let (_, edge) = link.initiator();
    assert!(sim.get(&bob).remove_edge(edge, "maintenance"));
    sim.run();

    assert!(sim.get(&alice).subscribed_topics().is_empty());
    assert!(sim.get(&bob).subscribed_topics().is_empty());
    assert_eq!(sim.get(&bob).bridged_node_ids(), vec![alice]);
    assert!(sim.get(&carol).bridged_node_ids().is_empty());
}

#[test]
fn test_ttl_limits_reach() {
    let mut sim = Simulation::new(1);
    let alice = sim.node_with(Config {
        ttl: 2,
        ..Config::test("alice")
    });
    let bob = sim.node("bob");
    let carol = sim.node("carol");
    let (bob_inbox, bob_handler) = recorder();
    let (carol_inbox, carol_handler) = recorder();

    sim.connect(&alice, &bob);
    sim.connect(&bob, &carol);
    sim.run();

    sim.get(&bob).subscribe("t", bob_handler).unwrap();
    sim.get(&carol).subscribe("t", carol_handler).unwrap();
    sim.run();

    sim.get(&alice)
        .publish("t", vec![1], DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.run();

    assert_eq!(received(&bob_inbox).len(), 1);
    assert!(received(&carol_inbox).is_empty());

    // Carol is two hops away from bob, who uses the default budget.
    sim.get(&bob)
        .publish("t", vec![2], DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.run();

    assert_eq!(received(&carol_inbox), vec![(String::from("t"), vec![2])]);
}

#[test]
fn test_max_message_size() {
    let mut sim = Simulation::new(1);
    let alice = sim.node("alice");
    let bob = sim.node_with(Config {
        max_incoming_message_size: 4,
        ..Config::test("bob")
    });
    let (inbox, handler) = recorder();

    sim.connect(&alice, &bob);
    sim.run();
    sim.get(&bob).subscribe("t", handler).unwrap();
    sim.run();

    sim.get(&alice)
        .publish("t", vec![0; 5], DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.get(&alice)
        .publish("t", vec![0; 4], DeliveryStrategy::AtLeastOnce)
        .unwrap();
    sim.run();

    assert_eq!(received(&inbox), vec![(String::from("t"), vec![0; 4])]);
}

#[test]
fn test_loop_terminates_network() {
    logger::init(log::Level::Debug);

    let mut sim = Simulation::new(1);
    let alice = sim.node("alice");
    let bob = sim.node("bob");
    let carol = sim.node("carol");
    let terminated = Arc::new(Mutex::new(Vec::new()));

    for node in [&alice, &bob, &carol] {
        let terminated = terminated.clone();

        sim.get(node)
            .diagnostics()
            .on_termination(move |msg| terminated.lock().unwrap().push(msg.reason.clone()));
    }
    sim.connect(&alice, &bob);
    sim.connect(&bob, &carol);
    sim.connect(&carol, &alice);
    sim.run();

    assert_eq!(sim.get(&alice).bridged_node_ids().len(), 2);

    sim.get(&alice).subscribe("t", |_, _| {}).unwrap();
    sim.run();

    for node in [&alice, &bob, &carol] {
        assert_eq!(sim.get(node).edges().count(), 0, "{node} still has edges");
    }
    let terminated = terminated.lock().unwrap();
    assert!(!terminated.is_empty());
    assert!(terminated
        .iter()
        .all(|r| r.starts_with(reason::NETWORK_LOOP)));
}

#[test]
fn test_close_node() {
    let mut sim = Simulation::new(1);
    let (alice, bob, carol) = chain(&mut sim);
    let closed = Arc::new(AtomicUsize::new(0));
    let lost = Arc::new(Mutex::new(Vec::new()));

    sim.get(&alice).diagnostics().on_connection_lost({
        let lost = lost.clone();
        move |_, peer, reason| lost.lock().unwrap().push((peer.clone(), reason.to_owned()))
    });
    sim.get(&bob).close_node("maintenance", {
        let closed = closed.clone();
        move || {
            closed.fetch_add(1, Ordering::SeqCst);
        }
    });
    sim.run();

    assert_eq!(closed.load(Ordering::SeqCst), 1);
    assert_eq!(sim.get(&bob).edges().count(), 0);
    assert!(sim.get(&alice).bridged_node_ids().is_empty());
    assert!(sim.get(&carol).bridged_node_ids().is_empty());
    assert_eq!(
        *lost.lock().unwrap(),
        vec![(bob, String::from("maintenance"))]
    );
}
