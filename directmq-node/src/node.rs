//! Network node.
//!
//! The node owns its edges and the native API, and runs the router over them.
//! It performs no I/O of its own: packets are handed to it as they arrive and
//! edges write through their portals.
use std::collections::BTreeMap;
use std::sync::Arc;

use log::*;

use directmq::message::{DeliveryStrategy, NodeId};
use directmq::wire::{Binary, Codec};

use crate::api;
use crate::api::Diagnostics;
use crate::api::Native;
use crate::config::Config;
use crate::edge::{Edge, EdgeId, State};
use crate::portal::Portal;
use crate::router::{Context, Event, Outbox, Participant, ParticipantId, Participants, Router};
use crate::subscription::SubscriptionId;

/// Called once every edge is gone after [`Node::close_node`].
pub type OnClosed = Box<dyn FnOnce() + Send>;

/// Everything the router routes between.
#[derive(Debug)]
struct Members<P> {
    native: Native,
    edges: BTreeMap<EdgeId, Edge<P>>,
}

impl<P: Portal> Participants for Members<P> {
    fn get(&self, id: &ParticipantId) -> Option<&dyn Participant> {
        match id {
            ParticipantId::Native => Some(&self.native),
            ParticipantId::Edge(id) => self.edges.get(id).map(|e| e as &dyn Participant),
        }
    }

    fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut dyn Participant> {
        match id {
            ParticipantId::Native => Some(&mut self.native),
            ParticipantId::Edge(id) => self.edges.get_mut(id).map(|e| e as &mut dyn Participant),
        }
    }
}

/// A DirectMQ node.
pub struct Node<P, C = Binary> {
    config: Config,
    codec: C,
    rng: fastrand::Rng,
    outbox: Outbox,
    router: Router,
    members: Members<P>,
    next_id: EdgeId,
    on_closed: Option<OnClosed>,
}

impl<P, C> std::fmt::Debug for Node<P, C>
where
    P: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("config", &self.config)
            .field("router", &self.router)
            .field("members", &self.members)
            .finish()
    }
}

impl<P: Portal> Node<P> {
    /// Create a node using the binary codec.
    pub fn new(config: Config, rng: fastrand::Rng) -> Self {
        Self::with_codec(config, Binary, rng)
    }
}

impl<P: Portal, C: Codec> Node<P, C> {
    pub fn with_codec(config: Config, codec: C, mut rng: fastrand::Rng) -> Self {
        let native = Native::new(fastrand::Rng::with_seed(rng.u64(..)));

        Self {
            config,
            codec,
            rng,
            outbox: Outbox::default(),
            router: Router::default(),
            members: Members {
                native,
                edges: BTreeMap::new(),
            },
            next_id: EdgeId::from(1),
            on_closed: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Our node id.
    pub fn id(&self) -> &NodeId {
        &self.config.host_id
    }

    /// Observation hooks.
    pub fn diagnostics(&mut self) -> &mut Diagnostics {
        self.router.diagnostics()
    }

    /// Add an edge for a connection the peer opened. It waits for the peer to
    /// start the handshake.
    pub fn add_listening_edge(&mut self, portal: P) -> EdgeId {
        self.add_edge(portal, false)
    }

    /// Add an edge for a connection we opened. The handshake starts right away.
    pub fn add_connecting_edge(&mut self, portal: P) -> EdgeId {
        self.add_edge(portal, true)
    }

    /// Hand a packet received on an edge's transport to the edge.
    pub fn process_incoming_packet(&mut self, edge: EdgeId, bytes: &[u8]) {
        let (_, members, mut ctx) = self.split();

        let Some(e) = members.edges.get_mut(&edge) else {
            debug!(target: "node", "Dropping packet for unknown {edge}");
            return;
        };
        e.process_packet(bytes, &mut ctx);

        self.drain();
    }

    /// Start closing an edge. Returns `false` if there is no such edge. An
    /// edge that is already closing is left alone.
    pub fn remove_edge(&mut self, edge: EdgeId, reason: impl ToString) -> bool {
        let (_, members, mut ctx) = self.split();

        let Some(e) = members.edges.get_mut(&edge) else {
            return false;
        };
        if e.state().is_closing() {
            return true;
        }
        e.disconnect(reason, &mut ctx);
        self.drain();

        true
    }

    /// Close every edge. `on_closed` is called once the last one is gone,
    /// right away if there are none. Closing an already closing node keeps
    /// the earlier callbacks.
    pub fn close_node(&mut self, reason: impl ToString, on_closed: impl FnOnce() + Send + 'static) {
        let reason = reason.to_string();

        info!(
            target: "node",
            "Closing node with {} edge(s): {reason}", self.members.edges.len()
        );
        if self.members.edges.is_empty() {
            on_closed();
            return;
        }
        // Every caller gets called back, including those of earlier closes.
        let callback: OnClosed = match self.on_closed.take() {
            Some(pending) => Box::new(move || {
                pending();
                on_closed();
            }),
            None => Box::new(on_closed),
        };
        self.on_closed = Some(callback);

        let ids = self.members.edges.keys().copied().collect::<Vec<_>>();
        for id in ids {
            let (_, members, mut ctx) = self.split();

            if let Some(edge) = members.edges.get_mut(&id) {
                edge.disconnect(&reason, &mut ctx);
            }
            self.drain();
        }
    }

    /// State of an edge, if it's still around.
    pub fn edge_state(&self, edge: EdgeId) -> Option<&State> {
        self.members.edges.get(&edge).map(|e| e.state())
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge<P>> {
        self.members.edges.values()
    }

    /// Peers of every connected edge.
    pub fn bridged_node_ids(&self) -> Vec<NodeId> {
        self.members
            .edges
            .values()
            .filter(|e| e.state().is_connected())
            .map(|e| e.peer().clone())
            .collect()
    }

    /// Every pattern routed through this node, local or not.
    pub fn subscribed_topics(&self) -> Vec<Arc<str>> {
        self.router.all_subscribed_topics(&self.members)
    }

    /// Publish from the local application.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: impl Into<Vec<u8>>,
        delivery_strategy: DeliveryStrategy,
    ) -> Result<(), api::Error> {
        let (_, members, mut ctx) = self.split();

        members
            .native
            .publish(topic, payload.into(), delivery_strategy, &mut ctx)?;
        self.drain();

        Ok(())
    }

    /// Subscribe the local application to a pattern.
    pub fn subscribe(
        &mut self,
        pattern: &str,
        handler: impl FnMut(&str, &[u8]) + Send + 'static,
    ) -> Result<SubscriptionId, api::Error> {
        let (_, members, mut ctx) = self.split();
        let id = members.native.subscribe(pattern, handler, &mut ctx)?;

        self.drain();

        Ok(id)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) {
        let (_, members, mut ctx) = self.split();

        members.native.unsubscribe(id, &mut ctx);
        self.drain();
    }

    fn add_edge(&mut self, portal: P, initiator: bool) -> EdgeId {
        let id = self.next_id;
        self.next_id = id.next();

        let rng = fastrand::Rng::with_seed(self.rng.u64(..));
        let edge = Edge::new(id, portal, initiator, rng);

        debug!(target: "node", "Adding {id} (initiator = {initiator})");

        self.members.edges.insert(id, edge);
        self.router.add(ParticipantId::Edge(id));

        let (_, members, mut ctx) = self.split();
        if let Some(edge) = members.edges.get_mut(&id) {
            edge.initialize(&mut ctx);
        }
        self.drain();

        id
    }

    /// Borrow the router, its members and a routing context at once.
    fn split(&mut self) -> (&mut Router, &mut Members<P>, Context<'_>) {
        let Self {
            config,
            codec,
            rng,
            outbox,
            router,
            members,
            ..
        } = self;

        (
            router,
            members,
            Context {
                config: &*config,
                codec: &*codec,
                outbox,
                rng,
            },
        )
    }

    /// Handle queued events until there are none left.
    fn drain(&mut self) {
        while let Some(event) = self.outbox.next() {
            self.handle(event);
        }
    }

    fn handle(&mut self, event: Event) {
        let (router, members, mut ctx) = self.split();

        match event {
            Event::Published(msg) => router.published(&msg, members, &mut ctx),
            Event::Subscribed(msg) => router.subscribed(&msg, members, &mut ctx),
            Event::Unsubscribed(msg) => router.unsubscribed(&msg, members, &mut ctx),
            Event::Terminated(msg) => router.terminated(&msg, members, &mut ctx),
            Event::Established(id) => {
                let topics = router.all_subscribed_topics(&*members);

                if let Some(edge) = members.edges.get_mut(&id) {
                    edge.advertise(&topics, &mut ctx);
                    router.diagnostics().connection_established(id, edge.peer());
                }
            }
            Event::Lost { edge, peer, reason } => {
                router.diagnostics().connection_lost(edge, &peer, &reason);
                router.remove(&ParticipantId::Edge(edge));

                if members.edges.remove(&edge).is_some() {
                    debug!(target: "node", "Removed {edge}, {} left", members.edges.len());
                }
                router.diagnostics().edge_disconnected(edge, &peer, &reason);

                if members.edges.is_empty() {
                    if let Some(on_closed) = self.on_closed.take() {
                        info!(target: "node", "Node closed");
                        on_closed();
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use super::*;
    use pretty_assertions::assert_eq;

    use directmq::message::*;

    use crate::edge::reason;
    use crate::test::assert_matches;
    use crate::test::portal::Mock;

    fn node(host: &str) -> Node<Mock> {
        Node::new(Config::test(host), fastrand::Rng::with_seed(1))
    }

    fn frame(peer: &str) -> DataFrame {
        DataFrame::direct(DIRECT_ONLY_TTL, &NodeId::from(peer))
    }

    /// Complete the handshake of a listening edge with a peer.
    fn accept(node: &mut Node<Mock>, peer: &str) -> (EdgeId, Mock) {
        let portal = Mock::default();
        let id = node.add_listening_edge(portal.clone());
        let packets = [
            Message::from(SupportedProtocolVersions {
                frame: DataFrame::direct(DIRECT_WITH_RESPONSE_TTL, &NodeId::from(peer)),
                versions: vec![PROTOCOL_VERSION],
            }),
            Message::from(InitConnection {
                frame: frame(peer),
                max_message_size: NO_MAX_SIZE,
            }),
        ];
        for msg in packets {
            node.process_incoming_packet(id, &Binary.encode(&msg).unwrap());
        }
        portal.take();

        (id, portal)
    }

    #[test]
    fn test_connecting_edge_starts_handshake() {
        let mut node = node("alice");
        let portal = Mock::default();
        let id = node.add_connecting_edge(portal.clone());

        assert_eq!(node.edge_state(id), Some(&State::Connecting { initiator: true }));
        assert_matches!(
            portal.messages().as_slice(),
            [Message::SupportedProtocolVersions(_)]
        );
    }

    #[test]
    fn test_listening_edge_waits() {
        let mut node = node("alice");
        let portal = Mock::default();
        let id = node.add_listening_edge(portal.clone());

        assert_eq!(node.edge_state(id), Some(&State::Connecting { initiator: false }));
        assert!(portal.messages().is_empty());
    }

    #[test]
    fn test_established_advertises_and_notifies() {
        let mut node = node("alice");
        let established = Arc::new(Mutex::new(Vec::new()));

        node.diagnostics().on_connection_established({
            let established = established.clone();
            move |edge, peer| established.lock().unwrap().push((edge, peer.clone()))
        });
        node.subscribe("a/*", |_, _| {}).unwrap();

        let portal = Mock::default();
        let id = node.add_listening_edge(portal.clone());
        for msg in [
            Message::from(SupportedProtocolVersions {
                frame: DataFrame::direct(DIRECT_WITH_RESPONSE_TTL, &NodeId::from("bob")),
                versions: vec![PROTOCOL_VERSION],
            }),
            Message::from(InitConnection {
                frame: frame("bob"),
                max_message_size: NO_MAX_SIZE,
            }),
        ] {
            node.process_incoming_packet(id, &Binary.encode(&msg).unwrap());
        }
        let messages = portal.messages();

        assert_matches!(
            messages.as_slice(),
            [
                Message::SupportedProtocolVersions(_),
                Message::ConnectionAccepted(_),
                Message::Subscribe(Subscribe { topic, .. }),
            ] if topic == "a/*"
        );
        assert_eq!(node.bridged_node_ids(), vec![NodeId::from("bob")]);
        assert_eq!(
            *established.lock().unwrap(),
            vec![(id, NodeId::from("bob"))]
        );
    }

    #[test]
    fn test_unknown_edge() {
        let mut node = node("alice");

        node.process_incoming_packet(EdgeId::from(9), &[1, 2, 3]);
        assert!(!node.remove_edge(EdgeId::from(9), "gone"));
    }

    #[test]
    fn test_remove_edge() {
        let mut node = node("alice");
        let lost = Arc::new(Mutex::new(Vec::new()));

        node.diagnostics().on_edge_disconnected({
            let lost = lost.clone();
            move |edge, peer, reason| {
                lost.lock().unwrap().push((edge, peer.clone(), reason.to_owned()))
            }
        });
        let (id, portal) = accept(&mut node, "bob");

        assert!(node.remove_edge(id, "bye"));
        assert_eq!(node.edge_state(id), None);
        assert!(node.bridged_node_ids().is_empty());
        assert!(portal.is_closed());
        assert_matches!(
            portal.messages().as_slice(),
            [Message::GracefullyClose(GracefullyClose { reason, .. })] if reason == "bye"
        );
        assert_eq!(
            *lost.lock().unwrap(),
            vec![(id, NodeId::from("bob"), String::from("bye"))]
        );
        assert!(!node.remove_edge(id, "bye"));
    }

    #[test]
    fn test_peer_subscriptions_revoked_on_loss() {
        let mut node = node("alice");
        let (id, _) = accept(&mut node, "bob");
        let subscribe = Message::from(Subscribe {
            frame: DataFrame::direct(DEFAULT_TTL, &NodeId::from("bob")),
            topic: String::from("b/*"),
        });
        node.process_incoming_packet(id, &Binary.encode(&subscribe).unwrap());

        assert_eq!(node.subscribed_topics(), vec![Arc::from("b/*")]);

        let close = Message::from(GracefullyClose {
            frame: frame("bob"),
            reason: String::from("leaving"),
        });
        node.process_incoming_packet(id, &Binary.encode(&close).unwrap());

        assert!(node.subscribed_topics().is_empty());
        assert_eq!(node.edge_state(id), None);
    }

    #[test]
    fn test_close_node_without_edges() {
        let mut node = node("alice");
        let closed = Arc::new(AtomicUsize::new(0));

        node.close_node("shutdown", {
            let closed = closed.clone();
            move || {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_close_node() {
        let mut node = node("alice");
        let closed = Arc::new(AtomicUsize::new(0));
        let (bob, bob_portal) = accept(&mut node, "bob");
        let (eve, eve_portal) = accept(&mut node, "eve");
        let pending = node.add_listening_edge(Mock::default());

        node.close_node("shutdown", {
            let closed = closed.clone();
            move || {
                closed.fetch_add(1, Ordering::SeqCst);
            }
        });
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert_eq!(node.edges().count(), 0);

        for (id, portal) in [(bob, bob_portal), (eve, eve_portal)] {
            assert_eq!(node.edge_state(id), None);
            assert!(portal.is_closed());
        }
        assert_eq!(node.edge_state(pending), None);
    }

    #[test]
    fn test_routing_hooks() {
        let mut node = node("alice");
        let (bob, _) = accept(&mut node, "bob");
        let routed = Arc::new(Mutex::new(Vec::new()));

        node.diagnostics()
            .on_publication({
                let routed = routed.clone();
                move |msg| routed.lock().unwrap().push(format!("publish {}", msg.topic))
            })
            .on_subscription({
                let routed = routed.clone();
                move |msg| routed.lock().unwrap().push(format!("subscribe {}", msg.topic))
            })
            .on_unsubscription({
                let routed = routed.clone();
                move |msg| routed.lock().unwrap().push(format!("unsubscribe {}", msg.topic))
            })
            .on_termination({
                let routed = routed.clone();
                move |msg| routed.lock().unwrap().push(format!("terminate {}", msg.reason))
            });

        let id = node.subscribe("a/*", |_, _| {}).unwrap();
        node.publish("a/b", vec![1], DeliveryStrategy::AtLeastOnce)
            .unwrap();
        node.unsubscribe(id);

        let terminate = Message::from(TerminateNetwork {
            frame: frame("bob"),
            reason: String::from("bye"),
        });
        node.process_incoming_packet(bob, &Binary.encode(&terminate).unwrap());

        assert_eq!(
            *routed.lock().unwrap(),
            vec![
                String::from("subscribe a/*"),
                String::from("publish a/b"),
                String::from("unsubscribe a/*"),
                String::from("terminate bye"),
            ]
        );
        assert_eq!(node.edge_state(bob), None);
    }

    #[test]
    fn test_close_node_twice() {
        let mut node = node("alice");
        let closed = Arc::new(Mutex::new(Vec::new()));
        let (bob, _) = accept(&mut node, "bob");

        for call in ["first", "second"] {
            node.close_node(call, {
                let closed = closed.clone();
                move || closed.lock().unwrap().push(call)
            });
        }
        assert_eq!(*closed.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(node.edge_state(bob), None);
    }

    #[test]
    fn test_peer_ttl_exhausted() {
        let mut node = node("alice");
        let (bob, _) = accept(&mut node, "bob");
        let (eve, eve_portal) = accept(&mut node, "eve");

        for ttl in [Ttl::MIN, -1, 0, 1] {
            let subscribe = Message::from(Subscribe {
                frame: DataFrame {
                    ttl,
                    traversed: vec![NodeId::from("bob")],
                },
                topic: format!("t/{}", ttl.unsigned_abs()),
            });
            node.process_incoming_packet(bob, &Binary.encode(&subscribe).unwrap());
        }
        assert!(eve_portal.messages().is_empty());
        assert!(node.edge_state(bob).unwrap().is_connected());
        assert!(node.edge_state(eve).unwrap().is_connected());

        let subscribe = Message::from(Subscribe {
            frame: DataFrame {
                ttl: 2,
                traversed: vec![NodeId::from("bob")],
            },
            topic: String::from("t/2"),
        });
        node.process_incoming_packet(bob, &Binary.encode(&subscribe).unwrap());

        assert_matches!(
            eve_portal.messages().as_slice(),
            [Message::Subscribe(Subscribe { frame, topic })]
            if topic == "t/2" && frame.ttl == 1
        );
    }

    #[test]
    fn test_local_delivery() {
        let mut node = node("alice");
        let received = Arc::new(Mutex::new(Vec::new()));

        node.subscribe("news/*", {
            let received = received.clone();
            move |topic, payload| {
                received
                    .lock()
                    .unwrap()
                    .push((topic.to_owned(), payload.to_vec()))
            }
        })
        .unwrap();
        node.publish("news/today", b"hi".to_vec(), DeliveryStrategy::AtLeastOnce)
            .unwrap();
        node.publish("sports/today", b"no".to_vec(), DeliveryStrategy::AtLeastOnce)
            .unwrap();

        assert_eq!(
            *received.lock().unwrap(),
            vec![(String::from("news/today"), b"hi".to_vec())]
        );
        assert_eq!(
            node.publish("news/", b"hi".to_vec(), DeliveryStrategy::AtLeastOnce),
            Err(api::Error::InvalidTopic(String::from("news/")))
        );
    }

    #[test]
    fn test_publish_forwarded_to_peer() {
        let mut node = node("alice");
        let (id, portal) = accept(&mut node, "bob");
        let subscribe = Message::from(Subscribe {
            frame: DataFrame::direct(DEFAULT_TTL, &NodeId::from("bob")),
            topic: String::from("t/**"),
        });
        node.process_incoming_packet(id, &Binary.encode(&subscribe).unwrap());
        node.publish("t/1/2", vec![1], DeliveryStrategy::AtMostOnce)
            .unwrap();

        assert_matches!(
            portal.messages().as_slice(),
            [Message::Publish(Publish { frame, topic, .. })]
            if topic == "t/1/2" && frame.traversed == vec![NodeId::from("alice")]
        );
    }

    #[test]
    fn test_loop_terminates_network() {
        let mut node = node("alice");
        let (bob, bob_portal) = accept(&mut node, "bob");
        let (eve, eve_portal) = accept(&mut node, "eve");

        // Came back to us through bob.
        let subscribe = Message::from(Subscribe {
            frame: DataFrame {
                ttl: DEFAULT_TTL,
                traversed: vec![
                    NodeId::from("alice"),
                    NodeId::from("eve"),
                    NodeId::from("bob"),
                ],
            },
            topic: String::from("t"),
        });
        node.process_incoming_packet(bob, &Binary.encode(&subscribe).unwrap());

        assert_eq!(node.edges().count(), 0);
        assert_eq!(node.edge_state(eve), None);

        for portal in [bob_portal, eve_portal] {
            assert_matches!(
                portal.messages().as_slice(),
                [Message::TerminateNetwork(TerminateNetwork { reason: r, .. })]
                if r.starts_with(reason::NETWORK_LOOP)
            );
        }
    }
}
