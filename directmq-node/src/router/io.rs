use std::collections::VecDeque;

use log::*;

use directmq::message::{NodeId, Publish, Subscribe, TerminateNetwork, Unsubscribe};

use crate::edge::EdgeId;

/// Routing event, queued by participants and handled by the node once the
/// current call returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// A publication entered the node.
    Published(Publish),
    /// A pattern became top-level at one of the participants.
    Subscribed(Subscribe),
    /// A pattern stopped being top-level at one of the participants.
    Unsubscribed(Unsubscribe),
    /// The network is shutting down.
    Terminated(TerminateNetwork),
    /// An edge completed its handshake.
    Established(EdgeId),
    /// An edge is gone for good.
    Lost {
        edge: EdgeId,
        peer: NodeId,
        reason: String,
    },
}

/// Queue of routing events.
#[derive(Debug, Default)]
pub struct Outbox {
    events: VecDeque<Event>,
}

impl Outbox {
    pub fn published(&mut self, msg: Publish) {
        trace!(target: "router", "Queued publication on `{}`", msg.topic);
        self.events.push_back(Event::Published(msg));
    }

    pub fn subscribed(&mut self, msg: Subscribe) {
        trace!(target: "router", "Queued subscription to `{}`", msg.topic);
        self.events.push_back(Event::Subscribed(msg));
    }

    pub fn unsubscribed(&mut self, msg: Unsubscribe) {
        trace!(target: "router", "Queued unsubscription from `{}`", msg.topic);
        self.events.push_back(Event::Unsubscribed(msg));
    }

    pub fn terminated(&mut self, msg: TerminateNetwork) {
        self.events.push_back(Event::Terminated(msg));
    }

    pub fn established(&mut self, edge: EdgeId) {
        self.events.push_back(Event::Established(edge));
    }

    pub fn lost(&mut self, edge: EdgeId, peer: NodeId, reason: impl ToString) {
        self.events.push_back(Event::Lost {
            edge,
            peer,
            reason: reason.to_string(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

impl Iterator for Outbox {
    type Item = Event;

    fn next(&mut self) -> Option<Self::Item> {
        self.events.pop_front()
    }
}
