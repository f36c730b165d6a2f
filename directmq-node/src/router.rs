//! Global router.
//!
//! Fans routing events out to every participant of the node: the native API
//! and each edge. The router doesn't own participants, it only knows their ids
//! and resolves them through [`Participants`] on every call.
pub mod io;

use std::fmt;
use std::sync::Arc;

use log::*;

use directmq::message::{DataFrame, DeliveryStrategy};
use directmq::message::{Publish, Subscribe, TerminateNetwork, Unsubscribe};
use directmq::topic;
use directmq::wire::Codec;

use crate::api::diagnostics::Diagnostics;
use crate::config::Config;
use crate::edge::EdgeId;

pub use io::{Event, Outbox};

/// Identifies a participant of the router.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ParticipantId {
    /// The local application.
    Native,
    /// A link to a peer.
    Edge(EdgeId),
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Native => f.write_str("native"),
            Self::Edge(id) => write!(f, "{id}"),
        }
    }
}

/// What participants get access to while handling an event.
pub struct Context<'a> {
    pub config: &'a Config,
    pub codec: &'a dyn Codec,
    /// Events raised while handling are queued here.
    pub outbox: &'a mut Outbox,
    pub rng: &'a mut fastrand::Rng,
}

/// A routing endpoint inside a node.
pub trait Participant {
    /// Patterns this participant wants to receive.
    fn subscribed_topics(&self) -> Vec<Arc<str>>;
    /// Whether any of our patterns matches the topic.
    fn will_handle(&self, topic: &str) -> bool;
    /// Whether one of our patterns covers the given pattern.
    fn already_handles(&self, pattern: &str) -> bool;
    /// Whether the frame entered the node through this participant.
    fn is_origin(&self, frame: &DataFrame) -> bool;

    /// Returns `true` if the publication was delivered or forwarded.
    fn handle_publish(&mut self, msg: &Publish, ctx: &mut Context<'_>) -> bool;
    fn handle_subscribe(&mut self, msg: &Subscribe, ctx: &mut Context<'_>);
    fn handle_unsubscribe(&mut self, msg: &Unsubscribe, ctx: &mut Context<'_>);
    fn handle_terminate(&mut self, msg: &TerminateNetwork, ctx: &mut Context<'_>);
}

/// Resolves participant ids.
pub trait Participants {
    fn get(&self, id: &ParticipantId) -> Option<&dyn Participant>;
    fn get_mut(&mut self, id: &ParticipantId) -> Option<&mut dyn Participant>;
}

/// The global router.
#[derive(Debug)]
pub struct Router {
    /// Live participants. The native API is always first.
    participants: Vec<ParticipantId>,
    /// Observer, invoked before participants on every event.
    diagnostics: Diagnostics,
}

impl Default for Router {
    fn default() -> Self {
        Self::new(Diagnostics::default())
    }
}

impl Router {
    pub fn new(diagnostics: Diagnostics) -> Self {
        Self {
            participants: vec![ParticipantId::Native],
            diagnostics,
        }
    }

    pub fn add(&mut self, id: ParticipantId) {
        if !self.participants.contains(&id) {
            self.participants.push(id);
        }
    }

    /// Remove a participant. Returns `false` if it wasn't there.
    pub fn remove(&mut self, id: &ParticipantId) -> bool {
        let len = self.participants.len();
        self.participants.retain(|p| p != id);

        self.participants.len() != len
    }

    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn diagnostics(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Offer a publication to participants, in random order.
    ///
    /// With [`DeliveryStrategy::AtMostOnce`], we stop at the first participant
    /// that handles it.
    pub fn published<P: Participants>(
        &mut self,
        msg: &Publish,
        participants: &mut P,
        ctx: &mut Context<'_>,
    ) {
        self.diagnostics.publication(msg);

        let mut order = self.participants.clone();
        ctx.rng.shuffle(&mut order);

        for id in order {
            let Some(participant) = participants.get_mut(&id) else {
                continue;
            };
            let handled = participant.handle_publish(msg, ctx);

            if handled && msg.delivery_strategy == DeliveryStrategy::AtMostOnce {
                trace!(target: "router", "Publication on `{}` handled by {id}", msg.topic);
                return;
            }
        }
    }

    /// Deliver a subscription to all participants.
    ///
    /// If it came from a peer and made other patterns redundant, those patterns
    /// are unsubscribed from participants that don't cover them anymore.
    pub fn subscribed<P: Participants>(
        &mut self,
        msg: &Subscribe,
        participants: &mut P,
        ctx: &mut Context<'_>,
    ) {
        self.diagnostics.subscription(msg);

        let old = self
            .participants
            .iter()
            .filter_map(|id| participants.get(id))
            .filter(|p| !p.is_origin(&msg.frame))
            .flat_map(|p| p.subscribed_topics())
            .collect::<Vec<_>>();

        for id in &self.participants {
            if let Some(participant) = participants.get_mut(id) {
                participant.handle_subscribe(msg, ctx);
            }
        }
        // The native API computes its own diff.
        if msg.frame.is_local() {
            return;
        }
        let new = self.all_subscribed_topics(participants);
        let diff = topic::diff(old, new);

        for pattern in diff.removed {
            debug!(
                target: "router",
                "Pattern `{pattern}` is now covered by `{}`", msg.topic
            );
            let unsubscribe = Unsubscribe {
                frame: msg.frame.clone(),
                topic: pattern.to_string(),
            };
            for id in &self.participants {
                let Some(participant) = participants.get_mut(id) else {
                    continue;
                };
                if participant.already_handles(&pattern) {
                    continue;
                }
                participant.handle_unsubscribe(&unsubscribe, ctx);
            }
        }
    }

    /// Deliver an unsubscription to all participants, unless one of them
    /// still covers the pattern.
    pub fn unsubscribed<P: Participants>(
        &mut self,
        msg: &Unsubscribe,
        participants: &mut P,
        ctx: &mut Context<'_>,
    ) {
        self.diagnostics.unsubscription(msg);

        if let Some(id) = self.participants.iter().find(|id| {
            participants
                .get(id)
                .is_some_and(|p| p.already_handles(&msg.topic))
        }) {
            debug!(
                target: "router",
                "Pattern `{}` is still needed by {id}, not unsubscribing", msg.topic
            );
            return;
        }
        for id in &self.participants {
            if let Some(participant) = participants.get_mut(id) {
                participant.handle_unsubscribe(msg, ctx);
            }
        }
    }

    /// Deliver a network termination to all participants.
    pub fn terminated<P: Participants>(
        &mut self,
        msg: &TerminateNetwork,
        participants: &mut P,
        ctx: &mut Context<'_>,
    ) {
        self.diagnostics.termination(msg);

        warn!(target: "router", "Network terminated: {}", msg.reason);

        for id in &self.participants {
            if let Some(participant) = participants.get_mut(id) {
                participant.handle_terminate(msg, ctx);
            }
        }
    }

    /// Every participant's patterns, without duplicates.
    pub fn all_subscribed_topics<P: Participants>(&self, participants: &P) -> Vec<Arc<str>> {
        let mut topics: Vec<Arc<str>> = Vec::new();

        for topic in self
            .participants
            .iter()
            .filter_map(|id| participants.get(id))
            .flat_map(|p| p.subscribed_topics())
        {
            if !topics.contains(&topic) {
                topics.push(topic);
            }
        }
        topics
    }
}
