//! Diagnostics observer.
//!
//! Read-only hooks into what the node does. Hooks can't influence routing.
use std::fmt;

use directmq::message::{NodeId, Publish, Subscribe, TerminateNetwork, Unsubscribe};

use crate::edge::EdgeId;

type ConnectionHook = Box<dyn FnMut(EdgeId, &NodeId) + Send>;
type DisconnectionHook = Box<dyn FnMut(EdgeId, &NodeId, &str) + Send>;
type MessageHook<T> = Box<dyn FnMut(&T) + Send>;

#[derive(Default)]
pub struct Diagnostics {
    connection_established: Option<ConnectionHook>,
    connection_lost: Option<DisconnectionHook>,
    edge_disconnected: Option<DisconnectionHook>,
    publication: Option<MessageHook<Publish>>,
    subscription: Option<MessageHook<Subscribe>>,
    unsubscription: Option<MessageHook<Unsubscribe>>,
    termination: Option<MessageHook<TerminateNetwork>>,
}

impl fmt::Debug for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Diagnostics")
            .field("connection_established", &self.connection_established.is_some())
            .field("connection_lost", &self.connection_lost.is_some())
            .field("edge_disconnected", &self.edge_disconnected.is_some())
            .field("publication", &self.publication.is_some())
            .field("subscription", &self.subscription.is_some())
            .field("unsubscription", &self.unsubscription.is_some())
            .field("termination", &self.termination.is_some())
            .finish()
    }
}

impl Diagnostics {
    /// Called when an edge completes its handshake.
    pub fn on_connection_established(
        &mut self,
        hook: impl FnMut(EdgeId, &NodeId) + Send + 'static,
    ) -> &mut Self {
        self.connection_established = Some(Box::new(hook));
        self
    }

    /// Called when an edge reaches its final state, with the reason.
    pub fn on_connection_lost(
        &mut self,
        hook: impl FnMut(EdgeId, &NodeId, &str) + Send + 'static,
    ) -> &mut Self {
        self.connection_lost = Some(Box::new(hook));
        self
    }

    /// Called once the node has forgotten about an edge.
    pub fn on_edge_disconnected(
        &mut self,
        hook: impl FnMut(EdgeId, &NodeId, &str) + Send + 'static,
    ) -> &mut Self {
        self.edge_disconnected = Some(Box::new(hook));
        self
    }

    /// Called for every publication routed by the node.
    pub fn on_publication(&mut self, hook: impl FnMut(&Publish) + Send + 'static) -> &mut Self {
        self.publication = Some(Box::new(hook));
        self
    }

    pub fn on_subscription(
        &mut self,
        hook: impl FnMut(&Subscribe) + Send + 'static,
    ) -> &mut Self {
        self.subscription = Some(Box::new(hook));
        self
    }

    pub fn on_unsubscription(
        &mut self,
        hook: impl FnMut(&Unsubscribe) + Send + 'static,
    ) -> &mut Self {
        self.unsubscription = Some(Box::new(hook));
        self
    }

    pub fn on_termination(
        &mut self,
        hook: impl FnMut(&TerminateNetwork) + Send + 'static,
    ) -> &mut Self {
        self.termination = Some(Box::new(hook));
        self
    }

    pub(crate) fn connection_established(&mut self, edge: EdgeId, peer: &NodeId) {
        if let Some(hook) = &mut self.connection_established {
            hook(edge, peer);
        }
    }

    pub(crate) fn connection_lost(&mut self, edge: EdgeId, peer: &NodeId, reason: &str) {
        if let Some(hook) = &mut self.connection_lost {
            hook(edge, peer, reason);
        }
    }

    pub(crate) fn edge_disconnected(&mut self, edge: EdgeId, peer: &NodeId, reason: &str) {
        if let Some(hook) = &mut self.edge_disconnected {
            hook(edge, peer, reason);
        }
    }

    pub(crate) fn publication(&mut self, msg: &Publish) {
        if let Some(hook) = &mut self.publication {
            hook(msg);
        }
    }

    pub(crate) fn subscription(&mut self, msg: &Subscribe) {
        if let Some(hook) = &mut self.subscription {
            hook(msg);
        }
    }

    pub(crate) fn unsubscription(&mut self, msg: &Unsubscribe) {
        if let Some(hook) = &mut self.unsubscription {
            hook(msg);
        }
    }

    pub(crate) fn termination(&mut self, msg: &TerminateNetwork) {
        if let Some(hook) = &mut self.termination {
            hook(msg);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use pretty_assertions::assert_eq;

    use directmq::message::DataFrame;

    #[test]
    fn test_hooks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut diagnostics = Diagnostics::default();

        // Nothing happens without hooks.
        diagnostics.connection_established(EdgeId::from(1), &NodeId::from("alice"));

        diagnostics
            .on_connection_lost({
                let seen = seen.clone();
                move |edge, peer, reason| {
                    seen.lock().unwrap().push(format!("lost {edge} {peer} {reason}"));
                }
            })
            .on_subscription({
                let seen = seen.clone();
                move |msg| seen.lock().unwrap().push(format!("sub {}", msg.topic))
            });

        diagnostics.connection_lost(EdgeId::from(7), &NodeId::from("bob"), "gone");
        diagnostics.subscription(&Subscribe {
            frame: DataFrame::local(1),
            topic: String::from("a/*"),
        });
        diagnostics.unsubscription(&Unsubscribe {
            frame: DataFrame::local(1),
            topic: String::from("a/*"),
        });

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["lost edge#7 bob gone".to_owned(), "sub a/*".to_owned()]
        );
    }
}
