use std::sync::Arc;

use log::*;

use directmq::message::*;
use directmq::topic;

use crate::portal::Portal;
use crate::router::{Context, Participant};

use super::{reason, Edge};

impl<P: Portal> Edge<P> {
    pub(super) fn connected_entered(&mut self, ctx: &mut Context<'_>) {
        info!(target: "edge", "{}: Connection established with {}", self.id, self.info.peer);

        // Advertising needs the whole node's topics, so the node does it.
        ctx.outbox.established(self.id);
    }

    pub(super) fn connected_advertise(&mut self, topics: &[Arc<str>], ctx: &mut Context<'_>) {
        for pattern in topics {
            let msg = Subscribe {
                frame: DataFrame::direct(ctx.config.ttl, &ctx.config.host_id),
                topic: pattern.to_string(),
            };
            if let Err(e) = self.write(msg, ctx) {
                self.disconnect(format!("Failed to exchange subscriptions: {e}"), ctx);
                return;
            }
        }
    }

    pub(super) fn connected_publish(&mut self, msg: &Publish, ctx: &mut Context<'_>) -> bool {
        if self.is_origin(&msg.frame) || !self.registry.will_handle(&msg.topic) {
            return false;
        }
        let frame = msg.frame.clone().stamp(&ctx.config.host_id);
        if !self.should_forward(&frame, ctx) {
            return false;
        }
        let max = self.info.max_message_size;
        if max != NO_MAX_SIZE && msg.payload.len() as u64 > max {
            debug!(
                target: "edge",
                "{}: Publication on `{}` exceeds peer limit ({} > {max})",
                self.id, msg.topic, msg.payload.len()
            );
            return false;
        }
        let publish = Publish {
            frame,
            topic: msg.topic.clone(),
            delivery_strategy: msg.delivery_strategy,
            payload: msg.payload.clone(),
        };
        if let Err(e) = self.write(publish, ctx) {
            warn!(target: "edge", "{}: Failed to publish on `{}`: {e}", self.id, msg.topic);
            self.disconnect(format!("Failed to publish message: {e}"), ctx);
            return false;
        }
        true
    }

    pub(super) fn connected_subscribe(&mut self, msg: &Subscribe, ctx: &mut Context<'_>) {
        if self.is_origin(&msg.frame) {
            return;
        }
        let frame = msg.frame.clone().stamp(&ctx.config.host_id);
        if !self.should_forward(&frame, ctx) {
            return;
        }
        let subscribe = Subscribe {
            frame,
            topic: msg.topic.clone(),
        };
        if let Err(e) = self.write(subscribe, ctx) {
            self.disconnect(format!("Failed to subscribe: {e}"), ctx);
        }
    }

    pub(super) fn connected_unsubscribe(&mut self, msg: &Unsubscribe, ctx: &mut Context<'_>) {
        if self.is_origin(&msg.frame) {
            return;
        }
        let frame = msg.frame.clone().stamp(&ctx.config.host_id);
        if !self.should_forward(&frame, ctx) {
            return;
        }
        let unsubscribe = Unsubscribe {
            frame,
            topic: msg.topic.clone(),
        };
        if let Err(e) = self.write(unsubscribe, ctx) {
            self.disconnect(format!("Failed to unsubscribe: {e}"), ctx);
        }
    }

    /// Pass the termination on to the peer and leave.
    pub(super) fn connected_terminate(&mut self, msg: &TerminateNetwork, ctx: &mut Context<'_>) {
        let mut frame = msg.frame.clone().stamp(&ctx.config.host_id);
        frame.ttl = DIRECT_ONLY_TTL;

        let terminate = TerminateNetwork {
            frame,
            reason: msg.reason.clone(),
        };
        if let Err(e) = self.write(terminate, ctx) {
            self.disconnect(format!("Failed to terminate network: {e}"), ctx);
            return;
        }
        self.closed(&msg.reason, ctx);
    }

    pub(super) fn connected_received(&mut self, msg: Message, ctx: &mut Context<'_>) {
        match msg {
            Message::SupportedProtocolVersions(_)
            | Message::InitConnection(_)
            | Message::ConnectionAccepted(_) => {
                let reason = format!("Unexpected {} message in connected state", msg.name());
                warn!(target: "edge", "{}: {reason}", self.id);

                self.disconnect(reason, ctx);
            }
            Message::GracefullyClose(msg) => {
                debug!(target: "edge", "{}: Peer is leaving: {}", self.id, msg.reason);
                self.closed(msg.reason, ctx);
            }
            Message::TerminateNetwork(msg) => {
                self.closed(&msg.reason, ctx);
                ctx.outbox.terminated(msg);
            }
            Message::Publish(msg) => ctx.outbox.published(msg),
            Message::Subscribe(msg) => self.peer_subscribed(msg, ctx),
            Message::Unsubscribe(msg) => self.peer_unsubscribed(msg, ctx),
            Message::Malformed(malformed) => {
                warn!(
                    target: "edge",
                    "{}: Malformed message from {}: {}", self.id, self.info.peer, malformed.error
                );
                self.disconnect(reason::MALFORMED, ctx);
            }
        }
    }

    fn peer_subscribed(&mut self, msg: Subscribe, ctx: &mut Context<'_>) {
        let old = self.registry.top_level_topics();

        if self.registry.add(msg.topic.as_str(), ()).is_none() {
            error!(target: "edge", "{}: Subscription ids exhausted", self.id);
            return;
        }
        let new = self.registry.top_level_topics();

        self.propagate(topic::diff(old, new), &msg.frame, ctx);
    }

    fn peer_unsubscribed(&mut self, msg: Unsubscribe, ctx: &mut Context<'_>) {
        let Some(id) = self.registry.find(&msg.topic).map(|s| s.id) else {
            trace!(target: "edge", "{}: Peer wasn't subscribed to `{}`", self.id, msg.topic);
            return;
        };
        let old = self.registry.top_level_topics();
        self.registry.remove(id);
        let new = self.registry.top_level_topics();

        self.propagate(topic::diff(old, new), &msg.frame, ctx);
    }

    /// Feed changes to the peer's top-level patterns into the router.
    fn propagate(&self, diff: topic::Diff<Arc<str>>, frame: &DataFrame, ctx: &mut Context<'_>) {
        if !diff.is_empty() {
            debug!(target: "edge", "{}: Peer subscriptions changed: {diff}", self.id);
        }
        for pattern in diff.added {
            ctx.outbox.subscribed(Subscribe {
                frame: frame.clone(),
                topic: pattern.to_string(),
            });
        }
        for pattern in diff.removed {
            ctx.outbox.unsubscribed(Unsubscribe {
                frame: frame.clone(),
                topic: pattern.to_string(),
            });
        }
    }
}
