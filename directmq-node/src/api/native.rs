//! Native publish/subscribe API.
//!
//! This is how the application running the node takes part in routing. Its
//! messages carry a frame with an empty path.
use std::fmt;
use std::sync::Arc;

use log::*;

use directmq::message::*;
use directmq::topic;

use crate::router::{Context, Participant};
use crate::subscription::{SubscriptionId, SubscriptionList};

use super::Error;

/// Called with the topic and payload of every matching publication.
pub type Handler = Box<dyn FnMut(&str, &[u8]) + Send>;

/// The local application's participant.
pub struct Native {
    subscriptions: SubscriptionList<Handler>,
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let patterns = self
            .subscriptions
            .iter()
            .map(|s| (s.id, s.pattern.clone()))
            .collect::<Vec<_>>();

        f.debug_struct("Native")
            .field("subscriptions", &patterns)
            .finish()
    }
}

impl Native {
    pub fn new(rng: fastrand::Rng) -> Self {
        Self {
            subscriptions: SubscriptionList::new(rng),
        }
    }

    /// Publish a message to the network.
    pub fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        delivery_strategy: DeliveryStrategy,
        ctx: &mut Context<'_>,
    ) -> Result<(), Error> {
        if !topic::is_valid_pattern(topic) {
            return Err(Error::InvalidTopic(topic.to_owned()));
        }
        if payload.is_empty() {
            return Err(Error::EmptyPayload);
        }
        debug!(
            target: "api",
            "Publishing {} byte(s) on `{topic}` ({delivery_strategy})", payload.len()
        );
        ctx.outbox.published(Publish {
            frame: DataFrame::local(ctx.config.ttl),
            topic: topic.to_owned(),
            delivery_strategy,
            payload,
        });
        Ok(())
    }

    /// Subscribe to a pattern. The handler is called for every matching
    /// publication until [`Native::unsubscribe`] is called with the returned id.
    pub fn subscribe(
        &mut self,
        pattern: &str,
        handler: impl FnMut(&str, &[u8]) + Send + 'static,
        ctx: &mut Context<'_>,
    ) -> Result<SubscriptionId, Error> {
        if !topic::is_valid_pattern(pattern) {
            return Err(Error::InvalidTopic(pattern.to_owned()));
        }
        let old = self.subscriptions.top_level_topics();
        let id = self
            .subscriptions
            .add(pattern, Box::new(handler))
            .ok_or(Error::IdsExhausted)?;

        debug!(target: "api", "Subscribed to `{pattern}` with id {id}");

        self.sync(old, ctx);

        Ok(id)
    }

    /// Remove a subscription. Unknown ids are ignored.
    pub fn unsubscribe(&mut self, id: SubscriptionId, ctx: &mut Context<'_>) {
        let old = self.subscriptions.top_level_topics();

        if let Some(s) = self.subscriptions.remove(id) {
            debug!(target: "api", "Unsubscribed from `{}` ({id})", s.pattern);
        }
        self.sync(old, ctx);
    }

    /// Announce changes to our top-level patterns.
    fn sync(&self, old: Vec<Arc<str>>, ctx: &mut Context<'_>) {
        let diff = topic::diff(old, self.subscriptions.top_level_topics());

        for pattern in diff.added {
            ctx.outbox.subscribed(Subscribe {
                frame: DataFrame::local(ctx.config.ttl),
                topic: pattern.to_string(),
            });
        }
        for pattern in diff.removed {
            ctx.outbox.unsubscribed(Unsubscribe {
                frame: DataFrame::local(ctx.config.ttl),
                topic: pattern.to_string(),
            });
        }
    }
}

impl Participant for Native {
    fn subscribed_topics(&self) -> Vec<Arc<str>> {
        self.subscriptions.top_level_topics()
    }

    fn will_handle(&self, topic: &str) -> bool {
        self.subscriptions.will_handle(topic)
    }

    fn already_handles(&self, pattern: &str) -> bool {
        self.subscriptions.already_handles(pattern)
    }

    fn is_origin(&self, frame: &DataFrame) -> bool {
        frame.is_local()
    }

    /// Local publications are delivered to local subscribers too.
    fn handle_publish(&mut self, msg: &Publish, ctx: &mut Context<'_>) -> bool {
        let mut subscribers = self.subscriptions.triggered_mut(&msg.topic);
        if subscribers.is_empty() {
            return false;
        }
        ctx.rng.shuffle(&mut subscribers);

        if msg.delivery_strategy == DeliveryStrategy::AtMostOnce {
            subscribers.truncate(1);
        }
        for s in subscribers {
            trace!(target: "api", "Delivering `{}` to subscription {}", msg.topic, s.id);
            (s.handler)(&msg.topic, &msg.payload);
        }
        true
    }

    fn handle_subscribe(&mut self, _msg: &Subscribe, _ctx: &mut Context<'_>) {}

    fn handle_unsubscribe(&mut self, _msg: &Unsubscribe, _ctx: &mut Context<'_>) {}

    fn handle_terminate(&mut self, _msg: &TerminateNetwork, _ctx: &mut Context<'_>) {}
}
