use log::*;

use directmq::message::{DataFrame, Unsubscribe};

use crate::portal::Portal;
use crate::router::Context;

use super::{Edge, EdgeInfo};

impl<P: Portal> Edge<P> {
    /// Close the transport and revoke everything the peer subscribed to.
    pub(super) fn disconnected_entered(&mut self, reason: String, ctx: &mut Context<'_>) {
        info!(
            target: "edge",
            "{}: Disconnected from {:?}: {reason}", self.id, self.info.peer.as_str()
        );

        self.portal.close();

        let peer = self.info.peer.clone();
        let topics = self.registry.top_level_topics();

        ctx.outbox.lost(self.id, peer.clone(), reason);

        for pattern in topics {
            ctx.outbox.unsubscribed(Unsubscribe {
                frame: DataFrame {
                    ttl: ctx.config.ttl,
                    traversed: vec![peer.clone(), ctx.config.host_id.clone()],
                },
                topic: pattern.to_string(),
            });
        }
        self.registry.clear();
        self.info = EdgeInfo::default();
    }
}
