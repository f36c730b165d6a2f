use log::*;

use directmq::message::{DataFrame, GracefullyClose, DIRECT_ONLY_TTL};

use crate::portal::Portal;
use crate::router::Context;

use super::Edge;

impl<P: Portal> Edge<P> {
    /// Say goodbye, then close for good. Errors don't matter at this point.
    pub(super) fn disconnecting_entered(&mut self, reason: String, ctx: &mut Context<'_>) {
        let goodbye = GracefullyClose {
            frame: DataFrame::direct(DIRECT_ONLY_TTL, &ctx.config.host_id),
            reason: reason.clone(),
        };
        if let Err(e) = self.write(goodbye, ctx) {
            debug!(target: "edge", "{}: Failed to say goodbye: {e}", self.id);
        }
        self.closed(reason, ctx);
    }
}
