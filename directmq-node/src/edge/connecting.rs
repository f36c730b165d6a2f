use log::*;

use directmq::message::*;

use crate::portal::Portal;
use crate::router::Context;

use super::{reason, Edge, State};

impl<P: Portal> Edge<P> {
    pub(super) fn connecting_entered(&mut self, initiator: bool, ctx: &mut Context<'_>) {
        if !initiator {
            return;
        }
        let hello = SupportedProtocolVersions {
            frame: DataFrame::direct(DIRECT_WITH_RESPONSE_TTL, &ctx.config.host_id),
            versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
        };
        if let Err(e) = self.write(hello, ctx) {
            self.closed(format!("Supported protocol version negotiation failed: {e}"), ctx);
        }
    }

    pub(super) fn connecting_received(&mut self, msg: Message, ctx: &mut Context<'_>) {
        match msg {
            Message::SupportedProtocolVersions(msg) => self.negotiate(msg, ctx),
            Message::InitConnection(msg) => {
                if self.accept_peer(&msg.frame, msg.max_message_size, ctx) {
                    let accepted = ConnectionAccepted {
                        frame: DataFrame::direct(DIRECT_ONLY_TTL, &ctx.config.host_id),
                        max_message_size: ctx.config.max_incoming_message_size,
                    };
                    if let Err(e) = self.write(accepted, ctx) {
                        self.closed(format!("Connection acceptance failed: {e}"), ctx);
                        return;
                    }
                    self.transition(State::Connected, ctx);
                }
            }
            Message::ConnectionAccepted(msg) => {
                if self.accept_peer(&msg.frame, msg.max_message_size, ctx) {
                    self.transition(State::Connected, ctx);
                }
            }
            Message::GracefullyClose(msg) => self.closed(msg.reason, ctx),
            Message::TerminateNetwork(msg) => {
                // The router tells every edge, including this one.
                ctx.outbox.terminated(msg);
            }
            Message::Publish(_) | Message::Subscribe(_) | Message::Unsubscribe(_) => {
                let reason = format!(
                    "Unexpected {} message received during connection process",
                    msg.name()
                );
                warn!(target: "edge", "{}: {reason}", self.id);

                self.disconnect(reason, ctx);
            }
            Message::Malformed(malformed) => {
                warn!(
                    target: "edge",
                    "{}: Malformed message during handshake: {}", self.id, malformed.error
                );
                self.disconnect(
                    format!("{} during connection process", reason::MALFORMED),
                    ctx,
                );
            }
        }
    }

    fn negotiate(&mut self, msg: SupportedProtocolVersions, ctx: &mut Context<'_>) {
        if msg.versions.is_empty() {
            self.closed(reason::NO_PROTOCOL_VERSIONS, ctx);
            return;
        }
        let Some(version) = msg
            .versions
            .iter()
            .copied()
            .find(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
        else {
            self.closed(reason::NO_MATCHING_PROTOCOL_VERSION, ctx);
            return;
        };
        debug!(target: "edge", "{}: Negotiated protocol version {version}", self.id);

        self.info.versions = msg.versions;
        self.info.version = version;

        let result = if msg.frame.ttl == DIRECT_WITH_RESPONSE_TTL {
            let mut frame = DataFrame {
                ttl: DIRECT_ONLY_TTL,
                traversed: msg.frame.traversed,
            };
            frame.traversed.push(ctx.config.host_id.clone());

            self.write(
                SupportedProtocolVersions {
                    frame,
                    versions: SUPPORTED_PROTOCOL_VERSIONS.to_vec(),
                },
                ctx,
            )
        } else {
            self.write(
                InitConnection {
                    frame: DataFrame::direct(DIRECT_ONLY_TTL, &ctx.config.host_id),
                    max_message_size: ctx.config.max_incoming_message_size,
                },
                ctx,
            )
        };
        if let Err(e) = result {
            self.closed(format!("Connection initialization failed: {e}"), ctx);
        }
    }

    /// Check a handshake frame and record the peer. Returns `false` if the
    /// edge is being closed.
    fn accept_peer(
        &mut self,
        frame: &DataFrame,
        max_message_size: u64,
        ctx: &mut Context<'_>,
    ) -> bool {
        if !self.info.is_negotiated() {
            warn!(target: "edge", "{}: Handshake before version negotiation", self.id);
            self.disconnect(reason::MISSING_NEGOTIATION, ctx);
            return false;
        }
        let [peer] = frame.traversed.as_slice() else {
            warn!(
                target: "edge",
                "{}: Handshake frame went through {} node(s)", self.id, frame.traversed.len()
            );
            self.disconnect(reason::UNEXPECTED_TRAVERSED, ctx);
            return false;
        };
        debug!(target: "edge", "{}: Connected to {peer}", self.id);

        self.info.peer = peer.clone();
        self.info.max_message_size = max_message_size;

        true
    }

    /// Move straight to the final state.
    pub(super) fn closed(&mut self, reason: impl ToString, ctx: &mut Context<'_>) {
        self.transition(
            State::Disconnected {
                reason: reason.to_string(),
            },
            ctx,
        );
    }
}
