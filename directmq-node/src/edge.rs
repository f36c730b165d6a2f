//! Edge state machine.
//!
//! An edge is a link to exactly one peer node. It negotiates the protocol,
//! relays routing events between the peer and the rest of the node, and tears
//! itself down when anything goes wrong.
//!
//! ```text
//!   connecting ──> connected ──> disconnecting ──> disconnected
//!        │              │                              ^
//!        └──────────────┴──────────────────────────────┘
//! ```
mod connected;
mod connecting;
mod disconnected;
mod disconnecting;

use std::sync::Arc;
use std::{fmt, io};

use log::*;

use directmq::message::*;
use directmq::wire;

use crate::portal::Portal;
use crate::router::{Context, Participant};
use crate::subscription::SubscriptionList;

/// Reasons an edge gives when closing.
pub mod reason {
    pub const NO_PROTOCOL_VERSIONS: &str = "No supported protocol versions received";
    pub const NO_MATCHING_PROTOCOL_VERSION: &str = "No supported protocol versions match";
    pub const MISSING_NEGOTIATION: &str = "Unknown protocol version, missing protocol negotiation";
    pub const UNEXPECTED_TRAVERSED: &str =
        "Unexpected number of traversed nodes in init connection message";
    pub const MALFORMED: &str = "Malformed message received";
    pub const NETWORK_TERMINATED: &str = "Network terminated";
    pub const NETWORK_LOOP: &str = "Network loop detected";
}

/// Identifies an edge within a node.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(u64);

impl EdgeId {
    /// The id following this one.
    pub fn next(self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl From<u64> for EdgeId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for EdgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "edge#{}", self.0)
    }
}

/// Error writing to the peer.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("encoding failed: {0}")]
    Encode(#[from] wire::Error),
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
}

/// What we know about the peer.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EdgeInfo {
    /// Peer id. Empty until the handshake completes.
    pub peer: NodeId,
    /// Largest payload the peer accepts. Zero means no limit.
    pub max_message_size: u64,
    /// Versions the peer told us it speaks.
    pub versions: Vec<ProtocolVersion>,
    /// Version both sides agreed on.
    pub version: ProtocolVersion,
}

impl EdgeInfo {
    fn is_negotiated(&self) -> bool {
        self.version != UNKNOWN_PROTOCOL_VERSION
    }
}

/// Edge state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum State {
    /// Handshake in progress.
    Connecting {
        /// Whether we opened the handshake.
        initiator: bool,
    },
    /// Routing messages.
    Connected,
    /// Telling the peer we're leaving.
    Disconnecting { reason: String },
    /// Final state.
    Disconnected { reason: String },
}

impl State {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    /// Whether the edge is on its way out.
    pub fn is_closing(&self) -> bool {
        matches!(self, Self::Disconnecting { .. } | Self::Disconnected { .. })
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connecting { initiator: true } => f.write_str("connecting (initiator)"),
            Self::Connecting { initiator: false } => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Disconnecting { .. } => f.write_str("disconnecting"),
            Self::Disconnected { .. } => f.write_str("disconnected"),
        }
    }
}

/// A link to a peer.
#[derive(Debug)]
pub struct Edge<P> {
    id: EdgeId,
    portal: P,
    info: EdgeInfo,
    /// Patterns the peer subscribed to.
    registry: SubscriptionList<()>,
    state: State,
}

impl<P: Portal> Edge<P> {
    /// Create an edge. Nothing is sent until [`Edge::initialize`] is called.
    pub fn new(id: EdgeId, portal: P, initiator: bool, rng: fastrand::Rng) -> Self {
        Self {
            id,
            portal,
            info: EdgeInfo::default(),
            registry: SubscriptionList::new(rng),
            state: State::Connecting { initiator },
        }
    }

    /// Run the entry logic of the initial state.
    pub fn initialize(&mut self, ctx: &mut Context<'_>) {
        debug!(target: "edge", "{}: Initializing as {}", self.id, self.state);
        self.enter(ctx);
    }

    pub fn id(&self) -> EdgeId {
        self.id
    }

    pub fn state(&self) -> &State {
        &self.state
    }

    pub fn info(&self) -> &EdgeInfo {
        &self.info
    }

    /// The peer id. Empty unless connected.
    pub fn peer(&self) -> &NodeId {
        &self.info.peer
    }

    pub fn portal(&self) -> &P {
        &self.portal
    }

    /// Decode and handle a packet received from the peer.
    pub fn process_packet(&mut self, bytes: &[u8], ctx: &mut Context<'_>) {
        let msg = ctx.codec.decode(bytes);
        self.received(msg, ctx);
    }

    /// Handle a message received from the peer.
    pub fn received(&mut self, msg: Message, ctx: &mut Context<'_>) {
        trace!(target: "edge", "{}: Received {msg} in state {}", self.id, self.state);

        match self.state {
            State::Connecting { .. } => self.connecting_received(msg, ctx),
            State::Connected => self.connected_received(msg, ctx),
            State::Disconnecting { .. } | State::Disconnected { .. } => {
                trace!(target: "edge", "{}: Dropping {msg}, edge is closing", self.id);
            }
        }
    }

    /// Start closing the edge. Does nothing if it's already closing.
    pub fn disconnect(&mut self, reason: impl ToString, ctx: &mut Context<'_>) {
        if self.state.is_closing() {
            return;
        }
        self.transition(
            State::Disconnecting {
                reason: reason.to_string(),
            },
            ctx,
        );
    }

    /// Tell the peer about every pattern the node is interested in. Only
    /// connected edges do this.
    pub fn advertise(&mut self, topics: &[Arc<str>], ctx: &mut Context<'_>) {
        if self.state.is_connected() {
            self.connected_advertise(topics, ctx);
        }
    }

    fn transition(&mut self, state: State, ctx: &mut Context<'_>) {
        debug!(target: "edge", "{}: {} -> {}", self.id, self.state, state);

        self.state = state;
        self.enter(ctx);
    }

    fn enter(&mut self, ctx: &mut Context<'_>) {
        match self.state.clone() {
            State::Connecting { initiator } => self.connecting_entered(initiator, ctx),
            State::Connected => self.connected_entered(ctx),
            State::Disconnecting { reason } => self.disconnecting_entered(reason, ctx),
            State::Disconnected { reason } => self.disconnected_entered(reason, ctx),
        }
    }

    fn write(&mut self, msg: impl Into<Message>, ctx: &Context<'_>) -> Result<(), Error> {
        let msg = msg.into();
        let bytes = ctx.codec.encode(&msg)?;

        trace!(target: "edge", "{}: Write {msg} ({} byte(s))", self.id, bytes.len());

        self.portal.write_packet(&bytes)?;

        Ok(())
    }

    /// Whether a stamped frame may go on to the peer. A looped frame never
    /// does: the network is terminated instead.
    fn should_forward(&self, frame: &DataFrame, ctx: &mut Context<'_>) -> bool {
        if frame.is_looped() {
            let reason = format!("{}: {}", reason::NETWORK_LOOP, frame.path());

            error!(target: "edge", "{}: {reason}", self.id);

            ctx.outbox.terminated(TerminateNetwork {
                frame: frame.clone(),
                reason,
            });
            return false;
        }
        if frame.ttl <= 0 {
            trace!(target: "edge", "{}: Frame TTL exhausted, not forwarding", self.id);
            return false;
        }
        true
    }
}

impl<P: Portal> Participant for Edge<P> {
    fn subscribed_topics(&self) -> Vec<Arc<str>> {
        if self.state.is_connected() {
            self.registry.top_level_topics()
        } else {
            Vec::new()
        }
    }

    fn will_handle(&self, topic: &str) -> bool {
        self.state.is_connected() && self.registry.will_handle(topic)
    }

    fn already_handles(&self, pattern: &str) -> bool {
        self.state.is_connected() && self.registry.already_handles(pattern)
    }

    fn is_origin(&self, frame: &DataFrame) -> bool {
        !self.info.peer.is_empty() && frame.last() == Some(&self.info.peer)
    }

    fn handle_publish(&mut self, msg: &Publish, ctx: &mut Context<'_>) -> bool {
        match self.state {
            State::Connected => self.connected_publish(msg, ctx),
            _ => false,
        }
    }

    fn handle_subscribe(&mut self, msg: &Subscribe, ctx: &mut Context<'_>) {
        if self.state.is_connected() {
            self.connected_subscribe(msg, ctx);
        }
    }

    fn handle_unsubscribe(&mut self, msg: &Unsubscribe, ctx: &mut Context<'_>) {
        if self.state.is_connected() {
            self.connected_unsubscribe(msg, ctx);
        }
    }

    fn handle_terminate(&mut self, msg: &TerminateNetwork, ctx: &mut Context<'_>) {
        match self.state {
            State::Connecting { .. } => {
                self.disconnect(format!("{}: {}", reason::NETWORK_TERMINATED, msg.reason), ctx)
            }
            State::Connected => self.connected_terminate(msg, ctx),
            State::Disconnecting { .. } | State::Disconnected { .. } => {}
        }
    }
}
