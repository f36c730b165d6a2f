use std::ops::Deref;
use std::{fmt, str};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Hop budget of a message.
pub type Ttl = i32;
/// Protocol version number.
pub type ProtocolVersion = u32;

/// Default hop budget of messages originating at a node.
pub const DEFAULT_TTL: Ttl = 32;
/// Hop budget of messages that must only reach the direct peer.
pub const DIRECT_ONLY_TTL: Ttl = 1;
/// Hop budget of messages the direct peer should reply to once.
pub const DIRECT_WITH_RESPONSE_TTL: Ttl = 2;
/// Max message size meaning "unlimited".
pub const NO_MAX_SIZE: u64 = 0;
/// Protocol version of an edge that didn't negotiate one yet.
pub const UNKNOWN_PROTOCOL_VERSION: ProtocolVersion = 0;
/// Current protocol version.
pub const PROTOCOL_VERSION: ProtocolVersion = 1;
/// Protocol versions this implementation can speak.
pub const SUPPORTED_PROTOCOL_VERSIONS: &[ProtocolVersion] = &[PROTOCOL_VERSION];

/// Identifies a node on the network.
#[derive(Debug, Default, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    /// Whether this id is unset, eg. on an edge which isn't connected.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Deref for NodeId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.0.as_str()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for NodeId {
    fn from(other: String) -> Self {
        Self(other)
    }
}

impl From<&str> for NodeId {
    fn from(other: &str) -> Self {
        Self(other.to_owned())
    }
}

impl str::FromStr for NodeId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::from(s))
    }
}

impl PartialEq<str> for NodeId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

/// Envelope carried by every protocol message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Remaining hop budget.
    pub ttl: Ttl,
    /// Nodes the message went through, oldest first.
    pub traversed: Vec<NodeId>,
}

impl DataFrame {
    /// A frame created by the local application. Its path is empty.
    pub fn local(ttl: Ttl) -> Self {
        Self {
            ttl,
            traversed: Vec::new(),
        }
    }

    /// A frame sent by `host` directly to its peer.
    pub fn direct(ttl: Ttl, host: &NodeId) -> Self {
        Self {
            ttl,
            traversed: vec![host.clone()],
        }
    }

    /// Whether the frame was created by the local application.
    pub fn is_local(&self) -> bool {
        self.traversed.is_empty()
    }

    /// The last node the frame went through.
    pub fn last(&self) -> Option<&NodeId> {
        self.traversed.last()
    }

    /// Whether any node appears more than once in the path.
    pub fn is_looped(&self) -> bool {
        self.traversed
            .iter()
            .enumerate()
            .any(|(i, id)| self.traversed[..i].contains(id))
    }

    /// Record that the frame passed through `host`, spending one hop.
    ///
    /// If the frame already ends with `host`, it is returned as is.
    pub fn stamp(mut self, host: &NodeId) -> Self {
        if self.last() == Some(host) {
            return self;
        }
        self.traversed.push(host.clone());
        self.ttl = self.ttl.saturating_sub(1);
        self
    }

    /// Human-readable path, eg. `A -> B -> C`.
    pub fn path(&self) -> String {
        self.traversed
            .iter()
            .map(NodeId::as_str)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

/// How many subscribers a publication is delivered to.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[repr(u8)]
pub enum DeliveryStrategy {
    /// Every matching subscriber.
    #[default]
    AtLeastOnce = 0,
    /// Exactly one matching subscriber, picked at random.
    AtMostOnce = 1,
}

impl From<DeliveryStrategy> for u8 {
    fn from(other: DeliveryStrategy) -> Self {
        other as u8
    }
}

impl TryFrom<u8> for DeliveryStrategy {
    type Error = u8;

    fn try_from(other: u8) -> Result<Self, Self::Error> {
        match other {
            0 => Ok(Self::AtLeastOnce),
            1 => Ok(Self::AtMostOnce),
            _ => Err(other),
        }
    }
}

/// Error parsing a delivery strategy.
#[derive(Error, Debug)]
#[error("invalid delivery strategy `{0}`, expected `at-least-once` or `at-most-once`")]
pub struct DeliveryStrategyParseError(String);

impl str::FromStr for DeliveryStrategy {
    type Err = DeliveryStrategyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "at-least-once" => Ok(Self::AtLeastOnce),
            "at-most-once" => Ok(Self::AtMostOnce),
            _ => Err(DeliveryStrategyParseError(s.to_owned())),
        }
    }
}

impl fmt::Display for DeliveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AtLeastOnce => f.write_str("at-least-once"),
            Self::AtMostOnce => f.write_str("at-most-once"),
        }
    }
}

/// Opens the handshake: the protocol versions the sender speaks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupportedProtocolVersions {
    pub frame: DataFrame,
    pub versions: Vec<ProtocolVersion>,
}

/// Sent once versions are agreed on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitConnection {
    pub frame: DataFrame,
    /// Largest publication payload the sender accepts. Zero means no limit.
    pub max_message_size: u64,
}

/// Reply to [`InitConnection`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionAccepted {
    pub frame: DataFrame,
    pub max_message_size: u64,
}

/// The sender is closing the link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GracefullyClose {
    pub frame: DataFrame,
    pub reason: String,
}

/// The whole network is shutting down, eg. because a loop was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminateNetwork {
    pub frame: DataFrame,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub frame: DataFrame,
    pub topic: String,
    pub delivery_strategy: DeliveryStrategy,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub frame: DataFrame,
    pub topic: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unsubscribe {
    pub frame: DataFrame,
    pub topic: String,
}

/// Bytes that could not be decoded. Never sent over the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Malformed {
    pub bytes: Vec<u8>,
    pub error: String,
}

/// Message exchanged between two nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    SupportedProtocolVersions(SupportedProtocolVersions),
    InitConnection(InitConnection),
    ConnectionAccepted(ConnectionAccepted),
    GracefullyClose(GracefullyClose),
    TerminateNetwork(TerminateNetwork),
    Publish(Publish),
    Subscribe(Subscribe),
    Unsubscribe(Unsubscribe),
    Malformed(Malformed),
}

impl Message {
    /// The message frame, if it has one.
    pub fn frame(&self) -> Option<&DataFrame> {
        match self {
            Self::SupportedProtocolVersions(m) => Some(&m.frame),
            Self::InitConnection(m) => Some(&m.frame),
            Self::ConnectionAccepted(m) => Some(&m.frame),
            Self::GracefullyClose(m) => Some(&m.frame),
            Self::TerminateNetwork(m) => Some(&m.frame),
            Self::Publish(m) => Some(&m.frame),
            Self::Subscribe(m) => Some(&m.frame),
            Self::Unsubscribe(m) => Some(&m.frame),
            Self::Malformed(_) => None,
        }
    }

    /// Message name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SupportedProtocolVersions(_) => "supported-protocol-versions",
            Self::InitConnection(_) => "init-connection",
            Self::ConnectionAccepted(_) => "connection-accepted",
            Self::GracefullyClose(_) => "gracefully-close",
            Self::TerminateNetwork(_) => "terminate-network",
            Self::Publish(_) => "publish",
            Self::Subscribe(_) => "subscribe",
            Self::Unsubscribe(_) => "unsubscribe",
            Self::Malformed(_) => "malformed",
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SupportedProtocolVersions(m) => write!(f, "{} {:?}", self.name(), m.versions),
            Self::InitConnection(m) => write!(f, "{} {}", self.name(), m.max_message_size),
            Self::ConnectionAccepted(m) => write!(f, "{} {}", self.name(), m.max_message_size),
            Self::GracefullyClose(m) => write!(f, "{} {:?}", self.name(), m.reason),
            Self::TerminateNetwork(m) => write!(f, "{} {:?}", self.name(), m.reason),
            Self::Publish(m) => write!(
                f,
                "{} {} ({}, {} byte(s))",
                self.name(),
                m.topic,
                m.delivery_strategy,
                m.payload.len()
            ),
            Self::Subscribe(m) => write!(f, "{} {}", self.name(), m.topic),
            Self::Unsubscribe(m) => write!(f, "{} {}", self.name(), m.topic),
            Self::Malformed(m) => write!(f, "{} ({})", self.name(), m.error),
        }?;
        if let Some(frame) = self.frame() {
            write!(f, " ttl={} path=[{}]", frame.ttl, frame.path())?;
        }
        Ok(())
    }
}

macro_rules! message_from {
    ($($variant:ident),+) => {
        $(
            impl From<$variant> for Message {
                fn from(other: $variant) -> Self {
                    Self::$variant(other)
                }
            }
        )+
    };
}

message_from!(
    SupportedProtocolVersions,
    InitConnection,
    ConnectionAccepted,
    GracefullyClose,
    TerminateNetwork,
    Publish,
    Subscribe,
    Unsubscribe,
    Malformed
);
