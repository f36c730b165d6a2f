use std::io;
use std::io::Read;

use crate::message::*;
use crate::wire;
use crate::wire::{Decode, Encode};

/// Message type.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    SupportedProtocolVersions = 1,
    InitConnection = 2,
    ConnectionAccepted = 3,
    GracefullyClose = 4,
    TerminateNetwork = 5,
    Publish = 6,
    Subscribe = 7,
    Unsubscribe = 8,
}

impl From<MessageType> for u16 {
    fn from(other: MessageType) -> Self {
        other as u16
    }
}

impl TryFrom<u16> for MessageType {
    type Error = u16;

    fn try_from(other: u16) -> Result<Self, Self::Error> {
        match other {
            1 => Ok(MessageType::SupportedProtocolVersions),
            2 => Ok(MessageType::InitConnection),
            3 => Ok(MessageType::ConnectionAccepted),
            4 => Ok(MessageType::GracefullyClose),
            5 => Ok(MessageType::TerminateNetwork),
            6 => Ok(MessageType::Publish),
            7 => Ok(MessageType::Subscribe),
            8 => Ok(MessageType::Unsubscribe),
            _ => Err(other),
        }
    }
}

impl Message {
    /// Wire type of the message. Malformed messages have none.
    pub fn type_id(&self) -> Option<u16> {
        let id = match self {
            Self::SupportedProtocolVersions(_) => MessageType::SupportedProtocolVersions,
            Self::InitConnection(_) => MessageType::InitConnection,
            Self::ConnectionAccepted(_) => MessageType::ConnectionAccepted,
            Self::GracefullyClose(_) => MessageType::GracefullyClose,
            Self::TerminateNetwork(_) => MessageType::TerminateNetwork,
            Self::Publish(_) => MessageType::Publish,
            Self::Subscribe(_) => MessageType::Subscribe,
            Self::Unsubscribe(_) => MessageType::Unsubscribe,
            Self::Malformed(_) => return None,
        };
        Some(id.into())
    }
}

impl Encode for DataFrame {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let mut n = 0;

        n += self.ttl.encode(writer)?;
        n += self.traversed.as_slice().encode(writer)?;

        Ok(n)
    }
}

impl Decode for DataFrame {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let ttl = Ttl::decode(reader)?;
        let traversed = Vec::<NodeId>::decode(reader)?;

        Ok(Self { ttl, traversed })
    }
}

impl Encode for DeliveryStrategy {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        u8::from(*self).encode(writer)
    }
}

impl Decode for DeliveryStrategy {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let strategy = u8::decode(reader)?;

        DeliveryStrategy::try_from(strategy).map_err(wire::Error::UnknownDeliveryStrategy)
    }
}

/// Publication payloads use a wider length prefix than strings.
struct Payload<'a>(&'a [u8]);

impl Encode for Payload<'_> {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let len = u32::try_from(self.0.len())
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "payload is too large"))?;
        let n = len.encode(writer)?;

        writer.write_all(self.0)?;

        Ok(n + self.0.len())
    }
}

fn decode_payload<R: io::Read + ?Sized>(reader: &mut R) -> Result<Vec<u8>, wire::Error> {
    let len = u32::decode(reader)?;
    let mut payload = Vec::new();
    let read = (&mut *reader).take(len as u64).read_to_end(&mut payload)?;

    if read != len as usize {
        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
    }
    Ok(payload)
}

impl Encode for Message {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let Some(type_id) = self.type_id() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "malformed messages can't be encoded",
            ));
        };
        let mut n = type_id.encode(writer)?;

        match self {
            Self::SupportedProtocolVersions(SupportedProtocolVersions { frame, versions }) => {
                let len = u8::try_from(versions.len()).map_err(|_| {
                    io::Error::new(io::ErrorKind::InvalidInput, "too many protocol versions")
                })?;
                n += frame.encode(writer)?;
                n += len.encode(writer)?;
                for version in versions {
                    n += version.encode(writer)?;
                }
            }
            Self::InitConnection(InitConnection {
                frame,
                max_message_size,
            })
            | Self::ConnectionAccepted(ConnectionAccepted {
                frame,
                max_message_size,
            }) => {
                n += frame.encode(writer)?;
                n += max_message_size.encode(writer)?;
            }
            Self::GracefullyClose(GracefullyClose { frame, reason })
            | Self::TerminateNetwork(TerminateNetwork { frame, reason }) => {
                n += frame.encode(writer)?;
                n += reason.encode(writer)?;
            }
            Self::Publish(Publish {
                frame,
                topic,
                delivery_strategy,
                payload,
            }) => {
                n += frame.encode(writer)?;
                n += topic.encode(writer)?;
                n += delivery_strategy.encode(writer)?;
                n += Payload(payload).encode(writer)?;
            }
            Self::Subscribe(Subscribe { frame, topic })
            | Self::Unsubscribe(Unsubscribe { frame, topic }) => {
                n += frame.encode(writer)?;
                n += topic.encode(writer)?;
            }
            Self::Malformed(_) => unreachable!("malformed messages have no type id"),
        }
        Ok(n)
    }
}

impl Decode for Message {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, wire::Error> {
        let type_id = u16::decode(reader)?;
        let msg_type = MessageType::try_from(type_id).map_err(wire::Error::UnknownMessageType)?;
        let frame = DataFrame::decode(reader)?;

        let msg = match msg_type {
            MessageType::SupportedProtocolVersions => {
                let len = u8::decode(reader)?;
                let mut versions = Vec::with_capacity(len as usize);
                for _ in 0..len {
                    versions.push(ProtocolVersion::decode(reader)?);
                }
                SupportedProtocolVersions { frame, versions }.into()
            }
            MessageType::InitConnection => InitConnection {
                frame,
                max_message_size: u64::decode(reader)?,
            }
            .into(),
            MessageType::ConnectionAccepted => ConnectionAccepted {
                frame,
                max_message_size: u64::decode(reader)?,
            }
            .into(),
            MessageType::GracefullyClose => GracefullyClose {
                frame,
                reason: String::decode(reader)?,
            }
            .into(),
            MessageType::TerminateNetwork => TerminateNetwork {
                frame,
                reason: String::decode(reader)?,
            }
            .into(),
            MessageType::Publish => {
                let topic = String::decode(reader)?;
                let delivery_strategy = DeliveryStrategy::decode(reader)?;
                let payload = decode_payload(reader)?;

                Publish {
                    frame,
                    topic,
                    delivery_strategy,
                    payload,
                }
                .into()
            }
            MessageType::Subscribe => Subscribe {
                frame,
                topic: String::decode(reader)?,
            }
            .into(),
            MessageType::Unsubscribe => Unsubscribe {
                frame,
                topic: String::decode(reader)?,
            }
            .into(),
        };
        Ok(msg)
    }
}
