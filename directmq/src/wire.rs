//! Binary encoding of protocol messages.
//!
//! Every packet holds exactly one message: a `u16` message type, the frame and
//! the message body. Integers are big-endian.
pub mod message;

use std::string::FromUtf8Error;
use std::{io, mem};

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::message::{Malformed, Message, NodeId};

pub use message::MessageType;

/// The type we use to represent string lengths and list sizes on the wire.
pub type Size = u16;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("i/o: {0}")]
    Io(#[from] io::Error),
    #[error("UTF-8 error: {0}")]
    FromUtf8(#[from] FromUtf8Error),
    #[error("unknown message type `{0}`")]
    UnknownMessageType(u16),
    #[error("unknown delivery strategy `{0}`")]
    UnknownDeliveryStrategy(u8),
    #[error("unexpected {0} trailing byte(s) after message")]
    TrailingBytes(usize),
    #[error("malformed messages can't be encoded")]
    Malformed,
}

impl Error {
    /// Whether we've reached the end of file. This will be true when we fail to decode
    /// a message because there's not enough data in the packet.
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(err) if err.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Things that can be encoded as binary.
pub trait Encode {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error>;
}

/// Things that can be decoded from binary.
pub trait Decode: Sized {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error>;
}

/// Encode an object into a vector.
pub fn serialize<T: Encode + ?Sized>(data: &T) -> Result<Vec<u8>, Error> {
    let mut buffer = Vec::new();
    let len = data.encode(&mut buffer)?;

    debug_assert_eq!(len, buffer.len());

    Ok(buffer)
}

/// Decode an object from a slice. The whole slice must be consumed.
pub fn deserialize<T: Decode>(data: &[u8]) -> Result<T, Error> {
    let mut cursor = io::Cursor::new(data);
    let value = T::decode(&mut cursor)?;
    let remaining = data.len() - cursor.position() as usize;

    if remaining > 0 {
        return Err(Error::TrailingBytes(remaining));
    }
    Ok(value)
}

/// Converts messages to and from packets.
pub trait Codec {
    /// Encode a message into a packet.
    fn encode(&self, msg: &Message) -> Result<Vec<u8>, Error>;
    /// Decode a packet. Packets that can't be decoded yield [`Message::Malformed`].
    fn decode(&self, bytes: &[u8]) -> Message;
}

/// The binary codec defined in this module.
#[derive(Debug, Default, Clone, Copy)]
pub struct Binary;

impl Codec for Binary {
    fn encode(&self, msg: &Message) -> Result<Vec<u8>, Error> {
        if let Message::Malformed(_) = msg {
            return Err(Error::Malformed);
        }
        serialize(msg)
    }

    fn decode(&self, bytes: &[u8]) -> Message {
        match deserialize::<Message>(bytes) {
            Ok(msg) => msg,
            Err(err) => {
                log::debug!(target: "wire", "Failed to decode {} byte(s): {err}", bytes.len());

                Malformed {
                    bytes: bytes.to_vec(),
                    error: err.to_string(),
                }
                .into()
            }
        }
    }
}

fn invalid_input(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, msg.into())
}

impl Encode for u8 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_u8(*self)?;

        Ok(mem::size_of::<Self>())
    }
}

impl Encode for u16 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_u16::<NetworkEndian>(*self)?;

        Ok(mem::size_of::<Self>())
    }
}

impl Encode for u32 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_u32::<NetworkEndian>(*self)?;

        Ok(mem::size_of::<Self>())
    }
}

impl Encode for u64 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_u64::<NetworkEndian>(*self)?;

        Ok(mem::size_of::<Self>())
    }
}

impl Encode for i32 {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        writer.write_i32::<NetworkEndian>(*self)?;

        Ok(mem::size_of::<Self>())
    }
}

impl<T> Encode for &[T]
where
    T: Encode,
{
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let len = Size::try_from(self.len()).map_err(|_| invalid_input("list is too long"))?;
        let mut n = len.encode(writer)?;

        for item in self.iter() {
            n += item.encode(writer)?;
        }
        Ok(n)
    }
}

impl Encode for &str {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        let len = Size::try_from(self.len()).map_err(|_| invalid_input("string is too long"))?;
        let n = len.encode(writer)?;
        let bytes = self.as_bytes();

        // Nb. Don't use the [`Encode`] instance here for &[u8], because we are prefixing the
        // length ourselves.
        writer.write_all(bytes)?;

        Ok(n + bytes.len())
    }
}

impl Encode for String {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.as_str().encode(writer)
    }
}

impl Encode for NodeId {
    fn encode<W: io::Write + ?Sized>(&self, writer: &mut W) -> Result<usize, io::Error> {
        self.as_str().encode(writer)
    }
}

////////////////////////////////////////////////////////////////////////////////

impl Decode for u8 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        reader.read_u8().map_err(Error::from)
    }
}

impl Decode for u16 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        reader.read_u16::<NetworkEndian>().map_err(Error::from)
    }
}

impl Decode for u32 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        reader.read_u32::<NetworkEndian>().map_err(Error::from)
    }
}

impl Decode for u64 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        reader.read_u64::<NetworkEndian>().map_err(Error::from)
    }
}

impl Decode for i32 {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        reader.read_i32::<NetworkEndian>().map_err(Error::from)
    }
}

impl<T> Decode for Vec<T>
where
    T: Decode,
{
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let len: Size = Size::decode(reader)?;
        let mut vec = Vec::with_capacity(len as usize);

        for _ in 0..len {
            let item = T::decode(reader)?;
            vec.push(item);
        }
        Ok(vec)
    }
}

impl Decode for String {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        let len = Size::decode(reader)?;
        let mut bytes = vec![0; len as usize];

        reader.read_exact(&mut bytes)?;

        let string = String::from_utf8(bytes)?;

        Ok(string)
    }
}

impl Decode for NodeId {
    fn decode<R: io::Read + ?Sized>(reader: &mut R) -> Result<Self, Error> {
        String::decode(reader).map(NodeId::from)
    }
}
