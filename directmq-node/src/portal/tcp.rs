//! Packets over TCP, each prefixed with its length as a big-endian `u32`.
use std::io::{self, Read, Write};
use std::net;

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use super::Portal;

/// Largest packet we are willing to read.
pub const MAX_PACKET_SIZE: usize = 16 * 1024 * 1024;

/// Portal over a TCP stream.
#[derive(Debug)]
pub struct TcpPortal {
    stream: net::TcpStream,
    closed: bool,
}

impl TcpPortal {
    pub fn new(stream: net::TcpStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    pub fn peer_addr(&self) -> io::Result<net::SocketAddr> {
        self.stream.peer_addr()
    }
}

impl Portal for TcpPortal {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::ErrorKind::NotConnected.into());
        }
        write_packet(&mut self.stream, packet)
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.stream.shutdown(net::Shutdown::Both) {
            log::debug!(target: "runtime", "Error shutting down TCP stream: {e}");
        }
    }
}

/// Write a length-prefixed packet.
pub fn write_packet<W: Write + ?Sized>(writer: &mut W, packet: &[u8]) -> io::Result<()> {
    let len = u32::try_from(packet.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "packet is too large"))?;
    let mut buf = Vec::with_capacity(packet.len() + 4);

    buf.write_u32::<NetworkEndian>(len)?;
    buf.extend_from_slice(packet);
    writer.write_all(&buf)?;
    writer.flush()
}

/// Read a length-prefixed packet. Returns `None` if the stream ended cleanly.
pub fn read_packet<R: Read + ?Sized>(reader: &mut R) -> io::Result<Option<Vec<u8>>> {
    let len = match reader.read_u32::<NetworkEndian>() {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_PACKET_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("packet of {len} byte(s) exceeds maximum of {MAX_PACKET_SIZE}"),
        ));
    }
    let mut packet = vec![0; len];
    reader.read_exact(&mut packet)?;

    Ok(Some(packet))
}
