//! Transports.
//!
//! A portal carries whole packets to and from one peer. Reading is left to
//! whoever owns the transport: packets are handed to the node as they arrive.
pub mod tcp;

use std::io;

/// Writing end of a link to a peer.
pub trait Portal {
    /// Write a whole packet.
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()>;
    /// Close the link. Closing twice is allowed.
    fn close(&mut self);
}

impl<P: Portal + ?Sized> Portal for Box<P> {
    fn write_packet(&mut self, packet: &[u8]) -> io::Result<()> {
        (**self).write_packet(packet)
    }

    fn close(&mut self) {
        (**self).close()
    }
}
