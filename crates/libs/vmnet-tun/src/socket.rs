use std::io;
use std::net::Shutdown;
use std::os::unix::net::UnixDatagram;

/// Connected datagram pair carrying inbound packets to the caller.
///
/// Datagram sockets keep packet boundaries, so every forward on the writer
/// shows up as exactly one `recv` on the reader.
#[derive(Debug)]
pub struct SocketBridge {
    reader: UnixDatagram,
    writer: SocketWriter,
}

impl SocketBridge {
    pub fn new() -> io::Result<Self> {
        let (reader, writer) = UnixDatagram::pair()?;
        // The caller only reads; outbound traffic goes through the device write path.
        reader.shutdown(Shutdown::Write)?;
        writer.set_nonblocking(true)?;
        Ok(Self { reader, writer: SocketWriter { socket: writer } })
    }

    pub fn into_parts(self) -> (UnixDatagram, SocketWriter) {
        (self.reader, self.writer)
    }
}

/// Internal end of the bridge, written only by the event bridge.
#[derive(Debug)]
pub struct SocketWriter {
    socket: UnixDatagram,
}

impl SocketWriter {
    /// Sends one packet as one datagram. Never blocks: a full reader queue
    /// surfaces as `WouldBlock`.
    pub fn forward(&self, packet: &[u8]) -> io::Result<usize> {
        self.socket.send(packet)
    }
}
