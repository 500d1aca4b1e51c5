/// Single reusable receive buffer for inbound packets.
///
/// Sized once to the negotiated max packet size. The event bridge owns it
/// behind its slot lock, so only one read can fill it at a time.
#[derive(Debug)]
pub struct PacketBuffer {
    bytes: Box<[u8]>,
}

impl PacketBuffer {
    pub fn new(max_packet_size: usize) -> Self {
        Self { bytes: vec![0_u8; max_packet_size].into_boxed_slice() }
    }

    pub fn capacity(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Bytes of the packet last read into the buffer, clamped to capacity.
    pub fn packet(&self, len: usize) -> &[u8] {
        &self.bytes[..len.min(self.bytes.len())]
    }
}

#[cfg(test)]
mod tests {
    use super::PacketBuffer;

    #[test]
    fn buffer_is_sized_to_max_packet_size() {
        let mut buffer = PacketBuffer::new(1514);
        assert_eq!(buffer.capacity(), 1514);
        assert_eq!(buffer.as_mut_slice().len(), 1514);
    }

    #[test]
    fn packet_view_is_clamped_to_capacity() {
        let mut buffer = PacketBuffer::new(4);
        buffer.as_mut_slice().copy_from_slice(&[1, 2, 3, 4]);
        assert_eq!(buffer.packet(2), &[1, 2]);
        assert_eq!(buffer.packet(16), &[1, 2, 3, 4]);
        assert!(buffer.packet(0).is_empty());
    }
}
