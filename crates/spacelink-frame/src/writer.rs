use std::io::{ErrorKind, Write};

use bytes::BytesMut;

use crate::error::{FrameError, Result};
use crate::packet::{PacketComm, PacketStyle};
use crate::slip;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes SLIP-delimited frames to any `Write` stream.
pub struct SlipWriter<T> {
    inner: T,
    buf: BytesMut,
}

impl<T: Write> SlipWriter<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
        }
    }

    /// Escape `payload` into one frame and write it out (blocking).
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.buf.clear();
        slip::encode_into(payload, &mut self.buf);

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(FrameError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }

        self.flush()
    }

    /// Wrap `packet` as V2 with CRC and write it as one frame.
    pub fn write_packet(&mut self, packet: &mut PacketComm) -> Result<()> {
        let wire = packet.wrap(PacketStyle::V2, true)?;
        self.write_frame(&wire)
    }

    pub fn flush(&mut self) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(FrameError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::packet_type::FILE_DATA;
    use crate::reader::SlipReader;

    #[test]
    fn written_packets_read_back() {
        let mut writer = SlipWriter::new(Vec::new());
        let mut first = PacketComm::new(FILE_DATA, vec![0xC0; 10]).with_route(1, 2);
        let mut second = PacketComm::new(FILE_DATA, Vec::new()).with_route(2, 1);
        writer.write_packet(&mut first).unwrap();
        writer.write_packet(&mut second).unwrap();

        let mut reader = SlipReader::new(Cursor::new(writer.into_inner()));
        assert_eq!(reader.read_packet().unwrap(), first);
        assert_eq!(reader.read_packet().unwrap(), second);
    }

    #[test]
    fn zero_length_write_is_connection_closed() {
        let mut writer = SlipWriter::new(ZeroWriter);
        assert!(matches!(
            writer.write_frame(b"x"),
            Err(FrameError::ConnectionClosed)
        ));
    }

    struct ZeroWriter;

    impl Write for ZeroWriter {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
