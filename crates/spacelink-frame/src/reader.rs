use std::io::{ErrorKind, Read};

use bytes::BytesMut;
use tracing::trace;

use crate::error::{FrameError, Result};
use crate::packet::{PacketComm, PacketStyle};
use crate::slip;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads SLIP-delimited frames from any `Read` stream (serial port, pipe,
/// file).
///
/// Partial reads are buffered internally; callers always get whole frames.
pub struct SlipReader<T> {
    inner: T,
    buf: BytesMut,
    check_crc: bool,
}

impl<T: Read> SlipReader<T> {
    pub fn new(inner: T) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            check_crc: true,
        }
    }

    /// Skip CRC verification in [`read_packet`](Self::read_packet).
    pub fn without_crc_check(mut self) -> Self {
        self.check_crc = false;
        self
    }

    /// Read the next unescaped frame body (blocking).
    ///
    /// Returns `Err(FrameError::ConnectionClosed)` at EOF, including EOF in
    /// the middle of a frame.
    pub fn read_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = slip::take_frame(&mut self.buf)? {
                return Ok(frame);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(FrameError::Io(err)),
            };

            if read == 0 {
                return Err(FrameError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
            trace!(read, buffered = self.buf.len(), "slip stream read");
        }
    }

    /// Read the next frame and parse it as a V2 packet.
    pub fn read_packet(&mut self) -> Result<PacketComm> {
        let frame = self.read_frame()?;
        let mut packet = PacketComm::default();
        packet.unwrap(&frame, PacketStyle::V2, self.check_crc)?;
        Ok(packet)
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    /// Consume the reader and return the inner stream.
    pub fn into_inner(self) -> T {
        self.inner
    }
}
