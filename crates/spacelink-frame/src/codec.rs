//! Tokio codec for SLIP-framed V2 packets.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{FrameError, Result};
use crate::packet::{PacketComm, PacketStyle};
use crate::slip;

/// SLIP framing with V2 packets inside; CRC failures surface as errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct SlipCodec;

impl Decoder for SlipCodec {
    type Item = PacketComm;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(frame) = slip::take_frame(src)? else {
            return Ok(None);
        };
        let mut packet = PacketComm::default();
        packet.unwrap(&frame, PacketStyle::V2, true)?;
        Ok(Some(packet))
    }
}

impl Encoder<PacketComm> for SlipCodec {
    type Error = FrameError;

    fn encode(&mut self, mut item: PacketComm, dst: &mut BytesMut) -> Result<()> {
        let wire = item.wrap(PacketStyle::V2, true)?;
        slip::encode_into(&wire, dst);
        Ok(())
    }
}
