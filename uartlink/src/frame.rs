//! Outgoing frame format for the UART wire protocol.
//!
//! A frame is: preamble, device id, message type (u16 LE), payload length
//! (u16 LE), payload, CRC-16/CCITT-FALSE (u16 LE) over everything after the
//! preamble. The link manager stamps the device id just before writing.

use bytes::{BufMut, BytesMut};
use crc_all::Crc;
use std::io;
use tokio_util::codec::Encoder;

const FRAME_PREAMBLE: &[u8] = &[0x7e, 0x5a];

/// Outgoing message types.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxType {
    Hello = 0,
    SessionNonce = 1,
    Heartbeat = 2,
    Status = 3,
    Control = 10,
}

/// One outgoing frame, prior to encoding and optional encryption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UartFrame {
    pub tx_type: TxType,
    pub device_id: u8,
    pub payload: Vec<u8>,
}

impl UartFrame {
    pub fn new(tx_type: TxType, payload: Vec<u8>) -> Self {
        Self { tx_type, device_id: 0, payload }
    }

    /// The fixed liveness frame: a 2-byte little-endian `4` tagged as a
    /// heartbeat.
    pub fn heartbeat() -> Self {
        Self::new(TxType::Heartbeat, 4u16.to_le_bytes().to_vec())
    }

    pub fn set_device_id(&mut self, device_id: u8) {
        self.device_id = device_id;
    }

    /// Encode this frame to wire bytes. Fails only if the payload
    /// overflows the length field.
    pub fn packet(&self) -> io::Result<Vec<u8>> {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::new();
        codec.encode(self.clone(), &mut buf)?;
        Ok(buf.to_vec())
    }
}

fn crc16_ccitt(bytes: &[u8]) -> u16 {
    const POLYNOMIAL: u16 = 0x1021;
    const WIDTH: usize = 16;
    const INITIAL: u16 = 0xffff;
    const XOR: u16 = 0;
    const REFLECT: bool = false;
    let mut crc = Crc::<u16>::new(POLYNOMIAL, WIDTH, INITIAL, XOR, REFLECT);

    crc.update(bytes);
    crc.finish()
}

pub struct FrameCodec;

impl Encoder<UartFrame> for FrameCodec {
    type Error = io::Error;

    fn encode(&mut self, frame: UartFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        if frame.payload.len() > u16::MAX as usize {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "payload exceeds u16 length field",
            ));
        }

        dst.put_slice(FRAME_PREAMBLE);
        dst.put_u8(frame.device_id);
        dst.put_u16_le(frame.tx_type as u16);
        dst.put_u16_le(frame.payload.len() as u16);
        dst.put_slice(&frame.payload);

        let crc = crc16_ccitt(&dst[FRAME_PREAMBLE.len()..]);
        dst.put_u16_le(crc);

        Ok(())
    }
}
