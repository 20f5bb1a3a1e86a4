//! Codec for encoding/decoding lanproxy frames

use crate::frame::{Frame, MessageType};
use crate::{LEN_SIZE, MAX_FRAME_LENGTH, MAX_URI_LENGTH, MIN_BODY_LENGTH};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Frame too large: {0} bytes")]
    FrameTooLarge(usize),

    #[error("URI too long: {0} bytes")]
    UriTooLong(usize),

    #[error("Malformed frame: {0}")]
    Malformed(String),
}

/// Lanproxy frame codec
pub struct FrameCodec;

impl FrameCodec {
    /// Encode a frame to bytes
    ///
    /// Format: [body length: u32][type: u8][serial: u64][uri length: u8][uri][data]
    pub fn encode(frame: &Frame) -> Result<Bytes, CodecError> {
        let uri = frame.uri.as_bytes();
        if uri.len() > MAX_URI_LENGTH {
            return Err(CodecError::UriTooLong(uri.len()));
        }

        let body_length = frame.body_length();
        if body_length > u32::MAX as usize {
            return Err(CodecError::FrameTooLarge(body_length));
        }

        let mut buf = BytesMut::with_capacity(LEN_SIZE + body_length);
        buf.put_u32(body_length as u32);
        buf.put_u8(frame.message_type.into());
        buf.put_u64(frame.serial_number);
        buf.put_u8(uri.len() as u8);
        buf.extend_from_slice(uri);
        buf.extend_from_slice(&frame.data);

        Ok(buf.freeze())
    }

    /// Decode a frame from the front of a receive buffer
    ///
    /// Returns Ok(Some(frame)) if a complete frame was decoded and consumed,
    /// Ok(None) if more data is needed (nothing is consumed),
    /// Err if the buffer can never hold a valid frame
    pub fn decode(buf: &mut BytesMut) -> Result<Option<Frame>, CodecError> {
        // Need at least 4 bytes for length header
        if buf.len() < LEN_SIZE {
            return Ok(None);
        }

        let mut length_bytes = [0u8; LEN_SIZE];
        length_bytes.copy_from_slice(&buf[..LEN_SIZE]);
        let body_length = u32::from_be_bytes(length_bytes) as usize;

        if body_length > MAX_FRAME_LENGTH {
            return Err(CodecError::FrameTooLarge(body_length));
        }

        if body_length < MIN_BODY_LENGTH {
            return Err(CodecError::Malformed(format!(
                "body length {} is shorter than the {} byte header",
                body_length, MIN_BODY_LENGTH
            )));
        }

        // Check uri length before consuming anything
        if buf.len() >= LEN_SIZE + MIN_BODY_LENGTH {
            let uri_length = buf[LEN_SIZE + MIN_BODY_LENGTH - 1] as usize;
            if MIN_BODY_LENGTH + uri_length > body_length {
                return Err(CodecError::Malformed(format!(
                    "uri length {} overruns body length {}",
                    uri_length, body_length
                )));
            }
        }

        // Check if we have the full frame
        if buf.len() < LEN_SIZE + body_length {
            return Ok(None);
        }

        buf.advance(LEN_SIZE);
        let mut body = buf.split_to(body_length);

        let message_type = MessageType::from(body.get_u8());
        let serial_number = body.get_u64();
        let uri_length = body.get_u8() as usize;
        let uri = String::from_utf8_lossy(&body[..uri_length]).into_owned();
        body.advance(uri_length);

        Ok(Some(Frame {
            message_type,
            serial_number,
            uri,
            data: body.freeze(),
        }))
    }
}
