use std::marker::PhantomData;

use bytes::{Buf, BufMut, BytesMut};
use serde::{de::DeserializeOwned, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::MAX_MESSAGE_SIZE;

/// Length-prefixed bincode codec for gateway envelopes
pub struct MessageCodec<T> {
    _message: PhantomData<fn() -> T>,
}

impl<T> MessageCodec<T> {
    /// Creates a new message codec
    pub fn new() -> Self {
        MessageCodec { _message: PhantomData }
    }
}

impl<T> Default for MessageCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for MessageCodec<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T: DeserializeOwned> Decoder for MessageCodec<T> {
    type Item = T;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            // Need more data to read message length
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_MESSAGE_SIZE {
            return Err(Error::invalid_argument(format!("frame of {} octets exceeds limit", length)));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let message_bytes = src.split_to(length);

        decode_payload(&message_bytes).map(Some)
    }
}

impl<T: Serialize> Encoder<T> for MessageCodec<T> {
    type Error = Error;

    fn encode(&mut self, item: T, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = encode_payload(&item)?;
        if bytes.len() > MAX_MESSAGE_SIZE {
            return Err(Error::invalid_argument(format!("frame of {} octets exceeds limit", bytes.len())));
        }

        dst.reserve(4 + bytes.len());
        dst.put_u32(bytes.len() as u32);
        dst.extend_from_slice(&bytes);

        Ok(())
    }
}

/// Serializes one unframed message payload
pub fn encode_payload<T: Serialize>(item: &T) -> Result<Vec<u8>, Error> {
    bincode::serialize(item)
        .map_err(|e| Error::invalid_argument(format!("Failed to serialize message: {}", e)))
}

/// Deserializes one unframed message payload
pub fn decode_payload<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::invalid_argument(format!("Failed to deserialize message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::{DownlinkMessage, GatewayDown};

    fn down(payload: &[u8]) -> GatewayDown {
        GatewayDown {
            downlink_message: DownlinkMessage {
                raw_payload: payload.to_vec(),
                settings: None,
            },
        }
    }

    #[test]
    fn test_codec_gateway_down() {
        let mut codec = MessageCodec::<GatewayDown>::new();
        let mut bytes = BytesMut::new();

        codec.encode(down(&[0x01, 0x02]), &mut bytes).unwrap();
        codec.encode(down(&[0x03]), &mut bytes).unwrap();

        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(down(&[0x01, 0x02])));
        assert_eq!(codec.decode(&mut bytes).unwrap(), Some(down(&[0x03])));
        assert_eq!(codec.decode(&mut bytes).unwrap(), None);
    }

    #[test]
    fn test_codec_partial_frame() {
        let mut codec = MessageCodec::<GatewayDown>::new();
        let mut full = BytesMut::new();
        codec.encode(down(&[0xAA; 8]), &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        partial.extend_from_slice(&full[full.len() - 1..]);
        assert_eq!(codec.decode(&mut partial).unwrap(), Some(down(&[0xAA; 8])));
    }

    #[test]
    fn test_codec_oversized_frame() {
        let mut codec = MessageCodec::<GatewayDown>::new();
        let mut bytes = BytesMut::new();
        bytes.put_u32(u32::MAX);
        assert!(codec.decode(&mut bytes).unwrap_err().is_invalid_argument());
    }

    #[test]
    fn test_malformed_payload() {
        let err = decode_payload::<GatewayDown>(&[0xFF]).unwrap_err();
        assert!(err.is_invalid_argument());
    }
}
