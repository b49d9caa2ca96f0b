// Copyright 2024-2026 The wirenet developers
// This file is part of the wirenet library.

// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at:

// http://www.apache.org/licenses/LICENSE-2.0

// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::{Packet, DEFAULT_MAX_FRAME_SIZE};

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// The codec for the TCP wire format: a 4-byte little-endian unsigned body
/// length, followed by that many body bytes. Length zero is a legal frame
/// and decodes to an empty packet. A length above the configured maximum
/// fails the stream with an error.
pub struct FrameCodec {
    codec: LengthDelimitedCodec,
}

impl FrameCodec {
    /// Creates a codec that rejects frames longer than `max_frame_size`.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            codec: LengthDelimitedCodec::builder()
                .max_frame_length(max_frame_size)
                .length_field_length(4)
                .little_endian()
                .new_codec(),
        }
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Encoder<Packet> for FrameCodec {
    type Error = std::io::Error;

    fn encode(&mut self, packet: Packet, dst: &mut BytesMut) -> Result<(), Self::Error> {
        self.codec.encode(packet.into_bytes(), dst)
    }
}

impl Decoder for FrameCodec {
    type Error = std::io::Error;
    type Item = Packet;

    fn decode(&mut self, source: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        Ok(self.codec.decode(source)?.map(|body| Packet::from(body.freeze())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_prefixes_little_endian_length() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(Packet::copy_from_slice(b"hello"), &mut dst).unwrap();
        assert_eq!(&dst[..], b"\x05\x00\x00\x00hello");
    }

    #[test]
    fn zero_length_frame_round_trips() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Packet::empty(), &mut buf).unwrap();
        assert_eq!(&buf[..], b"\x00\x00\x00\x00");

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert!(packet.is_empty());
        assert!(buf.is_empty());
    }

    #[test]
    fn decode_waits_for_the_whole_body() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&b"\x05\x00\x00\x00hel"[..]);
        // Only 3 of 5 body bytes have arrived.
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"lo");
        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.as_bytes(), b"hello");
    }

    #[test]
    fn decode_rejects_oversized_frames() {
        let mut codec = FrameCodec::new(4);
        let mut buf = BytesMut::from(&b"\x05\x00\x00\x00hello"[..]);
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn decode_round_trips_arbitrary_bodies() {
        let body: Vec<u8> = (0..=255).collect();
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        codec.encode(Packet::copy_from_slice(&body), &mut buf).unwrap();

        let packet = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(packet.as_bytes(), &body[..]);
    }
}
