// Copyright (c) Sean Lawlor
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree.

//! Length-prefixed framing of [NetworkMessage]s
//!
//! Every frame is written as 2 parts: exactly 8 bytes which constitute the length of
//! the payload (u64 in big endian format), followed by the prost-encoded payload. This
//! tells the reader exactly how much data to read off the wire.

use bytes::Bytes;
use prost::Message;
use relay::RelayErr;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ErrorKind};

use super::{BoxRead, BoxWrite};
use crate::protocol::NetworkMessage;

/// One read off the wire
#[derive(Debug)]
pub(crate) enum Frame {
    /// A decoded message
    Message(NetworkMessage),
    /// A frame was read in full but its body didn't decode. The stream is still in
    /// sync and reading may continue.
    Corrupt(RelayErr),
    /// The remote end closed the stream
    Closed,
}

/// Reads framed messages from the read half of a stream
pub(crate) struct FrameReader {
    reader: BoxRead,
    max_frame_bytes: usize,
}

impl FrameReader {
    pub(crate) fn new(reader: BoxRead, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            max_frame_bytes,
        }
    }

    /// Read the next frame. An [Err] means the stream can't be read any further.
    pub(crate) async fn read(&mut self) -> Result<Frame, RelayErr> {
        let length = match self.reader.read_u64().await {
            Ok(length) => length,
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => {
                log::trace!("Error (EOF) on stream");
                return Ok(Frame::Closed);
            }
            Err(err) => return Err(err.into()),
        };
        if length > self.max_frame_bytes as u64 {
            return Err(RelayErr::corrupt_envelope(format!(
                "Frame of {length} bytes exceeds the {} byte limit",
                self.max_frame_bytes
            )));
        }
        log::trace!("Payload length message ({length}) received");

        let mut buf = vec![0u8; length as usize];
        match self.reader.read_exact(&mut buf).await {
            Ok(_) => {}
            Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(Frame::Closed),
            Err(err) => return Err(err.into()),
        }

        match NetworkMessage::decode(Bytes::from(buf)) {
            Ok(msg) => Ok(Frame::Message(msg)),
            Err(decode_err) => Ok(Frame::Corrupt(RelayErr::corrupt_envelope(format!(
                "Error decoding network message: '{decode_err}'"
            )))),
        }
    }
}

/// Writes framed messages to the write half of a stream
pub(crate) struct FrameWriter {
    writer: BoxWrite,
}

impl FrameWriter {
    pub(crate) fn new(writer: BoxWrite) -> Self {
        Self { writer }
    }

    /// Encode and write one message, then flush
    pub(crate) async fn write(&mut self, msg: &NetworkMessage) -> Result<(), RelayErr> {
        let len = msg.encoded_len();
        let mut buf: Vec<u8> = Vec::with_capacity(len + std::mem::size_of::<u64>());
        buf.extend_from_slice(&(len as u64).to_be_bytes());
        msg.encode(&mut buf)
            .map_err(|err| RelayErr::corrupt_envelope(err.to_string()))?;
        log::trace!("Writing payload (len={len})");
        self.writer.write_all(&buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// Close the write half
    pub(crate) async fn shutdown(&mut self) {
        let _ = self.writer.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::control::{ControlMessage, MetadataRequest};
    use crate::protocol::{control, Payload};

    fn pipe(max_frame_bytes: usize) -> (FrameWriter, FrameReader) {
        let (client, server) = tokio::io::duplex(1024);
        let (_, write) = tokio::io::split(client);
        let (read, _) = tokio::io::split(server);
        (
            FrameWriter::new(Box::new(write)),
            FrameReader::new(Box::new(read), max_frame_bytes),
        )
    }

    fn metadata_request(correlation_id: u64) -> NetworkMessage {
        NetworkMessage {
            message: Some(Payload::Control(ControlMessage {
                correlation_id,
                msg: Some(control::control_message::Msg::MetadataRequest(
                    MetadataRequest {},
                )),
            })),
        }
    }

    #[relay::concurrency::test]
    async fn frames_arrive_in_order() {
        let (mut writer, mut reader) = pipe(1024);
        for id in 0..3 {
            writer.write(&metadata_request(id)).await.unwrap();
        }
        for id in 0..3 {
            match reader.read().await.unwrap() {
                Frame::Message(msg) => assert_eq!(metadata_request(id), msg),
                other => panic!("Unexpected frame {:?}", other),
            }
        }
    }

    #[relay::concurrency::test]
    async fn closed_stream_reads_as_closed() {
        let (mut writer, mut reader) = pipe(1024);
        writer.shutdown().await;
        drop(writer);
        assert!(matches!(reader.read().await, Ok(Frame::Closed)));
    }

    #[relay::concurrency::test]
    async fn oversized_frames_are_corrupt() {
        let (mut writer, mut reader) = pipe(2);
        writer.write(&metadata_request(1)).await.unwrap();
        let err = reader.read().await.unwrap_err();
        assert_eq!(relay::ErrorKind::CorruptEnvelope, err.kind());
    }

    #[relay::concurrency::test]
    async fn undecodable_bodies_are_skipped() {
        let (client, server) = tokio::io::duplex(1024);
        let (_, mut raw) = tokio::io::split(client);
        let (read, _) = tokio::io::split(server);
        let mut reader = FrameReader::new(Box::new(read), 1024);

        // a length-delimited field (tag 2) claiming more bytes than the frame has
        let garbage = [0x12u8, 0x7f, 0x01];
        raw.write_all(&(garbage.len() as u64).to_be_bytes())
            .await
            .unwrap();
        raw.write_all(&garbage).await.unwrap();
        assert!(matches!(reader.read().await, Ok(Frame::Corrupt(_))));

        let mut writer = FrameWriter::new(Box::new(raw));
        writer.write(&metadata_request(9)).await.unwrap();
        assert!(matches!(reader.read().await, Ok(Frame::Message(_))));
    }
}
