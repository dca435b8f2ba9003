use log::debug;
use serde::{Deserialize, Serialize};
use std::io::{self, Read};
use thiserror::Error;

/// Size of the fixed message header in bytes
pub const HEADER_SIZE: usize = 26;

/// Upper bound for frames of a known message type. Larger frames are
/// discarded and reported as malformed.
pub const MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

/// Protocol version announced in the Hello payload
pub const PROTOCOL_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] io::Error),

    #[error("Malformed payload in message type {msg_type}: {reason}")]
    MalformedPayload { msg_type: u16, reason: String },

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl ProtocolError {
    fn malformed(msg_type: u16, reason: impl Into<String>) -> Self {
        ProtocolError::MalformedPayload {
            msg_type,
            reason: reason.into(),
        }
    }

    /// Whether the stream is still aligned on a frame boundary after this error.
    ///
    /// Only payload-level errors qualify: the offending frame has been consumed
    /// in full, so the next read starts at a header again.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ProtocolError::MalformedPayload { .. })
    }
}

/// Message types of the snapcast stream protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageType {
    Base = 0,
    CodecHeader = 1,
    WireChunk = 2,
    ServerSettings = 3,
    Time = 4,
    Hello = 5,
    StreamTags = 6,
}

impl MessageType {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(MessageType::Base),
            1 => Some(MessageType::CodecHeader),
            2 => Some(MessageType::WireChunk),
            3 => Some(MessageType::ServerSettings),
            4 => Some(MessageType::Time),
            5 => Some(MessageType::Hello),
            6 => Some(MessageType::StreamTags),
            _ => None,
        }
    }
}

/// Fixed 26 byte header preceding every payload. All fields little-endian.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageHeader {
    pub msg_type: u16,
    pub id: u16,
    pub refers_to: u16,
    pub sent_sec: i32,
    pub sent_usec: i32,
    pub received_sec: i32,
    pub received_usec: i32,
    /// Number of payload bytes following the header
    pub size: u32,
}

impl MessageHeader {
    pub fn new(message_type: MessageType, size: u32) -> Self {
        Self {
            msg_type: message_type as u16,
            size,
            ..Default::default()
        }
    }

    pub fn message_type(&self) -> Option<MessageType> {
        MessageType::from_u16(self.msg_type)
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.msg_type.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.id.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.refers_to.to_le_bytes());
        bytes[6..10].copy_from_slice(&self.sent_sec.to_le_bytes());
        bytes[10..14].copy_from_slice(&self.sent_usec.to_le_bytes());
        bytes[14..18].copy_from_slice(&self.received_sec.to_le_bytes());
        bytes[18..22].copy_from_slice(&self.received_usec.to_le_bytes());
        bytes[22..26].copy_from_slice(&self.size.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> Self {
        let u16_at = |at: usize| u16::from_le_bytes([bytes[at], bytes[at + 1]]);
        let i32_at = |at: usize| {
            i32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
        };

        Self {
            msg_type: u16_at(0),
            id: u16_at(2),
            refers_to: u16_at(4),
            sent_sec: i32_at(6),
            sent_usec: i32_at(10),
            received_sec: i32_at(14),
            received_usec: i32_at(18),
            size: u32::from_le_bytes([bytes[22], bytes[23], bytes[24], bytes[25]]),
        }
    }
}

fn default_instance() -> u32 {
    1
}

/// Handshake payload sent by the client right after connecting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Hello {
    pub arch: String,
    pub client_name: String,
    pub host_name: String,
    /// Stable identity of this client process
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default = "default_instance")]
    pub instance: u32,
    #[serde(rename = "MAC", default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    #[serde(rename = "OS")]
    pub os: String,
    #[serde(default)]
    pub snap_stream_protocol_version: u32,
    pub version: String,
}

impl Hello {
    /// Build the wire frame for this handshake
    pub fn encode(&self) -> Result<(MessageHeader, Vec<u8>), ProtocolError> {
        let json = serde_json::to_vec(self)?;
        frame(MessageType::Hello, json_block(MessageType::Hello, &json)?)
    }

    /// Parse an inbound Hello payload (server role)
    pub fn from_payload(payload: &[u8]) -> Result<Self, ProtocolError> {
        let msg_type = MessageType::Hello as u16;
        let mut reader = payload;
        let mut frame = FrameReader::new(&mut reader, msg_type, payload.len() as u64);
        let json = frame.read_block()?;
        serde_json::from_slice(&json).map_err(|e| ProtocolError::malformed(msg_type, e.to_string()))
    }
}

/// Playback settings pushed by the server
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    #[serde(rename = "bufferMS", alias = "BufferMS")]
    pub buffer_ms: i32,
    #[serde(alias = "Latency")]
    pub latency: i32,
    #[serde(alias = "Muted")]
    pub muted: bool,
    /// Expected to be 0-100, not range checked here
    #[serde(alias = "Volume")]
    pub volume: i32,
}

/// Codec name plus the codec specific initialization bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecHeader {
    pub codec: String,
    pub payload: Vec<u8>,
}

/// Timestamped block of encoded audio
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireChunk {
    pub sec: i32,
    pub usec: i32,
    pub payload: Vec<u8>,
}

/// Decoded message, one variant per payload layout
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    Hello(Hello),
    ServerSettings(ServerSettings),
    CodecHeader(CodecHeader),
    WireChunk(WireChunk),
    /// Any type this client does not interpret. The payload has been skipped.
    Unknown { msg_type: u16, size: u32 },
}

impl Message {
    pub fn msg_type(&self) -> u16 {
        match self {
            Message::Hello(_) => MessageType::Hello as u16,
            Message::ServerSettings(_) => MessageType::ServerSettings as u16,
            Message::CodecHeader(_) => MessageType::CodecHeader as u16,
            Message::WireChunk(_) => MessageType::WireChunk as u16,
            Message::Unknown { msg_type, .. } => *msg_type,
        }
    }

    /// Serialize to a header plus payload bytes.
    ///
    /// `Unknown` encodes as `size` zero bytes under its raw type, which keeps
    /// it usable for exercising the skip path of a peer. Sizes above
    /// [`MAX_FRAME_SIZE`] are refused instead of allocated.
    pub fn encode(&self) -> Result<(MessageHeader, Vec<u8>), ProtocolError> {
        match self {
            Message::Hello(hello) => hello.encode(),
            Message::ServerSettings(settings) => {
                let json = serde_json::to_vec(settings)?;
                let kind = MessageType::ServerSettings;
                frame(kind, json_block(kind, &json)?)
            }
            Message::CodecHeader(header) => {
                let kind = MessageType::CodecHeader;
                let mut payload = Vec::with_capacity(8 + header.codec.len() + header.payload.len());
                write_block(&mut payload, kind, header.codec.as_bytes())?;
                write_block(&mut payload, kind, &header.payload)?;
                frame(kind, payload)
            }
            Message::WireChunk(chunk) => {
                let kind = MessageType::WireChunk;
                let mut payload = Vec::with_capacity(12 + chunk.payload.len());
                payload.extend_from_slice(&chunk.sec.to_le_bytes());
                payload.extend_from_slice(&chunk.usec.to_le_bytes());
                write_block(&mut payload, kind, &chunk.payload)?;
                frame(kind, payload)
            }
            Message::Unknown { msg_type, size } => {
                if *size > MAX_FRAME_SIZE {
                    return Err(ProtocolError::malformed(
                        *msg_type,
                        format!("{} zero bytes exceed the frame limit of {}", size, MAX_FRAME_SIZE),
                    ));
                }
                let header = MessageHeader {
                    msg_type: *msg_type,
                    size: *size,
                    ..Default::default()
                };
                Ok((header, vec![0u8; *size as usize]))
            }
        }
    }

    /// Decode the payload announced by `header` from `reader`.
    ///
    /// Exactly `header.size` bytes are consumed unless the transport itself
    /// fails, also when the payload turns out to be malformed.
    pub fn decode<R: Read>(header: &MessageHeader, reader: &mut R) -> Result<Self, ProtocolError> {
        let mut frame = FrameReader::new(reader, header.msg_type, u64::from(header.size));

        match decode_payload(header, &mut frame) {
            Err(ProtocolError::Transport(e)) => Err(ProtocolError::Transport(e)),
            result => {
                frame.finish()?;
                result
            }
        }
    }
}

fn decode_payload<R: Read>(
    header: &MessageHeader,
    frame: &mut FrameReader<'_, R>,
) -> Result<Message, ProtocolError> {
    let msg_type = header.msg_type;
    let kind = header.message_type();

    let known = matches!(
        kind,
        Some(MessageType::ServerSettings | MessageType::CodecHeader | MessageType::WireChunk)
    );
    if known && header.size > MAX_FRAME_SIZE {
        return Err(ProtocolError::malformed(
            msg_type,
            format!("frame of {} bytes exceeds limit of {}", header.size, MAX_FRAME_SIZE),
        ));
    }

    match kind {
        Some(MessageType::ServerSettings) => {
            let json = frame.read_block()?;
            serde_json::from_slice(&json)
                .map(Message::ServerSettings)
                .map_err(|e| ProtocolError::malformed(msg_type, e.to_string()))
        }
        Some(MessageType::CodecHeader) => {
            let codec = frame.read_block()?;
            let payload = frame.read_block()?;
            String::from_utf8(codec)
                .map(|codec| Message::CodecHeader(CodecHeader { codec, payload }))
                .map_err(|_| ProtocolError::malformed(msg_type, "codec name is not UTF-8"))
        }
        Some(MessageType::WireChunk) => {
            let sec = frame.read_i32()?;
            let usec = frame.read_i32()?;
            let payload = frame.read_block()?;
            Ok(Message::WireChunk(WireChunk { sec, usec, payload }))
        }
        // Hello is outbound only in the client role
        _ => Ok(Message::Unknown {
            msg_type,
            size: header.size,
        }),
    }
}

fn frame(kind: MessageType, payload: Vec<u8>) -> Result<(MessageHeader, Vec<u8>), ProtocolError> {
    let size = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::malformed(kind as u16, "payload exceeds u32 length"))?;
    Ok((MessageHeader::new(kind, size), payload))
}

fn json_block(kind: MessageType, json: &[u8]) -> Result<Vec<u8>, ProtocolError> {
    let mut payload = Vec::with_capacity(4 + json.len());
    write_block(&mut payload, kind, json)?;
    Ok(payload)
}

fn write_block(buffer: &mut Vec<u8>, kind: MessageType, bytes: &[u8]) -> Result<(), ProtocolError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| ProtocolError::malformed(kind as u16, "block exceeds u32 length"))?;
    buffer.extend_from_slice(&len.to_le_bytes());
    buffer.extend_from_slice(bytes);
    Ok(())
}

/// Reads the fields of one frame without ever crossing its declared size.
struct FrameReader<'a, R> {
    reader: &'a mut R,
    msg_type: u16,
    remaining: u64,
}

impl<'a, R: Read> FrameReader<'a, R> {
    fn new(reader: &'a mut R, msg_type: u16, size: u64) -> Self {
        Self {
            reader,
            msg_type,
            remaining: size,
        }
    }

    fn claim(&mut self, len: u64) -> Result<(), ProtocolError> {
        if len > self.remaining {
            return Err(ProtocolError::malformed(
                self.msg_type,
                format!("needs {} bytes but only {} remain in frame", len, self.remaining),
            ));
        }
        self.remaining -= len;
        Ok(())
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N], ProtocolError> {
        self.claim(N as u64)?;
        let mut bytes = [0u8; N];
        self.reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    fn read_i32(&mut self) -> Result<i32, ProtocolError> {
        self.read_array().map(i32::from_le_bytes)
    }

    fn read_u32(&mut self) -> Result<u32, ProtocolError> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Length-prefixed block: u32 length followed by that many bytes
    fn read_block(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.read_u32()?;
        self.claim(u64::from(len))?;
        let mut bytes = vec![0u8; len as usize];
        self.reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Skip whatever is left of the frame
    fn finish(self) -> Result<(), ProtocolError> {
        if self.remaining == 0 {
            return Ok(());
        }

        debug!(
            "Skipping {} remaining bytes of message type {}",
            self.remaining, self.msg_type
        );
        discard(self.reader, self.remaining)
    }
}

/// Read and drop exactly `len` bytes
pub(crate) fn discard<R: Read>(reader: &mut R, len: u64) -> Result<(), ProtocolError> {
    let copied = io::copy(&mut reader.by_ref().take(len), &mut io::sink())?;
    if copied < len {
        return Err(ProtocolError::Transport(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("connection closed after {} of {} bytes", copied, len),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wire(message: &Message) -> Vec<u8> {
        let (header, payload) = message.encode().expect("encode");
        let mut bytes = header.to_bytes().to_vec();
        bytes.extend_from_slice(&payload);
        bytes
    }

    fn read_frame(cursor: &mut Cursor<Vec<u8>>) -> Result<Message, ProtocolError> {
        let mut raw = [0u8; HEADER_SIZE];
        cursor.read_exact(&mut raw)?;
        let header = MessageHeader::from_bytes(&raw);
        Message::decode(&header, cursor)
    }

    #[test]
    fn test_header_layout_is_little_endian() {
        let header = MessageHeader {
            msg_type: 2,
            id: 0x0102,
            refers_to: 7,
            sent_sec: -1,
            sent_usec: 10,
            received_sec: 11,
            received_usec: 12,
            size: 0x0A0B0C0D,
        };

        let bytes = header.to_bytes();
        assert_eq!(&bytes[0..2], &[2, 0]);
        assert_eq!(&bytes[2..4], &[0x02, 0x01]);
        assert_eq!(&bytes[6..10], &[0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(&bytes[22..26], &[0x0D, 0x0C, 0x0B, 0x0A]);
        assert_eq!(MessageHeader::from_bytes(&bytes), header);
    }

    #[test]
    fn test_decode_codec_header_scenario() {
        let mut bytes = vec![0x01, 0x00, 0x00, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&[0u8; 16]);
        bytes.extend_from_slice(&[0x0A, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(&[0x03, 0x00, 0x00, 0x00]);
        bytes.extend_from_slice(b"pcm");
        bytes.extend_from_slice(&[0x03, 0x00, 0x00, 0x00, 0xAA, 0xBB, 0xCC]);

        let mut cursor = Cursor::new(bytes);
        let message = read_frame(&mut cursor).unwrap();

        assert_eq!(
            message,
            Message::CodecHeader(CodecHeader {
                codec: "pcm".to_string(),
                payload: vec![0xAA, 0xBB, 0xCC],
            })
        );
        assert_eq!(cursor.position(), (HEADER_SIZE + 10) as u64);
    }

    #[test]
    fn test_decode_server_settings_scenario() {
        let json = br#"{"bufferMS":1000,"latency":0,"muted":false,"volume":100}"#;
        let mut payload = (json.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(json);

        let mut bytes = MessageHeader::new(MessageType::ServerSettings, payload.len() as u32)
            .to_bytes()
            .to_vec();
        bytes.extend_from_slice(&payload);

        let message = read_frame(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(
            message,
            Message::ServerSettings(ServerSettings {
                buffer_ms: 1000,
                latency: 0,
                muted: false,
                volume: 100,
            })
        );
    }

    #[test]
    fn test_hello_json_round_trip() {
        let hello = Hello {
            arch: "x86_64".to_string(),
            client_name: "snapclient".to_string(),
            host_name: "kitchen".to_string(),
            id: "4242".to_string(),
            instance: 1,
            mac: Some("00:11:22:33:44:55".to_string()),
            os: "linux".to_string(),
            snap_stream_protocol_version: PROTOCOL_VERSION,
            version: "0.1.0".to_string(),
        };

        let (header, payload) = hello.encode().unwrap();
        assert_eq!(header.msg_type, MessageType::Hello as u16);
        assert_eq!(header.size as usize, payload.len());

        let json_len = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
        assert_eq!(header.size, json_len + 4);

        let value: serde_json::Value = serde_json::from_slice(&payload[4..]).unwrap();
        assert_eq!(value["ID"], "4242");
        assert_eq!(value["HostName"], "kitchen");
        assert_eq!(value["SnapStreamProtocolVersion"], 2);

        assert_eq!(Hello::from_payload(&payload).unwrap(), hello);
    }

    #[test]
    fn test_inbound_hello_is_skipped() {
        let hello = Hello {
            arch: "arm".to_string(),
            client_name: "c".to_string(),
            host_name: "h".to_string(),
            id: "1".to_string(),
            instance: 1,
            mac: None,
            os: "linux".to_string(),
            snap_stream_protocol_version: 2,
            version: "1".to_string(),
        };
        let mut bytes = wire(&Message::Hello(hello));
        bytes.extend_from_slice(&wire(&Message::WireChunk(WireChunk {
            sec: 1,
            usec: 2,
            payload: vec![9; 4],
        })));

        let mut cursor = Cursor::new(bytes);
        assert!(matches!(
            read_frame(&mut cursor).unwrap(),
            Message::Unknown { msg_type: 5, .. }
        ));
        assert!(matches!(read_frame(&mut cursor).unwrap(), Message::WireChunk(_)));
    }

    #[test]
    fn test_unknown_types_consume_declared_size() {
        for msg_type in [0u16, 4, 6, 99, u16::MAX] {
            let mut bytes = wire(&Message::Unknown { msg_type, size: 37 });
            bytes.push(0xEE);

            let mut cursor = Cursor::new(bytes);
            let message = read_frame(&mut cursor).unwrap();
            assert_eq!(message, Message::Unknown { msg_type, size: 37 });
            assert_eq!(cursor.position(), (HEADER_SIZE + 37) as u64);
        }
    }

    #[test]
    fn test_oversized_unknown_is_not_encoded() {
        let err = Message::Unknown {
            msg_type: 99,
            size: u32::MAX,
        }
        .encode()
        .unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload { msg_type: 99, .. }));

        let (header, payload) = Message::Unknown {
            msg_type: 99,
            size: 16,
        }
        .encode()
        .unwrap();
        assert_eq!(header.size, 16);
        assert_eq!(payload, vec![0u8; 16]);
    }

    #[test]
    fn test_block_length_past_frame_is_malformed() {
        // WireChunk claims a 100 byte block inside a 20 byte frame
        let mut payload = Vec::new();
        payload.extend_from_slice(&1i32.to_le_bytes());
        payload.extend_from_slice(&2i32.to_le_bytes());
        payload.extend_from_slice(&100u32.to_le_bytes());
        payload.extend_from_slice(&[0u8; 8]);

        let mut bytes = MessageHeader::new(MessageType::WireChunk, payload.len() as u32)
            .to_bytes()
            .to_vec();
        bytes.extend_from_slice(&payload);
        let next = wire(&Message::Unknown { msg_type: 4, size: 3 });
        bytes.extend_from_slice(&next);

        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(err.is_recoverable(), "unexpected error: {err}");
        assert_eq!(cursor.position(), (HEADER_SIZE + 20) as u64);

        // Stream is still aligned
        assert_eq!(
            read_frame(&mut cursor).unwrap(),
            Message::Unknown { msg_type: 4, size: 3 }
        );
    }

    #[test]
    fn test_invalid_settings_json_is_malformed() {
        let json = b"{not json";
        let mut payload = (json.len() as u32).to_le_bytes().to_vec();
        payload.extend_from_slice(json);
        payload.extend_from_slice(&[1, 2, 3]);

        let mut bytes = MessageHeader::new(MessageType::ServerSettings, payload.len() as u32)
            .to_bytes()
            .to_vec();
        bytes.extend_from_slice(&payload);

        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(matches!(err, ProtocolError::MalformedPayload { msg_type: 3, .. }));
        assert_eq!(cursor.position() as usize, HEADER_SIZE + payload.len());
    }

    #[test]
    fn test_short_frame_for_timestamp_is_malformed() {
        let mut bytes = MessageHeader::new(MessageType::WireChunk, 6).to_bytes().to_vec();
        bytes.extend_from_slice(&[0u8; 6]);

        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(cursor.position() as usize, HEADER_SIZE + 6);
    }

    #[test]
    fn test_truncated_stream_is_transport_error() {
        let mut bytes = wire(&Message::CodecHeader(CodecHeader {
            codec: "pcm".to_string(),
            payload: vec![1; 32],
        }));
        bytes.truncate(bytes.len() - 10);

        let err = read_frame(&mut Cursor::new(bytes)).unwrap_err();
        assert!(matches!(err, ProtocolError::Transport(_)));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn test_oversized_known_frame_is_skipped() {
        let header = MessageHeader::new(MessageType::WireChunk, MAX_FRAME_SIZE + 1);
        let mut bytes = header.to_bytes().to_vec();
        bytes.resize(HEADER_SIZE + (MAX_FRAME_SIZE as usize + 1), 0);

        let mut cursor = Cursor::new(bytes);
        let err = read_frame(&mut cursor).unwrap_err();
        assert!(err.is_recoverable());
        assert_eq!(cursor.position(), (HEADER_SIZE as u64) + u64::from(MAX_FRAME_SIZE) + 1);
    }

    #[test]
    fn test_wire_chunk_keeps_negative_timestamps() {
        let chunk = WireChunk {
            sec: -5,
            usec: 999_999,
            payload: vec![1, 2, 3, 4, 5],
        };
        let message = read_frame(&mut Cursor::new(wire(&Message::WireChunk(chunk.clone()))));
        assert_eq!(message.unwrap(), Message::WireChunk(chunk));
    }
}
