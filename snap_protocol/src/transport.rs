use crate::protocol::{discard, Message, MessageHeader, ProtocolError, HEADER_SIZE};
use log::debug;
use std::io::{Read, Write};
use std::net::TcpStream;

/// Framed transport over a duplex byte stream.
///
/// Each header and its payload form one logical unit. Nothing is buffered
/// between calls beyond what the underlying reader and writer do themselves.
pub struct Connection<R = TcpStream, W = TcpStream> {
    reader: R,
    writer: W,
}

impl Connection {
    /// Create a new connection from a TCP stream
    pub fn new(stream: TcpStream) -> Result<Self, ProtocolError> {
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Connection {
            reader: read_stream,
            writer: write_stream,
        })
    }
}

impl<R: Read, W: Write> Connection<R, W> {
    pub fn from_parts(reader: R, writer: W) -> Self {
        Connection { reader, writer }
    }

    pub fn into_parts(self) -> (R, W) {
        (self.reader, self.writer)
    }

    /// Block until a full header has been read
    pub fn read_header(&mut self) -> Result<MessageHeader, ProtocolError> {
        let mut bytes = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut bytes)?;
        let header = MessageHeader::from_bytes(&bytes);

        debug!(
            "📥 Header: type={} id={} refers_to={} size={}",
            header.msg_type, header.id, header.refers_to, header.size
        );
        Ok(header)
    }

    /// Block until exactly `len` bytes have been read
    pub fn read_exact(&mut self, len: usize) -> Result<Vec<u8>, ProtocolError> {
        let mut bytes = vec![0u8; len];
        self.reader.read_exact(&mut bytes)?;
        Ok(bytes)
    }

    /// Read and drop exactly `len` bytes
    pub fn discard(&mut self, len: u64) -> Result<(), ProtocolError> {
        discard(&mut self.reader, len)
    }

    /// Decode the payload belonging to `header`, consuming exactly `header.size` bytes
    pub fn decode(&mut self, header: &MessageHeader) -> Result<Message, ProtocolError> {
        Message::decode(header, &mut self.reader)
    }

    /// Read the next header and its payload
    pub fn read_message(&mut self) -> Result<Message, ProtocolError> {
        let header = self.read_header()?;
        self.decode(&header)
    }

    pub fn write_header(&mut self, header: &MessageHeader) -> Result<(), ProtocolError> {
        self.writer.write_all(&header.to_bytes())?;
        self.writer.flush()?;
        Ok(())
    }

    pub fn write_exact(&mut self, bytes: &[u8]) -> Result<(), ProtocolError> {
        self.writer.write_all(bytes)?;
        self.writer.flush()?;
        Ok(())
    }

    /// Write a message to the connection
    pub fn write_message(&mut self, message: &Message) -> Result<(), ProtocolError> {
        let (header, payload) = message.encode()?;
        self.write_header(&header)?;
        self.write_exact(&payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{CodecHeader, ServerSettings, WireChunk};
    use std::io::{self, Cursor};

    #[test]
    fn test_written_messages_read_back_in_order() {
        let messages = vec![
            Message::ServerSettings(ServerSettings {
                buffer_ms: 1000,
                latency: 20,
                muted: true,
                volume: 42,
            }),
            Message::CodecHeader(CodecHeader {
                codec: "pcm".to_string(),
                payload: vec![7; 44],
            }),
            Message::Unknown {
                msg_type: 4,
                size: 8,
            },
            Message::WireChunk(WireChunk {
                sec: 3,
                usec: 4,
                payload: vec![1; 100],
            }),
        ];

        let mut writer = Connection::from_parts(io::empty(), Vec::new());
        for message in &messages {
            writer.write_message(message).unwrap();
        }
        let (_, bytes) = writer.into_parts();

        let mut reader = Connection::from_parts(Cursor::new(bytes), io::sink());
        for expected in &messages {
            assert_eq!(&reader.read_message().unwrap(), expected);
        }
        assert!(matches!(
            reader.read_header(),
            Err(ProtocolError::Transport(_))
        ));
    }

    #[test]
    fn test_read_exact_and_discard() {
        let mut connection =
            Connection::from_parts(Cursor::new((0u8..10).collect::<Vec<_>>()), io::sink());

        assert_eq!(connection.read_exact(3).unwrap(), vec![0, 1, 2]);
        connection.discard(4).unwrap();
        assert_eq!(connection.read_exact(2).unwrap(), vec![7, 8]);
        assert!(connection.discard(5).is_err());
    }
}
