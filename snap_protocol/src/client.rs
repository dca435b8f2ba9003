use crate::protocol::{Hello, Message, MessageHeader, ProtocolError};
use crate::transport::Connection;
use log::{debug, info};
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::Arc;
use std::time::Duration;

/// Default port of the snapcast stream protocol
pub const DEFAULT_PORT: u16 = 1704;

/// Blocking TCP client for a snapcast server
pub struct SnapClient<R = TcpStream, W = TcpStream> {
    connection: Connection<R, W>,
    server_address: String,
    shutdown: Option<ShutdownHandle>,
}

impl SnapClient {
    /// Connect to the server.
    ///
    /// `read_timeout` is applied to the socket. A read that times out fails
    /// like any other transport error, there is no partial-frame resume.
    pub fn connect(
        host: &str,
        port: u16,
        read_timeout: Option<Duration>,
    ) -> Result<Self, ProtocolError> {
        let address = format!("{}:{}", host, port);
        info!("📡 Connecting to snapserver at {}", address);

        let stream = TcpStream::connect(&address).map_err(|source| ProtocolError::Connect {
            address: address.clone(),
            source,
        })?;
        stream.set_read_timeout(read_timeout)?;
        stream.set_nodelay(true)?;

        let shutdown = ShutdownHandle {
            stream: Arc::new(stream.try_clone()?),
        };
        let connection = Connection::new(stream)?;

        info!("✅ Connected to snapserver");

        Ok(SnapClient {
            connection,
            server_address: address,
            shutdown: Some(shutdown),
        })
    }
}

impl<R: Read, W: Write> SnapClient<R, W> {
    /// Wrap an already established connection, e.g. an in-memory one
    pub fn from_connection(connection: Connection<R, W>, server_address: impl Into<String>) -> Self {
        SnapClient {
            connection,
            server_address: server_address.into(),
            shutdown: None,
        }
    }

    /// Send the handshake. The protocol has no acknowledgement for it.
    pub fn send_hello(&mut self, hello: &Hello) -> Result<(), ProtocolError> {
        debug!("📤 Sending Hello as {} ({})", hello.client_name, hello.id);

        let (header, payload) = hello.encode()?;
        self.connection.write_header(&header)?;
        self.connection.write_exact(&payload)?;

        info!(
            "👋 Sent Hello: host={} os={} arch={} instance={}",
            hello.host_name, hello.os, hello.arch, hello.instance
        );
        Ok(())
    }

    /// Read the next header (blocking)
    pub fn read_header(&mut self) -> Result<MessageHeader, ProtocolError> {
        self.connection.read_header()
    }

    /// Decode the payload of a header returned by [`SnapClient::read_header`]
    pub fn decode(&mut self, header: &MessageHeader) -> Result<Message, ProtocolError> {
        self.connection.decode(header)
    }

    /// Read a complete message (blocking)
    pub fn read_message(&mut self) -> Result<Message, ProtocolError> {
        self.connection.read_message()
    }

    /// Handle that can close the socket from another thread.
    /// `None` for connections not backed by a socket.
    pub fn shutdown_handle(&self) -> Option<ShutdownHandle> {
        self.shutdown.clone()
    }

    /// Get the server address
    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    pub fn into_connection(self) -> Connection<R, W> {
        self.connection
    }
}

/// Closes the underlying socket, which unblocks a pending read with an error
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    stream: Arc<TcpStream>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        match self.stream.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}
