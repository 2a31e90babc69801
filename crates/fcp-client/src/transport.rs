//! TCP transport and protocol handshake.
//!
//! The [`Connection`] owns the socket for the lifetime of one engine
//! instance. After [`Connection::open`] completes the handshake, ownership
//! passes to the coordinator loop, which is the only code that reads or
//! writes it.

use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::{debug, trace};

use fcp_wire::{Command, Message, decode, encode};

use crate::config::Config;
use crate::errors::FcpError;

const TRANSPORT_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");

/// Protocol version announced in the handshake.
pub const EXPECTED_VERSION: &str = "2.0";

/// Header word acknowledging the handshake.
const NODE_HELLO: &str = "NodeHello";

/// A connected, handshaken FCP socket.
#[derive(Debug)]
pub(crate) struct Connection {
    stream: TcpStream,
}

impl Connection {
    /// Connects to the daemon and performs the `ClientHello`/`NodeHello`
    /// handshake, returning the connection and the daemon's hello message.
    pub(crate) fn open(
        config: &Config,
        session_name: &str,
    ) -> Result<(Self, Message), FcpError> {
        let endpoint = config.endpoint.to_string();
        let address = resolve_tcp_address(&config.endpoint.host, config.endpoint.port)
            .map_err(|source| FcpError::connection_refused(&endpoint, source))?;
        let stream = TcpStream::connect_timeout(&address, config.connect_timeout())
            .map_err(|source| FcpError::connection_refused(&endpoint, source))?;
        stream.set_nodelay(true).map_err(FcpError::io)?;
        let mut connection = Self { stream };

        let hello = Command::new("ClientHello")
            .field("Name", session_name)
            .field("ExpectedVersion", EXPECTED_VERSION);
        connection.send(&hello)?;
        let reply = connection.recv()?;
        if reply.header() != NODE_HELLO {
            return Err(FcpError::Handshake {
                header: reply.header().to_owned(),
            });
        }
        debug!(
            target: TRANSPORT_TARGET,
            endpoint = %endpoint,
            node = reply.text("Version").unwrap_or("unknown"),
            "handshake complete"
        );
        Ok((connection, reply))
    }

    /// Checks whether an inbound frame is waiting, blocking at most
    /// `timeout`. Returns `Disconnected` once the daemon closes the socket.
    pub(crate) fn poll_incoming(&mut self, timeout: Duration) -> Result<bool, FcpError> {
        self.stream
            .set_read_timeout(Some(timeout))
            .map_err(FcpError::io)?;
        let mut probe = [0_u8; 1];
        match self.stream.peek(&mut probe) {
            Ok(0) => Err(FcpError::Disconnected),
            Ok(_) => Ok(true),
            Err(error)
                if error.kind() == io::ErrorKind::WouldBlock
                    || error.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(false)
            }
            Err(error) => Err(FcpError::io(error)),
        }
    }

    /// Reads one complete frame, blocking until it arrives.
    pub(crate) fn recv(&mut self) -> Result<Message, FcpError> {
        self.stream.set_read_timeout(None).map_err(FcpError::io)?;
        let message = decode(&mut self.stream)?;
        trace!(
            target: TRANSPORT_TARGET,
            header = message.header(),
            identifier = message.identifier().unwrap_or("-"),
            "frame received"
        );
        Ok(message)
    }

    /// Writes one complete command frame.
    pub(crate) fn send(&mut self, command: &Command) -> Result<(), FcpError> {
        trace!(
            target: TRANSPORT_TARGET,
            header = command.header(),
            identifier = command.request_identifier().unwrap_or("-"),
            "frame sent"
        );
        encode(command, &mut self.stream)?;
        Ok(())
    }
}

fn resolve_tcp_address(host: &str, port: u16) -> io::Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| io::Error::new(io::ErrorKind::AddrNotAvailable, "no resolved addresses"))
}
