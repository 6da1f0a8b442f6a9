// Copyright © 2024 The Johns Hopkins Applied Physics Laboratory LLC.
//
// This program is free software: you can redistribute it and/or
// modify it under the terms of the GNU Affero General Public License,
// version 3, as published by the Free Software Foundation.  If you
// would like to purchase a commercial license for this software, please
// contact APL’s Tech Transfer at 240-592-0817 or
// techtransfer@jhuapl.edu.
//
// This program is distributed in the hope that it will be useful, but
// WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU
// Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public
// License along with this program.  If not, see
// <https://www.gnu.org/licenses/>.

//! Transport over TCP sockets.
//!
//! Note that connections established in this way are neither
//! authenticated nor secure inherently.  See
//! [SASLTransport](crate::transport::sasl::SASLTransport) for a
//! secure transport that runs on top of this one.
//!
//! # Examples
//!
//! The following is an example of connecting, sending, and
//! receiving over TCP:
//!
//! ```
//! # use sasl_channels::config::TCPTransportConfig;
//! # use sasl_channels::transport::Transport;
//! # use sasl_channels::transport::tcp::TCPTransport;
//! # use std::io::Read;
//! # use std::io::Write;
//! # use std::net::TcpListener;
//! # use std::thread::spawn;
//! #
//! let listener = TcpListener::bind("127.0.0.1:0").unwrap();
//! let port = listener.local_addr().unwrap().port();
//! let listen = spawn(move || {
//!     let (mut stream, _) = listener.accept().unwrap();
//!     let mut buf = [0; 4];
//!
//!     stream.read_exact(&mut buf).unwrap();
//!     stream.write_all(&buf).unwrap();
//! });
//! let config = TCPTransportConfig::new(String::from("127.0.0.1"), port,
//!                                      Some(5000), None);
//! let mut transport = TCPTransport::new(config);
//! let mut buf = [0; 4];
//!
//! transport.open().unwrap();
//! transport.write_all(b"ping").unwrap();
//! transport.read_exact(&mut buf).unwrap();
//! transport.close().unwrap();
//! listen.join().unwrap();
//!
//! assert_eq!(b"ping", &buf);
//! ```
use std::io::Error;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::net::Shutdown;
use std::net::SocketAddr;
use std::net::TcpStream;
use std::net::ToSocketAddrs;

use log::debug;
use log::info;
use log::trace;
use log::warn;

use crate::config::TCPTransportConfig;
use crate::transport::Transport;

/// [Transport] over a TCP socket.
///
/// # Usage
///
/// A `TCPTransport` is created either from a [TCPTransportConfig]
/// using [new](TCPTransport::new), in which case it starts out closed
/// and connects when [open](Transport::open) is called, or from an
/// already-connected socket using
/// [from_stream](TCPTransport::from_stream).
#[derive(Debug)]
pub struct TCPTransport {
    config: Option<TCPTransportConfig>,
    inner: Option<TcpStream>
}

/// Error returned when a connection cannot be made to any address.
#[derive(Debug)]
pub struct TCPConnectError {
    host: String,
    port: u16
}

impl TCPTransport {
    /// Create a closed `TCPTransport` from its configuration.
    #[inline]
    pub fn new(config: TCPTransportConfig) -> Self {
        TCPTransport {
            config: Some(config),
            inner: None
        }
    }

    /// Create an open `TCPTransport` from a connected socket.
    ///
    /// A transport created this way cannot be reopened once closed.
    #[inline]
    pub fn from_stream(stream: TcpStream) -> Self {
        TCPTransport {
            config: None,
            inner: Some(stream)
        }
    }

    /// Get the configuration, if this transport has one.
    #[inline]
    pub fn config(&self) -> Option<&TCPTransportConfig> {
        self.config.as_ref()
    }

    /// Get the address of the peer.
    #[inline]
    pub fn peer_addr(&self) -> Result<SocketAddr, Error> {
        self.stream_ref()?.peer_addr()
    }

    #[inline]
    fn stream_ref(&self) -> Result<&TcpStream, Error> {
        self.inner
            .as_ref()
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "transport closed"))
    }

    #[inline]
    fn stream_mut(&mut self) -> Result<&mut TcpStream, Error> {
        self.inner
            .as_mut()
            .ok_or_else(|| Error::new(ErrorKind::NotConnected, "transport closed"))
    }

    /// Try every resolved address in order, returning the first
    /// successful connection.
    fn try_addrs(config: &TCPTransportConfig) -> Result<TcpStream, Error> {
        let addrs = (config.host(), config.port()).to_socket_addrs()?;

        for addr in addrs {
            debug!(target: "tcp-transport",
                   "attempting connection to {}",
                   addr);

            let res = match config.connect_timeout() {
                Some(timeout) => TcpStream::connect_timeout(&addr, timeout),
                None => TcpStream::connect(addr)
            };

            match res {
                Ok(stream) => return Ok(stream),
                Err(err) => {
                    info!(target: "tcp-transport",
                          concat!("error connecting to {}:{} ({}): ",
                                  "{}, trying next address"),
                          config.host(), config.port(), addr, err);
                }
            }
        }

        Err(Error::new(
            ErrorKind::NotConnected,
            TCPConnectError {
                host: config.host().to_string(),
                port: config.port()
            }
        ))
    }
}

impl Read for TCPTransport {
    #[inline]
    fn read(
        &mut self,
        buf: &mut [u8]
    ) -> Result<usize, Error> {
        self.stream_mut()?.read(buf)
    }

    #[inline]
    fn read_exact(
        &mut self,
        buf: &mut [u8]
    ) -> Result<(), Error> {
        self.stream_mut()?.read_exact(buf)
    }
}

impl Write for TCPTransport {
    #[inline]
    fn write(
        &mut self,
        buf: &[u8]
    ) -> Result<usize, Error> {
        self.stream_mut()?.write(buf)
    }

    #[inline]
    fn flush(&mut self) -> Result<(), Error> {
        self.stream_mut()?.flush()
    }

    fn write_all(
        &mut self,
        buf: &[u8]
    ) -> Result<(), Error> {
        self.stream_mut()?.write_all(buf)
    }
}

impl Transport for TCPTransport {
    #[inline]
    fn is_open(&self) -> bool {
        self.inner.is_some()
    }

    fn open(&mut self) -> Result<(), Error> {
        if self.inner.is_some() {
            return Ok(());
        }

        let config = self.config.as_ref().ok_or_else(|| {
            Error::new(ErrorKind::NotConnected, "no configuration to reopen")
        })?;

        trace!(target: "tcp-transport",
               "attempting to connect to {}:{}",
               config.host(), config.port());

        let stream = TCPTransport::try_addrs(config)?;

        stream.set_read_timeout(config.socket_timeout())?;
        stream.set_write_timeout(config.socket_timeout())?;

        if let Err(err) = stream.set_nodelay(true) {
            warn!(target: "tcp-transport",
                  "could not disable Nagle's algorithm ({})",
                  err);
        }

        self.inner = Some(stream);

        Ok(())
    }

    fn close(&mut self) -> Result<(), Error> {
        match self.inner.take() {
            Some(stream) => match stream.shutdown(Shutdown::Both) {
                // The peer may already have closed.
                Err(err) if err.kind() == ErrorKind::NotConnected => Ok(()),
                res => res
            },
            None => Ok(())
        }
    }
}

impl std::fmt::Display for TCPConnectError {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter
    ) -> Result<(), std::fmt::Error> {
        write!(
            f,
            "possible connection options for {}:{} exhausted",
            self.host, self.port
        )
    }
}

impl std::error::Error for TCPConnectError {}

#[cfg(test)]
use std::net::TcpListener;
#[cfg(test)]
use std::thread::spawn;

#[cfg(test)]
use crate::init;

#[test]
fn test_send_recv() {
    init();

    const FIRST_BYTES: [u8; 8] =
        [0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07];
    const SECOND_BYTES: [u8; 8] =
        [0x08, 0x09, 0x0a, 0x0b, 0x0c, 0x0d, 0x0e, 0x0f];
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let listen = spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0; FIRST_BYTES.len()];

        stream.read_exact(&mut buf).unwrap();
        stream.write_all(&SECOND_BYTES).expect("Expected success");
        stream.shutdown(Shutdown::Both).unwrap();

        assert_eq!(FIRST_BYTES, buf);
    });
    let yaml = format!("host: localhost\nport: {}\nconnect-timeout: 5000\n", port);
    let config = serde_yaml::from_str(&yaml).unwrap();
    let mut transport = TCPTransport::new(config);

    assert!(!transport.is_open());

    transport.open().expect("expected success");

    assert!(transport.is_open());

    transport.write_all(&FIRST_BYTES).expect("Expected success");
    transport.flush().unwrap();

    let mut buf = [0; SECOND_BYTES.len()];

    transport.read_exact(&mut buf).unwrap();

    assert_eq!(SECOND_BYTES, buf);

    listen.join().unwrap();
    transport.close().unwrap();

    assert!(!transport.is_open());
}

#[test]
fn test_closed_not_connected() {
    init();

    let config = TCPTransportConfig::new(String::from("localhost"), 1, None, None);
    let mut transport = TCPTransport::new(config);
    let mut buf = [0; 4];

    assert_eq!(
        ErrorKind::NotConnected,
        transport.read(&mut buf).unwrap_err().kind()
    );
    assert_eq!(
        ErrorKind::NotConnected,
        transport.write(&buf).unwrap_err().kind()
    );
    assert!(transport.close().is_ok());
}

#[test]
fn test_from_stream() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let listen = spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();

        stream.write_all(b"hello").unwrap();
    });
    let mut transport = TCPTransport::from_stream(TcpStream::connect(addr).unwrap());
    let mut buf = [0; 5];

    assert!(transport.is_open());
    assert_eq!(addr, transport.peer_addr().unwrap());

    transport.read_exact(&mut buf).unwrap();
    listen.join().unwrap();

    assert_eq!(b"hello", &buf);

    transport.close().unwrap();

    assert!(transport.open().is_err());
}
