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

//! SASL-secured framed transport.
//!
//! A [SASLTransport] runs the negotiation handshake over an
//! underlying [Transport], then carries application traffic in
//! frames protected by the negotiated security layer.  Each frame has
//! the form:
//!
//! ```text
//! [4-byte big-endian length][mechanism-wrapped payload]
//! ```
//!
//! Writes are buffered until [flush](Write::flush), which wraps the
//! entire buffer into a single frame.  Reads unwrap one frame at a
//! time, delivering its contents across as many calls as needed.
//!
//! A `SASLTransport` is itself a [Transport], so it can be used
//! anywhere the underlying transport could.
use std::cmp::min;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

use log::debug;
use log::error;
use log::info;
use log::trace;

use crate::client::SASLClient;
use crate::config::SASLConfig;
use crate::config::SASLConnectConfig;
use crate::mechanism::gssapi::GSSAPIContext;
#[cfg(feature = "gssapi")]
use crate::mechanism::gssapi::KerberosContext;
use crate::mechanism::Mechanism;
use crate::mechanism::SASLMechanism;
use crate::negotiate::NegotiationError;
use crate::transport::tcp::TCPTransport;
use crate::transport::Transport;

/// Errors in the frame layer.
///
/// All of these are fatal; the transport must be closed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FramingError {
    /// A frame declared a length larger than the maximum.
    Oversize {
        /// Declared length.
        size: u32,
        /// Maximum length.
        max: u32
    },
    /// More bytes were delivered than the frame contained.
    Accounting,
    /// An outgoing frame is too large for its length prefix.
    TooLarge {
        /// Size of the wrapped payload.
        size: usize
    },
    /// An earlier read hit a fatal framing error or failed partway
    /// through a frame.
    Broken
}

/// Transport carrying SASL-protected frames over another transport.
///
/// # Usage
///
/// A `SASLTransport` is created from an underlying transport and a
/// [SASLClient] using [new](SASLTransport::new), or from
/// configuration using [create](SASLTransport::create),
/// [from_params](SASLTransport::from_params), or
/// [connect](SASLTransport::connect).  Negotiation happens when the
/// transport is [opened](Transport::open), or when
/// [negotiate](SASLTransport::negotiate) is called directly.
///
/// The mechanism is disposed when the transport is closed, when
/// negotiation fails, or when the transport is dropped.
pub struct SASLTransport<Stream: Transport, M: Mechanism> {
    client: SASLClient<M>,
    stream: Stream,
    /// Application bytes waiting for the next flush.
    write_buf: Vec<u8>,
    /// Unwrapped bytes of the current frame.
    read_buf: VecDeque<u8>,
    /// Undelivered raw bytes of the current frame.
    raw_frame_size: u32,
    /// Undelivered unwrapped bytes of the current frame.
    frame_size: usize,
    max_length: u32,
    /// Set by a fatal framing error; cleared only by closing.
    broken: bool
}

impl<Stream: Transport, M: Mechanism> SASLTransport<Stream, M> {
    /// Create a `SASLTransport` from its components.
    ///
    /// Frames longer than `max_length` are rejected.
    #[inline]
    pub fn new(
        stream: Stream,
        client: SASLClient<M>,
        max_length: u32
    ) -> Self {
        SASLTransport {
            client: client,
            stream: stream,
            write_buf: Vec::new(),
            read_buf: VecDeque::new(),
            raw_frame_size: 0,
            frame_size: 0,
            max_length: max_length,
            broken: false
        }
    }

    /// Get the SASL client.
    #[inline]
    pub fn client(&self) -> &SASLClient<M> {
        &self.client
    }

    /// Get the underlying transport.
    #[inline]
    pub fn stream(&self) -> &Stream {
        &self.stream
    }

    /// Get the maximum frame length.
    #[inline]
    pub fn max_length(&self) -> u32 {
        self.max_length
    }

    /// Get the number of bytes of the current frame not yet read.
    ///
    /// Reading at most this many bytes never touches the network.
    #[inline]
    pub fn remaining_bytes(&self) -> usize {
        self.frame_size
    }

    /// Run the negotiation handshake.
    ///
    /// The underlying transport is opened first if necessary.  On
    /// failure, the mechanism is disposed.
    pub fn negotiate(&mut self) -> Result<(), NegotiationError> {
        match crate::negotiate::negotiate(
            &mut self.stream,
            &mut self.client,
            self.max_length
        ) {
            Ok(()) => {
                info!(target: "sasl-transport",
                      "negotiated {} with {} (qop {})",
                      self.client.mechanism_name(),
                      self.client.host(),
                      self.client
                          .config()
                          .qop()
                          .map(|qop| qop.name())
                          .unwrap_or("auth"));

                Ok(())
            }
            Err(err) => {
                error!(target: "sasl-transport",
                       "{} negotiation with {} failed ({})",
                       self.client.mechanism_name(),
                       self.client.host(),
                       err);

                self.client.dispose();

                Err(err)
            }
        }
    }

    #[inline]
    fn check_negotiated(&self) -> Result<(), std::io::Error> {
        if self.client.is_complete() {
            Ok(())
        } else {
            Err(std::io::Error::new(
                ErrorKind::NotConnected,
                "SASL negotiation has not completed"
            ))
        }
    }

    /// Read a frame header, returning `None` on a clean end of
    /// stream.
    fn read_header(&mut self) -> Result<Option<u32>, std::io::Error> {
        let mut header = [0; 4];
        let mut filled = 0;

        while filled < header.len() {
            match self.stream.read(&mut header[filled..]) {
                Ok(0) if filled == 0 => return Ok(None),
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed inside frame header"
                    ))
                }
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err)
            }
        }

        Ok(Some(u32::from_be_bytes(header)))
    }

    /// Read and unwrap the next non-empty frame, returning `false`
    /// on a clean end of stream.
    fn read_frame(&mut self) -> Result<bool, std::io::Error> {
        while self.frame_size == 0 {
            if self.broken || self.raw_frame_size != 0 {
                return Err(framing_error(FramingError::Broken));
            }

            let size = match self.read_header()? {
                Some(size) => size,
                None => {
                    debug!(target: "sasl-transport",
                           "peer closed connection");

                    return Ok(false);
                }
            };

            if size > self.max_length {
                error!(target: "sasl-transport",
                       "frame length {} exceeds maximum {}",
                       size, self.max_length);

                self.broken = true;

                return Err(framing_error(FramingError::Oversize {
                    size: size,
                    max: self.max_length
                }));
            }

            if size == 0 {
                trace!(target: "sasl-transport",
                       "skipping empty frame");

                continue;
            }

            self.raw_frame_size = size;

            let mut raw = vec![0; size as usize];

            self.stream.read_exact(&mut raw)?;
            self.raw_frame_size = 0;

            let data = match self.client.decode(&raw) {
                Ok(data) => data,
                Err(err) => {
                    error!(target: "sasl-transport",
                           "failed to unwrap frame ({})",
                           err);

                    self.broken = true;

                    return Err(std::io::Error::new(
                        ErrorKind::InvalidData,
                        err
                    ));
                }
            };

            trace!(target: "sasl-transport",
                   "read frame of {} bytes ({} unwrapped)",
                   size, data.len());

            self.frame_size = data.len();
            self.read_buf.extend(data);
        }

        Ok(true)
    }
}

impl<Stream, Ctx> SASLTransport<Stream, SASLMechanism<Ctx>>
where
    Stream: Transport,
    Ctx: GSSAPIContext
{
    /// Create a `SASLTransport` from a configuration.
    ///
    /// `host` is the name of the server; `ctx` is only called for
    /// `GSSAPI` configurations.
    pub fn create<F>(
        stream: Stream,
        host: &str,
        config: &SASLConfig,
        ctx: F
    ) -> Self
    where
        F: FnOnce() -> Ctx {
        let mech = SASLMechanism::create(config, host, ctx);
        let client = SASLClient::new(host.to_string(), mech);

        SASLTransport::new(stream, client, config.max_length())
    }

    /// Create a `SASLTransport` from a mechanism name and a string
    /// parameter map.
    ///
    /// See [SASLConfig::from_params] for the parameters.
    pub fn from_params<F>(
        stream: Stream,
        host: &str,
        name: &str,
        params: &HashMap<String, String>,
        max_length: u32,
        ctx: F
    ) -> Result<Self, NegotiationError>
    where
        F: FnOnce() -> Ctx {
        let config = SASLConfig::from_params(name, params, max_length)?;

        Ok(SASLTransport::create(stream, host, &config, ctx))
    }
}

impl<Ctx> SASLTransport<TCPTransport, SASLMechanism<Ctx>>
where
    Ctx: GSSAPIContext
{
    /// Connect over TCP and negotiate, using `ctx` to create the
    /// `GSSAPI` security context if needed.
    pub fn connect_with<F>(
        config: &SASLConnectConfig,
        ctx: F
    ) -> Result<Self, NegotiationError>
    where
        F: FnOnce() -> Ctx {
        let stream = TCPTransport::new(config.tcp().clone());
        let mut transport = SASLTransport::create(
            stream,
            config.tcp().host(),
            config.sasl(),
            ctx
        );

        transport.negotiate()?;

        Ok(transport)
    }
}

#[cfg(feature = "gssapi")]
impl SASLTransport<TCPTransport, SASLMechanism<KerberosContext>> {
    /// Connect over TCP and negotiate, using Kerberos for `GSSAPI`.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// # use sasl_channels::transport::sasl::SASLTransport;
    /// # use std::io::Write;
    /// #
    /// let yaml = concat!("host: node1.example.com\n",
    ///                    "port: 10000\n",
    ///                    "sasl:\n",
    ///                    "  mechanism:\n",
    ///                    "    gssapi:\n",
    ///                    "      service: hive\n");
    /// let config = serde_yaml::from_str(yaml).unwrap();
    /// let mut transport = SASLTransport::connect(&config).unwrap();
    ///
    /// transport.write_all(b"request").unwrap();
    /// transport.flush().unwrap();
    /// ```
    #[inline]
    pub fn connect(
        config: &SASLConnectConfig
    ) -> Result<Self, NegotiationError> {
        SASLTransport::connect_with(config, KerberosContext::new)
    }
}

#[inline]
fn framing_error(err: FramingError) -> std::io::Error {
    std::io::Error::new(ErrorKind::InvalidData, err)
}

impl<Stream: Transport, M: Mechanism> Read for SASLTransport<Stream, M> {
    fn read(
        &mut self,
        buf: &mut [u8]
    ) -> Result<usize, std::io::Error> {
        self.check_negotiated()?;

        if buf.is_empty() {
            return Ok(0);
        }

        if self.frame_size == 0 && !self.read_frame()? {
            return Ok(0);
        }

        let n = min(buf.len(), self.read_buf.len());

        for (dst, src) in buf.iter_mut().zip(self.read_buf.drain(..n)) {
            *dst = src;
        }

        match self.frame_size.checked_sub(n) {
            Some(size) => {
                self.frame_size = size;

                Ok(n)
            }
            None => {
                self.broken = true;
                self.frame_size = 0;
                self.read_buf.clear();

                Err(framing_error(FramingError::Accounting))
            }
        }
    }
}

impl<Stream: Transport, M: Mechanism> Write for SASLTransport<Stream, M> {
    #[inline]
    fn write(
        &mut self,
        buf: &[u8]
    ) -> Result<usize, std::io::Error> {
        self.check_negotiated()?;
        self.write_buf.extend_from_slice(buf);

        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), std::io::Error> {
        self.check_negotiated()?;

        let data = std::mem::take(&mut self.write_buf);
        let wrapped = self.client.encode(&data).map_err(|err| {
            std::io::Error::new(ErrorKind::InvalidData, err)
        })?;

        if wrapped.len() > u32::MAX as usize {
            return Err(framing_error(FramingError::TooLarge {
                size: wrapped.len()
            }));
        }

        trace!(target: "sasl-transport",
               "writing frame of {} bytes ({} unwrapped)",
               wrapped.len(), data.len());

        self.stream
            .write_all(&(wrapped.len() as u32).to_be_bytes())?;

        if !wrapped.is_empty() {
            self.stream.write_all(&wrapped)?;
        }

        self.stream.flush()
    }
}

impl<Stream: Transport, M: Mechanism> Transport for SASLTransport<Stream, M> {
    #[inline]
    fn is_open(&self) -> bool {
        self.stream.is_open() && self.client.is_complete()
    }

    fn open(&mut self) -> Result<(), std::io::Error> {
        if self.is_open() {
            Ok(())
        } else {
            self.negotiate().map_err(std::io::Error::from)
        }
    }

    fn close(&mut self) -> Result<(), std::io::Error> {
        debug!(target: "sasl-transport",
               "closing connection to {}",
               self.client.host());

        self.client.dispose();
        self.write_buf.clear();
        self.read_buf.clear();
        self.frame_size = 0;
        self.raw_frame_size = 0;
        self.broken = false;
        self.stream.close()
    }
}

impl Display for FramingError {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            FramingError::Oversize { size, max } => write!(
                f,
                "frame length {} exceeds maximum length {}",
                size, max
            ),
            FramingError::Accounting => {
                write!(f, "frame length accounting went negative")
            }
            FramingError::TooLarge { size } => {
                write!(f, "frame of {} bytes is too large to send", size)
            }
            FramingError::Broken => {
                write!(f, "frame stream broken by an earlier error")
            }
        }
    }
}

impl Error for FramingError {}

#[cfg(test)]
use std::net::TcpListener;
#[cfg(test)]
use std::net::TcpStream;
#[cfg(test)]
use std::sync::atomic::Ordering;
#[cfg(test)]
use std::thread::spawn;

#[cfg(test)]
use crate::config::SASLMechanismConfig;
#[cfg(test)]
use crate::init;
#[cfg(test)]
use crate::mechanism::gssapi::server_offer;
#[cfg(test)]
use crate::mechanism::gssapi::GSSAPIMechanism;
#[cfg(test)]
use crate::mechanism::gssapi::ScriptedContext;
#[cfg(test)]
use crate::mechanism::plain::PlainMechanism;
#[cfg(test)]
use crate::mechanism::DEFAULT_MAX_LENGTH;
#[cfg(test)]
use crate::negotiate::read_sasl_msg;
#[cfg(test)]
use crate::negotiate::write_sasl_msg;
#[cfg(test)]
use crate::negotiate::SASLStatus;

#[cfg(test)]
fn connected() -> (TCPTransport, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();

    (TCPTransport::from_stream(client), server)
}

#[cfg(test)]
fn plain_transport(
    stream: TCPTransport,
    max_length: u32
) -> SASLTransport<TCPTransport, PlainMechanism> {
    let mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );

    SASLTransport::new(
        stream,
        SASLClient::new(String::from("node1"), mech),
        max_length
    )
}

/// Server side of a `PLAIN` handshake.
#[cfg(test)]
fn plain_server(server: &mut TcpStream) {
    let start = read_sasl_msg(server, DEFAULT_MAX_LENGTH).unwrap();

    assert_eq!(b"PLAIN", start.payload());

    read_sasl_msg(server, DEFAULT_MAX_LENGTH).unwrap();
    write_sasl_msg(server, SASLStatus::Complete, b"").unwrap();
}

#[cfg(test)]
fn write_frame(
    server: &mut TcpStream,
    payload: &[u8]
) {
    server
        .write_all(&(payload.len() as u32).to_be_bytes())
        .unwrap();
    server.write_all(payload).unwrap();
}

#[cfg(test)]
fn read_frame(server: &mut TcpStream) -> Vec<u8> {
    let mut header = [0; 4];

    server.read_exact(&mut header).unwrap();

    let mut payload = vec![0; u32::from_be_bytes(header) as usize];

    server.read_exact(&mut payload).unwrap();

    payload
}

#[cfg(test)]
fn framing_kind(err: &std::io::Error) -> Option<FramingError> {
    err.get_ref()
        .and_then(|inner| inner.downcast_ref::<FramingError>())
        .cloned()
}

#[test]
fn test_frame_round_trip() {
    init();

    let large: Vec<u8> = (0..200000).map(|i| (i % 251) as u8).collect();
    let expected = large.clone();
    let (stream, mut server) = connected();
    let listen = spawn(move || {
        plain_server(&mut server);

        assert_eq!(b"hello world".to_vec(), read_frame(&mut server));
        // An empty flush still produces a frame.
        assert_eq!(Vec::<u8>::new(), read_frame(&mut server));
        assert_eq!(large, read_frame(&mut server));

        write_frame(&mut server, b"");
        write_frame(&mut server, b"reply");
        write_frame(&mut server, &large);
    });
    let mut transport = plain_transport(stream, DEFAULT_MAX_LENGTH);

    transport.open().unwrap();

    assert!(transport.is_open());

    transport.write_all(b"hello ").unwrap();
    transport.write_all(b"world").unwrap();
    transport.flush().unwrap();
    transport.flush().unwrap();
    transport.write_all(&expected).unwrap();
    transport.flush().unwrap();

    let mut buf = [0; 5];

    transport.read_exact(&mut buf).unwrap();

    assert_eq!(b"reply", &buf);
    assert_eq!(0, transport.remaining_bytes());

    let mut big = vec![0; expected.len()];

    transport.read_exact(&mut big).unwrap();

    assert_eq!(expected, big);

    listen.join().unwrap();
}

#[test]
fn test_partial_reads() {
    init();

    let (stream, mut server) = connected();
    let listen = spawn(move || {
        plain_server(&mut server);
        write_frame(&mut server, b"abcdefgh");
    });
    let mut transport = plain_transport(stream, DEFAULT_MAX_LENGTH);
    let mut buf = [0; 3];

    transport.negotiate().unwrap();

    assert_eq!(3, transport.read(&mut buf).unwrap());
    assert_eq!(b"abc", &buf);
    assert_eq!(5, transport.remaining_bytes());
    assert_eq!(3, transport.read(&mut buf).unwrap());
    assert_eq!(2, transport.remaining_bytes());
    assert_eq!(2, transport.read(&mut buf).unwrap());
    assert_eq!(b"gh", &buf[..2]);
    assert_eq!(0, transport.remaining_bytes());

    listen.join().unwrap();
}

#[test]
fn test_oversize_frame_rejected() {
    init();

    let (stream, mut server) = connected();
    let listen = spawn(move || {
        plain_server(&mut server);
        server.write_all(&1000u32.to_be_bytes()).unwrap();
        // The body of the rejected frame looks like a valid frame.
        write_frame(&mut server, b"forge");
    });
    let mut transport = plain_transport(stream, 16);
    let mut buf = [0; 16];

    transport.negotiate().unwrap();
    listen.join().unwrap();

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(ErrorKind::InvalidData, err.kind());
    assert_eq!(
        Some(FramingError::Oversize {
            size: 1000,
            max: 16
        }),
        framing_kind(&err)
    );

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(Some(FramingError::Broken), framing_kind(&err));
}

#[test]
fn test_frame_at_max_length() {
    init();

    let (stream, mut server) = connected();
    let listen = spawn(move || {
        plain_server(&mut server);
        write_frame(&mut server, &[b'x'; 16]);
        write_frame(&mut server, &[b'y'; 17]);
    });
    let mut transport = plain_transport(stream, 16);
    let mut buf = [0; 16];

    transport.negotiate().unwrap();
    listen.join().unwrap();
    transport.read_exact(&mut buf).unwrap();

    assert_eq!([b'x'; 16], buf);

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(
        Some(FramingError::Oversize {
            size: 17,
            max: 16
        }),
        framing_kind(&err)
    );
}

#[test]
fn test_clean_eof() {
    init();

    let (stream, mut server) = connected();
    let listen = spawn(move || {
        plain_server(&mut server);
        write_frame(&mut server, b"last");
    });
    let mut transport = plain_transport(stream, DEFAULT_MAX_LENGTH);
    let mut buf = [0; 4];

    transport.negotiate().unwrap();
    listen.join().unwrap();
    transport.read_exact(&mut buf).unwrap();

    assert_eq!(b"last", &buf);
    assert_eq!(0, transport.read(&mut buf).unwrap());
}

#[test]
fn test_eof_inside_header() {
    init();

    let (stream, mut server) = connected();
    let listen = spawn(move || {
        plain_server(&mut server);
        server.write_all(&[0, 0]).unwrap();
    });
    let mut transport = plain_transport(stream, DEFAULT_MAX_LENGTH);
    let mut buf = [0; 4];

    transport.negotiate().unwrap();
    listen.join().unwrap();

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(ErrorKind::UnexpectedEof, err.kind());
}

#[test]
fn test_eof_inside_frame_breaks_transport() {
    init();

    let (stream, mut server) = connected();
    let listen = spawn(move || {
        plain_server(&mut server);
        server.write_all(&8u32.to_be_bytes()).unwrap();
        server.write_all(b"abc").unwrap();
    });
    let mut transport = plain_transport(stream, DEFAULT_MAX_LENGTH);
    let mut buf = [0; 8];

    transport.negotiate().unwrap();
    listen.join().unwrap();

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(ErrorKind::UnexpectedEof, err.kind());

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(Some(FramingError::Broken), framing_kind(&err));
}

#[test]
fn test_accounting_error() {
    init();

    let (stream, _server) = connected();
    let mut transport = plain_transport(stream, DEFAULT_MAX_LENGTH);
    let mut buf = [0; 3];

    // PLAIN completes without the server's involvement.
    transport.client.start().unwrap();
    transport.read_buf.extend(b"abc".iter().copied());
    transport.frame_size = 1;

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(Some(FramingError::Accounting), framing_kind(&err));

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(Some(FramingError::Broken), framing_kind(&err));
}

#[test]
fn test_io_before_negotiation() {
    init();

    let (stream, _server) = connected();
    let mut transport = plain_transport(stream, DEFAULT_MAX_LENGTH);
    let mut buf = [0; 3];

    assert!(!transport.is_open());
    assert_eq!(
        ErrorKind::NotConnected,
        transport.read(&mut buf).unwrap_err().kind()
    );
    assert_eq!(
        ErrorKind::NotConnected,
        transport.write(b"abc").unwrap_err().kind()
    );
}

/// Server side of a `GSSAPI` handshake with a [ScriptedContext]
/// client, negotiating integrity protection.
#[cfg(test)]
fn gssapi_server(server: &mut TcpStream) {
    let start = read_sasl_msg(server, DEFAULT_MAX_LENGTH).unwrap();

    assert_eq!(b"GSSAPI", start.payload());
    assert_eq!(
        b"leg-1",
        read_sasl_msg(server, DEFAULT_MAX_LENGTH).unwrap().payload()
    );
    write_sasl_msg(server, SASLStatus::Ok, b"server-token").unwrap();
    assert_eq!(
        b"leg-2",
        read_sasl_msg(server, DEFAULT_MAX_LENGTH).unwrap().payload()
    );
    write_sasl_msg(server, SASLStatus::Ok, &server_offer(0x03, 65536))
        .unwrap();

    let layer = read_sasl_msg(server, DEFAULT_MAX_LENGTH).unwrap();

    assert_eq!(&[b'I', 0x02, 0x01, 0x00, 0x00][..], &layer.payload()[..5]);

    write_sasl_msg(server, SASLStatus::Complete, b"").unwrap();
}

#[cfg(test)]
fn gssapi_transport(
    stream: TCPTransport,
    ctx: ScriptedContext
) -> SASLTransport<TCPTransport, GSSAPIMechanism<ScriptedContext>> {
    let mut mech = GSSAPIMechanism::new(
        ctx,
        String::from("hive"),
        String::from("node1"),
        None
    );

    mech.set_max_length(65536);

    SASLTransport::new(
        stream,
        SASLClient::new(String::from("node1"), mech),
        DEFAULT_MAX_LENGTH
    )
}

#[test]
fn test_gssapi_frames_wrapped() {
    init();

    let ctx = ScriptedContext::default();
    let releases = ctx.releases.clone();
    let (stream, mut server) = connected();
    let listen = spawn(move || {
        gssapi_server(&mut server);

        assert_eq!(b"Irequest".to_vec(), read_frame(&mut server));

        write_frame(&mut server, b"Iresponse");
    });
    let mut transport = gssapi_transport(stream, ctx);

    transport.open().unwrap();
    transport.write_all(b"request").unwrap();
    transport.flush().unwrap();

    let mut buf = [0; 8];

    transport.read_exact(&mut buf).unwrap();

    assert_eq!(b"response", &buf);

    listen.join().unwrap();
    transport.close().unwrap();

    assert!(!transport.is_open());
    assert_eq!(1, releases.load(Ordering::SeqCst));

    drop(transport);

    assert_eq!(1, releases.load(Ordering::SeqCst));
}

#[test]
fn test_unwrap_failure_breaks_transport() {
    init();

    let (stream, mut server) = connected();
    let listen = spawn(move || {
        gssapi_server(&mut server);
        write_frame(&mut server, b"Xgarbage");
        write_frame(&mut server, b"Ivalid");
    });
    let mut transport = gssapi_transport(stream, ScriptedContext::default());
    let mut buf = [0; 8];

    transport.open().unwrap();
    listen.join().unwrap();

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(ErrorKind::InvalidData, err.kind());
    assert_eq!(None, framing_kind(&err));

    let err = transport.read(&mut buf).unwrap_err();

    assert_eq!(Some(FramingError::Broken), framing_kind(&err));
}

#[test]
fn test_failed_negotiation_disposes() {
    init();

    let ctx = ScriptedContext::default();
    let releases = ctx.releases.clone();
    let (stream, mut server) = connected();
    let listen = spawn(move || {
        read_sasl_msg(&mut server, DEFAULT_MAX_LENGTH).unwrap();
        read_sasl_msg(&mut server, DEFAULT_MAX_LENGTH).unwrap();
        write_sasl_msg(&mut server, SASLStatus::Bad, b"no ticket").unwrap();
    });
    let mut transport = gssapi_transport(stream, ctx);
    let err = transport.open().unwrap_err();

    listen.join().unwrap();

    assert_eq!(ErrorKind::PermissionDenied, err.kind());
    assert_eq!(1, releases.load(Ordering::SeqCst));

    drop(transport);

    assert_eq!(1, releases.load(Ordering::SeqCst));
}

#[test]
fn test_connect_with_config() {
    init();

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let listen = spawn(move || {
        let (mut server, _) = listener.accept().unwrap();

        plain_server(&mut server);
        write_frame(&mut server, b"pong");
    });
    let yaml = format!(
        concat!(
            "host: 127.0.0.1\n",
            "port: {}\n",
            "connect-timeout: 5000\n",
            "sasl:\n",
            "  mechanism:\n",
            "    plain:\n",
            "      username: alice\n",
            "      password: secret\n"
        ),
        port
    );
    let config: SASLConnectConfig = serde_yaml::from_str(&yaml).unwrap();
    let mut transport =
        SASLTransport::connect_with(&config, ScriptedContext::default)
            .unwrap();
    let mut buf = [0; 4];

    transport.read_exact(&mut buf).unwrap();
    listen.join().unwrap();

    assert_eq!(b"pong", &buf);
    assert_eq!("PLAIN", transport.client().mechanism_name());
}

#[test]
fn test_from_params_unsupported() {
    let (stream, _server) = connected();
    let params = HashMap::new();
    let res = SASLTransport::from_params(
        stream,
        "node1",
        "CRAM-MD5",
        &params,
        DEFAULT_MAX_LENGTH,
        ScriptedContext::default
    );

    assert!(matches!(
        res,
        Err(NegotiationError::UnsupportedMechanism { .. })
    ));
}

#[test]
fn test_create_from_config() {
    let (stream, _server) = connected();
    let mechanism = SASLMechanismConfig::GSSAPI {
        service: String::from("hive")
    };
    let config = SASLConfig::new(mechanism, None, 4096, None);
    let transport =
        SASLTransport::create(stream, "node1", &config, ScriptedContext::default);

    assert_eq!("GSSAPI", transport.client().mechanism_name());
    assert_eq!(4096, transport.max_length());
    assert!(transport.stream().is_open());
}
