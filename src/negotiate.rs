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

//! SASL negotiation handshake.
//!
//! Negotiation takes place over the raw transport, before any
//! security layer is in effect.  Every handshake message has the
//! form:
//!
//! ```text
//! [1-byte status][4-byte big-endian length][payload]
//! ```
//!
//! The client sends `START` with the mechanism name, followed by `OK`
//! with the mechanism's first token.  From then on, the server sends
//! a message, and the client answers each `OK` with the mechanism's
//! next token, until the server sends `COMPLETE` (success) or any
//! other status (failure).
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;

use log::debug;
use log::error;
use log::trace;
use log::warn;

use crate::client::SASLClient;
use crate::mechanism::Mechanism;
use crate::mechanism::MechanismError;
use crate::transport::Transport;

/// Size of a handshake message header.
const HEADER_LEN: usize = 5;

/// Status codes for handshake messages.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SASLStatus {
    /// Client selects a mechanism.
    Start,
    /// Negotiation continues.
    Ok,
    /// Negotiation failed on the sender's side due to bad input.
    Bad,
    /// Negotiation failed for another reason.
    Error,
    /// Negotiation succeeded.
    Complete
}

/// A received handshake message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SASLMessage {
    /// Raw status code; may not be a valid [SASLStatus].
    status: u8,
    payload: Vec<u8>
}

/// Errors that can occur during negotiation.
#[derive(Debug)]
pub enum NegotiationError {
    /// Error sending or receiving a handshake message.
    IO {
        /// The I/O error.
        error: std::io::Error
    },
    /// Error from the mechanism.
    Mechanism {
        /// The mechanism error.
        error: MechanismError
    },
    /// The server reported completion before the mechanism finished.
    PrematureComplete,
    /// The server sent a status other than `OK` or `COMPLETE`.
    BadStatus {
        /// The raw status code.
        status: u8,
        /// The message payload, usually a reason.
        payload: Vec<u8>
    },
    /// The requested mechanism is not supported.
    UnsupportedMechanism {
        /// Name of the mechanism.
        name: String
    },
    /// A required configuration parameter is missing.
    MissingParam {
        /// Name of the parameter.
        name: &'static str
    }
}

impl SASLStatus {
    /// Get the wire code for this status.
    #[inline]
    pub fn code(&self) -> u8 {
        match self {
            SASLStatus::Start => 1,
            SASLStatus::Ok => 2,
            SASLStatus::Bad => 3,
            SASLStatus::Error => 4,
            SASLStatus::Complete => 5
        }
    }

    /// Look up a status by its wire code.
    #[inline]
    pub fn from_code(code: u8) -> Option<SASLStatus> {
        match code {
            1 => Some(SASLStatus::Start),
            2 => Some(SASLStatus::Ok),
            3 => Some(SASLStatus::Bad),
            4 => Some(SASLStatus::Error),
            5 => Some(SASLStatus::Complete),
            _ => None
        }
    }
}

impl SASLMessage {
    /// Create a `SASLMessage` from its components.
    #[inline]
    pub fn new(
        status: u8,
        payload: Vec<u8>
    ) -> Self {
        SASLMessage {
            status: status,
            payload: payload
        }
    }

    /// Get the raw status code.
    #[inline]
    pub fn status(&self) -> u8 {
        self.status
    }

    /// Get the payload.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Decompose this `SASLMessage` into its status and payload.
    #[inline]
    pub fn take(self) -> (u8, Vec<u8>) {
        (self.status, self.payload)
    }
}

/// Write one handshake message and flush the stream.
pub fn write_sasl_msg<W>(
    stream: &mut W,
    status: SASLStatus,
    payload: &[u8]
) -> Result<(), std::io::Error>
where
    W: Write {
    if payload.len() > u32::MAX as usize {
        return Err(std::io::Error::new(
            ErrorKind::InvalidInput,
            "handshake payload too large"
        ));
    }

    let mut buf = Vec::with_capacity(HEADER_LEN + payload.len());

    buf.push(status.code());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);

    trace!(target: "sasl-negotiate",
           "sending {:?} message with {} byte payload",
           status, payload.len());

    stream.write_all(&buf)?;
    stream.flush()
}

/// Read one handshake message.
///
/// Payloads longer than `max_length` are rejected without being
/// read.
pub fn read_sasl_msg<R>(
    stream: &mut R,
    max_length: u32
) -> Result<SASLMessage, std::io::Error>
where
    R: Read {
    let mut header = [0; HEADER_LEN];

    stream.read_exact(&mut header)?;

    let len = u32::from_be_bytes([header[1], header[2], header[3], header[4]]);

    if len > max_length {
        return Err(std::io::Error::new(
            ErrorKind::InvalidData,
            format!(
                "handshake payload length {} exceeds maximum {}",
                len, max_length
            )
        ));
    }

    let mut payload = vec![0; len as usize];

    stream.read_exact(&mut payload)?;

    trace!(target: "sasl-negotiate",
           "received message with status {} and {} byte payload",
           header[0], len);

    Ok(SASLMessage::new(header[0], payload))
}

/// Receive one handshake message.
///
/// Failures are reported as an `ERROR` message with no payload.
pub fn recv_sasl_msg<R>(
    stream: &mut R,
    max_length: u32
) -> SASLMessage
where
    R: Read {
    match read_sasl_msg(stream, max_length) {
        Ok(msg) => msg,
        Err(err) => {
            warn!(target: "sasl-negotiate",
                  "error receiving handshake message ({})",
                  err);

            SASLMessage::new(SASLStatus::Error.code(), Vec::new())
        }
    }
}

/// Run the negotiation handshake over `stream` using `client`.
///
/// The stream is opened first if necessary.  On success, the
/// client's mechanism is complete and ready to protect frames.
pub fn negotiate<S, M>(
    stream: &mut S,
    client: &mut SASLClient<M>,
    max_length: u32
) -> Result<(), NegotiationError>
where
    S: Transport,
    M: Mechanism {
    if !stream.is_open() {
        stream.open()?;
    }

    let name = client.mechanism_name();

    debug!(target: "sasl-negotiate",
           "starting {} negotiation with {}",
           name, client.host());

    write_sasl_msg(stream, SASLStatus::Start, name.as_bytes())?;

    let token = client.start()?;

    write_sasl_msg(stream, SASLStatus::Ok, token.as_deref().unwrap_or(&[]))?;

    loop {
        let (status, payload) = recv_sasl_msg(stream, max_length).take();

        match SASLStatus::from_code(status) {
            Some(SASLStatus::Ok) => {
                let challenge = if payload.is_empty() {
                    None
                } else {
                    Some(&payload[..])
                };
                let token = client.step(challenge)?;

                write_sasl_msg(
                    stream,
                    SASLStatus::Ok,
                    token.as_deref().unwrap_or(&[])
                )?;
            }
            Some(SASLStatus::Complete) => {
                // The final server message may carry data, such as
                // the DIGEST-MD5 server proof.
                if !payload.is_empty() && !client.is_complete() {
                    let token = client.step(Some(&payload[..]))?;

                    // A reply the server will never read means it
                    // finished before the mechanism did.
                    if token.map_or(false, |token| !token.is_empty()) {
                        error!(target: "sasl-negotiate",
                               "server completed {} negotiation early",
                               name);

                        return Err(NegotiationError::PrematureComplete);
                    }
                }

                if client.is_complete() {
                    debug!(target: "sasl-negotiate",
                           "{} negotiation with {} complete",
                           name, client.host());

                    return Ok(());
                } else {
                    error!(target: "sasl-negotiate",
                           "server claimed {} negotiation was complete",
                           name);

                    return Err(NegotiationError::PrematureComplete);
                }
            }
            _ => {
                return Err(NegotiationError::BadStatus {
                    status: status,
                    payload: payload
                })
            }
        }
    }
}

impl Display for SASLStatus {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            SASLStatus::Start => write!(f, "START"),
            SASLStatus::Ok => write!(f, "OK"),
            SASLStatus::Bad => write!(f, "BAD"),
            SASLStatus::Error => write!(f, "ERROR"),
            SASLStatus::Complete => write!(f, "COMPLETE")
        }
    }
}

impl Display for NegotiationError {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            NegotiationError::IO { error } => error.fmt(f),
            NegotiationError::Mechanism { error } => error.fmt(f),
            NegotiationError::PrematureComplete => write!(
                f,
                "server erroneously responded that negotiation was complete"
            ),
            NegotiationError::BadStatus { status, payload } => write!(
                f,
                "bad SASL negotiation status: {} ({})",
                status,
                String::from_utf8_lossy(payload)
            ),
            NegotiationError::UnsupportedMechanism { name } => {
                write!(f, "mechanism {} not supported", name)
            }
            NegotiationError::MissingParam { name } => {
                write!(f, "missing configuration parameter {}", name)
            }
        }
    }
}

impl Error for NegotiationError {}

impl From<std::io::Error> for NegotiationError {
    #[inline]
    fn from(error: std::io::Error) -> NegotiationError {
        NegotiationError::IO { error: error }
    }
}

impl From<MechanismError> for NegotiationError {
    #[inline]
    fn from(error: MechanismError) -> NegotiationError {
        NegotiationError::Mechanism { error: error }
    }
}

impl From<NegotiationError> for std::io::Error {
    fn from(err: NegotiationError) -> std::io::Error {
        match err {
            NegotiationError::IO { error } => error,
            NegotiationError::Mechanism {
                error: MechanismError::Authentication
            } => std::io::Error::new(ErrorKind::PermissionDenied, err),
            NegotiationError::BadStatus { status: 3, .. } => {
                std::io::Error::new(ErrorKind::PermissionDenied, err)
            }
            _ => std::io::Error::new(ErrorKind::InvalidData, err)
        }
    }
}

#[cfg(test)]
use std::net::TcpListener;
#[cfg(test)]
use std::net::TcpStream;
#[cfg(test)]
use std::thread::spawn;

#[cfg(test)]
use crate::init;
#[cfg(test)]
use crate::mechanism::digest::DigestMD5Mechanism;
#[cfg(test)]
use crate::mechanism::digest::FixedNonce;
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
use crate::transport::tcp::TCPTransport;

#[cfg(test)]
fn connected() -> (TCPTransport, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();

    (TCPTransport::from_stream(client), server)
}

#[cfg(test)]
fn plain_client() -> SASLClient<PlainMechanism> {
    let mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );

    SASLClient::new(String::from("node1"), mech)
}

#[cfg(test)]
fn expect_msg(
    stream: &mut TcpStream,
    status: SASLStatus,
    payload: &[u8]
) {
    let msg = read_sasl_msg(stream, DEFAULT_MAX_LENGTH).unwrap();

    assert_eq!(status.code(), msg.status());
    assert_eq!(payload, msg.payload());
}

#[test]
fn test_status_codes() {
    for code in 1..=5 {
        assert_eq!(code, SASLStatus::from_code(code).unwrap().code());
    }

    assert_eq!(None, SASLStatus::from_code(0));
    assert_eq!(None, SASLStatus::from_code(6));
}

#[test]
fn test_msg_wire_format() {
    let mut buf = Vec::new();

    write_sasl_msg(&mut buf, SASLStatus::Start, b"PLAIN").unwrap();

    assert_eq!(b"\x01\x00\x00\x00\x05PLAIN".to_vec(), buf);

    let msg = read_sasl_msg(&mut &buf[..], DEFAULT_MAX_LENGTH).unwrap();

    assert_eq!(SASLMessage::new(1, b"PLAIN".to_vec()), msg);
}

#[test]
fn test_msg_oversize() {
    let buf = b"\x02\x00\x00\x01\x00".to_vec();
    let err = read_sasl_msg(&mut &buf[..], 16).unwrap_err();

    assert_eq!(ErrorKind::InvalidData, err.kind());
}

#[test]
fn test_recv_failure_is_error_status() {
    let buf = b"\x02\x00\x00".to_vec();
    let msg = recv_sasl_msg(&mut &buf[..], DEFAULT_MAX_LENGTH);

    assert_eq!(SASLStatus::Error.code(), msg.status());
    assert!(msg.payload().is_empty());
}

#[test]
fn test_negotiate_plain() {
    init();

    let (mut stream, mut server) = connected();
    let listen = spawn(move || {
        expect_msg(&mut server, SASLStatus::Start, b"PLAIN");
        expect_msg(&mut server, SASLStatus::Ok, b"\0alice\0secret");
        write_sasl_msg(&mut server, SASLStatus::Complete, b"").unwrap();
    });
    let mut client = plain_client();

    negotiate(&mut stream, &mut client, DEFAULT_MAX_LENGTH).unwrap();
    listen.join().unwrap();

    assert!(client.is_complete());
}

#[test]
fn test_negotiate_digest() {
    init();

    let (mut stream, mut server) = connected();
    let listen = spawn(move || {
        expect_msg(&mut server, SASLStatus::Start, b"DIGEST-MD5");
        expect_msg(&mut server, SASLStatus::Ok, b"");
        write_sasl_msg(
            &mut server,
            SASLStatus::Ok,
            b"realm=\"EXAMPLE.COM\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\""
        )
        .unwrap();

        let msg = read_sasl_msg(&mut server, DEFAULT_MAX_LENGTH).unwrap();
        let response = String::from_utf8(msg.payload().to_vec()).unwrap();

        assert_eq!(SASLStatus::Ok.code(), msg.status());
        assert!(response.contains("response=8c5ed930451248ab605c1a407e101b19"));

        write_sasl_msg(
            &mut server,
            SASLStatus::Complete,
            b"rspauth=20f54e7467ad9e916cbcd5816c92291b"
        )
        .unwrap();
    });
    let mech = DigestMD5Mechanism::new(
        String::from("hive"),
        String::from("node1"),
        String::from("alice"),
        String::from("secret"),
        None,
        Box::new(FixedNonce::new(String::from("abcdefghijklmn")))
    );
    let mut client = SASLClient::new(String::from("node1"), mech);

    negotiate(&mut stream, &mut client, DEFAULT_MAX_LENGTH).unwrap();
    listen.join().unwrap();

    assert!(client.is_complete());
}

#[test]
fn test_negotiate_digest_bad_proof() {
    init();

    let (mut stream, mut server) = connected();
    let listen = spawn(move || {
        expect_msg(&mut server, SASLStatus::Start, b"DIGEST-MD5");
        expect_msg(&mut server, SASLStatus::Ok, b"");
        write_sasl_msg(
            &mut server,
            SASLStatus::Ok,
            b"realm=\"EXAMPLE.COM\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\""
        )
        .unwrap();
        read_sasl_msg(&mut server, DEFAULT_MAX_LENGTH).unwrap();
        write_sasl_msg(
            &mut server,
            SASLStatus::Complete,
            b"rspauth=00000000000000000000000000000000"
        )
        .unwrap();
    });
    let mech = DigestMD5Mechanism::new(
        String::from("hive"),
        String::from("node1"),
        String::from("alice"),
        String::from("secret"),
        None,
        Box::new(FixedNonce::new(String::from("abcdefghijklmn")))
    );
    let mut client = SASLClient::new(String::from("node1"), mech);
    let err = negotiate(&mut stream, &mut client, DEFAULT_MAX_LENGTH)
        .unwrap_err();

    listen.join().unwrap();

    assert!(matches!(
        err,
        NegotiationError::Mechanism {
            error: MechanismError::Authentication
        }
    ));
    assert!(!client.is_complete());
    assert_eq!(
        ErrorKind::PermissionDenied,
        std::io::Error::from(err).kind()
    );
}

#[test]
fn test_negotiate_bad_status() {
    init();

    let (mut stream, mut server) = connected();
    let listen = spawn(move || {
        expect_msg(&mut server, SASLStatus::Start, b"PLAIN");
        expect_msg(&mut server, SASLStatus::Ok, b"\0alice\0secret");
        write_sasl_msg(&mut server, SASLStatus::Bad, b"bad credentials")
            .unwrap();
    });
    let mut client = plain_client();
    let err = negotiate(&mut stream, &mut client, DEFAULT_MAX_LENGTH)
        .unwrap_err();

    listen.join().unwrap();

    match err {
        NegotiationError::BadStatus { status, payload } => {
            assert_eq!(3, status);
            assert_eq!(b"bad credentials".to_vec(), payload);
        }
        _ => panic!("expected bad status")
    }
}

#[test]
fn test_negotiate_premature_complete() {
    init();

    let (mut stream, mut server) = connected();
    let listen = spawn(move || {
        expect_msg(&mut server, SASLStatus::Start, b"DIGEST-MD5");
        expect_msg(&mut server, SASLStatus::Ok, b"");
        write_sasl_msg(&mut server, SASLStatus::Complete, b"").unwrap();
    });
    let mech = DigestMD5Mechanism::new(
        String::from("hive"),
        String::from("node1"),
        String::from("alice"),
        String::from("secret"),
        None,
        Box::new(FixedNonce::new(String::from("abcdefghijklmn")))
    );
    let mut client = SASLClient::new(String::from("node1"), mech);
    let err = negotiate(&mut stream, &mut client, DEFAULT_MAX_LENGTH)
        .unwrap_err();

    listen.join().unwrap();

    assert!(matches!(err, NegotiationError::PrematureComplete));
}

#[test]
fn test_negotiate_complete_with_layer_offer() {
    init();

    let (mut stream, mut server) = connected();
    let listen = spawn(move || {
        expect_msg(&mut server, SASLStatus::Start, b"GSSAPI");
        expect_msg(&mut server, SASLStatus::Ok, b"leg-1");
        write_sasl_msg(&mut server, SASLStatus::Ok, b"server-token")
            .unwrap();
        expect_msg(&mut server, SASLStatus::Ok, b"leg-2");
        // Completes without waiting for the client's layer choice.
        write_sasl_msg(
            &mut server,
            SASLStatus::Complete,
            &server_offer(0x07, 1024)
        )
        .unwrap();
    });
    let mech = GSSAPIMechanism::new(
        ScriptedContext::default(),
        String::from("hive"),
        String::from("node1"),
        None
    );
    let mut client = SASLClient::new(String::from("node1"), mech);
    let err = negotiate(&mut stream, &mut client, DEFAULT_MAX_LENGTH)
        .unwrap_err();

    listen.join().unwrap();

    assert!(matches!(err, NegotiationError::PrematureComplete));
    assert_eq!(
        ErrorKind::InvalidData,
        std::io::Error::from(err).kind()
    );
}

#[test]
fn test_negotiate_disconnect() {
    init();

    let (mut stream, mut server) = connected();
    let listen = spawn(move || {
        expect_msg(&mut server, SASLStatus::Start, b"PLAIN");
        expect_msg(&mut server, SASLStatus::Ok, b"\0alice\0secret");
        // Dropping the socket closes the connection.
    });
    let mut client = plain_client();
    let err = negotiate(&mut stream, &mut client, DEFAULT_MAX_LENGTH)
        .unwrap_err();

    listen.join().unwrap();

    assert!(matches!(
        err,
        NegotiationError::BadStatus {
            status: 4,
            ..
        }
    ));
}
