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

//! SASL authentication mechanisms.
//!
//! A mechanism is a pluggable authentication algorithm that produces
//! a sequence of tokens in response to server challenges, and
//! afterwards may apply a security layer (integrity protection and/or
//! confidentiality) to application payloads.  All mechanisms
//! implement the [Mechanism] trait.
//!
//! The following mechanisms are provided:
//!
//! - `PLAIN`: provided by [PlainMechanism](crate::mechanism::plain::PlainMechanism)
//! - `DIGEST-MD5`: provided by
//!   [DigestMD5Mechanism](crate::mechanism::digest::DigestMD5Mechanism)
//! - `GSSAPI`: provided by
//!   [GSSAPIMechanism](crate::mechanism::gssapi::GSSAPIMechanism)
//!
//! The closed set of all three is represented by [SASLMechanism],
//! which is what configuration-driven callers normally use.
//!
//! # Quality of Protection
//!
//! Mechanisms that support a security layer negotiate a quality of
//! protection ([Qop]) with the server.  On the wire, sets of QOP
//! levels are represented as bitmasks using [QOP_AUTH],
//! [QOP_AUTH_INT], and [QOP_AUTH_CONF].
use std::env;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;

use crate::config::SASLConfig;
use crate::config::SASLMechanismConfig;
use crate::mechanism::digest::ChallengeError;
use crate::mechanism::digest::DigestMD5Mechanism;
use crate::mechanism::digest::RandomNonce;
use crate::mechanism::gssapi::GSSAPIContext;
use crate::mechanism::gssapi::GSSAPIContextError;
use crate::mechanism::gssapi::GSSAPIMechanism;
use crate::mechanism::plain::PlainMechanism;

pub mod digest;
pub mod gssapi;
pub mod plain;

/// Default maximum frame length, also used as the default maximum
/// security-layer buffer size.
pub const DEFAULT_MAX_LENGTH: u32 = 16384000;

/// Bitmask flag for [Qop::Auth].
pub const QOP_AUTH: u8 = 0x01;
/// Bitmask flag for [Qop::AuthInt].
pub const QOP_AUTH_INT: u8 = 0x02;
/// Bitmask flag for [Qop::AuthConf].
pub const QOP_AUTH_CONF: u8 = 0x04;
/// Bitmask containing every QOP level.
pub const QOP_ALL: u8 = QOP_AUTH | QOP_AUTH_INT | QOP_AUTH_CONF;

/// Environment variable overriding the host part of GSSAPI service
/// names.
pub const SERVICE_HOST_QUALIFIED_VAR: &str = "SERVICE_HOST_QUALIFIED";

/// Quality-of-protection levels.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Qop {
    /// Authentication only, no security layer.
    Auth,
    /// Integrity protection.
    AuthInt,
    /// Integrity protection and confidentiality.
    AuthConf
}

/// Snapshot of a mechanism's negotiation state.
///
/// Only the owning mechanism mutates this; everyone else sees it
/// through [config](Mechanism::config).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MechanismConfig {
    /// Mechanism name, as sent in the `START` message.
    name: &'static str,
    /// Whether negotiation has finished.
    complete: bool,
    /// Authorization identity override.
    authz_id: Option<String>,
    /// Negotiated quality of protection, if any.
    qop: Option<Qop>
}

/// Errors that can occur inside a mechanism.
#[derive(Debug)]
pub enum MechanismError {
    /// The server failed to prove knowledge of the credentials, or
    /// rejected ours.
    Authentication,
    /// No quality-of-protection level is acceptable to both sides.
    NoQopAvailable {
        /// QOP mask offered by the server.
        offered: u8,
        /// QOP mask acceptable to the client.
        acceptable: u8
    },
    /// The server challenge could not be parsed.
    Challenge {
        /// The parse error.
        error: ChallengeError
    },
    /// A required field was missing from a server challenge.
    MissingField {
        /// Name of the missing field.
        name: &'static str
    },
    /// A challenge arrived that the mechanism cannot accept in its
    /// current state.
    UnexpectedChallenge,
    /// The security-layer negotiation message had the wrong size.
    BadSecurityLayer {
        /// Size of the unwrapped message.
        len: usize
    },
    /// The mechanism was stepped after negotiation completed.
    StageOverrun,
    /// A security-layer operation was attempted before negotiation
    /// completed.
    Incomplete,
    /// The mechanism was used after being disposed.
    Disposed,
    /// Error from the external security-context capability.
    Context {
        /// The capability error.
        error: GSSAPIContextError
    }
}

/// Capability contract implemented by every SASL mechanism.
pub trait Mechanism {
    /// Produce the first outbound token.
    #[inline]
    fn start(&mut self) -> Result<Option<Vec<u8>>, MechanismError> {
        self.step(None)
    }

    /// Consume the latest server challenge and produce the next
    /// outbound token.
    ///
    /// `None` is returned once no more data is needed.
    fn step(
        &mut self,
        challenge: Option<&[u8]>
    ) -> Result<Option<Vec<u8>>, MechanismError>;

    /// Apply the negotiated security layer to an outgoing payload.
    fn encode(
        &mut self,
        outgoing: &[u8]
    ) -> Result<Vec<u8>, MechanismError>;

    /// Remove the negotiated security layer from an incoming payload.
    fn decode(
        &mut self,
        incoming: &[u8]
    ) -> Result<Vec<u8>, MechanismError>;

    /// Zero secret material and release external resources.
    ///
    /// This is idempotent.
    fn dispose(&mut self);

    /// Get a read-only view of the negotiation state.
    fn config(&self) -> &MechanismConfig;
}

/// The closed set of supported mechanisms.
///
/// `Ctx` is the security-context capability used by the `GSSAPI`
/// variant.
pub enum SASLMechanism<Ctx: GSSAPIContext> {
    /// `PLAIN` mechanism.
    Plain(PlainMechanism),
    /// `DIGEST-MD5` mechanism.
    DigestMD5(DigestMD5Mechanism),
    /// `GSSAPI` mechanism.
    GSSAPI(GSSAPIMechanism<Ctx>)
}

impl Qop {
    /// Get the bitmask flag for this level.
    #[inline]
    pub fn flag(&self) -> u8 {
        match self {
            Qop::Auth => QOP_AUTH,
            Qop::AuthInt => QOP_AUTH_INT,
            Qop::AuthConf => QOP_AUTH_CONF
        }
    }

    /// Get the protocol name for this level.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            Qop::Auth => "auth",
            Qop::AuthInt => "auth-int",
            Qop::AuthConf => "auth-conf"
        }
    }

    /// Look up a level by its protocol name.
    #[inline]
    pub fn from_name(name: &str) -> Option<Qop> {
        match name {
            "auth" => Some(Qop::Auth),
            "auth-int" => Some(Qop::AuthInt),
            "auth-conf" => Some(Qop::AuthConf),
            _ => None
        }
    }

    /// Pick the strongest level present in `mask`.
    ///
    /// Priority is confidentiality, then integrity, then plain
    /// authentication.
    #[inline]
    pub fn select(mask: u8) -> Option<Qop> {
        [Qop::AuthConf, Qop::AuthInt, Qop::Auth]
            .iter()
            .copied()
            .find(|qop| qop.flag() & mask != 0)
    }
}

impl MechanismConfig {
    #[inline]
    pub(crate) fn new(
        name: &'static str,
        authz_id: Option<String>
    ) -> Self {
        MechanismConfig {
            name: name,
            complete: false,
            authz_id: authz_id,
            qop: None
        }
    }

    /// Get the mechanism name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Check whether negotiation has finished.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Get the authorization identity override, if one was set.
    #[inline]
    pub fn authz_id(&self) -> Option<&str> {
        self.authz_id.as_deref()
    }

    /// Get the negotiated quality of protection.
    #[inline]
    pub fn qop(&self) -> Option<Qop> {
        self.qop
    }

    #[inline]
    pub(crate) fn set_complete(&mut self) {
        self.complete = true
    }

    #[inline]
    pub(crate) fn set_qop(
        &mut self,
        qop: Qop
    ) {
        self.qop = Some(qop)
    }
}

impl<Ctx: GSSAPIContext> SASLMechanism<Ctx> {
    /// Create a mechanism from a configuration.
    ///
    /// The `host` is the name of the server being connected to; it
    /// is used to build the `DIGEST-MD5` digest URI and the `GSSAPI`
    /// service name.  The `ctx` function is only called for `GSSAPI`
    /// configurations.
    pub fn create<F>(
        config: &SASLConfig,
        host: &str,
        ctx: F
    ) -> Self
    where
        F: FnOnce() -> Ctx {
        let authz_id = config.principal().map(String::from);

        match config.mechanism() {
            SASLMechanismConfig::Plain { username, password } => {
                SASLMechanism::Plain(PlainMechanism::new(
                    username.clone(),
                    password.clone(),
                    authz_id
                ))
            }
            SASLMechanismConfig::DigestMD5 {
                service,
                username,
                password
            } => SASLMechanism::DigestMD5(DigestMD5Mechanism::new(
                service.clone(),
                host.to_string(),
                username.clone(),
                password.clone(),
                authz_id,
                Box::new(RandomNonce)
            )),
            SASLMechanismConfig::GSSAPI { service } => {
                let qualified = match config.service_host_qualified() {
                    Some(qualified) => Some(qualified.to_string()),
                    None => env::var(SERVICE_HOST_QUALIFIED_VAR)
                        .ok()
                        .filter(|qualified| !qualified.is_empty())
                };
                let mut mech = GSSAPIMechanism::new(
                    ctx(),
                    service.clone(),
                    host.to_string(),
                    authz_id
                );

                mech.set_host_qualified(qualified);
                mech.set_max_length(config.max_length());

                SASLMechanism::GSSAPI(mech)
            }
        }
    }

    /// Get the mechanism name.
    #[inline]
    pub fn name(&self) -> &'static str {
        self.config().name()
    }
}

#[cfg(feature = "gssapi")]
impl SASLMechanism<gssapi::KerberosContext> {
    /// Create a mechanism from a configuration, using Kerberos for
    /// `GSSAPI`.
    #[inline]
    pub fn from_config(
        config: &SASLConfig,
        host: &str
    ) -> Self {
        SASLMechanism::create(config, host, gssapi::KerberosContext::new)
    }
}

impl<Ctx: GSSAPIContext> Mechanism for SASLMechanism<Ctx> {
    #[inline]
    fn start(&mut self) -> Result<Option<Vec<u8>>, MechanismError> {
        match self {
            SASLMechanism::Plain(mech) => mech.start(),
            SASLMechanism::DigestMD5(mech) => mech.start(),
            SASLMechanism::GSSAPI(mech) => mech.start()
        }
    }

    #[inline]
    fn step(
        &mut self,
        challenge: Option<&[u8]>
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        match self {
            SASLMechanism::Plain(mech) => mech.step(challenge),
            SASLMechanism::DigestMD5(mech) => mech.step(challenge),
            SASLMechanism::GSSAPI(mech) => mech.step(challenge)
        }
    }

    #[inline]
    fn encode(
        &mut self,
        outgoing: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        match self {
            SASLMechanism::Plain(mech) => mech.encode(outgoing),
            SASLMechanism::DigestMD5(mech) => mech.encode(outgoing),
            SASLMechanism::GSSAPI(mech) => mech.encode(outgoing)
        }
    }

    #[inline]
    fn decode(
        &mut self,
        incoming: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        match self {
            SASLMechanism::Plain(mech) => mech.decode(incoming),
            SASLMechanism::DigestMD5(mech) => mech.decode(incoming),
            SASLMechanism::GSSAPI(mech) => mech.decode(incoming)
        }
    }

    #[inline]
    fn dispose(&mut self) {
        match self {
            SASLMechanism::Plain(mech) => mech.dispose(),
            SASLMechanism::DigestMD5(mech) => mech.dispose(),
            SASLMechanism::GSSAPI(mech) => mech.dispose()
        }
    }

    #[inline]
    fn config(&self) -> &MechanismConfig {
        match self {
            SASLMechanism::Plain(mech) => mech.config(),
            SASLMechanism::DigestMD5(mech) => mech.config(),
            SASLMechanism::GSSAPI(mech) => mech.config()
        }
    }
}

impl Display for Qop {
    #[inline]
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.name())
    }
}

impl Display for MechanismError {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            MechanismError::Authentication => write!(f, "authentication error"),
            MechanismError::NoQopAvailable {
                offered,
                acceptable
            } => write!(
                f,
                "no qop available (server offered {:#04x}, acceptable {:#04x})",
                offered, acceptable
            ),
            MechanismError::Challenge { error } => error.fmt(f),
            MechanismError::MissingField { name } => {
                write!(f, "challenge is missing field {}", name)
            }
            MechanismError::UnexpectedChallenge => {
                write!(f, "unexpected challenge for current state")
            }
            MechanismError::BadSecurityLayer { len } => write!(
                f,
                "security layer message should have length 4, got {}",
                len
            ),
            MechanismError::StageOverrun => {
                write!(f, "mechanism stepped after negotiation completed")
            }
            MechanismError::Incomplete => {
                write!(f, "security layer used before negotiation completed")
            }
            MechanismError::Disposed => {
                write!(f, "mechanism used after being disposed")
            }
            MechanismError::Context { error } => error.fmt(f)
        }
    }
}

impl Error for MechanismError {}

#[cfg(test)]
use std::collections::HashMap;

#[cfg(test)]
use crate::mechanism::gssapi::ScriptedContext;

#[test]
fn test_qop_select_all_combinations() {
    let expected = [
        (0b000, None),
        (0b001, Some(Qop::Auth)),
        (0b010, Some(Qop::AuthInt)),
        (0b011, Some(Qop::AuthInt)),
        (0b100, Some(Qop::AuthConf)),
        (0b101, Some(Qop::AuthConf)),
        (0b110, Some(Qop::AuthConf)),
        (0b111, Some(Qop::AuthConf))
    ];

    for (mask, qop) in expected.iter() {
        assert_eq!(*qop, Qop::select(*mask), "mask {:#05b}", mask);
    }
}

#[test]
fn test_qop_names() {
    for qop in [Qop::Auth, Qop::AuthInt, Qop::AuthConf].iter() {
        assert_eq!(Some(*qop), Qop::from_name(qop.name()));
    }

    assert_eq!(None, Qop::from_name("auth-none"));
}

#[test]
fn test_create_from_params() {
    let mut params = HashMap::new();

    params.insert(String::from("username"), String::from("alice"));
    params.insert(String::from("password"), String::from("secret"));
    params.insert(String::from("service"), String::from("hive"));

    for name in ["PLAIN", "DIGEST-MD5", "GSSAPI"].iter() {
        let mechanism = SASLMechanismConfig::from_params(name, &params)
            .expect("expected success");
        let config = SASLConfig::new(mechanism, None, DEFAULT_MAX_LENGTH, None);
        let mech =
            SASLMechanism::create(&config, "node1", ScriptedContext::default);

        assert_eq!(*name, mech.name());
        assert!(!mech.config().is_complete());
    }
}

#[test]
fn test_create_passes_principal() {
    let mechanism = SASLMechanismConfig::Plain {
        username: String::from("alice"),
        password: String::from("secret")
    };
    let config = SASLConfig::new(
        mechanism,
        Some(String::from("admin")),
        DEFAULT_MAX_LENGTH,
        None
    );
    let mut mech =
        SASLMechanism::create(&config, "node1", ScriptedContext::default);
    let token = mech.start().unwrap().unwrap();

    assert_eq!(b"admin\0alice\0secret".to_vec(), token);
    assert_eq!(Some("admin"), mech.config().authz_id());
}
