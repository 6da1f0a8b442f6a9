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

//! The `GSSAPI` mechanism.
//!
//! `GSSAPI` ([RFC 4752](https://datatracker.ietf.org/doc/html/rfc4752))
//! authenticates using an external security service, almost always
//! Kerberos.  The mechanism itself does no cryptography: all context
//! establishment and message protection is delegated to a
//! [GSSAPIContext], which is treated as an opaque capability.
//!
//! Negotiation proceeds in three stages:
//!
//! 1. The security context is initiated without an input token, and
//!    the resulting token is sent to the server.
//!
//! 2. The server's reply is fed back into the context.  This repeats
//!    until the context reports that it is established.
//!
//! 3. The server sends a wrapped 4-byte message advertising the QOP
//!    levels it supports and its maximum buffer size.  The client
//!    selects a QOP, and replies with a wrapped message containing its
//!    choice, its own maximum buffer size, and the authorization
//!    identity.
//!
//! Once complete, [encode](Mechanism::encode) and
//! [decode](Mechanism::decode) wrap and unwrap payloads through the
//! context, unless plain `auth` was selected.
//!
//! GSSAPI-based security layers are only as strong as the underlying
//! Kerberos installation, which in many cases is inadequate by modern
//! standards.
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;

#[cfg(feature = "gssapi")]
use libgssapi::context::ClientCtx;
#[cfg(feature = "gssapi")]
use libgssapi::context::CtxFlags;
#[cfg(feature = "gssapi")]
use libgssapi::context::SecurityContext;
#[cfg(feature = "gssapi")]
use libgssapi::credential::Cred;
#[cfg(feature = "gssapi")]
use libgssapi::credential::CredUsage;
#[cfg(feature = "gssapi")]
use libgssapi::name::Name;
#[cfg(feature = "gssapi")]
use libgssapi::oid::OidSet;
#[cfg(feature = "gssapi")]
use libgssapi::oid::GSS_MECH_KRB5;
#[cfg(feature = "gssapi")]
use libgssapi::oid::GSS_NT_HOSTBASED_SERVICE;
use log::debug;
use log::error;
use log::trace;
use log::warn;

use crate::mechanism::Mechanism;
use crate::mechanism::MechanismConfig;
use crate::mechanism::MechanismError;
use crate::mechanism::Qop;
use crate::mechanism::DEFAULT_MAX_LENGTH;
use crate::mechanism::QOP_ALL;

/// Context flag: mutual authentication.
pub const GSS_C_MUTUAL_FLAG: u32 = 2;
/// Context flag: out-of-sequence detection.
pub const GSS_C_SEQUENCE_FLAG: u32 = 8;
/// Context flag: confidentiality available.
pub const GSS_C_CONF_FLAG: u32 = 16;
/// Context flag: integrity available.
pub const GSS_C_INTEG_FLAG: u32 = 32;

/// Largest value that fits the 24-bit length field of the
/// security-layer header.
const MAX_LENGTH_MASK: u32 = 0x00ff_ffff;

/// Errors from a [GSSAPIContext].
#[derive(Debug)]
pub enum GSSAPIContextError {
    /// Error from the system GSSAPI library.
    #[cfg(feature = "gssapi")]
    GSSAPI {
        /// The library error.
        error: libgssapi::error::Error
    },
    /// A message operation was attempted with no context.
    NoContext,
    /// Any other failure.
    Other {
        /// Description of the failure.
        msg: String
    }
}

/// Output from one leg of security-context initiation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct GSSAPIInitiated {
    /// Token to send to the server.
    token: Vec<u8>,
    /// Flags granted by the context.
    flags: u32,
    /// Whether the context is fully established.
    established: bool
}

/// External security-context capability used by [GSSAPIMechanism].
///
/// Implementations own one security context, created by the first
/// call to [initiate](GSSAPIContext::initiate).  No implementation is
/// ever called concurrently.
pub trait GSSAPIContext {
    /// Run one leg of context initiation against `target`, a name of
    /// the form `service/host`.
    ///
    /// `token` is `None` for the first leg, and the server's reply
    /// for every subsequent leg.
    fn initiate(
        &mut self,
        target: &str,
        token: Option<&[u8]>
    ) -> Result<GSSAPIInitiated, GSSAPIContextError>;

    /// Protect `data`, encrypting if `confidential` is set.
    fn wrap(
        &mut self,
        data: &[u8],
        confidential: bool
    ) -> Result<Vec<u8>, GSSAPIContextError>;

    /// Remove protection from `data`.
    fn unwrap(
        &mut self,
        data: &[u8]
    ) -> Result<Vec<u8>, GSSAPIContextError>;

    /// Release the security context.
    fn release(&mut self) -> Result<(), GSSAPIContextError>;

    /// Get the name of the principal the context authenticated as,
    /// if the implementation knows it.
    #[inline]
    fn principal(&mut self) -> Option<String> {
        None
    }
}

/// Negotiation stages.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum GSSAPIStage {
    /// No token sent yet.
    Initial,
    /// Context establishment in progress.
    Continue,
    /// Context established, negotiating the security layer.
    SecurityLayer,
    /// Negotiation finished.
    Complete
}

/// Client side of the `GSSAPI` mechanism.
pub struct GSSAPIMechanism<Ctx: GSSAPIContext> {
    config: MechanismConfig,
    ctx: Ctx,
    stage: GSSAPIStage,
    service: String,
    host: String,
    /// Replaces `host` in the target name if set.
    host_qualified: Option<String>,
    /// Username to send if no authorization identity is set.
    user: Option<String>,
    /// QOP levels this implementation supports.
    supported_qop: u8,
    /// QOP levels the user will accept.
    user_select_qop: u8,
    server_max_length: u32,
    max_length: u32,
    released: bool
}

/// [GSSAPIContext] backed by the system Kerberos GSSAPI library.
///
/// Default initiator credentials (typically the user's credential
/// cache) are used.
#[cfg(feature = "gssapi")]
#[derive(Default)]
pub struct KerberosContext {
    ctx: Option<ClientCtx>
}

impl GSSAPIInitiated {
    /// Create a `GSSAPIInitiated` from its components.
    #[inline]
    pub fn new(
        token: Vec<u8>,
        flags: u32,
        established: bool
    ) -> Self {
        GSSAPIInitiated {
            token: token,
            flags: flags,
            established: established
        }
    }

    /// Get the output token.
    #[inline]
    pub fn token(&self) -> &[u8] {
        &self.token
    }

    /// Get the granted context flags.
    #[inline]
    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// Check whether the context is fully established.
    #[inline]
    pub fn established(&self) -> bool {
        self.established
    }

    #[inline]
    fn integ_avail(&self) -> bool {
        self.flags & GSS_C_INTEG_FLAG != 0
    }

    #[inline]
    fn conf_avail(&self) -> bool {
        self.flags & GSS_C_CONF_FLAG != 0
    }

    /// Decompose a `GSSAPIInitiated` into its components.
    #[inline]
    fn take(self) -> (Vec<u8>, u32, bool) {
        (self.token, self.flags, self.established)
    }
}

impl<Ctx: GSSAPIContext> GSSAPIMechanism<Ctx> {
    /// Create a `GSSAPI` mechanism.
    ///
    /// The target name is formed from `service` and `host`; see
    /// [set_host_qualified](GSSAPIMechanism::set_host_qualified).
    #[inline]
    pub fn new(
        ctx: Ctx,
        service: String,
        host: String,
        authz_id: Option<String>
    ) -> Self {
        GSSAPIMechanism {
            config: MechanismConfig::new("GSSAPI", authz_id),
            ctx: ctx,
            stage: GSSAPIStage::Initial,
            service: service,
            host: host,
            host_qualified: None,
            user: None,
            supported_qop: QOP_ALL,
            user_select_qop: QOP_ALL,
            server_max_length: 0,
            max_length: DEFAULT_MAX_LENGTH,
            released: false
        }
    }

    /// Override the host part of the target name.
    #[inline]
    pub fn set_host_qualified(
        &mut self,
        host_qualified: Option<String>
    ) {
        self.host_qualified = host_qualified
    }

    /// Set the username sent when no authorization identity is set.
    #[inline]
    pub fn set_user(
        &mut self,
        user: Option<String>
    ) {
        self.user = user
    }

    /// Restrict the QOP levels the user will accept.
    #[inline]
    pub fn set_user_select_qop(
        &mut self,
        mask: u8
    ) {
        self.user_select_qop = mask
    }

    /// Set the maximum buffer size advertised to the server.
    #[inline]
    pub fn set_max_length(
        &mut self,
        max_length: u32
    ) {
        self.max_length = max_length
    }

    /// Get the server's maximum buffer size, once known.
    #[inline]
    pub fn server_max_length(&self) -> u32 {
        self.server_max_length
    }

    /// Get the fully-qualified target name.
    #[inline]
    pub fn target_name(&self) -> String {
        match &self.host_qualified {
            Some(qualified) => format!("{}/{}", self.service, qualified),
            None => format!("{}/{}", self.service, self.host)
        }
    }

    /// Get the underlying security-context capability.
    #[inline]
    pub fn context(&self) -> &Ctx {
        &self.ctx
    }

    #[inline]
    fn acceptable_qop(&self) -> u8 {
        self.user_select_qop & self.supported_qop
    }

    /// Select the best QOP offered by the server.
    #[inline]
    pub fn select_qop(
        &self,
        offered: u8
    ) -> Result<Qop, MechanismError> {
        let acceptable = self.acceptable_qop();

        Qop::select(offered & acceptable).ok_or(
            MechanismError::NoQopAvailable {
                offered: offered,
                acceptable: acceptable
            }
        )
    }

    fn initiate(
        &mut self,
        token: Option<&[u8]>
    ) -> Result<GSSAPIInitiated, MechanismError> {
        let target = self.target_name();

        trace!(target: "sasl-gssapi",
               "initiating security context for {}",
               target);

        self.ctx
            .initiate(&target, token)
            .map_err(|err| MechanismError::Context { error: err })
    }

    /// Negotiate the security layer from the server's offer.
    fn security_layer(
        &mut self,
        challenge: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        let data = self
            .ctx
            .unwrap(challenge)
            .map_err(|err| MechanismError::Context { error: err })?;

        if data.len() != 4 {
            return Err(MechanismError::BadSecurityLayer { len: data.len() });
        }

        let offered = data[0];

        self.server_max_length = u32::from_be_bytes([0, data[1], data[2], data[3]]);

        let qop = self.select_qop(offered)?;
        let max_length =
            self.max_length.min(self.server_max_length) & MAX_LENGTH_MASK;
        let header = ((qop.flag() as u32) << 24) | max_length;
        let name = match self.config.authz_id() {
            Some(authz_id) => authz_id.to_string(),
            None => match &self.user {
                Some(user) => user.clone(),
                None => self.ctx.principal().unwrap_or_default()
            }
        };

        debug!(target: "sasl-gssapi",
               concat!("server offered qop {:#04x} with max length {}, ",
                       "selected {} with max length {}"),
               offered, self.server_max_length, qop, max_length);

        let mut out = Vec::with_capacity(4 + name.len());

        out.extend_from_slice(&header.to_be_bytes());
        out.extend_from_slice(name.as_bytes());

        let wrapped = self
            .ctx
            .wrap(&out, qop == Qop::AuthConf)
            .map_err(|err| MechanismError::Context { error: err })?;

        self.config.set_qop(qop);
        self.config.set_complete();
        self.stage = GSSAPIStage::Complete;

        Ok(wrapped)
    }
}

impl<Ctx: GSSAPIContext> Mechanism for GSSAPIMechanism<Ctx> {
    fn step(
        &mut self,
        challenge: Option<&[u8]>
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        if self.released {
            return Err(MechanismError::Disposed);
        }

        match self.stage {
            GSSAPIStage::Initial => {
                debug!(target: "sasl-gssapi",
                       "beginning GSSAPI negotiation with {}",
                       self.target_name());

                let (token, _, established) = self.initiate(None)?.take();

                self.stage = if established {
                    GSSAPIStage::SecurityLayer
                } else {
                    GSSAPIStage::Continue
                };

                Ok(Some(token))
            }
            GSSAPIStage::Continue => {
                let challenge = challenge.unwrap_or(&[]);
                let initiated = self.initiate(Some(challenge))?;

                if initiated.established() {
                    if !initiated.integ_avail() && !initiated.conf_avail() {
                        warn!(target: "sasl-gssapi",
                              concat!("unable to establish a security ",
                                      "layer, however authentication ",
                                      "is still possible"));
                    }

                    debug!(target: "sasl-gssapi",
                           "GSSAPI context established, negotiating security layer");

                    self.stage = GSSAPIStage::SecurityLayer;
                } else {
                    trace!(target: "sasl-gssapi",
                           "continuing GSSAPI context establishment");
                }

                Ok(Some(initiated.take().0))
            }
            GSSAPIStage::SecurityLayer => {
                let challenge = challenge.unwrap_or(&[]);

                self.security_layer(challenge).map(Some)
            }
            GSSAPIStage::Complete => {
                error!(target: "sasl-gssapi",
                       "GSSAPI mechanism stepped after completion");

                Err(MechanismError::StageOverrun)
            }
        }
    }

    fn encode(
        &mut self,
        outgoing: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        if self.released {
            return Err(MechanismError::Disposed);
        }

        match self.config.qop() {
            None => Err(MechanismError::Incomplete),
            Some(Qop::Auth) => Ok(outgoing.to_vec()),
            Some(qop) => self
                .ctx
                .wrap(outgoing, qop == Qop::AuthConf)
                .map_err(|err| MechanismError::Context { error: err })
        }
    }

    fn decode(
        &mut self,
        incoming: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        if self.released {
            return Err(MechanismError::Disposed);
        }

        match self.config.qop() {
            None => Err(MechanismError::Incomplete),
            Some(Qop::Auth) => Ok(incoming.to_vec()),
            Some(_) => self
                .ctx
                .unwrap(incoming)
                .map_err(|err| MechanismError::Context { error: err })
        }
    }

    fn dispose(&mut self) {
        if !self.released {
            self.released = true;

            if let Err(err) = self.ctx.release() {
                warn!(target: "sasl-gssapi",
                      "error releasing security context ({})",
                      err);
            }
        }
    }

    #[inline]
    fn config(&self) -> &MechanismConfig {
        &self.config
    }
}

impl<Ctx: GSSAPIContext> Drop for GSSAPIMechanism<Ctx> {
    fn drop(&mut self) {
        self.dispose()
    }
}

/// Convert a `service/host` name to the host-based service form
/// `service@host`.
#[cfg(feature = "gssapi")]
fn hostbased_name(target: &str) -> String {
    match target.split_once('/') {
        Some((service, host)) => format!("{}@{}", service, host),
        None => target.to_string()
    }
}

#[cfg(feature = "gssapi")]
impl KerberosContext {
    /// Create a `KerberosContext`.
    ///
    /// Nothing is acquired until the first call to
    /// [initiate](GSSAPIContext::initiate).
    #[inline]
    pub fn new() -> Self {
        KerberosContext { ctx: None }
    }

    /// Prepare a GSSAPI context.
    fn prepare_gssapi(
        target: &str
    ) -> Result<ClientCtx, libgssapi::error::Error> {
        // Prepare the mechanisms.
        let mut mechs = OidSet::new()?;

        mechs.add(&GSS_MECH_KRB5)?;

        let cred =
            Cred::acquire(None, None, CredUsage::Initiate, Some(&mechs))?;

        // Prepare the service name.
        let service = Name::new(
            hostbased_name(target).as_bytes(),
            Some(&GSS_NT_HOSTBASED_SERVICE)
        )?;
        let service = service.canonicalize(Some(&GSS_MECH_KRB5))?;

        Ok(ClientCtx::new(
            Some(cred),
            service,
            CtxFlags::GSS_C_MUTUAL_FLAG |
                CtxFlags::GSS_C_SEQUENCE_FLAG |
                CtxFlags::GSS_C_INTEG_FLAG |
                CtxFlags::GSS_C_CONF_FLAG,
            Some(&GSS_MECH_KRB5)
        ))
    }
}

#[cfg(feature = "gssapi")]
impl GSSAPIContext for KerberosContext {
    fn initiate(
        &mut self,
        target: &str,
        token: Option<&[u8]>
    ) -> Result<GSSAPIInitiated, GSSAPIContextError> {
        if self.ctx.is_none() {
            let ctx = KerberosContext::prepare_gssapi(target)
                .map_err(|err| GSSAPIContextError::GSSAPI { error: err })?;

            self.ctx = Some(ctx);
        }

        let ctx = self.ctx.as_mut().ok_or(GSSAPIContextError::NoContext)?;
        let out = ctx
            .step(token, None)
            .map_err(|err| GSSAPIContextError::GSSAPI { error: err })?;
        let token = match out {
            Some(buf) => {
                let bytes: &[u8] = &buf;

                bytes.to_vec()
            }
            None => Vec::new()
        };
        let established = ctx.is_complete();
        let flags = if established {
            ctx.flags()
                .map_err(|err| GSSAPIContextError::GSSAPI { error: err })?
                .bits()
        } else {
            0
        };

        Ok(GSSAPIInitiated::new(token, flags, established))
    }

    fn wrap(
        &mut self,
        data: &[u8],
        confidential: bool
    ) -> Result<Vec<u8>, GSSAPIContextError> {
        let ctx = self.ctx.as_mut().ok_or(GSSAPIContextError::NoContext)?;
        let buf = ctx
            .wrap(confidential, data)
            .map_err(|err| GSSAPIContextError::GSSAPI { error: err })?;
        let bytes: &[u8] = &buf;

        Ok(bytes.to_vec())
    }

    fn unwrap(
        &mut self,
        data: &[u8]
    ) -> Result<Vec<u8>, GSSAPIContextError> {
        let ctx = self.ctx.as_mut().ok_or(GSSAPIContextError::NoContext)?;
        let buf = ctx
            .unwrap(data)
            .map_err(|err| GSSAPIContextError::GSSAPI { error: err })?;
        let bytes: &[u8] = &buf;

        Ok(bytes.to_vec())
    }

    #[inline]
    fn release(&mut self) -> Result<(), GSSAPIContextError> {
        // Dropping the context deletes it.
        self.ctx = None;

        Ok(())
    }

    fn principal(&mut self) -> Option<String> {
        let ctx = self.ctx.as_mut()?;

        match ctx.source_name() {
            Ok(name) => Some(name.to_string()),
            Err(err) => {
                warn!(target: "sasl-gssapi",
                      "could not get source name from context ({})",
                      err);

                None
            }
        }
    }
}

impl Display for GSSAPIContextError {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            #[cfg(feature = "gssapi")]
            GSSAPIContextError::GSSAPI { error } => error.fmt(f),
            GSSAPIContextError::NoContext => {
                write!(f, "no security context has been established")
            }
            GSSAPIContextError::Other { msg } => write!(f, "{}", msg)
        }
    }
}

impl Error for GSSAPIContextError {}

/// Scripted [GSSAPIContext] used in tests.
///
/// Tokens are `leg-N`; wrapping prepends a marker byte (`C` when
/// confidential, `I` otherwise), and unwrapping strips it.
#[cfg(test)]
#[derive(Clone, Debug)]
pub(crate) struct ScriptedContext {
    /// Number of legs before the context is established.
    pub(crate) legs: usize,
    pub(crate) flags: u32,
    pub(crate) calls: usize,
    pub(crate) targets: Vec<String>,
    pub(crate) inputs: Vec<Option<Vec<u8>>>,
    pub(crate) releases: std::sync::Arc<std::sync::atomic::AtomicUsize>
}

#[cfg(test)]
impl Default for ScriptedContext {
    fn default() -> Self {
        ScriptedContext {
            legs: 2,
            flags: GSS_C_MUTUAL_FLAG | GSS_C_INTEG_FLAG | GSS_C_CONF_FLAG,
            calls: 0,
            targets: Vec::new(),
            inputs: Vec::new(),
            releases: std::sync::Arc::default()
        }
    }
}

#[cfg(test)]
impl GSSAPIContext for ScriptedContext {
    fn initiate(
        &mut self,
        target: &str,
        token: Option<&[u8]>
    ) -> Result<GSSAPIInitiated, GSSAPIContextError> {
        self.calls += 1;
        self.targets.push(target.to_string());
        self.inputs.push(token.map(|token| token.to_vec()));

        Ok(GSSAPIInitiated::new(
            format!("leg-{}", self.calls).into_bytes(),
            self.flags,
            self.calls >= self.legs
        ))
    }

    fn wrap(
        &mut self,
        data: &[u8],
        confidential: bool
    ) -> Result<Vec<u8>, GSSAPIContextError> {
        let mut out = vec![if confidential { b'C' } else { b'I' }];

        out.extend_from_slice(data);

        Ok(out)
    }

    fn unwrap(
        &mut self,
        data: &[u8]
    ) -> Result<Vec<u8>, GSSAPIContextError> {
        match data.split_first() {
            Some((b'C', rest)) | Some((b'I', rest)) => Ok(rest.to_vec()),
            _ => Err(GSSAPIContextError::Other {
                msg: String::from("bad wrapped message")
            })
        }
    }

    fn release(&mut self) -> Result<(), GSSAPIContextError> {
        self.releases
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);

        Ok(())
    }
}

/// Build a wrapped server security-layer offer.
#[cfg(test)]
pub(crate) fn server_offer(
    qop: u8,
    max_length: u32
) -> Vec<u8> {
    let mut out = vec![b'I'];
    let len = max_length.to_be_bytes();

    out.extend_from_slice(&[qop, len[1], len[2], len[3]]);

    out
}

#[cfg(test)]
fn test_mech() -> GSSAPIMechanism<ScriptedContext> {
    GSSAPIMechanism::new(
        ScriptedContext::default(),
        String::from("hive"),
        String::from("node1"),
        None
    )
}

#[cfg(test)]
fn negotiate_to_layer(mech: &mut GSSAPIMechanism<ScriptedContext>) {
    assert_eq!(Some(b"leg-1".to_vec()), mech.start().unwrap());
    assert_eq!(
        Some(b"leg-2".to_vec()),
        mech.step(Some(b"server-token")).unwrap()
    );
}

#[test]
fn test_gssapi_stages() {
    let mut mech = test_mech();

    mech.set_user(Some(String::from("alice@EXAMPLE.COM")));
    negotiate_to_layer(&mut mech);

    assert_eq!(
        vec![None, Some(b"server-token".to_vec())],
        mech.context().inputs
    );
    assert!(!mech.config().is_complete());

    let out = mech
        .step(Some(&server_offer(0x07, 65536)[..]))
        .unwrap()
        .unwrap();

    // Confidentiality selected, so the reply is encrypted.
    assert_eq!(b'C', out[0]);
    assert_eq!(&[0x04u8, 0x01, 0x00, 0x00][..], &out[1..5]);
    assert_eq!(b"alice@EXAMPLE.COM", &out[5..]);
    assert_eq!(65536, mech.server_max_length());
    assert_eq!(Some(Qop::AuthConf), mech.config().qop());
    assert!(mech.config().is_complete());
}

#[test]
fn test_gssapi_target_name() {
    let mut mech = test_mech();

    assert_eq!("hive/node1", mech.target_name());

    mech.set_host_qualified(Some(String::from("node1.example.com")));

    assert_eq!("hive/node1.example.com", mech.target_name());

    mech.start().unwrap();

    assert_eq!(
        vec![String::from("hive/node1.example.com")],
        mech.context().targets
    );
}

#[test]
fn test_gssapi_multi_leg() {
    let mut ctx = ScriptedContext::default();

    ctx.legs = 4;

    let mut mech =
        GSSAPIMechanism::new(ctx, String::from("hive"), String::from("node1"), None);

    mech.start().unwrap();
    mech.step(Some(b"a")).unwrap();
    mech.step(Some(b"b")).unwrap();

    assert_eq!(GSSAPIStage::Continue, mech.stage);

    mech.step(Some(b"c")).unwrap();

    assert_eq!(GSSAPIStage::SecurityLayer, mech.stage);
}

#[test]
fn test_gssapi_no_security_layer_still_authenticates() {
    let mut ctx = ScriptedContext::default();

    ctx.flags = GSS_C_MUTUAL_FLAG;

    let mut mech =
        GSSAPIMechanism::new(ctx, String::from("hive"), String::from("node1"), None);

    negotiate_to_layer(&mut mech);

    let out = mech.step(Some(&server_offer(0x01, 1024)[..])).unwrap().unwrap();

    assert_eq!(b'I', out[0]);
    assert_eq!(&[0x01u8, 0x00, 0x04, 0x00][..], &out[1..5]);
    assert_eq!(Some(Qop::Auth), mech.config().qop());
    assert_eq!(b"plain".to_vec(), mech.encode(b"plain").unwrap());
    assert_eq!(b"plain".to_vec(), mech.decode(b"plain").unwrap());
}

#[test]
fn test_gssapi_qop_selection_all_combinations() {
    let mech = test_mech();

    for offered in 0..8u8 {
        let res = mech.select_qop(offered);

        if offered & 0x04 != 0 {
            assert_eq!(Qop::AuthConf, res.unwrap());
        } else if offered & 0x02 != 0 {
            assert_eq!(Qop::AuthInt, res.unwrap());
        } else if offered & 0x01 != 0 {
            assert_eq!(Qop::Auth, res.unwrap());
        } else {
            assert!(matches!(res, Err(MechanismError::NoQopAvailable { .. })));
        }
    }
}

#[test]
fn test_gssapi_qop_respects_user_selection() {
    let mut mech = test_mech();

    mech.set_user_select_qop(0x03);

    assert_eq!(Qop::AuthInt, mech.select_qop(0x07).unwrap());

    mech.set_user_select_qop(0x04);

    assert!(matches!(
        mech.select_qop(0x03),
        Err(MechanismError::NoQopAvailable {
            offered: 0x03,
            acceptable: 0x04
        })
    ));
}

#[test]
fn test_gssapi_no_qop_fails() {
    let mut mech = test_mech();

    mech.set_user_select_qop(0x04);
    negotiate_to_layer(&mut mech);

    let res = mech.step(Some(&server_offer(0x01, 1024)[..]));

    assert!(matches!(res, Err(MechanismError::NoQopAvailable { .. })));
    assert!(!mech.config().is_complete());
}

#[test]
fn test_gssapi_max_length_bounded() {
    let mut mech = test_mech();

    mech.set_max_length(u32::MAX);
    negotiate_to_layer(&mut mech);

    let out = mech
        .step(Some(&server_offer(0x02, 0x00ff_ffff)[..]))
        .unwrap()
        .unwrap();

    // Integrity only, so not encrypted; length capped at 24 bits.
    assert_eq!(b'I', out[0]);
    assert_eq!(&[0x02u8, 0xff, 0xff, 0xff][..], &out[1..5]);
}

#[test]
fn test_gssapi_authz_id_preferred() {
    let mut mech = GSSAPIMechanism::new(
        ScriptedContext::default(),
        String::from("hive"),
        String::from("node1"),
        Some(String::from("admin"))
    );

    mech.set_user(Some(String::from("alice")));
    negotiate_to_layer(&mut mech);

    let out = mech.step(Some(&server_offer(0x04, 1024)[..])).unwrap().unwrap();

    assert_eq!(b"admin", &out[5..]);
}

#[test]
fn test_gssapi_bad_layer_length() {
    let mut mech = test_mech();

    negotiate_to_layer(&mut mech);

    let res = mech.step(Some(b"I\x07\x00\x00"));

    assert!(matches!(
        res,
        Err(MechanismError::BadSecurityLayer { len: 3 })
    ));
}

#[test]
fn test_gssapi_step_after_complete_fails() {
    let mut mech = test_mech();

    negotiate_to_layer(&mut mech);
    mech.step(Some(&server_offer(0x07, 1024)[..])).unwrap();

    assert!(matches!(
        mech.step(Some(b"more")),
        Err(MechanismError::StageOverrun)
    ));
}

#[test]
fn test_gssapi_encode_decode() {
    let mut mech = test_mech();

    assert!(matches!(mech.encode(b"x"), Err(MechanismError::Incomplete)));

    mech.set_user_select_qop(0x03);
    negotiate_to_layer(&mut mech);
    mech.step(Some(&server_offer(0x07, 1024)[..])).unwrap();

    let wrapped = mech.encode(b"payload").unwrap();

    assert_eq!(b"Ipayload".to_vec(), wrapped);
    assert_eq!(b"payload".to_vec(), mech.decode(&wrapped).unwrap());
}

#[test]
fn test_gssapi_dispose_once() {
    let ctx = ScriptedContext::default();
    let releases = ctx.releases.clone();
    let mut mech =
        GSSAPIMechanism::new(ctx, String::from("hive"), String::from("node1"), None);

    mech.dispose();
    mech.dispose();

    assert!(matches!(mech.start(), Err(MechanismError::Disposed)));

    drop(mech);

    assert_eq!(1, releases.load(std::sync::atomic::Ordering::SeqCst));
}

#[cfg(feature = "gssapi")]
#[test]
fn test_hostbased_name() {
    assert_eq!("hive@node1.example.com", hostbased_name("hive/node1.example.com"));
    assert_eq!("hive", hostbased_name("hive"));
}
