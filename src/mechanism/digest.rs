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

//! The `DIGEST-MD5` mechanism.
//!
//! `DIGEST-MD5` ([RFC 2831](https://datatracker.ietf.org/doc/html/rfc2831))
//! is a challenge/response mechanism built on a chain of MD5
//! hashes.  The server supplies a challenge containing a realm,
//! nonce, and set of acceptable QOP levels; the client responds
//! with a hash proving knowledge of the password, and the server
//! replies with its own proof (`rspauth`), which is checked before
//! negotiation is considered complete.
//!
//! This implementation provides no security layer; [encode] and
//! [decode] are the identity function regardless of the negotiated
//! QOP.
//!
//! [encode]: crate::mechanism::Mechanism::encode
//! [decode]: crate::mechanism::Mechanism::decode
use std::collections::HashMap;
use std::error::Error;
use std::fmt::Display;
use std::fmt::Formatter;
use std::iter::Peekable;
use std::str::Chars;

use log::debug;
use log::trace;
use log::warn;
use rand::distributions::Alphanumeric;
use rand::thread_rng;
use rand::Rng;
use zeroize::Zeroize;

use crate::mechanism::Mechanism;
use crate::mechanism::MechanismConfig;
use crate::mechanism::MechanismError;
use crate::mechanism::Qop;

/// Length of generated client nonces.
pub const CNONCE_LEN: usize = 14;

/// Maximum buffer size advertised when a security layer is selected.
const MAXBUF: u32 = 16777215;

const A2_QOP_SUFFIX: &str = ":00000000000000000000000000000000";

/// Source of client nonces.
///
/// This allows deterministic nonces to be supplied for testing.
pub trait NonceSource {
    /// Generate a client nonce of `len` characters.
    fn cnonce(
        &mut self,
        len: usize
    ) -> String;
}

/// [NonceSource] drawing alphanumeric characters from the thread RNG.
#[derive(Clone, Copy, Debug, Default)]
pub struct RandomNonce;

/// [NonceSource] that always returns the same nonce.
#[derive(Clone, Debug)]
pub struct FixedNonce {
    nonce: String
}

/// Errors that can occur parsing a challenge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ChallengeError {
    /// A directive had no `=`.
    MissingEquals {
        /// Text read before the directive ended.
        key: String
    },
    /// A directive had an empty name.
    EmptyKey,
    /// A quoted value had no closing quote.
    Unterminated {
        /// Name of the directive.
        key: String
    },
    /// Unexpected text followed a quoted value.
    Garbage {
        /// Name of the directive.
        key: String,
        /// The offending character.
        found: char
    }
}

/// Client side of the `DIGEST-MD5` mechanism.
pub struct DigestMD5Mechanism {
    config: MechanismConfig,
    nonces: Box<dyn NonceSource + Send>,
    service: String,
    host: String,
    username: String,
    /// Zeroed on disposal.
    password: String,
    /// Server nonce from the latest challenge.
    nonce: String,
    /// Client nonce, generated on the first round.
    cnonce: String,
    /// Incremented on every challenge round.
    nonce_count: u32,
    /// Raw `MD5(username:realm:password)`, computed once.
    key_hash: Option<[u8; 16]>,
    qop: Qop,
    disposed: bool
}

impl NonceSource for RandomNonce {
    #[inline]
    fn cnonce(
        &mut self,
        len: usize
    ) -> String {
        thread_rng()
            .sample_iter(&Alphanumeric)
            .take(len)
            .map(char::from)
            .collect()
    }
}

impl FixedNonce {
    #[inline]
    pub fn new(nonce: String) -> Self {
        FixedNonce { nonce: nonce }
    }
}

impl NonceSource for FixedNonce {
    #[inline]
    fn cnonce(
        &mut self,
        _len: usize
    ) -> String {
        self.nonce.clone()
    }
}

/// Parse a `DIGEST-MD5` challenge into its directives.
///
/// Challenges are comma-separated lists of `key=value` directives,
/// where values may be quoted.  Quoted values may contain commas and
/// backslash-escaped characters.  Malformed input produces an error;
/// every iteration consumes input, so parsing always terminates.
pub fn parse_challenge(
    challenge: &[u8]
) -> Result<HashMap<String, String>, ChallengeError> {
    let text = String::from_utf8_lossy(challenge);
    let mut chars = text.chars().peekable();
    let mut out = HashMap::new();

    loop {
        // Skip separators between directives.
        while let Some(&c) = chars.peek() {
            if c == ',' || c.is_whitespace() {
                chars.next();
            } else {
                break;
            }
        }

        if chars.peek().is_none() {
            return Ok(out);
        }

        let key = parse_key(&mut chars)?;

        skip_whitespace(&mut chars);

        let value = if chars.peek() == Some(&'"') {
            chars.next();

            let value = parse_quoted(&mut chars, &key)?;

            skip_whitespace(&mut chars);

            match chars.next() {
                None | Some(',') => value,
                Some(found) => {
                    return Err(ChallengeError::Garbage {
                        key: key,
                        found: found
                    })
                }
            }
        } else {
            let mut value = String::new();

            for c in &mut chars {
                if c == ',' {
                    break;
                }

                value.push(c);
            }

            value.trim_end().to_string()
        };

        out.insert(key, value);
    }
}

fn skip_whitespace(chars: &mut Peekable<Chars>) {
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else {
            break;
        }
    }
}

fn parse_key(chars: &mut Peekable<Chars>) -> Result<String, ChallengeError> {
    let mut key = String::new();

    loop {
        match chars.next() {
            Some('=') => break,
            Some(',') | None => {
                return Err(ChallengeError::MissingEquals { key: key })
            }
            Some(c) => key.push(c)
        }
    }

    let key = key.trim();

    if key.is_empty() {
        Err(ChallengeError::EmptyKey)
    } else {
        Ok(key.to_string())
    }
}

fn parse_quoted(
    chars: &mut Peekable<Chars>,
    key: &str
) -> Result<String, ChallengeError> {
    let mut value = String::new();

    loop {
        match chars.next() {
            Some('"') => return Ok(value),
            Some('\\') => match chars.next() {
                Some(c) => value.push(c),
                None => {
                    return Err(ChallengeError::Unterminated {
                        key: key.to_string()
                    })
                }
            },
            Some(c) => value.push(c),
            None => {
                return Err(ChallengeError::Unterminated {
                    key: key.to_string()
                })
            }
        }
    }
}

/// Quote a value as a `DIGEST-MD5` quoted string.
fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);

    out.push('"');

    for c in value.chars() {
        if c == '"' || c == '\\' {
            out.push('\\');
        }

        out.push(c);
    }

    out.push('"');

    out
}

/// Choose a QOP from the server's advertised list.
///
/// Plain `auth` is preferred, as no security layer is implemented.
fn choose_qop(advertised: Option<&str>) -> Option<Qop> {
    match advertised {
        // RFC 2831 makes `auth` the default.
        None => Some(Qop::Auth),
        Some(advertised) => {
            let offered: Vec<Qop> = advertised
                .split(',')
                .filter_map(|name| Qop::from_name(name.trim()))
                .collect();

            if offered.contains(&Qop::Auth) {
                Some(Qop::Auth)
            } else {
                offered.first().copied()
            }
        }
    }
}

impl DigestMD5Mechanism {
    /// Create a `DIGEST-MD5` mechanism.
    ///
    /// The digest URI is formed from `service` and `host`.
    #[inline]
    pub fn new(
        service: String,
        host: String,
        username: String,
        password: String,
        authz_id: Option<String>,
        nonces: Box<dyn NonceSource + Send>
    ) -> Self {
        DigestMD5Mechanism {
            config: MechanismConfig::new("DIGEST-MD5", authz_id),
            nonces: nonces,
            service: service,
            host: host,
            username: username,
            password: password,
            nonce: String::new(),
            cnonce: String::new(),
            nonce_count: 0,
            key_hash: None,
            qop: Qop::Auth,
            disposed: false
        }
    }

    /// Get the number of challenge rounds so far.
    #[inline]
    pub fn nonce_count(&self) -> u32 {
        self.nonce_count
    }

    #[inline]
    fn digest_uri(&self) -> String {
        format!("{}/{}", self.service, self.host)
    }

    /// Compute the response hash for a given `A2` string.
    fn response_hash(
        &mut self,
        realm: &str,
        a2: &str
    ) -> String {
        // The raw key hash, not its hex form, goes into A1.
        let key_hash = match self.key_hash {
            Some(key_hash) => key_hash,
            None => {
                let mut secret =
                    format!("{}:{}:{}", self.username, realm, self.password);
                let key_hash = md5::compute(secret.as_bytes()).0;

                secret.zeroize();
                self.key_hash = Some(key_hash);

                key_hash
            }
        };
        let mut a1 = key_hash.to_vec();

        a1.push(b':');
        a1.extend_from_slice(self.nonce.as_bytes());
        a1.push(b':');
        a1.extend_from_slice(self.cnonce.as_bytes());

        if let Some(authz_id) = self.config.authz_id() {
            a1.push(b':');
            a1.extend_from_slice(authz_id.as_bytes());
        }

        let ha1 = md5::compute(&a1);
        let ha2 = md5::compute(a2.as_bytes());
        let response = format!(
            "{:x}:{}:{:08x}:{}:{}:{:x}",
            ha1,
            self.nonce,
            self.nonce_count,
            self.cnonce,
            self.qop.name(),
            ha2
        );

        a1.zeroize();

        format!("{:x}", md5::compute(response.as_bytes()))
    }

    /// Build the response to the server's first challenge.
    fn respond(
        &mut self,
        challenge: &HashMap<String, String>
    ) -> Result<Vec<u8>, MechanismError> {
        let nonce = challenge
            .get("nonce")
            .ok_or(MechanismError::MissingField { name: "nonce" })?;
        let realm = challenge.get("realm").map(String::as_str).unwrap_or("");
        let qop = choose_qop(challenge.get("qop").map(String::as_str))
            .ok_or(MechanismError::NoQopAvailable {
                offered: 0,
                acceptable: Qop::Auth.flag()
            })?;

        self.nonce = nonce.clone();
        self.qop = qop;

        if self.nonce_count == 0 {
            self.cnonce = self.nonces.cnonce(CNONCE_LEN);
        }

        self.nonce_count += 1;

        trace!(target: "sasl-digest",
               "responding to challenge round {} with qop {}",
               self.nonce_count, qop);

        let digest_uri = self.digest_uri();
        let mut a2 = format!("AUTHENTICATE:{}", digest_uri);

        if qop != Qop::Auth {
            a2.push_str(A2_QOP_SUFFIX);
        }

        let response = self.response_hash(realm, &a2);
        let mut out = format!(
            concat!(
                "qop={},realm={},username={},nonce={},cnonce={},",
                "nc={:08x},digest-uri={},response={}"
            ),
            qop,
            quote(realm),
            quote(&self.username),
            quote(&self.nonce),
            quote(&self.cnonce),
            self.nonce_count,
            quote(&digest_uri),
            response
        );

        if let Some(authz_id) = self.config.authz_id() {
            out.push_str(",authzid=");
            out.push_str(&quote(authz_id));
        }

        if qop != Qop::Auth {
            out.push_str(&format!(",maxbuf={}", MAXBUF));
        }

        self.config.set_qop(qop);

        Ok(out.into_bytes())
    }

    /// Check the server's final `rspauth` proof.
    fn authenticate(
        &mut self,
        rspauth: &str
    ) -> Result<(), MechanismError> {
        if self.nonce_count == 0 {
            return Err(MechanismError::UnexpectedChallenge);
        }

        let mut a2 = format!(":{}", self.digest_uri());

        if self.qop != Qop::Auth {
            a2.push_str(A2_QOP_SUFFIX);
        }

        // The key hash is already cached, so the realm is unused.
        if self.response_hash("", &a2) == rspauth {
            debug!(target: "sasl-digest",
                   "server proof verified for {}",
                   self.username);

            self.config.set_complete();

            Ok(())
        } else {
            warn!(target: "sasl-digest",
                  "server proof did not match for {}",
                  self.username);

            Err(MechanismError::Authentication)
        }
    }
}

impl Mechanism for DigestMD5Mechanism {
    fn step(
        &mut self,
        challenge: Option<&[u8]>
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        if self.disposed {
            return Err(MechanismError::Disposed);
        }

        if self.config.is_complete() {
            return Err(MechanismError::StageOverrun);
        }

        // The server speaks first.
        let challenge = match challenge {
            Some(challenge) => challenge,
            None => return Ok(None)
        };
        let challenge = parse_challenge(challenge)
            .map_err(|err| MechanismError::Challenge { error: err })?;

        match challenge.get("rspauth") {
            Some(rspauth) => {
                self.authenticate(rspauth)?;

                Ok(None)
            }
            None => self.respond(&challenge).map(Some)
        }
    }

    #[inline]
    fn encode(
        &mut self,
        outgoing: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        Ok(outgoing.to_vec())
    }

    #[inline]
    fn decode(
        &mut self,
        incoming: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        Ok(incoming.to_vec())
    }

    #[inline]
    fn dispose(&mut self) {
        if !self.disposed {
            self.password.zeroize();

            if let Some(key_hash) = &mut self.key_hash {
                key_hash.zeroize();
            }

            self.key_hash = None;
            self.disposed = true;
        }
    }

    #[inline]
    fn config(&self) -> &MechanismConfig {
        &self.config
    }
}

impl Drop for DigestMD5Mechanism {
    fn drop(&mut self) {
        self.dispose()
    }
}

impl Display for ChallengeError {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            ChallengeError::MissingEquals { key } => {
                write!(f, "challenge directive \"{}\" has no value", key)
            }
            ChallengeError::EmptyKey => {
                write!(f, "challenge directive has an empty name")
            }
            ChallengeError::Unterminated { key } => write!(
                f,
                "challenge directive \"{}\" has an unterminated quote",
                key
            ),
            ChallengeError::Garbage { key, found } => write!(
                f,
                "unexpected '{}' after challenge directive \"{}\"",
                found, key
            )
        }
    }
}

impl Error for ChallengeError {}

#[cfg(test)]
const GOLDEN_CHALLENGE: &[u8] =
    b"realm=\"EXAMPLE.COM\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth\"";

#[cfg(test)]
fn test_mech(authz_id: Option<String>) -> DigestMD5Mechanism {
    DigestMD5Mechanism::new(
        String::from("hive"),
        String::from("node1"),
        String::from("alice"),
        String::from("secret"),
        authz_id,
        Box::new(FixedNonce::new(String::from("abcdefghijklmn")))
    )
}

/// Independent reference computation of the response hash chain.
#[cfg(test)]
fn reference_response(
    a2: &str,
    nc: u32,
    qop: &str,
    authz_id: Option<&str>
) -> String {
    let key = md5::compute(b"alice:EXAMPLE.COM:secret");
    let mut a1 = Vec::new();

    a1.extend_from_slice(&key.0);
    a1.extend_from_slice(b":OA6MG9tEQGm2hh:abcdefghijklmn");

    if let Some(authz_id) = authz_id {
        a1.extend_from_slice(format!(":{}", authz_id).as_bytes());
    }

    let ha1 = format!("{:x}", md5::compute(&a1));
    let ha2 = format!("{:x}", md5::compute(a2.as_bytes()));
    let kd = format!(
        "{}:OA6MG9tEQGm2hh:{:08x}:abcdefghijklmn:{}:{}",
        ha1, nc, qop, ha2
    );

    format!("{:x}", md5::compute(kd.as_bytes()))
}

#[cfg(test)]
fn response_field(token: &[u8]) -> HashMap<String, String> {
    parse_challenge(token).expect("expected success")
}

#[test]
fn test_parse_challenge_basic() {
    let parsed = parse_challenge(GOLDEN_CHALLENGE).unwrap();

    assert_eq!(3, parsed.len());
    assert_eq!("EXAMPLE.COM", parsed["realm"]);
    assert_eq!("OA6MG9tEQGm2hh", parsed["nonce"]);
    assert_eq!("auth", parsed["qop"]);
}

#[test]
fn test_parse_challenge_quoted_commas() {
    let parsed = parse_challenge(
        b"qop=\"auth,auth-int,auth-conf\", charset=utf-8,algorithm=md5-sess"
    )
    .unwrap();

    assert_eq!("auth,auth-int,auth-conf", parsed["qop"]);
    assert_eq!("utf-8", parsed["charset"]);
    assert_eq!("md5-sess", parsed["algorithm"]);
}

#[test]
fn test_parse_challenge_escapes() {
    let parsed = parse_challenge(b"realm=\"a\\\"b\\\\c\",nonce=x").unwrap();

    assert_eq!("a\"b\\c", parsed["realm"]);
    assert_eq!("x", parsed["nonce"]);
}

#[test]
fn test_parse_challenge_empty() {
    assert!(parse_challenge(b"").unwrap().is_empty());
    assert!(parse_challenge(b" , ,").unwrap().is_empty());
}

#[test]
fn test_parse_challenge_unterminated() {
    assert_eq!(
        Err(ChallengeError::Unterminated {
            key: String::from("nonce")
        }),
        parse_challenge(b"realm=\"x\",nonce=\"abc")
    );
    assert_eq!(
        Err(ChallengeError::Unterminated {
            key: String::from("nonce")
        }),
        parse_challenge(b"nonce=\"abc\\")
    );
}

#[test]
fn test_parse_challenge_missing_equals() {
    assert_eq!(
        Err(ChallengeError::MissingEquals {
            key: String::from("realm")
        }),
        parse_challenge(b"realm")
    );
    assert_eq!(
        Err(ChallengeError::MissingEquals {
            key: String::from("qop")
        }),
        parse_challenge(b"nonce=abc,qop,realm=x")
    );
    assert_eq!(Err(ChallengeError::EmptyKey), parse_challenge(b"=abc"));
}

#[test]
fn test_parse_challenge_garbage_after_quote() {
    assert_eq!(
        Err(ChallengeError::Garbage {
            key: String::from("realm"),
            found: 'x'
        }),
        parse_challenge(b"realm=\"a\"x,nonce=b")
    );
}

#[test]
fn test_quote() {
    assert_eq!("\"abc\"", quote("abc"));
    assert_eq!("\"a\\\"b\\\\\"", quote("a\"b\\"));
}

#[test]
fn test_choose_qop() {
    assert_eq!(Some(Qop::Auth), choose_qop(None));
    assert_eq!(Some(Qop::Auth), choose_qop(Some("auth-conf,auth")));
    assert_eq!(Some(Qop::AuthInt), choose_qop(Some("auth-int, auth-conf")));
    assert_eq!(None, choose_qop(Some("bogus")));
}

#[test]
fn test_digest_first_call_no_token() {
    let mut mech = test_mech(None);

    assert_eq!(None, mech.start().unwrap());
    assert_eq!(0, mech.nonce_count());
    assert!(!mech.config().is_complete());
}

#[test]
fn test_digest_golden_response() {
    let mut mech = test_mech(None);
    let token = mech.step(Some(GOLDEN_CHALLENGE)).unwrap().unwrap();
    let text = String::from_utf8(token.clone()).unwrap();
    let fields = response_field(&token);

    assert!(text.starts_with("qop=auth,realm=\"EXAMPLE.COM\",username=\"alice\""));
    assert!(text.contains("nonce=\"OA6MG9tEQGm2hh\""));
    assert!(text.contains("cnonce=\"abcdefghijklmn\""));
    assert!(text.contains("digest-uri=\"hive/node1\""));
    assert!(!text.contains("maxbuf"));
    assert_eq!("00000001", fields["nc"]);
    assert_eq!("8c5ed930451248ab605c1a407e101b19", fields["response"]);
    assert_eq!(
        reference_response("AUTHENTICATE:hive/node1", 1, "auth", None),
        fields["response"]
    );
    assert_eq!(Some(Qop::Auth), mech.config().qop());
    assert!(!mech.config().is_complete());
}

#[test]
fn test_digest_deterministic() {
    let mut first = test_mech(None);
    let mut second = test_mech(None);

    assert_eq!(
        first.step(Some(GOLDEN_CHALLENGE)).unwrap(),
        second.step(Some(GOLDEN_CHALLENGE)).unwrap()
    );
}

#[test]
fn test_digest_auth_int_response() {
    let mut mech = test_mech(None);
    let challenge =
        b"realm=\"EXAMPLE.COM\",nonce=\"OA6MG9tEQGm2hh\",qop=\"auth-int\"";
    let token = mech.step(Some(challenge)).unwrap().unwrap();
    let fields = response_field(&token);

    assert_eq!("auth-int", fields["qop"]);
    assert_eq!("16777215", fields["maxbuf"]);
    assert_eq!("e85f565f9213d34f362ede8f0c5f577e", fields["response"]);

    mech.step(Some(b"rspauth=2d90d6a9b921be6c646b0fc99544f274"))
        .unwrap();

    assert!(mech.config().is_complete());
}

#[test]
fn test_digest_authz_id() {
    let mut mech = test_mech(Some(String::from("bob")));
    let token = mech.step(Some(GOLDEN_CHALLENGE)).unwrap().unwrap();
    let fields = response_field(&token);

    assert_eq!("bob", fields["authzid"]);
    assert_eq!("fc4117291398d262e8e0a3885f9172eb", fields["response"]);
}

#[test]
fn test_digest_rspauth_success() {
    let mut mech = test_mech(None);

    mech.step(Some(GOLDEN_CHALLENGE)).unwrap();

    let rspauth = format!(
        "rspauth={}",
        reference_response(":hive/node1", 1, "auth", None)
    );

    assert_eq!("rspauth=20f54e7467ad9e916cbcd5816c92291b", rspauth);
    assert_eq!(None, mech.step(Some(rspauth.as_bytes())).unwrap());
    assert!(mech.config().is_complete());
    assert!(matches!(
        mech.step(Some(GOLDEN_CHALLENGE)),
        Err(MechanismError::StageOverrun)
    ));
}

#[test]
fn test_digest_rspauth_mismatch() {
    let mut mech = test_mech(None);

    mech.step(Some(GOLDEN_CHALLENGE)).unwrap();

    let res = mech.step(Some(b"rspauth=00000000000000000000000000000000"));

    assert!(matches!(res, Err(MechanismError::Authentication)));
    assert!(!mech.config().is_complete());
}

#[test]
fn test_digest_rspauth_before_challenge() {
    let mut mech = test_mech(None);
    let res = mech.step(Some(b"rspauth=20f54e7467ad9e916cbcd5816c92291b"));

    assert!(matches!(res, Err(MechanismError::UnexpectedChallenge)));
}

#[test]
fn test_digest_nonce_count_monotonic() {
    let mut mech = test_mech(None);

    for round in 1..=20u32 {
        let token = mech.step(Some(GOLDEN_CHALLENGE)).unwrap().unwrap();
        let fields = response_field(&token);
        let nc = &fields["nc"];

        assert_eq!(round, mech.nonce_count());
        assert_eq!(8, nc.len());
        assert_eq!(format!("{:08x}", round), *nc);
        assert_eq!(nc.to_lowercase(), *nc);
    }

    let token = mech.step(Some(GOLDEN_CHALLENGE)).unwrap().unwrap();

    assert_eq!("00000015", response_field(&token)["nc"]);
}

#[test]
fn test_digest_second_round_hash() {
    let mut mech = test_mech(None);

    mech.step(Some(GOLDEN_CHALLENGE)).unwrap();

    let token = mech.step(Some(GOLDEN_CHALLENGE)).unwrap().unwrap();

    assert_eq!(
        "fd6d82fd8440eae73127979c44d616c1",
        response_field(&token)["response"]
    );
}

#[test]
fn test_digest_missing_nonce() {
    let mut mech = test_mech(None);
    let res = mech.step(Some(b"realm=\"EXAMPLE.COM\",qop=\"auth\""));

    assert!(matches!(
        res,
        Err(MechanismError::MissingField { name: "nonce" })
    ));
}

#[test]
fn test_digest_malformed_challenge() {
    let mut mech = test_mech(None);
    let res = mech.step(Some(b"realm=\"EXAMPLE.COM"));

    assert!(matches!(res, Err(MechanismError::Challenge { .. })));
}

#[test]
fn test_digest_random_nonce() {
    let nonce = RandomNonce.cnonce(CNONCE_LEN);

    assert_eq!(CNONCE_LEN, nonce.len());
    assert!(nonce.chars().all(|c| c.is_ascii_alphanumeric()));
}

#[test]
fn test_digest_dispose() {
    let mut mech = test_mech(None);

    mech.step(Some(GOLDEN_CHALLENGE)).unwrap();
    mech.dispose();
    mech.dispose();

    assert!(mech.password.is_empty());
    assert_eq!(None, mech.key_hash);
    assert!(matches!(
        mech.step(Some(GOLDEN_CHALLENGE)),
        Err(MechanismError::Disposed)
    ));
}
