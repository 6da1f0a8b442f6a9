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

//! The `PLAIN` mechanism.
//!
//! `PLAIN` sends the authorization identity, username, and password
//! to the server in a single message, separated by NUL bytes.  It
//! provides no security layer, and should only be used over a
//! channel that is already protected.
use std::fmt::Debug;
use std::fmt::Formatter;

use log::debug;
use zeroize::Zeroize;

use crate::mechanism::Mechanism;
use crate::mechanism::MechanismConfig;
use crate::mechanism::MechanismError;

const SEPARATOR: u8 = 0;

/// Client side of the `PLAIN` mechanism.
pub struct PlainMechanism {
    config: MechanismConfig,
    username: String,
    /// Zeroed on disposal.
    password: String,
    disposed: bool
}

impl PlainMechanism {
    /// Create a `PLAIN` mechanism from credentials.
    ///
    /// If `authz_id` is given, it is sent as the authorization
    /// identity; otherwise the identity field is left empty.
    #[inline]
    pub fn new(
        username: String,
        password: String,
        authz_id: Option<String>
    ) -> Self {
        PlainMechanism {
            config: MechanismConfig::new("PLAIN", authz_id),
            username: username,
            password: password,
            disposed: false
        }
    }
}

impl Mechanism for PlainMechanism {
    fn step(
        &mut self,
        _challenge: Option<&[u8]>
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        if self.disposed {
            return Err(MechanismError::Disposed);
        }

        if self.config.is_complete() {
            return Err(MechanismError::StageOverrun);
        }

        let authz_id = self.config.authz_id().unwrap_or("");
        let mut out = Vec::with_capacity(
            authz_id.len() + self.username.len() + self.password.len() + 2
        );

        out.extend_from_slice(authz_id.as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(self.username.as_bytes());
        out.push(SEPARATOR);
        out.extend_from_slice(self.password.as_bytes());

        debug!(target: "sasl-plain",
               "sending credentials for {}",
               self.username);

        self.config.set_complete();

        Ok(Some(out))
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
            self.disposed = true;
        }
    }

    #[inline]
    fn config(&self) -> &MechanismConfig {
        &self.config
    }
}

impl Debug for PlainMechanism {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        f.debug_struct("PlainMechanism")
            .field("config", &self.config)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("disposed", &self.disposed)
            .finish()
    }
}

impl Drop for PlainMechanism {
    fn drop(&mut self) {
        self.dispose()
    }
}

#[test]
fn test_plain_single_step() {
    let mut mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );

    assert!(!mech.config().is_complete());

    let token = mech.start().unwrap();

    assert_eq!(Some(b"\0alice\0secret".to_vec()), token);
    assert!(mech.config().is_complete());
    assert_eq!("PLAIN", mech.config().name());
}

#[test]
fn test_plain_authz_id() {
    let mut mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        Some(String::from("hive"))
    );
    let token = mech.step(Some(b"ignored")).unwrap();

    assert_eq!(Some(b"hive\0alice\0secret".to_vec()), token);
}

#[test]
fn test_plain_identity_layer() {
    let mut mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );
    let payloads: [&[u8]; 3] = [b"", b"\x00\x01\x02", b"hello world"];

    for payload in payloads.iter() {
        assert_eq!(payload.to_vec(), mech.encode(payload).unwrap());
        assert_eq!(payload.to_vec(), mech.decode(payload).unwrap());
    }
}

#[test]
fn test_plain_second_step_fails() {
    let mut mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );

    mech.start().unwrap();

    assert!(matches!(mech.step(None), Err(MechanismError::StageOverrun)));
}

#[test]
fn test_plain_dispose_zeroes_password() {
    let mut mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );

    mech.dispose();
    mech.dispose();

    assert!(mech.password.is_empty());
    assert!(matches!(mech.start(), Err(MechanismError::Disposed)));
}

#[test]
fn test_plain_debug_redacts_password() {
    let mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );
    let out = format!("{:?}", mech);

    assert!(out.contains("alice"));
    assert!(!out.contains("secret"));
}
