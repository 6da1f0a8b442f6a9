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

//! SASL client orchestrator.
//!
//! A [SASLClient] binds one [Mechanism] instance to one connection
//! attempt.  Every operation is a direct delegation to the mechanism;
//! failures are propagated unchanged.
use crate::mechanism::Mechanism;
use crate::mechanism::MechanismConfig;
use crate::mechanism::MechanismError;

/// SASL client, holding one mechanism for one connection.
pub struct SASLClient<M: Mechanism> {
    /// Name of the server being connected to.
    host: String,
    mechanism: M
}

impl<M: Mechanism> SASLClient<M> {
    /// Create a `SASLClient` for `host` using `mechanism`.
    #[inline]
    pub fn new(
        host: String,
        mechanism: M
    ) -> Self {
        SASLClient {
            host: host,
            mechanism: mechanism
        }
    }

    /// Get the name of the server being connected to.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the SASL name of the mechanism.
    #[inline]
    pub fn mechanism_name(&self) -> &'static str {
        self.mechanism.config().name()
    }

    /// Get the underlying mechanism.
    #[inline]
    pub fn mechanism(&self) -> &M {
        &self.mechanism
    }

    /// Produce the first outbound token.
    #[inline]
    pub fn start(&mut self) -> Result<Option<Vec<u8>>, MechanismError> {
        self.mechanism.start()
    }

    /// Consume a server challenge and produce the next token.
    #[inline]
    pub fn step(
        &mut self,
        challenge: Option<&[u8]>
    ) -> Result<Option<Vec<u8>>, MechanismError> {
        self.mechanism.step(challenge)
    }

    /// Check whether negotiation has finished.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.mechanism.config().is_complete()
    }

    /// Get a read-only view of the negotiation state.
    #[inline]
    pub fn config(&self) -> &MechanismConfig {
        self.mechanism.config()
    }

    /// Apply the security layer to an outgoing payload.
    #[inline]
    pub fn encode(
        &mut self,
        outgoing: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        self.mechanism.encode(outgoing)
    }

    /// Remove the security layer from an incoming payload.
    #[inline]
    pub fn decode(
        &mut self,
        incoming: &[u8]
    ) -> Result<Vec<u8>, MechanismError> {
        self.mechanism.decode(incoming)
    }

    /// Release the mechanism's secrets and external resources.
    #[inline]
    pub fn dispose(&mut self) {
        self.mechanism.dispose()
    }
}

#[cfg(test)]
use crate::mechanism::gssapi::server_offer;
#[cfg(test)]
use crate::mechanism::gssapi::GSSAPIMechanism;
#[cfg(test)]
use crate::mechanism::gssapi::ScriptedContext;
#[cfg(test)]
use crate::mechanism::plain::PlainMechanism;
#[cfg(test)]
use crate::mechanism::Qop;

#[test]
fn test_client_plain() {
    crate::init();

    let mech = PlainMechanism::new(
        String::from("alice"),
        String::from("secret"),
        None
    );
    let mut client = SASLClient::new(String::from("node1"), mech);

    assert_eq!("node1", client.host());
    assert_eq!("PLAIN", client.mechanism_name());
    assert!(!client.is_complete());
    assert_eq!(
        Some(b"\0alice\0secret".to_vec()),
        client.start().unwrap()
    );
    assert!(client.is_complete());
    assert_eq!(b"data".to_vec(), client.encode(b"data").unwrap());
    assert_eq!(b"data".to_vec(), client.decode(b"data").unwrap());
}

#[test]
fn test_client_propagates_errors() {
    crate::init();

    let mech = GSSAPIMechanism::new(
        ScriptedContext::default(),
        String::from("hive"),
        String::from("node1"),
        None
    );
    let mut client = SASLClient::new(String::from("node1"), mech);

    assert!(matches!(client.encode(b"x"), Err(MechanismError::Incomplete)));

    client.start().unwrap();
    client.step(Some(b"token")).unwrap();
    client.step(Some(&server_offer(0x02, 1024)[..])).unwrap();

    assert!(client.is_complete());
    assert_eq!(Some(Qop::AuthInt), client.config().qop());

    client.dispose();

    assert!(matches!(client.decode(b"Ix"), Err(MechanismError::Disposed)));
}
