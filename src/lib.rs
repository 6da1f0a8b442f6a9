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

#![allow(clippy::redundant_field_names)]
#![allow(clippy::too_many_arguments)]
#![allow(clippy::upper_case_acronyms)]

//! SASL negotiation and security-layer transports.
//!
//! This package provides a client-side implementation of the SASL
//! (Simple Authentication and Security Layer) negotiation used by
//! Thrift-style RPC services, together with the framed transport
//! that carries application traffic once negotiation has completed.
//! The RPC layer above only ever sees a byte stream; everything
//! concerning authentication and message protection is handled
//! beneath it.
//!
//! # Layers
//!
//! The package is organized as a stack of layers:
//!
//!  - **Mechanisms**: pluggable authentication algorithms (`PLAIN`,
//!    `DIGEST-MD5`, and `GSSAPI`), all implementing the
//!    [Mechanism](crate::mechanism::Mechanism) trait.  See the
//!    [mechanism] module.
//!
//!  - **Client**: the [SASLClient](crate::client::SASLClient), which
//!    binds one mechanism to one connection attempt.
//!
//!  - **Negotiation**: the handshake exchange of status-tagged,
//!    length-prefixed messages, driven by
//!    [negotiate](crate::negotiate::negotiate).
//!
//!  - **Transports**: the [Transport](crate::transport::Transport)
//!    byte-stream contract, a TCP implementation, and the
//!    [SASLTransport](crate::transport::sasl::SASLTransport), which
//!    wraps every frame using the negotiated security layer.
//!
//! Transports are configurable; each has an associated configuration
//! object that can be parsed from YAML using `serde_yaml`.  See the
//! [config] module.
//!
//! # GSSAPI
//!
//! The `GSSAPI` mechanism delegates all cryptographic work to an
//! external security-context capability, described by the
//! [GSSAPIContext](crate::mechanism::gssapi::GSSAPIContext) trait.
//! With the `gssapi` feature (enabled by default), a Kerberos
//! implementation backed by the system GSSAPI library is provided.
pub mod client;
pub mod config;
pub mod mechanism;
pub mod negotiate;
pub mod transport;

#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
use log::LevelFilter;

#[cfg(test)]
static INIT: Once = Once::new();

#[cfg(test)]
fn init() {
    INIT.call_once(|| {
        env_logger::builder()
            .is_test(true)
            .filter_level(LevelFilter::Trace)
            .init()
    })
}
