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

//! Byte-stream transports.
//!
//! A [Transport] is an ordered, reliable byte stream that can be
//! opened and closed.  Two implementations are provided:
//!
//! - Plain TCP connections: provided by [TCPTransport](tcp::TCPTransport)
//! - SASL-secured framed connections over any other transport: provided by
//!   [SASLTransport](sasl::SASLTransport)
use std::io::Error;
use std::io::Read;
use std::io::Write;

pub mod sasl;
pub mod tcp;

/// Ordered, reliable byte stream with an open/closed state.
///
/// Reads and writes on a transport that is not open should fail
/// with [NotConnected](std::io::ErrorKind::NotConnected).
pub trait Transport: Read + Write {
    /// Check whether the transport is open.
    fn is_open(&self) -> bool;

    /// Open the transport.
    ///
    /// This does nothing if the transport is already open.
    fn open(&mut self) -> Result<(), Error>;

    /// Close the transport.
    fn close(&mut self) -> Result<(), Error>;
}
