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

//! Configuration structures.
//!
//! This module contains definitions of types that supply
//! configuration information.  Each of these types has a YAML format,
//! which can be parsed using `serde_yaml`, thus allowing
//! configurations to be easily loaded from text files.
//!
//! The following configuration structures are provided:
//!
//! - Mechanism selection and credentials: provided by [SASLMechanismConfig]
//! - SASL session parameters: provided by [SASLConfig]
//! - TCP connections: provided by [TCPTransportConfig]
//! - SASL connections over TCP: provided by [SASLConnectConfig]
use std::collections::HashMap;
use std::fmt::Debug;
use std::fmt::Formatter;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::mechanism::DEFAULT_MAX_LENGTH;
use crate::negotiate::NegotiationError;

/// Mechanism selection, together with the credentials it needs.
///
/// # YAML Format
///
/// The YAML format has three variants, each of which is a single key
/// naming the mechanism:
///
/// - `plain`: `PLAIN` authentication, with `username` and `password` fields.
///
/// - `digest-md5`: `DIGEST-MD5` authentication, with `service`, `username`,
///   and `password` fields.
///
/// - `gssapi`: `GSSAPI` authentication, with a `service` field.
///
/// ## Examples
///
/// The following is an example of a `DIGEST-MD5` specification:
///
/// ```yaml
/// digest-md5:
///   service: hive
///   username: alice
///   password: secret
/// ```
///
/// The following is an example of a `GSSAPI` specification:
///
/// ```yaml
/// gssapi:
///   service: hive
/// ```
#[derive(Clone, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(from = "SASLMechanismIntermediate")]
#[serde(into = "SASLMechanismIntermediate")]
pub enum SASLMechanismConfig {
    /// `PLAIN` authentication.
    Plain {
        /// The username.
        username: String,
        /// The password.
        password: String
    },
    /// `DIGEST-MD5` authentication.
    DigestMD5 {
        /// Service part of the digest URI.
        service: String,
        /// The username.
        username: String,
        /// The password.
        password: String
    },
    /// `GSSAPI` authentication.
    GSSAPI {
        /// Service part of the target name.
        service: String
    }
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct PasswordIntermediate {
    username: String,
    password: String
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ServicePasswordIntermediate {
    service: String,
    username: String,
    password: String
}

#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
struct ServiceIntermediate {
    service: String
}

#[derive(Deserialize, Serialize)]
#[serde(rename = "mechanism")]
#[serde(untagged)]
enum SASLMechanismIntermediate {
    Plain {
        plain: PasswordIntermediate
    },
    DigestMD5 {
        #[serde(rename = "digest-md5")]
        digest_md5: ServicePasswordIntermediate
    },
    GSSAPI {
        gssapi: ServiceIntermediate
    }
}

/// SASL session configuration.
///
/// # YAML Format
///
/// The YAML format has four fields:
///
/// - `mechanism`: A [SASLMechanismConfig] structure.
///
/// - `principal`: Authorization identity to request, if different from the
///   authenticated identity.  This is optional.
///
/// - `max-length`: Maximum frame size, in bytes.  This is also the maximum
///   buffer size advertised by `GSSAPI`.  The default is 16384000.
///
/// - `service-host-qualified`: Replaces the host in the `GSSAPI` target name.
///   This is optional; if absent, the `SERVICE_HOST_QUALIFIED` environment
///   variable is consulted.
///
/// ## Examples
///
/// The following is an example of the YAML format:
///
/// ```yaml
/// mechanism:
///   plain:
///     username: alice
///     password: secret
/// principal: admin
/// max-length: 65536
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename = "sasl")]
#[serde(rename_all = "kebab-case")]
pub struct SASLConfig {
    /// Mechanism and credentials.
    mechanism: SASLMechanismConfig,
    /// Authorization identity override.
    #[serde(default)]
    principal: Option<String>,
    /// Maximum frame size.
    #[serde(default = "SASLConfig::default_max_length")]
    max_length: u32,
    /// Host override for `GSSAPI` target names.
    #[serde(default)]
    service_host_qualified: Option<String>
}

/// TCP connection configuration.
///
/// # YAML Format
///
/// The YAML format has four fields:
///
/// - `host`: Name or address of the server.
///
/// - `port`: Port number of the server.
///
/// - `connect-timeout`: Timeout for each connection attempt, in milliseconds.
///   This is optional; if absent, the operating system's timeout applies.
///
/// - `socket-timeout`: Read and write timeout, in milliseconds.  This is
///   optional; if absent, reads and writes block indefinitely.
///
/// ## Examples
///
/// ```yaml
/// host: node1.example.com
/// port: 10000
/// connect-timeout: 5000
/// ```
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename = "tcp")]
#[serde(rename_all = "kebab-case")]
pub struct TCPTransportConfig {
    /// Server name or address.
    host: String,
    /// Server port.
    port: u16,
    /// Connect timeout in milliseconds.
    #[serde(default)]
    connect_timeout: Option<u64>,
    /// Socket timeout in milliseconds.
    #[serde(default)]
    socket_timeout: Option<u64>
}

/// Configuration for a SASL-secured connection over TCP.
///
/// # YAML Format
///
/// The YAML format has the fields of [TCPTransportConfig], which are
/// flattened, plus one more field:
///
/// - `sasl`: A [SASLConfig] structure.
///
/// ## Examples
///
/// ```yaml
/// host: node1.example.com
/// port: 10000
/// sasl:
///   mechanism:
///     gssapi:
///       service: hive
/// ```
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(rename = "sasl-connect")]
#[serde(rename_all = "kebab-case")]
pub struct SASLConnectConfig {
    #[serde(flatten)]
    tcp: TCPTransportConfig,
    /// SASL configuration.
    sasl: SASLConfig
}

/// Look up a required parameter.
fn param(
    params: &HashMap<String, String>,
    name: &'static str
) -> Result<String, NegotiationError> {
    params
        .get(name)
        .cloned()
        .ok_or(NegotiationError::MissingParam { name: name })
}

impl SASLMechanismConfig {
    /// Build a `SASLMechanismConfig` from a mechanism name and a
    /// string parameter map.
    ///
    /// The mechanism names are `PLAIN`, `DIGEST-MD5`, and `GSSAPI`.
    /// The parameters used are `username`, `password`, and
    /// `service`, depending on the mechanism.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sasl_channels::config::SASLMechanismConfig;
    /// # use std::collections::HashMap;
    /// #
    /// let mut params = HashMap::new();
    ///
    /// params.insert(String::from("service"), String::from("hive"));
    ///
    /// assert_eq!(
    ///     SASLMechanismConfig::GSSAPI { service: String::from("hive") },
    ///     SASLMechanismConfig::from_params("GSSAPI", &params).unwrap()
    /// );
    /// ```
    pub fn from_params(
        name: &str,
        params: &HashMap<String, String>
    ) -> Result<Self, NegotiationError> {
        match name {
            "PLAIN" => Ok(SASLMechanismConfig::Plain {
                username: param(params, "username")?,
                password: param(params, "password")?
            }),
            "DIGEST-MD5" => Ok(SASLMechanismConfig::DigestMD5 {
                service: param(params, "service")?,
                username: param(params, "username")?,
                password: param(params, "password")?
            }),
            "GSSAPI" => Ok(SASLMechanismConfig::GSSAPI {
                service: param(params, "service")?
            }),
            _ => Err(NegotiationError::UnsupportedMechanism {
                name: name.to_string()
            })
        }
    }

    /// Get the SASL name of the configured mechanism.
    #[inline]
    pub fn name(&self) -> &'static str {
        match self {
            SASLMechanismConfig::Plain { .. } => "PLAIN",
            SASLMechanismConfig::DigestMD5 { .. } => "DIGEST-MD5",
            SASLMechanismConfig::GSSAPI { .. } => "GSSAPI"
        }
    }
}

impl SASLConfig {
    #[inline]
    fn default_max_length() -> u32 {
        DEFAULT_MAX_LENGTH
    }

    /// Create a new `SASLConfig` from its components.
    ///
    /// The arguments of this function correspond to similarly-named
    /// fields in the YAML format.
    ///
    /// # Examples
    ///
    /// ```
    /// # use sasl_channels::config::SASLConfig;
    /// # use sasl_channels::config::SASLMechanismConfig;
    /// #
    /// let yaml = concat!("mechanism:\n",
    ///                    "  plain:\n",
    ///                    "    username: alice\n",
    ///                    "    password: secret\n",
    ///                    "principal: admin\n",
    ///                    "max-length: 65536\n");
    /// let mechanism = SASLMechanismConfig::Plain {
    ///     username: String::from("alice"),
    ///     password: String::from("secret")
    /// };
    ///
    /// assert_eq!(
    ///     SASLConfig::new(mechanism, Some(String::from("admin")), 65536, None),
    ///     serde_yaml::from_str(yaml).unwrap()
    /// );
    /// ```
    #[inline]
    pub fn new(
        mechanism: SASLMechanismConfig,
        principal: Option<String>,
        max_length: u32,
        service_host_qualified: Option<String>
    ) -> Self {
        SASLConfig {
            mechanism: mechanism,
            principal: principal,
            max_length: max_length,
            service_host_qualified: service_host_qualified
        }
    }

    /// Build a `SASLConfig` from a mechanism name, a string
    /// parameter map, and a maximum frame length.
    ///
    /// In addition to the parameters used by
    /// [SASLMechanismConfig::from_params], the optional `principal`
    /// parameter sets the authorization identity.
    pub fn from_params(
        name: &str,
        params: &HashMap<String, String>,
        max_length: u32
    ) -> Result<Self, NegotiationError> {
        let mechanism = SASLMechanismConfig::from_params(name, params)?;
        let principal = params
            .get("principal")
            .filter(|principal| !principal.is_empty())
            .cloned();

        Ok(SASLConfig::new(mechanism, principal, max_length, None))
    }

    /// Get the mechanism configuration.
    #[inline]
    pub fn mechanism(&self) -> &SASLMechanismConfig {
        &self.mechanism
    }

    /// Get the authorization identity override.
    #[inline]
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    /// Get the maximum frame size.
    #[inline]
    pub fn max_length(&self) -> u32 {
        self.max_length
    }

    /// Get the host override for `GSSAPI` target names.
    #[inline]
    pub fn service_host_qualified(&self) -> Option<&str> {
        self.service_host_qualified.as_deref()
    }

    /// Decompose this `SASLConfig` into its components.
    ///
    /// The components in order are:
    ///
    /// - The mechanism configuration ([mechanism](SASLConfig::mechanism))
    /// - The authorization identity override ([principal](SASLConfig::principal))
    /// - The maximum frame size ([max_length](SASLConfig::max_length))
    /// - The `GSSAPI` host override
    ///   ([service_host_qualified](SASLConfig::service_host_qualified))
    #[inline]
    pub fn take(
        self
    ) -> (SASLMechanismConfig, Option<String>, u32, Option<String>) {
        (
            self.mechanism,
            self.principal,
            self.max_length,
            self.service_host_qualified
        )
    }
}

impl TCPTransportConfig {
    /// Create a new `TCPTransportConfig` from its components.
    ///
    /// The arguments of this function correspond to similarly-named
    /// fields in the YAML format.  Timeouts are in milliseconds.
    #[inline]
    pub fn new(
        host: String,
        port: u16,
        connect_timeout: Option<u64>,
        socket_timeout: Option<u64>
    ) -> Self {
        TCPTransportConfig {
            host: host,
            port: port,
            connect_timeout: connect_timeout,
            socket_timeout: socket_timeout
        }
    }

    /// Get the server name or address.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Get the server port.
    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Get the timeout for each connection attempt.
    #[inline]
    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout.map(Duration::from_millis)
    }

    /// Get the socket read and write timeout.
    #[inline]
    pub fn socket_timeout(&self) -> Option<Duration> {
        self.socket_timeout.map(Duration::from_millis)
    }
}

impl SASLConnectConfig {
    /// Create a new `SASLConnectConfig` from its components.
    #[inline]
    pub fn new(
        tcp: TCPTransportConfig,
        sasl: SASLConfig
    ) -> Self {
        SASLConnectConfig {
            tcp: tcp,
            sasl: sasl
        }
    }

    /// Get the TCP configuration.
    #[inline]
    pub fn tcp(&self) -> &TCPTransportConfig {
        &self.tcp
    }

    /// Get the SASL configuration.
    #[inline]
    pub fn sasl(&self) -> &SASLConfig {
        &self.sasl
    }

    /// Decompose this `SASLConnectConfig` into its components.
    #[inline]
    pub fn take(self) -> (TCPTransportConfig, SASLConfig) {
        (self.tcp, self.sasl)
    }
}

impl From<SASLMechanismIntermediate> for SASLMechanismConfig {
    fn from(val: SASLMechanismIntermediate) -> SASLMechanismConfig {
        match val {
            SASLMechanismIntermediate::Plain { plain } => {
                SASLMechanismConfig::Plain {
                    username: plain.username,
                    password: plain.password
                }
            }
            SASLMechanismIntermediate::DigestMD5 { digest_md5 } => {
                SASLMechanismConfig::DigestMD5 {
                    service: digest_md5.service,
                    username: digest_md5.username,
                    password: digest_md5.password
                }
            }
            SASLMechanismIntermediate::GSSAPI { gssapi } => {
                SASLMechanismConfig::GSSAPI {
                    service: gssapi.service
                }
            }
        }
    }
}

impl From<SASLMechanismConfig> for SASLMechanismIntermediate {
    fn from(val: SASLMechanismConfig) -> SASLMechanismIntermediate {
        match val {
            SASLMechanismConfig::Plain { username, password } => {
                SASLMechanismIntermediate::Plain {
                    plain: PasswordIntermediate {
                        username: username,
                        password: password
                    }
                }
            }
            SASLMechanismConfig::DigestMD5 {
                service,
                username,
                password
            } => SASLMechanismIntermediate::DigestMD5 {
                digest_md5: ServicePasswordIntermediate {
                    service: service,
                    username: username,
                    password: password
                }
            },
            SASLMechanismConfig::GSSAPI { service } => {
                SASLMechanismIntermediate::GSSAPI {
                    gssapi: ServiceIntermediate { service: service }
                }
            }
        }
    }
}

impl Debug for SASLMechanismConfig {
    fn fmt(
        &self,
        f: &mut Formatter
    ) -> Result<(), std::fmt::Error> {
        match self {
            SASLMechanismConfig::Plain { username, .. } => f
                .debug_struct("Plain")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            SASLMechanismConfig::DigestMD5 {
                service, username, ..
            } => f
                .debug_struct("DigestMD5")
                .field("service", service)
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            SASLMechanismConfig::GSSAPI { service } => f
                .debug_struct("GSSAPI")
                .field("service", service)
                .finish()
        }
    }
}

#[cfg(test)]
fn params(entries: &[(&str, &str)]) -> HashMap<String, String> {
    entries
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

#[test]
fn test_deserialize_plain_cfg() {
    let yaml = concat!(
        "plain:\n",
        "  username: alice\n",
        "  password: secret\n"
    );
    let expected = SASLMechanismConfig::Plain {
        username: String::from("alice"),
        password: String::from("secret")
    };
    let actual = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual)
}

#[test]
fn test_deserialize_digest_cfg() {
    let yaml = concat!(
        "digest-md5:\n",
        "  service: hive\n",
        "  username: alice\n",
        "  password: secret\n"
    );
    let expected = SASLMechanismConfig::DigestMD5 {
        service: String::from("hive"),
        username: String::from("alice"),
        password: String::from("secret")
    };
    let actual = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual)
}

#[test]
fn test_deserialize_gssapi_cfg() {
    let yaml = concat!("gssapi:\n", "  service: hive\n");
    let expected = SASLMechanismConfig::GSSAPI {
        service: String::from("hive")
    };
    let actual = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual)
}

#[test]
fn test_deserialize_bad_mechanism_cfg() {
    let yaml = concat!("kerberos:\n", "  service: hive\n");
    let actual: Result<SASLMechanismConfig, _> = serde_yaml::from_str(yaml);

    assert!(actual.is_err())
}

#[test]
fn test_deserialize_sasl_cfg_defaults() {
    let yaml = concat!("mechanism:\n", "  gssapi:\n", "    service: hive\n");
    let expected = SASLConfig {
        mechanism: SASLMechanismConfig::GSSAPI {
            service: String::from("hive")
        },
        principal: None,
        max_length: DEFAULT_MAX_LENGTH,
        service_host_qualified: None
    };
    let actual = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual)
}

#[test]
fn test_deserialize_sasl_cfg() {
    let yaml = concat!(
        "mechanism:\n",
        "  gssapi:\n",
        "    service: hive\n",
        "principal: admin\n",
        "max-length: 4096\n",
        "service-host-qualified: node1.example.com\n"
    );
    let expected = SASLConfig {
        mechanism: SASLMechanismConfig::GSSAPI {
            service: String::from("hive")
        },
        principal: Some(String::from("admin")),
        max_length: 4096,
        service_host_qualified: Some(String::from("node1.example.com"))
    };
    let actual = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual)
}

#[test]
fn test_deserialize_tcp_cfg() {
    let yaml = concat!(
        "host: node1.example.com\n",
        "port: 10000\n",
        "connect-timeout: 5000\n"
    );
    let expected = TCPTransportConfig {
        host: String::from("node1.example.com"),
        port: 10000,
        connect_timeout: Some(5000),
        socket_timeout: None
    };
    let actual: TCPTransportConfig = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual);
    assert_eq!(Some(Duration::from_secs(5)), actual.connect_timeout());
    assert_eq!(None, actual.socket_timeout());
}

#[test]
fn test_deserialize_connect_cfg() {
    let yaml = concat!(
        "host: node1.example.com\n",
        "port: 10000\n",
        "socket-timeout: 30000\n",
        "sasl:\n",
        "  mechanism:\n",
        "    digest-md5:\n",
        "      service: hive\n",
        "      username: alice\n",
        "      password: secret\n"
    );
    let expected = SASLConnectConfig {
        tcp: TCPTransportConfig::new(
            String::from("node1.example.com"),
            10000,
            None,
            Some(30000)
        ),
        sasl: SASLConfig::new(
            SASLMechanismConfig::DigestMD5 {
                service: String::from("hive"),
                username: String::from("alice"),
                password: String::from("secret")
            },
            None,
            DEFAULT_MAX_LENGTH,
            None
        )
    };
    let actual = serde_yaml::from_str(yaml).unwrap();

    assert_eq!(expected, actual)
}

#[test]
fn test_serialize_mechanism_cfg() {
    let config = SASLMechanismConfig::GSSAPI {
        service: String::from("hive")
    };
    let yaml = serde_yaml::to_string(&config).unwrap();
    let actual: SASLMechanismConfig = serde_yaml::from_str(&yaml).unwrap();

    assert_eq!(config, actual)
}

#[test]
fn test_from_params() {
    let params = params(&[
        ("username", "alice"),
        ("password", "secret"),
        ("service", "hive"),
        ("principal", "admin")
    ]);
    let config = SASLConfig::from_params("DIGEST-MD5", &params, 4096).unwrap();

    assert_eq!("DIGEST-MD5", config.mechanism().name());
    assert_eq!(Some("admin"), config.principal());
    assert_eq!(4096, config.max_length());
    assert_eq!(None, config.service_host_qualified());
}

#[test]
fn test_from_params_missing() {
    let params = params(&[("username", "alice")]);

    assert!(matches!(
        SASLMechanismConfig::from_params("PLAIN", &params),
        Err(NegotiationError::MissingParam { name: "password" })
    ));
}

#[test]
fn test_from_params_unsupported() {
    let params = params(&[]);

    match SASLMechanismConfig::from_params("CRAM-MD5", &params) {
        Err(NegotiationError::UnsupportedMechanism { name }) => {
            assert_eq!("CRAM-MD5", name)
        }
        _ => panic!("expected unsupported mechanism")
    }
}

#[test]
fn test_debug_redacts_password() {
    let plain = SASLMechanismConfig::Plain {
        username: String::from("alice"),
        password: String::from("secret")
    };
    let digest = SASLMechanismConfig::DigestMD5 {
        service: String::from("hive"),
        username: String::from("alice"),
        password: String::from("secret")
    };
    let config = SASLConfig::new(digest.clone(), None, 4096, None);

    for out in &[
        format!("{:?}", plain),
        format!("{:?}", digest),
        format!("{:?}", config)
    ] {
        assert!(out.contains("alice"));
        assert!(!out.contains("secret"));
    }
}
