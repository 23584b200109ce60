//! Hub endpoint description and connection URL derivation.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

use crate::constants::{HTTP_DEFAULT_PORT, HTTPS_DEFAULT_PORT};

/// Errors produced while interpreting endpoint configuration.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EndpointError {
    #[error("invalid port: {0:?}")]
    InvalidPort(String),

    #[error("missing host")]
    MissingHost,
}

/// TCP port of a hub endpoint.
///
/// Configuration files carry the port either as a JSON string (`"5000"`)
/// or as a number (`5000`); both deserialize into the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Port(pub u16);

impl FromStr for Port {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u16>()
            .map(Port)
            .map_err(|_| EndpointError::InvalidPort(s.to_string()))
    }
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Port {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => u16::try_from(n)
                .map(Port)
                .map_err(|_| serde::de::Error::custom(EndpointError::InvalidPort(n.to_string()))),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Location of a remote hub.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    pub port: Port,
    /// Hub path below the host, e.g. `chathub`.
    #[serde(rename = "hub", default)]
    pub hub_path: String,
    #[serde(rename = "secure", default)]
    pub use_secure_transport: bool,
}

impl Endpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        hub_path: impl Into<String>,
        use_secure_transport: bool,
    ) -> Self {
        Self {
            host: host.into(),
            port: Port(port),
            hub_path: hub_path.into(),
            use_secure_transport,
        }
    }

    /// Checks the fields a connection URL cannot be built without.
    pub fn validate(&self) -> Result<(), EndpointError> {
        if self.host.trim().is_empty() {
            return Err(EndpointError::MissingHost);
        }
        Ok(())
    }

    /// URL scheme derived from the transport security flag.
    pub fn scheme(&self) -> &'static str {
        if self.use_secure_transport {
            "https"
        } else {
            "http"
        }
    }

    /// Standard port of [`scheme`](Self::scheme).
    pub fn default_port(&self) -> u16 {
        if self.use_secure_transport {
            HTTPS_DEFAULT_PORT
        } else {
            HTTP_DEFAULT_PORT
        }
    }

    /// Builds the connection URL.
    ///
    /// The `:port` suffix is omitted only when the port is the scheme's
    /// standard port (80 for `http`, 443 for `https`).
    pub fn connection_url(&self) -> String {
        let port = if self.port.0 == self.default_port() {
            String::new()
        } else {
            format!(":{}", self.port)
        };
        let hub = self.hub_path.trim_start_matches('/');
        format!("{}://{}{}/{}", self.scheme(), self.host, port, hub)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.connection_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insecure_default_port_is_omitted() {
        let ep = Endpoint::new("example.com", 80, "chathub", false);
        assert_eq!(ep.connection_url(), "http://example.com/chathub");
    }

    #[test]
    fn insecure_custom_port_is_kept() {
        let ep = Endpoint::new("example.com", 8080, "chathub", false);
        assert_eq!(ep.connection_url(), "http://example.com:8080/chathub");
    }

    #[test]
    fn secure_default_port_is_omitted() {
        let ep = Endpoint::new("example.com", 443, "chathub", true);
        assert_eq!(ep.connection_url(), "https://example.com/chathub");
    }

    #[test]
    fn default_port_of_other_scheme_is_kept() {
        let secure_80 = Endpoint::new("example.com", 80, "hub", true);
        assert_eq!(secure_80.connection_url(), "https://example.com:80/hub");

        let plain_443 = Endpoint::new("example.com", 443, "hub", false);
        assert_eq!(plain_443.connection_url(), "http://example.com:443/hub");
    }

    #[test]
    fn leading_slash_in_hub_path_is_trimmed() {
        let ep = Endpoint::new("localhost", 5000, "/hubs/chat", false);
        assert_eq!(ep.connection_url(), "http://localhost:5000/hubs/chat");
    }

    #[test]
    fn port_deserializes_from_string_and_number() {
        let from_str: Endpoint =
            serde_json::from_str(r#"{"host":"h","port":"80","hub":"x","secure":false}"#).unwrap();
        let from_num: Endpoint =
            serde_json::from_str(r#"{"host":"h","port":80,"hub":"x","secure":false}"#).unwrap();
        assert_eq!(from_str, from_num);
        assert_eq!(from_str.connection_url(), "http://h/x");
    }

    #[test]
    fn invalid_port_is_rejected() {
        let err = serde_json::from_str::<Endpoint>(r#"{"host":"h","port":"http","hub":"x"}"#);
        assert!(err.is_err());

        let err = serde_json::from_str::<Endpoint>(r#"{"host":"h","port":70000,"hub":"x"}"#);
        assert!(err.is_err());

        assert_eq!(
            "abc".parse::<Port>(),
            Err(EndpointError::InvalidPort("abc".into()))
        );
    }

    #[test]
    fn empty_host_fails_validation() {
        let ep = Endpoint::new("  ", 80, "hub", false);
        assert_eq!(ep.validate(), Err(EndpointError::MissingHost));
        assert!(Endpoint::new("h", 80, "hub", false).validate().is_ok());
    }
}
