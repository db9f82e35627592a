//! Core value types shared across the entity model and task engine.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{Error, Result};

/// TCP or UDP, as carried on a port's exposed/external specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// TCP
    Tcp,
    /// UDP
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

impl std::str::FromStr for Protocol {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "tcp" => Ok(Self::Tcp),
            "udp" => Ok(Self::Udp),
            other => Err(Error::configuration(format!(
                "unknown port protocol '{other}' (expected tcp or udp)"
            ))),
        }
    }
}

/// A `<number>/<proto>` pair, e.g. `80/tcp`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortNumber {
    /// Port number.
    pub number: u16,
    /// Protocol.
    pub protocol: Protocol,
}

impl PortNumber {
    /// Parse a `<number>/<proto>` string, defaulting to `tcp` if no
    /// protocol suffix is present.
    pub fn parse(s: &str) -> Result<Self> {
        let (num_str, proto_str) = match s.split_once('/') {
            Some((n, p)) => (n, p),
            None => (s, "tcp"),
        };
        let number: u16 = num_str
            .parse()
            .map_err(|_| Error::configuration(format!("invalid port number '{num_str}'")))?;
        let protocol: Protocol = proto_str.parse()?;
        Ok(Self { number, protocol })
    }
}

impl fmt::Display for PortNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.number, self.protocol)
    }
}

/// A named port on a container: the port as seen inside the container
/// (`exposed`) and the host-side binding (`external`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortSpec {
    /// Port inside the container.
    pub exposed: PortNumber,
    /// Host interface to bind (defaults to `0.0.0.0`) and host port.
    pub external: (String, PortNumber),
}

impl PortSpec {
    /// Validate invariant 4: `protocol(exposed) == protocol(external)`.
    #[must_use]
    pub fn protocols_agree(&self) -> bool {
        self.exposed.protocol == self.external.1.protocol
    }
}

/// Restart policy as recorded on a Container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
    /// One of `no`, `always`, `on-failure`.
    pub name: String,
    /// Maximum retry count (only meaningful for `on-failure`).
    pub max_retries: u32,
}

impl RestartPolicy {
    /// The default policy: never restart.
    #[must_use]
    pub fn none() -> Self {
        Self {
            name: "no".to_string(),
            max_retries: 0,
        }
    }

    /// Valid policy names.
    pub const VALID_NAMES: [&'static str; 3] = ["no", "always", "on-failure"];

    /// Whether `name` is one of the three valid policy names.
    #[must_use]
    pub fn is_valid_name(name: &str) -> bool {
        Self::VALID_NAMES.contains(&name)
    }
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.max_retries > 0 {
            write!(f, "{}:{}", self.name, self.max_retries)
        } else {
            write!(f, "{}", self.name)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_number_parse_default_tcp() {
        let p = PortNumber::parse("80").unwrap();
        assert_eq!(p.number, 80);
        assert_eq!(p.protocol, Protocol::Tcp);
    }

    #[test]
    fn test_port_number_parse_udp() {
        let p = PortNumber::parse("53/udp").unwrap();
        assert_eq!(p.number, 53);
        assert_eq!(p.protocol, Protocol::Udp);
    }

    #[test]
    fn test_port_number_parse_invalid() {
        assert!(PortNumber::parse("notaport").is_err());
        assert!(PortNumber::parse("80/sctp").is_err());
    }

    #[test]
    fn test_restart_policy_display() {
        assert_eq!(RestartPolicy::none().to_string(), "no");
        assert_eq!(
            RestartPolicy {
                name: "on-failure".to_string(),
                max_retries: 3
            }
            .to_string(),
            "on-failure:3"
        );
    }

    #[test]
    fn test_restart_policy_valid_names() {
        assert!(RestartPolicy::is_valid_name("no"));
        assert!(RestartPolicy::is_valid_name("always"));
        assert!(RestartPolicy::is_valid_name("on-failure"));
        assert!(!RestartPolicy::is_valid_name("bogus"));
    }

    #[test]
    fn test_port_spec_protocol_agreement() {
        let agree = PortSpec {
            exposed: PortNumber::parse("80/tcp").unwrap(),
            external: ("0.0.0.0".to_string(), PortNumber::parse("8080/tcp").unwrap()),
        };
        assert!(agree.protocols_agree());

        let disagree = PortSpec {
            exposed: PortNumber::parse("80/tcp").unwrap(),
            external: ("0.0.0.0".to_string(), PortNumber::parse("8080/udp").unwrap()),
        };
        assert!(!disagree.protocols_agree());
    }
}
