//! Tor v3 onion address.
//!
//! Format: 56 lowercase base32 characters (RFC 4648 alphabet `a-z2-7`)
//! followed by `.onion`. Only the shape is checked here; Tor itself rejects
//! addresses with a bad checksum.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

const HOSTNAME_LEN: usize = 56;
const SUFFIX: &str = ".onion";

/// A Tor v3 onion address.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OnionAddress(String);

impl OnionAddress {
    /// Parse and validate an onion address string.
    pub fn from_string(s: impl Into<String>) -> Result<Self> {
        let s = s.into().trim().to_lowercase();

        let hostname = s
            .strip_suffix(SUFFIX)
            .ok_or_else(|| Error::Tor("onion address must end with .onion".into()))?;
        if hostname.len() != HOSTNAME_LEN {
            return Err(Error::Tor("v3 onion address must be 56 characters".into()));
        }
        if !hostname.bytes().all(|b| matches!(b, b'a'..=b'z' | b'2'..=b'7')) {
            return Err(Error::Tor("invalid base32 in onion address".into()));
        }

        Ok(Self(s))
    }

    /// Build from the ServiceID returned by ADD_ONION.
    pub fn from_service_id(service_id: &str) -> Result<Self> {
        Self::from_string(format!("{}{}", service_id, SUFFIX))
    }

    /// Full address including `.onion`.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Address without `.onion`.
    pub fn hostname(&self) -> &str {
        &self.0[..self.0.len() - SUFFIX.len()]
    }
}

impl fmt::Display for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for OnionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OnionAddress({})", crate::logging::RedactedAddress(&self.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "pg6mmjiyjmcrsslvykfwnntlaru7p5svn6y2ymmju6nubxndf4pscryd";

    #[test]
    fn test_valid_address() {
        let addr = OnionAddress::from_service_id(ID).expect("valid");
        assert_eq!(addr.hostname(), ID);
        assert_eq!(addr.as_str(), format!("{}.onion", ID));

        let upper = OnionAddress::from_string(format!(" {}.ONION\n", ID.to_uppercase())).expect("valid");
        assert_eq!(upper, addr);
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(OnionAddress::from_string(ID).is_err());
        assert!(OnionAddress::from_string("short.onion").is_err());
        assert!(OnionAddress::from_string(format!("{}1.onion", &ID[1..])).is_err());
        assert!(OnionAddress::from_string("127.0.0.1:8080").is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let addr = OnionAddress::from_service_id(ID).expect("valid");
        assert!(!format!("{:?}", addr).contains(ID));
    }
}
