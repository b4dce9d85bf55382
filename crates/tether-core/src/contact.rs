//! Contact addresses used to invite companions.
//!
//! A companion is identified by the email address the student typed until
//! they sign in for the first time. Addresses are normalized (trimmed,
//! lowercased) so that `Mum@Example.com ` and `mum@example.com` name the same
//! contact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum length of a contact address, per RFC 5321.
pub const MAX_CONTACT_LEN: usize = 254;

/// Maximum length of the local part of an address.
const MAX_LOCAL_LEN: usize = 64;

/// A validated, normalized contact address.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContactAddress(String);

impl ContactAddress {
    /// Validate and normalize a contact address.
    ///
    /// # Errors
    ///
    /// Returns a `ContactError` describing the first problem found.
    pub fn parse(raw: &str) -> Result<Self, ContactError> {
        let normalized = raw.trim().to_lowercase();

        if normalized.is_empty() {
            return Err(ContactError::Empty);
        }
        if normalized.len() > MAX_CONTACT_LEN {
            return Err(ContactError::TooLong(normalized.len()));
        }
        if normalized
            .chars()
            .any(|c| c.is_whitespace() || c.is_control())
        {
            return Err(ContactError::IllegalCharacter);
        }

        let (local, domain) = normalized
            .split_once('@')
            .ok_or(ContactError::MissingAt)?;

        if local.is_empty() || local.len() > MAX_LOCAL_LEN || domain.contains('@') {
            return Err(ContactError::InvalidLocalPart);
        }
        if local.starts_with('.') || local.ends_with('.') || local.contains("..") {
            return Err(ContactError::InvalidLocalPart);
        }

        let labels: Vec<&str> = domain.split('.').collect();
        if labels.len() < 2
            || labels.iter().any(|label| {
                label.is_empty()
                    || label.starts_with('-')
                    || label.ends_with('-')
                    || !label
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '-')
            })
        {
            return Err(ContactError::InvalidDomain);
        }

        Ok(Self(normalized))
    }

    /// Return the normalized address.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ContactAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContactAddress({})", self.0)
    }
}

impl fmt::Display for ContactAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContactAddress {
    type Err = ContactError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ContactAddress {
    type Error = ContactError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContactAddress> for String {
    fn from(contact: ContactAddress) -> Self {
        contact.0
    }
}

impl AsRef<[u8]> for ContactAddress {
    fn as_ref(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

/// Reasons a contact address is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactError {
    /// Nothing but whitespace was supplied.
    #[error("contact address is empty")]
    Empty,

    /// The address exceeds the maximum length.
    #[error("contact address is too long ({0} bytes)")]
    TooLong(usize),

    /// The address contains whitespace or control characters.
    #[error("contact address contains an illegal character")]
    IllegalCharacter,

    /// There is no `@` separator.
    #[error("contact address is missing '@'")]
    MissingAt,

    /// The part before `@` is malformed.
    #[error("contact address has an invalid local part")]
    InvalidLocalPart,

    /// The part after `@` is not a dotted host name.
    #[error("contact address has an invalid domain")]
    InvalidDomain,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_case_and_whitespace() {
        let contact = ContactAddress::parse("  Mum@Example.COM ").unwrap();
        assert_eq!(contact.as_str(), "mum@example.com");
    }

    #[test]
    fn accepts_plus_and_subdomains() {
        assert!(ContactAddress::parse("dad+awy@mail.example.co.uk").is_ok());
    }

    #[test]
    fn rejects_malformed_addresses() {
        assert_eq!(ContactAddress::parse("   "), Err(ContactError::Empty));
        assert_eq!(
            ContactAddress::parse("no-at-sign"),
            Err(ContactError::MissingAt)
        );
        assert_eq!(
            ContactAddress::parse("@example.com"),
            Err(ContactError::InvalidLocalPart)
        );
        assert_eq!(
            ContactAddress::parse("a@@example.com"),
            Err(ContactError::InvalidLocalPart)
        );
        assert_eq!(
            ContactAddress::parse("a@localhost"),
            Err(ContactError::InvalidDomain)
        );
        assert_eq!(
            ContactAddress::parse("a@exa mple.com"),
            Err(ContactError::IllegalCharacter)
        );
        assert_eq!(
            ContactAddress::parse("a@-bad.com"),
            Err(ContactError::InvalidDomain)
        );
    }

    #[test]
    fn rejects_overlong_address() {
        let raw = format!("a@{}.com", "x".repeat(260));
        assert!(matches!(
            ContactAddress::parse(&raw),
            Err(ContactError::TooLong(_))
        ));
    }

    #[test]
    fn serde_validates() {
        let ok: ContactAddress = serde_json::from_str("\"C@Example.com\"").unwrap();
        assert_eq!(ok.as_str(), "c@example.com");
        let bad: Result<ContactAddress, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
