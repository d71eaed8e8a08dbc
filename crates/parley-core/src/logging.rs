//! Redaction wrappers for log output.
//!
//! Session tokens, peer addresses and ciphertexts go through these types
//! before they reach a `tracing` field.

use std::fmt;

/// A wrapper that redacts sensitive data when displayed.
pub struct Redacted<T>(pub T);

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[REDACTED]")
    }
}

/// Redact a peer address, keeping the first 5 and last 15 characters.
pub struct RedactedAddress<'a>(pub &'a str);

impl fmt::Display for RedactedAddress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.is_empty() {
            write!(f, "[PENDING]")
        } else if s.len() > 24 && s.is_ascii() {
            write!(f, "{}...{}", &s[..5], &s[s.len() - 15..])
        } else {
            write!(f, "{}", s)
        }
    }
}

impl fmt::Debug for RedactedAddress<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a session token, keeping the first and last 5 characters.
pub struct RedactedToken<'a>(pub &'a str);

impl fmt::Display for RedactedToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.0;
        if s.is_empty() {
            write!(f, "[PENDING]")
        } else if s.len() > 16 && s.is_ascii() {
            write!(f, "{}...{}", &s[..5], &s[s.len() - 5..])
        } else {
            write!(f, "[REDACTED TOKEN]")
        }
    }
}

impl fmt::Debug for RedactedToken<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Redact a byte slice, showing only length.
pub struct RedactedBytes<'a>(pub &'a [u8]);

impl fmt::Display for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} bytes]", self.0.len())
    }
}

impl fmt::Debug for RedactedBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
