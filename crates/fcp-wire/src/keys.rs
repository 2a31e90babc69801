//! String-level parsing of key address forms.
//!
//! The engine treats key semantics as opaque; the only interpretation it
//! performs is recognising which of the four address forms a URI uses so
//! callers can branch on it.

use std::fmt;

use crate::errors::WireError;

/// Scheme prefix some callers keep on freenet URIs.
const SCHEME_PREFIX: &str = "freenet:";

/// The four key address forms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// `CHK@` content-hash key.
    ContentHash,
    /// `SSK@` signed-subspace key.
    Signed,
    /// `USK@` updatable-subspace key.
    Updatable,
    /// `KSK@` keyword key.
    Keyword,
}

impl KeyKind {
    /// Classifies a key URI by its address form.
    ///
    /// An optional `freenet:` scheme prefix is accepted and ignored.
    ///
    /// # Errors
    ///
    /// Returns [`WireError::UnknownKeyKind`] when the URI starts with none
    /// of the known forms.
    pub fn parse(uri: &str) -> Result<Self, WireError> {
        let bare = uri.strip_prefix(SCHEME_PREFIX).unwrap_or(uri);
        if bare.starts_with("CHK@") {
            Ok(Self::ContentHash)
        } else if bare.starts_with("SSK@") {
            Ok(Self::Signed)
        } else if bare.starts_with("USK@") {
            Ok(Self::Updatable)
        } else if bare.starts_with("KSK@") {
            Ok(Self::Keyword)
        } else {
            Err(WireError::unknown_key_kind(uri))
        }
    }

    /// The `XXX@` prefix naming this form.
    #[must_use]
    pub const fn prefix(&self) -> &'static str {
        match self {
            Self::ContentHash => "CHK@",
            Self::Signed => "SSK@",
            Self::Updatable => "USK@",
            Self::Keyword => "KSK@",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

#[cfg(test)]
mod tests {
    #![expect(clippy::expect_used, reason = "tests use expect for clarity")]

    use super::*;

    use rstest::rstest;

    #[rstest]
    #[case("CHK@abcdef", KeyKind::ContentHash)]
    #[case("SSK@pub/site", KeyKind::Signed)]
    #[case("USK@pub/site/4", KeyKind::Updatable)]
    #[case("KSK@hello.txt", KeyKind::Keyword)]
    #[case("freenet:CHK@abcdef", KeyKind::ContentHash)]
    fn classifies_known_forms(#[case] uri: &str, #[case] expected: KeyKind) {
        assert_eq!(KeyKind::parse(uri).ok(), Some(expected));
    }

    #[rstest]
    #[case("http://example.invalid/")]
    #[case("chk@lowercase")]
    #[case("")]
    fn rejects_unknown_forms(#[case] uri: &str) {
        let error = KeyKind::parse(uri).expect_err("should reject");
        assert!(matches!(error, WireError::UnknownKeyKind { .. }));
    }
}
