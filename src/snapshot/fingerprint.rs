//! Cache key derivation.
//!
//! A [`Fingerprint`] is the SHA-256 of the request URL with its trailing
//! `.pdf` extension (and any query string after it) removed, rendered as
//! lowercase hex. It names the artifact on disk and keys the job registry.

use std::borrow::Cow;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use sha2::{Digest, Sha256};

use super::types::RequestIdentity;

const FINGERPRINT_LEN: usize = 64;

static PDF_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\.pdf(\?.*)?$").expect("pdf suffix pattern compiles"));

/// Fixed-length cache key for one logical document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Fingerprint an absolute request URL.
    pub fn of_url(url: &str) -> Self {
        let normalized = strip_pdf_suffix(url);
        let mut hasher = Sha256::new();
        hasher.update(normalized.as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    /// Recognize a fingerprint previously rendered with [`Fingerprint::as_str`].
    pub fn from_hex(value: &str) -> Option<Self> {
        let valid = value.len() == FINGERPRINT_LEN
            && value
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(value.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Artifact file name, `<fingerprint>.pdf`.
    pub fn file_name(&self) -> String {
        format!("{}.pdf", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fingerprint the identity of an incoming request.
pub fn fingerprint(identity: &RequestIdentity) -> Fingerprint {
    Fingerprint::of_url(&identity.url)
}

/// Remove a trailing `.pdf` together with anything after it.
///
/// Only a `.pdf` at the very end of the URL, optionally followed by a query
/// string, is stripped. Every other URL is returned unchanged.
pub fn strip_pdf_suffix(url: &str) -> Cow<'_, str> {
    PDF_SUFFIX.replace(url, "")
}

/// URL handed to the rendering worker: the extension goes, the query stays.
pub fn worker_url(url: &str) -> String {
    PDF_SUFFIX.replace(url, "$1").into_owned()
}
