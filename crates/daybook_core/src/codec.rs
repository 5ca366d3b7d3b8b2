//! Reversible payload obfuscation.
//!
//! # Responsibility
//! - Turn JSON text into an opaque token and back.
//! - Detect the retired one-way hash format written by early app builds.
//!
//! # Invariants
//! - `decode(&encode(x))` yields `x` for every UTF-8 string.
//! - Only a legacy hash makes `decode` fail; everything else degrades to
//!   a passthrough.
//! - This is obfuscation, not encryption. Persisted data depends on the
//!   exact transform, so it must not change.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use log::warn;
use once_cell::sync::Lazy;
use regex::Regex;
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::logging::payload_preview;

static LEGACY_HASH_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[a-f0-9]{64}$").expect("valid legacy hash regex"));

/// Raised when a payload is a digest from the retired hashing codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    LegacyFormat,
}

impl Display for CodecError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LegacyFormat => write!(
                f,
                "payload is a legacy one-way hash and cannot be recovered"
            ),
        }
    }
}

impl Error for CodecError {}

/// Which decode path produced the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadFormat {
    /// Token produced by [`encode`].
    Encoded,
    /// JSON written before encoding was enabled.
    Plain,
    /// Neither; text is returned unchanged.
    Unrecognized,
}

/// Result of a successful [`decode`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub text: String,
    pub format: PayloadFormat,
}

/// Encodes `plaintext` as a base64 token over its UTF-8 bytes.
pub fn encode(plaintext: &str) -> String {
    BASE64.encode(plaintext.as_bytes())
}

/// Returns whether `token` has the shape of a legacy 64-hex-digit digest.
pub fn is_legacy_hash(token: &str) -> bool {
    LEGACY_HASH_RE.is_match(token)
}

/// Decodes `token` in strict order: encoded, plain JSON, passthrough.
///
/// # Errors
/// - [`CodecError::LegacyFormat`] when `token` is a legacy hash. Callers
///   must treat this as unrecoverable rather than as ordinary corruption.
pub fn decode(token: &str) -> Result<Decoded, CodecError> {
    if is_legacy_hash(token) {
        return Err(CodecError::LegacyFormat);
    }

    if let Some(text) = decode_token(token) {
        return Ok(Decoded {
            text,
            format: PayloadFormat::Encoded,
        });
    }

    if serde_json::from_str::<serde_json::Value>(token).is_ok() {
        return Ok(Decoded {
            text: token.to_string(),
            format: PayloadFormat::Plain,
        });
    }

    warn!(
        "event=codec_decode module=codec status=fallback reason=unrecognized payload={}",
        payload_preview(token)
    );
    Ok(Decoded {
        text: token.to_string(),
        format: PayloadFormat::Unrecognized,
    })
}

fn decode_token(token: &str) -> Option<String> {
    let bytes = BASE64.decode(token.trim()).ok()?;
    String::from_utf8(bytes).ok()
}
