//! Minisign-compatible detached signature verification.
//!
//! Discovery lists are published alongside a detached signature in the
//! minisign text format. Verification consults only the base64 signature
//! line (line index 1): the untrusted comment, trusted comment and global
//! signature lines are ignored and not cryptographically bound into the
//! result. Anyone hardening this module should start there.
//!
//! The trusted key set is an immutable configuration value injected at
//! construction time.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use ed25519_dalek::{Signature, VerifyingKey};
use thiserror::Error;

/// Algorithm tag of legacy (non-prehashed) minisign signatures.
const ALGORITHM_TAG: &[u8; 2] = b"Ed";
const KEY_ID_LENGTH: usize = 8;
const ED_SIGNATURE_LENGTH: usize = 64;
const ED_PUBLIC_KEY_LENGTH: usize = 32;

/// `"Ed" || key id || signature`
const SIGNATURE_BLOB_LENGTH: usize = ALGORITHM_TAG.len() + KEY_ID_LENGTH + ED_SIGNATURE_LENGTH;
/// `"Ed" || key id || raw public key`
const PUBLIC_KEY_BLOB_LENGTH: usize = ALGORITHM_TAG.len() + KEY_ID_LENGTH + ED_PUBLIC_KEY_LENGTH;

/// Error type for signature verification.
#[derive(Debug, Error)]
pub enum VerifyError {
    /// The signature text is structurally too short to contain a signature.
    #[error("signature text has fewer than two lines")]
    MalformedInput,

    /// The signature or public key blob has the wrong shape, an unsupported
    /// algorithm, or names a key id that is not trusted.
    #[error("invalid signature format: {reason}")]
    InvalidFormat { reason: String },
}

impl VerifyError {
    fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            reason: reason.into(),
        }
    }
}

/// A trusted minisign public key.
///
/// Parsed from the base64 form `"Ed" || key_id(8) || raw_key(32)`. The raw
/// key is validated eagerly so a bad trust root fails at configuration time
/// rather than during a refresh.
#[derive(Debug, Clone)]
pub struct TrustedPublicKey {
    key_id: [u8; KEY_ID_LENGTH],
    key: VerifyingKey,
}

impl TrustedPublicKey {
    pub fn from_base64(encoded: &str) -> Result<Self, VerifyError> {
        let blob = BASE64
            .decode(encoded.trim())
            .map_err(|err| VerifyError::invalid(format!("public key is not valid base64: {err}")))?;
        if blob.len() != PUBLIC_KEY_BLOB_LENGTH {
            return Err(VerifyError::invalid(format!(
                "public key blob is {} bytes, expected {PUBLIC_KEY_BLOB_LENGTH}",
                blob.len()
            )));
        }
        if &blob[..ALGORITHM_TAG.len()] != ALGORITHM_TAG {
            return Err(VerifyError::invalid(
                "unsupported public key algorithm, only 'Ed' is supported",
            ));
        }

        let mut key_id = [0u8; KEY_ID_LENGTH];
        key_id.copy_from_slice(&blob[ALGORITHM_TAG.len()..ALGORITHM_TAG.len() + KEY_ID_LENGTH]);

        let mut raw_key = [0u8; ED_PUBLIC_KEY_LENGTH];
        raw_key.copy_from_slice(&blob[ALGORITHM_TAG.len() + KEY_ID_LENGTH..]);
        let key = VerifyingKey::from_bytes(&raw_key)
            .map_err(|err| VerifyError::invalid(format!("invalid Ed25519 public key: {err}")))?;

        Ok(Self { key_id, key })
    }

    pub fn key_id(&self) -> &[u8; KEY_ID_LENGTH] {
        &self.key_id
    }
}

/// Verifies detached minisign signatures against a fixed set of trusted keys.
///
/// Pure and deterministic: no I/O, no shared state beyond the immutable key
/// set.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    trusted_keys: Vec<TrustedPublicKey>,
}

impl SignatureVerifier {
    pub fn new(trusted_keys: Vec<TrustedPublicKey>) -> Self {
        Self { trusted_keys }
    }

    /// Parse and trust each base64-encoded public key.
    pub fn from_encoded_keys<I, S>(encoded_keys: I) -> Result<Self, VerifyError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let trusted_keys = encoded_keys
            .into_iter()
            .map(|encoded| TrustedPublicKey::from_base64(encoded.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(trusted_keys))
    }

    /// Verify `signature_text` (minisign text format) over `message`.
    ///
    /// Returns `Ok(true)` when the signature verifies under a trusted key
    /// whose id matches, `Ok(false)` when every matching key was tried and
    /// none verified. Fails with [`VerifyError::MalformedInput`] when the
    /// text has fewer than two lines, and [`VerifyError::InvalidFormat`]
    /// when the decoded signature line has the wrong length or algorithm,
    /// or its key id matches no trusted key.
    pub fn verify(&self, message: &[u8], signature_text: &str) -> Result<bool, VerifyError> {
        let signature_line = signature_text
            .lines()
            .nth(1)
            .ok_or(VerifyError::MalformedInput)?;

        let blob = BASE64.decode(signature_line.trim()).map_err(|err| {
            VerifyError::invalid(format!("signature line is not valid base64: {err}"))
        })?;
        if blob.len() != SIGNATURE_BLOB_LENGTH {
            return Err(VerifyError::invalid(format!(
                "signature blob is {} bytes, expected {SIGNATURE_BLOB_LENGTH}",
                blob.len()
            )));
        }
        if &blob[..ALGORITHM_TAG.len()] != ALGORITHM_TAG {
            return Err(VerifyError::invalid(
                "unsupported signature algorithm, only 'Ed' is supported",
            ));
        }

        let key_id = &blob[ALGORITHM_TAG.len()..ALGORITHM_TAG.len() + KEY_ID_LENGTH];
        let signature_bytes = &blob[ALGORITHM_TAG.len() + KEY_ID_LENGTH..];
        let signature = Signature::from_slice(signature_bytes)
            .map_err(|err| VerifyError::invalid(format!("invalid Ed25519 signature: {err}")))?;

        let matching: Vec<&TrustedPublicKey> = self
            .trusted_keys
            .iter()
            .filter(|trusted| trusted.key_id.as_slice() == key_id)
            .collect();
        if matching.is_empty() {
            return Err(VerifyError::invalid(
                "signature does not match any known public key",
            ));
        }

        for trusted in matching {
            if trusted.key.verify_strict(message, &signature).is_ok() {
                return Ok(true);
            }
        }
        tracing::error!("signature validation failed");
        Ok(false)
    }
}
