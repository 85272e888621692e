//! Token driver collaborator interfaces.
//!
//! A [`TokenDriver`] opens a [`Token`] (smart card, PKCS#11 module, software
//! keystore); a token lists [`PrivateKeyHandle`]s; a handle signs digests. The
//! traits are sync: driver calls may block on hardware, so callers run them
//! through `spawn_blocking`.

mod software;

use std::sync::Arc;

use serde::Serialize;

use crate::mapper::DigestMethod;

pub use software::SoftwareTokenDriver;

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("Token I/O failure: {0}")]
    Io(#[from] std::io::Error),
    #[error("Token {token} holds no signing keys")]
    NoKeys { token: String },
    #[error("PIN entry was canceled")]
    Canceled,
    #[error("Key {key} cannot sign with {digest:?}")]
    UnsupportedDigest { key: String, digest: DigestMethod },
    #[error("Signature computation failed: {reason}")]
    SignatureFailed { reason: String },
}

/// Minimal certificate description carried alongside a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
}

pub trait TokenDriver: Send + Sync {
    /// Human readable name shown while picking a driver.
    fn name(&self) -> &str;

    /// Opens the token. The returned handle keeps the token session alive until dropped.
    fn open(&self) -> Result<Arc<dyn Token>, TokenError>;
}

pub trait Token: Send + Sync {
    fn label(&self) -> &str;

    fn list_keys(&self) -> Result<Vec<Arc<dyn PrivateKeyHandle>>, TokenError>;
}

pub trait PrivateKeyHandle: Send + Sync {
    /// Algorithm identifier string (e.g. "rsa-pkcs1v15").
    fn algorithm(&self) -> &str;

    fn certificate(&self) -> &Certificate;

    /// Chain from the signing certificate up to (and including) its root.
    fn certificate_chain(&self) -> &[Certificate];

    /// Signs an already computed digest. Returns raw signature bytes.
    fn sign(&self, digest: &[u8], digest_method: DigestMethod) -> Result<Vec<u8>, TokenError>;
}
