use std::fmt;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::mapper::DigestMethod;
use crate::token::{Certificate, PrivateKeyHandle, Token, TokenError};

/// A key picked by the user, together with the token session that backs it.
#[derive(Clone)]
pub struct SigningKey {
    token: Arc<dyn Token>,
    key: Arc<dyn PrivateKeyHandle>,
}

impl SigningKey {
    pub fn new(token: Arc<dyn Token>, key: Arc<dyn PrivateKeyHandle>) -> Self {
        Self { token, key }
    }

    pub fn token_label(&self) -> &str {
        self.token.label()
    }

    pub fn algorithm(&self) -> &str {
        self.key.algorithm()
    }

    pub fn certificate(&self) -> &Certificate {
        self.key.certificate()
    }

    pub fn certificate_chain(&self) -> &[Certificate] {
        self.key.certificate_chain()
    }

    pub fn sign(&self, digest: &[u8], digest_method: DigestMethod) -> Result<Vec<u8>, TokenError> {
        self.key.sign(digest, digest_method)
    }

    pub fn describe(&self) -> KeyDescription {
        KeyDescription {
            token: self.token_label().to_string(),
            algorithm: self.algorithm().to_string(),
            subject: self.certificate().subject.clone(),
            issuer: self.certificate().issuer.clone(),
            serial_number: self.certificate().serial_number.clone(),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("token", &self.token_label())
            .field("algorithm", &self.algorithm())
            .field("subject", &self.certificate().subject)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDescription {
    pub token: String,
    pub algorithm: String,
    pub subject: String,
    pub issuer: String,
    pub serial_number: String,
}

/// The process-wide active signing key.
///
/// Readers take a snapshot `Arc`; writers replace or clear the slot under the
/// write lock. A job that holds a snapshot keeps using that key even if the slot
/// is replaced meanwhile.
#[derive(Default)]
pub struct ActiveKeySlot {
    slot: RwLock<Option<Arc<SigningKey>>>,
}

impl ActiveKeySlot {
    pub fn get(&self) -> Option<Arc<SigningKey>> {
        match self.slot.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Stores `key`, replacing any previous one. Returns the replaced key.
    pub fn set_if_absent_or_replace(&self, key: Arc<SigningKey>) -> Option<Arc<SigningKey>> {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.replace(key)
    }

    pub fn reset(&self) -> Option<Arc<SigningKey>> {
        let mut guard = match self.slot.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.take()
    }

    pub fn is_set(&self) -> bool {
        self.get().is_some()
    }
}
