use std::sync::Arc;

use k256::ecdsa::signature::hazmat::PrehashSigner;
use rand_chacha::ChaCha20Rng;
use rand_chacha::rand_core::SeedableRng;
use rsa::{Pkcs1v15Sign, RsaPrivateKey};
use sha2::{Digest, Sha256, Sha384, Sha512};

use super::{Certificate, PrivateKeyHandle, Token, TokenDriver, TokenError};
use crate::mapper::DigestMethod;

const RSA_KEY_BITS: usize = 2048;
const SOFTWARE_CA: &str = "CN=Autogram Software CA";

/// Token driver backed by keys derived from a seed string.
///
/// The SHA-256 hash of the seed seeds a deterministic CSPRNG for the RSA key
/// and becomes the secp256k1 private key, so the same seed always yields the
/// same token contents.
pub struct SoftwareTokenDriver {
    name: String,
    seed: String,
}

impl SoftwareTokenDriver {
    pub fn from_seed(name: impl Into<String>, seed: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            seed: seed.into(),
        }
    }
}

fn serial_number(seed: &str, algorithm: &str) -> String {
    let hash = Sha256::new()
        .chain_update(seed.as_bytes())
        .chain_update(algorithm.as_bytes())
        .finalize();
    hex::encode(&hash[..8])
}

fn certificate(name: &str, seed: &str, algorithm: &str) -> Vec<Certificate> {
    vec![
        Certificate {
            subject: format!("CN={name}, OU={algorithm}"),
            issuer: SOFTWARE_CA.to_string(),
            serial_number: serial_number(seed, algorithm),
        },
        Certificate {
            subject: SOFTWARE_CA.to_string(),
            issuer: SOFTWARE_CA.to_string(),
            serial_number: serial_number(SOFTWARE_CA, "root"),
        },
    ]
}

impl TokenDriver for SoftwareTokenDriver {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&self) -> Result<Arc<dyn Token>, TokenError> {
        let hash = Sha256::digest(self.seed.as_bytes());

        let mut rng = ChaCha20Rng::from_seed(hash.into());
        let rsa = RsaPrivateKey::new(&mut rng, RSA_KEY_BITS).map_err(|e| {
            TokenError::SignatureFailed {
                reason: format!("generating RSA key from seed: {e}"),
            }
        })?;
        let ecdsa = k256::ecdsa::SigningKey::from_bytes((&hash).into()).map_err(|e| {
            TokenError::SignatureFailed {
                reason: format!("invalid secp256k1 seed: {e}"),
            }
        })?;

        let keys: Vec<Arc<dyn PrivateKeyHandle>> = vec![
            Arc::new(RsaKey {
                key: rsa,
                chain: certificate(&self.name, &self.seed, RsaKey::ALGORITHM),
            }),
            Arc::new(EcdsaKey {
                key: ecdsa,
                chain: certificate(&self.name, &self.seed, EcdsaKey::ALGORITHM),
            }),
        ];

        Ok(Arc::new(SoftwareToken {
            label: self.name.clone(),
            keys,
        }))
    }
}

struct SoftwareToken {
    label: String,
    keys: Vec<Arc<dyn PrivateKeyHandle>>,
}

impl Token for SoftwareToken {
    fn label(&self) -> &str {
        &self.label
    }

    fn list_keys(&self) -> Result<Vec<Arc<dyn PrivateKeyHandle>>, TokenError> {
        Ok(self.keys.clone())
    }
}

/// RSA PKCS#1 v1.5 over a precomputed digest.
struct RsaKey {
    key: RsaPrivateKey,
    chain: Vec<Certificate>,
}

impl RsaKey {
    const ALGORITHM: &'static str = "rsa-pkcs1v15";
}

impl PrivateKeyHandle for RsaKey {
    fn algorithm(&self) -> &str {
        Self::ALGORITHM
    }

    fn certificate(&self) -> &Certificate {
        &self.chain[0]
    }

    fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }

    fn sign(&self, digest: &[u8], digest_method: DigestMethod) -> Result<Vec<u8>, TokenError> {
        let padding = match digest_method {
            DigestMethod::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
            DigestMethod::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
            DigestMethod::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
        };
        self.key
            .sign(padding, digest)
            .map_err(|e| TokenError::SignatureFailed {
                reason: e.to_string(),
            })
    }
}

/// ECDSA secp256k1 over a precomputed digest.
struct EcdsaKey {
    key: k256::ecdsa::SigningKey,
    chain: Vec<Certificate>,
}

impl EcdsaKey {
    const ALGORITHM: &'static str = "ecdsa-secp256k1";
}

impl PrivateKeyHandle for EcdsaKey {
    fn algorithm(&self) -> &str {
        Self::ALGORITHM
    }

    fn certificate(&self) -> &Certificate {
        &self.chain[0]
    }

    fn certificate_chain(&self) -> &[Certificate] {
        &self.chain
    }

    fn sign(&self, digest: &[u8], digest_method: DigestMethod) -> Result<Vec<u8>, TokenError> {
        if digest.len() != digest_method.output_len() {
            return Err(TokenError::SignatureFailed {
                reason: format!(
                    "digest is {} bytes, expected {} for {digest_method:?}",
                    digest.len(),
                    digest_method.output_len()
                ),
            });
        }
        let signature: k256::ecdsa::Signature =
            self.key
                .sign_prehash(digest)
                .map_err(|e| TokenError::SignatureFailed {
                    reason: format!("secp256k1 sign_prehash failed: {e}"),
                })?;
        Ok(signature.to_bytes().to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k256::ecdsa::signature::hazmat::PrehashVerifier;
    use rsa::RsaPublicKey;

    fn open(seed: &str) -> Arc<dyn Token> {
        SoftwareTokenDriver::from_seed("Test Signer", seed).open().unwrap()
    }

    #[test]
    fn token_exposes_rsa_and_ecdsa_keys() {
        let token = open("test-seed");
        let keys = token.list_keys().unwrap();
        let algorithms: Vec<_> = keys.iter().map(|k| k.algorithm().to_string()).collect();
        assert_eq!(algorithms, ["rsa-pkcs1v15", "ecdsa-secp256k1"]);
        assert_eq!(token.label(), "Test Signer");
    }

    #[test]
    fn deterministic_certificates() {
        let a = open("test-seed").list_keys().unwrap();
        let b = open("test-seed").list_keys().unwrap();
        assert_eq!(a[0].certificate(), b[0].certificate());
        assert_eq!(a[1].certificate_chain(), b[1].certificate_chain());
        assert_eq!(a[0].certificate().issuer, SOFTWARE_CA);
        assert_eq!(a[0].certificate_chain().len(), 2);
    }

    #[test]
    fn rsa_signature_verifies_for_each_digest() {
        let token = open("rsa-seed");
        let key = &token.list_keys().unwrap()[0];
        let hash = Sha256::digest("rsa-seed".as_bytes());
        let private = RsaPrivateKey::new(&mut ChaCha20Rng::from_seed(hash.into()), RSA_KEY_BITS)
            .unwrap();
        let public = RsaPublicKey::from(&private);

        let digest = Sha384::digest(b"payload");
        let signature = key.sign(&digest, DigestMethod::Sha384).unwrap();
        assert_eq!(signature.len(), RSA_KEY_BITS / 8);
        public
            .verify(Pkcs1v15Sign::new::<Sha384>(), &digest, &signature)
            .unwrap();
    }

    #[test]
    fn ecdsa_signature_verifies() {
        let token = open("ecdsa-seed");
        let key = &token.list_keys().unwrap()[1];
        let digest = Sha256::digest(b"payload");
        let bytes = key.sign(&digest, DigestMethod::Sha256).unwrap();
        assert_eq!(bytes.len(), 64);

        let hash = Sha256::digest("ecdsa-seed".as_bytes());
        let signing_key = k256::ecdsa::SigningKey::from_bytes((&hash).into()).unwrap();
        let signature = k256::ecdsa::Signature::from_slice(&bytes).unwrap();
        signing_key
            .verifying_key()
            .verify_prehash(&digest, &signature)
            .unwrap();
    }

    #[test]
    fn ecdsa_rejects_digest_of_wrong_length() {
        let token = open("ecdsa-seed");
        let key = &token.list_keys().unwrap()[1];
        let digest = Sha256::digest(b"payload");
        assert!(matches!(
            key.sign(&digest, DigestMethod::Sha512),
            Err(TokenError::SignatureFailed { .. })
        ));
    }
}
