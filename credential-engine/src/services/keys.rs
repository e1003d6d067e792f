//! Signing key ownership and JWKS publication.
//!
//! The keypair is materialised at most once per `KeyManager`. Every caller,
//! including concurrent first callers, observes the same key.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use jsonwebtoken::{DecodingKey, EncodingKey};
use once_cell::sync::OnceCell;
use rsa::{
    pkcs1::{DecodeRsaPrivateKey, EncodeRsaPrivateKey},
    pkcs8::DecodePrivateKey,
    traits::PublicKeyParts,
    RsaPrivateKey,
};
use serde::Serialize;

use super::error::{EngineError, EngineResult};

pub const DEFAULT_KEY_ID: &str = "auth-key";
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Where the signing key comes from.
#[derive(Clone)]
pub enum KeySource {
    /// Fresh RSA keypair generated in process
    Generate { bits: usize },
    /// PKCS#8 or PKCS#1 PEM
    Pem(String),
}

impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            KeySource::Generate { bits } => f.debug_struct("Generate").field("bits", bits).finish(),
            KeySource::Pem(_) => f.write_str("Pem(..)"),
        }
    }
}

/// Public half of the signing key in JWK form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Jwk {
    pub kty: String,
    pub kid: String,
    pub n: String,
    pub e: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JwkSet {
    pub keys: Vec<Jwk>,
}

struct KeyMaterial {
    encoding: EncodingKey,
    decoding: DecodingKey,
    jwk: Jwk,
}

pub struct KeyManager {
    key_id: String,
    source: KeySource,
    material: OnceCell<KeyMaterial>,
}

impl KeyManager {
    pub fn new(key_id: impl Into<String>, source: KeySource) -> Self {
        Self {
            key_id: key_id.into(),
            source,
            material: OnceCell::new(),
        }
    }

    pub fn generate(key_id: impl Into<String>, bits: usize) -> Self {
        Self::new(key_id, KeySource::Generate { bits })
    }

    pub fn from_pem(key_id: impl Into<String>, pem: impl Into<String>) -> Self {
        Self::new(key_id, KeySource::Pem(pem.into()))
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// Materialise the key now. Failures are fatal for the caller.
    ///
    /// Key generation is CPU bound; async callers should run this on a
    /// blocking thread.
    pub fn initialize(&self) -> EngineResult<()> {
        self.material().map(|_| ())
    }

    pub fn is_initialized(&self) -> bool {
        self.material.get().is_some()
    }

    /// Signing half.
    pub fn private_key(&self) -> EngineResult<&EncodingKey> {
        Ok(&self.material()?.encoding)
    }

    /// Verification half.
    pub fn public_key(&self) -> EngineResult<&DecodingKey> {
        Ok(&self.material()?.decoding)
    }

    pub fn jwk(&self) -> EngineResult<&Jwk> {
        Ok(&self.material()?.jwk)
    }

    /// Key set document served to verifiers.
    pub fn jwks(&self) -> EngineResult<JwkSet> {
        Ok(JwkSet {
            keys: vec![self.jwk()?.clone()],
        })
    }

    fn material(&self) -> EngineResult<&KeyMaterial> {
        // get_or_try_init blocks concurrent initialisers until the first finishes
        self.material.get_or_try_init(|| {
            let private_key = load_private_key(&self.source).map_err(|e| {
                tracing::error!(key_id = %self.key_id, error = %e, "Signing key initialisation failed");
                e
            })?;
            let material = build_material(&self.key_id, &private_key)?;
            tracing::info!(key_id = %self.key_id, bits = private_key.size() * 8, "Signing key ready");
            Ok(material)
        })
    }
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("key_id", &self.key_id)
            .field("source", &self.source)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

fn load_private_key(source: &KeySource) -> EngineResult<RsaPrivateKey> {
    match source {
        KeySource::Generate { bits } => {
            if *bits < DEFAULT_KEY_BITS {
                return Err(EngineError::KeyGeneration(format!(
                    "RSA key size must be at least {} bits, got {}",
                    DEFAULT_KEY_BITS, bits
                )));
            }
            let mut rng = rand::thread_rng();
            RsaPrivateKey::new(&mut rng, *bits)
                .map_err(|e| EngineError::KeyGeneration(format!("Failed to generate RSA key: {}", e)))
        }
        KeySource::Pem(pem) => RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| EngineError::KeyGeneration(format!("Failed to parse private key: {}", e))),
    }
}

fn build_material(key_id: &str, private_key: &RsaPrivateKey) -> EngineResult<KeyMaterial> {
    let der = private_key
        .to_pkcs1_der()
        .map_err(|e| EngineError::KeyGeneration(format!("Failed to encode private key: {}", e)))?;
    let encoding = EncodingKey::from_rsa_der(der.as_bytes());

    let n = URL_SAFE_NO_PAD.encode(private_key.n().to_bytes_be());
    let e = URL_SAFE_NO_PAD.encode(private_key.e().to_bytes_be());
    let decoding = DecodingKey::from_rsa_components(&n, &e)
        .map_err(|e| EngineError::KeyGeneration(format!("Failed to build public key: {}", e)))?;

    Ok(KeyMaterial {
        encoding,
        decoding,
        jwk: Jwk {
            kty: "RSA".to_string(),
            kid: key_id.to_string(),
            n,
            e,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{PKCS1_KEY_PEM, SIGNING_KEY_PEM};
    use std::sync::Arc;

    #[test]
    fn test_jwks_shape() {
        let keys = KeyManager::from_pem(DEFAULT_KEY_ID, SIGNING_KEY_PEM);
        let jwks = serde_json::to_value(keys.jwks().unwrap()).unwrap();

        let key = &jwks["keys"][0];
        assert_eq!(jwks["keys"].as_array().unwrap().len(), 1);
        assert_eq!(key["kty"], "RSA");
        assert_eq!(key["kid"], "auth-key");
        assert_eq!(key["e"], "AQAB");
        assert!(!key["n"].as_str().unwrap().contains('='));
        assert_eq!(key.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_accepts_pkcs1_pem() {
        let keys = KeyManager::from_pem("legacy", PKCS1_KEY_PEM);
        assert!(keys.initialize().is_ok());
        assert_eq!(keys.jwk().unwrap().kid, "legacy");
    }

    #[test]
    fn test_invalid_pem_is_fatal() {
        let keys = KeyManager::from_pem(DEFAULT_KEY_ID, "not a key");
        let err = keys.initialize().unwrap_err();
        assert!(err.is_fatal());
        assert!(!keys.is_initialized());
    }

    #[test]
    fn test_small_key_rejected() {
        let keys = KeyManager::generate(DEFAULT_KEY_ID, 1024);
        assert!(matches!(keys.initialize(), Err(EngineError::KeyGeneration(_))));
    }

    #[test]
    fn test_concurrent_first_access_sees_one_key() {
        let keys = Arc::new(KeyManager::generate(DEFAULT_KEY_ID, DEFAULT_KEY_BITS));
        assert!(!keys.is_initialized());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let keys = Arc::clone(&keys);
                std::thread::spawn(move || keys.jwk().map(|jwk| jwk.n.clone()))
            })
            .collect();

        let moduli: Vec<String> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();

        assert!(moduli.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(keys.jwk().unwrap().n, moduli[0]);
    }
}
