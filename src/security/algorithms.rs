//! Algorithm identifiers and their mapping onto crypto crates

use super::SecurityError;
use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes128Gcm, Aes256Gcm, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Oaep, Pkcs1v15Sign, RsaPrivateKey, RsaPublicKey};
use sha1::Sha1;
use sha2::digest::DynDigest;
use sha2::{Digest, Sha256, Sha384, Sha512};

// ========== Algorithm URIs ==========

pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

pub const DIGEST_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const DIGEST_SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const DIGEST_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const DIGEST_SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";

pub const AES128_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes128-gcm";
pub const AES256_GCM: &str = "http://www.w3.org/2009/xmlenc11#aes256-gcm";

pub const RSA_OAEP: &str = "http://www.w3.org/2009/xmlenc11#rsa-oaep";
pub const RSA_OAEP_MGF1P: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";

pub const MGF1_SHA1: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha1";
pub const MGF1_SHA256: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha256";
pub const MGF1_SHA384: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha384";
pub const MGF1_SHA512: &str = "http://www.w3.org/2009/xmlenc11#mgf1sha512";

pub const ATTACHMENT_CONTENT_SIGNATURE_TRANSFORM: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Content-Signature-Transform";
pub const ATTACHMENT_CIPHERTEXT_TRANSFORM: &str =
    "http://docs.oasis-open.org/wss/oasis-wss-SwAProfile-1.1#Attachment-Ciphertext-Transform";

const GCM_NONCE_LEN: usize = 12;

// ========== Digests ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestAlgorithm {
    Sha1,
    Sha256,
    Sha384,
    Sha512,
}

impl DigestAlgorithm {
    /// Resolve a digest method URI; SHA-1 is accepted only for OAEP parameters
    pub fn from_uri(uri: &str) -> Result<Self, SecurityError> {
        match uri {
            DIGEST_SHA1 => Ok(Self::Sha1),
            DIGEST_SHA256 => Ok(Self::Sha256),
            DIGEST_SHA384 => Ok(Self::Sha384),
            DIGEST_SHA512 => Ok(Self::Sha512),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    /// Resolve a digest usable for signature references
    pub fn reference_digest_from_uri(uri: &str) -> Result<Self, SecurityError> {
        match Self::from_uri(uri)? {
            Self::Sha1 => Err(SecurityError::UnsupportedAlgorithm(uri.to_string())),
            other => Ok(other),
        }
    }

    fn from_mgf_uri(uri: &str) -> Result<Self, SecurityError> {
        match uri {
            MGF1_SHA1 => Ok(Self::Sha1),
            MGF1_SHA256 => Ok(Self::Sha256),
            MGF1_SHA384 => Ok(Self::Sha384),
            MGF1_SHA512 => Ok(Self::Sha512),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Sha1 => DIGEST_SHA1,
            Self::Sha256 => DIGEST_SHA256,
            Self::Sha384 => DIGEST_SHA384,
            Self::Sha512 => DIGEST_SHA512,
        }
    }

    pub fn mgf_uri(&self) -> &'static str {
        match self {
            Self::Sha1 => MGF1_SHA1,
            Self::Sha256 => MGF1_SHA256,
            Self::Sha384 => MGF1_SHA384,
            Self::Sha512 => MGF1_SHA512,
        }
    }

    pub fn digest(&self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha1 => Sha1::digest(data).to_vec(),
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha384 => Sha384::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    fn boxed(&self) -> Box<dyn DynDigest + Send + Sync> {
        match self {
            Self::Sha1 => Box::new(Sha1::new()),
            Self::Sha256 => Box::new(Sha256::new()),
            Self::Sha384 => Box::new(Sha384::new()),
            Self::Sha512 => Box::new(Sha512::new()),
        }
    }
}

// ========== Signatures ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    RsaSha256,
    RsaSha384,
    RsaSha512,
}

impl SignatureAlgorithm {
    pub fn from_uri(uri: &str) -> Result<Self, SecurityError> {
        match uri {
            RSA_SHA256 => Ok(Self::RsaSha256),
            RSA_SHA384 => Ok(Self::RsaSha384),
            RSA_SHA512 => Ok(Self::RsaSha512),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::RsaSha256 => RSA_SHA256,
            Self::RsaSha384 => RSA_SHA384,
            Self::RsaSha512 => RSA_SHA512,
        }
    }

    pub fn digest_algorithm(&self) -> DigestAlgorithm {
        match self {
            Self::RsaSha256 => DigestAlgorithm::Sha256,
            Self::RsaSha384 => DigestAlgorithm::Sha384,
            Self::RsaSha512 => DigestAlgorithm::Sha512,
        }
    }

    fn scheme(&self) -> Pkcs1v15Sign {
        match self {
            Self::RsaSha256 => Pkcs1v15Sign::new::<Sha256>(),
            Self::RsaSha384 => Pkcs1v15Sign::new::<Sha384>(),
            Self::RsaSha512 => Pkcs1v15Sign::new::<Sha512>(),
        }
    }

    pub fn sign(&self, key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let hashed = self.digest_algorithm().digest(data);
        key.sign(self.scheme(), &hashed)
            .map_err(|e| SecurityError::InvalidKeyMaterial(e.to_string()))
    }

    pub fn verify(
        &self,
        key: &RsaPublicKey,
        data: &[u8],
        signature: &[u8],
    ) -> Result<(), SecurityError> {
        let hashed = self.digest_algorithm().digest(data);
        key.verify(self.scheme(), &hashed, signature)
            .map_err(|_| SecurityError::InvalidSignature)
    }
}

// ========== Content encryption ==========

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataEncryptionAlgorithm {
    Aes128Gcm,
    Aes256Gcm,
}

impl DataEncryptionAlgorithm {
    pub fn from_uri(uri: &str) -> Result<Self, SecurityError> {
        match uri {
            AES128_GCM => Ok(Self::Aes128Gcm),
            AES256_GCM => Ok(Self::Aes256Gcm),
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Aes128Gcm => AES128_GCM,
            Self::Aes256Gcm => AES256_GCM,
        }
    }

    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128Gcm => 16,
            Self::Aes256Gcm => 32,
        }
    }

    pub fn generate_key(&self) -> Vec<u8> {
        let mut key = vec![0u8; self.key_len()];
        OsRng.fill_bytes(&mut key);
        key
    }

    /// Encrypt to `nonce || ciphertext || tag`
    pub fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, SecurityError> {
        let mut nonce = [0u8; GCM_NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);

        let ciphertext = match self {
            Self::Aes128Gcm => Aes128Gcm::new_from_slice(key)
                .map_err(|e| SecurityError::EncryptionFailed(e.to_string()))?
                .encrypt(Nonce::from_slice(&nonce), plaintext),
            Self::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|e| SecurityError::EncryptionFailed(e.to_string()))?
                .encrypt(Nonce::from_slice(&nonce), plaintext),
        }
        .map_err(|e| SecurityError::EncryptionFailed(e.to_string()))?;

        let mut output = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len());
        output.extend_from_slice(&nonce);
        output.extend_from_slice(&ciphertext);
        Ok(output)
    }

    pub fn decrypt(&self, key: &[u8], encrypted: &[u8]) -> Result<Vec<u8>, SecurityError> {
        if encrypted.len() < GCM_NONCE_LEN {
            return Err(SecurityError::DecryptionFailed(
                "ciphertext shorter than nonce".to_string(),
            ));
        }
        let (nonce, ciphertext) = encrypted.split_at(GCM_NONCE_LEN);

        match self {
            Self::Aes128Gcm => Aes128Gcm::new_from_slice(key)
                .map_err(|e| SecurityError::DecryptionFailed(e.to_string()))?
                .decrypt(Nonce::from_slice(nonce), ciphertext),
            Self::Aes256Gcm => Aes256Gcm::new_from_slice(key)
                .map_err(|e| SecurityError::DecryptionFailed(e.to_string()))?
                .decrypt(Nonce::from_slice(nonce), ciphertext),
        }
        .map_err(|e| SecurityError::DecryptionFailed(e.to_string()))
    }
}

// ========== Key transport ==========

/// RSA-OAEP parameters resolved from the EncryptedKey method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyTransport {
    pub method: KeyTransportMethod,
    pub digest: DigestAlgorithm,
    pub mgf: DigestAlgorithm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTransportMethod {
    /// `xmlenc11#rsa-oaep`: digest and MGF are explicit
    RsaOaep,
    /// `xmlenc#rsa-oaep-mgf1p`: MGF1 is fixed to SHA-1
    RsaOaepMgf1p,
}

impl KeyTransport {
    /// Resolve from the method URI and its optional digest/MGF children
    pub fn from_uris(
        method: &str,
        digest: Option<&str>,
        mgf: Option<&str>,
    ) -> Result<Self, SecurityError> {
        let digest = digest
            .map(DigestAlgorithm::from_uri)
            .transpose()?
            .unwrap_or(DigestAlgorithm::Sha1);
        match method {
            RSA_OAEP => Ok(Self {
                method: KeyTransportMethod::RsaOaep,
                digest,
                mgf: mgf
                    .map(DigestAlgorithm::from_mgf_uri)
                    .transpose()?
                    .unwrap_or(DigestAlgorithm::Sha1),
            }),
            RSA_OAEP_MGF1P => {
                if let Some(mgf) = mgf.filter(|uri| *uri != MGF1_SHA1) {
                    return Err(SecurityError::UnsupportedAlgorithm(format!(
                        "{mgf} cannot be combined with {RSA_OAEP_MGF1P}"
                    )));
                }
                Ok(Self {
                    method: KeyTransportMethod::RsaOaepMgf1p,
                    digest,
                    mgf: DigestAlgorithm::Sha1,
                })
            }
            other => Err(SecurityError::UnsupportedAlgorithm(other.to_string())),
        }
    }

    pub fn method_uri(&self) -> &'static str {
        match self.method {
            KeyTransportMethod::RsaOaep => RSA_OAEP,
            KeyTransportMethod::RsaOaepMgf1p => RSA_OAEP_MGF1P,
        }
    }

    /// MGF URI to advertise; only the xmlenc11 method carries one
    pub fn mgf_uri(&self) -> Option<&'static str> {
        match self.method {
            KeyTransportMethod::RsaOaep => Some(self.mgf.mgf_uri()),
            KeyTransportMethod::RsaOaepMgf1p => None,
        }
    }

    fn padding(&self) -> Oaep {
        Oaep {
            digest: self.digest.boxed(),
            mgf_digest: self.mgf.boxed(),
            label: None,
        }
    }

    pub fn wrap(&self, key: &RsaPublicKey, content_key: &[u8]) -> Result<Vec<u8>, SecurityError> {
        key.encrypt(&mut OsRng, self.padding(), content_key)
            .map_err(|e| SecurityError::EncryptionFailed(e.to_string()))
    }

    pub fn unwrap(&self, key: &RsaPrivateKey, wrapped: &[u8]) -> Result<Vec<u8>, SecurityError> {
        key.decrypt(self.padding(), wrapped)
            .map_err(|e| SecurityError::DecryptionFailed(e.to_string()))
    }
}
