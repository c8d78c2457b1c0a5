//! Hybrid payload encryption.
//!
//! A fresh AES-256-GCM key encrypts the payload; the AES key is wrapped
//! with RSA-OAEP (SHA-256) for the recipient. The pieces are packed into
//! one opaque blob so either side can split and unwrap deterministically.
//!
//! # Blob layout
//!
//! | Field         | Bytes       | Contents                                  |
//! |---------------|-------------|-------------------------------------------|
//! | `version`     | 1           | [`ENVELOPE_VERSION`]                      |
//! | `key_len`     | 4 (BE u32)  | length of `wrapped_key`                   |
//! | `wrapped_key` | `key_len`   | RSA-OAEP(SHA-256) of the AES-256 key      |
//! | `nonce_len`   | 4 (BE u32)  | always 12                                 |
//! | `nonce`       | `nonce_len` | AES-GCM nonce                             |
//! | `ct_len`      | 4 (BE u32)  | length of `ciphertext`                    |
//! | `ciphertext`  | `ct_len`    | AES-256-GCM output, 16-byte tag appended  |

use std::fmt;
use std::path::Path;

use aes_gcm::aead::{Aead, AeadCore, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use pkcs8::{DecodePrivateKey, DecodePublicKey};
use rand::rngs::OsRng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use crate::error::Error;

/// Current blob layout version.
pub const ENVELOPE_VERSION: u8 = 1;

const AES_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Asymmetric key material used to wrap and unwrap payload keys.
///
/// Holding only a public key allows encryption; decryption needs the
/// private half.
#[derive(Clone)]
pub struct KeyMaterial {
    public: RsaPublicKey,
    private: Option<RsaPrivateKey>,
}

impl KeyMaterial {
    pub fn from_private_key(private: RsaPrivateKey) -> Self {
        Self {
            public: private.to_public_key(),
            private: Some(private),
        }
    }

    pub fn from_public_key(public: RsaPublicKey) -> Self {
        Self { public, private: None }
    }

    /// Parse a PEM key. Private keys may be PKCS#8 or PKCS#1; a passphrase
    /// selects encrypted PKCS#8. Public-only PEMs are accepted too.
    pub fn from_pem(pem: &str, passphrase: Option<&str>) -> Result<Self, Error> {
        if let Some(pass) = passphrase {
            return RsaPrivateKey::from_pkcs8_encrypted_pem(pem, pass.as_bytes())
                .map(Self::from_private_key)
                .map_err(|e| Error::Crypto(format!("cannot decrypt private key: {}", e)));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs8_pem(pem) {
            return Ok(Self::from_private_key(key));
        }
        if let Ok(key) = RsaPrivateKey::from_pkcs1_pem(pem) {
            return Ok(Self::from_private_key(key));
        }
        if let Ok(key) = RsaPublicKey::from_public_key_pem(pem) {
            return Ok(Self::from_public_key(key));
        }
        RsaPublicKey::from_pkcs1_pem(pem)
            .map(Self::from_public_key)
            .map_err(|_| Error::Crypto("unrecognized RSA key format".into()))
    }

    pub fn from_pem_file(path: &Path, passphrase: Option<&str>) -> Result<Self, Error> {
        let pem = std::fs::read_to_string(path)
            .map_err(|e| Error::Io(format!("cannot read key file {}: {}", path.display(), e)))?;
        Self::from_pem(&pem, passphrase)
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public
    }

    pub fn private_key(&self) -> Option<&RsaPrivateKey> {
        self.private.as_ref()
    }

    pub fn can_decrypt(&self) -> bool {
        self.private.is_some()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("has_private", &self.private.is_some())
            .finish_non_exhaustive()
    }
}

/// Encrypt `plaintext` for the holder of `recipient`'s private key.
pub fn encrypt(plaintext: &[u8], recipient: &RsaPublicKey) -> Result<Vec<u8>, Error> {
    let key = Aes256Gcm::generate_key(&mut OsRng);
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = Aes256Gcm::new(&key)
        .encrypt(&nonce, plaintext)
        .map_err(|_| Error::Crypto("payload encryption failed".into()))?;
    let wrapped_key = recipient
        .encrypt(&mut OsRng, Oaep::new::<Sha256>(), key.as_slice())
        .map_err(|e| Error::Crypto(format!("key wrap failed: {}", e)))?;

    let mut blob = Vec::with_capacity(1 + 12 + wrapped_key.len() + NONCE_LEN + ciphertext.len());
    blob.push(ENVELOPE_VERSION);
    for field in [wrapped_key.as_slice(), nonce.as_slice(), ciphertext.as_slice()] {
        let len = u32::try_from(field.len())
            .map_err(|_| Error::Crypto("payload too large for envelope".into()))?;
        blob.extend_from_slice(&len.to_be_bytes());
        blob.extend_from_slice(field);
    }
    Ok(blob)
}

/// Split a blob produced by [`encrypt`] and recover the plaintext.
pub fn decrypt(blob: &[u8], private: &RsaPrivateKey) -> Result<Vec<u8>, Error> {
    let (&version, mut rest) = blob
        .split_first()
        .ok_or_else(|| Error::Crypto("empty envelope".into()))?;
    if version != ENVELOPE_VERSION {
        return Err(Error::Crypto(format!("unsupported envelope version {}", version)));
    }

    let wrapped_key = take_field(&mut rest, "wrapped key")?;
    let nonce = take_field(&mut rest, "nonce")?;
    let ciphertext = take_field(&mut rest, "ciphertext")?;
    if !rest.is_empty() {
        return Err(Error::Crypto(format!("{} trailing bytes after envelope", rest.len())));
    }
    if nonce.len() != NONCE_LEN {
        return Err(Error::Crypto(format!("nonce must be {} bytes, got {}", NONCE_LEN, nonce.len())));
    }

    let key = private
        .decrypt(Oaep::new::<Sha256>(), wrapped_key)
        .map_err(|_| Error::Crypto("key unwrap failed".into()))?;
    if key.len() != AES_KEY_LEN {
        return Err(Error::Crypto(format!("unwrapped key must be {} bytes, got {}", AES_KEY_LEN, key.len())));
    }

    Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key))
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| Error::Crypto("payload failed integrity check".into()))
}

fn take_field<'a>(rest: &mut &'a [u8], what: &str) -> Result<&'a [u8], Error> {
    if rest.len() < 4 {
        return Err(Error::Crypto(format!("truncated envelope: missing {} length", what)));
    }
    let (len_bytes, tail) = rest.split_at(4);
    let len = u32::from_be_bytes([len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]]) as usize;
    if tail.len() < len {
        return Err(Error::Crypto(format!("truncated envelope: {} needs {} bytes", what, len)));
    }
    let (field, tail) = tail.split_at(len);
    *rest = tail;
    Ok(field)
}
