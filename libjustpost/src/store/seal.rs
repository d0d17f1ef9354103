//! age encryption of values at rest.

use std::io::{Read, Write};
use std::str::FromStr;

use secrecy::{ExposeSecret, SecretString};
use zeroize::Zeroize;

use crate::error::{ConfigError, StoreError};

/// Seals and opens stored values with a single age X25519 identity.
pub struct Sealer {
    identity: age::x25519::Identity,
}

impl Sealer {
    /// Build a sealer from an `AGE-SECRET-KEY-1...` string.
    pub fn from_secret_key(key: &SecretString) -> Result<Self, ConfigError> {
        let identity = age::x25519::Identity::from_str(key.expose_secret().trim())
            .map_err(|_| ConfigError::InvalidValue("store.encryption_key".to_string()))?;
        Ok(Self { identity })
    }

    /// Fresh random identity. Values sealed with it are lost when it is dropped.
    pub fn generate() -> Self {
        Self {
            identity: age::x25519::Identity::generate(),
        }
    }

    /// Encoded secret key, suitable for `store.encryption_key`.
    pub fn export_secret_key(&self) -> SecretString {
        use age::secrecy::ExposeSecret as _;
        SecretString::from(self.identity.to_string().expose_secret().clone())
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>, StoreError> {
        let recipient: Box<dyn age::Recipient + Send> = Box::new(self.identity.to_public());
        let encryptor = age::Encryptor::with_recipients(vec![recipient])
            .ok_or_else(|| StoreError::Encryption("no recipients".to_string()))?;

        let mut sealed = vec![];
        let mut writer = encryptor
            .wrap_output(&mut sealed)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        writer
            .write_all(plaintext)
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        writer
            .finish()
            .map_err(|e| StoreError::Encryption(e.to_string()))?;

        Ok(sealed)
    }

    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>, StoreError> {
        let decryptor = match age::Decryptor::new(sealed) {
            Ok(age::Decryptor::Recipients(d)) => d,
            Ok(_) => {
                return Err(StoreError::Decryption(
                    "unexpected passphrase-encrypted value".to_string(),
                ))
            }
            Err(e) => return Err(StoreError::Decryption(e.to_string())),
        };

        let mut reader = decryptor
            .decrypt(std::iter::once(&self.identity as &dyn age::Identity))
            .map_err(|e| StoreError::Decryption(e.to_string()))?;

        let mut plaintext = vec![];
        if let Err(e) = reader.read_to_end(&mut plaintext) {
            plaintext.zeroize();
            return Err(StoreError::Decryption(e.to_string()));
        }

        Ok(plaintext)
    }
}
