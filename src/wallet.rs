//! Keypair store.
//!
//! The on-disk format is JSON with base58 strings:
//! `{"publicKey": "<32-byte key>", "privateKey": "<64-byte keypair>"}`.

use serde::{Deserialize, Serialize};
use solana_sdk::{
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("wallet io: {0}")]
    Io(#[from] std::io::Error),
    #[error("wallet file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("public key {stored} does not match private key (derives {derived})")]
    Mismatch { stored: Pubkey, derived: Pubkey },
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WalletFile {
    public_key: String,
    private_key: String,
}

/// Signing identity shared read-only by every strategy.
pub struct Wallet {
    keypair: Keypair,
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("public_key", &self.keypair.pubkey())
            .finish_non_exhaustive()
    }
}

impl Wallet {
    pub fn generate() -> Self {
        Self {
            keypair: Keypair::new(),
        }
    }

    pub fn from_keypair(keypair: Keypair) -> Self {
        Self { keypair }
    }

    pub fn pubkey(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    pub fn sign_message(&self, message: &[u8]) -> Signature {
        self.keypair.sign_message(message)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, WalletError> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let file: WalletFile = serde_json::from_str(&raw)?;

        let secret = bs58::decode(&file.private_key)
            .into_vec()
            .map_err(|e| WalletError::InvalidKey(format!("private key: {e}")))?;
        let keypair = Keypair::try_from(secret.as_slice())
            .map_err(|e| WalletError::InvalidKey(format!("private key: {e}")))?;

        let stored = Pubkey::from_str(&file.public_key)
            .map_err(|e| WalletError::InvalidKey(format!("public key: {e}")))?;
        let derived = keypair.pubkey();
        if stored != derived {
            return Err(WalletError::Mismatch { stored, derived });
        }

        Ok(Self { keypair })
    }

    /// Write the wallet as JSON, readable by the owner only.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), WalletError> {
        let file = WalletFile {
            public_key: self.pubkey().to_string(),
            private_key: bs58::encode(self.keypair.to_bytes()).into_string(),
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_private(path.as_ref(), &json)?;
        Ok(())
    }
}

#[cfg(unix)]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    use std::io::Write;
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = std::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    file.write_all(contents)
}

#[cfg(not(unix))]
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    std::fs::write(path, contents)
}
