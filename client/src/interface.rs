use std::fs::File;
use std::path::{Path, PathBuf};

use atomic_escrow_core::interface::load_escrow_data;
use atomic_escrow_core::ledger::Rent;
use atomic_escrow_core::{Address, ESCROW_PROGRAM_ID};
use ed25519_dalek::SigningKey;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{ClientError, Result};

/// Reads JSON-encoded escrow params or metadata from the given `path`.
pub fn load_input_data<P, T>(path: P) -> anyhow::Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = path.as_ref();
    if !path.exists() {
        anyhow::bail!(
            "Input file {:?} not found. Pass --params/--metadata explicitly.",
            path
        );
    }
    load_escrow_data(path)
}

pub(crate) fn write_json<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    serde_json::to_writer_pretty(file, data)?;
    Ok(())
}

/// Client settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Where the local ledger state is persisted between commands.
    pub ledger_path: PathBuf,
    /// Escrow program the client submits instructions to.
    pub program_id: Address,
    /// Storage-cost schedule used when a fresh ledger is created.
    pub rent: Rent,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ledger_path: PathBuf::from("./ledger.json"),
            program_id: ESCROW_PROGRAM_ID,
            rent: Rent::default(),
        }
    }
}

impl ClientConfig {
    /// Load from `path`, falling back to defaults if the file is absent.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            tracing::debug!(?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        load_input_data(path)
    }
}

/// Read a keypair file: a JSON array of 64 bytes, secret then public key.
pub fn read_keypair_file<P: AsRef<Path>>(path: P) -> Result<SigningKey> {
    let path = path.as_ref();
    let file = File::open(path)
        .map_err(|e| ClientError::Keypair(format!("opening {:?}: {}", path, e)))?;
    let bytes: Vec<u8> = serde_json::from_reader(file)?;
    let bytes: [u8; 64] = bytes
        .try_into()
        .map_err(|b: Vec<u8>| ClientError::Keypair(format!("expected 64 bytes, got {}", b.len())))?;
    Ok(SigningKey::from_keypair_bytes(&bytes)?)
}

pub fn write_keypair_file<P: AsRef<Path>>(path: P, key: &SigningKey) -> Result<()> {
    write_json(path.as_ref(), &key.to_keypair_bytes().to_vec())
}
