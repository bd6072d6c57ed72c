//! JSON (de)serialization of escrow parameters, metadata and ledger snapshots.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::escrow::{Escrow, EscrowState, EscrowTerms};
use crate::identity::Address;
use crate::program::{MakeArgs, ESCROW_PROGRAM_ID};

/// Read escrow params or metadata from the JSON file at `path`.
pub fn load_escrow_data<P, T>(path: P) -> anyhow::Result<T>
where
    P: AsRef<Path>,
    T: DeserializeOwned,
{
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing escrow data from {}", path.display()))
}

/// Write `data` to `path` as pretty-printed JSON, creating missing parent
/// directories.
pub fn save_escrow_data<P, T>(path: P, data: &T) -> anyhow::Result<()>
where
    P: AsRef<Path>,
    T: Serialize,
{
    let path = path.as_ref();
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating directory {}", parent.display()))?;
    }
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, data)
        .with_context(|| format!("writing escrow data to {}", path.display()))?;
    writer
        .flush()
        .with_context(|| format!("flushing {}", path.display()))
}

/// Parameters a maker supplies to **open** an escrow.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowParams {
    /// Program the escrow is opened under.
    #[serde(default = "default_program_id")]
    pub program_id: Address,

    pub seed: u64,

    #[serde(flatten)]
    pub terms: EscrowTerms,
}

fn default_program_id() -> Address {
    ESCROW_PROGRAM_ID
}

impl From<EscrowParams> for MakeArgs {
    fn from(params: EscrowParams) -> Self {
        Self {
            seed: params.seed,
            terms: params.terms,
        }
    }
}

/// Metadata describing an escrow, **returned** from make and read back
/// by take or cancel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EscrowMetadata {
    pub program_id: Address,

    /// Record address, the handle takers and the maker refer to.
    pub escrow: Address,

    pub vault: Address,

    pub maker: Address,

    pub seed: u64,

    #[serde(flatten)]
    pub terms: EscrowTerms,

    /// Where in the lifecycle the escrow currently is.
    pub state: EscrowState,
}

impl EscrowMetadata {
    pub fn new(program_id: Address, escrow: &Escrow, state: EscrowState) -> Self {
        Self {
            program_id,
            escrow: escrow.address,
            vault: escrow.vault,
            maker: escrow.record.maker,
            seed: escrow.record.seed,
            terms: escrow.record.terms(),
            state,
        }
    }
}
