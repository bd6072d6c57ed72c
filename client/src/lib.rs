use std::path::PathBuf;

use atomic_escrow_core::ledger::memory::LedgerState;
use atomic_escrow_core::{
    Address, Escrow, EscrowError, EscrowMetadata, EscrowParams, EscrowProgram, EscrowState,
    Instruction, MemoryLedger, Outcome, Processor, Refund, Settlement, SignedInstruction,
};
use ed25519_dalek::SigningKey;
use error::{ClientError, Result};
use interface::{write_json, ClientConfig};
use tracing::{info, instrument};

pub mod error;
pub mod interface;

/// Client over a ledger persisted as JSON on local disk.
///
/// Every command loads the ledger, applies one operation and writes the
/// ledger back, so a failed operation leaves the file untouched.
pub struct EscrowClient {
    ledger: MemoryLedger,
    program: EscrowProgram,
    ledger_path: PathBuf,
}

impl EscrowClient {
    #[instrument(skip_all, fields(ledger = ?config.ledger_path))]
    pub fn open(config: &ClientConfig) -> Result<Self> {
        let state = if config.ledger_path.exists() {
            let file = std::fs::File::open(&config.ledger_path)?;
            serde_json::from_reader(file)?
        } else {
            info!("creating a fresh ledger");
            LedgerState::new(config.rent)
        };
        Ok(Self {
            ledger: MemoryLedger::from_state(state),
            program: EscrowProgram::new(config.program_id),
            ledger_path: config.ledger_path.clone(),
        })
    }

    pub fn ledger(&self) -> &MemoryLedger {
        &self.ledger
    }

    fn persist(&self) -> Result<()> {
        write_json(&self.ledger_path, &self.ledger.snapshot())
    }

    #[instrument(skip(self))]
    pub fn airdrop(&self, to: &Address, lamports: u64) -> Result<u64> {
        self.ledger.airdrop(to, lamports)?;
        self.persist()?;
        Ok(self.ledger.lamports_of(to))
    }

    /// Register a new asset under a random id.
    #[instrument(skip(self))]
    pub fn create_asset(&self, decimals: u8) -> Result<Address> {
        let id = Address::new(rand::random());
        self.ledger.create_asset(id, decimals)?;
        self.persist()?;
        info!(asset = %id, "asset created");
        Ok(id)
    }

    #[instrument(skip(self))]
    pub fn mint(&self, owner: &Address, asset: &Address, amount: u64) -> Result<u64> {
        self.ledger.mint_to(owner, asset, amount)?;
        self.persist()?;
        Ok(self.ledger.balance_of(owner, asset))
    }

    #[instrument(
        skip_all,
        fields(maker = %Address::from(&key.verifying_key()), seed = params.seed)
    )]
    pub fn make(&self, key: &SigningKey, params: &EscrowParams) -> Result<EscrowMetadata> {
        self.check_program(&params.program_id)?;
        let escrow = match self.submit(key, Instruction::make(params.seed, params.terms))? {
            Outcome::Made(escrow) => escrow,
            other => return Err(ClientError::UnexpectedOutcome(format!("{other:?}"))),
        };
        info!(escrow = %escrow.address, "escrow opened");
        Ok(EscrowMetadata::new(
            self.program.program_id,
            &escrow,
            EscrowState::Open,
        ))
    }

    #[instrument(skip_all, fields(escrow = %metadata.escrow))]
    pub fn take(&self, key: &SigningKey, metadata: &EscrowMetadata) -> Result<Settlement> {
        self.check_program(&metadata.program_id)?;
        let instruction = Instruction::Take {
            escrow: metadata.escrow,
            asset_a: metadata.terms.asset_a,
            asset_b: metadata.terms.asset_b,
        };
        match self.submit(key, instruction)? {
            Outcome::Taken(settlement) => Ok(settlement),
            other => Err(ClientError::UnexpectedOutcome(format!("{other:?}"))),
        }
    }

    #[instrument(skip_all, fields(escrow = %metadata.escrow))]
    pub fn cancel(&self, key: &SigningKey, metadata: &EscrowMetadata) -> Result<Refund> {
        self.check_program(&metadata.program_id)?;
        let instruction = Instruction::Cancel {
            escrow: metadata.escrow,
        };
        match self.submit(key, instruction)? {
            Outcome::Cancelled(refund) => Ok(refund),
            other => Err(ClientError::UnexpectedOutcome(format!("{other:?}"))),
        }
    }

    /// Metadata of the open escrow at `address`.
    pub fn show(&self, address: &Address) -> Result<EscrowMetadata> {
        let record = self
            .ledger
            .escrow(&self.program.program_id, address)
            .ok_or(ClientError::NotFound(*address))?;
        let escrow = Escrow::new(*address, record).map_err(EscrowError::from)?;
        Ok(EscrowMetadata::new(
            self.program.program_id,
            &escrow,
            EscrowState::Open,
        ))
    }

    pub fn balance(&self, owner: &Address, asset: &Address) -> u64 {
        self.ledger.balance_of(owner, asset)
    }

    pub fn lamports(&self, owner: &Address) -> u64 {
        self.ledger.lamports_of(owner)
    }

    fn check_program(&self, found: &Address) -> Result<()> {
        if *found != self.program.program_id {
            return Err(ClientError::ProgramMismatch {
                expected: self.program.program_id,
                found: *found,
            });
        }
        Ok(())
    }

    fn submit(&self, key: &SigningKey, instruction: Instruction) -> Result<Outcome> {
        let tx = SignedInstruction::sign(key, self.program.program_id, instruction)?;
        let outcome = Processor::new(&self.ledger, self.program).process(&tx)?;
        self.persist()?;
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use atomic_escrow_core::EscrowTerms;

    use super::*;

    fn config(dir: &tempfile::TempDir) -> ClientConfig {
        ClientConfig {
            ledger_path: dir.path().join("state/ledger.json"),
            ..ClientConfig::default()
        }
    }

    #[test]
    fn swap_survives_reopening_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let maker = SigningKey::from_bytes(&[1u8; 32]);
        let taker = SigningKey::from_bytes(&[2u8; 32]);
        let maker_id = Address::from(&maker.verifying_key());
        let taker_id = Address::from(&taker.verifying_key());

        let client = EscrowClient::open(&config).unwrap();
        client.airdrop(&maker_id, 1_000_000_000).unwrap();
        client.airdrop(&taker_id, 1_000_000_000).unwrap();
        let asset_a = client.create_asset(6).unwrap();
        let asset_b = client.create_asset(6).unwrap();
        client.mint(&maker_id, &asset_a, 10_000_000).unwrap();
        client.mint(&taker_id, &asset_b, 10_000_000).unwrap();

        let params = EscrowParams {
            program_id: config.program_id,
            seed: 42,
            terms: EscrowTerms {
                asset_a,
                asset_b,
                deposit: 1_000_000,
                receive: 1_000_000,
            },
        };
        let metadata = client.make(&maker, &params).unwrap();
        drop(client);

        let client = EscrowClient::open(&config).unwrap();
        assert_eq!(client.show(&metadata.escrow).unwrap(), metadata);
        let settlement = client.take(&taker, &metadata).unwrap();
        assert_eq!(settlement.released, 1_000_000);
        drop(client);

        let client = EscrowClient::open(&config).unwrap();
        assert_eq!(client.balance(&taker_id, &asset_a), 1_000_000);
        assert_eq!(client.balance(&maker_id, &asset_b), 1_000_000);
        assert!(matches!(
            client.show(&metadata.escrow),
            Err(ClientError::NotFound(_))
        ));
    }

    #[test]
    fn failed_operation_is_not_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let maker = SigningKey::from_bytes(&[1u8; 32]);
        let maker_id = Address::from(&maker.verifying_key());

        let client = EscrowClient::open(&config).unwrap();
        client.airdrop(&maker_id, 1_000_000_000).unwrap();
        let asset_a = client.create_asset(0).unwrap();
        let asset_b = client.create_asset(0).unwrap();
        client.mint(&maker_id, &asset_a, 10).unwrap();
        let saved = std::fs::read_to_string(&config.ledger_path).unwrap();

        let params = EscrowParams {
            program_id: config.program_id,
            seed: 1,
            terms: EscrowTerms {
                asset_a,
                asset_b,
                deposit: 11,
                receive: 1,
            },
        };
        assert!(matches!(
            client.make(&maker, &params),
            Err(ClientError::Escrow(EscrowError::InsufficientFunds { .. }))
        ));
        assert_eq!(std::fs::read_to_string(&config.ledger_path).unwrap(), saved);

        let foreign = EscrowParams {
            program_id: Address::new([9u8; 32]),
            ..params
        };
        assert!(matches!(
            client.make(&maker, &foreign),
            Err(ClientError::ProgramMismatch { .. })
        ));
    }
}
