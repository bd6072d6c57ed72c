use atomic_escrow_core::{Address, EscrowError, LedgerError};

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("Escrow error: {0}")]
    Escrow(#[from] EscrowError),
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("Keypair error: {0}")]
    Keypair(String),
    #[error("Program mismatch: client runs {expected}, input targets {found}")]
    ProgramMismatch { expected: Address, found: Address },
    #[error("Unexpected outcome: {0}")]
    UnexpectedOutcome(String),
    #[error("No open escrow at {0}")]
    NotFound(Address),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[error("Serialization error")]
    Serialization(#[from] serde_json::Error),
}

impl From<ed25519_dalek::SignatureError> for ClientError {
    fn from(value: ed25519_dalek::SignatureError) -> Self {
        Self::Keypair(value.to_string())
    }
}
