/// Key-less address derivation for escrow records and balance accounts
pub mod derive;
pub mod error;
/// Escrow terms, the persisted record and its byte layout
pub mod escrow;
/// Signed instructions and the processor that applies them
pub mod instruction;
/// 32-byte identities of parties, assets and programs
pub mod identity;
/// JSON I/O for escrow parameters and metadata
#[cfg(feature = "json")]
pub mod interface;
/// Ledger capabilities the program needs, plus an in-memory ledger
pub mod ledger;
/// The make/take/cancel state machine
pub mod program;

pub use error::{DerivationError, EscrowError, LedgerError, TermsError};
pub use escrow::{Escrow, EscrowRecord, EscrowState, EscrowTerms};
pub use identity::Address;
pub use instruction::{Instruction, Outcome, Processor, SignedInstruction};
#[cfg(feature = "json")]
pub use interface::{EscrowMetadata, EscrowParams};
pub use ledger::memory::MemoryLedger;
pub use ledger::Ledger;
pub use program::{EscrowProgram, MakeArgs, Refund, Settlement, TakeArgs, ESCROW_PROGRAM_ID};

pub type Result<T> = std::result::Result<T, EscrowError>;
