use thiserror::Error;

use crate::identity::Address;

/// Errors surfaced to callers of the escrow program.
///
/// Every variant except [`EscrowError::Ledger`] is raised before any
/// state is touched; `Ledger` covers failures discovered by the ledger
/// while effects were being applied, which the enclosing transaction
/// then rolls back.
#[derive(Debug, Error, PartialEq)]
pub enum EscrowError {
    /// Non-positive amounts, identical or unknown assets.
    #[error("invalid terms: {0}")]
    InvalidTerms(#[from] TermsError),

    /// Caller cannot supply the required amount (asset units or lamports).
    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    /// The derived escrow address is already occupied.
    #[error("escrow {0} already exists")]
    DuplicateEscrow(Address),

    /// No open escrow lives at the address.
    #[error("escrow {0} not found")]
    EscrowNotFound(Address),

    /// Supplied asset ids disagree with the escrow's terms.
    #[error("asset mismatch: escrow expects {expected}, supplied {supplied}")]
    AssetMismatch { expected: Address, supplied: Address },

    /// Cancel attempted by someone other than the maker.
    #[error("{0} is not the maker of this escrow")]
    Unauthorized(Address),

    /// The designated signer did not sign the transaction.
    #[error("missing signature from {0}")]
    MissingSignature(Address),

    /// Vault balance no longer equals the amount deposited at make time.
    #[error("vault balance mismatch: expected {expected}, found {actual}")]
    VaultBalanceMismatch { expected: u64, actual: u64 },

    /// An account at a party's associated address belongs to someone else
    /// or holds another asset.
    #[error("account {account} is not the {asset} account of {owner}")]
    ForeignAccount {
        account: Address,
        owner: Address,
        asset: Address,
    },

    /// Bytes at the escrow address do not decode to a valid record.
    #[error("malformed escrow record at {0}")]
    MalformedRecord(Address),

    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("instruction encoding: {0}")]
    Encoding(String),

    #[error("derivation error: {0}")]
    Derivation(#[from] DerivationError),

    #[error("identity error: {0}")]
    Identity(#[from] IdentityError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
}

/// Reasons an escrow's terms are rejected at make time.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TermsError {
    #[error("deposit amount must be non-zero")]
    ZeroDeposit,

    #[error("expected amount must be non-zero")]
    ZeroExpected,

    #[error("asset A and asset B must differ (both {0})")]
    IdenticalAssets(Address),

    #[error("asset {0} does not exist")]
    UnknownAsset(Address),
}

/// Errors that might occur while parsing into an [`Address`].
#[derive(Debug, Error, PartialEq)]
pub enum IdentityError {
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),

    #[error("invalid base58: {0}")]
    Base58(#[from] bs58::decode::Error),

    #[error("cannot parse address from empty string")]
    Empty,

    #[error("address must be 32 bytes, got {0}")]
    InvalidLength(usize),
}

/// Failures of deterministic address derivation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DerivationError {
    #[error("too many seeds: {0} (max 16)")]
    TooManySeeds(usize),

    #[error("seed of {0} bytes exceeds the 32 byte limit")]
    SeedTooLong(usize),

    /// The candidate is a valid ed25519 point and could have a private key.
    #[error("derived address lies on the ed25519 curve")]
    OnCurve,

    #[error("no bump in 0..=255 yields an off-curve address")]
    NoViableBump,
}

/// Errors raised by a ledger while applying balance and account effects.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("account {0} already exists")]
    AccountAlreadyExists(Address),

    #[error("account {0} not found")]
    AccountNotFound(Address),

    #[error("asset {0} not found")]
    AssetNotFound(Address),

    #[error("insufficient funds: required {required}, available {available}")]
    InsufficientFunds { required: u64, available: u64 },

    #[error("insufficient lamports: required {required}, available {available}")]
    InsufficientLamports { required: u64, available: u64 },

    #[error("account {account} holds asset {held}, not {requested}")]
    AssetMismatch {
        account: Address,
        held: Address,
        requested: Address,
    },

    #[error("owner {0} of the source account has not signed")]
    MissingAuthority(Address),

    #[error("account {0} still holds a balance")]
    NonZeroBalance(Address),

    #[error("arithmetic overflow")]
    Overflow,

    #[error("seeds do not derive a program address: {0}")]
    InvalidSeeds(#[from] DerivationError),
}
