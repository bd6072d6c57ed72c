//! Escrow terms, the persisted escrow record and its paired vault.

use bincode::config::Config;
use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::derive;
use crate::error::{DerivationError, TermsError};
use crate::identity::Address;

/// What the maker offers and what they want back.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowTerms {
    /// Asset the maker locks in the vault.
    pub asset_a: Address,
    /// Asset the maker wants to receive.
    pub asset_b: Address,
    /// Amount of asset A locked at make time.
    pub deposit: u64,
    /// Amount of asset B a taker must pay.
    pub receive: u64,
}

impl EscrowTerms {
    /// Enforce non-zero amounts and distinct assets.
    pub fn validate(&self) -> Result<(), TermsError> {
        if self.deposit == 0 {
            return Err(TermsError::ZeroDeposit);
        }
        if self.receive == 0 {
            return Err(TermsError::ZeroExpected);
        }
        if self.asset_a == self.asset_b {
            return Err(TermsError::IdenticalAssets(self.asset_a));
        }
        Ok(())
    }
}

/// On-ledger state of an open escrow.
///
/// Immutable from creation until it is closed by a take or a cancel.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct EscrowRecord {
    /// Maker-chosen value that disambiguates escrows of the same maker.
    pub seed: u64,
    pub maker: Address,
    pub asset_a: Address,
    pub asset_b: Address,
    /// Amount of asset B the taker must pay.
    pub amount_b_expected: u64,
    /// Amount of asset A the vault received at make time.
    pub amount_a_deposited: u64,
    /// Bump that puts the record's address off the ed25519 curve.
    pub bump: u8,
}

/// Errors decoding an [`EscrowRecord`] from account bytes.
#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("expected {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("account discriminator does not match")]
    Discriminator,

    #[error("decode: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("encode: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("stored terms are invalid: {0}")]
    Terms(#[from] TermsError),
}

fn codec() -> impl Config {
    bincode::config::standard()
        .with_little_endian()
        .with_fixed_int_encoding()
}

impl EscrowRecord {
    pub const DISCRIMINATOR_LEN: usize = 8;

    /// discriminator + seed + maker + asset_a + asset_b + expected + deposited + bump
    pub const LEN: usize = Self::DISCRIMINATOR_LEN + 8 + 3 * 32 + 8 + 8 + 1;

    /// First 8 bytes of `sha256("account:EscrowRecord")`, tagging the account type.
    pub fn discriminator() -> [u8; 8] {
        let hash = Sha256::digest(b"account:EscrowRecord");
        let mut out = [0u8; 8];
        out.copy_from_slice(&hash[..8]);
        out
    }

    pub fn terms(&self) -> EscrowTerms {
        EscrowTerms {
            asset_a: self.asset_a,
            asset_b: self.asset_b,
            deposit: self.amount_a_deposited,
            receive: self.amount_b_expected,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, RecordError> {
        let mut out = Vec::with_capacity(Self::LEN);
        out.extend_from_slice(&Self::discriminator());
        out.extend(bincode::encode_to_vec(self, codec())?);
        Ok(out)
    }

    /// Decode and check the stored terms are still well-formed.
    pub fn from_bytes(data: &[u8]) -> Result<Self, RecordError> {
        if data.len() != Self::LEN {
            return Err(RecordError::Length {
                expected: Self::LEN,
                actual: data.len(),
            });
        }
        let (tag, body) = data.split_at(Self::DISCRIMINATOR_LEN);
        if tag != Self::discriminator().as_slice() {
            return Err(RecordError::Discriminator);
        }
        let (record, _): (Self, usize) = bincode::decode_from_slice(body, codec())?;
        record.terms().validate()?;
        Ok(record)
    }

    /// Recompute this record's own address from its fields.
    pub fn address(&self, program_id: &Address) -> Result<Address, DerivationError> {
        derive::escrow_address_with_bump(program_id, &self.maker, self.seed, self.bump)
    }
}

/// Lifecycle of an escrow. `Closed` is terminal.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscrowState {
    /// Record and vault exist; awaiting take or cancel.
    Open,
    /// Record and vault have been destroyed.
    Closed,
}

/// An open escrow: the record, where it lives, and its vault.
///
/// The two storage locations are always created and destroyed together.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Escrow {
    pub address: Address,
    pub vault: Address,
    pub record: EscrowRecord,
}

impl Escrow {
    pub fn new(address: Address, record: EscrowRecord) -> Result<Self, DerivationError> {
        let vault = derive::associated_balance_address(&address, &record.asset_a)?;
        Ok(Self {
            address,
            vault,
            record,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> EscrowRecord {
        EscrowRecord {
            seed: 0xdead_beef,
            maker: Address::new([1u8; 32]),
            asset_a: Address::new([2u8; 32]),
            asset_b: Address::new([3u8; 32]),
            amount_b_expected: 1_000_000,
            amount_a_deposited: 500,
            bump: 254,
        }
    }

    #[test]
    fn fixed_width_layout() {
        let bytes = record().to_bytes().unwrap();
        assert_eq!(bytes.len(), EscrowRecord::LEN);
        assert_eq!(bytes.len(), 129);
        assert_eq!(&bytes[..8], &EscrowRecord::discriminator());
        // seed is little-endian right after the discriminator
        assert_eq!(&bytes[8..16], &0xdead_beef_u64.to_le_bytes());
        assert_eq!(&bytes[16..48], &[1u8; 32]);
        assert_eq!(bytes[128], 254);
        assert_eq!(EscrowRecord::from_bytes(&bytes).unwrap(), record());
    }

    #[test]
    fn rejects_foreign_or_truncated_bytes() {
        let mut bytes = record().to_bytes().unwrap();
        assert!(matches!(
            EscrowRecord::from_bytes(&bytes[..100]),
            Err(RecordError::Length { actual: 100, .. })
        ));
        bytes[0] ^= 0xff;
        assert!(matches!(
            EscrowRecord::from_bytes(&bytes),
            Err(RecordError::Discriminator)
        ));
    }

    #[test]
    fn rejects_stored_invalid_terms() {
        let bad = EscrowRecord {
            asset_b: Address::new([2u8; 32]),
            ..record()
        };
        let bytes = bad.to_bytes().unwrap();
        assert!(matches!(
            EscrowRecord::from_bytes(&bytes),
            Err(RecordError::Terms(TermsError::IdenticalAssets(_)))
        ));
    }

    #[test]
    fn terms_validation() {
        let terms = record().terms();
        assert!(terms.validate().is_ok());
        assert_eq!(
            EscrowTerms { deposit: 0, ..terms }.validate(),
            Err(TermsError::ZeroDeposit)
        );
        assert_eq!(
            EscrowTerms { receive: 0, ..terms }.validate(),
            Err(TermsError::ZeroExpected)
        );
    }
}
