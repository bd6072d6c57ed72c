//! What the escrow program needs from the ledger it runs on.
//!
//! The program never touches balances or storage directly. It goes through
//! these traits, which a ledger implements inside one atomic transaction:
//! - [`TransferAdapter`] moves asset balances and opens/closes balance accounts
//! - [`RecordStore`] holds program-owned records
//! - [`Signers`] answers "did this identity authorize the call" and lets the
//!   program sign for addresses derived from its own id
//!
//! [`memory::MemoryLedger`] is the reference implementation.

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};

use crate::derive;
use crate::error::LedgerError;
use crate::identity::Address;

pub mod memory;

/// Bytes every account is charged for on top of its data.
pub const ACCOUNT_STORAGE_OVERHEAD: u64 = 128;

/// Size of a balance account (SPL token account layout).
pub const BALANCE_ACCOUNT_LEN: usize = 165;

/// Storage-cost schedule. Accounts must hold `minimum_balance(len)`
/// lamports, paid on creation and refunded on close.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rent {
    pub lamports_per_byte_year: u64,
    pub exemption_threshold_years: u64,
}

impl Default for Rent {
    fn default() -> Self {
        Self {
            lamports_per_byte_year: 3480,
            exemption_threshold_years: 2,
        }
    }
}

impl Rent {
    pub fn minimum_balance(&self, data_len: usize) -> u64 {
        (ACCOUNT_STORAGE_OVERHEAD + data_len as u64)
            .saturating_mul(self.lamports_per_byte_year)
            .saturating_mul(self.exemption_threshold_years)
    }
}

/// An asset type (a mint).
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Asset {
    pub decimals: u8,
    /// Total units ever issued.
    pub supply: u64,
}

/// Balance of one asset, owned by one authority.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BalanceAccount {
    /// The only identity that can move funds out or close the account.
    pub owner: Address,
    pub asset: Address,
    pub amount: u64,
    /// Storage deposit held by the account.
    pub lamports: u64,
}

/// Opaque program-owned data.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordAccount {
    /// Program that created the record and alone may close it.
    pub owner: Address,
    #[cfg_attr(feature = "json", serde(with = "hex::serde"))]
    pub data: Vec<u8>,
    pub lamports: u64,
}

/// Asset-balance movement and balance-account lifecycle.
///
/// All mutations must be rolled back together with the enclosing
/// transaction if it fails.
pub trait TransferAdapter {
    fn rent(&self) -> &Rent;

    fn asset(&self, id: &Address) -> Option<&Asset>;

    fn balance_account(&self, account: &Address) -> Option<&BalanceAccount>;

    /// Native balance of an identity, used to pay storage deposits.
    fn lamports(&self, who: &Address) -> u64;

    /// Balance of `owner`'s associated account for `asset`, zero if absent.
    fn associated_balance(&self, owner: &Address, asset: &Address) -> u64 {
        derive::associated_balance_address(owner, asset)
            .ok()
            .and_then(|account| self.balance_account(&account))
            .map_or(0, |acc| acc.amount)
    }

    /// Open an empty balance account at `account`, charging `payer` the
    /// storage deposit.
    fn create_balance_account(
        &mut self,
        account: Address,
        owner: Address,
        asset: Address,
        payer: Address,
    ) -> Result<(), LedgerError>;

    /// Move `amount` of `asset`. The owner of `from` must be a signer.
    fn transfer(
        &mut self,
        from: Address,
        to: Address,
        asset: Address,
        amount: u64,
    ) -> Result<(), LedgerError>;

    /// Close an empty balance account and send its storage deposit to
    /// `rent_recipient`. The owner must be a signer.
    fn close_account(&mut self, account: Address, rent_recipient: Address)
        -> Result<(), LedgerError>;
}

/// Storage for records owned by the executing program.
pub trait RecordStore {
    fn record(&self, address: &Address) -> Option<&RecordAccount>;

    /// Create a record at `address`, which must be a signer (i.e. derived
    /// and signed for by the program); `payer` funds the storage deposit.
    fn create_record(
        &mut self,
        address: Address,
        data: Vec<u8>,
        payer: Address,
    ) -> Result<(), LedgerError>;

    /// Destroy a record owned by the executing program, refunding its
    /// storage deposit to `rent_recipient`.
    fn close_record(&mut self, address: Address, rent_recipient: Address)
        -> Result<(), LedgerError>;
}

/// Authorization context of the running transaction.
pub trait Signers {
    /// Id of the program being executed.
    fn program_id(&self) -> &Address;

    fn is_signer(&self, who: &Address) -> bool;

    /// Sign as the address `seeds` derive under the executing program id.
    /// This is the only way a key-less derived address becomes a signer.
    fn sign_with_seeds(&mut self, seeds: &[&[u8]]) -> Result<Address, LedgerError>;
}

/// Everything the escrow program runs against.
pub trait Ledger: TransferAdapter + RecordStore + Signers {}

impl<T: TransferAdapter + RecordStore + Signers + ?Sized> Ledger for T {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rent_matches_default_schedule() {
        let rent = Rent::default();
        assert_eq!(rent.minimum_balance(0), 890_880);
        assert_eq!(rent.minimum_balance(BALANCE_ACCOUNT_LEN), 2_039_280);
    }
}
