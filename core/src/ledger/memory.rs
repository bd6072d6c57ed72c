//! In-memory reference ledger with all-or-nothing transactions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{PoisonError, RwLock};

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{
    Asset, BalanceAccount, RecordAccount, RecordStore, Rent, Signers, TransferAdapter,
    BALANCE_ACCOUNT_LEN,
};
use crate::derive;
use crate::error::LedgerError;
use crate::escrow::{EscrowRecord, EscrowState};
use crate::identity::Address;

/// Every account and native balance on the ledger.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LedgerState {
    pub rent: Rent,
    lamports: BTreeMap<Address, u64>,
    assets: BTreeMap<Address, Asset>,
    balances: BTreeMap<Address, BalanceAccount>,
    records: BTreeMap<Address, RecordAccount>,
}

impl LedgerState {
    pub fn new(rent: Rent) -> Self {
        Self {
            rent,
            ..Default::default()
        }
    }

    fn exists(&self, address: &Address) -> bool {
        self.balances.contains_key(address) || self.records.contains_key(address)
    }

    fn debit_lamports(&mut self, who: &Address, amount: u64) -> Result<(), LedgerError> {
        let available = self.lamports.get(who).copied().unwrap_or(0);
        let rest = available
            .checked_sub(amount)
            .ok_or(LedgerError::InsufficientLamports {
                required: amount,
                available,
            })?;
        self.lamports.insert(*who, rest);
        Ok(())
    }

    fn credit_lamports(&mut self, who: &Address, amount: u64) -> Result<(), LedgerError> {
        let entry = self.lamports.entry(*who).or_insert(0);
        *entry = entry.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }
}

/// A ledger held in memory behind a lock.
///
/// [`MemoryLedger::execute`] is the unit of work: it holds the write lock
/// for the whole transaction, runs it against a private copy of the state
/// and publishes the copy only on success. Concurrent transactions are
/// therefore serialized and a failed one leaves no trace.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    state: RwLock<LedgerState>,
}

impl MemoryLedger {
    pub fn new(rent: Rent) -> Self {
        Self::from_state(LedgerState::new(rent))
    }

    pub fn from_state(state: LedgerState) -> Self {
        Self {
            state: RwLock::new(state),
        }
    }

    /// Run `f` as one atomic transaction executing `program_id`, with
    /// `signers` as the identities that authorized it.
    pub fn execute<T, E, F>(
        &self,
        program_id: Address,
        signers: impl IntoIterator<Item = Address>,
        f: F,
    ) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction) -> Result<T, E>,
    {
        // A panicking transaction never published its copy, so a poisoned
        // lock still guards consistent state.
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        let mut tx = Transaction {
            program_id,
            signers: signers.into_iter().collect(),
            state: state.clone(),
        };
        match f(&mut tx) {
            Ok(out) => {
                *state = tx.state;
                debug!(program = %program_id, "transaction committed");
                Ok(out)
            }
            Err(e) => {
                debug!(program = %program_id, "transaction rolled back");
                Err(e)
            }
        }
    }

    fn read<R>(&self, f: impl FnOnce(&LedgerState) -> R) -> R {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        f(&state)
    }

    fn write<R>(&self, f: impl FnOnce(&mut LedgerState) -> R) -> R {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Copy of the full state, e.g. for persistence.
    pub fn snapshot(&self) -> LedgerState {
        self.read(Clone::clone)
    }

    pub fn rent(&self) -> Rent {
        self.read(|s| s.rent)
    }

    /// Credit native lamports out of thin air.
    pub fn airdrop(&self, to: &Address, lamports: u64) -> Result<(), LedgerError> {
        self.write(|s| s.credit_lamports(to, lamports))
    }

    /// Register a new asset type with zero supply.
    pub fn create_asset(&self, id: Address, decimals: u8) -> Result<(), LedgerError> {
        self.write(|s| {
            if s.assets.contains_key(&id) {
                return Err(LedgerError::AccountAlreadyExists(id));
            }
            s.assets.insert(id, Asset { decimals, supply: 0 });
            Ok(())
        })
    }

    /// Issue `amount` of `asset` into `owner`'s associated balance account,
    /// creating it (paid by `owner`) if needed. Returns the account address.
    pub fn mint_to(
        &self,
        owner: &Address,
        asset: &Address,
        amount: u64,
    ) -> Result<Address, LedgerError> {
        let account = derive::associated_balance_address(owner, asset)?;
        self.write(|s| {
            let mut next = s.clone();
            let supply = next
                .assets
                .get_mut(asset)
                .ok_or(LedgerError::AssetNotFound(*asset))?;
            supply.supply = supply
                .supply
                .checked_add(amount)
                .ok_or(LedgerError::Overflow)?;

            if !next.balances.contains_key(&account) {
                let deposit = next.rent.minimum_balance(BALANCE_ACCOUNT_LEN);
                next.debit_lamports(owner, deposit)?;
                next.balances.insert(
                    account,
                    BalanceAccount {
                        owner: *owner,
                        asset: *asset,
                        amount: 0,
                        lamports: deposit,
                    },
                );
            }
            let held = next
                .balances
                .get_mut(&account)
                .ok_or(LedgerError::AccountNotFound(account))?;
            held.amount = held.amount.checked_add(amount).ok_or(LedgerError::Overflow)?;

            *s = next;
            Ok(account)
        })
    }

    pub fn lamports_of(&self, who: &Address) -> u64 {
        self.read(|s| s.lamports.get(who).copied().unwrap_or(0))
    }

    /// Units of `asset` in `owner`'s associated account.
    pub fn balance_of(&self, owner: &Address, asset: &Address) -> u64 {
        let Ok(account) = derive::associated_balance_address(owner, asset) else {
            return 0;
        };
        self.read(|s| s.balances.get(&account).map_or(0, |b| b.amount))
    }

    pub fn balance_account(&self, account: &Address) -> Option<BalanceAccount> {
        self.read(|s| s.balances.get(account).copied())
    }

    pub fn account_exists(&self, address: &Address) -> bool {
        self.read(|s| s.exists(address))
    }

    /// Decoded escrow record at `address`, if `program_id` keeps one open there.
    pub fn escrow(&self, program_id: &Address, address: &Address) -> Option<EscrowRecord> {
        self.read(|s| {
            s.records
                .get(address)
                .filter(|r| r.owner == *program_id)
                .and_then(|r| EscrowRecord::from_bytes(&r.data).ok())
        })
    }

    pub fn escrow_state(&self, program_id: &Address, address: &Address) -> EscrowState {
        match self.escrow(program_id, address) {
            Some(_) => EscrowState::Open,
            None => EscrowState::Closed,
        }
    }

    pub fn total_supply(&self, asset: &Address) -> u64 {
        self.read(|s| s.assets.get(asset).map_or(0, |a| a.supply))
    }

    /// Sum of `asset` across every balance account.
    pub fn circulating(&self, asset: &Address) -> u128 {
        self.read(|s| {
            s.balances
                .values()
                .filter(|b| &b.asset == asset)
                .map(|b| b.amount as u128)
                .sum()
        })
    }

    /// Native lamports plus every storage deposit held by accounts.
    pub fn total_lamports(&self) -> u128 {
        self.read(|s| {
            let native: u128 = s.lamports.values().map(|l| *l as u128).sum();
            let balances: u128 = s.balances.values().map(|b| b.lamports as u128).sum();
            let records: u128 = s.records.values().map(|r| r.lamports as u128).sum();
            native + balances + records
        })
    }
}

/// A transaction in flight: a private copy of the state plus who signed.
#[derive(Debug)]
pub struct Transaction {
    program_id: Address,
    signers: BTreeSet<Address>,
    state: LedgerState,
}

impl Transaction {
    fn require_signer(&self, who: &Address) -> Result<(), LedgerError> {
        if self.signers.contains(who) {
            Ok(())
        } else {
            Err(LedgerError::MissingAuthority(*who))
        }
    }
}

impl TransferAdapter for Transaction {
    fn rent(&self) -> &Rent {
        &self.state.rent
    }

    fn asset(&self, id: &Address) -> Option<&Asset> {
        self.state.assets.get(id)
    }

    fn balance_account(&self, account: &Address) -> Option<&BalanceAccount> {
        self.state.balances.get(account)
    }

    fn lamports(&self, who: &Address) -> u64 {
        self.state.lamports.get(who).copied().unwrap_or(0)
    }

    fn create_balance_account(
        &mut self,
        account: Address,
        owner: Address,
        asset: Address,
        payer: Address,
    ) -> Result<(), LedgerError> {
        if self.state.exists(&account) {
            return Err(LedgerError::AccountAlreadyExists(account));
        }
        if !self.state.assets.contains_key(&asset) {
            return Err(LedgerError::AssetNotFound(asset));
        }
        self.require_signer(&payer)?;

        let deposit = self.state.rent.minimum_balance(BALANCE_ACCOUNT_LEN);
        self.state.debit_lamports(&payer, deposit)?;
        self.state.balances.insert(
            account,
            BalanceAccount {
                owner,
                asset,
                amount: 0,
                lamports: deposit,
            },
        );
        trace!(%account, %owner, %asset, "balance account created");
        Ok(())
    }

    fn transfer(
        &mut self,
        from: Address,
        to: Address,
        asset: Address,
        amount: u64,
    ) -> Result<(), LedgerError> {
        let source = *self
            .state
            .balances
            .get(&from)
            .ok_or(LedgerError::AccountNotFound(from))?;
        let dest = *self
            .state
            .balances
            .get(&to)
            .ok_or(LedgerError::AccountNotFound(to))?;

        for (account, held) in [(from, source.asset), (to, dest.asset)] {
            if held != asset {
                return Err(LedgerError::AssetMismatch {
                    account,
                    held,
                    requested: asset,
                });
            }
        }
        self.require_signer(&source.owner)?;
        if source.amount < amount {
            return Err(LedgerError::InsufficientFunds {
                required: amount,
                available: source.amount,
            });
        }
        if from == to {
            return Ok(());
        }
        let credited = dest.amount.checked_add(amount).ok_or(LedgerError::Overflow)?;

        if let Some(src) = self.state.balances.get_mut(&from) {
            src.amount -= amount;
        }
        if let Some(dst) = self.state.balances.get_mut(&to) {
            dst.amount = credited;
        }
        trace!(%from, %to, %asset, amount, "transferred");
        Ok(())
    }

    fn close_account(
        &mut self,
        account: Address,
        rent_recipient: Address,
    ) -> Result<(), LedgerError> {
        let held = *self
            .state
            .balances
            .get(&account)
            .ok_or(LedgerError::AccountNotFound(account))?;
        self.require_signer(&held.owner)?;
        if held.amount != 0 {
            return Err(LedgerError::NonZeroBalance(account));
        }
        self.state.balances.remove(&account);
        self.state.credit_lamports(&rent_recipient, held.lamports)?;
        trace!(%account, %rent_recipient, "balance account closed");
        Ok(())
    }
}

impl RecordStore for Transaction {
    fn record(&self, address: &Address) -> Option<&RecordAccount> {
        self.state.records.get(address)
    }

    fn create_record(
        &mut self,
        address: Address,
        data: Vec<u8>,
        payer: Address,
    ) -> Result<(), LedgerError> {
        if self.state.exists(&address) {
            return Err(LedgerError::AccountAlreadyExists(address));
        }
        self.require_signer(&address)?;
        self.require_signer(&payer)?;

        let deposit = self.state.rent.minimum_balance(data.len());
        self.state.debit_lamports(&payer, deposit)?;
        self.state.records.insert(
            address,
            RecordAccount {
                owner: self.program_id,
                data,
                lamports: deposit,
            },
        );
        trace!(%address, "record created");
        Ok(())
    }

    fn close_record(
        &mut self,
        address: Address,
        rent_recipient: Address,
    ) -> Result<(), LedgerError> {
        let record = self
            .state
            .records
            .get(&address)
            .ok_or(LedgerError::AccountNotFound(address))?;
        if record.owner != self.program_id {
            return Err(LedgerError::MissingAuthority(record.owner));
        }
        let lamports = record.lamports;
        self.state.records.remove(&address);
        self.state.credit_lamports(&rent_recipient, lamports)?;
        trace!(%address, %rent_recipient, "record closed");
        Ok(())
    }
}

impl Signers for Transaction {
    fn program_id(&self) -> &Address {
        &self.program_id
    }

    fn is_signer(&self, who: &Address) -> bool {
        self.signers.contains(who)
    }

    fn sign_with_seeds(&mut self, seeds: &[&[u8]]) -> Result<Address, LedgerError> {
        let address = derive::create_program_address(seeds, &self.program_id)?;
        self.signers.insert(address);
        Ok(address)
    }
}
