//! The escrow state machine: make, take and cancel.
//!
//! Each operation checks every precondition before issuing its first
//! effect, and must run inside one ledger transaction so that a failure in
//! a late step (a transfer, an account closure) discards the earlier ones.

#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::derive::{self, ESCROW_SEED};
use crate::error::{LedgerError, TermsError};
use crate::escrow::{Escrow, EscrowRecord, EscrowTerms};
use crate::identity::Address;
use crate::ledger::{Ledger, BALANCE_ACCOUNT_LEN};
use crate::{EscrowError, Result};

/// Default id of the escrow program, `4L3fe5D19tXjxTL5xXhbV9odunt3DDznbNerKcoC8YQP`
/// (same as the on-chain adapter).
pub const ESCROW_PROGRAM_ID: Address = Address::new([
    0x31, 0x74, 0x1c, 0x5f, 0x0b, 0x9e, 0x2a, 0x47, 0xd2, 0x61, 0x8c, 0x05, 0xe3, 0x9a, 0x16, 0x7b,
    0x44, 0xc8, 0x0f, 0x52, 0xa9, 0x3d, 0x76, 0xe1, 0x28, 0x9b, 0x5e, 0x03, 0xc7, 0x1a, 0x64, 0xf0,
]);

/// Arguments of [`EscrowProgram::make`].
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MakeArgs {
    pub seed: u64,
    #[cfg_attr(feature = "json", serde(flatten))]
    pub terms: EscrowTerms,
}

/// Arguments of [`EscrowProgram::take`]. The asset ids are what the taker
/// believes the escrow trades; a mismatch aborts the take.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TakeArgs {
    pub escrow: Address,
    pub asset_a: Address,
    pub asset_b: Address,
}

/// Result of a successful take.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub escrow: Address,
    pub maker: Address,
    pub taker: Address,
    /// Asset A moved from the vault to the taker.
    pub released: u64,
    /// Asset B moved from the taker to the maker.
    pub paid: u64,
}

/// Result of a successful cancel.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Refund {
    pub escrow: Address,
    pub maker: Address,
    /// Asset A returned from the vault to the maker.
    pub refunded: u64,
}

/// The escrow program, bound to the id it derives addresses under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EscrowProgram {
    pub program_id: Address,
}

impl Default for EscrowProgram {
    fn default() -> Self {
        Self::new(ESCROW_PROGRAM_ID)
    }
}

impl EscrowProgram {
    pub fn new(program_id: Address) -> Self {
        Self { program_id }
    }

    /// Derive where the escrow `(maker, seed)` and its vault live.
    pub fn locate(
        &self,
        maker: &Address,
        seed: u64,
        asset_a: &Address,
    ) -> Result<(Address, u8, Address)> {
        let (escrow, bump) = derive::escrow_address(&self.program_id, maker, seed)?;
        let vault = derive::associated_balance_address(&escrow, asset_a)?;
        Ok((escrow, bump, vault))
    }

    /// Lock `deposit` of asset A from the maker in a fresh vault and record
    /// the terms under which any taker may claim it.
    #[instrument(skip_all, fields(maker = %maker, seed = args.seed))]
    pub fn make<L: Ledger + ?Sized>(
        &self,
        ledger: &mut L,
        maker: &Address,
        args: MakeArgs,
    ) -> Result<Escrow> {
        let MakeArgs { seed, terms } = args;
        terms.validate().inspect_err(|e| warn!(%e, "rejected terms"))?;
        for asset in [terms.asset_a, terms.asset_b] {
            if ledger.asset(&asset).is_none() {
                return Err(TermsError::UnknownAsset(asset).into());
            }
        }
        require_signer(ledger, maker)?;

        let (address, bump, vault) = self.locate(maker, seed, &terms.asset_a)?;
        debug!(%address, bump, %vault, "derived escrow accounts");
        if ledger.record(&address).is_some() || ledger.balance_account(&vault).is_some() {
            warn!(%address, "escrow already exists");
            return Err(EscrowError::DuplicateEscrow(address));
        }

        let source = derive::associated_balance_address(maker, &terms.asset_a)?;
        require_balance(ledger, &source, terms.deposit)?;

        let record = EscrowRecord {
            seed,
            maker: *maker,
            asset_a: terms.asset_a,
            asset_b: terms.asset_b,
            amount_b_expected: terms.receive,
            amount_a_deposited: terms.deposit,
            bump,
        };
        let data = record
            .to_bytes()
            .map_err(|_| EscrowError::MalformedRecord(address))?;

        let rent = ledger.rent();
        let storage = rent
            .minimum_balance(data.len())
            .checked_add(rent.minimum_balance(BALANCE_ACCOUNT_LEN))
            .ok_or(LedgerError::Overflow)?;
        require_lamports(ledger, maker, storage)?;

        let seed_bytes = seed.to_le_bytes();
        let signer =
            ledger.sign_with_seeds(&[ESCROW_SEED, maker.as_ref(), &seed_bytes, &[bump]])?;
        debug_assert_eq!(signer, address);

        ledger.create_record(address, data, *maker)?;
        ledger.create_balance_account(vault, address, terms.asset_a, *maker)?;
        ledger.transfer(source, vault, terms.asset_a, terms.deposit)?;

        info!(%address, deposit = terms.deposit, receive = terms.receive, "escrow opened");
        Ok(Escrow::new(address, record)?)
    }

    /// Pay the escrow's asset B price to the maker and receive the whole
    /// vault, closing the escrow.
    #[instrument(skip_all, fields(taker = %taker, escrow = %args.escrow))]
    pub fn take<L: Ledger + ?Sized>(
        &self,
        ledger: &mut L,
        taker: &Address,
        args: TakeArgs,
    ) -> Result<Settlement> {
        let escrow = self.load(ledger, &args.escrow)?;
        let record = escrow.record;

        for (expected, supplied) in [
            (record.asset_a, args.asset_a),
            (record.asset_b, args.asset_b),
        ] {
            if expected != supplied {
                warn!(%expected, %supplied, "asset mismatch");
                return Err(EscrowError::AssetMismatch { expected, supplied });
            }
        }
        require_signer(ledger, taker)?;

        let locked = ledger
            .balance_account(&escrow.vault)
            .map_or(0, |vault| vault.amount);
        if locked != record.amount_a_deposited {
            warn!(expected = record.amount_a_deposited, actual = locked, "vault tampered");
            return Err(EscrowError::VaultBalanceMismatch {
                expected: record.amount_a_deposited,
                actual: locked,
            });
        }

        let taker_source_b = derive::associated_balance_address(taker, &record.asset_b)?;
        require_balance(ledger, &taker_source_b, record.amount_b_expected)?;

        let taker_dest_a = derive::associated_balance_address(taker, &record.asset_a)?;
        let maker_dest_b = derive::associated_balance_address(&record.maker, &record.asset_b)?;
        let mut missing = 0u64;
        for (account, owner, asset) in [
            (&taker_dest_a, taker, &record.asset_a),
            (&maker_dest_b, &record.maker, &record.asset_b),
        ] {
            if !destination_exists(ledger, account, owner, asset)? {
                missing += 1;
            }
        }
        require_lamports(
            ledger,
            taker,
            missing * ledger.rent().minimum_balance(BALANCE_ACCOUNT_LEN),
        )?;

        ensure_balance_account(ledger, taker_dest_a, taker, &record.asset_a, taker)?;
        ensure_balance_account(ledger, maker_dest_b, &record.maker, &record.asset_b, taker)?;

        ledger.transfer(
            taker_source_b,
            maker_dest_b,
            record.asset_b,
            record.amount_b_expected,
        )?;
        self.sign_as_escrow(ledger, &record)?;
        ledger.transfer(escrow.vault, taker_dest_a, record.asset_a, locked)?;
        self.close(ledger, &escrow)?;

        info!(
            released = locked,
            paid = record.amount_b_expected,
            "escrow taken"
        );
        Ok(Settlement {
            escrow: escrow.address,
            maker: record.maker,
            taker: *taker,
            released: locked,
            paid: record.amount_b_expected,
        })
    }

    /// Return the vault to the maker and close the escrow. Only the maker
    /// may cancel.
    #[instrument(skip_all, fields(caller = %caller, escrow = %address))]
    pub fn cancel<L: Ledger + ?Sized>(
        &self,
        ledger: &mut L,
        caller: &Address,
        address: &Address,
    ) -> Result<Refund> {
        let escrow = self.load(ledger, address)?;
        let record = escrow.record;

        if *caller != record.maker {
            warn!(maker = %record.maker, "cancel by non-maker");
            return Err(EscrowError::Unauthorized(*caller));
        }
        require_signer(ledger, caller)?;

        let maker_dest_a = derive::associated_balance_address(&record.maker, &record.asset_a)?;
        if !destination_exists(ledger, &maker_dest_a, &record.maker, &record.asset_a)? {
            require_lamports(
                ledger,
                caller,
                ledger.rent().minimum_balance(BALANCE_ACCOUNT_LEN),
            )?;
        }
        ensure_balance_account(ledger, maker_dest_a, &record.maker, &record.asset_a, caller)?;

        let locked = ledger
            .balance_account(&escrow.vault)
            .map_or(0, |vault| vault.amount);
        self.sign_as_escrow(ledger, &record)?;
        ledger.transfer(escrow.vault, maker_dest_a, record.asset_a, locked)?;
        self.close(ledger, &escrow)?;

        info!(refunded = locked, "escrow cancelled");
        Ok(Refund {
            escrow: escrow.address,
            maker: record.maker,
            refunded: locked,
        })
    }

    /// Read and verify the escrow at `address`.
    pub fn load<L: Ledger + ?Sized>(&self, ledger: &L, address: &Address) -> Result<Escrow> {
        let account = ledger.record(address).ok_or_else(|| {
            warn!(%address, "no escrow at address");
            EscrowError::EscrowNotFound(*address)
        })?;
        if account.owner != self.program_id {
            return Err(EscrowError::MalformedRecord(*address));
        }
        let record = EscrowRecord::from_bytes(&account.data)
            .map_err(|_| EscrowError::MalformedRecord(*address))?;
        if record.address(&self.program_id).ok() != Some(*address) {
            return Err(EscrowError::MalformedRecord(*address));
        }

        let escrow = Escrow::new(*address, record)?;
        if ledger.balance_account(&escrow.vault).is_none() {
            // A record without its vault breaks the pairing invariant.
            return Err(EscrowError::MalformedRecord(*address));
        }
        Ok(escrow)
    }

    fn sign_as_escrow<L: Ledger + ?Sized>(
        &self,
        ledger: &mut L,
        record: &EscrowRecord,
    ) -> Result<()> {
        let seed = record.seed.to_le_bytes();
        ledger.sign_with_seeds(&[ESCROW_SEED, record.maker.as_ref(), &seed, &[record.bump]])?;
        Ok(())
    }

    /// Close the emptied vault and the record, storage deposits to the maker.
    fn close<L: Ledger + ?Sized>(&self, ledger: &mut L, escrow: &Escrow) -> Result<()> {
        ledger.close_account(escrow.vault, escrow.record.maker)?;
        ledger.close_record(escrow.address, escrow.record.maker)?;
        Ok(())
    }
}

fn require_signer<L: Ledger + ?Sized>(ledger: &L, who: &Address) -> Result<()> {
    if ledger.is_signer(who) {
        Ok(())
    } else {
        warn!(%who, "missing signature");
        Err(EscrowError::MissingSignature(*who))
    }
}

fn require_balance<L: Ledger + ?Sized>(
    ledger: &L,
    account: &Address,
    required: u64,
) -> Result<()> {
    let available = ledger.balance_account(account).map_or(0, |a| a.amount);
    if available < required {
        warn!(required, available, "insufficient funds");
        return Err(EscrowError::InsufficientFunds {
            required,
            available,
        });
    }
    Ok(())
}

fn require_lamports<L: Ledger + ?Sized>(
    ledger: &L,
    who: &Address,
    required: u64,
) -> Result<()> {
    let available = ledger.lamports(who);
    if available < required {
        warn!(required, available, "insufficient lamports for storage");
        return Err(EscrowError::InsufficientFunds {
            required,
            available,
        });
    }
    Ok(())
}

/// Whether `owner`'s associated `account` for `asset` already exists. An
/// account that lives there under another owner or asset is rejected.
fn destination_exists<L: Ledger + ?Sized>(
    ledger: &L,
    account: &Address,
    owner: &Address,
    asset: &Address,
) -> Result<bool> {
    match ledger.balance_account(account) {
        None => Ok(false),
        Some(held) if held.owner == *owner && held.asset == *asset => Ok(true),
        Some(held) => {
            warn!(%account, held_by = %held.owner, "foreign account at associated address");
            Err(EscrowError::ForeignAccount {
                account: *account,
                owner: *owner,
                asset: *asset,
            })
        }
    }
}

/// Create `owner`'s associated account for `asset` unless it already exists.
fn ensure_balance_account<L: Ledger + ?Sized>(
    ledger: &mut L,
    account: Address,
    owner: &Address,
    asset: &Address,
    payer: &Address,
) -> Result<()> {
    if ledger.balance_account(&account).is_none() {
        ledger.create_balance_account(account, *owner, *asset, *payer)?;
    }
    Ok(())
}
