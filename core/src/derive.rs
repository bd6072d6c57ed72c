//! Deterministic, key-less address derivation.
//!
//! An address is `sha256(seeds.. || program_id || "ProgramDerivedAddress")`,
//! accepted only if the digest is *not* a valid compressed ed25519 point.
//! [`find_program_address`] searches a one-byte `bump` seed, from 255
//! downwards, until that holds. The scheme is byte-for-byte the one
//! Solana uses for program-derived addresses.

use ed25519_dalek::VerifyingKey;
use sha2::{Digest, Sha256};
use tracing::trace;

use crate::error::DerivationError;
use crate::identity::Address;

pub const MAX_SEEDS: usize = 16;
pub const MAX_SEED_LEN: usize = 32;
const PDA_MARKER: &[u8] = b"ProgramDerivedAddress";

/// Seed prefix of escrow record addresses.
pub const ESCROW_SEED: &[u8] = b"escrow";

/// Program that owns all balance accounts (SPL Token).
pub const TOKEN_PROGRAM_ID: Address = Address::new([
    0x06, 0xdd, 0xf6, 0xe1, 0xd7, 0x65, 0xa1, 0x93, 0xd9, 0xcb, 0xe1, 0x46, 0xce, 0xeb, 0x79, 0xac,
    0x1c, 0xb4, 0x85, 0xed, 0x5f, 0x5b, 0x37, 0x91, 0x3a, 0x8c, 0xf5, 0x85, 0x7e, 0xff, 0x00, 0xa9,
]);

/// Program under which associated balance accounts are derived.
pub const ASSOCIATED_BALANCE_PROGRAM_ID: Address = Address::new([
    0x8c, 0x97, 0x25, 0x8f, 0x4e, 0x24, 0x89, 0xf1, 0xbb, 0x3d, 0x10, 0x29, 0x14, 0x8e, 0x0d, 0x83,
    0x0b, 0x5a, 0x13, 0x99, 0xda, 0xff, 0x10, 0x84, 0x04, 0x8e, 0x7b, 0xd8, 0xdb, 0xe9, 0xf8, 0x59,
]);

/// Whether `bytes` decompresses to an ed25519 point, i.e. could be a
/// public key somebody holds the secret for.
pub fn is_on_curve(bytes: &[u8; 32]) -> bool {
    VerifyingKey::from_bytes(bytes).is_ok()
}

/// Hash `seeds` under `program_id`, rejecting on-curve results.
pub fn create_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<Address, DerivationError> {
    if seeds.len() > MAX_SEEDS {
        return Err(DerivationError::TooManySeeds(seeds.len()));
    }
    if let Some(seed) = seeds.iter().find(|s| s.len() > MAX_SEED_LEN) {
        return Err(DerivationError::SeedTooLong(seed.len()));
    }

    let mut hasher = Sha256::new();
    for seed in seeds {
        hasher.update(seed);
    }
    hasher.update(program_id);
    hasher.update(PDA_MARKER);
    let hash: [u8; 32] = hasher.finalize().into();

    if is_on_curve(&hash) {
        return Err(DerivationError::OnCurve);
    }
    Ok(Address::new(hash))
}

/// Find the first bump (counting down from 255) whose derived address is off-curve.
pub fn find_program_address(
    seeds: &[&[u8]],
    program_id: &Address,
) -> Result<(Address, u8), DerivationError> {
    // The bump occupies one seed slot.
    if seeds.len() >= MAX_SEEDS {
        return Err(DerivationError::TooManySeeds(seeds.len() + 1));
    }

    for bump in (0..=u8::MAX).rev() {
        let bump_seed = [bump];
        let mut with_bump: Vec<&[u8]> = seeds.to_vec();
        with_bump.push(&bump_seed);

        match create_program_address(&with_bump, program_id) {
            Ok(address) => {
                trace!(%address, bump, "found off-curve address");
                return Ok((address, bump));
            }
            Err(DerivationError::OnCurve) => continue,
            Err(e) => return Err(e),
        }
    }
    Err(DerivationError::NoViableBump)
}

/// Address of the escrow record for `(maker, seed)`.
pub fn escrow_address(
    program_id: &Address,
    maker: &Address,
    seed: u64,
) -> Result<(Address, u8), DerivationError> {
    find_program_address(
        &[ESCROW_SEED, maker.as_ref(), &seed.to_le_bytes()],
        program_id,
    )
}

/// Re-derive an escrow address from a stored bump without searching.
pub fn escrow_address_with_bump(
    program_id: &Address,
    maker: &Address,
    seed: u64,
    bump: u8,
) -> Result<Address, DerivationError> {
    create_program_address(
        &[ESCROW_SEED, maker.as_ref(), &seed.to_le_bytes(), &[bump]],
        program_id,
    )
}

/// Canonical balance account of `owner` for `asset`.
///
/// The escrow vault is `associated_balance_address(escrow, asset_a)`, which
/// ties every vault to exactly one escrow record.
pub fn associated_balance_address(
    owner: &Address,
    asset: &Address,
) -> Result<Address, DerivationError> {
    find_program_address(
        &[owner.as_ref(), TOKEN_PROGRAM_ID.as_ref(), asset.as_ref()],
        &ASSOCIATED_BALANCE_PROGRAM_ID,
    )
    .map(|(address, _)| address)
}
