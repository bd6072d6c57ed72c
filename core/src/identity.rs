//! 32-byte addresses for parties, assets, programs and derived accounts.

use std::fmt;
use std::str::FromStr;

use bincode::{Decode, Encode};
#[cfg(feature = "json")]
use serde_with::{DeserializeFromStr, SerializeDisplay};

use crate::error::IdentityError;

/// Identifier of anything that lives on the ledger.
///
/// Signing parties use their ed25519 public key as their address.
/// Addresses produced by [`crate::derive`] are guaranteed *not* to be
/// valid public keys, so nobody holds a private key for them.
///
/// Displays as base58; parses from base58 or `0x`-prefixed hex.
#[cfg_attr(feature = "json", derive(SerializeDisplay, DeserializeFromStr))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Encode, Decode)]
pub struct Address(pub [u8; 32]);

impl Address {
    pub const LEN: usize = 32;

    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(&self) -> [u8; 32] {
        self.0
    }

    /// Construct from an arbitrary slice, which must be exactly 32 bytes.
    pub fn try_from_slice(bytes: &[u8]) -> Result<Self, IdentityError> {
        let arr: [u8; 32] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidLength(bytes.len()))?;
        Ok(Self(arr))
    }
}

impl AsRef<[u8]> for Address {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl From<&ed25519_dalek::VerifyingKey> for Address {
    fn from(key: &ed25519_dalek::VerifyingKey) -> Self {
        Self(key.to_bytes())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl FromStr for Address {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(IdentityError::Empty);
        }
        let bytes = match s.strip_prefix("0x") {
            Some(h) => hex::decode(h)?,
            None => bs58::decode(s).into_vec()?,
        };
        Self::try_from_slice(&bytes)
    }
}
