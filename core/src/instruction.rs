//! Signed instructions and their dispatch to the escrow program.
//!
//! A [`SignedInstruction`] carries the ed25519 signature of the identity
//! invoking it over `program_id || bincode(instruction)`. The [`Processor`]
//! verifies that signature and runs the instruction as one ledger
//! transaction in which the verified identity is the only outside signer.

use bincode::{Decode, Encode};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
#[cfg(feature = "json")]
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::escrow::{Escrow, EscrowTerms};
use crate::identity::Address;
use crate::ledger::memory::MemoryLedger;
use crate::program::{EscrowProgram, MakeArgs, Refund, Settlement, TakeArgs};
use crate::{EscrowError, Result};

/// The three escrow operations as they travel over the wire.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "json", serde(tag = "op", rename_all = "snake_case"))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum Instruction {
    Make {
        seed: u64,
        deposit: u64,
        receive: u64,
        asset_a: Address,
        asset_b: Address,
    },
    Take {
        escrow: Address,
        asset_a: Address,
        asset_b: Address,
    },
    Cancel {
        escrow: Address,
    },
}

impl Instruction {
    pub fn make(seed: u64, terms: EscrowTerms) -> Self {
        Self::Make {
            seed,
            deposit: terms.deposit,
            receive: terms.receive,
            asset_a: terms.asset_a,
            asset_b: terms.asset_b,
        }
    }

    fn message(&self, program_id: &Address) -> Result<Vec<u8>> {
        let body = bincode::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| EscrowError::Encoding(e.to_string()))?;
        let mut msg = Vec::with_capacity(Address::LEN + body.len());
        msg.extend_from_slice(program_id.as_ref());
        msg.extend(body);
        Ok(msg)
    }
}

/// An instruction bound to one program and signed by its invoker.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedInstruction {
    pub program_id: Address,
    pub instruction: Instruction,
    pub signer: Address,
    #[cfg_attr(feature = "json", serde(with = "hex::serde"))]
    pub signature: Vec<u8>,
}

impl SignedInstruction {
    pub fn sign(key: &SigningKey, program_id: Address, instruction: Instruction) -> Result<Self> {
        let signature = key.sign(&instruction.message(&program_id)?);
        Ok(Self {
            program_id,
            instruction,
            signer: Address::from(&key.verifying_key()),
            signature: signature.to_bytes().to_vec(),
        })
    }

    /// Check the signature and return the identity that produced it.
    pub fn verify(&self) -> Result<Address> {
        let key = VerifyingKey::from_bytes(&self.signer.to_bytes())
            .map_err(|_| EscrowError::InvalidSignature)?;
        let signature =
            Signature::from_slice(&self.signature).map_err(|_| EscrowError::InvalidSignature)?;
        key.verify(&self.instruction.message(&self.program_id)?, &signature)
            .map_err(|_| EscrowError::InvalidSignature)?;
        Ok(self.signer)
    }
}

/// What a processed instruction did.
#[cfg_attr(feature = "json", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Made(Escrow),
    Taken(Settlement),
    Cancelled(Refund),
}

/// Runs signed instructions against a [`MemoryLedger`].
#[derive(Debug)]
pub struct Processor<'a> {
    ledger: &'a MemoryLedger,
    program: EscrowProgram,
}

impl<'a> Processor<'a> {
    pub fn new(ledger: &'a MemoryLedger, program: EscrowProgram) -> Self {
        Self { ledger, program }
    }

    /// Verify `tx` and apply it atomically. On error the ledger is unchanged.
    #[instrument(skip_all, fields(signer = %tx.signer))]
    pub fn process(&self, tx: &SignedInstruction) -> Result<Outcome> {
        if tx.program_id != self.program.program_id {
            warn!(program = %tx.program_id, "instruction signed for another program");
            return Err(EscrowError::InvalidSignature);
        }
        let signer = tx.verify()?;
        debug!(instruction = ?tx.instruction, "signature verified");

        let program = self.program;
        self.ledger
            .execute(program.program_id, [signer], |ledger| match tx.instruction {
                Instruction::Make {
                    seed,
                    deposit,
                    receive,
                    asset_a,
                    asset_b,
                } => {
                    let terms = EscrowTerms {
                        asset_a,
                        asset_b,
                        deposit,
                        receive,
                    };
                    program
                        .make(ledger, &signer, MakeArgs { seed, terms })
                        .map(Outcome::Made)
                }
                Instruction::Take {
                    escrow,
                    asset_a,
                    asset_b,
                } => program
                    .take(
                        ledger,
                        &signer,
                        TakeArgs {
                            escrow,
                            asset_a,
                            asset_b,
                        },
                    )
                    .map(Outcome::Taken),
                Instruction::Cancel { escrow } => program
                    .cancel(ledger, &signer, &escrow)
                    .map(Outcome::Cancelled),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u8) -> SigningKey {
        SigningKey::from_bytes(&[n; 32])
    }

    fn cancel() -> Instruction {
        Instruction::Cancel {
            escrow: Address::new([9u8; 32]),
        }
    }

    #[test]
    fn signature_identifies_signer() {
        let program = Address::new([1u8; 32]);
        let tx = SignedInstruction::sign(&key(7), program, cancel()).unwrap();
        assert_eq!(tx.verify().unwrap(), Address::from(&key(7).verifying_key()));
    }

    #[test]
    fn tampering_breaks_signature() {
        let program = Address::new([1u8; 32]);
        let tx = SignedInstruction::sign(&key(7), program, cancel()).unwrap();

        let mut forged = tx.clone();
        forged.instruction = Instruction::Cancel {
            escrow: Address::new([8u8; 32]),
        };
        assert_eq!(forged.verify(), Err(EscrowError::InvalidSignature));

        let mut impersonated = tx.clone();
        impersonated.signer = Address::from(&key(8).verifying_key());
        assert_eq!(impersonated.verify(), Err(EscrowError::InvalidSignature));

        let mut replayed = tx;
        replayed.program_id = Address::new([2u8; 32]);
        assert_eq!(replayed.verify(), Err(EscrowError::InvalidSignature));
    }

    #[test]
    fn truncated_signature_rejected() {
        let mut tx = SignedInstruction::sign(&key(3), Address::new([1u8; 32]), cancel()).unwrap();
        tx.signature.truncate(10);
        assert_eq!(tx.verify(), Err(EscrowError::InvalidSignature));
    }
}
