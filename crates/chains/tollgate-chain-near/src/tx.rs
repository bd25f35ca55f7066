//! Borsh transaction model for the subset of NEAR this scheme touches.
//!
//! Enum discriminants follow nearcore's Borsh layout; `Action` in
//! particular pins `FunctionCall` at 2, `Transfer` at 3, and `Delegate`
//! at 8.

use borsh::{BorshDeserialize, BorshSerialize};
use sha2::{Digest, Sha256};

/// A NEAR account id.
pub type AccountId = String;

/// NEP-461 message discriminants.
const NEP366_SIGNABLE_TAG: u32 = (1 << 30) + 366;
/// NEP-413 off-chain message tag.
const NEP413_SIGNABLE_TAG: u32 = (1 << 31) + 413;

/// A public key with its curve tag.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum PublicKey {
    /// Discriminant 0: Ed25519.
    Ed25519([u8; 32]),
    /// Discriminant 1: secp256k1 (accepted on the wire, never signed with).
    Secp256k1([u8; 64]),
}

/// A signature with its curve tag.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Signature {
    /// Discriminant 0: Ed25519.
    Ed25519([u8; 64]),
    /// Discriminant 1: secp256k1.
    Secp256k1([u8; 65]),
}

/// A function call action.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct FunctionCallAction {
    /// Contract method.
    pub method_name: String,
    /// JSON arguments.
    pub args: Vec<u8>,
    /// Prepaid gas.
    pub gas: u64,
    /// Attached deposit in yoctoNEAR.
    pub deposit: u128,
}

/// Transaction actions, discriminants per nearcore.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum Action {
    /// 0
    CreateAccount,
    /// 1
    DeployContract {
        /// Contract code.
        code: Vec<u8>,
    },
    /// 2
    FunctionCall(Box<FunctionCallAction>),
    /// 3
    Transfer {
        /// Amount in yoctoNEAR.
        deposit: u128,
    },
    /// 4 (unused here)
    Stake {
        /// Stake amount.
        stake: u128,
        /// Validator key.
        public_key: PublicKey,
    },
    /// 5 (unused here)
    AddKey {
        /// Raw bytes, uninterpreted.
        raw: Vec<u8>,
    },
    /// 6 (unused here)
    DeleteKey {
        /// Key to delete.
        public_key: PublicKey,
    },
    /// 7 (unused here)
    DeleteAccount {
        /// Beneficiary account.
        beneficiary_id: AccountId,
    },
    /// 8
    Delegate(Box<SignedDelegateAction>),
}

/// Actions a delegate action may carry (everything but nested delegation).
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct NonDelegateAction(pub Action);

/// NEP-366 delegate action: what the payer authorizes a relayer to submit.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct DelegateAction {
    /// The delegating account (the payer).
    pub sender_id: AccountId,
    /// The contract the actions run on.
    pub receiver_id: AccountId,
    /// The delegated actions.
    pub actions: Vec<NonDelegateAction>,
    /// Must exceed the access key's current nonce.
    pub nonce: u64,
    /// Expiry, as a block height.
    pub max_block_height: u64,
    /// The delegating access key.
    pub public_key: PublicKey,
}

/// A delegate action plus the payer's signature over it.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedDelegateAction {
    /// The signed-over action.
    pub delegate_action: DelegateAction,
    /// Signature over the NEP-461 signable form.
    pub signature: Signature,
}

/// A NEAR transaction.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Transaction {
    /// The signing account (the relayer here).
    pub signer_id: AccountId,
    /// The signing key.
    pub public_key: PublicKey,
    /// Access key nonce.
    pub nonce: u64,
    /// The receiving account.
    pub receiver_id: AccountId,
    /// A recent block hash.
    pub block_hash: [u8; 32],
    /// The actions to run.
    pub actions: Vec<Action>,
}

/// A transaction plus its signature, ready for broadcast.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct SignedTransaction {
    /// The signed-over transaction.
    pub transaction: Transaction,
    /// Signature over `sha256(borsh(transaction))`.
    pub signature: Signature,
}

/// NEP-413 off-chain message payload.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Nep413Payload {
    /// Human-readable message.
    pub message: String,
    /// 32-byte anti-replay nonce.
    pub nonce: [u8; 32],
    /// The intended recipient of the message.
    pub recipient: String,
    /// Optional wallet callback URL.
    pub callback_url: Option<String>,
}

/// The digest a NEP-413 signer actually signs.
pub fn nep413_signing_digest(payload: &Nep413Payload) -> Result<[u8; 32], borsh::io::Error> {
    let mut bytes = borsh::to_vec(&NEP413_SIGNABLE_TAG)?;
    bytes.extend(borsh::to_vec(payload)?);
    Ok(Sha256::digest(&bytes).into())
}

/// The digest a NEP-366 delegate-action signer actually signs.
pub fn delegate_action_signing_digest(
    action: &DelegateAction,
) -> Result<[u8; 32], borsh::io::Error> {
    let mut bytes = borsh::to_vec(&NEP366_SIGNABLE_TAG)?;
    bytes.extend(borsh::to_vec(action)?);
    Ok(Sha256::digest(&bytes).into())
}

/// The digest signed over a full transaction.
pub fn transaction_signing_digest(tx: &Transaction) -> Result<[u8; 32], borsh::io::Error> {
    let bytes = borsh::to_vec(tx)?;
    Ok(Sha256::digest(&bytes).into())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delegate_action() -> DelegateAction {
        DelegateAction {
            sender_id: "alice.near".to_string(),
            receiver_id: "usdc.near".to_string(),
            actions: vec![NonDelegateAction(Action::FunctionCall(Box::new(
                FunctionCallAction {
                    method_name: "ft_transfer".to_string(),
                    args: br#"{"receiver_id":"bob.near","amount":"1000"}"#.to_vec(),
                    gas: 30_000_000_000_000,
                    deposit: 1,
                },
            )))],
            nonce: 42,
            max_block_height: 100_000_000,
            public_key: PublicKey::Ed25519([7u8; 32]),
        }
    }

    #[test]
    fn delegate_action_borsh_roundtrip() {
        let action = delegate_action();
        let bytes = borsh::to_vec(&action).unwrap();
        let back: DelegateAction = borsh::from_slice(&bytes).unwrap();
        assert_eq!(action, back);
    }

    #[test]
    fn action_discriminants_are_pinned() {
        // FunctionCall must encode with discriminant 2, Transfer with 3,
        // Delegate with 8.
        let function_call = Action::FunctionCall(Box::new(FunctionCallAction {
            method_name: "f".to_string(),
            args: vec![],
            gas: 0,
            deposit: 0,
        }));
        assert_eq!(borsh::to_vec(&function_call).unwrap()[0], 2);

        let transfer = Action::Transfer { deposit: 1 };
        assert_eq!(borsh::to_vec(&transfer).unwrap()[0], 3);

        let delegate = Action::Delegate(Box::new(SignedDelegateAction {
            delegate_action: delegate_action(),
            signature: Signature::Ed25519([0u8; 64]),
        }));
        assert_eq!(borsh::to_vec(&delegate).unwrap()[0], 8);
    }

    #[test]
    fn signing_digests_are_stable() {
        let action = delegate_action();
        let one = delegate_action_signing_digest(&action).unwrap();
        let two = delegate_action_signing_digest(&action).unwrap();
        assert_eq!(one, two);

        let payload = Nep413Payload {
            message: "pay 1000 to bob.near".to_string(),
            nonce: [9u8; 32],
            recipient: "shop.near".to_string(),
            callback_url: None,
        };
        assert_eq!(
            nep413_signing_digest(&payload).unwrap(),
            nep413_signing_digest(&payload).unwrap()
        );
    }
}
