//! BCS transaction model for the subset of Aptos this scheme touches.
//!
//! Only the variants a payment transaction can legitimately use are
//! modeled; anything else fails deserialization, which is exactly the
//! behavior verification wants. Variant order mirrors the on-chain
//! definitions, since BCS encodes enums by ordinal.

use serde::{Deserialize, Serialize};
use sha3::{Digest, Sha3_256};

/// A 32-byte account address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAddress(pub [u8; 32]);

impl AccountAddress {
    /// Renders as `0x`-prefixed lowercase hex.
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.0))
    }

    /// Parses from hex, with or without the `0x` prefix, short forms
    /// zero-padded on the left.
    pub fn from_hex(s: &str) -> Option<Self> {
        let s = s.strip_prefix("0x").unwrap_or(s);
        if s.is_empty() || s.len() > 64 {
            return None;
        }
        let padded = format!("{s:0>64}");
        let bytes = hex::decode(padded).ok()?;
        let mut out = [0u8; 32];
        out.copy_from_slice(&bytes);
        Some(Self(out))
    }
}

/// A Move identifier.
pub type Identifier = String;

/// A Move module id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleId {
    /// The module's address.
    pub address: AccountAddress,
    /// The module's name.
    pub name: Identifier,
}

/// Move type tags, as far as a fungible-asset transfer needs them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeTag {
    /// `bool`
    Bool,
    /// `u8`
    U8,
    /// `u64`
    U64,
    /// `u128`
    U128,
    /// `address`
    Address,
    /// `signer`
    Signer,
    /// `vector<T>`
    Vector(Box<TypeTag>),
    /// A struct type.
    Struct(Box<StructTag>),
}

/// A Move struct tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructTag {
    /// Defining address.
    pub address: AccountAddress,
    /// Defining module.
    pub module: Identifier,
    /// Struct name.
    pub name: Identifier,
    /// Generic arguments.
    pub type_args: Vec<TypeTag>,
}

/// An entry function call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFunction {
    /// The module holding the function.
    pub module: ModuleId,
    /// The function name.
    pub function: Identifier,
    /// Generic arguments.
    pub ty_args: Vec<TypeTag>,
    /// BCS-encoded call arguments.
    pub args: Vec<Vec<u8>>,
}

/// Transaction payload. Scripts and multisig payloads are not accepted by
/// this scheme; their ordinals are reserved so entry functions decode at
/// the right index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPayload {
    /// Ordinal 0: script (rejected on sight).
    Script(Vec<u8>),
    /// Ordinal 1: deprecated module bundle.
    ModuleBundle(Vec<u8>),
    /// Ordinal 2: an entry function call.
    EntryFunction(EntryFunction),
}

/// The signed-over transaction body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransaction {
    /// Sender account.
    pub sender: AccountAddress,
    /// Sender's sequence number.
    pub sequence_number: u64,
    /// What the transaction executes.
    pub payload: TransactionPayload,
    /// Gas unit cap.
    pub max_gas_amount: u64,
    /// Price per gas unit, in octas.
    pub gas_unit_price: u64,
    /// Expiration, seconds since epoch.
    pub expiration_timestamp_secs: u64,
    /// Chain id byte.
    pub chain_id: u8,
}

/// A single account's authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountAuthenticator {
    /// Ordinal 0: classic Ed25519.
    Ed25519 {
        /// 32-byte public key.
        public_key: Vec<u8>,
        /// 64-byte signature.
        signature: Vec<u8>,
    },
    /// Ordinal 1: multi-Ed25519 (validated in simulation only).
    MultiEd25519 {
        /// Concatenated public keys plus threshold.
        public_key: Vec<u8>,
        /// Concatenated signatures plus bitmap.
        signature: Vec<u8>,
    },
    /// Ordinal 2: single-key (validated in simulation only).
    SingleKey {
        /// BCS-encoded any-key authenticator.
        authenticator: Vec<u8>,
    },
    /// Ordinal 3: multi-key (validated in simulation only).
    MultiKey {
        /// BCS-encoded any-key authenticator.
        authenticator: Vec<u8>,
    },
}

impl AccountAuthenticator {
    /// The Ed25519 public key, when this is a classic authenticator.
    pub fn ed25519_public_key(&self) -> Option<&[u8]> {
        match self {
            AccountAuthenticator::Ed25519 { public_key, .. } => Some(public_key.as_slice()),
            _ => None,
        }
    }
}

/// Transaction authenticator wrapping the sender (and fee payer, when
/// sponsored).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionAuthenticator {
    /// Ordinal 0: plain Ed25519 sender.
    Ed25519 {
        /// Sender public key.
        public_key: Vec<u8>,
        /// Sender signature.
        signature: Vec<u8>,
    },
    /// Ordinal 1: multi-Ed25519 sender.
    MultiEd25519 {
        /// Concatenated public keys plus threshold.
        public_key: Vec<u8>,
        /// Concatenated signatures plus bitmap.
        signature: Vec<u8>,
    },
    /// Ordinal 2: multi-agent.
    MultiAgent {
        /// Sender authenticator.
        sender: AccountAuthenticator,
        /// Secondary signer addresses.
        secondary_signer_addresses: Vec<AccountAddress>,
        /// Secondary signer authenticators.
        secondary_signers: Vec<AccountAuthenticator>,
    },
    /// Ordinal 3: fee payer (sponsored).
    FeePayer {
        /// Sender authenticator.
        sender: AccountAuthenticator,
        /// Secondary signer addresses.
        secondary_signer_addresses: Vec<AccountAddress>,
        /// Secondary signer authenticators.
        secondary_signers: Vec<AccountAuthenticator>,
        /// The sponsoring account.
        fee_payer_address: AccountAddress,
        /// The sponsor's authenticator.
        fee_payer_signer: AccountAuthenticator,
    },
    /// Ordinal 4: single sender with a modern authenticator.
    SingleSender {
        /// Sender authenticator.
        sender: AccountAuthenticator,
    },
}

/// A fully signed transaction, ready for BCS submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
    /// The signed-over body.
    pub raw_txn: RawTransaction,
    /// The authenticator tree.
    pub authenticator: TransactionAuthenticator,
}

/// Fee-payer signing wrapper. The sponsor signs over this, not the bare
/// raw transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RawTransactionWithData {
    /// Ordinal 0: multi-agent without sponsor.
    MultiAgent {
        /// The transaction body.
        raw_txn: RawTransaction,
        /// Secondary signer addresses.
        secondary_signer_addresses: Vec<AccountAddress>,
    },
    /// Ordinal 1: multi-agent with sponsor.
    MultiAgentWithFeePayer {
        /// The transaction body.
        raw_txn: RawTransaction,
        /// Secondary signer addresses.
        secondary_signer_addresses: Vec<AccountAddress>,
        /// The sponsoring account.
        fee_payer_address: AccountAddress,
    },
}

fn salted_digest(salt: &str, message: &[u8]) -> Vec<u8> {
    let mut prefix_hasher = Sha3_256::new();
    prefix_hasher.update(salt.as_bytes());
    let prefix = prefix_hasher.finalize();
    let mut out = prefix.to_vec();
    out.extend_from_slice(message);
    out
}

/// The byte string an Ed25519 sender signs for a plain transaction.
pub fn raw_transaction_signing_message(raw: &RawTransaction) -> Result<Vec<u8>, bcs::Error> {
    let body = bcs::to_bytes(raw)?;
    Ok(salted_digest("APTOS::RawTransaction", &body))
}

/// The byte string signers (sender and sponsor) sign for a sponsored
/// transaction.
pub fn fee_payer_signing_message(
    raw: &RawTransaction,
    fee_payer: AccountAddress,
) -> Result<Vec<u8>, bcs::Error> {
    let wrapper = RawTransactionWithData::MultiAgentWithFeePayer {
        raw_txn: raw.clone(),
        secondary_signer_addresses: Vec::new(),
        fee_payer_address: fee_payer,
    };
    let body = bcs::to_bytes(&wrapper)?;
    Ok(salted_digest("APTOS::RawTransactionWithData", &body))
}

/// Authentication key of an Ed25519 public key: `sha3-256(key || 0x00)`.
pub fn ed25519_auth_key(public_key: &[u8]) -> [u8; 32] {
    let mut hasher = Sha3_256::new();
    hasher.update(public_key);
    hasher.update([0u8]);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_hex_roundtrip() {
        let address = AccountAddress::from_hex("0x1").unwrap();
        assert_eq!(
            address.to_hex(),
            "0x0000000000000000000000000000000000000000000000000000000000000001"
        );
        let full = AccountAddress::from_hex(&address.to_hex()).unwrap();
        assert_eq!(address, full);
    }

    #[test]
    fn entry_function_bcs_roundtrip() {
        let raw = RawTransaction {
            sender: AccountAddress::from_hex("0xa11ce").unwrap(),
            sequence_number: 7,
            payload: TransactionPayload::EntryFunction(EntryFunction {
                module: ModuleId {
                    address: AccountAddress::from_hex("0x1").unwrap(),
                    name: "primary_fungible_store".to_string(),
                },
                function: "transfer".to_string(),
                ty_args: vec![TypeTag::Struct(Box::new(StructTag {
                    address: AccountAddress::from_hex("0x1").unwrap(),
                    module: "fungible_asset".to_string(),
                    name: "Metadata".to_string(),
                    type_args: vec![],
                }))],
                args: vec![
                    bcs::to_bytes(&AccountAddress::from_hex("0xcafe").unwrap()).unwrap(),
                    bcs::to_bytes(&AccountAddress::from_hex("0xb0b").unwrap()).unwrap(),
                    bcs::to_bytes(&1000u64).unwrap(),
                ],
            }),
            max_gas_amount: 200_000,
            gas_unit_price: 100,
            expiration_timestamp_secs: 1_700_000_300,
            chain_id: 1,
        };
        let bytes = bcs::to_bytes(&raw).unwrap();
        let back: RawTransaction = bcs::from_bytes(&bytes).unwrap();
        assert_eq!(raw, back);
    }

    #[test]
    fn signing_messages_differ_by_salt() {
        let raw = RawTransaction {
            sender: AccountAddress::from_hex("0x1").unwrap(),
            sequence_number: 0,
            payload: TransactionPayload::EntryFunction(EntryFunction {
                module: ModuleId {
                    address: AccountAddress::from_hex("0x1").unwrap(),
                    name: "m".to_string(),
                },
                function: "f".to_string(),
                ty_args: vec![],
                args: vec![],
            }),
            max_gas_amount: 1,
            gas_unit_price: 1,
            expiration_timestamp_secs: 1,
            chain_id: 1,
        };
        let plain = raw_transaction_signing_message(&raw).unwrap();
        let sponsored =
            fee_payer_signing_message(&raw, AccountAddress::from_hex("0x2").unwrap()).unwrap();
        assert_ne!(plain, sponsored);
    }
}
