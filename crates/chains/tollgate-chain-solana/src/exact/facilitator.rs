//! Facilitator face of the Solana "exact" scheme.
//!
//! A payment transaction has a fixed shape:
//!
//! - index 0: `SetComputeUnitLimit`, within the facilitator's cap
//! - index 1: `SetComputeUnitPrice`, within the facilitator's cap
//! - index 2: `TransferChecked` (Token or Token-2022) into the recipient's
//!   associated token account
//!
//! The facilitator's fee payer must not appear in any instruction's account
//! list, and must never be the transfer authority. After structural checks
//! the transaction is co-signed and simulated; settlement submits it and
//! waits for confirmation.

use async_trait::async_trait;
use solana_compute_budget_interface::ID as COMPUTE_BUDGET_PROGRAM;
use solana_pubkey::Pubkey;
use solana_transaction::versioned::VersionedTransaction;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use tollgate_types::proto::error::transaction_failed;
use tollgate_types::proto::{
    self, ErrorReason, PaymentVerificationError, SettleResponse, SupportedPaymentKind,
    SupportedResponse, VerifyResponse,
};
use tollgate_types::scheme::{SchemeFacilitator, SchemeFacilitatorError};
use tollgate_types::util::Base64Bytes;
use tollgate_types::chain::ChainId;
use tracing::instrument;

use crate::chain::{Address, SolanaChainProvider, SolanaChainProviderError};
use crate::exact::types::{
    ATA_PROGRAM_PUBKEY, ExactScheme, SolanaExactVerifyRequest, SupportedKindExtra,
};

/// The payment transaction's fixed instruction count.
const REQUIRED_INSTRUCTIONS: usize = 3;

/// Per-scheme closed set of verification failures.
#[derive(Debug, thiserror::Error)]
pub enum SolanaExactError {
    /// Cross-scheme structural failure.
    #[error(transparent)]
    Verification(#[from] PaymentVerificationError),
    /// The payload network is not the provider's cluster.
    #[error("payment network does not match this facilitator's cluster")]
    WrongChain,
    /// The transaction bytes could not be decoded.
    #[error("transaction could not be decoded: {0}")]
    TransactionDecoding(String),
    /// The instruction layout is not the required shape.
    #[error("transaction instruction layout is invalid")]
    InstructionsLength,
    /// Index 0/1 is not a valid compute budget instruction.
    #[error("compute budget instructions are missing or malformed")]
    InvalidComputeInstruction,
    /// The requested compute limit or price exceeds the facilitator's cap.
    #[error("compute budget exceeds the facilitator's limits")]
    ComputeBudgetExceeded,
    /// Index 2 is not a `TransferChecked`.
    #[error("no transfer instruction at the expected index")]
    NoTransferInstruction,
    /// The transfer mint is not the required asset.
    #[error("transfer mint does not match the required asset")]
    MintMismatch,
    /// The destination is not the recipient's associated token account.
    #[error("transfer destination does not match payTo")]
    RecipientMismatch,
    /// The source or destination token account does not exist.
    #[error("token account is missing")]
    MissingAccount,
    /// The transfer amount is not the required amount.
    #[error("transfer amount does not match the required amount")]
    AmountMismatch,
    /// The facilitator's fee payer appears inside the instructions.
    #[error("fee payer would transfer funds")]
    FeePayerTransferringFunds,
    /// Simulation failed.
    #[error("simulation failed: {0}")]
    SimulationFailed(String),
    /// The transaction misses required signatures at settlement.
    #[error("transaction is not fully signed")]
    Undersigned,
    /// RPC failure; not a business rejection.
    #[error(transparent)]
    Provider(SolanaChainProviderError),
}

impl SolanaExactError {
    /// The stable wire tag for this failure.
    pub fn reason(&self) -> String {
        match self {
            SolanaExactError::Verification(e) => e.reason().into(),
            SolanaExactError::WrongChain => ErrorReason::InvalidNetwork.into(),
            SolanaExactError::TransactionDecoding(_) => {
                "invalid_exact_svm_payload_transaction_could_not_be_decoded".into()
            }
            SolanaExactError::InstructionsLength => {
                "invalid_exact_svm_payload_transaction_instructions_length".into()
            }
            SolanaExactError::InvalidComputeInstruction
            | SolanaExactError::ComputeBudgetExceeded => {
                "invalid_exact_svm_payload_transaction".into()
            }
            SolanaExactError::NoTransferInstruction => {
                "invalid_exact_svm_payload_no_transfer_instruction".into()
            }
            SolanaExactError::MintMismatch => ErrorReason::AssetMismatch.into(),
            SolanaExactError::RecipientMismatch => {
                "invalid_exact_svm_payload_recipient_mismatch".into()
            }
            SolanaExactError::MissingAccount => "invalid_exact_svm_payload_transaction".into(),
            SolanaExactError::AmountMismatch => {
                "invalid_exact_svm_payload_transaction_amount_mismatch".into()
            }
            SolanaExactError::FeePayerTransferringFunds => {
                "invalid_exact_svm_payload_transaction_fee_payer_transferring_funds".into()
            }
            SolanaExactError::SimulationFailed(_) => {
                "invalid_exact_svm_payload_transaction_simulation_failed".into()
            }
            SolanaExactError::Undersigned => ErrorReason::InvalidTransactionState.into(),
            SolanaExactError::Provider(_) => ErrorReason::UnexpectedVerifyError.into(),
        }
    }
}

/// A decoded `TransferChecked` and its account roles.
#[derive(Debug)]
struct TransferChecked {
    amount: u64,
    source: Pubkey,
    mint: Pubkey,
    destination: Pubkey,
    authority: Pubkey,
    token_program: Pubkey,
}

struct Ix<'a> {
    data: &'a [u8],
    accounts: &'a [u8],
    program_id: Pubkey,
    keys: &'a [Pubkey],
}

impl<'a> Ix<'a> {
    fn at(tx: &'a VersionedTransaction, index: usize) -> Result<Self, SolanaExactError> {
        let instruction = tx
            .message
            .instructions()
            .get(index)
            .ok_or(SolanaExactError::InstructionsLength)?;
        let keys = tx.message.static_account_keys();
        Ok(Ix {
            data: instruction.data.as_slice(),
            accounts: instruction.accounts.as_slice(),
            program_id: *instruction.program_id(keys),
            keys,
        })
    }

    fn account(&self, index: usize) -> Result<Pubkey, SolanaExactError> {
        let key_index = *self
            .accounts
            .get(index)
            .ok_or(SolanaExactError::NoTransferInstruction)?;
        self.keys
            .get(key_index as usize)
            .copied()
            .ok_or(SolanaExactError::NoTransferInstruction)
    }
}

/// The result of a passed verification, carried into settlement.
pub struct VerifiedTransfer {
    /// The transfer authority (the payer).
    pub payer: Address,
    /// The decoded transaction, ready to co-sign.
    pub transaction: VersionedTransaction,
}

/// Facilitator for the Solana "exact" scheme on one cluster.
pub struct SolanaExactFacilitator {
    provider: Arc<SolanaChainProvider>,
}

impl SolanaExactFacilitator {
    /// Creates a facilitator over the given cluster provider.
    pub fn new(provider: Arc<SolanaChainProvider>) -> Self {
        Self { provider }
    }

    #[instrument(skip_all, err)]
    async fn verify_transfer(
        &self,
        body: &SolanaExactVerifyRequest,
    ) -> Result<VerifiedTransfer, SolanaExactError> {
        let requirements = &body.payment_requirements;
        body.payment_payload.ensure_matches(requirements)?;
        if requirements.network != self.provider.chain_id() {
            return Err(SolanaExactError::WrongChain);
        }

        let bytes = Base64Bytes::from(body.payment_payload.payload.transaction.as_bytes())
            .decode()
            .map_err(|e| SolanaExactError::TransactionDecoding(e.to_string()))?;
        let transaction = bincode::deserialize::<VersionedTransaction>(bytes.as_slice())
            .map_err(|e| SolanaExactError::TransactionDecoding(e.to_string()))?;

        if transaction.message.instructions().len() != REQUIRED_INSTRUCTIONS {
            return Err(SolanaExactError::InstructionsLength);
        }

        let compute_units = self.verify_compute_limit(&transaction)?;
        tracing::debug!(compute_units, "verified compute unit limit");
        self.verify_compute_price(&transaction)?;

        let transfer = self.verify_transfer_instruction(&transaction, requirements).await?;

        // The fee payer sponsors gas only; it must not appear in any
        // instruction's accounts.
        let fee_payer = self.provider.pubkey();
        for index in 0..REQUIRED_INSTRUCTIONS {
            let ix = Ix::at(&transaction, index)?;
            for account_index in 0..ix.accounts.len() {
                if ix.account(account_index)? == fee_payer {
                    return Err(SolanaExactError::FeePayerTransferringFunds);
                }
            }
        }

        let signed = self
            .provider
            .sign(transaction.clone())
            .map_err(SolanaExactError::Provider)?;
        self.provider
            .simulate(&signed)
            .await
            .map_err(|e| match e {
                SolanaChainProviderError::InvalidTransaction(detail) => {
                    SolanaExactError::SimulationFailed(detail)
                }
                other => SolanaExactError::Provider(other),
            })?;

        Ok(VerifiedTransfer {
            payer: Address::new(transfer.authority),
            transaction,
        })
    }

    fn verify_compute_limit(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<u32, SolanaExactError> {
        let ix = Ix::at(transaction, 0)?;
        // 1-byte discriminator (2 = SetComputeUnitLimit) + u32 LE.
        if ix.program_id != COMPUTE_BUDGET_PROGRAM
            || ix.data.len() != 5
            || ix.data.first() != Some(&2)
        {
            return Err(SolanaExactError::InvalidComputeInstruction);
        }
        let mut buf = [0u8; 4];
        buf.copy_from_slice(&ix.data[1..5]);
        let compute_units = u32::from_le_bytes(buf);
        if compute_units > self.provider.max_compute_unit_limit() {
            return Err(SolanaExactError::ComputeBudgetExceeded);
        }
        Ok(compute_units)
    }

    fn verify_compute_price(
        &self,
        transaction: &VersionedTransaction,
    ) -> Result<(), SolanaExactError> {
        let ix = Ix::at(transaction, 1)?;
        // 1-byte discriminator (3 = SetComputeUnitPrice) + u64 LE.
        if ix.program_id != COMPUTE_BUDGET_PROGRAM
            || ix.data.len() != 9
            || ix.data.first() != Some(&3)
        {
            return Err(SolanaExactError::InvalidComputeInstruction);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&ix.data[1..9]);
        if u64::from_le_bytes(buf) > self.provider.max_compute_unit_price() {
            return Err(SolanaExactError::ComputeBudgetExceeded);
        }
        Ok(())
    }

    async fn verify_transfer_instruction(
        &self,
        transaction: &VersionedTransaction,
        requirements: &proto::PaymentRequirements,
    ) -> Result<TransferChecked, SolanaExactError> {
        let ix = Ix::at(transaction, 2)?;
        let transfer = if ix.program_id == spl_token::ID {
            match spl_token::instruction::TokenInstruction::unpack(ix.data)
                .map_err(|_| SolanaExactError::NoTransferInstruction)?
            {
                spl_token::instruction::TokenInstruction::TransferChecked { amount, .. } => {
                    TransferChecked {
                        amount,
                        source: ix.account(0)?,
                        mint: ix.account(1)?,
                        destination: ix.account(2)?,
                        authority: ix.account(3)?,
                        token_program: spl_token::ID,
                    }
                }
                _ => return Err(SolanaExactError::NoTransferInstruction),
            }
        } else if ix.program_id == spl_token_2022::ID {
            match spl_token_2022::instruction::TokenInstruction::unpack(ix.data)
                .map_err(|_| SolanaExactError::NoTransferInstruction)?
            {
                spl_token_2022::instruction::TokenInstruction::TransferChecked { amount, .. } => {
                    TransferChecked {
                        amount,
                        source: ix.account(0)?,
                        mint: ix.account(1)?,
                        destination: ix.account(2)?,
                        authority: ix.account(3)?,
                        token_program: spl_token_2022::ID,
                    }
                }
                _ => return Err(SolanaExactError::NoTransferInstruction),
            }
        } else {
            return Err(SolanaExactError::NoTransferInstruction);
        };

        if transfer.authority == self.provider.pubkey() {
            return Err(SolanaExactError::FeePayerTransferringFunds);
        }

        let asset = Pubkey::from_str(&requirements.asset)
            .map_err(|_| PaymentVerificationError::InvalidFormat("asset".into()))?;
        if transfer.mint != asset {
            return Err(SolanaExactError::MintMismatch);
        }

        let pay_to = Pubkey::from_str(&requirements.pay_to)
            .map_err(|_| PaymentVerificationError::InvalidFormat("payTo".into()))?;
        let (ata, _) = Pubkey::find_program_address(
            &[pay_to.as_ref(), transfer.token_program.as_ref(), asset.as_ref()],
            &ATA_PROGRAM_PUBKEY,
        );
        if transfer.destination != ata {
            return Err(SolanaExactError::RecipientMismatch);
        }

        let accounts = self
            .provider
            .get_multiple_accounts(&[transfer.source, ata])
            .await
            .map_err(SolanaExactError::Provider)?;
        if accounts.first().is_none_or(|a| a.is_none()) {
            return Err(SolanaExactError::MissingAccount);
        }
        // The destination ATA must already exist; this scheme does not
        // create accounts.
        if accounts.get(1).is_none_or(|a| a.is_none()) {
            return Err(SolanaExactError::RecipientMismatch);
        }

        let amount = requirements.parsed_amount()?;
        if u128::from(transfer.amount) != amount {
            return Err(SolanaExactError::AmountMismatch);
        }
        Ok(transfer)
    }
}

fn business_or_ledger(
    error: SolanaExactError,
) -> Result<VerifyResponse, SchemeFacilitatorError> {
    match error {
        SolanaExactError::Provider(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
        business => Ok(VerifyResponse::invalid(business.reason(), None)),
    }
}

#[async_trait]
impl SchemeFacilitator for SolanaExactFacilitator {
    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn verify(
        &self,
        request: &proto::VerifyRequest,
    ) -> Result<VerifyResponse, SchemeFacilitatorError> {
        let body: SolanaExactVerifyRequest = request.deserialize_as()?;
        match self.verify_transfer(&body).await {
            Ok(verified) => Ok(VerifyResponse::valid(verified.payer.to_string())),
            Err(error) => business_or_ledger(error),
        }
    }

    #[instrument(skip_all, fields(chain = %self.provider.chain_id()))]
    async fn settle(
        &self,
        request: &proto::SettleRequest,
    ) -> Result<SettleResponse, SchemeFacilitatorError> {
        let body: SolanaExactVerifyRequest = request.deserialize_as()?;
        let network = body.payment_requirements.network.clone();

        let verified = match self.verify_transfer(&body).await {
            Ok(verified) => verified,
            Err(SolanaExactError::Provider(e)) => {
                return Err(SchemeFacilitatorError::Ledger(e.to_string()));
            }
            Err(business) => {
                return Ok(SettleResponse::Error {
                    reason: business.reason(),
                    network,
                    payer: None,
                });
            }
        };
        let payer = verified.payer.to_string();

        let signed = self
            .provider
            .sign(verified.transaction)
            .map_err(|e| SchemeFacilitatorError::Ledger(e.to_string()))?;
        if !SolanaChainProvider::is_fully_signed(&signed) {
            tracing::warn!("undersigned transaction");
            return Ok(SettleResponse::Error {
                reason: SolanaExactError::Undersigned.reason(),
                network,
                payer: Some(payer),
            });
        }

        match self.provider.send_and_confirm(&signed).await {
            Ok(signature) => {
                tracing::info!(tx = %signature, "transfer confirmed");
                Ok(SettleResponse::Success {
                    transaction: signature.to_string(),
                    network,
                    payer,
                })
            }
            Err(SolanaChainProviderError::InvalidTransaction(detail)) => {
                Ok(SettleResponse::Error {
                    reason: transaction_failed(detail),
                    network,
                    payer: Some(payer),
                })
            }
            Err(e) => Err(SchemeFacilitatorError::Ledger(e.to_string())),
        }
    }

    async fn supported(&self) -> SupportedResponse {
        let chain_id = self.provider.chain_id();
        let extra = serde_json::to_value(SupportedKindExtra {
            fee_payer: self.provider.fee_payer(),
        })
        .ok();
        let kinds = [2u8, 1]
            .iter()
            .map(|version| SupportedPaymentKind {
                x402_version: *version,
                scheme: ExactScheme::VALUE.to_string(),
                network: chain_id.clone(),
                extra: extra.clone(),
            })
            .collect();
        let mut signers = HashMap::with_capacity(1);
        signers.insert(chain_id, vec![self.provider.fee_payer().to_string()]);
        SupportedResponse {
            kinds,
            extensions: Vec::new(),
            signers,
        }
    }

    async fn extra(&self, network: &ChainId) -> Option<serde_json::Value> {
        if network != &self.provider.chain_id() {
            return None;
        }
        serde_json::to_value(SupportedKindExtra {
            fee_payer: self.provider.fee_payer(),
        })
        .ok()
    }
}
