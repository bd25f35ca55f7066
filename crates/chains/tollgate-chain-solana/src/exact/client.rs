//! Client face of the Solana "exact" scheme.
//!
//! Builds the fixed three-instruction payment transaction, points the fee
//! payer at the facilitator's sponsor when the requirements advertise one,
//! signs the payer's slot, and base64-encodes the result.

use async_trait::async_trait;
use serde_json::value::to_raw_value;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_compute_budget_interface::ComputeBudgetInstruction;
use solana_keypair::Keypair;
use solana_message::VersionedMessage;
use solana_message::v0;
use solana_pubkey::Pubkey;
use solana_signature::Signature;
use solana_signer::Signer;
use solana_transaction::versioned::VersionedTransaction;
use std::str::FromStr;
use std::sync::Arc;
use tollgate_types::proto::{PaymentPayload, PaymentRequirements, X402Version};
use tollgate_types::scheme::{SchemeClient, SchemeClientError};
use tollgate_types::util::Base64Bytes;

use crate::exact::types::{ATA_PROGRAM_PUBKEY, SolanaExactPayload};

/// Compute budget the client requests for a plain token transfer.
const COMPUTE_UNIT_LIMIT: u32 = 60_000;
const COMPUTE_UNIT_PRICE_MICROLAMPORTS: u64 = 1_000;

/// Signs "exact" payments with a Solana keypair.
pub struct SolanaExactClient {
    keypair: Arc<Keypair>,
    rpc: RpcClient,
}

impl SolanaExactClient {
    /// Creates a client around a keypair and an RPC endpoint.
    pub fn new(keypair: Keypair, rpc_url: impl Into<String>) -> Self {
        Self {
            keypair: Arc::new(keypair),
            rpc: RpcClient::new(rpc_url.into()),
        }
    }

    async fn build_transaction(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<SolanaExactPayload, SchemeClientError> {
        let mint = Pubkey::from_str(&requirements.asset).map_err(|_| {
            SchemeClientError::UnsupportedRequirements("asset is not a Solana mint".into())
        })?;
        let pay_to = Pubkey::from_str(&requirements.pay_to).map_err(|_| {
            SchemeClientError::UnsupportedRequirements("payTo is not a Solana address".into())
        })?;
        let amount: u64 = requirements
            .parsed_amount()
            .map_err(|e| SchemeClientError::UnsupportedRequirements(e.to_string()))?
            .try_into()
            .map_err(|_| {
                SchemeClientError::UnsupportedRequirements("amount exceeds u64".into())
            })?;
        let fee_payer = requirements
            .extra
            .as_ref()
            .and_then(|e| e.get("feePayer"))
            .and_then(|v| v.as_str())
            .map(Pubkey::from_str)
            .transpose()
            .map_err(|_| {
                SchemeClientError::UnsupportedRequirements("feePayer is not a Solana address".into())
            })?
            .unwrap_or_else(|| self.keypair.pubkey());

        let decimals = self
            .rpc
            .get_token_supply(&mint)
            .await
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?
            .decimals;

        let authority = self.keypair.pubkey();
        let source = associated_token_account(&authority, &spl_token::ID, &mint);
        let destination = associated_token_account(&pay_to, &spl_token::ID, &mint);

        let transfer = spl_token::instruction::transfer_checked(
            &spl_token::ID,
            &source,
            &mint,
            &destination,
            &authority,
            &[],
            amount,
            decimals,
        )
        .map_err(|e| SchemeClientError::Construction(e.to_string()))?;

        let instructions = vec![
            ComputeBudgetInstruction::set_compute_unit_limit(COMPUTE_UNIT_LIMIT),
            ComputeBudgetInstruction::set_compute_unit_price(COMPUTE_UNIT_PRICE_MICROLAMPORTS),
            transfer,
        ];

        let blockhash = self
            .rpc
            .get_latest_blockhash()
            .await
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?;
        let message = v0::Message::try_compile(&fee_payer, &instructions, &[], blockhash)
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?;
        let message = VersionedMessage::V0(message);

        let num_required = message.header().num_required_signatures as usize;
        let mut transaction = VersionedTransaction {
            signatures: vec![Signature::default(); num_required],
            message,
        };

        // Sign only the payer's slot; a sponsoring fee payer signs at the
        // facilitator.
        let msg_bytes = transaction.message.serialize();
        let signature = self
            .keypair
            .try_sign_message(msg_bytes.as_slice())
            .map_err(|e| SchemeClientError::Signing(e.to_string()))?;
        let position = transaction.message.static_account_keys()[..num_required]
            .iter()
            .position(|k| *k == authority)
            .ok_or_else(|| {
                SchemeClientError::Construction("payer is not a required signer".into())
            })?;
        transaction.signatures[position] = signature;

        let bytes = bincode::serialize(&transaction)
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?;
        Ok(SolanaExactPayload {
            transaction: Base64Bytes::encode(bytes).to_string(),
        })
    }
}

fn associated_token_account(owner: &Pubkey, token_program: &Pubkey, mint: &Pubkey) -> Pubkey {
    Pubkey::find_program_address(
        &[owner.as_ref(), token_program.as_ref(), mint.as_ref()],
        &ATA_PROGRAM_PUBKEY,
    )
    .0
}

#[async_trait]
impl SchemeClient for SolanaExactClient {
    async fn create_payment_payload(
        &self,
        requirements: &PaymentRequirements,
    ) -> Result<PaymentPayload, SchemeClientError> {
        let payload = self.build_transaction(requirements).await?;
        let raw = to_raw_value(&payload)
            .map_err(|e| SchemeClientError::Construction(e.to_string()))?;
        Ok(PaymentPayload {
            x402_version: X402Version::V2,
            scheme: requirements.scheme.clone(),
            network: requirements.network.clone(),
            payload: raw,
            accepted: Some(requirements.clone()),
            extensions: None,
        })
    }
}
