//! NEAR "exact" scheme for x402 payments.
//!
//! Two transports are accepted:
//!
//! - **NEP-413 signed payload**: the payer signs a canonical off-chain
//!   message naming the payment; useful where the payer cannot produce a
//!   full transaction.
//! - **NEP-366 meta-transaction**: the payer signs a `DelegateAction` whose
//!   inner `FunctionCall` is `ft_transfer(receiver_id, amount)` on the
//!   required FT contract; the facilitator's relayer wraps it into
//!   `Action::Delegate` and pays the gas.

pub mod chain;
pub mod exact;
pub mod tx;

pub use chain::{NearChainConfig, NearChainProvider};
pub use exact::{NearExactError, NearExactFacilitator, NearExactServer};
