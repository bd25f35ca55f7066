//! Negotiated pricing.
//!
//! A route advertises a base amount plus negotiation bounds. The client
//! attaches a [`NegotiationProposal`] under this extension's key in its
//! payment payload; the configured [`PricingStrategy`] answers accepted,
//! counter, or rejected. Counters and rejections abort into a 402 carrying
//! the strategy's answer; acceptance substitutes the negotiated amount
//! into the requirements and lets the exact flow finish normally.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tollgate_types::extensions::{HookOutcome, PaymentExtension};
use tollgate_types::proto::{PaymentPayload, PaymentRequirements};
use tollgate_types::util::MoneyAmount;

/// Extension key, as advertised in `/supported`.
pub const EXTENSION_KEY: &str = "negotiated-pricing";

/// Negotiation bounds a route pins into `requirements.extra`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationConfig {
    /// The advertised starting amount.
    pub base_amount: String,
    /// The floor the seller will accept.
    pub min_acceptable: String,
    /// Rounds before the negotiation hard-fails.
    pub max_iterations: u32,
}

/// A client's proposal, carried in the payload's extension map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NegotiationProposal {
    /// The proposed amount.
    pub amount: String,
    /// Which round this proposal is, starting at 1.
    #[serde(default = "first_iteration")]
    pub iteration: u32,
}

fn first_iteration() -> u32 {
    1
}

/// The strategy's answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum NegotiationOutcome {
    /// Deal: the exact flow completes at this amount.
    Accepted {
        /// The agreed amount.
        final_amount: String,
    },
    /// Counter-offer: the client may propose again.
    Counter {
        /// The seller's counter.
        counter_amount: String,
        /// Rounds remaining after this one.
        remaining_iterations: u32,
    },
    /// No deal.
    Rejected,
}

/// Decides the answer to one proposal.
pub trait PricingStrategy: Send + Sync {
    /// Evaluates a proposal against the route's bounds.
    fn evaluate(
        &self,
        proposal: &NegotiationProposal,
        config: &NegotiationConfig,
    ) -> NegotiationOutcome;
}

/// The reference strategy: accept anything at or above the floor,
/// otherwise counter midway between the proposal and the floor-bounded
/// base, until rounds run out.
pub struct SplitDifferenceStrategy;

fn parse(amount: &str) -> Option<MoneyAmount> {
    MoneyAmount::parse(amount).ok()
}

impl PricingStrategy for SplitDifferenceStrategy {
    fn evaluate(
        &self,
        proposal: &NegotiationProposal,
        config: &NegotiationConfig,
    ) -> NegotiationOutcome {
        let (Some(proposed), Some(min), Some(base)) = (
            parse(&proposal.amount),
            parse(&config.min_acceptable),
            parse(&config.base_amount),
        ) else {
            return NegotiationOutcome::Rejected;
        };

        if proposed.0 >= min.0 {
            return NegotiationOutcome::Accepted {
                final_amount: proposal.amount.clone(),
            };
        }
        if proposal.iteration >= config.max_iterations {
            return NegotiationOutcome::Rejected;
        }
        let midpoint = (proposed.0 + base.0) / rust_decimal_two();
        let counter = if midpoint < min.0 { min.0 } else { midpoint };
        NegotiationOutcome::Counter {
            counter_amount: MoneyAmount(counter.round_dp(9)).to_string(),
            remaining_iterations: config.max_iterations - proposal.iteration,
        }
    }
}

fn rust_decimal_two() -> rust_decimal::Decimal {
    rust_decimal::Decimal::from(2u64)
}

/// The pipeline extension running a [`PricingStrategy`].
pub struct NegotiatedPricingExtension {
    strategy: Arc<dyn PricingStrategy>,
}

impl NegotiatedPricingExtension {
    /// Creates the extension over a strategy.
    pub fn new(strategy: Arc<dyn PricingStrategy>) -> Self {
        Self { strategy }
    }

    fn negotiation_config(requirements: &PaymentRequirements) -> Option<NegotiationConfig> {
        requirements
            .extra
            .as_ref()?
            .get(EXTENSION_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }

    fn proposal(payload: &PaymentPayload) -> Option<NegotiationProposal> {
        payload
            .extensions
            .as_ref()?
            .get(EXTENSION_KEY)
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
    }
}

#[async_trait]
impl PaymentExtension for NegotiatedPricingExtension {
    fn key(&self) -> &'static str {
        EXTENSION_KEY
    }

    async fn on_before_verify(
        &self,
        payload: &PaymentPayload,
        requirements: &PaymentRequirements,
    ) -> HookOutcome {
        let Some(config) = Self::negotiation_config(requirements) else {
            // Route does not negotiate: nothing for this extension to do.
            return HookOutcome::Continue;
        };
        let Some(proposal) = Self::proposal(payload) else {
            // Negotiable route, no proposal: the base amount stands.
            return HookOutcome::Continue;
        };

        match self.strategy.evaluate(&proposal, &config) {
            NegotiationOutcome::Accepted { final_amount } => {
                let mut negotiated = requirements.clone();
                // The requirement's amount is atomic; the negotiation
                // happens in the same unit the route priced itself in.
                negotiated.amount = final_amount.clone();
                if let Some(extra) = negotiated.extra.as_mut().and_then(|e| e.as_object_mut()) {
                    extra.insert(
                        EXTENSION_KEY.to_string(),
                        serde_json::json!({ "status": "accepted", "finalAmount": final_amount }),
                    );
                }
                match serde_json::to_value(&negotiated) {
                    Ok(result) => HookOutcome::Recover { result },
                    Err(_) => HookOutcome::Continue,
                }
            }
            counter @ NegotiationOutcome::Counter { .. } => HookOutcome::Abort {
                reason: "negotiation_counter".to_string(),
                detail: serde_json::to_value(&counter).ok(),
            },
            NegotiationOutcome::Rejected => HookOutcome::Abort {
                reason: "negotiation_rejected".to_string(),
                detail: serde_json::to_value(&NegotiationOutcome::Rejected).ok(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> NegotiationConfig {
        NegotiationConfig {
            base_amount: "0.10".to_string(),
            min_acceptable: "0.05".to_string(),
            max_iterations: 3,
        }
    }

    #[test]
    fn low_proposal_gets_a_counter() {
        let outcome = SplitDifferenceStrategy.evaluate(
            &NegotiationProposal {
                amount: "0.03".to_string(),
                iteration: 1,
            },
            &config(),
        );
        match outcome {
            NegotiationOutcome::Counter {
                counter_amount,
                remaining_iterations,
            } => {
                // Midway between 0.03 and 0.10.
                assert_eq!(counter_amount, "0.065");
                assert_eq!(remaining_iterations, 2);
            }
            other => panic!("expected counter, got {other:?}"),
        }
    }

    #[test]
    fn floor_and_above_is_accepted() {
        let outcome = SplitDifferenceStrategy.evaluate(
            &NegotiationProposal {
                amount: "0.08".to_string(),
                iteration: 2,
            },
            &config(),
        );
        assert!(matches!(
            outcome,
            NegotiationOutcome::Accepted { final_amount } if final_amount == "0.08"
        ));
    }

    #[test]
    fn exhausted_rounds_are_rejected() {
        let outcome = SplitDifferenceStrategy.evaluate(
            &NegotiationProposal {
                amount: "0.01".to_string(),
                iteration: 3,
            },
            &config(),
        );
        assert!(matches!(outcome, NegotiationOutcome::Rejected));
    }

    #[test]
    fn outcome_wire_shape_matches_protocol() {
        let counter = NegotiationOutcome::Counter {
            counter_amount: "0.08".to_string(),
            remaining_iterations: 2,
        };
        let json = serde_json::to_value(&counter).unwrap();
        assert_eq!(json["status"], "counter");
        assert_eq!(json["counterAmount"], "0.08");
        assert_eq!(json["remainingIterations"], 2);
    }
}
