//! # Transition Inputs and Outputs

use serde::{Deserialize, Serialize};

use escrow_core::{AccountRecord, Amount, IdentityHandle, Timestamp};

/// Tranche selector for `withdraw`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tranche {
    /// Enrollment tranche: 30% once five payments are in.
    Initial,
    /// Engagement tranche: 40% of the remaining pool.
    Metrics40,
    /// Remainder, after the dispute window.
    Final,
}

impl Tranche {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Metrics40 => "metrics40",
            Self::Final => "final",
        }
    }
}

impl std::fmt::Display for Tranche {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a disputed escrow is settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionAction {
    /// Pay the remainder to the payee, ignoring the dispute window.
    Release,
    /// Return the remainder to the payers.
    Refund,
}

/// Whether the enrollment tranche is paid automatically when the payment
/// threshold is reached, or only on an explicit `withdraw(Initial)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitialReleasePolicy {
    #[default]
    OnThreshold,
    Manual,
}

/// Engagement signals carried by one payment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentSignals {
    /// Whether the payer met the watch requirement.
    pub watch_met: bool,
    /// Rating in tenths of a star (0 = no rating).
    pub rating_tenths: u32,
    /// Whether the payer left a comment.
    pub commented: bool,
    /// When the payer's first watch event happened, if any.
    pub watched_at: Option<Timestamp>,
}

/// Aggregated engagement used to gate the 40% tranche.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Engagement {
    /// Average watch ratio in basis points (6500 = 65%).
    pub avg_watch_bps: u32,
    /// At least one rating and at least one comment recorded.
    pub has_rating_and_comment: bool,
}

/// A dispute filing, with enrollment already checked by the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisputeRequest {
    /// The requester's payout identity, if they have one.
    pub requester: Option<IdentityHandle>,
    /// Whether the requester is enrolled in the course.
    pub enrolled: bool,
    pub now: Timestamp,
}

/// A closed set of transitions accepted by [`crate::apply`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    AddPayment {
        net_amount: Amount,
        signals: PaymentSignals,
        policy: InitialReleasePolicy,
    },
    ReleaseInitial,
    ReleaseTranche40 {
        engagement: Engagement,
    },
    ReleaseFinal {
        now: Timestamp,
    },
    Dispute(DisputeRequest),
    ResolveDispute {
        action: ResolutionAction,
    },
}

impl Transition {
    /// The tag recorded with the payout instruction.
    pub fn kind(&self) -> TransitionKind {
        match self {
            Self::AddPayment { .. } => TransitionKind::AddPayment,
            Self::ReleaseInitial => TransitionKind::ReleaseInitial,
            Self::ReleaseTranche40 { .. } => TransitionKind::ReleaseTranche40,
            Self::ReleaseFinal { .. } => TransitionKind::ReleaseFinal,
            Self::Dispute(_) => TransitionKind::Dispute,
            Self::ResolveDispute {
                action: ResolutionAction::Release,
            } => TransitionKind::ResolveRelease,
            Self::ResolveDispute {
                action: ResolutionAction::Refund,
            } => TransitionKind::ResolveRefund,
        }
    }

    /// The transition backing `withdraw(tranche)`.
    pub fn for_tranche(tranche: Tranche, engagement: Engagement, now: Timestamp) -> Self {
        match tranche {
            Tranche::Initial => Self::ReleaseInitial,
            Tranche::Metrics40 => Self::ReleaseTranche40 { engagement },
            Tranche::Final => Self::ReleaseFinal { now },
        }
    }
}

/// Tag identifying which transition produced a ledger version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransitionKind {
    Open,
    AddPayment,
    ReleaseInitial,
    ReleaseTranche40,
    ReleaseFinal,
    Dispute,
    ResolveRelease,
    ResolveRefund,
}

impl TransitionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::AddPayment => "ADD_PAYMENT",
            Self::ReleaseInitial => "RELEASE_INITIAL",
            Self::ReleaseTranche40 => "RELEASE_TRANCHE40",
            Self::ReleaseFinal => "RELEASE_FINAL",
            Self::Dispute => "DISPUTE",
            Self::ResolveRelease => "RESOLVE_RELEASE",
            Self::ResolveRefund => "RESOLVE_REFUND",
        }
    }
}

impl std::fmt::Display for TransitionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Who receives a payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutRecipient {
    Payee,
    /// The pooled payers of the course; distribution is decided by the caller.
    Payers,
}

/// Side payout produced by a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payout {
    pub amount: Amount,
    pub recipient: PayoutRecipient,
}

impl Payout {
    pub fn to_payee(amount: Amount) -> Self {
        Self {
            amount,
            recipient: PayoutRecipient::Payee,
        }
    }

    pub fn to_payers(amount: Amount) -> Self {
        Self {
            amount,
            recipient: PayoutRecipient::Payers,
        }
    }

    pub fn none() -> Self {
        Self::to_payee(0)
    }

    pub fn is_zero(&self) -> bool {
        self.amount == 0
    }
}

/// The next record and the payout to commit alongside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub kind: TransitionKind,
    pub next: AccountRecord,
    pub payout: Payout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tranche_wire_names_match_display() {
        for tranche in [Tranche::Initial, Tranche::Metrics40, Tranche::Final] {
            let json = serde_json::to_value(tranche).unwrap();
            assert_eq!(json, tranche.as_str());
            let back: Tranche = serde_json::from_value(json).unwrap();
            assert_eq!(back, tranche);
        }
    }

    #[test]
    fn transition_kind_wire_names_match_display() {
        let kinds = [
            TransitionKind::Open,
            TransitionKind::AddPayment,
            TransitionKind::ReleaseInitial,
            TransitionKind::ReleaseTranche40,
            TransitionKind::ReleaseFinal,
            TransitionKind::Dispute,
            TransitionKind::ResolveRelease,
            TransitionKind::ResolveRefund,
        ];
        for kind in kinds {
            assert_eq!(serde_json::to_value(kind).unwrap(), kind.as_str());
        }
    }

    #[test]
    fn resolution_and_policy_are_snake_case() {
        assert_eq!(serde_json::to_value(ResolutionAction::Refund).unwrap(), "refund");
        assert_eq!(
            serde_json::from_str::<InitialReleasePolicy>("\"on_threshold\"").unwrap(),
            InitialReleasePolicy::OnThreshold
        );
        assert!(serde_json::from_str::<Tranche>("\"metrics_40\"").is_err());
    }
}
