//! # Payout Instructions
//!
//! Every committed version carries exactly one payout instruction, even when
//! nothing is paid (`PayoutTarget::None`). The instruction id is the
//! durable deduplication handle: committing an id twice for the same course
//! is refused by the ledger.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use escrow_core::{AccountRecord, Amount, CourseId, IdentityHandle, Timestamp, UserId};
use escrow_engine::TransitionKind;

use crate::gateway::{LineId, Version};

/// Domain separation prefix for key-derived instruction ids.
const INSTRUCTION_KEY_DOMAIN: &[u8] = b"course-escrow/instruction/v1\0";

/// Identifier of a payout instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstructionId(Uuid);

impl InstructionId {
    /// A fresh random id, for operations without a caller-supplied key.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Deterministic id for a caller-supplied idempotency key.
    ///
    /// The same `(course, operation, key)` always maps to the same id, so a
    /// client retry is recognised by the ledger itself.
    pub fn from_idempotency_key(course: &CourseId, operation: &str, key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(INSTRUCTION_KEY_DOMAIN);
        hasher.update(course.as_bytes());
        hasher.update(operation.as_bytes());
        hasher.update([0u8]);
        hasher.update(key.as_bytes());
        let digest = hasher.finalize();
        let mut bytes = [0u8; 16];
        bytes.copy_from_slice(&digest[..16]);
        Self(uuid::Builder::from_custom_bytes(bytes).into_uuid())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InstructionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InstructionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "instr:{}", self.0)
    }
}

/// One payer's share of a refund.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayerShare {
    pub payer: UserId,
    pub amount: Amount,
}

/// The payment an `AddPayment` instruction took in. Refund splits are
/// computed from these, so the payer lives on the ledger entry itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deposit {
    pub payer: UserId,
    pub gross_amount: Amount,
    pub fee: Amount,
    pub net_amount: Amount,
}

/// Where the instruction sends money.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PayoutTarget {
    /// The transition moves no funds.
    None,
    Payee { identity: IdentityHandle },
    /// Refund split. `undistributed` is the part no deposit could be
    /// matched to; it is left for manual handling.
    Payers {
        shares: Vec<PayerShare>,
        undistributed: Amount,
    },
}

/// The payout side of a committed transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutInstruction {
    pub id: InstructionId,
    pub kind: TransitionKind,
    pub amount: Amount,
    pub target: PayoutTarget,
    pub memo: String,
    pub issued_at: Timestamp,
    /// Set on `AddPayment` instructions only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deposit: Option<Deposit>,
}

impl PayoutInstruction {
    /// An instruction that records the transition without moving funds.
    pub fn no_payout(id: InstructionId, kind: TransitionKind, issued_at: Timestamp) -> Self {
        Self {
            id,
            kind,
            amount: 0,
            target: PayoutTarget::None,
            memo: String::new(),
            issued_at,
            deposit: None,
        }
    }

    pub fn to_payee(
        id: InstructionId,
        kind: TransitionKind,
        amount: Amount,
        payee: IdentityHandle,
        issued_at: Timestamp,
    ) -> Self {
        let target = if amount == 0 {
            PayoutTarget::None
        } else {
            PayoutTarget::Payee { identity: payee }
        };
        Self {
            id,
            kind,
            amount,
            target,
            memo: String::new(),
            issued_at,
            deposit: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = memo.into();
        self
    }

    pub fn with_deposit(mut self, deposit: Deposit) -> Self {
        self.deposit = Some(deposit);
        self
    }
}

/// A stored ledger version together with the instruction that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommittedEntry {
    pub course_id: CourseId,
    pub line: LineId,
    pub version: Version,
    pub record: AccountRecord,
    pub instruction: PayoutInstruction,
}
