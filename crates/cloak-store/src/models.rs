//! Domain model structs persisted in the primary database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cloak_shared::{AuditKind, AvatarDescriptor, MembershipStage, Pseudonym, RelationshipKind, UserId};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// One row of the `identities` table, plus the mentor and class derived from
/// the relationship tables (they are never stored on the identity row).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    pub id: UserId,
    /// Real username before masking, `User_<pseudonym>` after.
    pub username: String,
    /// Real email before masking, a placeholder after.
    pub email: String,
    /// Cleared at masking time.
    pub phone: Option<String>,
    pub real_name: Option<String>,
    pub address: Option<String>,
    pub membership_stage: MembershipStage,
    pub pseudonym: Option<Pseudonym>,
    pub masked: bool,
    /// Opaque vault id. Present iff `masked`.
    pub vault_ref: Option<String>,
    pub avatar: Option<AvatarDescriptor>,
    /// Active mentor, from the relationship registry.
    pub mentor: Option<Pseudonym>,
    /// Active class, from class membership.
    pub class_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub masked_at: Option<DateTime<Utc>>,
}

/// Registration input. Written by the account layer, unmasked.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub username: String,
    pub email: String,
    pub phone: Option<String>,
    pub real_name: Option<String>,
    pub address: Option<String>,
    pub membership_stage: MembershipStage,
}

/// Everything the masking transaction writes.
#[derive(Debug, Clone)]
pub struct MaskCommit {
    pub user_id: UserId,
    pub pseudonym: Pseudonym,
    pub vault_ref: String,
    pub avatar: AvatarDescriptor,
    pub class_id: Option<String>,
    pub mentor: Option<MaskMentor>,
    pub masked_at: DateTime<Utc>,
}

/// Mentor edge created by the masking transaction, with its audit row.
#[derive(Debug, Clone)]
pub struct MaskMentor {
    pub mentor: Pseudonym,
    pub audit: NewAuditEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskCommitOutcome {
    Committed,
    /// The identity was masked concurrently; nothing was written.
    AlreadyMasked,
    /// The mentor is no longer masked or in good standing.
    MentorIneligible(String),
}

// ---------------------------------------------------------------------------
// Classes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Class {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

/// Pseudonym-only projection of a class member.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassMember {
    pub class_id: String,
    pub pseudonym: Pseudonym,
    pub avatar: Option<AvatarDescriptor>,
    pub joined_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Relationships
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipEdge {
    pub id: Uuid,
    pub mentor: Pseudonym,
    pub mentee: Pseudonym,
    pub kind: RelationshipKind,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

/// Pseudonym-only projection of a mentee.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MenteeSummary {
    pub pseudonym: Pseudonym,
    pub avatar: Option<AvatarDescriptor>,
    pub since: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditEntry {
    pub id: i64,
    pub kind: AuditKind,
    pub subject_user_id: Option<UserId>,
    pub subject_pseudonym: Option<Pseudonym>,
    pub actor: String,
    /// `None` for system-initiated operations.
    pub reason: Option<String>,
    pub details: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub kind: AuditKind,
    pub subject_user_id: Option<UserId>,
    pub subject_pseudonym: Option<Pseudonym>,
    pub actor: String,
    pub reason: Option<String>,
    pub details: serde_json::Value,
}

impl NewAuditEntry {
    pub fn new(kind: AuditKind, actor: impl Into<String>) -> Self {
        Self {
            kind,
            subject_user_id: None,
            subject_pseudonym: None,
            actor: actor.into(),
            reason: None,
            details: serde_json::json!({}),
        }
    }

    pub fn subject(mut self, user_id: Option<UserId>, pseudonym: Option<Pseudonym>) -> Self {
        self.subject_user_id = user_id;
        self.subject_pseudonym = pseudonym;
        self
    }

    pub fn reason(mut self, reason: Option<String>) -> Self {
        self.reason = reason;
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

/// Audit query filter. Every field is optional; pages are 1-based.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AuditFilter {
    pub subject_user_id: Option<UserId>,
    pub subject_pseudonym: Option<Pseudonym>,
    pub actor: Option<String>,
    pub kind: Option<AuditKind>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub page: Option<u32>,
    pub per_page: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditPage {
    pub entries: Vec<AuditEntry>,
    pub total: u64,
    pub page: u32,
    pub per_page: u32,
}
