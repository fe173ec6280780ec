use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ParseEnumError;
use crate::pseudonym::Pseudonym;

// Internal numeric identity id. Stable, never shown to other users.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct UserId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Caller privilege tiers, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Member,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }
}

impl FromStr for Role {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "member" | "user" => Ok(Self::Member),
            "admin" => Ok(Self::Admin),
            "super_admin" | "superadmin" => Ok(Self::SuperAdmin),
            other => Err(ParseEnumError::new("role", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStage {
    /// Registered, application not yet approved.
    Applicant,
    /// Application approved.
    PreMember,
    /// Full member.
    Member,
    Suspended,
}

impl MembershipStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applicant => "applicant",
            Self::PreMember => "pre_member",
            Self::Member => "member",
            Self::Suspended => "suspended",
        }
    }

    /// Whether an identity at this stage may be masked or take part in a
    /// mentorship / class edge.
    pub fn is_eligible(&self) -> bool {
        matches!(self, Self::PreMember | Self::Member)
    }
}

impl FromStr for MembershipStage {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "applicant" => Ok(Self::Applicant),
            "pre_member" => Ok(Self::PreMember),
            "member" => Ok(Self::Member),
            "suspended" => Ok(Self::Suspended),
            other => Err(ParseEnumError::new("membership stage", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditKind {
    Mask,
    Unmask,
    /// Unmask attempt that reached the vault but failed to decrypt or parse.
    UnmaskFailed,
    View,
    Generate,
    AssignMentor,
    RemoveMentor,
}

impl AuditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mask => "MASK",
            Self::Unmask => "UNMASK",
            Self::UnmaskFailed => "UNMASK_FAILED",
            Self::View => "VIEW",
            Self::Generate => "GENERATE",
            Self::AssignMentor => "ASSIGN_MENTOR",
            Self::RemoveMentor => "REMOVE_MENTOR",
        }
    }
}

impl FromStr for AuditKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MASK" => Ok(Self::Mask),
            "UNMASK" => Ok(Self::Unmask),
            "UNMASK_FAILED" => Ok(Self::UnmaskFailed),
            "VIEW" => Ok(Self::View),
            "GENERATE" => Ok(Self::Generate),
            "ASSIGN_MENTOR" => Ok(Self::AssignMentor),
            "REMOVE_MENTOR" => Ok(Self::RemoveMentor),
            other => Err(ParseEnumError::new("audit kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    Mentorship,
}

impl RelationshipKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mentorship => "mentorship",
        }
    }
}

impl FromStr for RelationshipKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mentorship" => Ok(Self::Mentorship),
            other => Err(ParseEnumError::new("relationship kind", other)),
        }
    }
}

/// The authenticated caller, as established by the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerContext {
    pub user_id: UserId,
    pub role: Role,
    pub pseudonym: Option<Pseudonym>,
}

impl CallerContext {
    pub fn new(user_id: UserId, role: Role) -> Self {
        Self {
            user_id,
            role,
            pseudonym: None,
        }
    }

    pub fn with_pseudonym(mut self, pseudonym: Pseudonym) -> Self {
        self.pseudonym = Some(pseudonym);
        self
    }

    /// Identifier written to the audit trail's actor column.
    pub fn actor_label(&self) -> String {
        format!("{}:{}", self.role.as_str(), self.user_id)
    }
}
