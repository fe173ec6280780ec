//! Authorization gate.
//!
//! Every core operation names its minimum tier and calls [`authorize`] before
//! touching storage, so a rejected caller never causes a side effect.

use std::fmt;

use cloak_shared::{CallerContext, Pseudonym, Role, UserId};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    MaskIdentity,
    UnmaskIdentity,
    ExportIdentities,
    GeneratePseudonyms,
    AssignMentor,
    RemoveMentor,
    ReassignMentor,
    ListMentees,
    ListClassMembers,
    ResolvePublicProfile,
    ReadAuditTrail,
    ViewOwnIdentity,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MaskIdentity => "mask_identity",
            Self::UnmaskIdentity => "unmask_identity",
            Self::ExportIdentities => "export_identities",
            Self::GeneratePseudonyms => "generate_pseudonyms",
            Self::AssignMentor => "assign_mentor",
            Self::RemoveMentor => "remove_mentor",
            Self::ReassignMentor => "reassign_mentor",
            Self::ListMentees => "list_mentees",
            Self::ListClassMembers => "list_class_members",
            Self::ResolvePublicProfile => "resolve_public_profile",
            Self::ReadAuditTrail => "read_audit_trail",
            Self::ViewOwnIdentity => "view_own_identity",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Minimum privilege an operation requires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tier<'a> {
    /// Any authenticated caller.
    Authenticated,
    /// Only the subject themselves.
    Subject(UserId),
    /// The holder of this pseudonym, or an admin.
    HolderOrAdmin(&'a Pseudonym),
    Admin,
    SuperAdmin,
}

pub fn authorize(caller: &CallerContext, op: Operation, tier: Tier<'_>) -> Result<(), CoreError> {
    let allowed = match tier {
        Tier::Authenticated => true,
        Tier::Subject(user_id) => caller.user_id == user_id,
        Tier::HolderOrAdmin(p) => {
            caller.role >= Role::Admin || caller.pseudonym.as_ref() == Some(p)
        }
        Tier::Admin => caller.role >= Role::Admin,
        Tier::SuperAdmin => caller.role >= Role::SuperAdmin,
    };

    if allowed {
        Ok(())
    } else {
        tracing::warn!(
            operation = %op,
            actor = %caller.actor_label(),
            "authorization denied"
        );
        Err(CoreError::Unauthorized)
    }
}
