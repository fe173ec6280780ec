//! Relationship registry: mentorship and class membership in pseudonym space.
//!
//! Every projection returned here is built from pseudonym and avatar columns
//! only. Edge changes and their audit entries commit together.

use serde::Serialize;
use serde_json::json;

use cloak_shared::{AuditKind, CallerContext, Pseudonym, Role};
use cloak_store::{
    ClassMember, Database, IdentityRecord, MenteeSummary, NewAuditEntry, RelationshipEdge,
    StoreError,
};

use crate::error::CoreError;
use crate::gate::{authorize, Operation, Tier};
use crate::masking::check_mentor;
use crate::service::IdentityCore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reassignment {
    pub previous: RelationshipEdge,
    pub current: RelationshipEdge,
}

impl IdentityCore {
    /// Give a mentee their first active mentor. Admin tier.
    ///
    /// Fails with `AlreadyAssigned` if an active edge exists; switching
    /// mentors goes through [`IdentityCore::reassign_mentor`].
    pub async fn assign_mentor(
        &self,
        caller: &CallerContext,
        mentor: &str,
        mentee: &str,
        reason: Option<String>,
    ) -> Result<RelationshipEdge, CoreError> {
        authorize(caller, Operation::AssignMentor, Tier::Admin)?;
        let (mentor, mentee) = parse_pair(mentor, mentee)?;

        let mut db = self.ctx.db.lock().await;
        check_mentor(&db, &mentor)?;
        let mentee_rec = check_mentee(&db, &mentee)?;
        if db.active_mentor_edge(&mentee)?.is_some() {
            return Err(CoreError::AlreadyAssigned);
        }

        let audit = NewAuditEntry::new(AuditKind::AssignMentor, caller.actor_label())
            .subject(Some(mentee_rec.id), Some(mentee.clone()))
            .reason(reason)
            .details(json!({ "mentor": mentor.as_str() }));

        let edge = db
            .assign_mentor_audited(&mentor, &mentee, &audit)
            .map_err(|e| match e {
                StoreError::Conflict(_) => CoreError::AlreadyAssigned,
                other => other.into(),
            })?;

        tracing::info!(mentor = %mentor, mentee = %mentee, "mentor assigned");
        Ok(edge)
    }

    /// Deactivate a mentee's active mentor edge. Admin tier.
    pub async fn remove_mentor(
        &self,
        caller: &CallerContext,
        mentee: &str,
        reason: Option<String>,
    ) -> Result<RelationshipEdge, CoreError> {
        authorize(caller, Operation::RemoveMentor, Tier::Admin)?;
        let mentee = Pseudonym::parse(mentee)?;

        let mut db = self.ctx.db.lock().await;
        let mentee_rec = find_endpoint(&db, &mentee, "mentee")?;
        let current = db
            .active_mentor_edge(&mentee)?
            .ok_or_else(|| CoreError::not_found("active mentor"))?;

        let audit = NewAuditEntry::new(AuditKind::RemoveMentor, caller.actor_label())
            .subject(Some(mentee_rec.id), Some(mentee.clone()))
            .reason(reason)
            .details(json!({ "mentor": current.mentor.as_str() }));

        let edge = db.remove_mentor_audited(&mentee, &audit).map_err(|e| match e {
            StoreError::NotFound => CoreError::not_found("active mentor"),
            other => other.into(),
        })?;

        tracing::info!(mentee = %mentee, "mentor removed");
        Ok(edge)
    }

    /// Replace a mentee's active mentor in one transaction. Admin tier.
    pub async fn reassign_mentor(
        &self,
        caller: &CallerContext,
        mentee: &str,
        new_mentor: &str,
        reason: Option<String>,
    ) -> Result<Reassignment, CoreError> {
        authorize(caller, Operation::ReassignMentor, Tier::Admin)?;
        let (new_mentor, mentee) = parse_pair(new_mentor, mentee)?;

        let mut db = self.ctx.db.lock().await;
        check_mentor(&db, &new_mentor)?;
        let mentee_rec = check_mentee(&db, &mentee)?;
        let current = db
            .active_mentor_edge(&mentee)?
            .ok_or_else(|| CoreError::not_found("active mentor"))?;
        if current.mentor == new_mentor {
            return Err(CoreError::AlreadyAssigned);
        }

        let remove_audit = NewAuditEntry::new(AuditKind::RemoveMentor, caller.actor_label())
            .subject(Some(mentee_rec.id), Some(mentee.clone()))
            .reason(reason.clone())
            .details(json!({ "mentor": current.mentor.as_str(), "reassigned": true }));
        let assign_audit = NewAuditEntry::new(AuditKind::AssignMentor, caller.actor_label())
            .subject(Some(mentee_rec.id), Some(mentee.clone()))
            .reason(reason)
            .details(json!({ "mentor": new_mentor.as_str(), "previous": current.mentor.as_str() }));

        let (previous, current) = db
            .reassign_mentor_audited(&mentee, &new_mentor, &remove_audit, &assign_audit)
            .map_err(|e| match e {
                StoreError::NotFound => CoreError::not_found("active mentor"),
                StoreError::Conflict(_) => CoreError::AlreadyAssigned,
                other => other.into(),
            })?;

        tracing::info!(
            mentee = %mentee,
            from = %previous.mentor,
            to = %current.mentor,
            "mentor reassigned"
        );
        Ok(Reassignment { previous, current })
    }

    /// Active mentees of a mentor. The mentor themselves or an admin.
    pub async fn list_mentees(
        &self,
        caller: &CallerContext,
        mentor: &str,
    ) -> Result<Vec<MenteeSummary>, CoreError> {
        let mentor = Pseudonym::parse(mentor)?;
        authorize(caller, Operation::ListMentees, Tier::HolderOrAdmin(&mentor))?;

        let db = self.ctx.db.lock().await;
        find_endpoint(&db, &mentor, "mentor")?;
        Ok(db.list_mentees(&mentor)?)
    }

    /// Active members of a class. Non-admins must hold `requesting` and be a
    /// member of the class themselves.
    pub async fn list_class_members(
        &self,
        caller: &CallerContext,
        class_id: &str,
        requesting: &str,
    ) -> Result<Vec<ClassMember>, CoreError> {
        let requesting = Pseudonym::parse(requesting)?;
        authorize(caller, Operation::ListClassMembers, Tier::HolderOrAdmin(&requesting))?;

        let db = self.ctx.db.lock().await;
        db.get_class(class_id).map_err(|e| match e {
            StoreError::NotFound => CoreError::not_found("class"),
            other => other.into(),
        })?;

        if caller.role < Role::Admin && !db.is_class_member(class_id, &requesting)? {
            tracing::warn!(
                class_id,
                actor = %caller.actor_label(),
                "class listing denied to non-member"
            );
            return Err(CoreError::Unauthorized);
        }

        Ok(db.list_class_members(class_id)?)
    }
}

fn parse_pair(mentor: &str, mentee: &str) -> Result<(Pseudonym, Pseudonym), CoreError> {
    let mentor = Pseudonym::parse(mentor)?;
    let mentee = Pseudonym::parse(mentee)?;
    if mentor == mentee {
        return Err(CoreError::Validation("a member cannot mentor themselves".to_string()));
    }
    Ok((mentor, mentee))
}

fn find_endpoint(db: &Database, p: &Pseudonym, role: &str) -> Result<IdentityRecord, CoreError> {
    db.find_by_pseudonym(p).map_err(|e| match e {
        StoreError::NotFound => CoreError::not_found(role),
        other => other.into(),
    })
}

fn check_mentee(db: &Database, mentee: &Pseudonym) -> Result<IdentityRecord, CoreError> {
    let record = find_endpoint(db, mentee, "mentee")?;
    if !record.membership_stage.is_eligible() {
        return Err(CoreError::NotEligible(format!(
            "mentee membership stage {} is not eligible",
            record.membership_stage.as_str()
        )));
    }
    Ok(record)
}
