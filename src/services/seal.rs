//! Seal lifecycle for a single rider: `none → pending → validated → expired`.
//!
//! The rules live in pure `plan_*` functions that turn a locked rider into the
//! update to write; the async operations run them inside the store's atomic
//! edit so preconditions are always checked against the current row.

use chrono::{DateTime, Utc};

use crate::db::store::{RiderEdit, RiderStore, RiderUpdate};
use crate::error::{Error, Result};
use crate::models::actor::Actor;
use crate::models::audit::NewAuditEntry;
use crate::models::rider::{Rider, SealState};
use crate::services::integrity;
use crate::services::retry::with_transaction_retry;

/// Requested seal change.
#[derive(Debug, Clone)]
pub struct SealChange {
    pub target: SealState,
    /// Replacement rider to point at when expiring.
    pub replacement: Option<i64>,
    pub reason: Option<String>,
}

impl SealChange {
    pub fn to(target: SealState) -> Self {
        Self {
            target,
            replacement: None,
            reason: None,
        }
    }

    pub fn with_replacement(mut self, rider_id: i64) -> Self {
        self.replacement = Some(rider_id);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// New content for a reupload.
#[derive(Debug, Clone)]
pub struct NewContent {
    pub content_hash: String,
    pub byte_size: i64,
    pub content_key: Option<String>,
}

/// Check that `candidate` may replace `source` in a redirect chain.
pub fn check_replacement(source: &Rider, candidate: &Rider) -> Result<()> {
    if candidate.id == source.id {
        return Err(Error::PreconditionFailed(
            "a rider cannot redirect to itself".to_string(),
        ));
    }
    if candidate.owner_id != source.owner_id {
        return Err(Error::PreconditionFailed(
            "replacement must belong to the same owner".to_string(),
        ));
    }
    if candidate.seal_state != SealState::Validated {
        return Err(Error::PreconditionFailed(format!(
            "replacement must be validated, it is {}",
            candidate.seal_state
        )));
    }
    Ok(())
}

/// Apply the lifecycle rules to a locked rider.
///
/// Returns `Ok(None)` when the rider is already in `change.target`.
pub fn plan_transition(
    rider: &Rider,
    change: &SealChange,
    replacement: Option<&Rider>,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Option<RiderUpdate>> {
    let from = rider.seal_state;
    let to = change.target;

    if from.is_terminal() {
        return Err(Error::TransitionDenied { from, to });
    }
    if change.replacement.is_some() && to != SealState::Expired {
        return Err(Error::Validation(
            "a replacement can only be set when expiring".to_string(),
        ));
    }
    if from == to {
        return Ok(None);
    }

    let allowed = match from {
        SealState::None | SealState::Pending => to != SealState::None,
        SealState::Validated => to == SealState::Expired,
        SealState::Expired => false,
    };
    if !allowed {
        return Err(Error::TransitionDenied { from, to });
    }

    let mut next = rider.clone();
    next.seal_state = to;
    next.updated_at = now;

    match to {
        SealState::Validated => {
            if rider.content_hash.is_none() {
                return Err(Error::PreconditionFailed(
                    "cannot validate a rider without a content hash".to_string(),
                ));
            }
            next.published_at = Some(now);
        }
        SealState::Expired => {
            next.expired_at = Some(now);
            if let Some(replacement_id) = change.replacement {
                let candidate = replacement.ok_or_else(|| {
                    Error::NotFound(format!("replacement rider {replacement_id}"))
                })?;
                check_replacement(rider, candidate)?;
                next.superseded_by = Some(candidate.id);
            }
        }
        SealState::None | SealState::Pending => {}
    }

    Ok(Some(RiderUpdate {
        rider: next,
        audit: Some(NewAuditEntry::new(actor, from, to, change.reason.clone(), now)),
    }))
}

/// Apply a redirect edit to a locked, expired rider.
pub fn plan_redirect(
    rider: &Rider,
    target: Option<i64>,
    candidate: Option<&Rider>,
    now: DateTime<Utc>,
) -> Result<Option<RiderUpdate>> {
    if rider.seal_state != SealState::Expired {
        return Err(Error::PreconditionFailed(format!(
            "redirects can only be set on expired riders, this one is {}",
            rider.seal_state
        )));
    }

    let superseded_by = match target {
        None => None,
        Some(target_id) => {
            let candidate =
                candidate.ok_or_else(|| Error::NotFound(format!("replacement rider {target_id}")))?;
            check_replacement(rider, candidate)?;
            Some(candidate.id)
        }
    };
    if superseded_by == rider.superseded_by {
        return Ok(None);
    }

    let mut next = rider.clone();
    next.superseded_by = superseded_by;
    next.updated_at = now;
    Ok(Some(RiderUpdate {
        rider: next,
        audit: None,
    }))
}

/// Record a manual-review request and move an unsealed rider to pending.
pub fn plan_manual_review(
    rider: &Rider,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Option<RiderUpdate>> {
    if !rider.seal_state.is_open() {
        return Err(Error::PreconditionFailed(format!(
            "manual review cannot be requested for a {} rider",
            rider.seal_state
        )));
    }
    if rider.manual_review_requested && rider.seal_state == SealState::Pending {
        return Ok(None);
    }

    let mut next = rider.clone();
    next.manual_review_requested = true;
    next.manual_requested_at = Some(now);
    next.updated_at = now;

    let audit = if rider.seal_state == SealState::None {
        next.seal_state = SealState::Pending;
        Some(NewAuditEntry::new(
            actor,
            SealState::None,
            SealState::Pending,
            Some("manual review requested".to_string()),
            now,
        ))
    } else {
        None
    };

    Ok(Some(RiderUpdate { rider: next, audit }))
}

/// Reset an open rider to `none`, clear its score and hash, then record the
/// new content.
pub fn plan_reupload(
    rider: &Rider,
    content: &NewContent,
    actor: &Actor,
    now: DateTime<Utc>,
) -> Result<Option<RiderUpdate>> {
    if !rider.seal_state.is_open() {
        return Err(Error::PreconditionFailed(format!(
            "content of a {} rider cannot be replaced",
            rider.seal_state
        )));
    }

    let mut next = rider.clone();
    next.seal_state = SealState::None;
    next.last_score = None;
    next.published_at = None;
    next.content_hash = Some(content.content_hash.clone());
    next.byte_size = content.byte_size;
    if content.content_key.is_some() {
        next.content_key = content.content_key.clone();
    }
    next.uploaded_at = now;
    next.updated_at = now;

    let audit = (rider.seal_state != SealState::None).then(|| {
        NewAuditEntry::new(
            actor,
            rider.seal_state,
            SealState::None,
            Some("content reuploaded".to_string()),
            now,
        )
    });

    Ok(Some(RiderUpdate { rider: next, audit }))
}

/// Administrative or rule-driven seal transition.
pub async fn transition<S: RiderStore + ?Sized>(
    store: &S,
    actor: &Actor,
    rider_id: i64,
    change: &SealChange,
) -> Result<Rider> {
    if !actor.is_privileged() {
        return Err(Error::Forbidden(
            "seal transitions require an administrator".to_string(),
        ));
    }

    let edit = |rider: &Rider, related: Option<&Rider>| -> Result<Option<RiderUpdate>> {
        plan_transition(rider, change, related, actor, Utc::now())
    };
    let edit: &RiderEdit<'_> = &edit;

    let outcome = with_transaction_retry("seal_transition", || async move {
        store.edit_rider(rider_id, change.replacement, edit).await
    })
    .await?;

    if outcome.changed {
        metrics::counter!("seal_transitions_total", "to" => change.target.to_string()).increment(1);
        tracing::info!(
            rider_id = rider_id,
            to = %change.target,
            actor = ?actor.kind,
            actor_id = ?actor.id,
            superseded_by = ?outcome.value.superseded_by,
            "Seal transition applied"
        );
    }
    Ok(outcome.value)
}

/// Point an expired rider at its replacement, or clear the pointer.
pub async fn set_redirect<S: RiderStore + ?Sized>(
    store: &S,
    actor: &Actor,
    rider_id: i64,
    target: Option<i64>,
) -> Result<Rider> {
    let edit = |rider: &Rider, related: Option<&Rider>| -> Result<Option<RiderUpdate>> {
        if !actor.may_act_for(rider.owner_id) {
            return Err(Error::Forbidden("not the owner of this rider".to_string()));
        }
        plan_redirect(rider, target, related, Utc::now())
    };
    let edit: &RiderEdit<'_> = &edit;

    let outcome = with_transaction_retry("set_redirect", || async move {
        store.edit_rider(rider_id, target, edit).await
    })
    .await?;

    if outcome.changed {
        tracing::info!(
            rider_id = rider_id,
            superseded_by = ?outcome.value.superseded_by,
            actor_id = ?actor.id,
            "Redirect updated"
        );
    }
    Ok(outcome.value)
}

/// Owner asks for a human review; blocks auto-promotion.
pub async fn request_manual_review<S: RiderStore + ?Sized>(
    store: &S,
    actor: &Actor,
    rider_id: i64,
) -> Result<Rider> {
    let edit = |rider: &Rider, _: Option<&Rider>| -> Result<Option<RiderUpdate>> {
        if !actor.may_act_for(rider.owner_id) {
            return Err(Error::Forbidden("not the owner of this rider".to_string()));
        }
        plan_manual_review(rider, actor, Utc::now())
    };
    let edit: &RiderEdit<'_> = &edit;

    let outcome = with_transaction_retry("manual_review", || async move {
        store.edit_rider(rider_id, None, edit).await
    })
    .await?;

    if outcome.changed {
        tracing::info!(rider_id = rider_id, actor_id = ?actor.id, "Manual review requested");
    }
    Ok(outcome.value)
}

/// Replace the content of an unsealed or pending rider.
pub async fn reupload<S: RiderStore + ?Sized>(
    store: &S,
    actor: &Actor,
    rider_id: i64,
    mut content: NewContent,
) -> Result<Rider> {
    content.content_hash = integrity::canonical_hash(&content.content_hash)
        .ok_or_else(|| Error::Validation("content hash must be 64 hex characters".to_string()))?;
    if content.byte_size < 0 {
        return Err(Error::Validation("byte size cannot be negative".to_string()));
    }

    let content = &content;
    let edit = |rider: &Rider, _: Option<&Rider>| -> Result<Option<RiderUpdate>> {
        if !actor.may_act_for(rider.owner_id) {
            return Err(Error::Forbidden("not the owner of this rider".to_string()));
        }
        plan_reupload(rider, content, actor, Utc::now())
    };
    let edit: &RiderEdit<'_> = &edit;

    let outcome = with_transaction_retry("reupload", || async move {
        store.edit_rider(rider_id, None, edit).await
    })
    .await?;

    tracing::info!(
        rider_id = rider_id,
        byte_size = content.byte_size,
        "Rider content replaced, seal reset"
    );
    Ok(outcome.value)
}
