use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::models::actor::{Actor, ActorKind};
use crate::models::rider::SealState;

/// One recorded seal transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SealAuditEntry {
    #[serde(skip)]
    pub id: i64,
    #[serde(skip)]
    pub rider_id: i64,
    pub actor_id: Option<i64>,
    pub actor_kind: ActorKind,
    pub old_state: SealState,
    pub new_state: SealState,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub actor_id: Option<i64>,
    pub actor_kind: ActorKind,
    pub old_state: SealState,
    pub new_state: SealState,
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewAuditEntry {
    pub fn new(
        actor: &Actor,
        old_state: SealState,
        new_state: SealState,
        reason: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            actor_id: actor.id,
            actor_kind: actor.kind,
            old_state,
            new_state,
            reason,
            created_at,
        }
    }
}
