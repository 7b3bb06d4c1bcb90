use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActorKind {
    User,
    Admin,
    /// Rule-driven changes (auto-promotion, worker bookkeeping)
    System,
}

/// Who is performing an operation. Passed explicitly into every seal and job
/// operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<i64>,
    pub kind: ActorKind,
}

impl Actor {
    pub fn user(id: i64) -> Self {
        Self {
            id: Some(id),
            kind: ActorKind::User,
        }
    }

    pub fn admin(id: i64) -> Self {
        Self {
            id: Some(id),
            kind: ActorKind::Admin,
        }
    }

    pub fn system() -> Self {
        Self {
            id: None,
            kind: ActorKind::System,
        }
    }

    /// Admins and the system actor may drive administrative transitions.
    pub fn is_privileged(&self) -> bool {
        matches!(self.kind, ActorKind::Admin | ActorKind::System)
    }

    /// Owner of the rider, or privileged.
    pub fn may_act_for(&self, owner_id: i64) -> bool {
        self.is_privileged() || self.id == Some(owner_id)
    }
}
