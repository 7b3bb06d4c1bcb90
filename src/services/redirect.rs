//! Redirect chain resolution for expired riders.
//!
//! `superseded_by` edges are edited independently over time, so the chain may
//! be long, point at riders that have since expired, or loop. Resolution is
//! bounded and re-checks every node's state when it runs.

use std::collections::HashSet;

use serde::Serialize;
use uuid::Uuid;

use crate::db::store::RiderStore;
use crate::error::Result;
use crate::models::rider::{Rider, SealState};

/// Maximum number of pointers followed.
pub const MAX_REDIRECT_HOPS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectResolution {
    /// Public token of the validated replacement, if one was reached.
    pub target: Option<Uuid>,
    pub cycle_detected: bool,
    pub hops: usize,
}

impl RedirectResolution {
    fn unresolved(hops: usize, cycle_detected: bool) -> Self {
        Self {
            target: None,
            cycle_detected,
            hops,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.target.is_some()
    }
}

/// Follow `rider.superseded_by` to the first currently validated rider.
///
/// Riders that are not expired have nothing to resolve. Dead ends, missing
/// riders and an exhausted hop budget are reported as unresolved, never as
/// errors.
pub async fn resolve<S: RiderStore + ?Sized>(store: &S, rider: &Rider) -> Result<RedirectResolution> {
    if rider.seal_state != SealState::Expired {
        return Ok(RedirectResolution::unresolved(0, false));
    }

    let mut visited = HashSet::from([rider.id]);
    let mut next = rider.superseded_by;
    let mut hops = 0;

    while let Some(current) = next {
        if hops == MAX_REDIRECT_HOPS {
            tracing::debug!(rider_id = rider.id, "Redirect hop budget exhausted");
            return Ok(RedirectResolution::unresolved(hops, false));
        }
        if !visited.insert(current) {
            tracing::warn!(rider_id = rider.id, repeated = current, "Redirect cycle detected");
            return Ok(RedirectResolution::unresolved(hops, true));
        }
        hops += 1;

        let Some(node) = store.rider_by_id(current).await? else {
            return Ok(RedirectResolution::unresolved(hops, false));
        };
        if node.seal_state == SealState::Validated {
            return Ok(RedirectResolution {
                target: Some(node.token),
                cycle_detected: false,
                hops,
            });
        }
        next = node.superseded_by;
    }

    Ok(RedirectResolution::unresolved(hops, false))
}
