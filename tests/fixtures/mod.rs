//! Shared fixtures for store-backed tests.
#![allow(dead_code)]

use chrono::Utc;
use rider_seal::db::{MemoryStore, RiderStore, RiderUpdate};
use rider_seal::error::Result;
use rider_seal::models::rider::{NewRider, Rider, SealState};
use rider_seal::services::integrity;

pub const OWNER: i64 = 100;
pub const OTHER_OWNER: i64 = 200;
pub const ADMIN: i64 = 1;

/// Sample rider bodies.
pub const RIDER_ONE: &[u8] = b"Stage plot v1: two vocal mics, DI for keys, 4 wedges";
pub const RIDER_TWO: &[u8] = b"Stage plot v2: three vocal mics, DI for keys, 6 wedges";

/// Upload `content` as a fresh rider in state `none`.
pub async fn upload(store: &MemoryStore, owner_id: i64, content: &[u8]) -> Rider {
    let hash = integrity::compute_hash(content);
    let new = NewRider::new(owner_id, Some(hash), content.len() as i64, Utc::now());
    let key = format!("riders/{}", new.token);
    store
        .insert_rider(new.with_content_key(key))
        .await
        .expect("insert rider")
}

/// Overwrite state and pointer without going through the seal rules, to
/// build shapes the rules would reach only through a long history.
pub async fn force(
    store: &MemoryStore,
    rider_id: i64,
    state: SealState,
    superseded_by: Option<i64>,
) -> Rider {
    let edit = move |rider: &Rider, _: Option<&Rider>| -> Result<Option<RiderUpdate>> {
        let mut next = rider.clone();
        next.seal_state = state;
        next.superseded_by = superseded_by;
        if state == SealState::Validated {
            next.published_at = Some(Utc::now());
        }
        Ok(Some(RiderUpdate {
            rider: next,
            audit: None,
        }))
    };
    store
        .edit_rider(rider_id, None, &edit)
        .await
        .expect("force rider state")
        .value
}

/// A rider uploaded by `owner_id` and forced into `state`.
pub async fn rider_in(store: &MemoryStore, owner_id: i64, state: SealState) -> Rider {
    let rider = upload(store, owner_id, RIDER_ONE).await;
    force(store, rider.id, state, None).await
}
