//! Seal lifecycle, redirect resolution and auto-promotion against the
//! in-memory store.

mod fixtures;

use fixtures::*;
use rider_seal::db::{MemoryStore, RiderStore};
use rider_seal::error::Error;
use rider_seal::models::actor::Actor;
use rider_seal::models::rider::SealState;
use rider_seal::services::enqueue::{self, EnqueueRequest};
use rider_seal::services::promotion::{self, PromotionOutcome};
use rider_seal::services::redirect::{self, MAX_REDIRECT_HOPS};
use rider_seal::services::seal::{self, NewContent, SealChange};
use rider_seal::services::tracker::{self, JobOutcome};
use rider_seal::services::integrity;

const ALL_STATES: [SealState; 4] = [
    SealState::None,
    SealState::Pending,
    SealState::Validated,
    SealState::Expired,
];

fn admin() -> Actor {
    Actor::admin(ADMIN)
}

fn score(score: i16) -> JobOutcome {
    JobOutcome {
        score,
        summary: Some("ok".to_string()),
        result: None,
    }
}

#[tokio::test]
async fn test_expired_is_terminal() {
    let store = MemoryStore::new();
    let rider = rider_in(&store, OWNER, SealState::Expired).await;

    for target in ALL_STATES {
        let err = seal::transition(&store, &admin(), rider.id, &SealChange::to(target))
            .await
            .unwrap_err();
        assert!(err.is_precondition(), "expired -> {target} gave {err:?}");
    }

    let err = seal::request_manual_review(&store, &Actor::user(OWNER), rider.id)
        .await
        .unwrap_err();
    assert!(err.is_precondition());

    let content = NewContent {
        content_hash: integrity::compute_hash(RIDER_TWO),
        byte_size: RIDER_TWO.len() as i64,
        content_key: None,
    };
    let err = seal::reupload(&store, &Actor::user(OWNER), rider.id, content)
        .await
        .unwrap_err();
    assert!(err.is_precondition());

    let after = store.rider_by_id(rider.id).await.unwrap().unwrap();
    assert_eq!(after.seal_state, SealState::Expired);
    assert!(store.audit_trail(rider.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_transition_table() {
    for from in ALL_STATES {
        for to in ALL_STATES {
            let store = MemoryStore::new();
            let rider = rider_in(&store, OWNER, from).await;
            let result = seal::transition(&store, &admin(), rider.id, &SealChange::to(to)).await;

            let allowed = match from {
                SealState::None | SealState::Pending => to != SealState::None || from == to,
                SealState::Validated => to == SealState::Expired || to == SealState::Validated,
                SealState::Expired => false,
            };
            match result {
                Ok(updated) => {
                    assert!(allowed, "{from} -> {to} should be denied");
                    assert_eq!(updated.seal_state, to);
                    let audited = !store.audit_trail(rider.id).await.unwrap().is_empty();
                    assert_eq!(audited, from != to, "{from} -> {to} audit");
                }
                Err(e) => {
                    assert!(!allowed, "{from} -> {to} should be allowed, got {e:?}");
                    assert!(e.is_precondition());
                }
            }
        }
    }
}

#[tokio::test]
async fn test_transitions_need_privilege() {
    let store = MemoryStore::new();
    let rider = upload(&store, OWNER, RIDER_ONE).await;
    let err = seal::transition(
        &store,
        &Actor::user(OWNER),
        rider.id,
        &SealChange::to(SealState::Validated),
    )
    .await
    .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));
}

#[tokio::test]
async fn test_validation_sets_published_at_and_audits_actor() {
    let store = MemoryStore::new();
    let rider = upload(&store, OWNER, RIDER_ONE).await;
    let change = SealChange::to(SealState::Validated).with_reason("checked by hand");

    let validated = seal::transition(&store, &admin(), rider.id, &change).await.unwrap();
    assert!(validated.published_at.is_some());

    let trail = store.audit_trail(rider.id).await.unwrap();
    assert_eq!(trail.len(), 1);
    assert_eq!(trail[0].actor_id, Some(ADMIN));
    assert_eq!(trail[0].old_state, SealState::None);
    assert_eq!(trail[0].new_state, SealState::Validated);
    assert_eq!(trail[0].reason.as_deref(), Some("checked by hand"));
}

#[tokio::test]
async fn test_expiry_keeps_existing_pointer() {
    let store = MemoryStore::new();
    let replacement = rider_in(&store, OWNER, SealState::Validated).await;
    let rider = rider_in(&store, OWNER, SealState::Pending).await;
    force(&store, rider.id, SealState::Pending, Some(replacement.id)).await;

    let expired = seal::transition(&store, &admin(), rider.id, &SealChange::to(SealState::Expired))
        .await
        .unwrap();
    assert_eq!(expired.superseded_by, Some(replacement.id));
    assert!(expired.expired_at.is_some());
}

#[tokio::test]
async fn test_replacement_rules() {
    let store = MemoryStore::new();
    let rider = rider_in(&store, OWNER, SealState::Validated).await;
    let pending = rider_in(&store, OWNER, SealState::Pending).await;
    let foreign = rider_in(&store, OTHER_OWNER, SealState::Validated).await;

    for candidate in [pending.id, foreign.id, rider.id] {
        let change = SealChange::to(SealState::Expired).with_replacement(candidate);
        let err = seal::transition(&store, &admin(), rider.id, &change).await.unwrap_err();
        assert!(err.is_precondition(), "candidate {candidate}: {err:?}");
    }

    let change = SealChange::to(SealState::Pending).with_replacement(pending.id);
    assert!(matches!(
        seal::transition(&store, &admin(), pending.id, &change).await,
        Err(Error::Validation(_))
    ));

    let after = store.rider_by_id(rider.id).await.unwrap().unwrap();
    assert_eq!(after.seal_state, SealState::Validated);
}

#[tokio::test]
async fn test_redirect_only_while_expired() {
    let store = MemoryStore::new();
    let target = rider_in(&store, OWNER, SealState::Validated).await;
    let rider = rider_in(&store, OWNER, SealState::Validated).await;

    let err = seal::set_redirect(&store, &Actor::user(OWNER), rider.id, Some(target.id))
        .await
        .unwrap_err();
    assert!(err.is_precondition());

    force(&store, rider.id, SealState::Expired, None).await;
    let updated = seal::set_redirect(&store, &Actor::user(OWNER), rider.id, Some(target.id))
        .await
        .unwrap();
    assert_eq!(updated.superseded_by, Some(target.id));

    let err = seal::set_redirect(&store, &Actor::user(OTHER_OWNER), rider.id, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Forbidden(_)));

    let cleared = seal::set_redirect(&store, &Actor::user(OWNER), rider.id, None)
        .await
        .unwrap();
    assert_eq!(cleared.superseded_by, None);
}

#[tokio::test]
async fn test_resolver_rechecks_target_state() {
    let store = MemoryStore::new();
    let target = rider_in(&store, OWNER, SealState::Validated).await;
    let rider = rider_in(&store, OWNER, SealState::Expired).await;
    let rider = seal::set_redirect(&store, &Actor::user(OWNER), rider.id, Some(target.id))
        .await
        .unwrap();

    let resolution = redirect::resolve(&store, &rider).await.unwrap();
    assert_eq!(resolution.target, Some(target.token));

    // The target expires later without a successor: the stale pointer no
    // longer resolves.
    seal::transition(&store, &admin(), target.id, &SealChange::to(SealState::Expired))
        .await
        .unwrap();
    let resolution = redirect::resolve(&store, &rider).await.unwrap();
    assert!(!resolution.is_resolved());
    assert!(!resolution.cycle_detected);
}

/// Mirror of the resolver over a plain pointer table.
fn expected_resolution(
    nodes: &[(SealState, Option<usize>)],
    source: usize,
) -> (Option<usize>, bool, usize) {
    let mut visited = vec![source];
    let mut next = nodes[source].1;
    let mut hops = 0;
    while let Some(current) = next {
        if hops == MAX_REDIRECT_HOPS {
            return (None, false, hops);
        }
        if visited.contains(&current) {
            return (None, true, hops);
        }
        visited.push(current);
        hops += 1;
        if nodes[current].0 == SealState::Validated {
            return (Some(current), false, hops);
        }
        next = nodes[current].1;
    }
    (None, false, hops)
}

#[tokio::test]
async fn test_redirect_terminates_on_every_small_graph() {
    const NODES: usize = 3;
    let states = [SealState::Pending, SealState::Validated, SealState::Expired];
    // Each node: a state and a pointer (none, or any node including itself).
    let choices_per_node = states.len() * (NODES + 1);
    let total = choices_per_node.pow(NODES as u32);

    for graph in 0..total {
        let mut code = graph;
        let mut nodes = Vec::with_capacity(NODES);
        for _ in 0..NODES {
            let choice = code % choices_per_node;
            code /= choices_per_node;
            let state = states[choice % states.len()];
            let pointer = match choice / states.len() {
                0 => None,
                n => Some(n - 1),
            };
            nodes.push((state, pointer));
        }

        let store = MemoryStore::new();
        let mut riders = Vec::new();
        for _ in 0..NODES {
            riders.push(upload(&store, OWNER, RIDER_ONE).await);
        }
        for (i, (state, pointer)) in nodes.iter().enumerate() {
            let pointer = pointer.map(|p| riders[p].id);
            riders[i] = force(&store, riders[i].id, *state, pointer).await;
        }

        for (source, rider) in riders.iter().enumerate() {
            let resolution = redirect::resolve(&store, rider).await.unwrap();
            assert!(resolution.hops <= MAX_REDIRECT_HOPS);

            if rider.seal_state != SealState::Expired {
                assert!(!resolution.is_resolved());
                continue;
            }
            let (target, cycle, hops) = expected_resolution(&nodes, source);
            assert_eq!(
                resolution.target,
                target.map(|t| riders[t].token),
                "graph {nodes:?} from {source}"
            );
            assert_eq!(resolution.cycle_detected, cycle, "graph {nodes:?} from {source}");
            assert_eq!(resolution.hops, hops, "graph {nodes:?} from {source}");
        }
    }
}

#[tokio::test]
async fn test_self_reference_is_a_cycle() {
    let store = MemoryStore::new();
    let rider = upload(&store, OWNER, RIDER_ONE).await;
    let rider = force(&store, rider.id, SealState::Expired, Some(rider.id)).await;

    let resolution = redirect::resolve(&store, &rider).await.unwrap();
    assert!(resolution.cycle_detected);
    assert!(!resolution.is_resolved());
}

#[tokio::test]
async fn test_long_chain_hits_hop_budget() {
    for (length, resolves) in [(MAX_REDIRECT_HOPS, true), (MAX_REDIRECT_HOPS + 1, false)] {
        let store = MemoryStore::new();
        let mut chain = Vec::new();
        for _ in 0..=length {
            chain.push(upload(&store, OWNER, RIDER_ONE).await);
        }
        // chain[0] -> chain[1] -> ... -> chain[length], only the last validated.
        for i in 0..length {
            force(&store, chain[i].id, SealState::Expired, Some(chain[i + 1].id)).await;
        }
        force(&store, chain[length].id, SealState::Validated, None).await;

        let source = store.rider_by_id(chain[0].id).await.unwrap().unwrap();
        let resolution = redirect::resolve(&store, &source).await.unwrap();
        assert_eq!(resolution.is_resolved(), resolves, "chain of {length}");
        assert!(!resolution.cycle_detected);
        assert_eq!(resolution.hops, MAX_REDIRECT_HOPS);
    }
}

#[tokio::test]
async fn test_scenario_analysis_promotes_then_expiry_redirects() {
    let store = MemoryStore::new();

    // D1 uploaded -> h1, none.
    let d1 = upload(&store, OWNER, RIDER_ONE).await;
    assert_eq!(d1.seal_state, SealState::None);
    assert_eq!(d1.content_hash.as_deref(), Some(integrity::compute_hash(RIDER_ONE).as_str()));

    // Enqueue J1, then a second enqueue attaches to it.
    let request = EnqueueRequest::for_rider(&d1);
    let first = enqueue::enqueue(&store, &request).await.unwrap();
    assert!(first.created);
    let second = enqueue::enqueue(&store, &request).await.unwrap();
    assert!(!second.created);
    assert_eq!(second.job.job_uid, first.job.job_uid);

    // J1 completes with 92 -> D1 validated.
    tracker::claim(&store, &first.job.job_uid).await.unwrap();
    let completion = tracker::complete(&store, &first.job.job_uid, &score(92))
        .await
        .unwrap();
    assert_eq!(completion.promotion(), PromotionOutcome::Promoted);
    let d1 = store.rider_by_id(d1.id).await.unwrap().unwrap();
    assert_eq!(d1.seal_state, SealState::Validated);
    assert_eq!(d1.last_score, Some(92));

    // Admin expires D1 pointing at validated D2.
    let d2 = upload(&store, OWNER, RIDER_TWO).await;
    let d2 = seal::transition(&store, &admin(), d2.id, &SealChange::to(SealState::Validated))
        .await
        .unwrap();
    let change = SealChange::to(SealState::Expired).with_replacement(d2.id);
    let d1 = seal::transition(&store, &admin(), d1.id, &change).await.unwrap();

    let resolution = redirect::resolve(&store, &d1).await.unwrap();
    assert_eq!(resolution.target, Some(d2.token));
    assert!(!resolution.cycle_detected);
}

#[tokio::test]
async fn test_scenario_mutual_expiry_cycle() {
    let store = MemoryStore::new();
    let d3 = upload(&store, OWNER, RIDER_ONE).await;
    let d4 = upload(&store, OWNER, RIDER_TWO).await;
    let d3 = force(&store, d3.id, SealState::Expired, Some(d4.id)).await;
    force(&store, d4.id, SealState::Expired, Some(d3.id)).await;

    let resolution = redirect::resolve(&store, &d3).await.unwrap();
    assert!(!resolution.is_resolved());
    assert!(resolution.cycle_detected);
}

#[tokio::test]
async fn test_promotion_applied_twice_audits_once() {
    let store = MemoryStore::new();
    let rider = upload(&store, OWNER, RIDER_ONE).await;
    let outcome = enqueue::enqueue(&store, &EnqueueRequest::for_rider(&rider))
        .await
        .unwrap();
    tracker::claim(&store, &outcome.job.job_uid).await.unwrap();
    let completion = tracker::complete(&store, &outcome.job.job_uid, &score(95))
        .await
        .unwrap();
    assert_eq!(completion.promotion(), PromotionOutcome::Promoted);

    // A retried notification re-applies the same result.
    let again = promotion::apply(&store, &completion.job).await.unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].outcome, PromotionOutcome::Unchanged);
    let repeat = tracker::complete(&store, &outcome.job.job_uid, &score(95))
        .await
        .unwrap();
    assert_eq!(repeat.promotion(), PromotionOutcome::Unchanged);

    let trail = store.audit_trail(rider.id).await.unwrap();
    let promotions = trail
        .iter()
        .filter(|e| e.new_state == SealState::Validated)
        .count();
    assert_eq!(promotions, 1);
}

#[tokio::test]
async fn test_threshold_and_manual_review_block_promotion() {
    let store = MemoryStore::new();
    let at_threshold = upload(&store, OWNER, RIDER_ONE).await;
    let reviewed = upload(&store, OWNER, RIDER_TWO).await;
    seal::request_manual_review(&store, &Actor::user(OWNER), reviewed.id)
        .await
        .unwrap();

    for (rider, score_value) in [(&at_threshold, 80), (&reviewed, 99)] {
        let outcome = enqueue::enqueue(&store, &EnqueueRequest::for_rider(rider))
            .await
            .unwrap();
        tracker::claim(&store, &outcome.job.job_uid).await.unwrap();
        let completion = tracker::complete(&store, &outcome.job.job_uid, &score(score_value))
            .await
            .unwrap();
        assert_eq!(completion.promotion(), PromotionOutcome::ScoreRecorded);
    }

    let at_threshold = store.rider_by_id(at_threshold.id).await.unwrap().unwrap();
    assert_eq!(at_threshold.seal_state, SealState::None);
    assert_eq!(at_threshold.last_score, Some(80));
    let reviewed = store.rider_by_id(reviewed.id).await.unwrap().unwrap();
    assert_eq!(reviewed.seal_state, SealState::Pending);
}

#[tokio::test]
async fn test_reupload_resets_and_ignores_stale_result() {
    let store = MemoryStore::new();
    let rider = upload(&store, OWNER, RIDER_ONE).await;
    seal::transition(&store, &admin(), rider.id, &SealChange::to(SealState::Pending))
        .await
        .unwrap();

    let outcome = enqueue::enqueue(&store, &EnqueueRequest::for_rider(&rider))
        .await
        .unwrap();
    tracker::claim(&store, &outcome.job.job_uid).await.unwrap();

    // New content arrives while the old one is being analyzed.
    let content = NewContent {
        content_hash: integrity::compute_hash(RIDER_TWO).to_uppercase(),
        byte_size: RIDER_TWO.len() as i64,
        content_key: Some("riders/new".to_string()),
    };
    let reset = seal::reupload(&store, &Actor::user(OWNER), rider.id, content)
        .await
        .unwrap();
    assert_eq!(reset.seal_state, SealState::None);
    assert_eq!(reset.last_score, None);
    assert_eq!(reset.content_hash, Some(integrity::compute_hash(RIDER_TWO)));

    let completion = tracker::complete(&store, &outcome.job.job_uid, &score(99))
        .await
        .unwrap();
    assert_eq!(completion.promotion(), PromotionOutcome::Unchanged);
    let after = store.rider_by_id(rider.id).await.unwrap().unwrap();
    assert_eq!(after.seal_state, SealState::None);
    assert_eq!(after.last_score, None);
}

#[tokio::test]
async fn test_seal_retries_lost_races() {
    let store = MemoryStore::new();
    let rider = upload(&store, OWNER, RIDER_ONE).await;

    store.inject_transaction_failures(2);
    let updated = seal::transition(&store, &admin(), rider.id, &SealChange::to(SealState::Pending))
        .await
        .unwrap();
    assert_eq!(updated.seal_state, SealState::Pending);

    store.inject_transaction_failures(5);
    let err = seal::transition(&store, &admin(), rider.id, &SealChange::to(SealState::Validated))
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    let after = store.rider_by_id(rider.id).await.unwrap().unwrap();
    assert_eq!(after.seal_state, SealState::Pending);
}
