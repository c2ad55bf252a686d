//! Token lifecycle through a registry
//!
//! Covers registration, exclusivity, reindexing, expiry visibility,
//! reclamation and the events each transition emits.

#![allow(clippy::unwrap_used)]

use assert_matches::assert_matches;
use chrono::{Duration, TimeZone, Utc};
use latchkey_core::{
    BroadcastEventSink, EventSink, FanoutEventSink, ObjectKey, PrincipalId, RegistryStats, Token,
    TokenError, TokenEvent, TokenKind, TokenRegistry,
};
use latchkey_testkit::{registry_at, t0, RecordingEventSink};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::{Arc, Barrier};
use std::thread;

fn key(name: &str) -> ObjectKey {
    ObjectKey::from(name)
}

fn principals(names: &[&str]) -> BTreeSet<PrincipalId> {
    names.iter().copied().map(PrincipalId::from).collect()
}

// ========== End-to-end ==========

#[test]
fn stale_claim_is_superseded_after_expiry() {
    let (registry, clock, events) = registry_at(t0());

    let alice = Token::exclusive("A", "alice", Some(Duration::seconds(10))).unwrap();
    registry.register(&alice).unwrap();
    assert_eq!(registry.get(&key("A")), Some(alice.clone()));

    clock.advance(Duration::seconds(11));
    assert_eq!(registry.get(&key("A")), None);
    assert_eq!(registry.iter_for_principal(&"alice".into()).count(), 0);
    assert_eq!(alice.ended().unwrap(), Some(t0() + Duration::seconds(10)));

    let bob = Token::exclusive("A", "bob", None).unwrap();
    registry.register(&bob).unwrap();

    assert_eq!(registry.get(&key("A")), Some(bob.clone()));
    assert_eq!(
        registry.stats(),
        RegistryStats {
            primary: 1,
            expiration_slots: 0,
            principals: 1,
        }
    );
    assert!(registry.check_consistency().is_empty());
    // Natural expiry is silent; only the two starts are reported.
    assert_eq!(events.names(), ["token_started", "token_started"]);
}

// ========== Exclusivity ==========

#[test]
fn one_active_claim_per_object() {
    let (registry, _clock, events) = registry_at(t0());
    let first = Token::shared("doc", ["alice", "bob"], None).unwrap();
    registry.register(&first).unwrap();
    events.clear();

    for contender in [
        Token::exclusive("doc", "carol", None).unwrap(),
        Token::shared("doc", ["carol"], None).unwrap(),
        Token::freeze("doc"),
        Token::endable_freeze("doc", None).unwrap(),
    ] {
        assert_matches!(
            registry.register(&contender),
            Err(TokenError::RegistrationConflict { existing, .. }) if existing == first.id()
        );
    }
    assert!(events.is_empty());
    assert_eq!(registry.active_count(), 1);
    assert_eq!(registry.iter_for_principal(&"carol".into()).count(), 0);
}

#[test]
fn permanent_freeze_is_never_superseded() {
    let (registry, clock, _events) = registry_at(t0());
    registry.register(&Token::freeze("vault")).unwrap();

    clock.advance(Duration::days(365));
    let lock = Token::exclusive("vault", "alice", None).unwrap();
    assert_matches!(
        registry.register(&lock),
        Err(TokenError::RegistrationConflict { .. })
    );
}

#[test]
fn ended_claim_frees_the_object_immediately() {
    let (registry, _clock, _events) = registry_at(t0());
    let first = Token::exclusive("doc", "alice", None).unwrap();
    registry.register(&first).unwrap();
    first.end().unwrap();

    assert_eq!(registry.stats(), RegistryStats::default());
    let second = Token::exclusive("doc", "bob", None).unwrap();
    registry.register(&second).unwrap();
    assert_eq!(registry.get(&key("doc")), Some(second));
}

// ========== Re-registration ==========

#[test]
fn re_registering_without_changes_is_a_no_op() {
    let (registry, _clock, events) = registry_at(t0());
    let token = Token::shared("doc", ["alice", "bob"], Some(Duration::minutes(1))).unwrap();
    registry.register(&token).unwrap();
    let stats = registry.stats();
    let snapshot = registry.snapshot();

    registry.register(&token).unwrap();
    registry.register(&token).unwrap();

    assert_eq!(registry.stats(), stats);
    assert_eq!(registry.snapshot().primary, snapshot.primary);
    assert_eq!(events.names(), ["token_started"]);
    assert_eq!(token.started().unwrap(), t0());
}

#[test]
fn explicitly_ended_token_is_not_re_claimed() {
    let (registry, _clock, events) = registry_at(t0());
    let token = Token::exclusive("doc", "alice", None).unwrap();
    registry.register(&token).unwrap();
    token.end().unwrap();
    events.clear();

    registry.register(&token).unwrap();

    assert_eq!(registry.get(&key("doc")), None);
    assert_eq!(registry.stats(), RegistryStats::default());
    assert!(events.is_empty());
}

// ========== Shared locks ==========

#[test]
fn shared_membership_changes_are_reindexed() {
    let (registry, _clock, events) = registry_at(t0());
    let token = Token::shared("doc", ["alice"], None).unwrap();
    registry.register(&token).unwrap();
    events.clear();

    token.add(["bob", "carol"]).unwrap();
    token.remove(["alice"]).unwrap();

    assert_eq!(token.principal_ids(), principals(&["bob", "carol"]));
    assert_eq!(registry.iter_for_principal(&"alice".into()).count(), 0);
    assert_eq!(registry.iter_for_principal(&"bob".into()).next(), Some(token.clone()));
    assert!(registry.check_consistency().is_empty());

    let recorded = events.events();
    assert_eq!(recorded.len(), 2);
    assert_matches!(
        &recorded[0],
        TokenEvent::PrincipalsChanged { old, .. } if *old == principals(&["alice"])
    );
    assert_matches!(
        &recorded[1],
        TokenEvent::PrincipalsChanged { old, .. } if *old == principals(&["alice", "bob", "carol"])
    );
}

#[test]
fn adding_existing_members_emits_nothing() {
    let (registry, _clock, events) = registry_at(t0());
    let token = Token::shared("doc", ["alice"], None).unwrap();
    registry.register(&token).unwrap();
    events.clear();

    token.add(["alice"]).unwrap();
    token.remove(["zed"]).unwrap();
    assert!(events.is_empty());
}

#[test]
fn removing_the_last_principal_ends_the_lock() {
    let (registry, _clock, events) = registry_at(t0());
    let token = Token::shared("doc", ["alice", "bob"], None).unwrap();
    registry.register(&token).unwrap();
    events.clear();

    token.remove(["alice", "bob"]).unwrap();

    assert_eq!(token.ended().unwrap(), Some(t0()));
    assert!(!token.is_active());
    assert_eq!(registry.iter_for_principal(&"alice".into()).count(), 0);
    assert_eq!(registry.iter_for_principal(&"bob".into()).count(), 0);
    assert_eq!(registry.stats(), RegistryStats::default());
    assert_eq!(events.names(), ["token_ended"]);
}

// ========== Expiry ==========

#[test]
fn expired_tokens_stay_indexed_until_swept() {
    let (registry, clock, _events) = registry_at(t0());
    let token = Token::exclusive("doc", "alice", Some(Duration::seconds(1))).unwrap();
    registry.register(&token).unwrap();

    clock.advance(Duration::seconds(2));
    assert_eq!(registry.get(&key("doc")), None);
    assert_eq!(registry.iter_for_principal(&"alice".into()).count(), 0);
    assert_eq!(registry.stats().primary, 1);

    // Any registration sweeps in lazy mode.
    registry
        .register(&Token::exclusive("other", "bob", None).unwrap())
        .unwrap();
    assert_eq!(
        registry.stats(),
        RegistryStats {
            primary: 1,
            expiration_slots: 0,
            principals: 1,
        }
    );
    assert!(registry.check_consistency().is_empty());
}

#[test]
fn expiration_boundary_is_inclusive() {
    let (registry, clock, _events) = registry_at(t0());
    let token = Token::exclusive("doc", "alice", Some(Duration::seconds(5))).unwrap();
    registry.register(&token).unwrap();

    clock.advance(Duration::seconds(5) - Duration::milliseconds(1));
    assert!(token.is_active());
    clock.advance(Duration::milliseconds(1));
    assert!(!token.is_active());
    assert_eq!(token.remaining_duration().unwrap(), Some(Duration::zero()));
    assert_eq!(registry.sweep(), 1);
}

// ========== Durations ==========

#[test]
fn duration_resolves_against_start() {
    let (registry, clock, events) = registry_at(t0());
    let token = Token::exclusive("doc", "alice", Some(Duration::minutes(5))).unwrap();
    assert_eq!(token.duration(), Some(Duration::minutes(5)));
    registry.register(&token).unwrap();
    assert_eq!(token.expiration().unwrap(), Some(t0() + Duration::minutes(5)));

    clock.advance(Duration::minutes(2));
    token.set_duration(Some(Duration::minutes(10))).unwrap();
    assert_eq!(token.expiration().unwrap(), Some(t0() + Duration::minutes(10)));
    assert_eq!(token.remaining_duration().unwrap(), Some(Duration::minutes(8)));

    token
        .set_remaining_duration(Some(Duration::minutes(10)))
        .unwrap();
    assert_eq!(token.expiration().unwrap(), Some(t0() + Duration::minutes(12)));
    assert_eq!(token.duration(), Some(Duration::minutes(12)));

    token.set_duration(None).unwrap();
    assert_eq!(token.expiration().unwrap(), None);
    assert_eq!(registry.stats().expiration_slots, 0);

    let olds: Vec<_> = events
        .events()
        .into_iter()
        .filter_map(|event| match event {
            TokenEvent::ExpirationChanged { old, .. } => Some(old),
            _ => None,
        })
        .collect();
    assert_eq!(
        olds,
        [
            Some(t0() + Duration::minutes(5)),
            Some(t0() + Duration::minutes(10)),
            Some(t0() + Duration::minutes(12)),
        ]
    );
}

#[test]
fn pending_duration_can_change_before_registration() {
    let (registry, clock, events) = registry_at(t0());
    let token = Token::endable_freeze("doc", Some(Duration::minutes(1))).unwrap();
    token.set_duration(Some(Duration::minutes(3))).unwrap();
    assert_matches!(token.expiration(), Err(TokenError::Unregistered { .. }));

    clock.advance(Duration::minutes(1));
    registry.register(&token).unwrap();
    assert_eq!(
        token.expiration().unwrap(),
        Some(t0() + Duration::minutes(4))
    );
    assert_eq!(events.names(), ["token_started"]);
}

#[test]
fn unchanged_expiration_writes_are_silent() {
    let (registry, _clock, events) = registry_at(t0());
    let token = Token::exclusive("doc", "alice", Some(Duration::minutes(5))).unwrap();
    registry.register(&token).unwrap();
    events.clear();

    token
        .set_expiration(Some(t0() + Duration::minutes(5)))
        .unwrap();
    token.set_duration(Some(Duration::minutes(5))).unwrap();
    assert!(events.is_empty());
}

#[test]
fn rfc3339_expirations_need_an_offset() {
    let (registry, _clock, _events) = registry_at(t0());
    let token = Token::exclusive("doc", "alice", None).unwrap();
    registry.register(&token).unwrap();

    token
        .set_expiration_rfc3339(Some("2024-05-01T12:30:00+02:00"))
        .unwrap();
    assert_eq!(
        token.expiration().unwrap(),
        Some(Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 0).unwrap())
    );

    assert_matches!(
        token.set_expiration_rfc3339(Some("2024-05-01T12:30:00")),
        Err(TokenError::Validation { .. })
    );
    token.set_expiration_rfc3339(None).unwrap();
    assert_eq!(token.expiration().unwrap(), None);
}

#[test]
fn out_of_range_durations_are_rejected() {
    let huge = Some(Duration::days(100_000_000));
    let (registry, _clock, events) = registry_at(t0());

    // Pending duration resolved at registration.
    let pending = Token::exclusive("doc", "alice", huge).unwrap();
    assert_matches!(
        registry.register(&pending),
        Err(TokenError::Validation { .. })
    );
    assert!(!pending.is_registered());
    assert_eq!(pending.duration(), huge);
    assert_eq!(registry.stats(), RegistryStats::default());
    assert!(events.is_empty());

    // The rejected token can still register once its duration is sane.
    pending.set_duration(Some(Duration::minutes(1))).unwrap();
    registry.register(&pending).unwrap();

    let token = Token::shared("memo", ["bob"], Some(Duration::minutes(5))).unwrap();
    registry.register(&token).unwrap();
    events.clear();

    assert_matches!(token.set_duration(huge), Err(TokenError::Validation { .. }));
    assert_matches!(
        token.set_remaining_duration(huge),
        Err(TokenError::Validation { .. })
    );
    assert_eq!(token.expiration().unwrap(), Some(t0() + Duration::minutes(5)));
    assert!(events.is_empty());
    assert!(registry.check_consistency().is_empty());
}

#[test]
fn negative_durations_are_rejected() {
    assert_matches!(
        Token::exclusive("doc", "alice", Some(Duration::seconds(-1))),
        Err(TokenError::Validation { .. })
    );

    let (registry, _clock, _events) = registry_at(t0());
    let token = Token::shared("doc", ["alice"], None).unwrap();
    registry.register(&token).unwrap();
    assert_matches!(
        token.set_remaining_duration(Some(Duration::seconds(-5))),
        Err(TokenError::Validation { .. })
    );
    assert_eq!(token.expiration().unwrap(), None);
}

// ========== Ended tokens and unsupported operations ==========

#[test]
fn ended_tokens_are_immutable() {
    let (registry, _clock, _events) = registry_at(t0());
    let token = Token::shared("doc", ["alice"], None).unwrap();
    registry.register(&token).unwrap();
    token.end().unwrap();

    assert_matches!(token.end(), Err(TokenError::Ended { .. }));
    assert_matches!(
        token.set_expiration(Some(t0())),
        Err(TokenError::Ended { .. })
    );
    assert_matches!(
        token.set_duration(Some(Duration::minutes(1))),
        Err(TokenError::Ended { .. })
    );
    assert_matches!(token.add(["bob"]), Err(TokenError::Ended { .. }));
    assert_matches!(token.remove(["alice"]), Err(TokenError::Ended { .. }));
}

#[test]
fn variants_reject_operations_they_do_not_offer() {
    let (registry, _clock, _events) = registry_at(t0());
    let freeze = Token::freeze("vault");
    let lock = Token::exclusive("doc", "alice", None).unwrap();
    registry.register(&freeze).unwrap();
    registry.register(&lock).unwrap();

    assert_matches!(
        freeze.end(),
        Err(TokenError::Unsupported { kind: TokenKind::Freeze, .. })
    );
    assert_matches!(
        freeze.set_remaining_duration(None),
        Err(TokenError::Unsupported { .. })
    );
    assert_matches!(
        lock.add(["bob"]),
        Err(TokenError::Unsupported { kind: TokenKind::ExclusiveLock, .. })
    );
    assert_eq!(freeze.expiration().unwrap(), None);
    assert_eq!(freeze.ended().unwrap(), None);
    assert!(freeze.principal_ids().is_empty());
}

#[test]
fn mutations_before_registration_report_unregistered() {
    let token = Token::shared("doc", ["alice"], None).unwrap();
    assert_matches!(token.end(), Err(TokenError::Unregistered { .. }));
    assert_matches!(token.add(["bob"]), Err(TokenError::Unregistered { .. }));
    assert_matches!(token.started(), Err(TokenError::Unregistered { .. }));
    assert!(!token.is_active());
}

// ========== Concurrency ==========

#[test]
fn concurrent_registrations_admit_one_claim() {
    const THREADS: usize = 8;

    for _ in 0..20 {
        let (registry, _clock, events) = registry_at(t0());
        let barrier = Arc::new(Barrier::new(THREADS));

        let handles: Vec<_> = (0..THREADS)
            .map(|i| {
                let registry = registry.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let token = Token::exclusive("doc", format!("user-{i}"), None).unwrap();
                    barrier.wait();
                    registry.register(&token).map(|token| token.id())
                })
            })
            .collect();
        let results: Vec<_> = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .collect();

        let winners: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
        assert_eq!(winners.len(), 1);
        for result in &results {
            if let Err(err) = result {
                assert_matches!(
                    err,
                    TokenError::RegistrationConflict { existing, .. } if existing == winners[0]
                );
            }
        }
        assert_eq!(registry.get(&key("doc")).map(|token| token.id()), Some(*winners[0]));
        assert!(registry.check_consistency().is_empty());
        assert_eq!(events.names(), ["token_started"]);
    }
}

// ========== Events ==========

#[test]
fn freeze_lifecycle_events() {
    let (registry, clock, events) = registry_at(t0());
    let token = Token::endable_freeze("vault", None).unwrap();
    registry.register(&token).unwrap();
    clock.advance(Duration::seconds(30));
    token
        .set_remaining_duration(Some(Duration::minutes(1)))
        .unwrap();
    token.end().unwrap();

    assert_eq!(
        events.names(),
        ["token_started", "expiration_changed", "token_ended"]
    );
    assert!(events.events().iter().all(|event| *event.token() == token));
    assert_eq!(token.ended().unwrap(), Some(t0() + Duration::seconds(30)));
}

/// Sink that queries the registry from inside `notify`
#[derive(Debug, Default)]
struct Reentrant {
    registry: Mutex<Option<TokenRegistry>>,
    seen: Mutex<Vec<Option<Token>>>,
}

impl EventSink for Reentrant {
    fn notify(&self, event: &TokenEvent) {
        let registry = self.registry.lock().clone();
        if let Some(registry) = registry {
            self.seen.lock().push(registry.get(event.token().target()));
        }
    }
}

#[test]
fn sinks_may_query_the_registry() {
    let sink = Arc::new(Reentrant::default());
    let registry = TokenRegistry::builder()
        .clock(latchkey_core::ManualClock::new(t0()))
        .shared_event_sink(sink.clone())
        .build();
    *sink.registry.lock() = Some(registry.clone());

    let token = Token::exclusive("doc", "alice", None).unwrap();
    registry.register(&token).unwrap();
    token.end().unwrap();

    // Indices already reflect each change when the event arrives.
    assert_eq!(*sink.seen.lock(), [Some(token), None]);
    sink.registry.lock().take();
}

#[test]
fn fanout_and_broadcast_sinks_receive_events() {
    let recording = Arc::new(RecordingEventSink::new());
    let broadcast = BroadcastEventSink::new(16);
    let mut receiver = broadcast.subscribe();
    let registry = TokenRegistry::builder()
        .clock(latchkey_core::ManualClock::new(t0()))
        .event_sink(
            FanoutEventSink::new()
                .with(recording.clone())
                .with(Arc::new(broadcast.clone())),
        )
        .build();

    let token = Token::freeze("vault");
    registry.register(&token).unwrap();

    assert_eq!(recording.names(), ["token_started"]);
    let received = receiver.try_recv().unwrap();
    assert_eq!(received.name(), "token_started");
    assert_eq!(*received.token(), token);
}
