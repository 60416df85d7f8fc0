//! Routing and cost-ledger scenarios

use std::sync::Arc;

use chrono::{Duration, Utc};
use vox_agent::clock::{Clock, ManualClock};
use vox_agent::cost::{CostEntry, CostLedger, StageUnits};
use vox_agent::router::{AdaptiveRouter, RouterConfig};
use vox_agent::types::{InteractionHint, Mode, RouteReason, Stage};

fn entry(amount: f64, age: Duration) -> CostEntry {
    CostEntry {
        timestamp: Utc::now() - age,
        mode: Mode::Premium,
        stage: Stage::Realtime,
        amount,
        tokens: None,
        audio_seconds: None,
    }
}

#[test]
fn routing_by_budget() {
    // $0.60 spent today, $1.00 budget, 50% threshold
    let ledger = CostLedger::from_entries(1.0, 30.0, vec![entry(0.60, Duration::minutes(30))]);
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(12));
    let router = AdaptiveRouter::new(RouterConfig::default(), ledger, clock);

    let decision = router.route(None);
    assert_eq!(decision.mode, Mode::Efficient);
    assert_eq!(decision.reason, RouteReason::CostLimit);
}

#[test]
fn routing_by_hour() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(8));
    let router = AdaptiveRouter::new(RouterConfig::default(), CostLedger::new(1.0, 30.0), clock);
    let decision = router.route(None);
    assert_eq!(decision.mode, Mode::Efficient);
    assert_eq!(decision.reason, RouteReason::TimeOfDay);

    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(12));
    let router = AdaptiveRouter::new(RouterConfig::default(), CostLedger::new(1.0, 30.0), clock);
    let decision = router.route(None);
    assert_eq!(decision.mode, Mode::Premium);
    assert_eq!(decision.reason, RouteReason::Default);
}

#[test]
fn forced_mode_set_and_clear_restores_automatic() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(2));
    let router = AdaptiveRouter::new(RouterConfig::default(), CostLedger::new(1.0, 30.0), clock);

    let automatic = router.route(None);
    assert_eq!(automatic.reason, RouteReason::TimeOfDay);

    router.set_forced_mode(Some(Mode::Premium));
    let forced = router.route(None);
    assert_eq!(forced.mode, Mode::Premium);
    assert_eq!(forced.reason, RouteReason::UserPreference);

    router.set_forced_mode(None);
    let restored = router.route(None);
    assert_eq!(restored.mode, automatic.mode);
    assert_eq!(restored.reason, automatic.reason);
}

#[test]
fn hint_only_applies_in_peak_hours() {
    let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(10));
    let router = AdaptiveRouter::new(RouterConfig::default(), CostLedger::new(1.0, 30.0), clock);
    let decision = router.route(Some(InteractionHint::Simple));
    assert_eq!(decision.mode, Mode::Efficient);
    assert_eq!(decision.reason, RouteReason::InteractionType);
}

#[test]
fn ledger_total_is_exact_sum_over_many_interactions() {
    let ledger = CostLedger::new(5.0, 100.0);
    let clock = ManualClock::at_hour(12);
    let mut expected = 0.0;

    for i in 0..50 {
        expected += ledger.record(
            Mode::Efficient,
            StageUnits::Transcribe { audio_secs: 2.0 + i as f64 },
            clock.now(),
        );
        expected += ledger.record(
            Mode::Efficient,
            StageUnits::Reason {
                input_tokens: 1_000 + i,
                output_tokens: 200,
            },
            clock.now(),
        );
        expected += ledger.record(
            Mode::Efficient,
            StageUnits::Synthesize { characters: 80 * (i + 1) },
            clock.now(),
        );
    }

    let metrics = ledger.metrics(clock.now());
    assert_eq!(metrics.count, 150);
    assert_eq!(metrics.total, expected);
    assert_eq!(metrics.today, expected);
}

#[test]
fn budget_exhaustion_affects_only_next_decision() {
    let ledger = CostLedger::new(0.10, 30.0);
    let clock = ManualClock::at_hour(12);
    let router = AdaptiveRouter::new(
        RouterConfig::default(),
        ledger.clone(),
        Arc::new(clock.clone()),
    );

    assert_eq!(router.route(None).reason, RouteReason::Default);

    // Costs land mid-interaction; the change shows up on the next route()
    ledger.record(
        Mode::Premium,
        StageUnits::Synthesize { characters: 20_000 },
        clock.now(),
    );
    assert!(ledger.exceeded_daily(clock.now()));
    assert_eq!(router.route(None).reason, RouteReason::CostLimit);
}

#[test]
fn ledger_snapshot_replay_preserves_aggregates() {
    let ledger = CostLedger::new(1.0, 30.0);
    let clock = ManualClock::at_hour(12);
    ledger.record(Mode::Premium, StageUnits::Synthesize { characters: 1_500 }, clock.now());
    ledger.record(
        Mode::Efficient,
        StageUnits::Reason {
            input_tokens: 10_000,
            output_tokens: 2_000,
        },
        clock.now(),
    );

    let replayed = CostLedger::from_entries(1.0, 30.0, ledger.entries());
    assert_eq!(
        replayed.metrics(clock.now()).total,
        ledger.metrics(clock.now()).total
    );
    assert_eq!(replayed.entries().len(), 2);
}
