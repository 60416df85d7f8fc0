//! Adaptive mode router
//!
//! Picks a backend per interaction from live budget, time of day, and the
//! caller's hint. Estimates feed telemetry only; they never gate behavior.

use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::clock::Clock;
use crate::cost::CostLedger;
use crate::types::{InteractionHint, Mode, RouteReason, RoutingDecision};

/// Telemetry estimates per mode
pub const PREMIUM_COST_ESTIMATE: f64 = 0.12;
pub const EFFICIENT_COST_ESTIMATE: f64 = 0.004;
pub const PREMIUM_LATENCY_MS: u64 = 500;
pub const EFFICIENT_LATENCY_MS: u64 = 2_000;

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub default_mode: Mode,
    /// Daily-usage percentage at which routing trips to efficient
    pub budget_threshold_pct: f64,
    /// Premium routing is allowed in [peak_start, peak_end)
    pub peak_hours_start: u32,
    pub peak_hours_end: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            default_mode: Mode::Premium,
            budget_threshold_pct: 50.0,
            peak_hours_start: 9,
            peak_hours_end: 17,
        }
    }
}

/// Per-utterance backend selection
pub struct AdaptiveRouter {
    config: RouterConfig,
    ledger: CostLedger,
    clock: Arc<dyn Clock>,
    forced: Mutex<Option<Mode>>,
}

impl AdaptiveRouter {
    pub fn new(config: RouterConfig, ledger: CostLedger, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            ledger,
            clock,
            forced: Mutex::new(None),
        }
    }

    /// Pin the mode regardless of budget and time; `None` returns routing
    /// to automatic behavior.
    pub fn set_forced_mode(&self, mode: Option<Mode>) {
        *self.forced.lock().unwrap() = mode;
    }

    pub fn forced_mode(&self) -> Option<Mode> {
        *self.forced.lock().unwrap()
    }

    /// Evaluate the decision chain for the next interaction
    pub fn route(&self, hint: Option<InteractionHint>) -> RoutingDecision {
        let decision = self.decide(hint);
        debug!(mode = %decision.mode, reason = ?decision.reason, "routing decision");
        decision
    }

    fn decide(&self, hint: Option<InteractionHint>) -> RoutingDecision {
        if let Some(mode) = *self.forced.lock().unwrap() {
            return decision(mode, RouteReason::UserPreference);
        }

        let now = self.clock.now();
        if self.ledger.daily_usage_pct(now) >= self.config.budget_threshold_pct {
            return decision(Mode::Efficient, RouteReason::CostLimit);
        }

        let hour = self.clock.hour_of_day();
        if hour < self.config.peak_hours_start || hour >= self.config.peak_hours_end {
            return decision(Mode::Efficient, RouteReason::TimeOfDay);
        }

        if hint == Some(InteractionHint::Simple) {
            return decision(Mode::Efficient, RouteReason::InteractionType);
        }

        decision(self.config.default_mode, RouteReason::Default)
    }
}

fn decision(mode: Mode, reason: RouteReason) -> RoutingDecision {
    let (estimated_cost, estimated_latency_ms) = match mode {
        Mode::Premium => (PREMIUM_COST_ESTIMATE, PREMIUM_LATENCY_MS),
        Mode::Efficient => (EFFICIENT_COST_ESTIMATE, EFFICIENT_LATENCY_MS),
    };
    RoutingDecision {
        mode,
        reason,
        estimated_cost,
        estimated_latency_ms,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::cost::{CostEntry, StageUnits};
    use crate::types::Stage;
    use chrono::{Duration, Utc};

    fn router_at_hour(hour: u32, ledger: CostLedger) -> AdaptiveRouter {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::at_hour(hour));
        AdaptiveRouter::new(RouterConfig::default(), ledger, clock)
    }

    #[test]
    fn test_forced_mode_wins() {
        let router = router_at_hour(3, CostLedger::new(1.0, 30.0));
        router.set_forced_mode(Some(Mode::Premium));

        let decision = router.route(Some(InteractionHint::Simple));
        assert_eq!(decision.mode, Mode::Premium);
        assert_eq!(decision.reason, RouteReason::UserPreference);

        // Clearing returns routing to automatic behavior
        router.set_forced_mode(None);
        let decision = router.route(None);
        assert_eq!(decision.reason, RouteReason::TimeOfDay);
    }

    #[test]
    fn test_budget_trips_cost_limit() {
        // $0.60 spent today against a $1.00 budget with a 50% threshold
        let now = Utc::now();
        let entry = CostEntry {
            timestamp: now - Duration::minutes(10),
            mode: Mode::Premium,
            stage: Stage::Realtime,
            amount: 0.60,
            tokens: None,
            audio_seconds: None,
        };
        let ledger = CostLedger::from_entries(1.0, 30.0, vec![entry]);
        let router = router_at_hour(12, ledger);

        let decision = router.route(None);
        assert_eq!(decision.mode, Mode::Efficient);
        assert_eq!(decision.reason, RouteReason::CostLimit);
    }

    #[test]
    fn test_budget_threshold_is_inclusive() {
        // Exactly at the threshold trips (>= not >)
        let now = Utc::now();
        let entry = CostEntry {
            timestamp: now - Duration::minutes(1),
            mode: Mode::Premium,
            stage: Stage::Realtime,
            amount: 0.50,
            tokens: None,
            audio_seconds: None,
        };
        let ledger = CostLedger::from_entries(1.0, 30.0, vec![entry]);
        let router = router_at_hour(12, ledger);

        let decision = router.route(None);
        assert_eq!(decision.reason, RouteReason::CostLimit);
    }

    #[test]
    fn test_off_peak_routes_efficient() {
        let router = router_at_hour(8, CostLedger::new(1.0, 30.0));
        let decision = router.route(None);
        assert_eq!(decision.mode, Mode::Efficient);
        assert_eq!(decision.reason, RouteReason::TimeOfDay);

        let router = router_at_hour(17, CostLedger::new(1.0, 30.0));
        assert_eq!(router.route(None).reason, RouteReason::TimeOfDay);

        let router = router_at_hour(23, CostLedger::new(1.0, 30.0));
        assert_eq!(router.route(None).reason, RouteReason::TimeOfDay);
    }

    #[test]
    fn test_peak_hour_defaults_to_premium() {
        let router = router_at_hour(12, CostLedger::new(1.0, 30.0));
        let decision = router.route(None);
        assert_eq!(decision.mode, Mode::Premium);
        assert_eq!(decision.reason, RouteReason::Default);
        assert_eq!(decision.estimated_latency_ms, PREMIUM_LATENCY_MS);
        assert!((decision.estimated_cost - PREMIUM_COST_ESTIMATE).abs() < 1e-12);
    }

    #[test]
    fn test_simple_hint_routes_efficient() {
        let router = router_at_hour(12, CostLedger::new(1.0, 30.0));
        let decision = router.route(Some(InteractionHint::Simple));
        assert_eq!(decision.mode, Mode::Efficient);
        assert_eq!(decision.reason, RouteReason::InteractionType);

        let decision = router.route(Some(InteractionHint::Conversational));
        assert_eq!(decision.reason, RouteReason::Default);
    }

    #[test]
    fn test_budget_beats_time_of_day() {
        let now = Utc::now();
        let entry = CostEntry {
            timestamp: now,
            mode: Mode::Premium,
            stage: Stage::Realtime,
            amount: 0.90,
            tokens: None,
            audio_seconds: None,
        };
        let ledger = CostLedger::from_entries(1.0, 30.0, vec![entry]);
        let router = router_at_hour(3, ledger);
        assert_eq!(router.route(None).reason, RouteReason::CostLimit);
    }

    #[test]
    fn test_recorded_cost_flips_next_decision() {
        let ledger = CostLedger::new(0.01, 30.0);
        let clock = ManualClock::at_hour(12);
        ledger.record(
            Mode::Premium,
            StageUnits::Synthesize { characters: 2000 },
            clock.now(),
        );
        let router = AdaptiveRouter::new(RouterConfig::default(), ledger, Arc::new(clock));
        assert_eq!(router.route(None).reason, RouteReason::CostLimit);
    }
}
