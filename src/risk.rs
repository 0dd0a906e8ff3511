use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::logging::{log, log_risk_check, obj, v_num, v_str, Domain, Level};
use crate::model::SelectionResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum GuardState {
    Active,
    /// Terminal. No administrative reset exists.
    Tripped,
}

impl GuardState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuardState::Active => "ACTIVE",
            GuardState::Tripped => "TRIPPED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GateDecision {
    pub allowed: bool,
    pub cumulative_pnl: f64,
}

/// Drawdown kill switch over the running P&L sum.
#[derive(Debug, Clone)]
pub struct RiskGuard {
    state: GuardState,
    cumulative_pnl: f64,
    max_drawdown: f64,
    tripped_at: Option<DateTime<Utc>>,
}

impl RiskGuard {
    pub fn new(max_drawdown: f64) -> Self {
        Self {
            state: GuardState::Active,
            cumulative_pnl: 0.0,
            max_drawdown,
            tripped_at: None,
        }
    }

    pub fn state(&self) -> GuardState {
        self.state
    }

    pub fn is_tripped(&self) -> bool {
        self.state == GuardState::Tripped
    }

    pub fn cumulative_pnl(&self) -> f64 {
        self.cumulative_pnl
    }

    pub fn max_drawdown(&self) -> f64 {
        self.max_drawdown
    }

    pub fn tripped_at(&self) -> Option<DateTime<Utc>> {
        self.tripped_at
    }

    /// Evaluate the drawdown limit against the booked P&L, tripping if it is
    /// breached. Returns whether emission may proceed. Run at the start of
    /// every cycle so a breach is observed even when no data arrives.
    pub fn check(&mut self) -> bool {
        if self.is_tripped() {
            return false;
        }
        if self.cumulative_pnl <= self.max_drawdown {
            self.trip();
            return false;
        }
        true
    }

    /// Check the drawdown limit, then (if still active) book this cycle's
    /// P&L. The limit is checked before the delta is applied, so the cycle
    /// that crosses the limit still broadcasts and the following one halts.
    pub fn gate<F>(&mut self, selection: &SelectionResult, pnl_delta: F) -> GateDecision
    where
        F: FnOnce(&SelectionResult) -> f64,
    {
        if !self.check() {
            return self.decision(false);
        }
        log_risk_check("drawdown", "pass", self.cumulative_pnl, self.max_drawdown);

        let delta = pnl_delta(selection);
        if delta.is_finite() {
            self.cumulative_pnl += delta;
        } else {
            log(
                Level::Warn,
                Domain::Risk,
                "pnl_delta_rejected",
                obj(&[("delta", v_str(&delta.to_string()))]),
            );
        }
        self.decision(true)
    }

    fn trip(&mut self) {
        self.state = GuardState::Tripped;
        self.tripped_at = Some(Utc::now());
        log_risk_check("drawdown", "fail", self.cumulative_pnl, self.max_drawdown);
        log(
            Level::Error,
            Domain::Risk,
            "breaker_tripped",
            obj(&[
                ("cumulative_pnl", v_num(self.cumulative_pnl)),
                ("max_drawdown", v_num(self.max_drawdown)),
            ]),
        );
    }

    fn decision(&self, allowed: bool) -> GateDecision {
        GateDecision { allowed, cumulative_pnl: self.cumulative_pnl }
    }
}
