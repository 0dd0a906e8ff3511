//! Engine state owned by the scheduler, and the read-only status board the
//! server renders from.

use std::collections::VecDeque;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::model::{format_pnl, Instrument, WirePacket};
use crate::risk::{GuardState, RiskGuard};
use crate::scheduler::CycleOutcome;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CycleCounters {
    pub completed: u64,
    pub failed: u64,
    pub halted: u64,
    pub cancelled: u64,
    pub packets_emitted: u64,
}

/// Process-lifetime engine state. Only the scheduler task holds it mutably.
#[derive(Debug, Clone)]
pub struct EngineState {
    universe: Vec<Instrument>,
    guard: RiskGuard,
    counters: CycleCounters,
    started_at: DateTime<Utc>,
    last_cycle_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl EngineState {
    pub fn new(universe: Vec<Instrument>, max_drawdown: f64) -> Self {
        Self {
            universe,
            guard: RiskGuard::new(max_drawdown),
            counters: CycleCounters::default(),
            started_at: Utc::now(),
            last_cycle_at: None,
            last_error: None,
        }
    }

    pub fn universe(&self) -> &[Instrument] {
        &self.universe
    }

    pub fn guard(&self) -> &RiskGuard {
        &self.guard
    }

    pub fn guard_mut(&mut self) -> &mut RiskGuard {
        &mut self.guard
    }

    pub fn cumulative_pnl(&self) -> f64 {
        self.guard.cumulative_pnl()
    }

    pub fn is_tripped(&self) -> bool {
        self.guard.is_tripped()
    }

    pub fn counters(&self) -> CycleCounters {
        self.counters
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn record_outcome(&mut self, outcome: &CycleOutcome) {
        self.last_cycle_at = Some(Utc::now());
        match outcome {
            CycleOutcome::Emitted { packets } => {
                self.counters.completed += 1;
                self.counters.packets_emitted += *packets as u64;
            }
            CycleOutcome::Failed(err) => {
                self.counters.failed += 1;
                self.last_error = Some(err.to_string());
            }
            CycleOutcome::Halted => self.counters.halted += 1,
            CycleOutcome::Cancelled { packets } => {
                self.counters.cancelled += 1;
                self.counters.packets_emitted += *packets as u64;
            }
        }
    }
}

/// What `GET /api/status` returns.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    /// Fraction of capital.
    pub cumulative_pnl: f64,
    pub pnl: String,
    pub breaker: GuardState,
    pub max_drawdown: f64,
    pub tripped_at: Option<DateTime<Utc>>,
    pub universe: Vec<Instrument>,
    pub counters: CycleCounters,
    pub started_at: DateTime<Utc>,
    pub last_cycle_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub subscribers: usize,
    pub recent_packets: Vec<WirePacket>,
}

impl EngineSnapshot {
    fn of(state: &EngineState) -> Self {
        Self {
            cumulative_pnl: state.cumulative_pnl(),
            pnl: format_pnl(state.cumulative_pnl()),
            breaker: state.guard.state(),
            max_drawdown: state.guard.max_drawdown(),
            tripped_at: state.guard.tripped_at(),
            universe: state.universe.clone(),
            counters: state.counters,
            started_at: state.started_at,
            last_cycle_at: state.last_cycle_at,
            last_error: state.last_error.clone(),
            subscribers: 0,
            recent_packets: Vec::new(),
        }
    }
}

#[derive(Debug)]
struct Board {
    snapshot: EngineSnapshot,
    recent: VecDeque<WirePacket>,
    capacity: usize,
}

/// Status board shared with the server. Writers replace whole snapshots, so
/// readers never observe a half-updated cycle.
#[derive(Debug, Clone)]
pub struct SharedState {
    board: Arc<RwLock<Board>>,
}

impl SharedState {
    pub fn new(state: &EngineState, recent_capacity: usize) -> Self {
        let board = Board {
            snapshot: EngineSnapshot::of(state),
            recent: VecDeque::with_capacity(recent_capacity),
            capacity: recent_capacity,
        };
        Self { board: Arc::new(RwLock::new(board)) }
    }

    pub fn publish_state(&self, state: &EngineState) {
        let snapshot = EngineSnapshot::of(state);
        let mut board = self.board.write().unwrap_or_else(PoisonError::into_inner);
        board.snapshot = snapshot;
    }

    pub fn record_packets<'a>(&self, packets: impl IntoIterator<Item = &'a WirePacket>) {
        let mut board = self.board.write().unwrap_or_else(PoisonError::into_inner);
        if board.capacity == 0 {
            return;
        }
        for packet in packets {
            if board.recent.len() == board.capacity {
                board.recent.pop_front();
            }
            board.recent.push_back(packet.clone());
        }
    }

    /// Consistent copy of the latest published state plus recent packets,
    /// oldest first.
    pub fn snapshot(&self, subscribers: usize) -> EngineSnapshot {
        let board = self.board.read().unwrap_or_else(PoisonError::into_inner);
        let mut snap = board.snapshot.clone();
        snap.subscribers = subscribers;
        snap.recent_packets = board.recent.iter().cloned().collect();
        snap
    }

    pub fn breaker(&self) -> GuardState {
        self.board.read().unwrap_or_else(PoisonError::into_inner).snapshot.breaker
    }
}
