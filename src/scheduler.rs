//! The recurring fetch → score → gate → broadcast loop.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::broadcast::SignalBroadcaster;
use crate::config::Config;
use crate::error::{EngineError, EngineResult};
use crate::export::CsvExporter;
use crate::logging::{
    digest_hex, log, log_cycle_end, log_cycle_error, log_cycle_start, log_selection_audit, obj, v_num, v_str,
    Domain, Level, ProfileScope,
};
use crate::model::{MarketSnapshot, SelectionResult, SignalKind, SignalPacket};
use crate::pnl::PnlModel;
use crate::provider::retry::{retry_async, RetryConfig};
use crate::provider::MarketSnapshotProvider;
use crate::scorer::{select, SelectionScorer};
use crate::shutdown::Shutdown;
use crate::state::{EngineState, SharedState};

/// How a single cycle ended. Decides the gap before the next one.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Emitted { packets: usize },
    /// Provider or scorer failure; the cycle emitted nothing.
    Failed(EngineError),
    /// Breaker is tripped; nothing fetched, nothing emitted.
    Halted,
    /// Shutdown arrived mid-cycle, after `packets` went out.
    Cancelled { packets: usize },
}

impl CycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            CycleOutcome::Emitted { .. } => "emitted",
            CycleOutcome::Failed(_) => "failed",
            CycleOutcome::Halted => "halted",
            CycleOutcome::Cancelled { .. } => "cancelled",
        }
    }

    pub fn packets(&self) -> usize {
        match self {
            CycleOutcome::Emitted { packets } | CycleOutcome::Cancelled { packets } => *packets,
            _ => 0,
        }
    }
}

pub struct CycleScheduler {
    provider: Arc<dyn MarketSnapshotProvider>,
    scorer: Arc<dyn SelectionScorer>,
    pnl: Box<dyn PnlModel>,
    broadcaster: SignalBroadcaster,
    board: SharedState,
    exporter: Option<CsvExporter>,
    state: EngineState,
    shutdown: Shutdown,
    retry: RetryConfig,
    budget: usize,
    pacing: Duration,
    cycle: u64,
}

impl CycleScheduler {
    pub fn new(
        cfg: &Config,
        provider: Arc<dyn MarketSnapshotProvider>,
        scorer: Arc<dyn SelectionScorer>,
        pnl: Box<dyn PnlModel>,
        broadcaster: SignalBroadcaster,
        board: SharedState,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            provider,
            scorer,
            pnl,
            broadcaster,
            board,
            exporter: cfg.export_path.clone().map(CsvExporter::new),
            state: EngineState::new(cfg.instrument_universe.clone(), cfg.max_drawdown_fraction),
            shutdown,
            retry: RetryConfig::with_retries(cfg.fetch_retries),
            budget: cfg.selection_budget,
            pacing: cfg.inter_packet_pacing(),
            cycle: 0,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_exporter(mut self, exporter: Option<CsvExporter>) -> Self {
        self.exporter = exporter;
        self
    }

    pub fn state(&self) -> &EngineState {
        &self.state
    }

    pub fn into_state(self) -> EngineState {
        self.state
    }

    /// Run one full cycle. Never returns an error: failures become
    /// `CycleOutcome::Failed` and are recorded in the engine state.
    pub async fn run_cycle(&mut self) -> CycleOutcome {
        if self.shutdown.is_triggered() {
            return CycleOutcome::Cancelled { packets: 0 };
        }
        self.cycle += 1;
        log_cycle_start(self.cycle, self.state.universe().len());

        let outcome = if !self.state.guard_mut().check() {
            CycleOutcome::Halted
        } else {
            self.fetch_score_broadcast().await
        };

        if let CycleOutcome::Failed(err) = &outcome {
            log_cycle_error(self.cycle, err.kind(), &err.to_string());
        }
        self.state.record_outcome(&outcome);
        self.board.publish_state(&self.state);
        outcome
    }

    async fn fetch_score_broadcast(&mut self) -> CycleOutcome {
        let snapshot = match self.fetch().await {
            Ok(snapshot) => Arc::new(snapshot),
            Err(_) if self.shutdown.is_triggered() => return CycleOutcome::Cancelled { packets: 0 },
            Err(err) => return CycleOutcome::Failed(err),
        };
        self.log_partial(&snapshot);

        let started = Instant::now();
        let selection = match score(self.scorer.clone(), self.budget, snapshot.clone()).await {
            Ok(selection) => selection,
            Err(err) => return CycleOutcome::Failed(err),
        };
        let latency = started.elapsed();
        self.audit(&snapshot, &selection);

        if let Some(exporter) = &self.exporter {
            if let Err(err) = exporter.write(&snapshot, &selection) {
                log(Level::Warn, Domain::Export, "export_failed", obj(&[("error", v_str(&err.to_string()))]));
            }
        }

        let pnl = &mut self.pnl;
        let decision = self
            .state
            .guard_mut()
            .gate(&selection, |sel| pnl.delta(sel, &snapshot));
        if !decision.allowed {
            return CycleOutcome::Halted;
        }

        let packets: Vec<SignalPacket> = selection
            .selected()
            .filter_map(|pick| snapshot.entry(&pick.instrument.id))
            .map(|entry| SignalPacket {
                emitted_at: Utc::now(),
                instrument: entry.instrument.clone(),
                price: entry.price,
                signal: SignalKind::for_selection(true, entry.expected_return()),
                latency,
                cumulative_pnl: decision.cumulative_pnl,
            })
            .collect();

        let out = self
            .broadcaster
            .publish_paced(packets, self.pacing, &mut self.shutdown)
            .await;
        let wires: Vec<_> = out.sent.iter().map(|p| p.to_wire()).collect();
        self.board.record_packets(wires.iter());

        if out.cancelled {
            CycleOutcome::Cancelled { packets: out.sent.len() }
        } else {
            CycleOutcome::Emitted { packets: out.sent.len() }
        }
    }

    async fn fetch(&mut self) -> EngineResult<MarketSnapshot> {
        let _scope = ProfileScope::with_context("fetch_snapshot", &[("cycle", v_num(self.cycle as f64))]);
        let provider = self.provider.clone();
        let universe = self.state.universe().to_vec();
        retry_async(&self.retry, provider.name(), &mut self.shutdown, || {
            let provider = provider.clone();
            let universe = universe.clone();
            // own task, so a panicking provider ends only this attempt
            async move {
                match tokio::spawn(async move { provider.fetch(&universe).await }).await {
                    Ok(result) => result,
                    Err(join_err) => Err(EngineError::DataUnavailable(format!(
                        "provider task aborted: {}",
                        join_err
                    ))),
                }
            }
        })
        .await
    }

    fn log_partial(&self, snapshot: &MarketSnapshot) {
        let omitted: Vec<&str> = snapshot
            .omitted(self.state.universe())
            .into_iter()
            .map(|i| i.id.as_str())
            .collect();
        if omitted.is_empty() {
            return;
        }
        log(
            Level::Info,
            Domain::Market,
            "partial_snapshot",
            obj(&[
                ("cycle", v_num(self.cycle as f64)),
                ("available", v_num(snapshot.len() as f64)),
                ("omitted", v_str(&omitted.join(","))),
            ]),
        );
    }

    fn audit(&self, snapshot: &MarketSnapshot, selection: &SelectionResult) {
        let input = format!("{:?}|{:?}", snapshot.expected_returns(), snapshot.covariance());
        log_selection_audit(
            self.cycle,
            self.scorer.name(),
            &digest_hex(&input),
            &digest_hex(&selection.canonical()),
            &selection.selected_ids(),
        );
    }

    /// Cycle until shutdown: `interval` after a successful (or halted) cycle,
    /// `cooldown_on_error` after a failed one.
    pub async fn run_forever(&mut self, interval: Duration, cooldown_on_error: Duration) {
        log(
            Level::Info,
            Domain::Scheduler,
            "scheduler_started",
            obj(&[
                ("provider", v_str(self.provider.name())),
                ("scorer", v_str(self.scorer.name())),
                ("pnl_model", v_str(self.pnl.name())),
                ("interval_ms", v_num(interval.as_millis() as f64)),
                ("cooldown_ms", v_num(cooldown_on_error.as_millis() as f64)),
            ]),
        );
        loop {
            let started = Instant::now();
            let outcome = self.run_cycle().await;
            let wait = match &outcome {
                CycleOutcome::Emitted { .. } | CycleOutcome::Halted => interval,
                CycleOutcome::Failed(_) => cooldown_on_error,
                CycleOutcome::Cancelled { .. } => Duration::ZERO,
            };
            log_cycle_end(
                self.cycle,
                outcome.as_str(),
                outcome.packets(),
                started.elapsed().as_secs_f64() * 1000.0,
                wait.as_secs_f64() * 1000.0,
            );
            if matches!(outcome, CycleOutcome::Cancelled { .. }) || !self.shutdown.sleep(wait).await {
                break;
            }
        }
        log(Level::Info, Domain::Scheduler, "scheduler_stopped", obj(&[("cycles", v_num(self.cycle as f64))]));
    }
}

/// Scoring is CPU-bound and may panic; keep both off the async workers.
async fn score(
    scorer: Arc<dyn SelectionScorer>,
    budget: usize,
    snapshot: Arc<MarketSnapshot>,
) -> EngineResult<SelectionResult> {
    match tokio::task::spawn_blocking(move || select(scorer.as_ref(), &snapshot, budget)).await {
        Ok(result) => result,
        Err(join_err) => Err(EngineError::ScoringFailure(format!("scorer task aborted: {}", join_err))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Instrument, PriceSeries};
    use crate::pnl::LastReturnPnl;
    use crate::scorer::GreedyScorer;
    use crate::shutdown;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Flaky {
        calls: AtomicUsize,
        fail_first: usize,
    }

    #[async_trait]
    impl MarketSnapshotProvider for Flaky {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn fetch(&self, instruments: &[Instrument]) -> EngineResult<MarketSnapshot> {
            if self.calls.fetch_add(1, Ordering::SeqCst) < self.fail_first {
                return Err(EngineError::DataUnavailable("upstream down".into()));
            }
            let series = instruments
                .iter()
                .enumerate()
                .map(|(i, inst)| {
                    let base = 100.0 + i as f64;
                    (inst.clone(), PriceSeries::new(vec![(1, base), (2, base * 1.01), (3, base * 1.02)]))
                })
                .collect();
            MarketSnapshot::from_series(instruments, series)
        }
    }

    fn cfg() -> Config {
        Config {
            instrument_universe: vec![Instrument::new("A", "A"), Instrument::new("B", "B")],
            selection_budget: 1,
            inter_packet_pacing_seconds: 0.0,
            fetch_retries: 0,
            ..Config::default()
        }
    }

    /// Serves one good snapshot, then either errors or panics on every fetch.
    struct Collapsing {
        calls: AtomicUsize,
        panics: bool,
    }

    #[async_trait]
    impl MarketSnapshotProvider for Collapsing {
        fn name(&self) -> &'static str {
            "collapsing"
        }

        async fn fetch(&self, instruments: &[Instrument]) -> EngineResult<MarketSnapshot> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Flaky { calls: AtomicUsize::new(0), fail_first: 0 }.fetch(instruments).await;
            }
            if self.panics {
                panic!("feed decoder blew up");
            }
            Err(EngineError::DataUnavailable("down".into()))
        }
    }

    fn scheduler_with(
        cfg: &Config,
        provider: Arc<dyn MarketSnapshotProvider>,
        pnl: Box<dyn PnlModel>,
        shutdown: Shutdown,
    ) -> (CycleScheduler, SharedState) {
        let state = EngineState::new(cfg.instrument_universe.clone(), cfg.max_drawdown_fraction);
        let board = SharedState::new(&state, 10);
        let s = CycleScheduler::new(
            cfg,
            provider,
            Arc::new(GreedyScorer::new(cfg.risk_factor)),
            pnl,
            SignalBroadcaster::new(8),
            board.clone(),
            shutdown,
        );
        (s, board)
    }

    fn scheduler(cfg: &Config, fail_first: usize, shutdown: Shutdown) -> (CycleScheduler, SharedState) {
        let provider = Arc::new(Flaky { calls: AtomicUsize::new(0), fail_first });
        scheduler_with(cfg, provider, Box::new(LastReturnPnl), shutdown)
    }

    #[tokio::test]
    async fn test_cycle_emits_selected_packets() {
        let (_t, sd) = shutdown::channel();
        let (mut s, board) = scheduler(&cfg(), 0, sd);
        let outcome = s.run_cycle().await;
        assert_eq!(outcome, CycleOutcome::Emitted { packets: 1 });
        let snap = board.snapshot(0);
        assert_eq!(snap.counters.completed, 1);
        assert_eq!(snap.recent_packets.len(), 1);
        assert!(snap.cumulative_pnl > 0.0);
    }

    #[tokio::test]
    async fn test_failed_fetch_is_contained() {
        let (_t, sd) = shutdown::channel();
        let (mut s, board) = scheduler(&cfg(), 1, sd);
        assert!(matches!(s.run_cycle().await, CycleOutcome::Failed(EngineError::DataUnavailable(_))));
        assert_eq!(s.run_cycle().await, CycleOutcome::Emitted { packets: 1 });
        let snap = board.snapshot(0);
        assert_eq!((snap.counters.failed, snap.counters.completed), (1, 1));
    }

    #[tokio::test]
    async fn test_retry_recovers_within_cycle() {
        let (_t, sd) = shutdown::channel();
        let (s, _board) = scheduler(&cfg(), 2, sd);
        let mut s = s.with_retry(RetryConfig { max_retries: 2, base_delay_ms: 1, max_delay_ms: 2, jitter_factor: 0.0 });
        assert_eq!(s.run_cycle().await, CycleOutcome::Emitted { packets: 1 });
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (t, sd) = shutdown::channel();
        let (mut s, _board) = scheduler(&cfg(), 0, sd);
        t.trigger();
        assert_eq!(s.run_cycle().await, CycleOutcome::Cancelled { packets: 0 });
        assert_eq!(s.state().counters().completed, 0);
    }

    #[tokio::test]
    async fn test_run_forever_stops_on_shutdown() {
        let (t, sd) = shutdown::channel();
        let (mut s, board) = scheduler(&cfg(), 0, sd);
        let handle = tokio::spawn(async move {
            s.run_forever(Duration::from_secs(60), Duration::from_secs(60)).await;
            s
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        t.trigger();
        let s = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert_eq!(s.state().counters().completed, 1);
        assert_eq!(board.snapshot(0).counters.completed, 1);
    }

    #[tokio::test]
    async fn test_breach_trips_at_cycle_start_during_outage() {
        let (_t, sd) = shutdown::channel();
        let provider = Arc::new(Collapsing { calls: AtomicUsize::new(0), panics: false });
        let losing = |_: &SelectionResult, _: &MarketSnapshot| -0.02;
        let (mut s, board) = scheduler_with(&cfg(), provider.clone(), Box::new(losing), sd);

        assert_eq!(s.run_cycle().await, CycleOutcome::Emitted { packets: 1 });
        for _ in 0..3 {
            assert_eq!(s.run_cycle().await, CycleOutcome::Halted);
        }
        // the limit was already breached, so the dead provider is never asked again
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        let snap = board.snapshot(0);
        assert_eq!(snap.breaker, crate::risk::GuardState::Tripped);
        assert_eq!((snap.counters.failed, snap.counters.halted), (0, 3));
    }

    #[tokio::test]
    async fn test_provider_panic_is_contained() {
        let (t, sd) = shutdown::channel();
        let provider = Arc::new(Collapsing { calls: AtomicUsize::new(0), panics: true });
        let (mut s, board) = scheduler_with(&cfg(), provider.clone(), Box::new(LastReturnPnl), sd);

        assert_eq!(s.run_cycle().await, CycleOutcome::Emitted { packets: 1 });
        assert!(matches!(s.run_cycle().await, CycleOutcome::Failed(EngineError::DataUnavailable(_))));

        let handle = tokio::spawn(async move {
            s.run_forever(Duration::from_millis(10), Duration::from_millis(10)).await;
            s
        });
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!handle.is_finished());
        t.trigger();
        let s = tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
        assert!(s.state().counters().failed >= 3);
        assert!(provider.calls.load(Ordering::SeqCst) >= 4);
        assert!(board.snapshot(0).last_error.unwrap().contains("provider task aborted"));
    }
}
