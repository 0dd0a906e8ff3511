use std::time::Instant;

use anyhow::{Context, Result};

use quantpulse::broadcast::SignalBroadcaster;
use quantpulse::config::Config;
use quantpulse::logging::{log, log_session_summary, obj, v_num, v_str, Domain, Level};
use quantpulse::scheduler::CycleScheduler;
use quantpulse::server::{self, AppState};
use quantpulse::shutdown;
use quantpulse::state::{EngineState, SharedState};

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = match Config::from_env().and_then(|cfg| cfg.validate().map(|_| cfg)) {
        Ok(cfg) => cfg,
        Err(err) => {
            log(Level::Fatal, Domain::System, "config_rejected", obj(&[("error", v_str(&err.to_string()))]));
            return Err(err).context("refusing to start");
        }
    };

    let ids: Vec<&str> = cfg.instrument_universe.iter().map(|i| i.id.as_str()).collect();
    log(
        Level::Info,
        Domain::System,
        "startup",
        obj(&[
            ("universe", v_str(&ids.join(","))),
            ("provider", v_str(cfg.provider.as_str())),
            ("scorer", v_str(cfg.scorer.as_str())),
            ("pnl_model", v_str(cfg.pnl_model.as_str())),
            ("budget", v_num(cfg.selection_budget as f64)),
            ("risk_factor", v_num(cfg.risk_factor)),
            ("max_drawdown", v_num(cfg.max_drawdown_fraction)),
            ("bind_addr", v_str(&cfg.bind_addr)),
        ]),
    );

    let provider = cfg.provider.build(&cfg)?;
    let scorer = cfg.scorer.build(&cfg);
    let pnl = cfg.pnl_model.build(&cfg);

    let (trigger, shutdown) = shutdown::channel();
    let broadcaster = SignalBroadcaster::new(cfg.subscriber_buffer);
    let board = SharedState::new(
        &EngineState::new(cfg.instrument_universe.clone(), cfg.max_drawdown_fraction),
        cfg.recent_packets,
    );

    let listener = server::bind(&cfg.bind_addr).await?;
    let app = AppState::new(board.clone(), broadcaster.clone(), shutdown.clone());
    let server_task = tokio::spawn(server::serve(listener, app));

    let mut scheduler = CycleScheduler::new(&cfg, provider, scorer, pnl, broadcaster, board, shutdown);
    let (interval, cooldown) = (cfg.cycle_interval(), cfg.error_cooldown());
    let started = Instant::now();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run_forever(interval, cooldown).await;
        scheduler.into_state()
    });

    tokio::signal::ctrl_c().await.context("listening for ctrl-c")?;
    log(Level::Info, Domain::System, "shutdown_requested", obj(&[]));
    trigger.trigger();

    let state = scheduler_task.await.context("scheduler task")?;
    if let Err(err) = server_task.await.context("server task")? {
        log(Level::Error, Domain::Server, "server_error", obj(&[("error", v_str(&err.to_string()))]));
    }

    let counters = state.counters();
    log_session_summary(
        started.elapsed().as_secs(),
        counters.completed + counters.failed + counters.halted + counters.cancelled,
        counters.failed,
        counters.packets_emitted,
        state.cumulative_pnl(),
        state.is_tripped(),
    );
    Ok(())
}
