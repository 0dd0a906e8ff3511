//! Recurring portfolio-selection signal engine.
//!
//! Every cycle fetches a market snapshot, scores a budgeted subset of the
//! instrument universe, passes the drawdown gate and streams one signal
//! packet per selected instrument to WebSocket subscribers.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod export;
pub mod logging;
pub mod model;
pub mod pnl;
pub mod provider;
pub mod risk;
pub mod scheduler;
pub mod scorer;
pub mod server;
pub mod shutdown;
pub mod state;
pub mod stats;

pub use config::Config;
pub use error::{EngineError, EngineResult};
