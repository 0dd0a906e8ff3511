//! Seeded random-walk market for offline runs and demos.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::MarketSnapshotProvider;
use crate::error::{EngineError, EngineResult};
use crate::model::{Instrument, MarketSnapshot, PriceSeries};

/// Each instrument gets its own geometric random walk; every fetch advances
/// all walks by one bar. Same seed and same call sequence give the same data.
pub struct SyntheticProvider {
    seed: u64,
    history: usize,
    state: Mutex<WalkState>,
}

#[derive(Default)]
struct WalkState {
    bar: i64,
    walks: HashMap<String, Walk>,
}

struct Walk {
    rng: StdRng,
    drift: f64,
    vol: f64,
    closes: Vec<f64>,
}

impl Walk {
    fn start(seed: u64, id: &str, history: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed ^ fnv1a(id));
        let drift = rng.gen_range(-0.001..0.002);
        let vol = rng.gen_range(0.005..0.02);
        let first = rng.gen_range(50.0..3000.0);
        let mut walk = Self { rng, drift, vol, closes: vec![first] };
        while walk.closes.len() < history {
            walk.step();
        }
        walk
    }

    fn step(&mut self) {
        let z = standard_normal(&mut self.rng);
        let last = self.closes.last().copied().unwrap_or(100.0);
        let next = last * (self.drift - 0.5 * self.vol * self.vol + self.vol * z).exp();
        self.closes.push(next);
    }
}

impl SyntheticProvider {
    pub fn new(seed: u64, history: usize) -> Self {
        Self { seed, history: history.max(2), state: Mutex::new(WalkState::default()) }
    }
}

#[async_trait]
impl MarketSnapshotProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn fetch(&self, instruments: &[Instrument]) -> EngineResult<MarketSnapshot> {
        let series = {
            let mut state = self
                .state
                .lock()
                .map_err(|_| EngineError::DataUnavailable("synthetic state poisoned".to_string()))?;
            state.bar += 1;
            let bar = state.bar;
            let mut out = Vec::with_capacity(instruments.len());
            for inst in instruments {
                let walk = match state.walks.entry(inst.id.clone()) {
                    Entry::Occupied(e) => {
                        let walk = e.into_mut();
                        walk.step();
                        walk
                    }
                    Entry::Vacant(e) => e.insert(Walk::start(self.seed, &inst.id, self.history)),
                };
                let excess = walk.closes.len().saturating_sub(self.history);
                walk.closes.drain(..excess);
                let n = walk.closes.len() as i64;
                let points = walk.closes.iter().enumerate().map(|(i, c)| (bar - n + 1 + i as i64, *c));
                out.push((inst.clone(), PriceSeries::new(points)));
            }
            out
        };
        MarketSnapshot::from_series(instruments, series)
    }
}

fn fnv1a(s: &str) -> u64 {
    s.bytes().fold(0xcbf2_9ce4_8422_2325, |h, b| (h ^ b as u64).wrapping_mul(0x0100_0000_01b3))
}

/// Box-Muller.
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.gen_range(f64::EPSILON..1.0);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
