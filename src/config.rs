use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{EngineError, EngineResult};
use crate::model::Instrument;
use crate::pnl::PnlModelKind;
use crate::provider::ProviderKind;
use crate::scorer::ScorerKind;

const DEFAULT_UNIVERSE: &str = "RELIANCE.NS:Reliance Industries,TCS.NS:Tata Consultancy Services,\
HDFCBANK.NS:HDFC Bank,INFY.NS:Infosys,ICICIBANK.NS:ICICI Bank";

#[derive(Clone, Debug)]
pub struct Config {
    pub instrument_universe: Vec<Instrument>,
    pub cycle_interval_seconds: f64,
    pub error_cooldown_seconds: f64,
    pub selection_budget: usize,
    pub risk_factor: f64,
    /// Negative fraction, e.g. -0.02 for a 2% drawdown limit.
    pub max_drawdown_fraction: f64,
    pub inter_packet_pacing_seconds: f64,
    pub provider: ProviderKind,
    pub scorer: ScorerKind,
    pub pnl_model: PnlModelKind,
    pub seed: u64,
    pub anneal_iterations: usize,
    /// Per selected instrument, per cycle, for the random-walk P&L model.
    pub random_walk_low: f64,
    pub random_walk_high: f64,
    pub lookback_range: String,
    pub bar_interval: String,
    pub yahoo_base: String,
    pub mfapi_base: String,
    pub mfapi_history: usize,
    pub http_timeout_secs: u64,
    pub fetch_retries: u32,
    pub bind_addr: String,
    pub recent_packets: usize,
    pub subscriber_buffer: usize,
    pub export_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            instrument_universe: parse_universe(DEFAULT_UNIVERSE),
            cycle_interval_seconds: 10.0,
            error_cooldown_seconds: 5.0,
            selection_budget: 4,
            risk_factor: 0.3,
            max_drawdown_fraction: -0.02,
            inter_packet_pacing_seconds: 0.5,
            provider: ProviderKind::Yahoo,
            scorer: ScorerKind::Greedy,
            pnl_model: PnlModelKind::LastReturn,
            seed: 42,
            anneal_iterations: 2_000,
            random_walk_low: -0.0001,
            random_walk_high: 0.0003,
            lookback_range: "1mo".to_string(),
            bar_interval: "1d".to_string(),
            yahoo_base: "https://query1.finance.yahoo.com".to_string(),
            mfapi_base: "https://api.mfapi.in".to_string(),
            mfapi_history: 30,
            http_timeout_secs: 10,
            fetch_retries: 2,
            bind_addr: "127.0.0.1:8000".to_string(),
            recent_packets: 50,
            subscriber_buffer: 64,
            export_path: None,
        }
    }
}

/// Variable lookup. Unset or blank keeps the default; anything else must parse.
struct Vars<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(key).filter(|v| !v.trim().is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> EngineResult<T>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.raw(key) {
            None => Ok(default),
            Some(v) => v
                .trim()
                .parse()
                .map_err(|e| EngineError::Config(format!("{}={:?}: {}", key, v, e))),
        }
    }

    fn string(&self, key: &str, default: String) -> String {
        self.raw(key).unwrap_or(default)
    }
}

impl Config {
    pub fn from_env() -> EngineResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable source. A variable that is set but
    /// does not parse is a configuration error, never a silent default.
    pub fn from_lookup<F>(lookup: F) -> EngineResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };
        let d = Self::default();
        Ok(Self {
            instrument_universe: vars
                .raw("INSTRUMENT_UNIVERSE")
                .map(|v| parse_universe(&v))
                .unwrap_or(d.instrument_universe),
            cycle_interval_seconds: vars.parse("CYCLE_INTERVAL_SECONDS", d.cycle_interval_seconds)?,
            error_cooldown_seconds: vars.parse("ERROR_COOLDOWN_SECONDS", d.error_cooldown_seconds)?,
            selection_budget: vars.parse("SELECTION_BUDGET", d.selection_budget)?,
            risk_factor: vars.parse("RISK_FACTOR", d.risk_factor)?,
            max_drawdown_fraction: vars.parse("MAX_DRAWDOWN_FRACTION", d.max_drawdown_fraction)?,
            inter_packet_pacing_seconds: vars.parse("INTER_PACKET_PACING_SECONDS", d.inter_packet_pacing_seconds)?,
            provider: vars.parse("PROVIDER", d.provider)?,
            scorer: vars.parse("SCORER", d.scorer)?,
            pnl_model: vars.parse("PNL_MODEL", d.pnl_model)?,
            seed: vars.parse("SEED", d.seed)?,
            anneal_iterations: vars.parse("ANNEAL_ITERATIONS", d.anneal_iterations)?,
            random_walk_low: vars.parse("RANDOM_WALK_LOW", d.random_walk_low)?,
            random_walk_high: vars.parse("RANDOM_WALK_HIGH", d.random_walk_high)?,
            lookback_range: vars.string("LOOKBACK_RANGE", d.lookback_range),
            bar_interval: vars.string("BAR_INTERVAL", d.bar_interval),
            yahoo_base: vars.string("YAHOO_BASE", d.yahoo_base),
            mfapi_base: vars.string("MFAPI_BASE", d.mfapi_base),
            mfapi_history: vars.parse("MFAPI_HISTORY", d.mfapi_history)?,
            http_timeout_secs: vars.parse("HTTP_TIMEOUT_SECS", d.http_timeout_secs)?,
            fetch_retries: vars.parse("FETCH_RETRIES", d.fetch_retries)?,
            bind_addr: vars.string("BIND_ADDR", d.bind_addr),
            recent_packets: vars.parse("RECENT_PACKETS", d.recent_packets)?,
            subscriber_buffer: vars.parse("SUBSCRIBER_BUFFER", d.subscriber_buffer)?,
            export_path: vars.raw("EXPORT_PATH").map(PathBuf::from),
        })
    }

    /// Reject configurations the engine cannot start with.
    pub fn validate(&self) -> EngineResult<()> {
        if self.instrument_universe.is_empty() {
            return Err(EngineError::Config("instrument universe is empty".to_string()));
        }
        for (i, inst) in self.instrument_universe.iter().enumerate() {
            if self.instrument_universe[..i].iter().any(|o| o.id == inst.id) {
                return Err(EngineError::Config(format!("duplicate instrument {}", inst.id)));
            }
        }
        check_seconds("cycle_interval_seconds", self.cycle_interval_seconds, false)?;
        check_seconds("error_cooldown_seconds", self.error_cooldown_seconds, true)?;
        check_seconds("inter_packet_pacing_seconds", self.inter_packet_pacing_seconds, true)?;
        if self.selection_budget == 0 {
            return Err(EngineError::Config("selection_budget must be at least 1".to_string()));
        }
        if !self.risk_factor.is_finite() || self.risk_factor < 0.0 {
            return Err(EngineError::Config(format!(
                "risk_factor must be a non-negative number, got {}",
                self.risk_factor
            )));
        }
        // a fraction: -0.02 is a 2% limit, -2 would mean 200%
        if !self.max_drawdown_fraction.is_finite()
            || self.max_drawdown_fraction >= 0.0
            || self.max_drawdown_fraction <= -1.0
        {
            return Err(EngineError::Config(format!(
                "max_drawdown_fraction must lie in (-1, 0), got {}",
                self.max_drawdown_fraction
            )));
        }
        if !(self.random_walk_low <= self.random_walk_high) {
            return Err(EngineError::Config("random_walk_low exceeds random_walk_high".to_string()));
        }
        if self.subscriber_buffer == 0 {
            return Err(EngineError::Config("subscriber_buffer must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn cycle_interval(&self) -> Duration {
        secs(self.cycle_interval_seconds)
    }

    pub fn error_cooldown(&self) -> Duration {
        secs(self.error_cooldown_seconds)
    }

    pub fn inter_packet_pacing(&self) -> Duration {
        secs(self.inter_packet_pacing_seconds)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn check_seconds(name: &str, value: f64, allow_zero: bool) -> EngineResult<()> {
    let ok = value.is_finite() && (value > 0.0 || (allow_zero && value == 0.0));
    if ok {
        Ok(())
    } else {
        Err(EngineError::Config(format!("{} out of range: {}", name, value)))
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// `ID[:Name],ID[:Name],...`
pub fn parse_universe(spec: &str) -> Vec<Instrument> {
    spec.split(',').filter_map(Instrument::parse).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.instrument_universe.len(), 5);
        assert_eq!(cfg.instrument_universe[0].id, "RELIANCE.NS");
        assert_eq!(cfg.instrument_universe[0].name, "Reliance Industries");
        assert_eq!(cfg.inter_packet_pacing(), Duration::from_millis(500));
    }

    #[test]
    fn test_parse_universe_skips_blanks() {
        let u = parse_universe("GC=F:Gold, SI=F:Silver,,M&M.NS");
        let ids: Vec<&str> = u.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["GC=F", "SI=F", "M&M.NS"]);
        assert_eq!(u[2].name, "M&M.NS");
    }

    #[test]
    fn test_empty_universe_is_fatal() {
        let cfg = Config { instrument_universe: vec![], ..Config::default() };
        assert!(matches!(cfg.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_duplicate_instrument_rejected() {
        let cfg = Config {
            instrument_universe: parse_universe("A,B,A"),
            ..Config::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_drawdown_must_be_negative() {
        let cfg = Config { max_drawdown_fraction: 0.02, ..Config::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_drawdown_given_as_percent_rejected() {
        for bad in [-1.0, -2.0, -50.0] {
            let cfg = Config { max_drawdown_fraction: bad, ..Config::default() };
            assert!(matches!(cfg.validate(), Err(EngineError::Config(_))), "{}", bad);
        }
        let cfg = Config { max_drawdown_fraction: -0.99, ..Config::default() };
        assert!(cfg.validate().is_ok());
    }

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_lookup_reads_overrides() {
        let cfg = Config::from_lookup(vars(&[
            ("PROVIDER", "synthetic"),
            ("SCORER", "annealing"),
            ("MAX_DRAWDOWN_FRACTION", " -0.05 "),
            ("INSTRUMENT_UNIVERSE", "GC=F:Gold,SI=F:Silver"),
            ("BIND_ADDR", ""),
        ]))
        .unwrap();
        assert_eq!(cfg.provider, ProviderKind::Synthetic);
        assert_eq!(cfg.scorer, ScorerKind::Annealing);
        assert_eq!(cfg.max_drawdown_fraction, -0.05);
        assert_eq!(cfg.instrument_universe.len(), 2);
        assert_eq!(cfg.bind_addr, Config::default().bind_addr);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_misspelled_kind_is_config_error() {
        for (key, value) in [("PROVIDER", "synthtic"), ("SCORER", "anealing"), ("PNL_MODEL", "walk")] {
            let err = Config::from_lookup(vars(&[(key, value)])).unwrap_err();
            assert!(matches!(err, EngineError::Config(ref m) if m.contains(key)), "{}", key);
        }
    }

    #[test]
    fn test_malformed_number_is_config_error() {
        let err = Config::from_lookup(vars(&[("MAX_DRAWDOWN_FRACTION", "2%")])).unwrap_err();
        assert!(matches!(err, EngineError::Config(ref m) if m.contains("MAX_DRAWDOWN_FRACTION")));
        assert!(Config::from_lookup(vars(&[("SELECTION_BUDGET", "-3")])).is_err());
    }

    #[test]
    fn test_interval_bounds() {
        let cfg = Config { cycle_interval_seconds: 0.0, ..Config::default() };
        assert!(cfg.validate().is_err());
        let cfg = Config { inter_packet_pacing_seconds: 0.0, ..Config::default() };
        assert!(cfg.validate().is_ok());
        let cfg = Config { error_cooldown_seconds: f64::NAN, ..Config::default() };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_zero_budget_rejected() {
        let cfg = Config { selection_budget: 0, ..Config::default() };
        assert!(cfg.validate().is_err());
    }
}
