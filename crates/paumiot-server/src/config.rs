//! Server configuration

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use paumiot_adaptive::config::AdaptiveConfig;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,
    /// Checkpoint file; checkpointing is off when unset
    pub checkpoint_path: Option<PathBuf>,
    /// Seconds between periodic checkpoints
    pub checkpoint_interval_secs: u64,
    /// Sensor readings kept for `GET /api/v1/sensors`
    pub sensor_history: usize,
    /// Adaptive core settings
    pub adaptive: AdaptiveConfig,
    /// Simulated transport settings
    pub simulation: SimulationSettings,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            checkpoint_path: Some(PathBuf::from("data/paumiot.ckpt")),
            checkpoint_interval_secs: 60,
            sensor_history: 500,
            adaptive: AdaptiveConfig::default(),
            simulation: SimulationSettings::default(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from `.env`, an optional JSON file and the environment
    pub fn load() -> Result<Self> {
        // Try to load .env file
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from defaults overridden by `lookup(key)`
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();

        if let Some(path) = lookup("PAUMIOT_CONFIG") {
            cfg.adaptive = AdaptiveConfig::from_file(&path)?;
        }

        // The platform PORT variable goes first, PAUMIOT_PORT wins over it
        if let Some(port) = parse(&lookup, "PORT") {
            cfg.port = port;
        }
        if let Some(host) = lookup("PAUMIOT_HOST") {
            cfg.host = host;
        }
        if let Some(port) = parse(&lookup, "PAUMIOT_PORT") {
            cfg.port = port;
        }

        // Checkpointing
        match lookup("PAUMIOT_CHECKPOINT_PATH").as_deref() {
            Some("") | Some("off") => cfg.checkpoint_path = None,
            Some(path) => cfg.checkpoint_path = Some(PathBuf::from(path)),
            None => {}
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_CHECKPOINT_INTERVAL_SECS") {
            cfg.checkpoint_interval_secs = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_SENSOR_HISTORY") {
            cfg.sensor_history = v;
        }

        // Adaptive core
        let core = &mut cfg.adaptive;
        if let Some(v) = parse(&lookup, "PAUMIOT_STORE_CAPACITY") {
            core.store.capacity = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_EXPLORATION") {
            core.bandit.exploration = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_EPSILON") {
            core.dispatch.epsilon = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_SEND_TIMEOUT_MS") {
            core.dispatch.send_timeout_ms = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_SEED") {
            core.dispatch.seed = Some(v);
            cfg.simulation.seed = Some(v);
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_REBUILD_EVERY") {
            core.distiller.rebuild_every = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_REBUILD_INTERVAL_SECS") {
            core.distiller.rebuild_interval_secs = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_MAX_TREE_DEPTH") {
            core.distiller.max_depth = v;
        }

        // Simulated transport
        if let Some(v) = parse(&lookup, "PAUMIOT_SIM_LATENCY_SCALE") {
            cfg.simulation.latency_scale = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_SIM_LOSS_SCALE") {
            cfg.simulation.loss_scale = v;
        }
        if let Some(v) = parse(&lookup, "PAUMIOT_SIM_REAL_DELAY") {
            cfg.simulation.real_delay = v;
        }

        cfg.adaptive.validate()?;
        Ok(cfg)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Simulated transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Multiplier on every protocol's latency profile
    pub latency_scale: f64,
    /// Multiplier on every protocol's loss probability
    pub loss_scale: f64,
    /// Actually wait for the simulated latency
    pub real_delay: bool,
    pub seed: Option<u64>,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            latency_scale: 1.0,
            loss_scale: 1.0,
            real_delay: true,
            seed: None,
        }
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Option<T>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}
