use std::env::{self, VarError};
use std::fmt;
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::de::{DeserializeOwned, IntoDeserializer};
use serde::Deserialize;

use control_loop::{DecisionPolicy, LoopConfig};
use heatpump_sink::{HeatpumpConfig, HeatpumpModel, ValueTransform};
use meter_source::{MeterConfig, MeterKind};
use modbus_client::ClientConfig;
use types::DeviceIdentity;

const DEFAULT_MODBUS_PORT: u16 = 502;
const DEFAULT_UNIT_ID: u8 = 1;
const DEFAULT_STATIC_VALUE_W: i32 = 2_000;
const DEFAULT_INTERVAL_MS: u64 = 1_000;

#[derive(Clone, Debug)]
pub struct SourceSettings {
    pub kind: MeterKind,
    pub host: Option<String>,
    pub port: u16,
    pub unit_id: u8,
    pub static_value_w: i32,
}

#[derive(Clone, Debug)]
pub struct DestSettings {
    pub host: Option<String>,
    pub port: u16,
    pub unit_id: u8,
    pub model: HeatpumpModel,
    pub transform: ValueTransform,
}

#[derive(Clone, Debug)]
pub struct BridgeConfig {
    pub source: SourceSettings,
    pub dest: DestSettings,
    pub modbus: ClientConfig,
    pub policy: DecisionPolicy,
    pub interval: Duration,
    /// Log commands instead of writing them, with verbose logging.
    pub demo: bool,
    /// `tracing` filter directive; falls back to `RUST_LOG`.
    pub log_level: Option<String>,
    pub metrics_listen: Option<String>,
}

impl BridgeConfig {
    pub fn load() -> Result<Self> {
        Self::load_with_path(None)
    }

    pub fn load_with_path(config_path: Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = load_file_config(config_path.as_deref())? {
            apply_file_config(&mut config, file_config);
        }

        apply_env_overrides(&mut config)?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            anyhow::bail!("interval must be greater than zero");
        }
        if self.source.kind != MeterKind::Static {
            if !has_host(&self.source.host) {
                anyhow::bail!("source.host is required for {} meters", self.source.kind);
            }
            if self.source.port == 0 {
                anyhow::bail!("source.port must be between 1 and 65535");
            }
        }
        if !self.demo {
            if !has_host(&self.dest.host) {
                anyhow::bail!("dest.host is required unless demo mode is enabled");
            }
            if self.dest.port == 0 {
                anyhow::bail!("dest.port must be between 1 and 65535");
            }
        }
        if let Some(max_batch) = self.modbus.max_batch_size {
            if max_batch == 0 {
                anyhow::bail!("modbus.max_batch_size must be >= 1");
            }
        }
        if self.modbus.timeout_ms == 0 {
            anyhow::bail!("modbus.timeout_ms must be >= 1");
        }
        if self.modbus.connect_timeout_ms == 0 {
            anyhow::bail!("modbus.connect_timeout_ms must be >= 1");
        }
        if let Some(delay) = self.modbus.inter_read_delay_ms {
            if delay == 0 {
                anyhow::bail!("modbus.inter_read_delay_ms must be >= 1 when set");
            }
        }
        if let Some(ref listen) = self.metrics_listen {
            listen
                .parse::<SocketAddr>()
                .map_err(|_| anyhow::anyhow!("metrics_listen must be a socket address, got {listen}"))?;
        }

        Ok(())
    }

    pub fn meter_config(&self) -> MeterConfig {
        MeterConfig {
            kind: self.source.kind,
            identity: DeviceIdentity {
                host: self.source.host.clone().unwrap_or_default(),
                port: self.source.port,
                unit_id: self.source.unit_id,
            },
            static_value_w: self.source.static_value_w,
            modbus: self.modbus.clone(),
        }
    }

    pub fn heatpump_config(&self) -> HeatpumpConfig {
        HeatpumpConfig {
            identity: DeviceIdentity {
                host: self.dest.host.clone().unwrap_or_default(),
                port: self.dest.port,
                unit_id: self.dest.unit_id,
            },
            model: self.dest.model,
            transform: self.dest.transform,
            modbus: self.modbus.clone(),
        }
    }

    pub fn loop_config(&self) -> LoopConfig {
        LoopConfig {
            interval: self.interval,
            ..LoopConfig::default()
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            source: SourceSettings {
                kind: MeterKind::SolarEdge,
                host: None,
                port: DEFAULT_MODBUS_PORT,
                unit_id: DEFAULT_UNIT_ID,
                static_value_w: DEFAULT_STATIC_VALUE_W,
            },
            dest: DestSettings {
                host: None,
                port: DEFAULT_MODBUS_PORT,
                unit_id: DEFAULT_UNIT_ID,
                model: HeatpumpModel::default(),
                transform: ValueTransform::default(),
            },
            modbus: ClientConfig::default(),
            policy: DecisionPolicy::default(),
            interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
            demo: false,
            log_level: None,
            metrics_listen: None,
        }
    }
}

fn has_host(host: &Option<String>) -> bool {
    host.as_deref().map(|value| !value.trim().is_empty()).unwrap_or(false)
}

fn apply_env_overrides(config: &mut BridgeConfig) -> Result<()> {
    if let Some(kind) = parse_env_enum("PVBRIDGE_SOURCE_TYPE")? {
        config.source.kind = kind;
    }
    if let Some(value) = env_string("PVBRIDGE_SOURCE_HOST")? {
        config.source.host = Some(value);
    }
    if let Some(port) = parse_env_u16("PVBRIDGE_SOURCE_PORT")? {
        config.source.port = port;
    }
    if let Some(unit) = parse_env_u8("PVBRIDGE_SOURCE_UNIT")? {
        config.source.unit_id = unit;
    }
    if let Some(value) = parse_env_i32("PVBRIDGE_SOURCE_VALUE")? {
        config.source.static_value_w = value;
    }

    if let Some(value) = env_string("PVBRIDGE_DEST_HOST")? {
        config.dest.host = Some(value);
    }
    if let Some(port) = parse_env_u16("PVBRIDGE_DEST_PORT")? {
        config.dest.port = port;
    }
    if let Some(unit) = parse_env_u8("PVBRIDGE_DEST_UNIT")? {
        config.dest.unit_id = unit;
    }
    if let Some(transform) = parse_env_enum("PVBRIDGE_DEST_TYPE")? {
        config.dest.transform = transform;
    }
    if let Some(model) = parse_env_enum("PVBRIDGE_DEST_MODEL")? {
        config.dest.model = model;
    }

    if let Some(value) = parse_env_u32("PVBRIDGE_SURPLUS_THRESHOLD_W")? {
        config.policy.surplus_threshold_w = value;
    }
    if let Some(value) = parse_env_u32("PVBRIDGE_IMPORT_THRESHOLD_W")? {
        config.policy.import_threshold_w = value;
    }
    if let Some(interval_ms) = parse_env_u64("PVBRIDGE_INTERVAL_MS")? {
        config.interval = Duration::from_millis(interval_ms);
    }
    if let Some(timeout_ms) = parse_env_u64("PVBRIDGE_MODBUS_TIMEOUT_MS")? {
        config.modbus.timeout_ms = timeout_ms;
    }

    config.demo = parse_env_bool("PVBRIDGE_DEMO")?.unwrap_or(config.demo);
    config.log_level = env_string("PVBRIDGE_LOG")?.or(config.log_level.take());
    config.metrics_listen = env_string("PVBRIDGE_METRICS_LISTEN")?.or(config.metrics_listen.take());

    Ok(())
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    source: Option<FileSourceConfig>,
    dest: Option<FileDestConfig>,
    modbus: Option<FileModbusConfig>,
    policy: Option<FilePolicyConfig>,
    interval_ms: Option<u64>,
    demo: Option<bool>,
    log: Option<String>,
    metrics_listen: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileSourceConfig {
    #[serde(rename = "type")]
    kind: Option<MeterKind>,
    host: Option<String>,
    port: Option<u16>,
    unit: Option<u8>,
    value: Option<i32>,
}

#[derive(Debug, Deserialize)]
struct FileDestConfig {
    host: Option<String>,
    port: Option<u16>,
    unit: Option<u8>,
    #[serde(rename = "type")]
    transform: Option<ValueTransform>,
    model: Option<HeatpumpModel>,
}

#[derive(Debug, Deserialize)]
struct FileModbusConfig {
    max_batch_size: Option<u16>,
    timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    inter_read_delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct FilePolicyConfig {
    surplus_threshold_w: Option<u32>,
    import_threshold_w: Option<u32>,
}

fn load_file_config(config_path: Option<&str>) -> Result<Option<FileConfig>> {
    let path = match config_path {
        Some(path) => path.to_string(),
        None => match env::var("PVBRIDGE_CONFIG") {
            Ok(value) => value,
            Err(_) => return Ok(None),
        },
    };

    let content =
        fs::read_to_string(&path).with_context(|| format!("read config file {path}"))?;
    let ext = Path::new(&path).extension().and_then(|value| value.to_str());

    let config = match ext {
        Some("json") => serde_json::from_str(&content).context("parse json config")?,
        _ => toml::from_str(&content).context("parse toml config")?,
    };

    Ok(Some(config))
}

fn apply_file_config(config: &mut BridgeConfig, file: FileConfig) {
    if let Some(source) = file.source {
        if let Some(kind) = source.kind {
            config.source.kind = kind;
        }
        if let Some(host) = source.host {
            config.source.host = Some(host);
        }
        if let Some(port) = source.port {
            config.source.port = port;
        }
        if let Some(unit) = source.unit {
            config.source.unit_id = unit;
        }
        if let Some(value) = source.value {
            config.source.static_value_w = value;
        }
    }

    if let Some(dest) = file.dest {
        if let Some(host) = dest.host {
            config.dest.host = Some(host);
        }
        if let Some(port) = dest.port {
            config.dest.port = port;
        }
        if let Some(unit) = dest.unit {
            config.dest.unit_id = unit;
        }
        if let Some(transform) = dest.transform {
            config.dest.transform = transform;
        }
        if let Some(model) = dest.model {
            config.dest.model = model;
        }
    }

    if let Some(modbus) = file.modbus {
        if let Some(max_batch) = modbus.max_batch_size {
            config.modbus.max_batch_size = Some(max_batch);
        }
        if let Some(timeout_ms) = modbus.timeout_ms {
            config.modbus.timeout_ms = timeout_ms;
        }
        if let Some(timeout_ms) = modbus.connect_timeout_ms {
            config.modbus.connect_timeout_ms = timeout_ms;
        }
        if let Some(delay) = modbus.inter_read_delay_ms {
            config.modbus.inter_read_delay_ms = Some(delay);
        }
    }

    if let Some(policy) = file.policy {
        if let Some(value) = policy.surplus_threshold_w {
            config.policy.surplus_threshold_w = value;
        }
        if let Some(value) = policy.import_threshold_w {
            config.policy.import_threshold_w = value;
        }
    }

    if let Some(interval_ms) = file.interval_ms {
        config.interval = Duration::from_millis(interval_ms);
    }
    if let Some(demo) = file.demo {
        config.demo = demo;
    }
    if let Some(log) = file.log {
        config.log_level = Some(log);
    }
    if let Some(listen) = file.metrics_listen {
        config.metrics_listen = Some(listen);
    }
}

fn parse_env_u8(key: &str) -> Result<Option<u8>> {
    parse_env(key)
}

fn parse_env_u16(key: &str) -> Result<Option<u16>> {
    parse_env(key)
}

fn parse_env_u32(key: &str) -> Result<Option<u32>> {
    parse_env(key)
}

fn parse_env_i32(key: &str) -> Result<Option<i32>> {
    parse_env(key)
}

fn parse_env_u64(key: &str) -> Result<Option<u64>> {
    parse_env(key)
}

fn parse_env_bool(key: &str) -> Result<Option<bool>> {
    parse_env(key)
}

/// A variable that is set must parse; an unset one leaves the current value.
fn parse_env<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    let Some(value) = env_string(key)? else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|err| anyhow::anyhow!("invalid {key}={value}: {err}"))
}

/// Parses a variable with the same names the config file accepts.
fn parse_env_enum<T: DeserializeOwned>(key: &str) -> Result<Option<T>> {
    let Some(value) = env_string(key)? else {
        return Ok(None);
    };
    let deserializer: StrDeserializer<'_, ValueError> = value.trim().into_deserializer();
    T::deserialize(deserializer)
        .map(Some)
        .map_err(|err| anyhow::anyhow!("invalid {key}={value}: {err}"))
}

fn env_string(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(value) => Ok(Some(value)),
        Err(VarError::NotPresent) => Ok(None),
        Err(err) => Err(err).with_context(|| format!("read {key}")),
    }
}
