use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};

use heatpump_sink::{HeatpumpModel, ValueTransform};
use meter_source::MeterKind;

use crate::config::BridgeConfig;

/// Command line flags. Anything given here wins over the config file and environment.
#[derive(Debug, Parser)]
#[command(
    name = "pv-heatpump-bridge",
    version,
    about = "Forward PV surplus from an energy meter to a Lambda heat pump over Modbus/TCP"
)]
pub struct Cli {
    /// TOML or JSON config file; defaults to $PVBRIDGE_CONFIG.
    #[arg(long)]
    pub config: Option<String>,

    #[arg(long, value_enum)]
    pub source_type: Option<SourceType>,

    #[arg(long)]
    pub source_host: Option<String>,

    #[arg(long)]
    pub source_port: Option<u16>,

    #[arg(long)]
    pub source_unit: Option<u8>,

    /// Fixed grid power in W for the static meter, negative on export.
    #[arg(long, allow_negative_numbers = true)]
    pub source_value: Option<i32>,

    #[arg(long)]
    pub dest_host: Option<String>,

    #[arg(long)]
    pub dest_port: Option<u16>,

    #[arg(long)]
    pub dest_unit: Option<u8>,

    /// How the excess is written to the E-manager register.
    #[arg(long, value_enum)]
    pub dest_type: Option<DestType>,

    #[arg(long, value_enum)]
    pub dest_model: Option<DestModel>,

    /// Export in W above which PV surplus mode is requested.
    #[arg(long)]
    pub surplus_threshold: Option<u32>,

    /// Import in W above which normal mode is requested.
    #[arg(long)]
    pub import_threshold: Option<u32>,

    /// Polling interval in seconds.
    #[arg(short, long)]
    pub interval: Option<f64>,

    /// Log commands instead of writing them to the heat pump.
    #[arg(short, long)]
    pub demo: bool,

    #[arg(long, value_enum)]
    pub log: Option<LogLevel>,

    /// Serve Prometheus metrics on this address, e.g. 0.0.0.0:9102.
    #[arg(long)]
    pub metrics_listen: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceType {
    #[value(alias = "se")]
    Solaredge,
    #[value(alias = "fsm")]
    Fronius,
    Static,
}

impl From<SourceType> for MeterKind {
    fn from(value: SourceType) -> Self {
        match value {
            SourceType::Solaredge => MeterKind::SolarEdge,
            SourceType::Fronius => MeterKind::Fronius,
            SourceType::Static => MeterKind::Static,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DestType {
    Negative,
    Positive,
}

impl From<DestType> for ValueTransform {
    fn from(value: DestType) -> Self {
        match value {
            DestType::Negative => ValueTransform::Negative,
            DestType::Positive => ValueTransform::Positive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DestModel {
    #[value(name = "eu08l")]
    Eu08l,
    #[value(name = "eu13l")]
    Eu13l,
}

impl From<DestModel> for HeatpumpModel {
    fn from(value: DestModel) -> Self {
        match value {
            DestModel::Eu08l => HeatpumpModel::Eu08l,
            DestModel::Eu13l => HeatpumpModel::Eu13l,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl Cli {
    pub fn apply(&self, config: &mut BridgeConfig) -> Result<()> {
        if let Some(kind) = self.source_type {
            config.source.kind = kind.into();
        }
        if let Some(ref host) = self.source_host {
            config.source.host = Some(host.clone());
        }
        if let Some(port) = self.source_port {
            config.source.port = port;
        }
        if let Some(unit) = self.source_unit {
            config.source.unit_id = unit;
        }
        if let Some(value) = self.source_value {
            config.source.static_value_w = value;
        }

        if let Some(ref host) = self.dest_host {
            config.dest.host = Some(host.clone());
        }
        if let Some(port) = self.dest_port {
            config.dest.port = port;
        }
        if let Some(unit) = self.dest_unit {
            config.dest.unit_id = unit;
        }
        if let Some(transform) = self.dest_type {
            config.dest.transform = transform.into();
        }
        if let Some(model) = self.dest_model {
            config.dest.model = model.into();
        }

        if let Some(value) = self.surplus_threshold {
            config.policy.surplus_threshold_w = value;
        }
        if let Some(value) = self.import_threshold {
            config.policy.import_threshold_w = value;
        }
        if let Some(secs) = self.interval {
            config.interval = Duration::try_from_secs_f64(secs)
                .with_context(|| format!("invalid interval {secs}"))?;
        }

        if self.demo {
            config.demo = true;
        }
        if let Some(level) = self.log {
            config.log_level = Some(level.as_str().to_string());
        }
        if let Some(ref listen) = self.metrics_listen {
            config.metrics_listen = Some(listen.clone());
        }

        Ok(())
    }
}
