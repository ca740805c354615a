use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use modbus_client::{ClientConfig, ClientError, ModbusClient, RegisterIo};
use register_codec::{encode, encode_saturating, CodecError, RegisterFormat};
use types::{DeviceIdentity, OperatingCommand};

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("heat pump transport error: {0}")]
    Transport(#[from] ClientError),
    #[error("heat pump refused the write: {0}")]
    Unavailable(OperatingState),
    #[error("heat pump returned no operating state")]
    MissingState,
    #[error("command cannot be encoded: {0}")]
    Encoding(#[from] CodecError),
}

impl WriteError {
    /// Encoding failures repeat every cycle, retrying cannot fix them.
    pub fn is_fatal(&self) -> bool {
        matches!(self, WriteError::Encoding(_))
    }
}

/// Receives one operating command per control cycle.
#[async_trait]
pub trait HeatpumpSink: Send {
    async fn write_command(&mut self, command: &OperatingCommand) -> Result<(), WriteError>;

    /// Releases the underlying session, if any.
    async fn close(&mut self) {}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeatpumpModel {
    #[default]
    Eu08l,
    Eu13l,
}

impl HeatpumpModel {
    pub fn register_map(self) -> LambdaRegisterMap {
        match self {
            HeatpumpModel::Eu08l | HeatpumpModel::Eu13l => LambdaRegisterMap::EU_L,
        }
    }
}

/// Holding registers used on a Lambda heat pump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LambdaRegisterMap {
    pub operating_state: u16,
    pub e_manager_power: u16,
}

impl LambdaRegisterMap {
    pub const EU_L: LambdaRegisterMap = LambdaRegisterMap {
        operating_state: 1,
        e_manager_power: 102,
    };
}

/// How the E-manager power register is configured on the heat pump.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueTransform {
    /// Register holds power consumption as i16; excess is written as a negative number.
    #[default]
    Negative,
    /// Register holds excess power as u16.
    ///
    /// Unlike `Negative`, which saturates at `i16::MIN`, an excess above
    /// 65535 W cannot be represented and is reported as a fatal
    /// `CodecError::Range` that stops the bridge.
    Positive,
}

impl ValueTransform {
    pub fn encode(self, excess_w: i32) -> Result<u16, CodecError> {
        let words = match self {
            ValueTransform::Negative => {
                encode_saturating(-i64::from(excess_w), RegisterFormat::I16)?
            }
            ValueTransform::Positive => encode(i64::from(excess_w.max(0)), RegisterFormat::U16)?,
        };
        Ok(words[0])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingState {
    Off,
    Automatic,
    Manual,
    Error,
    Unknown(u16),
}

impl OperatingState {
    pub fn from_register(value: u16) -> Self {
        match value {
            0 => OperatingState::Off,
            1 => OperatingState::Automatic,
            2 => OperatingState::Manual,
            3 => OperatingState::Error,
            other => OperatingState::Unknown(other),
        }
    }

    pub fn accepts_commands(self) -> bool {
        !matches!(self, OperatingState::Off | OperatingState::Error)
    }
}

impl fmt::Display for OperatingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperatingState::Off => f.write_str("heat pump is turned off"),
            OperatingState::Automatic => f.write_str("automatic"),
            OperatingState::Manual => f.write_str("manual"),
            OperatingState::Error => f.write_str("heat pump reports an error"),
            OperatingState::Unknown(value) => write!(f, "unknown state {value}"),
        }
    }
}

/// Resolved settings for the heat pump endpoint.
#[derive(Debug, Clone)]
pub struct HeatpumpConfig {
    pub identity: DeviceIdentity,
    pub model: HeatpumpModel,
    pub transform: ValueTransform,
    pub modbus: ClientConfig,
}

/// Lambda EU-L series heat pump fed through its E-manager power register.
pub struct LambdaHeatpump<T> {
    io: T,
    unit_id: u8,
    map: LambdaRegisterMap,
    transform: ValueTransform,
}

impl<T: RegisterIo> LambdaHeatpump<T> {
    pub fn new(io: T, unit_id: u8, model: HeatpumpModel, transform: ValueTransform) -> Self {
        Self {
            io,
            unit_id,
            map: model.register_map(),
            transform,
        }
    }

    pub async fn operating_state(&mut self) -> Result<OperatingState, WriteError> {
        let registers = self
            .io
            .read_holding(self.unit_id, self.map.operating_state, 1)
            .await?;
        let value = registers.first().copied().ok_or(WriteError::MissingState)?;
        Ok(OperatingState::from_register(value))
    }
}

impl LambdaHeatpump<ModbusClient> {
    pub fn from_config(config: &HeatpumpConfig) -> Self {
        let mut modbus = config.modbus.clone();
        modbus.host = config.identity.host.clone();
        modbus.port = config.identity.port;
        info!(
            endpoint = %config.identity,
            model = ?config.model,
            transform = ?config.transform,
            "using Lambda heat pump"
        );
        Self::new(
            ModbusClient::new(modbus),
            config.identity.unit_id,
            config.model,
            config.transform,
        )
    }
}

#[async_trait]
impl<T: RegisterIo> HeatpumpSink for LambdaHeatpump<T> {
    async fn write_command(&mut self, command: &OperatingCommand) -> Result<(), WriteError> {
        let word = self.transform.encode(command.excess_w)?;

        let state = self.operating_state().await?;
        if !state.accepts_commands() {
            return Err(WriteError::Unavailable(state));
        }

        self.io
            .write_holding(self.unit_id, self.map.e_manager_power, &[word])
            .await?;
        debug!(
            mode = %command.mode,
            excess_w = command.excess_w,
            word,
            "wrote e-manager power"
        );
        Ok(())
    }

    async fn close(&mut self) {
        self.io.disconnect();
    }
}

/// Logs commands instead of writing them. Used in demo mode.
#[derive(Debug, Default)]
pub struct DryRunSink {
    transform: ValueTransform,
    written: u64,
}

impl DryRunSink {
    pub fn new(transform: ValueTransform) -> Self {
        Self {
            transform,
            written: 0,
        }
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl HeatpumpSink for DryRunSink {
    async fn write_command(&mut self, command: &OperatingCommand) -> Result<(), WriteError> {
        let word = self.transform.encode(command.excess_w)?;
        self.written += 1;
        info!(
            mode = %command.mode,
            excess_w = command.excess_w,
            word,
            "demo mode, heat pump write skipped"
        );
        Ok(())
    }
}

/// The sink selected from configuration.
pub enum Heatpump {
    Lambda(LambdaHeatpump<ModbusClient>),
    DryRun(DryRunSink),
}

impl Heatpump {
    pub fn from_config(config: &HeatpumpConfig, demo: bool) -> Self {
        if demo {
            info!("demo mode enabled, heat pump registers stay untouched");
            Heatpump::DryRun(DryRunSink::new(config.transform))
        } else {
            Heatpump::Lambda(LambdaHeatpump::from_config(config))
        }
    }
}

#[async_trait]
impl HeatpumpSink for Heatpump {
    async fn write_command(&mut self, command: &OperatingCommand) -> Result<(), WriteError> {
        match self {
            Heatpump::Lambda(sink) => sink.write_command(command).await,
            Heatpump::DryRun(sink) => sink.write_command(command).await,
        }
    }

    async fn close(&mut self) {
        match self {
            Heatpump::Lambda(sink) => sink.close().await,
            Heatpump::DryRun(sink) => sink.close().await,
        }
    }
}
