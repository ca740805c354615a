pub mod policy;

use std::time::{Duration, Instant};

use metrics::{counter, describe_counter, describe_gauge, gauge};
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use heatpump_sink::{HeatpumpSink, WriteError};
use meter_source::MeterSource;
use register_codec::CodecError;
use types::{OperatingCommand, OperatingMode, PowerSample};

pub use policy::{DecisionPolicy, HysteresisState};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub interval: Duration,
    /// Mode assumed for the heat pump before the first command is written.
    pub initial_mode: OperatingMode,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            initial_mode: OperatingMode::Normal,
        }
    }
}

/// Registers descriptions for the loop's metrics with the installed recorder.
pub fn describe_metrics() {
    describe_counter!("bridge_cycles_total", "Control cycles started");
    describe_counter!("bridge_read_failures_total", "Cycles whose meter read failed");
    describe_counter!("bridge_write_failures_total", "Commands the heat pump did not accept");
    describe_counter!("bridge_mode_switches_total", "Operating mode changes written to the heat pump");
    describe_gauge!("bridge_power_watts", "Last grid power sample, positive on import");
    describe_gauge!("bridge_pv_surplus_mode", "1 while the heat pump runs in PV surplus mode");
}

/// Errors that end the loop. Transport failures never do.
#[derive(Debug, Error)]
pub enum LoopError {
    #[error("heat pump command cannot be encoded: {0}")]
    Encoding(#[from] CodecError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Disconnected,
    Connecting,
    Polling,
    Idle,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Written {
        sample: PowerSample,
        command: OperatingCommand,
    },
    /// The meter could not be read; nothing was written.
    ReadFailed,
    /// The command was computed but the heat pump did not take it.
    WriteFailed {
        sample: PowerSample,
        command: OperatingCommand,
    },
}

/// Reads the meter, decides and writes the heat pump, one cycle per interval.
pub struct ControlLoop<M, S> {
    meter: M,
    sink: S,
    policy: DecisionPolicy,
    config: LoopConfig,
    hysteresis: HysteresisState,
    state: LoopState,
    shutdown: watch::Receiver<bool>,
    cycles: u64,
}

impl<M: MeterSource, S: HeatpumpSink> ControlLoop<M, S> {
    pub fn new(
        meter: M,
        sink: S,
        policy: DecisionPolicy,
        config: LoopConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let hysteresis = HysteresisState::new(config.initial_mode);
        Self {
            meter,
            sink,
            policy,
            config,
            hysteresis,
            state: LoopState::Disconnected,
            shutdown,
            cycles: 0,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn hysteresis(&self) -> HysteresisState {
        self.hysteresis
    }

    pub fn cycles(&self) -> u64 {
        self.cycles
    }

    /// Runs until shutdown is signalled or a fatal error occurs. Both endpoints
    /// are closed on every exit path.
    pub async fn run(mut self) -> Result<(), LoopError> {
        self.transition(LoopState::Connecting);
        info!(
            meter = %self.meter.kind(),
            interval_ms = self.config.interval.as_millis(),
            surplus_threshold_w = self.policy.surplus_threshold_w,
            import_threshold_w = self.policy.import_threshold_w,
            "control loop started"
        );

        let result = self.poll_until_shutdown().await;

        self.meter.close().await;
        self.sink.close().await;
        self.transition(LoopState::Stopped);

        match &result {
            Ok(()) => info!(cycles = self.cycles, "control loop stopped"),
            Err(err) => error!(cycles = self.cycles, error = %err, "control loop aborted"),
        }
        result
    }

    async fn poll_until_shutdown(&mut self) -> Result<(), LoopError> {
        loop {
            if *self.shutdown.borrow() {
                info!("control loop shutdown requested");
                return Ok(());
            }

            let cycle_start = Instant::now();
            let outcome = self.run_cycle().await?;
            let elapsed = cycle_start.elapsed();
            let lag = elapsed.saturating_sub(self.config.interval);
            debug!(
                cycle = self.cycles,
                ?outcome,
                elapsed_ms = elapsed.as_millis(),
                lag_ms = lag.as_millis(),
                "cycle complete"
            );

            self.transition(LoopState::Idle);
            tokio::select! {
                _ = sleep(self.config.interval) => {},
                changed = self.shutdown.changed() => {
                    if changed.is_err() || *self.shutdown.borrow() {
                        info!("control loop shutdown requested");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Runs a single read → decide → write cycle.
    ///
    /// Read and write failures are logged and reported through the outcome;
    /// only an unencodable command is returned as an error.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, LoopError> {
        self.transition(LoopState::Polling);
        self.cycles = self.cycles.wrapping_add(1);
        counter!("bridge_cycles_total").increment(1);

        let sample = match self.meter.read_power().await {
            Ok(sample) => sample,
            Err(err) => {
                counter!("bridge_read_failures_total").increment(1);
                warn!(
                    cycle = self.cycles,
                    meter = %self.meter.kind(),
                    error = %err,
                    "meter read failed, heat pump left unchanged"
                );
                return Ok(CycleOutcome::ReadFailed);
            }
        };
        gauge!("bridge_power_watts").set(f64::from(sample.watts()));

        let (command, next) = self.policy.decide(sample, self.hysteresis);
        match self.sink.write_command(&command).await {
            Ok(()) => {
                if next.mode != self.hysteresis.mode {
                    counter!("bridge_mode_switches_total").increment(1);
                    info!(from = %self.hysteresis.mode, to = %next.mode, "operating mode switched");
                }
                self.hysteresis = next;
                gauge!("bridge_pv_surplus_mode")
                    .set(if next.mode == OperatingMode::PvSurplus { 1.0 } else { 0.0 });
                info!(
                    cycle = self.cycles,
                    power_w = sample.watts(),
                    mode = %command.mode,
                    excess_w = command.excess_w,
                    held_cycles = next.held_cycles,
                    "heat pump updated"
                );
                Ok(CycleOutcome::Written { sample, command })
            }
            Err(WriteError::Encoding(err)) => {
                error!(
                    cycle = self.cycles,
                    power_w = sample.watts(),
                    excess_w = command.excess_w,
                    error = %err,
                    "heat pump command out of register range"
                );
                Err(LoopError::Encoding(err))
            }
            Err(err) => {
                counter!("bridge_write_failures_total").increment(1);
                warn!(
                    cycle = self.cycles,
                    power_w = sample.watts(),
                    mode = %command.mode,
                    error = %err,
                    "heat pump write failed, retrying next cycle"
                );
                Ok(CycleOutcome::WriteFailed { sample, command })
            }
        }
    }

    fn transition(&mut self, next: LoopState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "control loop state");
            self.state = next;
        }
    }
}
