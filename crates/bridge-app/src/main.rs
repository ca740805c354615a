use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bridge_app::{BridgeConfig, Cli};
use control_loop::ControlLoop;
use heatpump_sink::Heatpump;
use meter_source::Meter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut config =
        BridgeConfig::load_with_path(cli.config.clone()).context("load config failed")?;
    cli.apply(&mut config).context("invalid command line")?;

    init_tracing(&config)?;
    config.validate().context("config validation failed")?;

    if let Some(ref listen) = config.metrics_listen {
        install_metrics_exporter(listen)?;
    }

    let meter = Meter::from_config(&config.meter_config());
    let sink = Heatpump::from_config(&config.heatpump_config(), config.demo);
    info!(
        source = %config.source.kind,
        dest = ?config.dest.host,
        demo = config.demo,
        interval_ms = config.interval.as_millis() as u64,
        "bridge starting"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let control = ControlLoop::new(
        meter,
        sink,
        config.policy,
        config.loop_config(),
        shutdown_rx.clone(),
    );

    notify_ready();
    let watchdog_handle = start_watchdog(shutdown_rx);
    let signal_handle = tokio::spawn(forward_shutdown(shutdown_tx));

    let result = control.run().await;

    signal_handle.abort();
    if let Some(handle) = watchdog_handle {
        handle.abort();
        let _ = handle.await;
    }

    result.context("control loop failed")?;
    info!("bridge stopped");
    Ok(())
}

fn init_tracing(config: &BridgeConfig) -> Result<()> {
    let filter = match config.log_level.as_deref() {
        Some(directive) => EnvFilter::try_new(directive)
            .with_context(|| format!("invalid log level {directive}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(if config.demo { "debug" } else { "info" })
        }),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}

fn install_metrics_exporter(listen: &str) -> Result<()> {
    let addr: SocketAddr = listen
        .parse()
        .with_context(|| format!("invalid metrics listen address {listen}"))?;
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("prometheus exporter install failed")?;
    control_loop::describe_metrics();
    info!(%addr, "prometheus exporter listening");
    Ok(())
}

async fn forward_shutdown(shutdown_tx: watch::Sender<bool>) {
    shutdown_signal().await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);
}

#[cfg(unix)]
async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(err) => {
            warn!(error = %err, "SIGTERM handler install failed");
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(error = %err, "ctrl-c handler failed");
            }
            return;
        }
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                warn!(error = %err, "ctrl-c handler failed");
            }
        }
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "ctrl-c handler failed");
    }
}

#[cfg(target_os = "linux")]
fn notify_ready() {
    if let Err(err) = sd_notify::notify(true, &[sd_notify::NotifyState::Ready]) {
        warn!(error = %err, "systemd ready notify failed");
    }
}

#[cfg(not(target_os = "linux"))]
fn notify_ready() {}

#[cfg(target_os = "linux")]
fn start_watchdog(
    mut shutdown: watch::Receiver<bool>,
) -> Option<tokio::task::JoinHandle<()>> {
    let interval = watchdog_interval()?;
    Some(tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sleep(interval) => {
                    if let Err(err) = sd_notify::notify(false, &[sd_notify::NotifyState::Watchdog]) {
                        warn!(error = %err, "systemd watchdog notify failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
    }))
}

#[cfg(not(target_os = "linux"))]
fn start_watchdog(_shutdown: watch::Receiver<bool>) -> Option<tokio::task::JoinHandle<()>> {
    None
}

#[cfg(target_os = "linux")]
fn watchdog_interval() -> Option<Duration> {
    let watchdog_usec = env::var("WATCHDOG_USEC").ok()?.parse::<u64>().ok()?;
    if let Some(pid) = env::var("WATCHDOG_PID")
        .ok()
        .and_then(|value| value.parse::<u32>().ok())
    {
        if pid != std::process::id() {
            return None;
        }
    }

    // systemd expects a ping at least every half period.
    let interval = watchdog_usec.saturating_div(2).max(100_000);
    Some(Duration::from_micros(interval))
}
