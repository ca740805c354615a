use std::time::Duration;

use bridge_app::{BridgeConfig, Cli};
use clap::Parser;
use heatpump_sink::{HeatpumpModel, ValueTransform};
use meter_source::MeterKind;

#[test]
fn source_type_accepts_short_aliases() {
    let cli = Cli::try_parse_from(["pv-heatpump-bridge", "--source-type", "fsm"]).expect("parse");
    let mut config = BridgeConfig::default();
    cli.apply(&mut config).expect("apply");
    assert_eq!(config.source.kind, MeterKind::Fronius);

    let cli = Cli::try_parse_from(["pv-heatpump-bridge", "--source-type", "se"]).expect("parse");
    cli.apply(&mut config).expect("apply");
    assert_eq!(config.source.kind, MeterKind::SolarEdge);
}

#[test]
fn unknown_source_type_is_rejected() {
    assert!(Cli::try_parse_from(["pv-heatpump-bridge", "--source-type", "sma"]).is_err());
}

#[test]
fn static_value_may_be_negative() {
    let cli = Cli::try_parse_from([
        "pv-heatpump-bridge",
        "--source-type",
        "static",
        "--source-value",
        "-1500",
        "-d",
    ])
    .expect("parse");
    let mut config = BridgeConfig::default();
    cli.apply(&mut config).expect("apply");

    assert_eq!(config.source.kind, MeterKind::Static);
    assert_eq!(config.source.static_value_w, -1_500);
    assert!(config.demo);
    config.validate().expect("static demo needs no hosts");
}

#[test]
fn flags_override_loaded_values() {
    let mut config = BridgeConfig::default();
    config.source.host = Some("from-file".to_string());
    config.dest.transform = ValueTransform::Negative;

    let cli = Cli::try_parse_from([
        "pv-heatpump-bridge",
        "--source-host",
        "192.168.1.20",
        "--dest-host",
        "192.168.1.30",
        "--dest-port",
        "5020",
        "--dest-type",
        "positive",
        "--dest-model",
        "eu13l",
        "--surplus-threshold",
        "250",
        "--import-threshold",
        "500",
        "-i",
        "2.5",
        "--log",
        "debug",
    ])
    .expect("parse");
    cli.apply(&mut config).expect("apply");

    assert_eq!(config.source.host.as_deref(), Some("192.168.1.20"));
    assert_eq!(config.dest.host.as_deref(), Some("192.168.1.30"));
    assert_eq!(config.dest.port, 5020);
    assert_eq!(config.dest.transform, ValueTransform::Positive);
    assert_eq!(config.dest.model, HeatpumpModel::Eu13l);
    assert_eq!(config.policy.surplus_threshold_w, 250);
    assert_eq!(config.policy.import_threshold_w, 500);
    assert_eq!(config.interval, Duration::from_millis(2_500));
    assert_eq!(config.log_level.as_deref(), Some("debug"));
    config.validate().expect("validate");
}

#[test]
fn absent_flags_leave_config_untouched() {
    let mut config = BridgeConfig::default();
    config.source.host = Some("meter".to_string());
    config.demo = true;

    let cli = Cli::try_parse_from(["pv-heatpump-bridge"]).expect("parse");
    cli.apply(&mut config).expect("apply");

    assert_eq!(config.source.host.as_deref(), Some("meter"));
    assert!(config.demo);
    assert_eq!(config.interval, Duration::from_secs(1));
}

#[test]
fn negative_interval_is_rejected() {
    let cli = Cli::try_parse_from(["pv-heatpump-bridge", "--interval=-1"]).expect("parse");
    let mut config = BridgeConfig::default();
    assert!(cli.apply(&mut config).is_err());
}

#[test]
fn zero_interval_fails_validation() {
    let cli = Cli::try_parse_from(["pv-heatpump-bridge", "-i", "0", "-d", "--source-type", "static"])
        .expect("parse");
    let mut config = BridgeConfig::default();
    cli.apply(&mut config).expect("apply");
    assert!(config.validate().is_err());
}
