use std::io::ErrorKind;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use heatpump_sink::{
    DryRunSink, HeatpumpModel, HeatpumpSink, LambdaHeatpump, LambdaRegisterMap, OperatingState,
    ValueTransform, WriteError,
};
use modbus_client::{ClientError, RegisterIo};
use register_codec::CodecError;
use types::{OperatingCommand, OperatingMode};

type WriteLog = Arc<Mutex<Vec<(u16, Vec<u16>)>>>;

struct FakeLambda {
    state: u16,
    fail_writes: bool,
    writes: WriteLog,
}

impl FakeLambda {
    fn new(state: u16) -> (Self, WriteLog) {
        let writes = WriteLog::default();
        let fake = Self {
            state,
            fail_writes: false,
            writes: writes.clone(),
        };
        (fake, writes)
    }
}

#[async_trait]
impl RegisterIo for FakeLambda {
    async fn read_holding(
        &mut self,
        _unit_id: u8,
        start: u16,
        count: u16,
    ) -> Result<Vec<u16>, ClientError> {
        assert_eq!(start, LambdaRegisterMap::EU_L.operating_state);
        assert_eq!(count, 1);
        Ok(vec![self.state])
    }

    async fn write_holding(
        &mut self,
        _unit_id: u8,
        start: u16,
        values: &[u16],
    ) -> Result<(), ClientError> {
        if self.fail_writes {
            return Err(ClientError::Modbus(std::io::Error::from(ErrorKind::BrokenPipe)));
        }
        self.writes
            .lock()
            .expect("write log")
            .push((start, values.to_vec()));
        Ok(())
    }
}

fn surplus(excess_w: i32) -> OperatingCommand {
    OperatingCommand {
        mode: OperatingMode::PvSurplus,
        excess_w,
    }
}

fn normal(excess_w: i32) -> OperatingCommand {
    OperatingCommand {
        mode: OperatingMode::Normal,
        excess_w,
    }
}

#[test]
fn negative_transform_sends_excess_as_negative_consumption() {
    let transform = ValueTransform::Negative;
    assert_eq!(transform.encode(1500).expect("encode"), 0xFA24);
    assert_eq!(transform.encode(-700).expect("encode"), 700);
    assert_eq!(transform.encode(0).expect("encode"), 0);
    assert_eq!(transform.encode(40_000).expect("encode"), 0x8000);
    assert_eq!(transform.encode(-40_000).expect("encode"), 0x7FFF);
}

#[test]
fn positive_transform_sends_excess_as_is() {
    let transform = ValueTransform::Positive;
    assert_eq!(transform.encode(1500).expect("encode"), 1500);
    assert_eq!(transform.encode(-700).expect("encode"), 0);
    assert!(transform.encode(70_000).is_err());
}

#[test]
fn positive_transform_overflows_past_u16_while_negative_saturates() {
    assert_eq!(ValueTransform::Positive.encode(65_535).expect("encode"), 0xFFFF);
    let err = ValueTransform::Positive.encode(65_536).unwrap_err();
    assert!(matches!(err, CodecError::Range { value: 65_536, .. }));

    assert_eq!(ValueTransform::Negative.encode(65_536).expect("encode"), 0x8000);
}

#[test]
fn eu_l_models_share_register_map() {
    assert_eq!(HeatpumpModel::Eu08l.register_map(), HeatpumpModel::Eu13l.register_map());
    assert_eq!(HeatpumpModel::Eu13l.register_map().e_manager_power, 102);
}

#[tokio::test]
async fn writes_single_e_manager_register() {
    let (fake, writes) = FakeLambda::new(1);
    let mut pump = LambdaHeatpump::new(fake, 1, HeatpumpModel::Eu08l, ValueTransform::Negative);

    pump.write_command(&surplus(1500)).await.expect("write");
    pump.write_command(&normal(-300)).await.expect("write");

    let writes = writes.lock().expect("write log");
    assert_eq!(*writes, vec![(102, vec![0xFA24]), (102, vec![300])]);
}

#[tokio::test]
async fn off_or_faulted_heat_pump_is_not_written() {
    for (state, expected) in [(0, OperatingState::Off), (3, OperatingState::Error)] {
        let (fake, writes) = FakeLambda::new(state);
        let mut pump =
            LambdaHeatpump::new(fake, 1, HeatpumpModel::Eu13l, ValueTransform::Negative);

        let err = pump.write_command(&surplus(800)).await.unwrap_err();
        assert!(matches!(err, WriteError::Unavailable(found) if found == expected));
        assert!(!err.is_fatal());
        assert!(writes.lock().expect("write log").is_empty());
    }
}

#[tokio::test]
async fn transport_failure_is_recoverable() {
    let (mut fake, _writes) = FakeLambda::new(2);
    fake.fail_writes = true;
    let mut pump = LambdaHeatpump::new(fake, 1, HeatpumpModel::Eu08l, ValueTransform::Negative);

    let err = pump.write_command(&surplus(800)).await.unwrap_err();
    assert!(matches!(err, WriteError::Transport(_)));
    assert!(!err.is_fatal());
}

#[tokio::test]
async fn encoding_failure_is_fatal_and_skips_io() {
    let (fake, writes) = FakeLambda::new(1);
    let mut pump = LambdaHeatpump::new(fake, 1, HeatpumpModel::Eu08l, ValueTransform::Positive);

    let err = pump.write_command(&surplus(100_000)).await.unwrap_err();
    assert!(err.is_fatal());
    assert!(writes.lock().expect("write log").is_empty());
}

#[tokio::test]
async fn dry_run_counts_commands() {
    let mut sink = DryRunSink::new(ValueTransform::Negative);
    sink.write_command(&surplus(1500)).await.expect("write");
    sink.write_command(&normal(0)).await.expect("write");
    assert_eq!(sink.written(), 2);
    sink.close().await;
}
