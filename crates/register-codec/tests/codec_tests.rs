use proptest::prelude::*;
use register_codec::{
    apply_scale, decode, decode_scaled, encode, encode_f32, encode_saturating, CodecError,
    RegisterFormat,
};
use types::PointValue;

#[test]
fn decode_signed_single_word() {
    assert_eq!(decode(&[0xFA24], RegisterFormat::I16).expect("decode"), PointValue::I16(-1500));
    assert_eq!(decode(&[0x05DC], RegisterFormat::I16).expect("decode"), PointValue::I16(1500));
    assert_eq!(decode(&[0xFA24], RegisterFormat::U16).expect("decode"), PointValue::U16(64036));
}

#[test]
fn decode_two_words_high_word_first() {
    let value = decode(&[0xFFFF, 0xFA24], RegisterFormat::I32).expect("decode");
    assert_eq!(value, PointValue::I32(-1500));

    let value = decode(&[0x0001, 0x0000], RegisterFormat::U32).expect("decode");
    assert_eq!(value, PointValue::U32(65_536));

    let words = encode_f32(1234.5).expect("encode f32");
    let value = decode(&words, RegisterFormat::F32).expect("decode");
    assert_eq!(value, PointValue::F32(1234.5));
}

#[test]
fn decode_rejects_wrong_word_count() {
    let err = decode(&[1], RegisterFormat::I32).unwrap_err();
    assert_eq!(
        err,
        CodecError::WordCount {
            format: RegisterFormat::I32,
            expected: 2,
            actual: 1,
        }
    );
}

#[test]
fn decode_scaled_applies_power_of_ten() {
    // -1234 with scale factor -1 -> -123.4 W
    let value = decode_scaled(&[0xFB2E], RegisterFormat::I16, Some(0xFFFF)).expect("decode");
    assert!((value - -123.4).abs() < 1e-9);

    let value = decode_scaled(&[150], RegisterFormat::I16, Some(1)).expect("decode");
    assert!((value - 1500.0).abs() < 1e-9);

    let value = decode_scaled(&[150], RegisterFormat::I16, None).expect("decode");
    assert!((value - 150.0).abs() < 1e-9);
}

#[test]
fn decode_scaled_rejects_sentinels() {
    assert_eq!(
        decode_scaled(&[100], RegisterFormat::I16, Some(0x8000)),
        Err(CodecError::InvalidScale(0x8000))
    );
    assert_eq!(
        decode_scaled(&[100], RegisterFormat::I16, Some(42)),
        Err(CodecError::InvalidScale(42))
    );
    assert_eq!(
        decode_scaled(&[0x8000], RegisterFormat::I16, Some(0)),
        Err(CodecError::NotImplemented)
    );
}

#[test]
fn apply_scale_handles_sentinels() {
    assert_eq!(apply_scale(PointValue::U16(u16::MAX), 0), None);
    assert_eq!(apply_scale(PointValue::F32(f32::NAN), 0), None);
    assert_eq!(apply_scale(PointValue::U32(25), 2), Some(2500.0));
}

#[test]
fn encode_rejects_out_of_range() {
    assert_eq!(
        encode(40_000, RegisterFormat::I16),
        Err(CodecError::Range {
            value: 40_000,
            format: RegisterFormat::I16,
        })
    );
    assert!(encode(-1, RegisterFormat::U16).is_err());
    assert!(encode(i64::from(u32::MAX) + 1, RegisterFormat::U32).is_err());
    assert_eq!(encode(-1500, RegisterFormat::I16).expect("encode"), vec![0xFA24]);
}

#[test]
fn encode_saturating_clamps() {
    assert_eq!(encode_saturating(40_000, RegisterFormat::I16).expect("encode"), vec![0x7FFF]);
    assert_eq!(encode_saturating(-40_000, RegisterFormat::I16).expect("encode"), vec![0x8000]);
    assert_eq!(encode_saturating(-5, RegisterFormat::U16).expect("encode"), vec![0]);
}

proptest! {
    #[test]
    fn i16_round_trip(v in any::<i16>()) {
        let words = encode(i64::from(v), RegisterFormat::I16).unwrap();
        prop_assert_eq!(decode(&words, RegisterFormat::I16).unwrap(), PointValue::I16(v));
    }

    #[test]
    fn u16_round_trip(v in any::<u16>()) {
        let words = encode(i64::from(v), RegisterFormat::U16).unwrap();
        prop_assert_eq!(decode(&words, RegisterFormat::U16).unwrap(), PointValue::U16(v));
    }

    #[test]
    fn i32_round_trip(v in any::<i32>()) {
        let words = encode(i64::from(v), RegisterFormat::I32).unwrap();
        prop_assert_eq!(decode(&words, RegisterFormat::I32).unwrap(), PointValue::I32(v));
    }

    #[test]
    fn u32_round_trip(v in any::<u32>()) {
        let words = encode(i64::from(v), RegisterFormat::U32).unwrap();
        prop_assert_eq!(decode(&words, RegisterFormat::U32).unwrap(), PointValue::U32(v));
    }
}
