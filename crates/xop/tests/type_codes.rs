use std::collections::HashSet;

use xop::tensor::DType;
use xop::{KernelError, TypeCode};

#[test]
fn canonical_codes_are_fixed() {
    let expected = [
        (DType::Bool, 0),
        (DType::I8, 1),
        (DType::U8, 2),
        (DType::I16, 3),
        (DType::U16, 4),
        (DType::I32, 5),
        (DType::U32, 6),
        (DType::I64, 9),
        (DType::U64, 10),
        (DType::F32, 11),
        (DType::F64, 12),
        (DType::String, 18),
        (DType::F16, 23),
        (DType::BF16, 23),
    ];
    for (dtype, raw) in expected {
        assert_eq!(TypeCode::from_dtype(dtype).unwrap().raw(), raw, "{dtype}");
    }
}

#[test]
fn every_code_round_trips_through_its_dtype() {
    for code in TypeCode::ALL {
        assert_eq!(TypeCode::from_dtype(code.dtype()).unwrap(), code);
        assert_eq!(TypeCode::from_raw(code.raw()).unwrap(), code);
    }
}

#[test]
fn mapped_dtypes_round_trip_except_shared_half_code() {
    let mut seen = HashSet::new();
    for dtype in DType::ALL {
        let Ok(code) = TypeCode::from_dtype(dtype) else {
            continue;
        };
        assert!(code.admits(dtype));
        if dtype != DType::BF16 {
            assert_eq!(code.dtype(), dtype);
            assert!(seen.insert(code), "{code:?} assigned twice");
        }
    }
    assert_eq!(seen.len(), TypeCode::ALL.len());
}

#[test]
fn complex_types_have_no_code() {
    for dtype in [DType::Complex64, DType::Complex128] {
        assert!(matches!(
            TypeCode::from_dtype(dtype),
            Err(KernelError::UnsupportedType(_))
        ));
    }
}

#[test]
fn unknown_raw_codes_are_rejected() {
    for raw in [-1, 7, 8, 13, 17, 19, 22, 24] {
        assert!(TypeCode::from_raw(raw).is_err(), "{raw}");
    }
}

#[test]
fn ensure_codes_names_the_offending_slot() {
    let err = xop::type_code::ensure_codes(&[DType::F32, DType::Complex64], "output").unwrap_err();
    match err {
        KernelError::UnsupportedType(message) => assert!(message.contains("output 1"), "{message}"),
        other => panic!("unexpected error {other:?}"),
    }
}
