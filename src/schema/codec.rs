//! Binary encoding of field values for the columnar segment files.
//!
//! Strings are u32-LE length-prefixed UTF-8, doubles are f64-LE, vectors are
//! exactly `dim` f32-LE words. Decoding is exact: floats round-trip
//! bit-for-bit.

use crate::schema::{FieldType, SchemaError, Value};

pub fn encode_value(value: &Value, field_type: &FieldType) -> Result<Vec<u8>, SchemaError> {
    match (field_type, value) {
        (FieldType::VarChar { .. }, Value::Str(s)) => {
            let mut out = Vec::with_capacity(4 + s.len());
            out.extend_from_slice(&(s.len() as u32).to_le_bytes());
            out.extend_from_slice(s.as_bytes());
            Ok(out)
        }
        (FieldType::Double, Value::Double(d)) => Ok(d.to_le_bytes().to_vec()),
        (FieldType::FloatVector { dim }, Value::Vector(v)) => {
            if v.len() != *dim {
                return Err(SchemaError::DimensionMismatch {
                    field: String::new(),
                    expected: *dim,
                    got: v.len(),
                });
            }
            let mut out = Vec::with_capacity(v.len() * 4);
            for x in v {
                out.extend_from_slice(&x.to_le_bytes());
            }
            Ok(out)
        }
        _ => Err(SchemaError::TypeMismatch(String::new())),
    }
}

pub fn decode_value(bytes: &[u8], field_type: &FieldType) -> Result<Value, SchemaError> {
    let (value, consumed) = decode_value_at(bytes, field_type)?;
    if consumed != bytes.len() {
        return Err(SchemaError::CorruptEncoding);
    }
    Ok(value)
}

fn decode_value_at(bytes: &[u8], field_type: &FieldType) -> Result<(Value, usize), SchemaError> {
    match field_type {
        FieldType::VarChar { .. } => {
            if bytes.len() < 4 {
                return Err(SchemaError::CorruptEncoding);
            }
            let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            if bytes.len() < 4 + len {
                return Err(SchemaError::CorruptEncoding);
            }
            let s = std::str::from_utf8(&bytes[4..4 + len])
                .map_err(|_| SchemaError::CorruptEncoding)?;
            Ok((Value::Str(s.to_string()), 4 + len))
        }
        FieldType::Double => {
            if bytes.len() < 8 {
                return Err(SchemaError::CorruptEncoding);
            }
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&bytes[..8]);
            Ok((Value::Double(f64::from_le_bytes(raw)), 8))
        }
        FieldType::FloatVector { dim } => {
            let want = dim * 4;
            if bytes.len() < want {
                return Err(SchemaError::CorruptEncoding);
            }
            let mut v = Vec::with_capacity(*dim);
            for chunk in bytes[..want].chunks_exact(4) {
                let mut raw = [0u8; 4];
                raw.copy_from_slice(chunk);
                v.push(f32::from_le_bytes(raw));
            }
            Ok((Value::Vector(v), want))
        }
    }
}

/// Concatenated encoding of one column; fixed-width for doubles and vectors,
/// self-delimiting for strings.
pub fn encode_column(values: &[Value], field_type: &FieldType) -> Result<Vec<u8>, SchemaError> {
    let mut out = Vec::new();
    for value in values {
        out.extend_from_slice(&encode_value(value, field_type)?);
    }
    Ok(out)
}

pub fn decode_column(
    bytes: &[u8],
    field_type: &FieldType,
    rows: usize,
) -> Result<Vec<Value>, SchemaError> {
    let mut out = Vec::with_capacity(rows);
    let mut cursor = 0usize;
    for _ in 0..rows {
        let (value, consumed) = decode_value_at(&bytes[cursor..], field_type)?;
        cursor += consumed;
        out.push(value);
    }
    if cursor != bytes.len() {
        return Err(SchemaError::CorruptEncoding);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        let ty = FieldType::VarChar { max_length: 100 };
        let value = Value::Str("hello vexdb".into());
        let bytes = encode_value(&value, &ty).unwrap();
        assert_eq!(decode_value(&bytes, &ty).unwrap(), value);
    }

    #[test]
    fn double_round_trip_bit_exact() {
        let ty = FieldType::Double;
        for raw in [0.0, -0.0, 1.5, f64::MIN_POSITIVE, 1.0 / 3.0, f64::MAX] {
            let bytes = encode_value(&Value::Double(raw), &ty).unwrap();
            let Value::Double(back) = decode_value(&bytes, &ty).unwrap() else {
                panic!("decoded wrong variant");
            };
            assert_eq!(raw.to_bits(), back.to_bits());
        }
    }

    #[test]
    fn vector_round_trip_bit_exact() {
        let ty = FieldType::FloatVector { dim: 4 };
        let value = Value::Vector(vec![0.1, -2.5, 3.25e-7, f32::MAX]);
        let bytes = encode_value(&value, &ty).unwrap();
        let Value::Vector(back) = decode_value(&bytes, &ty).unwrap() else {
            panic!("decoded wrong variant");
        };
        for (a, b) in value.as_vector().unwrap().iter().zip(back.iter()) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn wrong_dimension_fails() {
        let ty = FieldType::FloatVector { dim: 8 };
        let err = encode_value(&Value::Vector(vec![0.0; 3]), &ty).unwrap_err();
        assert!(matches!(
            err,
            SchemaError::DimensionMismatch { expected: 8, got: 3, .. }
        ));
    }

    #[test]
    fn wrong_runtime_type_fails() {
        let err = encode_value(&Value::Str("oops".into()), &FieldType::Double).unwrap_err();
        assert!(matches!(err, SchemaError::TypeMismatch(_)));
    }

    #[test]
    fn column_round_trip_mixed_lengths() {
        let ty = FieldType::VarChar { max_length: 100 };
        let values = vec![
            Value::Str("".into()),
            Value::Str("a".into()),
            Value::Str("longer value".into()),
        ];
        let bytes = encode_column(&values, &ty).unwrap();
        assert_eq!(decode_column(&bytes, &ty, 3).unwrap(), values);
    }

    #[test]
    fn truncated_column_fails() {
        let ty = FieldType::Double;
        let bytes = encode_column(&[Value::Double(1.0)], &ty).unwrap();
        assert!(matches!(
            decode_column(&bytes[..4], &ty, 1),
            Err(SchemaError::CorruptEncoding)
        ));
    }
}
