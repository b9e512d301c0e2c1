//! Encodings for values stored in the index tables.
//!
//! Positions are delta encoded, then written as variable-byte integers: seven
//! bits per byte, high bit set on every byte but the last.

use crate::error::{Error, Result};
use quarry_core::DocumentId;
use rusqlite::types::Value;

/// Encode strictly increasing positions
pub fn encode_positions(positions: &[u32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(positions.len());
    let mut previous = 0u32;
    for &position in positions {
        encode_u32(&mut out, position - previous);
        previous = position;
    }
    out
}

/// Decode a blob written by [`encode_positions`]
pub fn decode_positions(data: &[u8]) -> Result<Vec<u32>> {
    let mut positions = Vec::new();
    let mut offset = 0;
    let mut current = 0u32;

    while offset < data.len() {
        let (delta, consumed) = decode_u32(&data[offset..])?;
        current = current
            .checked_add(delta)
            .ok_or_else(|| Error::codec("position overflow"))?;
        positions.push(current);
        offset += consumed;
    }

    Ok(positions)
}

fn encode_u32(out: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        out.push((value & 0x7f) as u8 | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

fn decode_u32(input: &[u8]) -> Result<(u32, usize)> {
    let mut value = 0u32;
    let mut shift = 0;

    for (i, &byte) in input.iter().enumerate() {
        value |= u32::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok((value, i + 1));
        }

        shift += 7;
        if shift > 28 {
            return Err(Error::codec("variable-byte integer longer than five bytes"));
        }
    }

    Err(Error::codec("truncated variable-byte integer"))
}

/// SQL value for a document id; integers and strings keep their storage class
pub fn id_to_sql(id: &DocumentId) -> Value {
    match id {
        DocumentId::Int(n) => Value::Integer(*n),
        DocumentId::Text(s) => Value::Text(s.clone()),
    }
}

/// Document id read back from the `external_id` column
pub fn id_from_sql(value: Value) -> Result<DocumentId> {
    match value {
        Value::Integer(n) => Ok(DocumentId::Int(n)),
        Value::Text(s) => Ok(DocumentId::Text(s)),
        other => Err(Error::codec(format!("unexpected document id value: {other:?}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_small_deltas_take_one_byte() {
        let encoded = encode_positions(&[0, 1, 2, 10]);
        assert_eq!(encoded, vec![0, 1, 1, 8]);
    }

    #[test]
    fn test_large_positions() {
        let positions = vec![5, 300, 70_000, u32::MAX];
        assert_eq!(decode_positions(&encode_positions(&positions)).unwrap(), positions);
    }

    #[test]
    fn test_empty() {
        assert!(encode_positions(&[]).is_empty());
        assert!(decode_positions(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_corrupt_blobs() {
        assert!(matches!(decode_positions(&[0x80]), Err(Error::Codec(_))));
        assert!(matches!(decode_positions(&[0xff, 0xff, 0xff, 0xff, 0xff, 0x01]), Err(Error::Codec(_))));
    }

    #[test]
    fn test_document_id_values() {
        assert_eq!(id_to_sql(&DocumentId::Int(4)), Value::Integer(4));
        assert_eq!(id_from_sql(Value::Text("a".into())).unwrap(), DocumentId::from("a"));
        assert!(id_from_sql(Value::Real(1.5)).is_err());
    }

    proptest! {
        #[test]
        fn positions_survive_encoding(mut positions in proptest::collection::vec(any::<u32>(), 0..64)) {
            positions.sort_unstable();
            positions.dedup();
            prop_assert_eq!(decode_positions(&encode_positions(&positions)).unwrap(), positions);
        }
    }
}
