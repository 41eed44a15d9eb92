//! Binary bucket codec.
//!
//! A bucket value is `uvarint(count)` followed, per entry, by
//! `u32_le(hash) · uvarint(data_len) · data`. The codec is pure, total on
//! well-formed input, and preserves entry order.

use bytes::{BufMut, Bytes, BytesMut};
use unsigned_varint::{decode, encode};

use crate::error::DecodeError;
use crate::types::Entry;

pub fn encode_entries(entries: &[Entry]) -> Bytes {
    let mut buf = BytesMut::new();
    let mut scratch = encode::u64_buffer();

    buf.put_slice(encode::u64(entries.len() as u64, &mut scratch));
    for entry in entries {
        buf.put_u32_le(entry.hash);
        buf.put_slice(encode::u64(entry.data.len() as u64, &mut scratch));
        buf.put_slice(&entry.data);
    }
    buf.freeze()
}

pub fn decode_entries(data: &[u8]) -> Result<Vec<Entry>, DecodeError> {
    let (count, mut data) = decode::u64(data).map_err(|_| DecodeError::InvalidEntryCount)?;

    // cap the pre-allocation: `count` is attacker-sized until proven by bytes
    let mut entries = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        if data.len() < 4 {
            return Err(DecodeError::MissingHashBytes);
        }
        let hash = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        data = &data[4..];

        let (data_len, rest) = decode::u64(data).map_err(|_| DecodeError::MissingDataLength)?;
        data = rest;

        if (data.len() as u64) < data_len {
            return Err(DecodeError::MissingData);
        }
        let data_len = data_len as usize;
        entries.push(Entry {
            hash,
            data: Bytes::copy_from_slice(&data[..data_len]),
        });
        data = &data[data_len..];
    }
    Ok(entries)
}
