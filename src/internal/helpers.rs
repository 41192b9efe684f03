//! Internal helper functions.

use std::io::Read;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, TimeZone, Utc};

use crate::error::{Error, Result};

/// Read a multiprecision integer: a two-octet big-endian bit count
/// followed by the magnitude bytes.
pub(crate) fn read_mpi<R: Read>(reader: &mut R) -> Result<Vec<u8>> {
    let bits = reader.read_u16::<BigEndian>()? as usize;
    let len = bits.div_ceil(8);
    let mut value = vec![0u8; len];
    reader.read_exact(&mut value)?;
    Ok(value)
}

/// Write a multiprecision integer, stripping leading zero octets so the
/// bit count is minimal.
pub(crate) fn write_mpi(out: &mut Vec<u8>, value: &[u8]) {
    let stripped = strip_leading_zeros(value);
    let bits = mpi_bits(stripped);
    out.write_u16::<BigEndian>(bits as u16).expect("vec write");
    out.extend_from_slice(stripped);
}

fn strip_leading_zeros(value: &[u8]) -> &[u8] {
    let start = value.iter().position(|&b| b != 0).unwrap_or(value.len());
    &value[start..]
}

fn mpi_bits(value: &[u8]) -> usize {
    match value.first() {
        None => 0,
        Some(&first) => (value.len() - 1) * 8 + (8 - first.leading_zeros() as usize),
    }
}

/// Two-octet checksum over key material: sum of all octets mod 65536.
pub(crate) fn simple_checksum(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Convert an OpenPGP four-octet timestamp to a chrono DateTime.
pub(crate) fn timestamp_to_datetime(secs: u32) -> DateTime<Utc> {
    Utc.timestamp_opt(secs as i64, 0)
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().expect("epoch"))
}

/// Convert a chrono DateTime to an OpenPGP four-octet timestamp.
pub(crate) fn datetime_to_timestamp(dt: &DateTime<Utc>) -> u32 {
    dt.timestamp().clamp(0, u32::MAX as i64) as u32
}

/// Render a fingerprint or key id as uppercase hex.
pub(crate) fn to_hex(bytes: &[u8]) -> String {
    hex::encode_upper(bytes)
}

/// Read exactly `N` bytes into an array.
pub(crate) fn read_array<R: Read, const N: usize>(reader: &mut R) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Read a single octet, mapping EOF to a malformed-stream error.
pub(crate) fn read_u8<R: Read>(reader: &mut R, what: &str) -> Result<u8> {
    ReadBytesExt::read_u8(reader)
        .map_err(|_| Error::MalformedPacketStream(format!("truncated {what}")))
}
