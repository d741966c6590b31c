// SPDX-License-Identifier: MIT OR Apache-2.0

//! TLS presentation-language helpers.
//!
//! The wire format is network byte order with length-prefixed variable
//! vectors; the prefix width (1, 2 or 4 bytes) is fixed per field. Tagged
//! unions carry a leading discriminator byte. All message types implement
//! the [`tls_codec`] traits; the helpers here cover the fixed-width vector
//! prefixes and option encoding shared by those implementations.
use std::io::{Read, Write};

use tls_codec::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Serialize a wire type into a detached byte string.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(value.tls_serialize_detached()?)
}

/// Deserialize a wire type, rejecting trailing bytes.
pub fn decode<T: Deserialize>(bytes: &[u8]) -> Result<T> {
    let mut slice = bytes;
    let value = T::tls_deserialize(&mut slice)?;
    if !slice.is_empty() {
        return Err(Error::Protocol("trailing bytes after message"));
    }
    Ok(value)
}

pub(crate) fn write_opaque8<W: Write>(
    writer: &mut W,
    data: &[u8],
) -> std::result::Result<usize, tls_codec::Error> {
    if data.len() > u8::MAX as usize {
        return Err(tls_codec::Error::InvalidVectorLength);
    }
    let mut written = (data.len() as u8).tls_serialize(writer)?;
    writer
        .write_all(data)
        .map_err(|err| tls_codec::Error::EncodingError(err.to_string()))?;
    written += data.len();
    Ok(written)
}

pub(crate) fn write_opaque16<W: Write>(
    writer: &mut W,
    data: &[u8],
) -> std::result::Result<usize, tls_codec::Error> {
    if data.len() > u16::MAX as usize {
        return Err(tls_codec::Error::InvalidVectorLength);
    }
    let mut written = (data.len() as u16).tls_serialize(writer)?;
    writer
        .write_all(data)
        .map_err(|err| tls_codec::Error::EncodingError(err.to_string()))?;
    written += data.len();
    Ok(written)
}

pub(crate) fn write_opaque32<W: Write>(
    writer: &mut W,
    data: &[u8],
) -> std::result::Result<usize, tls_codec::Error> {
    if data.len() > u32::MAX as usize {
        return Err(tls_codec::Error::InvalidVectorLength);
    }
    let mut written = (data.len() as u32).tls_serialize(writer)?;
    writer
        .write_all(data)
        .map_err(|err| tls_codec::Error::EncodingError(err.to_string()))?;
    written += data.len();
    Ok(written)
}

pub(crate) fn read_fixed<R: Read>(
    bytes: &mut R,
    len: usize,
) -> std::result::Result<Vec<u8>, tls_codec::Error> {
    let mut data = vec![0u8; len];
    bytes
        .read_exact(&mut data)
        .map_err(|_| tls_codec::Error::EndOfStream)?;
    Ok(data)
}

pub(crate) fn read_opaque8<R: Read>(
    bytes: &mut R,
) -> std::result::Result<Vec<u8>, tls_codec::Error> {
    let len = u8::tls_deserialize(bytes)? as usize;
    read_fixed(bytes, len)
}

pub(crate) fn read_opaque16<R: Read>(
    bytes: &mut R,
) -> std::result::Result<Vec<u8>, tls_codec::Error> {
    let len = u16::tls_deserialize(bytes)? as usize;
    read_fixed(bytes, len)
}

pub(crate) fn read_opaque32<R: Read>(
    bytes: &mut R,
) -> std::result::Result<Vec<u8>, tls_codec::Error> {
    let len = u32::tls_deserialize(bytes)? as usize;
    read_fixed(bytes, len)
}

pub(crate) fn opaque8_len(data: &[u8]) -> usize {
    1 + data.len()
}

pub(crate) fn opaque16_len(data: &[u8]) -> usize {
    2 + data.len()
}

pub(crate) fn opaque32_len(data: &[u8]) -> usize {
    4 + data.len()
}

/// Serialize a list of elements behind a byte-length prefix of the given
/// width. Lengths count bytes, not elements.
fn vector_body<T: Serialize>(items: &[T]) -> std::result::Result<Vec<u8>, tls_codec::Error> {
    let mut body = Vec::new();
    for item in items {
        item.tls_serialize(&mut body)?;
    }
    Ok(body)
}

pub(crate) fn write_vector16<W: Write, T: Serialize>(
    writer: &mut W,
    items: &[T],
) -> std::result::Result<usize, tls_codec::Error> {
    write_opaque16(writer, &vector_body(items)?)
}

pub(crate) fn write_vector32<W: Write, T: Serialize>(
    writer: &mut W,
    items: &[T],
) -> std::result::Result<usize, tls_codec::Error> {
    write_opaque32(writer, &vector_body(items)?)
}

fn vector_items<T: Deserialize>(body: Vec<u8>) -> std::result::Result<Vec<T>, tls_codec::Error> {
    let mut slice = body.as_slice();
    let mut items = Vec::new();
    while !slice.is_empty() {
        items.push(T::tls_deserialize(&mut slice)?);
    }
    Ok(items)
}

pub(crate) fn read_vector16<R: Read, T: Deserialize>(
    bytes: &mut R,
) -> std::result::Result<Vec<T>, tls_codec::Error> {
    vector_items(read_opaque16(bytes)?)
}

pub(crate) fn read_vector32<R: Read, T: Deserialize>(
    bytes: &mut R,
) -> std::result::Result<Vec<T>, tls_codec::Error> {
    vector_items(read_opaque32(bytes)?)
}

pub(crate) fn vector16_len<T: tls_codec::Size>(items: &[T]) -> usize {
    2 + items.iter().map(|i| i.tls_serialized_len()).sum::<usize>()
}

pub(crate) fn vector32_len<T: tls_codec::Size>(items: &[T]) -> usize {
    4 + items.iter().map(|i| i.tls_serialized_len()).sum::<usize>()
}

/// `optional<T>`: a presence octet followed by the value when present.
pub(crate) fn write_optional<W: Write, T: Serialize>(
    writer: &mut W,
    value: &Option<T>,
) -> std::result::Result<usize, tls_codec::Error> {
    match value {
        None => 0u8.tls_serialize(writer),
        Some(value) => {
            let mut written = 1u8.tls_serialize(writer)?;
            written += value.tls_serialize(writer)?;
            Ok(written)
        }
    }
}

pub(crate) fn read_optional<R: Read, T: Deserialize>(
    bytes: &mut R,
) -> std::result::Result<Option<T>, tls_codec::Error> {
    match u8::tls_deserialize(bytes)? {
        0 => Ok(None),
        1 => Ok(Some(T::tls_deserialize(bytes)?)),
        other => Err(tls_codec::Error::DecodingError(format!(
            "invalid presence octet {other}"
        ))),
    }
}

pub(crate) fn optional_len<T: tls_codec::Size>(value: &Option<T>) -> usize {
    1 + value.as_ref().map(|v| v.tls_serialized_len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::{decode, encode, read_opaque16, write_opaque16};

    #[test]
    fn opaque_round_trip() {
        let data = b"hello".to_vec();
        let mut buf = Vec::new();
        write_opaque16(&mut buf, &data).unwrap();
        assert_eq!(buf, vec![0x00, 0x05, b'h', b'e', b'l', b'l', b'o']);

        let mut slice = buf.as_slice();
        assert_eq!(read_opaque16(&mut slice).unwrap(), data);
        assert!(slice.is_empty());
    }

    #[test]
    fn trailing_bytes_rejected() {
        // A u16 followed by a stray byte.
        let bytes = encode(&7u16).unwrap();
        let mut with_trailing = bytes.clone();
        with_trailing.push(0xff);

        assert_eq!(decode::<u16>(&bytes).unwrap(), 7);
        assert!(decode::<u16>(&with_trailing).is_err());
    }
}
