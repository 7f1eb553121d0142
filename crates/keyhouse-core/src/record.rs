//! Record Codec
//!
//! This module defines `Record` - the fundamental unit of data in KeyHouse -
//! and its on-disk encoding.
//!
//! ## What is a Record?
//! A record is a single key/value write (or a deletion marker) appended to a
//! segment file. The newest record for a key is the key's current state.
//!
//! ## Wire Format
//! Records are self-framed and little-endian; a reader never searches for
//! delimiters and never needs escape rules:
//!
//! ```text
//! ┌──────────────┬────────────┬─────────┬──────────────┬───────────┬───────────┐
//! │ total_length │ key_length │ key     │ value_length │ value     │ tombstone │
//! │ (4 bytes)    │ (4 bytes)  │(N bytes)│ (4 bytes)    │ (M bytes) │ (1 byte)  │
//! └──────────────┴────────────┴─────────┴──────────────┴───────────┴───────────┘
//! ```
//!
//! `total_length` counts every byte of the record including itself, so both
//! recovery and streamed reads frame by that field alone. A mismatch between
//! the declared lengths and the actual byte count fails the decode with
//! `CorruptRecord`.
//!
//! ## Tombstones
//! A record with the tombstone flag set marks its key as deleted. It shadows
//! older records for the same key until compaction drops both.
//!
//! ## Design Decisions
//! - `total_length` is computed before writing so the header is written once
//! - Keys and values are UTF-8 strings at the API surface; the codec treats
//!   them as raw bytes and validates UTF-8 only on decode
//! - No checksum: corruption detection is length framing only

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, Result};

/// Framing bytes around the key and value payloads:
/// total_length (4) + key_length (4) + value_length (4) + tombstone flag (1).
pub const RECORD_OVERHEAD: usize = 13;

/// A single key/value record, possibly a deletion marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Key this record belongs to.
    pub key: String,

    /// Value payload; empty for tombstones.
    pub value: String,

    /// Whether this record deletes the key.
    pub tombstone: bool,
}

impl Record {
    /// Creates a live record for `key` holding `value`.
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            tombstone: false,
        }
    }

    /// Creates a deletion marker for `key`.
    pub fn tombstone(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: String::new(),
            tombstone: true,
        }
    }

    /// Returns whether this record deletes its key.
    pub fn is_tombstone(&self) -> bool {
        self.tombstone
    }

    /// The exact number of bytes `encode` will produce.
    ///
    /// The write path uses this to decide segment rollover before anything
    /// is written.
    pub fn encoded_len(&self) -> usize {
        RECORD_OVERHEAD + self.key.len() + self.value.len()
    }

    /// Encodes the record into its framed byte layout.
    pub fn encode(&self) -> Bytes {
        let total = self.encoded_len();
        let mut buf = BytesMut::with_capacity(total);

        buf.put_u32_le(total as u32);
        buf.put_u32_le(self.key.len() as u32);
        buf.put_slice(self.key.as_bytes());
        buf.put_u32_le(self.value.len() as u32);
        buf.put_slice(self.value.as_bytes());
        buf.put_u8(u8::from(self.tombstone));

        buf.freeze()
    }

    /// Decodes a record from `data`, which must hold exactly one record.
    ///
    /// Every internal length is validated against `total_length`; any
    /// mismatch fails with `CorruptRecord`.
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_OVERHEAD {
            return Err(Error::CorruptRecord("record too short".to_string()));
        }

        let mut cursor = data;

        let total = cursor.get_u32_le() as usize;
        if total != data.len() {
            return Err(Error::CorruptRecord(format!(
                "declared length {} does not match {} bytes read",
                total,
                data.len()
            )));
        }

        let key_len = cursor.get_u32_le() as usize;
        if cursor.remaining() < key_len {
            return Err(Error::CorruptRecord(
                "key length exceeds record".to_string(),
            ));
        }
        let key = std::str::from_utf8(&cursor[..key_len])
            .map_err(|_| Error::CorruptRecord("key is not valid UTF-8".to_string()))?
            .to_string();
        cursor.advance(key_len);

        if cursor.remaining() < 4 {
            return Err(Error::CorruptRecord("value length missing".to_string()));
        }
        let value_len = cursor.get_u32_le() as usize;
        if RECORD_OVERHEAD + key_len + value_len != total {
            return Err(Error::CorruptRecord(format!(
                "lengths do not add up: key {} + value {} in record of {}",
                key_len, value_len, total
            )));
        }
        let value = std::str::from_utf8(&cursor[..value_len])
            .map_err(|_| Error::CorruptRecord("value is not valid UTF-8".to_string()))?
            .to_string();
        cursor.advance(value_len);

        let tombstone = match cursor.get_u8() {
            0 => false,
            1 => true,
            flag => {
                return Err(Error::CorruptRecord(format!(
                    "invalid tombstone flag {}",
                    flag
                )))
            }
        };

        Ok(Self {
            key,
            value,
            tombstone,
        })
    }
}

/// Reads one complete record from `reader`, which must be positioned at a
/// record boundary. Returns `None` on clean end-of-file at the boundary.
///
/// An end-of-file in the middle of a record surfaces as
/// `Io(UnexpectedEof)` so callers can decide between truncation and
/// failing the open.
pub async fn read_record<R>(reader: &mut R) -> Result<Option<Record>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let total = u32::from_le_bytes(len_buf) as usize;
    if total < RECORD_OVERHEAD {
        return Err(Error::CorruptRecord(format!(
            "declared length {} below minimum {}",
            total, RECORD_OVERHEAD
        )));
    }

    let mut buf = vec![0u8; total];
    buf[..4].copy_from_slice(&len_buf);
    reader.read_exact(&mut buf[4..]).await?;

    Record::decode(&buf).map(Some)
}

/// Reads the value of the record starting at the reader's current position,
/// skipping over the framing and the key, and leaves the reader positioned
/// past the record. Also reports whether the record was a tombstone.
pub async fn read_value_at<R>(reader: &mut R) -> Result<(String, bool)>
where
    R: AsyncRead + Unpin,
{
    match read_record(reader).await? {
        Some(record) => Ok((record.value, record.tombstone)),
        None => Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "no record at position",
        ))),
    }
}
