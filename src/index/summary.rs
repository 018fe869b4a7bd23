//! Segment summary codec.
//!
//! Layout (16 bytes, little-endian):
//! `doc_count:i32 | token_count:i32 | range_start:i32 | range_end:i32`
//!
//! The same header starts every spill file.

use crate::error::{IndexError, Result};
use crate::index::types::{DataRange, SegmentProperty};
use crate::utils::le_bytes;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;

pub const SUMMARY_SIZE: usize = 16;

fn narrow(field: &str, value: i64) -> Result<i32> {
    i32::try_from(value).map_err(|_| {
        IndexError::Config(format!("summary field {} = {} does not fit in i32", field, value))
    })
}

pub fn encode(property: &SegmentProperty) -> Result<[u8; SUMMARY_SIZE]> {
    let fields = [
        narrow("doc_count", property.doc_count as i64)?,
        narrow("token_count", property.token_count as i64)?,
        narrow("range_start", property.data_range.start)?,
        narrow("range_end", property.data_range.end)?,
    ];

    let mut buf = [0u8; SUMMARY_SIZE];
    for (i, field) in fields.iter().enumerate() {
        buf[i * 4..i * 4 + 4].copy_from_slice(&field.to_le_bytes());
    }
    Ok(buf)
}

pub fn decode(bytes: &[u8]) -> Result<SegmentProperty> {
    if bytes.len() != SUMMARY_SIZE {
        return Err(IndexError::Config(format!(
            "summary is {} bytes, expected {}",
            bytes.len(),
            SUMMARY_SIZE
        )));
    }

    let field = |i: usize| i32::from_le_bytes(le_bytes(bytes, i * 4));
    let (doc_count, token_count) = (field(0), field(1));
    if doc_count < 0 || token_count < 0 {
        return Err(IndexError::Config(format!(
            "negative summary counts ({}, {})",
            doc_count, token_count
        )));
    }

    Ok(SegmentProperty {
        doc_count: doc_count as u64,
        token_count: token_count as u64,
        data_range: DataRange::new(field(2) as i64, field(3) as i64),
    })
}

/// Read a summary file. `Ok(None)` only when the file does not exist.
pub fn read(path: &Path) -> Result<Option<SegmentProperty>> {
    match fs::read(path) {
        Ok(bytes) => decode(&bytes)
            .map(Some)
            .map_err(|e| IndexError::Config(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub fn write(path: &Path, property: &SegmentProperty) -> Result<()> {
    let bytes = encode(property)?;
    fs::write(path, bytes)?;
    Ok(())
}
