//! Column conversions shared by the repositories.
//!
//! Timestamps are stored as epoch milliseconds, session dates and times as
//! ISO text, enumerations as their wire strings and embeddings as packed
//! little-endian `f32`.

use chrono::{DateTime, Utc};
use rollcall_core::Embedding;
use rusqlite::types::Type;
use rusqlite::Row;
use std::error::Error;
use std::str::FromStr;

pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn conversion(idx: usize, ty: Type, err: impl Into<Box<dyn Error + Send + Sync>>) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, err.into())
}

fn from_millis(idx: usize, ms: i64) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
        .ok_or_else(|| conversion(idx, Type::Integer, format!("timestamp {ms} out of range")))
}

pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    from_millis(idx, row.get(idx)?)
}

pub(crate) fn opt_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    row.get::<_, Option<i64>>(idx)?
        .map(|ms| from_millis(idx, ms))
        .transpose()
}

/// Parse a text column through `FromStr`.
pub(crate) fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion(idx, Type::Text, e))
}

pub(crate) fn embedding_to_blob(embedding: &Embedding) -> Vec<u8> {
    embedding.values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn embedding_from_blob(blob: &[u8], model_version: Option<String>) -> Result<Embedding, String> {
    if blob.is_empty() || blob.len() % 4 != 0 {
        return Err(format!("embedding blob of {} bytes is not a packed f32 vector", blob.len()));
    }
    let values = blob
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    Ok(Embedding {
        values,
        model_version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_blob_is_little_endian() {
        let embedding = Embedding::new(vec![1.0, -0.5]);
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 8);
        assert_eq!(&blob[..4], &1.0f32.to_le_bytes());
        let back = embedding_from_blob(&blob, None).unwrap();
        assert_eq!(back.values, vec![1.0, -0.5]);
    }

    #[test]
    fn test_ragged_blob_rejected() {
        assert!(embedding_from_blob(&[0, 1, 2], None).is_err());
        assert!(embedding_from_blob(&[], None).is_err());
    }
}
