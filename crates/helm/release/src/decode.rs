//! Stored release decoding
//!
//! Release history entries are stored base64 encoded, optionally gzipped,
//! JSON documents.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use flate2::read::GzDecoder;
use helm_types::{ReleaseRecord, ReleaseState};
use serde::Deserialize;
use std::io::Read;
use thiserror::Error;

/// Leading bytes of a gzip stream
pub const MAGIC_GZIP: [u8; 3] = [0x1f, 0x8b, 0x08];

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid gzip stream: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("invalid release document: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct StoredReleaseDoc {
    name: String,
    namespace: String,
    version: u32,
    info: StoredReleaseInfo,
    chart: StoredChart,
}

#[derive(Debug, Deserialize)]
struct StoredReleaseInfo {
    status: ReleaseState,
}

#[derive(Debug, Deserialize)]
struct StoredChart {
    metadata: StoredChartMetadata,
}

#[derive(Debug, Deserialize)]
struct StoredChartMetadata {
    name: String,
    version: String,
}

/// Decode one stored release entry
pub fn decode_release(data: &str) -> Result<ReleaseRecord, DecodeError> {
    let mut bytes = STANDARD.decode(data.trim())?;

    if bytes.starts_with(&MAGIC_GZIP) {
        let mut decompressed = Vec::new();
        GzDecoder::new(bytes.as_slice())
            .read_to_end(&mut decompressed)
            .map_err(DecodeError::Gzip)?;
        bytes = decompressed;
    }

    let doc: StoredReleaseDoc = serde_json::from_slice(&bytes)?;
    Ok(ReleaseRecord {
        name: doc.name,
        namespace: doc.namespace,
        revision: doc.version,
        state: doc.info.status,
        chart_name: doc.chart.metadata.name,
        chart_version: doc.chart.metadata.version,
    })
}

/// Highest-revision deployed record among encoded history entries
pub fn latest_deployed<'a, I>(entries: I) -> Result<Option<ReleaseRecord>, DecodeError>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut latest: Option<ReleaseRecord> = None;
    for entry in entries {
        let record = decode_release(entry)?;
        if !record.is_deployed() {
            continue;
        }
        if latest.as_ref().map_or(true, |l| record.revision > l.revision) {
            latest = Some(record);
        }
    }
    Ok(latest)
}
