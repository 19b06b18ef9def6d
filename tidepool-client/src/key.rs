//! Blob keys.
//!
//! A key is the opaque handle returned by a write, and it encodes everything needed to locate
//! the object again:
//!
//! ```text
//! {cluster}/{volume}/{partition_id}/{file_id}/{object_id}/{size}
//! ```
//!
//! Numbers are canonical base-10. Names must be non-empty and must not contain the separator, so
//! encoding and decoding are inverse over every key `BlobKey::new` accepts.

use std::fmt;
use std::str::FromStr;

use tidepool_core::{AppError, AppResult};

const SEPARATOR: char = '/';
const SEGMENTS: usize = 6;

/// The location of a stored object.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlobKey {
    pub cluster: String,
    pub volume: String,
    pub partition_id: u64,
    pub file_id: u64,
    pub object_id: u64,
    /// The size of the object in bytes.
    pub size: u32,
}

impl BlobKey {
    /// Create a new key, validating the cluster and volume names.
    pub fn new(cluster: &str, volume: &str, partition_id: u64, file_id: u64, object_id: u64, size: u32) -> AppResult<Self> {
        validate_name("cluster", cluster)?;
        validate_name("volume", volume)?;
        Ok(Self {
            cluster: cluster.into(),
            volume: volume.into(),
            partition_id,
            file_id,
            object_id,
            size,
        })
    }

    /// Encode this key as a string.
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode a key from its string form.
    pub fn decode(key: &str) -> AppResult<Self> {
        let segments: Vec<&str> = key.split(SEPARATOR).collect();
        match segments.as_slice() {
            [cluster, volume, partition_id, file_id, object_id, size] => Self::new(
                cluster,
                volume,
                parse_canonical("partition_id", partition_id)?,
                parse_canonical("file_id", file_id)?,
                parse_canonical("object_id", object_id)?,
                parse_canonical("size", size)?,
            ),
            _ => Err(AppError::InvalidInput(format!(
                "malformed blob key {:?}, expected {} segments, got {}",
                key,
                SEGMENTS,
                segments.len()
            ))),
        }
    }
}

impl fmt::Display for BlobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            self.cluster,
            self.volume,
            self.partition_id,
            self.file_id,
            self.object_id,
            self.size,
            sep = SEPARATOR
        )
    }
}

impl FromStr for BlobKey {
    type Err = AppError;

    fn from_str(key: &str) -> AppResult<Self> {
        Self::decode(key)
    }
}

/// Validate a cluster or volume name.
pub(crate) fn validate_name(field: &str, name: &str) -> AppResult<()> {
    if name.is_empty() {
        return Err(AppError::InvalidInput(format!("{} name must not be empty", field)));
    }
    if name.contains(SEPARATOR) {
        return Err(AppError::InvalidInput(format!("{} name {:?} must not contain {:?}", field, name, SEPARATOR)));
    }
    Ok(())
}

/// Parse a number, accepting only its canonical decimal form.
fn parse_canonical<T>(field: &str, segment: &str) -> AppResult<T>
where
    T: FromStr + ToString,
{
    let value: T = segment
        .parse()
        .map_err(|_| AppError::InvalidInput(format!("blob key field {} is not a valid number: {:?}", field, segment)))?;
    // Rejects a leading `+` and leading zeros, which the std parser accepts.
    if value.to_string() != segment {
        return Err(AppError::InvalidInput(format!("blob key field {} is not canonical: {:?}", field, segment)));
    }
    Ok(value)
}
