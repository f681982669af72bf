use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const IMAGES_PREFIX: &str = "images/";
pub const DETECTIONS_PREFIX: &str = "detections/";

const FRAME_STEM_PREFIX: &str = "frame_";
const FRAME_EXTENSION: &str = ".jpg";
const BATCH_EXTENSION: &str = ".json";

/// Location of a stored frame image, e.g. `images/frame_0042.jpg`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FrameReference(String);

impl FrameReference {
    pub fn for_sequence(sequence: u64) -> Self {
        Self(format!(
            "{IMAGES_PREFIX}{FRAME_STEM_PREFIX}{sequence:04}{FRAME_EXTENSION}"
        ))
    }

    /// Validates a reference received from outside the process.
    pub fn parse(key: &str) -> Result<Self, String> {
        let name = key
            .strip_prefix(IMAGES_PREFIX)
            .ok_or_else(|| format!("{key} is not under {IMAGES_PREFIX}"))?;
        if name.is_empty() || name.contains('/') || name.starts_with('.') {
            return Err(format!("{key} does not name a frame image"));
        }
        Ok(Self(key.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name without directory and extension, e.g. `frame_0042`.
    pub fn stem(&self) -> &str {
        let name = self.0.rsplit('/').next().unwrap_or(&self.0);
        match name.rfind('.') {
            Some(idx) if idx > 0 => &name[..idx],
            _ => name,
        }
    }

    /// Sequence number encoded in references built by [`FrameReference::for_sequence`].
    pub fn sequence(&self) -> Option<u64> {
        self.stem().strip_prefix(FRAME_STEM_PREFIX)?.parse().ok()
    }
}

impl fmt::Display for FrameReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for FrameReference {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<FrameReference> for String {
    fn from(reference: FrameReference) -> Self {
        reference.0
    }
}

/// Key of one persisted detection batch.
///
/// Layout: `detections/year=YYYY/month=MM/day=DD/YYYYMMDD_HHMMSS_ffffff_<frame stem>.json`.
/// Every component before the frame stem is fixed width, so lexicographic order
/// is creation order. The microsecond field and the frame stem keep keys unique
/// when many workers write within the same second.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StorageKey(String);

impl StorageKey {
    pub fn for_batch(created_at: DateTime<Utc>, frame: &FrameReference) -> Self {
        let micros = created_at.timestamp_subsec_micros().min(999_999);
        Self(format!(
            "{}{}_{:06}_{}{}",
            partition_prefix(created_at.date_naive()),
            created_at.format("%Y%m%d_%H%M%S"),
            micros,
            frame.stem(),
            BATCH_EXTENSION,
        ))
    }

    pub(crate) fn from_listed(key: String) -> Option<Self> {
        (key.starts_with(DETECTIONS_PREFIX) && key.ends_with(BATCH_EXTENSION)).then_some(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Prefix under which all batches of one UTC day are stored.
pub fn partition_prefix(date: NaiveDate) -> String {
    format!(
        "{DETECTIONS_PREFIX}year={}/month={:02}/day={:02}/",
        date.year(),
        date.month(),
        date.day()
    )
}
