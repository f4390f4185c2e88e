use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Downloading,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub const ALL: [DownloadStatus; 6] = [
        DownloadStatus::Pending,
        DownloadStatus::Downloading,
        DownloadStatus::Paused,
        DownloadStatus::Completed,
        DownloadStatus::Failed,
        DownloadStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Downloading => "downloading",
            DownloadStatus::Paused => "paused",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    /// Finished downloads are dropped from the panel, not kept around as history.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DownloadStatus::Completed | DownloadStatus::Cancelled)
    }

    /// Backend status strings are not trusted: anything unknown (or nothing)
    /// is shown as an ongoing download.
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        raw.and_then(|s| s.parse().ok())
            .unwrap_or(DownloadStatus::Downloading)
    }
}

impl FromStr for DownloadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_lowercase();
        DownloadStatus::ALL
            .into_iter()
            .find(|st| st.as_str() == lower)
            .ok_or_else(|| format!("unknown download status: {s}"))
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Download payload exactly as the backend sends it.
///
/// Older backends used snake_case keys (`game_id`, `eta_seconds`, ...), newer
/// ones camelCase. Both are accepted; camelCase wins when both are present.
/// A field holding the wrong JSON type reads as absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawDownload {
    #[serde(rename = "gameId", default, deserialize_with = "lenient")]
    pub game_id: Option<String>,
    #[serde(rename = "game_id", default, deserialize_with = "lenient")]
    pub legacy_game_id: Option<String>,
    #[serde(rename = "gameName", default, deserialize_with = "lenient")]
    pub game_name: Option<String>,
    #[serde(rename = "game_name", default, deserialize_with = "lenient")]
    pub legacy_game_name: Option<String>,
    #[serde(default, deserialize_with = "lenient")]
    pub progress: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub speed: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub eta: Option<f64>,
    #[serde(rename = "eta_seconds", default, deserialize_with = "lenient")]
    pub legacy_eta: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub status: Option<String>,
    #[serde(rename = "totalSize", default, deserialize_with = "lenient")]
    pub total_size: Option<f64>,
    #[serde(rename = "total_size", default, deserialize_with = "lenient")]
    pub legacy_total_size: Option<f64>,
    #[serde(rename = "downloadedSize", default, deserialize_with = "lenient")]
    pub downloaded_size: Option<f64>,
    #[serde(rename = "downloaded_size", default, deserialize_with = "lenient")]
    pub legacy_downloaded_size: Option<f64>,
    #[serde(default, deserialize_with = "lenient")]
    pub resumable: Option<bool>,
    #[serde(default, deserialize_with = "lenient")]
    pub message: Option<String>,
    #[serde(rename = "startedAt", default, deserialize_with = "lenient")]
    pub started_at: Option<f64>,
    #[serde(rename = "started_at", default, deserialize_with = "lenient")]
    pub legacy_started_at: Option<f64>,
    #[serde(rename = "updatedAt", default, deserialize_with = "lenient")]
    pub updated_at: Option<f64>,
    #[serde(rename = "updated_at", default, deserialize_with = "lenient")]
    pub legacy_updated_at: Option<f64>,
}

fn lenient<'de, D, T>(de: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Value::deserialize(de)?;
    Ok(serde_json::from_value(value).ok())
}

/// One tracked transfer, as shown in the panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadRecord {
    pub game_id: String,
    pub game_name: String,
    pub progress: f64, // percent, backend supplied, not clamped
    pub speed: f64,    // bytes per second
    pub eta: f64,      // seconds
    pub status: DownloadStatus,
    pub total_size: u64,
    pub downloaded_size: u64,
    pub resumable: bool,
    pub message: Option<String>,
    pub started_at: Option<f64>,
    pub updated_at: Option<f64>,
}

impl DownloadRecord {
    /// Newest first ordering key.
    pub fn sort_key(&self) -> f64 {
        self.updated_at.or(self.started_at).unwrap_or(0.0)
    }

    pub fn can_pause(&self) -> bool {
        self.status == DownloadStatus::Downloading
    }

    pub fn can_resume(&self) -> bool {
        matches!(self.status, DownloadStatus::Paused | DownloadStatus::Failed) && self.resumable
    }

    /// True when nothing the panel displays would change by replacing `self` with `other`.
    pub fn same_observable_state(&self, other: &DownloadRecord) -> bool {
        self.progress == other.progress
            && self.status == other.status
            && self.downloaded_size == other.downloaded_size
            && self.speed == other.speed
            && self.eta == other.eta
            && self.message == other.message
    }
}

fn non_empty(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    primary
        .filter(|s| !s.is_empty())
        .or(fallback.filter(|s| !s.is_empty()))
}

fn byte_count(v: Option<f64>) -> u64 {
    match v {
        Some(n) if n.is_finite() && n > 0.0 => n as u64,
        _ => 0,
    }
}

/// Maps a backend payload onto a [`DownloadRecord`].
///
/// Returns `None` when the id or the display name is missing under both names.
pub fn normalize(raw: RawDownload) -> Option<DownloadRecord> {
    let game_id = non_empty(raw.game_id, raw.legacy_game_id)?;
    let game_name = non_empty(raw.game_name, raw.legacy_game_name)?;

    let status = DownloadStatus::parse_lenient(raw.status.as_deref());
    let resumable = raw
        .resumable
        .unwrap_or(matches!(status, DownloadStatus::Paused | DownloadStatus::Failed));

    Some(DownloadRecord {
        game_id,
        game_name,
        progress: raw.progress.unwrap_or(0.0),
        speed: raw.speed.unwrap_or(0.0),
        eta: raw.eta.or(raw.legacy_eta).unwrap_or(0.0),
        status,
        total_size: byte_count(raw.total_size.or(raw.legacy_total_size)),
        downloaded_size: byte_count(raw.downloaded_size.or(raw.legacy_downloaded_size)),
        resumable,
        message: raw.message,
        started_at: raw.started_at.or(raw.legacy_started_at),
        updated_at: raw.updated_at.or(raw.legacy_updated_at),
    })
}

/// Same as [`normalize`] for an untyped payload. Anything but a JSON object
/// counts as malformed.
pub fn normalize_value(value: &Value) -> Option<DownloadRecord> {
    if !value.is_object() {
        log::debug!("Ignoring non-object download payload: {value}");
        return None;
    }
    match RawDownload::deserialize(value) {
        Ok(raw) => normalize(raw),
        Err(e) => {
            log::debug!("Ignoring malformed download payload: {e}");
            None
        }
    }
}
