use super::format::{format_size, format_speed, format_time};
use super::record::{DownloadRecord, DownloadStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowAction {
    Pause,
    Resume,
    Cancel,
}

/// Buttons shown next to a download. Cancel is always offered.
pub fn row_actions(rec: &DownloadRecord) -> Vec<RowAction> {
    let mut actions = Vec::with_capacity(2);
    if rec.can_pause() {
        actions.push(RowAction::Pause);
    }
    if rec.can_resume() {
        actions.push(RowAction::Resume);
    }
    actions.push(RowAction::Cancel);
    actions
}

pub fn status_caption(rec: &DownloadRecord) -> String {
    match rec.status {
        DownloadStatus::Downloading => format!(
            "{}  ETA: {}",
            format_speed(rec.speed),
            format_time(eta_secs(rec.eta))
        ),
        DownloadStatus::Paused => "Paused".to_string(),
        DownloadStatus::Pending => "Pending".to_string(),
        DownloadStatus::Failed => rec
            .message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| "Download failed".to_string()),
        DownloadStatus::Cancelled => "Cancelled".to_string(),
        DownloadStatus::Completed => "Completed".to_string(),
    }
}

fn eta_secs(eta: f64) -> u64 {
    if eta.is_finite() && eta > 0.0 {
        eta as u64
    } else {
        0
    }
}

/// Two-line block for one download:
/// `Game A  (1.5 MB / 10.0 MB)` then `  45.0%  2.0 MB/s  ETA: 4s  [pause, cancel]`.
pub fn render_row(rec: &DownloadRecord) -> String {
    let actions: Vec<&str> = row_actions(rec)
        .into_iter()
        .map(|a| match a {
            RowAction::Pause => "pause",
            RowAction::Resume => "resume",
            RowAction::Cancel => "cancel",
        })
        .collect();
    format!(
        "{}  ({} / {})\n  {:.1}%  {}  [{}]",
        rec.game_name,
        format_size(rec.downloaded_size),
        format_size(rec.total_size),
        rec.progress,
        status_caption(rec),
        actions.join(", ")
    )
}

pub fn render_list(downloads: &[DownloadRecord]) -> String {
    if downloads.is_empty() {
        return "No active downloads".to_string();
    }
    downloads
        .iter()
        .map(render_row)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::record::normalize_value;
    use serde_json::json;

    fn rec(v: serde_json::Value) -> DownloadRecord {
        normalize_value(&v).unwrap()
    }

    #[test]
    fn downloading_row_shows_speed_and_eta() {
        let r = rec(json!({
            "gameId": "a", "gameName": "Game A", "progress": 45,
            "speed": 2097152, "eta": 3700,
            "downloadedSize": 1572864, "totalSize": 10485760
        }));
        assert_eq!(
            render_row(&r),
            "Game A  (1.5 MB / 10.0 MB)\n  45.0%  2.0 MB/s  ETA: 1h 1m  [pause, cancel]"
        );
    }

    #[test]
    fn paused_row_offers_resume() {
        let r = rec(json!({ "gameId": "a", "gameName": "Game A", "status": "paused" }));
        assert_eq!(row_actions(&r), vec![RowAction::Resume, RowAction::Cancel]);
        assert_eq!(status_caption(&r), "Paused");
    }

    #[test]
    fn failed_row_prefers_backend_message() {
        let with_msg = rec(json!({ "gameId": "a", "gameName": "A", "status": "failed", "message": "Disk full" }));
        let without = rec(json!({ "gameId": "a", "gameName": "A", "status": "failed" }));
        assert_eq!(status_caption(&with_msg), "Disk full");
        assert_eq!(status_caption(&without), "Download failed");
    }

    #[test]
    fn failed_but_not_resumable_only_cancels() {
        let r = rec(json!({ "gameId": "a", "gameName": "A", "status": "failed", "resumable": false }));
        assert_eq!(row_actions(&r), vec![RowAction::Cancel]);
    }

    #[test]
    fn empty_list_placeholder() {
        assert_eq!(render_list(&[]), "No active downloads");
    }
}
