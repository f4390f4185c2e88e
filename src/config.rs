use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Panel configuration file (`config.json`).
///
/// Every key is optional; a missing file means "all defaults".
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PanelConfig {
    pub backend: BackendConfig,
    pub downloads: TrackerConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackendConfig {
    /// Executable speaking the line-delimited JSON protocol on stdio.
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub command_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            program: String::new(),
            args: vec![],
            working_dir: None,
            command_timeout_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackerConfig {
    /// Push channel carrying one download payload per event.
    pub event_name: String,
    pub initial_poll_ms: u64,
    pub max_poll_ms: u64,
    pub commands: CommandNames,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            event_name: "visual_novel_manager/download-update".to_string(),
            initial_poll_ms: 15_000,
            max_poll_ms: 120_000,
            commands: CommandNames::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CommandNames {
    pub list: String,
    pub pause: String,
    pub resume: String,
    pub cancel: String,
}

impl Default for CommandNames {
    fn default() -> Self {
        Self {
            list: "get_active_downloads".to_string(),
            pause: "pause_download".to_string(),
            resume: "resume_download".to_string(),
            cancel: "cancel_download".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogConfig {
    /// Defaults to `<data-local-dir>/vn-panel/logs`.
    pub dir: Option<PathBuf>,
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            dir: None,
            level: "info".to_string(),
        }
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("vn-panel").join("config.json"))
}

/// Reads and validates `path`. `Ok(None)` means there is no file and the
/// caller should fall back to [`PanelConfig::default`].
pub fn load(path: &Path) -> Result<Option<PanelConfig>, String> {
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {e}", path.display()))?;
    let cfg: PanelConfig = serde_json::from_str(&text)
        .map_err(|e| format!("invalid config {}: {e}", path.display()))?;
    cfg.validate()?;
    Ok(Some(cfg))
}

impl PanelConfig {
    pub fn validate(&self) -> Result<(), String> {
        let d = &self.downloads;
        if d.event_name.trim().is_empty() {
            return Err("downloads.eventName must not be empty".to_string());
        }
        if d.initial_poll_ms == 0 {
            return Err("downloads.initialPollMs must be positive".to_string());
        }
        if d.max_poll_ms < d.initial_poll_ms {
            return Err(format!(
                "downloads.maxPollMs ({}) is below initialPollMs ({})",
                d.max_poll_ms, d.initial_poll_ms
            ));
        }
        if self.log.level.parse::<log::LevelFilter>().is_err() {
            return Err(format!(
                "log.level {:?} is not one of off, error, warn, info, debug, trace",
                self.log.level
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("vn-panel-config-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.json");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn missing_file_yields_defaults() {
        assert!(load(Path::new("/definitely/not/here/config.json")).unwrap().is_none());
        let cfg = PanelConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.downloads.initial_poll_ms, 15_000);
        assert_eq!(cfg.downloads.max_poll_ms, 120_000);
        assert_eq!(cfg.downloads.event_name, "visual_novel_manager/download-update");
        assert_eq!(cfg.downloads.commands.list, "get_active_downloads");
        assert_eq!(cfg.backend.command_timeout_secs, 30);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let path = temp_file(
            "partial",
            r#"{ "backend": { "program": "python3", "args": ["main.py"] }, "downloads": { "maxPollMs": 60000 } }"#,
        );
        let cfg = load(&path).unwrap().unwrap();
        assert_eq!(cfg.backend.program, "python3");
        assert_eq!(cfg.backend.args, vec!["main.py".to_string()]);
        assert_eq!(cfg.downloads.max_poll_ms, 60_000);
        assert_eq!(cfg.downloads.initial_poll_ms, 15_000);
        assert_eq!(cfg.downloads.commands.pause, "pause_download");
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn rejects_inverted_poll_bounds() {
        let path = temp_file("inverted", r#"{ "downloads": { "initialPollMs": 5000, "maxPollMs": 1000 } }"#);
        let err = load(&path).unwrap_err();
        assert!(err.contains("maxPollMs"), "{err}");
    }

    #[test]
    fn rejects_unknown_log_level() {
        let path = temp_file("level", r#"{ "log": { "level": "chatty" } }"#);
        let err = load(&path).unwrap_err();
        assert!(err.contains("log.level"), "{err}");

        let path = temp_file("level-ok", r#"{ "log": { "level": "DEBUG" } }"#);
        assert_eq!(load(&path).unwrap().unwrap().log.level, "DEBUG");
    }

    #[test]
    fn reports_malformed_json() {
        let path = temp_file("broken", "{ not json");
        let err = load(&path).unwrap_err();
        assert!(err.starts_with("invalid config"), "{err}");
    }
}
