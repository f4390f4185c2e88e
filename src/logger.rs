use std::path::PathBuf;

use log::LevelFilter;
use log4rs::{
    append::rolling_file::{
        policy::compound::{
            roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
        },
        RollingFileAppender,
    },
    config::{Appender, Config, Root},
    encode::pattern::PatternEncoder,
};

use crate::config::LogConfig;

pub fn logs_dir(cfg: &LogConfig) -> Result<PathBuf, String> {
    if let Some(dir) = cfg.dir.as_ref() {
        return Ok(dir.clone());
    }
    dirs::data_local_dir()
        .map(|d| d.join("vn-panel").join("logs"))
        .ok_or_else(|| "failed to resolve local data dir".to_string())
}

fn level_filter(level: &str) -> LevelFilter {
    level.parse().unwrap_or(LevelFilter::Info)
}

pub fn init(cfg: &LogConfig) -> Result<(), String> {
    let logs_dir = logs_dir(cfg)?;
    let log_file = logs_dir.join("vn-panel.log");
    std::fs::create_dir_all(&logs_dir).map_err(|e| e.to_string())?;

    // 10MB per file, keep 5 rolled files.
    let roller = FixedWindowRoller::builder()
        .build(&logs_dir.join("vn-panel.{}.log").to_string_lossy(), 5)
        .map_err(|e| e.to_string())?;
    let policy = CompoundPolicy::new(
        Box::new(SizeTrigger::new(10 * 1024 * 1024)),
        Box::new(roller),
    );

    let file_appender = RollingFileAppender::builder()
        .encoder(Box::new(PatternEncoder::new(
            "{d(%Y-%m-%d %H:%M:%S%.3f)} [{l}] {t} {M} - {m}{n}",
        )))
        .build(&log_file, Box::new(policy))
        .map_err(|e| e.to_string())?;

    let cfg_builder =
        Config::builder().appender(Appender::builder().build("file", Box::new(file_appender)));

    // Dev builds also log to stderr; stdout belongs to the panel output.
    #[cfg(debug_assertions)]
    let cfg_builder = {
        use log4rs::append::console::{ConsoleAppender, Target};
        let console = ConsoleAppender::builder()
            .target(Target::Stderr)
            .encoder(Box::new(PatternEncoder::new("[{l}] {m}{n}")))
            .build();
        cfg_builder.appender(Appender::builder().build("console", Box::new(console)))
    };

    let root_builder = Root::builder().appender("file");
    #[cfg(debug_assertions)]
    let root_builder = root_builder.appender("console");

    let config = cfg_builder
        .build(root_builder.build(level_filter(&cfg.level)))
        .map_err(|e| e.to_string())?;

    // Ignore error if already initialized.
    if log4rs::init_config(config).is_err() {
        return Ok(());
    }

    std::panic::set_hook(Box::new(|info| {
        log::error!("panic: {info}");
    }));

    log::info!("logger initialized");
    log::info!("log file: {}", log_file.to_string_lossy());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_dir_wins() {
        let cfg = LogConfig {
            dir: Some(PathBuf::from("/tmp/vn-panel-logs")),
            level: "debug".to_string(),
        };
        assert_eq!(logs_dir(&cfg).unwrap(), PathBuf::from("/tmp/vn-panel-logs"));
    }

    #[test]
    fn unknown_level_falls_back_to_info() {
        assert_eq!(level_filter("debug"), LevelFilter::Debug);
        assert_eq!(level_filter("WARN"), LevelFilter::Warn);
        assert_eq!(level_filter("chatty"), LevelFilter::Info);
    }
}
