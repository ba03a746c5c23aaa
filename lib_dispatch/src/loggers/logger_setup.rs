//! Process-wide logging: stdout plus a timestamped file per run.
//!
//! Only the most recent previous log file of the same application is kept.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoggerError {
    #[error("Log directory error: {0}")]
    Io(#[from] std::io::Error),

    #[error("A global logger is already installed: {0}")]
    SetLogger(#[from] log::SetLoggerError),
}

/// Maps a level name to a filter. Unknown names fall back to `info`.
pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.trim().to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

/// `<app>_<YYYY-mm-dd_HH-MM-SS>.log`
pub fn log_file_name(app_name: &str) -> String {
    format!("{}_{}.log", app_name, chrono::Local::now().format("%Y-%m-%d_%H-%M-%S"))
}

/// Installs the global logger and returns the path of this run's log file.
pub fn setup_logging(app_name: &str, log_dir: &Path, log_level: &str) -> Result<PathBuf, LoggerError> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }
    cleanup_old_logs(log_dir, app_name)?;

    let log_path = log_dir.join(log_file_name(app_name));

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "{}[{}][{}] {}",
                chrono::Local::now().format("[%Y-%m-%d %H:%M:%S]"),
                record.target(),
                record.level(),
                message
            ))
        })
        .level(parse_level(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(&log_path)?)
        .apply()?;

    Ok(log_path)
}

/// Deletes `<app>_*.log` files in `log_dir`, keeping the newest one.
pub fn cleanup_old_logs(log_dir: &Path, app_name: &str) -> Result<usize, LoggerError> {
    let prefix = format!("{}_", app_name);
    let mut logs: Vec<PathBuf> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "log"))
        .filter(|p| {
            p.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(&prefix))
        })
        .collect();

    // Timestamped names sort chronologically; newest first.
    logs.sort_by(|a, b| b.cmp(a));

    let mut removed = 0;
    for path in logs.iter().skip(1) {
        match fs::remove_file(path) {
            Ok(()) => removed += 1,
            Err(e) => eprintln!("Failed to delete old log file {:?}: {}", path, e),
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_the_newest_log_of_the_app() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "dispatch_2024-01-01_00-00-00.log",
            "dispatch_2024-03-01_00-00-00.log",
            "dispatch_2024-02-01_00-00-00.log",
            "other_2023-01-01_00-00-00.log",
            "dispatch_notes.txt",
        ] {
            fs::write(dir.path().join(name), "x").unwrap();
        }

        assert_eq!(cleanup_old_logs(dir.path(), "dispatch").unwrap(), 2);
        assert!(dir.path().join("dispatch_2024-03-01_00-00-00.log").exists());
        assert!(!dir.path().join("dispatch_2024-01-01_00-00-00.log").exists());
        assert!(dir.path().join("other_2023-01-01_00-00-00.log").exists());
        assert!(dir.path().join("dispatch_notes.txt").exists());
    }

    #[test]
    fn level_names() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("fatal"), log::LevelFilter::Info);
        assert_eq!(parse_level(" warn "), log::LevelFilter::Warn);
    }

    #[test]
    fn file_name_is_prefixed() {
        let name = log_file_name("dispatch-submit");
        assert!(name.starts_with("dispatch-submit_"));
        assert!(name.ends_with(".log"));
    }
}
