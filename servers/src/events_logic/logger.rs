use anyhow::Result;
use std::cmp::Reverse;
use std::fs;
use std::path::{Path, PathBuf};

/// Logs to stdout and to `<log_dir>/<prefix>_<started>.log`. Earlier logs
/// written under the same prefix are removed; other files are left alone.
pub fn setup_logging(log_dir: &Path, prefix: &str, log_level: &str) -> Result<()> {
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    cleanup_old_logs(log_dir, prefix)?;

    let log_path = log_file_path(log_dir, prefix, chrono::Local::now());

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
        .level(level_filter(log_level))
        .chain(std::io::stdout())
        .chain(fern::log_file(log_path)?)
        .apply()?;

    Ok(())
}

fn log_file_path(log_dir: &Path, prefix: &str, started: chrono::DateTime<chrono::Local>) -> PathBuf {
    log_dir.join(format!("{}_{}.log", prefix, started.format("%Y-%m-%d_%H-%M-%S")))
}

fn level_filter(log_level: &str) -> log::LevelFilter {
    log_level.trim().parse().unwrap_or(log::LevelFilter::Info)
}

fn is_own_log(path: &Path, prefix: &str) -> bool {
    let own_prefix = format!("{}_", prefix);
    path.extension().is_some_and(|ext| ext == "log")
        && path
            .file_name()
            .and_then(|name| name.to_str())
            .is_some_and(|name| name.starts_with(&own_prefix))
}

/// Keeps the newest log of this binary.
fn cleanup_old_logs(log_dir: &Path, prefix: &str) -> Result<()> {
    let mut entries: Vec<_> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| is_own_log(&e.path(), prefix))
        .collect();

    // Unreadable times sort last.
    entries.sort_by_key(|e| Reverse(e.metadata().and_then(|m| m.modified()).ok()));

    for entry in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(entry.path()) {
            eprintln!("Failed to delete old log file {:?}: {}", entry.path(), e);
        }
    }

    Ok(())
}
