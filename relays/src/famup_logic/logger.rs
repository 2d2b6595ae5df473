use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

const LOG_PREFIX: &str = "famup_";

/// Installs the global logger: stderr always, plus a fresh file under
/// `log_dir` when one is given. Stdout stays free for the `--stdout` mirror.
pub fn setup_logging(log_dir: Option<&Path>, log_level: &str) -> Result<Option<PathBuf>> {
    let mut dispatch = fern::Dispatch::new()
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
        .chain(std::io::stderr());

    let mut log_path = None;
    if let Some(log_dir) = log_dir {
        if !log_dir.exists() {
            fs::create_dir_all(log_dir)?;
        }

        // Clean up old log files, keeping only the most recent one
        cleanup_old_logs(log_dir)?;

        let log_file_name = format!(
            "{}{}.log",
            LOG_PREFIX,
            chrono::Local::now().format("%Y-%m-%d_%H-%M-%S")
        );
        let path = log_dir.join(log_file_name);
        dispatch = dispatch.chain(fern::log_file(&path)?);
        log_path = Some(path);
    }

    dispatch.apply()?;
    Ok(log_path)
}

pub fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

fn cleanup_old_logs(log_dir: &Path) -> Result<()> {
    let mut entries: Vec<(SystemTime, PathBuf)> = fs::read_dir(log_dir)?
        .filter_map(|res| res.ok())
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            name.starts_with(LOG_PREFIX) && name.ends_with(".log")
        })
        .filter_map(|e| {
            let modified = e.metadata().and_then(|m| m.modified()).ok()?;
            Some((modified, e.path()))
        })
        .collect();

    // Sort by modification time, newest first
    entries.sort_by_key(|(modified, _)| std::cmp::Reverse(*modified));

    // Keep the most recent one (index 0), delete the rest
    for (_, path) in entries.iter().skip(1) {
        if let Err(e) = fs::remove_file(path) {
            eprintln!("Failed to delete old log file {:?}: {}", path, e);
        }
    }

    Ok(())
}
