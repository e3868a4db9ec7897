use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

// The listener and the Odoo client are both HTTP; their libraries chat a lot
// at info level and none of it belongs in the agent log.
const DEFAULT_FILTER: &str = "info,hyper=warn,hyper_util=warn,axum=warn,reqwest=warn,rustls=warn";

/// Install the daily-rotated file log (`<install>/logs/agent_log_YYYY-MM-DD.log`)
/// plus a stderr mirror. The returned guard must live as long as the process;
/// dropping it flushes and stops the background writer.
pub fn init(install_dir: &Path) -> Result<WorkerGuard, String> {
    let log_dir = install_dir.join("logs");
    fs::create_dir_all(&log_dir).map_err(|e| format!("cannot create {}: {e}", log_dir.display()))?;

    let appender = DailyLogFile::open(log_dir.clone())
        .map_err(|e| format!("cannot open log file in {}: {e}", log_dir.display()))?;
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_target(true)
                .with_ansi(false),
        )
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .try_init()
        .map_err(|e| format!("cannot install log subscriber: {e}"))?;

    Ok(guard)
}

/// Appending writer that switches to a new `agent_log_<date>.log` at local
/// midnight. Support tooling globs on that exact name pattern.
struct DailyLogFile {
    dir: PathBuf,
    day: NaiveDate,
    file: fs::File,
}

fn file_name(day: NaiveDate) -> String {
    format!("agent_log_{}.log", day.format("%Y-%m-%d"))
}

impl DailyLogFile {
    fn open(dir: PathBuf) -> std::io::Result<Self> {
        let day = chrono::Local::now().date_naive();
        let file = open_for_day(&dir, day)?;
        Ok(Self { dir, day, file })
    }
}

fn open_for_day(dir: &Path, day: NaiveDate) -> std::io::Result<fs::File> {
    fs::OpenOptions::new().create(true).append(true).open(dir.join(file_name(day)))
}

impl Write for DailyLogFile {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let today = chrono::Local::now().date_naive();
        if today != self.day {
            self.file = open_for_day(&self.dir, today)?;
            self.day = today;
        }
        self.file.write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.flush()
    }
}

/// Last-resort breadcrumb when the logger itself cannot be brought up.
/// Best effort: if even this fails there is nowhere left to report to.
pub fn write_failsafe(install_dir: &Path, reason: &str) {
    let log_dir = install_dir.join("logs");
    let _ = fs::create_dir_all(&log_dir);
    let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let path = log_dir.join(format!("failsafe_crash_{stamp}.txt"));
    if let Ok(mut f) = fs::File::create(&path) {
        let _ = writeln!(f, "{} logger initialization failed: {reason}", chrono::Local::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_file_name_joins_prefix_and_date_with_underscore() {
        let day = NaiveDate::from_ymd_opt(2026, 8, 25).unwrap();
        assert_eq!(file_name(day), "agent_log_2026-08-25.log");
    }

    #[test]
    fn daily_file_appends_under_todays_name() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = DailyLogFile::open(dir.path().to_path_buf()).unwrap();
        log.write_all(b"first line\n").unwrap();
        log.flush().unwrap();

        let expected = dir.path().join(file_name(chrono::Local::now().date_naive()));
        assert_eq!(fs::read_to_string(expected).unwrap(), "first line\n");
    }
}
