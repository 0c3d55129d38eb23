use anyhow::Result;
use chrono::{DateTime, Local};
use log::{LevelFilter, Record};
use std::fs::OpenOptions;
use std::io::Write;

// Logging setup and terminal input helpers for the command line client

pub struct SimpleLogger {
    log_file: std::fs::File,
}

impl SimpleLogger {
    pub fn new(log_file_path: &str) -> Result<Self> {
        let log_file = OpenOptions::new().create(true).append(true).open(log_file_path)?;
        Ok(SimpleLogger { log_file })
    }
}

impl log::Log for SimpleLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            let now: DateTime<Local> = Local::now();
            let log_message = format!(
                "[{}] {} [{}:{}] {}\n",
                now.format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.args()
            );

            if let Ok(mut file) = self.log_file.try_clone() {
                let _ = file.write_all(log_message.as_bytes());
            }
        }
    }

    fn flush(&self) {
        if let Ok(mut file) = self.log_file.try_clone() {
            let _ = file.flush();
        }
    }
}

/// Read a line of input from stdin, trimming whitespace. `None` at end of input.
pub fn read_line() -> Result<Option<String>> {
    let mut input = String::new();
    if std::io::stdin().read_line(&mut input)? == 0 {
        return Ok(None);
    }
    Ok(Some(input.trim().to_string()))
}

/// Log to `log_file`, or to stderr through env_logger (honouring RUST_LOG) when none is given
pub fn setup_logging(log_file: Option<&str>, level: LevelFilter) -> Result<()> {
    match log_file {
        Some(path) => {
            let logger = SimpleLogger::new(path)?;
            log::set_boxed_logger(Box::new(logger)).map(|()| log::set_max_level(level))?;
        }
        None => stderr_logger(level).try_init()?,
    }

    log::info!("Logging initialized at level: {}", level);
    log::info!("App version: {} ({})", env!("CARGO_PKG_VERSION"), env!("CARGO_PKG_NAME"));

    Ok(())
}

/// RUST_LOG, when set, overrides `level`
fn stderr_logger(level: LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level).parse_default_env();
    builder
}
