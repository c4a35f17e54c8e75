use ansi_term::Colour;
use chrono_tz::Tz;
use env_logger::Builder;
use log::Level;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};

use crate::server::config::ServerConfig;

/// Installs the global logger. Level comes from `RUST_LOG`; lines go to
/// stderr coloured, and uncoloured to `--log-file` when one is configured.
pub fn init(config: &ServerConfig) -> io::Result<()> {
    let log_file = match &config.log_file {
        Some(path) => Some(OpenOptions::new().create(true).append(true).open(path)?),
        None => None,
    };
    let timezone = config.log_timezone;

    Builder::from_default_env()
        .format(move |buf, record| {
            let timestamp = format_timestamp(timezone);
            let module = record.module_path().unwrap_or_default();

            if let Some(file) = &log_file {
                write_plain(file, &timestamp, record.level(), module, record.args())?;
            }

            writeln!(
                buf,
                "[{} {} {}] {}",
                timestamp,
                paint_level(record.level()),
                module,
                record.args()
            )
        })
        .try_init()
        .map_err(io::Error::other)
}

fn format_timestamp(timezone: Tz) -> String {
    chrono::Utc::now()
        .with_timezone(&timezone)
        .format("%Y-%m-%dT%H:%M:%S%:z")
        .to_string()
}

fn paint_level(level: Level) -> ansi_term::ANSIGenericString<'static, str> {
    let colour = match level {
        Level::Error => Colour::Red,
        Level::Warn => Colour::Yellow,
        Level::Info => Colour::Green,
        Level::Debug => Colour::Blue,
        Level::Trace => Colour::Purple,
    };
    colour.paint(level.as_str())
}

fn write_plain(
    mut file: &File,
    timestamp: &str,
    level: Level,
    module: &str,
    args: &std::fmt::Arguments<'_>,
) -> io::Result<()> {
    writeln!(file, "[{} {} {}] {}", timestamp, level, module, args)
}
