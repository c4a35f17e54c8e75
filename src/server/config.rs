use chrono_tz::Tz;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None, args_override_self = true)]
pub struct ServerConfig {
    /// Port to serve on
    #[arg(short, long, default_value_t = 8080, allow_negative_numbers = true)]
    pub port: i64,

    /// Directory to serve
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// Number of worker threads handling connections
    #[arg(short, long, default_value_t = 10)]
    pub threads: usize,

    /// Append a copy of the diagnostic log to this file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Time zone used for log timestamps (IANA name)
    #[arg(long, default_value = "UTC", value_parser = parse_timezone)]
    pub log_timezone: Tz,
}

fn parse_timezone(value: &str) -> Result<Tz, String> {
    value.parse::<Tz>().map_err(|e| e.to_string())
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            directory: PathBuf::from("."),
            threads: 10,
            log_file: None,
            log_timezone: Tz::UTC,
        }
    }
}
