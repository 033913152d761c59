// src/config/mod.rs
use clap::Parser;
use std::fmt;
use std::str::FromStr;

/// Command-line surface for the load balancer process.
///
/// Flags cover listen port, metrics port and toggle, log level, plus a
/// repeatable `--backend` flag so the process can come up with a seeded
/// pool instead of starting empty.
#[derive(Parser, Debug)]
#[command(name = "layer7-lb", about = "HTTP reverse proxy / layer-7 load balancer")]
pub struct Cli {
    /// Port the data-plane and control-plane HTTP server listens on.
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Port the metrics endpoint listens on.
    #[arg(long, default_value_t = 9090)]
    pub metrics_port: u16,

    /// Disables the metrics endpoint (enabled by default).
    #[arg(long = "no-metrics-enabled", action = clap::ArgAction::SetTrue)]
    pub metrics_disabled: bool,

    /// Minimum severity emitted to the logs.
    #[arg(long, default_value = "info")]
    pub log_level: LogLevel,

    /// Optional file path that receives a second copy of the logs, in
    /// addition to stderr.
    #[arg(long)]
    pub log_file: Option<String>,

    /// Scheduling algorithm the pool starts with.
    #[arg(long, default_value = "round_robin")]
    pub scheduler: String,

    /// Health-check interval, in seconds.
    #[arg(long, default_value_t = 5.0)]
    pub health_check_interval: f64,

    /// Seed backend, `URL` or `URL:WEIGHT`. Repeatable.
    #[arg(long = "backend", value_parser = parse_backend_arg)]
    pub backends: Vec<(String, u32)>,
}

impl Cli {
    pub fn metrics_enabled(&self) -> bool {
        !self.metrics_disabled
    }
}

fn parse_backend_arg(s: &str) -> Result<(String, u32), String> {
    match s.rsplit_once(':') {
        Some((url, weight)) if weight.chars().all(|c| c.is_ascii_digit()) && !weight.is_empty() => {
            let weight: u32 = weight
                .parse()
                .map_err(|_| format!("invalid weight in backend spec: {s}"))?;
            Ok((url.to_string(), weight.max(1)))
        }
        _ => Ok((s.to_string(), 1)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warning" | "warn" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {other}")),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(s)
    }
}
