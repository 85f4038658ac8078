//! Console logging helpers.
//!
//! Every line goes to the `log` facade under the `goal_sync` target. Unless
//! `GOAL_SYNC_SILENT` is set, a coloured, timestamped copy is also printed to
//! stdout so the binary is readable without a logger installed.

use colored::Colorize;
use std::fmt::Display;

const LOG_TARGET: &str = "goal_sync";
const SILENT_ENV: &str = "GOAL_SYNC_SILENT";

/// Severity of a log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Success,
    Warning,
    Error,
}

impl LogLevel {
    fn facade_level(self) -> log::Level {
        match self {
            Self::Debug => log::Level::Debug,
            Self::Info | Self::Success => log::Level::Info,
            Self::Warning => log::Level::Warn,
            Self::Error => log::Level::Error,
        }
    }

    fn tag(self) -> colored::ColoredString {
        match self {
            Self::Debug => "DEBUG".dimmed(),
            Self::Info => "INFO ".blue(),
            Self::Success => "OK   ".green(),
            Self::Warning => "WARN ".yellow(),
            Self::Error => "ERROR".red().bold(),
        }
    }
}

fn is_silent() -> bool {
    std::env::var_os(SILENT_ENV).is_some()
}

/// Logs a single message at the given level.
pub fn log(level: LogLevel, message: &str) {
    log::log!(target: LOG_TARGET, level.facade_level(), "{message}");

    if is_silent() || level == LogLevel::Debug {
        return;
    }

    let timestamp = chrono::Utc::now().format("%Y-%m-%d %H:%M:%S");
    println!("{} {} {}", timestamp.to_string().dimmed(), level.tag(), message);
}

/// Logs an error together with the operation it interrupted.
pub fn log_error(context: &str, err: &dyn Display) {
    log(LogLevel::Error, &format!("{context}: {err}"));
}

/// Prints a section banner, used at startup.
pub fn log_section(title: &str) {
    log::info!(target: LOG_TARGET, "== {title} ==");

    if is_silent() {
        return;
    }

    let rule = "=".repeat(title.len() + 8);
    println!("{}", rule.cyan());
    println!("{}", format!("    {title}").cyan().bold());
    println!("{}", rule.cyan());
}
