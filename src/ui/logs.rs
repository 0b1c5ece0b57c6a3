use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use is_terminal::IsTerminal;
use owo_colors::OwoColorize;
use regex::Regex;
use tokio::sync::mpsc;

use crate::logging::RunLog;

/// Severity guessed from a line of service output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

static LOG_LEVEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(trace|debug|info|warn(?:ing)?|error)\b").unwrap());

/// First level keyword in `text`, if any.
pub fn detect_log_level(text: &str) -> Option<LogLevel> {
    let word = LOG_LEVEL_RE.find(text)?.as_str().to_ascii_lowercase();
    match word.as_str() {
        "trace" => Some(LogLevel::Trace),
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" | "warning" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}

/// One line of child output, labelled with the service that wrote it.
#[derive(Debug, Clone)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub text: String,
    pub is_stderr: bool,
    pub level: Option<LogLevel>,
}

const SERVICE_COLORS: &[fn(&str) -> String] = &[
    |s| format!("{}", s.cyan()),
    |s| format!("{}", s.yellow()),
    |s| format!("{}", s.green()),
    |s| format!("{}", s.magenta()),
    |s| format!("{}", s.blue()),
];

/// Prints service output to the console as `name | text`, with names
/// right-aligned and coloured per service, and copies each line to the run
/// log.
pub struct LogWriter {
    rx: mpsc::Receiver<LogLine>,
    name_width: usize,
    use_color: bool,
    run_log: Option<RunLog>,
}

impl LogWriter {
    pub fn new<'a>(rx: mpsc::Receiver<LogLine>, names: impl IntoIterator<Item = &'a str>) -> Self {
        let name_width = names.into_iter().map(|n| n.chars().count()).max().unwrap_or(0);
        Self {
            rx,
            name_width,
            use_color: std::io::stdout().is_terminal(),
            run_log: None,
        }
    }

    pub fn with_run_log(mut self, run_log: RunLog) -> Self {
        self.run_log = Some(run_log);
        self
    }

    /// Runs until every sender is gone.
    pub async fn run(mut self) {
        let mut colors: BTreeMap<String, usize> = BTreeMap::new();
        while let Some(line) = self.rx.recv().await {
            let next = colors.len() % SERVICE_COLORS.len();
            let color = *colors.entry(line.service.clone()).or_insert(next);
            println!("{}", self.console_line(&line, color));
            if let Some(run_log) = &self.run_log {
                run_log.append(&file_line(&line));
            }
        }
    }

    fn console_line(&self, line: &LogLine, color: usize) -> String {
        let padding = " ".repeat(self.name_width.saturating_sub(line.service.chars().count()));
        if !self.use_color {
            return format!("{}{} | {}", padding, line.service, line.text);
        }
        let name = SERVICE_COLORS[color % SERVICE_COLORS.len()](&line.service);
        let text = match (line.is_stderr, line.level) {
            (_, Some(LogLevel::Error)) => format!("{}", line.text.red()),
            (_, Some(LogLevel::Warn)) => format!("{}", line.text.yellow()),
            (true, _) => format!("{}", line.text.red()),
            _ => line.text.clone(),
        };
        format!("{}{} {} {}", padding, name, "|".dimmed(), text)
    }
}

/// Plain form written to the run log.
fn file_line(line: &LogLine) -> String {
    let stream = if line.is_stderr { "stderr" } else { "stdout" };
    format!(
        "{} [{}] {}: {}",
        line.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S%.3f"),
        line.service,
        stream,
        line.text
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(service: &str, text: &str, is_stderr: bool) -> LogLine {
        LogLine {
            timestamp: Utc::now(),
            service: service.to_string(),
            text: text.to_string(),
            is_stderr,
            level: detect_log_level(text),
        }
    }

    #[test]
    fn detects_levels() {
        assert_eq!(detect_log_level("[INFO] ready on :3020"), Some(LogLevel::Info));
        assert_eq!(detect_log_level(r#"{"level":"error","msg":"fail"}"#), Some(LogLevel::Error));
        assert_eq!(detect_log_level("WARNING: deprecated"), Some(LogLevel::Warn));
        assert_eq!(detect_log_level("prisma:debug query"), Some(LogLevel::Debug));
        assert_eq!(detect_log_level("compiled successfully"), None);
        assert_eq!(detect_log_level(""), None);
    }

    #[test]
    fn level_ordering() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn console_names_are_right_aligned() {
        let (_tx, rx) = mpsc::channel(1);
        let mut writer = LogWriter::new(rx, ["Kits", "Identity"]);
        writer.use_color = false;
        assert_eq!(writer.console_line(&line("Kits", "ready", false), 0), "    Kits | ready");
        assert_eq!(
            writer.console_line(&line("Identity", "ready", true), 1),
            "Identity | ready"
        );
    }

    #[test]
    fn file_line_names_stream() {
        let text = file_line(&line("Kits", "boom", true));
        assert!(text.ends_with("[Kits] stderr: boom"), "{}", text);
    }
}
