//! Terminal and JSON output shared by the commands.
//!
//! Status lines go to stdout, prefixed by a symbol colored by tone; colors are
//! dropped when the stream is not a terminal.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream};

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const SKIP: &str = "-";
}

#[derive(Clone, Copy)]
enum Tone {
  Good,
  Bad,
  Neutral,
  Muted,
}

fn paint(text: &str, tone: Tone, stream: Stream) -> String {
  match tone {
    Tone::Good => text.if_supports_color(stream, |s| s.green()).to_string(),
    Tone::Bad => text.if_supports_color(stream, |s| s.red()).to_string(),
    Tone::Neutral => text.if_supports_color(stream, |s| s.blue()).to_string(),
    Tone::Muted => text.if_supports_color(stream, |s| s.dimmed()).to_string(),
  }
}

/// `<symbol> <message>`; the message itself is colored only for bad and
/// muted tones.
fn status_line(symbol: &str, tone: Tone, message: &str, stream: Stream) -> String {
  let body = match tone {
    Tone::Bad | Tone::Muted => paint(message, tone, stream),
    Tone::Good | Tone::Neutral => message.to_string(),
  };
  format!("{} {}", paint(symbol, tone, stream), body)
}

pub fn print_success(message: &str) {
  println!("{}", status_line(symbols::SUCCESS, Tone::Good, message, Stream::Stdout));
}

/// A failed item in a command's report (stdout).
pub fn print_failure(message: &str) {
  println!("{}", status_line(symbols::ERROR, Tone::Bad, message, Stream::Stdout));
}

pub fn print_skipped(message: &str) {
  println!("{}", status_line(symbols::SKIP, Tone::Muted, message, Stream::Stdout));
}

pub fn print_info(message: &str) {
  println!("{}", status_line(symbols::INFO, Tone::Neutral, message, Stream::Stdout));
}

/// A fatal error (stderr).
pub fn print_error(message: &str) {
  eprintln!("{}", status_line(symbols::ERROR, Tone::Bad, message, Stream::Stderr));
}

pub fn print_stat(label: &str, value: &str) {
  println!("  {}: {}", paint(label, Tone::Muted, Stream::Stdout), value);
}

/// Indented, dimmed lines under a status line.
pub fn print_detail(text: &str) {
  for line in text.lines() {
    println!("    {}", paint(line, Tone::Muted, Stream::Stdout));
  }
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

/// First 12 characters of a digest.
pub fn truncate_hash(hash: &str) -> &str {
  &hash[..hash.len().min(12)]
}

pub fn format_bytes(bytes: u64) -> String {
  const UNITS: [&str; 3] = ["KB", "MB", "GB"];
  let mut value = bytes as f64;
  let mut unit = None;
  for candidate in UNITS {
    if value < 1024.0 {
      break;
    }
    value /= 1024.0;
    unit = Some(candidate);
  }
  match unit {
    Some(unit) => format!("{value:.1} {unit}"),
    None => format!("{bytes} B"),
  }
}

pub fn format_duration(duration: Duration) -> String {
  let secs = duration.as_secs();
  match secs {
    60.. => format!("{}m {}s", secs / 60, secs % 60),
    1.. => format!("{secs}.{:02}s", duration.subsec_millis() / 10),
    0 => format!("{}ms", duration.subsec_millis()),
  }
}

/// The last `n` lines of `text`.
pub fn tail(text: &str, n: usize) -> String {
  let lines: Vec<&str> = text.lines().collect();
  lines[lines.len().saturating_sub(n)..].join("\n")
}
