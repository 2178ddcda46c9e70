//! Terminal and JSON output for `zb`.
//!
//! Every status line starts with a [`Mark`]. Failures and cancellations go to
//! stderr, everything else to stdout. Colors are applied only when the stream
//! supports them.

use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{AnsiColors, OwoColorize, Stream};
use zbuild_lib::execute::BuildStatus;

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

/// Leading glyph of a status line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
  Done,
  Failed,
  Skipped,
  Cancelled,
  Note,
}

impl Mark {
  pub fn for_status(status: &BuildStatus) -> Self {
    match status {
      BuildStatus::Succeeded(_) => Mark::Done,
      BuildStatus::Failed(_) => Mark::Failed,
      BuildStatus::Skipped { .. } => Mark::Skipped,
      BuildStatus::Cancelled => Mark::Cancelled,
    }
  }

  fn glyph(self) -> &'static str {
    match self {
      Mark::Done => "✓",
      Mark::Failed => "✗",
      Mark::Skipped => "-",
      Mark::Cancelled => "~",
      Mark::Note => "•",
    }
  }

  fn color(self) -> AnsiColors {
    match self {
      Mark::Done => AnsiColors::Green,
      Mark::Failed => AnsiColors::Red,
      Mark::Skipped => AnsiColors::Yellow,
      Mark::Cancelled => AnsiColors::Yellow,
      Mark::Note => AnsiColors::Blue,
    }
  }

  fn stream(self) -> Stream {
    match self {
      Mark::Failed | Mark::Cancelled => Stream::Stderr,
      _ => Stream::Stdout,
    }
  }

  fn painted(self, stream: Stream) -> String {
    let color = self.color();
    self
      .glyph()
      .if_supports_color(stream, |g| g.color(color))
      .to_string()
  }
}

/// A one-line status message.
pub fn announce(mark: Mark, message: &str) {
  let line = format!("{} {}", mark.painted(mark.stream()), message);
  if matches!(mark.stream(), Stream::Stderr) {
    eprintln!("{line}");
  } else {
    println!("{line}");
  }
}

/// One report line: mark, package, status detail. Always on stdout.
pub fn print_status(package: &str, status: &BuildStatus) {
  let mark = Mark::for_status(status);
  println!(
    "  {} {} {}",
    mark.painted(Stream::Stdout),
    package,
    status.if_supports_color(Stream::Stdout, |s| s.dimmed())
  );
}

/// An indented `label: value` pair for summaries.
pub fn print_field(label: &str, value: impl std::fmt::Display) {
  println!("  {}: {}", label.if_supports_color(Stream::Stdout, |l| l.dimmed()), value);
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}

/// Elapsed time rounded to milliseconds, e.g. `1s 250ms`.
pub fn format_duration(duration: Duration) -> String {
  let millis = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(millis).to_string()
}
