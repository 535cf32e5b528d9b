//! CLI output formatting utilities.
//!
//! Status messages go to stderr so stdout stays reserved for published image
//! references and resolved documents.

use std::time::Duration;

use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
}

/// Shorten a `sha256:<hex>` digest for display.
pub fn truncate_digest(digest: &str) -> &str {
  let hex = digest.strip_prefix("sha256:").unwrap_or(digest);
  let len = hex.len().min(12);
  &hex[..len]
}

/// Elapsed time rounded to milliseconds.
pub fn format_elapsed(duration: Duration) -> String {
  let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
  humantime::format_duration(Duration::from_millis(millis)).to_string()
}

pub fn print_success(message: &str) {
  eprintln!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stderr, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}

pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_info(message: &str) {
  eprintln!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stderr, |s| s.blue()),
    message
  );
}

/// `<from> → <to>` with the arrow dimmed.
pub fn print_mapping(from: &str, to: &str) {
  eprintln!(
    "  {} {} {}",
    from,
    symbols::ARROW.if_supports_color(Stream::Stderr, |s| s.dimmed()),
    to
  );
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_truncate_digest() {
    assert_eq!(truncate_digest("sha256:abcdef123456789"), "abcdef123456");
    assert_eq!(truncate_digest("short"), "short");
    assert_eq!(truncate_digest(""), "");
  }

  #[test]
  fn test_format_elapsed() {
    assert_eq!(format_elapsed(Duration::from_micros(50_400)), "50ms");
    assert_eq!(format_elapsed(Duration::from_millis(1500)), "1s 500ms");
    assert_eq!(format_elapsed(Duration::from_secs(65)), "1m 5s");
  }
}
