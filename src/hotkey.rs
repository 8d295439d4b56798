//! Quit key handling for the terminal the pipeline runs in

use anyhow::{anyhow, Result};
use std::io::BufRead;
use std::thread::JoinHandle;
use tracing::{debug, info};

use crate::shared::ShutdownSignal;

/// Key that stops the pipeline when entered on stdin
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuitKey {
    /// A printable key, stored lowercase
    Char(char),
    Escape,
}

impl QuitKey {
    /// Whether an input line is this key. Letters match either case.
    pub fn matches(&self, line: &str) -> bool {
        let line = line.trim_end_matches(['\r', '\n']);
        match self {
            QuitKey::Escape => line.contains('\u{1b}') || line.trim().eq_ignore_ascii_case("esc"),
            QuitKey::Char(c) => {
                let mut chars = line.trim().chars();
                match (chars.next(), chars.next()) {
                    (Some(first), None) => first.to_lowercase().eq(c.to_lowercase()),
                    _ => false,
                }
            }
        }
    }
}

/// Parses a quit key string like "q", "Q", "Esc" into a QuitKey
pub fn parse_quit_key(key_str: &str) -> Result<QuitKey> {
    let key = key_str.trim();
    if key.is_empty() {
        return Err(anyhow!("No key found in quit key string"));
    }

    let upper = key.to_uppercase();
    let quit_key = match upper.as_str() {
        "ESC" | "ESCAPE" => QuitKey::Escape,
        _ => {
            let mut chars = key.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) if !c.is_control() && !c.is_whitespace() => {
                    QuitKey::Char(c.to_lowercase().next().unwrap_or(c))
                }
                _ => return Err(anyhow!("Unknown quit key: {}", key)),
            }
        }
    };

    Ok(quit_key)
}

/// Watches stdin on a helper thread and raises the shutdown signal when the
/// quit key is entered
pub struct QuitListener {
    _reader: JoinHandle<()>,
}

impl QuitListener {
    /// Start listening on stdin. The thread is detached: a blocked read
    /// cannot be interrupted, so it ends with the process.
    pub fn spawn(key: QuitKey, shutdown: ShutdownSignal) -> Self {
        let reader = std::thread::spawn(move || {
            let stdin = std::io::stdin();
            listen(stdin.lock(), key, &shutdown);
        });

        info!("Enter {} to quit", describe(key));
        Self { _reader: reader }
    }
}

fn describe(key: QuitKey) -> String {
    match key {
        QuitKey::Char(c) => format!("'{}'", c),
        QuitKey::Escape => "Esc".to_string(),
    }
}

/// Read lines until the quit key, end of input, or an already raised signal
fn listen(reader: impl BufRead, key: QuitKey, shutdown: &ShutdownSignal) {
    for line in reader.lines() {
        if shutdown.is_raised() {
            return;
        }
        let Ok(line) = line else {
            debug!("Stopped reading quit input");
            return;
        };
        if key.matches(&line) {
            info!("Quit key pressed");
            shutdown.raise();
            return;
        }
    }
    debug!("Quit input closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_parse_simple_key() {
        assert_eq!(parse_quit_key("q").unwrap(), QuitKey::Char('q'));
        assert_eq!(parse_quit_key(" Q ").unwrap(), QuitKey::Char('q'));
    }

    #[test]
    fn test_parse_escape() {
        assert_eq!(parse_quit_key("Esc").unwrap(), QuitKey::Escape);
        assert_eq!(parse_quit_key("ESCAPE").unwrap(), QuitKey::Escape);
    }

    #[test]
    fn test_parse_invalid_key() {
        assert!(parse_quit_key("Ctrl+Q").is_err());
        assert!(parse_quit_key("").is_err());
    }

    #[test]
    fn test_key_matching() {
        let q = QuitKey::Char('q');
        assert!(q.matches("q\n"));
        assert!(q.matches("Q"));
        assert!(!q.matches("quit"));
        assert!(!q.matches(""));

        assert!(QuitKey::Escape.matches("\u{1b}\n"));
        assert!(QuitKey::Escape.matches("esc"));
        assert!(!QuitKey::Escape.matches("q"));
    }

    #[test]
    fn test_listen_raises_on_quit_key() {
        let shutdown = ShutdownSignal::new();
        listen(Cursor::new("hello\nq\nmore\n"), QuitKey::Char('q'), &shutdown);
        assert!(shutdown.is_raised());
    }

    #[test]
    fn test_listen_end_of_input_does_not_quit() {
        let shutdown = ShutdownSignal::new();
        listen(Cursor::new("a\nb\n"), QuitKey::Char('q'), &shutdown);
        assert!(!shutdown.is_raised());
    }
}
