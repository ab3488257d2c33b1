//! Terminal collaborators: prompts, clipboard, colorization

use std::io::{self, BufRead, IsTerminal, Write};
use std::time::Duration;

/// How long a copied value stays on the clipboard
pub const DEFAULT_CLEAR_DURATION: Duration = Duration::from_secs(45);

/// Prompt for a passphrase with hidden input. Falls back to a plain line
/// read when stdin is not a terminal (pipes, scripts).
pub fn prompt_password(prompt: &str) -> io::Result<String> {
    if io::stdin().is_terminal() {
        rpassword::prompt_password(prompt)
    } else {
        print!("{prompt}");
        io::stdout().flush()?;
        read_line()
    }
}

/// Prompt twice and verify both inputs match.
pub fn prompt_confirm_password(prompt: &str, confirm_prompt: &str) -> io::Result<String> {
    let first = prompt_password(prompt)?;
    let second = prompt_password(confirm_prompt)?;

    if first != second {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "passphrases do not match",
        ));
    }
    Ok(first)
}

/// Prompt for visible input and return the trimmed line.
pub fn prompt_visible(prompt: &str) -> io::Result<String> {
    print!("{prompt}");
    io::stdout().flush()?;
    read_line()
}

/// Interactive field entry loop: an empty label finishes. Values are read
/// hidden since fields default to sensitive.
pub fn prompt_fields() -> io::Result<Vec<(String, String)>> {
    let mut fields = Vec::new();
    loop {
        let label = prompt_visible("Field label (empty to finish): ")?;
        if label.is_empty() {
            break;
        }
        let value = prompt_password(&format!("Value for '{label}': "))?;
        fields.push((label, value));
    }
    Ok(fields)
}

fn read_line() -> io::Result<String> {
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

/// Copy text to the system clipboard and clear it after `clear_after`,
/// unless something else was copied in the meantime.
pub fn copy_with_auto_clear(text: &str, clear_after: Duration) -> Result<(), String> {
    let mut clipboard = arboard::Clipboard::new().map_err(|e| e.to_string())?;
    clipboard.set_text(text).map_err(|e| e.to_string())?;

    if !clear_after.is_zero() {
        let copied = text.to_string();
        std::thread::spawn(move || {
            std::thread::sleep(clear_after);
            if let Ok(mut clipboard) = arboard::Clipboard::new() {
                if clipboard.get_text().ok().as_deref() == Some(&copied) {
                    let _ = clipboard.clear();
                }
            }
        });
    }

    Ok(())
}

// Terminal colors, disabled when output is not a tty

const RESET: &str = "\x1b[0m";
const GREEN: &str = "\x1b[32m";
const YELLOW: &str = "\x1b[33m";
const RED: &str = "\x1b[31m";
const CYAN: &str = "\x1b[36m";

fn paint(color: &str, text: &str, tty: bool) -> String {
    if tty {
        format!("{color}{text}{RESET}")
    } else {
        text.to_string()
    }
}

pub fn success(text: &str) -> String {
    paint(GREEN, text, io::stdout().is_terminal())
}

pub fn warning(text: &str) -> String {
    paint(YELLOW, text, io::stdout().is_terminal())
}

pub fn error(text: &str) -> String {
    paint(RED, text, io::stderr().is_terminal())
}

pub fn header(text: &str) -> String {
    paint(CYAN, text, io::stdout().is_terminal())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_colors_disabled_off_tty() {
        // Test harnesses capture stdio, so the uncolored path is what runs
        assert_eq!(success("done"), "done");
        assert_eq!(error("boom"), "boom");
        assert_eq!(warning("careful"), "careful");
        assert_eq!(header("NAME"), "NAME");
    }
}
