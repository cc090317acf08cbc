//! Yes/no dialog capability injected into destructive operations.

use std::io::{self, BufRead, Write};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmOptions {
    pub title: String,
    pub confirm_text: String,
    pub cancel_text: String,
}

impl ConfirmOptions {
    pub fn new(title: impl Into<String>, confirm_text: impl Into<String>) -> Self {
        ConfirmOptions {
            title: title.into(),
            confirm_text: confirm_text.into(),
            cancel_text: "Cancel".to_string(),
        }
    }
}

impl Default for ConfirmOptions {
    fn default() -> Self {
        ConfirmOptions::new("Confirm", "Confirm")
    }
}

/// Asks the user to approve an action. Returning `false` (or dismissing the
/// dialog) cancels the operation without side effects.
pub trait Confirm {
    fn confirm(&mut self, message: &str, options: &ConfirmOptions) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&str, &ConfirmOptions) -> bool,
{
    fn confirm(&mut self, message: &str, options: &ConfirmOptions) -> bool {
        self(message, options)
    }
}

/// Approves everything (`--yes`).
#[derive(Debug, Clone, Copy, Default)]
pub struct AssumeYes;

impl Confirm for AssumeYes {
    fn confirm(&mut self, _message: &str, _options: &ConfirmOptions) -> bool {
        true
    }
}

/// Prompts on a terminal; anything but `y`/`yes` declines.
pub struct TerminalPrompt<R, W> {
    input: R,
    output: W,
}

impl TerminalPrompt<io::StdinLock<'static>, io::Stderr> {
    pub fn stdio() -> Self {
        TerminalPrompt {
            input: io::stdin().lock(),
            output: io::stderr(),
        }
    }
}

impl<R: BufRead, W: Write> TerminalPrompt<R, W> {
    pub fn new(input: R, output: W) -> Self {
        TerminalPrompt { input, output }
    }
}

impl<R: BufRead, W: Write> Confirm for TerminalPrompt<R, W> {
    fn confirm(&mut self, message: &str, options: &ConfirmOptions) -> bool {
        let prompt = format!(
            "{}: {} [{}: y / {}: N] ",
            options.title, message, options.confirm_text, options.cancel_text
        );
        if self.output.write_all(prompt.as_bytes()).and_then(|_| self.output.flush()).is_err() {
            return false;
        }
        let mut answer = String::new();
        match self.input.read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"),
        }
    }
}
