//! Interactive password entry.

use std::io::IsTerminal;

/// Source of interactively entered passwords. Runs on a blocking thread.
pub trait PasswordPrompt: Send + Sync + 'static {
    /// Ask for a password. `Ok(None)` when nobody can answer.
    fn prompt(&self, message: &str) -> std::io::Result<Option<String>>;
}

/// Masked prompt on the controlling terminal.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompt;

impl PasswordPrompt for TerminalPrompt {
    fn prompt(&self, message: &str) -> std::io::Result<Option<String>> {
        if !std::io::stdin().is_terminal() {
            return Ok(None);
        }
        rpassword::prompt_password(message).map(Some)
    }
}

/// Never answers. For non-interactive use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPrompt;

impl PasswordPrompt for NoPrompt {
    fn prompt(&self, _message: &str) -> std::io::Result<Option<String>> {
        Ok(None)
    }
}
