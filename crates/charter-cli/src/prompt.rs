//! Asking vault values on the terminal

use charter_kube::{PromptRequest, Prompter};
use console::{Term, style};
use std::sync::Mutex;

/// Prompts on stderr, reading answers from the terminal
///
/// Falls back to the default when stdin is not a terminal.
pub struct TerminalPrompter {
    term: Term,
    lock: Mutex<()>,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            term: Term::stderr(),
            lock: Mutex::new(()),
        }
    }

    fn read(&self, secret: bool) -> std::io::Result<String> {
        if secret {
            self.term.read_secure_line()
        } else {
            self.term.read_line()
        }
    }
}

impl Default for TerminalPrompter {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompter for TerminalPrompter {
    fn ask(&self, request: &PromptRequest<'_>) -> std::io::Result<String> {
        if !self.term.is_term() {
            return charter_kube::NoPrompter.ask(request);
        }
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());

        let mut question = style(request.vault).bold().to_string();
        if let Some(description) = request.description {
            question.push_str(&format!(" ({description})"));
        }
        if !request.options.is_empty() {
            question.push_str(&format!(" [{}]", request.options.join("/")));
        }
        if let Some(default) = request.default.filter(|_| !request.secret) {
            question.push_str(&format!(" {}", style(format!("default: {default}")).dim()));
        }

        loop {
            self.term.write_str(&format!("{question}: "))?;
            let answer = self.read(request.secret)?.trim().to_string();
            let answer = match (answer.is_empty(), request.default) {
                (true, Some(default)) => default.to_string(),
                _ => answer,
            };
            if answer.is_empty() {
                continue;
            }
            if request.options.is_empty() || request.options.contains(&answer) {
                return Ok(answer);
            }
            self.term.write_line(&format!(
                "{} choose one of {}",
                style("!").yellow().bold(),
                request.options.join(", ")
            ))?;
        }
    }
}
