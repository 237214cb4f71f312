//! Terminal output: progress bar and operation summaries

use charter_kube::{Operation, ProgressSubscriber};
use console::style;
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Progress bar fed by the chart tree's root progress node
pub struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    pub fn new(operation: &str, chart: &str) -> Self {
        let bar = ProgressBar::with_draw_target(Some(100), ProgressDrawTarget::stderr());
        let template = "{prefix:.cyan.bold} {msg} [{bar:30.green/dim}] {pos:>3}%";
        if let Ok(progress_style) = ProgressStyle::with_template(template) {
            bar.set_style(progress_style.progress_chars("=> "));
        }
        bar.set_prefix(operation.to_string());
        bar.set_message(chart.to_string());
        Self { bar }
    }

    /// Leave the bar at its last position with a final message
    pub fn finish(&self, message: impl Into<String>) {
        self.bar.finish_with_message(message.into());
    }

    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl ProgressSubscriber for TerminalProgress {
    fn on_progress(&self, percent: u8) -> std::io::Result<()> {
        self.bar.set_position(u64::from(percent));
        Ok(())
    }
}

/// `✓ Applied shop 1.0.0 to namespace shop`
pub fn print_done(verb: &str, chart: &str, version: &str, namespace: &str) {
    println!(
        "{} {} {} {} to namespace {}",
        style("✓").green().bold(),
        style(verb).bold(),
        chart,
        style(version).dim(),
        style(namespace).cyan()
    );
}

/// Operations an in-memory run performed, in order
pub fn print_operations(operations: &[Operation]) {
    if operations.is_empty() {
        println!("  {}", style("no changes").dim());
        return;
    }
    for op in operations {
        let verb = match op {
            Operation::Applied { .. } => style("apply  ").green(),
            Operation::Replaced { .. } => style("replace").yellow(),
            Operation::Deleted { .. } => style("delete ").red(),
        };
        println!("  {verb} {}/{}", op.kind(), op.name());
    }
}
