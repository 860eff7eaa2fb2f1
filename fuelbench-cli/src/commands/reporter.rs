//! Step progress on the terminal.

use colored::Colorize;
use fuelbench_core::{StepReporter, StepStatus};
use std::io::Write;

/// Prints `step ... OK` lines as pipeline steps complete.
pub struct ConsoleReporter;

impl StepReporter for ConsoleReporter {
    fn begin(&self, step: &str) {
        print!("{} ... ", step);
        let _ = std::io::stdout().flush();
    }

    fn finish(&self, _step: &str, status: StepStatus) {
        let token = status.token();
        let token = match status {
            StepStatus::Ok => token.green().bold(),
            StepStatus::Timeout => token.yellow().bold(),
            StepStatus::Failed => token.red().bold(),
        };
        println!("{}", token);
    }

    fn note(&self, message: &str) {
        println!("{}", message);
    }
}
