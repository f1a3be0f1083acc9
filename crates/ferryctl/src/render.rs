//! Terminal progress rendering for ferryctl.
//!
//! Plain line output: a heading per major operation, counters per minor
//! step, indented detail lines in verbose mode. On a recoverable error the
//! operator chooses between continuing and aborting, unless `--yes` made
//! the run unattended.

use std::io::{self, BufRead, Write};

use chrono::Utc;
use ferry_core::{Disposition, ErrorContext, ProgressObserver, TransferError, UpdateLevel};

#[derive(Debug)]
pub struct ConsoleReporter {
    verbose: bool,
    /// Continue past recoverable errors without prompting.
    assume_continue: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool, assume_continue: bool) -> Self {
        Self {
            verbose,
            assume_continue,
        }
    }

    fn prompt_disposition(&self) -> Disposition {
        print!("Continue with the next item? [c]ontinue / [a]bort: ");
        let _ = io::stdout().flush();

        let mut line = String::new();
        if io::stdin().lock().read_line(&mut line).is_err() {
            return Disposition::Abort;
        }
        match line.trim().to_lowercase().as_str() {
            "c" | "continue" | "y" | "yes" => Disposition::Continue,
            _ => Disposition::Abort,
        }
    }
}

impl ProgressObserver for ConsoleReporter {
    fn major(&mut self, message: &str, _length: usize) {
        println!();
        println!("==> {message}");
    }

    fn minor(&mut self, current: usize, message: &str, length: usize) {
        println!("  [{current}/{length}] {message}");
    }

    fn detail(&mut self, _current: usize, message: Option<&str>) {
        if self.verbose {
            if let Some(message) = message {
                println!("      {message}");
            }
        }
    }

    fn debug(&mut self, message: &str, level: UpdateLevel) {
        if self.verbose && level == UpdateLevel::Debug {
            eprintln!("{} -- {message}", Utc::now().format("%H:%M:%S"));
        }
    }

    fn report_error(&mut self, error: &TransferError, context: &ErrorContext) -> Disposition {
        eprintln!();
        eprintln!("error: {error}");
        eprintln!("  where: {context}");

        if self.assume_continue {
            eprintln!("  continuing (--yes)");
            return Disposition::Continue;
        }
        self.prompt_disposition()
    }
}
