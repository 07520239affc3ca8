//! Run summary
//!
//! Counts how every identifier of a run ended and prints the totals.

use serde::Serialize;

/// Outcome counts of one harvesting run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    /// Unique identifiers submitted
    pub total: usize,

    /// Records handed to the writer successfully
    pub written: usize,

    pub not_found: usize,

    /// Identifiers that ran out of session rotations
    pub blocked: usize,

    /// Identifiers that ran out of transient retries
    pub transient: usize,

    /// Identifiers never admitted, stopped, or aborted after the stop signal
    pub cancelled: usize,

    pub write_failures: usize,

    /// Concurrency ceiling when the run ended
    pub final_ceiling: usize,

    pub sessions_retired: usize,
}

impl RunSummary {
    /// Identifiers that did not produce a record
    pub fn failed(&self) -> usize {
        self.not_found + self.blocked + self.transient + self.write_failures
    }

    /// Whether every identifier has been accounted for
    pub fn is_complete(&self) -> bool {
        self.written + self.failed() + self.cancelled == self.total
    }
}

/// Prints the summary to stdout
///
/// # Arguments
///
/// * `summary` - The summary to display
pub fn print_summary(summary: &RunSummary) {
    println!("=== Harvest Summary ===\n");

    println!("Overview:");
    println!("  Identifiers: {}", summary.total);
    println!("  Records written: {}", summary.written);
    println!();

    if summary.failed() > 0 || summary.cancelled > 0 {
        println!("Failures:");
        println!("  Not found: {}", summary.not_found);
        println!("  Blocked: {}", summary.blocked);
        println!("  Transient: {}", summary.transient);
        println!("  Write failures: {}", summary.write_failures);
        println!("  Cancelled: {}", summary.cancelled);
        println!();
    }

    println!("Adaptation:");
    println!("  Final concurrency ceiling: {}", summary.final_ceiling);
    println!("  Sessions retired: {}", summary.sessions_retired);
    println!();

    let success_rate = if summary.total > 0 {
        (summary.written as f64 / summary.total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} identifiers written)",
        success_rate, summary.written, summary.total
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_accounting() {
        let summary = RunSummary {
            total: 6,
            written: 2,
            not_found: 1,
            blocked: 1,
            transient: 1,
            cancelled: 1,
            write_failures: 0,
            final_ceiling: 9,
            sessions_retired: 2,
        };

        assert_eq!(summary.failed(), 3);
        assert!(summary.is_complete());
    }

    #[test]
    fn test_default_is_complete() {
        assert!(RunSummary::default().is_complete());
    }
}
