//! Human-readable shutdown report.
//!
//! Styled the way the teacher's `status` command renders queue counts:
//! a bold header, a separator rule, and `console`-colored labels.

use std::collections::HashMap;

use console::style;

use crate::queue::Status;

/// Everything the shutdown report needs to know about how the run ended.
pub struct Summary {
    pub rows_produced: u64,
    pub final_counts: HashMap<Status, i64>,
    pub orphans_reset: usize,
    pub exit_code: i32,
}

/// Print the final summary to stdout.
pub fn print(summary: &Summary) {
    let separator = "─".repeat(50);

    println!();
    println!("{}", style("pipeline summary").bold());
    println!("{separator}");
    println!("  {:<18} {:>10}", "rows produced:", summary.rows_produced);

    for status in [Status::Pending, Status::Processing, Status::Done, Status::Failed] {
        let count = summary.final_counts.get(&status).copied().unwrap_or(0);
        println!("  {:<18} {:>10}", format!("{}:", status.as_str()), count);
    }

    let total: i64 = summary.final_counts.values().sum();
    println!("  {:<18} {:>10}", "total rows:", total);

    if summary.orphans_reset > 0 {
        println!(
            "  {} {} orphaned row(s) reset to pending at shutdown",
            style("!").yellow(),
            summary.orphans_reset
        );
    }

    let code_style = if summary.exit_code == 0 {
        style(summary.exit_code).green()
    } else {
        style(summary.exit_code).red()
    };
    println!("  {:<18} {:>10}", "exit code:", code_style);
    println!();
}
