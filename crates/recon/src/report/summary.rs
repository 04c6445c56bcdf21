//! Plain-text run summary.

use std::fmt::Write as _;

use crate::engine::ComparisonResult;

const RULE_WIDTH: usize = 70;

fn thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// Render `comparison_summary.txt`. `files` lists the produced report files.
pub fn render(title: &str, result: &ComparisonResult, files: &[String]) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let mut s = String::new();

    let _ = writeln!(s, "{heavy}");
    let _ = writeln!(s, "DATA COMPARISON SUMMARY REPORT");
    let _ = writeln!(s, "{heavy}");
    let _ = writeln!(s);
    let _ = writeln!(s, "Comparison:    {title}");
    let _ = writeln!(s, "Left Dataset:  {}", result.left_table);
    let _ = writeln!(s, "Right Dataset: {}", result.right_table);
    let _ = writeln!(s);
    let _ = writeln!(s, "Key Columns: {}", result.key.label());
    if result.key.left != result.key.right {
        let _ = writeln!(s, "Right Key:   {}", result.key.right.join(", "));
    }
    let _ = writeln!(s, "Value Columns Compared: {}", result.value_columns.len());
    let _ = writeln!(
        s,
        "Tolerance: {}  ignore_case: {}  ignore_spaces: {}",
        result.options.tolerance, result.options.ignore_case, result.options.ignore_spaces
    );
    let _ = writeln!(s);

    let _ = writeln!(s, "{light}");
    let _ = writeln!(s, "STATISTICS");
    let _ = writeln!(s, "{light}");
    let _ = writeln!(s);
    let _ = writeln!(s, "Total rows in left dataset:   {:>12}", thousands(result.left_rows));
    let _ = writeln!(s, "Total rows in right dataset:  {:>12}", thousands(result.right_rows));
    let _ = writeln!(s);
    let _ = writeln!(s, "Matched rows (same keys):     {:>12}", thousands(result.matched));
    let _ = writeln!(s, "Only in left dataset:         {:>12}", thousands(result.only_left));
    let _ = writeln!(s, "Only in right dataset:        {:>12}", thousands(result.only_right));
    let _ = writeln!(s, "Rows with value differences:  {:>12}", thousands(result.value_differences));
    let _ = writeln!(s);
    let m = &result.metrics;
    let _ = writeln!(s, "Match rate:       {:>7.2}% of unique records match on keys", m.match_rate);
    let _ = writeln!(s, "Left coverage:    {:>7.2}%", m.left_coverage);
    let _ = writeln!(s, "Right coverage:   {:>7.2}%", m.right_coverage);
    let _ = writeln!(s, "Difference rate:  {:>7.2}% of matched rows have differences", m.difference_rate);
    let _ = writeln!(s);

    if !result.column_differences.is_empty() {
        let _ = writeln!(s, "{light}");
        let _ = writeln!(s, "DIFFERENCES BY COLUMN");
        let _ = writeln!(s, "{light}");
        let _ = writeln!(s);
        let width = result
            .column_differences
            .iter()
            .map(|c| c.column.left.len())
            .max()
            .unwrap_or(0)
            .max("Column".len());
        let _ = writeln!(s, "{:<width$}  {:>12}  Note", "Column", "Differences");
        for c in &result.column_differences {
            let note = if result.entire_column_different(c) { "entire column differs" } else { "" };
            let _ = writeln!(s, "{:<width$}  {:>12}  {note}", c.column.left, thousands(c.differences));
        }
        let _ = writeln!(s);
    }

    let _ = writeln!(s, "{light}");
    let _ = writeln!(s, "EXECUTION");
    let _ = writeln!(s, "{light}");
    let _ = writeln!(s);
    let exec = &result.execution;
    let _ = writeln!(s, "Mode: {}", exec.mode);
    if let Some(size) = exec.chunk_size {
        let _ = writeln!(s, "Chunk size: {}  Chunks run: {}", thousands(size), thousands(exec.chunks));
    }
    if result.is_approximate() {
        let _ = writeln!(
            s,
            "WARNING: {} chunk(s) failed; counts are lower bounds.",
            exec.failed_chunks.len()
        );
        for f in &exec.failed_chunks {
            let _ = writeln!(s, "  {} chunk {} (offset {}): {}", f.operation, f.chunk, f.offset, f.error);
        }
    }
    let _ = writeln!(s);

    let _ = writeln!(s, "{heavy}");
    let _ = writeln!(s, "REPORT FILES GENERATED");
    let _ = writeln!(s, "{heavy}");
    let _ = writeln!(s);
    for (i, f) in files.iter().enumerate() {
        let _ = writeln!(s, "{}. {f}", i + 1);
    }
    let _ = writeln!(s);
    let _ = writeln!(s, "{heavy}");
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousands_separator() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
    }
}
