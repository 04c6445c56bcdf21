//! Value comparison cascade.
//!
//! Each matched row pair is compared column by column. A value goes through an
//! ordered list of typed parsers (numeric, temporal, boolean); the first branch
//! where both sides parse decides. Values no parser accepts fall back to a
//! normalized string comparison.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompareOptions {
    /// Absolute tolerance for numeric values. Zero means exact equality.
    pub tolerance: f64,
    pub ignore_case: bool,
    /// Collapse internal whitespace runs before comparing strings.
    pub ignore_spaces: bool,
}

impl Default for CompareOptions {
    fn default() -> Self {
        Self {
            tolerance: 0.01,
            ignore_case: true,
            ignore_spaces: true,
        }
    }
}

impl CompareOptions {
    /// Pack the boolean options for transport through SQL.
    pub fn flags(&self) -> i64 {
        (self.ignore_case as i64) | ((self.ignore_spaces as i64) << 1)
    }

    pub fn from_flags(tolerance: f64, flags: i64) -> Self {
        Self {
            tolerance,
            ignore_case: flags & 1 != 0,
            ignore_spaces: flags & 2 != 0,
        }
    }
}

/// Which cascade branch decided a comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Null,
    Numeric,
    Temporal,
    Boolean,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub branch: Branch,
    pub differs: bool,
}

/// Classification of a single differing cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DifferenceKind {
    MissingInLeft,
    MissingInRight,
    DifferentValues,
}

impl DifferenceKind {
    pub fn label(&self) -> &'static str {
        match self {
            Self::MissingInLeft => "Missing in Left",
            Self::MissingInRight => "Missing in Right",
            Self::DifferentValues => "Different Values",
        }
    }

    pub fn classify(left: Option<&str>, right: Option<&str>) -> Self {
        match (non_blank(left), non_blank(right)) {
            (None, Some(_)) => Self::MissingInLeft,
            (Some(_), None) => Self::MissingInRight,
            _ => Self::DifferentValues,
        }
    }
}

impl std::fmt::Display for DifferenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Cascade
// ---------------------------------------------------------------------------

struct Step {
    branch: Branch,
    attempt: fn(&str, &str, &CompareOptions) -> Option<bool>,
}

const CASCADE: &[Step] = &[
    Step { branch: Branch::Numeric, attempt: numeric_differs },
    Step { branch: Branch::Temporal, attempt: temporal_differs },
    Step { branch: Branch::Boolean, attempt: boolean_differs },
];

/// Compare two cell values. `None` and whitespace-only values are null.
pub fn compare_values(left: Option<&str>, right: Option<&str>, opts: &CompareOptions) -> Outcome {
    let (l, r) = match (non_blank(left), non_blank(right)) {
        (None, None) => return Outcome { branch: Branch::Null, differs: false },
        (Some(_), None) | (None, Some(_)) => return Outcome { branch: Branch::Null, differs: true },
        (Some(l), Some(r)) => (l, r),
    };

    for step in CASCADE {
        if let Some(differs) = (step.attempt)(l, r, opts) {
            return Outcome { branch: step.branch, differs };
        }
    }

    Outcome {
        branch: Branch::Text,
        differs: normalize_text(l, opts) != normalize_text(r, opts),
    }
}

/// Shorthand for [`compare_values`] when only the verdict matters.
pub fn values_differ(left: Option<&str>, right: Option<&str>, opts: &CompareOptions) -> bool {
    compare_values(left, right, opts).differs
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn both<T>(left: &str, right: &str, parse: fn(&str) -> Option<T>) -> Option<(T, T)> {
    Some((parse(left)?, parse(right)?))
}

fn numeric_differs(left: &str, right: &str, opts: &CompareOptions) -> Option<bool> {
    let (l, r) = both(left, right, parse_number)?;
    Some(!numbers_equal(l, r, opts.tolerance))
}

fn temporal_differs(left: &str, right: &str, _opts: &CompareOptions) -> Option<bool> {
    let (l, r) = both(left, right, parse_instant)?;
    Some(l != r)
}

fn boolean_differs(left: &str, right: &str, _opts: &CompareOptions) -> Option<bool> {
    // "1" vs "true" must reach the string branch and differ there.
    if parse_number(left).is_some() || parse_number(right).is_some() {
        return None;
    }
    let (l, r) = both(left, right, parse_bool)?;
    Some(l != r)
}

fn numbers_equal(l: f64, r: f64, tolerance: f64) -> bool {
    if tolerance <= 0.0 {
        return l == r;
    }
    let delta = (l - r).abs();
    // Epsilon-inclusive so a tolerance of 0.01 accepts 100.00 vs 100.01.
    let scale = 1.0_f64.max(l.abs()).max(r.abs()).max(delta).max(tolerance);
    let eps = f64::EPSILON * 16.0 * scale;
    delta <= tolerance + eps
}

// ---------------------------------------------------------------------------
// Typed parsers
// ---------------------------------------------------------------------------

const CURRENCY_SYMBOLS: &[char] = &['$', '€', '£', '¥'];

/// Parse a number written the way spreadsheets and ledgers print them.
///
/// Strips currency symbols, thousands separators and surrounding whitespace;
/// `(123.45)` is negative. Anything else left over means "not a number".
pub fn parse_number(s: &str) -> Option<f64> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return None;
    }

    let (is_negative, inner) = if trimmed.starts_with('(') && trimmed.ends_with(')') {
        (true, &trimmed[1..trimmed.len() - 1])
    } else {
        (false, trimmed)
    };

    let cleaned: String = inner
        .chars()
        .filter(|c| !CURRENCY_SYMBOLS.contains(c) && *c != ',' && !c.is_whitespace())
        .collect();

    if cleaned.is_empty() {
        return None;
    }

    let mut saw_digit = false;
    for (i, c) in cleaned.chars().enumerate() {
        match c {
            '0'..='9' => saw_digit = true,
            '.' => {}
            '-' | '+' if i == 0 && !is_negative => {}
            _ => return None,
        }
    }
    if !saw_digit {
        return None;
    }

    let value: f64 = cleaned.parse().ok()?;
    Some(if is_negative { -value } else { value })
}

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M:%S %p",
    "%m/%d/%Y %I:%M %p",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y/%m/%d %H:%M:%S",
];

const DATE_FORMATS: &[&str] = &["%m/%d/%Y", "%d/%m/%Y", "%Y-%m-%d", "%m-%d-%Y", "%Y/%m/%d"];

/// Parse a date or timestamp into a naive instant. A bare date is midnight.
///
/// Offsets are honored by converting to UTC. Month-first wins over day-first
/// when both readings are valid.
pub fn parse_instant(s: &str) -> Option<NaiveDateTime> {
    let trimmed = s.trim();
    // Cheap reject: every supported format starts with a digit and has a separator.
    if !trimmed.starts_with(|c: char| c.is_ascii_digit()) || !trimmed.contains(|c: char| c == '-' || c == '/') {
        return None;
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.naive_utc());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt);
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(trimmed, fmt) {
            return Some(d.and_time(NaiveTime::MIN));
        }
    }
    None
}

/// Parse the boolean spellings `true/false/t/f/yes/no`, case-insensitively.
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" => Some(true),
        "false" | "f" | "no" => Some(false),
        _ => None,
    }
}

fn is_quote(c: char) -> bool {
    c == '"' || c == '\''
}

/// Fold characters that render alike but compare unequal: NFC composition,
/// invisible characters dropped, space, quote and dash variants to ASCII.
fn fold_lookalikes(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.nfc().peekable();
    while let Some(c) = chars.next() {
        match c {
            // zero-width space/non-joiner/joiner, BOM, soft hyphen
            '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}' | '\u{00AD}' => {}
            '\u{00A0}' | '\u{2007}' | '\u{2009}' | '\u{200A}' | '\u{202F}' => out.push(' '),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{00AB}' | '\u{00BB}' => out.push('"'),
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '`' | '\u{00B4}' => out.push('\''),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2014}' | '\u{2212}' => out.push('-'),
            '\r' => {
                if chars.peek() != Some(&'\n') {
                    out.push('\n');
                }
            }
            other => out.push(other),
        }
    }
    out
}

fn normalize_text(s: &str, opts: &CompareOptions) -> String {
    let folded = fold_lookalikes(s);
    let trimmed = folded.trim();
    let unquoted = trimmed.strip_prefix(is_quote).unwrap_or(trimmed);
    let unquoted = unquoted.strip_suffix(is_quote).unwrap_or(unquoted).trim();

    let mut out = if opts.ignore_spaces {
        unquoted.split_whitespace().collect::<Vec<_>>().join(" ")
    } else {
        unquoted.to_string()
    };
    if opts.ignore_case {
        out = out.to_lowercase();
    }
    out
}
