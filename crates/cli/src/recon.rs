//! `xrecon` commands: config-driven two-table reconciliation.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crossrecon::selector::{common_columns, CandidateRank};
use crossrecon::{KeyValidation, KeyValidator, ReconConfig, Reconciler, RunLog, SqliteStore};

use crate::exit_codes::{EXIT_APPROXIMATE, EXIT_CONFIG, EXIT_DIFFERENCES};
use crate::CliError;

fn load_config(path: &Path) -> Result<ReconConfig, CliError> {
    ReconConfig::from_path(path).map_err(|e| CliError::recon(&e).with_code(EXIT_CONFIG))
}

/// Dataset paths resolve against the config file's directory.
fn base_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    }
}

struct Staged {
    store: SqliteStore,
    left: crossrecon::DatasetHandle,
    right: crossrecon::DatasetHandle,
}

fn stage(config: &ReconConfig, base_dir: &Path, log: &RunLog) -> Result<Staged, CliError> {
    let store = SqliteStore::open_in_memory().map_err(|e| CliError::recon(&e.into()))?;
    let (left, right) =
        crossrecon_io::stage_pair(&store, config, base_dir, log).map_err(|e| CliError::recon(&e))?;
    Ok(Staged { store, left, right })
}

fn write_json(value: &serde_json::Value, json_output: bool, output_file: Option<&Path>) -> Result<(), CliError> {
    let json_str = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::runtime(format!("JSON serialization error: {e}")))?;

    if let Some(path) = output_file {
        std::fs::write(path, &json_str)
            .map_err(|e| CliError::runtime(format!("cannot write output: {e}")))?;
        eprintln!("wrote {}", path.display());
    }
    if json_output {
        println!("{json_str}");
    }
    Ok(())
}

// ============================================================================
// run
// ============================================================================

pub fn cmd_run(
    config_path: PathBuf,
    json_output: bool,
    output_file: Option<PathBuf>,
    out_dir: Option<PathBuf>,
) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let base = base_dir(&config_path);
    let log = RunLog::timestamped();
    let staged = stage(&config, &base, &log)?;

    let mut reconciler = Reconciler::new(&staged.store, &config, &log).with_base_dir(&base);
    if let Some(dir) = out_dir {
        reconciler = reconciler.with_output_dir(dir);
    }
    let outcome = reconciler
        .run_default(&staged.left, &staged.right)
        .map_err(|e| CliError::recon(&e))?;

    let value = serde_json::json!({
        "name": config.display_name(),
        "run_id": log.run_id(),
        "approximate": outcome.result.is_approximate(),
        "result": outcome.result,
        "key": outcome.key,
        "mapping": outcome.mapping,
        "output_dir": outcome.output_dir,
        "artifacts": outcome.artifacts,
    });
    write_json(&value, json_output, output_file.as_deref())?;

    // Human summary to stderr
    let r = &outcome.result;
    eprintln!(
        "{}: {} left rows, {} right rows; {} matched, {} only in left, {} only in right, {} with value differences ({}% match rate)",
        config.display_name(),
        r.left_rows,
        r.right_rows,
        r.matched,
        r.only_left,
        r.only_right,
        r.value_differences,
        r.metrics.match_rate,
    );
    eprintln!("key: {} ({})", r.key.label(), r.execution.mode);
    eprintln!("reports: {}", outcome.output_dir.display());

    if r.is_approximate() {
        return Err(CliError {
            code: EXIT_APPROXIMATE,
            message: format!(
                "{} chunk(s) failed; counts are lower bounds",
                r.execution.failed_chunks.len()
            ),
            hint: Some("rerun with -v to see the failing windows".into()),
        });
    }
    if r.has_differences() {
        return Err(CliError { code: EXIT_DIFFERENCES, message: "differences found".into(), hint: None });
    }
    Ok(())
}

// ============================================================================
// validate
// ============================================================================

pub fn cmd_validate(config_path: PathBuf) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let base = base_dir(&config_path);
    let left = config.left().resolve_path(&base);
    let right = config.right().resolve_path(&base);

    eprintln!("config ok: {}", config.display_name());
    eprintln!("  left:  {}", left.display());
    eprintln!("  right: {}", right.display());
    let keys = config.requested_keys();
    if keys.is_empty() {
        eprintln!("  keys:  (auto-detect)");
    } else {
        eprintln!("  keys:  {}", keys.join(", "));
    }
    Ok(())
}

// ============================================================================
// keys
// ============================================================================

#[derive(Serialize)]
struct KeyCandidateReport {
    left: String,
    right: String,
    rank: CandidateRank,
    left_validation: KeyValidation,
    right_validation: KeyValidation,
    unique_on_both: bool,
}

pub fn cmd_keys(config_path: PathBuf, json_output: bool) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let log = RunLog::timestamped();
    let staged = stage(&config, &base_dir(&config_path), &log)?;

    let reconciler = Reconciler::new(&staged.store, &config, &log);
    let mapping = reconciler
        .resolve_mapping(&staged.left, &staged.right)
        .map_err(|e| CliError::recon(&e))?;
    let candidates = common_columns(&staged.left, &staged.right, &mapping, &config.requested_keys());
    if candidates.is_empty() {
        return Err(CliError::recon(&crossrecon::ReconError::NoCommonColumns {
            left: staged.left.table.clone(),
            right: staged.right.table.clone(),
        }));
    }

    // Same validator the run uses, so both agree on what counts as unique.
    let validator = KeyValidator::new(&staged.store, &log);
    let mut report = Vec::with_capacity(candidates.len());
    for c in candidates {
        let left_validation = validator
            .validate_key(&staged.left.table, std::slice::from_ref(&c.left))
            .map_err(|e| CliError::recon(&e))?;
        let right_validation = validator
            .validate_key(&staged.right.table, std::slice::from_ref(&c.right))
            .map_err(|e| CliError::recon(&e))?;
        report.push(KeyCandidateReport {
            unique_on_both: left_validation.is_valid && right_validation.is_valid,
            left: c.left,
            right: c.right,
            rank: c.rank,
            left_validation,
            right_validation,
        });
    }

    if json_output {
        let value = serde_json::to_value(&report)
            .map_err(|e| CliError::runtime(format!("JSON serialization error: {e}")))?;
        return write_json(&value, true, None);
    }

    println!(
        "{:<24} {:<24} {:<10} {:>16} {:>16}  unique",
        "left", "right", "rank", "left distinct", "right distinct"
    );
    for k in &report {
        println!(
            "{:<24} {:<24} {:<10} {:>16} {:>16}  {}",
            k.left,
            k.right,
            rank_label(k.rank),
            format!("{}/{}", k.left_validation.unique_values, k.left_validation.total_rows),
            format!("{}/{}", k.right_validation.unique_values, k.right_validation.total_rows),
            if k.unique_on_both { "yes" } else { "no" },
        );
    }
    Ok(())
}

fn rank_label(rank: CandidateRank) -> &'static str {
    match rank {
        CandidateRank::Configured => "configured",
        CandidateRank::Identifier => "identifier",
        CandidateRank::Other => "other",
    }
}

// ============================================================================
// mapping
// ============================================================================

pub fn cmd_mapping(config_path: PathBuf, json_output: bool) -> Result<(), CliError> {
    let config = load_config(&config_path)?;
    let log = RunLog::timestamped();
    let staged = stage(&config, &base_dir(&config_path), &log)?;

    let mapping = Reconciler::new(&staged.store, &config, &log)
        .resolve_mapping(&staged.left, &staged.right)
        .map_err(|e| CliError::recon(&e))?;

    if json_output {
        let value = serde_json::to_value(&mapping)
            .map_err(|e| CliError::runtime(format!("JSON serialization error: {e}")))?;
        return write_json(&value, true, None);
    }

    println!("{:<24} {:<24} {:>10}  provenance", "right", "left", "confidence");
    for e in mapping.entries() {
        println!(
            "{:<24} {:<24} {:>10.2}  {}{}",
            e.right,
            e.left,
            e.confidence,
            e.provenance,
            if e.is_key { " (key)" } else { "" },
        );
    }
    if !mapping.rejected().is_empty() {
        eprintln!("{} proposal(s) lost arbitration:", mapping.rejected().len());
        for e in mapping.rejected() {
            eprintln!("  {} -> {} ({:.2}, {})", e.right, e.left, e.confidence, e.provenance);
        }
    }
    Ok(())
}
