//! Command handlers behind the `issue-scheduler` binary
//!
//! Each handler writes its report to `out` (plain text, or JSON with
//! `json = true`) and returns the process exit code. Errors are returned to
//! `main`, which prints them and exits with [`EXIT_ERROR`].

use crate::config::{ConfigManager, SchedulerConfig, SettingsFile};
use crate::conflicts::ResolutionStrategy;
use crate::file_storage::init_scheduler_dir;
use crate::graph::DependencyGraph;
use crate::models::{format_ids, BlockReason, IssueId, IssueStatus, Readiness};
use crate::progress::ClaimToken;
use crate::scheduler::{ClaimOutcome, Scheduler};
use anyhow::{anyhow, Context, Result};
use serde::Serialize;
use serde_json::json;
use std::io::Write;

pub const EXIT_OK: i32 = 0;
pub const EXIT_BLOCKED: i32 = 1;
pub const EXIT_ERROR: i32 = 2;

fn write_json<T: Serialize>(out: &mut dyn Write, value: &T) -> Result<()> {
    writeln!(out, "{}", serde_json::to_string_pretty(value)?)?;
    Ok(())
}

/// Whether an issue may start right now
pub fn check(
    scheduler: &Scheduler,
    issue: &IssueId,
    verbose: bool,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let readiness = scheduler.can_start(issue)?;
    let code = if readiness.is_ready() {
        EXIT_OK
    } else {
        EXIT_BLOCKED
    };

    if json {
        write_json(out, &json!({ "issue": issue, "readiness": readiness }))?;
        return Ok(code);
    }

    let record = scheduler.store().read(scheduler.graph(), issue)?;
    if verbose {
        let item = scheduler.graph().item(issue)?;
        writeln!(out, "Checking issue #{}", issue)?;
        writeln!(out, "  Title: {}", item.title)?;
        writeln!(out, "  Batch: {}", item.batch_id)?;
        writeln!(out, "  Current status: {}", record.status)?;
        writeln!(out, "  Hard dependencies: {}", format_ids(&item.depends_on))?;
        writeln!(out, "  Soft dependencies: {}", format_ids(&item.soft_depends_on))?;
        let blocks = match &item.blocks {
            Some(blocks) => blocks.clone(),
            None => scheduler
                .graph()
                .dependents(issue)
                .into_iter()
                .map(|dependent| dependent.id.clone())
                .collect(),
        };
        writeln!(out, "  Blocks: {}", format_ids(&blocks))?;
        writeln!(out, "  Conflicts with: {}", format_ids(&item.conflicts_with))?;
        let files: Vec<&str> = item.files.iter().map(String::as_str).collect();
        writeln!(out, "  Files: [{}]", files.join(", "))?;
        writeln!(out)?;
    }

    match &readiness {
        Readiness::Ready { warnings } => {
            writeln!(out, "✅ Issue {} can start", issue)?;
            if !warnings.is_empty() {
                writeln!(
                    out,
                    "⚠️  WARNING: Soft dependencies not complete: {}",
                    format_ids(warnings)
                )?;
            }
        }
        Readiness::Blocked { reasons } => {
            writeln!(out, "❌ Issue {} blocked: {}", issue, readiness.describe())?;
            if verbose {
                let missing = reasons.iter().flat_map(|reason| match reason {
                    BlockReason::MissingDeps { issues } => issues.as_slice(),
                    _ => &[],
                });
                for dep in missing {
                    let dep_record = scheduler.store().read(scheduler.graph(), dep)?;
                    writeln!(out, "\n   Blocking issue #{}:", dep)?;
                    writeln!(out, "     Status: {}", dep_record.status)?;
                    if let Some(result_ref) = &dep_record.result_ref {
                        writeln!(out, "     Result: {}", result_ref)?;
                    }
                }

                let conflicts = scheduler.detect_conflicts(issue)?;
                if !conflicts.is_empty() {
                    writeln!(
                        out,
                        "\n   Conflicts with {} in-progress issues:",
                        conflicts.len()
                    )?;
                    for conflict in &conflicts {
                        writeln!(out, "     #{}: {}", conflict.issue_id, conflict.reason())?;
                        if !conflict.files.is_empty() {
                            writeln!(out, "       Files: {}", conflict.files.join(", "))?;
                        }
                    }
                }
            }
        }
    }

    if record.status == IssueStatus::InProgress && record.claim_token.is_none() {
        writeln!(
            out,
            "⚠️  Issue {} was claimed without a token and cannot be completed; \
             reset it to pending in the progress file to claim it again",
            issue
        )?;
    }

    Ok(code)
}

/// Claim an issue and print its token
pub fn claim(scheduler: &Scheduler, issue: &IssueId, json: bool, out: &mut dyn Write) -> Result<i32> {
    let outcome = scheduler.claim(issue)?;

    if json {
        write_json(out, &json!({ "issue": issue, "claim": outcome }))?;
    } else {
        match &outcome {
            ClaimOutcome::Claimed { token, warnings } => {
                writeln!(out, "✅ Issue {} claimed", issue)?;
                writeln!(out, "Token: {}", token)?;
                if !warnings.is_empty() {
                    writeln!(
                        out,
                        "⚠️  WARNING: Soft dependencies not complete: {}",
                        format_ids(warnings)
                    )?;
                }
            }
            ClaimOutcome::Blocked { reasons } => {
                let readiness = Readiness::Blocked {
                    reasons: reasons.clone(),
                };
                writeln!(out, "❌ Issue {} blocked: {}", issue, readiness.describe())?;
            }
        }
    }

    Ok(match outcome {
        ClaimOutcome::Claimed { .. } => EXIT_OK,
        ClaimOutcome::Blocked { .. } => EXIT_BLOCKED,
    })
}

/// Mark a claimed issue complete and report what it unlocked
pub fn complete(
    scheduler: &Scheduler,
    issue: &IssueId,
    token: &ClaimToken,
    result_ref: Option<&str>,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let report = scheduler.mark_complete(issue, token, result_ref)?;
    let summary = scheduler.get_progress_summary()?;

    if json {
        write_json(out, &json!({ "completion": report, "summary": summary }))?;
        return Ok(EXIT_OK);
    }

    writeln!(out, "✅ Issue {} marked complete", issue)?;
    if let Some(result_ref) = &report.record.result_ref {
        writeln!(out, "   Result: {}", result_ref)?;
    }

    let batch = &report.batch;
    writeln!(
        out,
        "\nBatch {} ({}): {}/{} complete ({:.1}%)",
        batch.batch_id,
        batch.name,
        batch.completed_count,
        batch.total_count,
        batch.percentage()
    )?;
    if batch.is_complete {
        writeln!(out, "🎉 Batch {} complete", batch.batch_id)?;
    }
    for unlocked in &report.unlocked_batches {
        writeln!(out, "🚀 Batch {} is now ready", unlocked)?;
    }

    if report.newly_ready.is_empty() {
        writeln!(out, "\nNo issues newly unblocked")?;
    } else {
        writeln!(out, "\nNewly ready issues: {}", format_ids(&report.newly_ready))?;
    }

    writeln!(
        out,
        "\nOverall progress: {}/{} complete ({:.1}%)",
        summary.complete, summary.total, summary.completion_percentage
    )?;

    Ok(EXIT_OK)
}

/// Issues that may start now
pub fn ready(
    scheduler: &Scheduler,
    batch: Option<&str>,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let ready = scheduler.get_ready_issues(batch)?;

    if json {
        write_json(out, &json!({ "batch": batch, "ready": ready }))?;
        return Ok(EXIT_OK);
    }

    let scope = batch.map(|b| format!(" in batch {}", b)).unwrap_or_default();
    if ready.is_empty() {
        writeln!(out, "No issues ready to start{}", scope)?;
    } else {
        writeln!(out, "Ready to start{} ({}):", scope, ready.len())?;
        for id in &ready {
            let item = scheduler.graph().item(id)?;
            writeln!(out, "  #{} {} [{}]", id, item.title, item.batch_id)?;
        }
    }

    Ok(EXIT_OK)
}

/// Pending issues that cannot start, with reasons
pub fn blocked(scheduler: &Scheduler, json: bool, out: &mut dyn Write) -> Result<i32> {
    let blocked = scheduler.get_blocked_issues()?;

    if json {
        write_json(out, &blocked)?;
        return Ok(EXIT_OK);
    }

    if blocked.is_empty() {
        writeln!(out, "No blocked issues")?;
    } else {
        writeln!(out, "Blocked issues ({}):", blocked.len())?;
        for entry in &blocked {
            let readiness = Readiness::Blocked {
                reasons: entry.reasons.clone(),
            };
            writeln!(
                out,
                "  #{} [{}]: {}",
                entry.issue_id,
                entry.batch,
                readiness.describe()
            )?;
        }
    }

    Ok(EXIT_OK)
}

/// Conflicts between an issue and in-progress work
pub fn conflicts(
    scheduler: &Scheduler,
    issue: &IssueId,
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let conflicts = scheduler.detect_conflicts(issue)?;

    if json {
        write_json(out, &json!({ "issue": issue, "conflicts": conflicts }))?;
        return Ok(EXIT_OK);
    }

    if conflicts.is_empty() {
        writeln!(out, "No conflicts for issue #{}", issue)?;
    } else {
        writeln!(
            out,
            "Issue #{} conflicts with {} in-progress issues:",
            issue,
            conflicts.len()
        )?;
        for conflict in &conflicts {
            writeln!(out, "  #{}: {}", conflict.issue_id, conflict.reason())?;
            if !conflict.files.is_empty() {
                writeln!(out, "    Files: {}", conflict.files.join(", "))?;
            }
        }
    }

    Ok(EXIT_OK)
}

/// Order a group of conflicting issues
pub fn resolve(
    scheduler: &Scheduler,
    strategy: &str,
    issues: &[IssueId],
    json: bool,
    out: &mut dyn Write,
) -> Result<i32> {
    let strategy: ResolutionStrategy = strategy.parse()?;
    let resolution = scheduler.resolve_conflict(strategy, issues)?;

    if json {
        write_json(out, &resolution)?;
    } else {
        writeln!(out, "{}", resolution.message)?;
        for action in &resolution.actions {
            writeln!(out, "  {}. #{} ({})", action.position + 1, action.issue, action.action)?;
        }
    }

    Ok(EXIT_OK)
}

/// Overall and per-batch progress
pub fn progress(scheduler: &Scheduler, json: bool, out: &mut dyn Write) -> Result<i32> {
    let summary = scheduler.get_progress_summary()?;

    if json {
        write_json(out, &summary)?;
        return Ok(EXIT_OK);
    }

    writeln!(out, "Project: {}", summary.project)?;
    writeln!(
        out,
        "Progress: {}/{} complete ({:.1}%)",
        summary.complete, summary.total, summary.completion_percentage
    )?;
    writeln!(
        out,
        "  In progress: {}  Pending: {}  Blocked: {}",
        summary.in_progress, summary.pending, summary.blocked
    )?;
    writeln!(out, "\nBatches:")?;
    for batch in &summary.per_batch {
        writeln!(
            out,
            "  {} ({}): {}/{} complete, {} in progress, limit {} [{}]",
            batch.id,
            batch.name,
            batch.complete,
            batch.total,
            batch.in_progress,
            batch.parallel_limit,
            batch.status.as_str()
        )?;
    }

    Ok(EXIT_OK)
}

/// Load and validate the graph, printing warnings and statistics
pub fn validate(config: &SchedulerConfig, json: bool, out: &mut dyn Write) -> Result<i32> {
    let graph = DependencyGraph::load(&config.graph_path, config.default_parallel_limit)?;
    let stats = graph.stats();

    if json {
        write_json(
            out,
            &json!({
                "valid": true,
                "project": graph.project(),
                "warnings": graph.warnings(),
                "stats": stats,
            }),
        )?;
        return Ok(EXIT_OK);
    }

    writeln!(out, "✅ Dependency graph is valid: {:?}", config.graph_path)?;
    writeln!(out, "  Issues: {}", stats.total_nodes)?;
    writeln!(out, "  Batches: {}", stats.total_batches)?;
    writeln!(out, "  Dependencies: {}", stats.total_dependencies)?;
    writeln!(out, "  Max depth: {}", stats.max_depth)?;
    writeln!(out, "  Roots: {}", format_ids(&stats.root_nodes))?;
    writeln!(out, "  Leaves: {}", format_ids(&stats.leaf_nodes))?;
    for warning in graph.warnings() {
        writeln!(out, "⚠️  {}", warning)?;
    }

    Ok(EXIT_OK)
}

/// Topological execution order
pub fn order(scheduler: &Scheduler, json: bool, out: &mut dyn Write) -> Result<i32> {
    let order = scheduler.graph().execution_order();

    if json {
        write_json(out, &order)?;
    } else {
        for (position, id) in order.iter().enumerate() {
            let item = scheduler.graph().item(id)?;
            writeln!(out, "{:>3}. #{} {} [{}]", position + 1, id, item.title, item.batch_id)?;
        }
    }

    Ok(EXIT_OK)
}

/// Create `.scheduler/` and write pending records for every issue
pub fn init(config: &SchedulerConfig, json: bool, out: &mut dyn Write) -> Result<i32> {
    init_scheduler_dir(&config.project_root).map_err(|e| anyhow!(e))?;
    let scheduler = Scheduler::open(config)?;
    let progress = scheduler
        .store()
        .initialize(scheduler.graph())
        .with_context(|| format!("Failed to initialize {:?}", config.progress_path))?;

    // Pin the resolved paths so later runs agree without repeating overrides
    let settings = ConfigManager::new(&config.project_root);
    let wrote_settings = !settings.exists();
    if wrote_settings {
        settings
            .write(&SettingsFile::from_config(config))
            .map_err(|e| anyhow!(e))?;
    }

    if json {
        write_json(
            out,
            &json!({
                "progress_path": config.progress_path,
                "issues": progress.issues.len(),
                "revision": progress.revision,
                "settings_written": wrote_settings,
            }),
        )?;
    } else {
        writeln!(
            out,
            "✅ Progress initialized at {:?} ({} issues)",
            config.progress_path,
            progress.issues.len()
        )?;
        if wrote_settings {
            writeln!(out, "   Settings written to {:?}", settings.path())?;
        }
    }

    Ok(EXIT_OK)
}
