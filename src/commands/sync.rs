use anyhow::Result;

use crate::commands::{CommandContext, CommandReport};
use crate::story::audit;
use crate::story::reconcile::{PassOutcome, Reconciler};
use crate::story::trigger::report_outcome;
use crate::story::warn::{Notifier, Severity};

pub fn describe_outcome(report: &mut CommandReport, outcome: &PassOutcome) {
    report.detail(format!("storage_file={}", outcome.storage_path.display()));
    report.detail(format!("rows_loaded={}", outcome.rows_loaded));
    report.detail(format!("rows_saved={}", outcome.rows_saved));
    report.detail(format!("categories={}", outcome.scan.categories));
    report.detail(format!("stories={}", outcome.scan.stories));
    report.detail(format!("inserted={}", outcome.scan.inserted));
    report.detail(format!("updated={}", outcome.scan.updated));
    report.detail(format!("skipped={}", outcome.scan.skipped));
    report.detail(format!("pruned={}", outcome.pruned));
    report.detail(format!("bytes_written={}", outcome.bytes_written));
    report.detail(format!("save_attempts={}", outcome.save_attempts));
    report.detail(format!("healed={}", outcome.healed));
    for warning in &outcome.scan.warnings {
        report.detail(format!(
            "warning code={} path={} message={}",
            warning.code.as_str(),
            warning.path.display(),
            warning.message
        ));
    }
}

pub fn audit_outcome(ctx: &CommandContext, outcome: &PassOutcome) {
    let status = if outcome.scan.warnings.is_empty() {
        "ok"
    } else {
        "degraded"
    };
    let message = format!(
        "rows={} bytes={} inserted={} updated={} pruned={} warnings={} healed={}",
        outcome.rows_saved,
        outcome.bytes_written,
        outcome.scan.inserted,
        outcome.scan.updated,
        outcome.pruned,
        outcome.scan.warnings.len(),
        outcome.healed
    );
    if let Err(err) = audit::append_event(&ctx.config.audit_log, "pass", status, &message) {
        tracing::warn!(error = %err, "failed to append audit event");
    }
}

pub fn run() -> Result<CommandReport> {
    let ctx = CommandContext::load()?;
    let notifier = ctx.notifier();
    let mut report = CommandReport::new("sync");
    report.detail(format!("project_dir={}", ctx.config.project_dir.display()));

    let reconciler = Reconciler::new(&ctx.config);
    match reconciler.run_pass() {
        Ok(outcome) => {
            report_outcome(&notifier, &outcome);
            audit_outcome(&ctx, &outcome);
            describe_outcome(&mut report, &outcome);
        }
        Err(err) => {
            notifier.notify(Severity::Error, err.code().as_str(), &err.to_string());
            report.issue(format!("pass failed code={}: {err}", err.code().as_str()));
        }
    }

    Ok(report)
}
