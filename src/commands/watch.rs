use anyhow::Result;
use std::thread;

use crate::commands::sync::{audit_outcome, describe_outcome};
use crate::commands::{CommandContext, CommandReport};
use crate::story::reconcile::Reconciler;
use crate::story::trigger::{ChangeFilter, PassQueue, run_worker};
use crate::story::warn::{Notifier, Severity};
use crate::story::watcher::run_event_loop;

pub fn run(once: bool) -> Result<CommandReport> {
    let ctx = CommandContext::load()?;
    let notifier = ctx.notifier();
    let mut report = CommandReport::new("watch");
    report.detail(format!("project_dir={}", ctx.config.project_dir.display()));
    report.detail(format!("storage_file={}", ctx.config.storage_file.display()));

    let reconciler = Reconciler::new(&ctx.config);
    let filter = ChangeFilter::new(&ctx.config.storage_file);
    let debounce = ctx.config.watcher.debounce();
    let queue = PassQueue::new();
    queue.request();

    if once {
        report.detail("mode=once");
        let mut failure = None;
        // A fatal error is also recorded in `failure`.
        let _ = run_worker(&queue, &notifier, || {
            let result = reconciler.run_pass();
            queue.shutdown();
            match result {
                Ok(outcome) => {
                    audit_outcome(&ctx, &outcome);
                    describe_outcome(&mut report, &outcome);
                    Ok(outcome)
                }
                Err(err) => {
                    failure = Some(format!("pass failed code={}: {err}", err.code().as_str()));
                    Err(err)
                }
            }
        });
        if let Some(issue) = failure {
            report.issue(issue);
        }
        return Ok(report);
    }

    let (worker_result, loop_result) = thread::scope(|scope| {
        let worker = scope.spawn(|| {
            run_worker(&queue, &notifier, || {
                let outcome = reconciler.run_pass()?;
                audit_outcome(&ctx, &outcome);
                Ok(outcome)
            })
        });
        let loop_result = run_event_loop(&ctx.config.project_dir, &filter, debounce, &queue);
        queue.shutdown();
        (worker.join(), loop_result)
    });

    let stats = queue.stats();
    report.detail(format!("passes_requested={}", stats.requested));
    report.detail(format!("passes_coalesced={}", stats.coalesced));
    report.detail(format!("last_phase={:?}", reconciler.phase()));

    match worker_result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            report.issue(format!("watch stopped code={}: {err}", err.code().as_str()));
        }
        Err(_) => report.issue("pass worker panicked"),
    }
    if let Err(err) = loop_result {
        notifier.notify(Severity::Error, err.code().as_str(), &err.to_string());
        report.issue(format!("watch stopped code={}: {err}", err.code().as_str()));
    }

    Ok(report)
}
