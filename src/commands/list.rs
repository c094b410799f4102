use anyhow::Result;

use crate::commands::{CommandContext, CommandReport};
use crate::story::store::TableStore;

fn or_dash(value: Option<String>) -> String {
    value.unwrap_or_else(|| "-".to_string())
}

pub fn run() -> Result<CommandReport> {
    let ctx = CommandContext::load()?;
    let mut report = CommandReport::new("list");
    let store = TableStore::new(&ctx.config.storage_file, ctx.config.store.clone());
    report.detail(format!("storage_file={}", store.path().display()));

    let table = match store.load() {
        Ok(table) => table,
        Err(err) => {
            report.issue(format!("load failed code={}: {err}", err.code().as_str()));
            return Ok(report);
        }
    };

    report.detail(format!("rows={}", table.len()));
    for (index, row) in table.rows().iter().enumerate() {
        report.detail(format!(
            "{index} slug={} category={} start_date={} mtime={} status={} last_commit={} path={}",
            or_dash(row.slug.clone()),
            row.category,
            or_dash(row.start_date.map(|d| d.to_string())),
            or_dash(row.mtime.map(|d| d.to_string())),
            or_dash(row.status.as_ref().map(|s| s.trim().to_string())),
            row.last_commit.trim(),
            row.path.display()
        ));
    }

    Ok(report)
}
