use crate::cmd::open_store;
use crate::output::{fmt_time, print_json, print_table, truncate};
use refresh_core::store::LogQuery;
use refresh_core::update_log::Outcome;
use std::path::Path;

pub fn run(
    root: &Path,
    profile: Option<&str>,
    outcome: Option<&str>,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let outcome = outcome.map(str::parse::<Outcome>).transpose()?;
    let store = open_store(root)?;
    let profile_id = match profile {
        Some(reference) => Some(store.resolve(reference)?.id),
        None => None,
    };
    let logs = store.query_logs(&LogQuery {
        profile_id,
        outcome,
        since: None,
        limit: Some(limit),
    })?;

    if json {
        return print_json(&logs);
    }
    if logs.is_empty() {
        println!("No update logs.");
        return Ok(());
    }
    let rows: Vec<Vec<String>> = logs
        .iter()
        .map(|l| {
            vec![
                fmt_time(Some(l.executed_at)),
                l.username.clone(),
                l.outcome.to_string(),
                format!("{:.1}s", l.duration_ms as f64 / 1000.0),
                truncate(&l.detail, 60),
            ]
        })
        .collect();
    print_table(&["EXECUTED", "PROFILE", "OUTCOME", "TOOK", "DETAIL"], &rows);
    Ok(())
}
