use crate::cmd::open_store;
use crate::output::{fmt_time, print_json};
use refresh_core::ports::ProfileStore;
use refresh_core::profile::ProfileStatus;
use std::collections::BTreeMap;
use std::path::Path;

/// Store-side view: the scheduler itself lives in `refresh serve`.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let store = open_store(root)?;
    let profiles = store.list()?;
    let since = chrono::Utc::now() - chrono::Duration::days(7);
    let summary = store.summary(Some(since), 0)?;

    let mut by_status: BTreeMap<String, usize> = ProfileStatus::all()
        .iter()
        .map(|s| (s.to_string(), 0))
        .collect();
    for p in &profiles {
        *by_status.entry(p.status.to_string()).or_default() += 1;
    }
    let active = profiles.iter().filter(|p| p.is_active).count();
    let next_due = profiles
        .iter()
        .filter(|p| p.is_active)
        .filter_map(|p| p.next_run_at)
        .min();
    let running = profiles.iter().find(|p| p.status == ProfileStatus::Running);

    if json {
        return print_json(&serde_json::json!({
            "profiles": profiles.len(),
            "active": active,
            "status_counts": by_status,
            "currently_processing": running.map(|p| serde_json::json!({
                "profile_id": p.id,
                "username": p.username,
            })),
            "next_due": next_due,
            "last_7_days": summary,
        }));
    }

    println!("Profiles: {} ({} active)", profiles.len(), active);
    for (status, count) in &by_status {
        println!("  {status:<10} {count}");
    }
    if let Some(p) = running {
        println!("Running:  {} ({})", p.username, p.id);
    }
    println!("Next due: {}", fmt_time(next_due));
    println!(
        "Last 7 days: {} runs, {} success, {} no change, {} failure",
        summary.total, summary.success_count, summary.nochange_count, summary.failure_count
    );
    Ok(())
}
