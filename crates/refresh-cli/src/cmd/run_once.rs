use crate::output::print_json;
use refresh_server::state::AppState;
use std::path::Path;

/// One manual pass in the foreground. Exits non-zero when any run failed,
/// so cron can alert on it.
pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    let rt = tokio::runtime::Runtime::new()?;
    let summary = rt.block_on(async {
        let state = AppState::open(root.to_path_buf())?;
        state.run_once().await
    })?;

    if json {
        print_json(&summary)?;
    } else {
        println!(
            "Pass finished: {} dispatched, {} updated, {} unchanged, {} failed, {} skipped",
            summary.dispatched, summary.success, summary.no_change, summary.failure, summary.skipped
        );
    }

    if summary.failure > 0 {
        anyhow::bail!("{} profile run(s) failed; see `refresh logs --outcome failure`", summary.failure);
    }
    Ok(())
}
