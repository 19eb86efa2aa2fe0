pub mod automation;
pub mod events;
pub mod health;
pub mod profiles;
pub mod update_logs;

/// Clamp a `?limit=` query value into `1..=max`, defaulting to `default`.
pub(crate) fn clamp_limit(limit: Option<usize>, default: usize, max: usize) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}
