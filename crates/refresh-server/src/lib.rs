pub mod error;
pub mod routes;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use std::path::PathBuf;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use state::AppState;

/// How long shutdown waits for a run in flight. Covers the longest retry
/// chain of a multi-field run.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15 * 60);

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Automation control
        .route("/api/automation/start", post(routes::automation::start))
        .route("/api/automation/stop", post(routes::automation::stop))
        .route("/api/automation/run-now", post(routes::automation::run_now))
        .route("/api/automation/status", get(routes::automation::status))
        .route("/api/automation/logs", get(routes::automation::logs))
        // Profiles
        .route(
            "/api/profiles",
            get(routes::profiles::list_profiles).post(routes::profiles::create_profile),
        )
        .route(
            "/api/profiles/{id}",
            get(routes::profiles::get_profile)
                .patch(routes::profiles::update_profile)
                .delete(routes::profiles::delete_profile),
        )
        .route("/api/profiles/{id}/logs", get(routes::profiles::profile_logs))
        // Update logs
        .route("/api/update-logs", get(routes::update_logs::list_logs))
        .route("/api/update-logs/summary", get(routes::update_logs::summary))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Open the workspace at `root` and serve on `0.0.0.0:port`.
pub async fn serve(root: PathBuf, port: u16, start_scheduler: bool) -> anyhow::Result<()> {
    let app_state = AppState::open(root)?;
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    serve_on(app_state, listener, start_scheduler).await
}

/// Serve on a pre-bound listener.
///
/// Runs startup recovery first, so runs a crashed process left `Running`
/// are closed out before anything new is dispatched. The loop starts when
/// `start_scheduler` is set or the config asks for autostart. On Ctrl-C the
/// loop is asked to stop, in-flight HTTP requests drain, and the current run
/// is allowed to reach its logged terminal state before returning.
pub async fn serve_on(
    app_state: AppState,
    listener: tokio::net::TcpListener,
    start_scheduler: bool,
) -> anyhow::Result<()> {
    let recovered = {
        let recovery = app_state.clone();
        tokio::task::spawn_blocking(move || recovery.recover()).await??
    };
    if recovered > 0 {
        tracing::warn!(recovered, "closed out interrupted runs from a previous process");
    }

    if start_scheduler || app_state.config.scheduler.autostart {
        app_state.scheduler.start();
    }

    let actual_port = listener.local_addr()?.port();
    tracing::info!("refresh server listening on http://localhost:{actual_port}");

    let scheduler = app_state.scheduler.clone();
    let stopper = scheduler.clone();
    let app = build_router(app_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
            stopper.stop();
        })
        .await?;

    tracing::info!("waiting for the in-flight run and pending notifications");
    tokio::select! {
        drained = scheduler.drain(SHUTDOWN_GRACE) => {
            if !drained {
                tracing::warn!(
                    grace_secs = SHUTDOWN_GRACE.as_secs(),
                    "scheduler did not finish in time; the in-flight run will be recovered on next start"
                );
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("second interrupt; abandoning the in-flight run");
        }
    }
    Ok(())
}
