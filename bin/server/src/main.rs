//! Process entry point (§4.13): config load, logging, state construction,
//! router assembly. Fails fast on bad config, then hands off to a
//! graceful-shutdown serve loop.

use dispatch_server::{build_router, build_state, config, logging, CATALOGUE_ENDPOINT, TASK_SWEEP_PERIOD};

fn main() -> std::process::ExitCode {
    let config = match config::DispatchConfig::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("dispatch-server: {err}");
            return std::process::ExitCode::from(err.exit_code() as u8);
        }
    };

    let _log_guards = logging::init(&config.log_dir, config.raw_log);
    install_panic_hook();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .expect("failed to build tokio runtime");

    runtime.block_on(run(config));
    std::process::ExitCode::SUCCESS
}

async fn run(config: config::DispatchConfig) {
    let state = build_state(CATALOGUE_ENDPOINT, config.oauth_token);
    state.revstore.start_stream().await;
    state.deleted_revisions_tasks.spawn_periodic_sweep(TASK_SWEEP_PERIOD);
    state.largest_edits_tasks.spawn_periodic_sweep(TASK_SWEEP_PERIOD);
    state.search_talk_tasks.spawn_periodic_sweep(TASK_SWEEP_PERIOD);

    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind((std::net::Ipv4Addr::new(0, 0, 0, 0), config.port))
        .await
        .expect("failed to bind listener");
    tracing::info!(addr = ?listener.local_addr(), "dispatch-server listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(err) = serve.await {
        tracing::error!(error = %err, "server exited with error");
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// Routes uncaught panics through the tracing subscriber instead of the
/// default stderr message (§7); the Task Engine separately traps panics
/// inside spawned job bodies via `catch_unwind`, so this hook only ever
/// fires for panics outside that boundary.
fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        let location = info
            .location()
            .map(|l| l.to_string())
            .unwrap_or_else(|| "unknown location".to_string());
        tracing::error!(%location, "{info}");
    }));
}
