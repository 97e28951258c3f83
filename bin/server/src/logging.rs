//! Logging (§4.13): dual-layer tracing setup, with a `DISPATCH_RAWLOG`
//! switch between human-readable and JSON formatting on the stderr layer.

use tracing_subscriber::prelude::*;

pub struct LogGuards {
    _file: tracing_appender::non_blocking::WorkerGuard,
    _stderr: tracing_appender::non_blocking::WorkerGuard,
}

pub fn init(log_dir: &std::path::Path, raw_log: bool) -> LogGuards {
    let (non_blocking_logfile, file_guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(log_dir, "dispatch.log"));
    let (non_blocking_stderr, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking_logfile)
        .with_ansi(false)
        .with_filter(tracing_subscriber::filter::LevelFilter::INFO);

    if raw_log {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(non_blocking_stderr)
                    .with_filter(tracing_subscriber::filter::LevelFilter::WARN),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .with_writer(non_blocking_stderr)
                    .with_ansi(true)
                    .with_filter(tracing_subscriber::filter::LevelFilter::WARN),
            )
            .init();
    }

    LogGuards {
        _file: file_guard,
        _stderr: stderr_guard,
    }
}
