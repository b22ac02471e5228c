use crate::Result;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Install a tracing subscriber for pipeline and step spans.
///
/// `log` records are forwarded into tracing, so this replaces the plain
/// logger for the rest of the process.
pub fn init_tracing(json_output: bool) -> Result<()> {
    // fails only when a logger is already installed; its records then stay out of traces
    let _ = tracing_log::LogTracer::init();

    let filter = EnvFilter::try_from_env("CIRUN_TRACE_FILTER")
        .unwrap_or_else(|_| EnvFilter::new("cirun=trace"));
    let result = if json_output {
        let json_layer = fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_current_span(true)
            .with_span_list(true)
            .with_span_events(fmt::format::FmtSpan::CLOSE);
        let subscriber = tracing_subscriber::registry().with(filter).with(json_layer);
        tracing::subscriber::set_global_default(subscriber)
    } else {
        let fmt_layer = fmt::layer()
            .with_target(false)
            .with_writer(std::io::stderr)
            .with_timer(fmt::time::uptime())
            .with_ansi(console::Term::stderr().features().colors_supported())
            .with_span_events(fmt::format::FmtSpan::CLOSE)
            .compact();
        let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
        tracing::subscriber::set_global_default(subscriber)
    };
    result.map_err(|e| eyre::eyre!("failed to initialize tracing subscriber: {e}"))
}
