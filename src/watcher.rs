use std::future::Future;
use std::io;

use tokio::signal;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::EXIT_INTERRUPTED;

/// Trips `cancel` on SIGINT or SIGTERM. A second Ctrl-C exits right away.
pub fn watch_for_signals(cancel: CancellationToken) -> JoinHandle<()> {
    watch(cancel, async {
        let name = interrupt().await?;
        tokio::spawn(async move {
            // exit immediately on second ctrl-c
            if signal::ctrl_c().await.is_ok() {
                std::process::exit(EXIT_INTERRUPTED);
            }
        });
        Ok::<_, io::Error>(name)
    })
}

/// Trips `cancel` once `signal` resolves. The task ends early if the token
/// is cancelled some other way, and never trips it if the signal source
/// fails.
pub fn watch<F>(cancel: CancellationToken, signal: F) -> JoinHandle<()>
where
    F: Future<Output = io::Result<&'static str>> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            res = signal => match res {
                Ok(name) => {
                    warn!("received {name}, stopping");
                    cancel.cancel();
                }
                Err(err) => warn!("failed to watch for signals: {err}"),
            },
            _ = cancel.cancelled() => trace!("signal watcher done"),
        }
    })
}

#[cfg(unix)]
async fn interrupt() -> io::Result<&'static str> {
    use tokio::signal::unix::SignalKind;

    let mut term = signal::unix::signal(SignalKind::terminate())?;
    tokio::select! {
        res = signal::ctrl_c() => res.map(|()| "SIGINT"),
        _ = term.recv() => Ok("SIGTERM"),
    }
}

#[cfg(not(unix))]
async fn interrupt() -> io::Result<&'static str> {
    signal::ctrl_c().await.map(|()| "ctrl-c")
}
