//! SIGTERM/SIGINT handling (`spec.md` §5): a run checks a single flag at
//! the one choke point before committing a load package, rather than
//! aborting mid-write. Modeled on `crates/flow-worker/src/main.rs`'s
//! `register_signal_handlers`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};

/// Shared flag set by a caught signal and polled by the driver before each
/// commit. `Arc<AtomicBool>` rather than a channel: many commit sites only
/// ever need the latest value, never a queue of signal events.
pub type TermFlag = Arc<AtomicBool>;

pub fn register_signal_handlers(handle: tokio::runtime::Handle) -> anyhow::Result<TermFlag> {
    let flag = Arc::new(AtomicBool::new(false));

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let term_flag = flag.clone();
    handle.spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::warn!("received SIGTERM, will stop before the next load package commit");
            }
            _ = sigint.recv() => {
                tracing::warn!("received SIGINT, will stop before the next load package commit");
            }
        }
        term_flag.store(true, Ordering::SeqCst);
    });

    Ok(flag)
}

pub fn raise_if_signalled(flag: &TermFlag) -> Result<(), Terminated> {
    if flag.load(Ordering::SeqCst) {
        Err(Terminated)
    } else {
        Ok(())
    }
}

#[derive(thiserror::Error, Debug)]
#[error("run terminated by signal before committing the load package")]
pub struct Terminated;
