//! Supervised thread spawning
//!
//! Worker bodies run under `catch_unwind`; whatever happens, the worker's
//! terminal outcome is sent to its supervisor over a channel. The supervisor
//! decides whether to respawn, so a crash is an ordinary message instead of
//! unwinding through the scheduler.

use crossbeam_channel::Sender;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

/// Terminal outcome of a supervised worker thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerExit {
    pub id: usize,
    /// Generation the thread was started with; stale exits are ignored
    pub generation: u64,
    /// `Err` carries the panic message
    pub outcome: Result<(), String>,
}

impl WorkerExit {
    #[must_use]
    pub fn crashed(&self) -> bool {
        self.outcome.is_err()
    }
}

/// Spawn a named thread whose exit is always reported on `exits`.
///
/// # Errors
///
/// Returns the OS error if the thread could not be created.
pub fn spawn_supervised<F>(
    name: String,
    id: usize,
    generation: u64,
    exits: Sender<WorkerExit>,
    body: F,
) -> std::io::Result<JoinHandle<()>>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new().name(name).spawn(move || {
        let outcome = panic::catch_unwind(AssertUnwindSafe(body)).map_err(|p| panic_message(&*p));
        // The supervisor may already be gone during shutdown
        let _ = exits.send(WorkerExit {
            id,
            generation,
            outcome,
        });
    })
}

#[must_use]
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_clean_exit_and_panic() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let ok = spawn_supervised("ok".into(), 0, 1, tx.clone(), || {})
            .expect("thread should spawn");
        let bad = spawn_supervised("bad".into(), 1, 7, tx, || panic!("boom"))
            .expect("thread should spawn");
        ok.join().expect("supervised thread never unwinds");
        bad.join().expect("supervised thread never unwinds");

        let mut exits: Vec<WorkerExit> = rx.iter().collect();
        exits.sort_by_key(|e| e.id);
        assert_eq!(exits[0].outcome, Ok(()));
        assert_eq!(exits[1].generation, 7);
        assert_eq!(exits[1].outcome, Err("boom".to_string()));
        assert!(exits[1].crashed());
    }
}
