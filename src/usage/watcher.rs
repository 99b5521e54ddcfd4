//! Debounced file change notifications

use std::path::Path;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::{Duration, Instant};

use log::{debug, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::usage::config::LOG_FILE_EXTENSION;
use crate::usage::error::Result;

/// Invoked once per quiet period after log files change
pub type ChangeCallback = Box<dyn Fn() + Send + Sync + 'static>;

/// Keeps a watch alive; dropping it stops notifications
pub struct WatchHandle {
    _guard: Box<dyn Send>,
}

impl WatchHandle {
    pub fn new(guard: impl Send + 'static) -> Self {
        Self {
            _guard: Box::new(guard),
        }
    }
}

impl std::fmt::Debug for WatchHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchHandle")
    }
}

/// Reports changes to log files anywhere under a directory tree
pub trait ChangeNotifier {
    /// Call `callback` at most once per `debounce` window while log files
    /// under `root` keep changing
    fn watch(&self, root: &Path, debounce: Duration, callback: ChangeCallback) -> Result<WatchHandle>;
}

/// File system backed notifier
#[derive(Debug, Default, Clone, Copy)]
pub struct FsChangeNotifier;

fn is_log_change(event: &Event) -> bool {
    if matches!(event.kind, EventKind::Access(_)) {
        return false;
    }
    event
        .paths
        .iter()
        .any(|p| p.extension().and_then(|e| e.to_str()) == Some(LOG_FILE_EXTENSION))
}

/// How many debounce windows a continuous stream of changes may defer the callback
pub const MAX_WAIT_WINDOWS: u32 = 3;

/// Coalesce bursts from `rx` into one callback after `debounce` of silence
///
/// A stream that never goes quiet still fires once `max_wait` has passed
/// since the first change of the burst. Returns once the sending side is gone.
pub fn debounce_loop(
    rx: Receiver<()>,
    debounce: Duration,
    max_wait: Duration,
    callback: ChangeCallback,
) {
    while rx.recv().is_ok() {
        let flush_at = Instant::now().checked_add(max_wait);
        loop {
            let wait = match flush_at {
                Some(flush_at) => {
                    let now = Instant::now();
                    if now >= flush_at {
                        break;
                    }
                    debounce.min(flush_at - now)
                }
                None => debounce,
            };
            match rx.recv_timeout(wait) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Timeout) => break,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }
        callback();
    }
}

impl ChangeNotifier for FsChangeNotifier {
    fn watch(&self, root: &Path, debounce: Duration, callback: ChangeCallback) -> Result<WatchHandle> {
        let (tx, rx) = channel();

        let mut watcher: RecommendedWatcher =
            notify::recommended_watcher(move |res: notify::Result<Event>| match res {
                Ok(event) if is_log_change(&event) => {
                    let _ = tx.send(());
                }
                Ok(_) => {}
                Err(e) => warn!("File watcher error: {}", e),
            })?;
        watcher.watch(root, RecursiveMode::Recursive)?;

        std::thread::Builder::new()
            .name("usage-watch-debounce".to_string())
            .spawn(move || {
                debounce_loop(rx, debounce, debounce.saturating_mul(MAX_WAIT_WINDOWS), callback)
            })?;

        debug!("Watching {:?} with {:?} debounce", root, debounce);
        Ok(WatchHandle::new(watcher))
    }
}
