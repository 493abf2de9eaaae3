//! Configuration hot-reload watcher.
//!
//! ## Responsibility
//! Watch the governor policy file and broadcast validated new configs to
//! subscribers. Invalid reloads are logged and rejected; the policy in
//! force stays unchanged.
//!
//! ## Guarantees
//! - Only validated configs are broadcast
//! - File watching is debounced to avoid rapid re-reads on multi-write editors
//! - The background task exits once the watcher is dropped
//!
//! ## NOT Responsible For
//! - Rebuilding gates or trackers with the new policy (consumers decide)
//! - Initial config loading (that belongs to `loader`)

use std::path::PathBuf;
use std::sync::mpsc::TryRecvError;
use std::time::{Duration, Instant};

use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::broadcast;

use super::loader::load_from_file;
use super::validation::ConfigError;
use super::GovernorConfig;

const POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEBOUNCE: Duration = Duration::from_millis(500);

/// Watches a policy file and broadcasts validated updates.
///
/// Dropping the watcher stops file watching and ends the reload task.
///
/// # Panics
///
/// This type never panics.
pub struct ConfigWatcher {
    tx: broadcast::Sender<GovernorConfig>,
    _watcher: RecommendedWatcher,
}

impl ConfigWatcher {
    /// Start watching `path`.
    ///
    /// The initial config is **not** broadcast; use
    /// [`load_from_file`](super::load_from_file) for the first load. Must
    /// be called inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Watch`] if the OS watcher cannot be created or the
    /// parent directory cannot be watched.
    ///
    /// # Panics
    ///
    /// This function never panics.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use capability_governor::config::watcher::ConfigWatcher;
    /// use std::path::PathBuf;
    ///
    /// let (watcher, mut rx) = ConfigWatcher::new(PathBuf::from("governor.toml"))?;
    /// tokio::spawn(async move {
    ///     while let Ok(cfg) = rx.recv().await {
    ///         println!("ceiling now {}", cfg.gate.max_capability_gain_per_day);
    ///     }
    /// });
    /// ```
    pub fn new(path: PathBuf) -> Result<(Self, broadcast::Receiver<GovernorConfig>), ConfigError> {
        let (tx, rx) = broadcast::channel(8);
        let (notify_tx, notify_rx) = std::sync::mpsc::channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<notify::Event, notify::Error>| {
                if let Ok(event) = res {
                    let _ = notify_tx.send(event);
                }
            },
            notify::Config::default(),
        )
        .map_err(|e| ConfigError::Watch(format!("{}: {e}", path.display())))?;

        // Watch the directory so atomic rename-over saves are seen.
        let watch_dir = path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        watcher
            .watch(&watch_dir, RecursiveMode::NonRecursive)
            .map_err(|e| ConfigError::Watch(format!("{}: {e}", watch_dir.display())))?;

        let tx_task = tx.clone();
        tokio::spawn(async move {
            let mut last_reload: Option<Instant> = None;
            let mut pending = false;
            loop {
                tokio::time::sleep(POLL_INTERVAL).await;

                loop {
                    match notify_rx.try_recv() {
                        Ok(event) => {
                            if matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_))
                                && event.paths.iter().any(|p| p.file_name() == path.file_name())
                            {
                                pending = true;
                            }
                        }
                        Err(TryRecvError::Empty) => break,
                        Err(TryRecvError::Disconnected) => {
                            tracing::debug!(path = %path.display(), "config watcher stopped");
                            return;
                        }
                    }
                }

                // Changes inside the debounce window are deferred, not dropped.
                let debounced = last_reload.is_some_and(|t| t.elapsed() < DEBOUNCE);
                if !pending || debounced {
                    continue;
                }
                pending = false;
                last_reload = Some(Instant::now());
                match load_from_file(&path) {
                    Ok(cfg) => {
                        tracing::info!(
                            path = %path.display(),
                            ceiling = cfg.gate.max_capability_gain_per_day,
                            enforce = cfg.gate.enforce_gates,
                            "governor config reloaded"
                        );
                        let _ = tx_task.send(cfg);
                    }
                    Err(e) => {
                        tracing::warn!(
                            path = %path.display(),
                            error = %e,
                            "config reload rejected, keeping current policy"
                        );
                    }
                }
            }
        });

        Ok((Self { tx, _watcher: watcher }, rx))
    }

    /// Subscribe to config change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<GovernorConfig> {
        self.tx.subscribe()
    }
}
