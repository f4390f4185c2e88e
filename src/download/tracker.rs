use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::backoff::Backoff;
use super::record::{normalize_value, DownloadRecord};
use crate::bridge::{CommandBridge, EventBridge, EventHandler, ListenerId};
use crate::config::TrackerConfig;

/// Ordered view handed to the presentation layer, newest first.
pub type DownloadList = Arc<[DownloadRecord]>;

/// What the backend said about a pause/resume/cancel request. Informational
/// only: the tracked set changes through the event and poll channels alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    Accepted,
    Rejected,
    Failed,
}

#[derive(Default)]
struct TrackedSet {
    by_id: HashMap<String, DownloadRecord>,
    revision: u64,
}

struct Shared {
    set: Mutex<TrackedSet>,
    view: watch::Sender<DownloadList>,
}

impl Shared {
    fn lock_set(&self) -> MutexGuard<'_, TrackedSet> {
        self.set.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, set: &mut TrackedSet) {
        set.revision += 1;
        let mut ordered: Vec<DownloadRecord> = set.by_id.values().cloned().collect();
        ordered.sort_by(|a, b| b.sort_key().total_cmp(&a.sort_key()));
        self.view.send_replace(Arc::from(ordered));
    }

    /// Push path. Returns whether the tracked set changed.
    fn apply_update(&self, payload: &Value, token: Option<&CancellationToken>) -> bool {
        let Some(record) = normalize_value(payload) else {
            return false;
        };

        let mut set = self.lock_set();
        if token.is_some_and(|t| t.is_cancelled()) {
            return false;
        }

        if record.status.is_terminal() {
            if set.by_id.remove(&record.game_id).is_none() {
                return false;
            }
            log::info!(
                "Download {} ({}) is {}, no longer tracked",
                record.game_name,
                record.game_id,
                record.status
            );
        } else {
            if let Some(existing) = set.by_id.get(&record.game_id) {
                if existing.same_observable_state(&record) {
                    return false;
                }
            }
            set.by_id.insert(record.game_id.clone(), record);
        }

        self.publish(&mut set);
        true
    }

    /// Poll path: the snapshot becomes the whole tracked set.
    fn replace_snapshot(&self, items: &[Value], token: Option<&CancellationToken>) -> bool {
        let next: HashMap<String, DownloadRecord> = items
            .iter()
            .filter_map(normalize_value)
            .filter(|r| !r.status.is_terminal())
            .map(|r| (r.game_id.clone(), r))
            .collect();

        let mut set = self.lock_set();
        if token.is_some_and(|t| t.is_cancelled()) {
            return false;
        }
        if set.by_id == next {
            return false;
        }

        let dropped = set.by_id.keys().filter(|id| !next.contains_key(*id)).count();
        if dropped > 0 {
            log::debug!("Snapshot pruned {dropped} stale download(s)");
        }
        set.by_id = next;
        self.publish(&mut set);
        true
    }
}

struct Session {
    token: CancellationToken,
    listener: ListenerId,
}

/// Local mirror of the backend's active downloads.
///
/// Kept current by push events and by a polling loop that re-fetches the
/// full list, backing off while the backend is unreachable.
pub struct DownloadStateTracker {
    shared: Arc<Shared>,
    commands: Arc<dyn CommandBridge>,
    events: Arc<dyn EventBridge>,
    config: TrackerConfig,
    session: Mutex<Option<Session>>,
}

impl DownloadStateTracker {
    pub fn new(
        commands: Arc<dyn CommandBridge>,
        events: Arc<dyn EventBridge>,
        config: TrackerConfig,
    ) -> Self {
        let empty: DownloadList = Arc::from(Vec::new());
        let (view, _) = watch::channel(empty);
        Self {
            shared: Arc::new(Shared {
                set: Mutex::new(TrackedSet::default()),
                view,
            }),
            commands,
            events,
            config,
            session: Mutex::new(None),
        }
    }

    /// Subscribes to push events and starts polling. Must be called from
    /// within a tokio runtime.
    pub fn start(&self) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            log::warn!("Download tracker already running");
            return;
        }

        let token = CancellationToken::new();

        let handler: EventHandler = {
            let shared = self.shared.clone();
            let token = token.clone();
            Arc::new(move |payload: Value| {
                shared.apply_update(&payload, Some(&token));
            })
        };
        let listener = self.events.add_listener(&self.config.event_name, handler);

        tokio::spawn(poll_loop(
            self.shared.clone(),
            self.commands.clone(),
            self.config.clone(),
            token.clone(),
        ));

        log::info!("Download tracker started (event {})", self.config.event_name);
        *session = Some(Session { token, listener });
    }

    /// Stops polling and unregisters the push handler. Work still in flight
    /// is discarded instead of applied.
    pub fn stop(&self) {
        let Some(session) = self
            .session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return;
        };

        {
            // Cancel under the set lock so no mutation can straddle the stop.
            let _set = self.shared.lock_set();
            session.token.cancel();
        }
        self.events
            .remove_listener(&self.config.event_name, session.listener);
        log::info!("Download tracker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Applies one push payload directly. Returns whether anything changed.
    pub fn apply_update(&self, payload: &Value) -> bool {
        self.shared.apply_update(payload, None)
    }

    /// Replaces the tracked set with a full snapshot. Returns whether anything changed.
    pub fn replace_snapshot(&self, items: &[Value]) -> bool {
        self.shared.replace_snapshot(items, None)
    }

    pub fn downloads(&self) -> DownloadList {
        self.shared.view.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<DownloadList> {
        self.shared.view.subscribe()
    }

    /// Bumped once per mutation of the tracked set.
    pub fn revision(&self) -> u64 {
        self.shared.lock_set().revision
    }

    pub fn get(&self, game_id: &str) -> Option<DownloadRecord> {
        self.shared.lock_set().by_id.get(game_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.shared.lock_set().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub async fn pause(&self, game_id: &str) -> CommandOutcome {
        self.send_command(&self.config.commands.pause, "pause", game_id)
            .await
    }

    pub async fn resume(&self, game_id: &str) -> CommandOutcome {
        self.send_command(&self.config.commands.resume, "resume", game_id)
            .await
    }

    pub async fn cancel(&self, game_id: &str) -> CommandOutcome {
        self.send_command(&self.config.commands.cancel, "cancel", game_id)
            .await
    }

    async fn send_command(&self, command: &str, action: &str, game_id: &str) -> CommandOutcome {
        log::info!("Requesting {action} for download {game_id}");
        match self
            .commands
            .call(command, vec![Value::String(game_id.to_string())])
            .await
        {
            Ok(result) => {
                if result.get("success").and_then(Value::as_bool) == Some(false) {
                    log::warn!("Backend refused to {action} download {game_id}: {result}");
                    CommandOutcome::Rejected
                } else {
                    CommandOutcome::Accepted
                }
            }
            Err(e) => {
                log::error!("Failed to {action} download {game_id}: {e}");
                CommandOutcome::Failed
            }
        }
    }
}

impl Drop for DownloadStateTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn fetch_snapshot(commands: &dyn CommandBridge, command: &str) -> Result<Vec<Value>, String> {
    match commands.call(command, vec![]).await {
        Ok(Value::Array(items)) => Ok(items),
        Ok(other) => Err(format!("expected a list of downloads, got {other}")),
        Err(e) => Err(e.to_string()),
    }
}

/// One fetch in flight at most: the next one is only scheduled once the
/// previous one has settled.
async fn poll_loop(
    shared: Arc<Shared>,
    commands: Arc<dyn CommandBridge>,
    config: TrackerConfig,
    token: CancellationToken,
) {
    let mut backoff = Backoff::new(
        Duration::from_millis(config.initial_poll_ms),
        Duration::from_millis(config.max_poll_ms),
    );

    loop {
        let fetched = tokio::select! {
            _ = token.cancelled() => break,
            r = fetch_snapshot(commands.as_ref(), &config.commands.list) => r,
        };

        let delay = match fetched {
            Ok(items) => {
                shared.replace_snapshot(&items, Some(&token));
                backoff.on_success()
            }
            Err(e) => {
                let delay = backoff.on_failure();
                log::error!(
                    "Failed to fetch downloads: {e} (retrying in {}s)",
                    delay.as_secs()
                );
                delay
            }
        };

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }
    log::debug!("Download poll loop exited");
}
