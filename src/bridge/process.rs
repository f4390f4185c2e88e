use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

use super::{BridgeError, CommandBridge, EventBridge, EventHandler, ListenerId};
use crate::config::BackendConfig;

type PendingReply = oneshot::Sender<Result<Value, BridgeError>>;

/// Outgoing request line.
#[derive(Debug, Serialize)]
struct Request<'a> {
    id: u64,
    command: &'a str,
    args: Vec<Value>,
}

/// One line written by the backend on stdout.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum BackendMessage {
    Response {
        id: u64,
        #[serde(default)]
        result: Value,
        #[serde(default)]
        error: Option<String>,
    },
    Event {
        event: String,
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Default)]
struct Shared {
    next_request: AtomicU64,
    next_listener: AtomicU64,
    closed: AtomicBool,
    pending: Mutex<HashMap<u64, PendingReply>>,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, EventHandler)>>>,
}

impl Shared {
    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        let msg = match serde_json::from_str::<BackendMessage>(line) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("Skipping unreadable backend line ({e}): {line}");
                return;
            }
        };

        match msg {
            BackendMessage::Response { id, result, error } => {
                let reply = match self.pending.lock() {
                    Ok(mut map) => map.remove(&id),
                    Err(_) => None,
                };
                let Some(reply) = reply else {
                    log::debug!("Dropping response for unknown request id={id}");
                    return;
                };
                let outcome = match error {
                    Some(message) => Err(BridgeError::Remote(message)),
                    None => Ok(result),
                };
                // The caller may have timed out already.
                let _ = reply.send(outcome);
            }
            BackendMessage::Event { event, payload } => {
                let handlers: Vec<EventHandler> = match self.listeners.lock() {
                    Ok(map) => map
                        .get(&event)
                        .map(|l| l.iter().map(|(_, h)| h.clone()).collect())
                        .unwrap_or_default(),
                    Err(_) => Vec::new(),
                };
                for handler in handlers {
                    handler(payload.clone());
                }
            }
        }
    }

    fn register(&self, id: u64, reply: PendingReply) -> Result<(), BridgeError> {
        let mut map = self.pending.lock().map_err(|_| BridgeError::Closed)?;
        if self.closed.load(Ordering::SeqCst) {
            return Err(BridgeError::Closed);
        }
        map.insert(id, reply);
        Ok(())
    }

    fn forget(&self, id: u64) {
        if let Ok(mut map) = self.pending.lock() {
            map.remove(&id);
        }
    }

    /// Marks the connection dead and fails every waiting call.
    fn close(&self) {
        let drained: Vec<PendingReply> = match self.pending.lock() {
            Ok(mut map) => {
                self.closed.store(true, Ordering::SeqCst);
                map.drain().map(|(_, reply)| reply).collect()
            }
            Err(_) => {
                self.closed.store(true, Ordering::SeqCst);
                Vec::new()
            }
        };
        for reply in drained {
            let _ = reply.send(Err(BridgeError::Closed));
        }
    }
}

/// Backend reached over the stdio of a child process, one JSON object per line.
pub struct ProcessBridge {
    shared: Arc<Shared>,
    outbox: mpsc::UnboundedSender<String>,
    child: Mutex<Option<Child>>,
    timeout: Duration,
}

impl ProcessBridge {
    pub fn spawn(config: &BackendConfig) -> Result<Self, BridgeError> {
        if config.program.trim().is_empty() {
            return Err(BridgeError::Spawn("no backend program configured".to_string()));
        }

        let mut cmd = Command::new(&config.program);
        cmd.args(&config.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = config.working_dir.as_ref() {
            cmd.current_dir(dir);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| BridgeError::Spawn(format!("{}: {e}", config.program)))?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| BridgeError::Spawn("failed to capture stdin".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| BridgeError::Spawn("failed to capture stdout".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| BridgeError::Spawn("failed to capture stderr".to_string()))?;

        log::info!(
            "Backend started: {} {} (pid {:?})",
            config.program,
            config.args.join(" "),
            child.id()
        );

        let shared = Arc::new(Shared {
            next_request: AtomicU64::new(1),
            ..Shared::default()
        });
        let (outbox, mut rx) = mpsc::unbounded_channel::<String>();

        {
            let shared = shared.clone();
            tokio::spawn(async move {
                while let Some(line) = rx.recv().await {
                    let written = async {
                        stdin.write_all(line.as_bytes()).await?;
                        stdin.write_all(b"\n").await?;
                        stdin.flush().await
                    }
                    .await;
                    if let Err(e) = written {
                        log::error!("Backend stdin closed: {e}");
                        shared.close();
                        break;
                    }
                }
            });
        }
        {
            let shared = shared.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stdout).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => shared.handle_line(&line),
                        Ok(None) => break,
                        Err(e) => {
                            log::error!("Backend stdout read failed: {e}");
                            break;
                        }
                    }
                }
                log::info!("Backend output ended");
                shared.close();
            });
        }
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::warn!("backend: {line}");
            }
        });

        Ok(Self {
            shared,
            outbox,
            child: Mutex::new(Some(child)),
            timeout: Duration::from_secs(config.command_timeout_secs.max(1)),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Kills the backend and fails whatever is still waiting on it.
    pub fn shutdown(&self) {
        if let Ok(mut guard) = self.child.lock() {
            if let Some(mut child) = guard.take() {
                if let Err(e) = child.start_kill() {
                    log::warn!("Failed to kill backend: {e}");
                }
            }
        }
        self.shared.close();
    }

    async fn request(&self, command: &str, args: Vec<Value>) -> Result<Value, BridgeError> {
        let id = self.shared.next_request.fetch_add(1, Ordering::Relaxed);
        let line = serde_json::to_string(&Request { id, command, args })?;

        let (tx, rx) = oneshot::channel();
        self.shared.register(id, tx)?;

        if self.outbox.send(line).is_err() {
            self.shared.forget(id);
            return Err(BridgeError::Closed);
        }
        log::debug!("-> backend #{id} {command}");

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(BridgeError::Closed),
            Err(_) => {
                self.shared.forget(id);
                Err(BridgeError::Timeout)
            }
        }
    }
}

impl CommandBridge for ProcessBridge {
    fn call<'a>(&'a self, command: &'a str, args: Vec<Value>) -> BoxFuture<'a, Result<Value, BridgeError>> {
        Box::pin(self.request(command, args))
    }
}

impl EventBridge for ProcessBridge {
    fn add_listener(&self, event: &str, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.shared.next_listener.fetch_add(1, Ordering::Relaxed));
        if let Ok(mut map) = self.shared.listeners.lock() {
            map.entry(event.to_string()).or_default().push((id, handler));
        }
        id
    }

    fn remove_listener(&self, event: &str, id: ListenerId) {
        if let Ok(mut map) = self.shared.listeners.lock() {
            if let Some(list) = map.get_mut(event) {
                list.retain(|(lid, _)| *lid != id);
                if list.is_empty() {
                    map.remove(event);
                }
            }
        }
    }
}

impl Drop for ProcessBridge {
    fn drop(&mut self) {
        self.shared.close();
    }
}
