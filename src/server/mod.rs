//! Accept loop and session registry.
//!
//! The server spawns one task per accepted connection and tracks it in a
//! shared registry. Sessions own all of their protocol state; the registry
//! only knows enough to enumerate and force-disconnect them.

pub mod session;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tokio::task::AbortHandle;
use tracing::{info, warn};

use crate::crypto::{derive_key, Key};
use crate::input::InputInjector;
use crate::screen::capture::ScreenGrabber;

use session::Session;

pub struct ServerConfig {
    pub addr: String,
    pub password: String,
}

/// State shared by every session: the derived key, the configured password,
/// and the capture/injection collaborators. The collaborators are the only
/// genuinely shared mutable resources — capture serializes through its
/// worker thread, injection through the mutex here.
#[derive(Clone)]
pub(crate) struct Shared {
    pub key: Key,
    pub password: String,
    pub grabber: ScreenGrabber,
    pub injector: Arc<Mutex<Box<dyn InputInjector>>>,
    pub registry: SessionRegistry,
}

/// One live session as seen by the manager.
pub struct SessionHandle {
    pub peer_addr: SocketAddr,
    pub connected_at: SystemTime,
    abort: AbortHandle,
}

/// Concurrency-safe map of active sessions. Insertions and removals happen
/// from concurrent connection tasks; no ambient global state.
#[derive(Clone, Default)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<u64, SessionHandle>>>,
    next_id: Arc<AtomicU64>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn register(&self, id: u64, handle: SessionHandle) {
        self.inner.write().await.insert(id, handle);
    }

    async fn unregister(&self, id: u64) {
        self.inner.write().await.remove(&id);
    }

    /// Snapshot of live sessions.
    pub async fn list_active(&self) -> Vec<(u64, SocketAddr)> {
        self.inner
            .read()
            .await
            .iter()
            .map(|(id, handle)| (*id, handle.peer_addr))
            .collect()
    }

    /// Force-close every live session. Aborting a session task drops its
    /// socket, which is how the peer finds out.
    pub async fn disconnect_all(&self) {
        for (id, handle) in self.inner.write().await.drain() {
            let age = handle
                .connected_at
                .elapsed()
                .unwrap_or_default();
            info!(id, peer = %handle.peer_addr, ?age, "force-closing session");
            handle.abort.abort();
        }
    }
}

pub struct ControlServer {
    config: ServerConfig,
    shared: Shared,
}

impl ControlServer {
    pub fn new(
        config: ServerConfig,
        grabber: ScreenGrabber,
        injector: Box<dyn InputInjector>,
    ) -> Self {
        let shared = Shared {
            key: derive_key(&config.password),
            password: config.password.clone(),
            grabber,
            injector: Arc::new(Mutex::new(injector)),
            registry: SessionRegistry::new(),
        };
        Self { config, shared }
    }

    pub fn registry(&self) -> SessionRegistry {
        self.shared.registry.clone()
    }

    /// Bind the configured address and serve until cancelled.
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(&self.config.addr)
            .await
            .with_context(|| format!("failed to bind {}", self.config.addr))?;
        info!(addr = %self.config.addr, "listening");
        self.run_on(listener).await
    }

    /// Serve on an already-bound listener.
    pub async fn run_on(&self, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, peer_addr) = match listener.accept().await {
                Ok(conn) => conn,
                Err(e) => {
                    // Accept failures are transient (fd pressure, aborted
                    // connects); the server keeps serving existing sessions
                    warn!("accept failed: {e}");
                    continue;
                }
            };

            let id = self.shared.registry.allocate_id();
            info!(id, peer = %peer_addr, "connection accepted");

            let shared = self.shared.clone();
            let task = tokio::spawn(Session::run(id, stream, peer_addr, shared));

            self.shared
                .registry
                .register(
                    id,
                    SessionHandle {
                        peer_addr,
                        connected_at: SystemTime::now(),
                        abort: task.abort_handle(),
                    },
                )
                .await;

            // Reaper: wait for the session to finish, then drop it from the
            // registry. Spawned after registration so unregister cannot race
            // ahead of register.
            let registry = self.shared.registry.clone();
            tokio::spawn(async move {
                match task.await {
                    Ok(Ok(())) => info!(id, peer = %peer_addr, "session closed"),
                    Ok(Err(e)) => warn!(id, peer = %peer_addr, "session ended with error: {e:#}"),
                    Err(_) => info!(id, peer = %peer_addr, "session aborted"),
                }
                registry.unregister(id).await;
            });
        }
    }
}
