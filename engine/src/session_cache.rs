//! Session cache sweeper: deletes expired sessions at a configurable
//! interval. Standalone task; start/stop is explicit.
//!
//! Follows the usual periodic-task shutdown idiom: `tokio::select!` between
//! a ticker and a `broadcast::Receiver`.

use chrono::Utc;
use shared::session::SessionRepo;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;

use shared::error::AppError;

pub struct SessionSweeper {
    session_repo: Arc<dyn SessionRepo>,
    interval: Duration,
    shutdown_tx: Mutex<Option<broadcast::Sender<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SessionSweeper {
    pub fn new(session_repo: Arc<dyn SessionRepo>, interval: Duration) -> Self {
        Self {
            session_repo,
            interval,
            shutdown_tx: Mutex::new(None),
            handle: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> shared::Result<()> {
        let mut handle_guard = self.handle.lock().await;
        if handle_guard.is_some() {
            return Err(AppError::conflict("session sweeper already running").into());
        }

        let (shutdown_tx, mut shutdown_rx) = broadcast::channel(1);
        let session_repo = self.session_repo.clone();
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.recv() => break,
                    _ = ticker.tick() => {
                        match session_repo.delete_expired(Utc::now()).await {
                            Ok(removed) if removed > 0 => {
                                tracing::debug!(removed, "swept expired sessions");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "session sweep failed"),
                        }
                    }
                }
            }
        });

        *self.shutdown_tx.lock().await = Some(shutdown_tx);
        *handle_guard = Some(handle);
        Ok(())
    }

    pub async fn stop(&self) -> shared::Result<()> {
        let handle = self.handle.lock().await.take();
        let Some(handle) = handle else {
            return Err(AppError::conflict("session sweeper is not running").into());
        };
        if let Some(shutdown_tx) = self.shutdown_tx.lock().await.take() {
            let _ = shutdown_tx.send(());
        }
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use shared::session::{issue, InMemorySessionRepo};
    use uuid::Uuid;

    #[tokio::test]
    async fn sweeper_removes_expired_sessions_on_tick() {
        let repo: Arc<dyn SessionRepo> = Arc::new(InMemorySessionRepo::new());
        let now = Utc::now();
        let stale = shared::session::Session {
            expires_at: now - ChronoDuration::hours(1),
            ..issue(Uuid::new_v4(), now).session
        };
        repo.create(stale.clone()).await.unwrap();

        let sweeper = SessionSweeper::new(repo.clone(), Duration::from_millis(20));
        sweeper.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        sweeper.stop().await.unwrap();

        assert!(repo.get(&stale.token_hash).await.is_err());
    }

    #[tokio::test]
    async fn stopping_when_not_running_errors() {
        let repo: Arc<dyn SessionRepo> = Arc::new(InMemorySessionRepo::new());
        let sweeper = SessionSweeper::new(repo, Duration::from_secs(1));
        assert!(sweeper.stop().await.is_err());
    }
}
