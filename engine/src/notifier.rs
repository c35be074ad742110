//! Notifier fan-out: independent senders, one failure never skips
//! another (property confirmed by concrete scenario #6).
//!
//! Holds shared state behind `Arc<...>` and logs rather than propagates
//! per-item failures, generalized from "one failing health check" to "one
//! failing sender".

use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use shared::crypter::Crypter;
use shared::preferences::{PreferenceRepo, Preferences};
use shared::repo::{RecipientFilter, RecipientRepo};
use shared::wire::ResultEvent;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, RwLock};

use shared::error::AppError;

#[async_trait]
pub trait Sender: Send + Sync {
    async fn send(&self, event: &ResultEvent) -> shared::Result<()>;
    async fn enabled(&self) -> bool;
}

/// Registry of senders keyed by id; fan-out isolates per-sender failures.
pub struct Notifier {
    senders: RwLock<HashMap<String, Arc<dyn Sender>>>,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            senders: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register(&self, id: impl Into<String>, sender: Arc<dyn Sender>) -> shared::Result<()> {
        let id = id.into();
        let mut senders = self.senders.write().await;
        if senders.contains_key(&id) {
            return Err(AppError::conflict(format!("sender '{id}' already registered")).into());
        }
        senders.insert(id, sender);
        Ok(())
    }

    /// Calls every enabled sender; one failure does not prevent the others
    /// from being called. Returns a joined error naming every failure.
    pub async fn send(&self, event: &ResultEvent) -> shared::Result<()> {
        let senders = self.senders.read().await;
        let mut failures = Vec::new();
        for (id, sender) in senders.iter() {
            if !sender.enabled().await {
                continue;
            }
            if let Err(e) = sender.send(event).await {
                tracing::warn!(sender = %id, error = %e, "notification sender failed");
                failures.push(format!("{id}: {e}"));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::internal(format!("notifier errors: {}", failures.join("; "))).into())
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

// ---- Mail sender ----

const MAIL_QUEUE_CAPACITY: usize = 64;
const MAIL_WORKER_COUNT: usize = 3;
const MAIL_SEND_ATTEMPTS: u32 = 3;
const MAIL_RETRY_BACKOFF: Duration = Duration::from_millis(500);
const MAIL_DIAL_TIMEOUT: Duration = Duration::from_secs(1);
const MAIL_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// Reads SMTP settings from [`Preferences`] and sends mail through `lettre`.
/// Owns a bounded queue and three worker tasks spawned at construction time
/// (resolved Open Question: there is no separate `start()` step).
pub struct MailSender {
    queue_tx: mpsc::Sender<ResultEvent>,
    _workers: Vec<tokio::task::JoinHandle<()>>,
    preference_repo: Arc<dyn PreferenceRepo>,
}

struct MailContext {
    preference_repo: Arc<dyn PreferenceRepo>,
    recipient_repo: Arc<dyn RecipientRepo>,
    crypter: Arc<dyn Crypter>,
}

impl MailSender {
    pub fn new(
        preference_repo: Arc<dyn PreferenceRepo>,
        recipient_repo: Arc<dyn RecipientRepo>,
        crypter: Arc<dyn Crypter>,
    ) -> Self {
        let (queue_tx, queue_rx) = mpsc::channel(MAIL_QUEUE_CAPACITY);
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut workers = Vec::with_capacity(MAIL_WORKER_COUNT);
        for _ in 0..MAIL_WORKER_COUNT {
            let queue_rx = queue_rx.clone();
            let ctx = MailContext {
                preference_repo: preference_repo.clone(),
                recipient_repo: recipient_repo.clone(),
                crypter: crypter.clone(),
            };
            workers.push(tokio::spawn(async move {
                loop {
                    let event = queue_rx.lock().await.recv().await;
                    match event {
                        Some(event) => {
                            if let Err(e) = deliver_mail(&ctx, &event).await {
                                tracing::warn!(error = %e, "mail delivery failed");
                            }
                        }
                        None => break,
                    }
                }
            }));
        }

        Self {
            queue_tx,
            _workers: workers,
            preference_repo,
        }
    }
}

#[async_trait]
impl Sender for MailSender {
    async fn send(&self, event: &ResultEvent) -> shared::Result<()> {
        self.queue_tx
            .send(event.clone())
            .await
            .map_err(|_| AppError::internal("mail queue is closed").into())
    }

    async fn enabled(&self) -> bool {
        let prefs = Preferences::new(self.preference_repo.as_ref());
        prefs
            .get("smtp_enabled")
            .await
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

async fn deliver_mail(ctx: &MailContext, event: &ResultEvent) -> shared::Result<()> {
    let prefs = Preferences::new(ctx.preference_repo.as_ref());
    let host = prefs.get("smtp_host").await?;
    let port: u16 = prefs
        .get("smtp_port")
        .await?
        .parse()
        .map_err(|e| AppError::internal(format!("invalid smtp_port preference: {e}")))?;
    let user = prefs.get("smtp_user").await?;
    let password_crypt = prefs.get("smtp_password_crypt").await?;
    let password = ctx.crypter.decrypt(&password_crypt)?;
    let sender = prefs.get("smtp_sender").await?;

    let recipients = ctx
        .recipient_repo
        .list(RecipientFilter { active: Some(true) })
        .await?;
    if recipients.is_empty() {
        return Ok(());
    }

    let subject = format!("[{}] {} is {}", event.host_name, event.detector_name, event.result.state);
    let body = format!(
        "host: {}\ndetector: {}\nstate: {}\nmessage: {}",
        event.host_name, event.detector_name, event.result.state, event.result.message
    );

    let credentials = Credentials::new(user, password);
    let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&host)
        .map_err(|e| AppError::internal(format!("smtp relay setup failed: {e}")))?
        .port(port)
        .credentials(credentials)
        .timeout(Some(MAIL_DIAL_TIMEOUT))
        .build();

    let from: Mailbox = sender
        .parse()
        .map_err(|e| AppError::internal(format!("invalid smtp_sender address: {e}")))?;

    for recipient in &recipients {
        let to: Mailbox = match recipient.email.parse() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::warn!(recipient = %recipient.email, error = %e, "skipping malformed recipient address");
                continue;
            }
        };
        let message = Message::builder()
            .from(from.clone())
            .to(to)
            .subject(subject.clone())
            .body(body.clone())
            .map_err(|e| AppError::internal(format!("failed to build message: {e}")))?;

        send_with_retries(&transport, &message).await?;
    }
    Ok(())
}

async fn send_with_retries(
    transport: &AsyncSmtpTransport<Tokio1Executor>,
    message: &Message,
) -> shared::Result<()> {
    let mut last_err = None;
    for attempt in 0..MAIL_SEND_ATTEMPTS {
        if attempt > 0 {
            tokio::time::sleep(MAIL_RETRY_BACKOFF).await;
        }
        match tokio::time::timeout(MAIL_SEND_TIMEOUT, transport.send(message)).await {
            Ok(Ok(_)) => return Ok(()),
            Ok(Err(e)) => last_err = Some(format!("smtp send failed: {e}")),
            Err(_) => last_err = Some("smtp send timed out".to_string()),
        }
    }
    Err(AppError::internal(last_err.unwrap_or_else(|| "smtp send failed".to_string())).into())
}

// ---- Chat bot sender ----

/// Posts a message per configured chat id via a REST chat API.
pub struct ChatBotSender {
    preference_repo: Arc<dyn PreferenceRepo>,
    crypter: Arc<dyn Crypter>,
    client: reqwest::Client,
    api_base: String,
}

impl ChatBotSender {
    pub fn new(
        preference_repo: Arc<dyn PreferenceRepo>,
        crypter: Arc<dyn Crypter>,
        client: reqwest::Client,
    ) -> Self {
        Self {
            preference_repo,
            crypter,
            client,
            api_base: "https://api.chat-service.example".to_string(),
        }
    }

    #[cfg(test)]
    fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }
}

#[async_trait]
impl Sender for ChatBotSender {
    async fn send(&self, event: &ResultEvent) -> shared::Result<()> {
        let prefs = Preferences::new(self.preference_repo.as_ref());
        let token_crypt = prefs.get("chatbot_token_crypt").await?;
        let token = self.crypter.decrypt(&token_crypt)?;
        let chat_ids_raw = prefs.get("chatbot_chat_ids").await?;
        let chat_ids: Vec<&str> = chat_ids_raw.split(',').map(str::trim).filter(|s| !s.is_empty()).collect();

        let text = format!(
            "{} / {} -> {}: {}",
            event.host_name, event.detector_name, event.result.state, event.result.message
        );

        let mut failures = Vec::new();
        for chat_id in chat_ids {
            let url = format!("{}/bot{}/sendMessage", self.api_base, token);
            let outcome = self
                .client
                .post(&url)
                .json(&serde_json::json!({"text": text, "chat_id": chat_id}))
                .send()
                .await;
            match outcome {
                Ok(resp) if resp.status().is_success() => {}
                Ok(resp) => failures.push(format!("chat {chat_id}: status {}", resp.status())),
                Err(e) => failures.push(format!("chat {chat_id}: {e}")),
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(AppError::internal(format!("chat bot send errors: {}", failures.join("; "))).into())
        }
    }

    async fn enabled(&self) -> bool {
        let prefs = Preferences::new(self.preference_repo.as_ref());
        prefs
            .get("chatbot_enabled")
            .await
            .map(|v| v == "true")
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::model::State;
    use shared::preferences::InMemoryPreferenceRepo;
    use shared::preferences::Preference;
    use shared::wire::EventResult;

    fn sample_event() -> ResultEvent {
        ResultEvent {
            host_id: uuid::Uuid::new_v4(),
            host_name: "web1".into(),
            detector_id: uuid::Uuid::new_v4(),
            detector_name: "homepage".into(),
            result: EventResult {
                state: State::Critical,
                message: "timeout".into(),
            },
        }
    }

    struct FailingSender;
    #[async_trait]
    impl Sender for FailingSender {
        async fn send(&self, _event: &ResultEvent) -> shared::Result<()> {
            Err(AppError::internal("boom").into())
        }
        async fn enabled(&self) -> bool {
            true
        }
    }

    struct CountingSender(std::sync::Arc<std::sync::atomic::AtomicUsize>);
    #[async_trait]
    impl Sender for CountingSender {
        async fn send(&self, _event: &ResultEvent) -> shared::Result<()> {
            self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(())
        }
        async fn enabled(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn register_rejects_duplicate_ids() {
        let notifier = Notifier::new();
        notifier.register("a", Arc::new(FailingSender)).await.unwrap();
        assert!(notifier.register("a", Arc::new(FailingSender)).await.is_err());
    }

    #[tokio::test]
    async fn one_failing_sender_does_not_skip_the_other() {
        let notifier = Notifier::new();
        let count = std::sync::Arc::new(std::sync::atomic::AtomicUsize::new(0));
        notifier.register("a", Arc::new(FailingSender)).await.unwrap();
        notifier.register("b", Arc::new(CountingSender(count.clone()))).await.unwrap();

        let err = notifier.send(&sample_event()).await.unwrap_err();
        assert!(err.to_string().contains("a:"));
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn mail_sender_enabled_reads_preference() {
        let repo: Arc<dyn PreferenceRepo> = Arc::new(InMemoryPreferenceRepo::new());
        repo.create(Preference {
            name: "smtp_enabled".into(),
            value: "true".into(),
        })
        .await
        .unwrap();
        let sender = MailSender::new(
            repo,
            Arc::new(shared::repo::InMemoryRecipientRepo::new()),
            Arc::new(shared::crypter::AesGcmCrypter::new(&[1u8; shared::crypter::KEY_LEN])),
        );
        assert!(sender.enabled().await);
    }

    #[tokio::test]
    async fn chat_bot_sender_disabled_by_default() {
        let repo: Arc<dyn PreferenceRepo> = Arc::new(InMemoryPreferenceRepo::new());
        let crypter: Arc<dyn Crypter> = Arc::new(shared::crypter::AesGcmCrypter::new(&[1u8; shared::crypter::KEY_LEN]));
        let sender = ChatBotSender::new(repo, crypter, reqwest::Client::new());
        assert!(!sender.enabled().await);
    }
}
