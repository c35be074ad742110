//! Persistence interfaces: `HostRepo`, `DetectorRepo`, `UserRepo`,
//! `RecipientRepo`, `PreferenceRepo`, `SessionRepo`.
//!
//! These are consumed-only collaborators — this crate
//! provides `async_trait` trait definitions plus `RwLock`-guarded
//! in-memory implementations solely so `server` can run and be exercised
//! by tests. They carry no migrations, schema, or durability guarantees,
//! following how `AgentDatabase`/`ServerDatabase` wrap `rusqlite` behind a
//! narrow async interface, generalized here to a trait boundary since the
//! concrete store is explicitly out of scope.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::AppError;
use crate::model::{Detector, Host};

#[derive(Debug, Clone, Default)]
pub struct HostFilter {
    pub active: Option<bool>,
    pub agent_enabled: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct DetectorFilter {
    pub host_id: Option<Uuid>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct RecipientFilter {
    pub active: Option<bool>,
}

#[async_trait]
pub trait HostRepo: Send + Sync {
    async fn create(&self, host: Host) -> crate::Result<Host>;
    async fn get(&self, id: Uuid) -> crate::Result<Host>;
    async fn update(&self, host: Host) -> crate::Result<Host>;
    async fn delete(&self, id: Uuid) -> crate::Result<()>;
    async fn list(&self, filter: HostFilter) -> crate::Result<Vec<Host>>;
}

#[async_trait]
pub trait DetectorRepo: Send + Sync {
    async fn create(&self, detector: Detector) -> crate::Result<Detector>;
    async fn get(&self, id: Uuid) -> crate::Result<Detector>;
    /// Updates under optimistic concurrency: the caller's `lookup_version`
    /// must match the stored row's, or `AppError::conflict` is returned.
    async fn update(&self, detector: Detector) -> crate::Result<Detector>;
    async fn delete(&self, id: Uuid) -> crate::Result<()>;
    async fn list(&self, filter: DetectorFilter) -> crate::Result<Vec<Detector>>;
}

#[derive(Debug, Clone)]
pub struct User {
    pub id: Uuid,
    pub username: String,
    /// Opaque password hash; hashing itself is out of scope here.
    pub password_hash: String,
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create(&self, user: User) -> crate::Result<User>;
    async fn get(&self, id: Uuid) -> crate::Result<User>;
    async fn get_by_username(&self, username: &str) -> crate::Result<User>;
    async fn update(&self, user: User) -> crate::Result<User>;
    async fn delete(&self, id: Uuid) -> crate::Result<()>;
    async fn list(&self) -> crate::Result<Vec<User>>;
}

#[derive(Debug, Clone)]
pub struct Recipient {
    pub id: Uuid,
    pub email: String,
    pub active: bool,
}

#[async_trait]
pub trait RecipientRepo: Send + Sync {
    async fn create(&self, recipient: Recipient) -> crate::Result<Recipient>;
    async fn get(&self, id: Uuid) -> crate::Result<Recipient>;
    async fn update(&self, recipient: Recipient) -> crate::Result<Recipient>;
    async fn delete(&self, id: Uuid) -> crate::Result<()>;
    async fn list(&self, filter: RecipientFilter) -> crate::Result<Vec<Recipient>>;
}

// ---- In-memory implementations ----

#[derive(Default)]
pub struct InMemoryHostRepo {
    hosts: RwLock<HashMap<Uuid, Host>>,
}

impl InMemoryHostRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostRepo for InMemoryHostRepo {
    async fn create(&self, host: Host) -> crate::Result<Host> {
        let mut hosts = self.hosts.write().await;
        if hosts.contains_key(&host.id) {
            return Err(AppError::conflict("host already exists").into());
        }
        hosts.insert(host.id, host.clone());
        Ok(host)
    }

    async fn get(&self, id: Uuid) -> crate::Result<Host> {
        self.hosts
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("host {id} not found")).into())
    }

    async fn update(&self, host: Host) -> crate::Result<Host> {
        let mut hosts = self.hosts.write().await;
        if !hosts.contains_key(&host.id) {
            return Err(AppError::not_found(format!("host {} not found", host.id)).into());
        }
        hosts.insert(host.id, host.clone());
        Ok(host)
    }

    async fn delete(&self, id: Uuid) -> crate::Result<()> {
        self.hosts.write().await.remove(&id);
        Ok(())
    }

    async fn list(&self, filter: HostFilter) -> crate::Result<Vec<Host>> {
        let hosts = self.hosts.read().await;
        Ok(hosts
            .values()
            .filter(|h| filter.active.map(|a| a == h.active).unwrap_or(true))
            .filter(|h| {
                filter
                    .agent_enabled
                    .map(|a| a == h.agent_enabled)
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryDetectorRepo {
    detectors: RwLock<HashMap<Uuid, Detector>>,
}

impl InMemoryDetectorRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DetectorRepo for InMemoryDetectorRepo {
    async fn create(&self, detector: Detector) -> crate::Result<Detector> {
        let mut detectors = self.detectors.write().await;
        if detectors.contains_key(&detector.id) {
            return Err(AppError::conflict("detector already exists").into());
        }
        detectors.insert(detector.id, detector.clone());
        Ok(detector)
    }

    async fn get(&self, id: Uuid) -> crate::Result<Detector> {
        self.detectors
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("detector {id} not found")).into())
    }

    async fn update(&self, mut detector: Detector) -> crate::Result<Detector> {
        let mut detectors = self.detectors.write().await;
        let current = detectors
            .get(&detector.id)
            .ok_or_else(|| AppError::not_found(format!("detector {} not found", detector.id)))?;
        if current.lookup_version != detector.lookup_version {
            return Err(AppError::conflict(format!(
                "detector {} lookup_version stale: expected {}, got {}",
                detector.id, current.lookup_version, detector.lookup_version
            ))
            .into());
        }
        detector.lookup_version += 1;
        detectors.insert(detector.id, detector.clone());
        Ok(detector)
    }

    async fn delete(&self, id: Uuid) -> crate::Result<()> {
        self.detectors.write().await.remove(&id);
        Ok(())
    }

    async fn list(&self, filter: DetectorFilter) -> crate::Result<Vec<Detector>> {
        let detectors = self.detectors.read().await;
        Ok(detectors
            .values()
            .filter(|d| filter.host_id.map(|h| h == d.host_id).unwrap_or(true))
            .filter(|d| filter.active.map(|a| a == d.active).unwrap_or(true))
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryUserRepo {
    users: RwLock<HashMap<Uuid, User>>,
}

impl InMemoryUserRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserRepo for InMemoryUserRepo {
    async fn create(&self, user: User) -> crate::Result<User> {
        let mut users = self.users.write().await;
        if users.contains_key(&user.id) {
            return Err(AppError::conflict("user already exists").into());
        }
        users.insert(user.id, clone_user(&user));
        Ok(user)
    }

    async fn get(&self, id: Uuid) -> crate::Result<User> {
        self.users
            .read()
            .await
            .get(&id)
            .map(clone_user)
            .ok_or_else(|| AppError::not_found(format!("user {id} not found")).into())
    }

    async fn get_by_username(&self, username: &str) -> crate::Result<User> {
        self.users
            .read()
            .await
            .values()
            .find(|u| u.username == username)
            .map(clone_user)
            .ok_or_else(|| AppError::not_found(format!("user '{username}' not found")).into())
    }

    async fn update(&self, user: User) -> crate::Result<User> {
        let mut users = self.users.write().await;
        if !users.contains_key(&user.id) {
            return Err(AppError::not_found(format!("user {} not found", user.id)).into());
        }
        users.insert(user.id, clone_user(&user));
        Ok(user)
    }

    async fn delete(&self, id: Uuid) -> crate::Result<()> {
        self.users.write().await.remove(&id);
        Ok(())
    }

    async fn list(&self) -> crate::Result<Vec<User>> {
        Ok(self.users.read().await.values().map(clone_user).collect())
    }
}

fn clone_user(u: &User) -> User {
    User {
        id: u.id,
        username: u.username.clone(),
        password_hash: u.password_hash.clone(),
    }
}

#[derive(Default)]
pub struct InMemoryRecipientRepo {
    recipients: RwLock<HashMap<Uuid, Recipient>>,
}

impl InMemoryRecipientRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RecipientRepo for InMemoryRecipientRepo {
    async fn create(&self, recipient: Recipient) -> crate::Result<Recipient> {
        let mut recipients = self.recipients.write().await;
        if recipients.contains_key(&recipient.id) {
            return Err(AppError::conflict("recipient already exists").into());
        }
        recipients.insert(recipient.id, clone_recipient(&recipient));
        Ok(recipient)
    }

    async fn get(&self, id: Uuid) -> crate::Result<Recipient> {
        self.recipients
            .read()
            .await
            .get(&id)
            .map(clone_recipient)
            .ok_or_else(|| AppError::not_found(format!("recipient {id} not found")).into())
    }

    async fn update(&self, recipient: Recipient) -> crate::Result<Recipient> {
        let mut recipients = self.recipients.write().await;
        if !recipients.contains_key(&recipient.id) {
            return Err(AppError::not_found(format!("recipient {} not found", recipient.id)).into());
        }
        recipients.insert(recipient.id, clone_recipient(&recipient));
        Ok(recipient)
    }

    async fn delete(&self, id: Uuid) -> crate::Result<()> {
        self.recipients.write().await.remove(&id);
        Ok(())
    }

    async fn list(&self, filter: RecipientFilter) -> crate::Result<Vec<Recipient>> {
        let recipients = self.recipients.read().await;
        Ok(recipients
            .values()
            .filter(|r| filter.active.map(|a| a == r.active).unwrap_or(true))
            .map(clone_recipient)
            .collect())
    }
}

fn clone_recipient(r: &Recipient) -> Recipient {
    Recipient {
        id: r.id,
        email: r.email.clone(),
        active: r.active,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AddressType, State};

    fn sample_host() -> Host {
        Host {
            id: Uuid::new_v4(),
            name: "web1".into(),
            address_type: AddressType::Ipv4,
            address: "10.0.0.1".into(),
            agent_enabled: false,
            active: true,
            last_state: State::Ok,
            tags: vec![],
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let repo = InMemoryHostRepo::new();
        let host = sample_host();
        repo.create(host.clone()).await.unwrap();
        let fetched = repo.get(host.id).await.unwrap();
        assert_eq!(fetched.name, host.name);
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let repo = InMemoryHostRepo::new();
        let host = sample_host();
        repo.create(host.clone()).await.unwrap();
        let err = repo.create(host).await.unwrap_err();
        let app_err: AppError = err.downcast().unwrap();
        assert_eq!(app_err.kind(), crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn detector_update_enforces_optimistic_concurrency() {
        use crate::model::{Detector, DetectorConfig, DetectorType, HttpDetectorParams};

        let repo = InMemoryDetectorRepo::new();
        let detector = Detector {
            id: Uuid::new_v4(),
            host_id: Uuid::new_v4(),
            name: "homepage".into(),
            detector_type: DetectorType::Http,
            interval_seconds: 30,
            timeout_seconds: 10,
            config: DetectorConfig::Http(HttpDetectorParams {
                url: "https://example.com".into(),
                expected_body: None,
                expected_status: 200,
            }),
            active: true,
            last_state: State::Ok,
            last_checked_at: None,
            lookup_version: 0,
        };
        repo.create(detector.clone()).await.unwrap();

        let updated = repo.update(detector.clone()).await.unwrap();
        assert_eq!(updated.lookup_version, 1);

        // Stale version (still 0) must conflict now that the stored row is at 1.
        let err = repo.update(detector).await.unwrap_err();
        let app_err: AppError = err.downcast().unwrap();
        assert_eq!(app_err.kind(), crate::error::ErrorKind::Conflict);
    }
}
