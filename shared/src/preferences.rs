//! Application preference store: `PreferenceRepo` plus the higher-level
//! `Preferences` facade used by the mail sender and chat-bot sender to read
//! their settings, and by `CryptValues` to rotate plaintext values to
//! ciphertext in place.
//!
//! Follows `ConfigManager`'s load-then-cache shape (`server/src/config.rs`),
//! generalized here to a key/value store backed by a repo trait rather than
//! a single TOML file.

use async_trait::async_trait;
use std::collections::HashMap;

use crate::crypter::Crypter;
use crate::error::AppError;

/// Preference names a caller is allowed to read or write. Anything else is
/// rejected up front rather than silently persisted.
pub const ALLOWED_PREFERENCE_NAMES: &[&str] = &[
    "smtp_host",
    "smtp_port",
    "smtp_user",
    "smtp_password_crypt",
    "smtp_sender",
    "smtp_enabled",
    "chatbot_token_crypt",
    "chatbot_chat_ids",
    "chatbot_enabled",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preference {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default)]
pub struct PreferenceFilter {
    pub name_prefix: Option<String>,
}

#[async_trait]
pub trait PreferenceRepo: Send + Sync {
    async fn create(&self, pref: Preference) -> crate::Result<Preference>;
    /// Single-row-by-name lookup (guards against the missing-predicate bug in the
    /// implementation this was distilled from is not reproduced here).
    async fn get_by_name(&self, name: &str) -> crate::Result<Preference>;
    async fn update(&self, pref: Preference) -> crate::Result<Preference>;
    async fn delete(&self, name: &str) -> crate::Result<()>;
    async fn list(&self, filter: PreferenceFilter) -> crate::Result<Vec<Preference>>;
}

#[derive(Default)]
pub struct InMemoryPreferenceRepo {
    prefs: tokio::sync::RwLock<HashMap<String, Preference>>,
}

impl InMemoryPreferenceRepo {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PreferenceRepo for InMemoryPreferenceRepo {
    async fn create(&self, pref: Preference) -> crate::Result<Preference> {
        let mut prefs = self.prefs.write().await;
        if prefs.contains_key(&pref.name) {
            return Err(AppError::conflict(format!("preference '{}' already exists", pref.name)).into());
        }
        prefs.insert(pref.name.clone(), pref.clone());
        Ok(pref)
    }

    async fn get_by_name(&self, name: &str) -> crate::Result<Preference> {
        self.prefs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::not_found(format!("preference '{name}' not found")).into())
    }

    async fn update(&self, pref: Preference) -> crate::Result<Preference> {
        let mut prefs = self.prefs.write().await;
        if !prefs.contains_key(&pref.name) {
            return Err(AppError::not_found(format!("preference '{}' not found", pref.name)).into());
        }
        prefs.insert(pref.name.clone(), pref.clone());
        Ok(pref)
    }

    async fn delete(&self, name: &str) -> crate::Result<()> {
        self.prefs.write().await.remove(name);
        Ok(())
    }

    async fn list(&self, filter: PreferenceFilter) -> crate::Result<Vec<Preference>> {
        let prefs = self.prefs.read().await;
        Ok(prefs
            .values()
            .filter(|p| {
                filter
                    .name_prefix
                    .as_ref()
                    .map(|prefix| p.name.starts_with(prefix.as_str()))
                    .unwrap_or(true)
            })
            .cloned()
            .collect())
    }
}

/// Facade over a [`PreferenceRepo`] exposing the narrow `Has`/`Get`/`Set`/
/// `Delete`/`CryptValues` surface the mail and chat-bot senders use.
pub struct Preferences<'a> {
    repo: &'a dyn PreferenceRepo,
}

impl<'a> Preferences<'a> {
    pub fn new(repo: &'a dyn PreferenceRepo) -> Self {
        Self { repo }
    }

    fn check_allowed(name: &str) -> crate::Result<()> {
        if ALLOWED_PREFERENCE_NAMES.contains(&name) {
            Ok(())
        } else {
            Err(AppError::invalid(format!("preference '{name}' is not on the allowed list")).into())
        }
    }

    pub async fn has(&self, key: &str) -> crate::Result<bool> {
        Self::check_allowed(key)?;
        Ok(self.repo.get_by_name(key).await.is_ok())
    }

    pub async fn get(&self, key: &str) -> crate::Result<String> {
        Self::check_allowed(key)?;
        Ok(self.repo.get_by_name(key).await?.value)
    }

    pub async fn set(&self, key: &str, value: impl Into<String>) -> crate::Result<()> {
        Self::check_allowed(key)?;
        let pref = Preference {
            name: key.to_string(),
            value: value.into(),
        };
        match self.repo.update(pref.clone()).await {
            Ok(_) => Ok(()),
            Err(_) => {
                self.repo.create(pref).await?;
                Ok(())
            }
        }
    }

    pub async fn delete(&self, key: &str) -> crate::Result<()> {
        Self::check_allowed(key)?;
        self.repo.delete(key).await
    }

    /// Rewrites every preference whose name ends with one of `suffixes`:
    /// the current value is encrypted and the key renamed to `<name>_crypt`.
    /// Idempotent: a name already ending in `_crypt` no longer ends in
    /// any of `suffixes`, so re-running leaves the store unchanged.
    pub async fn crypt_values(&self, crypter: &dyn Crypter, suffixes: &[&str]) -> crate::Result<()> {
        let all = self.repo.list(PreferenceFilter::default()).await?;
        for pref in all {
            if !suffixes.iter().any(|s| pref.name.ends_with(*s)) {
                continue;
            }
            let crypt_name = format!("{}_crypt", pref.name);
            let encrypted = crypter.encrypt(&pref.value)?;
            self.repo.delete(&pref.name).await?;
            match self
                .repo
                .update(Preference {
                    name: crypt_name.clone(),
                    value: encrypted.clone(),
                })
                .await
            {
                Ok(_) => {}
                Err(_) => {
                    self.repo
                        .create(Preference {
                            name: crypt_name,
                            value: encrypted,
                        })
                        .await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypter::AesGcmCrypter;

    #[tokio::test]
    async fn set_then_get_round_trips_an_allowed_name() {
        let repo = InMemoryPreferenceRepo::new();
        let prefs = Preferences::new(&repo);
        prefs.set("smtp_host", "mail.example.com").await.unwrap();
        assert_eq!(prefs.get("smtp_host").await.unwrap(), "mail.example.com");
        assert!(prefs.has("smtp_host").await.unwrap());
    }

    #[tokio::test]
    async fn disallowed_name_is_rejected() {
        let repo = InMemoryPreferenceRepo::new();
        let prefs = Preferences::new(&repo);
        assert!(prefs.set("not_on_the_list", "x").await.is_err());
    }

    #[tokio::test]
    async fn crypt_values_is_idempotent() {
        let repo = InMemoryPreferenceRepo::new();
        let prefs = Preferences::new(&repo);
        let crypter = AesGcmCrypter::new(&[9u8; crate::crypter::KEY_LEN]);

        repo.create(Preference {
            name: "smtp_password".into(),
            value: "hunter2".into(),
        })
        .await
        .unwrap();

        prefs.crypt_values(&crypter, &["_password"]).await.unwrap();
        let first = repo.get_by_name("smtp_password_crypt").await.unwrap().value;
        assert!(repo.get_by_name("smtp_password").await.is_err());

        // Second pass: "smtp_password_crypt" no longer ends with "_password",
        // so it is left untouched rather than wrapped again.
        prefs.crypt_values(&crypter, &["_password"]).await.unwrap();
        let second = repo.get_by_name("smtp_password_crypt").await.unwrap().value;
        assert_eq!(first, second);
    }
}
