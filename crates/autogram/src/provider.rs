//! Key resolution: turns "I need a key" into a [`SigningKey`], prompting a human
//! through a [`KeyPicker`] when no key is active.

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::SigningError;
use crate::key::{ActiveKeySlot, SigningKey};
use crate::token::{PrivateKeyHandle, Token, TokenDriver, TokenError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverChoice {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyChoice {
    pub algorithm: String,
    pub subject: String,
    pub issuer: String,
}

/// The human side of key selection.
///
/// Both methods may take arbitrarily long. `None` means the user dismissed the
/// prompt.
#[async_trait]
pub trait KeyPicker: Send + Sync {
    async fn pick_driver(&self, drivers: &[DriverChoice]) -> Option<usize>;

    async fn pick_key(&self, token: &str, keys: &[KeyChoice]) -> Option<usize>;
}

/// Picks the first driver and the first key without asking anyone.
pub struct AutoPicker;

#[async_trait]
impl KeyPicker for AutoPicker {
    async fn pick_driver(&self, drivers: &[DriverChoice]) -> Option<usize> {
        (!drivers.is_empty()).then_some(0)
    }

    async fn pick_key(&self, _token: &str, keys: &[KeyChoice]) -> Option<usize> {
        (!keys.is_empty()).then_some(0)
    }
}

/// Numbered menu on the terminal. An empty line or `q` cancels.
pub struct ConsolePicker {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for ConsolePicker {
    fn default() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(tokio::io::stdin()).lines()),
        }
    }
}

impl ConsolePicker {
    async fn choose(&self, title: &str, options: &[String]) -> Option<usize> {
        let mut menu = format!("{title}\n");
        for (i, option) in options.iter().enumerate() {
            menu.push_str(&format!("  [{}] {option}\n", i + 1));
        }
        menu.push_str("Choice (empty to cancel): ");

        let mut lines = self.lines.lock().await;
        loop {
            let mut stderr = tokio::io::stderr();
            stderr.write_all(menu.as_bytes()).await.ok()?;
            stderr.flush().await.ok()?;

            let line = lines.next_line().await.ok()??;
            let answer = line.trim();
            if answer.is_empty() || answer.eq_ignore_ascii_case("q") {
                return None;
            }
            match answer.parse::<usize>() {
                Ok(n) if (1..=options.len()).contains(&n) => return Some(n - 1),
                _ => debug!(answer, "ignoring invalid menu choice"),
            }
        }
    }
}

#[async_trait]
impl KeyPicker for ConsolePicker {
    async fn pick_driver(&self, drivers: &[DriverChoice]) -> Option<usize> {
        let options: Vec<String> = drivers.iter().map(|d| d.name.clone()).collect();
        self.choose("Select a token driver:", &options).await
    }

    async fn pick_key(&self, token: &str, keys: &[KeyChoice]) -> Option<usize> {
        let options: Vec<String> = keys
            .iter()
            .map(|k| format!("{} ({}, issued by {})", k.subject, k.algorithm, k.issuer))
            .collect();
        self.choose(&format!("Select a signing key on {token}:"), &options)
            .await
    }
}

pub struct SigningKeyProvider {
    drivers: Vec<Arc<dyn TokenDriver>>,
    picker: Arc<dyn KeyPicker>,
}

impl SigningKeyProvider {
    pub fn new(drivers: Vec<Arc<dyn TokenDriver>>, picker: Arc<dyn KeyPicker>) -> Self {
        Self { drivers, picker }
    }

    pub fn drivers(&self) -> &[Arc<dyn TokenDriver>] {
        &self.drivers
    }

    /// Returns the active key without suspending, or prompts for a new one.
    ///
    /// The prompt is abandoned as soon as `cancel` fires; any token opened for it
    /// is dropped with the abandoned future.
    pub async fn resolve_key(
        &self,
        active: &ActiveKeySlot,
        cancel: &CancellationToken,
    ) -> Result<Arc<SigningKey>, SigningError> {
        if let Some(key) = active.get() {
            return Ok(key);
        }
        self.select_key(cancel).await
    }

    /// Always prompts, ignoring any active key.
    pub async fn select_key(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Arc<SigningKey>, SigningError> {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("key selection abandoned");
                Err(SigningError::SigningCanceledByUser)
            }
            result = self.prompt() => result,
        }
    }

    async fn prompt(&self) -> Result<Arc<SigningKey>, SigningError> {
        if self.drivers.is_empty() {
            return Err(SigningError::SigningFailed("no token drivers are available".into()));
        }

        let choices: Vec<DriverChoice> = self
            .drivers
            .iter()
            .map(|d| DriverChoice {
                name: d.name().to_string(),
            })
            .collect();
        let index = self
            .picker
            .pick_driver(&choices)
            .await
            .ok_or(SigningError::SigningCanceledByUser)?;
        let driver = self
            .drivers
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("picker chose driver {index} of {}", choices.len()))?;

        let (token, keys) = open_token(driver).await?;

        let choices: Vec<KeyChoice> = keys
            .iter()
            .map(|k| KeyChoice {
                algorithm: k.algorithm().to_string(),
                subject: k.certificate().subject.clone(),
                issuer: k.certificate().issuer.clone(),
            })
            .collect();
        let index = self
            .picker
            .pick_key(token.label(), &choices)
            .await
            .ok_or(SigningError::SigningCanceledByUser)?;
        let key = keys
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("picker chose key {index} of {}", choices.len()))?;

        info!(token = token.label(), subject = %key.certificate().subject, "signing key selected");
        Ok(Arc::new(SigningKey::new(token, key)))
    }
}

/// Opens a token and lists its keys off the async runtime.
async fn open_token(
    driver: Arc<dyn TokenDriver>,
) -> Result<(Arc<dyn Token>, Vec<Arc<dyn PrivateKeyHandle>>), SigningError> {
    let opened = tokio::task::spawn_blocking(move || {
        let token = driver.open()?;
        let keys = token.list_keys()?;
        if keys.is_empty() {
            return Err(TokenError::NoKeys {
                token: token.label().to_string(),
            });
        }
        Ok((token, keys))
    })
    .await
    .map_err(|e| anyhow!("token driver task failed: {e}"))?;

    Ok(opened?)
}


#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::time::Duration;

    use tokio::sync::Notify;

    use super::test_support::ScriptedPicker;
    use super::*;
    use crate::key::test_support::{FakeDriver, signing_key};

    fn provider(driver: FakeDriver, picker: Arc<ScriptedPicker>) -> SigningKeyProvider {
        SigningKeyProvider::new(vec![Arc::new(driver)], picker)
    }

    #[tokio::test]
    async fn active_key_resolves_without_prompting() {
        let picker = Arc::new(ScriptedPicker::choosing(0, 0));
        let provider = provider(FakeDriver::new("card", &["CN=Prompted"]), picker.clone());
        let slot = ActiveKeySlot::default();
        slot.set_if_absent_or_replace(signing_key("CN=Active"));
        let cancel = CancellationToken::new();

        let first = provider.resolve_key(&slot, &cancel).await.unwrap();
        let second = provider.resolve_key(&slot, &cancel).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.certificate().subject, "CN=Active");
        assert_eq!(picker.prompts(), 0);
    }

    #[tokio::test]
    async fn prompts_driver_then_key() {
        let picker = Arc::new(ScriptedPicker::choosing(0, 1));
        let provider = provider(FakeDriver::new("card", &["CN=A", "CN=B"]), picker.clone());

        let key = provider
            .resolve_key(&ActiveKeySlot::default(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(key.certificate().subject, "CN=B");
        assert_eq!(key.token_label(), "card token");
        assert_eq!(picker.key_prompts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dismissed_prompt_is_user_cancel() {
        let picker = Arc::new(ScriptedPicker::default());
        let provider = provider(FakeDriver::new("card", &["CN=A"]), picker);

        let error = provider
            .select_key(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, SigningError::SigningCanceledByUser));
    }

    #[tokio::test]
    async fn token_open_failure_is_signing_failure() {
        let mut driver = FakeDriver::new("card", &["CN=A"]);
        driver.fail_open = true;
        let provider = provider(driver, Arc::new(ScriptedPicker::choosing(0, 0)));

        let error = provider
            .select_key(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, SigningError::SigningFailed(_)));
    }

    #[tokio::test]
    async fn empty_token_is_rejected() {
        let provider = provider(
            FakeDriver::new("card", &[]),
            Arc::new(ScriptedPicker::choosing(0, 0)),
        );
        let error = provider
            .select_key(&CancellationToken::new())
            .await
            .unwrap_err();
        match error {
            SigningError::SigningFailed(reason) => assert!(reason.contains("no signing keys")),
            other => panic!("expected SigningFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn out_of_range_choice_is_internal_error() {
        let provider = provider(
            FakeDriver::new("card", &["CN=A"]),
            Arc::new(ScriptedPicker::choosing(3, 0)),
        );
        let error = provider
            .select_key(&CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(error, SigningError::Internal(_)));
    }

    #[tokio::test]
    async fn cancel_during_selection_releases_token() {
        let gate = Arc::new(Notify::new());
        let picker = Arc::new(ScriptedPicker {
            gate: Some(gate.clone()),
            ..ScriptedPicker::choosing(0, 0)
        });
        let driver = FakeDriver::new("card", &["CN=A"]);
        let sessions = driver.open_sessions.clone();
        let provider = Arc::new(provider(driver, picker.clone()));
        let cancel = CancellationToken::new();

        let task = {
            let provider = provider.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { provider.select_key(&cancel).await })
        };

        // Wait until the token is open and the key prompt is showing.
        while picker.key_prompts.load(Ordering::SeqCst) == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(sessions.load(Ordering::SeqCst), 1);

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();

        assert!(matches!(result, Err(SigningError::SigningCanceledByUser)));
        assert_eq!(sessions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn auto_picker_takes_first_entries() {
        let picker = AutoPicker;
        assert_eq!(picker.pick_driver(&[]).await, None);
        let drivers = [DriverChoice { name: "a".into() }, DriverChoice { name: "b".into() }];
        assert_eq!(picker.pick_driver(&drivers).await, Some(0));
    }
}
