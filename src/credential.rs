use async_trait::async_trait;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{debug, info, warn};

const PROMPT_MESSAGE: &str = "pr-badges: enter a GitHub personal access token\n\
    - fine-grained token: Pull requests -> Read-only (personal repos only)\n\
    - classic token: repo scope (required for org repos)\n\
    Stored locally, only used to read PR stats from the GitHub API.";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to access credential file: {0}")]
    Io(#[from] io::Error),
}

/// An opaque API token. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// Where the single credential value lives between demands.
pub trait SecretStorage: Send + Sync {
    fn get(&self) -> Result<Option<String>, CredentialError>;
    fn set(&self, value: &str) -> Result<(), CredentialError>;
    fn clear(&self) -> Result<(), CredentialError>;
}

/// Asks the user for a token. Blocking from the caller's point of view.
#[async_trait]
pub trait Prompter: Send + Sync {
    async fn prompt(&self, message: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    value: Mutex<Option<String>>,
}

impl SecretStorage for MemoryStorage {
    fn get(&self) -> Result<Option<String>, CredentialError> {
        Ok(self.value.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn set(&self, value: &str) -> Result<(), CredentialError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = Some(value.to_string());
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        *self.value.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Keeps the token in a plain file so later invocations can reuse it.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl SecretStorage for FileStorage {
    fn get(&self) -> Result<Option<String>, CredentialError> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => Ok(Some(contents.trim().to_string())),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn set(&self, value: &str) -> Result<(), CredentialError> {
        fs::write(&self.path, value)?;
        Ok(())
    }

    fn clear(&self) -> Result<(), CredentialError> {
        match fs::remove_file(&self.path) {
            Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
            _ => Ok(()),
        }
    }
}

/// Reads one line from stdin after printing the message to stderr.
pub struct StdinPrompter;

#[async_trait]
impl Prompter for StdinPrompter {
    async fn prompt(&self, message: &str) -> Option<String> {
        let message = message.to_string();
        tokio::task::spawn_blocking(move || {
            let mut stderr = io::stderr();
            writeln!(stderr, "{message}").ok()?;
            write!(stderr, "> ").ok()?;
            stderr.flush().ok()?;
            let mut line = String::new();
            match io::stdin().lock().read_line(&mut line) {
                Ok(0) | Err(_) => None,
                Ok(_) => Some(line),
            }
        })
        .await
        .ok()
        .flatten()
    }
}

/// Never hands out a token; used with `--no-prompt`.
pub struct NoPrompt;

#[async_trait]
impl Prompter for NoPrompt {
    async fn prompt(&self, _message: &str) -> Option<String> {
        None
    }
}

/// Process-wide owner of the credential.
///
/// Lifecycle: empty at startup (unless seeded from config), filled on the
/// first demand by prompting, cleared when the API rejects it, filled again
/// on the next demand. Concurrent demands share a single prompt. Once the
/// user dismisses the prompt, later demands in the same session get `None`
/// without asking again.
pub struct CredentialStore {
    storage: Arc<dyn SecretStorage>,
    prompter: Arc<dyn Prompter>,
    prompt_gate: tokio::sync::Mutex<()>,
    declined: AtomicBool,
}

impl CredentialStore {
    pub fn new(storage: Arc<dyn SecretStorage>, prompter: Arc<dyn Prompter>) -> Self {
        Self {
            storage,
            prompter,
            prompt_gate: tokio::sync::Mutex::new(()),
            declined: AtomicBool::new(false),
        }
    }

    /// Store a token obtained out of band (config file, environment).
    pub fn seed(&self, token: &str) -> Result<(), CredentialError> {
        let token = token.trim();
        if token.is_empty() {
            return Ok(());
        }
        self.storage.set(token)
    }

    /// The stored credential, if any. Never prompts.
    pub fn current(&self) -> Option<Credential> {
        match self.storage.get() {
            Ok(value) => value.filter(|v| !v.is_empty()).map(Credential),
            Err(err) => {
                warn!(error = %err, "could not read stored credential");
                None
            }
        }
    }

    /// The stored credential, prompting for one when none is stored.
    pub async fn get_or_prompt(&self) -> Option<Credential> {
        if let Some(credential) = self.current() {
            return Some(credential);
        }
        if self.declined.load(Ordering::Acquire) {
            return None;
        }

        let _gate = self.prompt_gate.lock().await;
        // Another demand may have prompted while we waited for the gate.
        if let Some(credential) = self.current() {
            return Some(credential);
        }
        if self.declined.load(Ordering::Acquire) {
            return None;
        }

        let answer = self.prompter.prompt(PROMPT_MESSAGE).await;
        match answer.map(|a| a.trim().to_string()).filter(|a| !a.is_empty()) {
            Some(token) => {
                if let Err(err) = self.storage.set(&token) {
                    warn!(error = %err, "could not persist credential, using it for this session only");
                }
                info!("credential stored");
                Some(Credential(token))
            }
            None => {
                debug!("credential prompt dismissed");
                self.declined.store(true, Ordering::Release);
                None
            }
        }
    }

    /// Forget the stored credential after the API rejected it.
    pub fn invalidate(&self) {
        if let Err(err) = self.storage.clear() {
            warn!(error = %err, "could not clear stored credential");
        }
    }
}
