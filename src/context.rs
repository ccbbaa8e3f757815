// App context
// Everything a session needs from the outside world: configuration, the
// signed-in user and clients built from both. Created once at startup and
// passed down; nothing here is global.
//
// The user session is persisted as session.json in the app directory so a
// later run stays signed in until the token expires.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::ai::FunctionsClient;
use crate::config::Config;
use crate::error::ContextError;
use crate::store::HttpStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub expires_at: DateTime<Utc>,
}

impl UserSession {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}

pub struct AppContext {
    config: Config,
    dir: PathBuf,
    user: Mutex<Option<UserSession>>,
}

impl AppContext {
    /// Uses the default app directory.
    pub fn init(config: Config) -> Result<Self, ContextError> {
        let dir = Config::app_dir().ok_or(ContextError::NoConfigDir)?;
        Self::init_in(config, &dir)
    }

    /// Creates `dir` if needed and loads any saved user session from it.
    /// An unreadable session file is logged and ignored.
    pub fn init_in(config: Config, dir: &Path) -> Result<Self, ContextError> {
        fs::create_dir_all(dir)?;

        let context = AppContext {
            config,
            dir: dir.to_path_buf(),
            user: Mutex::new(None),
        };

        match context.load_session() {
            Ok(Some(session)) => {
                tracing::info!(user = %session.user_id, "Restored user session");
                *context.user.lock() = Some(session);
            }
            Ok(None) => {}
            Err(e) => tracing::warn!(error = %e, "Ignoring unreadable session file"),
        }

        Ok(context)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    fn session_file(&self) -> PathBuf {
        self.dir.join("session.json")
    }

    fn load_session(&self) -> Result<Option<UserSession>, ContextError> {
        let path = self.session_file();
        if !path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&path)?;
        Ok(Some(serde_json::from_str(&data)?))
    }

    /// Stores the session in memory and on disk.
    pub fn sign_in(&self, session: UserSession) -> Result<(), ContextError> {
        let json = serde_json::to_string_pretty(&session)?;
        fs::write(self.session_file(), json)?;
        tracing::info!(user = %session.user_id, "Signed in");
        *self.user.lock() = Some(session);
        Ok(())
    }

    pub fn sign_out(&self) -> Result<(), ContextError> {
        self.user.lock().take();
        let path = self.session_file();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        tracing::info!("Signed out");
        Ok(())
    }

    /// Signed-in user, if the token has not expired.
    pub fn current_user(&self) -> Option<UserSession> {
        self.user.lock().clone().filter(|s| !s.is_expired())
    }

    pub fn access_token(&self) -> Option<String> {
        self.current_user().map(|s| s.access_token)
    }

    pub fn is_authenticated(&self) -> bool {
        self.current_user().is_some()
    }

    pub fn store(&self) -> HttpStore {
        HttpStore::from_config(&self.config).with_access_token(self.access_token())
    }

    pub fn functions(&self) -> FunctionsClient {
        FunctionsClient::from_config(&self.config).with_access_token(self.access_token())
    }

    /// Forgets in-memory state. The session file stays for the next run.
    pub fn dispose(&self) {
        self.user.lock().take();
    }
}
