//! Accounts and the signed-in session.
//!
//! The dashboard only needs to know whether somebody is signed in; it receives
//! a [`SharedSession`] at construction instead of reaching for global state.

use std::sync::{Arc, RwLock};

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::notify::Notification;
use crate::storage::{Pool, StoreError};

pub const MIN_PASSWORD_LEN: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid login credentials")]
    InvalidCredentials,

    #[error("User already registered")]
    EmailTaken,

    #[error("Unable to validate email address: invalid format")]
    InvalidEmail,

    #[error("Password should be at least {min} characters")]
    WeakPassword { min: usize },

    #[error("Not signed in")]
    NotSignedIn,

    #[error(transparent)]
    Storage(#[from] StoreError),
}

impl From<rusqlite::Error> for AuthError {
    fn from(e: rusqlite::Error) -> Self {
        AuthError::Storage(StoreError::Sql(e))
    }
}

impl From<r2d2::Error> for AuthError {
    fn from(e: r2d2::Error) -> Self {
        AuthError::Storage(StoreError::Pool(e))
    }
}

/// Session / auth provider.
#[async_trait::async_trait]
pub trait SessionProvider: Send + Sync {
    fn current_user(&self) -> Option<User>;

    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError>;

    /// Creates the account and signs it in.
    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<User, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;
}

pub type SharedSession = Arc<dyn SessionProvider>;

/// Accounts stored in the local SQLite database.
pub struct LocalSessions {
    pool: Pool,
    current: RwLock<Option<User>>,
}

impl LocalSessions {
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            current: RwLock::new(None),
        }
    }

    fn set_current(&self, user: Option<User>) {
        let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
        *current = user;
    }
}

#[async_trait::async_trait]
impl SessionProvider for LocalSessions {
    fn current_user(&self) -> Option<User> {
        self.current.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    async fn sign_in(&self, email: &str, password: &str) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        let conn = self.pool.get()?;
        let row = conn
            .query_row(
                "SELECT id, display_name, password_salt, password_hash FROM users WHERE email = ?1",
                params![email],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                },
            )
            .optional()?;

        let Some((id, display_name, salt, hash)) = row else {
            tracing::debug!(%email, "sign-in for unknown email");
            return Err(AuthError::InvalidCredentials);
        };
        if digest(&salt, password) != hash {
            tracing::debug!(%email, "sign-in with wrong password");
            return Err(AuthError::InvalidCredentials);
        }

        let id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt {
            id: id.clone(),
            reason: e.to_string(),
        })?;
        let user = User {
            id,
            email,
            display_name,
        };
        self.set_current(Some(user.clone()));
        tracing::info!(user = %user.id, "signed in");
        Ok(user)
    }

    async fn sign_up(&self, email: &str, password: &str, display_name: &str) -> Result<User, AuthError> {
        let email = normalize_email(email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(AuthError::WeakPassword { min: MIN_PASSWORD_LEN });
        }
        let display_name = match display_name.trim() {
            "" => email.split('@').next().unwrap_or_default().to_string(),
            name => name.to_string(),
        };

        let conn = self.pool.get()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM users WHERE email = ?1)",
            params![email],
            |row| row.get(0),
        )?;
        if exists {
            return Err(AuthError::EmailTaken);
        }

        let user = User {
            id: Uuid::new_v4(),
            email,
            display_name,
        };
        let salt = Uuid::new_v4().simple().to_string();
        conn.execute(
            "INSERT INTO users (id, email, display_name, password_salt, password_hash)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id.to_string(),
                user.email,
                user.display_name,
                salt,
                digest(&salt, password)
            ],
        )
        .map_err(insert_error)?;

        self.set_current(Some(user.clone()));
        tracing::info!(user = %user.id, "account created");
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let previous = {
            let mut current = self.current.write().unwrap_or_else(|p| p.into_inner());
            current.take()
        };
        match previous {
            Some(user) => {
                tracing::info!(user = %user.id, "signed out");
                Ok(())
            }
            None => Err(AuthError::NotSignedIn),
        }
    }
}

/// A UNIQUE violation means a concurrent sign-up took the email first.
fn insert_error(e: rusqlite::Error) -> AuthError {
    match e {
        rusqlite::Error::SqliteFailure(ref err, _) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
            AuthError::EmailTaken
        }
        e => AuthError::from(e),
    }
}

fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    };
    if valid {
        Ok(email)
    } else {
        Err(AuthError::InvalidEmail)
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

/// Toast for the outcome of a sign-in attempt.
pub fn sign_in_notification(outcome: &Result<User, AuthError>) -> Notification {
    match outcome {
        Ok(_) => Notification::success("Welcome back!", "You have successfully signed in."),
        Err(e) => Notification::failure("Sign in failed", e.to_string()),
    }
}

/// Toast for the outcome of a sign-up attempt.
pub fn sign_up_notification(outcome: &Result<User, AuthError>) -> Notification {
    match outcome {
        Ok(_) => Notification::success("Account created!", "You are now signed in."),
        Err(e) => Notification::failure("Sign up failed", e.to_string()),
    }
}

/// Toast for the outcome of a sign-out attempt.
pub fn sign_out_notification(outcome: &Result<(), AuthError>) -> Notification {
    match outcome {
        Ok(()) => Notification::success("Signed out", "You have been signed out."),
        Err(e) => Notification::failure("Sign out failed", e.to_string()),
    }
}
