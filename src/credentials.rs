//! Credentials for base stations and rovers.
//!
//! The caster only ever reads credentials. Where they're stored is up to the
//! [`CredentialStore`] implementation. [`StaticCredentials`] is a simple store
//! that is loaded from a JSON file:
//!
//! ```json
//! {
//!   "mountpoints": [
//!     { "name": "TEST01", "password": "sha256$...$...", "position": { "latitude": 13.75, "longitude": 100.5 } }
//!   ],
//!   "users": [
//!     { "username": "user1", "password": "sha256$...$...", "expires_at": "2030-01-01T00:00:00Z", "allowed_mountpoints": ["TEST01"] }
//!   ]
//! }
//! ```

use std::{
    collections::HashMap,
    convert::Infallible,
    fmt::Display,
    path::Path,
    str::FromStr,
};

use chrono::{
    DateTime,
    Utc,
};
use serde::Deserialize;
use sha2::{
    Digest,
    Sha256,
};
use uuid::Uuid;

use crate::geo::DeclaredPosition;

const HASH_SCHEME: &str = "sha256";

#[derive(Debug, thiserror::Error)]
#[error("credentials error")]
pub enum Error {
    Io(#[from] std::io::Error),
    Json(#[from] serde_json::Error),
    #[error("duplicate mountpoint: {name}")]
    DuplicateMountpoint { name: String },
    #[error("duplicate user: {username}")]
    DuplicateUser { username: String },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid password hash: {reason}")]
pub struct InvalidPasswordHash {
    reason: &'static str,
}

/// Salted SHA-256 password hash.
///
/// Formatted as `sha256$<salt>$<hex digest>`, where the digest is computed
/// over the salt followed by the password.
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct PasswordHash {
    salt: String,
    digest: [u8; 32],
}

impl PasswordHash {
    /// Hash a password with a random salt.
    pub fn new(password: &str) -> Self {
        Self::with_salt(password, &Uuid::new_v4().simple().to_string())
    }

    pub fn with_salt(password: &str, salt: &str) -> Self {
        Self {
            salt: salt.to_owned(),
            digest: digest(salt, password),
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        // compare in constant time
        digest(&self.salt, password)
            .iter()
            .zip(&self.digest)
            .fold(0, |acc, (a, b)| acc | (a ^ b))
            == 0
    }
}

fn digest(salt: &str, password: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().into()
}

impl Display for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{HASH_SCHEME}${}${}",
            self.salt,
            hex::encode(self.digest)
        )
    }
}

impl std::fmt::Debug for PasswordHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PasswordHash").finish_non_exhaustive()
    }
}

impl FromStr for PasswordHash {
    type Err = InvalidPasswordHash;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('$');
        let (Some(scheme), Some(salt), Some(digest), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(InvalidPasswordHash {
                reason: "expected 3 fields",
            });
        };

        if scheme != HASH_SCHEME {
            return Err(InvalidPasswordHash {
                reason: "unsupported scheme",
            });
        }

        let mut buffer = [0u8; 32];
        hex::decode_to_slice(digest, &mut buffer).map_err(|_| {
            InvalidPasswordHash {
                reason: "invalid digest",
            }
        })?;

        Ok(Self {
            salt: salt.to_owned(),
            digest: buffer,
        })
    }
}

impl TryFrom<String> for PasswordHash {
    type Error = InvalidPasswordHash;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Credentials of a base station.
#[derive(Clone, Debug, Deserialize)]
pub struct MountpointRecord {
    pub name: String,
    pub password: PasswordHash,

    /// Position listed in the sourcetable.
    #[serde(default)]
    pub position: Option<DeclaredPosition>,
}

/// Credentials of a rover.
#[derive(Clone, Debug, Deserialize)]
pub struct UserRecord {
    pub username: String,
    pub password: PasswordHash,

    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    /// If set, the user may only subscribe to these mountpoints.
    #[serde(default)]
    pub allowed_mountpoints: Option<Vec<String>>,
}

impl UserRecord {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at <= now)
    }

    pub fn may_access(&self, mountpoint: &str) -> bool {
        self.allowed_mountpoints
            .as_ref()
            .is_none_or(|allowed| allowed.iter().any(|name| name == mountpoint))
    }
}

/// Read-only access to credentials.
///
/// Lookups may be issued concurrently by many connections.
pub trait CredentialStore: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    fn lookup_mountpoint(
        &self,
        name: &str,
    ) -> impl Future<Output = Result<Option<MountpointRecord>, Self::Error>> + Send;

    fn lookup_user(
        &self,
        username: &str,
    ) -> impl Future<Output = Result<Option<UserRecord>, Self::Error>> + Send;

    fn verify(&self, password: &str, hash: &PasswordHash) -> bool {
        hash.verify(password)
    }
}

/// In-memory credential store.
#[derive(Clone, Debug, Default)]
pub struct StaticCredentials {
    mountpoints: HashMap<String, MountpointRecord>,
    users: HashMap<String, UserRecord>,
}

#[derive(Debug, Deserialize)]
struct CredentialsFile {
    #[serde(default)]
    mountpoints: Vec<MountpointRecord>,
    #[serde(default)]
    users: Vec<UserRecord>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mountpoint(mut self, record: MountpointRecord) -> Self {
        self.mountpoints.insert(record.name.clone(), record);
        self
    }

    pub fn with_user(mut self, record: UserRecord) -> Self {
        self.users.insert(record.username.clone(), record);
        self
    }

    pub fn from_json(json: &str) -> Result<Self, Error> {
        let file: CredentialsFile = serde_json::from_str(json)?;
        let mut credentials = Self::new();

        for record in file.mountpoints {
            if credentials.mountpoints.contains_key(&record.name) {
                return Err(Error::DuplicateMountpoint { name: record.name });
            }
            credentials = credentials.with_mountpoint(record);
        }

        for record in file.users {
            if credentials.users.contains_key(&record.username) {
                return Err(Error::DuplicateUser {
                    username: record.username,
                });
            }
            credentials = credentials.with_user(record);
        }

        Ok(credentials)
    }

    pub async fn load(path: impl AsRef<Path>) -> Result<Self, Error> {
        let json = tokio::fs::read_to_string(path).await?;
        Self::from_json(&json)
    }

    pub fn num_mountpoints(&self) -> usize {
        self.mountpoints.len()
    }

    pub fn num_users(&self) -> usize {
        self.users.len()
    }
}

impl CredentialStore for StaticCredentials {
    type Error = Infallible;

    async fn lookup_mountpoint(&self, name: &str) -> Result<Option<MountpointRecord>, Self::Error> {
        Ok(self.mountpoints.get(name).cloned())
    }

    async fn lookup_user(&self, username: &str) -> Result<Option<UserRecord>, Self::Error> {
        Ok(self.users.get(username).cloned())
    }
}
