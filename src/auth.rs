//! Users, roles and login sessions.
//!
//! Each department role may act on its own stage; `packing` also covers
//! dispatch, and `admin` may act everywhere plus the admin-only operations
//! listed in [`Action`]. Sessions are random tokens held in process memory,
//! so a restart logs everyone out.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use packflow_common::Stage;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::OmsError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Role {
    Admin,
    Design,
    Printing,
    Lamination,
    DieCut,
    Assembly,
    Packing,
    Dispatch,
}

impl Role {
    pub const ALL: [Role; 8] = [
        Role::Admin,
        Role::Design,
        Role::Printing,
        Role::Lamination,
        Role::DieCut,
        Role::Assembly,
        Role::Packing,
        Role::Dispatch,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Design => "design",
            Self::Printing => "printing",
            Self::Lamination => "lamination",
            Self::DieCut => "diecut",
            Self::Assembly => "assembly",
            Self::Packing => "packing",
            Self::Dispatch => "dispatch",
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Admin)
    }

    /// Stages whose queue this role works.
    pub fn stages(&self) -> Vec<Stage> {
        match self {
            Self::Admin => Stage::departments().collect(),
            Self::Design => vec![Stage::Design],
            Self::Printing => vec![Stage::Printing],
            Self::Lamination => vec![Stage::Lamination],
            Self::DieCut => vec![Stage::DieCut],
            Self::Assembly => vec![Stage::Assembly],
            Self::Packing => vec![Stage::Packing, Stage::Dispatch],
            Self::Dispatch => vec![Stage::Dispatch],
        }
    }

    pub fn can_act_on(&self, stage: Stage) -> bool {
        self.stages().contains(&stage)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "admin" => Ok(Self::Admin),
            "design" => Ok(Self::Design),
            "printing" => Ok(Self::Printing),
            "lamination" => Ok(Self::Lamination),
            "diecut" | "die_cut" | "die-cut" => Ok(Self::DieCut),
            "assembly" => Ok(Self::Assembly),
            "packing" | "packaging" => Ok(Self::Packing),
            "dispatch" => Ok(Self::Dispatch),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

impl TryFrom<String> for Role {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Role> for String {
    fn from(role: Role) -> Self {
        role.as_str().to_string()
    }
}

/// Operations reserved for admins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    CreateOrder,
    DeleteOrder,
    OverrideStage,
    EditAdminNotes,
    ManageCategories,
    ManageUsers,
    ViewAnalytics,
    ExportCsv,
}

impl Action {
    pub fn describe(&self) -> &'static str {
        match self {
            Self::CreateOrder => "create orders",
            Self::DeleteOrder => "delete orders",
            Self::OverrideStage => "override order stages",
            Self::EditAdminNotes => "edit admin notes",
            Self::ManageCategories => "manage categories",
            Self::ManageUsers => "manage users",
            Self::ViewAnalytics => "view analytics",
            Self::ExportCsv => "export orders",
        }
    }
}

pub fn authorize(role: Role, action: Action) -> Result<(), OmsError> {
    if role.is_admin() {
        Ok(())
    } else {
        Err(OmsError::Forbidden {
            role: role.to_string(),
            action: action.describe().to_string(),
        })
    }
}

pub fn authorize_stage(role: Role, stage: Stage) -> Result<(), OmsError> {
    if role.can_act_on(stage) {
        Ok(())
    } else {
        Err(OmsError::Forbidden {
            role: role.to_string(),
            action: format!("work on {} orders", stage),
        })
    }
}

/// SHA-256 of the password, lowercase hex.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// A record under `users/<username>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    #[serde(default)]
    pub username: String,
    pub role: Role,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,
    /// Plaintext password from older records. Never written.
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
}

impl UserRecord {
    pub fn new(username: &str, role: Role, name: Option<String>, password: &str) -> Self {
        Self {
            username: username.to_string(),
            role,
            name,
            password_hash: Some(hash_password(password)),
            password: None,
        }
    }

    pub fn verify(&self, password: &str) -> bool {
        match (&self.password_hash, &self.password) {
            (Some(hash), _) => hash.eq_ignore_ascii_case(&hash_password(password)),
            (None, Some(plain)) => plain == password,
            (None, None) => false,
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.username)
    }
}

/// The configured fallback admin account.
#[derive(Debug, Clone)]
pub struct DefaultAdmin {
    pub username: String,
    pub password: Option<String>,
}

/// Check credentials against the stored record for `username`, falling
/// back to the default admin when no record exists.
pub fn check_login(
    stored: Option<UserRecord>,
    default_admin: &DefaultAdmin,
    username: &str,
    password: &str,
) -> Result<UserRecord, OmsError> {
    let user = match stored {
        Some(mut user) => {
            if user.username.is_empty() {
                user.username = username.to_string();
            }
            user
        }
        None if username == default_admin.username => {
            let Some(admin_password) = &default_admin.password else {
                return Err(OmsError::Unauthorized);
            };
            UserRecord::new(username, Role::Admin, None, admin_password)
        }
        None => return Err(OmsError::Unauthorized),
    };
    if user.verify(password) {
        Ok(user)
    } else {
        Err(OmsError::Unauthorized)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Session {
    pub token: String,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub expires_at: DateTime<Utc>,
}

/// In-memory session table.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    pub async fn create(&self, user: &UserRecord) -> Session {
        let session = Session {
            token: Uuid::new_v4().simple().to_string(),
            username: user.username.clone(),
            name: user.display_name().to_string(),
            role: user.role,
            expires_at: Utc::now() + self.ttl,
        };
        self.sessions
            .write()
            .await
            .insert(session.token.clone(), session.clone());
        session
    }

    /// Live session for `token`; expired entries are dropped on lookup.
    pub async fn get(&self, token: &str) -> Option<Session> {
        let now = Utc::now();
        {
            let sessions = self.sessions.read().await;
            match sessions.get(token) {
                Some(session) if session.expires_at > now => return Some(session.clone()),
                Some(_) => {}
                None => return None,
            }
        }
        self.sessions.write().await.remove(token);
        None
    }

    pub async fn remove(&self, token: &str) -> bool {
        self.sessions.write().await.remove(token).is_some()
    }

    /// Drop every expired session; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        before - sessions.len()
    }
}

/// Token from an `Authorization: Bearer <token>` header value.
pub fn bearer_token(header: &str) -> Option<&str> {
    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
