// src/auth.rs
//! Role lookup for the trigger surface. Only `Admin` may start a run.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Viewer,
}

pub trait AccessGate: Send + Sync {
    /// Role for the presented credential; `None` when there is no principal.
    fn role_for(&self, credential: Option<&str>) -> Option<Role>;
}

/// Compares a bearer/API key against one configured admin key.
/// Without a configured key nobody is admin.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenGate {
    admin_key: Option<String>,
}

impl StaticTokenGate {
    pub fn new(admin_key: Option<String>) -> Self {
        Self {
            admin_key: admin_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

impl AccessGate for StaticTokenGate {
    fn role_for(&self, credential: Option<&str>) -> Option<Role> {
        let presented = credential.map(str::trim).filter(|c| !c.is_empty())?;
        match &self.admin_key {
            Some(k) if constant_time_eq(k.as_bytes(), presented.as_bytes()) => Some(Role::Admin),
            _ => Some(Role::Viewer),
        }
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
