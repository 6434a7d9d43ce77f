//! Connect-time authentication.
//!
//! Token cryptography lives outside the core: the validator is an external
//! collaborator exchanging an opaque credential for an identity. Connections
//! without a valid credential are guests: they observe broadcasts but cannot
//! place bets.

use crate::config::AuthConfig;
use crate::ledger::types::Role;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;

/// Authenticated subject attached to a connection.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub subject_id: String,
    pub role: Role,
}

/// External credential validator seam.
#[async_trait]
pub trait TokenValidator: Send + Sync {
    /// Exchange a credential for an identity; `None` means guest.
    async fn validate(&self, credential: &str) -> Option<Identity>;
}

/// Static credential table built from configuration.
pub struct StaticTokenValidator {
    tokens: HashMap<String, Identity>,
}

impl StaticTokenValidator {
    pub fn from_config(config: &AuthConfig) -> Self {
        let tokens = config
            .tokens
            .iter()
            .map(|(token, identity)| {
                (
                    token.clone(),
                    Identity {
                        subject_id: identity.subject_id.clone(),
                        role: identity.role,
                    },
                )
            })
            .collect();
        Self { tokens }
    }
}

#[async_trait]
impl TokenValidator for StaticTokenValidator {
    async fn validate(&self, credential: &str) -> Option<Identity> {
        self.tokens.get(credential).cloned()
    }
}

/// Mask a subject id for the public activity feed: first four and last three
/// characters survive.
pub fn mask_subject(id: &str) -> String {
    let chars: Vec<char> = id.chars().collect();
    if chars.len() < 8 {
        return "anon".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 3..].iter().collect();
    format!("{}...{}", head, tail)
}
