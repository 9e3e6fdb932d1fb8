/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Services the timeline core consumes but does not own.
//!
//! Every implementation is injected at construction time; the core never looks
//! one up on its own.

use anyhow::Result;
use std::fmt;
use timeline_protocol::IdentityRefDto;

/// Opaque external reference to an identity, e.g. `("organization", "john")`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IdentityRef {
    pub provider: String,
    pub remote_id: String,
}

impl IdentityRef {
    pub fn new(provider: impl Into<String>, remote_id: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            remote_id: remote_id.into(),
        }
    }
}

impl fmt::Display for IdentityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.provider, self.remote_id)
    }
}

impl From<IdentityRefDto> for IdentityRef {
    fn from(v: IdentityRefDto) -> Self {
        Self {
            provider: v.provider,
            remote_id: v.remote_id,
        }
    }
}

impl From<&IdentityRef> for IdentityRefDto {
    fn from(v: &IdentityRef) -> Self {
        Self {
            provider: v.provider.clone(),
            remote_id: v.remote_id.clone(),
        }
    }
}

/// Stable internal key addressing an identity's reference lists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey(pub String);

impl IdentityKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The only view of an activity the core ever needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityStamp {
    pub id: String,
    pub created_at_ms: i64,
    pub last_updated_ms: i64,
}

pub trait ActivityContentStore: Send + Sync {
    fn exists(&self, activity_id: &str) -> Result<bool>;
    fn get(&self, activity_id: &str) -> Result<Option<ActivityStamp>>;
}

/// Point-in-time snapshot of the connection graph, re-read on every fan-out.
pub trait ConnectionGraph: Send + Sync {
    fn connections_of(&self, identity: &IdentityRef) -> Result<Vec<IdentityRef>>;
}

/// Current roster of a space.
pub trait SpaceRoster: Send + Sync {
    fn members_of(&self, space: &IdentityRef) -> Result<Vec<IdentityRef>>;
}

pub trait IdentityDirectory: Send + Sync {
    /// `Ok(None)` when the identity does not exist (or was deleted).
    fn resolve(&self, identity: &IdentityRef) -> Result<Option<IdentityKey>>;
}
