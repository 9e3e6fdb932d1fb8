/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of per-identity reference lists.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum StreamType {
    /// Activities authored by the identity itself.
    Own,
    /// Union of OWN, CONNECTIONS and SPACES: the timeline the identity reads.
    Feed,
    /// Activities authored by connected identities.
    Connections,
    /// Activities posted into spaces the identity belongs to.
    Spaces,
}

impl StreamType {
    pub const ALL: [StreamType; 4] = [Self::Own, Self::Feed, Self::Connections, Self::Spaces];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Own => "own",
            Self::Feed => "feed",
            Self::Connections => "connections",
            Self::Spaces => "spaces",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "own" | "my_activities" | "mine" => Some(Self::Own),
            "feed" | "all" => Some(Self::Feed),
            "connections" | "connection" => Some(Self::Connections),
            "spaces" | "my_spaces" => Some(Self::Spaces),
            _ => None,
        }
    }
}

impl fmt::Display for StreamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct IdentityRefDto {
    pub provider: String,
    pub remote_id: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StoreActivityRequest {
    pub owner: IdentityRefDto,
    /// Set when the activity is posted into a space rather than a personal stream.
    #[serde(default)]
    pub space: Option<IdentityRefDto>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub created_at_ms: Option<i64>,
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpdateActivityRequest {
    #[serde(default)]
    pub body: serde_json::Value,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActivityStampDto {
    pub id: String,
    pub created_at_ms: i64,
    pub last_updated_ms: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConnectionRequest {
    pub a: IdentityRefDto,
    pub b: IdentityRefDto,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SpaceMemberRequest {
    pub member: IdentityRefDto,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct FanoutReportDto {
    pub applied: u64,
    pub unchanged: u64,
    pub skipped_targets: u64,
    pub failed: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ActivityResponse {
    pub activity: ActivityStampDto,
    pub fanout: FanoutReportDto,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IdentityResponse {
    pub identity: IdentityRefDto,
    pub key: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct PageResponse {
    pub stream: StreamType,
    pub offset: u32,
    pub limit: u32,
    pub items: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CountResponse {
    pub stream: StreamType,
    pub total: u64,
}
