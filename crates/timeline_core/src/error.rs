/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use thiserror::Error;

/// Failures surfaced by the timeline API.
///
/// Dangling references are not part of this taxonomy: the reader repairs them
/// in place and never reports them to the caller.
#[derive(Debug, Error)]
pub enum StreamError {
    /// An identity addressed by an operation could not be resolved.
    #[error("reference target missing: {0}")]
    ReferenceTargetMissing(String),
    /// The activity is not (or no longer) in the content store.
    #[error("activity not found: {0}")]
    ActivityNotFound(String),
    #[error("reference list store unavailable: {0:#}")]
    StoreUnavailable(anyhow::Error),
    #[error("activity content store unavailable: {0:#}")]
    ContentUnavailable(anyhow::Error),
    #[error("connection graph unavailable: {0:#}")]
    GraphUnavailable(anyhow::Error),
}

impl StreamError {
    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable(_) | Self::ContentUnavailable(_) | Self::GraphUnavailable(_)
        )
    }
}

pub type StreamResult<T> = std::result::Result<T, StreamError>;
