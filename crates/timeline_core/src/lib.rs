/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

//! Per-identity activity streams maintained by fan-out on write and read
//! through a self-healing pager.

pub mod api;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod fanout;
pub mod reader;
pub mod ref_store;
pub mod ref_store_sqlite;
pub mod runtime;
pub mod social_db;
pub mod storage_gc;
pub mod stream_type;
pub mod timeline;

#[cfg(test)]
mod testkit;

pub use collaborators::{IdentityKey, IdentityRef};
pub use error::{StreamError, StreamResult};
pub use stream_type::StreamType;
pub use timeline::{Timeline, TimelineDeps};
