/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use crate::collaborators::IdentityKey;
use std::fmt;
pub use timeline_protocol::StreamType;

/// Address of one reference list: one identity, one stream kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListKey {
    pub owner: IdentityKey,
    pub stream: StreamType,
}

impl fmt::Display for ListKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.stream)
    }
}

pub trait StreamTypeExt {
    fn list_for(self, owner: &IdentityKey) -> ListKey;
}

impl StreamTypeExt for StreamType {
    fn list_for(self, owner: &IdentityKey) -> ListKey {
        ListKey {
            owner: owner.clone(),
            stream: self,
        }
    }
}

/// How an identity relates to the author of an event, which fixes the lists
/// it receives an entry in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Audience {
    Author,
    Connection,
    SpaceMember,
}

impl Audience {
    pub const fn streams(self) -> &'static [StreamType] {
        match self {
            Self::Author => &[StreamType::Own, StreamType::Feed],
            Self::Connection => &[StreamType::Feed, StreamType::Connections],
            Self::SpaceMember => &[StreamType::Feed, StreamType::Spaces],
        }
    }

    /// Lists that keep an activity in FEED alive when this audience's own
    /// source list loses it.
    pub const fn other_feed_sources(self) -> &'static [StreamType] {
        match self {
            Self::Author => &[StreamType::Connections, StreamType::Spaces],
            Self::Connection => &[StreamType::Own, StreamType::Spaces],
            Self::SpaceMember => &[StreamType::Own, StreamType::Connections],
        }
    }

    /// The non-FEED list this audience contributes to FEED.
    pub const fn source(self) -> StreamType {
        match self {
            Self::Author => StreamType::Own,
            Self::Connection => StreamType::Connections,
            Self::SpaceMember => StreamType::Spaces,
        }
    }
}
