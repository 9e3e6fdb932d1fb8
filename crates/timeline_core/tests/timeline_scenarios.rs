/*
 * SPDX-FileCopyrightText: 2026 RedHunt07 - FEDI3 Project
 * SPDX-License-Identifier: AGPL-3.0-only
 */

use std::sync::Arc;
use std::time::Duration;
use timeline_core::ref_store::{MemoryRefStore, RefListStore};
use timeline_core::ref_store_sqlite::SqliteRefStore;
use timeline_core::social_db::SocialDb;
use timeline_core::{IdentityKey, IdentityRef, StreamType, Timeline, TimelineDeps};

const DAY: i64 = 86_400_000;
const T0: i64 = 1_700_000_000_000;

struct Fixture {
    _dir: tempfile::TempDir,
    social: Arc<SocialDb>,
    timeline: Timeline,
}

impl Fixture {
    fn user(&self, name: &str) -> (IdentityRef, IdentityKey) {
        let r = IdentityRef::new("organization", name);
        let k = self.social.upsert_identity(&r).unwrap();
        (r, k)
    }

    /// Stores and fans out an activity created `at` ms since epoch.
    fn post(&self, who: &(IdentityRef, IdentityKey), id: &str, at: i64) {
        self.social.store_activity(&who.1, None, Some(id), Some(at), "{}").unwrap();
        self.timeline.record_activity_created(&who.0, id).unwrap();
    }

    fn connect(&self, a: &(IdentityRef, IdentityKey), b: &(IdentityRef, IdentityKey)) {
        self.social.add_connection(&a.1, &b.1).unwrap();
        self.timeline.record_connection_established(&a.0, &b.0).unwrap();
    }

    fn disconnect(&self, a: &(IdentityRef, IdentityKey), b: &(IdentityRef, IdentityKey)) {
        self.social.remove_connection(&a.1, &b.1).unwrap();
        self.timeline.record_connection_broken(&a.0, &b.0).unwrap();
    }

    fn page(&self, who: &(IdentityRef, IdentityKey), stream: StreamType, offset: u32, limit: u32) -> Vec<String> {
        self.timeline.page(&who.0, stream, offset, limit).unwrap()
    }
}

fn fixtures() -> Vec<(&'static str, Fixture)> {
    let mut out = Vec::new();
    for kind in ["memory", "sqlite"] {
        let dir = tempfile::tempdir().unwrap();
        let social = Arc::new(SocialDb::open(dir.path().join("social.db"), Duration::from_secs(5)).unwrap());
        let store: Arc<dyn RefListStore> = match kind {
            "memory" => Arc::new(MemoryRefStore::new()),
            _ => Arc::new(SqliteRefStore::open(dir.path().join("refs.db"), Duration::from_secs(5)).unwrap()),
        };
        let timeline = Timeline::new(
            TimelineDeps {
                store,
                content: social.clone(),
                graph: social.clone(),
                roster: social.clone(),
                directory: social.clone(),
            },
            3,
            100,
        );
        out.push((
            kind,
            Fixture {
                _dir: dir,
                social,
                timeline,
            },
        ));
    }
    out
}

#[test]
fn repeated_create_leaves_one_entry() {
    for (kind, f) in fixtures() {
        let owner = f.user("owner");
        f.post(&owner, "a", T0);
        f.timeline.record_activity_created(&owner.0, "a").unwrap();
        assert_eq!(f.page(&owner, StreamType::Own, 0, 10), vec!["a"], "{kind}");
        assert_eq!(f.timeline.count(&owner.0, StreamType::Own).unwrap(), 1, "{kind}");
    }
}

#[test]
fn concurrent_writers_keep_one_entry_per_activity() {
    for (kind, f) in fixtures() {
        let (owner, viewer) = (f.user("owner"), f.user("viewer"));
        f.social.add_connection(&owner.1, &viewer.1).unwrap();
        let ids: Vec<String> = (0..40).map(|i| format!("c{i:02}")).collect();
        for (i, id) in ids.iter().enumerate() {
            f.social
                .store_activity(&owner.1, None, Some(id), Some(T0 + i as i64 * 3_600_000), "{}")
                .unwrap();
        }

        std::thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for id in &ids {
                        f.timeline.record_activity_created(&owner.0, id).unwrap();
                    }
                });
            }
        });

        assert_eq!(f.timeline.count(&owner.0, StreamType::Own).unwrap(), 40, "{kind}");
        assert_eq!(f.timeline.count(&viewer.0, StreamType::Feed).unwrap(), 40, "{kind}");
        let feed = f.page(&viewer, StreamType::Feed, 0, 100);
        assert_eq!(feed.len(), 40, "{kind}");
        assert_eq!(feed.first().map(String::as_str), Some("c39"), "{kind}");
    }
}

#[test]
fn new_connection_sees_back_catalog() {
    for (kind, f) in fixtures() {
        let (owner, viewer) = (f.user("owner"), f.user("viewer"));
        f.post(&owner, "a1", T0);
        f.post(&owner, "a2", T0 + DAY);
        f.connect(&owner, &viewer);
        let feed = f.page(&viewer, StreamType::Feed, 0, 10);
        assert_eq!(feed, vec!["a2", "a1"], "{kind}");
    }
}

#[test]
fn disconnect_removes_only_connection_sourced_entries() {
    for (kind, f) in fixtures() {
        let (x, y) = (f.user("x"), f.user("y"));
        f.post(&x, "x1", T0);
        f.post(&y, "y1", T0 + 1_000);
        f.connect(&x, &y);
        f.post(&x, "x2", T0 + 2_000);
        assert_eq!(f.page(&y, StreamType::Feed, 0, 10), vec!["x2", "y1", "x1"], "{kind}");

        f.disconnect(&x, &y);
        assert_eq!(f.page(&y, StreamType::Feed, 0, 10), vec!["y1"], "{kind}");
        assert!(f.page(&y, StreamType::Connections, 0, 10).is_empty(), "{kind}");
        assert_eq!(f.page(&x, StreamType::Feed, 0, 10), vec!["x2", "x1"], "{kind}");
        assert!(f.page(&x, StreamType::Connections, 0, 10).is_empty(), "{kind}");
    }
}

#[test]
fn pages_are_slices_of_the_full_listing() {
    for (kind, f) in fixtures() {
        let (u, other) = (f.user("u"), f.user("other"));
        f.connect(&u, &other);
        for i in 0..12 {
            // Several activities per day, posts from both sides interleaved.
            let who = if i % 3 == 0 { &other } else { &u };
            f.post(who, &format!("a{i:02}"), T0 + (i as i64) * 7 * 3_600_000);
        }
        let full = f.page(&u, StreamType::Feed, 0, 100);
        assert_eq!(full.len(), 12, "{kind}");
        for (k, m) in [(0, 4), (2, 5), (7, 7), (11, 3), (12, 1)] {
            let expected: Vec<_> = full.iter().skip(k).take(m).cloned().collect();
            assert_eq!(f.page(&u, StreamType::Feed, k as u32, m as u32), expected, "{kind} {k}/{m}");
        }
    }
}

#[test]
fn purged_activity_disappears_from_reads() {
    for (kind, f) in fixtures() {
        let (u, v) = (f.user("u"), f.user("v"));
        f.connect(&u, &v);
        f.post(&u, "keep", T0);
        f.post(&u, "gone", T0 + 1_000);
        // Out-of-band delete, no retraction fan-out.
        f.social.delete_activity("gone").unwrap();

        assert_eq!(f.page(&v, StreamType::Feed, 0, 10), vec!["keep"], "{kind}");
        assert_eq!(f.timeline.count(&v.0, StreamType::Feed).unwrap(), 1, "{kind}");
        assert_eq!(f.page(&v, StreamType::Feed, 0, 10), vec!["keep"], "{kind}");
        // Lists not read yet still hold the entry until swept.
        assert_eq!(f.timeline.count(&u.0, StreamType::Own).unwrap(), 2, "{kind}");
    }
}

#[test]
fn scenario_own_activity_is_listed() {
    for (kind, f) in fixtures() {
        let u1 = f.user("u1");
        f.post(&u1, "act1", T0);
        assert_eq!(f.page(&u1, StreamType::Own, 0, 10), vec!["act1"], "{kind}");
    }
}

#[test]
fn scenario_connecting_surfaces_prior_activity() {
    for (kind, f) in fixtures() {
        let (u1, u2) = (f.user("u1"), f.user("u2"));
        f.post(&u2, "act2", T0);
        f.connect(&u1, &u2);
        assert!(f.page(&u1, StreamType::Feed, 0, 10).contains(&"act2".to_string()), "{kind}");
    }
}

#[test]
fn scenario_deleted_activity_leaves_streams() {
    for (kind, f) in fixtures() {
        let (u1, u2) = (f.user("u1"), f.user("u2"));
        f.connect(&u1, &u2);
        f.post(&u1, "act1", T0);
        f.social.delete_activity("act1").unwrap();
        f.timeline.record_activity_deleted(&u1.0, "act1").unwrap();
        assert!(f.page(&u1, StreamType::Own, 0, 10).is_empty(), "{kind}");
        assert!(!f.page(&u1, StreamType::Feed, 0, 10).contains(&"act1".to_string()), "{kind}");
        assert_eq!(f.timeline.count(&u2.0, StreamType::Feed).unwrap(), 0, "{kind}");
    }
}

#[test]
fn scenario_offset_ranks_by_recency() {
    for (kind, f) in fixtures() {
        let u1 = f.user("u1");
        for i in 1..=15 {
            f.post(&u1, &format!("act{i:02}"), T0 + (i as i64) * 5 * 3_600_000);
        }
        let expected: Vec<String> = (1..=5).rev().map(|i| format!("act{i:02}")).collect();
        assert_eq!(f.page(&u1, StreamType::Own, 10, 5), expected, "{kind}");
    }
}

#[test]
fn backdated_activity_lands_in_place() {
    for (kind, f) in fixtures() {
        let (u, v) = (f.user("u"), f.user("v"));
        f.post(&u, "today", T0 + 2 * DAY);
        f.post(&u, "yesterday", T0 + DAY);
        f.connect(&u, &v);
        // Arrives last but was created first.
        f.post(&u, "old", T0);
        assert_eq!(f.page(&v, StreamType::Feed, 0, 10), vec!["today", "yesterday", "old"], "{kind}");
    }
}

#[test]
fn space_activity_reaches_members() {
    for (kind, f) in fixtures() {
        let (space, m1, m2) = (f.user("space"), f.user("m1"), f.user("m2"));
        f.social.add_space_member(&space.1, &m1.1, None).unwrap();
        f.social.store_activity(&m1.1, Some(&space.1), Some("s1"), Some(T0), "{}").unwrap();
        f.timeline.record_space_activity_created(&space.0, "s1").unwrap();
        assert_eq!(f.page(&m1, StreamType::Spaces, 0, 10), vec!["s1"], "{kind}");

        f.social.add_space_member(&space.1, &m2.1, Some("member")).unwrap();
        f.timeline.record_space_member_joined(&space.0, &m2.0).unwrap();
        assert_eq!(f.page(&m2, StreamType::Feed, 0, 10), vec!["s1"], "{kind}");

        f.social.remove_space_member(&space.1, &m2.1).unwrap();
        f.timeline.record_space_member_left(&space.0, &m2.0).unwrap();
        assert!(f.page(&m2, StreamType::Feed, 0, 10).is_empty(), "{kind}");
        assert_eq!(f.page(&m1, StreamType::Feed, 0, 10), vec!["s1"], "{kind}");
    }
}

#[test]
fn deleted_identity_drops_out_of_fan_out() {
    for (kind, f) in fixtures() {
        let (u, gone, stays) = (f.user("u"), f.user("gone"), f.user("stays"));
        f.social.add_connection(&u.1, &gone.1).unwrap();
        f.social.add_connection(&u.1, &stays.1).unwrap();
        f.social.delete_identity(&gone.0).unwrap();
        f.social.store_activity(&u.1, None, Some("a"), Some(T0), "{}").unwrap();
        let report = f.timeline.record_activity_created(&u.0, "a").unwrap();
        assert_eq!(report.skipped_targets, 0, "{kind}");
        assert_eq!(report.applied, 4, "{kind}");
        assert_eq!(f.page(&stays, StreamType::Feed, 0, 10), vec!["a"], "{kind}");
    }
}
