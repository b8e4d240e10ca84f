//! User records and the follow graph.

use super::{Collection, Entity, NestContext, Repository};
use crate::error::{Result, StoreError};
use crate::events::{Change, Topic};
use crate::types::{RecordId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

/// Public profile of a user.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserRecord {
    pub id: RecordId,
    pub name: String,
    pub username: String,
    pub avatar: Option<String>,
    pub cover: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserRecord {
    pub fn user_id(&self) -> UserId {
        UserId(self.id.0.clone())
    }
}

impl Entity for UserRecord {
    const TOPIC: Topic = Topic::Users;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn blank(id: RecordId, now: Timestamp, _actor: &UserId) -> Self {
        UserRecord {
            id,
            created_at: now,
            updated_at: now,
            ..Default::default()
        }
    }

    fn stamp(&mut self, id: RecordId, now: Timestamp) {
        self.id = id;
        self.created_at = now;
        self.updated_at = now;
    }

    fn touch(&mut self, now: Timestamp) {
        self.updated_at = now;
    }
}

pub struct Users {
    repo: Repository<UserRecord>,
}

impl Users {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    pub fn get(&self, user: &UserId) -> Option<UserRecord> {
        self.repo.get_by_id(&RecordId(user.0.clone()))
    }

    /// Case-insensitive lookup; a leading `@` is ignored.
    pub fn find_by_username(&self, username: &str) -> Option<UserRecord> {
        let wanted = username.trim().trim_start_matches('@');
        self.repo
            .load_all()
            .into_iter()
            .find(|u| u.username.eq_ignore_ascii_case(wanted))
    }
}

impl Deref for Users {
    type Target = Repository<UserRecord>;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}

/// `follower_id` follows `following_id`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FollowEdge {
    pub follower_id: UserId,
    pub following_id: UserId,
    pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowCounts {
    pub followers: usize,
    pub following: usize,
}

/// Many-to-many follow relation, stored as a flat edge list.
pub struct FollowGraph {
    edges: Collection<FollowEdge>,
}

impl FollowGraph {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            edges: Collection::new(ctx, Topic::Follows),
        }
    }

    fn actor(&self) -> UserId {
        self.edges.context().identity.current_user()
    }

    pub fn edges(&self) -> Vec<FollowEdge> {
        self.edges.load_all()
    }

    /// Current user follows `target`. Returns false if already following.
    pub fn follow(&self, target: &UserId) -> Result<bool> {
        let follower = self.actor();
        if &follower == target {
            return Err(StoreError::InvalidOperation("cannot follow yourself".into()));
        }

        let mut edges = self.edges.load_all();
        if edges
            .iter()
            .any(|e| e.follower_id == follower && &e.following_id == target)
        {
            return Ok(false);
        }

        edges.insert(
            0,
            FollowEdge {
                follower_id: follower,
                following_id: target.clone(),
                created_at: Timestamp::now(),
            },
        );
        self.edges.save_all(
            &mut edges,
            Change::Added {
                id: RecordId(target.0.clone()),
            },
        )?;
        Ok(true)
    }

    /// Current user stops following `target`. Returns false if not following.
    pub fn unfollow(&self, target: &UserId) -> Result<bool> {
        let follower = self.actor();
        let mut edges = self.edges.load_all();
        let before = edges.len();
        edges.retain(|e| !(e.follower_id == follower && &e.following_id == target));
        if edges.len() == before {
            return Ok(false);
        }

        self.edges.save_all(
            &mut edges,
            Change::Removed {
                id: RecordId(target.0.clone()),
            },
        )?;
        Ok(true)
    }

    pub fn is_following(&self, follower: &UserId, target: &UserId) -> bool {
        self.edges
            .load_all()
            .iter()
            .any(|e| &e.follower_id == follower && &e.following_id == target)
    }

    /// Users following `user`, most recent first.
    pub fn followers(&self, user: &UserId) -> Vec<UserId> {
        self.edges
            .load_all()
            .into_iter()
            .filter(|e| &e.following_id == user)
            .map(|e| e.follower_id)
            .collect()
    }

    /// Users `user` follows, most recent first.
    pub fn following(&self, user: &UserId) -> Vec<UserId> {
        self.edges
            .load_all()
            .into_iter()
            .filter(|e| &e.follower_id == user)
            .map(|e| e.following_id)
            .collect()
    }

    pub fn counts(&self, user: &UserId) -> FollowCounts {
        self.edges
            .load_all()
            .iter()
            .fold(FollowCounts::default(), |mut counts, e| {
                if &e.following_id == user {
                    counts.followers += 1;
                }
                if &e.follower_id == user {
                    counts.following += 1;
                }
                counts
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::test_support::context;
    use crate::identity::StaticIdentity;
    use std::sync::Arc;

    #[test]
    fn test_users_upsert_and_lookup() {
        let users = Users::new(context());
        users
            .upsert(UserRecord {
                id: RecordId::from("u1"),
                name: "Ana".into(),
                username: "ana_pets".into(),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(users.find_by_username("@ANA_PETS").unwrap().name, "Ana");
        assert!(users.get(&UserId::from("u1")).is_some());
        assert!(users.find_by_username("nobody").is_none());
    }

    #[test]
    fn test_follow_and_unfollow() {
        let identity = Arc::new(StaticIdentity::new("alice"));
        let graph = FollowGraph::new(NestContext {
            identity: identity.clone(),
            ..context()
        });
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        assert!(graph.follow(&bob).unwrap());
        assert!(!graph.follow(&bob).unwrap());
        assert!(graph.is_following(&alice, &bob));
        assert!(!graph.is_following(&bob, &alice));

        identity.switch_to("bob");
        graph.follow(&alice).unwrap();

        assert_eq!(graph.counts(&alice), FollowCounts { followers: 1, following: 1 });
        assert_eq!(graph.followers(&bob), vec![alice.clone()]);
        assert_eq!(graph.following(&bob), vec![alice.clone()]);

        assert!(graph.unfollow(&alice).unwrap());
        assert!(!graph.unfollow(&alice).unwrap());
        assert_eq!(graph.counts(&alice).followers, 0);
    }

    #[test]
    fn test_cannot_follow_self() {
        let graph = FollowGraph::new(context());
        assert!(graph.follow(&UserId::from("alice")).is_err());
        assert!(graph.edges().is_empty());
    }
}
