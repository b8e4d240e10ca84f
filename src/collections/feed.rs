//! Feed posts with likes and comments.
//!
//! Photo posts reference their photo by id instead of embedding the image,
//! so the feed never duplicates encoded image data. See
//! [`resolve`](crate::resolve) for turning those ids back into images.

use super::{Entity, NestContext, Repository};
use crate::error::{Result, StoreError};
use crate::events::Topic;
use crate::types::{lenient, RecordId, Timestamp, UserId};
use serde::{Deserialize, Serialize};
use std::ops::Deref;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostKind {
    #[default]
    Text,
    Photo,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Comment {
    pub id: RecordId,
    pub author: UserId,
    pub text: String,
    pub created_at: Timestamp,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FeedPost {
    pub id: RecordId,
    #[serde(rename = "type")]
    pub kind: PostKind,
    /// Body for text posts, caption for photo posts.
    #[serde(alias = "caption")]
    pub text: String,
    pub pet_ids: Vec<RecordId>,
    pub photo_id: Option<RecordId>,
    pub author: UserId,
    #[serde(deserialize_with = "lenient::count")]
    pub likes: u32,
    pub liked_by: Vec<UserId>,
    pub comments: Vec<Comment>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl FeedPost {
    pub fn is_liked_by(&self, user: &UserId) -> bool {
        self.liked_by.contains(user)
    }
}

impl Entity for FeedPost {
    const TOPIC: Topic = Topic::Feed;

    fn id(&self) -> &RecordId {
        &self.id
    }

    fn blank(id: RecordId, now: Timestamp, actor: &UserId) -> Self {
        FeedPost {
            id,
            author: actor.clone(),
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

pub struct Feed {
    repo: Repository<FeedPost>,
}

impl Feed {
    pub fn new(ctx: NestContext) -> Self {
        Self {
            repo: Repository::new(ctx),
        }
    }

    fn actor(&self) -> UserId {
        self.repo.context().identity.current_user()
    }

    pub fn publish_text(&self, text: impl Into<String>, pet_ids: Vec<RecordId>) -> Result<FeedPost> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(StoreError::InvalidOperation("post has no text".into()));
        }
        self.repo.insert(FeedPost {
            kind: PostKind::Text,
            text,
            pet_ids,
            author: self.actor(),
            ..Default::default()
        })
    }

    /// Publish a post pointing at an uploaded photo.
    pub fn publish_photo(
        &self,
        photo_id: RecordId,
        caption: impl Into<String>,
        pet_ids: Vec<RecordId>,
    ) -> Result<FeedPost> {
        self.repo.insert(FeedPost {
            kind: PostKind::Photo,
            text: caption.into(),
            pet_ids,
            photo_id: Some(photo_id),
            author: self.actor(),
            ..Default::default()
        })
    }

    /// Like a post as the current user. Liking twice is a no-op.
    pub fn like(&self, post_id: &RecordId) -> Result<Option<FeedPost>> {
        let user = self.actor();
        match self.repo.get_by_id(post_id) {
            None => Ok(None),
            Some(post) if post.is_liked_by(&user) => Ok(Some(post)),
            Some(_) => self.repo.modify(post_id, |post| {
                post.liked_by.push(user);
                post.likes += 1;
            }),
        }
    }

    /// Withdraw the current user's like. No-op if not liked.
    pub fn unlike(&self, post_id: &RecordId) -> Result<Option<FeedPost>> {
        let user = self.actor();
        match self.repo.get_by_id(post_id) {
            None => Ok(None),
            Some(post) if !post.is_liked_by(&user) => Ok(Some(post)),
            Some(_) => self.repo.modify(post_id, |post| {
                post.liked_by.retain(|u| u != &user);
                post.likes = post.likes.saturating_sub(1);
            }),
        }
    }

    /// Append a comment by the current user. `Ok(None)` if the post is gone.
    pub fn comment(&self, post_id: &RecordId, text: impl Into<String>) -> Result<Option<Comment>> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(StoreError::InvalidOperation("comment has no text".into()));
        }

        let comment = Comment {
            id: self.repo.context().ids.next_id(),
            author: self.actor(),
            text,
            created_at: Timestamp::now(),
        };
        let added = comment.clone();
        Ok(self
            .repo
            .modify(post_id, move |post| post.comments.push(added))?
            .map(|_| comment))
    }

    /// Delete a comment. Only its author or the post's author may do so.
    pub fn remove_comment(&self, post_id: &RecordId, comment_id: &RecordId) -> Result<bool> {
        let Some(post) = self.repo.get_by_id(post_id) else {
            return Ok(false);
        };
        let Some(comment) = post.comments.iter().find(|c| &c.id == comment_id) else {
            return Ok(false);
        };

        let user = self.actor();
        if comment.author != user && post.author != user {
            return Err(StoreError::Permission(format!(
                "{} cannot delete comment {}",
                user, comment_id
            )));
        }

        self.repo
            .modify(post_id, |post| post.comments.retain(|c| &c.id != comment_id))?;
        Ok(true)
    }

    pub fn by_author(&self, author: &UserId) -> Vec<FeedPost> {
        self.repo
            .load_all()
            .into_iter()
            .filter(|post| &post.author == author)
            .collect()
    }

    /// Posts mentioning a pet.
    pub fn for_pet(&self, pet_id: &RecordId) -> Vec<FeedPost> {
        self.repo
            .load_all()
            .into_iter()
            .filter(|post| post.pet_ids.contains(pet_id))
            .collect()
    }
}

impl Deref for Feed {
    type Target = Repository<FeedPost>;

    fn deref(&self) -> &Self::Target {
        &self.repo
    }
}
