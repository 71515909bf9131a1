//! # Domain Models
//!
//! These structs represent the core entities of Rusty-Board.
//! Boards are addressed by their slug, threads by their live ordinal within a
//! board, and posts by a globally increasing number.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type BoardId = String;
pub type ThreadId = u64;
pub type PostId = u64;

/// Per-board switches controlling what may be posted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardFlags {
    /// New threads must carry an attachment.
    pub image_only: bool,
    pub locked: bool,
    pub archived: bool,
    /// New threads on this board feed the recent-posts ring.
    pub show_latest: bool,
}

/// Represents a single Imageboard (e.g., /b/, /v/)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Board {
    /// The URL slug (e.g., "b" for /b/). Immutable once created.
    pub id: BoardId,
    pub name: String,
    pub description: String,
    /// Number of posts ever made on this board. Never decreases.
    pub post_count: u64,
    pub flags: BoardFlags,
    pub created_at: DateTime<Utc>,
}

impl Board {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            post_count: 0,
            flags: BoardFlags::default(),
            created_at: Utc::now(),
        }
    }
}

/// Reference to a blob held by the media store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    pub id: String,
    pub content_type: String,
    pub size: u64,
    pub thumbnail: Option<String>,
}

/// The fundamental unit of conversation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Post {
    pub board_id: BoardId,
    pub thread_id: ThreadId,
    pub id: PostId,
    /// Sanitized markup, safe to serve as-is.
    pub content: String,
    pub image: Option<ImageRef>,
    /// Display name (may carry a tripcode).
    pub author: String,
    /// Account behind the post, if any. Privileged readers only.
    pub identity: Option<String>,
    /// Address the post was submitted from. Privileged readers only.
    pub origin: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// Only meaningful on a thread's first post.
    pub sticky: bool,
    /// Only meaningful on a thread's first post.
    pub locked: bool,
    pub upvotes: u64,
    pub downvotes: u64,
}

/// A Thread is an ordered list of Posts rooted at its first post.
///
/// The persisted form is the post list alone; the thread-level fields are
/// derived from the first post by [`Thread::from_posts`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub board_id: BoardId,
    pub id: ThreadId,
    pub sticky: bool,
    pub locked: bool,
    pub timestamp: DateTime<Utc>,
    pub identity: Option<String>,
    pub origin: Option<String>,
    pub posts: Vec<Post>,
}

impl Thread {
    pub fn from_posts(board_id: &str, id: ThreadId, posts: Vec<Post>) -> Self {
        let mut thread = Self {
            board_id: board_id.to_string(),
            id,
            ..Self::default()
        };
        if let Some(op) = posts.first() {
            thread.sticky = op.sticky;
            thread.locked = op.locked;
            thread.timestamp = op.timestamp;
            thread.identity = op.identity.clone();
            thread.origin = op.origin.clone();
        }
        thread.posts = posts;
        thread
    }

    /// True for the not-found sentinel returned by degrading read paths.
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty()
    }

    pub fn first_post(&self) -> Option<&Post> {
        self.posts.first()
    }

    /// Timestamp of the latest post, or the thread's own when it has none.
    pub fn last_activity(&self) -> DateTime<Utc> {
        self.posts.last().map_or(self.timestamp, |p| p.timestamp)
    }

    /// The same thread reduced to its first post, for board index views.
    pub fn summary(&self) -> Self {
        let mut summary = self.clone();
        summary.posts.truncate(1);
        summary
    }
}

/// Uploaded file accompanying a new post.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub data: Bytes,
    pub content_type: String,
}

/// A post as submitted, before the store assigns its identifiers.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub content: String,
    pub author: String,
    pub identity: Option<String>,
    pub origin: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub sticky: bool,
    pub attachment: Option<Attachment>,
}

impl NewPost {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            author: "Anonymous".to_string(),
            identity: None,
            origin: None,
            timestamp: Utc::now(),
            sticky: false,
            attachment: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn with_attachment(mut self, data: impl Into<Bytes>, content_type: &str) -> Self {
        self.attachment = Some(Attachment {
            data: data.into(),
            content_type: content_type.to_string(),
        });
        self
    }
}

/// Cache-facing view of an uploaded image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub board_id: BoardId,
    pub thread_id: ThreadId,
    pub post_id: PostId,
    pub id: String,
    pub content_type: String,
    pub size: u64,
    pub thumbnail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Image {
    pub fn from_post(post: &Post) -> Option<Self> {
        let image = post.image.as_ref()?;
        Some(Self {
            board_id: post.board_id.clone(),
            thread_id: post.thread_id,
            post_id: post.id,
            id: image.id.clone(),
            content_type: image.content_type.clone(),
            size: image.size,
            thumbnail: image.thumbnail.clone(),
            timestamp: post.timestamp,
        })
    }
}

/// Site-wide announcement.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct News {
    pub id: u64,
    pub title: String,
    pub body: String,
    pub author: String,
    pub timestamp: DateTime<Utc>,
}

/// Digest of a newly created thread, shown in the cross-board "latest" view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecentPost {
    pub board_id: BoardId,
    pub thread_id: ThreadId,
    pub post_id: PostId,
    pub excerpt: String,
    pub thumbnail: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl RecentPost {
    const EXCERPT_CHARS: usize = 140;

    pub fn from_post(post: &Post) -> Self {
        Self {
            board_id: post.board_id.clone(),
            thread_id: post.thread_id,
            post_id: post.id,
            excerpt: post.content.chars().take(Self::EXCERPT_CHARS).collect(),
            thumbnail: post.image.as_ref().and_then(|i| i.thumbnail.clone()),
            timestamp: post.timestamp,
        }
    }
}

/// Site configuration record, projected as `global:config`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteConfig {
    pub title: String,
    pub description: String,
    pub default_name: String,
    pub max_upload_bytes: u64,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            title: "Rusty-Board".to_string(),
            description: String::new(),
            default_name: "Anonymous".to_string(),
            max_upload_bytes: 4 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vote {
    Up,
    Down,
}
