//! The bot's view of the social platform: two pollable feeds plus the
//! handful of write operations the dispatcher needs.

use std::fmt;

use serde_json::Value;

/// A comment from the watched feed. `id` is the bare base-36 id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub id: String,
    /// `None` when the account was deleted.
    pub author: Option<String>,
    pub body: String,
    pub permalink: String,
    pub archived: bool,
}

/// An inbox entry, tagged once when it is read off the feed.
/// Ids here are fullnames (`t1_…`, `t4_…`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboxItem {
    /// A comment notification worth forwarding: a `u/<bot>` mention or a
    /// reply to one of the bot's posts.
    Mention {
        id: String,
        author: Option<String>,
        subject: String,
        body: String,
        context: String,
    },
    /// A reply to one of the bot's own comments.
    CommentReply { id: String, author: Option<String> },
    PrivateMessage {
        id: String,
        author: Option<String>,
        subject: String,
        body: String,
    },
}

impl InboxItem {
    pub fn id(&self) -> &str {
        match self {
            InboxItem::Mention { id, .. }
            | InboxItem::CommentReply { id, .. }
            | InboxItem::PrivateMessage { id, .. } => id,
        }
    }

    pub fn author(&self) -> Option<&str> {
        match self {
            InboxItem::Mention { author, .. }
            | InboxItem::CommentReply { author, .. }
            | InboxItem::PrivateMessage { author, .. } => author.as_deref(),
        }
    }
}

/// One poll of a feed: an item, or "nothing new right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent<T> {
    Item(T),
    CaughtUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyTarget<'a> {
    /// Bare comment id.
    Comment(&'a str),
    /// Message fullname.
    Message(&'a str),
}

/// Where a catalog export is published.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportDestination {
    /// Pinned post on the bot's own profile (public table).
    Profile,
    /// Stickied post in the moderated subreddit (full table).
    Moderated,
}

#[derive(Debug)]
pub enum PlatformError {
    /// Transport failure, timeout, 5xx or rate limiting. Worth a reconnect.
    Unavailable(String),
    /// The platform refused the request (4xx or an API error list).
    Rejected(String),
    /// A response that could not be decoded.
    InvalidResponse(String),
}

impl PlatformError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, PlatformError::Unavailable(_))
    }

    /// Classify a non-success HTTP status.
    pub fn from_status(operation: &str, status: u16, body: &str) -> Self {
        let detail = format!("{operation} failed with status {status}: {}", truncate(body, 300));
        if status == 401 || status == 429 || status >= 500 {
            PlatformError::Unavailable(detail)
        } else {
            PlatformError::Rejected(detail)
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

impl fmt::Display for PlatformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlatformError::Unavailable(msg) => write!(f, "platform unavailable: {msg}"),
            PlatformError::Rejected(msg) => write!(f, "request rejected: {msg}"),
            PlatformError::InvalidResponse(msg) => write!(f, "invalid response: {msg}"),
        }
    }
}

impl std::error::Error for PlatformError {}

/// Operations the dispatcher performs against the platform.
///
/// Polls wait a bounded time and answer [`FeedEvent::CaughtUp`] instead of
/// blocking, so the caller can interleave shutdown checks.
#[allow(async_fn_in_trait)]
pub trait Platform {
    /// Name of the account the bot posts as.
    fn username(&self) -> &str;

    async fn moderators(&mut self) -> Result<Vec<String>, PlatformError>;

    async fn poll_comments(&mut self) -> Result<FeedEvent<Comment>, PlatformError>;

    async fn poll_inbox(&mut self) -> Result<FeedEvent<InboxItem>, PlatformError>;

    /// Re-authenticate and restart both feeds from scratch.
    async fn reconnect(&mut self) -> Result<(), PlatformError>;

    /// Post a reply; returns the new comment's bare id.
    async fn reply(&mut self, target: ReplyTarget<'_>, body: &str) -> Result<String, PlatformError>;

    async fn delete(&mut self, reply_id: &str) -> Result<(), PlatformError>;

    async fn edit_richtext(&mut self, reply_id: &str, document: &Value) -> Result<(), PlatformError>;

    async fn mark_read(&mut self, message_id: &str) -> Result<(), PlatformError>;

    async fn send_private_message(
        &mut self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), PlatformError>;

    async fn fetch_comment(&mut self, id: &str) -> Result<Option<Comment>, PlatformError>;

    /// Edit or replace the pinned export post; returns its permalink.
    async fn publish_export(
        &mut self,
        destination: ExportDestination,
        title: &str,
        body: &str,
    ) -> Result<String, PlatformError>;
}
