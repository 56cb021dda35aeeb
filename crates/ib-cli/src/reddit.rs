//! Reddit implementation of [`Platform`] over the OAuth API.
//!
//! Feeds are emulated the way listing streams usually are: fetch the newest
//! page, hand out entries not seen before (oldest first), and report
//! [`FeedEvent::CaughtUp`] after `pause_after + 1` consecutive fetches with
//! nothing new.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use ib_core::BoundedRecencySet;
use ib_store::{RedditSettings, Settings};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info};

use crate::platform::{
    Comment, ExportDestination, FeedEvent, InboxItem, Platform, PlatformError, ReplyTarget,
};

/// Entries remembered per stream; a bit over three full pages.
const STREAM_SEEN_CAPACITY: usize = 301;
const PAGE_LIMIT: &str = "100";
const COMMENT_REPLY_SUBJECT: &str = "comment reply";
const PREVIOUS_POST_LABEL: &str = "Versione precedente";

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: u64,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Me {
    name: String,
}

#[derive(Debug, Deserialize)]
struct Thing<T> {
    #[serde(default)]
    kind: String,
    data: T,
}

#[derive(Debug, Deserialize)]
struct Listing<T> {
    data: ListingData<T>,
}

#[derive(Debug, Deserialize)]
struct ListingData<T> {
    children: Vec<Thing<T>>,
}

impl<T> Listing<T> {
    fn into_data(self) -> impl Iterator<Item = T> {
        self.data.children.into_iter().map(|thing| thing.data)
    }
}

#[derive(Debug, Deserialize)]
struct MultiData {
    path: String,
}

#[derive(Debug, Deserialize)]
struct SubredditData {
    display_name: String,
}

#[derive(Debug, Deserialize)]
struct ModeratorList {
    data: ModeratorChildren,
}

#[derive(Debug, Deserialize)]
struct ModeratorChildren {
    children: Vec<Moderator>,
}

#[derive(Debug, Deserialize)]
struct Moderator {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawComment {
    id: String,
    author: Option<String>,
    #[serde(default)]
    body: String,
    #[serde(default)]
    permalink: String,
    #[serde(default)]
    archived: bool,
}

#[derive(Debug, Deserialize)]
struct RawMessage {
    name: String,
    author: Option<String>,
    #[serde(default)]
    subject: String,
    #[serde(default)]
    body: String,
    #[serde(default)]
    context: String,
}

#[derive(Debug, Deserialize)]
struct RawPost {
    name: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    stickied: bool,
    #[serde(default)]
    archived: bool,
    #[serde(default)]
    permalink: String,
}

/// Deleted accounts come back as `[deleted]`.
fn real_author(author: Option<String>) -> Option<String> {
    author.filter(|a| !a.is_empty() && a != "[deleted]")
}

impl From<RawComment> for Comment {
    fn from(raw: RawComment) -> Self {
        Comment {
            id: raw.id,
            author: real_author(raw.author),
            body: raw.body,
            permalink: raw.permalink,
            archived: raw.archived,
        }
    }
}

fn inbox_item(thing: Thing<RawMessage>) -> InboxItem {
    let raw = thing.data;
    let author = real_author(raw.author);
    match thing.kind.as_str() {
        "t1" if raw.subject == COMMENT_REPLY_SUBJECT => InboxItem::CommentReply {
            id: raw.name,
            author,
        },
        "t1" => InboxItem::Mention {
            id: raw.name,
            author,
            subject: raw.subject,
            body: raw.body,
            context: raw.context,
        },
        _ => InboxItem::PrivateMessage {
            id: raw.name,
            author,
            subject: raw.subject,
            body: raw.body,
        },
    }
}

// ---------------------------------------------------------------------------
// Listing streams
// ---------------------------------------------------------------------------

trait Listed {
    fn listing_id(&self) -> &str;
}

impl Listed for Comment {
    fn listing_id(&self) -> &str {
        &self.id
    }
}

impl Listed for InboxItem {
    fn listing_id(&self) -> &str {
        self.id()
    }
}

#[derive(Debug)]
struct ListingStream<T> {
    pending: VecDeque<T>,
    seen: BoundedRecencySet,
    pause_after: u32,
    empty_fetches: u32,
    /// The last fetch brought nothing new; wait before the next one.
    idle: bool,
}

impl<T: Listed> ListingStream<T> {
    fn new(pause_after: u32) -> Self {
        Self {
            pending: VecDeque::new(),
            seen: BoundedRecencySet::new(STREAM_SEEN_CAPACITY),
            pause_after,
            empty_fetches: 0,
            idle: false,
        }
    }

    fn next_pending(&mut self) -> Option<T> {
        self.pending.pop_front()
    }

    /// Queue the unseen entries of a newest-first page.
    /// Returns true when the stream should report that it caught up.
    fn absorb(&mut self, page: Vec<T>) -> bool {
        let before = self.pending.len();
        for item in page.into_iter().rev() {
            if self.seen.add(item.listing_id()) {
                self.pending.push_back(item);
            }
        }
        if self.pending.len() > before {
            self.empty_fetches = 0;
            self.idle = false;
            return false;
        }
        self.idle = true;
        self.empty_fetches += 1;
        if self.empty_fetches > self.pause_after {
            self.empty_fetches = 0;
            return true;
        }
        false
    }

    fn reset(&mut self) {
        *self = Self::new(self.pause_after);
    }
}

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

async fn decode<T: DeserializeOwned>(
    operation: &str,
    request: reqwest::RequestBuilder,
) -> Result<T, PlatformError> {
    let response = request
        .send()
        .await
        .map_err(|e| PlatformError::Unavailable(format!("{operation} request failed: {e}")))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(PlatformError::from_status(operation, status.as_u16(), &body));
    }
    response
        .json::<T>()
        .await
        .map_err(|e| PlatformError::InvalidResponse(format!("failed to decode {operation}: {e}")))
}

/// Reddit reports most write failures as `{"json": {"errors": [...]}}` with a 200.
fn check_api_errors(operation: &str, value: &Value) -> Result<(), PlatformError> {
    match value.pointer("/json/errors").and_then(Value::as_array) {
        Some(errors) if !errors.is_empty() => Err(PlatformError::Rejected(format!(
            "{operation}: {}",
            Value::Array(errors.clone())
        ))),
        _ => Ok(()),
    }
}

fn required_str(operation: &str, value: &Value, pointer: &str) -> Result<String, PlatformError> {
    value
        .pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| PlatformError::InvalidResponse(format!("{operation}: missing {pointer}")))
}

fn flag(state: bool) -> &'static str {
    if state { "true" } else { "false" }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

struct Submitted {
    name: String,
    url: String,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct RedditClient {
    http: reqwest::Client,
    credentials: RedditSettings,
    token: Option<AccessToken>,
    username: String,
    multireddit_path: String,
    moderated: String,
    comments: ListingStream<Comment>,
    inbox: ListingStream<InboxItem>,
    poll_delay: Duration,
}

impl RedditClient {
    /// Log in and resolve the watched multireddit and moderated subreddit.
    pub async fn connect(settings: &Settings) -> Result<Self, PlatformError> {
        let reddit = &settings.reddit;
        let http = reqwest::Client::builder()
            .user_agent(reddit.user_agent.clone())
            .timeout(Duration::from_secs(reddit.request_timeout_secs.max(1)))
            .build()
            .map_err(|e| PlatformError::Rejected(format!("failed to create http client: {e}")))?;

        let mut credentials = reddit.clone();
        credentials.auth_base = credentials.auth_base.trim_end_matches('/').to_string();
        credentials.api_base = credentials.api_base.trim_end_matches('/').to_string();

        let mut client = Self {
            http,
            credentials,
            token: None,
            username: String::new(),
            multireddit_path: String::new(),
            moderated: String::new(),
            comments: ListingStream::new(settings.bot.comment_pause_after),
            inbox: ListingStream::new(settings.bot.inbox_pause_after),
            poll_delay: Duration::from_millis(settings.bot.poll_delay_ms),
        };
        client.authenticate().await?;

        let me: Me = client.get_json("me", "/api/v1/me", &[]).await?;
        client.username = me.name;
        client.multireddit_path = client
            .resolve_multireddit(settings.bot.multireddit.as_deref())
            .await?;
        client.moderated = client.resolve_moderated().await?;
        info!(
            username = %client.username,
            multireddit = %client.multireddit_path,
            subreddit = %client.moderated,
            "logged in to reddit"
        );
        Ok(client)
    }

    async fn resolve_multireddit(&mut self, configured: Option<&str>) -> Result<String, PlatformError> {
        match configured {
            Some(path) if path.starts_with('/') => Ok(path.trim_end_matches('/').to_string()),
            Some(name) => Ok(format!("/user/{}/m/{name}", self.username)),
            None => {
                let multis: Vec<Thing<MultiData>> =
                    self.get_json("multireddits", "/api/multi/mine", &[]).await?;
                multis
                    .into_iter()
                    .next()
                    .map(|multi| multi.data.path.trim_end_matches('/').to_string())
                    .ok_or_else(|| PlatformError::Rejected("account has no multireddit".into()))
            }
        }
    }

    async fn resolve_moderated(&mut self) -> Result<String, PlatformError> {
        let listing: Listing<SubredditData> = self
            .get_json(
                "moderated subreddits",
                "/subreddits/mine/moderator",
                &[("limit", "1")],
            )
            .await?;
        listing
            .into_data()
            .next()
            .map(|sub| sub.display_name)
            .ok_or_else(|| PlatformError::Rejected("account moderates no subreddit".into()))
    }

    async fn authenticate(&mut self) -> Result<String, PlatformError> {
        let request = self
            .http
            .post(format!("{}/api/v1/access_token", self.credentials.auth_base))
            .basic_auth(
                &self.credentials.client_id,
                Some(&self.credentials.client_secret),
            )
            .form(&[
                ("grant_type", "password"),
                ("username", self.credentials.username.as_str()),
                ("password", self.credentials.password.as_str()),
            ]);
        let response: TokenResponse = decode("access_token", request).await?;
        if let Some(error) = response.error {
            return Err(PlatformError::Rejected(format!("login failed: {error}")));
        }
        let value = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| PlatformError::InvalidResponse("login returned no access_token".into()))?;

        let lifetime = Duration::from_secs(response.expires_in.max(120) - 60);
        self.token = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + lifetime,
        });
        debug!(expires_in = response.expires_in, "access token acquired");
        Ok(value)
    }

    async fn access_token(&mut self) -> Result<String, PlatformError> {
        if let Some(token) = &self.token
            && token.expires_at > Instant::now()
        {
            return Ok(token.value.clone());
        }
        self.authenticate().await
    }

    async fn get_json<T: DeserializeOwned>(
        &mut self,
        operation: &str,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let token = self.access_token().await?;
        let request = self
            .http
            .get(format!("{}{path}", self.credentials.api_base))
            .bearer_auth(token)
            .query(query);
        decode(operation, request).await
    }

    async fn post_api(
        &mut self,
        operation: &str,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<Value, PlatformError> {
        let token = self.access_token().await?;
        let request = self
            .http
            .post(format!("{}{path}", self.credentials.api_base))
            .bearer_auth(token)
            .form(form);
        let value: Value = decode(operation, request).await?;
        check_api_errors(operation, &value)?;
        Ok(value)
    }

    async fn edit_text(&mut self, fullname: &str, body: &str) -> Result<(), PlatformError> {
        self.post_api(
            "edit",
            "/api/editusertext",
            &[("api_type", "json"), ("thing_id", fullname), ("text", body)],
        )
        .await?;
        Ok(())
    }

    async fn set_sticky(
        &mut self,
        fullname: &str,
        state: bool,
        to_profile: bool,
    ) -> Result<(), PlatformError> {
        self.post_api(
            "sticky",
            "/api/set_subreddit_sticky",
            &[
                ("api_type", "json"),
                ("id", fullname),
                ("state", flag(state)),
                ("to_profile", flag(to_profile)),
            ],
        )
        .await?;
        Ok(())
    }

    async fn lock(&mut self, fullname: &str) -> Result<(), PlatformError> {
        self.post_api("lock", "/api/lock", &[("id", fullname)]).await?;
        Ok(())
    }

    async fn submit(
        &mut self,
        subreddit: &str,
        title: &str,
        body: &str,
    ) -> Result<Submitted, PlatformError> {
        let value = self
            .post_api(
                "submit",
                "/api/submit",
                &[
                    ("api_type", "json"),
                    ("sr", subreddit),
                    ("kind", "self"),
                    ("title", title),
                    ("text", body),
                ],
            )
            .await?;
        Ok(Submitted {
            name: required_str("submit", &value, "/json/data/name")?,
            url: required_str("submit", &value, "/json/data/url")?,
        })
    }
}

impl Platform for RedditClient {
    fn username(&self) -> &str {
        &self.username
    }

    async fn moderators(&mut self) -> Result<Vec<String>, PlatformError> {
        let path = format!("/r/{}/about/moderators", self.moderated);
        let list: ModeratorList = self.get_json("moderators", &path, &[]).await?;
        Ok(list.data.children.into_iter().map(|m| m.name).collect())
    }

    async fn poll_comments(&mut self) -> Result<FeedEvent<Comment>, PlatformError> {
        loop {
            if let Some(comment) = self.comments.next_pending() {
                return Ok(FeedEvent::Item(comment));
            }
            if self.comments.idle {
                tokio::time::sleep(self.poll_delay).await;
            }
            let path = format!("{}/comments", self.multireddit_path);
            let listing: Listing<RawComment> = self
                .get_json(
                    "comments",
                    &path,
                    &[("limit", PAGE_LIMIT), ("raw_json", "1")],
                )
                .await?;
            let page = listing.into_data().map(Comment::from).collect();
            if self.comments.absorb(page) {
                return Ok(FeedEvent::CaughtUp);
            }
        }
    }

    async fn poll_inbox(&mut self) -> Result<FeedEvent<InboxItem>, PlatformError> {
        loop {
            if let Some(item) = self.inbox.next_pending() {
                return Ok(FeedEvent::Item(item));
            }
            if self.inbox.idle {
                tokio::time::sleep(self.poll_delay).await;
            }
            let listing: Listing<RawMessage> = self
                .get_json(
                    "inbox",
                    "/message/unread",
                    &[("limit", PAGE_LIMIT), ("raw_json", "1")],
                )
                .await?;
            let page = listing.data.children.into_iter().map(inbox_item).collect();
            if self.inbox.absorb(page) {
                return Ok(FeedEvent::CaughtUp);
            }
        }
    }

    async fn reconnect(&mut self) -> Result<(), PlatformError> {
        self.token = None;
        self.authenticate().await?;
        self.comments.reset();
        self.inbox.reset();
        Ok(())
    }

    async fn reply(&mut self, target: ReplyTarget<'_>, body: &str) -> Result<String, PlatformError> {
        let thing_id = match target {
            ReplyTarget::Comment(id) => format!("t1_{id}"),
            ReplyTarget::Message(fullname) => fullname.to_string(),
        };
        let value = self
            .post_api(
                "reply",
                "/api/comment",
                &[("api_type", "json"), ("thing_id", thing_id.as_str()), ("text", body)],
            )
            .await?;
        required_str("reply", &value, "/json/data/things/0/data/id")
    }

    async fn delete(&mut self, reply_id: &str) -> Result<(), PlatformError> {
        let fullname = format!("t1_{reply_id}");
        self.post_api("delete", "/api/del", &[("id", fullname.as_str())])
            .await?;
        Ok(())
    }

    async fn edit_richtext(&mut self, reply_id: &str, document: &Value) -> Result<(), PlatformError> {
        let fullname = format!("t1_{reply_id}");
        let payload = document.to_string();
        self.post_api(
            "richtext edit",
            "/api/editusertext",
            &[
                ("api_type", "json"),
                ("thing_id", fullname.as_str()),
                ("richtext_json", payload.as_str()),
            ],
        )
        .await?;
        Ok(())
    }

    async fn mark_read(&mut self, message_id: &str) -> Result<(), PlatformError> {
        self.post_api("mark read", "/api/read_message", &[("id", message_id)])
            .await?;
        Ok(())
    }

    async fn send_private_message(
        &mut self,
        recipient: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), PlatformError> {
        self.post_api(
            "compose",
            "/api/compose",
            &[
                ("api_type", "json"),
                ("to", recipient),
                ("subject", subject),
                ("text", body),
            ],
        )
        .await?;
        Ok(())
    }

    async fn fetch_comment(&mut self, id: &str) -> Result<Option<Comment>, PlatformError> {
        let fullname = format!("t1_{id}");
        let listing: Listing<RawComment> = self
            .get_json("info", "/api/info", &[("id", fullname.as_str()), ("raw_json", "1")])
            .await?;
        Ok(listing.into_data().next().map(Comment::from))
    }

    async fn publish_export(
        &mut self,
        destination: ExportDestination,
        title: &str,
        body: &str,
    ) -> Result<String, PlatformError> {
        let (subreddit, to_profile, scan) = match destination {
            ExportDestination::Profile => (format!("u_{}", self.username), true, 2),
            ExportDestination::Moderated => (self.moderated.clone(), false, 1),
        };
        let scan_limit = scan.to_string();
        let listing: Listing<RawPost> = self
            .get_json(
                "hot",
                &format!("/r/{subreddit}/hot"),
                &[("limit", scan_limit.as_str()), ("raw_json", "1")],
            )
            .await?;
        let previous = listing
            .into_data()
            .take(scan)
            .find(|post| post.stickied && post.title == title);

        let mut text = body.to_string();
        if let Some(post) = previous {
            if !post.archived {
                self.edit_text(&post.name, body).await?;
                info!(permalink = %post.permalink, "export updated");
                return Ok(post.permalink);
            }
            self.set_sticky(&post.name, false, to_profile).await?;
            text.push_str(&format!("\n\n[{PREVIOUS_POST_LABEL}]({})", post.permalink));
            info!(permalink = %post.permalink, "previous export archived");
        }

        let submitted = self.submit(&subreddit, title, &text).await?;
        self.set_sticky(&submitted.name, true, to_profile).await?;
        self.lock(&submitted.name).await?;
        info!(url = %submitted.url, "export posted");
        Ok(submitted.url)
    }
}
