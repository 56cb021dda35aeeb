//! The control loop: polls the comment feed, drains the inbox whenever the
//! comments catch up, answers image tokens and private-message commands.
//!
//! Everything runs on one task. The dedup windows, the reply ledger and the
//! export schedule are owned here and never shared.

use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

use chrono::{Local, NaiveDateTime};
use ib_core::{
    BoundedRecencySet, CommandKind, ExportSchedule, KeywordCatalog, MatchReport, ReplyRecord,
    Templates, classify, find_matches, parse_delete_body, parse_force_subject, render_page,
    render_table,
};
use ib_store::{BotSettings, ReplyStateStore, StoreError};
use rand::SeedableRng;
use rand::rngs::SmallRng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::platform::{
    Comment, ExportDestination, FeedEvent, InboxItem, Platform, PlatformError, ReplyTarget,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Running,
    DrainingInbox,
    ShuttingDown,
}

/// What the loop does after an iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Reconnect,
    Stop,
}

#[derive(Debug)]
pub enum DispatchError {
    Platform(PlatformError),
    Store(StoreError),
    /// No admin configured and the subreddit lists no moderators.
    NoAdmin,
}

impl DispatchError {
    /// Unavailable platforms trigger a reconnect; anything else only costs the item.
    pub fn outcome(&self) -> Outcome {
        match self {
            DispatchError::Platform(e) if e.is_unavailable() => Outcome::Reconnect,
            _ => Outcome::Continue,
        }
    }
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::Platform(e) => write!(f, "{e}"),
            DispatchError::Store(e) => write!(f, "state store: {e}"),
            DispatchError::NoAdmin => {
                write!(f, "no admin configured and no moderators to forward to")
            }
        }
    }
}

impl std::error::Error for DispatchError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DispatchError::Platform(e) => Some(e),
            DispatchError::Store(e) => Some(e),
            DispatchError::NoAdmin => None,
        }
    }
}

impl From<PlatformError> for DispatchError {
    fn from(e: PlatformError) -> Self {
        DispatchError::Platform(e)
    }
}

impl From<StoreError> for DispatchError {
    fn from(e: StoreError) -> Self {
        DispatchError::Store(e)
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Recipient of forwarded messages; first moderator when `None`.
    pub admin: Option<String>,
    pub seen_capacity: usize,
    pub reconnect_delay: Duration,
    pub export_title: String,
    pub full_export_title: String,
}

impl DispatchConfig {
    pub fn from_settings(bot: &BotSettings) -> Self {
        Self {
            admin: bot.admin.clone(),
            seen_capacity: bot.seen_capacity,
            reconnect_delay: Duration::from_secs(bot.reconnect_delay_secs),
            export_title: bot.export_title.clone(),
            full_export_title: bot.full_export_title.clone(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::from_settings(&BotSettings::default())
    }
}

/// Data loaded at startup and owned by the dispatcher for the whole run.
pub struct BotData {
    pub catalog: KeywordCatalog,
    pub templates: Templates,
    pub ledger: ReplyStateStore,
}

/// A reply produced on a moderator's request.
#[derive(Debug, Clone)]
pub struct ForcedReply {
    pub record: ReplyRecord,
    pub permalink: String,
}

pub struct Dispatcher<P> {
    platform: P,
    catalog: KeywordCatalog,
    templates: Templates,
    ledger: ReplyStateStore,
    seen_comments: BoundedRecencySet,
    seen_messages: BoundedRecencySet,
    /// Lower-cased moderator names.
    moderators: HashSet<String>,
    admin: String,
    schedule: ExportSchedule,
    rng: SmallRng,
    state: LoopState,
    cancel: CancellationToken,
    config: DispatchConfig,
}

impl<P: Platform> Dispatcher<P> {
    /// Fetch the moderator list and settle the forwarding recipient.
    pub async fn connect(
        mut platform: P,
        data: BotData,
        config: DispatchConfig,
        cancel: CancellationToken,
    ) -> Result<Self, DispatchError> {
        let moderators = platform.moderators().await?;
        let admin = config
            .admin
            .clone()
            .or_else(|| moderators.first().cloned())
            .ok_or(DispatchError::NoAdmin)?;
        info!(
            username = platform.username(),
            moderators = moderators.len(),
            admin = %admin,
            "dispatcher ready"
        );

        Ok(Self {
            platform,
            catalog: data.catalog,
            templates: data.templates,
            ledger: data.ledger,
            seen_comments: BoundedRecencySet::new(config.seen_capacity),
            seen_messages: BoundedRecencySet::new(config.seen_capacity),
            moderators: moderators.iter().map(|m| m.to_lowercase()).collect(),
            admin,
            schedule: ExportSchedule::starting(Local::now().naive_local()),
            rng: SmallRng::from_os_rng(),
            state: LoopState::Running,
            cancel,
            config,
        })
    }

    fn is_moderator(&self, name: &str) -> bool {
        self.moderators.contains(&name.to_lowercase())
    }

    // -----------------------------------------------------------------------
    // Loop
    // -----------------------------------------------------------------------

    /// Run until the cancellation token fires. Backend outages reconnect.
    pub async fn run(&mut self) {
        info!("watching comments and inbox");
        loop {
            match self.run_feeds().await {
                Outcome::Stop => break,
                Outcome::Continue => {}
                Outcome::Reconnect => {
                    if self.reconnect().await == Outcome::Stop {
                        break;
                    }
                }
            }
        }
        info!("dispatcher stopped");
    }

    async fn run_feeds(&mut self) -> Outcome {
        loop {
            let outcome = self.step().await;
            if outcome != Outcome::Continue {
                return outcome;
            }
        }
    }

    async fn reconnect(&mut self) -> Outcome {
        loop {
            let cancel = self.cancel.clone();
            let waited = tokio::select! {
                _ = cancel.cancelled() => false,
                _ = tokio::time::sleep(self.config.reconnect_delay) => true,
            };
            if !waited {
                return self.shut_down();
            }
            match self.platform.reconnect().await {
                Ok(()) => {
                    info!("feeds reconnected");
                    return Outcome::Continue;
                }
                Err(e) => warn!(error = %e, "reconnect failed, retrying"),
            }
        }
    }

    /// One comment-feed poll and whatever it leads to.
    pub async fn step(&mut self) -> Outcome {
        if self.cancel.is_cancelled() {
            return self.shut_down();
        }
        self.state = LoopState::Running;

        let cancel = self.cancel.clone();
        let polled = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            polled = self.platform.poll_comments() => Some(polled),
        };
        let Some(polled) = polled else {
            return self.shut_down();
        };
        if self.cancel.is_cancelled() {
            return self.shut_down();
        }

        match polled {
            Ok(FeedEvent::Item(comment)) => self.handle_comment(comment).await,
            Ok(FeedEvent::CaughtUp) => self.drain_inbox().await,
            Err(e) => self.feed_failure("comments", e),
        }
    }

    /// Process the inbox backlog, then run the export check.
    async fn drain_inbox(&mut self) -> Outcome {
        self.state = LoopState::DrainingInbox;
        loop {
            if self.cancel.is_cancelled() {
                return self.shut_down();
            }
            let cancel = self.cancel.clone();
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                polled = self.platform.poll_inbox() => Some(polled),
            };
            let Some(polled) = polled else {
                return self.shut_down();
            };
            match polled {
                Ok(FeedEvent::Item(item)) => {
                    let outcome = self.handle_inbox(item).await;
                    if outcome != Outcome::Continue {
                        return outcome;
                    }
                }
                Ok(FeedEvent::CaughtUp) => break,
                Err(e) => return self.feed_failure("inbox", e),
            }
        }
        debug!("inbox drained");

        let outcome = match self.check_export(Local::now().naive_local()).await {
            Ok(_) => Outcome::Continue,
            Err(e) => {
                error!(error = %e, "export failed");
                e.outcome()
            }
        };
        if outcome == Outcome::Continue {
            self.state = LoopState::Running;
        }
        outcome
    }

    fn shut_down(&mut self) -> Outcome {
        if self.state != LoopState::ShuttingDown {
            info!("shutdown requested, leaving the feeds");
        }
        self.state = LoopState::ShuttingDown;
        Outcome::Stop
    }

    fn feed_failure(&self, feed: &str, e: PlatformError) -> Outcome {
        if e.is_unavailable() {
            warn!(feed, error = %e, "feed unavailable, reconnecting");
        } else {
            error!(feed, error = %e, "feed failed, reconnecting");
        }
        Outcome::Reconnect
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    async fn handle_comment(&mut self, comment: Comment) -> Outcome {
        if self.seen_comments.contains(&comment.id) {
            return Outcome::Continue;
        }
        self.seen_comments.add(&comment.id);

        match self.process_comment(&comment, false).await {
            Ok(_) => Outcome::Continue,
            Err(e) => {
                error!(comment = %comment.id, error = %e, "failed to process comment");
                e.outcome()
            }
        }
    }

    /// Match the comment body and reply if anything resolved and the comment
    /// has no active reply yet. `force` selects the forced templates.
    pub async fn process_comment(
        &mut self,
        comment: &Comment,
        force: bool,
    ) -> Result<Option<ReplyRecord>, DispatchError> {
        if self.ledger.find_active(&comment.id).is_some() {
            debug!(comment = %comment.id, "already answered");
            return Ok(None);
        }

        let report = find_matches(&self.catalog, &comment.body, &mut self.rng);
        log_report(&report, &comment.permalink);
        if report.is_empty() {
            return Ok(None);
        }
        if self.cancel.is_cancelled() {
            return Ok(None);
        }

        let forced = force || report.any_fuzzy();
        let username = self.platform.username().to_string();
        let body = self
            .templates
            .compose_body(&report.matches, forced, &username, &comment.id);
        let reply_id = self
            .platform
            .reply(ReplyTarget::Comment(&comment.id), &body)
            .await?;
        info!(permalink = %comment.permalink, reply = %reply_id, "posted reply");

        let mut record = ReplyRecord::new(
            &reply_id,
            &comment.id,
            comment.author.as_deref().unwrap_or_default(),
        );
        if let Some(document) =
            self.templates
                .compose_richtext(&report.matches, forced, &username, &comment.id)
        {
            match self.platform.edit_richtext(&reply_id, &document).await {
                Ok(()) => record.richtext = true,
                Err(e) => warn!(reply = %reply_id, error = %e, "richtext edit failed"),
            }
        }

        self.ledger.record(record.clone())?;
        Ok(Some(record))
    }

    /// Reply to comment `comment_id` as if its body were `text`, with the
    /// forced templates. `None` when the comment is gone, archived, already
    /// answered, or `text` matches nothing.
    pub async fn force_reply(
        &mut self,
        comment_id: &str,
        text: &str,
    ) -> Result<Option<ForcedReply>, DispatchError> {
        let Some(mut comment) = self.platform.fetch_comment(comment_id).await? else {
            info!(comment = comment_id, "forced comment not found");
            return Ok(None);
        };
        if comment.archived || comment.author.is_none() {
            info!(comment = comment_id, "forced comment is archived or orphaned");
            return Ok(None);
        }
        comment.body = text.to_string();

        let record = self.process_comment(&comment, true).await?;
        Ok(record.map(|record| ForcedReply {
            record,
            permalink: comment.permalink,
        }))
    }

    // -----------------------------------------------------------------------
    // Inbox
    // -----------------------------------------------------------------------

    async fn handle_inbox(&mut self, item: InboxItem) -> Outcome {
        if self.seen_messages.contains(item.id()) {
            return Outcome::Continue;
        }
        self.seen_messages.add(item.id());

        let id = item.id().to_string();
        match self.process_inbox(item).await {
            Ok(()) => Outcome::Continue,
            Err(e) => {
                error!(message = %id, error = %e, "failed to process message");
                e.outcome()
            }
        }
    }

    pub async fn process_inbox(&mut self, item: InboxItem) -> Result<(), DispatchError> {
        let Some(author) = item.author().map(str::to_string) else {
            debug!(message = item.id(), "message without sender ignored");
            return Ok(());
        };

        match item {
            InboxItem::CommentReply { .. } => Ok(()),
            InboxItem::Mention {
                id,
                subject,
                body,
                context,
                ..
            } => {
                info!(context = %context, subject = %subject, "comment notification");
                self.platform.mark_read(&id).await?;
                self.forward(&author, &subject, &format!("{context}\n\n{body}"))
                    .await
            }
            InboxItem::PrivateMessage {
                id, subject, body, ..
            } => {
                self.platform.mark_read(&id).await?;
                match classify(&subject) {
                    CommandKind::Delete => self.process_delete(&body, &author).await,
                    CommandKind::Force => self.process_force(&id, &author, &subject, &body).await,
                    CommandKind::Forward => self.forward(&author, &subject, &body).await,
                }
            }
        }
    }

    async fn forward(&mut self, author: &str, subject: &str, body: &str) -> Result<(), DispatchError> {
        let admin = self.admin.clone();
        self.platform
            .send_private_message(&admin, &format!("FW from {author}: {subject}"), body)
            .await?;
        debug!(author, subject, "forwarded to admin");
        Ok(())
    }

    async fn process_delete(&mut self, body: &str, author: &str) -> Result<(), DispatchError> {
        let Some(parent_id) = parse_delete_body(body) else {
            info!(author, "malformed delete request");
            return Ok(());
        };
        let Some(record) = self.ledger.find_active(&parent_id).cloned() else {
            info!(parent = %parent_id, "nothing to delete");
            return Ok(());
        };
        if !author.eq_ignore_ascii_case(&record.parent_author) && !self.is_moderator(author) {
            info!(author, parent = %parent_id, "delete refused, not the parent author");
            return Ok(());
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        self.platform.delete(&record.id).await?;
        self.ledger.mark_deleted(&parent_id)?;
        info!(parent = %parent_id, reply = %record.id, "deleted reply");
        Ok(())
    }

    async fn process_force(
        &mut self,
        message_id: &str,
        author: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), DispatchError> {
        if !self.is_moderator(author) {
            info!(author, "force request from non-moderator ignored");
            return Ok(());
        }
        let Some(target) = parse_force_subject(subject) else {
            info!(subject, "force request without a comment id");
            return Ok(());
        };

        info!(message = message_id, comment = %target, "forced reply requested");
        match self.force_reply(&target, body).await? {
            Some(forced) => {
                let confirmation = format!("Fatto [commento]({})", forced.permalink);
                self.platform
                    .reply(ReplyTarget::Message(message_id), &confirmation)
                    .await?;
            }
            None => info!(comment = %target, "forced reply produced nothing"),
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    /// Publish both catalog exports if the schedule is due at `now`.
    pub async fn check_export(&mut self, now: NaiveDateTime) -> Result<bool, DispatchError> {
        if !self.schedule.is_due(now) {
            return Ok(false);
        }
        self.schedule.advance(now);

        let username = self.platform.username().to_string();
        let timestamp = now.format("%Y-%m-%dT%H:%M:%S").to_string();
        let page = render_page(
            &self.templates.export,
            &username,
            &render_table(&self.catalog, false),
            &timestamp,
        );
        let public = self
            .platform
            .publish_export(ExportDestination::Profile, &self.config.export_title, &page)
            .await?;
        info!(permalink = %public, "published export");

        let full = render_table(&self.catalog, true);
        let moderated = self
            .platform
            .publish_export(
                ExportDestination::Moderated,
                &self.config.full_export_title,
                &full,
            )
            .await?;
        info!(permalink = %moderated, next = %self.schedule.next(), "published full export");
        Ok(true)
    }
}

fn log_report(report: &MatchReport, permalink: &str) {
    for (requested, substituted) in &report.fuzzy {
        info!(requested = %requested, substituted = %substituted, "fuzzy match");
    }
    for word in &report.misses {
        info!(word = %word, permalink, "no image for keyword");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{HashMap, VecDeque};

    use chrono::NaiveDate;
    use ib_core::{Image, ImageSet};
    use serde_json::Value;

    // -----------------------------------------------------------------------
    // Scripted platform
    // -----------------------------------------------------------------------

    #[derive(Default)]
    struct FakePlatform {
        comment_feed: VecDeque<Result<FeedEvent<Comment>, PlatformError>>,
        inbox_feed: VecDeque<Result<FeedEvent<InboxItem>, PlatformError>>,
        comments: HashMap<String, Comment>,
        moderators: Vec<String>,
        /// Cancelled once the comment script runs dry.
        stop_when_idle: Option<CancellationToken>,
        fail_richtext: bool,
        next_reply: usize,
        comment_polls: usize,
        replies: Vec<(String, String)>,
        richtext: Vec<(String, Value)>,
        deleted: Vec<String>,
        read: Vec<String>,
        sent: Vec<(String, String, String)>,
        exports: Vec<(ExportDestination, String, String)>,
        reconnects: usize,
    }

    impl Platform for FakePlatform {
        fn username(&self) -> &str {
            "immaginibot"
        }

        async fn moderators(&mut self) -> Result<Vec<String>, PlatformError> {
            Ok(self.moderators.clone())
        }

        async fn poll_comments(&mut self) -> Result<FeedEvent<Comment>, PlatformError> {
            self.comment_polls += 1;
            match self.comment_feed.pop_front() {
                Some(event) => event,
                None => {
                    if let Some(token) = &self.stop_when_idle {
                        token.cancel();
                    }
                    Ok(FeedEvent::CaughtUp)
                }
            }
        }

        async fn poll_inbox(&mut self) -> Result<FeedEvent<InboxItem>, PlatformError> {
            self.inbox_feed
                .pop_front()
                .unwrap_or(Ok(FeedEvent::CaughtUp))
        }

        async fn reconnect(&mut self) -> Result<(), PlatformError> {
            self.reconnects += 1;
            Ok(())
        }

        async fn reply(
            &mut self,
            target: ReplyTarget<'_>,
            body: &str,
        ) -> Result<String, PlatformError> {
            let target = match target {
                ReplyTarget::Comment(id) | ReplyTarget::Message(id) => id.to_string(),
            };
            self.replies.push((target, body.to_string()));
            self.next_reply += 1;
            Ok(format!("r{:06}", self.next_reply))
        }

        async fn delete(&mut self, reply_id: &str) -> Result<(), PlatformError> {
            self.deleted.push(reply_id.to_string());
            Ok(())
        }

        async fn edit_richtext(
            &mut self,
            reply_id: &str,
            document: &Value,
        ) -> Result<(), PlatformError> {
            if self.fail_richtext {
                return Err(PlatformError::Rejected("richtext disabled".into()));
            }
            self.richtext.push((reply_id.to_string(), document.clone()));
            Ok(())
        }

        async fn mark_read(&mut self, message_id: &str) -> Result<(), PlatformError> {
            self.read.push(message_id.to_string());
            Ok(())
        }

        async fn send_private_message(
            &mut self,
            recipient: &str,
            subject: &str,
            body: &str,
        ) -> Result<(), PlatformError> {
            self.sent
                .push((recipient.to_string(), subject.to_string(), body.to_string()));
            Ok(())
        }

        async fn fetch_comment(&mut self, id: &str) -> Result<Option<Comment>, PlatformError> {
            Ok(self.comments.get(id).cloned())
        }

        async fn publish_export(
            &mut self,
            destination: ExportDestination,
            title: &str,
            body: &str,
        ) -> Result<String, PlatformError> {
            self.exports
                .push((destination, title.to_string(), body.to_string()));
            Ok(format!("/r/x/comments/{}", self.exports.len()))
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn catalog() -> KeywordCatalog {
        KeywordCatalog::new([
            ImageSet::new(
                "cat",
                ["cat", "gatto"],
                ["micio"],
                false,
                [Image::new("https://i.example/cat.png", None)],
            )
            .unwrap(),
            ImageSet::new(
                "dog",
                ["cane"],
                Vec::<String>::new(),
                true,
                [Image::new(
                    "https://i.example/dog.gif",
                    Some("media123".to_string()),
                )],
            )
            .unwrap(),
        ])
    }

    fn templates() -> Templates {
        Templates {
            body: "BODY {images} del:{comment_id}".to_string(),
            forced: "FORCED {images} del:{comment_id}".to_string(),
            ..Templates::default()
        }
    }

    fn comment(id: &str, author: &str, body: &str) -> Comment {
        Comment {
            id: id.to_string(),
            author: Some(author.to_string()),
            body: body.to_string(),
            permalink: format!("/r/test/comments/p/t/{id}"),
            archived: false,
        }
    }

    fn pm(id: &str, author: &str, subject: &str, body: &str) -> InboxItem {
        InboxItem::PrivateMessage {
            id: id.to_string(),
            author: Some(author.to_string()),
            subject: subject.to_string(),
            body: body.to_string(),
        }
    }

    fn platform() -> FakePlatform {
        FakePlatform {
            moderators: vec!["Creator".to_string(), "helper".to_string()],
            ..FakePlatform::default()
        }
    }

    fn midnight_far_away() -> ExportSchedule {
        ExportSchedule::at(
            NaiveDate::from_ymd_opt(2999, 1, 1)
                .unwrap()
                .and_hms_opt(0, 0, 0)
                .unwrap(),
        )
    }

    async fn dispatcher_with(
        platform: FakePlatform,
        ledger: ReplyStateStore,
    ) -> (Dispatcher<FakePlatform>, CancellationToken) {
        let cancel = CancellationToken::new();
        let data = BotData {
            catalog: catalog(),
            templates: templates(),
            ledger,
        };
        let config = DispatchConfig {
            reconnect_delay: Duration::from_millis(1),
            ..DispatchConfig::default()
        };
        let mut dispatcher = Dispatcher::connect(platform, data, config, cancel.clone())
            .await
            .unwrap();
        dispatcher.rng = SmallRng::seed_from_u64(42);
        dispatcher.schedule = midnight_far_away();
        (dispatcher, cancel)
    }

    async fn dispatcher(platform: FakePlatform) -> (Dispatcher<FakePlatform>, CancellationToken) {
        dispatcher_with(platform, ReplyStateStore::in_memory()).await
    }

    /// Run with the fake cancelling once its comment script is exhausted.
    async fn run_script(
        mut platform: FakePlatform,
        ledger: ReplyStateStore,
    ) -> Dispatcher<FakePlatform> {
        let token = CancellationToken::new();
        platform.stop_when_idle = Some(token.clone());
        let (mut d, cancel) = dispatcher_with(platform, ledger).await;
        d.cancel = token;
        drop(cancel);
        d.run().await;
        d
    }

    // -----------------------------------------------------------------------
    // Comments
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_replayed_comment_gets_one_reply() {
        let mut p = platform();
        let c = comment("abc1234", "alice", "look at this gatto.png");
        p.comment_feed.push_back(Ok(FeedEvent::Item(c.clone())));
        p.comment_feed.push_back(Ok(FeedEvent::Item(c)));

        let d = run_script(p, ReplyStateStore::in_memory()).await;
        assert_eq!(d.platform.replies.len(), 1);
        let (target, body) = &d.platform.replies[0];
        assert_eq!(target, "abc1234");
        assert!(body.starts_with("BODY [gatto.png](https://i.example/cat.png)"));
        assert!(body.ends_with("del:abc1234"));
        assert_eq!(d.ledger.ledger().hot_len(), 1);
        assert_eq!(d.state, LoopState::ShuttingDown);
    }

    #[tokio::test]
    async fn test_answered_comment_is_skipped_after_restart() {
        let mut ledger = ReplyStateStore::in_memory();
        ledger
            .record(ReplyRecord::new("r000001", "abc1234", "alice"))
            .unwrap();

        let mut p = platform();
        p.comment_feed.push_back(Ok(FeedEvent::Item(comment(
            "abc1234",
            "alice",
            "gatto.png",
        ))));
        let d = run_script(p, ledger).await;
        assert!(d.platform.replies.is_empty());
    }

    #[tokio::test]
    async fn test_comment_without_tokens_is_noop() {
        let (mut d, _) = dispatcher(platform()).await;
        let outcome = d
            .handle_comment(comment("abc1234", "alice", "no images here"))
            .await;
        assert_eq!(outcome, Outcome::Continue);
        assert!(d.platform.replies.is_empty());
        assert_eq!(d.ledger.ledger().hot_len(), 0);
    }

    #[tokio::test]
    async fn test_two_tokens_one_reply() {
        let (mut d, _) = dispatcher(platform()).await;
        d.handle_comment(comment("abc1234", "alice", "gatto.png gatto.png"))
            .await;
        assert_eq!(d.platform.replies.len(), 1);
        assert_eq!(
            d.platform.replies[0]
                .1
                .matches("[gatto.png](https://i.example/cat.png)")
                .count(),
            2
        );
    }

    #[tokio::test]
    async fn test_fuzzy_match_uses_forced_template() {
        let (mut d, _) = dispatcher(platform()).await;
        d.handle_comment(comment("abc1234", "alice", "gato.png")).await;
        let body = &d.platform.replies[0].1;
        assert!(body.starts_with("FORCED [gatto.png]"), "{body}");
    }

    #[tokio::test]
    async fn test_richtext_edit_for_single_media_match() {
        let (mut d, _) = dispatcher(platform()).await;
        let record = d
            .process_comment(&comment("abc1234", "alice", "cane.gif"), false)
            .await
            .unwrap()
            .unwrap();
        assert!(record.richtext);
        let (reply_id, document) = &d.platform.richtext[0];
        assert_eq!(reply_id, &record.id);
        let nodes = document["document"].as_array().unwrap();
        assert!(nodes.iter().any(|n| n["id"] == "media123"));
    }

    #[tokio::test]
    async fn test_richtext_failure_keeps_plain_reply() {
        let p = FakePlatform {
            fail_richtext: true,
            ..platform()
        };
        let (mut d, _) = dispatcher(p).await;
        let record = d
            .process_comment(&comment("abc1234", "alice", "cane.gif"), false)
            .await
            .unwrap()
            .unwrap();
        assert!(!record.richtext);
        assert_eq!(d.platform.replies.len(), 1);
        assert!(d.ledger.find_active("abc1234").is_some());
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    async fn answered(author: &str) -> Dispatcher<FakePlatform> {
        let (mut d, _) = dispatcher(platform()).await;
        d.handle_comment(comment("abc1234", author, "gatto.png")).await;
        assert!(d.ledger.find_active("abc1234").is_some());
        d
    }

    #[tokio::test]
    async fn test_parent_author_can_delete_in_any_case() {
        let mut d = answered("alice").await;
        d.handle_inbox(pm("t4_m1", "Alice", "delete", "delete abc1234"))
            .await;
        assert_eq!(d.platform.deleted, vec!["r000001"]);
        assert!(d.ledger.find_active("abc1234").is_none());
        assert_eq!(d.platform.read, vec!["t4_m1"]);
    }

    #[tokio::test]
    async fn test_stranger_cannot_delete() {
        let mut d = answered("alice").await;
        d.handle_inbox(pm("t4_m1", "mallory", "delete", "delete abc1234"))
            .await;
        assert!(d.platform.deleted.is_empty());
        assert!(d.ledger.find_active("abc1234").is_some());
    }

    #[tokio::test]
    async fn test_moderator_can_delete() {
        let mut d = answered("alice").await;
        d.handle_inbox(pm("t4_m1", "HELPER", "delete", "delete abc1234"))
            .await;
        assert_eq!(d.platform.deleted.len(), 1);
    }

    #[tokio::test]
    async fn test_malformed_delete_is_ignored() {
        let mut d = answered("alice").await;
        d.handle_inbox(pm("t4_m1", "alice", "delete", "please delete abc1234"))
            .await;
        assert!(d.platform.deleted.is_empty());
        assert!(d.platform.sent.is_empty());
    }

    // -----------------------------------------------------------------------
    // Force
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_moderator_force_replies_and_confirms() {
        let mut p = platform();
        p.comments.insert(
            "abc1234".to_string(),
            comment("abc1234", "bob", "nothing to see"),
        );
        let (mut d, _) = dispatcher(p).await;
        d.handle_inbox(pm("t4_m1", "creator", "Force abc1234", "gatto.png"))
            .await;

        let replies = &d.platform.replies;
        assert_eq!(replies.len(), 2);
        assert_eq!(replies[0].0, "abc1234");
        assert!(replies[0].1.starts_with("FORCED [gatto.png]"));
        assert_eq!(replies[1].0, "t4_m1");
        assert!(replies[1].1.contains("/r/test/comments/p/t/abc1234"));

        let record = d.ledger.find_active("abc1234").unwrap();
        assert_eq!(record.parent_author, "bob");
    }

    #[tokio::test]
    async fn test_force_from_non_moderator_is_ignored() {
        let mut p = platform();
        p.comments
            .insert("abc1234".to_string(), comment("abc1234", "bob", ""));
        let (mut d, _) = dispatcher(p).await;
        d.handle_inbox(pm("t4_m1", "mallory", "force abc1234", "gatto.png"))
            .await;
        assert!(d.platform.replies.is_empty());
    }

    #[tokio::test]
    async fn test_force_on_archived_comment_gets_no_reply() {
        let mut p = platform();
        let mut archived = comment("abc1234", "bob", "");
        archived.archived = true;
        p.comments.insert("abc1234".to_string(), archived);
        let (mut d, _) = dispatcher(p).await;
        d.handle_inbox(pm("t4_m1", "creator", "force abc1234", "gatto.png"))
            .await;
        assert!(d.platform.replies.is_empty());
    }

    #[tokio::test]
    async fn test_force_respects_existing_reply() {
        let mut p = platform();
        p.comments
            .insert("abc1234".to_string(), comment("abc1234", "bob", ""));
        let (mut d, _) = dispatcher(p).await;
        d.force_reply("abc1234", "gatto.png").await.unwrap().unwrap();
        assert!(d.force_reply("abc1234", "gatto.png").await.unwrap().is_none());
        assert_eq!(d.platform.replies.len(), 1);
    }

    // -----------------------------------------------------------------------
    // Forwarding
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_mention_is_forwarded_and_read() {
        let (mut d, _) = dispatcher(platform()).await;
        d.handle_inbox(InboxItem::Mention {
            id: "t1_men".into(),
            author: Some("carol".into()),
            subject: "username mention".into(),
            body: "hey u/immaginibot".into(),
            context: "/r/test/comments/p/t/men/?context=3".into(),
        })
        .await;

        assert_eq!(d.platform.read, vec!["t1_men"]);
        let (to, subject, body) = &d.platform.sent[0];
        assert_eq!(to, "Creator");
        assert_eq!(subject, "FW from carol: username mention");
        assert_eq!(body, "/r/test/comments/p/t/men/?context=3\n\nhey u/immaginibot");
        assert!(d.platform.replies.is_empty());
    }

    #[tokio::test]
    async fn test_post_reply_is_forwarded_and_read() {
        let (mut d, _) = dispatcher(platform()).await;
        d.handle_inbox(InboxItem::Mention {
            id: "t1_pr".into(),
            author: Some("dave".into()),
            subject: "post reply".into(),
            body: "manca il gatto".into(),
            context: "/r/immagini/comments/ex/istruzioni/pr/?context=3".into(),
        })
        .await;

        assert_eq!(d.platform.read, vec!["t1_pr"]);
        let (to, subject, body) = &d.platform.sent[0];
        assert_eq!(to, "Creator");
        assert_eq!(subject, "FW from dave: post reply");
        assert_eq!(
            body,
            "/r/immagini/comments/ex/istruzioni/pr/?context=3\n\nmanca il gatto"
        );
    }

    #[tokio::test]
    async fn test_comment_reply_is_left_alone() {
        let (mut d, _) = dispatcher(platform()).await;
        d.handle_inbox(InboxItem::CommentReply {
            id: "t1_rep".into(),
            author: Some("carol".into()),
        })
        .await;
        assert!(d.platform.read.is_empty());
        assert!(d.platform.sent.is_empty());
    }

    #[tokio::test]
    async fn test_other_message_forwarded_verbatim() {
        let p = platform();
        let cancel = CancellationToken::new();
        let data = BotData {
            catalog: catalog(),
            templates: templates(),
            ledger: ReplyStateStore::in_memory(),
        };
        let config = DispatchConfig {
            admin: Some("owner".into()),
            ..DispatchConfig::default()
        };
        let mut d = Dispatcher::connect(p, data, config, cancel).await.unwrap();
        d.handle_inbox(pm("t4_m1", "dave", "ciao", "body text")).await;
        assert_eq!(
            d.platform.sent,
            vec![(
                "owner".to_string(),
                "FW from dave: ciao".to_string(),
                "body text".to_string()
            )]
        );
    }

    #[tokio::test]
    async fn test_message_without_sender_is_ignored() {
        let (mut d, _) = dispatcher(platform()).await;
        d.handle_inbox(InboxItem::PrivateMessage {
            id: "t4_m1".into(),
            author: None,
            subject: "delete".into(),
            body: "delete abc1234".into(),
        })
        .await;
        assert!(d.platform.read.is_empty());
        assert!(d.platform.sent.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_message_processed_once() {
        let (mut d, _) = dispatcher(platform()).await;
        let message = pm("t4_m1", "dave", "ciao", "x");
        d.handle_inbox(message.clone()).await;
        d.handle_inbox(message).await;
        assert_eq!(d.platform.sent.len(), 1);
    }

    #[tokio::test]
    async fn test_no_admin_and_no_moderators_fails() {
        let data = BotData {
            catalog: catalog(),
            templates: templates(),
            ledger: ReplyStateStore::in_memory(),
        };
        let result = Dispatcher::connect(
            FakePlatform::default(),
            data,
            DispatchConfig::default(),
            CancellationToken::new(),
        )
        .await;
        assert!(matches!(result, Err(DispatchError::NoAdmin)));
    }

    // -----------------------------------------------------------------------
    // Loop control
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_caught_up_drains_inbox() {
        let mut p = platform();
        p.comment_feed.push_back(Ok(FeedEvent::CaughtUp));
        p.inbox_feed
            .push_back(Ok(FeedEvent::Item(pm("t4_m1", "dave", "ciao", "x"))));
        p.inbox_feed
            .push_back(Ok(FeedEvent::Item(pm("t4_m2", "erin", "hey", "y"))));
        let d = run_script(p, ReplyStateStore::in_memory()).await;
        assert_eq!(d.platform.sent.len(), 2);
    }

    #[tokio::test]
    async fn test_unavailable_feed_reconnects() {
        let (mut d, _) = dispatcher(platform()).await;
        d.platform
            .comment_feed
            .push_back(Err(PlatformError::Unavailable("502".into())));
        assert_eq!(d.step().await, Outcome::Reconnect);
    }

    #[tokio::test]
    async fn test_run_survives_outage() {
        let mut p = platform();
        p.comment_feed
            .push_back(Err(PlatformError::Unavailable("timeout".into())));
        p.comment_feed.push_back(Ok(FeedEvent::Item(comment(
            "abc1234",
            "alice",
            "gatto.png",
        ))));
        let d = run_script(p, ReplyStateStore::in_memory()).await;
        assert_eq!(d.platform.reconnects, 1);
        assert_eq!(d.platform.replies.len(), 1);
    }

    #[tokio::test]
    async fn test_rejected_item_continues() {
        let err = DispatchError::Platform(PlatformError::Rejected("403".into()));
        assert_eq!(err.outcome(), Outcome::Continue);
        let err = DispatchError::Platform(PlatformError::Unavailable("503".into()));
        assert_eq!(err.outcome(), Outcome::Reconnect);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_does_nothing() {
        let mut p = platform();
        p.comment_feed.push_back(Ok(FeedEvent::Item(comment(
            "abc1234",
            "alice",
            "gatto.png",
        ))));
        let (mut d, cancel) = dispatcher(p).await;
        cancel.cancel();
        d.run().await;
        assert_eq!(d.platform.comment_polls, 0);
        assert!(d.platform.replies.is_empty());
        assert_eq!(d.state, LoopState::ShuttingDown);
    }

    // -----------------------------------------------------------------------
    // Export
    // -----------------------------------------------------------------------

    #[tokio::test]
    async fn test_export_publishes_when_due() {
        let (mut d, _) = dispatcher(platform()).await;
        let due = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        d.schedule = ExportSchedule::at(due);
        let now = due + chrono::Duration::minutes(5);

        assert!(d.check_export(now).await.unwrap());
        let exports = &d.platform.exports;
        assert_eq!(exports.len(), 2);
        assert_eq!(exports[0].0, ExportDestination::Profile);
        assert_eq!(exports[0].1, "Istruzioni");
        assert!(!exports[0].2.contains("cane"));
        assert_eq!(exports[1].0, ExportDestination::Moderated);
        assert!(exports[1].2.contains("cane"));
        assert!(exports[1].2.contains("micio"));
        assert_eq!(d.schedule.next(), due + chrono::Duration::days(1));

        assert!(!d.check_export(now).await.unwrap());
        assert_eq!(d.platform.exports.len(), 2);
    }
}
