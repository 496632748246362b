//! Conversation sync.
//!
//! [`ConversationSync`] owns the in-memory view of the user's conversations:
//! the summary list, the open conversation's timeline, the composer and the
//! counterpart's typing indicator. It merges three sources into that view:
//! request/response reads, the user's own sends, and live events.
//!
//! Outbound messages go through a small state machine. [`begin_send`] appends
//! a `Pending` entry immediately; [`complete_send`] turns it `Confirmed` with
//! the server's record, or `Failed` so the user can [`retry_send`] or
//! [`discard_failed`]. Because the live channel echoes the user's own messages,
//! an echo may confirm a pending entry before the request returns.
//!
//! [`begin_send`]: ConversationSync::begin_send
//! [`complete_send`]: ConversationSync::complete_send
//! [`retry_send`]: ConversationSync::retry_send
//! [`discard_failed`]: ConversationSync::discard_failed

use chrono::Utc;
use tracing::{debug, info, warn};

use parcours_shared::constants::MESSAGE_TYPE_TEXT;
use parcours_shared::{
    Conversation, LiveEvent, LocalMessageId, Message, MessageId, SharedError, TypingSignal, UserId,
};

use crate::api::ConversationApi;
use crate::error::ClientError;
use crate::live::LiveChannel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    /// Shown locally, not yet acknowledged by the server.
    Pending,
    Confirmed,
    Failed { error: String },
}

/// One row of the open conversation.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    /// Set for messages sent from this client, stable across confirmation.
    pub local_id: Option<LocalMessageId>,
    pub message: Message,
    pub delivery: DeliveryState,
}

impl TimelineEntry {
    fn confirmed(message: Message) -> Self {
        Self {
            local_id: None,
            message,
            delivery: DeliveryState::Confirmed,
        }
    }

    fn pending(local_id: LocalMessageId, me: &UserId, counterpart: &UserId, content: &str) -> Self {
        Self {
            local_id: Some(local_id),
            message: Message {
                id: MessageId::new(format!("local-{local_id}")),
                sender_id: me.clone(),
                receiver_id: counterpart.clone(),
                content: content.to_string(),
                message_type: MESSAGE_TYPE_TEXT.to_string(),
                created_at: Utc::now(),
                is_from_me: true,
                is_read: false,
            },
            delivery: DeliveryState::Pending,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.delivery == DeliveryState::Confirmed
    }

    pub fn is_pending(&self) -> bool {
        self.delivery == DeliveryState::Pending
    }
}

/// A send that has been shown locally and still has to reach the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub local_id: LocalMessageId,
    pub counterpart: UserId,
    pub content: String,
}

pub struct ConversationSync<A> {
    api: A,
    me: UserId,
    conversations: Vec<Conversation>,
    /// Summary of the open conversation, kept even when the server's list
    /// does not include it yet (a contact with no messages).
    selected: Option<Conversation>,
    open: Option<UserId>,
    timeline: Vec<TimelineEntry>,
    counterpart_typing: bool,
    composer: String,
    /// Last typing state announced to the counterpart.
    typing_sent: bool,
    live: Option<LiveChannel>,
}

impl<A> ConversationSync<A>
where
    A: ConversationApi + Clone + Send + Sync + 'static,
{
    pub fn new(api: A, me: UserId) -> Self {
        Self {
            api,
            me,
            conversations: Vec::new(),
            selected: None,
            open: None,
            timeline: Vec::new(),
            counterpart_typing: false,
            composer: String::new(),
            typing_sent: false,
            live: None,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn me(&self) -> &UserId {
        &self.me
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn selected(&self) -> Option<&Conversation> {
        self.selected.as_ref()
    }

    pub fn open_counterpart(&self) -> Option<&UserId> {
        self.open.as_ref()
    }

    pub fn timeline(&self) -> &[TimelineEntry] {
        &self.timeline
    }

    pub fn is_counterpart_typing(&self) -> bool {
        self.counterpart_typing
    }

    pub fn composer(&self) -> &str {
        &self.composer
    }

    pub fn total_unread(&self) -> u32 {
        self.conversations.iter().map(|c| c.unread_count).sum()
    }

    pub fn is_live(&self) -> bool {
        self.live.is_some()
    }

    // ------------------------------------------------------------------
    // Live channel
    // ------------------------------------------------------------------

    /// Take ownership of a live channel. A previously attached channel is
    /// closed.
    pub fn attach_live(&mut self, live: LiveChannel) {
        if let Some(old) = self.live.replace(live) {
            old.close();
        }
        // Re-announce the current composer state on the new channel.
        let typing = self.typing_sent;
        self.typing_sent = false;
        self.publish_typing(typing);
    }

    /// Hand the live channel back, announcing that the user stopped typing.
    pub fn detach_live(&mut self) -> Option<LiveChannel> {
        self.publish_typing(false);
        self.live.take()
    }

    /// Wait for the next live event without applying it.
    ///
    /// Cancel safe: dropping the future before it completes loses no event,
    /// so it can sit in a `select!` arm. Apply the result with
    /// [`handle_event`](Self::handle_event). Returns `None` when no channel
    /// is attached or the channel closed, in which case it is detached.
    pub async fn next_live_event(&mut self) -> Option<LiveEvent> {
        let event = self.live.as_mut()?.next_event().await;
        if event.is_none() {
            warn!("live channel closed");
            self.live = None;
        }
        event
    }

    /// Wait for one live event and apply it. Not cancel safe; use
    /// [`next_live_event`](Self::next_live_event) when racing other work.
    ///
    /// Returns `false` when no channel is attached or the channel closed.
    pub async fn pump_live(&mut self) -> bool {
        match self.next_live_event().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Apply one live event.
    pub async fn handle_event(&mut self, event: LiveEvent) {
        match event {
            LiveEvent::NewMessage(message) => {
                self.merge_message(message);
                // Unread counts and previews of every conversation may move.
                self.list_conversations().await;
            }
            LiveEvent::UserTyping(signal) => self.apply_typing(signal),
            LiveEvent::Unknown(name) => debug!(event = %name, "ignoring unknown live event"),
        }
    }

    fn merge_message(&mut self, mut message: Message) {
        message.is_from_me = message.sender_id == self.me;

        let Some(open) = self.open.clone() else {
            return;
        };
        if !message.involves(&self.me, &open) {
            debug!(id = %message.id.0, "message for another conversation");
            return;
        }
        if self.position_of(&message.id).is_some() {
            return;
        }

        if message.is_from_me {
            // Echo of our own send: confirm the oldest matching pending entry.
            if let Some(entry) = self
                .timeline
                .iter_mut()
                .find(|e| e.is_pending() && e.message.content == message.content)
            {
                entry.message = message;
                entry.delivery = DeliveryState::Confirmed;
                return;
            }
        } else {
            message.is_read = true;
            self.counterpart_typing = false;
            self.spawn_mark_read(open);
        }

        self.timeline.push(TimelineEntry::confirmed(message));
    }

    fn apply_typing(&mut self, signal: TypingSignal) {
        if self.open.as_ref() == Some(&signal.user_id) {
            self.counterpart_typing = signal.is_typing;
        } else {
            debug!(from = %signal.user_id, "typing signal for another conversation ignored");
        }
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// Refresh the summary list. On failure the previous list is kept and
    /// `false` is returned.
    pub async fn list_conversations(&mut self) -> bool {
        match self.api.list_conversations().await {
            Ok(fetched) => {
                self.apply_summaries(fetched);
                true
            }
            Err(e) => {
                warn!(error = %e, "failed to refresh conversations");
                false
            }
        }
    }

    fn apply_summaries(&mut self, mut fetched: Vec<Conversation>) {
        if let Some(open) = &self.open {
            match fetched.iter_mut().find(|c| &c.user_id == open) {
                Some(summary) => {
                    // Everything in the open conversation counts as read.
                    summary.unread_count = 0;
                    self.selected = Some(summary.clone());
                }
                None => {
                    if let Some(selected) = &self.selected {
                        fetched.insert(0, selected.clone());
                    }
                }
            }
        }
        self.conversations = fetched;
    }

    /// Open a conversation from the summary list.
    pub async fn open_conversation(&mut self, counterpart: &UserId) {
        if self.open.as_ref() != Some(counterpart) {
            self.close_conversation();
            self.open = Some(counterpart.clone());
            self.selected = self
                .conversations
                .iter()
                .find(|c| &c.user_id == counterpart)
                .cloned();
        }
        self.load_open_conversation(counterpart).await;
    }

    /// Open a conversation with a contact that may not appear in the
    /// summary list yet.
    pub async fn start_conversation(&mut self, contact: Conversation) {
        let counterpart = contact.user_id.clone();
        if self.open.as_ref() != Some(&counterpart) {
            self.close_conversation();
            self.open = Some(counterpart.clone());
        }
        self.selected = Some(contact);
        self.load_open_conversation(&counterpart).await;
    }

    async fn load_open_conversation(&mut self, counterpart: &UserId) {
        info!(counterpart = %counterpart, "opening conversation");
        let mut has_unread = self.clear_unread(counterpart);

        match self.api.fetch_history(counterpart).await {
            Ok(history) => has_unread |= self.apply_history(history),
            Err(e) => warn!(counterpart = %counterpart, error = %e, "failed to load history"),
        }

        if has_unread {
            self.spawn_mark_read(counterpart.clone());
        }
        self.list_conversations().await;
    }

    /// Replace the confirmed part of the timeline with `history`. Local
    /// sends still in flight (or failed) stay at the tail. Returns whether
    /// the history held unread received messages.
    fn apply_history(&mut self, mut history: Vec<Message>) -> bool {
        history.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        let local: Vec<TimelineEntry> = self
            .timeline
            .drain(..)
            .filter(|e| e.local_id.is_some() && !e.is_confirmed())
            .collect();

        let mut has_unread = false;
        for mut message in history {
            if self.position_of(&message.id).is_some() {
                continue;
            }
            message.is_from_me = message.sender_id == self.me;
            if !message.is_from_me && !message.is_read {
                has_unread = true;
                message.is_read = true;
            }
            self.timeline.push(TimelineEntry::confirmed(message));
        }
        self.timeline.extend(local);
        has_unread
    }

    /// Zero the unread count of `counterpart` locally. Returns whether it
    /// was non-zero.
    fn clear_unread(&mut self, counterpart: &UserId) -> bool {
        let mut had_unread = false;
        for summary in self
            .conversations
            .iter_mut()
            .chain(self.selected.iter_mut())
            .filter(|c| &c.user_id == counterpart)
        {
            had_unread |= summary.unread_count > 0;
            summary.unread_count = 0;
        }
        had_unread
    }

    fn spawn_mark_read(&self, counterpart: UserId) {
        let api = self.api.clone();
        tokio::spawn(async move {
            if let Err(e) = api.mark_read(&counterpart).await {
                warn!(counterpart = %counterpart, error = %e, "failed to mark conversation read");
            }
        });
    }

    /// Leave the open conversation.
    pub fn close_conversation(&mut self) {
        self.publish_typing(false);
        self.composer.clear();
        self.open = None;
        self.selected = None;
        self.timeline.clear();
        self.counterpart_typing = false;
    }

    // ------------------------------------------------------------------
    // Sends
    // ------------------------------------------------------------------

    /// Send `content` to the open conversation and wait for the server.
    pub async fn send_message(
        &mut self,
        counterpart: &UserId,
        content: &str,
    ) -> Result<Message, ClientError> {
        let outbound = self.begin_send(counterpart, content)?;
        let result = self
            .api
            .send_message(&outbound.counterpart, &outbound.content)
            .await;
        let message = self.complete_send(outbound.local_id, result)?;
        self.list_conversations().await;
        Ok(message)
    }

    /// Show an outbound message as `Pending` and clear the composer.
    pub fn begin_send(
        &mut self,
        counterpart: &UserId,
        content: &str,
    ) -> Result<OutboundMessage, ClientError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SharedError::validation("content", "message is empty").into());
        }
        if self.open.as_ref() != Some(counterpart) {
            return Err(ClientError::NoConversationOpen);
        }

        self.composer.clear();
        self.publish_typing(false);

        let local_id = LocalMessageId::new();
        self.timeline
            .push(TimelineEntry::pending(local_id, &self.me, counterpart, content));

        Ok(OutboundMessage {
            local_id,
            counterpart: counterpart.clone(),
            content: content.to_string(),
        })
    }

    /// Settle a send started with [`begin_send`](Self::begin_send).
    ///
    /// On success the entry holds the server's record, and any separate
    /// copy left by the live echo is folded into it. On failure the entry
    /// turns `Failed` and the error is returned, unless the echo already
    /// confirmed it: the echoed record is then returned as the result.
    pub fn complete_send(
        &mut self,
        local_id: LocalMessageId,
        result: Result<Message, ClientError>,
    ) -> Result<Message, ClientError> {
        let index = self.position_of_local(local_id);

        let mut message = match result {
            Ok(message) => message,
            Err(e) => {
                if let Some(i) = index.filter(|&i| self.timeline[i].is_confirmed()) {
                    // The live echo proved the server stored it; only the
                    // response was lost.
                    warn!(local_id = %local_id, error = %e, "send response lost after echo, keeping it confirmed");
                    return Ok(self.timeline[i].message.clone());
                }
                warn!(local_id = %local_id, error = %e, "message not delivered");
                if let Some(i) = index {
                    self.timeline[i].delivery = DeliveryState::Failed {
                        error: e.to_string(),
                    };
                }
                return Err(e);
            }
        };
        message.is_from_me = true;

        let Some(mut i) = index else {
            debug!(local_id = %local_id, "send confirmed outside the open conversation");
            return Ok(message);
        };

        if let Some(j) = self.position_of(&message.id).filter(|&j| j != i) {
            if self.timeline[i].is_confirmed() {
                // Echoes of identical sends arrived out of order and each
                // confirmed the other's entry: swap them back.
                self.timeline[j].message = self.timeline[i].message.clone();
            } else {
                self.timeline.remove(j);
                if j < i {
                    i -= 1;
                }
            }
        }

        let entry = &mut self.timeline[i];
        entry.message = message.clone();
        entry.delivery = DeliveryState::Confirmed;
        Ok(message)
    }

    /// Send a `Failed` entry again.
    pub async fn retry_send(&mut self, local_id: LocalMessageId) -> Result<Message, ClientError> {
        let entry = self
            .timeline
            .iter_mut()
            .find(|e| e.local_id == Some(local_id))
            .filter(|e| matches!(e.delivery, DeliveryState::Failed { .. }))
            .ok_or(ClientError::NotRetryable(local_id))?;

        entry.delivery = DeliveryState::Pending;
        let counterpart = entry.message.receiver_id.clone();
        let content = entry.message.content.clone();

        let result = self.api.send_message(&counterpart, &content).await;
        let message = self.complete_send(local_id, result)?;
        self.list_conversations().await;
        Ok(message)
    }

    /// Drop a `Failed` entry. Returns whether one was removed.
    pub fn discard_failed(&mut self, local_id: LocalMessageId) -> bool {
        let before = self.timeline.len();
        self.timeline.retain(|e| {
            !(e.local_id == Some(local_id) && matches!(e.delivery, DeliveryState::Failed { .. }))
        });
        self.timeline.len() != before
    }

    fn position_of(&self, id: &MessageId) -> Option<usize> {
        self.timeline
            .iter()
            .position(|e| e.is_confirmed() && &e.message.id == id)
    }

    fn position_of_local(&self, local_id: LocalMessageId) -> Option<usize> {
        self.timeline
            .iter()
            .position(|e| e.local_id == Some(local_id))
    }

    // ------------------------------------------------------------------
    // Typing
    // ------------------------------------------------------------------

    /// Update the composer. Typing is announced to the counterpart when the
    /// composer becomes non-empty and withdrawn when it is emptied.
    pub fn set_composer(&mut self, text: &str) {
        self.composer = text.to_string();
        let typing = !self.composer.trim().is_empty();
        self.publish_typing(typing);
    }

    fn publish_typing(&mut self, typing: bool) {
        if typing == self.typing_sent {
            return;
        }
        self.typing_sent = typing;

        let (Some(live), Some(open)) = (&self.live, &self.open) else {
            return;
        };
        if let Err(e) = live.emit_typing(open, typing) {
            debug!(error = %e, "typing signal not sent");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{conversation, settle, FakeApi};
    use parcours_shared::ClientEvent;

    fn coach() -> UserId {
        UserId::from("coach-1")
    }

    fn setup() -> (FakeApi, ConversationSync<FakeApi>) {
        let api = FakeApi::new("student-1");
        api.add_conversation(conversation("coach-1", "Claire Martin", 0));
        api.add_conversation(conversation("coach-2", "Paul Durand", 0));
        let sync = ConversationSync::new(api.clone(), UserId::from("student-1"));
        (api, sync)
    }

    fn unread_of(sync: &ConversationSync<FakeApi>, id: &str) -> u32 {
        sync.conversations()
            .iter()
            .find(|c| c.user_id.as_str() == id)
            .map(|c| c.unread_count)
            .unwrap_or_default()
    }

    #[tokio::test]
    async fn list_keeps_previous_on_failure() {
        let (api, mut sync) = setup();
        assert!(sync.list_conversations().await);
        assert_eq!(sync.conversations().len(), 2);

        api.set_reachable(false);
        assert!(!sync.list_conversations().await);
        assert_eq!(sync.conversations().len(), 2);
    }

    #[tokio::test]
    async fn new_contact_survives_refresh() {
        let (_api, mut sync) = setup();
        sync.list_conversations().await;

        sync.start_conversation(conversation("coach-3", "Nadia Benali", 0))
            .await;

        let ids: Vec<_> = sync
            .conversations()
            .iter()
            .map(|c| c.user_id.as_str().to_string())
            .collect();
        assert_eq!(ids, vec!["coach-3", "coach-1", "coach-2"]);
        assert_eq!(sync.open_counterpart(), Some(&UserId::from("coach-3")));
    }

    #[tokio::test]
    async fn opening_clears_unread_even_if_server_lags() {
        let (api, mut sync) = setup();
        api.hold_unread();
        api.receive("coach-1", "Bonjour !");
        api.receive("coach-1", "Tu as fini la dictée ?");
        sync.list_conversations().await;
        assert_eq!(unread_of(&sync, "coach-1"), 2);

        sync.open_conversation(&coach()).await;
        settle().await;

        assert_eq!(unread_of(&sync, "coach-1"), 0);
        assert_eq!(sync.timeline().len(), 2);
        assert!(sync.timeline().iter().all(|e| e.message.is_read));
        assert_eq!(api.mark_read_calls(), vec![coach()]);
    }

    #[tokio::test]
    async fn live_message_is_appended_once() {
        let (api, mut sync) = setup();
        sync.open_conversation(&coach()).await;

        let message = api.receive("coach-1", "Bravo pour l'oral !");
        sync.handle_event(LiveEvent::NewMessage(message.clone())).await;
        sync.handle_event(LiveEvent::NewMessage(message)).await;

        assert_eq!(sync.timeline().len(), 1);
        assert_eq!(sync.timeline()[0].message.content, "Bravo pour l'oral !");
        assert_eq!(unread_of(&sync, "coach-1"), 0);
    }

    #[tokio::test]
    async fn other_conversation_only_refreshes_summaries() {
        let (api, mut sync) = setup();
        sync.open_conversation(&coach()).await;

        let message = api.receive("coach-2", "Cours décalé à 18h");
        sync.handle_event(LiveEvent::NewMessage(message)).await;

        assert!(sync.timeline().is_empty());
        assert_eq!(unread_of(&sync, "coach-2"), 1);
        assert_eq!(sync.total_unread(), 1);
    }

    #[tokio::test]
    async fn typing_only_from_open_counterpart() {
        let (_api, mut sync) = setup();
        sync.open_conversation(&coach()).await;

        sync.handle_event(LiveEvent::UserTyping(TypingSignal {
            user_id: UserId::from("coach-2"),
            is_typing: true,
        }))
        .await;
        assert!(!sync.is_counterpart_typing());

        sync.handle_event(LiveEvent::UserTyping(TypingSignal {
            user_id: coach(),
            is_typing: true,
        }))
        .await;
        assert!(sync.is_counterpart_typing());

        sync.open_conversation(&UserId::from("coach-2")).await;
        assert!(!sync.is_counterpart_typing());
    }

    #[tokio::test]
    async fn send_confirms_pending_entry() {
        let (_api, mut sync) = setup();
        sync.open_conversation(&coach()).await;
        sync.set_composer("Bonjour");

        let sent = sync.send_message(&coach(), "  Bonjour ").await.unwrap();

        assert_eq!(sent.content, "Bonjour");
        assert_eq!(sync.composer(), "");
        assert_eq!(sync.timeline().len(), 1);
        assert!(sync.timeline()[0].is_confirmed());
        assert_eq!(sync.timeline()[0].message.id, sent.id);
        assert_eq!(
            sync.selected().and_then(|c| c.last_message.as_ref()).map(|m| m.content.as_str()),
            Some("Bonjour")
        );
    }

    #[tokio::test]
    async fn send_requires_open_conversation_and_content() {
        let (_api, mut sync) = setup();
        assert!(matches!(
            sync.send_message(&coach(), "Bonjour").await,
            Err(ClientError::NoConversationOpen)
        ));

        sync.open_conversation(&coach()).await;
        assert!(matches!(
            sync.send_message(&coach(), "   ").await,
            Err(ClientError::Shared(_))
        ));
        assert!(sync.timeline().is_empty());
    }

    #[tokio::test]
    async fn echoes_before_responses_leave_each_message_once() {
        let (api, mut sync) = setup();
        sync.open_conversation(&coach()).await;

        let first = sync.begin_send(&coach(), "Bonjour").unwrap();
        let second = sync.begin_send(&coach(), "Bonjour").unwrap();
        assert!(sync.timeline().iter().all(|e| e.is_pending()));

        let m1 = api.send_message(&coach(), "Bonjour").await.unwrap();
        let m2 = api.send_message(&coach(), "Bonjour").await.unwrap();

        // Echoes arrive out of order, before either response.
        sync.handle_event(LiveEvent::NewMessage(m2.clone())).await;
        sync.handle_event(LiveEvent::NewMessage(m1.clone())).await;

        sync.complete_send(first.local_id, Ok(m1.clone())).unwrap();
        sync.complete_send(second.local_id, Ok(m2.clone())).unwrap();

        let ids: Vec<_> = sync.timeline().iter().map(|e| e.message.id.clone()).collect();
        assert_eq!(ids, vec![m1.id, m2.id]);
        assert!(sync.timeline().iter().all(|e| e.is_confirmed()));
        assert_eq!(sync.timeline()[0].local_id, Some(first.local_id));
    }

    #[tokio::test]
    async fn quick_sends_with_early_echo_keep_send_order() {
        let (api, mut sync) = setup();
        sync.open_conversation(&coach()).await;

        let first = sync.begin_send(&coach(), "Bonjour").unwrap();
        let second = sync.begin_send(&coach(), "Comment vas-tu ?").unwrap();

        let m1 = api.send_message(&coach(), "Bonjour").await.unwrap();
        sync.handle_event(LiveEvent::NewMessage(m1.clone())).await;
        sync.complete_send(first.local_id, Ok(m1.clone())).unwrap();

        let m2 = api.send_message(&coach(), "Comment vas-tu ?").await.unwrap();
        sync.complete_send(second.local_id, Ok(m2.clone())).unwrap();
        sync.handle_event(LiveEvent::NewMessage(m2.clone())).await;

        let contents: Vec<_> = sync
            .timeline()
            .iter()
            .map(|e| e.message.content.as_str())
            .collect();
        assert_eq!(contents, vec!["Bonjour", "Comment vas-tu ?"]);
        assert!(sync.timeline().iter().all(|e| e.is_confirmed()));
    }

    #[tokio::test]
    async fn echo_of_other_client_send_is_appended() {
        let (api, mut sync) = setup();
        sync.open_conversation(&coach()).await;

        // Sent from another device of the same user.
        let message = api.send_message(&coach(), "Envoyé depuis mon téléphone").await.unwrap();
        sync.handle_event(LiveEvent::NewMessage(message)).await;

        assert_eq!(sync.timeline().len(), 1);
        assert!(sync.timeline()[0].message.is_from_me);
        assert_eq!(sync.timeline()[0].local_id, None);
    }

    #[tokio::test]
    async fn failed_send_can_be_retried_or_discarded() {
        let (api, mut sync) = setup();
        sync.open_conversation(&coach()).await;
        api.fail_next_sends(2);

        assert!(sync.send_message(&coach(), "Premier essai").await.is_err());
        assert!(sync.send_message(&coach(), "Second essai").await.is_err());
        let failed: Vec<_> = sync.timeline().iter().filter_map(|e| e.local_id).collect();
        assert!(matches!(
            sync.timeline()[0].delivery,
            DeliveryState::Failed { .. }
        ));

        let resent = sync.retry_send(failed[0]).await.unwrap();
        assert_eq!(resent.content, "Premier essai");
        assert!(sync.timeline()[0].is_confirmed());

        assert!(sync.discard_failed(failed[1]));
        assert_eq!(sync.timeline().len(), 1);

        assert!(matches!(
            sync.retry_send(failed[0]).await,
            Err(ClientError::NotRetryable(_))
        ));
    }

    #[tokio::test]
    async fn composer_emits_typing_transitions() {
        let (_api, mut sync) = setup();
        let (live, mut remote) = LiveChannel::in_process();
        sync.attach_live(live);
        sync.open_conversation(&coach()).await;

        sync.set_composer("B");
        sync.set_composer("Bo");
        sync.set_composer("");
        sync.set_composer("Bonjour");
        sync.close_conversation();

        let mut signals = Vec::new();
        while let Ok(ClientEvent::Typing { receiver_id, is_typing }) = remote.outbound_rx.try_recv() {
            assert_eq!(receiver_id, coach());
            signals.push(is_typing);
        }
        assert_eq!(signals, vec![true, false, true, false]);
    }

    #[tokio::test]
    async fn pump_applies_events_until_closed() {
        let (api, mut sync) = setup();
        let (live, remote) = LiveChannel::in_process();
        sync.attach_live(live);
        sync.open_conversation(&coach()).await;

        let message = api.receive("coach-1", "On se voit jeudi ?");
        remote
            .events_tx
            .send(LiveEvent::NewMessage(message))
            .await
            .unwrap();
        assert!(sync.pump_live().await);
        assert_eq!(sync.timeline().len(), 1);

        drop(remote);
        assert!(!sync.pump_live().await);
        assert!(!sync.is_live());
    }

    #[tokio::test]
    async fn lost_response_after_echo_keeps_the_message_delivered() {
        let (api, mut sync) = setup();
        sync.open_conversation(&coach()).await;

        let sending = sync.begin_send(&coach(), "Bonjour").unwrap();
        let stored = api.send_message(&coach(), "Bonjour").await.unwrap();
        sync.handle_event(LiveEvent::NewMessage(stored.clone())).await;

        let lost = ClientError::Status {
            status: 504,
            body: "gateway timeout".into(),
        };
        let settled = sync.complete_send(sending.local_id, Err(lost)).unwrap();

        assert_eq!(settled.id, stored.id);
        assert_eq!(sync.timeline().len(), 1);
        assert!(sync.timeline()[0].is_confirmed());
        assert!(matches!(
            sync.retry_send(sending.local_id).await,
            Err(ClientError::NotRetryable(_))
        ));
        assert_eq!(api.fetch_history(&coach()).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn racing_live_intake_never_cuts_a_refresh_short() {
        let (api, mut sync) = setup();
        let (live, remote) = LiveChannel::in_process();
        sync.attach_live(live);
        sync.list_conversations().await;
        api.slow_listing(std::time::Duration::from_millis(50));

        // Nothing queued: the timer wins and no event is consumed.
        tokio::select! {
            _ = sync.next_live_event() => panic!("no event was sent"),
            _ = tokio::time::sleep(std::time::Duration::from_millis(10)) => {}
        }

        let message = api.receive("coach-2", "Cours décalé à 18h");
        remote
            .events_tx
            .send(LiveEvent::NewMessage(message))
            .await
            .unwrap();

        // The timer is much shorter than the listing; it must not be able to
        // interrupt the refresh triggered by the event.
        let mut applied = 0;
        for _ in 0..3 {
            tokio::select! {
                event = sync.next_live_event() => {
                    if let Some(event) = event {
                        sync.handle_event(event).await;
                        applied += 1;
                    }
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(5)) => {}
            }
        }

        assert_eq!(applied, 1);
        assert_eq!(unread_of(&sync, "coach-2"), 1);
        assert!(sync.is_live());
    }
}
