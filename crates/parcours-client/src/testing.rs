//! In-memory backend used by the service tests.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use parcours_shared::{
    Conversation, LastMessage, Message, MessageId, Proof, ProofDraft, ProofId, ProofStatus, Role,
    UserId,
};

use crate::api::{ConversationApi, ProofApi};
use crate::error::ClientError;

#[derive(Clone)]
pub struct FakeApi {
    me: UserId,
    state: Arc<Mutex<FakeState>>,
}

struct FakeState {
    reachable: bool,
    conversations: Vec<Conversation>,
    messages: Vec<Message>,
    next_id: u64,
    failing_sends: usize,
    apply_mark_read: bool,
    mark_read_calls: Vec<UserId>,
    proofs: Vec<Proof>,
    rejected_titles: Vec<String>,
    create_calls: Vec<String>,
    list_delay: Option<StdDuration>,
}

pub fn conversation(id: &str, name: &str, unread: u32) -> Conversation {
    Conversation {
        user_id: UserId::from(id),
        name: name.to_string(),
        email: format!("{id}@example.fr"),
        role: Role::Coach,
        level: None,
        last_message: None,
        unread_count: unread,
    }
}

fn unavailable() -> ClientError {
    ClientError::Status {
        status: 503,
        body: "unavailable".into(),
    }
}

impl FakeApi {
    pub fn new(me: &str) -> Self {
        Self {
            me: UserId::from(me),
            state: Arc::new(Mutex::new(FakeState {
                reachable: true,
                conversations: Vec::new(),
                messages: Vec::new(),
                next_id: 1,
                failing_sends: 0,
                apply_mark_read: true,
                mark_read_calls: Vec::new(),
                proofs: Vec::new(),
                rejected_titles: Vec::new(),
                create_calls: Vec::new(),
                list_delay: None,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    pub fn add_conversation(&self, conversation: Conversation) {
        self.state().conversations.push(conversation);
    }

    /// Store a message from `from` to the signed-in user and bump the unread
    /// count of that conversation.
    pub fn receive(&self, from: &str, content: &str) -> Message {
        let mut state = self.state();
        let message = state.record(UserId::from(from), self.me.clone(), content, &self.me);
        if let Some(c) = state.conversations.iter_mut().find(|c| c.user_id.as_str() == from) {
            c.unread_count += 1;
        }
        message
    }

    /// Make the summary listing take `delay` to answer.
    pub fn slow_listing(&self, delay: StdDuration) {
        self.state().list_delay = Some(delay);
    }

    pub fn fail_next_sends(&self, n: usize) {
        self.state().failing_sends = n;
    }

    /// Keep unread counts untouched by `mark_read`, as a lagging server would.
    pub fn hold_unread(&self) {
        self.state().apply_mark_read = false;
    }

    pub fn mark_read_calls(&self) -> Vec<UserId> {
        self.state().mark_read_calls.clone()
    }

    pub fn reject_title(&self, title: &str) {
        self.state().rejected_titles.push(title.to_string());
    }

    pub fn accept_all_titles(&self) {
        self.state().rejected_titles.clear();
    }

    pub fn server_proofs(&self) -> Vec<Proof> {
        self.state().proofs.clone()
    }

    pub fn create_calls(&self) -> Vec<String> {
        self.state().create_calls.clone()
    }
}

impl FakeState {
    fn record(&mut self, sender: UserId, receiver: UserId, content: &str, me: &UserId) -> Message {
        let id = self.next_id;
        self.next_id += 1;
        let message = Message {
            id: MessageId::new(format!("m{id}")),
            is_from_me: &sender == me,
            sender_id: sender,
            receiver_id: receiver,
            content: content.to_string(),
            message_type: "TEXT".into(),
            // Strictly increasing so ordering by timestamp is deterministic.
            created_at: Utc::now() + Duration::milliseconds(id as i64),
            is_read: false,
        };
        self.messages.push(message.clone());

        let counterpart = message.counterpart(me).clone();
        if let Some(c) = self.conversations.iter_mut().find(|c| c.user_id == counterpart) {
            c.last_message = Some(LastMessage {
                content: message.content.clone(),
                created_at: message.created_at,
                is_from_me: message.is_from_me,
            });
        }
        message
    }
}

impl ConversationApi for FakeApi {
    async fn list_conversations(&self) -> Result<Vec<Conversation>, ClientError> {
        let delay = self.state().list_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let state = self.state();
        if !state.reachable {
            return Err(unavailable());
        }
        Ok(state.conversations.clone())
    }

    async fn fetch_history(&self, counterpart: &UserId) -> Result<Vec<Message>, ClientError> {
        let state = self.state();
        if !state.reachable {
            return Err(unavailable());
        }
        Ok(state
            .messages
            .iter()
            .filter(|m| m.involves(&self.me, counterpart))
            .cloned()
            .collect())
    }

    async fn send_message(&self, counterpart: &UserId, content: &str) -> Result<Message, ClientError> {
        let mut state = self.state();
        if !state.reachable {
            return Err(unavailable());
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(unavailable());
        }
        Ok(state.record(self.me.clone(), counterpart.clone(), content, &self.me))
    }

    async fn mark_read(&self, counterpart: &UserId) -> Result<(), ClientError> {
        let mut state = self.state();
        if !state.reachable {
            return Err(unavailable());
        }
        state.mark_read_calls.push(counterpart.clone());
        if state.apply_mark_read {
            for m in state.messages.iter_mut() {
                if &m.sender_id == counterpart && m.receiver_id == self.me {
                    m.is_read = true;
                }
            }
            if let Some(c) = state.conversations.iter_mut().find(|c| &c.user_id == counterpart) {
                c.unread_count = 0;
            }
        }
        Ok(())
    }
}

impl ProofApi for FakeApi {
    async fn create_proof(&self, _organization_id: &str, draft: &ProofDraft) -> Result<Proof, ClientError> {
        let mut state = self.state();
        if !state.reachable {
            return Err(unavailable());
        }
        state.create_calls.push(draft.title.clone());
        if state.rejected_titles.contains(&draft.title) {
            return Err(ClientError::Status {
                status: 422,
                body: "rejected".into(),
            });
        }

        let id = state.next_id;
        state.next_id += 1;
        let proof = Proof {
            id: ProofId::new(format!("p{id}")),
            title: draft.title.clone(),
            category: draft.category.clone(),
            description: draft.description.clone(),
            status: ProofStatus::Pending,
            created_at: Utc::now(),
            attachment_url: draft.attachment_url.clone(),
        };
        // Newest first, like the server's listing.
        state.proofs.insert(0, proof.clone());
        Ok(proof)
    }

    async fn list_proofs(&self) -> Result<Vec<Proof>, ClientError> {
        let state = self.state();
        if !state.reachable {
            return Err(unavailable());
        }
        Ok(state.proofs.clone())
    }

    async fn health(&self) -> Result<(), ClientError> {
        if self.state().reachable {
            Ok(())
        } else {
            Err(unavailable())
        }
    }
}

/// Let spawned fire-and-forget tasks run.
pub async fn settle() {
    for _ in 0..5 {
        tokio::task::yield_now().await;
    }
}
