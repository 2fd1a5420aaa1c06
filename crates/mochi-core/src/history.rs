//! Append-only conversation history and the bounded context window.
//!
//! The upstream chat model sees at most [`CONTEXT_WINDOW`] prior messages
//! plus the newest one; the floating bubble UI shows the last
//! [`BUBBLE_COUNT`]. Both are views over the same ordered log.

use crate::types::{GatewayMessage, GatewayRole, Message, Role};

/// Prior messages sent upstream as context (the newest turn rides on top).
pub const CONTEXT_WINDOW: usize = 10;

/// Messages shown in the floating bubble stack.
pub const BUBBLE_COUNT: usize = 3;

/// Fixed reply appended when the chat call fails at any step.
pub const FALLBACK_APOLOGY: &str = "Sorry, something went wrong. Please try again!";

#[derive(Debug, Default)]
pub struct ChatHistory {
    messages: Vec<Message>,
    next_seq: u64,
}

impl ChatHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// History seeded with an opening line from the character.
    pub fn with_greeting(greeting: &str, timestamp_ms: u64) -> Self {
        let mut history = Self::new();
        let id = history.next_id(Role::Character);
        history.push(Message {
            id,
            role: Role::Character,
            content: greeting.to_string(),
            timestamp_ms,
        });
        history
    }

    /// Allocate the next message id without appending anything. The reveal
    /// tracker binds to the id before the message itself is pushed, so id
    /// allocation and append are deliberately separate steps.
    pub fn next_id(&mut self, role: Role) -> String {
        let prefix = match role {
            Role::User => "user",
            Role::Character => "mochi",
        };
        let id = format!("{prefix}-{}", self.next_seq);
        self.next_seq += 1;
        id
    }

    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Append a user turn, returning the allocated id.
    pub fn push_user(&mut self, content: &str, timestamp_ms: u64) -> String {
        let id = self.next_id(Role::User);
        self.push(Message {
            id: id.clone(),
            role: Role::User,
            content: content.to_string(),
            timestamp_ms,
        });
        id
    }

    /// Append a character turn, returning the allocated id.
    pub fn push_character(&mut self, content: &str, timestamp_ms: u64) -> String {
        let id = self.next_id(Role::Character);
        self.push(Message {
            id: id.clone(),
            role: Role::Character,
            content: content.to_string(),
            timestamp_ms,
        });
        id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// The last [`BUBBLE_COUNT`] messages, oldest first.
    pub fn recent(&self) -> &[Message] {
        let start = self.messages.len().saturating_sub(BUBBLE_COUNT);
        &self.messages[start..]
    }

    /// Context window for the chat gateway: the newest message plus up to
    /// [`CONTEXT_WINDOW`] messages before it, mapped to the two-role schema.
    /// Call after the new user turn has been appended.
    pub fn context_window(&self) -> Vec<GatewayMessage> {
        let Some((newest, prior)) = self.messages.split_last() else {
            return Vec::new();
        };
        let start = prior.len().saturating_sub(CONTEXT_WINDOW);
        prior[start..]
            .iter()
            .chain(std::iter::once(newest))
            .map(to_gateway)
            .collect()
    }
}

fn to_gateway(message: &Message) -> GatewayMessage {
    GatewayMessage {
        role: match message.role {
            Role::User => GatewayRole::User,
            Role::Character => GatewayRole::Assistant,
        },
        content: message.content.clone(),
    }
}
