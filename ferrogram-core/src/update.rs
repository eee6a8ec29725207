//! # Update Model
//!
//! The envelope handed to the engine by an [`UpdateSource`]. Each update
//! carries a monotonically increasing id (the cursor position) and exactly one
//! payload variant.
//!
//! Only the fields the engine itself reads are modelled here: identities used
//! for affinity, message text used for command detection, and callback data
//! used for route resolution. Anything else travels opaquely in
//! [`UpdateKind::Other`].
//!
//! [`UpdateSource`]: crate::UpdateSource

use serde::{Deserialize, Serialize};
use std::fmt;

/// A remote user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
}

impl User {
    pub fn new(id: i64) -> Self {
        Self {
            id,
            is_bot: false,
            username: None,
        }
    }
}

/// Kind of conversation a [`Chat`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
    #[default]
    Private,
    Group,
    Supergroup,
    Channel,
}

/// A conversation: private chat, group or channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    #[serde(default)]
    pub kind: ChatKind,
}

impl Chat {
    pub fn private(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Private,
        }
    }

    pub fn group(id: i64) -> Self {
        Self {
            id,
            kind: ChatKind::Group,
        }
    }
}

/// A message posted in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: i64,
    pub chat: Chat,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<User>,
    /// Chat on whose behalf the message was sent (anonymous admins, channels).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_chat: Option<Chat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Message {
    /// A text message from `user` in their private chat.
    pub fn text(message_id: i64, user: User, text: impl Into<String>) -> Self {
        Self {
            message_id,
            chat: Chat::private(user.id),
            from: Some(user),
            sender_chat: None,
            text: Some(text.into()),
        }
    }

    /// Whether the text looks like a bot command (`/name ...`).
    pub fn is_command(&self) -> bool {
        self.text
            .as_deref()
            .is_some_and(|t| t.starts_with('/') && t.len() > 1)
    }
}

/// A press on an inline keyboard button.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackQuery {
    pub id: String,
    pub from: User,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
    /// Opaque payload attached to the button.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// An inline-mode query typed by a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineQuery {
    pub id: String,
    pub from: User,
    pub query: String,
}

/// Final confirmation request of a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreCheckoutQuery {
    pub id: String,
    pub from: User,
    pub currency: String,
    pub total_amount: i64,
    pub invoice_payload: String,
}

/// A change of reactions on a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageReaction {
    pub chat: Chat,
    pub message_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
    /// Chat on whose behalf the reaction was changed, for anonymous reactions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor_chat: Option<Chat>,
}

/// A membership change of a user in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: Chat,
    pub from: User,
    pub status: String,
}

/// Payload variant of an [`Update`].
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateKind {
    Message(Message),
    EditedMessage(Message),
    ChannelPost(Message),
    CallbackQuery(CallbackQuery),
    InlineQuery(InlineQuery),
    PreCheckoutQuery(PreCheckoutQuery),
    MessageReaction(MessageReaction),
    ChatMember(ChatMemberUpdated),
    /// Any update the engine does not model; routed by its `kind` tag only.
    Other {
        kind: String,
        payload: serde_json::Value,
    },
}

/// Stable tag for an [`UpdateKind`], used for filters and event routing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum UpdateType {
    Message,
    EditedMessage,
    ChannelPost,
    CallbackQuery,
    InlineQuery,
    PreCheckoutQuery,
    MessageReaction,
    ChatMember,
    Other(String),
}

impl UpdateType {
    /// The remote API's field name for this update type.
    pub fn as_str(&self) -> &str {
        match self {
            UpdateType::Message => "message",
            UpdateType::EditedMessage => "edited_message",
            UpdateType::ChannelPost => "channel_post",
            UpdateType::CallbackQuery => "callback_query",
            UpdateType::InlineQuery => "inline_query",
            UpdateType::PreCheckoutQuery => "pre_checkout_query",
            UpdateType::MessageReaction => "message_reaction",
            UpdateType::ChatMember => "chat_member",
            UpdateType::Other(kind) => kind,
        }
    }
}

impl fmt::Display for UpdateType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity used to pin related updates to one executor lane.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AffinityKey {
    User(i64),
    Chat(i64),
    Name(String),
}

impl fmt::Display for AffinityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AffinityKey::User(id) => write!(f, "user:{id}"),
            AffinityKey::Chat(id) => write!(f, "chat:{id}"),
            AffinityKey::Name(name) => write!(f, "name:{name}"),
        }
    }
}

impl From<i64> for AffinityKey {
    fn from(id: i64) -> Self {
        AffinityKey::User(id)
    }
}

impl From<&str> for AffinityKey {
    fn from(name: &str) -> Self {
        AffinityKey::Name(name.to_owned())
    }
}

/// One entry of the remote event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct Update {
    /// Sequence number; the cursor advances past it once submitted.
    pub id: i64,
    pub kind: UpdateKind,
}

impl Update {
    pub fn new(id: i64, kind: UpdateKind) -> Self {
        Self { id, kind }
    }

    pub fn update_type(&self) -> UpdateType {
        match &self.kind {
            UpdateKind::Message(_) => UpdateType::Message,
            UpdateKind::EditedMessage(_) => UpdateType::EditedMessage,
            UpdateKind::ChannelPost(_) => UpdateType::ChannelPost,
            UpdateKind::CallbackQuery(_) => UpdateType::CallbackQuery,
            UpdateKind::InlineQuery(_) => UpdateType::InlineQuery,
            UpdateKind::PreCheckoutQuery(_) => UpdateType::PreCheckoutQuery,
            UpdateKind::MessageReaction(_) => UpdateType::MessageReaction,
            UpdateKind::ChatMember(_) => UpdateType::ChatMember,
            UpdateKind::Other { kind, .. } => UpdateType::Other(kind.clone()),
        }
    }

    /// The user who directly caused this update, if any.
    pub fn sender(&self) -> Option<&User> {
        match &self.kind {
            UpdateKind::Message(m) | UpdateKind::EditedMessage(m) | UpdateKind::ChannelPost(m) => {
                m.from.as_ref()
            }
            UpdateKind::CallbackQuery(q) => Some(&q.from),
            UpdateKind::InlineQuery(q) => Some(&q.from),
            UpdateKind::PreCheckoutQuery(q) => Some(&q.from),
            UpdateKind::MessageReaction(r) => r.user.as_ref(),
            UpdateKind::ChatMember(c) => Some(&c.from),
            UpdateKind::Other { .. } => None,
        }
    }

    /// The conversation this update belongs to, if any.
    pub fn chat(&self) -> Option<&Chat> {
        match &self.kind {
            UpdateKind::Message(m) | UpdateKind::EditedMessage(m) | UpdateKind::ChannelPost(m) => {
                Some(&m.chat)
            }
            UpdateKind::CallbackQuery(q) => q.message.as_ref().map(|m| &m.chat),
            UpdateKind::MessageReaction(r) => Some(&r.chat),
            UpdateKind::ChatMember(c) => Some(&c.chat),
            UpdateKind::InlineQuery(_)
            | UpdateKind::PreCheckoutQuery(_)
            | UpdateKind::Other { .. } => None,
        }
    }

    /// Derives the ordering identity for this update.
    ///
    /// Takes the first identity present, in priority order: direct sender,
    /// sender chat (the owner of a channel post or anonymous message),
    /// reacting actor chat, then the containing chat.
    pub fn affinity_key(&self) -> Option<AffinityKey> {
        if let Some(user) = self.sender() {
            return Some(AffinityKey::User(user.id));
        }
        let owner = match &self.kind {
            UpdateKind::Message(m) | UpdateKind::EditedMessage(m) | UpdateKind::ChannelPost(m) => {
                m.sender_chat.as_ref()
            }
            UpdateKind::MessageReaction(r) => r.actor_chat.as_ref(),
            _ => None,
        };
        owner
            .or_else(|| self.chat())
            .map(|chat| AffinityKey::Chat(chat.id))
    }

    /// Text of a message-shaped update.
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::Message(m) | UpdateKind::EditedMessage(m) | UpdateKind::ChannelPost(m) => {
                m.text.as_deref()
            }
            _ => None,
        }
    }

    /// Whether this update should be routed to the command collaborator.
    pub fn is_command(&self) -> bool {
        matches!(&self.kind, UpdateKind::Message(m) if m.is_command())
    }

    /// Callback payload of a button press.
    pub fn callback_data(&self) -> Option<&str> {
        match &self.kind {
            UpdateKind::CallbackQuery(q) => q.data.as_deref(),
            _ => None,
        }
    }
}
