//! Persisted entities and their wire forms.
//!
//! All timestamps are UTC. Wire forms are camelCase to match the REST and
//! event-bus payloads consumed by the browser UI and the stdio proxies.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Conversations
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Lifecycle status of a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Active,
    Archived,
}

impl ConversationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Archived => "archived",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "archived" => Some(Self::Archived),
            _ => None,
        }
    }
}

/// Why an archived conversation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndReason {
    Completed,
    Timeout,
    Manual,
}

impl EndReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Timeout => "timeout",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "completed" => Some(Self::Completed),
            "timeout" => Some(Self::Timeout),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A consultation conversation with an external model.
///
/// Archived conversations always carry `end_reason` and `ended_at`;
/// active ones never do.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    pub status: ConversationStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

/// Role of a message turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

/// A single immutable message turn. The ordinal is monotonic and unique
/// per conversation; the sequence is append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub ordinal: i64,
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// RAG corpus
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where a document came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Upload,
    Manual,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Manual => "manual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "upload" => Some(Self::Upload),
            "manual" => Some(Self::Manual),
            _ => None,
        }
    }
}

/// A document in the retrieval corpus. Deleting a document cascades to
/// its chunks and their embeddings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub title: String,
    pub source_type: SourceType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// A contiguous slice of a document's text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub token_count: i64,
    pub created_at: DateTime<Utc>,
}

/// A stored embedding vector for one chunk. The vector is a little-endian
/// IEEE-754 f32 byte buffer; at most one embedding exists per chunk.
#[derive(Debug, Clone)]
pub struct Embedding {
    pub chunk_id: String,
    pub vector: Vec<u8>,
    pub dim: i64,
    pub model: String,
    pub created_at: DateTime<Utc>,
}

/// Category of a structured memory note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemoryCategory {
    Architecture,
    Backend,
    Db,
    Auth,
    Config,
    Flow,
    Other,
}

impl MemoryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Architecture => "architecture",
            Self::Backend => "backend",
            Self::Db => "db",
            Self::Auth => "auth",
            Self::Config => "config",
            Self::Flow => "flow",
            Self::Other => "other",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "architecture" => Some(Self::Architecture),
            "backend" => Some(Self::Backend),
            "db" => Some(Self::Db),
            "auth" => Some(Self::Auth),
            "config" => Some(Self::Config),
            "flow" => Some(Self::Flow),
            "other" => Some(Self::Other),
            _ => None,
        }
    }
}

/// A structured memory note. Creation also produces a mirror document so
/// memories are retrievable through the same path as uploads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub category: MemoryCategory,
    pub title: String,
    pub content: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Clients & lock file
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Kind of connected client, inferred from the handshake query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientKind {
    Proxy,
    Webui,
    Unknown,
}

impl ClientKind {
    pub fn from_query(s: &str) -> Self {
        match s {
            "proxy" => Self::Proxy,
            "webui" => Self::Webui,
            _ => Self::Unknown,
        }
    }
}

/// In-memory registration of a connected client. Discarded on disconnect.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientRegistration {
    pub id: String,
    pub kind: ClientKind,
    pub connected_at: DateTime<Utc>,
}

/// On-disk lock file contents: `$HOME/.ai-consultation-mcp/daemon.lock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DaemonLock {
    pub pid: u32,
    pub port: u16,
    pub started_at: DateTime<Utc>,
    /// 32 random bytes rendered as 64 hex chars; shared secret for all
    /// client connections.
    pub token: String,
}
