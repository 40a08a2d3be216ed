
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Type};

/// Processing state of a bot's knowledge base
///
/// The lowercase names are stable and stored as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum KnowledgeBaseStatus {
    Empty,
    Processing,
    Ready,
    Failed,
}

impl KnowledgeBaseStatus {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Processing => "processing",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for KnowledgeBaseStatus {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(type_name = "TEXT", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BotType {
    SimpleChat,
    QaKnowledgeBase,
    QaFeedback,
}

impl BotType {
    #[inline]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SimpleChat => "simple_chat",
            Self::QaKnowledgeBase => "qa_knowledge_base",
            Self::QaFeedback => "qa_feedback",
        }
    }

    /// Whether bots of this type answer from an uploaded document
    #[inline]
    pub const fn requires_knowledge_base(self) -> bool {
        matches!(self, Self::QaKnowledgeBase | Self::QaFeedback)
    }
}

impl std::fmt::Display for BotType {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BotType {
    type Err = anyhow::Error;

    #[inline]
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "simple_chat" => Ok(Self::SimpleChat),
            "qa_knowledge_base" => Ok(Self::QaKnowledgeBase),
            "qa_feedback" => Ok(Self::QaFeedback),
            other => Err(anyhow::anyhow!(
                "Unknown bot type '{}' (expected simple_chat, qa_knowledge_base or qa_feedback)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct KnowledgeBase {
    pub bot_id: i64,
    pub bot_type: BotType,
    pub status: KnowledgeBaseStatus,
    pub collection_name: String,
    pub error_message: Option<String>,
    pub active_document_id: Option<i64>,
    pub generation: i64,
    pub chunk_count: i64,
    pub created_date: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl KnowledgeBase {
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.status == KnowledgeBaseStatus::Ready
    }

    #[inline]
    pub fn is_processing(&self) -> bool {
        self.status == KnowledgeBaseStatus::Processing
    }

    #[inline]
    pub fn is_failed(&self) -> bool {
        self.status == KnowledgeBaseStatus::Failed
    }

    /// Whether queries may be answered from this knowledge base
    ///
    /// A re-ingestion keeps serving the last committed generation until it
    /// completes.
    #[inline]
    pub fn is_servable(&self) -> bool {
        match self.status {
            KnowledgeBaseStatus::Ready => true,
            KnowledgeBaseStatus::Processing => self.generation > 0,
            KnowledgeBaseStatus::Empty | KnowledgeBaseStatus::Failed => false,
        }
    }
}

/// Vector collection name for a bot
#[inline]
pub fn collection_name_for(bot_id: i64) -> String {
    format!("bot_{}_kb", bot_id)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Document {
    pub id: i64,
    pub bot_id: i64,
    pub file_name: String,
    pub storage_path: String,
    pub byte_size: i64,
    pub page_count: Option<i64>,
    pub uploaded_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDocument {
    pub bot_id: i64,
    pub file_name: String,
    pub storage_path: String,
    pub byte_size: i64,
}
