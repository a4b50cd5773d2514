//! Board entities as they travel over the wire.
//!
//! All three entity kinds use camelCase JSON, matching both the REST
//! snapshot endpoints and the payloads carried by the event stream.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::types::DbId;

/// Anything that lives in an identifier-keyed board collection.
pub trait Entity {
    fn id(&self) -> DbId;
}

/// The fixed mood/category of a board column.
///
/// Topic is the stable join key for a column: titles change, topics never do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnTopic {
    #[serde(alias = "happy")]
    Positive,
    Confused,
    #[serde(alias = "unhappy")]
    Negative,
    Action,
}

impl ColumnTopic {
    /// Every topic, in board display order.
    pub const ALL: [ColumnTopic; 4] = [
        ColumnTopic::Positive,
        ColumnTopic::Confused,
        ColumnTopic::Negative,
        ColumnTopic::Action,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnTopic::Positive => "positive",
            ColumnTopic::Confused => "confused",
            ColumnTopic::Negative => "negative",
            ColumnTopic::Action => "action",
        }
    }
}

impl std::fmt::Display for ColumnTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A short retrospective note posted into one of the mood columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thought {
    pub id: DbId,
    pub message: String,
    /// Vote count. Only ever incremented by the server.
    #[serde(default)]
    pub hearts: u32,
    #[serde(default)]
    pub discussed: bool,
    pub topic: ColumnTopic,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<DbId>,
}

impl Entity for Thought {
    fn id(&self) -> DbId {
        self.id
    }
}

/// A follow-up task that survives the end of a retro while incomplete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionItem {
    pub id: DbId,
    pub task: String,
    #[serde(default)]
    pub assignee: Option<String>,
    #[serde(default)]
    pub completed: bool,
    #[serde(default)]
    pub date_created: Option<NaiveDate>,
    #[serde(default)]
    pub archived: bool,
}

impl Entity for ActionItem {
    fn id(&self) -> DbId {
        self.id
    }
}

/// The editable label of a fixed-topic board section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnTitle {
    pub id: DbId,
    pub topic: ColumnTopic,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl Entity for ColumnTitle {
    fn id(&self) -> DbId {
        self.id
    }
}
