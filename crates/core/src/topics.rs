//! Event stream addressing.
//!
//! Every per-team topic string is built and parsed here so the subscribing
//! side and the publishing side can never drift apart.

/// The four independently addressable streams of a team board.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTopic {
    Thoughts,
    ActionItems,
    ColumnTitles,
    EndRetro,
}

/// Common prefix of every board destination.
const DESTINATION_PREFIX: &str = "/topic/";

impl EventTopic {
    pub const ALL: [EventTopic; 4] = [
        EventTopic::Thoughts,
        EventTopic::ActionItems,
        EventTopic::ColumnTitles,
        EventTopic::EndRetro,
    ];

    /// Path segment naming this topic.
    pub fn segment(&self) -> &'static str {
        match self {
            EventTopic::Thoughts => "thoughts",
            EventTopic::ActionItems => "action-items",
            EventTopic::ColumnTitles => "column-titles",
            EventTopic::EndRetro => "end-retro",
        }
    }

    /// Full destination for `team_id`, e.g. `/topic/beach-bums/thoughts`.
    pub fn destination(&self, team_id: &str) -> String {
        format!("{DESTINATION_PREFIX}{team_id}/{}", self.segment())
    }

    /// Inverse of [`destination`](Self::destination).
    ///
    /// Returns the team id and topic, or `None` for anything that is not
    /// a board destination.
    pub fn parse_destination(destination: &str) -> Option<(&str, EventTopic)> {
        let rest = destination.strip_prefix(DESTINATION_PREFIX)?;
        let (team_id, segment) = rest.rsplit_once('/')?;
        if team_id.is_empty() {
            return None;
        }
        let topic = Self::ALL.into_iter().find(|t| t.segment() == segment)?;
        Some((team_id, topic))
    }
}

impl std::fmt::Display for EventTopic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.segment())
    }
}
