/// Entity identifiers are server-assigned integers, unique per team.
pub type DbId = i64;

/// Teams are addressed by their opaque slug (e.g. `"beach-bums"`).
pub type TeamId = String;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;
