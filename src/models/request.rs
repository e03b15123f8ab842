use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::AppError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    Accepted,
    Played,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Played => "played",
            RequestStatus::Rejected => "rejected",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(RequestStatus::Pending),
            "accepted" => Ok(RequestStatus::Accepted),
            "played" => Ok(RequestStatus::Played),
            "rejected" => Ok(RequestStatus::Rejected),
            other => Err(AppError::internal(format!("unknown request status: {other}"))),
        }
    }
}

/// A song request submitted by an audience member.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SongRequest {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub song_title: String,
    pub artist: Option<String>,
    pub note: Option<String>,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SongRequestCreate {
    #[schema(example = "Bohemian Rhapsody")]
    pub song_title: String,
    #[schema(example = "Queen")]
    pub artist: Option<String>,
    #[schema(example = "For table 4")]
    pub note: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SongRequestUpdate {
    pub song_title: Option<String>,
    pub artist: Option<String>,
    pub note: Option<String>,
    pub status: Option<RequestStatus>,
}

impl SongRequestCreate {
    pub fn validate(&self) -> Result<(), AppError> {
        if self.song_title.trim().is_empty() {
            return Err(AppError::validation("song_title must not be empty"));
        }
        Ok(())
    }
}

impl SongRequestUpdate {
    pub fn validate(&self) -> Result<(), AppError> {
        if matches!(self.song_title.as_deref(), Some(title) if title.trim().is_empty()) {
            return Err(AppError::validation("song_title must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_titles_are_rejected() {
        let create = SongRequestCreate {
            song_title: "   ".to_string(),
            artist: None,
            note: None,
        };
        assert!(matches!(create.validate(), Err(AppError::Validation(_))));

        let update = SongRequestUpdate {
            song_title: Some(String::new()),
            artist: None,
            note: None,
            status: None,
        };
        assert!(update.validate().is_err());

        let untouched = SongRequestUpdate {
            song_title: None,
            artist: Some("Queen".to_string()),
            note: None,
            status: Some(RequestStatus::Played),
        };
        assert!(untouched.validate().is_ok());
    }

    #[test]
    fn status_parses_its_own_string_form() {
        for status in [
            RequestStatus::Pending,
            RequestStatus::Accepted,
            RequestStatus::Played,
            RequestStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>().unwrap(), status);
        }
        assert!("queued".parse::<RequestStatus>().is_err());
    }
}
