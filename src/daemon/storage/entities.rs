use std::{fmt::Display, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    daemon::error::RecorderError,
    utils::time::{format_duration, format_local_start_time},
};

/// Identity of a session. Two sessions of the same (app, task) pair within one recording run
/// differ by their start.
#[derive(PartialEq, Eq, Hash, PartialOrd, Ord, Debug, Clone)]
pub struct SessionId {
    pub task: Arc<str>,
    pub app: Arc<str>,
    pub start_time: i64,
}

impl SessionId {
    /// Key of the session inside the store file: `<task>-<app>#<start_time>`.
    pub fn storage_key(&self) -> String {
        format!("{}-{}#{}", self.task, self.app, self.start_time)
    }
}

impl Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// One contiguous interval during which the same (app, task) pair was in the foreground.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct Session {
    pub app: Arc<str>,
    pub task: Arc<str>,
    #[serde(with = "chrono::serde::ts_seconds")]
    pub start_time: DateTime<Utc>,
    #[serde(with = "duration_ser")]
    pub duration: Duration,
}

impl Session {
    pub fn open(app: Arc<str>, task: Arc<str>, start_time: DateTime<Utc>) -> Self {
        Self {
            app,
            task,
            start_time,
            duration: Duration::zero(),
        }
    }

    pub fn id(&self) -> SessionId {
        SessionId {
            task: self.task.clone(),
            app: self.app.clone(),
            start_time: self.start_time.timestamp(),
        }
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.start_time
            .checked_add_signed(self.duration)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// Moves the end of the session. The duration never shrinks and never becomes negative, so
    /// late or out-of-order timestamps are ignored.
    pub fn extend_to(&mut self, moment: DateTime<Utc>) {
        let duration = moment - self.start_time;
        if duration > self.duration {
            self.duration = duration;
        }
    }

    pub fn same_activity(&self, app: &str, task: &str) -> bool {
        &*self.app == app && &*self.task == task
    }

    pub fn with_duration(self, duration: Duration) -> Self {
        Self { duration, ..self }
    }

    pub fn to_entity(&self) -> SessionRecordEntity {
        SessionRecordEntity {
            app: Some(self.app.clone()),
            task: Some(self.task.clone()),
            start_time: Seconds::Number(self.start_time.timestamp()),
            duration: Seconds::Number(self.duration.num_seconds()),
        }
    }

    /// Restores a session from an entry of the store file.
    pub fn from_entry(key: &str, value: &Value) -> Result<Session, RecorderError> {
        let entity = SessionRecordEntity::deserialize(value)
            .map_err(|e| RecorderError::malformed(key, e.to_string()))?;

        let start = entity
            .start_time
            .seconds()
            .map_err(|e| RecorderError::malformed(key, format!("start_time {e}")))?;
        let duration = entity
            .duration
            .seconds()
            .map_err(|e| RecorderError::malformed(key, format!("duration {e}")))?;
        if duration < 0 {
            return Err(RecorderError::malformed(key, "duration is negative"));
        }
        let duration = Duration::try_seconds(duration)
            .ok_or_else(|| RecorderError::malformed(key, "duration is out of range"))?;
        let start_time = DateTime::from_timestamp(start, 0)
            .ok_or_else(|| RecorderError::malformed(key, "start_time is out of range"))?;

        let (task, app) = match (entity.task, entity.app) {
            (Some(task), Some(app)) => (task, app),
            _ => {
                let (task, app) = split_legacy_key(key);
                (task.into(), app.into())
            }
        };

        Ok(Session {
            app,
            task,
            start_time,
            duration,
        })
    }
}

/// Splits a key written without structured fields. An optional `#<start_time>` suffix is
/// dropped, then the last `-` separates task from app, so hyphens survive only inside the task.
pub fn split_legacy_key(key: &str) -> (&str, &str) {
    let base = match key.rsplit_once('#') {
        Some((base, suffix)) if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => key,
    };
    base.rsplit_once('-').unwrap_or(("", base))
}

/// Value of a single entry in the store file.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct SessionRecordEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app: Option<Arc<str>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Arc<str>>,
    pub start_time: Seconds,
    pub duration: Seconds,
}

/// Older files hold seconds as strings, newer ones as numbers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Seconds {
    Number(i64),
    Text(String),
}

impl Seconds {
    pub fn seconds(&self) -> Result<i64, String> {
        match self {
            Seconds::Number(v) => Ok(*v),
            Seconds::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("{s:?} is not a whole number of seconds: {e}")),
        }
    }
}

mod duration_ser {
    use chrono::Duration;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(duration.num_seconds())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = i64::deserialize(deserializer)?;
        Duration::try_seconds(s)
            .ok_or_else(|| serde::de::Error::custom(format!("{s} seconds is out of range")))
    }
}

/// Session prepared for display: the start is a local wall-clock time and the duration is
/// written as minutes and seconds.
#[derive(PartialEq, Eq, Debug, Serialize, Deserialize, Clone)]
pub struct DisplaySession {
    pub app: String,
    pub task: String,
    pub start_time: String,
    pub duration: String,
}

impl From<&Session> for DisplaySession {
    fn from(session: &Session) -> Self {
        DisplaySession {
            app: session.app.to_string(),
            task: session.task.to_string(),
            start_time: format_local_start_time(session.start_time),
            duration: format_duration(session.duration),
        }
    }
}
