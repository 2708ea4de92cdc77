//! Session store: conversations, their context, turns and suggestion seeds.
//!
//! All timestamps are stored as Unix milliseconds. Appends for one session
//! are serialized by the database mutex, and each message receives a
//! `created_at` strictly greater than the previous message of its session.

use std::sync::Arc;

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::{debug, info};
use uuid::Uuid;

use abode_core::error::AbodeError;
use abode_core::types::{Message, QueryType, Role, Session, SessionContext, SessionSeed, SessionSummary};

use crate::db::{storage_err, Database};

/// Repository for chat sessions and their messages.
pub struct SessionRepository {
    db: Arc<Database>,
    ttl: Duration,
}

impl SessionRepository {
    pub fn new(db: Arc<Database>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    /// Sliding expiry window applied on create and on every turn.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Create an active session expiring `ttl` from now. When `welcome` is
    /// given, a canned assistant turn is appended and returned.
    pub fn create(
        &self,
        seed: &SessionSeed,
        welcome: Option<&str>,
    ) -> Result<(Session, Option<Message>), AbodeError> {
        let now = now_millis();
        let session = Session {
            id: Uuid::new_v4(),
            user_id: seed.user_id.clone(),
            location: seed.location.clone().unwrap_or_default(),
            context: seed.context.clone(),
            last_query_type: QueryType::General,
            is_active: true,
            created_at: now,
            last_message_at: now,
            expires_at: now + self.ttl,
        };
        let context_json = serde_json::to_string(&session.context)?;

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO chat_sessions
                    (id, user_id, location, context, last_query_type, is_active,
                     created_at, last_message_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, ?8)",
                rusqlite::params![
                    session.id.to_string(),
                    session.user_id,
                    session.location,
                    context_json,
                    session.last_query_type.as_str(),
                    session.created_at.timestamp_millis(),
                    session.last_message_at.timestamp_millis(),
                    session.expires_at.timestamp_millis(),
                ],
            )
            .map_err(storage_err("Failed to create session"))?;
            Ok(())
        })?;

        info!(session_id = %session.id, "Chat session created");

        let welcome = match welcome {
            Some(text) => Some(self.append_message(&Message::assistant(
                session.id,
                text,
                &session.context,
            ))?),
            None => None,
        };

        Ok((session, welcome))
    }

    /// Fetch a session by id.
    pub fn get(&self, id: Uuid) -> Result<Option<Session>, AbodeError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    "SELECT id, user_id, location, context, last_query_type, is_active,
                            created_at, last_message_at, expires_at
                     FROM chat_sessions WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                    |row| Ok(row_to_session(row)),
                )
                .optional()
                .map_err(storage_err("Failed to load session"))?;
            result.transpose()
        })
    }

    /// Overwrite the mutable columns of a session. Last writer wins.
    pub fn update(&self, session: &Session) -> Result<(), AbodeError> {
        let context_json = serde_json::to_string(&session.context)?;
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE chat_sessions
                     SET user_id = ?2, location = ?3, context = ?4, last_query_type = ?5,
                         is_active = ?6, last_message_at = ?7, expires_at = ?8
                     WHERE id = ?1",
                    rusqlite::params![
                        session.id.to_string(),
                        session.user_id,
                        session.location,
                        context_json,
                        session.last_query_type.as_str(),
                        session.is_active as i32,
                        session.last_message_at.timestamp_millis(),
                        session.expires_at.timestamp_millis(),
                    ],
                )
                .map_err(storage_err("Failed to update session"))?;
            if changed == 0 {
                return Err(AbodeError::Storage(format!(
                    "Session {} does not exist",
                    session.id
                )));
            }
            Ok(())
        })
    }

    /// Append a message and return it with its assigned `created_at`.
    pub fn append_message(&self, message: &Message) -> Result<Message, AbodeError> {
        let snapshot = serde_json::to_string(&message.context_snapshot)?;
        let data_results = serde_json::to_string(&message.data_results)?;
        let suggestions = serde_json::to_string(&message.suggestions)?;

        self.db.with_conn(|conn| {
            let last: Option<i64> = conn
                .query_row(
                    "SELECT MAX(created_at) FROM chat_messages WHERE session_id = ?1",
                    rusqlite::params![message.session_id.to_string()],
                    |row| row.get(0),
                )
                .map_err(storage_err("Failed to read last message time"))?;

            let now = Utc::now().timestamp_millis();
            let created_at = match last {
                Some(last) if last >= now => last + 1,
                _ => now,
            };

            conn.execute(
                "INSERT INTO chat_messages
                    (id, session_id, role, content, created_at, processing_time_ms,
                     context_snapshot, data_results, suggestions)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    message.id.to_string(),
                    message.session_id.to_string(),
                    message.role.as_str(),
                    message.content,
                    created_at,
                    message.processing_time_ms.map(|ms| ms as i64),
                    snapshot,
                    data_results,
                    suggestions,
                ],
            )
            .map_err(storage_err("Failed to append message"))?;

            debug!(session_id = %message.session_id, role = message.role.as_str(), "Message appended");

            Ok(Message {
                created_at: millis_to_datetime(created_at),
                ..message.clone()
            })
        })
    }

    /// Up to `n` most recent messages of a session, oldest first.
    pub fn recent_messages(&self, id: Uuid, n: usize) -> Result<Vec<Message>, AbodeError> {
        let mut messages = self.query_messages(
            "SELECT id, session_id, role, content, created_at, processing_time_ms,
                    context_snapshot, data_results, suggestions
             FROM chat_messages WHERE session_id = ?1
             ORDER BY created_at DESC LIMIT ?2",
            id,
            n as i64,
        )?;
        messages.reverse();
        Ok(messages)
    }

    /// Every message of a session, oldest first.
    pub fn history(&self, id: Uuid) -> Result<Vec<Message>, AbodeError> {
        self.query_messages(
            "SELECT id, session_id, role, content, created_at, processing_time_ms,
                    context_snapshot, data_results, suggestions
             FROM chat_messages WHERE session_id = ?1
             ORDER BY created_at ASC LIMIT ?2",
            id,
            -1,
        )
    }

    fn query_messages(&self, sql: &str, id: Uuid, limit: i64) -> Result<Vec<Message>, AbodeError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(sql)
                .map_err(storage_err("Message query prepare"))?;
            let rows = stmt
                .query_map(rusqlite::params![id.to_string(), limit], |row| {
                    Ok(row_to_message(row))
                })
                .map_err(storage_err("Message query"))?;

            let mut messages = Vec::new();
            for row in rows {
                messages.push(row.map_err(storage_err("Message row"))??);
            }
            Ok(messages)
        })
    }

    /// Active suggestion texts for a category, highest priority first.
    pub fn list_suggestions(&self, category: &str, limit: usize) -> Result<Vec<String>, AbodeError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT text FROM chat_suggestions
                     WHERE category = ?1 AND is_active = 1
                     ORDER BY priority DESC, id ASC
                     LIMIT ?2",
                )
                .map_err(storage_err("Suggestion query prepare"))?;
            let rows = stmt
                .query_map(rusqlite::params![category, limit as i64], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(storage_err("Suggestion query"))?;

            let mut texts = Vec::new();
            for row in rows {
                texts.push(row.map_err(storage_err("Suggestion row"))?);
            }
            Ok(texts)
        })
    }

    /// Store a finished turn on a live session: context, last query type
    /// and a slid expiry window. Ended or lapsed sessions are left untouched
    /// and `false` is returned.
    pub fn record_turn(
        &self,
        id: Uuid,
        context: &SessionContext,
        query_type: QueryType,
        now: DateTime<Utc>,
    ) -> Result<bool, AbodeError> {
        let context_json = serde_json::to_string(context)?;
        let expires_at = now + self.ttl;
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE chat_sessions
                     SET context = ?2, last_query_type = ?3, last_message_at = ?4, expires_at = ?5
                     WHERE id = ?1 AND is_active = 1 AND expires_at > ?4",
                    rusqlite::params![
                        id.to_string(),
                        context_json,
                        query_type.as_str(),
                        now.timestamp_millis(),
                        expires_at.timestamp_millis(),
                    ],
                )
                .map_err(storage_err("Failed to record turn"))?;
            Ok(changed > 0)
        })
    }

    /// Mark a session inactive. Returns false when the id is unknown.
    pub fn end(&self, id: Uuid) -> Result<bool, AbodeError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE chat_sessions SET is_active = 0 WHERE id = ?1",
                    rusqlite::params![id.to_string()],
                )
                .map_err(storage_err("Failed to end session"))?;
            Ok(changed > 0)
        })
    }

    /// Session summaries for a user, most recently active first.
    pub fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<SessionSummary>, AbodeError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT s.id, s.user_id, s.last_query_type, s.is_active,
                            (SELECT COUNT(*) FROM chat_messages m WHERE m.session_id = s.id),
                            s.last_message_at, s.expires_at
                     FROM chat_sessions s
                     WHERE s.user_id = ?1
                     ORDER BY s.last_message_at DESC
                     LIMIT ?2",
                )
                .map_err(storage_err("Session list prepare"))?;
            let rows = stmt
                .query_map(rusqlite::params![user_id, limit as i64], |row| {
                    Ok(row_to_summary(row))
                })
                .map_err(storage_err("Session list"))?;

            let mut summaries = Vec::new();
            for row in rows {
                summaries.push(row.map_err(storage_err("Session list row"))??);
            }
            Ok(summaries)
        })
    }

    /// Delete sessions that expired before `now`, with their messages.
    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, AbodeError> {
        let purged = self.db.with_conn(|conn| {
            conn.execute(
                "DELETE FROM chat_sessions WHERE expires_at < ?1",
                rusqlite::params![now.timestamp_millis()],
            )
            .map_err(storage_err("Failed to purge sessions"))
        })?;
        if purged > 0 {
            info!(purged, "Purged expired chat sessions");
        }
        Ok(purged as u64)
    }
}

/// Current time truncated to millisecond precision, matching storage.
fn now_millis() -> DateTime<Utc> {
    millis_to_datetime(Utc::now().timestamp_millis())
}

fn millis_to_datetime(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

fn parse_uuid(raw: &str) -> Result<Uuid, AbodeError> {
    Uuid::parse_str(raw).map_err(|e| AbodeError::Storage(format!("Invalid UUID: {}", e)))
}

fn row_to_session(row: &rusqlite::Row<'_>) -> Result<Session, AbodeError> {
    let err = storage_err("Session row");
    let id: String = row.get(0).map_err(&err)?;
    let context_json: String = row.get(3).map_err(&err)?;
    let query_type: String = row.get(4).map_err(&err)?;
    let is_active: i64 = row.get(5).map_err(&err)?;

    Ok(Session {
        id: parse_uuid(&id)?,
        user_id: row.get(1).map_err(&err)?,
        location: row.get(2).map_err(&err)?,
        context: serde_json::from_str::<SessionContext>(&context_json)?,
        last_query_type: query_type.parse().unwrap_or_default(),
        is_active: is_active != 0,
        created_at: millis_to_datetime(row.get(6).map_err(&err)?),
        last_message_at: millis_to_datetime(row.get(7).map_err(&err)?),
        expires_at: millis_to_datetime(row.get(8).map_err(&err)?),
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<Message, AbodeError> {
    let err = storage_err("Message row");
    let id: String = row.get(0).map_err(&err)?;
    let session_id: String = row.get(1).map_err(&err)?;
    let role: String = row.get(2).map_err(&err)?;
    let processing_time_ms: Option<i64> = row.get(5).map_err(&err)?;
    let snapshot: String = row.get(6).map_err(&err)?;
    let data_results: String = row.get(7).map_err(&err)?;
    let suggestions: String = row.get(8).map_err(&err)?;

    Ok(Message {
        id: parse_uuid(&id)?,
        session_id: parse_uuid(&session_id)?,
        role: role.parse::<Role>().map_err(AbodeError::Storage)?,
        content: row.get(3).map_err(&err)?,
        created_at: millis_to_datetime(row.get(4).map_err(&err)?),
        processing_time_ms: processing_time_ms.map(|ms| ms.max(0) as u64),
        context_snapshot: serde_json::from_str(&snapshot)?,
        data_results: serde_json::from_str(&data_results)?,
        suggestions: serde_json::from_str(&suggestions)?,
    })
}

fn row_to_summary(row: &rusqlite::Row<'_>) -> Result<SessionSummary, AbodeError> {
    let err = storage_err("Session summary row");
    let id: String = row.get(0).map_err(&err)?;
    let query_type: String = row.get(2).map_err(&err)?;
    let is_active: i64 = row.get(3).map_err(&err)?;
    let message_count: i64 = row.get(4).map_err(&err)?;

    Ok(SessionSummary {
        id: parse_uuid(&id)?,
        user_id: row.get(1).map_err(&err)?,
        last_query_type: query_type.parse().unwrap_or_default(),
        is_active: is_active != 0,
        message_count: message_count.max(0) as u64,
        last_message_at: millis_to_datetime(row.get(5).map_err(&err)?),
        expires_at: millis_to_datetime(row.get(6).map_err(&err)?),
    })
}

/// Extension trait for rusqlite to support optional query results.
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error>;
}

impl<T> OptionalExt<T> for Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>, rusqlite::Error> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
