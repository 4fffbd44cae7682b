//! Redis-backed session store.
//!
//! Layout (all keys carry the configured prefix):
//! - `upload_session:{id}` hash: `record` (session JSON without chunks),
//!   `status`, `final_locator`, `error_message`, `updated_at`
//! - `upload_session:{id}:chunks` hash: chunk number -> chunk JSON
//! - `upload_sessions:expiry` sorted set scored by `expires_at` (ms)
//! - `upload_sessions:owner:{owner}` and `upload_sessions:status:{status}` sets
//!
//! Chunk writes and status changes run as Lua scripts so the terminal-status
//! check and the write happen atomically.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use tracing::{debug, info};

use clipline_models::{ChunkInfo, SessionId, UploadSession, UploadStatus};

use crate::config::SessionStoreConfig;
use crate::error::{SessionStoreError, SessionStoreResult};
use crate::store::{ChunkWrite, StatusUpdate, Transition, UploadSessionStore};

const PUT_CHUNK_SCRIPT: &str = r#"
local status = redis.call('HGET', KEYS[1], 'status')
if not status then
  return {'missing', ''}
end
if status ~= 'initializing' and status ~= 'uploading' then
  return {'rejected', status}
end
redis.call('HSET', KEYS[2], ARGV[1], ARGV[2])
redis.call('HSET', KEYS[1], 'updated_at', ARGV[3])
return {'written', status}
"#;

const TRANSITION_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'status')
if not current then
  return {'missing', ''}
end
local allowed = false
for s in string.gmatch(ARGV[2], '[^,]+') do
  if s == current then
    allowed = true
  end
end
if not allowed then
  return {'rejected', current}
end
if ARGV[3] == '1' then
  local chunks = redis.call('HVALS', KEYS[2])
  if #chunks == 0 then
    return {'incomplete', current}
  end
  for _, raw in ipairs(chunks) do
    if not cjson.decode(raw)['is_completed'] then
      return {'incomplete', current}
    end
  end
end
redis.call('HSET', KEYS[1], 'status', ARGV[1], 'updated_at', ARGV[4])
if ARGV[5] ~= '' then
  redis.call('HSET', KEYS[1], 'final_locator', ARGV[5])
end
if ARGV[6] ~= '' then
  redis.call('HSET', KEYS[1], 'error_message', ARGV[6])
end
redis.call('SREM', ARGV[7] .. current, ARGV[8])
redis.call('SADD', ARGV[7] .. ARGV[1], ARGV[8])
return {'applied', current}
"#;

/// Session store backed by Redis.
pub struct RedisSessionStore {
    client: redis::Client,
    prefix: String,
    put_chunk_script: redis::Script,
    transition_script: redis::Script,
}

impl RedisSessionStore {
    /// Create a new store.
    pub fn new(config: SessionStoreConfig) -> SessionStoreResult<Self> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        Ok(Self {
            client,
            prefix: config.key_prefix,
            put_chunk_script: redis::Script::new(PUT_CHUNK_SCRIPT),
            transition_script: redis::Script::new(TRANSITION_SCRIPT),
        })
    }

    /// Create from environment variables.
    pub fn from_env() -> SessionStoreResult<Self> {
        Self::new(SessionStoreConfig::from_env())
    }

    /// Verify the server is reachable.
    pub async fn ping(&self) -> SessionStoreResult<()> {
        let mut conn = self.connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(())
    }

    async fn connection(&self) -> SessionStoreResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| SessionStoreError::connection_failed(e.to_string()))
    }

    fn session_key(&self, id: &SessionId) -> String {
        format!("{}upload_session:{}", self.prefix, id)
    }

    fn chunks_key(&self, id: &SessionId) -> String {
        format!("{}upload_session:{}:chunks", self.prefix, id)
    }

    fn expiry_key(&self) -> String {
        format!("{}upload_sessions:expiry", self.prefix)
    }

    fn owner_key(&self, owner_id: &str) -> String {
        format!("{}upload_sessions:owner:{}", self.prefix, owner_id)
    }

    fn status_prefix(&self) -> String {
        format!("{}upload_sessions:status:", self.prefix)
    }

    fn status_key(&self, status: UploadStatus) -> String {
        format!("{}{}", self.status_prefix(), status.as_str())
    }
}

/// Parse a `{outcome, status}` script reply.
fn parse_reply(reply: &[String]) -> SessionStoreResult<(&str, Option<UploadStatus>)> {
    match reply {
        [outcome, status] => Ok((outcome.as_str(), UploadStatus::parse(status))),
        other => Err(SessionStoreError::UnexpectedReply(format!("{:?}", other))),
    }
}

/// Rebuild a session from its hash and chunk hash.
fn assemble(
    id: &SessionId,
    fields: HashMap<String, String>,
    chunk_fields: HashMap<String, String>,
) -> SessionStoreResult<UploadSession> {
    let record = fields
        .get("record")
        .ok_or_else(|| SessionStoreError::corrupt(id.as_str(), "missing record field"))?;
    let mut session: UploadSession = serde_json::from_str(record)?;

    let status = fields
        .get("status")
        .and_then(|s| UploadStatus::parse(s))
        .ok_or_else(|| SessionStoreError::corrupt(id.as_str(), "missing or unknown status"))?;
    session.status = status;
    session.final_locator = fields.get("final_locator").cloned();
    session.error_message = fields.get("error_message").cloned();
    if let Some(updated_at) = fields
        .get("updated_at")
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
    {
        session.updated_at = updated_at.with_timezone(&Utc);
    }

    let mut chunks = chunk_fields
        .values()
        .map(|raw| serde_json::from_str::<ChunkInfo>(raw))
        .collect::<Result<Vec<_>, _>>()?;
    chunks.sort_by_key(|c| c.chunk_number);
    session.chunks = chunks;

    Ok(session)
}

#[async_trait]
impl UploadSessionStore for RedisSessionStore {
    async fn insert(&self, session: &UploadSession) -> SessionStoreResult<()> {
        let mut conn = self.connection().await?;
        let id = &session.session_id;
        let session_key = self.session_key(id);

        let exists: bool = conn.exists(&session_key).await?;
        if exists {
            return Err(SessionStoreError::AlreadyExists(id.to_string()));
        }

        let mut record = session.clone();
        record.chunks.clear();

        let mut fields = vec![
            ("record".to_string(), serde_json::to_string(&record)?),
            ("status".to_string(), session.status.as_str().to_string()),
            ("updated_at".to_string(), session.updated_at.to_rfc3339()),
        ];
        if let Some(locator) = &session.final_locator {
            fields.push(("final_locator".to_string(), locator.clone()));
        }
        if let Some(message) = &session.error_message {
            fields.push(("error_message".to_string(), message.clone()));
        }

        let chunk_fields = session
            .chunks
            .iter()
            .map(|c| Ok((c.chunk_number, serde_json::to_string(c)?)))
            .collect::<SessionStoreResult<Vec<_>>>()?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .hset_multiple(&session_key, &fields[..])
            .ignore();
        if !chunk_fields.is_empty() {
            pipe.hset_multiple(self.chunks_key(id), &chunk_fields[..]).ignore();
        }
        pipe.zadd(
            self.expiry_key(),
            id.as_str(),
            session.expires_at.timestamp_millis(),
        )
        .ignore()
        .sadd(self.owner_key(&session.owner_id), id.as_str())
        .ignore()
        .sadd(self.status_key(session.status), id.as_str())
        .ignore();

        pipe.query_async::<()>(&mut conn).await?;

        debug!(session_id = %id, chunks = session.chunks.len(), "Stored upload session");
        Ok(())
    }

    async fn get(&self, id: &SessionId) -> SessionStoreResult<Option<UploadSession>> {
        let mut conn = self.connection().await?;

        let (fields, chunk_fields): (HashMap<String, String>, HashMap<String, String>) =
            redis::pipe()
                .hgetall(self.session_key(id))
                .hgetall(self.chunks_key(id))
                .query_async(&mut conn)
                .await?;

        if fields.is_empty() {
            return Ok(None);
        }

        assemble(id, fields, chunk_fields).map(Some)
    }

    async fn put_chunk(
        &self,
        id: &SessionId,
        chunk: &ChunkInfo,
        at: DateTime<Utc>,
    ) -> SessionStoreResult<ChunkWrite> {
        let mut conn = self.connection().await?;

        let reply: Vec<String> = self
            .put_chunk_script
            .key(self.session_key(id))
            .key(self.chunks_key(id))
            .arg(chunk.chunk_number)
            .arg(serde_json::to_string(chunk)?)
            .arg(at.to_rfc3339())
            .invoke_async(&mut conn)
            .await?;

        match parse_reply(&reply)? {
            ("missing", _) => Ok(ChunkWrite::Missing),
            ("written", Some(status)) => Ok(ChunkWrite::Written { status }),
            ("rejected", Some(status)) => Ok(ChunkWrite::Rejected { status }),
            _ => Err(SessionStoreError::UnexpectedReply(format!("{:?}", reply))),
        }
    }

    async fn transition(&self, id: &SessionId, update: StatusUpdate) -> SessionStoreResult<Transition> {
        let mut conn = self.connection().await?;

        let from = update
            .from
            .iter()
            .map(UploadStatus::as_str)
            .collect::<Vec<_>>()
            .join(",");

        let reply: Vec<String> = self
            .transition_script
            .key(self.session_key(id))
            .key(self.chunks_key(id))
            .arg(update.to.as_str())
            .arg(from)
            .arg(if update.require_all_chunks { "1" } else { "0" })
            .arg(update.at.to_rfc3339())
            .arg(update.final_locator.as_deref().unwrap_or_default())
            .arg(update.error_message.as_deref().unwrap_or_default())
            .arg(self.status_prefix())
            .arg(id.as_str())
            .invoke_async(&mut conn)
            .await?;

        let outcome = match parse_reply(&reply)? {
            ("missing", _) => Transition::Missing,
            ("applied", Some(previous)) => Transition::Applied { previous },
            ("rejected", Some(current)) => Transition::Rejected { current },
            ("incomplete", Some(current)) => Transition::Incomplete { current },
            _ => return Err(SessionStoreError::UnexpectedReply(format!("{:?}", reply))),
        };

        if let Transition::Applied { previous } = outcome {
            debug!(session_id = %id, from = %previous, to = %update.to, "Session status changed");
        }
        Ok(outcome)
    }

    async fn list_expiring_before(&self, before: DateTime<Utc>) -> SessionStoreResult<Vec<SessionId>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn
            .zrangebyscore(
                self.expiry_key(),
                "-inf",
                format!("({}", before.timestamp_millis()),
            )
            .await?;
        Ok(ids.into_iter().map(SessionId::from).collect())
    }

    async fn list_by_owner(&self, owner_id: &str) -> SessionStoreResult<Vec<SessionId>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(self.owner_key(owner_id)).await?;
        Ok(ids.into_iter().map(SessionId::from).collect())
    }

    async fn list_by_status(&self, status: UploadStatus) -> SessionStoreResult<Vec<SessionId>> {
        let mut conn = self.connection().await?;
        let ids: Vec<String> = conn.smembers(self.status_key(status)).await?;
        Ok(ids.into_iter().map(SessionId::from).collect())
    }

    async fn delete(&self, id: &SessionId) -> SessionStoreResult<bool> {
        let mut conn = self.connection().await?;
        let session_key = self.session_key(id);

        let (record, status): (Option<String>, Option<String>) = redis::pipe()
            .hget(&session_key, "record")
            .hget(&session_key, "status")
            .query_async(&mut conn)
            .await?;

        let Some(record) = record else {
            return Ok(false);
        };
        let session: UploadSession = serde_json::from_str(&record)?;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(&session_key)
            .ignore()
            .del(self.chunks_key(id))
            .ignore()
            .zrem(self.expiry_key(), id.as_str())
            .ignore()
            .srem(self.owner_key(&session.owner_id), id.as_str())
            .ignore();
        if let Some(status) = status.as_deref().and_then(UploadStatus::parse) {
            pipe.srem(self.status_key(status), id.as_str()).ignore();
        }
        pipe.query_async::<()>(&mut conn).await?;

        info!(session_id = %id, "Deleted upload session");
        Ok(true)
    }
}
