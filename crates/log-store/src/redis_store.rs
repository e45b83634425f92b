use std::time::Duration;

use async_trait::async_trait;
use redis::{
    AsyncCommands, Client, ErrorKind, RedisError, Value,
    aio::ConnectionManager,
    streams::{StreamMaxlen, StreamPendingCountReply},
};

use crate::{
    Entry, EntryId, Fields, LogStoreError, Result,
    store::{AppendOptions, GroupStart, LogStore, PendingEntry, ReadCursor, ReadGroup, Trim},
};

/// Redis Streams backed log store.
///
/// Commands run over a shared auto-reconnecting connection. A blocking
/// `XREADGROUP` holds that connection until it returns, so every worker that
/// blocks should own a store obtained from [`RedisLogStore::dedicated`].
#[derive(Clone)]
pub struct RedisLogStore {
    client: Client,
    conn: ConnectionManager,
}

impl RedisLogStore {
    /// Connects to the Redis server at `url`.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        tracing::info!("connected to redis");
        Ok(Self { client, conn })
    }

    /// Opens a store on a new connection to the same server.
    pub async fn dedicated(&self) -> Result<Self> {
        let conn = self.client.get_connection_manager().await?;
        Ok(Self {
            client: self.client.clone(),
            conn,
        })
    }

    fn map_group_error(err: RedisError, stream: &str, group: &str) -> LogStoreError {
        if err.code() == Some("NOGROUP") {
            LogStoreError::NoGroup {
                stream: stream.to_string(),
                group: group.to_string(),
            }
        } else {
            err.into()
        }
    }
}

fn maxlen(trim: Trim) -> StreamMaxlen {
    match trim {
        Trim::MaxLen(n) => StreamMaxlen::Equals(n),
        Trim::ApproxMaxLen(n) => StreamMaxlen::Approx(n),
    }
}

fn unexpected_reply(what: &'static str) -> LogStoreError {
    RedisError::from((ErrorKind::TypeError, what)).into()
}

fn parse_fields(value: &Value) -> Result<Fields> {
    match value {
        // A pending entry that was trimmed away comes back without fields.
        Value::Nil => Ok(Fields::new()),
        Value::Array(items) => items
            .chunks_exact(2)
            .map(|pair| {
                Ok((
                    redis::from_redis_value::<String>(&pair[0])?,
                    redis::from_redis_value::<String>(&pair[1])?,
                ))
            })
            .collect(),
        Value::Map(pairs) => pairs
            .iter()
            .map(|(k, v)| {
                Ok((
                    redis::from_redis_value::<String>(k)?,
                    redis::from_redis_value::<String>(v)?,
                ))
            })
            .collect(),
        _ => Err(unexpected_reply("stream entry fields")),
    }
}

/// Parses an array of `[id, [field, value, ...]]` pairs.
fn parse_entries(value: &Value) -> Result<Vec<Entry>> {
    let Value::Array(items) = value else {
        return Err(unexpected_reply("stream entries"));
    };
    items
        .iter()
        .map(|item| match item {
            Value::Array(parts) if parts.len() == 2 => {
                let id: String = redis::from_redis_value(&parts[0])?;
                Ok(Entry::new(id.parse()?, parse_fields(&parts[1])?))
            }
            _ => Err(unexpected_reply("stream entry")),
        })
        .collect()
}

/// Parses an `XREADGROUP` reply for a single stream.
fn parse_read_reply(value: &Value) -> Result<Vec<Entry>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(streams) => {
            let mut entries = Vec::new();
            for stream in streams {
                match stream {
                    Value::Array(parts) if parts.len() == 2 => {
                        entries.extend(parse_entries(&parts[1])?)
                    }
                    _ => return Err(unexpected_reply("XREADGROUP stream")),
                }
            }
            Ok(entries)
        }
        Value::Map(streams) => {
            let mut entries = Vec::new();
            for (_, stream_entries) in streams {
                entries.extend(parse_entries(stream_entries)?);
            }
            Ok(entries)
        }
        _ => Err(unexpected_reply("XREADGROUP reply")),
    }
}

fn pending_reply(reply: StreamPendingCountReply) -> Result<Vec<PendingEntry>> {
    reply
        .ids
        .into_iter()
        .map(|pending| {
            Ok(PendingEntry {
                id: pending.id.parse()?,
                consumer: pending.consumer,
                delivery_count: pending.times_delivered as u64,
                idle: Duration::from_millis(pending.last_delivered_ms as u64),
            })
        })
        .collect()
}

#[async_trait]
impl LogStore for RedisLogStore {
    async fn append(
        &self,
        stream: &str,
        fields: &Fields,
        options: AppendOptions,
    ) -> Result<EntryId> {
        if fields.is_empty() {
            return Err(LogStoreError::EmptyEntry {
                stream: stream.to_string(),
            });
        }

        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut conn = self.conn.clone();
        let id: String = match options.trim {
            Some(trim) => conn.xadd_maxlen(stream, maxlen(trim), "*", &items).await?,
            None => conn.xadd(stream, "*", &items).await?,
        };
        id.parse()
    }

    async fn trim(&self, stream: &str, trim: Trim) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.xtrim(stream, maxlen(trim)).await?)
    }

    async fn len(&self, stream: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        Ok(conn.xlen(stream).await?)
    }

    async fn range(&self, stream: &str, count: usize) -> Result<Vec<Entry>> {
        let mut conn = self.conn.clone();
        let reply: Value = conn.xrange_count(stream, "-", "+", count).await?;
        parse_entries(&reply)
    }

    async fn create_group(&self, stream: &str, group: &str, start: GroupStart) -> Result<()> {
        let start = match start {
            GroupStart::Beginning => "0",
            GroupStart::Tail => "$",
        };
        let mut conn = self.conn.clone();
        let created: redis::RedisResult<()> =
            conn.xgroup_create_mkstream(stream, group, start).await;
        match created {
            Ok(()) => Ok(()),
            Err(err) if err.code() == Some("BUSYGROUP") => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn read_group(&self, request: &ReadGroup<'_>, cursor: ReadCursor) -> Result<Vec<Entry>> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP")
            .arg(request.group)
            .arg(request.consumer)
            .arg("COUNT")
            .arg(request.count);

        let start = match cursor {
            ReadCursor::Pending { after } => after.to_string(),
            ReadCursor::New => {
                if let Some(block) = request.block {
                    // BLOCK 0 waits forever
                    cmd.arg("BLOCK").arg((block.as_millis() as u64).max(1));
                }
                ">".to_string()
            }
        };
        cmd.arg("STREAMS").arg(request.stream).arg(start);

        let mut conn = self.conn.clone();
        let reply: Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|err| Self::map_group_error(err, request.stream, request.group))?;
        parse_read_reply(&reply)
    }

    async fn pending_entry(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
    ) -> Result<Option<PendingEntry>> {
        let id = id.to_string();
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, &id, &id, 1)
            .await
            .map_err(|err| Self::map_group_error(err, stream, group))?;
        Ok(pending_reply(reply)?.into_iter().next())
    }

    async fn pending(&self, stream: &str, group: &str, count: usize) -> Result<Vec<PendingEntry>> {
        let mut conn = self.conn.clone();
        let reply: StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", count)
            .await
            .map_err(|err| Self::map_group_error(err, stream, group))?;
        pending_reply(reply)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let ids: Vec<String> = ids.iter().map(ToString::to_string).collect();
        let mut conn = self.conn.clone();
        Ok(conn.xack(stream, group, &ids).await?)
    }
}
