use async_trait::async_trait;
use chrono::{ DateTime, Utc };
use lazy_static::lazy_static;
use log::error;
use redis::{ aio::MultiplexedConnection, AsyncCommands, Client, Script };
use std::collections::HashMap;
use tokio::sync::OnceCell;

use super::{ ConversationStore, StoreError, CONVERSATION_LIST_LIMIT };
use crate::models::chat::{ Conversation, Message };

/// Redis layout under `key_prefix`:
/// `conversation:{id}` hash, `owner:{user}` sorted set scored by updated-at
/// millis, `messages:{id}` list of JSON rows in insertion order.
pub struct RedisConversationStore {
    client: Client,
    key_prefix: String,
    connection: OnceCell<MultiplexedConnection>,
}

// Writes that depend on the conversation hash run as scripts so a concurrent
// cascade delete cannot slip between the check and the write.
lazy_static! {
    /// KEYS: conversation, messages. ARGV: message JSON. Returns 0 when the conversation is gone.
    static ref APPEND_MESSAGE: Script = Script::new(
        r"
        if redis.call('EXISTS', KEYS[1]) == 0 then return 0 end
        redis.call('RPUSH', KEYS[2], ARGV[1])
        return 1
        "
    );

    /// KEYS: conversation. ARGV: owner, title. Returns the updated hash, empty unless owned.
    static ref RENAME_OWNED: Script = Script::new(
        r"
        if redis.call('HGET', KEYS[1], 'user_id') ~= ARGV[1] then return {} end
        redis.call('HSET', KEYS[1], 'title', ARGV[2])
        return redis.call('HGETALL', KEYS[1])
        "
    );

    /// KEYS: conversation. ARGV: updated-at, score, owner key prefix, id.
    /// Returns 0 when the conversation is gone.
    static ref TOUCH: Script = Script::new(
        r"
        local owner = redis.call('HGET', KEYS[1], 'user_id')
        if not owner then return 0 end
        redis.call('HSET', KEYS[1], 'updated_at', ARGV[1])
        redis.call('ZADD', ARGV[3] .. owner, ARGV[2], ARGV[4])
        return 1
        "
    );
}

fn field<'a>(map: &'a HashMap<String, String>, name: &str) -> Result<&'a str, StoreError> {
    map.get(name)
        .map(|s| s.as_str())
        .ok_or_else(|| StoreError::Backend(format!("conversation hash missing field '{}'", name)))
}

fn parse_time(value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp '{}': {}", value, e)))
}

fn conversation_from_hash(map: &HashMap<String, String>) -> Result<Conversation, StoreError> {
    Ok(Conversation {
        id: field(map, "id")?.to_string(),
        user_id: field(map, "user_id")?.to_string(),
        title: field(map, "title")?.to_string(),
        created_at: parse_time(field(map, "created_at")?)?,
        updated_at: parse_time(field(map, "updated_at")?)?,
    })
}

fn conversation_to_hash(conversation: &Conversation) -> Vec<(&'static str, String)> {
    vec![
        ("id", conversation.id.clone()),
        ("user_id", conversation.user_id.clone()),
        ("title", conversation.title.clone()),
        ("created_at", conversation.created_at.to_rfc3339()),
        ("updated_at", conversation.updated_at.to_rfc3339())
    ]
}

fn parse_messages(entries: &[String]) -> Vec<Message> {
    let mut messages: Vec<Message> = entries
        .iter()
        .filter_map(|entry| {
            match serde_json::from_str::<Message>(entry) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    error!("Error parsing stored message: {}", e);
                    None
                }
            }
        })
        .collect();
    messages.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    messages
}

impl RedisConversationStore {
    pub fn new(host: &str, key_prefix: &str) -> Result<Self, StoreError> {
        Ok(Self {
            client: Client::open(host)?,
            key_prefix: key_prefix.to_string(),
            connection: OnceCell::new(),
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let conn = self.connection.get_or_try_init(|| async {
            self.client.get_multiplexed_async_connection().await
        }).await?;
        Ok(conn.clone())
    }

    fn conversation_key(&self, id: &str) -> String {
        format!("{}conversation:{}", self.key_prefix, id)
    }

    fn owner_key(&self, owner_id: &str) -> String {
        format!("{}owner:{}", self.key_prefix, owner_id)
    }

    fn messages_key(&self, conversation_id: &str) -> String {
        format!("{}messages:{}", self.key_prefix, conversation_id)
    }

    fn owner_key_prefix(&self) -> String {
        self.owner_key("")
    }

    async fn owner_of(
        &self,
        conn: &mut MultiplexedConnection,
        id: &str
    ) -> Result<Option<String>, StoreError> {
        let owner_id: Option<String> = conn.hget(self.conversation_key(id), "user_id").await?;
        Ok(owner_id)
    }
}

#[async_trait]
impl ConversationStore for RedisConversationStore {
    async fn find_conversation(
        &self,
        id: &str,
        owner_id: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        let map: HashMap<String, String> = conn.hgetall(self.conversation_key(id)).await?;
        if map.is_empty() || map.get("user_id").map(|s| s.as_str()) != Some(owner_id) {
            return Ok(None);
        }
        conversation_from_hash(&map).map(Some)
    }

    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        redis::pipe()
            .atomic()
            .hset_multiple(self.conversation_key(&conversation.id), &conversation_to_hash(conversation))
            .ignore()
            .zadd(
                self.owner_key(&conversation.user_id),
                &conversation.id,
                conversation.updated_at.timestamp_millis()
            )
            .ignore()
            .query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        let ids: Vec<String> = conn.zrevrange(
            self.owner_key(owner_id),
            0,
            (CONVERSATION_LIST_LIMIT as isize) - 1
        ).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for id in &ids {
            pipe.hgetall(self.conversation_key(id));
        }
        let maps: Vec<HashMap<String, String>> = pipe.query_async(&mut conn).await?;

        let mut conversations = Vec::with_capacity(maps.len());
        for map in maps.iter().filter(|m| !m.is_empty()) {
            match conversation_from_hash(map) {
                Ok(conversation) => conversations.push(conversation),
                Err(e) => error!("Skipping unreadable conversation for {}: {}", owner_id, e),
            }
        }
        Ok(conversations)
    }

    async fn rename_conversation(
        &self,
        id: &str,
        owner_id: &str,
        title: &str
    ) -> Result<Option<Conversation>, StoreError> {
        let mut conn = self.get_connection().await?;
        let map: HashMap<String, String> = RENAME_OWNED
            .key(self.conversation_key(id))
            .arg(owner_id)
            .arg(title)
            .invoke_async(&mut conn).await?;
        if map.is_empty() {
            return Ok(None);
        }
        conversation_from_hash(&map).map(Some)
    }

    async fn touch_conversation(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let touched: i64 = TOUCH
            .key(self.conversation_key(id))
            .arg(at.to_rfc3339())
            .arg(at.timestamp_millis())
            .arg(self.owner_key_prefix())
            .arg(id)
            .invoke_async(&mut conn).await?;
        if touched == 0 {
            return Err(StoreError::NotFound(format!("conversation {}", id)));
        }
        Ok(())
    }

    async fn delete_conversation_cascade(&self, id: &str) -> Result<(), StoreError> {
        let mut conn = self.get_connection().await?;
        let owner_id = self.owner_of(&mut conn, id).await?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .del(self.conversation_key(id))
            .ignore()
            .del(self.messages_key(id))
            .ignore();
        if let Some(owner_id) = owner_id {
            pipe.zrem(self.owner_key(&owner_id), id).ignore();
        }
        pipe.query_async::<_, ()>(&mut conn).await?;
        Ok(())
    }

    async fn insert_message(&self, message: &Message) -> Result<(), StoreError> {
        let json_msg = serde_json::to_string(message)?;
        let mut conn = self.get_connection().await?;
        let appended: i64 = APPEND_MESSAGE
            .key(self.conversation_key(&message.conversation_id))
            .key(self.messages_key(&message.conversation_id))
            .arg(&json_msg)
            .invoke_async(&mut conn).await?;
        if appended == 0 {
            return Err(StoreError::NotFound(format!("conversation {}", message.conversation_id)));
        }
        Ok(())
    }

    async fn list_messages(&self, conversation_id: &str) -> Result<Vec<Message>, StoreError> {
        let mut conn = self.get_connection().await?;
        let entries: Vec<String> = conn.lrange(self.messages_key(conversation_id), 0, -1).await?;
        Ok(parse_messages(&entries))
    }

    async fn recent_messages(
        &self,
        conversation_id: &str,
        limit: usize
    ) -> Result<Vec<Message>, StoreError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let mut conn = self.get_connection().await?;
        let start = -(limit as isize);
        let entries: Vec<String> = conn.lrange(self.messages_key(conversation_id), start, -1).await?;
        Ok(parse_messages(&entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn conversation_hash_round_trips() {
        let conversation = Conversation::new("alice", "Test");
        let map: HashMap<String, String> = conversation_to_hash(&conversation)
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(conversation_from_hash(&map).unwrap(), conversation);
    }

    #[test]
    fn incomplete_hash_is_a_backend_error() {
        let mut map = HashMap::new();
        map.insert("id".to_string(), "c1".to_string());
        assert!(matches!(conversation_from_hash(&map), Err(StoreError::Backend(_))));
    }

    #[test]
    fn stored_messages_sort_by_time_and_skip_garbage() {
        let mut first = Message::user("c", "first");
        let mut second = Message::user("c", "second");
        first.created_at = Utc::now();
        second.created_at = first.created_at + Duration::milliseconds(5);
        let entries = vec![
            serde_json::to_string(&second).unwrap(),
            "{broken".to_string(),
            serde_json::to_string(&first).unwrap()
        ];
        let parsed = parse_messages(&entries);
        assert_eq!(parsed, vec![first, second]);
    }

    #[test]
    fn keys_carry_prefix() {
        let store = RedisConversationStore::new("redis://127.0.0.1:6379", "relay:").unwrap();
        assert_eq!(store.conversation_key("c1"), "relay:conversation:c1");
        assert_eq!(store.owner_key("u1"), "relay:owner:u1");
        assert_eq!(store.messages_key("c1"), "relay:messages:c1");
        assert_eq!(store.owner_key_prefix(), "relay:owner:");
    }

    /// Store against a live server named by `RELAY_TEST_REDIS_URL`, under a fresh prefix.
    fn live_store() -> Option<RedisConversationStore> {
        let url = std::env::var("RELAY_TEST_REDIS_URL").ok()?;
        let prefix = format!("relay-test:{}:", uuid::Uuid::new_v4());
        Some(RedisConversationStore::new(&url, &prefix).unwrap())
    }

    #[tokio::test]
    async fn writes_after_cascade_delete_leave_no_orphans() {
        let Some(store) = live_store() else {
            return;
        };
        let conversation = Conversation::new("alice", "Test");
        store.insert_conversation(&conversation).await.unwrap();
        store.insert_message(&Message::user(&conversation.id, "hi")).await.unwrap();
        store.delete_conversation_cascade(&conversation.id).await.unwrap();

        let late = Message::assistant(&conversation.id, "late", "gpt-4o", Utc::now());
        assert!(matches!(store.insert_message(&late).await, Err(StoreError::NotFound(_))));
        assert!(store.rename_conversation(&conversation.id, "alice", "New").await.unwrap().is_none());
        assert!(matches!(
            store.touch_conversation(&conversation.id, Utc::now()).await,
            Err(StoreError::NotFound(_))
        ));

        let mut conn = store.get_connection().await.unwrap();
        let leftovers: i64 = conn
            .exists(vec![store.conversation_key(&conversation.id), store.messages_key(&conversation.id)]).await
            .unwrap();
        assert_eq!(leftovers, 0);
        assert!(store.list_conversations("alice").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scripted_writes_respect_ownership() {
        let Some(store) = live_store() else {
            return;
        };
        let conversation = Conversation::new("alice", "Test");
        store.insert_conversation(&conversation).await.unwrap();

        assert!(store.rename_conversation(&conversation.id, "mallory", "Mine").await.unwrap().is_none());
        let renamed = store.rename_conversation(&conversation.id, "alice", "Arithmetic").await.unwrap().unwrap();
        assert_eq!(renamed.title, "Arithmetic");
        assert_eq!(renamed.created_at, conversation.created_at);

        let later = conversation.updated_at + Duration::seconds(5);
        store.touch_conversation(&conversation.id, later).await.unwrap();
        store.insert_message(&Message::user(&conversation.id, "hi")).await.unwrap();

        let listed = store.list_conversations("alice").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].updated_at.timestamp_millis(), later.timestamp_millis());
        assert_eq!(store.list_messages(&conversation.id).await.unwrap().len(), 1);
        store.delete_conversation_cascade(&conversation.id).await.unwrap();
    }
}
