//! Redis Streams event bus.
//!
//! Persistent fan-out for deployments where projections run in other
//! processes. Envelopes are appended with `XADD` as a single JSON field;
//! subscribers either tail the stream (`XREAD` from `$`, broadcast
//! semantics) or consume through a consumer group (`XREADGROUP` + `XACK`,
//! work-sharing semantics).
//!
//! Delivery remains at-least-once: a consumer that dies between read and ack
//! leaves the entry pending for redelivery. Subscribers must stay idempotent,
//! which the projections already guarantee via their sequence cursors.

use std::sync::mpsc;
use std::time::Duration;

use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{Client, Commands};
use serde_json::Value as JsonValue;

use rateforge_events::{EventBus, EventEnvelope, Subscription};

const DEFAULT_STREAM: &str = "rateforge:events";
const PAYLOAD_FIELD: &str = "payload";
const BLOCK_MS: usize = 1_000;

#[derive(Debug)]
pub struct RedisStreamsEventBus {
    client: Client,
    stream: String,
}

impl RedisStreamsEventBus {
    pub fn new(url: &str, stream: Option<String>) -> Result<Self, redis::RedisError> {
        let client = Client::open(url)?;
        Ok(Self {
            client,
            stream: stream.unwrap_or_else(|| DEFAULT_STREAM.to_string()),
        })
    }

    /// Create the consumer group if it does not exist yet.
    pub fn ensure_consumer_group(&self, group: &str) -> Result<(), redis::RedisError> {
        let mut conn = self.client.get_connection()?;
        let created: Result<(), redis::RedisError> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(&self.stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query(&mut conn);

        match created {
            Ok(()) => Ok(()),
            // Group already exists: fine, another process won the race.
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Consume through a consumer group (work-sharing; entries are acked).
    ///
    /// The reader thread lives until the bus connection drops or the
    /// subscription receiver is dropped.
    pub fn subscribe_with_group(
        &self,
        group: &str,
        consumer: &str,
    ) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let stream = self.stream.clone();
        let group = group.to_string();
        let consumer = consumer.to_string();

        std::thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("redis subscribe connection failed: {e}");
                    return;
                }
            };

            loop {
                let options = StreamReadOptions::default()
                    .group(&group, &consumer)
                    .count(64)
                    .block(BLOCK_MS);
                let reply: Result<StreamReadReply, redis::RedisError> =
                    conn.xread_options(&[&stream], &[">"], &options);

                match reply {
                    Ok(reply) => {
                        for key in reply.keys {
                            for entry in key.ids {
                                if let Some(envelope) = decode_entry(&entry) {
                                    if tx.send(envelope).is_err() {
                                        return;
                                    }
                                }
                                let _: Result<i64, redis::RedisError> =
                                    conn.xack(&stream, &group, &[&entry.id]);
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("redis group read failed: {e}");
                        std::thread::sleep(Duration::from_millis(500));
                    }
                }
            }
        });

        Subscription::new(rx)
    }
}

fn decode_entry(entry: &redis::streams::StreamId) -> Option<EventEnvelope<JsonValue>> {
    let raw: String = entry.get(PAYLOAD_FIELD)?;
    match serde_json::from_str(&raw) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::warn!(entry_id = %entry.id, "dropping undecodable stream entry: {e}");
            None
        }
    }
}

#[derive(Debug)]
pub enum RedisBusError {
    Connection(String),
    Serialize(String),
    Publish(String),
}

impl EventBus<EventEnvelope<JsonValue>> for RedisStreamsEventBus {
    type Error = RedisBusError;

    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        let mut conn = self
            .client
            .get_connection()
            .map_err(|e| RedisBusError::Connection(e.to_string()))?;

        let payload =
            serde_json::to_string(&message).map_err(|e| RedisBusError::Serialize(e.to_string()))?;

        let _: String = conn
            .xadd(&self.stream, "*", &[(PAYLOAD_FIELD, payload.as_str())])
            .map_err(|e| RedisBusError::Publish(e.to_string()))?;

        Ok(())
    }

    /// Tail the stream from "now" (broadcast semantics, no group, no acks).
    fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let stream = self.stream.clone();

        std::thread::spawn(move || {
            let mut conn = match client.get_connection() {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!("redis subscribe connection failed: {e}");
                    return;
                }
            };

            let mut last_id = "$".to_string();
            loop {
                let options = StreamReadOptions::default().count(64).block(BLOCK_MS);
                let reply: Result<StreamReadReply, redis::RedisError> =
                    conn.xread_options(&[&stream], &[last_id.as_str()], &options);

                match reply {
                    Ok(reply) => {
                        for key in reply.keys {
                            for entry in key.ids {
                                last_id = entry.id.clone();
                                if let Some(envelope) = decode_entry(&entry) {
                                    if tx.send(envelope).is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!("redis stream read failed: {e}");
                        std::thread::sleep(Duration::from_millis(500));
                    }
                }
            }
        });

        Subscription::new(rx)
    }
}
