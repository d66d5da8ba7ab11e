//! Chat broker interface and the redis implementation.
//!
//! Chat never touches the simulation: `C_Chat` packets are published to the
//! broker by the chat handler, and a single subscriber task (the bridge in
//! `handlers::chat`) fans inbound broker messages out to every registered
//! session. Running chat through an external pub/sub channel keeps it
//! working across multiple world server processes sharing one shard.

use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use redis::AsyncCommands;

use crate::prelude::*;

/// The single fixed chat channel. Payload format is `"{playerId}|{text}"`.
pub const CHAT_CHANNEL: &str = "chat_channel";

pub trait ChatBroker: Send + Sync {
    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, Result<()>>;
    fn subscribe(&self, channel: &str) -> BoxFuture<'static, Result<BoxStream<'static, String>>>;
}

/// Redis-backed broker. The client connects lazily; a publish with redis
/// down fails with a logged error and chat resumes once redis is back.
pub struct RedisChatBroker {
    client: redis::Client,
}

impl RedisChatBroker {
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).with_context(|| format!("invalid redis url {url}"))?;
        info!("chat broker configured for {url}");
        Ok(Self { client })
    }
}

impl ChatBroker for RedisChatBroker {
    fn publish(&self, channel: &str, payload: String) -> BoxFuture<'static, Result<()>> {
        let client = self.client.clone();
        let channel = channel.to_string();
        Box::pin(async move {
            let mut conn = client
                .get_multiplexed_async_std_connection()
                .await
                .context("connecting to redis for publish")?;
            let _: () = conn.publish(channel, payload).await.context("redis publish")?;
            Ok(())
        })
    }

    fn subscribe(&self, channel: &str) -> BoxFuture<'static, Result<BoxStream<'static, String>>> {
        let client = self.client.clone();
        let channel = channel.to_string();
        Box::pin(async move {
            let mut pubsub = client.get_async_pubsub().await.context("connecting to redis for subscribe")?;
            pubsub
                .subscribe(&channel)
                .await
                .with_context(|| format!("subscribing to {channel}"))?;
            let stream = pubsub
                .into_on_message()
                .filter_map(|message| async move {
                    match message.get_payload::<String>() {
                        Ok(payload) => Some(payload),
                        Err(e) => {
                            warn!("dropping non-utf8 chat payload: {e}");
                            None
                        }
                    }
                })
                .boxed();
            Ok(stream)
        })
    }
}
