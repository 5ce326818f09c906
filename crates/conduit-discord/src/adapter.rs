//! Discord channel adapter: implements [`conduit_channels::Channel`] over a
//! serenity gateway client.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, OnceLock};

use async_trait::async_trait;
use serenity::all::{ChannelId, CreateAttachment, CreateMessage, GatewayIntents, Http, MessageId as DiscordMessageId, Ready, ReactionType, UserId};
use serenity::client::{Client, Context, EventHandler};
use tokio::task::JoinHandle;
use tracing::{error, info};

use conduit_channels::{Channel, ChannelError, ChannelStatus, InboundQueue};
use conduit_core::types::{
    ChatId as CoreChatId, ContentBlock, Identity, Message as CoreMessage, MessageId as CoreMessageId, OrchestratorIntent, ReplyRef, TypingState,
};

use crate::attach;
use crate::mention::contains_mention;
use crate::send;

/// Configuration the adapter needs beyond the bot token: a cap on inbound
/// attachment size and the root directory persisted media is written under.
#[derive(Debug, Clone)]
pub struct DiscordSettings {
    pub bot_token: String,
    pub max_attachment_bytes: u64,
    pub media_root: PathBuf,
}

fn gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILDS | GatewayIntents::GUILD_MESSAGES | GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT | GatewayIntents::GUILD_MESSAGE_REACTIONS
}

/// Discord channel adapter. Owns no platform state itself beyond an `Arc<Http>`
/// REST client obtained once at connect time — the gateway loop runs on its
/// own task and publishes converted [`CoreMessage`]s onto the shared
/// [`InboundQueue`].
pub struct DiscordChannel {
    settings: DiscordSettings,
    queue: Arc<InboundQueue>,
    http: Mutex<Option<Arc<Http>>>,
    shard_manager: Mutex<Option<Arc<serenity::gateway::ShardManager>>>,
    gateway_task: Mutex<Option<JoinHandle<()>>>,
    status: Mutex<ChannelStatus>,
}

impl DiscordChannel {
    pub fn new(settings: DiscordSettings, queue: Arc<InboundQueue>) -> Self {
        Self {
            settings,
            queue,
            http: Mutex::new(None),
            shard_manager: Mutex::new(None),
            gateway_task: Mutex::new(None),
            status: Mutex::new(ChannelStatus::Disconnected),
        }
    }

    fn set_status(&self, status: ChannelStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn http(&self) -> Result<Arc<Http>, ChannelError> {
        self.http.lock().unwrap().clone().ok_or_else(|| ChannelError::SendFailed("discord channel not connected".to_string()))
    }
}

fn parse_channel_id(chat_id: &CoreChatId) -> Result<ChannelId, ChannelError> {
    chat_id.as_str().parse::<u64>().map(ChannelId::new).map_err(|_| ChannelError::SendFailed(format!("invalid discord channel id: {chat_id}")))
}

fn parse_message_id(message_id: &CoreMessageId) -> Result<DiscordMessageId, ChannelError> {
    message_id.as_str().parse::<u64>().map(DiscordMessageId::new).map_err(|_| ChannelError::SendFailed(format!("invalid discord message id: {message_id}")))
}

struct Handler {
    queue: Arc<InboundQueue>,
    media_root: PathBuf,
    max_attachment_bytes: u64,
    bot_id: OnceLock<UserId>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        let _ = self.bot_id.set(ready.user.id);
        info!(username = %ready.user.name, "discord: connected");
    }

    async fn message(&self, _ctx: Context, msg: serenity::model::channel::Message) {
        if msg.author.bot {
            return;
        }

        let Some(core_msg) = to_core_message(&msg, &self.media_root, self.max_attachment_bytes, self.bot_id.get().copied()).await else {
            return;
        };

        self.queue.publish(core_msg).await;
    }
}

/// Convert a serenity `Message` event into the canonical [`CoreMessage`].
/// Returns `None` when the message has neither text nor attachments.
async fn to_core_message(msg: &serenity::model::channel::Message, media_root: &std::path::Path, max_attachment_bytes: u64, bot_id: Option<UserId>) -> Option<CoreMessage> {
    let mut content = Vec::new();
    if !msg.content.is_empty() {
        content.push(ContentBlock::text(&msg.content));
    }
    for attachment in &msg.attachments {
        if let Some(block) = attach::to_content_block(attachment, media_root, max_attachment_bytes).await {
            content.push(block);
        }
    }
    if content.is_empty() {
        return None;
    }

    let is_group = msg.guild_id.is_some();
    let mentioned_bot = is_group && bot_id.map(|id| contains_mention(&msg.content, id)).unwrap_or(false);

    let reply_to = msg.referenced_message.as_ref().map(|r| ReplyRef {
        message_id: r.id.to_string().into(),
        text: if r.content.is_empty() { None } else { Some(r.content.clone()) },
        sender: Some(r.author.id.to_string().into()),
    });
    let reply_to_bot = msg.referenced_message.as_ref().map(|r| r.author.bot).unwrap_or(false);

    Some(CoreMessage {
        id: msg.id.to_string().into(),
        channel: "discord".into(),
        chat_id: msg.channel_id.to_string().into(),
        sender: Identity {
            id: msg.author.id.to_string().into(),
            display_name: Some(msg.author.global_name.clone().unwrap_or_else(|| msg.author.name.clone())),
            handle: Some(msg.author.name.clone()),
        },
        content,
        reply_to,
        timestamp: *msg.timestamp,
        is_group,
        mentioned_bot,
        reply_to_bot,
        participant: None,
        metadata: Default::default(),
    })
}

#[async_trait]
impl Channel for DiscordChannel {
    fn name(&self) -> &str {
        "discord"
    }

    async fn connect(&mut self) -> Result<(), ChannelError> {
        self.set_status(ChannelStatus::Connecting);

        let handler = Handler {
            queue: Arc::clone(&self.queue),
            media_root: self.settings.media_root.clone(),
            max_attachment_bytes: self.settings.max_attachment_bytes,
            bot_id: OnceLock::new(),
        };

        let mut client = Client::builder(&self.settings.bot_token, gateway_intents())
            .event_handler(handler)
            .await
            .map_err(|e| ChannelError::AuthFailed(e.to_string()))?;

        // `Arc<Http>` and the shard manager outlive `client.start()`, which
        // consumes `client` and only returns when the gateway loop ends.
        let http = Arc::clone(&client.http);
        let shard_manager = Arc::clone(&client.shard_manager);

        let handle = tokio::spawn(async move {
            if let Err(e) = client.start().await {
                error!(error = %e, "discord: gateway loop ended with error");
            }
        });

        *self.http.lock().unwrap() = Some(http);
        *self.shard_manager.lock().unwrap() = Some(shard_manager);
        *self.gateway_task.lock().unwrap() = Some(handle);
        self.set_status(ChannelStatus::Connected);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), ChannelError> {
        if let Some(shard_manager) = self.shard_manager.lock().unwrap().take() {
            shard_manager.shutdown_all().await;
        }
        if let Some(handle) = self.gateway_task.lock().unwrap().take() {
            let _ = handle.await;
        }
        *self.http.lock().unwrap() = None;
        self.set_status(ChannelStatus::Disconnected);
        Ok(())
    }

    async fn send(&self, intent: &OrchestratorIntent) -> Result<(), ChannelError> {
        let http = self.http()?;
        match intent {
            OrchestratorIntent::OutboundText { chat_id, text, reply_to, .. } => {
                let channel_id = parse_channel_id(chat_id)?;
                let reply = reply_to.as_ref().map(parse_message_id).transpose()?;
                send::send_response(&http, channel_id, text, reply).await.map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::OutboundMedia { chat_id, path, caption, .. } => {
                let channel_id = parse_channel_id(chat_id)?;
                let Some(path) = path else {
                    return Err(ChannelError::SendFailed("outbound media intent missing path".to_string()));
                };
                let attachment = CreateAttachment::path(path).await.map_err(|e| ChannelError::SendFailed(e.to_string()))?;
                let mut builder = CreateMessage::new().add_file(attachment);
                if let Some(cap) = caption {
                    builder = builder.content(cap.clone());
                }
                channel_id.send_message(&http, builder).await.map(|_| ()).map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::Reaction { chat_id, message_id, emoji, .. } => {
                let channel_id = parse_channel_id(chat_id)?;
                let msg_id = parse_message_id(message_id)?;
                http.create_reaction(channel_id, msg_id, &ReactionType::Unicode(emoji.clone()))
                    .await
                    .map_err(|e| ChannelError::SendFailed(e.to_string()))
            }
            OrchestratorIntent::Typing { chat_id, state, .. } => {
                if matches!(state, TypingState::On) {
                    let channel_id = parse_channel_id(chat_id)?;
                    channel_id.broadcast_typing(&http).await.map_err(|e| ChannelError::SendFailed(e.to_string()))?;
                }
                Ok(())
            }
            OrchestratorIntent::MemoryCapture { .. } | OrchestratorIntent::MetricEvent { .. } => {
                // Neither targets a channel send — handled upstream by the
                // memory manager / metrics sink.
                Ok(())
            }
        }
    }

    fn status(&self) -> ChannelStatus {
        self.status.lock().unwrap().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_channel_id_accepts_numeric_string() {
        let parsed = parse_channel_id(&CoreChatId::from("123456789")).unwrap();
        assert_eq!(parsed, ChannelId::new(123456789));
    }

    #[test]
    fn parse_channel_id_rejects_non_numeric() {
        assert!(parse_channel_id(&CoreChatId::from("not-a-number")).is_err());
    }

    #[test]
    fn parse_message_id_accepts_numeric_string() {
        let parsed = parse_message_id(&CoreMessageId::from("987654321")).unwrap();
        assert_eq!(parsed, DiscordMessageId::new(987654321));
    }
}
