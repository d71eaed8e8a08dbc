//! Route handler: the registry of live conversations and outbound delivery.
//!
//! One `tokio::sync::Mutex` guards the whole map and every mutable field of
//! every conversation in it. Inbound handlers hold it for their entire
//! registry-visible work, so all state transitions in the process are
//! serialized. Outbound HTTP never happens under the lock: operations pack
//! under the lock, release it, send, then re-lock to record the result.
//!
//! Delivery is at-most-once. A failed send surfaces to the caller and is
//! never retried here.

use crate::conversation::{Conversation, ConversationEvent, ConversationSummary, Message};
use crate::crypto::{KeyPair, KeyType, PublicKey};
use crate::envelope::{MessageWrapper, StartConversationWrapper};
use crate::error::{Error, Result};
use crate::handshake;
use crate::logging::{RedactedAddress, RedactedBytes};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Path of the chat message route.
pub const MESSAGE_PATH: &str = "message";

/// Path of the handshake acknowledgement route.
pub const BOOTSTRAP_PATH: &str = "bootstrap";

/// Text of the final message sent when a conversation is closed for us.
pub const END_OF_CONVERSATION: &str = "Ended Conversation";

/// Capacity of the event channel.
const EVENT_CAPACITY: usize = 100;

/// A freshly generated handshake offer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invitation {
    /// Conversation ID, shared by both sides.
    pub id: String,
    /// Out-of-band token for the responder.
    pub token: String,
}

/// Registry of live conversations plus the outbound client.
pub struct RouteHandler {
    address: String,
    conversations: Mutex<HashMap<String, Conversation>>,
    client: reqwest::Client,
    event_tx: broadcast::Sender<ConversationEvent>,
}

impl RouteHandler {
    /// Create a handler reachable at `address`, sending through `client`.
    pub fn new(address: impl Into<String>, client: reqwest::Client) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            address: address.into(),
            conversations: Mutex::new(HashMap::new()),
            client,
            event_tx,
        }
    }

    /// The address peers reach this handler on.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Subscribe to conversation events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: ConversationEvent) {
        // No subscribers is fine.
        let _ = self.event_tx.send(event);
    }

    /// POST `body` to `http://<peer>/<path>`. Anything but 200 is a failure.
    pub async fn send_message(&self, body: &[u8], peer: &str, path: &str) -> Result<()> {
        post(&self.client, body.to_vec(), peer, path).await
    }

    /// Start a conversation as the initiator.
    ///
    /// Registers it in `Pending` and returns the token to hand to the peer.
    pub async fn generate_conversation(
        &self,
        self_keys: Arc<KeyPair>,
        remote_public: Arc<PublicKey>,
        key_type: KeyType,
        alias: &str,
    ) -> Result<Invitation> {
        let (token, conversation) = handshake::generate_conversation(
            &self.address,
            self_keys,
            remote_public,
            key_type,
            alias,
        )?;
        let id = conversation.id().to_string();

        self.register(conversation).await?;
        info!(id = %id, "Generated conversation");

        Ok(Invitation { id, token })
    }

    /// Join a conversation as the responder.
    ///
    /// Delivers the acknowledgement to the initiator's `/bootstrap` and only
    /// registers the conversation once that succeeded.
    pub async fn bootstrap_conversation(
        &self,
        token: &str,
        self_keys: Arc<KeyPair>,
        remote_public: Arc<PublicKey>,
        alias: &str,
    ) -> Result<String> {
        let (conversation, ack) = handshake::bootstrap_conversation(
            token,
            &self.address,
            self_keys,
            remote_public,
            alias,
        )?;
        let id = conversation.id().to_string();

        if self.conversations.lock().await.contains_key(&id) {
            return Err(Error::DuplicateConversation);
        }

        self.send_message(&ack.to_json()?, conversation.remote_address(), BOOTSTRAP_PATH)
            .await?;

        self.register(conversation).await?;
        self.emit(ConversationEvent::Established { id: id.clone() });
        info!(id = %id, "Bootstrapped conversation");

        Ok(id)
    }

    async fn register(&self, conversation: Conversation) -> Result<()> {
        let id = conversation.id().to_string();
        let alias = conversation.alias().to_string();

        match self.conversations.lock().await.entry(id.clone()) {
            Entry::Occupied(_) => return Err(Error::DuplicateConversation),
            Entry::Vacant(slot) => {
                slot.insert(conversation);
            }
        }

        self.emit(ConversationEvent::Created { id, alias });
        Ok(())
    }

    /// Process a `/message` body.
    pub async fn handle_message(&self, body: &[u8]) -> Result<()> {
        let wrapper = MessageWrapper::from_json(body)?;

        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get_mut(&wrapper.id)
            .ok_or(Error::UnknownConversation)?;
        if conversation.is_ended() {
            return Err(Error::ConversationEnded);
        }

        let message = conversation.unpack_message(&wrapper.message, &wrapper.signature)?;
        let ended = message.final_message && conversation.end();
        conversation.push_message(message.clone());
        drop(conversations);

        debug!(id = %wrapper.id, size = %RedactedBytes(&wrapper.message), "Accepted message");

        self.emit(ConversationEvent::MessageReceived {
            id: wrapper.id.clone(),
            message,
        });
        if ended {
            info!(id = %wrapper.id, "Peer ended conversation");
            self.emit(ConversationEvent::Ended { id: wrapper.id });
        }
        Ok(())
    }

    /// Process a `/bootstrap` body: the responder's acknowledgement.
    pub async fn handle_bootstrap(&self, body: &[u8]) -> Result<()> {
        let wrapper = StartConversationWrapper::from_json(body)?;

        let mut conversations = self.conversations.lock().await;
        let conversation = conversations
            .get_mut(&wrapper.id)
            .ok_or(Error::UnknownConversation)?;

        handshake::accept_acknowledgement(conversation, &wrapper)?;
        let peer = conversation.remote_address().to_string();
        drop(conversations);

        info!(id = %wrapper.id, peer = %RedactedAddress(&peer), "Conversation established");
        self.emit(ConversationEvent::Established { id: wrapper.id });
        Ok(())
    }

    /// Pack a message for an established, live conversation.
    async fn pack_for_send(
        &self,
        id: &str,
        text: &str,
        final_message: bool,
    ) -> Result<(Vec<u8>, Message, String)> {
        let conversations = self.conversations.lock().await;
        let conversation = conversations.get(id).ok_or(Error::UnknownConversation)?;
        if conversation.is_ended() {
            return Err(Error::ConversationEnded);
        }
        if !conversation.is_established() {
            return Err(Error::NotEstablished);
        }

        let (body, message) = conversation.pack_message(text, final_message)?;
        Ok((body, message, conversation.remote_address().to_string()))
    }

    /// Send a chat message; it is added to local history once delivered.
    pub async fn send_text(&self, id: &str, text: &str) -> Result<Message> {
        let (body, message, peer) = self.pack_for_send(id, text, false).await?;
        self.send_message(&body, &peer, MESSAGE_PATH).await?;

        if let Some(conversation) = self.conversations.lock().await.get_mut(id) {
            conversation.push_message(message.clone());
        }

        self.emit(ConversationEvent::MessageSent {
            id: id.to_string(),
            message: message.clone(),
        });
        Ok(message)
    }

    /// Send a final message and end the conversation locally.
    ///
    /// `text` defaults to [`END_OF_CONVERSATION`].
    pub async fn end_conversation(&self, id: &str, text: Option<&str>) -> Result<()> {
        let text = text.filter(|t| !t.is_empty()).unwrap_or(END_OF_CONVERSATION);
        let (body, message, peer) = self.pack_for_send(id, text, true).await?;
        self.send_message(&body, &peer, MESSAGE_PATH).await?;

        let ended = match self.conversations.lock().await.get_mut(id) {
            Some(conversation) => {
                conversation.push_message(message.clone());
                conversation.end()
            }
            None => false,
        };

        self.emit(ConversationEvent::MessageSent {
            id: id.to_string(),
            message,
        });
        if ended {
            info!(id = %id, "Ended conversation");
            self.emit(ConversationEvent::Ended { id: id.to_string() });
        }
        Ok(())
    }

    /// End the conversation if still live (best effort), then delete it.
    pub async fn destroy_conversation(&self, id: &str) -> Result<()> {
        match self.end_conversation(id, None).await {
            Ok(()) | Err(Error::ConversationEnded) | Err(Error::NotEstablished) => {}
            Err(Error::UnknownConversation) => return Err(Error::UnknownConversation),
            Err(e) => warn!(id = %id, error = %e, "Could not notify peer before delete"),
        }
        self.delete_conversation(id).await
    }

    /// Remove a conversation from the registry. Irreversible.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.conversations
            .lock()
            .await
            .remove(id)
            .ok_or(Error::UnknownConversation)?;

        debug!(id = %id, "Deleted conversation");
        self.emit(ConversationEvent::Deleted { id: id.to_string() });
        Ok(())
    }

    /// Snapshot of one conversation.
    pub async fn conversation(&self, id: &str) -> Option<Conversation> {
        self.conversations.lock().await.get(id).cloned()
    }

    /// Summaries of all conversations, ordered by ID.
    pub async fn conversations(&self) -> Vec<ConversationSummary> {
        let mut summaries: Vec<_> = self
            .conversations
            .lock()
            .await
            .values()
            .map(Conversation::summary)
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Say goodbye on every live conversation, then clear the registry.
    ///
    /// Final messages are best effort: failures are logged, not returned.
    pub async fn close(&self) {
        let mut finals = Vec::new();
        {
            let conversations = self.conversations.lock().await;
            for conversation in conversations.values() {
                if !conversation.is_established() || conversation.is_ended() {
                    continue;
                }
                match conversation.pack_message(END_OF_CONVERSATION, true) {
                    Ok((body, _)) => finals.push((
                        conversation.id().to_string(),
                        body,
                        conversation.remote_address().to_string(),
                    )),
                    Err(e) => warn!(id = %conversation.id(), error = %e, "Could not pack final message"),
                }
            }
        }

        let mut sends = JoinSet::new();
        for (id, body, peer) in finals {
            let client = self.client.clone();
            sends.spawn(async move { (id, post(&client, body, &peer, MESSAGE_PATH).await) });
        }
        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((id, Ok(()))) => debug!(id = %id, "Sent final message"),
                Ok((id, Err(e))) => warn!(id = %id, error = %e, "Final message not delivered"),
                Err(e) => warn!(error = %e, "Final message task failed"),
            }
        }

        let removed: Vec<(String, bool)> = self
            .conversations
            .lock()
            .await
            .drain()
            .map(|(id, mut conversation)| {
                let newly_ended = conversation.end();
                (id, newly_ended)
            })
            .collect();

        for (id, newly_ended) in removed {
            if newly_ended {
                self.emit(ConversationEvent::Ended { id: id.clone() });
            }
            self.emit(ConversationEvent::Deleted { id });
        }
        info!("Route handler closed");
    }
}

async fn post(client: &reqwest::Client, body: Vec<u8>, peer: &str, path: &str) -> Result<()> {
    let url = format!("http://{}/{}", peer, path);
    let response = client
        .post(&url)
        .header(reqwest::header::CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| {
            debug!(peer = %RedactedAddress(peer), path, "Delivery failed: {}", e);
            Error::DeliveryFailed("peer unreachable".into())
        })?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(Error::DeliveryFailed(format!("status code {}", status.as_u16())));
    }
    Ok(())
}
