// Direct messages in both directions
// Outgoing payloads go through the batcher; incoming frames are unpacked back into payloads

use chrono::Utc;
use log::{debug, error, warn};
use std::sync::Arc;
use tokio::time::Instant;

use super::SessionActor;
use crate::batcher::ReadyBatch;
use crate::config::is_valid_nick;
use crate::directory::ContactPatch;
use crate::error::{SocialError, SocialResult};
use crate::irc::classify::decode_batch;
use crate::irc::{Line, TransportHandle};
use crate::models::{ContactRecord, IncomingMessage, SocialEvent};

impl SessionActor {
    /// Buffer a payload for `to`. Nothing reaches the batcher unless the session is online.
    pub(super) fn send_message(&mut self, to: &str, payload: String) -> SocialResult<()> {
        if self.online().is_none() {
            warn!("No connection available to send message to {}", to);
            return Err(SocialError::offline());
        }
        if !is_valid_nick(to) {
            warn!("Refusing to send to invalid destination '{}'", to);
            return Err(SocialError::unknown(format!("Invalid destination '{}'", to)));
        }

        let scheduled = self.batcher.push(to, payload, Instant::now());
        debug!(
            "Queued message for {} ({} pending, {:?})",
            to,
            self.batcher.pending(to),
            scheduled
        );
        Ok(())
    }

    pub(super) async fn flush_due(&mut self) {
        let batches = self.batcher.take_due(Instant::now());
        match self.online().map(|link| link.handle.clone()) {
            Some(handle) => flush_batches(&handle, batches).await,
            None => warn!("Dropping {} batches: not online", batches.len()),
        }
    }

    pub(super) fn on_direct_message(&mut self, from: &str, to: &str, body: &str) {
        let self_id = match self.online() {
            Some(link) => link.self_id.clone(),
            None => {
                debug!("Ignoring message from {} while not online", from);
                return;
            }
        };

        if !to.eq_ignore_ascii_case(&self_id) {
            warn!("Ignoring message from {} addressed to {}", from, to);
            return;
        }
        // A message racing ahead of the NAMES reply is lost here
        if !self.directory.contains(from) {
            warn!("Dropping message from unknown sender {}", from);
            return;
        }
        let messages = match decode_batch(body) {
            Ok(messages) => messages,
            Err(e) => {
                warn!("Dropping malformed message from {}: {:#}", from, e);
                return;
            }
        };

        let sender = self
            .directory
            .upsert(from, ContactPatch::seen_now())
            .into_record();
        let recipient = self
            .directory
            .get(&self_id)
            .cloned()
            .unwrap_or_else(|| ContactRecord::new(&self_id));
        let received_at = Utc::now();

        debug!("Received {} messages from {}", messages.len(), from);
        for message in messages {
            self.emit(SocialEvent::Message(IncomingMessage {
                from: sender.clone(),
                to: recipient.clone(),
                message,
                received_at,
            }));
        }
    }
}

/// Write each batch as PRIVMSGs that fit the line limit. Failures are logged, never retried.
pub(super) async fn flush_batches(handle: &Arc<dyn TransportHandle>, batches: Vec<ReadyBatch>) {
    for batch in batches {
        let bodies = match batch.bodies(Line::privmsg_text_budget(&batch.to)) {
            Ok(bodies) => bodies,
            Err(e) => {
                error!("Failed to encode batch for {}: {:#}", batch.to, e);
                continue;
            }
        };
        let frames = bodies.len();
        for body in bodies {
            if let Err(e) = handle.send(Line::privmsg(&batch.to, &body)).await {
                error!("Failed to send messages to {}: {:#}", batch.to, e);
            }
        }
        debug!(
            "Flushed {} messages to {} in {} frames",
            batch.payloads.len(),
            batch.to,
            frames
        );
    }
}
