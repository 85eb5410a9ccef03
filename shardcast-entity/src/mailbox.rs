//! Entity mailboxes
//!
//! Every live entity owns one mailbox. The manager enqueues requests and,
//! when it decides to stop the entity, a final `PoisonPill`; the behavior
//! drains the mailbox in order and exits when it sees the pill (or the
//! sender side is gone).

use shardcast_core::{ReplyId, Result, ShardingError};
use tokio::sync::mpsc;

/// One unit of work for an entity behavior. A request carrying a reply id
/// is answered through the sharding facade's reply registry.
pub enum EntityMessage<Req> {
    Request {
        request: Req,
        reply_id: Option<ReplyId>,
    },
    /// Graceful-stop sentinel, always the last message an entity sees.
    PoisonPill,
}

pub(crate) struct MailboxSender<Req> {
    sender: mpsc::UnboundedSender<EntityMessage<Req>>,
}

pub struct MailboxReceiver<Req> {
    receiver: mpsc::UnboundedReceiver<EntityMessage<Req>>,
}

pub(crate) fn mailbox<Req>() -> (MailboxSender<Req>, MailboxReceiver<Req>) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (MailboxSender { sender }, MailboxReceiver { receiver })
}

impl<Req> Clone for MailboxSender<Req> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<Req> MailboxSender<Req> {
    /// Enqueue into the mailbox. Fails only when the behavior tore the
    /// mailbox down ahead of the directory protocol, a rare race surfaced
    /// to the caller.
    pub(crate) fn enqueue(&self, message: EntityMessage<Req>) -> Result<()> {
        self.sender
            .send(message)
            .map_err(|_| ShardingError::MessageQueue("mailbox closed".to_string()))
    }
}

impl<Req> MailboxReceiver<Req> {
    /// Next message, or `None` once the entity is being torn down and the
    /// mailbox is drained.
    pub async fn recv(&mut self) -> Option<EntityMessage<Req>> {
        self.receiver.recv().await
    }
}
