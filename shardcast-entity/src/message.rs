//! Reply channels
//!
//! Write-once response channel handed to entity behaviors alongside a
//! request. An entity may answer at most once; terminating without
//! answering resolves the asking side with `None` instead of hanging it.

use std::sync::Mutex;
use tokio::sync::oneshot;

/// Sending half, owned by the entity behavior.
pub struct ReplyChannel<Res> {
    sender: Mutex<Option<oneshot::Sender<Option<Res>>>>,
}

/// Receiving half, owned by the asker.
pub struct ReplyReceiver<Res> {
    receiver: oneshot::Receiver<Option<Res>>,
}

pub fn reply_channel<Res>() -> (ReplyChannel<Res>, ReplyReceiver<Res>) {
    let (sender, receiver) = oneshot::channel();
    (
        ReplyChannel {
            sender: Mutex::new(Some(sender)),
        },
        ReplyReceiver { receiver },
    )
}

impl<Res> ReplyChannel<Res> {
    /// Answer the request. Later calls are ignored.
    pub fn reply(&self, value: Res) {
        self.dispatch(Some(value));
    }

    /// Explicitly finish without an answer.
    pub fn end(&self) {
        self.dispatch(None);
    }

    fn dispatch(&self, value: Option<Res>) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        if let Some(sender) = sender {
            // The asker may have given up waiting
            let _ = sender.send(value);
        }
    }
}

impl<Res> ReplyReceiver<Res> {
    /// Wait for the answer. Resolves `None` when the entity finished (or
    /// was terminated) without replying.
    pub async fn recv(self) -> Option<Res> {
        self.receiver.await.ok().flatten()
    }
}
