//! Outbox for notification mail.
//!
//! Callers only enqueue; a background task drains the queue into an `EmailSender` and
//! logs transport failures.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::email_sender::{EmailMessage, EmailSender};

#[derive(Clone)]
pub struct MailQueue {
    tx: mpsc::UnboundedSender<EmailMessage>,
}

impl MailQueue {
    /// Create the queue and spawn its delivery task
    pub fn start(sender: Arc<dyn EmailSender>) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<EmailMessage>();

        let worker = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let to = msg.to.clone();
                let subject = msg.subject.clone();
                if let Err(e) = sender.send(msg).await {
                    error!(to = %to, subject = %subject, "Failed to deliver mail: {}", e);
                }
            }
            info!("Mail queue closed");
        });

        (Self { tx }, worker)
    }

    /// Enqueue without waiting for delivery
    pub fn queue(&self, msg: EmailMessage) {
        if let Err(e) = self.tx.send(msg) {
            error!(to = %e.0.to, "Mail queue is closed, dropping message");
        }
    }
}
