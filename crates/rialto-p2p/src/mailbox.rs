//! Mailbox seam — offline-message delivery plugs in here.
//!
//! The orchestrator calls [`MailboxHandler::on_bootstrapped`] strictly
//! after the storage engine has been told, and
//! [`MailboxHandler::init_after_bootstrapped`] strictly after the
//! lifecycle listeners have run. Nodes without a mailbox layer use
//! [`NoopMailbox`].

/// Hook points the bootstrap sequence calls in order.
pub trait MailboxHandler: Send + Sync {
    /// The node just became bootstrapped; storage has already been told.
    fn on_bootstrapped(&self) {}
    /// All lifecycle listeners have observed the bootstrap; begin
    /// processing queued mailbox messages.
    fn init_after_bootstrapped(&self) {}
}

/// Default handler for nodes without an offline-delivery layer.
#[derive(Default)]
pub struct NoopMailbox;

impl MailboxHandler for NoopMailbox {}
