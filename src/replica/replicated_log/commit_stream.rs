use crate::bridge::ApplyReply;
use crate::replica::LogEntry;
use tokio::sync::mpsc;

pub(crate) struct CommitStreamPublisher {
    sender: mpsc::UnboundedSender<CommittedEntry>,
}

/// CommitStream yields log entries in log order, once each, as they become ready to apply.
pub(crate) struct CommitStream {
    receiver: mpsc::UnboundedReceiver<CommittedEntry>,
}

#[derive(Debug)]
pub(crate) struct CommittedEntry {
    pub(crate) index: usize,
    pub(crate) entry: LogEntry,
    // Present when a client session on this replica is waiting for the outcome.
    pub(crate) apply_reply: Option<ApplyReply>,
}

pub(crate) fn new() -> (CommitStreamPublisher, CommitStream) {
    let (tx, rx) = mpsc::unbounded_channel();

    let applier_sender = CommitStreamPublisher { sender: tx };
    let applier_receiver = CommitStream { receiver: rx };

    (applier_sender, applier_receiver)
}

impl CommitStreamPublisher {
    pub(super) fn notify_commit(
        &self,
        logger: &slog::Logger,
        index: usize,
        entry: LogEntry,
        apply_reply: Option<ApplyReply>,
    ) {
        let committed_entry = CommittedEntry {
            index,
            entry,
            apply_reply,
        };

        if self.sender.send(committed_entry).is_err() {
            slog::warn!(logger, "CommitStream has disconnected.");
        }
    }
}

impl CommitStream {
    /// Returns None once the replica that publishes to this stream is gone.
    pub(crate) async fn recv(&mut self) -> Option<CommittedEntry> {
        self.receiver.recv().await
    }
}
