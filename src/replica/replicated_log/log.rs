use crate::bridge::ApplyReply;
use crate::replica::replicated_log::commit_stream::CommitStreamPublisher;
use crate::replica::{LogEntry, Term};
use std::collections::HashMap;

/// ReplicatedLog is the in-memory, positional log of a single replica.
///
/// A log entry goes through 3 states (not modeled directly in code):
/// 1. Appended - present in this replica's log
/// 2. Published - handed to the commit stream, to be applied to the account store
/// 3. Committed - known by the leader to be replicated to a majority
///
/// Leaders publish entries when they commit them. Followers publish entries as soon as the leader
/// sends them, so publishing and committing are tracked separately.
pub(crate) struct ReplicatedLog {
    logger: slog::Logger,
    entries: Vec<LogEntry>,

    // Reply channels of local client sessions waiting on an entry, keyed by log index.
    apply_replies: HashMap<usize, ApplyReply>,
    commit_stream: CommitStreamPublisher,

    // Index of highest log entry known to be committed. None if nothing is committed.
    commit_index: Option<usize>,
    // Entries at indexes below this have been published to the commit stream.
    published_len: usize,
}

impl ReplicatedLog {
    pub(crate) fn new(logger: slog::Logger, commit_stream: CommitStreamPublisher) -> Self {
        ReplicatedLog {
            logger,
            entries: Vec::new(),
            apply_replies: HashMap::new(),
            commit_stream,
            commit_index: None,
            published_len: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub(crate) fn latest_entry(&self) -> Option<(Term, usize)> {
        self.entries
            .last()
            .map(|entry| (entry.term, self.entries.len() - 1))
    }

    pub(crate) fn read(&self, index: usize) -> Option<&LogEntry> {
        self.entries.get(index)
    }

    pub(crate) fn append(&mut self, entry: LogEntry, apply_reply: Option<ApplyReply>) -> usize {
        let index = self.entries.len();
        self.entries.push(entry);
        if let Some(reply) = apply_reply {
            self.apply_replies.insert(index, reply);
        }

        index
    }

    /// Remove anything starting at `index` and later. Sessions waiting on removed entries see
    /// their reply channel close.
    pub(crate) fn truncate(&mut self, index: usize) {
        if index >= self.entries.len() {
            return;
        }

        slog::info!(
            self.logger,
            "Truncating log from index {} (length {})",
            index,
            self.entries.len()
        );
        self.entries.truncate(index);
        self.apply_replies.retain(|&reply_index, _| reply_index < index);
        self.published_len = self.published_len.min(index);

        if matches!(self.commit_index, Some(ci) if ci >= index) {
            slog::warn!(
                self.logger,
                "Truncated committed entries. Commit index {:?} is now {:?}.",
                self.commit_index,
                index.checked_sub(1)
            );
            self.commit_index = index.checked_sub(1);
        }
    }

    pub(crate) fn commit_index(&self) -> Option<usize> {
        self.commit_index
    }

    /// Leader path. Commit through `tentative_new_commit_index` iff that entry was created in the
    /// current term. Returns true if the commit index moved.
    pub(crate) fn ratchet_fwd_commit_index_if_valid(
        &mut self,
        tentative_new_commit_index: usize,
        current_term: Term,
    ) -> bool {
        // > If there exists an N such that N > commitIndex, a majority
        // > of matchIndex[i] ≥ N, and log[N].term == currentTerm:
        // > set commitIndex = N (§5.3, §5.4).
        match self.read(tentative_new_commit_index) {
            Some(entry) if entry.term == current_term => {
                self.ratchet_fwd_commit_index(tentative_new_commit_index)
            }
            _ => false,
        }
    }

    /// Follower path. Moves the commit index forward, never backward and never past the log.
    pub(crate) fn ratchet_fwd_commit_index(&mut self, new_commit_index: usize) -> bool {
        if new_commit_index >= self.entries.len() {
            return false;
        }
        if matches!(self.commit_index, Some(ci) if ci >= new_commit_index) {
            return false;
        }

        self.commit_index.replace(new_commit_index);
        true
    }

    /// Hand every not yet published entry below `len` to the commit stream, in order.
    pub(crate) fn publish_up_to(&mut self, len: usize) {
        let len = len.min(self.entries.len());
        while self.published_len < len {
            let index = self.published_len;
            let apply_reply = self.apply_replies.remove(&index);
            self.commit_stream
                .notify_commit(&self.logger, index, self.entries[index].clone(), apply_reply);
            self.published_len += 1;
        }
    }
}
