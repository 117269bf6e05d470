mod commit_stream;
mod log;
mod log_entry;

pub(crate) use commit_stream::new as new_commit_stream;
pub(crate) use commit_stream::CommitStream;
pub(crate) use commit_stream::CommitStreamPublisher;
pub(crate) use log::ReplicatedLog;
pub(crate) use log_entry::Action;
pub(crate) use log_entry::LogEntry;
