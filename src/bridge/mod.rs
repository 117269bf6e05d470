//! Turns log entries into account store mutations, on every replica, in log order.
mod applier;
mod apply;

pub(crate) use applier::Applier;
pub(crate) use apply::apply;
pub(crate) use apply::ApplyOutcome;
pub(crate) use apply::ApplyReply;
