use crate::replica;
use std::error::Error;
use std::fmt::Debug;
use tokio::sync::{mpsc, oneshot};

/// The only way to reach a replica. Dropping every strong client stops the replica's event loop.
#[derive(Clone)]
pub(crate) struct ActorClient {
    sender: mpsc::Sender<Event>,
}

/// Held by everything that should not keep the replica alive: the ticker, RPC servers, client
/// sessions and in-flight peer calls.
#[derive(Clone)]
pub(crate) struct WeakActorClient {
    sender: mpsc::WeakSender<Event>,
}

#[derive(Debug, thiserror::Error)]
#[error("Replica actor has exited")]
pub struct ActorExited;

// Each event is handled to completion by the replica before the next one is dequeued.
#[derive(Debug)]
pub(crate) enum Event {
    // All: Run whatever the role's clock demands. Follower/Candidate: start an election once
    // the deadline passed. Leader: start a heartbeat round unless one is in flight.
    Tick,

    // All: Grant vote if applicable. Adopt higher term.
    RequestVote(
        replica::RequestVoteInput,
        Callback<replica::RequestVoteOutput, replica::RequestVoteError>,
    ),

    // Candidate: Tally vote. Transition to leader if majority.
    // Leader/Follower: discard, unless it carries a higher term.
    RequestVoteReplyFromPeer(replica::RequestVoteReplyFromPeer),

    // All: Reject stale term. Otherwise become follower of the caller and reconcile the log.
    AppendEntries(
        replica::AppendEntriesInput,
        Callback<replica::AppendEntriesOutput, replica::AppendEntriesError>,
    ),

    // Leader: Commit what the round replicated, or step down.
    // Candidate/Follower: discard, unless it carries a higher term.
    HeartbeatRoundFinished(replica::HeartbeatRoundResult),

    // All: Read-only.
    GetLeader(oneshot::Sender<Option<String>>),

    // Leader: Append to local log. Followers learn of it on the next heartbeat round.
    // Candidate/Follower: Reject.
    WriteToLog(
        replica::WriteToLogInput,
        Callback<replica::WriteToLogOutput, replica::WriteToLogError>,
    ),

    // All: Read-only.
    GetStatus(oneshot::Sender<replica::ReplicaStatus>),
}

#[derive(Debug)]
pub(crate) struct Callback<O: Debug, E: Error>(oneshot::Sender<Result<O, E>>);

impl<O: Debug, E: Error> Callback<O, E> {
    pub fn send(self, message: Result<O, E>) {
        let _ = self.0.send(message);
    }
}

impl ActorClient {
    pub(crate) fn new(buffer_size: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(buffer_size);

        (ActorClient { sender: tx }, rx)
    }

    pub(crate) fn weak(&self) -> WeakActorClient {
        WeakActorClient {
            sender: self.sender.downgrade(),
        }
    }

    pub(crate) async fn status(&self) -> Result<replica::ReplicaStatus, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(Event::GetStatus(tx))
            .await
            .map_err(|_| ActorExited)?;

        rx.await.map_err(|_| ActorExited)
    }
}

impl WeakActorClient {
    pub(crate) async fn tick(&self) -> Result<(), ActorExited> {
        self.send(Event::Tick).await
    }

    pub(crate) async fn request_vote(
        &self,
        input: replica::RequestVoteInput,
    ) -> Result<replica::RequestVoteOutput, replica::RequestVoteError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::RequestVote(input, Callback(tx)))
            .await
            .map_err(|_| replica::RequestVoteError::ActorExited)?;

        rx.await.map_err(|_| replica::RequestVoteError::ActorExited)?
    }

    pub(crate) async fn notify_request_vote_reply_from_peer(&self, input: replica::RequestVoteReplyFromPeer) {
        let _ = self.send(Event::RequestVoteReplyFromPeer(input)).await;
    }

    pub(crate) async fn append_entries(
        &self,
        input: replica::AppendEntriesInput,
    ) -> Result<replica::AppendEntriesOutput, replica::AppendEntriesError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::AppendEntries(input, Callback(tx)))
            .await
            .map_err(|_| replica::AppendEntriesError::ActorExited)?;

        rx.await.map_err(|_| replica::AppendEntriesError::ActorExited)?
    }

    pub(crate) async fn notify_heartbeat_round_finished(&self, input: replica::HeartbeatRoundResult) {
        let _ = self.send(Event::HeartbeatRoundFinished(input)).await;
    }

    pub(crate) async fn get_leader(&self) -> Result<Option<String>, ActorExited> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::GetLeader(tx)).await?;

        rx.await.map_err(|_| ActorExited)
    }

    pub(crate) async fn write_to_log(
        &self,
        input: replica::WriteToLogInput,
    ) -> Result<replica::WriteToLogOutput, replica::WriteToLogError> {
        let (tx, rx) = oneshot::channel();
        self.send(Event::WriteToLog(input, Callback(tx)))
            .await
            .map_err(|_| replica::WriteToLogError::ActorExited)?;

        rx.await.map_err(|_| replica::WriteToLogError::ActorExited)?
    }

    async fn send(&self, event: Event) -> Result<(), ActorExited> {
        let sender = self.sender.upgrade().ok_or(ActorExited)?;
        sender.send(event).await.map_err(|_| ActorExited)
    }
}

/// ReplicaActor is replica logic in actor model.
pub(crate) struct ReplicaActor<S, C>
where
    S: replica::PersistentLocalState,
    C: replica::Clock,
{
    logger: slog::Logger,
    receiver: mpsc::Receiver<Event>,
    replica: replica::Replica<S, C>,
}

impl<S, C> ReplicaActor<S, C>
where
    S: replica::PersistentLocalState + Send + 'static,
    C: replica::Clock + Send + Sync + 'static,
{
    pub(crate) fn new(logger: slog::Logger, receiver: mpsc::Receiver<Event>, replica: replica::Replica<S, C>) -> Self {
        ReplicaActor {
            logger,
            receiver,
            replica,
        }
    }

    pub(crate) async fn run_event_loop(mut self) {
        while let Some(event) = self.receiver.recv().await {
            self.handle_event(event);
        }

        slog::info!(self.logger, "Replica event loop exited.");
    }

    // This must NOT be async. Any long running work must be spawned on another task
    // and come back to this actor as an event.
    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Tick => {
                self.replica.handle_tick();
            }
            Event::RequestVote(input, callback) => {
                let result = self.replica.handle_request_vote(input);
                callback.send(result);
            }
            Event::RequestVoteReplyFromPeer(input) => {
                self.replica.handle_request_vote_reply_from_peer(input);
            }
            Event::AppendEntries(input, callback) => {
                let result = self.replica.handle_append_entries(input);
                callback.send(result);
            }
            Event::HeartbeatRoundFinished(input) => {
                self.replica.handle_heartbeat_round_finished(input);
            }
            Event::GetLeader(reply) => {
                let _ = reply.send(self.replica.leader_address());
            }
            Event::WriteToLog(input, callback) => {
                let result = self.replica.handle_write_to_log(input);
                callback.send(result);
            }
            Event::GetStatus(reply) => {
                let _ = reply.send(self.replica.status());
            }
        }
    }
}
