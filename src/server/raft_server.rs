use crate::actor::WeakActorClient;
use crate::grpc::grpc_raft_server::GrpcRaft;
use crate::grpc::{
    ProtoAppendEntriesReq, ProtoAppendEntriesResult, ProtoGetLeaderReq, ProtoGetLeaderResult, ProtoVoteReq,
    ProtoVoteResult,
};
use crate::replica::{
    AppendEntriesError, AppendEntriesInput, AppendEntriesOutput, LogEntry, ReplicaId, RequestVoteError,
    RequestVoteInput, RequestVoteOutput, Term,
};
use std::convert::TryFrom;
use tonic::{Request, Response, Status};

/// RaftServer is the type that implements the Raft gRPC interface: replica-to-replica calls plus
/// leader discovery for clients.
pub(crate) struct RaftServer {
    logger: slog::Logger,
    local_replica: WeakActorClient,
}

impl RaftServer {
    pub(crate) fn new(logger: slog::Logger, local_replica: WeakActorClient) -> Self {
        RaftServer { logger, local_replica }
    }

    async fn handle_vote(&self, rpc_request: ProtoVoteReq) -> Result<ProtoVoteResult, Status> {
        let app_input = Self::convert_vote_input(rpc_request)?;
        let app_result = self.local_replica.request_vote(app_input).await;
        Self::convert_vote_result(app_result)
    }

    fn convert_vote_input(rpc_request: ProtoVoteReq) -> Result<RequestVoteInput, Status> {
        let candidate_last_log_entry =
            Self::convert_log_entry_metadata(rpc_request.last_log_term, rpc_request.last_log_index)?;

        Ok(RequestVoteInput {
            candidate_term: Term::new(rpc_request.term),
            candidate_id: ReplicaId::new(rpc_request.candidate_id),
            candidate_last_log_entry,
        })
    }

    fn convert_vote_result(app_result: Result<RequestVoteOutput, RequestVoteError>) -> Result<ProtoVoteResult, Status> {
        match app_result {
            Ok(ok) => Ok(ProtoVoteResult {
                term: ok.term.as_u64(),
                vote_granted: ok.vote_granted,
            }),
            Err(RequestVoteError::RequestTermOutOfDate(term_info)) => Ok(ProtoVoteResult {
                term: term_info.current_term.as_u64(),
                vote_granted: false,
            }),
            Err(RequestVoteError::CandidateNotInCluster) => {
                Err(Status::permission_denied("Candidate is not a cluster member"))
            }
            Err(RequestVoteError::ActorExited) => Err(Status::unavailable("Server internal replica task has exited")),
        }
    }

    async fn handle_append_entries(
        &self,
        rpc_request: ProtoAppendEntriesReq,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        let app_input = Self::convert_append_entries_input(rpc_request)?;
        let app_result = self.local_replica.append_entries(app_input).await;
        Self::convert_append_entries_result(app_result)
    }

    fn convert_append_entries_input(rpc_request: ProtoAppendEntriesReq) -> Result<AppendEntriesInput, Status> {
        let leader_last_log_entry =
            Self::convert_log_entry_metadata(rpc_request.term_of_recent_log, rpc_request.most_recent_log_idx)?;
        let leader_commit_index = Self::convert_index(rpc_request.leader_commit)?;

        let mut entries = Vec::with_capacity(rpc_request.entries.len());
        for proto_entry in rpc_request.entries {
            let entry = LogEntry::try_from(proto_entry).map_err(Status::invalid_argument)?;
            entries.push(entry);
        }

        Ok(AppendEntriesInput {
            leader_term: Term::new(rpc_request.term),
            leader_id: ReplicaId::new(rpc_request.leader_id),
            leader_address: rpc_request.leader_address,
            leader_last_log_entry,
            entries,
            leader_commit_index,
        })
    }

    fn convert_log_entry_metadata(log_entry_term: u64, log_entry_index: i64) -> Result<Option<(Term, usize)>, Status> {
        match (Self::convert_index(log_entry_index)?, log_entry_term) {
            (None, 0) => Ok(None),
            (None, _) => Err(Status::invalid_argument("Log entry term is set but index is -1")),
            (Some(_), 0) => Err(Status::invalid_argument("Log entry index is set but term is 0")),
            (Some(index), term) => Ok(Some((Term::new(term), index))),
        }
    }

    // -1 encodes "none".
    fn convert_index(index: i64) -> Result<Option<usize>, Status> {
        match index {
            -1 => Ok(None),
            i if i >= 0 => Ok(Some(i as usize)),
            _ => Err(Status::invalid_argument(format!("Illegal log index {}", index))),
        }
    }

    fn convert_append_entries_result(
        app_result: Result<AppendEntriesOutput, AppendEntriesError>,
    ) -> Result<ProtoAppendEntriesResult, Status> {
        match app_result {
            Ok(ok) => Ok(ProtoAppendEntriesResult {
                term: ok.term.as_u64(),
                success: true,
            }),
            Err(AppendEntriesError::ClientTermOutOfDate(term_info)) => Ok(ProtoAppendEntriesResult {
                term: term_info.current_term.as_u64(),
                success: false,
            }),
            Err(AppendEntriesError::ClientNotInCluster) => {
                Err(Status::permission_denied("Leader is not a cluster member"))
            }
            Err(AppendEntriesError::ActorExited) => Err(Status::unavailable("Server internal replica task has exited")),
        }
    }

    async fn handle_get_leader(&self) -> Result<ProtoGetLeaderResult, Status> {
        let leader_address = self
            .local_replica
            .get_leader()
            .await
            .map_err(|e| Status::unavailable(e.to_string()))?;

        Ok(ProtoGetLeaderResult {
            leader_address: leader_address.unwrap_or_default(),
        })
    }
}

#[async_trait::async_trait]
impl GrpcRaft for RaftServer {
    async fn vote(&self, rpc_request_wrapped: Request<ProtoVoteReq>) -> Result<Response<ProtoVoteResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        slog::debug!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_vote(rpc_request).await;
        slog::debug!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn append_entries(
        &self,
        rpc_request_wrapped: Request<ProtoAppendEntriesReq>,
    ) -> Result<Response<ProtoAppendEntriesResult>, Status> {
        let rpc_request = rpc_request_wrapped.into_inner();

        // Full logs are too noisy for debug.
        slog::trace!(self.logger, "ServerWire - {:?}", rpc_request);
        let rpc_result = self.handle_append_entries(rpc_request).await;
        slog::trace!(self.logger, "ServerWire - {:?}", rpc_result);

        rpc_result.map(Response::new)
    }

    async fn get_leader(
        &self,
        _rpc_request: Request<ProtoGetLeaderReq>,
    ) -> Result<Response<ProtoGetLeaderResult>, Status> {
        self.handle_get_leader().await.map(Response::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::{ProtoAction, ProtoLogEntry};

    #[test]
    fn empty_log_metadata() {
        assert!(matches!(RaftServer::convert_log_entry_metadata(0, -1), Ok(None)));
        assert!(matches!(
            RaftServer::convert_log_entry_metadata(3, 2),
            Ok(Some((term, 2))) if term == Term::new(3)
        ));
        assert!(RaftServer::convert_log_entry_metadata(3, -1).is_err());
        assert!(RaftServer::convert_log_entry_metadata(0, 4).is_err());
        assert!(RaftServer::convert_index(-2).is_err());
    }

    #[test]
    fn append_entries_rejects_malformed_entries() {
        let mut entry = ProtoLogEntry {
            term: 1,
            username: "alice".to_string(),
            ..ProtoLogEntry::default()
        };
        entry.set_action(ProtoAction::Login);

        let request = ProtoAppendEntriesReq {
            term: 1,
            leader_id: "replica-1".to_string(),
            leader_address: "127.0.0.1:50052".to_string(),
            most_recent_log_idx: 0,
            term_of_recent_log: 1,
            entries: vec![entry],
            leader_commit: -1,
        };

        let status = RaftServer::convert_append_entries_input(request).unwrap_err();
        assert_eq!(status.code(), tonic::Code::InvalidArgument);
    }

    #[test]
    fn stale_term_is_a_negative_reply() {
        let reply = RaftServer::convert_append_entries_result(Err(AppendEntriesError::ClientTermOutOfDate(
            crate::replica::TermOutOfDateInfo {
                current_term: Term::new(7),
            },
        )))
        .unwrap();
        assert_eq!(reply.term, 7);
        assert!(!reply.success);
    }
}
