use crate::client::discovery::endpoint;
use crate::client::{ClientError, LeaderDiscovery};
use crate::grpc::grpc_account_client::GrpcAccountClient;
use crate::grpc::{ProtoAction, ProtoClientRequest, ProtoClientResponse, ProtoGameRecord};
use crate::store::{GameKind, GameRecord};
use futures::channel::mpsc;
use tokio::time::Duration;
use tonic::transport::Channel;
use tonic::Streaming;

// Must outlast the replica's wait for a write to apply.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// AccountClient keeps one duplex session with the current leader and moves it to a new leader
/// when the stream fails.
pub struct AccountClient {
    logger: slog::Logger,
    discovery: LeaderDiscovery,
    request_timeout: Duration,
    session: Option<Session>,
    // Remembered for the CONNECT handshake on every new session.
    username: Option<String>,
    is_lobby: bool,
}

struct Session {
    leader_address: String,
    requests: mpsc::UnboundedSender<ProtoClientRequest>,
    responses: Streaming<ProtoClientResponse>,
    // Owns the connection the stream runs on.
    _client: GrpcAccountClient<Channel>,
}

impl AccountClient {
    /// Find the leader and open a session with it.
    pub async fn connect(logger: slog::Logger, discovery: LeaderDiscovery) -> Result<Self, ClientError> {
        let mut client = AccountClient {
            logger,
            discovery,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            session: None,
            username: None,
            is_lobby: false,
        };
        client.reattach().await?;

        Ok(client)
    }

    pub fn with_request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout;
        self
    }

    pub fn leader_address(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.leader_address.as_str())
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Send a request and, if its action has one, wait for the response. A failed stream moves
    /// the session to the current leader and sends the request again, once per failover.
    pub async fn call(&mut self, request: ProtoClientRequest) -> Result<Option<ProtoClientResponse>, ClientError> {
        let max_failovers = self.discovery.max_attempts();
        let mut failovers = 0;

        loop {
            let error = match self.try_call(&request).await {
                Ok(response) => return Ok(response),
                Err(e) => e,
            };

            if failovers == max_failovers {
                slog::warn!(self.logger, "Giving up on {:?}: {}", request.action(), error);
                return Err(ClientError::SessionLost { attempts: failovers });
            }
            failovers += 1;

            slog::warn!(
                self.logger,
                "Session with {:?} failed: {}. Failing over ({}/{}).",
                self.leader_address(),
                error,
                failovers,
                max_failovers
            );
            self.reattach().await?;
        }
    }

    async fn try_call(&mut self, request: &ProtoClientRequest) -> Result<Option<ProtoClientResponse>, ClientError> {
        let request_timeout = self.request_timeout;
        let session = self.session.as_mut().ok_or(ClientError::StreamClosed)?;

        session
            .requests
            .unbounded_send(request.clone())
            .map_err(|_| ClientError::StreamClosed)?;
        if !expects_response(request.action()) {
            return Ok(None);
        }

        match tokio::time::timeout(request_timeout, session.responses.message()).await {
            Ok(Ok(Some(response))) => Ok(Some(response)),
            Ok(Ok(None)) => Err(ClientError::StreamClosed),
            Ok(Err(status)) => Err(status.into()),
            Err(_) => Err(ClientError::Timeout("response")),
        }
    }

    /// Drop the current stream, find the leader and open a fresh stream to it.
    async fn reattach(&mut self) -> Result<(), ClientError> {
        let previous_leader = self.session.take().map(|session| session.leader_address);
        let max_attempts = self.discovery.max_attempts();

        for attempt in 1..=max_attempts {
            let leader_address = self.discovery.discover().await?;
            if previous_leader.as_deref() != Some(leader_address.as_str()) {
                slog::info!(self.logger, "Leader is {} (was {:?})", leader_address, previous_leader);
            }

            match self.open_session(leader_address).await {
                Ok(session) => {
                    self.session = Some(session);
                    self.send_handshake()?;
                    return Ok(());
                }
                Err(e) => {
                    // Replicas keep reporting a crashed leader until they elect a new one.
                    slog::info!(
                        self.logger,
                        "Could not open session (attempt {}/{}): {}",
                        attempt,
                        max_attempts,
                        e
                    );
                    tokio::time::sleep(self.discovery.backoff()).await;
                }
            }
        }

        Err(ClientError::SessionLost {
            attempts: max_attempts,
        })
    }

    async fn open_session(&self, leader_address: String) -> Result<Session, ClientError> {
        let open = async {
            let channel = endpoint(&leader_address)?.connect().await?;
            let mut client = GrpcAccountClient::new(channel);
            let (requests, outbound) = mpsc::unbounded();

            // Resolves on the server's response headers, which it sends only once a session
            // reader owns the stream. Requests sent from here on cannot be lost.
            let responses = client
                .client_session(outbound)
                .await?
                .into_inner();

            Ok::<_, ClientError>((client, requests, responses))
        };

        let (client, requests, responses) = tokio::time::timeout(self.request_timeout, open)
            .await
            .map_err(|_| ClientError::Timeout("session"))??;

        Ok(Session {
            leader_address,
            requests,
            responses,
            _client: client,
        })
    }

    fn send_handshake(&mut self) -> Result<(), ClientError> {
        let action = if self.is_lobby {
            ProtoAction::ConnectLobby
        } else {
            ProtoAction::Connect
        };
        let handshake = request(action, self.username.as_deref().unwrap_or_default(), "");

        let session = self.session.as_ref().ok_or(ClientError::StreamClosed)?;
        session.requests.unbounded_send(handshake).map_err(|_| ClientError::StreamClosed)
    }

    async fn call_for_response(&mut self, request: ProtoClientRequest) -> Result<ProtoClientResponse, ClientError> {
        self.call(request).await?.ok_or(ClientError::StreamClosed)
    }

    pub async fn check_username(&mut self, username: &str) -> Result<bool, ClientError> {
        let response = self
            .call_for_response(request(ProtoAction::CheckUsername, username, ""))
            .await?;
        Ok(response.result)
    }

    /// Balance on success.
    pub async fn login(&mut self, username: &str, password: &str) -> Result<Option<i64>, ClientError> {
        let response = self
            .call_for_response(request(ProtoAction::Login, username, password))
            .await?;
        if !response.result {
            return Ok(None);
        }

        self.username = Some(username.to_string());
        Ok(Some(response.balance))
    }

    /// Starting balance on success. False if the username is taken.
    pub async fn register(&mut self, username: &str, password: &str) -> Result<Option<i64>, ClientError> {
        let response = self
            .call_for_response(request(ProtoAction::Register, username, password))
            .await?;
        if !response.result {
            return Ok(None);
        }

        self.username = Some(username.to_string());
        Ok(Some(response.balance))
    }

    pub async fn delete_account(&mut self, username: &str, password: &str) -> Result<bool, ClientError> {
        let response = self
            .call_for_response(request(ProtoAction::DeleteAccount, username, password))
            .await?;
        if response.result && self.username.as_deref() == Some(username) {
            self.username = None;
        }

        Ok(response.result)
    }

    pub async fn user_info(&mut self, username: &str) -> Result<Option<i64>, ClientError> {
        let response = self
            .call_for_response(request(ProtoAction::GetUserInfo, username, ""))
            .await?;
        Ok(Some(response.balance).filter(|_| response.result))
    }

    /// Newest first.
    pub async fn view_history(&mut self, username: &str) -> Result<Option<Vec<GameRecord>>, ClientError> {
        let response = self
            .call_for_response(request(ProtoAction::ViewHistory, username, ""))
            .await?;
        if !response.result {
            return Ok(None);
        }

        let mut records = Vec::with_capacity(response.game_history.len());
        for proto in response.game_history {
            match from_proto_record(proto) {
                Some(record) => records.push(record),
                None => slog::warn!(self.logger, "Skipping history row with unknown game kind"),
            }
        }

        Ok(Some(records))
    }

    /// Fire and forget. The leader applies it after it commits.
    pub async fn save_game(&mut self, username: &str, game_kind: GameKind, money_won: i64) -> Result<(), ClientError> {
        let mut request = request(ProtoAction::SaveGame, username, "");
        request.set_game_kind(game_kind.to_proto());
        request.money_to_add = money_won;

        self.call(request).await.map(|_| ())
    }

    pub async fn join_lobby(&mut self, username: &str) -> Result<bool, ClientError> {
        let response = self
            .call_for_response(request(ProtoAction::JoinLobby, username, ""))
            .await?;
        Ok(response.result)
    }

    /// Identify this client as a lobby server. Later sessions repeat it in their handshake.
    pub async fn connect_lobby(&mut self, lobby_name: &str) -> Result<(), ClientError> {
        self.username = Some(lobby_name.to_string());
        self.is_lobby = true;

        self.call(request(ProtoAction::ConnectLobby, lobby_name, "")).await.map(|_| ())
    }
}

fn request(action: ProtoAction, username: &str, password: &str) -> ProtoClientRequest {
    let mut request = ProtoClientRequest {
        username: username.to_string(),
        password: password.to_string(),
        ..ProtoClientRequest::default()
    };
    request.set_action(action);
    request
}

fn expects_response(action: ProtoAction) -> bool {
    match action {
        ProtoAction::CheckUsername
        | ProtoAction::Login
        | ProtoAction::Register
        | ProtoAction::DeleteAccount
        | ProtoAction::JoinLobby
        | ProtoAction::GetUserInfo
        | ProtoAction::ViewHistory => true,
        ProtoAction::Unspecified | ProtoAction::Connect | ProtoAction::ConnectLobby | ProtoAction::SaveGame => false,
    }
}

fn from_proto_record(proto: ProtoGameRecord) -> Option<GameRecord> {
    Some(GameRecord {
        game_kind: GameKind::from_proto(proto.game_kind)?,
        player: proto.player,
        money_won: proto.money_won,
        played_at_millis: proto.played_at_millis,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::ProtoGameKind;

    #[test]
    fn handshakes_and_saves_get_no_response() {
        assert!(!expects_response(ProtoAction::Connect));
        assert!(!expects_response(ProtoAction::ConnectLobby));
        assert!(!expects_response(ProtoAction::SaveGame));
        assert!(expects_response(ProtoAction::JoinLobby));
        assert!(expects_response(ProtoAction::ViewHistory));
    }

    #[test]
    fn history_rows_need_a_known_game_kind() {
        let mut proto = ProtoGameRecord {
            money_won: -40,
            player: "alice".to_string(),
            played_at_millis: 1_600_000_000_000,
            ..ProtoGameRecord::default()
        };
        assert!(from_proto_record(proto.clone()).is_none());

        proto.set_game_kind(ProtoGameKind::FiveCardDraw);
        let record = from_proto_record(proto).unwrap();
        assert_eq!(record.game_kind, GameKind::FiveCardDraw);
        assert_eq!(record.money_won, -40);
    }
}
