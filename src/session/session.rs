use crate::actor::WeakActorClient;
use crate::bridge::ApplyOutcome;
use crate::grpc::{ProtoAction, ProtoClientRequest, ProtoClientResponse, ProtoGameRecord};
use crate::replica::{Action, WriteToLogInput};
use crate::server::ShutdownSignal;
use crate::session::ClientRegistry;
use crate::store::{hash_password, AccountStore, GameKind, GameRecord, STARTING_BALANCE};
use chrono::Utc;
use futures::channel::mpsc;
use futures::{Stream, StreamExt};
use tokio::sync::oneshot;
use tokio::time::Duration;
use tonic::Status;

pub(crate) type Outbound = mpsc::UnboundedSender<Result<ProtoClientResponse, Status>>;

pub(crate) struct SessionContext {
    pub logger: slog::Logger,
    pub local_replica: WeakActorClient,
    pub store: AccountStore,
    pub registry: ClientRegistry,
    pub outbound: Outbound,
    pub shutdown_signal: ShutdownSignal,
    pub apply_timeout: Duration,
}

/// ClientSession serves one client duplex stream. Requests are handled one at a time in arrival
/// order, so responses go out in request order.
pub(crate) struct ClientSession {
    logger: slog::Logger,
    local_replica: WeakActorClient,
    store: AccountStore,
    registry: ClientRegistry,
    outbound: Outbound,
    shutdown_signal: ShutdownSignal,
    apply_timeout: Duration,
    // Bound by LOGIN, REGISTER and the CONNECT handshakes.
    username: Option<String>,
    is_lobby: bool,
}

impl ClientSession {
    pub(crate) fn new(ctx: SessionContext) -> Self {
        ClientSession {
            logger: ctx.logger,
            local_replica: ctx.local_replica,
            store: ctx.store,
            registry: ctx.registry,
            outbound: ctx.outbound,
            shutdown_signal: ctx.shutdown_signal,
            apply_timeout: ctx.apply_timeout,
            username: None,
            is_lobby: false,
        }
    }

    pub(crate) async fn run<S>(mut self, inbound: S)
    where
        S: Stream<Item = Result<ProtoClientRequest, Status>>,
    {
        slog::info!(self.logger, "Session opened");
        tokio::pin!(inbound);
        let shutdown = self.shutdown_signal.clone().recv();
        tokio::pin!(shutdown);

        loop {
            let message = tokio::select! {
                _ = &mut shutdown => {
                    slog::info!(self.logger, "Server is shutting down");
                    break;
                }
                message = inbound.next() => message,
            };

            let request = match message {
                Some(Ok(request)) => request,
                Some(Err(status)) => {
                    slog::info!(self.logger, "Client stream failed: {}", status);
                    break;
                }
                None => {
                    slog::info!(self.logger, "Client closed stream");
                    break;
                }
            };

            if let Some(response) = self.handle_request(request).await {
                if self.outbound.unbounded_send(Ok(response)).is_err() {
                    slog::info!(self.logger, "Client stopped listening");
                    break;
                }
            }
        }

        self.teardown().await;
    }

    async fn teardown(mut self) {
        if let Some(username) = self.username.take() {
            if let Some(client) = self.registry.remove_if_owned(&username, &self.outbound).await {
                slog::debug!(
                    self.logger,
                    "Removed {:?} from live clients (lobby: {})",
                    username,
                    client.is_lobby
                );
            }
        }

        slog::info!(self.logger, "Session closed");
    }

    async fn handle_request(&mut self, request: ProtoClientRequest) -> Option<ProtoClientResponse> {
        let action = match ProtoAction::from_i32(request.action) {
            Some(action) => action,
            None => {
                slog::warn!(self.logger, "Ignoring request with unknown action {}", request.action);
                return None;
            }
        };
        slog::debug!(self.logger, "Handling {:?} for {:?}", action, request.username);

        match action {
            ProtoAction::Unspecified => {
                slog::warn!(self.logger, "Ignoring request without action");
                None
            }
            ProtoAction::CheckUsername => Some(self.check_username(&request.username).await),
            ProtoAction::Login => Some(self.login(&request.username, &request.password).await),
            ProtoAction::Register => Some(self.register(request.username, &request.password).await),
            ProtoAction::DeleteAccount => Some(self.delete_account(request.username, &request.password).await),
            ProtoAction::Connect => {
                self.connect(request.username, false).await;
                None
            }
            ProtoAction::ConnectLobby => {
                self.connect(request.username, true).await;
                None
            }
            // Lobby routing belongs to the lobby servers.
            ProtoAction::JoinLobby => Some(response(ProtoAction::JoinLobby, true)),
            ProtoAction::SaveGame => {
                self.save_game(request).await;
                None
            }
            ProtoAction::GetUserInfo => Some(self.user_info(&request.username).await),
            ProtoAction::ViewHistory => Some(self.view_history(&request.username).await),
        }
    }

    async fn check_username(&self, username: &str) -> ProtoClientResponse {
        match self.store.username_exists(username).await {
            Ok(exists) => response(ProtoAction::CheckUsername, exists),
            Err(e) => {
                slog::warn!(self.logger, "Username lookup failed: {}", e);
                response(ProtoAction::CheckUsername, false)
            }
        }
    }

    async fn login(&mut self, username: &str, password: &str) -> ProtoClientResponse {
        match self.store.verify_login(username, &hash_password(password)).await {
            Ok(Some(balance)) => {
                self.bind_username(username).await;
                ProtoClientResponse {
                    balance,
                    ..response(ProtoAction::Login, true)
                }
            }
            Ok(None) => response(ProtoAction::Login, false),
            Err(e) => {
                slog::warn!(self.logger, "Login lookup failed: {}", e);
                response(ProtoAction::Login, false)
            }
        }
    }

    async fn register(&mut self, username: String, password: &str) -> ProtoClientResponse {
        let failed = response(ProtoAction::Register, false);
        match self.store.username_exists(&username).await {
            Ok(false) => {}
            Ok(true) => return failed,
            Err(e) => {
                slog::warn!(self.logger, "Username lookup failed: {}", e);
                return failed;
            }
        }

        let action = Action::Register {
            username: username.clone(),
            password_hash: hash_password(password),
        };
        match self.write_and_wait(action).await {
            Some(ApplyOutcome::Registered) => {
                self.bind_username(&username).await;
                ProtoClientResponse {
                    balance: STARTING_BALANCE,
                    ..response(ProtoAction::Register, true)
                }
            }
            outcome => {
                slog::info!(self.logger, "Registration of {:?} not applied: {:?}", username, outcome);
                failed
            }
        }
    }

    async fn delete_account(&mut self, username: String, password: &str) -> ProtoClientResponse {
        let action = Action::DeleteAccount {
            username: username.clone(),
            password_hash: hash_password(password),
        };
        match self.write_and_wait(action).await {
            Some(ApplyOutcome::Deleted) => {
                self.registry.remove(&username).await;
                if self.username.as_deref() == Some(username.as_str()) {
                    self.username = None;
                }
                response(ProtoAction::DeleteAccount, true)
            }
            _ => response(ProtoAction::DeleteAccount, false),
        }
    }

    async fn connect(&mut self, username: String, is_lobby: bool) {
        if username.is_empty() {
            slog::debug!(self.logger, "Anonymous connect");
            return;
        }

        let action = if is_lobby {
            Action::ConnectLobby {
                username: username.clone(),
            }
        } else {
            Action::Connect {
                username: username.clone(),
            }
        };
        self.write_without_waiting(action).await;

        // Handshakes can repeat, e.g. after a client fails over. Never insert twice.
        if self
            .registry
            .insert_if_absent(&username, &self.outbound, is_lobby)
            .await
        {
            slog::info!(self.logger, "{:?} connected (lobby: {})", username, is_lobby);
        }
        self.is_lobby = is_lobby;
        if self.username.is_none() {
            self.username = Some(username);
        }
    }

    async fn save_game(&self, request: ProtoClientRequest) {
        let game_kind = match GameKind::from_proto(request.game_kind) {
            Some(game_kind) => game_kind,
            None => {
                slog::warn!(self.logger, "Ignoring SAVE_GAME with unknown game kind {}", request.game_kind);
                return;
            }
        };

        // Stamped once here so every replica stores the same history row, and a replayed entry is
        // recognized.
        let action = Action::SaveGame {
            game_id: rand::random(),
            username: request.username,
            game_kind,
            money_delta: request.money_to_add,
            played_at_millis: Utc::now().timestamp_millis(),
        };
        self.write_without_waiting(action).await;
    }

    async fn user_info(&self, username: &str) -> ProtoClientResponse {
        match self.store.balance(username).await {
            Ok(Some(balance)) => ProtoClientResponse {
                balance,
                ..response(ProtoAction::GetUserInfo, true)
            },
            Ok(None) => response(ProtoAction::GetUserInfo, false),
            Err(e) => {
                slog::warn!(self.logger, "Balance lookup failed: {}", e);
                response(ProtoAction::GetUserInfo, false)
            }
        }
    }

    async fn view_history(&self, username: &str) -> ProtoClientResponse {
        match self.store.history(username).await {
            Ok(Some(records)) => ProtoClientResponse {
                game_history: records.into_iter().map(to_proto_record).collect(),
                ..response(ProtoAction::ViewHistory, true)
            },
            Ok(None) => response(ProtoAction::ViewHistory, false),
            Err(e) => {
                slog::warn!(self.logger, "History lookup failed: {}", e);
                response(ProtoAction::ViewHistory, false)
            }
        }
    }

    async fn bind_username(&mut self, username: &str) {
        self.registry.insert(username, &self.outbound, self.is_lobby).await;
        self.username = Some(username.to_string());
    }

    /// Append to the replicated log and wait for this replica to apply the entry.
    /// None if we are not leader, or the entry never got applied in time.
    async fn write_and_wait(&self, action: Action) -> Option<ApplyOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let input = WriteToLogInput {
            action,
            apply_reply: Some(reply_tx),
        };
        match self.local_replica.write_to_log(input).await {
            Ok(output) => slog::debug!(self.logger, "Appended at {} in term {:?}", output.index, output.term),
            Err(e) => {
                slog::info!(self.logger, "Rejecting write: {}", e);
                return None;
            }
        }

        match tokio::time::timeout(self.apply_timeout, reply_rx).await {
            Ok(Ok(outcome)) => Some(outcome),
            Ok(Err(_)) => {
                slog::warn!(self.logger, "Log entry was dropped before it was applied");
                None
            }
            Err(_) => {
                slog::warn!(self.logger, "Timed out waiting for log entry to apply");
                None
            }
        }
    }

    async fn write_without_waiting(&self, action: Action) {
        let input = WriteToLogInput {
            action,
            apply_reply: None,
        };
        if let Err(e) = self.local_replica.write_to_log(input).await {
            slog::info!(self.logger, "Dropping write: {}", e);
        }
    }
}

fn response(action: ProtoAction, result: bool) -> ProtoClientResponse {
    let mut response = ProtoClientResponse {
        result,
        ..ProtoClientResponse::default()
    };
    response.set_action(action);
    response
}

fn to_proto_record(record: GameRecord) -> ProtoGameRecord {
    let mut proto = ProtoGameRecord {
        money_won: record.money_won,
        player: record.player,
        played_at_millis: record.played_at_millis,
        ..ProtoGameRecord::default()
    };
    proto.set_game_kind(record.game_kind.to_proto());
    proto
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actor::{ActorClient, Event};
    use crate::bridge::apply;
    use crate::grpc::ProtoGameKind;
    use crate::replica::{LogEntry, Term, WriteToLogError, WriteToLogOutput};
    use crate::server::{shutdown_signal, ShutdownHandle};
    use tokio::task::JoinHandle;
    use tokio::time::timeout;

    // Stands in for a leader: applies every write before acknowledging it.
    fn fake_leader(store: AccountStore) -> ActorClient {
        let (client, mut rx) = ActorClient::new(16);
        tokio::spawn(async move {
            let mut index = 0;
            while let Some(event) = rx.recv().await {
                match event {
                    Event::WriteToLog(input, callback) => {
                        let entry = LogEntry {
                            term: Term::new(1),
                            action: input.action,
                        };
                        let outcome = apply(&entry, &store).await.unwrap();
                        if let Some(reply) = input.apply_reply {
                            let _ = reply.send(outcome);
                        }
                        callback.send(Ok(WriteToLogOutput {
                            term: Term::new(1),
                            index,
                        }));
                        index += 1;
                    }
                    other => panic!("Unexpected event {:?}", other),
                }
            }
        });
        client
    }

    fn fake_follower() -> ActorClient {
        let (client, mut rx) = ActorClient::new(16);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if let Event::WriteToLog(_, callback) = event {
                    callback.send(Err(WriteToLogError::NotLeader {
                        leader_address: Some("127.0.0.1:50052".to_string()),
                    }));
                }
            }
        });
        client
    }

    struct Harness {
        requests: Option<mpsc::UnboundedSender<Result<ProtoClientRequest, Status>>>,
        responses: mpsc::UnboundedReceiver<Result<ProtoClientResponse, Status>>,
        registry: ClientRegistry,
        session: JoinHandle<()>,
        shutdown_handle: Option<ShutdownHandle>,
        _replica: ActorClient,
    }

    impl Harness {
        async fn start(leader: bool) -> Self {
            let store = AccountStore::open_in_memory().await.unwrap();
            let replica = if leader {
                fake_leader(store.clone())
            } else {
                fake_follower()
            };
            let registry = ClientRegistry::default();
            let (outbound, responses) = mpsc::unbounded();
            let (requests, inbound) = mpsc::unbounded();
            let (shutdown_handle, shutdown_signal) = shutdown_signal();

            let session = ClientSession::new(SessionContext {
                logger: slog::Logger::root(slog::Discard, slog::o!()),
                local_replica: replica.weak(),
                store,
                registry: registry.clone(),
                outbound,
                shutdown_signal,
                apply_timeout: Duration::from_secs(1),
            });
            let session = tokio::spawn(session.run(inbound));

            Harness {
                requests: Some(requests),
                responses,
                registry,
                session,
                shutdown_handle: Some(shutdown_handle),
                _replica: replica,
            }
        }

        fn send(&self, request: ProtoClientRequest) {
            self.requests.as_ref().unwrap().unbounded_send(Ok(request)).unwrap();
        }

        async fn call(&mut self, request: ProtoClientRequest) -> ProtoClientResponse {
            self.send(request);
            timeout(Duration::from_secs(2), self.responses.next())
                .await
                .unwrap()
                .unwrap()
                .unwrap()
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

    fn save_game(username: &str, kind: ProtoGameKind, money_to_add: i64) -> ProtoClientRequest {
        let mut request = request(ProtoAction::SaveGame, username, "");
        request.set_game_kind(kind);
        request.money_to_add = money_to_add;
        request
    }

    #[tokio::test]
    async fn register_login_delete_scenario() {
        let mut h = Harness::start(true).await;

        let registered = h.call(request(ProtoAction::Register, "foo", "bar")).await;
        assert_eq!(registered.action(), ProtoAction::Register);
        assert!(registered.result);
        assert_eq!(registered.balance, 500);
        assert_eq!(h.registry.is_lobby("foo").await, Some(false));

        let login = h.call(request(ProtoAction::Login, "foo", "bar")).await;
        assert!(login.result);
        assert_eq!(login.balance, 500);

        assert!(!h.call(request(ProtoAction::Login, "foo", "wrong")).await.result);
        assert!(!h.call(request(ProtoAction::DeleteAccount, "foo", "wrong")).await.result);
        assert!(h.call(request(ProtoAction::CheckUsername, "foo", "")).await.result);

        assert!(h.call(request(ProtoAction::DeleteAccount, "foo", "bar")).await.result);
        assert!(!h.call(request(ProtoAction::CheckUsername, "foo", "")).await.result);
        assert_eq!(h.registry.is_lobby("foo").await, None);
    }

    #[tokio::test]
    async fn register_fails_for_taken_username() {
        let mut h = Harness::start(true).await;

        assert!(h.call(request(ProtoAction::Register, "foo", "bar")).await.result);
        let again = h.call(request(ProtoAction::Register, "foo", "other")).await;
        assert!(!again.result);
        assert_eq!(again.balance, 0);
    }

    #[tokio::test]
    async fn writes_fail_on_follower() {
        let mut h = Harness::start(false).await;

        assert!(!h.call(request(ProtoAction::Register, "foo", "bar")).await.result);
        assert!(!h.call(request(ProtoAction::CheckUsername, "foo", "")).await.result);
    }

    #[tokio::test]
    async fn saved_games_move_balance_and_history() {
        let mut h = Harness::start(true).await;
        h.call(request(ProtoAction::Register, "foo", "bar")).await;

        h.send(save_game("foo", ProtoGameKind::TexasHoldEm, 100));
        let info = h.call(request(ProtoAction::GetUserInfo, "foo", "")).await;
        assert!(info.result);
        assert_eq!(info.balance, 600);

        h.send(save_game("foo", ProtoGameKind::FiveCardDraw, -100));
        assert_eq!(h.call(request(ProtoAction::GetUserInfo, "foo", "")).await.balance, 500);

        let history = h.call(request(ProtoAction::ViewHistory, "foo", "")).await;
        assert!(history.result);
        let games: Vec<(ProtoGameKind, i64)> = history
            .game_history
            .iter()
            .map(|record| (record.game_kind(), record.money_won))
            .collect();
        assert_eq!(
            games,
            vec![(ProtoGameKind::FiveCardDraw, -100), (ProtoGameKind::TexasHoldEm, 100)]
        );
    }

    #[tokio::test]
    async fn reads_for_unknown_account_fail() {
        let mut h = Harness::start(true).await;

        assert!(!h.call(request(ProtoAction::GetUserInfo, "ghost", "")).await.result);
        assert!(!h.call(request(ProtoAction::ViewHistory, "ghost", "")).await.result);
        assert!(h.call(request(ProtoAction::JoinLobby, "ghost", "")).await.result);
    }

    #[tokio::test]
    async fn repeated_connect_registers_once() {
        let mut h = Harness::start(true).await;

        h.send(request(ProtoAction::ConnectLobby, "lobby-1", ""));
        h.send(request(ProtoAction::ConnectLobby, "lobby-1", ""));
        // Responses are ordered, so this one proves both handshakes were handled.
        h.call(request(ProtoAction::CheckUsername, "lobby-1", "")).await;

        assert_eq!(h.registry.is_lobby("lobby-1").await, Some(true));
        assert_eq!(h.registry.len().await, 1);
    }

    #[tokio::test]
    async fn unknown_actions_are_ignored() {
        let mut h = Harness::start(true).await;

        let mut bogus = request(ProtoAction::CheckUsername, "foo", "");
        bogus.action = 42;
        h.send(bogus);
        h.send(request(ProtoAction::Unspecified, "foo", ""));

        let reply = h.call(request(ProtoAction::CheckUsername, "foo", "")).await;
        assert_eq!(reply.action(), ProtoAction::CheckUsername);
    }

    #[tokio::test]
    async fn closed_stream_removes_live_client() {
        let mut h = Harness::start(true).await;
        h.call(request(ProtoAction::Register, "foo", "bar")).await;
        assert_eq!(h.registry.len().await, 1);

        h.requests.take();
        timeout(Duration::from_secs(2), &mut h.session).await.unwrap().unwrap();
        assert_eq!(h.registry.len().await, 0);
        assert!(h.responses.next().await.is_none());
    }

    #[tokio::test]
    async fn shutdown_closes_session() {
        let mut h = Harness::start(true).await;
        h.call(request(ProtoAction::Login, "foo", "bar")).await;

        h.shutdown_handle.take();
        timeout(Duration::from_secs(2), &mut h.session).await.unwrap().unwrap();
        assert!(h.responses.next().await.is_none());
    }
}
