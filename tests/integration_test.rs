use ledger_raft::{
    start_replica_node, AccountClient, AccountStore, ClusterConfig, GameKind, LeaderDiscovery, RaftOptions,
    ReplicaNode, ReplicaNodeConfig, Role, ServersConfig, STARTING_BALANCE,
};
use std::error::Error;
use std::net::TcpListener;
use std::path::PathBuf;
use tempfile::TempDir;
use tokio::time::{sleep, Duration, Instant};

const NUM_REPLICAS: usize = 3;

struct TestCluster {
    config: ClusterConfig,
    // Indexed by replica; `None` once a replica has been shut down.
    nodes: Vec<Option<ReplicaNode>>,
    _dir: TempDir,
}

impl TestCluster {
    async fn start() -> Result<Self, Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let config = cluster_config(&dir, NUM_REPLICAS)?;

        let mut nodes = Vec::with_capacity(NUM_REPLICAS);
        for i in 0..NUM_REPLICAS {
            let node = start_replica_node(ReplicaNodeConfig {
                cluster: config.clone(),
                my_index: i,
                logger: discard_logger(),
            })
            .await?;
            nodes.push(Some(node));
        }

        Ok(TestCluster {
            config,
            nodes,
            _dir: dir,
        })
    }

    fn discovery(&self) -> LeaderDiscovery {
        LeaderDiscovery::new(discard_logger(), self.config.addresses())
            .with_max_attempts(20)
            .with_backoff(Duration::from_millis(250))
    }

    async fn client(&self) -> Result<AccountClient, Box<dyn Error>> {
        let client = AccountClient::connect(discard_logger(), self.discovery()).await?;
        Ok(client.with_request_timeout(Duration::from_secs(5)))
    }

    /// Index of the only live replica that is leader, once exactly one is.
    async fn wait_for_single_leader(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        loop {
            let mut leaders = Vec::new();
            for (i, node) in self.nodes.iter().enumerate() {
                if let Some(node) = node {
                    if let Ok(status) = node.status().await {
                        if status.role == Role::Leader {
                            leaders.push((i, status.term));
                        }
                    }
                }
            }
            // Two replicas may think they lead while an old leader catches up, but never in the
            // same term.
            if leaders.len() == 2 {
                assert_ne!(leaders[0].1, leaders[1].1, "Two leaders in the same term");
            }
            if leaders.len() == 1 {
                return leaders[0].0;
            }
            if Instant::now() > deadline {
                panic!("No single leader within {:?}. Leaders: {:?}", timeout, leaders);
            }
            sleep(Duration::from_millis(50)).await;
        }
    }

    async fn shutdown_replica(&mut self, index: usize) {
        if let Some(node) = self.nodes[index].take() {
            node.shutdown().await;
        }
    }

    async fn shutdown(mut self) {
        for i in 0..self.nodes.len() {
            self.shutdown_replica(i).await;
        }
    }

    fn db_path(&self, index: usize) -> &PathBuf {
        &self.config.servers.db_paths[index]
    }
}

fn cluster_config(dir: &TempDir, num_replicas: usize) -> Result<ClusterConfig, Box<dyn Error>> {
    let mut ports = Vec::with_capacity(num_replicas);
    for _ in 0..num_replicas {
        ports.push(free_port()?);
    }

    Ok(ClusterConfig {
        servers: ServersConfig {
            hosts: vec!["127.0.0.1".to_string(); num_replicas],
            ports,
            log_paths: (0..num_replicas)
                .map(|i| dir.path().join(format!("logs/replica-{}.log", i)))
                .collect(),
            db_paths: (0..num_replicas)
                .map(|i| dir.path().join(format!("db/replica-{}.db", i)))
                .collect(),
        },
        raft: RaftOptions {
            tick_interval_ms: Some(100),
            election_timeout_min_ms: Some(500),
            election_timeout_max_ms: Some(800),
            rpc_timeout_ms: Some(90),
            apply_timeout_ms: Some(5000),
        },
    })
}

fn free_port() -> std::io::Result<u16> {
    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

fn discard_logger() -> slog::Logger {
    slog::Logger::root(slog::Discard, slog::o!())
}

/// Poll a replica's datastore until `check` holds.
async fn wait_for_store<F>(path: &PathBuf, timeout: Duration, check: F)
where
    F: Fn(Option<i64>) -> bool,
{
    let store = AccountStore::open(path).await.expect("open replica store");
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(balance) = store.balance("alice").await {
            if check(balance) {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("Store {:?} did not converge within {:?}", path, timeout);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::test]
async fn elects_exactly_one_leader() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start().await?;

    let leader = cluster.wait_for_single_leader(Duration::from_secs(10)).await;
    let leader_address = cluster.nodes[leader].as_ref().map(|n| n.address().to_string());

    // Every replica, asked directly or not, points at the same leader.
    let discovered = cluster.discovery().discover().await?;
    assert_eq!(Some(discovered), leader_address);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn account_lifecycle_through_the_leader() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start().await?;
    cluster.wait_for_single_leader(Duration::from_secs(10)).await;
    let mut client = cluster.client().await?;

    assert!(!client.check_username("alice").await?);
    assert_eq!(client.register("alice", "hunter2").await?, Some(STARTING_BALANCE));
    assert!(client.check_username("alice").await?);
    assert_eq!(client.register("alice", "other").await?, None);

    assert_eq!(client.login("alice", "wrong").await?, None);
    assert_eq!(client.login("alice", "hunter2").await?, Some(STARTING_BALANCE));

    assert!(!client.delete_account("alice", "wrong").await?);
    assert!(client.delete_account("alice", "hunter2").await?);
    assert!(!client.check_username("alice").await?);
    assert_eq!(client.login("alice", "hunter2").await?, None);

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn writes_reach_every_replica() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start().await?;
    let leader = cluster.wait_for_single_leader(Duration::from_secs(10)).await;
    let mut client = cluster.client().await?;

    assert_eq!(client.register("alice", "hunter2").await?, Some(STARTING_BALANCE));

    for i in (0..NUM_REPLICAS).filter(|i| *i != leader) {
        wait_for_store(cluster.db_path(i), Duration::from_secs(5), |balance| {
            balance == Some(STARTING_BALANCE)
        })
        .await;
    }

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn saved_games_update_balance_and_history() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start().await?;
    let leader = cluster.wait_for_single_leader(Duration::from_secs(10)).await;
    let mut client = cluster.client().await?;

    client.register("alice", "hunter2").await?;
    client.save_game("alice", GameKind::TexasHoldEm, 250).await?;
    client.save_game("alice", GameKind::FiveCardDraw, -100).await?;

    // Saves are not acknowledged, so wait for the leader's store to reflect both.
    let expected = STARTING_BALANCE + 250 - 100;
    wait_for_store(cluster.db_path(leader), Duration::from_secs(5), |balance| {
        balance == Some(expected)
    })
    .await;

    assert_eq!(client.user_info("alice").await?, Some(expected));
    let history = client.view_history("alice").await?.expect("alice has a history");
    let mut games: Vec<_> = history.iter().map(|r| (r.game_kind, r.money_won)).collect();
    games.sort_by_key(|(_, money_won)| *money_won);
    assert_eq!(
        games,
        vec![(GameKind::FiveCardDraw, -100), (GameKind::TexasHoldEm, 250)]
    );

    assert_eq!(client.user_info("bob").await?, None);
    assert!(client.view_history("bob").await?.is_none());

    cluster.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn client_fails_over_to_new_leader() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start().await?;
    let old_leader = cluster.wait_for_single_leader(Duration::from_secs(10)).await;
    let mut client = cluster.client().await?;

    assert_eq!(client.register("alice", "hunter2").await?, Some(STARTING_BALANCE));
    let old_address = client.leader_address().map(str::to_string);

    // Let the registration reach the followers before the leader goes away.
    for i in (0..NUM_REPLICAS).filter(|i| *i != old_leader) {
        wait_for_store(cluster.db_path(i), Duration::from_secs(5), |balance| {
            balance == Some(STARTING_BALANCE)
        })
        .await;
    }

    cluster.shutdown_replica(old_leader).await;
    let new_leader = cluster.wait_for_single_leader(Duration::from_secs(10)).await;
    assert_ne!(new_leader, old_leader);

    assert_eq!(client.login("alice", "hunter2").await?, Some(STARTING_BALANCE));
    assert_ne!(client.leader_address().map(str::to_string), old_address);
    assert_eq!(client.register("bob", "swordfish").await?, Some(STARTING_BALANCE));

    cluster.shutdown().await;
    Ok(())
}
