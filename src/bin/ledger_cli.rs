use clap::{Parser, Subcommand};
use ledger_raft::{terminal_logger, AccountClient, ClusterConfig, GameKind, LeaderDiscovery};
use std::error::Error;
use std::path::PathBuf;
use std::process;

/// Talks to the account ledger cluster through its current leader.
#[derive(Debug, Parser)]
#[command(name = "ledger-cli")]
struct Args {
    #[arg(long, default_value = "config/config.json")]
    config: PathBuf,

    /// Log client internals (discovery, failover) to stderr.
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the address of the current leader.
    Leader,
    CheckUsername {
        username: String,
    },
    Register {
        username: String,
        password: String,
    },
    Login {
        username: String,
        password: String,
    },
    DeleteAccount {
        username: String,
        password: String,
    },
    UserInfo {
        username: String,
    },
    History {
        username: String,
    },
    /// Record a finished game. Negative amounts are losses.
    SaveGame {
        username: String,
        #[arg(value_parser = parse_game_kind)]
        game_kind: GameKind,
        #[arg(allow_negative_numbers = true)]
        money_won: i64,
    },
    JoinLobby {
        username: String,
    },
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    if let Err(e) = run(args).await {
        eprintln!("ledger-cli: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), Box<dyn Error>> {
    let level = if args.verbose {
        slog::Level::Debug
    } else {
        slog::Level::Warning
    };
    let logger = terminal_logger(level);
    let cluster = ClusterConfig::from_file(&args.config)?;
    let discovery = LeaderDiscovery::new(logger.clone(), cluster.addresses());

    if let Command::Leader = args.command {
        println!("{}", discovery.discover().await?);
        return Ok(());
    }

    let mut client = AccountClient::connect(logger, discovery).await?;
    match args.command {
        Command::Leader => {}
        Command::CheckUsername { username } => {
            let exists = client.check_username(&username).await?;
            println!("{}", if exists { "taken" } else { "available" });
        }
        Command::Register { username, password } => match client.register(&username, &password).await? {
            Some(balance) => println!("Registered {} with balance {}", username, balance),
            None => println!("Username {} is taken", username),
        },
        Command::Login { username, password } => match client.login(&username, &password).await? {
            Some(balance) => println!("Logged in as {}. Balance: {}", username, balance),
            None => println!("Wrong username or password"),
        },
        Command::DeleteAccount { username, password } => {
            if client.delete_account(&username, &password).await? {
                println!("Deleted {}", username);
            } else {
                println!("Wrong username or password");
            }
        }
        Command::UserInfo { username } => match client.user_info(&username).await? {
            Some(balance) => println!("{}: balance {}", username, balance),
            None => println!("No account {}", username),
        },
        Command::History { username } => match client.view_history(&username).await? {
            Some(records) => {
                for record in records {
                    println!("{}\t{}\t{:+}", record.played_at_millis, record.game_kind, record.money_won);
                }
            }
            None => println!("No account {}", username),
        },
        Command::SaveGame {
            username,
            game_kind,
            money_won,
        } => {
            client.save_game(&username, game_kind, money_won).await?;
            // Saving has no response; a round trip makes sure it left before we exit.
            client.check_username(&username).await?;
            println!("Submitted {} game for {}", game_kind, username);
        }
        Command::JoinLobby { username } => {
            let joined = client.join_lobby(&username).await?;
            println!("{}", if joined { "Joined lobby" } else { "Could not join lobby" });
        }
    }

    Ok(())
}

fn parse_game_kind(value: &str) -> Result<GameKind, String> {
    let label = value.to_uppercase().replace(|c: char| c == '-' || c == '_', " ");
    GameKind::from_label(&label).ok_or_else(|| format!("Unknown game kind {:?}. Try texas-hold-em or five-card-draw.", value))
}
