use crate::grpc::{ProtoAction, ProtoLogEntry};
use crate::replica::Term;
use crate::store::GameKind;
use std::convert::TryFrom;

/// LogEntry is one replicated command. Its index is its position in the log.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct LogEntry {
    pub(crate) term: Term,
    pub(crate) action: Action,
}

/// The state-changing requests that go through consensus. Reads never enter the log.
///
/// Password hashes are hex encoded SHA-256 digests; plaintext never reaches the log.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Action {
    Register {
        username: String,
        password_hash: String,
    },
    DeleteAccount {
        username: String,
        password_hash: String,
    },
    SaveGame {
        game_id: i64,
        username: String,
        game_kind: GameKind,
        money_delta: i64,
        played_at_millis: i64,
    },
    Connect {
        username: String,
    },
    ConnectLobby {
        username: String,
    },
}

impl Action {
    pub(crate) fn username(&self) -> &str {
        match self {
            Action::Register { username, .. }
            | Action::DeleteAccount { username, .. }
            | Action::SaveGame { username, .. }
            | Action::Connect { username }
            | Action::ConnectLobby { username } => username,
        }
    }
}

impl From<&LogEntry> for ProtoLogEntry {
    fn from(entry: &LogEntry) -> Self {
        let mut proto = ProtoLogEntry {
            term: entry.term.as_u64(),
            ..ProtoLogEntry::default()
        };

        match &entry.action {
            Action::Register {
                username,
                password_hash,
            } => {
                proto.set_action(ProtoAction::Register);
                proto.username = username.clone();
                proto.password_hash = password_hash.clone();
            }
            Action::DeleteAccount {
                username,
                password_hash,
            } => {
                proto.set_action(ProtoAction::DeleteAccount);
                proto.username = username.clone();
                proto.password_hash = password_hash.clone();
            }
            Action::SaveGame {
                game_id,
                username,
                game_kind,
                money_delta,
                played_at_millis,
            } => {
                proto.set_action(ProtoAction::SaveGame);
                proto.game_id = *game_id;
                proto.username = username.clone();
                proto.set_game_kind(game_kind.to_proto());
                proto.money_delta = *money_delta;
                proto.played_at_millis = *played_at_millis;
            }
            Action::Connect { username } => {
                proto.set_action(ProtoAction::Connect);
                proto.username = username.clone();
            }
            Action::ConnectLobby { username } => {
                proto.set_action(ProtoAction::ConnectLobby);
                proto.username = username.clone();
            }
        }

        proto
    }
}

impl TryFrom<ProtoLogEntry> for LogEntry {
    type Error = String;

    fn try_from(proto: ProtoLogEntry) -> Result<Self, Self::Error> {
        let action = match ProtoAction::from_i32(proto.action) {
            Some(ProtoAction::Register) => Action::Register {
                username: proto.username,
                password_hash: proto.password_hash,
            },
            Some(ProtoAction::DeleteAccount) => Action::DeleteAccount {
                username: proto.username,
                password_hash: proto.password_hash,
            },
            Some(ProtoAction::SaveGame) => {
                let game_kind = GameKind::from_proto(proto.game_kind)
                    .ok_or_else(|| format!("Log entry has unknown game kind {}", proto.game_kind))?;
                Action::SaveGame {
                    game_id: proto.game_id,
                    username: proto.username,
                    game_kind,
                    money_delta: proto.money_delta,
                    played_at_millis: proto.played_at_millis,
                }
            }
            Some(ProtoAction::Connect) => Action::Connect {
                username: proto.username,
            },
            Some(ProtoAction::ConnectLobby) => Action::ConnectLobby {
                username: proto.username,
            },
            other => return Err(format!("Action {:?} ({}) is never logged", other, proto.action)),
        };

        Ok(LogEntry {
            term: Term::new(proto.term),
            action,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grpc::ProtoGameKind;

    #[test]
    fn save_game_survives_the_wire() {
        let entry = LogEntry {
            term: Term::new(4),
            action: Action::SaveGame {
                game_id: -42,
                username: "foo".into(),
                game_kind: GameKind::FiveCardDraw,
                money_delta: -100,
                played_at_millis: 1_600_000_000_000,
            },
        };

        let proto = ProtoLogEntry::from(&entry);
        assert_eq!(proto.action(), ProtoAction::SaveGame);
        assert_eq!(proto.game_kind(), ProtoGameKind::FiveCardDraw);
        assert_eq!(LogEntry::try_from(proto).unwrap(), entry);
    }

    #[test]
    fn read_actions_are_rejected() {
        let proto = ProtoLogEntry {
            action: ProtoAction::Login as i32,
            username: "foo".into(),
            ..ProtoLogEntry::default()
        };
        assert!(LogEntry::try_from(proto).is_err());
    }

    #[test]
    fn save_game_without_game_kind_is_rejected() {
        let proto = ProtoLogEntry {
            action: ProtoAction::SaveGame as i32,
            username: "foo".into(),
            game_kind: ProtoGameKind::GameKindUnspecified as i32,
            ..ProtoLogEntry::default()
        };
        assert!(LogEntry::try_from(proto).is_err());
    }
}
