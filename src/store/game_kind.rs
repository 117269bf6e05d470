use crate::grpc::ProtoGameKind;
use std::fmt;

/// The games whose results are recorded in an account's history.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GameKind {
    TexasHoldEm,
    FiveCardDraw,
}

impl GameKind {
    /// The label stored in the `game_history` table.
    pub fn label(&self) -> &'static str {
        match self {
            GameKind::TexasHoldEm => "TEXAS HOLD EM",
            GameKind::FiveCardDraw => "FIVE CARD DRAW",
        }
    }

    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "TEXAS HOLD EM" => Some(GameKind::TexasHoldEm),
            "FIVE CARD DRAW" => Some(GameKind::FiveCardDraw),
            _ => None,
        }
    }

    pub(crate) fn from_proto(value: i32) -> Option<Self> {
        match ProtoGameKind::from_i32(value)? {
            ProtoGameKind::TexasHoldEm => Some(GameKind::TexasHoldEm),
            ProtoGameKind::FiveCardDraw => Some(GameKind::FiveCardDraw),
            ProtoGameKind::GameKindUnspecified => None,
        }
    }

    pub(crate) fn to_proto(self) -> ProtoGameKind {
        match self {
            GameKind::TexasHoldEm => ProtoGameKind::TexasHoldEm,
            GameKind::FiveCardDraw => ProtoGameKind::FiveCardDraw,
        }
    }
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        for kind in [GameKind::TexasHoldEm, GameKind::FiveCardDraw].iter() {
            assert_eq!(GameKind::from_label(kind.label()), Some(*kind));
            assert_eq!(GameKind::from_proto(kind.to_proto() as i32), Some(*kind));
        }
        assert_eq!(GameKind::from_label("GO FISH"), None);
        assert_eq!(GameKind::from_proto(0), None);
        assert_eq!(GameKind::from_proto(42), None);
    }
}
