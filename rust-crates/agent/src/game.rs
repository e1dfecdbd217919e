//! First-to-N dice scoring.

use chrono::{
    DateTime,
    Utc,
};
use rand::Rng;
use serde::{
    Deserialize,
    Serialize,
};

/// Uniform roll of a six-sided die from the thread-local CSPRNG.
pub fn roll_die() -> u8 {
    rand::rng().random_range(1..=6)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bot,
    Opponent,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub bot: u32,
    pub opponent: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    pub n: u32,
    pub bot_roll: u8,
    pub opponent_roll: u8,
    /// `None` on a tie that scored for nobody.
    pub winner: Option<Side>,
    pub scores_after: Scores,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameTracker {
    pub wins_needed: u32,
    pub bot_wins_ties: bool,
    pub bot_goes_first: bool,
    pub scores: Scores,
    pub rounds: Vec<Round>,
    pub pending_bot_roll: Option<u8>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub winner: Option<Side>,
}

impl GameTracker {
    pub fn new(
        wins_needed: u32,
        bot_wins_ties: bool,
        bot_goes_first: bool,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            wins_needed,
            bot_wins_ties,
            bot_goes_first,
            scores: Scores::default(),
            rounds: Vec::new(),
            pending_bot_roll: None,
            started_at: now,
            completed_at: None,
            winner: None,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.winner.is_some()
    }

    /// Whether the bot owes a declared roll before the opponent's next one.
    pub fn awaits_bot_declaration(&self) -> bool {
        self.bot_goes_first && !self.is_complete() && self.pending_bot_roll.is_none()
    }

    /// Store a roll announced ahead of the opponent's. An already pending roll is
    /// kept, never replaced.
    pub fn declare_bot_roll(&mut self, value: u8) -> u8 {
        *self.pending_bot_roll.get_or_insert(value)
    }

    /// Pair the opponent's roll with the pending bot roll, or with a roll made
    /// now when none is pending.
    pub fn record_opponent_roll(
        &mut self,
        opponent_roll: u8,
        roll_now: impl FnOnce() -> u8,
        now: DateTime<Utc>,
    ) -> Option<Round> {
        if self.is_complete() {
            return None;
        }
        let bot_roll = self.pending_bot_roll.take().unwrap_or_else(roll_now);
        let winner = self.round_winner(bot_roll, opponent_roll);
        match winner {
            Some(Side::Bot) => self.scores.bot += 1,
            Some(Side::Opponent) => self.scores.opponent += 1,
            None => {}
        }
        let round = Round {
            n: self.rounds.len() as u32 + 1,
            bot_roll,
            opponent_roll,
            winner,
            scores_after: self.scores,
            at: now,
        };
        self.rounds.push(round.clone());

        if self.scores.bot >= self.wins_needed {
            self.finish(Side::Bot, now);
        } else if self.scores.opponent >= self.wins_needed {
            self.finish(Side::Opponent, now);
        }
        Some(round)
    }

    fn round_winner(&self, bot_roll: u8, opponent_roll: u8) -> Option<Side> {
        if bot_roll > opponent_roll {
            Some(Side::Bot)
        } else if opponent_roll > bot_roll {
            Some(Side::Opponent)
        } else if self.bot_wins_ties {
            Some(Side::Bot)
        } else {
            None
        }
    }

    fn finish(&mut self, winner: Side, now: DateTime<Utc>) {
        self.winner = Some(winner);
        self.completed_at = Some(now);
        self.pending_bot_roll = None;
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use proptest::prelude::*;

    fn tracker(bot_first: bool) -> GameTracker {
        GameTracker::new(5, true, bot_first, Utc::now())
    }

    #[test]
    fn roll_die__stays_on_the_die() {
        for _ in 0..1_000 {
            assert!((1..=6).contains(&roll_die()));
        }
    }

    #[test]
    fn record_opponent_roll__consumes_pending_roll_without_rerolling() {
        // given
        let mut game = tracker(true);
        game.declare_bot_roll(5);

        // when
        let round = game
            .record_opponent_roll(3, || panic!("must not re-roll"), Utc::now())
            .unwrap();

        // then
        assert_eq!(round.bot_roll, 5);
        assert_eq!(round.winner, Some(Side::Bot));
        assert_eq!(game.scores, Scores { bot: 1, opponent: 0 });
        assert_eq!(game.pending_bot_roll, None);
        assert!(game.awaits_bot_declaration());
    }

    #[test]
    fn declare_bot_roll__keeps_existing_pending_value() {
        let mut game = tracker(true);

        assert_eq!(game.declare_bot_roll(2), 2);
        assert_eq!(game.declare_bot_roll(6), 2);
    }

    #[test]
    fn record_opponent_roll__rolls_now_when_opponent_goes_first() {
        let mut game = tracker(false);

        let round = game.record_opponent_roll(4, || 1, Utc::now()).unwrap();

        assert_eq!(round.winner, Some(Side::Opponent));
        assert!(!game.awaits_bot_declaration());
    }

    #[test]
    fn record_opponent_roll__tie_scores_only_when_bot_wins_ties() {
        let mut ties_to_bot = GameTracker::new(5, true, false, Utc::now());
        let mut ties_void = GameTracker::new(5, false, false, Utc::now());

        ties_to_bot.record_opponent_roll(3, || 3, Utc::now());
        let void = ties_void.record_opponent_roll(3, || 3, Utc::now()).unwrap();

        assert_eq!(ties_to_bot.scores.bot, 1);
        assert_eq!(void.winner, None);
        assert_eq!(ties_void.scores, Scores::default());
        assert_eq!(ties_void.rounds.len(), 1);
    }

    #[test]
    fn record_opponent_roll__completes_at_wins_needed_and_stops() {
        // given
        let mut game = tracker(false);

        // when
        for _ in 0..5 {
            game.record_opponent_roll(1, || 6, Utc::now());
        }

        // then
        assert_eq!(game.winner, Some(Side::Bot));
        assert!(game.completed_at.is_some());
        assert_eq!(game.record_opponent_roll(6, || 1, Utc::now()), None);
        assert_eq!(game.rounds.len(), 5);
    }

    #[test]
    fn serde__tracker_survives_a_restart_mid_round() {
        // given
        let mut game = tracker(true);
        game.declare_bot_roll(4);
        game.record_opponent_roll(2, || 1, Utc::now());
        game.declare_bot_roll(6);

        // when
        let json = serde_json::to_string(&game).unwrap();
        let restored: GameTracker = serde_json::from_str(&json).unwrap();

        // then
        assert_eq!(restored, game);
        assert!(json.contains("\"pendingBotRoll\":6"));
    }

    proptest! {
        #[test]
        fn record_opponent_roll__scores_never_exceed_wins_needed(
            rolls in proptest::collection::vec((1u8..=6, 1u8..=6), 0..60),
            ties in any::<bool>(),
        ) {
            let mut game = GameTracker::new(5, ties, false, Utc::now());
            for (bot, opponent) in rolls {
                game.record_opponent_roll(opponent, || bot, Utc::now());
            }
            prop_assert!(game.scores.bot <= 5 && game.scores.opponent <= 5);
            prop_assert_eq!(
                game.is_complete(),
                game.scores.bot == 5 || game.scores.opponent == 5
            );
        }
    }
}
