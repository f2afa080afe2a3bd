use crate::config::RaffleConfig;
use crate::events::RaffleEvent;
use crate::randomness::{RandomWord, RequestId};
use crate::types::ParticipantId;
use crate::{RaffleError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of the round
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundState {
    Open,
    Calculating {
        request_id: RequestId,
        requested_at: DateTime<Utc>,
    },
}

impl RoundState {
    pub fn status(&self) -> RoundStatus {
        match self {
            RoundState::Open => RoundStatus::Open,
            RoundState::Calculating { .. } => RoundStatus::Calculating,
        }
    }

    pub fn pending_request(&self) -> Option<RequestId> {
        match self {
            RoundState::Open => None,
            RoundState::Calculating { request_id, .. } => Some(*request_id),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Open,
    Calculating,
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundStatus::Open => f.write_str("open"),
            RoundStatus::Calculating => f.write_str("calculating"),
        }
    }
}

/// The four conditions gating round closure, evaluated separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Readiness {
    pub is_open: bool,
    pub has_participants: bool,
    pub has_balance: bool,
    pub interval_elapsed: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.is_open && self.has_participants && self.has_balance && self.interval_elapsed
    }
}

/// A winner selection that has been computed but not yet paid out.
///
/// Only [`Round::draw`] builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Draw {
    request_id: RequestId,
    winner_index: usize,
    winner: ParticipantId,
    payout: u64,
}

impl Draw {
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    pub fn winner_index(&self) -> usize {
        self.winner_index
    }

    pub fn winner(&self) -> &ParticipantId {
        &self.winner
    }

    pub fn payout(&self) -> u64 {
        self.payout
    }
}

/// The single, long-lived raffle round.
///
/// Every mutating method either applies completely or returns an error
/// without touching any field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Round {
    config: RaffleConfig,
    state: RoundState,
    participants: Vec<ParticipantId>,
    pooled_balance: u64,
    last_resolution: DateTime<Utc>,
    recent_winner: Option<ParticipantId>,
    round_number: u64,
}

impl Round {
    pub fn new(config: RaffleConfig, now: DateTime<Utc>) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            config,
            state: RoundState::Open,
            participants: Vec::new(),
            pooled_balance: 0,
            last_resolution: now,
            recent_winner: None,
            round_number: 0,
        })
    }

    pub fn config(&self) -> &RaffleConfig {
        &self.config
    }

    pub fn state(&self) -> RoundState {
        self.state
    }

    pub fn participants(&self) -> &[ParticipantId] {
        &self.participants
    }

    pub fn participant(&self, index: usize) -> Option<&ParticipantId> {
        self.participants.get(index)
    }

    pub fn participant_count(&self) -> usize {
        self.participants.len()
    }

    pub fn pooled_balance(&self) -> u64 {
        self.pooled_balance
    }

    pub fn last_resolution(&self) -> DateTime<Utc> {
        self.last_resolution
    }

    pub fn recent_winner(&self) -> Option<&ParticipantId> {
        self.recent_winner.as_ref()
    }

    /// Number of rounds resolved so far.
    pub fn round_number(&self) -> u64 {
        self.round_number
    }

    /// Buy one entry into the current round
    pub fn enter(&mut self, participant: ParticipantId, payment: u64) -> Result<RaffleEvent> {
        if payment < self.config.entry_fee {
            return Err(RaffleError::InsufficientPayment {
                required: self.config.entry_fee,
                provided: payment,
            });
        }

        if !matches!(self.state, RoundState::Open) {
            return Err(RaffleError::RoundClosed);
        }

        let pooled_balance = self
            .pooled_balance
            .checked_add(payment)
            .ok_or(RaffleError::BalanceOverflow)?;

        self.pooled_balance = pooled_balance;
        self.participants.push(participant.clone());

        Ok(RaffleEvent::Entered {
            participant,
            amount: payment,
        })
    }

    pub fn readiness(&self, now: DateTime<Utc>) -> Readiness {
        // a clock behind the anchor counts as "not elapsed"
        let interval_elapsed = now
            .signed_duration_since(self.last_resolution)
            .to_std()
            .map(|elapsed| elapsed > self.config.interval)
            .unwrap_or(false);

        Readiness {
            is_open: matches!(self.state, RoundState::Open),
            has_participants: !self.participants.is_empty(),
            has_balance: self.pooled_balance > 0,
            interval_elapsed,
        }
    }

    pub fn check_readiness(&self, now: DateTime<Utc>) -> bool {
        self.readiness(now).is_ready()
    }

    pub fn ensure_ready(&self, now: DateTime<Utc>) -> Result<()> {
        if self.check_readiness(now) {
            return Ok(());
        }

        Err(RaffleError::UpkeepConditionsNotMet {
            state: self.state.status(),
            participant_count: self.participants.len(),
            balance: self.pooled_balance,
        })
    }

    /// Close the round against an issued randomness request.
    ///
    /// Callers must have checked readiness under the same exclusive borrow.
    pub fn begin_calculating(
        &mut self,
        request_id: RequestId,
        now: DateTime<Utc>,
    ) -> Result<RaffleEvent> {
        self.ensure_ready(now)?;

        self.state = RoundState::Calculating {
            request_id,
            requested_at: now,
        };

        Ok(RaffleEvent::RandomnessRequested { request_id })
    }

    /// Pick the winner for a fulfilment without changing anything.
    pub fn draw(&self, request_id: RequestId, random_words: &[RandomWord]) -> Result<Draw> {
        if self.state.pending_request() != Some(request_id) {
            return Err(RaffleError::UnknownRequest(request_id));
        }

        let word = random_words.first().ok_or(RaffleError::EmptyRandomWords)?;

        let winner_index = word.reduce(self.participants.len()).ok_or_else(|| {
            RaffleError::internal("Calculating round has no participants")
        })?;

        Ok(Draw {
            request_id,
            winner_index,
            winner: self.participants[winner_index].clone(),
            payout: self.pooled_balance,
        })
    }

    /// Apply a paid-out draw and reopen for the next round.
    pub fn settle(&mut self, draw: Draw, now: DateTime<Utc>) -> Result<RaffleEvent> {
        if self.state.pending_request() != Some(draw.request_id) {
            return Err(RaffleError::UnknownRequest(draw.request_id));
        }

        if draw.payout != self.pooled_balance
            || self.participants.get(draw.winner_index) != Some(&draw.winner)
        {
            return Err(RaffleError::internal(format!(
                "Draw for request {} does not match the round",
                draw.request_id
            )));
        }

        self.recent_winner = Some(draw.winner.clone());
        self.participants.clear();
        self.pooled_balance = 0;
        self.last_resolution = now;
        self.state = RoundState::Open;
        self.round_number += 1;

        Ok(RaffleEvent::WinnerPicked {
            winner: draw.winner,
            payout: draw.payout,
            round_number: self.round_number,
        })
    }

    pub fn snapshot(&self) -> RoundSnapshot {
        RoundSnapshot {
            entry_fee: self.config.entry_fee,
            interval: self.config.interval,
            status: self.state.status(),
            pending_request: self.state.pending_request(),
            participants: self.participants.clone(),
            pooled_balance: self.pooled_balance,
            recent_winner: self.recent_winner.clone(),
            last_resolution: self.last_resolution,
            round_number: self.round_number,
        }
    }
}

/// Read-only view of the round for display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundSnapshot {
    pub entry_fee: u64,
    pub interval: Duration,
    pub status: RoundStatus,
    pub pending_request: Option<RequestId>,
    pub participants: Vec<ParticipantId>,
    pub pooled_balance: u64,
    pub recent_winner: Option<ParticipantId>,
    pub last_resolution: DateTime<Utc>,
    pub round_number: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn round() -> Round {
        Round::new(RaffleConfig::new(10, Duration::from_secs(60)), start()).unwrap()
    }

    fn later(secs: i64) -> DateTime<Utc> {
        start() + chrono::Duration::seconds(secs)
    }

    fn closed_round(names: &[&str]) -> (Round, RequestId) {
        let mut round = round();
        for name in names {
            round.enter(ParticipantId::from(*name), 10).unwrap();
        }
        let request_id = RequestId(1);
        round.begin_calculating(request_id, later(61)).unwrap();
        (round, request_id)
    }

    #[test]
    fn test_new_round_is_open_and_empty() {
        let round = round();
        assert_eq!(round.state(), RoundState::Open);
        assert_eq!(round.participant_count(), 0);
        assert_eq!(round.pooled_balance(), 0);
        assert_eq!(round.last_resolution(), start());
        assert!(round.recent_winner().is_none());
    }

    #[test]
    fn test_entries_accumulate_fee() {
        let mut round = round();
        for (i, name) in ["a", "b", "a", "c"].iter().enumerate() {
            let event = round.enter(ParticipantId::from(*name), 10).unwrap();
            assert_eq!(
                event,
                RaffleEvent::Entered {
                    participant: ParticipantId::from(*name),
                    amount: 10
                }
            );
            assert_eq!(round.participant_count(), i + 1);
            assert_eq!(round.pooled_balance(), 10 * (i as u64 + 1));
        }
        assert_eq!(round.participant(2), Some(&ParticipantId::from("a")));
    }

    #[test]
    fn test_overpayment_is_kept() {
        let mut round = round();
        round.enter(ParticipantId::from("a"), 25).unwrap();
        assert_eq!(round.pooled_balance(), 25);
    }

    #[test]
    fn test_underpayment_has_no_effect() {
        let mut round = round();
        let err = round.enter(ParticipantId::from("a"), 9).unwrap_err();
        assert!(matches!(
            err,
            RaffleError::InsufficientPayment {
                required: 10,
                provided: 9
            }
        ));
        assert_eq!(round.participant_count(), 0);
        assert_eq!(round.pooled_balance(), 0);
    }

    #[test]
    fn test_enter_while_calculating_fails() {
        let (mut round, _) = closed_round(&["a"]);
        let err = round.enter(ParticipantId::from("b"), 10).unwrap_err();
        assert!(matches!(err, RaffleError::RoundClosed));
        assert_eq!(round.participant_count(), 1);
        assert_eq!(round.pooled_balance(), 10);
    }

    #[test]
    fn test_readiness_conditions() {
        let mut round = round();
        assert!(!round.check_readiness(later(61)));

        round.enter(ParticipantId::from("a"), 10).unwrap();
        assert!(!round.check_readiness(later(0)));
        // elapsed must be strictly greater than the interval
        assert!(!round.check_readiness(later(60)));
        assert!(round.check_readiness(later(61)));

        let readiness = round.readiness(later(-5));
        assert!(readiness.is_open && readiness.has_participants && readiness.has_balance);
        assert!(!readiness.interval_elapsed);

        round.begin_calculating(RequestId(9), later(61)).unwrap();
        let readiness = round.readiness(later(120));
        assert!(!readiness.is_open);
        assert!(!readiness.is_ready());
    }

    #[test]
    fn test_close_without_participants() {
        let mut round = round();
        let err = round.begin_calculating(RequestId(1), later(61)).unwrap_err();
        match err {
            RaffleError::UpkeepConditionsNotMet {
                state,
                participant_count,
                balance,
            } => {
                assert_eq!(state, RoundStatus::Open);
                assert_eq!(participant_count, 0);
                assert_eq!(balance, 0);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(round.state(), RoundState::Open);
    }

    #[test]
    fn test_second_close_reports_calculating() {
        let (mut round, request_id) = closed_round(&["a", "b"]);
        let err = round.begin_calculating(RequestId(2), later(200)).unwrap_err();
        assert!(matches!(
            err,
            RaffleError::UpkeepConditionsNotMet {
                state: RoundStatus::Calculating,
                participant_count: 2,
                balance: 20
            }
        ));
        assert_eq!(round.state().pending_request(), Some(request_id));
    }

    #[test]
    fn test_draw_maps_word_to_index() {
        let (round, request_id) = closed_round(&["a", "b", "c"]);
        let draw = round.draw(request_id, &[RandomWord::from(5u64)]).unwrap();
        assert_eq!(draw.winner_index(), 2);
        assert_eq!(draw.winner(), &ParticipantId::from("c"));
        assert_eq!(draw.payout(), 30);
        // drawing is read-only
        assert_eq!(round.participant_count(), 3);
    }

    #[test]
    fn test_draw_uses_first_word_only() {
        let (round, request_id) = closed_round(&["a", "b"]);
        let words = [RandomWord::from(4u64), RandomWord::from(1u64)];
        let draw = round.draw(request_id, &words).unwrap();
        assert_eq!(draw.winner(), &ParticipantId::from("a"));
    }

    #[test]
    fn test_draw_rejects_unknown_request_and_empty_words() {
        let (round, request_id) = closed_round(&["a"]);
        assert!(matches!(
            round.draw(RequestId(77), &[RandomWord::from(1u64)]),
            Err(RaffleError::UnknownRequest(RequestId(77)))
        ));
        assert!(matches!(
            round.draw(request_id, &[]),
            Err(RaffleError::EmptyRandomWords)
        ));

        let open = self::round();
        assert!(matches!(
            open.draw(request_id, &[RandomWord::from(1u64)]),
            Err(RaffleError::UnknownRequest(_))
        ));
    }

    #[test]
    fn test_settle_resets_round() {
        let (mut round, request_id) = closed_round(&["a", "b", "c"]);
        let draw = round.draw(request_id, &[RandomWord::from(5u64)]).unwrap();
        let event = round.settle(draw, later(90)).unwrap();

        assert_eq!(
            event,
            RaffleEvent::WinnerPicked {
                winner: ParticipantId::from("c"),
                payout: 30,
                round_number: 1
            }
        );
        assert_eq!(round.state(), RoundState::Open);
        assert_eq!(round.participant_count(), 0);
        assert_eq!(round.pooled_balance(), 0);
        assert_eq!(round.recent_winner(), Some(&ParticipantId::from("c")));
        assert_eq!(round.last_resolution(), later(90));
        assert_eq!(round.round_number(), 1);

        // the interval restarts from the resolution time
        round.enter(ParticipantId::from("d"), 10).unwrap();
        assert!(!round.check_readiness(later(150)));
        assert!(round.check_readiness(later(151)));
    }

    #[test]
    fn test_settle_twice_is_rejected() {
        let (mut round, request_id) = closed_round(&["a"]);
        let draw = round.draw(request_id, &[RandomWord::from(7u64)]).unwrap();
        round.settle(draw.clone(), later(90)).unwrap();
        assert!(matches!(
            round.settle(draw, later(95)),
            Err(RaffleError::UnknownRequest(_))
        ));
        assert_eq!(round.round_number(), 1);
    }

    #[test]
    fn test_settle_rejects_draw_that_does_not_match_round() {
        let (mut round, request_id) = closed_round(&["a", "b"]);
        let draw = round.draw(request_id, &[RandomWord::from(1u64)]).unwrap();

        let short_payout = Draw {
            payout: 1,
            ..draw.clone()
        };
        assert!(matches!(
            round.settle(short_payout, later(90)),
            Err(RaffleError::Internal(_))
        ));

        let outsider = Draw {
            winner: ParticipantId::from("mallory"),
            ..draw.clone()
        };
        assert!(matches!(
            round.settle(outsider, later(90)),
            Err(RaffleError::Internal(_))
        ));

        assert_eq!(round.state().pending_request(), Some(request_id));
        assert_eq!(round.pooled_balance(), 20);
        assert_eq!(round.participant_count(), 2);

        round.settle(draw, later(90)).unwrap();
        assert_eq!(round.recent_winner(), Some(&ParticipantId::from("b")));
    }

    #[test]
    fn test_snapshot_keeps_sub_second_interval() {
        let round = Round::new(RaffleConfig::new(10, Duration::from_millis(1500)), start())
            .unwrap();
        assert_eq!(round.snapshot().interval, Duration::from_millis(1500));
    }

    #[test]
    fn test_snapshot_reflects_state() {
        let (round, request_id) = closed_round(&["a", "b"]);
        let snapshot = round.snapshot();
        assert_eq!(snapshot.status, RoundStatus::Calculating);
        assert_eq!(snapshot.pending_request, Some(request_id));
        assert_eq!(snapshot.pooled_balance, 20);
        assert_eq!(snapshot.interval, Duration::from_secs(60));

        let json = serde_json::to_string(&snapshot).unwrap();
        let back: RoundSnapshot = serde_json::from_str(&json).unwrap();
        assert_eq!(back, snapshot);
    }
}
