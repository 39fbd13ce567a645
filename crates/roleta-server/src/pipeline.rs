//! Per-spin decision pipeline.
//!
//! Pure with respect to I/O: the handler acquires the state lock,
//! calls [`handle_spin`], then performs snapshot and decision-log
//! writes around the result. Stage order matters and is fixed:
//! resolve the pending prediction, record the new force, predict for
//! the opposite direction, advise, combine, stash the next pending.

use serde::Serialize;

use roleta_core::{
    advisor::TripleRateAdvisor, predictor, wheel, BetAdvice, Direction, MartingaleUpdate,
    SdaAnalysis, WheelError,
};

use crate::state::{GameState, Pending, Prediction, Spin};

/// Final action for a spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Action {
    #[serde(rename = "APOSTAR")]
    Apostar,
    #[serde(rename = "PULAR")]
    Pular,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Apostar => "APOSTAR",
            Action::Pular => "PULAR",
        }
    }
}

/// Resolution of the previous spin's pending prediction.
#[derive(Debug, Clone)]
pub struct Resolution {
    pub prediction: Prediction,
    pub hit: bool,
    pub bet_placed: bool,
    /// Present only for placed bets.
    pub martingale: Option<MartingaleUpdate>,
    /// Signed wrapped error between predicted and actual force, when
    /// the spin direction matches the prediction's.
    pub calibration_error: Option<i16>,
    /// Calibration offset for the prediction's direction after the
    /// update.
    pub calibration_offset: i16,
}

/// Everything one pipeline pass produced.
#[derive(Debug, Clone)]
pub struct SpinOutcome {
    /// Force recorded for this spin; absent on the first spin.
    pub force: Option<u8>,
    pub resolution: Option<Resolution>,
    pub target_direction: Direction,
    pub analysis: SdaAnalysis,
    pub advice: BetAdvice,
    pub action: Action,
    pub action_reason: String,
}

/// Run one pipeline pass. The caller holds the state lock and has
/// already filtered duplicates.
pub fn handle_spin(state: &mut GameState, spin: &Spin) -> Result<SpinOutcome, WheelError> {
    wheel::validate(spin.numero)?;

    // Resolve the outstanding prediction against this spin. Only
    // placed bets feed performance history and the Martingale tracker.
    let mut resolution = match std::mem::take(&mut state.pending) {
        Pending::None => None,
        Pending::Bet(prediction) => {
            let hit = prediction.contains(spin.numero);
            state.performance_mut(prediction.direction).push(hit);
            let update = state.martingale_mut(prediction.direction).record_play(hit);
            Some(Resolution {
                calibration_offset: state.calibration(prediction.direction).offset(),
                prediction,
                hit,
                bet_placed: true,
                martingale: Some(update),
                calibration_error: None,
            })
        }
        Pending::Shadow(prediction) => {
            let hit = prediction.contains(spin.numero);
            Some(Resolution {
                calibration_offset: state.calibration(prediction.direction).offset(),
                prediction,
                hit,
                bet_placed: false,
                martingale: None,
                calibration_error: None,
            })
        }
    };

    // Record the force of this spin on its own direction's timeline.
    let force = match state.last_number {
        Some(prev) => Some(wheel::force(prev, spin.numero, spin.direction)?),
        None => None,
    };
    if let Some(f) = force {
        state.timeline_mut(spin.direction).push(f);
    }

    // Fold the prediction error into that direction's calibration.
    if let (Some(res), Some(f)) = (resolution.as_mut(), force) {
        if res.prediction.direction == spin.direction {
            let error = wheel::signed_force_error(res.prediction.predicted_force, f);
            let offset = state.calibration_mut(spin.direction).update(error);
            res.calibration_error = Some(error);
            res.calibration_offset = offset;
        }
    }

    state.last_number = Some(spin.numero);
    state.last_direction = Some(spin.direction);
    state.note_spin_key(spin);

    // The croupier alternates, so the next spin runs the other way.
    let target = spin.direction.opposite();
    let analysis = predictor::analyze(
        state.timeline(target),
        spin.numero,
        state.calibration(target).offset(),
    )?;
    let advice = TripleRateAdvisor::new().analyze(state.performance(target));

    let (action, action_reason, pending) = if analysis.should_bet && advice.should_bet {
        (
            Action::Apostar,
            advice.reason.clone(),
            Pending::Bet(build_prediction(&analysis, &advice, target)),
        )
    } else if analysis.should_bet {
        // Vetoed by the advisor: keep a shadow prediction so the veto
        // itself can be scored against the actual outcome.
        (
            Action::Pular,
            format!("triple rate: {}", advice.reason),
            Pending::Shadow(build_prediction(&analysis, &advice, target)),
        )
    } else {
        let reason = analysis
            .reason
            .clone()
            .unwrap_or_else(|| "sem analise".to_string());
        (Action::Pular, reason, Pending::None)
    };
    state.pending = pending;

    Ok(SpinOutcome {
        force,
        resolution,
        target_direction: target,
        analysis,
        advice,
        action,
        action_reason,
    })
}

fn build_prediction(analysis: &SdaAnalysis, advice: &BetAdvice, target: Direction) -> Prediction {
    Prediction {
        numbers: analysis.numbers.clone(),
        center: analysis.center,
        direction: target,
        predicted_force: analysis.predicted_force,
        tr_confidence: advice.confidence,
        tr_reason: advice.reason.clone(),
        sda_score: analysis.score,
    }
}

/// Rebuild timelines from a newest-first history dump by replaying it
/// oldest-first. Returns the number of entries applied.
pub fn replay_history(
    state: &mut GameState,
    newest_first: &[(u8, Direction)],
) -> Result<usize, WheelError> {
    for &(numero, _) in newest_first {
        wheel::validate(numero)?;
    }
    let mut applied = 0;
    for &(numero, direction) in newest_first.iter().rev() {
        if let Some(prev) = state.last_number {
            let f = wheel::force(prev, numero, direction)?;
            state.timeline_mut(direction).push(f);
        }
        state.last_number = Some(numero);
        state.last_direction = Some(direction);
        applied += 1;
    }
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use roleta_core::{Confidence, Transition, FORCES_ANALYZED};

    fn spin(numero: u8, direction: Direction, t: i64) -> Spin {
        Spin {
            numero,
            direction,
            timestamp_ms: t,
        }
    }

    fn seed_target_timeline(state: &mut GameState, direction: Direction, newest_first: &[u8]) {
        for &f in newest_first.iter().rev() {
            state.timeline_mut(direction).push(f);
        }
    }

    #[test]
    fn test_first_spin_records_no_force() {
        let mut state = GameState::new();
        let outcome =
            handle_spin(&mut state, &spin(17, Direction::Clockwise, 1_000)).unwrap();
        assert_eq!(outcome.force, None);
        assert!(state.timeline(Direction::Clockwise).is_empty());
        assert_eq!(state.last_number, Some(17));
        assert_eq!(outcome.action, Action::Pular);
    }

    #[test]
    fn test_second_spin_appends_force_to_own_direction() {
        let mut state = GameState::new();
        handle_spin(&mut state, &spin(0, Direction::Clockwise, 1_000)).unwrap();
        let outcome =
            handle_spin(&mut state, &spin(32, Direction::Counterclockwise, 2_000)).unwrap();
        // 32 sits one slot clockwise of 0, so 36 counter-clockwise.
        assert_eq!(outcome.force, Some(36));
        assert_eq!(state.timeline(Direction::Counterclockwise).forces(), &[36]);
        assert!(state.timeline(Direction::Clockwise).is_empty());
    }

    #[test]
    fn test_invalid_number_rejected_without_mutation() {
        let mut state = GameState::new();
        handle_spin(&mut state, &spin(10, Direction::Clockwise, 1_000)).unwrap();
        let err = handle_spin(&mut state, &spin(99, Direction::Clockwise, 2_000));
        assert!(err.is_err());
        assert_eq!(state.last_number, Some(10));
    }

    #[test]
    fn test_bet_stored_when_both_layers_agree() {
        let mut state = GameState::new();
        // Clockwise spin targets the counter-clockwise timeline.
        seed_target_timeline(
            &mut state,
            Direction::Counterclockwise,
            &[22, 13, 12, 14, 33],
        );
        let outcome = handle_spin(&mut state, &spin(30, Direction::Clockwise, 1_000)).unwrap();

        assert!(outcome.analysis.should_bet);
        // Fewer than 4 performance results: advisor defaults to bet.
        assert!(outcome.advice.should_bet);
        assert_eq!(outcome.action, Action::Apostar);
        assert_eq!(outcome.target_direction, Direction::Counterclockwise);

        match &state.pending {
            Pending::Bet(pred) => {
                assert_eq!(pred.numbers.len(), 17);
                assert!(pred.numbers.contains(&pred.center));
                assert_eq!(pred.direction, Direction::Counterclockwise);
                assert_eq!(
                    pred.center,
                    wheel::project(30, pred.predicted_force, Direction::Counterclockwise)
                        .unwrap()
                );
            }
            other => panic!("expected a placed bet, got {:?}", other),
        }
    }

    #[test]
    fn test_advisor_veto_stores_shadow() {
        let mut state = GameState::new();
        seed_target_timeline(
            &mut state,
            Direction::Counterclockwise,
            &[22, 13, 12, 14, 33],
        );
        // Cold streak on the target direction: 4 misses then 8 hits.
        for &hit in [true, true, true, true, true, true, true, true, false, false, false, false]
            .iter()
        {
            state.performance_mut(Direction::Counterclockwise).push(hit);
        }

        let outcome = handle_spin(&mut state, &spin(30, Direction::Clockwise, 1_000)).unwrap();
        assert_eq!(outcome.action, Action::Pular);
        assert!(outcome.action_reason.contains("cold streak"));
        assert_eq!(outcome.advice.confidence, Confidence::Baixa);
        assert!(matches!(state.pending, Pending::Shadow(_)));
    }

    #[test]
    fn test_insufficient_forces_stores_nothing() {
        let mut state = GameState::new();
        let outcome = handle_spin(&mut state, &spin(30, Direction::Clockwise, 1_000)).unwrap();
        assert!(!outcome.analysis.should_bet);
        assert!(outcome.action_reason.contains("insuficientes"));
        assert!(state.pending.is_none());
    }

    #[test]
    fn test_placed_bet_resolution_updates_performance_and_martingale() {
        let mut state = GameState::new();
        state.last_number = Some(30);
        state.pending = Pending::Bet(Prediction {
            numbers: wheel::neighbours(11, 8).unwrap(),
            center: 11,
            direction: Direction::Counterclockwise,
            predicted_force: 19,
            tr_confidence: Confidence::Alta,
            tr_reason: "crescente".to_string(),
            sda_score: 4,
        });

        // 11 is inside the region: a hit.
        let outcome =
            handle_spin(&mut state, &spin(11, Direction::Counterclockwise, 1_000)).unwrap();
        let res = outcome.resolution.unwrap();
        assert!(res.hit);
        assert!(res.bet_placed);
        assert_eq!(state.performance(Direction::Counterclockwise).results(), &[true]);

        let update = res.martingale.unwrap();
        assert_eq!(update.window_hits, 1);
        assert_eq!(update.window_count, 1);
        assert_eq!(update.transition, None);
        assert_eq!(state.martingale(Direction::Counterclockwise).window_count(), 1);
    }

    #[test]
    fn test_shadow_resolution_leaves_trackers_alone() {
        let mut state = GameState::new();
        state.last_number = Some(30);
        state.pending = Pending::Shadow(Prediction {
            numbers: wheel::neighbours(11, 8).unwrap(),
            center: 11,
            direction: Direction::Counterclockwise,
            predicted_force: 19,
            tr_confidence: Confidence::Baixa,
            tr_reason: "cold streak".to_string(),
            sda_score: 4,
        });

        let outcome =
            handle_spin(&mut state, &spin(11, Direction::Counterclockwise, 1_000)).unwrap();
        let res = outcome.resolution.unwrap();
        assert!(res.hit);
        assert!(!res.bet_placed);
        assert!(res.martingale.is_none());
        assert!(state.performance(Direction::Counterclockwise).is_empty());
        assert_eq!(state.martingale(Direction::Counterclockwise).window_count(), 0);
    }

    #[test]
    fn test_resolution_updates_calibration() {
        let mut state = GameState::new();
        state.last_number = Some(30);
        state.pending = Pending::Bet(Prediction {
            numbers: wheel::neighbours(11, 8).unwrap(),
            center: 11,
            direction: Direction::Counterclockwise,
            predicted_force: 19,
            tr_confidence: Confidence::Alta,
            tr_reason: "crescente".to_string(),
            sda_score: 4,
        });

        let outcome =
            handle_spin(&mut state, &spin(11, Direction::Counterclockwise, 1_000)).unwrap();
        let actual = wheel::force(30, 11, Direction::Counterclockwise).unwrap();
        let expected_error = wheel::signed_force_error(19, actual);
        let res = outcome.resolution.unwrap();
        assert_eq!(res.calibration_error, Some(expected_error));
        assert_eq!(
            res.calibration_offset,
            state.calibration(Direction::Counterclockwise).offset()
        );
    }

    #[test]
    fn test_window_escalation_over_five_resolved_bets() {
        // One hit then four misses on the same direction: SUBINDO.
        let mut state = GameState::new();
        state.last_number = Some(0);
        let mut last_transition = None;
        for (i, &hit) in [true, false, false, false, false].iter().enumerate() {
            // Force a pending bet on the clockwise direction; the
            // region either contains 5 or sits on the far side of the
            // wheel from it.
            let center = if hit { 5 } else { 0 };
            state.pending = Pending::Bet(Prediction {
                numbers: wheel::neighbours(center, 8).unwrap(),
                center,
                direction: Direction::Clockwise,
                predicted_force: 10,
                tr_confidence: Confidence::Media,
                tr_reason: "estavel".to_string(),
                sda_score: 3,
            });
            let outcome =
                handle_spin(&mut state, &spin(5, Direction::Clockwise, (i as i64 + 1) * 1_000))
                    .unwrap();
            last_transition = outcome.resolution.unwrap().martingale.unwrap().transition;
        }
        assert_eq!(last_transition, Some(Transition::Subindo));
        assert_eq!(state.martingale(Direction::Clockwise).level(), 2);
        assert_eq!(state.martingale(Direction::Clockwise).window_count(), 0);
    }

    #[test]
    fn test_replay_history_matches_one_by_one() {
        let sequence = [
            (12, Direction::Clockwise),
            (25, Direction::Counterclockwise),
            (3, Direction::Clockwise),
            (30, Direction::Counterclockwise),
        ];

        let mut replayed = GameState::new();
        let mut newest_first: Vec<(u8, Direction)> = sequence.to_vec();
        newest_first.reverse();
        let applied = replay_history(&mut replayed, &newest_first).unwrap();
        assert_eq!(applied, 4);

        let mut stepped = GameState::new();
        for (i, &(numero, direction)) in sequence.iter().enumerate() {
            handle_spin(&mut stepped, &spin(numero, direction, (i as i64 + 1) * 1_000)).unwrap();
        }

        for dir in [Direction::Clockwise, Direction::Counterclockwise] {
            assert_eq!(replayed.timeline(dir).forces(), stepped.timeline(dir).forces());
        }
        assert_eq!(replayed.last_number, stepped.last_number);
    }

    #[test]
    fn test_history_shorter_than_window_skips_prediction() {
        let mut state = GameState::new();
        let newest_first: Vec<(u8, Direction)> = (0..FORCES_ANALYZED as u8 - 1)
            .map(|n| (n, Direction::Clockwise))
            .collect();
        replay_history(&mut state, &newest_first).unwrap();
        let outcome = handle_spin(&mut state, &spin(20, Direction::Counterclockwise, 1_000))
            .unwrap();
        assert!(!outcome.analysis.should_bet);
    }
}
