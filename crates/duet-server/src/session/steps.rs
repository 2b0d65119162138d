//! Step progression and session lifecycle
//!
//! Steps are explicit jumps within the fixed step set; back-navigation is
//! allowed. Every step-mutating command passes the turn gate first. The
//! `complete` transition is terminal: it computes metrics, stamps the
//! session, and closes it to all further mutation.

use chrono::{DateTime, Utc};

use duet_core::{CheckinSession, CommandError};
use duet_protocol::{
    CheckinStep, CompletionSummary, ParticipantId, ServerEvent, SessionMetrics, SessionStatus,
    StepCompletion,
};

use crate::session::{metrics, turn};

/// Jump the session to `step_name`.
///
/// Folds the time spent on the outgoing step into `step_durations` and
/// re-stamps `step_started_at` for the incoming one.
pub fn advance_step(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    step_name: &str,
    now: DateTime<Utc>,
) -> Result<ServerEvent, CommandError> {
    let new_step = CheckinStep::parse(step_name)
        .ok_or_else(|| CommandError::UnknownStep(step_name.to_string()))?;

    if session.status != SessionStatus::InProgress {
        return Err(CommandError::InvalidState(format!(
            "cannot advance steps while session is {}",
            session.status
        )));
    }
    if !turn::can_modify(session, participant) {
        return Err(turn::modify_denied(session));
    }

    if let Some(step_started) = session.step_started_at {
        let elapsed = (now - step_started).num_milliseconds().max(0);
        *session.step_durations.entry(session.current_step).or_insert(0) += elapsed;
    }

    session.current_step = new_step;
    session.step_started_at = Some(now);
    session.touch(now);

    tracing::debug!(
        "Session {} moved to step {} by {}",
        session.id,
        new_step,
        participant
    );
    Ok(ServerEvent::StepChanged {
        new_step,
        by: participant.clone(),
    })
}

/// Record completion of the current step without leaving it
pub fn complete_step(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    now: DateTime<Utc>,
) -> Result<ServerEvent, CommandError> {
    if session.status != SessionStatus::InProgress {
        return Err(CommandError::InvalidState(format!(
            "cannot complete a step while session is {}",
            session.status
        )));
    }
    if !turn::can_modify(session, participant) {
        return Err(turn::modify_denied(session));
    }

    let duration_ms = session
        .step_started_at
        .map(|started| (now - started).num_milliseconds().max(0))
        .unwrap_or(0);

    session.step_completions.push(StepCompletion {
        step: session.current_step,
        completed_at: now,
        duration_ms,
    });
    session.touch(now);

    Ok(ServerEvent::StepCompleted {
        step: session.current_step,
        duration_ms,
    })
}

/// Explicitly pause an in-progress session
pub fn pause(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    now: DateTime<Utc>,
) -> Result<ServerEvent, CommandError> {
    if session.status != SessionStatus::InProgress {
        return Err(CommandError::InvalidState(format!(
            "cannot pause a session that is {}",
            session.status
        )));
    }
    if !turn::can_modify(session, participant) {
        return Err(turn::modify_denied(session));
    }

    session.status = SessionStatus::Paused;
    session.paused_at = Some(now);
    // A paused session holds no turn token
    session.current_turn_holder = None;
    session.turn_started_at = None;
    session.touch(now);

    tracing::info!("Session {} paused by {}", session.id, participant);
    Ok(ServerEvent::SessionPaused {
        by: participant.clone(),
    })
}

/// Resume a paused session.
///
/// Pausing always surrenders the turn token, so there is never a holder
/// to defend the gate here: any member may resume, and in turn-based
/// mode the turn must then be re-requested.
pub fn resume(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    now: DateTime<Utc>,
) -> Result<ServerEvent, CommandError> {
    if session.status != SessionStatus::Paused {
        return Err(CommandError::InvalidState(format!(
            "cannot resume a session that is {}",
            session.status
        )));
    }
    if session.turn_based_mode && !turn::can_modify(session, participant) {
        if let Some(holder) = &session.current_turn_holder {
            return Err(CommandError::TurnDenied {
                holder: holder.clone(),
            });
        }
    }

    session.status = SessionStatus::InProgress;
    session.paused_at = None;
    session.touch(now);

    tracing::info!("Session {} resumed by {}", session.id, participant);
    Ok(ServerEvent::SessionResumed {
        by: participant.clone(),
    })
}

/// Finish the session. Terminal: computes and stores metrics, after which
/// the store refuses every further mutation with `SessionClosed`.
///
/// A paused session cannot complete; it must be resumed first.
pub fn complete(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    summary: &CompletionSummary,
    now: DateTime<Utc>,
) -> Result<(SessionMetrics, ServerEvent), CommandError> {
    if session.status != SessionStatus::InProgress {
        return Err(CommandError::InvalidState(format!(
            "cannot complete a session that is {}",
            session.status
        )));
    }
    if !turn::can_modify(session, participant) {
        return Err(turn::modify_denied(session));
    }

    if let Some(elapsed) = summary.elapsed_seconds {
        session.elapsed_seconds = elapsed;
    }

    session.status = SessionStatus::Completed;
    session.completed_at = Some(now);
    session.current_turn_holder = None;
    session.turn_started_at = None;

    let computed = metrics::calculate(session, participant, now);
    session.metrics = Some(computed.clone());
    session.touch(now);

    tracing::info!(
        "Session {} completed by {}: {} notes, {} steps, balance {:.3}",
        session.id,
        participant,
        computed.notes_created,
        computed.steps_completed,
        computed.participation_balance
    );

    let event = ServerEvent::SessionCompleted {
        metrics: computed.clone(),
    };
    Ok((computed, event))
}
