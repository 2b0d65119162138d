//! Turn arbitration
//!
//! In turn-based mode an exclusive token controls who may advance the
//! session. Requests never queue: they return a grant or a denial naming
//! the current holder, immediately.

use chrono::{DateTime, Utc};

use duet_core::{CheckinSession, CommandError};
use duet_protocol::{ParticipantId, ServerEvent, SessionStatus};

/// Whether `participant` may issue step-mutating commands right now.
///
/// Free mode: always. Turn-based mode: only the current token holder;
/// with no holder, nobody qualifies until someone requests the turn.
pub fn can_modify(session: &CheckinSession, participant: &ParticipantId) -> bool {
    !session.turn_based_mode || session.current_turn_holder.as_ref() == Some(participant)
}

/// Denial for a step-mutating command in turn-based mode
pub fn modify_denied(session: &CheckinSession) -> CommandError {
    match &session.current_turn_holder {
        Some(holder) => CommandError::TurnDenied {
            holder: holder.clone(),
        },
        None => CommandError::InvalidState(
            "turn-based session requires holding the turn; request it first".to_string(),
        ),
    }
}

/// Claim the turn token.
///
/// Succeeds iff nobody holds it or the requester already does; a denial
/// leaves the holder untouched.
pub fn request_turn(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    now: DateTime<Utc>,
) -> Result<ServerEvent, CommandError> {
    if !session.turn_based_mode {
        return Err(CommandError::InvalidState(
            "session is not in turn-based mode".to_string(),
        ));
    }
    if session.status != SessionStatus::InProgress {
        return Err(CommandError::InvalidState(format!(
            "cannot request the turn while session is {}",
            session.status
        )));
    }

    if let Some(holder) = &session.current_turn_holder {
        if holder != participant {
            return Err(CommandError::TurnDenied {
                holder: holder.clone(),
            });
        }
    }

    session.current_turn_holder = Some(participant.clone());
    session.turn_started_at = Some(now);
    session.touch(now);

    tracing::debug!("Turn in session {} granted to {}", session.id, participant);
    Ok(ServerEvent::TurnChanged {
        holder_id: participant.clone(),
    })
}

/// Give the turn token back. Only the holder can.
pub fn release_turn(
    session: &mut CheckinSession,
    participant: &ParticipantId,
    now: DateTime<Utc>,
) -> Result<ServerEvent, CommandError> {
    match &session.current_turn_holder {
        Some(holder) if holder == participant => {
            session.current_turn_holder = None;
            session.turn_started_at = None;
            session.touch(now);

            tracing::debug!("Turn in session {} released by {}", session.id, participant);
            Ok(ServerEvent::TurnReleased {
                by: participant.clone(),
            })
        }
        Some(holder) => Err(CommandError::TurnDenied {
            holder: holder.clone(),
        }),
        None => Err(CommandError::InvalidState(
            "no turn is currently held".to_string(),
        )),
    }
}
