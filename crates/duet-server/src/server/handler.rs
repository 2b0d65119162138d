//! Per-connection command handling
//!
//! Each client speaks line-delimited JSON over its own TCP connection.
//! Before a `join` the connection may only provision sessions and ping;
//! after a successful join it holds exactly one session subscription and
//! receives that session's broadcast events interleaved with its command
//! replies. Membership is checked at join time, before any session state
//! is touched, and an unauthorized join refuses the connection outright.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use duet_core::CommandError;
use duet_protocol::{ClientCommand, CommandReply, ParticipantId, ServerEvent, SessionId};

use crate::coordinator::Coordinator;

/// Subscription state for one client connection
struct ClientState {
    /// Set while the connection is subscribed to a session
    joined: Option<(SessionId, ParticipantId)>,
}

/// Handle one client connection until it closes.
///
/// Whatever way the connection ends - explicit leave, EOF, or an I/O
/// error mid-command - a still-subscribed participant is withdrawn from
/// their session exactly once.
pub async fn handle_client(stream: TcpStream, coordinator: Arc<Coordinator>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut client = ClientState { joined: None };

    let result = drive(&mut reader, &mut writer, &coordinator, &mut client).await;

    if let Some((session_id, participant)) = client.joined.take() {
        tracing::debug!("Connection for {} closed, leaving session {}", participant, session_id);
        if let Err(e) = coordinator.leave(&session_id, &participant).await {
            // A session that completed while we were connected is
            // immutable; there is no presence left to clean up.
            tracing::debug!("Leave on disconnect ignored: {}", e);
        }
    }

    result
}

async fn drive(
    reader: &mut BufReader<OwnedReadHalf>,
    writer: &mut OwnedWriteHalf,
    coordinator: &Arc<Coordinator>,
    client: &mut ClientState,
) -> Result<()> {
    let mut line = String::new();

    'connection: loop {
        // Unsubscribed phase: wait for a join
        let (mut event_rx, session_id, participant) = loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                return Ok(());
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            match serde_json::from_str::<ClientCommand>(trimmed) {
                Ok(ClientCommand::Join {
                    session_id,
                    participant_id,
                }) => match coordinator.join(&session_id, &participant_id).await {
                    Ok((snapshot, event_rx)) => {
                        send_reply(writer, &CommandReply::Joined { session: snapshot }).await?;
                        break (event_rx, session_id, participant_id);
                    }
                    Err(e @ CommandError::Unauthorized(_)) => {
                        // Membership is enforced at the transport
                        // boundary; refuse the connection.
                        tracing::warn!(
                            "Rejected join of session {} by non-member {}",
                            session_id,
                            participant_id
                        );
                        send_reply(writer, &reply_for_error(&e)).await?;
                        return Ok(());
                    }
                    Err(e) => {
                        send_reply(writer, &reply_for_error(&e)).await?;
                    }
                },
                Ok(ClientCommand::Leave) => {
                    send_reply(
                        writer,
                        &CommandReply::Error {
                            kind: "unauthorized".to_string(),
                            message: "connection is not subscribed to a session".to_string(),
                        },
                    )
                    .await?;
                }
                Ok(command) => {
                    let reply = handle_command(command, coordinator, None).await;
                    send_reply(writer, &reply).await?;
                }
                Err(e) => {
                    send_reply(writer, &malformed(&e)).await?;
                }
            }
        };

        client.joined = Some((session_id.clone(), participant.clone()));
        tracing::debug!("{} subscribed to session {}", participant, session_id);

        // Subscribed phase: commands and broadcast events interleave
        loop {
            line.clear();
            tokio::select! {
                result = reader.read_line(&mut line) => {
                    match result {
                        Ok(0) => return Ok(()),
                        Ok(_) => {
                            let trimmed = line.trim();
                            if trimmed.is_empty() {
                                continue;
                            }

                            match serde_json::from_str::<ClientCommand>(trimmed) {
                                Ok(ClientCommand::Leave) => {
                                    client.joined = None;
                                    let reply = match coordinator.leave(&session_id, &participant).await {
                                        Ok(()) => CommandReply::Ok,
                                        Err(e) => reply_for_error(&e),
                                    };
                                    send_reply(writer, &reply).await?;
                                    continue 'connection;
                                }
                                Ok(ClientCommand::Join { .. }) => {
                                    send_reply(
                                        writer,
                                        &CommandReply::Error {
                                            kind: "invalid_state".to_string(),
                                            message: "connection is already subscribed to a session"
                                                .to_string(),
                                        },
                                    )
                                    .await?;
                                }
                                Ok(command) => {
                                    let reply = handle_command(
                                        command,
                                        coordinator,
                                        Some((&session_id, &participant)),
                                    )
                                    .await;
                                    send_reply(writer, &reply).await?;
                                }
                                Err(e) => {
                                    send_reply(writer, &malformed(&e)).await?;
                                }
                            }
                        }
                        Err(e) => return Err(e.into()),
                    }
                }

                event = event_rx.recv() => {
                    match event {
                        Ok(event) => {
                            send_event(writer, &event).await?;
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(
                                "Subscriber {} lagged by {} events on session {}",
                                participant,
                                n,
                                session_id
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::debug!("Event topic for session {} closed", session_id);
                            return Ok(());
                        }
                    }
                }
            }
        }
    }
}

/// Dispatch one command against the coordinator.
///
/// `subscription` is the connection's session binding; commands that act
/// on a session are refused without one. `join`/`leave` manage the
/// binding itself and are handled by the connection loop.
async fn handle_command(
    command: ClientCommand,
    coordinator: &Coordinator,
    subscription: Option<(&SessionId, &ParticipantId)>,
) -> CommandReply {
    let (session_id, participant) = match command {
        ClientCommand::CreateSession {
            partner_a,
            partner_b,
            turn_based_mode,
        } => {
            let session = coordinator.create_session(partner_a, partner_b, turn_based_mode);
            return CommandReply::SessionCreated { session };
        }
        ClientCommand::Ping => return CommandReply::Pong,
        // Managed by the connection loop
        ClientCommand::Join { .. } | ClientCommand::Leave => return CommandReply::Ok,
        ref _session_command => match subscription {
            Some(binding) => binding,
            None => {
                return CommandReply::Error {
                    kind: "unauthorized".to_string(),
                    message: "command requires an active session subscription".to_string(),
                }
            }
        },
    };

    let result = match command {
        ClientCommand::RequestTurn => coordinator
            .request_turn(session_id, participant)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::ReleaseTurn => coordinator
            .release_turn(session_id, participant)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::AdvanceStep { step } => coordinator
            .advance_step(session_id, participant, &step)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::CompleteStep => coordinator
            .complete_step(session_id, participant)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::PauseSession => coordinator
            .pause_session(session_id, participant)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::ResumeSession => coordinator
            .resume_session(session_id, participant)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::CompleteSession { summary } => coordinator
            .complete_session(session_id, participant, &summary)
            .await
            .map(|_metrics| CommandReply::Ok),

        ClientCommand::CreateNote {
            content,
            privacy,
            category_id,
        } => coordinator
            .create_note(session_id, participant, content, privacy, category_id)
            .await
            .map(|note| CommandReply::Note { note }),

        ClientCommand::UpdateNote {
            note_id,
            content,
            version,
        } => coordinator
            .update_note(session_id, participant, &note_id, content, version)
            .await
            .map(|note| CommandReply::Note { note }),

        ClientCommand::LockNote { note_id } => coordinator
            .lock_note(session_id, participant, &note_id)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::UnlockNote { note_id } => coordinator
            .unlock_note(session_id, participant, &note_id)
            .await
            .map(|()| CommandReply::Ok),

        ClientCommand::TypingIndicator { context, is_typing } => {
            coordinator.typing_indicator(session_id, participant, context, is_typing);
            Ok(CommandReply::Ok)
        }

        ClientCommand::SendReaction { emoji } => {
            coordinator.send_reaction(session_id, participant, emoji);
            Ok(CommandReply::Ok)
        }

        // Already handled above
        ClientCommand::CreateSession { .. }
        | ClientCommand::Join { .. }
        | ClientCommand::Leave
        | ClientCommand::Ping => Ok(CommandReply::Ok),
    };

    result.unwrap_or_else(|e| reply_for_error(&e))
}

/// Map a command error to its wire reply. Turn denials and edit
/// conflicts have dedicated replies carrying the authoritative state;
/// everything else is a tagged error.
fn reply_for_error(error: &CommandError) -> CommandReply {
    match error {
        CommandError::TurnDenied { holder } => CommandReply::TurnDenied {
            current_holder: holder.clone(),
        },
        CommandError::VersionConflict {
            note_id,
            current_version,
            current_content,
        } => CommandReply::EditConflict {
            note_id: note_id.clone(),
            current_version: *current_version,
            current_content: current_content.clone(),
        },
        other => CommandReply::Error {
            kind: other.kind().to_string(),
            message: other.to_string(),
        },
    }
}

fn malformed(error: &serde_json::Error) -> CommandReply {
    CommandReply::Error {
        kind: "malformed".to_string(),
        message: format!("Invalid command: {}", error),
    }
}

async fn send_reply(writer: &mut OwnedWriteHalf, reply: &CommandReply) -> Result<()> {
    let mut json = serde_json::to_string(reply)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}

async fn send_event(writer: &mut OwnedWriteHalf, event: &ServerEvent) -> Result<()> {
    let mut json = serde_json::to_string(event)?;
    json.push('\n');
    writer.write_all(json.as_bytes()).await?;
    Ok(())
}
