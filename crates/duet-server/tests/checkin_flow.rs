//! End-to-end tests over the client-facing TCP surface
//!
//! Each test spins up a server on its own port and drives it with raw
//! line-delimited JSON clients, the way a real client would.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, BufWriter};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use duet_core::CoordinatorConfig;
use duet_protocol::{
    ClientCommand, CommandReply, CompletionSummary, NotePrivacy, ParticipantId, ServerEvent,
    SessionSnapshot, SessionStatus,
};
use duet_server::{CheckinServer, Coordinator};

/// Base port for test servers - each test gets a unique offset
static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

fn get_test_port() -> u16 {
    let offset = PORT_COUNTER.fetch_add(1, Ordering::SeqCst);
    41000 + offset
}

/// Start a server on a fresh port, returning its address and task handle
async fn start_server() -> (String, JoinHandle<()>) {
    let port = get_test_port();
    let address = format!("127.0.0.1:{}", port);

    let config = CoordinatorConfig {
        bind_address: address.clone(),
        ..CoordinatorConfig::default()
    };
    let coordinator = Arc::new(Coordinator::new(config));
    let server = CheckinServer::new(address.clone(), coordinator);

    let handle = tokio::spawn(async move {
        let _ = server.run().await;
    });

    // Wait for the server to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    (address, handle)
}

/// Line-delimited JSON test client
struct TestClient {
    reader: BufReader<tokio::net::tcp::OwnedReadHalf>,
    writer: BufWriter<tokio::net::tcp::OwnedWriteHalf>,
    /// Events that arrived while waiting for a command reply
    pending_events: VecDeque<ServerEvent>,
}

impl TestClient {
    async fn connect(address: &str) -> Self {
        let mut last_err = None;
        for _ in 0..10 {
            match TcpStream::connect(address).await {
                Ok(stream) => {
                    let (reader, writer) = stream.into_split();
                    return Self {
                        reader: BufReader::new(reader),
                        writer: BufWriter::new(writer),
                        pending_events: VecDeque::new(),
                    };
                }
                Err(e) => {
                    last_err = Some(e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
        panic!("Failed to connect to server at {}: {:?}", address, last_err);
    }

    /// Read one raw line; None on EOF (connection closed by server)
    async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = timeout(Duration::from_secs(5), self.reader.read_line(&mut line))
            .await
            .expect("Timed out reading from server")
            .expect("Failed to read from server");
        if n == 0 {
            None
        } else {
            Some(line)
        }
    }

    /// Send a command and return its reply, buffering any broadcast
    /// events that arrive first.
    async fn send(&mut self, command: ClientCommand) -> CommandReply {
        let mut json = serde_json::to_string(&command).expect("Failed to serialize command");
        json.push('\n');
        self.writer
            .write_all(json.as_bytes())
            .await
            .expect("Failed to write command");
        self.writer.flush().await.expect("Failed to flush");

        loop {
            let line = self
                .read_line()
                .await
                .expect("Server closed connection while awaiting reply");
            if let Ok(reply) = serde_json::from_str::<CommandReply>(&line) {
                return reply;
            }
            let event = serde_json::from_str::<ServerEvent>(&line)
                .expect("Server sent a line that is neither reply nor event");
            self.pending_events.push_back(event);
        }
    }

    /// Next broadcast event, buffered or fresh
    async fn next_event(&mut self) -> ServerEvent {
        if let Some(event) = self.pending_events.pop_front() {
            return event;
        }
        loop {
            let line = self
                .read_line()
                .await
                .expect("Server closed connection while awaiting event");
            if let Ok(event) = serde_json::from_str::<ServerEvent>(&line) {
                return event;
            }
        }
    }

    /// Wait briefly for an event; None if nothing arrives
    async fn try_next_event(&mut self, wait: Duration) -> Option<ServerEvent> {
        if let Some(event) = self.pending_events.pop_front() {
            return Some(event);
        }
        match timeout(wait, async {
            let mut line = String::new();
            self.reader.read_line(&mut line).await.map(|n| (n, line))
        })
        .await
        {
            Ok(Ok((0, _))) => None,
            Ok(Ok((_, line))) => serde_json::from_str::<ServerEvent>(&line).ok(),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    /// Join a session, panicking on anything but success
    async fn join(&mut self, session_id: &str, participant: &str) -> SessionSnapshot {
        let reply = self
            .send(ClientCommand::Join {
                session_id: session_id.into(),
                participant_id: ParticipantId::new(participant),
            })
            .await;
        match reply {
            CommandReply::Joined { session } => session,
            other => panic!("Expected Joined reply, got {:?}", other),
        }
    }
}

fn create_session_command(turn_based_mode: bool) -> ClientCommand {
    ClientCommand::CreateSession {
        partner_a: ParticipantId::new("alice"),
        partner_b: ParticipantId::new("bob"),
        turn_based_mode,
    }
}

async fn create_session(client: &mut TestClient, turn_based_mode: bool) -> SessionSnapshot {
    match client.send(create_session_command(turn_based_mode)).await {
        CommandReply::SessionCreated { session } => session,
        other => panic!("Expected SessionCreated reply, got {:?}", other),
    }
}

#[tokio::test]
async fn test_create_and_join_roundtrip() {
    let (address, server) = start_server().await;
    let mut client = TestClient::connect(&address).await;

    let created = create_session(&mut client, false).await;
    assert_eq!(created.status, SessionStatus::NotStarted);
    assert_eq!(created.partner_a, ParticipantId::new("alice"));

    let joined = client.join(created.id.as_str(), "alice").await;
    assert_eq!(joined.status, SessionStatus::InProgress);
    assert!(joined.started_at.is_some());
    assert_eq!(
        joined.active_participants,
        vec![ParticipantId::new("alice")]
    );

    server.abort();
}

#[tokio::test]
async fn test_unauthorized_join_refuses_connection() {
    let (address, server) = start_server().await;
    let mut client = TestClient::connect(&address).await;
    let created = create_session(&mut client, false).await;

    let mut intruder = TestClient::connect(&address).await;
    let reply = intruder
        .send(ClientCommand::Join {
            session_id: created.id.clone(),
            participant_id: ParticipantId::new("mallory"),
        })
        .await;
    match reply {
        CommandReply::Error { kind, .. } => assert_eq!(kind, "unauthorized"),
        other => panic!("Expected Error reply, got {:?}", other),
    }

    // The server hangs up on unauthorized joins
    assert!(intruder.read_line().await.is_none());

    // And no session state was touched
    let joined = client.join(created.id.as_str(), "alice").await;
    assert_eq!(
        joined.active_participants,
        vec![ParticipantId::new("alice")]
    );

    server.abort();
}

#[tokio::test]
async fn test_commands_before_join_are_unauthorized() {
    let (address, server) = start_server().await;
    let mut client = TestClient::connect(&address).await;

    let reply = client
        .send(ClientCommand::AdvanceStep {
            step: "reflection".to_string(),
        })
        .await;
    match reply {
        CommandReply::Error { kind, .. } => assert_eq!(kind, "unauthorized"),
        other => panic!("Expected Error reply, got {:?}", other),
    }

    // Ping works without a subscription
    assert!(matches!(
        client.send(ClientCommand::Ping).await,
        CommandReply::Pong
    ));

    server.abort();
}

#[tokio::test]
async fn test_events_fan_out_between_partners() {
    let (address, server) = start_server().await;
    let mut alice = TestClient::connect(&address).await;
    let created = create_session(&mut alice, false).await;
    alice.join(created.id.as_str(), "alice").await;

    let mut bob = TestClient::connect(&address).await;
    bob.join(created.id.as_str(), "bob").await;

    // Alice hears bob arrive
    match alice.next_event().await {
        ServerEvent::ParticipantJoined { participant_id } => {
            assert_eq!(participant_id, ParticipantId::new("bob"));
        }
        other => panic!("Expected ParticipantJoined, got {:?}", other),
    }

    // Alice advances; bob sees it
    assert!(matches!(
        alice
            .send(ClientCommand::AdvanceStep {
                step: "category_selection".to_string(),
            })
            .await,
        CommandReply::Ok
    ));
    match bob.next_event().await {
        ServerEvent::StepChanged { new_step, by } => {
            assert_eq!(new_step.as_str(), "category_selection");
            assert_eq!(by, ParticipantId::new("alice"));
        }
        other => panic!("Expected StepChanged, got {:?}", other),
    }

    // Bob creates a note; alice sees it
    let reply = bob
        .send(ClientCommand::CreateNote {
            content: "we should talk about chores".to_string(),
            privacy: NotePrivacy::Shared,
            category_id: None,
        })
        .await;
    assert!(matches!(reply, CommandReply::Note { .. }));

    match alice.next_event().await {
        ServerEvent::NoteCreated { note } => {
            assert_eq!(note.author_id, ParticipantId::new("bob"));
            assert_eq!(note.version, 0);
        }
        other => panic!("Expected NoteCreated, got {:?}", other),
    }

    server.abort();
}

#[tokio::test]
async fn test_turn_taking_scenario() {
    let (address, server) = start_server().await;
    let mut alice = TestClient::connect(&address).await;
    let created = create_session(&mut alice, true).await;
    alice.join(created.id.as_str(), "alice").await;

    let mut bob = TestClient::connect(&address).await;
    bob.join(created.id.as_str(), "bob").await;

    // A requests the turn: granted
    assert!(matches!(
        alice.send(ClientCommand::RequestTurn).await,
        CommandReply::Ok
    ));

    // B requests while A holds it: denied, holder named
    match bob.send(ClientCommand::RequestTurn).await {
        CommandReply::TurnDenied { current_holder } => {
            assert_eq!(current_holder, ParticipantId::new("alice"));
        }
        other => panic!("Expected TurnDenied reply, got {:?}", other),
    }

    // Without the turn, B cannot advance
    match bob
        .send(ClientCommand::AdvanceStep {
            step: "reflection".to_string(),
        })
        .await
    {
        CommandReply::TurnDenied { current_holder } => {
            assert_eq!(current_holder, ParticipantId::new("alice"));
        }
        other => panic!("Expected TurnDenied reply, got {:?}", other),
    }

    // A releases; B is granted
    assert!(matches!(
        alice.send(ClientCommand::ReleaseTurn).await,
        CommandReply::Ok
    ));
    assert!(matches!(
        bob.send(ClientCommand::RequestTurn).await,
        CommandReply::Ok
    ));

    server.abort();
}

#[tokio::test]
async fn test_optimistic_update_conflict() {
    let (address, server) = start_server().await;
    let mut alice = TestClient::connect(&address).await;
    let created = create_session(&mut alice, false).await;
    alice.join(created.id.as_str(), "alice").await;

    let mut bob = TestClient::connect(&address).await;
    bob.join(created.id.as_str(), "bob").await;

    let note = match alice
        .send(ClientCommand::CreateNote {
            content: "initial".to_string(),
            privacy: NotePrivacy::Shared,
            category_id: None,
        })
        .await
    {
        CommandReply::Note { note } => note,
        other => panic!("Expected Note reply, got {:?}", other),
    };
    assert_eq!(note.version, 0);

    // A updates against version 0: succeeds, version becomes 1
    match alice
        .send(ClientCommand::UpdateNote {
            note_id: note.id.clone(),
            content: "x".to_string(),
            version: 0,
        })
        .await
    {
        CommandReply::Note { note } => assert_eq!(note.version, 1),
        other => panic!("Expected Note reply, got {:?}", other),
    }

    // B updates against the stale version 0: conflict with authoritative state
    match bob
        .send(ClientCommand::UpdateNote {
            note_id: note.id.clone(),
            content: "y".to_string(),
            version: 0,
        })
        .await
    {
        CommandReply::EditConflict {
            note_id,
            current_version,
            current_content,
        } => {
            assert_eq!(note_id, note.id);
            assert_eq!(current_version, 1);
            assert_eq!(current_content, "x");
        }
        other => panic!("Expected EditConflict reply, got {:?}", other),
    }

    // B reconciles and retries against the current version
    match bob
        .send(ClientCommand::UpdateNote {
            note_id: note.id.clone(),
            content: "y".to_string(),
            version: 1,
        })
        .await
    {
        CommandReply::Note { note } => assert_eq!(note.version, 2),
        other => panic!("Expected Note reply, got {:?}", other),
    }

    server.abort();
}

#[tokio::test]
async fn test_lock_contention_over_wire() {
    let (address, server) = start_server().await;
    let mut alice = TestClient::connect(&address).await;
    let created = create_session(&mut alice, false).await;
    alice.join(created.id.as_str(), "alice").await;

    let mut bob = TestClient::connect(&address).await;
    bob.join(created.id.as_str(), "bob").await;

    let note = match alice
        .send(ClientCommand::CreateNote {
            content: "contested".to_string(),
            privacy: NotePrivacy::Shared,
            category_id: None,
        })
        .await
    {
        CommandReply::Note { note } => note,
        other => panic!("Expected Note reply, got {:?}", other),
    };

    assert!(matches!(
        alice
            .send(ClientCommand::LockNote {
                note_id: note.id.clone(),
            })
            .await,
        CommandReply::Ok
    ));

    match bob
        .send(ClientCommand::LockNote {
            note_id: note.id.clone(),
        })
        .await
    {
        CommandReply::Error { kind, .. } => assert_eq!(kind, "already_locked"),
        other => panic!("Expected Error reply, got {:?}", other),
    }

    assert!(matches!(
        alice
            .send(ClientCommand::UnlockNote {
                note_id: note.id.clone(),
            })
            .await,
        CommandReply::Ok
    ));
    assert!(matches!(
        bob.send(ClientCommand::LockNote {
            note_id: note.id.clone(),
        })
        .await,
        CommandReply::Ok
    ));

    server.abort();
}

#[tokio::test]
async fn test_disconnect_withdraws_participant_once() {
    let (address, server) = start_server().await;
    let mut alice = TestClient::connect(&address).await;
    let created = create_session(&mut alice, false).await;
    alice.join(created.id.as_str(), "alice").await;

    let mut bob = TestClient::connect(&address).await;
    bob.join(created.id.as_str(), "bob").await;

    // Consume bob's arrival
    assert!(matches!(
        alice.next_event().await,
        ServerEvent::ParticipantJoined { .. }
    ));

    // Abrupt disconnect, no leave command
    drop(bob);

    match alice.next_event().await {
        ServerEvent::ParticipantLeft { participant_id } => {
            assert_eq!(participant_id, ParticipantId::new("bob"));
        }
        other => panic!("Expected ParticipantLeft, got {:?}", other),
    }

    // Exactly once: nothing further follows
    assert!(alice.try_next_event(Duration::from_millis(300)).await.is_none());

    server.abort();
}

#[tokio::test]
async fn test_last_disconnect_pauses_and_rejoin_stays_paused() {
    let (address, server) = start_server().await;
    let mut alice = TestClient::connect(&address).await;
    let created = create_session(&mut alice, false).await;
    let joined = alice.join(created.id.as_str(), "alice").await;
    assert_eq!(joined.status, SessionStatus::InProgress);

    drop(alice);
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Rejoining does not auto-resume; resume is always explicit
    let mut bob = TestClient::connect(&address).await;
    let rejoined = bob.join(created.id.as_str(), "bob").await;
    assert_eq!(rejoined.status, SessionStatus::Paused);
    assert!(rejoined.paused_at.is_some());

    assert!(matches!(
        bob.send(ClientCommand::ResumeSession).await,
        CommandReply::Ok
    ));
    match bob.next_event().await {
        ServerEvent::SessionResumed { by } => assert_eq!(by, ParticipantId::new("bob")),
        other => panic!("Expected SessionResumed, got {:?}", other),
    }

    server.abort();
}

#[tokio::test]
async fn test_completion_metrics_and_terminal_state() {
    let (address, server) = start_server().await;
    let mut alice = TestClient::connect(&address).await;
    let created = create_session(&mut alice, false).await;
    alice.join(created.id.as_str(), "alice").await;

    let mut bob = TestClient::connect(&address).await;
    bob.join(created.id.as_str(), "bob").await;

    // Two notes from alice, one from bob
    for content in ["first", "second"] {
        assert!(matches!(
            alice
                .send(ClientCommand::CreateNote {
                    content: content.to_string(),
                    privacy: NotePrivacy::Shared,
                    category_id: None,
                })
                .await,
            CommandReply::Note { .. }
        ));
    }
    assert!(matches!(
        bob.send(ClientCommand::CreateNote {
            content: "third".to_string(),
            privacy: NotePrivacy::Private,
            category_id: None,
        })
        .await,
        CommandReply::Note { .. }
    ));

    assert!(matches!(
        alice.send(ClientCommand::CompleteStep).await,
        CommandReply::Ok
    ));

    // Alice completes; her perspective authored 2 of 3 notes
    assert!(matches!(
        alice
            .send(ClientCommand::CompleteSession {
                summary: CompletionSummary {
                    reflection: Some("good talk".to_string()),
                    elapsed_seconds: Some(1500),
                },
            })
            .await,
        CommandReply::Ok
    ));

    let metrics = loop {
        match bob.next_event().await {
            ServerEvent::SessionCompleted { metrics } => break metrics,
            _ => continue,
        }
    };
    assert_eq!(metrics.notes_created, 3);
    assert_eq!(metrics.shared_notes_created, 2);
    assert_eq!(metrics.steps_completed, 1);
    assert!((metrics.participation_balance - 2.0 / 3.0).abs() < 1e-9);

    // The session is closed to everything that follows
    match bob
        .send(ClientCommand::AdvanceStep {
            step: "reflection".to_string(),
        })
        .await
    {
        CommandReply::Error { kind, .. } => assert_eq!(kind, "session_closed"),
        other => panic!("Expected Error reply, got {:?}", other),
    }

    server.abort();
}
