//! Per-connection session state machine.
//!
//! Each accepted WebSocket runs through four phases:
//! 1. Handshake: exactly one credential frame, verified against the identity
//!    declared in the route. Failure closes with a policy-violation frame and
//!    touches no room state.
//! 2. Join: ensure the room and its default file, register the session
//!    (displacing a prior handle for the same identity), send the `init`
//!    snapshot.
//! 3. Dispatch loop: parse each frame, apply its store mutation, then
//!    broadcast to a snapshot of the room. Store failure on one message fails
//!    only that message, reported to the requester alone.
//! 4. Disconnect: deregister and notify the remaining members.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::protocol::{ClientMessage, ServerMessage};
use super::{HandshakeFailure, DEFAULT_FILE_CONTENT, DEFAULT_FILE_NAME, NEW_FILE_CONTENT};
use crate::auth::IdentityVerifier;
use crate::history::RevertOutcome;
use crate::room::{Departure, RoomRegistry, SessionHandle};
use crate::storage::{RoomStore, StorageError, StorageResult};
use crate::AppState;

/// Drive one WebSocket connection through its session lifecycle.
pub async fn handle_session(
    socket: WebSocket,
    room_id: String,
    client_id: String,
    state: Arc<AppState>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let identity =
        match authenticate(&mut ws_receiver, &client_id, state.verifier.as_ref()).await {
            Ok(identity) => identity,
            Err(failure) => {
                warn!(
                    "Handshake refused for room {}: {}",
                    room_id,
                    failure.reason()
                );
                close_with_policy_violation(&mut ws_sender, failure.reason()).await;
                return;
            }
        };

    state.registry.ensure_room(&room_id);
    if let Err(e) = ensure_default_file(&state.store, &room_id) {
        error!("Failed to seed room {}: {}", room_id, e);
        return;
    }

    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    state.registry.register(&room_id, &identity, tx.clone());
    info!("Client {} joined room {}", identity, room_id);

    // Snapshot after registration: an update broadcast that races the join is
    // already reflected here, so the client never observes older state than
    // the room just saw.
    let files = match state.store.list_files(&room_id) {
        Ok(files) => files,
        Err(e) => {
            error!("Failed to load snapshot for room {}: {}", room_id, e);
            state.registry.deregister(&room_id, &identity, &tx);
            return;
        }
    };
    if send_message(&mut ws_sender, &ServerMessage::Init { files })
        .await
        .is_err()
    {
        state.registry.deregister(&room_id, &identity, &tx);
        return;
    }

    // Task to forward queued messages to the WebSocket
    let send_identity = identity.clone();
    let mut send_task = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(text) => {
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Failed to encode outbound message: {}", e);
                }
            }
        }
        debug!("Send task ended for client {}", send_identity);
    });

    // Task to receive and dispatch inbound frames
    let recv_state = state.clone();
    let recv_room = room_id.clone();
    let recv_identity = identity.clone();
    let recv_tx = tx.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_receiver.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(parsed) => {
                        dispatch_message(&recv_state, &recv_room, &recv_identity, &recv_tx, parsed);
                    }
                    Err(e) => {
                        debug!("Malformed message from {}: {}", recv_identity, e);
                        let _ = recv_tx.send(ServerMessage::Error {
                            message: format!("malformed message: {}", e),
                        });
                    }
                },
                Message::Binary(_) => {
                    let _ = recv_tx.send(ServerMessage::Error {
                        message: "binary frames are not supported".to_string(),
                    });
                }
                Message::Close(_) => {
                    info!("WebSocket closed by client {}", recv_identity);
                    break;
                }
                _ => {}
            }
        }
    });

    // Whichever task ends first takes the other down with it
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    handle_disconnect(&state, &room_id, &identity, &tx);
}

/// Receive the credential frame and resolve it to a verified identity.
async fn authenticate(
    receiver: &mut SplitStream<WebSocket>,
    declared_id: &str,
    verifier: &dyn IdentityVerifier,
) -> Result<String, HandshakeFailure> {
    let credential = match receiver.next().await {
        Some(Ok(Message::Text(token))) => token,
        _ => return Err(HandshakeFailure::AuthenticationFailed),
    };

    let identity = match verifier.verify(&credential).await {
        Ok(identity) => identity,
        Err(e) => {
            debug!("Credential rejected: {}", e);
            return Err(HandshakeFailure::AuthenticationFailed);
        }
    };

    if identity != declared_id {
        return Err(HandshakeFailure::IdentityMismatch);
    }
    Ok(identity)
}

/// Seed the default file when the room has no files yet. Compare-and-swap
/// keeps this idempotent under concurrent first joins: exactly one creation.
fn ensure_default_file(store: &RoomStore, room_id: &str) -> StorageResult<()> {
    if !store.room_has_files(room_id)? {
        store.create_file_if_absent(room_id, DEFAULT_FILE_NAME, DEFAULT_FILE_CONTENT)?;
    }
    Ok(())
}

/// Apply one parsed message: store mutation first, then broadcast.
pub(crate) fn dispatch_message(
    state: &AppState,
    room_id: &str,
    client_id: &str,
    reply: &SessionHandle,
    message: ClientMessage,
) {
    match message {
        ClientMessage::CodeUpdate { file, code } => {
            let applied: StorageResult<()> = (|| {
                let prior = state.store.file_content(room_id, &file)?.unwrap_or_default();
                state.store.set_file_content(room_id, &file, &code)?;
                state.history.record_overwrite(room_id, &file, prior)
            })();
            match applied {
                Ok(()) => broadcast(
                    &state.registry,
                    room_id,
                    ServerMessage::CodeUpdate { file, code },
                ),
                Err(e) => report_store_failure(reply, "code_update", e),
            }
        }

        ClientMessage::CursorUpdate { position } => {
            match state.store.set_cursor(room_id, client_id, &position) {
                Ok(()) => broadcast(
                    &state.registry,
                    room_id,
                    ServerMessage::CursorUpdate { position },
                ),
                Err(e) => report_store_failure(reply, "cursor_update", e),
            }
        }

        ClientMessage::NewFile { file } => {
            match state.store.set_file_content(room_id, &file, NEW_FILE_CONTENT) {
                Ok(()) => broadcast(&state.registry, room_id, ServerMessage::NewFile { file }),
                Err(e) => report_store_failure(reply, "new_file", e),
            }
        }

        ClientMessage::RenameFile { old_name, new_name } => {
            // An unknown old name moves nothing, but the message is still
            // echoed to the room
            match state.store.rename_file(room_id, &old_name, &new_name) {
                Ok(_renamed) => broadcast(
                    &state.registry,
                    room_id,
                    ServerMessage::RenameFile { old_name, new_name },
                ),
                Err(e) => report_store_failure(reply, "rename_file", e),
            }
        }

        ClientMessage::DeleteFile { file } => {
            match state.store.delete_file(room_id, &file) {
                Ok(()) => broadcast(&state.registry, room_id, ServerMessage::DeleteFile { file }),
                Err(e) => report_store_failure(reply, "delete_file", e),
            }
        }

        ClientMessage::GetVersions { file } => match state.history.versions(room_id, &file) {
            Ok(versions) => {
                let _ = reply.send(ServerMessage::Versions { file, versions });
            }
            Err(e) => report_store_failure(reply, "get_versions", e),
        },

        ClientMessage::RevertVersion { file, index } => {
            match state.history.revert(room_id, &file, index) {
                Ok(RevertOutcome::Applied { code }) => broadcast(
                    &state.registry,
                    room_id,
                    ServerMessage::RevertVersion {
                        file,
                        index,
                        code: Some(code),
                    },
                ),
                // Out-of-range: nothing changed, the unmodified message still
                // goes out
                Ok(RevertOutcome::OutOfRange) => broadcast(
                    &state.registry,
                    room_id,
                    ServerMessage::RevertVersion {
                        file,
                        index,
                        code: None,
                    },
                ),
                Err(e) => report_store_failure(reply, "revert_version", e),
            }
        }
    }
}

/// Deregister and notify the remaining members.
pub(crate) fn handle_disconnect(
    state: &AppState,
    room_id: &str,
    client_id: &str,
    handle: &SessionHandle,
) {
    match state.registry.deregister(room_id, client_id, handle) {
        // A displaced connection tearing down announces nothing: the live
        // session for this identity is still in the room
        Departure::NotRegistered => {
            debug!("Stale teardown for {} in room {}", client_id, room_id);
            return;
        }
        Departure::LeftAndEmptied => {
            info!("Room {} is now empty", room_id);
        }
        Departure::Left => {}
    }
    // An emptied room yields an empty snapshot: nothing to notify
    broadcast(
        &state.registry,
        room_id,
        ServerMessage::UserLeft {
            client_id: client_id.to_string(),
        },
    );
    info!("Client {} left room {}", client_id, room_id);
}

/// Deliver one message to every registered handle in the room, sender
/// included. The target set is snapshotted first; a closed recipient channel
/// only loses its own copy.
fn broadcast(registry: &RoomRegistry, room_id: &str, message: ServerMessage) {
    for handle in registry.handles(room_id) {
        let _ = handle.send(message.clone());
    }
}

fn report_store_failure(reply: &SessionHandle, kind: &str, err: StorageError) {
    warn!("Store operation failed for {}: {}", kind, err);
    let _ = reply.send(ServerMessage::Error {
        message: format!("{} failed: storage unavailable", kind),
    });
}

async fn send_message(
    sender: &mut SplitSink<WebSocket, Message>,
    message: &ServerMessage,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(message).map_err(axum::Error::new)?;
    sender.send(Message::Text(text)).await
}

async fn close_with_policy_violation(
    sender: &mut SplitSink<WebSocket, Message>,
    reason: &'static str,
) {
    let frame = CloseFrame {
        code: close_code::POLICY,
        reason: reason.into(),
    };
    let _ = sender.send(Message::Close(Some(frame))).await;
}
