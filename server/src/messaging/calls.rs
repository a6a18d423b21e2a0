//! Call signaling on top of the call registry. Terminal outcomes are logged
//! into the conversation as `call` messages.

use super::MessagingService;
use crate::error::{AppError, Result};
use crate::models::*;
use crate::presence::ConnectionId;
use crate::websocket::RoomAddress;

fn call_rooms(session: &CallSession) -> Vec<RoomAddress> {
    match &session.target {
        ChatTarget::Individual(callee) => vec![
            RoomAddress::Individual(session.initiator_id.clone()),
            RoomAddress::Individual(callee.clone()),
        ],
        ChatTarget::Event(event_id) => vec![RoomAddress::Event(event_id.clone())],
    }
}

fn call_log_body(session: &CallSession) -> String {
    let kind = session.call_type.as_str();
    match session.status {
        CallStatus::Completed => {
            let secs = session.duration_secs();
            format!("{} call, {}:{:02}", capitalize(kind), secs / 60, secs % 60)
        }
        CallStatus::Missed => format!("Missed {} call", kind),
        CallStatus::Rejected => format!("Declined {} call", kind),
        CallStatus::Cancelled => format!("Cancelled {} call", kind),
        CallStatus::Failed => format!("Failed {} call", kind),
        CallStatus::Initiated | CallStatus::Ongoing => format!("{} call", capitalize(kind)),
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl MessagingService {
    /// Event calls are open to current participants only
    async fn check_call_access(&self, session: &CallSession, user_id: &str) -> Result<()> {
        if let ChatTarget::Event(event_id) = &session.target {
            if !self.storage.is_active_participant(event_id, user_id).await? {
                return Err(AppError::forbidden("Not a participant of this call"));
            }
        } else if !self.calls.is_party(&session.id, user_id) {
            return Err(AppError::forbidden("Not a participant of this call"));
        }
        Ok(())
    }

    fn active_call(&self, call_id: &str) -> Result<CallSession> {
        self.calls.get(call_id).ok_or_else(|| AppError::not_found("Call not found"))
    }

    pub async fn initiate_call(&self, user_id: &str, conn: ConnectionId, req: CallInitiate) -> Result<CallSession> {
        let target = ChatTarget::from_parts(req.to.as_deref(), req.event_id.as_deref())?;
        self.check_target(user_id, &target).await?;

        let session = self.calls.initiate(req.call_id, user_id, target.clone(), req.call_type)?;
        self.gateway.emit(
            &RoomAddress::Individual(user_id.to_string()),
            WsServerMessage::CallInitiated(session.clone()),
        );

        match &target {
            ChatTarget::Individual(callee) if !self.presence.is_online(callee) => {
                if let Some(missed) = self.calls.miss(&session.id) {
                    self.finish_call(missed).await;
                }
                return Ok(session);
            }
            ChatTarget::Individual(callee) => self.gateway.emit(
                &RoomAddress::Individual(callee.clone()),
                WsServerMessage::IncomingCall(session.clone()),
            ),
            ChatTarget::Event(event_id) => self.gateway.emit_except(
                &RoomAddress::Event(event_id.clone()),
                conn,
                WsServerMessage::IncomingCall(session.clone()),
            ),
        }

        let service = self.clone();
        let call_id = session.id.clone();
        let timeout = self.realtime.ring_timeout();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Some(missed) = service.calls.miss(&call_id) {
                service.finish_call(missed).await;
            }
        });

        tracing::info!(call_id = %session.id, initiator = %user_id, "Call initiated");
        Ok(session)
    }

    pub async fn accept_call(&self, user_id: &str, call_id: &str) -> Result<CallSession> {
        let current = self.active_call(call_id)?;
        self.check_call_access(&current, user_id).await?;

        let session = self.calls.accept(call_id, user_id)?;
        self.gateway.emit_many(&call_rooms(&session), WsServerMessage::CallAccepted(session.clone()));
        Ok(session)
    }

    pub async fn reject_call(&self, user_id: &str, call_id: &str) -> Result<CallSession> {
        let current = self.active_call(call_id)?;
        self.check_call_access(&current, user_id).await?;

        let session = self.calls.reject(call_id, user_id)?;
        if session.status.is_terminal() {
            self.finish_call(session.clone()).await;
        } else {
            self.gateway.emit(
                &RoomAddress::Individual(session.initiator_id.clone()),
                WsServerMessage::CallRejected(session.clone()),
            );
        }
        Ok(session)
    }

    pub async fn end_call(&self, user_id: &str, call_id: &str) -> Result<CallSession> {
        let current = self.active_call(call_id)?;
        self.check_call_access(&current, user_id).await?;

        let session = self.calls.end(call_id, user_id)?;
        if session.status.is_terminal() {
            self.finish_call(session.clone()).await;
        }
        Ok(session)
    }

    pub async fn fail_call(&self, user_id: &str, failure: CallFailure) -> Result<CallSession> {
        let current = self.active_call(&failure.call_id)?;
        self.check_call_access(&current, user_id).await?;

        let session = self.calls.fail(&failure.call_id, user_id, failure.reason)?;
        self.finish_call(session.clone()).await;
        Ok(session)
    }

    /// Opaque pass-through between two members of the same call
    pub async fn relay_signal(&self, user_id: &str, signal: RtcSignal) -> Result<()> {
        self.check_signal_route(user_id, &signal.call_id, &signal.to).await?;
        self.gateway.emit(
            &RoomAddress::Individual(signal.to),
            WsServerMessage::RtcSignal(RelayedSignal {
                call_id: signal.call_id,
                from: user_id.to_string(),
                signal: signal.signal,
            }),
        );
        Ok(())
    }

    pub async fn relay_ice_candidate(&self, user_id: &str, candidate: IceCandidate) -> Result<()> {
        self.check_signal_route(user_id, &candidate.call_id, &candidate.to).await?;
        self.gateway.emit(
            &RoomAddress::Individual(candidate.to),
            WsServerMessage::IceCandidate(RelayedCandidate {
                call_id: candidate.call_id,
                from: user_id.to_string(),
                candidate: candidate.candidate,
            }),
        );
        Ok(())
    }

    async fn check_signal_route(&self, from: &str, call_id: &str, to: &str) -> Result<()> {
        if from == to {
            return Err(AppError::validation("Cannot signal yourself"));
        }
        let session = self.active_call(call_id)?;
        self.check_call_access(&session, from).await?;
        self.check_call_access(&session, to).await
    }

    /// Announce a terminal call and log it as a `call` message
    pub(super) async fn finish_call(&self, session: CallSession) {
        let event = match session.status {
            CallStatus::Rejected => WsServerMessage::CallRejected(session.clone()),
            _ => WsServerMessage::CallEnded(session.clone()),
        };
        self.gateway.emit_many(&call_rooms(&session), event);

        if let Err(e) = self.log_call(&session).await {
            tracing::error!(call_id = %session.id, "Failed to log call: {}", e);
        }
    }

    /// Write the call outcome into its conversation and broadcast it
    pub async fn log_call(&self, session: &CallSession) -> Result<MessageView> {
        let mut draft = MessageDraft::new(
            &session.initiator_id,
            &session.target,
            call_log_body(session),
            MessageKind::Call,
        );
        draft.call = Some(session.summary());

        let message = self.storage.create_message(draft).await?;
        let view = self.storage.view(message).await?;
        self.publish(&view);
        Ok(view)
    }
}
