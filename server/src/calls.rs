//! Ephemeral call sessions
//!
//! A call lives in memory from `call-initiate` until it reaches a terminal
//! status, at which point it is removed and handed back to the caller so the
//! outcome can be logged as a `call` message.
//!
//! ```text
//! initiated ──accept──▶ ongoing ──end──▶ completed
//!     │
//!     ├─ reject ─▶ rejected
//!     ├─ end (initiator) ─▶ cancelled
//!     ├─ ring timeout ─▶ missed
//!     └─ fail ─▶ failed          (fail is also allowed while ongoing)
//! ```

use chrono::Utc;
use dashmap::{mapref::entry::Entry, DashMap};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{CallKind, CallParticipant, CallSession, CallStatus, ChatTarget};

#[derive(Default)]
pub struct CallRegistry {
    sessions: DashMap<String, CallSession>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, call_id: &str) -> Option<CallSession> {
        self.sessions.get(call_id).map(|s| s.clone())
    }

    pub fn active_count(&self) -> usize {
        self.sessions.len()
    }

    /// Start ringing. The initiator is the first participant.
    pub fn initiate(
        &self,
        call_id: Option<String>,
        initiator_id: &str,
        target: ChatTarget,
        call_type: CallKind,
    ) -> Result<CallSession> {
        if let ChatTarget::Individual(callee) = &target {
            if callee == initiator_id {
                return Err(AppError::validation("You cannot call yourself"));
            }
        }

        let id = call_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let now = Utc::now();
        let session = CallSession {
            id: id.clone(),
            call_type,
            initiator_id: initiator_id.to_string(),
            target,
            status: CallStatus::Initiated,
            participants: vec![CallParticipant {
                user_id: initiator_id.to_string(),
                joined_at: now,
                left_at: None,
            }],
            created_at: now,
            answered_at: None,
            ended_at: None,
            end_reason: None,
        };

        match self.sessions.entry(id) {
            Entry::Occupied(_) => Err(AppError::validation("Call already exists")),
            Entry::Vacant(slot) => {
                slot.insert(session.clone());
                Ok(session)
            }
        }
    }

    /// Whether `user_id` may take part in (or signal within) the call
    pub fn is_party(&self, call_id: &str, user_id: &str) -> bool {
        self.sessions
            .get(call_id)
            .map(|s| is_party(&s, user_id))
            .unwrap_or(false)
    }

    /// Answer a ringing call, or join an ongoing event call
    pub fn accept(&self, call_id: &str, user_id: &str) -> Result<CallSession> {
        let mut session = self
            .sessions
            .get_mut(call_id)
            .ok_or_else(|| AppError::not_found("Call not found"))?;

        if session.initiator_id == user_id {
            return Err(AppError::validation("The caller cannot accept their own call"));
        }
        if let ChatTarget::Individual(callee) = &session.target {
            if callee != user_id {
                return Err(AppError::forbidden("Not a participant of this call"));
            }
            if session.status != CallStatus::Initiated {
                return Err(AppError::validation("Call is no longer ringing"));
            }
        }

        let now = Utc::now();
        match session.participants.iter().position(|p| p.user_id == user_id) {
            Some(i) => session.participants[i].left_at = None,
            None => session.participants.push(CallParticipant {
                user_id: user_id.to_string(),
                joined_at: now,
                left_at: None,
            }),
        }
        session.status = CallStatus::Ongoing;
        session.answered_at.get_or_insert(now);

        Ok(session.clone())
    }

    /// Decline a ringing call. A direct call ends as rejected; in an event
    /// call one member declining leaves the call ringing for the others.
    pub fn reject(&self, call_id: &str, user_id: &str) -> Result<CallSession> {
        let snapshot = self.get(call_id).ok_or_else(|| AppError::not_found("Call not found"))?;

        if !is_party(&snapshot, user_id) || snapshot.initiator_id == user_id {
            return Err(AppError::forbidden("Not a participant of this call"));
        }
        if snapshot.status != CallStatus::Initiated {
            return Err(AppError::validation("Call is no longer ringing"));
        }

        match snapshot.target {
            ChatTarget::Individual(_) => self.finish(call_id, CallStatus::Rejected, Some("rejected")),
            ChatTarget::Event(_) => Ok(snapshot),
        }
    }

    /// Hang up. Before answer this cancels (initiator) or rejects (callee) the
    /// call; afterwards the call completes once fewer than two people remain.
    pub fn end(&self, call_id: &str, user_id: &str) -> Result<CallSession> {
        let snapshot = self.get(call_id).ok_or_else(|| AppError::not_found("Call not found"))?;
        if !is_party(&snapshot, user_id) {
            return Err(AppError::forbidden("Not a participant of this call"));
        }

        match snapshot.status {
            CallStatus::Initiated if snapshot.initiator_id == user_id => {
                self.finish(call_id, CallStatus::Cancelled, Some("cancelled"))
            }
            CallStatus::Initiated => self.reject(call_id, user_id),
            _ => {
                let remaining = {
                    let mut session = self
                        .sessions
                        .get_mut(call_id)
                        .ok_or_else(|| AppError::not_found("Call not found"))?;
                    let now = Utc::now();
                    if let Some(p) = session.participants.iter_mut().find(|p| p.user_id == user_id) {
                        p.left_at.get_or_insert(now);
                    }
                    session.participants.iter().filter(|p| p.left_at.is_none()).count()
                };

                if remaining < 2 {
                    self.finish(call_id, CallStatus::Completed, Some("ended"))
                } else {
                    self.get(call_id).ok_or_else(|| AppError::not_found("Call not found"))
                }
            }
        }
    }

    pub fn fail(&self, call_id: &str, user_id: &str, reason: Option<String>) -> Result<CallSession> {
        if !self.is_party(call_id, user_id) {
            return Err(AppError::not_found("Call not found"));
        }
        let reason = reason.unwrap_or_else(|| "failed".to_string());
        self.finish(call_id, CallStatus::Failed, Some(reason.as_str()))
    }

    /// Ring timeout: end the call as missed if nobody has answered yet
    pub fn miss(&self, call_id: &str) -> Option<CallSession> {
        let ringing = self
            .sessions
            .get(call_id)
            .map(|s| s.status == CallStatus::Initiated)
            .unwrap_or(false);

        if ringing {
            self.finish(call_id, CallStatus::Missed, Some("no answer")).ok()
        } else {
            None
        }
    }

    /// End every call `user_id` is currently part of, as if they hung up.
    /// Returns the sessions that changed; terminal ones are already removed.
    pub fn abandon(&self, user_id: &str) -> Vec<CallSession> {
        let ids: Vec<String> = self
            .sessions
            .iter()
            .filter(|entry| {
                let s = entry.value();
                s.initiator_id == user_id
                    || s.participants.iter().any(|p| p.user_id == user_id && p.left_at.is_none())
                    || matches!(&s.target, ChatTarget::Individual(callee) if callee == user_id)
            })
            .map(|entry| entry.key().clone())
            .collect();

        ids.iter()
            .filter_map(|id| {
                // A callee dropping while it still rings never answered it
                let ringing_callee = self
                    .sessions
                    .get(id)
                    .map(|s| s.status == CallStatus::Initiated && s.initiator_id != user_id)
                    .unwrap_or(false);

                if ringing_callee {
                    self.miss(id)
                } else {
                    self.end(id, user_id).ok()
                }
            })
            .collect()
    }

    fn finish(&self, call_id: &str, status: CallStatus, reason: Option<&str>) -> Result<CallSession> {
        let (_, mut session) = self
            .sessions
            .remove(call_id)
            .ok_or_else(|| AppError::not_found("Call not found"))?;

        let now = Utc::now();
        session.status = status;
        session.ended_at = Some(now);
        session.end_reason = reason.map(str::to_string);
        for p in session.participants.iter_mut() {
            p.left_at.get_or_insert(now);
        }

        tracing::info!(call_id = %session.id, status = status.as_str(), "Call finished");
        Ok(session)
    }
}

fn is_party(session: &CallSession, user_id: &str) -> bool {
    if session.initiator_id == user_id || session.participants.iter().any(|p| p.user_id == user_id) {
        return true;
    }
    match &session.target {
        ChatTarget::Individual(callee) => callee == user_id,
        // Event membership is checked by the caller before this is consulted
        ChatTarget::Event(_) => session.status == CallStatus::Initiated || session.status == CallStatus::Ongoing,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn direct_call(registry: &CallRegistry) -> CallSession {
        registry
            .initiate(None, "alice", ChatTarget::Individual("bob".into()), CallKind::Audio)
            .unwrap()
    }

    #[test]
    fn test_answered_call_completes_on_hangup() {
        let registry = CallRegistry::new();
        let call = direct_call(&registry);
        assert_eq!(call.status, CallStatus::Initiated);

        let call = registry.accept(&call.id, "bob").unwrap();
        assert_eq!(call.status, CallStatus::Ongoing);
        assert!(call.answered_at.is_some());

        let ended = registry.end(&call.id, "bob").unwrap();
        assert_eq!(ended.status, CallStatus::Completed);
        assert!(ended.ended_at.is_some());
        assert_eq!(registry.active_count(), 0);
    }

    #[test]
    fn test_unanswered_outcomes() {
        let registry = CallRegistry::new();

        let call = direct_call(&registry);
        assert_eq!(registry.end(&call.id, "alice").unwrap().status, CallStatus::Cancelled);

        let call = direct_call(&registry);
        assert_eq!(registry.reject(&call.id, "bob").unwrap().status, CallStatus::Rejected);

        let call = direct_call(&registry);
        assert_eq!(registry.miss(&call.id).unwrap().status, CallStatus::Missed);
        assert!(registry.miss(&call.id).is_none());
    }

    #[test]
    fn test_ring_timeout_after_answer_is_ignored() {
        let registry = CallRegistry::new();
        let call = direct_call(&registry);
        registry.accept(&call.id, "bob").unwrap();

        assert!(registry.miss(&call.id).is_none());
        assert_eq!(registry.get(&call.id).unwrap().status, CallStatus::Ongoing);
    }

    #[test]
    fn test_outsiders_cannot_touch_direct_calls() {
        let registry = CallRegistry::new();
        let call = direct_call(&registry);

        assert!(!registry.is_party(&call.id, "mallory"));
        assert!(matches!(registry.accept(&call.id, "mallory"), Err(AppError::Forbidden(_))));
        assert!(matches!(registry.end(&call.id, "mallory"), Err(AppError::Forbidden(_))));
        assert!(registry.initiate(None, "alice", ChatTarget::Individual("alice".into()), CallKind::Video).is_err());
    }

    #[test]
    fn test_group_call_completes_when_one_member_remains() {
        let registry = CallRegistry::new();
        let call = registry
            .initiate(Some("c1".into()), "alice", ChatTarget::Event("evt".into()), CallKind::Video)
            .unwrap();

        // One member declining does not end an event call
        assert_eq!(registry.reject("c1", "carol").unwrap().status, CallStatus::Initiated);

        registry.accept(&call.id, "bob").unwrap();
        registry.accept(&call.id, "dave").unwrap();

        assert_eq!(registry.end("c1", "alice").unwrap().status, CallStatus::Ongoing);
        let ended = registry.end("c1", "bob").unwrap();
        assert_eq!(ended.status, CallStatus::Completed);
        assert_eq!(ended.participants.len(), 3);
    }

    #[test]
    fn test_abandon_ends_users_calls() {
        let registry = CallRegistry::new();
        let call = direct_call(&registry);
        registry.accept(&call.id, "bob").unwrap();

        let changed = registry.abandon("bob");
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].status, CallStatus::Completed);
        assert!(registry.abandon("bob").is_empty());
    }

    #[test]
    fn test_callee_leaving_while_ringing_misses_the_call() {
        let registry = CallRegistry::new();
        direct_call(&registry);

        let changed = registry.abandon("bob");
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].status, CallStatus::Missed);

        // The caller leaving first is still a cancellation
        direct_call(&registry);
        let changed = registry.abandon("alice");
        assert_eq!(changed[0].status, CallStatus::Cancelled);
    }

    #[test]
    fn test_duration_counts_from_answer() {
        let registry = CallRegistry::new();
        let call = direct_call(&registry);
        let ended = registry.reject(&call.id, "bob").unwrap();
        assert_eq!(ended.summary().duration_secs, 0);
        assert_eq!(ended.summary().participants, vec!["alice".to_string()]);
    }
}
