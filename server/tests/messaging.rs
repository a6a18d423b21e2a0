//! Messaging scenarios against the library API

mod common;

use std::time::Duration;

use common::TestApp;
use eventhub_server::error::AppError;
use eventhub_server::models::*;

fn text_to(recipient: &User, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        recipient_id: Some(recipient.id.clone()),
        body: Some(body.to_string()),
        ..Default::default()
    }
}

fn text_in(event: &Event, body: &str) -> SendMessageRequest {
    SendMessageRequest {
        event_id: Some(event.id.clone()),
        body: Some(body.to_string()),
        ..Default::default()
    }
}

fn bodies(page: &HistoryPage) -> Vec<&str> {
    page.messages.iter().map(|m| m.message.body.as_str()).collect()
}

#[tokio::test]
async fn test_direct_history_is_ascending_and_paged() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    for body in ["one", "two", "three"] {
        messaging.send_message(&alice, text_to(&bob, body)).await.unwrap();
    }

    let page = messaging
        .history(&bob.id, ChatType::Individual, &alice.id, HistoryParams::default())
        .await
        .unwrap();
    assert_eq!(bodies(&page), vec!["one", "two", "three"]);
    assert!(!page.pagination.has_more);

    let newest = messaging
        .history(
            &bob.id,
            ChatType::Individual,
            &alice.id,
            HistoryParams { limit: Some(2), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(bodies(&newest), vec!["two", "three"]);
    assert!(newest.pagination.has_more);

    // Reading history leaves delivery state alone
    assert!(page.messages.iter().all(|m| m.message.status == DeliveryStatus::Sent));
}

#[tokio::test]
async fn test_addressing_is_validated() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let carol = app.user("Carol").await;
    let event = app.event("Meetup", &[&alice, &bob]).await;
    let messaging = &app.state.messaging;

    let err = messaging.send_message(&alice, text_to(&alice, "me")).await.unwrap_err();
    assert!(matches!(err, AppError::Validation(_)));

    let both = SendMessageRequest {
        recipient_id: Some(bob.id.clone()),
        event_id: Some(event.id.clone()),
        body: Some("hi".into()),
        ..Default::default()
    };
    assert!(matches!(
        messaging.send_message(&alice, both).await.unwrap_err(),
        AppError::Validation(_)
    ));

    let err = messaging.send_message(&carol, text_in(&event, "let me in")).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let missing = SendMessageRequest {
        event_id: Some("no-such-event".into()),
        body: Some("hi".into()),
        ..Default::default()
    };
    assert!(matches!(
        messaging.send_message(&alice, missing).await.unwrap_err(),
        AppError::NotFound(_)
    ));

    let system = SendMessageRequest {
        message_type: Some(MessageKind::System),
        ..text_to(&bob, "spoofed")
    };
    assert!(matches!(
        messaging.send_message(&alice, system).await.unwrap_err(),
        AppError::Validation(_)
    ));
}

#[tokio::test]
async fn test_new_message_reaches_both_sides_and_event_room() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let event = app.event("Meetup", &[&alice, &bob]).await;
    let messaging = &app.state.messaging;

    let mut a = app.connect(&alice).await;
    let mut b = app.connect(&bob).await;

    let sent = messaging.send_message(&alice, text_to(&bob, "hello")).await.unwrap();
    for client in [&mut a, &mut b] {
        let msg = client.wait_for(|m| matches!(m, WsServerMessage::NewMessage(_))).await;
        match msg {
            WsServerMessage::NewMessage(view) => assert_eq!(view.message.id, sent.message.id),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    messaging.send_message(&bob, text_in(&event, "group hello")).await.unwrap();
    let msg = a.wait_for(|m| matches!(m, WsServerMessage::NewMessage(_))).await;
    match msg {
        WsServerMessage::NewMessage(view) => {
            assert_eq!(view.message.event_id.as_deref(), Some(event.id.as_str()));
            assert_eq!(view.sender.as_ref().map(|s| s.name.as_str()), Some("Bob"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_online_recipient_gets_delivered_status() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let mut a = app.connect(&alice).await;
    let _b = app.connect(&bob).await;

    let sent = messaging.send_message(&alice, text_to(&bob, "ping")).await.unwrap();
    let msg = a.wait_for(|m| matches!(m, WsServerMessage::MessageStatus(_))).await;
    match msg {
        WsServerMessage::MessageStatus(update) => {
            assert_eq!(update.message_ids, vec![sent.message.id.clone()]);
            assert_eq!(update.status, DeliveryStatus::Delivered);
            assert_eq!(update.user_ids, vec![bob.id.clone()]);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let stored = app.state.storage.find_message(&sent.message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Delivered);
    assert!(stored.delivered_at.is_some());
}

#[tokio::test]
async fn test_reconnect_delivers_pending_and_offline_users_are_notified() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let mut a = app.connect(&alice).await;
    let first = messaging.send_message(&alice, text_to(&bob, "first")).await.unwrap();
    let second = messaging.send_message(&alice, text_to(&bob, "second")).await.unwrap();

    // Deferred check runs while bob is away
    tokio::time::sleep(Duration::from_millis(200)).await;
    let stored = app.state.storage.find_message(&first.message.id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Sent);

    let notified: Vec<String> = app
        .notifier
        .sent
        .lock()
        .unwrap()
        .iter()
        .filter(|(user, _)| *user == bob.id)
        .map(|(_, id)| id.clone())
        .collect();
    assert_eq!(notified.len(), 2);

    a.drain();
    let _b = app.connect(&bob).await;
    let msg = a.wait_for(|m| matches!(m, WsServerMessage::MessageStatus(_))).await;
    match msg {
        WsServerMessage::MessageStatus(update) => {
            assert_eq!(update.message_ids, vec![first.message.id.clone(), second.message.id.clone()]);
            assert_eq!(update.user_ids, vec![bob.id.clone()]);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_mark_read_notifies_each_sender_once() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let mut a = app.connect(&alice).await;
    messaging.send_message(&alice, text_to(&bob, "one")).await.unwrap();
    messaging.send_message(&alice, text_to(&bob, "two")).await.unwrap();

    let req = MarkReadRequest {
        chat_id: alice.id.clone(),
        chat_type: ChatType::Individual,
        message_ids: None,
    };
    let read = messaging.mark_as_read(&bob.id, req.clone()).await.unwrap();
    assert_eq!(read.len(), 2);

    let msg = a.wait_for(|m| matches!(m, WsServerMessage::MessagesRead(_))).await;
    match msg {
        WsServerMessage::MessagesRead(receipt) => {
            assert_eq!(receipt.reader_id, bob.id);
            assert_eq!(receipt.chat_id, bob.id);
            assert_eq!(receipt.message_ids.len(), 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    // Repeating changes nothing and emits nothing
    assert!(messaging.mark_as_read(&bob.id, req).await.unwrap().is_empty());
    let extra = a
        .drain()
        .into_iter()
        .filter(|m| matches!(m, WsServerMessage::MessagesRead(_)))
        .count();
    assert_eq!(extra, 0);

    let stats = messaging.stats(&bob.id).await.unwrap();
    assert_eq!(stats.received, 2);
    assert_eq!(stats.unread, 0);
}

#[tokio::test]
async fn test_event_read_receipts_are_per_user() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let carol = app.user("Carol").await;
    let event = app.event("Meetup", &[&alice, &bob, &carol]).await;
    let messaging = &app.state.messaging;

    let sent = messaging.send_message(&alice, text_in(&event, "agenda")).await.unwrap();
    let req = MarkReadRequest {
        chat_id: event.id.clone(),
        chat_type: ChatType::Event,
        message_ids: Some(vec![sent.message.id.clone()]),
    };
    messaging.mark_as_read(&bob.id, req).await.unwrap();

    let stored = app.state.storage.find_message(&sent.message.id).await.unwrap().unwrap();
    assert!(stored.is_read_by(&bob.id));
    assert!(!stored.is_read_by(&carol.id));
    assert_eq!(stored.status, DeliveryStatus::Sent);
}

#[tokio::test]
async fn test_forward_fans_out_and_reports_failures() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let carol = app.user("Carol").await;
    let event = app.event("Meetup", &[&alice, &carol]).await;
    let messaging = &app.state.messaging;

    let root = messaging.send_message(&alice, text_to(&bob, "news")).await.unwrap();

    let outcome = messaging
        .forward(
            &alice,
            &root.message.id,
            ForwardRequest {
                recipients: vec![carol.id.clone(), "missing-user".into(), carol.id.clone()],
                events: vec![event.id.clone()],
            },
        )
        .await
        .unwrap();

    assert_eq!(outcome.forwarded, 2);
    assert_eq!(outcome.failures.len(), 1);
    assert_eq!(outcome.failures[0].target, ChatTarget::Individual("missing-user".into()));
    for copy in &outcome.messages {
        let lineage = copy.message.forwarded_from.as_ref().unwrap();
        assert_eq!(lineage.message_id, root.message.id);
        assert_eq!(lineage.original_sender, alice.id);
    }

    // Re-forwarding a copy still points at the root
    let copy_to_carol = outcome
        .messages
        .iter()
        .find(|m| m.message.recipient_id.as_deref() == Some(carol.id.as_str()))
        .unwrap();
    let again = messaging
        .forward(
            &carol,
            &copy_to_carol.message.id,
            ForwardRequest { recipients: vec![bob.id.clone()], events: vec![] },
        )
        .await
        .unwrap();
    assert_eq!(again.forwarded, 1);
    assert_eq!(
        again.messages[0].message.forwarded_from.as_ref().unwrap().message_id,
        root.message.id
    );

    let stored = app.state.storage.find_message(&root.message.id).await.unwrap().unwrap();
    assert_eq!(stored.forward_count, 3);
}

#[tokio::test]
async fn test_reply_carries_snippet_and_targets_other_side() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let original = messaging.send_message(&alice, text_to(&bob, "are you coming?")).await.unwrap();
    let reply = messaging
        .reply(
            &bob,
            &original.message.id,
            ReplyRequest { body: Some("yes".into()), ..Default::default() },
        )
        .await
        .unwrap();

    assert_eq!(reply.message.recipient_id.as_deref(), Some(alice.id.as_str()));
    let reply_to = reply.message.reply_to.unwrap();
    assert_eq!(reply_to.message_id, original.message.id);
    assert_eq!(reply_to.snippet, "are you coming?");
    assert_eq!(reply_to.sender_name, "Alice");
}

#[tokio::test]
async fn test_reactions_replace_per_user() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let carol = app.user("Carol").await;
    let messaging = &app.state.messaging;

    let sent = messaging.send_message(&alice, text_to(&bob, "party!")).await.unwrap();
    let id = &sent.message.id;

    messaging.react(&bob.id, id, "👍").await.unwrap();
    let reactions = messaging.react(&bob.id, id, "❤️").await.unwrap();
    assert_eq!(reactions.len(), 1);
    assert_eq!(reactions[0].emoji, "❤️");

    assert_eq!(messaging.react(&alice.id, id, "🎉").await.unwrap().len(), 2);
    assert_eq!(messaging.unreact(&bob.id, id).await.unwrap().len(), 1);

    assert!(matches!(
        messaging.react(&carol.id, id, "👀").await.unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert!(matches!(
        messaging.react(&bob.id, id, "  ").await.unwrap_err(),
        AppError::Validation(_)
    ));
}

#[tokio::test]
async fn test_delete_for_me_and_for_everyone() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let kept = messaging.send_message(&alice, text_to(&bob, "kept")).await.unwrap();
    let gone = messaging.send_message(&alice, text_to(&bob, "gone")).await.unwrap();

    assert!(matches!(
        messaging.delete(&bob.id, &gone.message.id, true).await.unwrap_err(),
        AppError::Forbidden(_)
    ));

    messaging.delete(&bob.id, &kept.message.id, false).await.unwrap();
    let bobs = messaging
        .history(&bob.id, ChatType::Individual, &alice.id, HistoryParams::default())
        .await
        .unwrap();
    assert_eq!(bodies(&bobs), vec!["gone"]);
    let alices = messaging
        .history(&alice.id, ChatType::Individual, &bob.id, HistoryParams::default())
        .await
        .unwrap();
    assert_eq!(bodies(&alices), vec!["kept", "gone"]);

    let mut b = app.connect(&bob).await;
    messaging.delete(&alice.id, &gone.message.id, true).await.unwrap();
    let msg = b.wait_for(|m| matches!(m, WsServerMessage::MessageDeleted(_))).await;
    match msg {
        WsServerMessage::MessageDeleted(deleted) => {
            assert_eq!(deleted.message_id, gone.message.id);
            assert!(deleted.deleted_for_everyone);
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(app.state.storage.find_message(&gone.message.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_search_and_starred() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let carol = app.user("Carol").await;
    let messaging = &app.state.messaging;

    let hello = messaging.send_message(&alice, text_to(&bob, "Hello Bob")).await.unwrap();
    messaging.send_message(&alice, text_to(&bob, "goodbye")).await.unwrap();
    messaging.send_message(&alice, text_to(&carol, "hello carol")).await.unwrap();

    let found = messaging
        .search(&bob.id, SearchParams { query: "HELLO".into(), ..Default::default() })
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].message.id, hello.message.id);

    assert!(matches!(
        messaging.search(&bob.id, SearchParams::default()).await.unwrap_err(),
        AppError::Validation(_)
    ));

    assert!(messaging.toggle_star(&bob.id, &hello.message.id).await.unwrap().starred);
    let starred = messaging.starred(&bob.id, PageParams::default()).await.unwrap();
    assert_eq!(starred.messages.len(), 1);
    // Stars are personal
    assert!(messaging.starred(&alice.id, PageParams::default()).await.unwrap().messages.is_empty());

    assert!(!messaging.toggle_star(&bob.id, &hello.message.id).await.unwrap().starred);
    assert!(messaging.starred(&bob.id, PageParams::default()).await.unwrap().messages.is_empty());
}

#[tokio::test]
async fn test_conversations_merge_direct_and_event_chats() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let carol = app.user("Carol").await;
    let event = app.event("Board Games", &[&alice, &carol]).await;
    let messaging = &app.state.messaging;

    messaging.send_message(&bob, text_to(&alice, "hi")).await.unwrap();
    messaging.send_message(&bob, text_to(&alice, "you there?")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    messaging.send_message(&carol, text_in(&event, "tonight?")).await.unwrap();

    let page = messaging.conversations(&alice.id, ConversationParams::default()).await.unwrap();
    assert_eq!(page.pagination.total, Some(2));
    assert_eq!(page.conversations[0].chat_id(), event.id);
    assert_eq!(page.conversations[1].chat_id(), bob.id);
    assert_eq!(page.conversations[1].unread_count(), 2);
    assert_eq!(page.conversations[0].unread_count(), 1);

    let filtered = messaging
        .conversations(
            &alice.id,
            ConversationParams { search: Some("board".into()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(filtered.conversations.len(), 1);
    assert!(matches!(filtered.conversations[0], Conversation::Event { .. }));
}

#[tokio::test]
async fn test_reports_reach_admins_and_moderation_stays_private() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let moderator = app.admin("Mod").await;
    let messaging = &app.state.messaging;

    let mut m = app.connect(&moderator).await;
    let sent = messaging.send_message(&alice, text_to(&bob, "buy now")).await.unwrap();
    let id = &sent.message.id;

    let count = messaging
        .report(&bob, id, ReportRequest { reason: "spam".into() })
        .await
        .unwrap();
    assert_eq!(count, 1);
    let msg = m.wait_for(|e| matches!(e, WsServerMessage::MessageReported(_))).await;
    match msg {
        WsServerMessage::MessageReported(notice) => {
            assert_eq!(notice.reporter_id, bob.id);
            assert_eq!(notice.report_count, 1);
        }
        other => panic!("unexpected event: {:?}", other),
    }

    assert!(matches!(
        messaging.report(&bob, id, ReportRequest { reason: "again".into() }).await.unwrap_err(),
        AppError::Validation(_)
    ));
    assert!(matches!(
        messaging.report(&alice, id, ReportRequest { reason: "mine".into() }).await.unwrap_err(),
        AppError::Validation(_)
    ));

    let label = LabelRequest { label: "spam".into(), category: Some("abuse".into()) };
    assert!(matches!(
        messaging.add_label(&bob, id, label.clone()).await.unwrap_err(),
        AppError::Forbidden(_)
    ));
    messaging.add_label(&moderator, id, label).await.unwrap();
    messaging
        .add_note(&moderator, id, NoteRequest { note: "repeat offender".into() })
        .await
        .unwrap();

    let record = messaging.moderation_record(&moderator, id).await.unwrap();
    assert_eq!(record.admin_labels.len(), 1);
    assert_eq!(record.admin_labels[0].category.as_deref(), Some("abuse"));
    assert_eq!(record.internal_notes.len(), 1);
    assert_eq!(record.reports.len(), 1);

    let labelled = messaging
        .filter_by_label(
            &moderator,
            LabelFilterParams { label: Some("spam".into()), ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(labelled.messages.len(), 1);

    // End-user payloads never carry moderation data
    let page = messaging
        .history(&bob.id, ChatType::Individual, &alice.id, HistoryParams::default())
        .await
        .unwrap();
    let json = serde_json::to_value(&page.messages[0]).unwrap();
    assert!(json.get("adminLabels").is_none());
    assert!(json.get("internalNotes").is_none());
    assert!(json.get("reports").is_none());
}

#[tokio::test]
async fn test_typing_is_relayed_to_the_other_user() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let a = app.connect(&alice).await;
    let mut b = app.connect(&bob).await;

    messaging.handle_typing(
        &alice.id,
        a.conn,
        TypingSignal { chat_id: bob.id.clone(), chat_type: ChatType::Individual, is_typing: true },
    );

    let msg = b.wait_for(|m| matches!(m, WsServerMessage::Typing(_))).await;
    match msg {
        WsServerMessage::Typing(notice) => {
            assert_eq!(notice.user_id, alice.id);
            assert_eq!(notice.chat_id, alice.id);
            assert!(notice.is_typing);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_presence_follows_last_connection() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let mut a = app.connect(&alice).await;
    let b1 = app.connect(&bob).await;
    let b2 = app.connect(&bob).await;
    a.drain();

    messaging.disconnect(&bob.id, b1.conn).await;
    let status = messaging.online_status(OnlineParams { user_ids: Some(bob.id.clone()) });
    assert!(status[0].online);
    assert!(a.drain().iter().all(|m| !matches!(m, WsServerMessage::UserOffline(_))));

    messaging.disconnect(&bob.id, b2.conn).await;
    let status = messaging.online_status(OnlineParams { user_ids: Some(bob.id.clone()) });
    assert!(!status[0].online);
    assert!(status[0].last_seen.is_some());

    let offline = a.wait_for(|m| matches!(m, WsServerMessage::UserOffline(_))).await;
    match offline {
        WsServerMessage::UserOffline(change) => assert_eq!(change.user_id, bob.id),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_call_to_offline_user_is_logged_as_missed() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let messaging = &app.state.messaging;

    let mut a = app.connect(&alice).await;
    messaging
        .initiate_call(
            &alice.id,
            a.conn,
            CallInitiate { call_id: None, to: Some(bob.id.clone()), event_id: None, call_type: CallKind::Audio },
        )
        .await
        .unwrap();

    let ended = a.wait_for(|m| matches!(m, WsServerMessage::CallEnded(_))).await;
    match ended {
        WsServerMessage::CallEnded(session) => assert_eq!(session.status, CallStatus::Missed),
        other => panic!("unexpected event: {:?}", other),
    }

    let page = messaging
        .history(&alice.id, ChatType::Individual, &bob.id, HistoryParams::default())
        .await
        .unwrap();
    assert_eq!(page.messages.len(), 1);
    let logged = &page.messages[0].message;
    assert_eq!(logged.kind, MessageKind::Call);
    assert_eq!(logged.body, "Missed audio call");
    assert_eq!(logged.call.as_ref().map(|c| c.status), Some(CallStatus::Missed));
}

#[tokio::test]
async fn test_answered_call_completes_when_initiator_hangs_up() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let carol = app.user("Carol").await;
    let messaging = &app.state.messaging;

    let a = app.connect(&alice).await;
    let mut b = app.connect(&bob).await;

    let session = messaging
        .initiate_call(
            &alice.id,
            a.conn,
            CallInitiate {
                call_id: Some("call-1".into()),
                to: Some(bob.id.clone()),
                event_id: None,
                call_type: CallKind::Video,
            },
        )
        .await
        .unwrap();
    b.wait_for(|m| matches!(m, WsServerMessage::IncomingCall(_))).await;

    // Only call members may signal or answer
    let signal = RtcSignal { call_id: session.id.clone(), to: bob.id.clone(), signal: serde_json::json!({"sdp": "x"}) };
    assert!(matches!(
        messaging.relay_signal(&carol.id, signal.clone()).await.unwrap_err(),
        AppError::Forbidden(_)
    ));
    assert!(messaging.accept_call(&carol.id, &session.id).await.is_err());

    messaging.relay_signal(&alice.id, signal).await.unwrap();
    b.wait_for(|m| matches!(m, WsServerMessage::RtcSignal(_))).await;

    let accepted = messaging.accept_call(&bob.id, &session.id).await.unwrap();
    assert_eq!(accepted.status, CallStatus::Ongoing);

    let ended = messaging.end_call(&alice.id, &session.id).await.unwrap();
    assert_eq!(ended.status, CallStatus::Completed);

    let logged = b
        .wait_for(|m| matches!(m, WsServerMessage::NewMessage(v) if v.message.kind == MessageKind::Call))
        .await;
    match logged {
        WsServerMessage::NewMessage(view) => {
            let call = view.message.call.as_ref().unwrap();
            assert_eq!(call.call_id, "call-1");
            assert_eq!(call.status, CallStatus::Completed);
            assert_eq!(call.participants.len(), 2);
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_new_event_member_sees_empty_event_conversation() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let event = app.event("Launch Party", &[&alice]).await;

    let page = app
        .state
        .messaging
        .conversations(&alice.id, ConversationParams::default())
        .await
        .unwrap();

    assert_eq!(page.conversations.len(), 1);
    let conversation = &page.conversations[0];
    assert_eq!(conversation.chat_id(), event.id);
    assert!(conversation.last_message().is_none());
    assert_eq!(conversation.unread_count(), 0);
}

#[tokio::test]
async fn test_status_never_moves_backwards() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let storage = &app.state.storage;

    let sent = app.state.messaging.send_message(&alice, text_to(&bob, "hi")).await.unwrap();
    let id = sent.message.id.clone();

    assert!(storage.update_status(&id, DeliveryStatus::Read, &bob.id).await.unwrap());
    assert!(!storage.update_status(&id, DeliveryStatus::Delivered, &bob.id).await.unwrap());
    assert!(!storage.update_status(&id, DeliveryStatus::Sent, &bob.id).await.unwrap());
    assert!(!storage.update_status(&id, DeliveryStatus::Read, &bob.id).await.unwrap());

    let stored = storage.find_message(&id).await.unwrap().unwrap();
    assert_eq!(stored.status, DeliveryStatus::Read);
    // Read implies delivered
    assert!(stored.delivered_at.is_some());
}

#[tokio::test]
async fn test_removed_participant_loses_event_access() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let event = app.event("Meetup", &[&alice, &bob]).await;
    let messaging = &app.state.messaging;

    messaging.send_message(&bob, text_in(&event, "before")).await.unwrap();
    app.state.storage.set_participant_status(&event.id, &bob.id, "left").await.unwrap();

    let err = messaging.send_message(&bob, text_in(&event, "after")).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let page = messaging.conversations(&bob.id, ConversationParams::default()).await.unwrap();
    assert!(page.conversations.iter().all(|c| c.chat_id() != event.id));
}

#[tokio::test]
async fn test_revoked_tokens_stop_authenticating() {
    let app = TestApp::new().await;
    let alice = app.user("Alice").await;
    let bob = app.user("Bob").await;
    let storage = &app.state.storage;

    let first = app.token(&alice).await;
    let second = app.token(&alice).await;
    storage.invalidate_session(&first).await.unwrap();
    assert!(storage.authenticate_token(&first).await.unwrap().is_none());
    assert!(storage.authenticate_token(&second).await.unwrap().is_some());

    let bob_token = app.token(&bob).await;
    storage.deactivate_user(&bob.id).await.unwrap();
    assert!(storage.authenticate_token(&bob_token).await.unwrap().is_none());
}
