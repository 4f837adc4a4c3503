// tests/conversation_flow.rs


use std::sync::Arc;
use std::time::Duration;

use albany::chat::{ChatEvent, Conversation, Phase, SubmitInput};
use albany::context::SelectedEntity;
use albany::error::ChatError;
use albany::session::{InMemorySessionStore, SessionBridge};

use test_helpers::{
    next_event, recv_until, seeded_lookup, DelayedLookup, Frame, ScriptedSource,
    UnreachableSource,
};

fn bridge(store: Arc<InMemorySessionStore>) -> Arc<SessionBridge> {
    Arc::new(SessionBridge::new(store, true))
}

#[tokio::test]
async fn full_exchange_resolves_citations_and_persists() {
    let lookup = seeded_lookup().await;
    let store = Arc::new(InMemorySessionStore::default());
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes("data: {\"choices\":[{\"delta\":{\"content\":\"Bill A00405 \"}}]}\n\n"),
        Frame::Bytes(
            "data: {\"choices\":[{\"delta\":{\"content\":\"addresses tenant protections.\"}}]}\n\n",
        ),
        Frame::Bytes("data: [DONE]\n\n"),
    ]]);
    let store_bridge = bridge(store);
    let (conversation, mut events) =
        Conversation::new(source, lookup, store_bridge.clone(), None);

    conversation
        .submit(SubmitInput::text("Tell me about bill A00405"))
        .await
        .expect("submit");

    assert_eq!(conversation.phase(), Phase::Idle);
    let messages = conversation.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Tell me about bill A00405");

    let assistant = &messages[1];
    assert!(!assistant.is_streaming);
    assert_eq!(assistant.content, "Bill A00405 addresses tenant protections.");
    assert_eq!(assistant.citations.len(), 1);
    assert_eq!(assistant.citations[0].code, "A00405");
    assert_eq!(assistant.citations[0].group_key.as_deref(), Some("Housing"));

    // Event order: thinking first, deltas, then the settled text and citations
    assert!(matches!(next_event(&mut events).await, ChatEvent::Thinking { .. }));
    let delta = recv_until(&mut events, |e| matches!(e, ChatEvent::Delta { .. })).await;
    if let ChatEvent::Delta { text, .. } = delta {
        assert_eq!(text, "Bill A00405 ");
    }
    recv_until(&mut events, |e| matches!(e, ChatEvent::Settled { .. })).await;
    let citations = recv_until(&mut events, |e| matches!(e, ChatEvent::Citations { .. })).await;
    if let ChatEvent::Citations { citations, .. } = citations {
        assert_eq!(citations.len(), 1);
    }

    // Related entities arrive late, from the cited bill's committee
    let related = recv_until(&mut events, |e| matches!(e, ChatEvent::Related { .. })).await;
    if let ChatEvent::Related { entities, .. } = related {
        assert!(!entities.is_empty());
        assert!(entities.iter().all(|c| c.code != "A00405"));
    }
    let related_on_message = conversation.messages()[1].related_entities.clone();
    assert!(!related_on_message.is_empty());

    // The session was created lazily and the full exchange persisted
    let session_id = conversation.session_id().expect("session created");
    let mut persisted = Vec::new();
    for _ in 0..100 {
        if let Some(loaded) = store_bridge.load_session(session_id).await {
            if loaded.len() == 2 {
                persisted = loaded;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(persisted.len(), 2);
    assert_eq!(persisted[1].citations.len(), 1);
}

#[tokio::test]
async fn transport_failure_retains_partial_content() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes("data: {\"choices\":[{\"delta\":{\"content\":\"The committee \"}}]}\n\n"),
        Frame::Error("connection reset"),
    ]]);
    let (conversation, mut events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    conversation
        .submit(SubmitInput::text("What happened in committee today?"))
        .await
        .expect("submit degrades, not fails");

    let messages = conversation.messages();
    let assistant = &messages[1];
    assert!(!assistant.is_streaming);
    assert_eq!(assistant.content, "The committee ");
    assert_eq!(conversation.phase(), Phase::Idle);

    recv_until(&mut events, |e| matches!(e, ChatEvent::Error { .. })).await;
}

#[tokio::test]
async fn open_failure_surfaces_notice_and_recovers() {
    let lookup = seeded_lookup().await;
    let (conversation, mut events) = Conversation::new(
        Arc::new(UnreachableSource),
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    conversation
        .submit(SubmitInput::text("hello"))
        .await
        .expect("submit degrades, not fails");

    let assistant = &conversation.messages()[1];
    assert!(!assistant.is_streaming);
    assert!(assistant.content.contains("encountered an error"));
    assert_eq!(conversation.phase(), Phase::Idle);
    recv_until(&mut events, |e| matches!(e, ChatEvent::Error { .. })).await;
}

#[tokio::test]
async fn cancel_mid_stream_keeps_partial_without_notice() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::held_open(vec![vec![Frame::Bytes(
        "data: {\"choices\":[{\"delta\":{\"content\":\"Partial answer\"}}]}\n\n",
    )]]);
    let (conversation, mut events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    let submitter = conversation.clone();
    let handle = tokio::spawn(async move {
        submitter.submit(SubmitInput::text("long question")).await
    });

    recv_until(&mut events, |e| matches!(e, ChatEvent::Delta { .. })).await;
    conversation.stop();
    handle.await.expect("join").expect("submit");

    recv_until(&mut events, |e| matches!(e, ChatEvent::Canceled { .. })).await;
    let assistant = &conversation.messages()[1];
    assert_eq!(assistant.content, "Partial answer");
    assert!(!assistant.is_streaming);
    assert_eq!(conversation.phase(), Phase::Idle);
}

#[tokio::test]
async fn second_submission_while_streaming_is_a_no_op() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::held_open(vec![vec![Frame::Bytes(
        "data: {\"choices\":[{\"delta\":{\"content\":\"thinking\"}}]}\n\n",
    )]]);
    let (conversation, mut events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    let submitter = conversation.clone();
    let handle =
        tokio::spawn(async move { submitter.submit(SubmitInput::text("first")).await });
    recv_until(&mut events, |e| matches!(e, ChatEvent::Delta { .. })).await;

    conversation
        .submit(SubmitInput::text("second while busy"))
        .await
        .expect("rejected as no-op");
    assert_eq!(conversation.messages().len(), 2);

    conversation.stop();
    handle.await.expect("join").expect("submit");
    assert_eq!(conversation.messages().len(), 2);
}

#[tokio::test]
async fn reset_mid_stream_leaves_the_next_exchange_live() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::held_open(vec![
        vec![Frame::Bytes(
            "data: {\"choices\":[{\"delta\":{\"content\":\"first\"}}]}\n\n",
        )],
        vec![Frame::Bytes(
            "data: {\"choices\":[{\"delta\":{\"content\":\"second\"}}]}\n\n",
        )],
    ]);
    let (conversation, mut events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    let first = conversation.clone();
    let first_handle =
        tokio::spawn(async move { first.submit(SubmitInput::text("one")).await });
    recv_until(&mut events, |e| matches!(e, ChatEvent::Delta { .. })).await;

    conversation.new_chat();

    let second = conversation.clone();
    let second_handle =
        tokio::spawn(async move { second.submit(SubmitInput::text("two")).await });
    recv_until(&mut events, |e| matches!(e, ChatEvent::Delta { .. })).await;
    // Wait out the aborted exchange's teardown before inspecting the machine
    first_handle.await.expect("join").expect("first submit");

    assert_eq!(conversation.phase(), Phase::Streaming);
    assert_eq!(conversation.messages().len(), 2);

    // The abort handle still belongs to the live exchange
    conversation.stop();
    second_handle.await.expect("join").expect("second submit");
    recv_until(&mut events, |e| matches!(e, ChatEvent::Canceled { .. })).await;
    assert_eq!(conversation.phase(), Phase::Idle);
    assert_eq!(conversation.messages()[1].content, "second");
}

#[tokio::test]
async fn quota_refusal_causes_no_state_transition() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes("data: {\"choices\":[{\"delta\":{\"content\":\"ok\"}}]}\n\n"),
        Frame::Bytes("data: [DONE]\n\n"),
    ]]);
    let (conversation, _events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    let oversized = "word ".repeat(2001);
    let err = conversation
        .submit(SubmitInput::text(oversized))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::QuotaExceeded { .. }));
    assert_eq!(conversation.phase(), Phase::Idle);
    assert!(conversation.messages().is_empty());
    assert!(conversation.session_id().is_none());

    // Refusal did not consume the budget; a normal submission proceeds
    conversation
        .submit(SubmitInput::text("short question"))
        .await
        .expect("submit");
    assert_eq!(conversation.messages().len(), 2);
}

#[tokio::test]
async fn reset_abandons_the_late_settlement_patch() {
    let lookup = DelayedLookup::new(seeded_lookup().await, Duration::from_millis(200));
    let store = Arc::new(InMemorySessionStore::default());
    let shared_bridge = bridge(store);
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Bill A00405 advanced.\"}}]}\n\n",
        ),
        Frame::Bytes("data: [DONE]\n\n"),
    ]]);
    let (conversation, mut events) =
        Conversation::new(source, lookup, shared_bridge.clone(), None);

    conversation
        .submit(SubmitInput::text("Tell me about bill A00405"))
        .await
        .expect("submit");
    let session_id = conversation.session_id().expect("session");
    assert_eq!(conversation.messages()[1].citations.len(), 1);

    // Reset while the related-entity pass is still sleeping in its task
    conversation.new_chat();
    tokio::time::sleep(Duration::from_millis(400)).await;

    // The stale patch neither touched the fresh state nor persisted
    assert!(conversation.messages().is_empty());
    let persisted = shared_bridge
        .load_session(session_id)
        .await
        .expect("session row");
    assert!(persisted.is_empty());
    while let Ok(event) = events.try_recv() {
        assert!(!matches!(event, ChatEvent::Related { .. }));
    }
}

#[tokio::test]
async fn empty_input_is_refused_without_state_change() {
    let lookup = seeded_lookup().await;
    let (conversation, _events) = Conversation::new(
        ScriptedSource::new(vec![]),
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    let err = conversation
        .submit(SubmitInput::text("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::EmptyInput));
    assert!(conversation.messages().is_empty());
    assert_eq!(conversation.phase(), Phase::Idle);
    assert!(conversation.session_id().is_none());
}

#[tokio::test]
async fn selection_only_submission_synthesizes_the_prompt() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes("data: {\"choices\":[{\"delta\":{\"content\":\"S256 is in committee.\"}}]}\n\n"),
        Frame::Bytes("data: [DONE]\n\n"),
    ]]);
    let (conversation, _events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    let input = SubmitInput {
        selected: vec![SelectedEntity::Bill {
            code: "S256".to_string(),
        }],
        ..Default::default()
    };
    conversation.submit(input).await.expect("submit");

    let messages = conversation.messages();
    assert_eq!(
        messages[0].content,
        "Tell me about bill S256, including its status, sponsors, and details"
    );
    assert!(conversation.session_id().is_some());
}

#[tokio::test]
async fn sonar_stream_yields_reasoning_and_numbered_citations() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes(
            "data: {\"citations\":[\"https://nysenate.gov/a00405\"],\"choices\":[{\"delta\":{\"content\":\"<think>checking the calendar\"}}]}\n\n",
        ),
        Frame::Bytes(
            "data: {\"choices\":[{\"delta\":{\"content\":\"</think>A00405 advanced today [1].\"}}]}\n\n",
        ),
        Frame::Bytes("data: [DONE]\n\n"),
    ]]);
    let (conversation, mut events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    let input = SubmitInput {
        text: "Any movement on A00405?".to_string(),
        model: Some("sonar-reasoning-pro".to_string()),
        ..Default::default()
    };
    conversation.submit(input).await.expect("submit");

    let reasoning_event =
        recv_until(&mut events, |e| matches!(e, ChatEvent::Reasoning { .. })).await;
    if let ChatEvent::Reasoning { text, .. } = reasoning_event {
        assert!(text.starts_with("checking the calendar"));
    }
    recv_until(&mut events, |e| matches!(e, ChatEvent::NumberedCitations { .. })).await;

    let assistant = &conversation.messages()[1];
    assert_eq!(assistant.content, "A00405 advanced today [1].");
    let reasoning = assistant.reasoning.as_ref().expect("reasoning retained");
    assert_eq!(reasoning.text, "checking the calendar");
    assert_eq!(assistant.numbered_citations.len(), 1);
    assert_eq!(assistant.numbered_citations[0].index, 1);
    assert_eq!(
        assistant.numbered_citations[0].source,
        "https://nysenate.gov/a00405"
    );
    // Entity-code citations resolve independently of numbered markers
    assert_eq!(assistant.citations.len(), 1);
    assert_eq!(assistant.citations[0].code, "A00405");
}

#[tokio::test]
async fn side_channel_block_is_stripped_and_reported() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes(
            "data: {\"choices\":[{\"delta\":{\"content\":\"The lobbyist filed twice.\\n\\n===CLIENTS===\\n- Acme Corp\\n\"}}]}\n\n",
        ),
        Frame::Bytes(
            "data: {\"choices\":[{\"delta\":{\"content\":\"- Empire Health\\n===END CLIENTS===\"}}]}\n\n",
        ),
        Frame::Bytes("data: [DONE]\n\n"),
    ]]);
    let (conversation, mut events) = Conversation::new(
        source,
        lookup,
        bridge(Arc::new(InMemorySessionStore::default())),
        None,
    );

    conversation
        .submit(SubmitInput::text("Who does this lobbyist represent?"))
        .await
        .expect("submit");

    // First delta carries a partial list, still extracting
    let partial =
        recv_until(&mut events, |e| matches!(e, ChatEvent::SideChannel { .. })).await;
    if let ChatEvent::SideChannel {
        entities,
        still_extracting,
        ..
    } = partial
    {
        assert_eq!(entities, vec!["Acme Corp"]);
        assert!(still_extracting);
    }

    let assistant = &conversation.messages()[1];
    assert_eq!(assistant.content, "The lobbyist filed twice.");
    assert_eq!(
        assistant.side_channel_entities,
        vec!["Acme Corp", "Empire Health"]
    );
}

#[tokio::test]
async fn persisted_session_resumes_in_a_fresh_conversation() {
    let lookup = seeded_lookup().await;
    let store = Arc::new(InMemorySessionStore::default());
    let shared_bridge = bridge(store);
    let source = ScriptedSource::new(vec![vec![
        Frame::Bytes("data: {\"choices\":[{\"delta\":{\"content\":\"Bill A00405 advanced.\"}}]}\n\n"),
        Frame::Bytes("data: [DONE]\n\n"),
    ]]);

    let (first, mut events) =
        Conversation::new(source, lookup.clone(), shared_bridge.clone(), None);
    first
        .submit(SubmitInput::text("Tell me about bill A00405"))
        .await
        .expect("submit");
    let session_id = first.session_id().expect("session");
    // Persistence runs after the related pass; wait for it
    recv_until(&mut events, |e| matches!(e, ChatEvent::Related { .. })).await;
    for _ in 0..100 {
        if shared_bridge
            .load_session(session_id)
            .await
            .is_some_and(|m| m.len() == 2)
        {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let (second, _events) = Conversation::new(
        ScriptedSource::new(vec![]),
        lookup,
        shared_bridge,
        None,
    );
    assert!(second.load_session(session_id).await);
    let messages = second.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(messages[0].content, "Tell me about bill A00405");
    assert_eq!(messages[1].content, "Bill A00405 advanced.");
    assert!(messages.iter().all(|m| !m.is_streaming));
    assert_eq!(messages[1].citations.len(), 1);
    assert_eq!(second.session_id(), Some(session_id));

    assert!(!second.load_session(9999).await);
    assert!(second.messages().is_empty());
}

#[tokio::test]
async fn new_chat_resets_and_allows_a_fresh_exchange() {
    let lookup = seeded_lookup().await;
    let source = ScriptedSource::new(vec![
        vec![
            Frame::Bytes("data: {\"choices\":[{\"delta\":{\"content\":\"first answer\"}}]}\n\n"),
            Frame::Bytes("data: [DONE]\n\n"),
        ],
        vec![
            Frame::Bytes("data: {\"choices\":[{\"delta\":{\"content\":\"second answer\"}}]}\n\n"),
            Frame::Bytes("data: [DONE]\n\n"),
        ],
    ]);
    let store = Arc::new(InMemorySessionStore::default());
    let (conversation, _events) = Conversation::new(source, lookup, bridge(store), None);

    conversation
        .submit(SubmitInput::text("first question"))
        .await
        .expect("submit");
    let first_session = conversation.session_id();
    assert!(first_session.is_some());

    conversation.new_chat();
    assert!(conversation.messages().is_empty());
    assert!(conversation.session_id().is_none());

    conversation
        .submit(SubmitInput::text("second question"))
        .await
        .expect("submit");
    assert_eq!(conversation.messages().len(), 2);
    assert_ne!(conversation.session_id(), first_session);
}
