// Integration tests for session registration, liveness and shutdown

mod common;

use caption_sessions::{
    AttachError, ChannelSender, ErrorCode, InboundEvent, ManagerOptions, OutboundEvent,
    SessionKey, SessionManager, StaticSettings, StreamChannel,
};
use common::{collect_until_closed, mock_settings, next_event, wait_until, Harness, MockRegistry};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(start_paused = true)]
async fn test_capacity_rejects_then_frees_slot() {
    let mut settings = mock_settings();
    settings.max_sessions = 1;
    let harness = Harness::new(settings).await;

    let (_first, _first_peer) = harness.open(1, 0).await;

    let (rejected, mut rejected_peer) = harness.attach(2, 0);
    assert_eq!(
        rejected.err(),
        Some(AttachError::CapacityExceeded { max: 1 })
    );

    let events = collect_until_closed(&mut rejected_peer).await;
    assert_eq!(events.len(), 2);
    match &events[0] {
        OutboundEvent::SessionError { code, fatal, .. } => {
            assert_eq!(*code, ErrorCode::CapacityExceeded);
            assert!(*fatal);
        }
        other => panic!("expected SessionError, got {:?}", other),
    }
    assert_eq!(harness.manager.session_count(), 1);

    assert_eq!(harness.manager.detach_tab(1), 1);
    assert_eq!(harness.manager.session_count(), 0);

    let (accepted, _peer) = harness.attach(2, 0);
    assert!(matches!(accepted, Ok(attached) if !attached.is_rebound()));
    assert!(harness.manager.session(&SessionKey::new(2, 0)).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_reattach_rebinds_existing_session() {
    let harness = Harness::new(mock_settings()).await;
    let (session, mut old_peer) = harness.open(1, 0).await;

    let (attached, mut new_peer) = harness.attach(1, 0);
    let attached = attached.unwrap();
    assert!(attached.is_rebound());
    assert_eq!(attached.session().id(), session.id());
    assert_eq!(harness.manager.session_count(), 1);

    // The replaced channel is closed without a Stopped event
    assert!(collect_until_closed(&mut old_peer).await.is_empty());

    new_peer.send(InboundEvent::Heartbeat { now: 1 }).await.unwrap();
    match next_event(&mut new_peer).await {
        OutboundEvent::Stats(stats) => assert_eq!(stats.reconnect_count, 1),
        other => panic!("expected Stats, got {:?}", other),
    }

    assert_eq!(
        harness
            .manager
            .recognizers()
            .ref_count(&harness.recognizer_key()),
        Some(1)
    );
    assert!(!session.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn test_channel_without_identity_is_rejected() {
    let harness = Harness::new(mock_settings()).await;
    let (channel, mut peer) = StreamChannel::pair(ChannelSender {
        tab_id: None,
        frame_id: Some(0),
        url: Some("https://example.com".to_string()),
    });

    let attached = harness.manager.attach_channel(channel);
    assert_eq!(attached.err(), Some(AttachError::MissingIdentity));

    match next_event(&mut peer).await {
        OutboundEvent::SessionError { code, .. } => assert_eq!(code, ErrorCode::InvalidChannel),
        other => panic!("expected SessionError, got {:?}", other),
    }
    assert_eq!(harness.manager.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_missing_frame_defaults_to_top_frame() {
    let harness = Harness::new(mock_settings()).await;
    let (channel, _peer) = StreamChannel::pair(ChannelSender {
        tab_id: Some(7),
        frame_id: None,
        url: None,
    });

    let attached = harness.manager.attach_channel(channel).unwrap();
    assert_eq!(attached.session().key(), SessionKey::new(7, 0));
}

#[tokio::test(start_paused = true)]
async fn test_detach_tab_disposes_every_frame() {
    let harness = Harness::new(mock_settings()).await;
    let (_a, mut peer_a) = harness.open(1, 0).await;
    let (_b, mut peer_b) = harness.open(1, 3).await;
    let (other, _peer_c) = harness.open(2, 0).await;

    assert_eq!(harness.manager.detach_tab(1), 2);
    assert_eq!(harness.manager.session_count(), 1);
    assert_eq!(harness.manager.sessions()[0].id(), other.id());

    for peer in [&mut peer_a, &mut peer_b] {
        assert_eq!(
            collect_until_closed(peer).await,
            vec![OutboundEvent::Stopped {
                reason: "tab detached".to_string()
            }]
        );
    }

    assert_eq!(harness.manager.detach_tab(99), 0);
}

#[tokio::test(start_paused = true)]
async fn test_silent_session_is_swept_after_timeout() {
    let harness = Harness::new(mock_settings()).await;
    let (_session, mut peer) = harness.open(1, 0).await;

    tokio::time::sleep(Duration::from_secs(19)).await;
    assert_eq!(harness.manager.session_count(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(harness.manager.session_count(), 0);

    assert_eq!(
        collect_until_closed(&mut peer).await,
        vec![OutboundEvent::Stopped {
            reason: "heartbeat timeout".to_string()
        }]
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeats_keep_session_alive() {
    let harness = Harness::new(mock_settings()).await;
    let (session, peer) = harness.open(1, 0).await;

    for i in 0..10 {
        tokio::time::sleep(Duration::from_secs(4)).await;
        peer.send(InboundEvent::Heartbeat { now: i }).await.unwrap();
    }
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(harness.manager.session_count(), 1);
    assert!(!session.is_disposed());
}

#[tokio::test(start_paused = true)]
async fn test_custom_sweep_timing() {
    let options = ManagerOptions {
        sweep_interval: Duration::from_millis(100),
        heartbeat_timeout: Duration::from_millis(500),
    };
    let harness = Harness::with_options(mock_settings(), options).await;
    let (_session, _peer) = harness.open(1, 0).await;

    tokio::time::sleep(Duration::from_millis(450)).await;
    assert_eq!(harness.manager.session_count(), 1);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(harness.manager.session_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_zero_sweep_interval_is_rejected() {
    let options = ManagerOptions {
        sweep_interval: Duration::ZERO,
        heartbeat_timeout: Duration::from_millis(500),
    };

    let created = SessionManager::create(
        Arc::new(StaticSettings::new(mock_settings())),
        MockRegistry::new(),
        options,
    )
    .await;

    let err = created.err().expect("zero sweep interval must be rejected");
    assert!(err.to_string().contains("sweep interval"));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_disposes_sessions_and_drains_pools() {
    let harness = Harness::new(mock_settings()).await;
    let (_a, mut peer_a) = harness.open(1, 0).await;
    let (_b, _peer_b) = harness.open(2, 0).await;

    harness.manager.shutdown().await;

    assert!(harness.manager.is_shut_down());
    assert_eq!(harness.manager.session_count(), 0);
    assert!(harness.manager.recognizers().is_empty());
    assert!(harness.manager.translators().is_empty());
    assert_eq!(harness.registry.recognizer_disposals(), 1);
    assert_eq!(harness.registry.translator_disposals(), 1);

    assert_eq!(
        collect_until_closed(&mut peer_a).await,
        vec![OutboundEvent::Stopped {
            reason: "shutdown".to_string()
        }]
    );

    let (late, mut late_peer) = harness.attach(3, 0);
    assert_eq!(late.err(), Some(AttachError::ShuttingDown));
    match next_event(&mut late_peer).await {
        OutboundEvent::SessionError { code, .. } => assert_eq!(code, ErrorCode::ShuttingDown),
        other => panic!("expected SessionError, got {:?}", other),
    }

    // Idle timers were cancelled; nothing is disposed twice
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(harness.registry.recognizer_disposals(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_identical_configs_share_one_engine() {
    let harness = Harness::new(mock_settings()).await;
    let (a, _peer_a) = harness.open(1, 0).await;
    let (b, _peer_b) = harness.open(2, 0).await;
    let key = harness.recognizer_key();

    assert_eq!(harness.registry.recognizers_built(), 1);
    assert_eq!(harness.manager.recognizers().ref_count(&key), Some(2));
    assert_eq!(a.engine_key(), Some(key.clone()));
    assert_eq!(b.engine_key(), Some(key.clone()));

    a.dispose("done");
    assert_eq!(harness.manager.recognizers().ref_count(&key), Some(1));
    assert!(!harness.manager.recognizers().is_idle(&key));

    b.dispose("done");
    assert!(harness.manager.recognizers().is_idle(&key));

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(harness.registry.recognizer_disposals(), 1);
    assert!(harness.manager.recognizers().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_restart_within_idle_window_reuses_engine() {
    let harness = Harness::new(mock_settings()).await;
    let (first, _peer) = harness.open(1, 0).await;

    first.dispose("reload");
    wait_until(|| harness.manager.session_count() == 0).await;
    tokio::time::sleep(Duration::from_millis(500)).await;

    let (second, _peer) = harness.open(1, 0).await;
    assert_ne!(second.id(), first.id());
    assert_eq!(harness.registry.recognizers_built(), 1);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(harness.registry.recognizer_disposals(), 0);
    assert_eq!(
        harness
            .manager
            .recognizers()
            .ref_count(&harness.recognizer_key()),
        Some(1)
    );
}

#[tokio::test(start_paused = true)]
async fn test_settings_changes_apply_to_new_sessions() {
    let mut settings = mock_settings();
    settings.max_sessions = 1;
    let harness = Harness::new(settings).await;
    let (first, _peer) = harness.open(1, 0).await;

    let (rejected, _rejected_peer) = harness.attach(2, 0);
    assert!(rejected.is_err());

    harness.settings.update(|s| {
        s.max_sessions = 2;
        s.recognition.language = "de".to_string();
    });
    let refreshed = harness.manager.refresh_settings().await.unwrap();
    assert_eq!(refreshed.max_sessions, 2);
    assert_eq!(harness.manager.settings().max_sessions, 2);

    let (second, _peer) = harness.open(2, 0).await;

    // Running sessions keep the engine they initialized with
    assert_eq!(first.engine_key(), Some(harness.recognizer_key()));
    assert_ne!(second.engine_key(), first.engine_key());
    assert_eq!(harness.manager.recognizers().len(), 2);
}
