// Lifecycle of a single provider session against an in-memory provider.

mod common;

use common::{next_provider, MockConnector, StalledConnector};
use std::time::Duration;
use tokio::sync::mpsc;
use transcribe_relay::provider::{
    CloseReason, InboundFrame, OutboundFrame, ProviderEvent, ProviderSession, ProviderSettings,
    SessionState, CLOSE_STREAM,
};
use transcribe_relay::RelayError;

async fn next_event(events: &mut mpsc::Receiver<ProviderEvent>) -> Option<ProviderEvent> {
    tokio::time::timeout(Duration::from_secs(30), events.recv())
        .await
        .expect("timed out waiting for provider event")
}

#[tokio::test]
async fn test_connected_emitted_once_and_audio_forwarded_in_order() {
    let (connector, mut providers) = MockConnector::new();
    let (session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;

    assert!(session.id().starts_with("session_"));
    assert_eq!(provider.session_id, session.id());
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));
    assert_eq!(session.state(), SessionState::Connected);

    for i in 0..3u8 {
        assert_eq!(session.send_audio(vec![i; 4]), Ok(true));
    }
    for i in 0..3u8 {
        assert_eq!(provider.next_frame().await, Some(OutboundFrame::Audio(vec![i; 4])));
    }

    // Nothing else was emitted
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_send_audio_returns_false_until_connected() {
    let (connector, mut providers, gate) = MockConnector::gated();
    let (session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;

    assert_eq!(session.state(), SessionState::Connecting);
    assert_eq!(session.send_audio(vec![1, 2, 3]), Ok(false));

    gate.send(()).unwrap();
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    assert_eq!(session.send_audio(vec![9]), Ok(true));
    assert_eq!(provider.next_frame().await, Some(OutboundFrame::Audio(vec![9])));
}

#[tokio::test]
async fn test_fragments_carry_segment_order() {
    let (connector, mut providers) = MockConnector::new();
    let (_session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    provider.send_result("hello", false, 0.5).await;
    provider.send_result("hello world", true, 0.9).await;
    provider.send_result("next", false, 0.6).await;

    let mut fragments = Vec::new();
    for _ in 0..3 {
        match next_event(&mut events).await {
            Some(ProviderEvent::Fragment(fragment)) => fragments.push(fragment),
            other => panic!("expected fragment, got {:?}", other),
        }
    }

    assert_eq!(fragments[0].segment, 0);
    assert!(!fragments[0].is_final);
    assert_eq!(fragments[1].segment, 0);
    assert!(fragments[1].is_final);
    assert_eq!(fragments[1].text, "hello world");
    assert_eq!(fragments[2].segment, 1);
}

#[tokio::test]
async fn test_malformed_message_reports_protocol_error_and_continues() {
    let (connector, mut providers) = MockConnector::new();
    let (session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    provider.send_text("this is not json").await;
    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Error(RelayError::Protocol(_)))
    ));
    assert_eq!(session.state(), SessionState::Connected);

    provider.send_result("still here", false, 0.7).await;
    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Fragment(f)) if f.text == "still here"
    ));
}

#[tokio::test]
async fn test_metadata_is_not_relayed() {
    let (connector, mut providers) = MockConnector::new();
    let (_session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    provider
        .send_text(r#"{"type":"Metadata","request_id":"abc","channels":1}"#)
        .await;
    provider.send_result("after metadata", true, 0.9).await;

    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Fragment(f)) if f.text == "after metadata"
    ));
}

#[tokio::test]
async fn test_graceful_stop_completes_on_final_result() {
    let (connector, mut providers) = MockConnector::new();
    let (mut session, mut events) =
        ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    session.stop();
    assert_eq!(
        provider.next_frame().await,
        Some(OutboundFrame::Control(CLOSE_STREAM.to_string()))
    );
    assert_eq!(session.state(), SessionState::Closing);
    assert_eq!(session.send_audio(vec![1]), Ok(false));

    provider.send_result("last words", true, 0.93).await;

    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Fragment(f)) if f.is_final && f.text == "last words"
    ));
    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::FinalReceived))
    );
    // Listeners detached after Closed
    assert_eq!(next_event(&mut events).await, None);
    assert_eq!(provider.remaining_frames().await, vec![OutboundFrame::Close]);
    assert_eq!(session.state(), SessionState::Closed);
}

#[tokio::test]
async fn test_empty_final_result_completes_stop_without_fragment() {
    let (connector, mut providers) = MockConnector::new();
    let (mut session, mut events) =
        ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    session.stop();
    assert!(matches!(provider.next_frame().await, Some(OutboundFrame::Control(_))));
    provider.send_result("", true, 0.0).await;

    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::FinalReceived))
    );
}

#[tokio::test(start_paused = true)]
async fn test_graceful_stop_times_out() {
    let (connector, mut providers) = MockConnector::new();
    let (mut session, mut events) =
        ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    let started = tokio::time::Instant::now();
    session.stop();
    session.stop();

    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::StopTimeout))
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "closed too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5100), "closed too late: {:?}", elapsed);

    // One CloseStream despite two stop calls, then one close
    assert_eq!(
        provider.remaining_frames().await,
        vec![
            OutboundFrame::Control(CLOSE_STREAM.to_string()),
            OutboundFrame::Close
        ]
    );
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let (connector, mut providers) = MockConnector::new();
    let (mut session, mut events) =
        ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    session.close();
    session.close();

    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::Disconnected))
    );
    assert_eq!(next_event(&mut events).await, None);
    assert_eq!(provider.remaining_frames().await, vec![OutboundFrame::Close]);
}

#[tokio::test]
async fn test_dropping_handle_closes_link() {
    let (connector, mut providers) = MockConnector::new();
    let (session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    drop(session);

    assert_eq!(provider.remaining_frames().await, vec![OutboundFrame::Close]);
}

#[tokio::test]
async fn test_provider_close_ends_session() {
    let (connector, mut providers) = MockConnector::new();
    let (session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    provider
        .inbound
        .send(InboundFrame::Closed {
            code: Some(1000),
            reason: "done".to_string(),
        })
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::ProviderClosed {
            code: Some(1000),
            reason: "done".to_string()
        }))
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(session.send_audio(vec![1]), Ok(false));
}

#[tokio::test]
async fn test_transport_error_reports_and_closes() {
    let (connector, mut providers) = MockConnector::new();
    let (_session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let mut provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    provider
        .inbound
        .send(InboundFrame::Error("connection reset".to_string()))
        .await
        .unwrap();

    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Error(RelayError::Connection(
            "connection reset".to_string()
        )))
    );
    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::TransportFailed))
    );
    assert_eq!(provider.remaining_frames().await, vec![OutboundFrame::Close]);
}

#[tokio::test]
async fn test_connect_failure_reports_and_closes() {
    let connector = MockConnector::failing(RelayError::Configuration(
        "DEEPGRAM_API_KEY is not configured".to_string(),
    ));
    let (session, mut events) =
        ProviderSession::start(connector.clone(), ProviderSettings::default(), 16);

    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Error(RelayError::Configuration(_)))
    ));
    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::ConnectFailed))
    );
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(connector.connect_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_connect_timeout() {
    // The gate is never released, so the connection never opens
    let (connector, mut providers, _gate) = MockConnector::gated();
    let settings = ProviderSettings {
        connect_timeout: Duration::from_secs(2),
        ..ProviderSettings::default()
    };
    let (_session, mut events) = ProviderSession::start(connector, settings, 16);
    let _provider = next_provider(&mut providers).await;

    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Error(RelayError::Connection(msg))) if msg.contains("timed out")
    ));
    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::ConnectFailed))
    );
}

#[tokio::test]
async fn test_stop_while_connecting_closes() {
    let (connector, mut providers, _gate) = MockConnector::gated();
    let (mut session, mut events) =
        ProviderSession::start(connector, ProviderSettings::default(), 16);
    let _provider = next_provider(&mut providers).await;

    session.stop();

    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::Disconnected))
    );
}

#[tokio::test]
async fn test_empty_final_closes_open_partial() {
    let (connector, mut providers) = MockConnector::new();
    let (_session, mut events) = ProviderSession::start(connector, ProviderSettings::default(), 16);
    let provider = next_provider(&mut providers).await;
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    provider.send_result("uh", false, 0.4).await;
    provider.send_result("", true, 0.0).await;
    // No partial is open any more, so this one is not relayed
    provider.send_result("", true, 0.0).await;
    provider.send_result("next", false, 0.7).await;

    let mut fragments = Vec::new();
    for _ in 0..3 {
        match next_event(&mut events).await {
            Some(ProviderEvent::Fragment(fragment)) => fragments.push(fragment),
            other => panic!("expected fragment, got {:?}", other),
        }
    }

    assert_eq!((fragments[0].text.as_str(), fragments[0].is_final), ("uh", false));
    assert_eq!((fragments[1].text.as_str(), fragments[1].is_final), ("", true));
    assert_eq!(fragments[1].segment, 0);
    assert_eq!(fragments[2].text, "next");
    assert_eq!(fragments[2].segment, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_times_out_when_provider_stops_reading() {
    let connector = StalledConnector::new();
    let (mut session, mut events) =
        ProviderSession::start(connector.clone(), ProviderSettings::default(), 16);
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    // The first chunk fills the link; the second is dropped
    assert_eq!(session.send_audio(vec![1]), Ok(true));
    assert_eq!(session.send_audio(vec![2]), Ok(true));
    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Error(RelayError::Forwarding(_)))
    ));
    assert_eq!(session.state(), SessionState::Connected);

    let started = tokio::time::Instant::now();
    session.stop();
    assert_eq!(
        next_event(&mut events).await,
        Some(ProviderEvent::Closed(CloseReason::StopTimeout))
    );
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(5), "closed too early: {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(5100), "closed too late: {:?}", elapsed);
    assert_eq!(session.state(), SessionState::Closed);
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test(start_paused = true)]
async fn test_close_completes_when_provider_stops_reading() {
    let connector = StalledConnector::new();
    let (mut session, mut events) =
        ProviderSession::start(connector.clone(), ProviderSettings::default(), 16);
    assert_eq!(next_event(&mut events).await, Some(ProviderEvent::Connected));

    for i in 0..3u8 {
        assert_eq!(session.send_audio(vec![i]), Ok(true));
    }
    assert!(matches!(
        next_event(&mut events).await,
        Some(ProviderEvent::Error(RelayError::Forwarding(_)))
    ));

    let started = tokio::time::Instant::now();
    session.close();
    // Remaining forwarding errors may arrive before Closed
    loop {
        match next_event(&mut events).await {
            Some(ProviderEvent::Error(RelayError::Forwarding(_))) => continue,
            Some(ProviderEvent::Closed(reason)) => {
                assert_eq!(reason, CloseReason::Disconnected);
                break;
            }
            other => panic!("expected close, got {:?}", other),
        }
    }
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(session.state(), SessionState::Closed);
}
