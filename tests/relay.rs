use pcm_relay::audio::loopback::{LoopbackCapture, LoopbackClock, LoopbackOutput, LoopbackSource};
use pcm_relay::audio::SessionState;
use pcm_relay::{AudioBridge, AudioError, RelayConfig};
use std::sync::Arc;
use std::time::Duration;

fn relay(source: LoopbackSource, max_chunks: Option<usize>) -> (AudioBridge, pcm_relay::audio::SessionOutputs, LoopbackOutput) {
    let mut capture = LoopbackCapture::new(source);
    if let Some(max) = max_chunks {
        capture = capture.with_max_chunks(max);
    }
    let output = LoopbackOutput::new(LoopbackClock::Tokio);
    let (bridge, outputs) = AudioBridge::new(
        RelayConfig::default(),
        Arc::new(capture),
        Arc::new(output.clone()),
    );
    (bridge, outputs, output)
}

#[tokio::test(start_paused = true)]
async fn silent_recording_yields_half_second_buffers() {
    let (bridge, mut outputs, _) = relay(LoopbackSource::Silence, Some(3));

    bridge.start_recording("mic-1").await.unwrap();
    for _ in 0..3 {
        let buffer = outputs.buffers.recv().await.unwrap();
        assert_eq!(buffer.len(), 16000);
        assert_eq!(buffer.volume_percent(), 0);
    }
    bridge.stop_recording().await.unwrap();

    assert_eq!(bridge.recording_state(), SessionState::Idle);
    assert!(outputs.buffers.try_recv().is_err());

    let mut status = Vec::new();
    while let Ok(text) = outputs.status.try_recv() {
        status.push(text);
    }
    assert_eq!(status.first().map(String::as_str), Some("INPUT DEVICE: mic-1"));
    assert_eq!(status.last().map(String::as_str), Some("Stopped"));
}

#[tokio::test(start_paused = true)]
async fn playback_waits_for_lookahead() {
    let (bridge, _outputs, output) = relay(LoopbackSource::Silence, None);
    bridge.initialize_player().unwrap();

    // 100 ms of mono 16 kHz audio
    let pcm = vec![0u8; 3200];
    for i in 0..3 {
        bridge.play_byte_array(&pcm, i == 0).unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
    }
    assert!(output.dispatches().is_empty());

    bridge.play_byte_array(&pcm, false).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(output.dispatches().len(), 1);

    bridge.play_byte_array(&pcm, false).unwrap();
    tokio::time::sleep(Duration::from_millis(30)).await;
    let dispatches = output.dispatches();
    assert_eq!(dispatches.len(), 2);
    assert!((dispatches[1].start_at - dispatches[0].start_at - 0.1).abs() < 1e-9);

    bridge.stop_playback();
    for _ in 0..4 {
        bridge.play_byte_array(&pcm, false).unwrap();
    }
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(output.dispatches().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn second_start_is_rejected() {
    let (bridge, _outputs, _) = relay(LoopbackSource::Silence, None);

    bridge.start_recording("mic").await.unwrap();
    let err = bridge.start_recording("mic").await.unwrap_err();
    assert!(matches!(err, AudioError::InvalidState(_)));

    bridge.stop_recording().await.unwrap();
    bridge.start_recording("mic").await.unwrap();
    bridge.stop_recording().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn captured_tone_is_played_back() {
    let (bridge, mut outputs, output) = relay(
        LoopbackSource::Tone {
            frequency: 440.0,
            amplitude: 0.5,
        },
        Some(6),
    );

    bridge.start_recording("").await.unwrap();
    for i in 0..6 {
        let buffer = outputs.buffers.recv().await.unwrap();
        assert!(buffer.volume_percent() >= 48);
        bridge.play_byte_array(buffer.data(), i == 0).unwrap();
    }
    bridge.stop_recording().await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Six queued, threshold four: three dispatched back to back
    let dispatches = output.dispatches();
    assert_eq!(dispatches.len(), 3);
    for pair in dispatches.windows(2) {
        assert!((pair[1].start_at - pair[0].start_at - 0.5).abs() < 1e-9);
    }
    assert!(dispatches.iter().all(|d| d.frames == 8000 && d.peak > 0.45));
    assert_eq!(bridge.metrics().snapshot().segments_dispatched, 3);
}
