use crate::bridge::AudioBridge;
use serde_json::json;

/// One JSON document describing what the relay is doing right now.
pub fn status_report(bridge: &AudioBridge) -> serde_json::Value {
    let metrics = bridge.metrics().snapshot();
    let config = bridge.config();
    let player = bridge.player();
    let recording = bridge.session().current_recording();

    json!({
        "status": if metrics.device_failures > 0 { "degraded" } else { "healthy" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": bridge.uptime_seconds(),
        "service": {
            "name": "pcm-relay",
            "version": env!("CARGO_PKG_VERSION")
        },
        "recording": {
            "state": bridge.recording_state().as_str(),
            "session_id": recording.as_ref().map(|r| r.id.to_string()),
            "device_id": recording.as_ref().map(|r| r.device_id.clone()),
            "started_at": recording.as_ref().map(|r| r.started_at.to_rfc3339()),
            "channels": config.audio.channels,
            "sample_rate": config.audio.sample_rate,
            "time_slice_ms": config.audio.time_slice_ms
        },
        "playback": {
            "initialized": player.is_initialized(),
            "channels": player.channels(),
            "sample_rate": player.sample_rate(),
            "playing": player.is_initialized() && !player.is_cancelled(),
            "queue_depth": player.queue_depth(),
            "queue_depth_threshold": config.timing.queue_depth_threshold,
            "buffers_submitted": bridge.buffer_count(),
            "next_start_time": player.start_time()
        },
        "metrics": {
            "chunks_emitted": metrics.chunks_emitted,
            "bytes_emitted": metrics.bytes_emitted,
            "chunks_dropped": metrics.chunks_dropped,
            "drop_rate": metrics.drop_rate(),
            "segments_decoded": metrics.segments_decoded,
            "decode_failures": metrics.decode_failures,
            "segments_dispatched": metrics.segments_dispatched,
            "underruns": metrics.underruns,
            "device_failures": metrics.device_failures
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::loopback::{LoopbackCapture, LoopbackClock, LoopbackOutput, LoopbackSource};
    use crate::config::RelayConfig;
    use std::sync::Arc;

    #[test]
    fn test_idle_report() {
        let (bridge, _outputs) = AudioBridge::new(
            RelayConfig::default(),
            Arc::new(LoopbackCapture::new(LoopbackSource::Silence)),
            Arc::new(LoopbackOutput::new(LoopbackClock::manual())),
        );
        let report = status_report(&bridge);

        assert_eq!(report["status"], "healthy");
        assert_eq!(report["service"]["name"], "pcm-relay");
        assert_eq!(report["recording"]["state"], "idle");
        assert!(report["recording"]["session_id"].is_null());
        assert_eq!(report["recording"]["sample_rate"], 16000);
        assert_eq!(report["playback"]["initialized"], false);
        assert_eq!(report["playback"]["queue_depth"], 0);
        assert_eq!(report["metrics"]["underruns"], 0);
        assert!(report.get("memory").is_none());
    }

    #[tokio::test]
    async fn test_playback_reports_opened_format() {
        let mut config = RelayConfig::default();
        config.audio.channels = 6;
        config.audio.sample_rate = 48000;
        let (bridge, _outputs) = AudioBridge::new(
            config,
            Arc::new(LoopbackCapture::new(LoopbackSource::Silence)),
            Arc::new(LoopbackOutput::new(LoopbackClock::manual())),
        );
        bridge.initialize_player().unwrap();
        let report = status_report(&bridge);

        assert_eq!(report["recording"]["channels"], 6);
        assert_eq!(report["playback"]["initialized"], true);
        assert_eq!(report["playback"]["channels"], 1);
        assert_eq!(report["playback"]["sample_rate"], 48000);
    }
}
