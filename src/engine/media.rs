//! Local media tracks
//!
//! Capture and encoding live outside this crate; an external collaborator
//! feeds encoded samples into the track handles. Toggling mutes by dropping
//! samples at the write boundary, no renegotiation happens.

use crate::{Error, Result};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

/// Local Opus/VP8 track handles with per-kind enable flags
pub struct LocalMedia {
    audio: RwLock<Option<Arc<TrackLocalStaticSample>>>,
    video: RwLock<Option<Arc<TrackLocalStaticSample>>>,
    audio_enabled: AtomicBool,
    video_enabled: AtomicBool,
}

impl Default for LocalMedia {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalMedia {
    /// No tracks yet; toggles are no-ops until tracks exist
    pub fn new() -> Self {
        Self {
            audio: RwLock::new(None),
            video: RwLock::new(None),
            audio_enabled: AtomicBool::new(true),
            video_enabled: AtomicBool::new(true),
        }
    }

    /// Create (or return) the local Opus audio track
    pub fn ensure_audio(&self) -> Arc<TrackLocalStaticSample> {
        let mut audio = self.audio.write();
        if let Some(track) = audio.as_ref() {
            return Arc::clone(track);
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_string(),
                ..Default::default()
            },
            "audio".to_string(),
            "telecall".to_string(),
        ));
        *audio = Some(Arc::clone(&track));
        track
    }

    /// Create (or return) the local VP8 video track
    pub fn ensure_video(&self) -> Arc<TrackLocalStaticSample> {
        let mut video = self.video.write();
        if let Some(track) = video.as_ref() {
            return Arc::clone(track);
        }

        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                ..Default::default()
            },
            "video".to_string(),
            "telecall".to_string(),
        ));
        *video = Some(Arc::clone(&track));
        track
    }

    /// Flip the audio flag; `None` when no audio track exists
    pub fn toggle_audio(&self) -> Option<bool> {
        if self.audio.read().is_none() {
            debug!("toggle_audio without an audio track is a no-op");
            return None;
        }
        Some(!self.audio_enabled.fetch_xor(true, Ordering::SeqCst))
    }

    /// Flip the video flag; `None` when no video track exists
    pub fn toggle_video(&self) -> Option<bool> {
        if self.video.read().is_none() {
            debug!("toggle_video without a video track is a no-op");
            return None;
        }
        Some(!self.video_enabled.fetch_xor(true, Ordering::SeqCst))
    }

    pub fn audio_enabled(&self) -> bool {
        self.audio_enabled.load(Ordering::SeqCst)
    }

    pub fn video_enabled(&self) -> bool {
        self.video_enabled.load(Ordering::SeqCst)
    }

    /// Write an encoded audio sample; silently dropped while audio is off
    pub async fn write_audio(&self, sample: &Sample) -> Result<()> {
        if !self.audio_enabled() {
            return Ok(());
        }
        let track = self.audio.read().clone();
        let Some(track) = track else {
            return Err(Error::MediaAccess("no audio track".to_string()));
        };
        track
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaAccess(format!("audio write failed: {}", e)))
    }

    /// Write an encoded video sample; silently dropped while video is off
    pub async fn write_video(&self, sample: &Sample) -> Result<()> {
        if !self.video_enabled() {
            return Ok(());
        }
        let track = self.video.read().clone();
        let Some(track) = track else {
            return Err(Error::MediaAccess("no video track".to_string()));
        };
        track
            .write_sample(sample)
            .await
            .map_err(|e| Error::MediaAccess(format!("video write failed: {}", e)))
    }

    /// Drop both track handles
    pub fn clear(&self) {
        self.audio.write().take();
        self.video.write().take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_without_tracks_is_noop() {
        let media = LocalMedia::new();
        assert!(media.toggle_audio().is_none());
        assert!(media.toggle_video().is_none());
        assert!(media.audio_enabled());
        assert!(media.video_enabled());
    }

    #[test]
    fn test_toggle_flips_without_renegotiation() {
        let media = LocalMedia::new();
        media.ensure_audio();
        media.ensure_video();

        assert_eq!(media.toggle_audio(), Some(false));
        assert!(!media.audio_enabled());
        assert_eq!(media.toggle_audio(), Some(true));
        assert!(media.audio_enabled());

        assert_eq!(media.toggle_video(), Some(false));
        assert!(media.audio_enabled()); // independent flags
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let media = LocalMedia::new();
        let first = media.ensure_audio();
        let second = media.ensure_audio();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_disabled_audio_drops_samples() {
        let media = LocalMedia::new();
        media.ensure_audio();
        media.toggle_audio();

        // Dropped, not an error, even with an empty payload
        let sample = Sample::default();
        media.write_audio(&sample).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_without_track_is_media_access_error() {
        let media = LocalMedia::new();
        let sample = Sample::default();
        let result = media.write_audio(&sample).await;
        assert!(matches!(result, Err(Error::MediaAccess(_))));
    }
}
