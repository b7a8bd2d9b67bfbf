use std::fs::File;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, RecordConfig, Result, TrackPhase, TrackState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioSource {
    Mic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Container {
    Mpeg4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioCodec {
    Aac,
}

/// Complete capture configuration handed to a [`CaptureDevice`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordProfile {
    pub source: AudioSource,
    pub container: Container,
    pub codec: AudioCodec,
    pub bitrate: u32,
    pub output: PathBuf,
}

impl RecordProfile {
    pub fn new(config: &RecordConfig, output: impl Into<PathBuf>) -> Self {
        Self {
            source: AudioSource::Mic,
            container: config.container,
            codec: config.codec,
            bitrate: config.bitrate,
            output: output.into(),
        }
    }
}

/// Platform capture device (microphone recorder).
pub trait CaptureDevice {
    fn configure(&mut self, profile: &RecordProfile) -> Result<()>;

    fn prepare_and_start(&mut self) -> Result<()>;

    fn stop(&mut self) -> Result<()>;

    fn reset(&mut self);

    /// Frees the underlying device handle. The device is unusable afterwards.
    fn release(&mut self);
}

/// Creates a fresh capture device for every recording.
pub trait RecorderFactory {
    fn create(&self) -> Result<Box<dyn CaptureDevice>>;
}

impl<F> RecorderFactory for F
where
    F: Fn() -> Result<Box<dyn CaptureDevice>>,
{
    fn create(&self) -> Result<Box<dyn CaptureDevice>> {
        self()
    }
}

/// An active recording: its track record plus the device that owns the capture.
pub struct RecordSession {
    track: TrackState,
    device: Box<dyn CaptureDevice>,
}

impl RecordSession {
    /// Acquires a device from `factory`, configures it with `profile` and
    /// starts capturing. On failure the device, if created, is released.
    pub fn begin(factory: &dyn RecorderFactory, profile: &RecordProfile) -> Result<Self> {
        let mut device = factory.create().map_err(setup_failure)?;
        if let Err(err) = device
            .configure(profile)
            .and_then(|()| device.prepare_and_start())
        {
            device.release();
            return Err(setup_failure(err));
        }

        let mut track = TrackState::new();
        track.begin(&profile.output.to_string_lossy());
        track.phase = TrackPhase::Playing;
        Ok(Self { track, device })
    }

    pub fn track(&self) -> &TrackState {
        &self.track
    }

    /// Stops the capture and releases the device. The handle is released
    /// even when stopping fails.
    pub fn finish(mut self) -> Result<()> {
        let stopped = self.device.stop();
        if stopped.is_ok() {
            self.device.reset();
        }
        self.device.release();
        stopped
    }
}

fn setup_failure(err: Error) -> Error {
    match err {
        Error::RecordSetupFailure(_) => err,
        other => Error::RecordSetupFailure(other.to_string()),
    }
}

/// Capture device that writes its container file without sampling any
/// hardware. Opening the output surfaces path and permission problems the
/// same way a real recorder would.
#[derive(Debug, Default)]
pub struct FileCapture {
    profile: Option<RecordProfile>,
    output: Option<File>,
}

impl FileCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.profile.as_ref().map(|profile| profile.output.as_path())
    }

    pub fn is_capturing(&self) -> bool {
        self.output.is_some()
    }
}

impl CaptureDevice for FileCapture {
    fn configure(&mut self, profile: &RecordProfile) -> Result<()> {
        if profile.bitrate == 0 {
            return Err(Error::RecordSetupFailure("bitrate must be positive".into()));
        }
        self.profile = Some(profile.clone());
        Ok(())
    }

    fn prepare_and_start(&mut self) -> Result<()> {
        let profile = self
            .profile
            .as_ref()
            .ok_or_else(|| Error::RecordSetupFailure("device not configured".into()))?;
        let file = File::create(&profile.output).map_err(|err| {
            Error::RecordSetupFailure(format!("{}: {err}", profile.output.display()))
        })?;
        tracing::debug!(output = %profile.output.display(), bitrate = profile.bitrate, "capture started");
        self.output = Some(file);
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        let file = self
            .output
            .take()
            .ok_or_else(|| Error::msg("capture is not running"))?;
        file.sync_all()?;
        Ok(())
    }

    fn reset(&mut self) {
        self.output = None;
    }

    fn release(&mut self) {
        self.output = None;
        self.profile = None;
    }
}
