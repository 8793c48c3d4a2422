//! Capture sources: where the host's outbound stream comes from.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use playlink_transport::MediaStream;

use crate::CaptureError;

/// Turns a rendering surface into a [`MediaStream`].
///
/// A surface that is not rendering yet reports
/// [`CaptureError::NotReady`]; the fan-out retries those with backoff.
pub trait CaptureSource: Send + Sync + 'static {
    type Surface: Send + Sync + ?Sized;

    fn capture(
        &self,
        surface: &Self::Surface,
        fps: u32,
    ) -> impl Future<Output = Result<MediaStream, CaptureError>> + Send;
}

/// A capture source with a scripted readiness, for tests and headless
/// hosts.
///
/// Streams it hands out carry no frames of their own; push frames with
/// [`MediaStream::push`].
#[derive(Clone, Default)]
pub struct ScriptedCapture {
    script: Arc<Mutex<Script>>,
}

#[derive(Default)]
struct Script {
    not_ready: u32,
    failure: Option<String>,
    attempts: u32,
    last: Option<MediaStream>,
}

impl ScriptedCapture {
    /// Ready on the first attempt.
    pub fn ready() -> Self {
        Self::default()
    }

    /// Reports not-ready for the first `attempts` calls.
    pub fn not_ready_for(attempts: u32) -> Self {
        let capture = Self::default();
        capture.script().not_ready = attempts;
        capture
    }

    /// Never becomes ready.
    pub fn never_ready() -> Self {
        Self::not_ready_for(u32::MAX)
    }

    /// Fails permanently with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        let capture = Self::default();
        capture.script().failure = Some(reason.into());
        capture
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn attempts(&self) -> u32 {
        self.script().attempts
    }

    /// The most recent stream handed out.
    pub fn last_stream(&self) -> Option<MediaStream> {
        self.script().last.clone()
    }
}

impl CaptureSource for ScriptedCapture {
    type Surface = str;

    async fn capture(&self, surface: &str, fps: u32) -> Result<MediaStream, CaptureError> {
        let mut script = self.script();
        script.attempts += 1;
        if let Some(reason) = &script.failure {
            return Err(CaptureError::Failed(reason.clone()));
        }
        if script.not_ready > 0 {
            script.not_ready -= 1;
            return Err(CaptureError::NotReady(format!("{surface} is not rendering yet")));
        }
        let stream = MediaStream::new(fps);
        script.last = Some(stream.clone());
        Ok(stream)
    }
}
