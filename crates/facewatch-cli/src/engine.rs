//! The monitor and its control loop.
//!
//! [`Monitor::process`] runs one frame through matcher, registry, presence
//! machine and alert dispatcher. [`run`] wraps it in the start/stop/quit loop
//! that owns the capture device.

use crate::alert::AlertDispatcher;
use crate::control::{ControlCommand, Controls};
use crate::display::{Overlay, Surface};
use facewatch_core::{
    AlertKind, BoundingBox, DescriptorOf, FaceClass, FaceMatcher, IdentityRegistry, PresenceConfig,
    PresenceSnapshot, PresenceStateMachine, RegistryConfig, Resolution,
};
use facewatch_hw::{probe_first, CameraError, Frame, FrameSource};
use std::time::{Duration, Instant};

/// A detected face with its decided class.
#[derive(Debug, Clone)]
pub struct ClassifiedFace {
    pub region: BoundingBox,
    pub class: FaceClass,
}

/// What one processed frame produced.
#[derive(Debug, Default)]
pub struct TickOutcome {
    pub faces: Vec<ClassifiedFace>,
    pub alert: Option<AlertKind>,
    /// Unauthorized faces that started a new unknown record.
    pub new_unknowns: usize,
    /// Frame was too dark for detection.
    pub dark: bool,
}

/// Per-run state: matcher, identities, presence hysteresis and alert sink.
pub struct Monitor<M: FaceMatcher, A: AlertDispatcher> {
    matcher: M,
    registry: IdentityRegistry<DescriptorOf<M>>,
    presence: PresenceStateMachine,
    alerts: A,
    enhance_contrast: bool,
}

impl<M: FaceMatcher, A: AlertDispatcher> Monitor<M, A> {
    pub fn new(
        matcher: M,
        authorized: Vec<DescriptorOf<M>>,
        registry: RegistryConfig,
        presence: PresenceConfig,
        alerts: A,
    ) -> Self {
        Self {
            matcher,
            registry: IdentityRegistry::new(authorized, registry),
            presence: PresenceStateMachine::new(presence),
            alerts,
            enhance_contrast: false,
        }
    }

    pub fn with_contrast_enhancement(mut self, enabled: bool) -> Self {
        self.enhance_contrast = enabled;
        self
    }

    pub fn registry(&self) -> &IdentityRegistry<DescriptorOf<M>> {
        &self.registry
    }

    #[cfg(test)]
    pub fn dispatcher(&self) -> &A {
        &self.alerts
    }

    /// Classify every face in `frame` and decide whether to alert.
    pub fn process(&mut self, frame: &mut Frame, now: Instant) -> TickOutcome {
        self.registry.expire(now);

        if frame.is_dark() {
            tracing::trace!(sequence = frame.sequence, "dark frame; skipping detection");
            self.presence.observe(false, false, now);
            return TickOutcome { dark: true, ..TickOutcome::default() };
        }
        if self.enhance_contrast {
            frame.enhance_contrast();
        }

        let detections = self.matcher.detect_and_describe(&frame.data, frame.width, frame.height);
        let metric = self.matcher.metric();
        let mut faces = Vec::with_capacity(detections.len());
        let mut new_unknowns = 0;
        for detection in detections {
            let class = if self.registry.is_authorized(metric, &detection.descriptor) {
                FaceClass::Authorized
            } else {
                match self.registry.resolve_unknown(metric, detection.descriptor, now) {
                    Resolution::New => {
                        new_unknowns += 1;
                        tracing::debug!(sequence = frame.sequence, region = ?detection.region, "new unknown face");
                    }
                    Resolution::Matched(index) => {
                        tracing::trace!(sequence = frame.sequence, index, "known unknown face");
                    }
                }
                FaceClass::Unauthorized
            };
            faces.push(ClassifiedFace { region: detection.region, class });
        }

        let authorized_seen = faces.iter().any(|f| f.class == FaceClass::Authorized);
        let unauthorized_seen = faces.iter().any(|f| f.class == FaceClass::Unauthorized);
        let alert = self.presence.observe(authorized_seen, unauthorized_seen, now);
        if let Some(kind) = alert {
            if kind == AlertKind::Unauthorized {
                self.registry.mark_alerted(now);
            }
            self.alerts.notify(kind);
        }

        tracing::trace!(
            sequence = frame.sequence,
            faces = faces.len(),
            new_unknowns,
            unknown = self.registry.unknown_count(),
            "frame processed"
        );
        TickOutcome { faces, alert, new_unknowns, dark: false }
    }

    pub fn snapshot(&self, now: Instant) -> PresenceSnapshot {
        self.presence.snapshot(now)
    }
}

/// Capture-side settings for [`run`].
#[derive(Debug, Clone)]
pub struct LoopSettings {
    pub devices: Vec<String>,
    /// Pause when the camera is off or a read fails.
    pub idle_sleep: Duration,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            devices: Vec::new(),
            idle_sleep: Duration::from_millis(100),
        }
    }
}

/// Counters reported when the loop ends.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LoopStats {
    pub frames: u64,
    pub alerts: u64,
    pub new_unknowns: u64,
    pub dark_frames: u64,
    pub read_failures: u64,
    pub starts: u64,
}

/// Run until a quit command arrives.
///
/// `open` turns a device path into a frame source; the active source is
/// dropped on stop and on every exit path.
pub fn run<M, A, S, F>(
    monitor: &mut Monitor<M, A>,
    controls: &Controls,
    surface: &mut S,
    overlay: &Overlay,
    settings: &LoopSettings,
    mut open: F,
) -> LoopStats
where
    M: FaceMatcher,
    A: AlertDispatcher,
    S: Surface + ?Sized,
    F: FnMut(&str) -> Result<Box<dyn FrameSource>, CameraError>,
{
    let mut stats = LoopStats::default();
    let mut camera: Option<Box<dyn FrameSource>> = None;
    let placeholder = overlay.placeholder();

    loop {
        match controls.poll() {
            Some(ControlCommand::Start) if camera.is_none() => match probe_first(&settings.devices, &mut open) {
                Ok((source, _)) => {
                    tracing::info!(device = source.name(), "camera started");
                    camera = Some(source);
                    stats.starts += 1;
                }
                Err(e) => tracing::error!(error = %e, "could not start camera"),
            },
            Some(ControlCommand::Start) => tracing::debug!("camera already running"),
            Some(ControlCommand::Stop) => {
                if camera.take().is_some() {
                    tracing::info!("camera stopped");
                }
            }
            Some(ControlCommand::Quit) => break,
            None => {}
        }

        let Some(source) = camera.as_mut() else {
            surface.present(&placeholder);
            std::thread::sleep(settings.idle_sleep);
            continue;
        };

        let mut frame = match source.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(device = source.name(), error = %e, "failed to grab frame");
                stats.read_failures += 1;
                std::thread::sleep(settings.idle_sleep);
                continue;
            }
        };

        let outcome = monitor.process(&mut frame, Instant::now());
        stats.frames += 1;
        if outcome.alert.is_some() {
            stats.alerts += 1;
        }
        if outcome.dark {
            stats.dark_frames += 1;
        }
        stats.new_unknowns += outcome.new_unknowns as u64;
        surface.present(&overlay.annotate(&frame, &outcome.faces));
    }

    drop(camera);
    tracing::info!(frames = stats.frames, alerts = stats.alerts, "monitor loop finished");
    stats
}
