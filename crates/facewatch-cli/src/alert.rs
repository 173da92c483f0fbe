//! Alert delivery.
//!
//! Dispatchers are fire-and-forget: a failed notification is logged and the
//! monitor carries on with the next frame.

use facewatch_core::AlertKind;
use std::collections::HashMap;
use std::time::Duration;
use zbus::zvariant::Value;

const APP_NAME: &str = "facewatch";
/// Freedesktop urgency level "critical".
const URGENCY_CRITICAL: u8 = 2;
/// Keep the notification until the user dismisses it.
const NEVER_EXPIRE: i32 = 0;
const BUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Fixed user-facing text for each alert kind.
pub fn message(kind: AlertKind) -> &'static str {
    match kind {
        AlertKind::Authorized => "Authorized face recognized",
        AlertKind::Unauthorized => "Warning: unauthorized face detected!",
    }
}

pub trait AlertDispatcher {
    fn notify(&mut self, kind: AlertKind);
}

impl<A: AlertDispatcher + ?Sized> AlertDispatcher for Box<A> {
    fn notify(&mut self, kind: AlertKind) {
        (**self).notify(kind)
    }
}

/// Writes alerts to the log only.
#[derive(Debug, Default)]
pub struct LogDispatcher;

impl AlertDispatcher for LogDispatcher {
    fn notify(&mut self, kind: AlertKind) {
        match kind {
            AlertKind::Authorized => tracing::info!(kind = ?kind, "{}", message(kind)),
            AlertKind::Unauthorized => tracing::warn!(kind = ?kind, "{}", message(kind)),
        }
    }
}

// `#[zbus::proxy]` generates both `NotificationsProxy` (async) and
// `NotificationsProxyBlocking`. Only the blocking variant is used.
#[zbus::proxy(
    interface = "org.freedesktop.Notifications",
    default_service = "org.freedesktop.Notifications",
    default_path = "/org/freedesktop/Notifications"
)]
trait Notifications {
    #[allow(clippy::too_many_arguments)]
    async fn notify(
        &self,
        app_name: &str,
        replaces_id: u32,
        app_icon: &str,
        summary: &str,
        body: &str,
        actions: &[&str],
        hints: HashMap<&str, &Value<'_>>,
        expire_timeout: i32,
    ) -> zbus::Result<u32>;
}

/// Desktop notification over the session bus.
///
/// The bus connection is opened on the first alert and dropped again after
/// any failure, so a desktop session that appears later is picked up.
#[derive(Default)]
pub struct DesktopNotifier {
    conn: Option<zbus::blocking::Connection>,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    fn send(&mut self, kind: AlertKind) -> zbus::Result<u32> {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => zbus::blocking::connection::Builder::session()?
                .method_timeout(BUS_TIMEOUT)
                .build()?,
        };

        let urgency = Value::from(URGENCY_CRITICAL);
        let mut hints = HashMap::new();
        hints.insert("urgency", &urgency);

        let id = NotificationsProxyBlocking::new(&conn)?.notify(
            APP_NAME,
            0,
            "camera-web",
            "Face Detection",
            message(kind),
            &[],
            hints,
            NEVER_EXPIRE,
        )?;
        self.conn = Some(conn);
        Ok(id)
    }
}

impl AlertDispatcher for DesktopNotifier {
    fn notify(&mut self, kind: AlertKind) {
        LogDispatcher.notify(kind);
        match self.send(kind) {
            Ok(id) => tracing::debug!(id, "desktop notification shown"),
            Err(e) => tracing::warn!(error = %e, "desktop notification failed"),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Collects every alert it is handed.
    #[derive(Debug, Default)]
    pub(crate) struct RecordingDispatcher {
        pub sent: Vec<AlertKind>,
    }

    impl AlertDispatcher for RecordingDispatcher {
        fn notify(&mut self, kind: AlertKind) {
            self.sent.push(kind);
        }
    }

    #[test]
    fn test_messages() {
        assert_eq!(message(AlertKind::Authorized), "Authorized face recognized");
        assert_eq!(message(AlertKind::Unauthorized), "Warning: unauthorized face detected!");
    }

    #[test]
    fn test_boxed_dispatcher_forwards() {
        let mut boxed: Box<RecordingDispatcher> = Box::default();
        boxed.notify(AlertKind::Unauthorized);
        assert_eq!(boxed.sent, vec![AlertKind::Unauthorized]);
    }

    #[test]
    fn test_log_dispatcher_never_panics() {
        let mut d = LogDispatcher;
        d.notify(AlertKind::Authorized);
        d.notify(AlertKind::Unauthorized);
    }
}
