//! The five lifecycle states

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::{Context, DeviceStateKind, DEVICE_RETRY_DELAY, TEARDOWN_DELAY};
use crate::control::{BindError, ControlBridge};
use crate::protocol::{Command, LinkError, Pipeline};
use crate::state_machine::State;

type LifecycleState = Box<dyn State<DeviceStateKind, Arc<Context>>>;

/// One instance per state kind
pub(super) fn registry() -> Vec<LifecycleState> {
    vec![
        Box::new(IdleState),
        Box::new(DisconnectedState),
        Box::new(AwaitingDeviceState),
        Box::new(ConnectingState),
        Box::new(ConnectedState),
    ]
}

/// Binds the control port, if one is configured
struct IdleState;

impl State<DeviceStateKind, Arc<Context>> for IdleState {
    fn kind(&self) -> DeviceStateKind {
        DeviceStateKind::Idle
    }

    fn is_valid_next(&self, next: DeviceStateKind) -> bool {
        self.kind().can_transition(next)
    }

    fn did_enter_from(&mut self, _previous: Option<DeviceStateKind>, context: &Arc<Context>) {
        info!("Did enter Idle");

        let Some(port) = context.settings().port else {
            info!("No control port configured");
            context.apply_state(DeviceStateKind::AwaitingDevice);
            return;
        };

        let context = context.clone();
        tokio::spawn(async move {
            let timeout = context.settings().request_timeout();
            match context.server().listen(port, timeout).await {
                Ok(addr) => {
                    info!("Listening at {}", addr);
                    context.apply_state(DeviceStateKind::AwaitingDevice);
                }
                Err(e) => {
                    match &e {
                        BindError::AddrInUse { .. } => {
                            error!("Port {} is already in use. Quitting...", port)
                        }
                        BindError::Other { source, .. } => {
                            error!("Unknown error opening port {}: {}. Quitting...", port, source)
                        }
                    }
                    context.finish(Err(e.into()));
                }
            }
        });
    }
}

/// Marks a lost device and moves straight on to waiting for it
struct DisconnectedState;

impl State<DeviceStateKind, Arc<Context>> for DisconnectedState {
    fn kind(&self) -> DeviceStateKind {
        DeviceStateKind::Disconnected
    }

    fn is_valid_next(&self, next: DeviceStateKind) -> bool {
        self.kind().can_transition(next)
    }

    fn did_enter_from(&mut self, _previous: Option<DeviceStateKind>, context: &Arc<Context>) {
        info!("Did enter Disconnected");
        context.apply_state(DeviceStateKind::AwaitingDevice);
    }
}

/// Polls the serial endpoints until the configured device shows up
struct AwaitingDeviceState;

impl State<DeviceStateKind, Arc<Context>> for AwaitingDeviceState {
    fn kind(&self) -> DeviceStateKind {
        DeviceStateKind::AwaitingDevice
    }

    fn is_valid_next(&self, next: DeviceStateKind) -> bool {
        self.kind().can_transition(next)
    }

    fn did_enter_from(&mut self, _previous: Option<DeviceStateKind>, context: &Arc<Context>) {
        info!("Did enter AwaitingDevice");

        let context = context.clone();
        tokio::spawn(async move {
            let device = &context.settings().device;
            loop {
                let ports = context.transport().list_ports().unwrap_or_else(|e| {
                    warn!("Unable to enumerate serial ports: {}", e);
                    Vec::new()
                });
                debug!("Available devices: {:?}", ports);

                if ports.iter().any(|p| p == device) {
                    context.apply_state(DeviceStateKind::Connecting);
                    return;
                }

                warn!(
                    "Device {:?} is not available. Retrying in {}s...",
                    device,
                    DEVICE_RETRY_DELAY.as_secs()
                );
                sleep(DEVICE_RETRY_DELAY).await;
            }
        });
    }
}

/// Opens the link and probes the device with `status`
struct ConnectingState;

impl State<DeviceStateKind, Arc<Context>> for ConnectingState {
    fn kind(&self) -> DeviceStateKind {
        DeviceStateKind::Connecting
    }

    fn is_valid_next(&self, next: DeviceStateKind) -> bool {
        self.kind().can_transition(next)
    }

    fn did_enter_from(&mut self, _previous: Option<DeviceStateKind>, context: &Arc<Context>) {
        info!("Did enter Connecting");

        let context = context.clone();
        let teardown = Arc::new(Teardown::new(context.clone()));
        tokio::spawn(async move {
            let settings = context.settings();
            let device = settings.device.clone();
            info!(
                "Trying to connect to {} ({} baud, parity {:?}, {} data bits)",
                device,
                settings.baud_rate,
                settings.parity,
                u8::from(settings.data_bits)
            );

            let link = match context.transport().open(&device, &settings.link_settings()) {
                Ok(link) => link,
                Err(e) => {
                    teardown.link_failed(&device, LinkError::Open(e.to_string()));
                    return;
                }
            };

            let (pipeline, mut errors) = Pipeline::spawn(link);
            let pipeline = Arc::new(pipeline);
            context.set_connection(Some(pipeline.clone()));

            let observer = teardown.clone();
            let observed = device.clone();
            tokio::spawn(async move {
                while let Some(e) = errors.recv().await {
                    observer.link_failed(&observed, e);
                }
            });

            info!("Running status on {}...", device);
            match pipeline.submit(Command::status()).await {
                Ok(status) => {
                    info!("Status of {}: {}", device, status);
                    context.apply_state(DeviceStateKind::Connected);
                }
                Err(e) => {
                    warn!("Unable to run status on {}: {}", device, e);
                    teardown.schedule();
                }
            }
        });
    }
}

/// Serves the control API against the live connection
struct ConnectedState;

impl State<DeviceStateKind, Arc<Context>> for ConnectedState {
    fn kind(&self) -> DeviceStateKind {
        DeviceStateKind::Connected
    }

    fn is_valid_next(&self, next: DeviceStateKind) -> bool {
        self.kind().can_transition(next)
    }

    fn did_enter_from(&mut self, _previous: Option<DeviceStateKind>, context: &Arc<Context>) {
        info!("Did enter Connected");

        if context.settings().port.is_none() {
            info!("No control surface configured, nothing left to do");
            context.finish(Ok(()));
            return;
        }

        match context.connection() {
            Some(pipeline) => context.server().install(ControlBridge::new(pipeline)),
            // A teardown cleared it and is already moving us to Disconnected
            None => warn!("Connected without a live connection"),
        }
    }

    fn will_exit_to(&mut self, _next: DeviceStateKind, context: &Arc<Context>) {
        context.server().uninstall();
    }
}

/// Delayed teardown of one connection attempt. Only the first request
/// schedules anything.
pub(super) struct Teardown {
    scheduled: AtomicBool,
    context: Arc<Context>,
}

impl Teardown {
    pub(super) fn new(context: Arc<Context>) -> Self {
        Self {
            scheduled: AtomicBool::new(false),
            context,
        }
    }

    /// Report a failure of the link to `device` and tear the attempt down
    pub(super) fn link_failed(&self, device: &str, err: LinkError) -> bool {
        error!("An error occurred on {}: {}", device, err);
        self.schedule()
    }

    /// Close the link now and move to Disconnected after [`TEARDOWN_DELAY`].
    /// Returns `false` if a teardown was already scheduled.
    pub(super) fn schedule(&self) -> bool {
        if self.scheduled.swap(true, Ordering::SeqCst) {
            debug!("Teardown already scheduled");
            return false;
        }

        if let Some(pipeline) = self.context.connection() {
            pipeline.close();
        }

        warn!("Disconnecting in {}s...", TEARDOWN_DELAY.as_secs());
        let context = self.context.clone();
        tokio::spawn(async move {
            sleep(TEARDOWN_DELAY).await;
            context.set_connection(None);
            context.apply_state(DeviceStateKind::Disconnected);
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::LifecycleEvent;
    use crate::protocol::{DynLink, LinkSettings, ProtocolError, Transport};
    use crate::settings::Settings;
    use std::time::Duration;

    struct NoPorts;

    impl Transport for NoPorts {
        fn list_ports(&self) -> Result<Vec<String>, ProtocolError> {
            Ok(Vec::new())
        }

        fn open(&self, path: &str, _settings: &LinkSettings) -> Result<DynLink, ProtocolError> {
            Err(ProtocolError::PortNotFound(path.to_string()))
        }
    }

    fn entered(events: &mut tokio::sync::mpsc::UnboundedReceiver<LifecycleEvent>) -> Vec<DeviceStateKind> {
        let mut kinds = Vec::new();
        while let Ok(LifecycleEvent::Enter(kind)) = events.try_recv() {
            kinds.push(kind);
        }
        kinds
    }

    #[test]
    fn test_registry_has_one_state_per_kind() {
        let kinds: Vec<_> = registry().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                DeviceStateKind::Idle,
                DeviceStateKind::Disconnected,
                DeviceStateKind::AwaitingDevice,
                DeviceStateKind::Connecting,
                DeviceStateKind::Connected,
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_errors_schedule_one_teardown() {
        let (context, mut events) = Context::new(Settings::default(), Arc::new(NoPorts));
        let teardown = Teardown::new(context.clone());

        assert!(teardown.schedule());
        sleep(Duration::from_millis(500)).await;
        assert!(!teardown.schedule());

        sleep(TEARDOWN_DELAY * 2).await;
        assert_eq!(entered(&mut events), vec![DeviceStateKind::Disconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_teardown_closes_link_before_delay() {
        let (context, mut events) = Context::new(Settings::default(), Arc::new(NoPorts));
        let (link, _device) = tokio::io::duplex(64);
        let (pipeline, _errors) = Pipeline::spawn(link);
        let pipeline = Arc::new(pipeline);
        context.set_connection(Some(pipeline.clone()));

        Teardown::new(context.clone()).schedule();
        assert!(pipeline.is_closed());
        assert!(context.connection().is_some());

        sleep(TEARDOWN_DELAY).await;
        sleep(Duration::from_millis(1)).await;
        assert!(context.connection().is_none());
        assert_eq!(entered(&mut events), vec![DeviceStateKind::Disconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unopenable_link_schedules_teardown() {
        let settings = Settings {
            port: None,
            ..Settings::default()
        };
        let (context, mut events) = Context::new(settings, Arc::new(NoPorts));

        ConnectingState.did_enter_from(Some(DeviceStateKind::AwaitingDevice), &context);
        sleep(Duration::from_millis(10)).await;
        assert!(context.connection().is_none());
        assert!(entered(&mut events).is_empty());

        sleep(TEARDOWN_DELAY).await;
        assert_eq!(entered(&mut events), vec![DeviceStateKind::Disconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_link_failures_after_the_first_are_ignored() {
        let (context, mut events) = Context::new(Settings::default(), Arc::new(NoPorts));
        let teardown = Teardown::new(context.clone());

        assert!(teardown.link_failed("/dev/ttyACM0", LinkError::Open("busy".into())));
        assert!(!teardown.link_failed("/dev/ttyACM0", LinkError::Eof));

        sleep(TEARDOWN_DELAY * 2).await;
        assert_eq!(entered(&mut events), vec![DeviceStateKind::Disconnected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnected_moves_on_to_awaiting_device() {
        let (context, mut events) = Context::new(Settings::default(), Arc::new(NoPorts));
        DisconnectedState.did_enter_from(Some(DeviceStateKind::Connected), &context);
        assert_eq!(entered(&mut events), vec![DeviceStateKind::AwaitingDevice]);
    }
}
