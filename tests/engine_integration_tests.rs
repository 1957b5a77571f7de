//! End-to-end tests: scripted device bus in, recorded pad states out.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use padbridge::capture::CaptureSettings;
use padbridge::engine::{EngineError, EngineHandle, EngineSettings};
use padbridge::feedback::{FeedbackError, FeedbackTarget, MotorMode, RumblePulse, RumbleSink};
use padbridge::sink::{SinkError, VirtualPad};
use padbridge::{
    Binding, BusError, CaptureOutcome, DeviceBus, DeviceHook, MappingProfile, PadOutput, PadState,
    Source, SourceEvent, SourceKind,
};

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------- fake bus

#[derive(Default)]
struct BusState {
    tables: HashMap<String, Vec<Source>>,
    senders: HashMap<String, mpsc::Sender<SourceEvent>>,
    failing: HashSet<String>,
    released: Vec<String>,
}

/// Device collaborator double: hands out configured source tables and lets
/// the test push events through the subscription senders.
#[derive(Default)]
struct FakeBus {
    state: Arc<Mutex<BusState>>,
}

impl FakeBus {
    fn with_device(self, device: &str, sources: Vec<Source>) -> Self {
        self.state
            .lock()
            .unwrap()
            .tables
            .insert(device.to_string(), sources);
        self
    }

    fn failing(self, device: &str) -> Self {
        self.state
            .lock()
            .unwrap()
            .failing
            .insert(device.to_string());
        self
    }

    fn live_subscriptions(&self) -> usize {
        self.state.lock().unwrap().senders.len()
    }

    fn released(&self) -> Vec<String> {
        self.state.lock().unwrap().released.clone()
    }

    async fn emit(&self, device: &str, index: u32, value: f64) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .senders
            .get(device)
            .cloned()
            .expect("device not subscribed");
        sender
            .send(SourceEvent::new(device, index, value))
            .await
            .expect("engine gone");
    }
}

impl DeviceBus for FakeBus {
    fn subscribe(
        &self,
        device: &str,
        events: mpsc::Sender<SourceEvent>,
    ) -> Result<DeviceHook, BusError> {
        let mut state = self.state.lock().unwrap();
        if state.failing.contains(device) {
            return Err(BusError::DeviceUnavailable(device.to_string()));
        }
        let sources = state
            .tables
            .get(device)
            .cloned()
            .ok_or_else(|| BusError::DeviceUnavailable(device.to_string()))?;
        state.senders.insert(device.to_string(), events);

        let shared = self.state.clone();
        let name = device.to_string();
        Ok(DeviceHook::new(device, sources, move || {
            let mut state = shared.lock().unwrap();
            state.senders.remove(&name);
            state.released.push(name.clone());
        }))
    }
}

// ---------------------------------------------------------------- fake pad

#[derive(Default)]
struct PadProbe {
    connected: AtomicBool,
    disconnected: AtomicBool,
    rumble: Mutex<Option<mpsc::Sender<RumblePulse>>>,
}

impl PadProbe {
    async fn pulse(&self, large: f64, small: f64) {
        let sender = self
            .rumble
            .lock()
            .unwrap()
            .clone()
            .expect("pad not connected");
        sender.send(RumblePulse::new(large, small)).await.unwrap();
    }
}

/// Virtual-controller double recording every submitted snapshot.
struct FakePad {
    probe: Arc<PadProbe>,
    snapshots: mpsc::UnboundedSender<PadState>,
    fail_connect: bool,
}

impl FakePad {
    fn new() -> (Self, Arc<PadProbe>, mpsc::UnboundedReceiver<PadState>) {
        let probe = Arc::new(PadProbe::default());
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                probe: probe.clone(),
                snapshots: tx,
                fail_connect: false,
            },
            probe,
            rx,
        )
    }

    fn broken() -> Self {
        let (mut pad, _, _) = Self::new();
        pad.fail_connect = true;
        pad
    }
}

impl VirtualPad for FakePad {
    fn connect(&mut self, rumble: mpsc::Sender<RumblePulse>) -> Result<(), SinkError> {
        if self.fail_connect {
            return Err(SinkError::Unavailable("no bus driver".to_string()));
        }
        *self.probe.rumble.lock().unwrap() = Some(rumble);
        self.probe.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn submit(&mut self, state: &PadState) -> Result<(), SinkError> {
        let _ = self.snapshots.send(state.clone());
        Ok(())
    }

    fn disconnect(&mut self) {
        self.probe.disconnected.store(true, Ordering::SeqCst);
    }
}

// ------------------------------------------------------------- rumble sink

#[derive(Default)]
struct ShakerProbe {
    levels: Mutex<Vec<f64>>,
    stopped: AtomicBool,
}

struct FakeShaker {
    probe: Arc<ShakerProbe>,
}

impl FakeShaker {
    fn new() -> (Self, Arc<ShakerProbe>) {
        let probe = Arc::new(ShakerProbe::default());
        (Self { probe: probe.clone() }, probe)
    }
}

impl RumbleSink for FakeShaker {
    fn play(&mut self, level: f64) -> Result<(), FeedbackError> {
        self.probe.levels.lock().unwrap().push(level);
        Ok(())
    }

    fn stop(&mut self) {
        self.probe.stopped.store(true, Ordering::SeqCst);
    }
}

// ----------------------------------------------------------------- helpers

fn wheel_and_pedals() -> FakeBus {
    FakeBus::default()
        .with_device(
            "wheel",
            vec![
                Source::new(0, "steering", SourceKind::Axis, 0.05),
                Source::new(3, "paddle", SourceKind::Slider, 0.0),
                Source::new(4, "button", SourceKind::Button, 0.0),
            ],
        )
        .with_device(
            "pedals",
            vec![
                Source::new(0, "gas", SourceKind::Slider, 0.0),
                Source::new(1, "brake", SourceKind::Slider, 0.0),
            ],
        )
}

async fn next_state(rx: &mut mpsc::UnboundedReceiver<PadState>) -> PadState {
    timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("no snapshot within deadline")
        .expect("sink channel closed")
}

async fn expect_no_state(rx: &mut mpsc::UnboundedReceiver<PadState>) {
    assert!(
        timeout(Duration::from_millis(100), rx.recv()).await.is_err(),
        "unexpected snapshot"
    );
}

// ------------------------------------------------------------------- tests

#[tokio::test]
async fn test_button_press_sequence() {
    init_logging();
    let bus = Arc::new(wheel_and_pedals());

    let mut profile = MappingProfile::new("button seq");
    profile.insert_binding(PadOutput::A, Binding::new("wheel", 3));

    let (pad, _probe, mut states) = FakePad::new();
    let mut handle = EngineHandle::new(bus.clone(), EngineSettings::default());
    handle
        .start(profile, Box::new(pad), None)
        .await
        .expect("start failed");

    // Neutral snapshot on start.
    assert!(!next_state(&mut states).await.a);

    // At rest already: no change, no snapshot.
    bus.emit("wheel", 3, 0.0).await;
    expect_no_state(&mut states).await;

    bus.emit("wheel", 3, 0.6).await;
    assert!(next_state(&mut states).await.a);

    bus.emit("wheel", 3, 0.3).await;
    assert!(!next_state(&mut states).await.a);

    handle.stop().await.expect("stop failed");
}

#[tokio::test]
async fn test_trigger_takes_strongest_press() {
    init_logging();
    let bus = Arc::new(wheel_and_pedals());

    let mut profile = MappingProfile::new("trigger max");
    profile.insert_binding(PadOutput::RightTrigger, Binding::new("pedals", 0));
    let mut inverted = Binding::new("pedals", 1);
    inverted.invert = true;
    profile.insert_binding(PadOutput::RightTrigger, inverted);

    let (pad, _probe, mut states) = FakePad::new();
    let mut handle = EngineHandle::new(bus.clone(), EngineSettings::default());
    handle.start(profile, Box::new(pad), None).await.unwrap();
    let _ = next_state(&mut states).await;

    // Inverted brake at 0.8 contributes 0.2.
    bus.emit("pedals", 1, 0.8).await;
    let state = next_state(&mut states).await;
    assert!((state.right_trigger - 0.2).abs() < 1e-9);

    // Gas at 0.8 wins: max(0.8, 0.2).
    bus.emit("pedals", 0, 0.8).await;
    let state = next_state(&mut states).await;
    assert!((state.right_trigger - 0.8).abs() < 1e-9);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_axis_follows_last_writer() {
    init_logging();
    let bus = Arc::new(
        FakeBus::default()
            .with_device(
                "wheel",
                vec![Source::new(0, "steering", SourceKind::Axis, 0.0)],
            )
            .with_device(
                "stick",
                vec![Source::new(0, "x", SourceKind::Axis, 0.0)],
            ),
    );

    let mut profile = MappingProfile::new("two axes");
    profile.insert_binding(PadOutput::LeftStickX, Binding::new("wheel", 0));
    profile.insert_binding(PadOutput::LeftStickX, Binding::new("stick", 0));

    let (pad, _probe, mut states) = FakePad::new();
    let mut handle = EngineHandle::new(bus.clone(), EngineSettings::default());
    handle.start(profile, Box::new(pad), None).await.unwrap();
    let initial = next_state(&mut states).await;
    assert_eq!(initial.left_stick_x, 0.5);

    bus.emit("wheel", 0, 0.9).await;
    assert!((next_state(&mut states).await.left_stick_x - 0.9).abs() < 1e-9);

    bus.emit("stick", 0, 0.2).await;
    assert!((next_state(&mut states).await.left_stick_x - 0.2).abs() < 1e-9);

    bus.emit("wheel", 0, 0.7).await;
    assert!((next_state(&mut states).await.left_stick_x - 0.7).abs() < 1e-9);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_start_failure_rolls_back() {
    init_logging();
    let bus = Arc::new(
        FakeBus::default()
            .with_device(
                "alpha",
                vec![Source::new(0, "x", SourceKind::Axis, 0.0)],
            )
            .with_device(
                "broken",
                vec![Source::new(0, "y", SourceKind::Axis, 0.0)],
            )
            .failing("broken"),
    );

    let mut profile = MappingProfile::new("doomed");
    profile.insert_binding(PadOutput::LeftStickX, Binding::new("alpha", 0));
    profile.insert_binding(PadOutput::LeftStickY, Binding::new("broken", 0));

    let (pad, probe, _states) = FakePad::new();
    let mut handle = EngineHandle::new(bus.clone(), EngineSettings::default());
    let result = handle.start(profile, Box::new(pad), None).await;

    assert!(matches!(result, Err(EngineError::Bus(_))));
    assert!(!handle.is_running());
    // The one subscription that succeeded was released again, and the
    // acquired pad was let go: no partial attachment survives.
    assert_eq!(bus.live_subscriptions(), 0);
    assert_eq!(bus.released(), vec!["alpha".to_string()]);
    assert!(probe.disconnected.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_sink_failure_fails_start() {
    init_logging();
    let bus = Arc::new(wheel_and_pedals());
    let mut profile = MappingProfile::new("no pad");
    profile.insert_binding(PadOutput::A, Binding::new("wheel", 4));

    let mut handle = EngineHandle::new(bus.clone(), EngineSettings::default());
    let result = handle.start(profile, Box::new(FakePad::broken()), None).await;

    assert!(matches!(result, Err(EngineError::Sink(_))));
    assert_eq!(bus.live_subscriptions(), 0);
    assert!(!handle.is_running());
}

#[tokio::test]
async fn test_swap_stops_previous_profile() {
    init_logging();
    let bus = Arc::new(wheel_and_pedals());

    let mut first = MappingProfile::new("first");
    first.insert_binding(PadOutput::A, Binding::new("wheel", 4));
    let mut second = MappingProfile::new("second");
    second.insert_binding(PadOutput::LeftTrigger, Binding::new("pedals", 0));

    let (pad1, probe1, _states1) = FakePad::new();
    let (pad2, probe2, _states2) = FakePad::new();

    let mut handle = EngineHandle::new(bus.clone(), EngineSettings::default());
    handle.start(first, Box::new(pad1), None).await.unwrap();
    assert_eq!(handle.active_profile(), Some("first"));

    handle.start(second, Box::new(pad2), None).await.unwrap();
    assert_eq!(handle.active_profile(), Some("second"));

    // The first engine released its pad and its wheel subscription; only
    // the second profile's device is live now.
    assert!(probe1.disconnected.load(Ordering::SeqCst));
    assert!(probe2.connected.load(Ordering::SeqCst));
    assert_eq!(bus.live_subscriptions(), 1);
    assert!(bus.released().contains(&"wheel".to_string()));

    handle.stop().await.unwrap();
    assert!(probe2.disconnected.load(Ordering::SeqCst));
    assert_eq!(bus.live_subscriptions(), 0);
}

#[tokio::test]
async fn test_rumble_reaches_attached_target() {
    init_logging();
    let bus = Arc::new(wheel_and_pedals());
    let mut profile = MappingProfile::new("rumble");
    profile.insert_binding(PadOutput::A, Binding::new("wheel", 4));

    let (shaker, shaker_probe) = FakeShaker::new();
    let (pad, pad_probe, _states) = FakePad::new();
    let mut handle = EngineHandle::new(bus.clone(), EngineSettings::default());
    handle
        .start(
            profile,
            Box::new(pad),
            Some(FeedbackTarget::Device(Box::new(shaker))),
        )
        .await
        .unwrap();

    // Give the router a beat to process the attach.
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Combined mode: strongest motor wins.
    pad_probe.pulse(0.8, 0.3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(shaker_probe.levels.lock().unwrap().as_slice(), &[0.8]);

    // Swap makes the small motor primary.
    handle.set_motor_mode(MotorMode::Swap).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    pad_probe.pulse(0.8, 0.3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        shaker_probe.levels.lock().unwrap().as_slice(),
        &[0.8, 0.3]
    );

    // Stopping detaches and stops the active effect.
    handle.stop().await.unwrap();
    assert!(shaker_probe.stopped.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_capture_learns_a_binding_end_to_end() {
    init_logging();
    let bus = Arc::new(wheel_and_pedals());
    let mut profile = MappingProfile::new("capture");
    profile.insert_binding(PadOutput::A, Binding::new("wheel", 3));

    let settings = EngineSettings {
        capture: CaptureSettings {
            grace_ms: 50,
            timeout_ms: 2_000,
            ..CaptureSettings::default()
        },
        ..EngineSettings::default()
    };

    let (pad, _probe, mut states) = FakePad::new();
    let mut handle = EngineHandle::new(bus.clone(), settings);
    handle.start(profile, Box::new(pad), None).await.unwrap();
    let _ = next_state(&mut states).await;

    let capture = handle.begin_capture(PadOutput::B).await.unwrap();

    // Only one session engine-wide.
    match handle.begin_capture(PadOutput::X).await {
        Err(EngineError::CaptureActive) => {}
        other => panic!("expected capture-active, got {:?}", other.map(|_| ())),
    }

    // Let the grace period pass, then press the button the user wants.
    tokio::time::sleep(Duration::from_millis(100)).await;
    bus.emit("wheel", 4, 0.0).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    bus.emit("wheel", 4, 0.9).await;

    let binding = match capture.wait().await {
        CaptureOutcome::Captured(binding) => binding,
        other => panic!("expected capture, got {:?}", other),
    };
    assert_eq!(binding.device_id, "wheel");
    assert_eq!(binding.source_index, 4);

    // Apply it; the engine re-evaluates immediately and the button is
    // already held at 0.9.
    handle.insert_binding(PadOutput::B, binding).await.unwrap();
    loop {
        let state = next_state(&mut states).await;
        if state.b {
            break;
        }
    }

    // A second capture is allowed again after the first one finished.
    let mut second = handle.begin_capture(PadOutput::X).await.unwrap();
    second.cancel();
    match second.wait().await {
        CaptureOutcome::Cancelled => {}
        other => panic!("expected cancelled, got {:?}", other),
    }

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_commands_require_running_engine() {
    init_logging();
    let bus = Arc::new(wheel_and_pedals());
    let handle = EngineHandle::new(bus, EngineSettings::default());

    match handle.begin_capture(PadOutput::A).await {
        Err(EngineError::NotRunning) => {}
        other => panic!("expected not-running, got {:?}", other.map(|_| ())),
    }
    match handle
        .insert_binding(PadOutput::A, Binding::new("wheel", 0))
        .await
    {
        Err(EngineError::NotRunning) => {}
        other => panic!("expected not-running, got {:?}", other),
    }
}
