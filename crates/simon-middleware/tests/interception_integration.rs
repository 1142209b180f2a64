//! End-to-end interception tests.
//!
//! Drive the engine and the session through the public API: synthetic key
//! events in, serial bytes and replayed keys out. Each test builds its own
//! runtime-bound engine so transactions never leak between tests.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use mockall::mock;
use mockall::predicate::eq;
use simon_core::{Challenge, Codec, CodecMode, GateState, KeyCode, KeyRegistry, Verdict};
use tokio::runtime::Handle;
use tokio::sync::Notify;

use simon_middleware::application::hardware_link::{HardwareLink, LinkError};
use simon_middleware::application::intercept::{EngineSettings, InterceptEngine};
use simon_middleware::application::session::{Session, SessionError, SessionPhase, SessionSettings};
use simon_middleware::infrastructure::input_capture::mock::MockKeyboardHook;
use simon_middleware::infrastructure::input_capture::{
    HookDecision, KeyEventHandler, RawKeyEvent,
};
use simon_middleware::infrastructure::input_replay::mock::MockKeyReplayer;
use simon_middleware::infrastructure::input_replay::{KeyReplayer, ReplayError};
use simon_middleware::infrastructure::serial::mock::{MockPortOpener, MockSerialPort};
use simon_middleware::infrastructure::serial::{LineSettings, SerialDevice, SerialLink};

const A: KeyCode = KeyCode(0x41);
const B: KeyCode = KeyCode(0x42);

mock! {
    Replayer {}
    impl KeyReplayer for Replayer {
        fn replay(&self, key: KeyCode) -> Result<(), ReplayError>;
    }
}

// ── Test doubles ──────────────────────────────────────────────────────────────

/// Link that holds every receive until the test releases it.
#[derive(Default)]
struct HeldLink {
    sent: Mutex<Vec<Challenge>>,
    release: Notify,
}

impl HeldLink {
    fn sent(&self) -> Vec<Challenge> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl HardwareLink for HeldLink {
    async fn send(&self, challenge: &Challenge) -> Result<(), LinkError> {
        self.sent.lock().unwrap().push(challenge.clone());
        Ok(())
    }

    async fn receive(&self, _timeout: Duration) -> Result<Verdict, LinkError> {
        self.release.notified().await;
        Ok(Verdict::Success)
    }
}

/// Link whose device never answers.
struct SilentLink;

#[async_trait]
impl HardwareLink for SilentLink {
    async fn send(&self, _challenge: &Challenge) -> Result<(), LinkError> {
        Ok(())
    }

    async fn receive(&self, _timeout: Duration) -> Result<Verdict, LinkError> {
        std::future::pending().await
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn registry_with_a() -> Arc<KeyRegistry> {
    let registry = Arc::new(KeyRegistry::new());
    registry
        .register(A, Challenge::Pattern(vec![3, 1, 3, 1]))
        .unwrap();
    registry
}

fn serial_device(port: &MockSerialPort, mode: CodecMode) -> Arc<SerialDevice> {
    let settings = LineSettings {
        poll_interval: Duration::from_millis(1),
        ..LineSettings::default()
    };
    let device = SerialDevice::create(
        "COM6",
        settings,
        Arc::new(MockPortOpener::new(port.clone())),
        Codec::new(mode),
    );
    device.connect().unwrap();
    Arc::new(device)
}

// ── Engine over the serial link ───────────────────────────────────────────────

#[tokio::test]
async fn test_success_reply_replays_the_held_key_once() {
    // Arrange
    let port = MockSerialPort::new();
    port.queue_reply("SUCCESS\n");
    let device = serial_device(&port, CodecMode::Pattern);
    let mut replayer = MockReplayer::new();
    replayer
        .expect_replay()
        .with(eq(A))
        .times(1)
        .returning(|_| Ok(()));
    let engine = InterceptEngine::new(
        registry_with_a(),
        Arc::new(replayer),
        EngineSettings::default(),
        Handle::current(),
    );
    engine.set_link(Arc::new(SerialLink::new(device)));

    // Act
    let decision = engine.on_key_event(RawKeyEvent::key_down(A));
    let report = engine.drain().await.unwrap();

    // Assert
    assert_eq!(decision, HookDecision::Suppress);
    assert_eq!(report.verdict, Verdict::Success);
    assert!(report.replayed);
    assert_eq!(port.written_lines(), vec!["PATTERN:3,1,3,1", "CHECK"]);
    assert_eq!(engine.gate_state(), GateState::Idle);
}

#[tokio::test]
async fn test_false_reply_withholds_the_key() {
    // Arrange
    let port = MockSerialPort::new();
    port.queue_reply("False\r\n");
    let device = serial_device(&port, CodecMode::Pattern);
    let mut replayer = MockReplayer::new();
    replayer.expect_replay().never();
    let engine = InterceptEngine::new(
        registry_with_a(),
        Arc::new(replayer),
        EngineSettings::default(),
        Handle::current(),
    );
    engine.set_link(Arc::new(SerialLink::new(device)));

    // Act
    engine.on_key_event(RawKeyEvent::key_down(A));
    let report = engine.drain().await.unwrap();

    // Assert
    assert_eq!(report.verdict, Verdict::Failure);
    assert!(!report.replayed);
    assert!(engine.gate_state().is_idle());
}

#[tokio::test]
async fn test_length_mode_sends_decimal_count_without_check() {
    // Arrange
    let port = MockSerialPort::new();
    port.queue_reply("True\n");
    let device = serial_device(&port, CodecMode::Length);
    let registry = Arc::new(KeyRegistry::new());
    registry.register(B, Challenge::Length(6)).unwrap();
    let replayer = Arc::new(MockKeyReplayer::new());
    let engine = InterceptEngine::new(
        registry,
        Arc::clone(&replayer) as Arc<dyn KeyReplayer>,
        EngineSettings::default(),
        Handle::current(),
    );
    engine.set_link(Arc::new(SerialLink::new(device)));

    // Act
    engine.on_key_event(RawKeyEvent::key_down(B));
    engine.drain().await;

    // Assert
    assert_eq!(port.written_lines(), vec!["6"]);
    assert_eq!(replayer.replayed(), vec![B]);
}

// ── Single-flight behaviour ───────────────────────────────────────────────────

#[tokio::test]
async fn test_second_press_while_busy_is_dropped_without_a_second_send() {
    // Arrange
    let link = Arc::new(HeldLink::default());
    let replayer = Arc::new(MockKeyReplayer::new());
    let engine = InterceptEngine::new(
        registry_with_a(),
        Arc::clone(&replayer) as Arc<dyn KeyReplayer>,
        EngineSettings::default(),
        Handle::current(),
    );
    engine.set_link(Arc::clone(&link) as Arc<dyn HardwareLink>);

    // Act
    let first = engine.on_key_event(RawKeyEvent::key_down(A));
    let second = engine.on_key_event(RawKeyEvent::key_down(A));
    let other = engine.on_key_event(RawKeyEvent::key_down(B));
    assert_eq!(engine.gate_state(), GateState::Busy(A));
    link.release.notify_one();
    engine.drain().await;

    // Assert
    assert_eq!(first, HookDecision::Suppress);
    assert_eq!(second, HookDecision::Suppress);
    assert_eq!(other, HookDecision::Forward, "unregistered keys pass while busy");
    assert_eq!(link.sent(), vec![Challenge::Pattern(vec![3, 1, 3, 1])]);
    assert_eq!(replayer.replayed(), vec![A], "the dropped press is never replayed");
    assert!(engine.gate_state().is_idle());
}

#[tokio::test]
async fn test_key_up_and_self_injected_events_pass_through() {
    // Arrange
    let replayer = Arc::new(MockKeyReplayer::new());
    let engine = InterceptEngine::new(
        registry_with_a(),
        Arc::clone(&replayer) as Arc<dyn KeyReplayer>,
        EngineSettings::default(),
        Handle::current(),
    );
    engine.set_link(Arc::new(HeldLink::default()));
    let injected = RawKeyEvent {
        self_injected: true,
        ..RawKeyEvent::key_down(A)
    };

    // Act / Assert
    assert_eq!(engine.on_key_event(RawKeyEvent::key_up(A)), HookDecision::Forward);
    assert_eq!(engine.on_key_event(injected), HookDecision::Forward);
    assert!(engine.gate_state().is_idle(), "no transaction was started");
}

#[tokio::test(start_paused = true)]
async fn test_silent_device_still_releases_the_gate() {
    // Arrange
    let replayer = Arc::new(MockKeyReplayer::new());
    let settings = EngineSettings {
        verify_timeout: Duration::from_millis(500),
        ..EngineSettings::default()
    };
    let engine = InterceptEngine::new(
        registry_with_a(),
        Arc::clone(&replayer) as Arc<dyn KeyReplayer>,
        settings.clone(),
        Handle::current(),
    );
    engine.set_link(Arc::new(SilentLink));

    // Act
    engine.on_key_event(RawKeyEvent::key_down(A));
    let report = engine.drain().await.unwrap();

    // Assert
    assert_eq!(report.verdict, Verdict::Indeterminate);
    assert!(report.elapsed >= settings.verify_timeout);
    assert!(report.elapsed <= settings.receive_bound() + Duration::from_millis(10));
    assert!(replayer.replayed().is_empty());
    assert!(engine.gate_state().is_idle());
    assert_eq!(
        engine.on_key_event(RawKeyEvent::key_down(A)),
        HookDecision::Suppress,
        "a fresh press starts a new transaction"
    );
}

// ── Whole session ─────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_session_intercepts_and_replays_through_mock_hardware() {
    // Arrange
    let port = MockSerialPort::new();
    port.queue_reply("SUCCESS\r\n");
    let opener = Arc::new(MockPortOpener::new(port.clone()));
    let settings = LineSettings {
        poll_interval: Duration::from_millis(1),
        ..LineSettings::default()
    };
    let device = Arc::new(SerialDevice::create(
        "COM6",
        settings,
        opener,
        Codec::new(CodecMode::Pattern),
    ));
    let hook = MockKeyboardHook::new();
    let replayer = Arc::new(MockKeyReplayer::new());
    let mut session = Session::new(
        Arc::clone(&device),
        Box::new(hook.clone()),
        Arc::clone(&replayer) as Arc<dyn KeyReplayer>,
        SessionSettings::default(),
        Handle::current(),
    );
    session
        .register_key(A, Challenge::Pattern(vec![1, 2, 3, 2, 1]))
        .unwrap();
    session.initialize().unwrap();
    session.set_callbacks(Arc::new(SerialLink::new(Arc::clone(&device))));

    // Act
    let held = hook.press(A);
    let passed = hook.press(B);
    session.engine().drain().await;
    session.run(async {}).await.unwrap();

    // Assert
    assert_eq!(held, HookDecision::Suppress);
    assert_eq!(passed, HookDecision::Forward);
    assert_eq!(replayer.replayed(), vec![A]);
    assert_eq!(port.written_lines(), vec!["PATTERN:1,2,3,2,1", "CHECK"]);
    assert_eq!(session.phase(), SessionPhase::ShutDown);
    assert_eq!(hook.uninstall_calls(), 1);
    assert!(!device.is_connected());
}

#[tokio::test]
async fn test_session_unavailable_port_leaves_hook_uninstalled() {
    // Arrange
    let device = Arc::new(SerialDevice::create(
        "COM99",
        LineSettings::default(),
        Arc::new(MockPortOpener::unavailable()),
        Codec::default(),
    ));
    let hook = MockKeyboardHook::new();
    let mut session = Session::new(
        device,
        Box::new(hook.clone()),
        Arc::new(MockKeyReplayer::new()),
        SessionSettings::default(),
        Handle::current(),
    );

    // Act
    let result = session.initialize();

    // Assert
    assert!(result.is_err());
    assert_eq!(hook.install_calls(), 0);
    assert_eq!(session.phase(), SessionPhase::Created);
}

// ── Stale input and cancellation ──────────────────────────────────────────────

#[tokio::test]
async fn test_late_reply_to_abandoned_challenge_does_not_unlock_the_next() {
    // Arrange
    const W: KeyCode = KeyCode(0x57);
    let port = MockSerialPort::new();
    let device = serial_device(&port, CodecMode::Length);
    let registry = Arc::new(KeyRegistry::new());
    registry.register(W, Challenge::Length(5)).unwrap();
    let replayer = Arc::new(MockKeyReplayer::new());
    let engine = InterceptEngine::new(
        registry,
        Arc::clone(&replayer) as Arc<dyn KeyReplayer>,
        EngineSettings {
            verify_timeout: Duration::from_millis(100),
            ..EngineSettings::default()
        },
        Handle::current(),
    );
    engine.set_link(Arc::new(SerialLink::new(device)));

    // Act: the first challenge goes unanswered, then its answer shows up late
    engine.on_key_event(RawKeyEvent::key_down(W));
    let first = engine.drain().await.unwrap();
    port.queue_response("True\n");
    engine.on_key_event(RawKeyEvent::key_down(W));
    let second = engine.drain().await.unwrap();

    // Assert
    assert_eq!(first.verdict, Verdict::Indeterminate);
    assert_eq!(second.verdict, Verdict::Indeterminate);
    assert!(replayer.replayed().is_empty());
    assert_eq!(port.written_lines(), vec!["5", "5"]);
}

#[tokio::test]
async fn test_shutdown_honours_grace_while_serial_read_is_pending() {
    // Arrange
    let port = MockSerialPort::new();
    let device = serial_device(&port, CodecMode::Length);
    let hook = MockKeyboardHook::new();
    let settings = SessionSettings {
        engine: EngineSettings {
            verify_timeout: Duration::from_secs(4),
            ..EngineSettings::default()
        },
        shutdown_grace: Duration::from_millis(100),
    };
    let mut session = Session::new(
        Arc::clone(&device),
        Box::new(hook.clone()),
        Arc::new(MockKeyReplayer::new()),
        settings,
        Handle::current(),
    );
    session.register_key(B, Challenge::Length(3)).unwrap();
    session.initialize().unwrap();
    session.set_callbacks(Arc::new(SerialLink::new(Arc::clone(&device))));
    hook.press(B);
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Act
    let started = std::time::Instant::now();
    let result = session.shutdown().await;
    let took = started.elapsed();

    // Assert
    assert!(matches!(result, Err(SessionError::Timeout(_))));
    assert!(took < Duration::from_secs(1), "shutdown took {took:?}");
    assert!(!device.is_connected());
}
