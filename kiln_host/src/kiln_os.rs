//! Controller context: owns the shared state, wires the sensor sampler,
//! safety supervisor and firing engine together, and drives them with
//! periodic tasks. `KilnHandle` is the external command/observer surface
//! the display and network facades talk to.

use crate::engine::{CommandError, EngineContext, FiringEngine, COMMAND_QUEUE_DEPTH};
use crate::events::EventBus;
use crate::safety::SafetySupervisor;
use crate::sensor::{ReadingCell, SensorSampler};
use crate::storage::{self, DirKvStore, HistoryStore, ProfileStore};
use kiln_shared::config::KilnConfig;
use kiln_shared::{
    Clock, FiringCommand, FiringErrorCode, FiringProfile, FiringProgress, KeyValueStore, KilnEvent,
    KilnSettings, StoreError, SwitchOutput, ThermocoupleProbe,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;

#[derive(Debug, Error)]
pub enum KilnOsError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("profile store error: {0}")]
    Profiles(#[from] storage::ProfileStoreError),
}

/// The hardware capability set handed to the controller at boot.
pub struct KilnHardware {
    pub probe: Box<dyn ThermocoupleProbe>,
    pub ssr: Box<dyn SwitchOutput>,
    pub vent: Option<Box<dyn SwitchOutput>>,
    pub alarm: Option<Box<dyn SwitchOutput>>,
    pub clock: Arc<dyn Clock>,
}

/// Command and observer surface shared with external interfaces.
#[derive(Clone)]
pub struct KilnHandle {
    cmd_tx: mpsc::Sender<FiringCommand>,
    progress: Arc<Mutex<FiringProgress>>,
    settings: Arc<Mutex<KilnSettings>>,
    events: Arc<EventBus>,
    supervisor: Arc<SafetySupervisor>,
    profiles: ProfileStore,
    history: Arc<HistoryStore>,
    kv: Arc<dyn KeyValueStore>,
    element_seconds: Arc<AtomicU32>,
}

impl KilnHandle {
    fn send(&self, cmd: FiringCommand) -> Result<(), CommandError> {
        self.cmd_tx.try_send(cmd).map_err(|e| {
            tracing::warn!("command enqueue failed: {}", e);
            CommandError::QueueFull
        })
    }

    pub fn start_firing(
        &self,
        profile: FiringProfile,
        delay_minutes: u32,
    ) -> Result<(), CommandError> {
        self.send(FiringCommand::Start {
            profile,
            delay_minutes,
        })
    }

    pub fn stop(&self) -> Result<(), CommandError> {
        self.send(FiringCommand::Stop)
    }

    pub fn pause(&self) -> Result<(), CommandError> {
        self.send(FiringCommand::Pause)
    }

    pub fn resume(&self) -> Result<(), CommandError> {
        self.send(FiringCommand::Resume)
    }

    pub fn skip_segment(&self) -> Result<(), CommandError> {
        self.send(FiringCommand::SkipSegment)
    }

    /// Caller-side ceiling check; the engine re-checks on receipt.
    pub fn autotune_start(&self, setpoint_c: f32, hysteresis_c: f32) -> Result<(), CommandError> {
        let max_safe = self
            .settings
            .lock()
            .expect("settings lock poisoned")
            .max_safe_temp_c;
        if setpoint_c > max_safe {
            return Err(CommandError::SetpointTooHigh);
        }
        self.send(FiringCommand::AutotuneStart {
            setpoint_c,
            hysteresis_c,
        })
    }

    pub fn autotune_stop(&self) -> Result<(), CommandError> {
        self.send(FiringCommand::AutotuneStop)
    }

    pub fn get_progress(&self) -> FiringProgress {
        self.progress.lock().expect("progress lock poisoned").clone()
    }

    /// Settings snapshot; the API token is never included.
    pub fn get_settings(&self) -> KilnSettings {
        self.settings
            .lock()
            .expect("settings lock poisoned")
            .public_view()
    }

    /// Persist new settings. An empty `api_token` keeps the stored one;
    /// the safety ceiling is clamped and pushed to the supervisor.
    pub fn update_settings(&self, mut new: KilnSettings) -> Result<KilnSettings, StoreError> {
        new.clamp_limits();
        let saved = {
            let mut settings = self.settings.lock().expect("settings lock poisoned");
            if new.api_token.is_empty() {
                new.api_token = settings.api_token.clone();
            }
            *settings = new;
            settings.clone()
        };
        self.supervisor.set_max_temp(saved.max_safe_temp_c);
        storage::settings::save_settings(self.kv.as_ref(), &saved)?;
        Ok(saved.public_view())
    }

    pub fn get_error_code(&self) -> FiringErrorCode {
        self.events.last_error()
    }

    /// Accumulated SSR-on time in seconds.
    pub fn get_element_hours_s(&self) -> u32 {
        self.element_seconds.load(Ordering::Relaxed)
    }

    pub fn is_emergency(&self) -> bool {
        self.supervisor.is_emergency()
    }

    pub fn clear_emergency(&self) {
        self.supervisor.clear_emergency();
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<KilnEvent> {
        self.events.subscribe()
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    pub fn history(&self) -> &HistoryStore {
        &self.history
    }
}

pub struct KilnOs {
    config: KilnConfig,
    handle: KilnHandle,
    supervisor: Arc<SafetySupervisor>,
    sampler: Option<SensorSampler>,
    engine: Option<FiringEngine>,
    alarm: Option<Box<dyn SwitchOutput>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl KilnOs {
    pub fn new(config: KilnConfig, hardware: KilnHardware) -> Result<Self, KilnOsError> {
        let kv: Arc<dyn KeyValueStore> = Arc::new(DirKvStore::open(&config.storage.data_dir)?);
        let history = Arc::new(HistoryStore::open(&config.storage.data_dir)?);

        let mut settings = storage::settings::load_settings(kv.as_ref());
        settings.clamp_limits();
        let settings = Arc::new(Mutex::new(settings));

        let events = Arc::new(EventBus::new());
        let reading_cell = Arc::new(ReadingCell::new());

        let ceiling = settings
            .lock()
            .expect("settings lock poisoned")
            .max_safe_temp_c;
        let supervisor = Arc::new(SafetySupervisor::new(
            hardware.ssr,
            hardware.vent,
            ceiling,
            config.control.ssr_window_ms,
            events.clone(),
            reading_cell.clone(),
            hardware.clock.clone(),
        ));

        let profiles = ProfileStore::new(kv.clone());
        profiles.seed_defaults()?;

        let sampler = SensorSampler::new(hardware.probe, reading_cell.clone(), hardware.clock.clone());

        let progress = Arc::new(Mutex::new(FiringProgress::default()));
        let element_seconds = Arc::new(AtomicU32::new(0));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let engine = FiringEngine::new(
            EngineContext {
                clock: hardware.clock,
                reading_cell,
                supervisor: supervisor.clone(),
                events: events.clone(),
                settings: settings.clone(),
                history: history.clone(),
                kv: kv.clone(),
                progress: progress.clone(),
                element_seconds: element_seconds.clone(),
            },
            cmd_rx,
        );

        let (shutdown_tx, _) = broadcast::channel(1);

        let handle = KilnHandle {
            cmd_tx,
            progress,
            settings,
            events,
            supervisor: supervisor.clone(),
            profiles,
            history,
            kv,
            element_seconds,
        };

        Ok(Self {
            config,
            handle,
            supervisor,
            sampler: Some(sampler),
            engine: Some(engine),
            alarm: hardware.alarm,
            shutdown_tx,
        })
    }

    pub fn handle(&self) -> KilnHandle {
        self.handle.clone()
    }

    pub fn supervisor(&self) -> Arc<SafetySupervisor> {
        self.supervisor.clone()
    }

    /// Spawn the control tasks: supervisor (500 ms), sampler (250 ms),
    /// engine (1 s), plus the alarm listener when a buzzer is fitted.
    pub fn start(&mut self) {
        tracing::info!("starting kiln controller tasks");

        let mut sampler = self.sampler.take().expect("sampler already started");
        let sampler_period = self.config.control.sampler_period_ms;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_millis(sampler_period));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("sensor sampler shutting down");
                        break;
                    }
                    _ = interval.tick() => sampler.sample_once(),
                }
            }
        });

        let supervisor = self.supervisor.clone();
        let supervisor_period = self.config.control.supervisor_period_ms;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_millis(supervisor_period));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("safety supervisor shutting down");
                        break;
                    }
                    _ = interval.tick() => supervisor.poll(),
                }
            }
        });

        let mut engine = self.engine.take().expect("engine already started");
        let engine_period = self.config.control.engine_period_ms;
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(tokio::time::Duration::from_millis(engine_period));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("firing engine shutting down");
                        break;
                    }
                    _ = interval.tick() => engine.tick(),
                }
            }
        });

        if let Some(alarm) = self.alarm.take() {
            self.spawn_alarm_task(alarm);
        }
    }

    /// Chime patterns on completion and error events, gated by the
    /// alarm-enabled setting.
    fn spawn_alarm_task(&self, mut alarm: Box<dyn SwitchOutput>) {
        let mut events = self.handle.subscribe_events();
        let settings = self.handle.settings.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = shutdown_rx.recv() => break,
                    event = events.recv() => event,
                };
                let Ok(event) = event else { continue };
                let enabled = settings.lock().expect("settings lock poisoned").alarm_enabled;
                if !enabled {
                    continue;
                }
                let (pulses, on_ms, off_ms) = match event {
                    KilnEvent::FiringComplete { .. } => (3, 500, 200),
                    KilnEvent::FiringError { .. } | KilnEvent::EmergencyStop { .. } => {
                        (5, 100, 100)
                    }
                    _ => continue,
                };
                for _ in 0..pulses {
                    alarm.set_high();
                    tokio::time::sleep(tokio::time::Duration::from_millis(on_ms)).await;
                    alarm.set_low();
                    tokio::time::sleep(tokio::time::Duration::from_millis(off_ms)).await;
                }
            }
            alarm.set_low();
        });
    }

    /// Stop all tasks and leave the SSR de-energized.
    pub fn shutdown(&self) {
        tracing::info!("shutting down kiln controller");
        let _ = self.shutdown_tx.send(());
        self.supervisor.set_ssr(0.0);
    }
}
