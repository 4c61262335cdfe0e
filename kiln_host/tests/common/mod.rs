//! Deterministic closed-loop harness: the real sampler, supervisor and
//! engine driven tick-by-tick against the simulated plant, with a
//! manually advanced clock.

// Each test binary uses its own subset of the harness.
#![allow(dead_code)]

use kiln_host::engine::{EngineContext, FiringEngine, COMMAND_QUEUE_DEPTH};
use kiln_host::events::EventBus;
use kiln_host::safety::SafetySupervisor;
use kiln_host::sensor::{ReadingCell, SensorSampler};
use kiln_host::storage::{DirKvStore, HistoryStore};
use kiln_shared::{
    FiringCommand, FiringProfile, FiringProgress, FiringSegment, KeyValueStore, KilnSettings,
    SwitchOutput,
};
use kiln_simulator::{FirstOrderPlant, SimClock, SimProbe, SimSwitch};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub struct TestKiln {
    pub clock: SimClock,
    pub plant: Arc<Mutex<FirstOrderPlant>>,
    pub ssr: SimSwitch,
    pub vent: SimSwitch,
    pub fault_bits: Arc<AtomicU8>,
    pub bus_error: Arc<AtomicBool>,
    pub supervisor: Arc<SafetySupervisor>,
    pub events: Arc<EventBus>,
    pub settings: Arc<Mutex<KilnSettings>>,
    pub progress: Arc<Mutex<FiringProgress>>,
    pub history: Arc<HistoryStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub cmd_tx: mpsc::Sender<FiringCommand>,
    pub element_seconds: Arc<AtomicU32>,
    sampler: SensorSampler,
    engine: FiringEngine,
    step_count: u64,
    _dir: TempDir,
}

impl TestKiln {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let clock = SimClock::new();
        let clock_arc: Arc<dyn kiln_shared::Clock> = Arc::new(clock.clone());

        let plant = Arc::new(Mutex::new(FirstOrderPlant::new(20.0)));
        let probe = SimProbe::new(plant.clone());
        let fault_bits = probe.fault_bits();
        let bus_error = probe.bus_error();
        let ssr = SimSwitch::new("ssr");
        let vent = SimSwitch::new("vent");

        let kv: Arc<dyn KeyValueStore> = Arc::new(DirKvStore::open(dir.path()).expect("kv store"));
        let history = Arc::new(HistoryStore::open(dir.path()).expect("history store"));
        let settings = Arc::new(Mutex::new(KilnSettings::default()));
        let events = Arc::new(EventBus::new());
        let reading_cell = Arc::new(ReadingCell::new());

        let supervisor = Arc::new(SafetySupervisor::new(
            Box::new(ssr.clone()),
            Some(Box::new(vent.clone())),
            settings.lock().unwrap().max_safe_temp_c,
            2000,
            events.clone(),
            reading_cell.clone(),
            clock_arc.clone(),
        ));

        let mut sampler = SensorSampler::new(
            Box::new(probe),
            reading_cell.clone(),
            clock_arc.clone(),
        );

        let progress = Arc::new(Mutex::new(FiringProgress::default()));
        let element_seconds = Arc::new(AtomicU32::new(0));
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);

        let engine = FiringEngine::new(
            EngineContext {
                clock: clock_arc,
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

        // Prime the reading cell so the first tick sees a valid sample.
        clock.advance_ms(250);
        sampler.sample_once();

        Self {
            clock,
            plant,
            ssr,
            vent,
            fault_bits,
            bus_error,
            supervisor,
            events,
            settings,
            progress,
            history,
            kv,
            cmd_tx,
            element_seconds,
            sampler,
            engine,
            step_count: 1,
            _dir: dir,
        }
    }

    pub fn send(&self, cmd: FiringCommand) {
        self.cmd_tx.try_send(cmd).expect("command queue full");
    }

    pub fn progress(&self) -> FiringProgress {
        self.progress.lock().unwrap().clone()
    }

    fn run_periodic(&mut self) {
        self.sampler.sample_once();
        if self.step_count % 2 == 0 {
            self.supervisor.poll();
        }
        if self.step_count % 4 == 0 {
            self.engine.tick();
        }
    }

    /// One 250 ms step: the plant integrates against the SSR line, then
    /// the sampler, supervisor and engine run at their own cadences.
    pub fn step(&mut self) {
        let drive = if self.ssr.is_high() { 1.0 } else { 0.0 };
        self.clock.advance_ms(250);
        self.step_count += 1;
        self.plant.lock().unwrap().step(drive, 0.25);
        self.run_periodic();
    }

    /// Like `step`, but pins the chamber to `temp_c` instead of
    /// integrating the plant (fault-injection scenarios).
    pub fn step_with_temp(&mut self, temp_c: f64) {
        self.clock.advance_ms(250);
        self.step_count += 1;
        self.plant.lock().unwrap().set_temp_c(temp_c);
        self.run_periodic();
    }

    pub fn run_s(&mut self, seconds: u64) {
        for _ in 0..seconds * 4 {
            self.step();
        }
    }

    pub fn temp_c(&self) -> f64 {
        self.plant.lock().unwrap().temp_c()
    }
}

pub fn segment(id: &str, name: &str, ramp: f32, target: f32, hold: u16) -> FiringSegment {
    FiringSegment {
        id: id.to_string(),
        name: name.to_string(),
        ramp_rate_c_per_h: ramp,
        target_temp_c: target,
        hold_minutes: hold,
    }
}

pub fn test_profile(id: &str, segments: Vec<FiringSegment>) -> FiringProfile {
    let mut p = FiringProfile {
        id: id.to_string(),
        name: format!("Test {id}"),
        description: String::new(),
        segments,
        max_temp_c: 0.0,
        estimated_duration_minutes: 0,
    };
    kiln_shared::profile::recompute_cached(&mut p);
    p
}
