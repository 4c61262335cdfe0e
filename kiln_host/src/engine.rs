//! Firing engine: the 1 Hz state machine that owns the active profile,
//! the per-segment timers, the PID loop and the auto-tuner.
//!
//! The engine never blocks on the supervisor; it observes the emergency
//! latch and aborts. Pausing freezes segment, hold and total elapsed
//! accounting, so a paused hold does not advance on resume.

use crate::events::{EventBus, EVT_FIRING_COMPLETE};
use crate::safety::SafetySupervisor;
use crate::sensor::ReadingCell;
use crate::storage::history::{FiringOutcome, HistoryStore};
use crate::storage::state;
use kiln_shared::profile;
use kiln_shared::{
    AutotunePhase, Clock, FiringCommand, FiringErrorCode, FiringProfile, FiringProgress,
    FiringStatus, KeyValueStore, KilnEvent, KilnSettings, PidAutotuner, PidController,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc;

/// Bounded command inbox depth.
pub const COMMAND_QUEUE_DEPTH: usize = 4;

/// Kiln-not-rising guard: required rise per check window while heating.
const RISE_CHECK_WINDOW_S: f32 = 15.0 * 60.0;
const RISE_CHECK_MIN_DELTA_C: f32 = 10.0;

/// Runaway guard: grace period, absolute floor, programmed-rate multiple.
const RUNAWAY_GRACE_S: f32 = 300.0;
const RUNAWAY_MIN_RATE_C_PER_H: f32 = 50.0;
const RUNAWAY_MULTIPLE: f32 = 2.0;

/// Hold entry requires both the measurement and the setpoint in band.
const HOLD_TEMP_BAND_C: f32 = 2.0;
const HOLD_SETPOINT_BAND_C: f32 = 0.5;

/// Element-hours persistence cadence; bounds flash wear.
const ELEMENT_FLUSH_PERIOD_S: f32 = 300.0;

/// History trace sampling period.
const TRACE_SAMPLE_PERIOD_S: f32 = 60.0;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("command queue full")]
    QueueFull,
    #[error("auto-tune setpoint exceeds the safety ceiling")]
    SetpointTooHigh,
}

/// Everything the engine needs from the rest of the controller.
pub struct EngineContext {
    pub clock: Arc<dyn Clock>,
    pub reading_cell: Arc<ReadingCell>,
    pub supervisor: Arc<SafetySupervisor>,
    pub events: Arc<EventBus>,
    pub settings: Arc<Mutex<KilnSettings>>,
    pub history: Arc<HistoryStore>,
    pub kv: Arc<dyn KeyValueStore>,
    pub progress: Arc<Mutex<FiringProgress>>,
    /// Live element-on seconds, mirrored for observers.
    pub element_seconds: Arc<AtomicU32>,
}

pub struct FiringEngine {
    ctx: EngineContext,
    cmd_rx: mpsc::Receiver<FiringCommand>,
    pid: PidController,
    autotune: PidAutotuner,

    active_profile: Option<FiringProfile>,
    delay_deadline_epoch_s: Option<i64>,

    segment_start_temp: f32,
    segment_elapsed_us: i64,
    holding: bool,
    hold_elapsed_us: i64,

    rise_window_start_temp: f32,
    rise_window_elapsed_us: i64,

    elapsed_accum_s: f64,
    peak_temp_c: f32,
    trace_accum_s: f32,

    element_total_s: u32,
    element_unflushed_s: f64,
    last_element_flush_us: i64,

    last_tick_us: i64,
}

impl FiringEngine {
    pub fn new(ctx: EngineContext, cmd_rx: mpsc::Receiver<FiringCommand>) -> Self {
        let gains = state::load_gains(ctx.kv.as_ref());
        let element_total_s = state::load_element_seconds(ctx.kv.as_ref());
        ctx.element_seconds.store(element_total_s, Ordering::Relaxed);
        let now = ctx.clock.monotonic_us();
        tracing::info!(
            kp = gains.kp,
            ki = gains.ki,
            kd = gains.kd,
            "firing engine initialized"
        );
        Self {
            pid: PidController::new(gains, 0.0, 1.0),
            autotune: PidAutotuner::new(),
            cmd_rx,
            active_profile: None,
            delay_deadline_epoch_s: None,
            segment_start_temp: 0.0,
            segment_elapsed_us: 0,
            holding: false,
            hold_elapsed_us: 0,
            rise_window_start_temp: 0.0,
            rise_window_elapsed_us: 0,
            elapsed_accum_s: 0.0,
            peak_temp_c: 0.0,
            trace_accum_s: 0.0,
            element_total_s,
            element_unflushed_s: 0.0,
            last_element_flush_us: now,
            last_tick_us: now,
            ctx,
        }
    }

    fn with_progress<R>(&self, f: impl FnOnce(&mut FiringProgress) -> R) -> R {
        f(&mut self.ctx.progress.lock().expect("progress lock poisoned"))
    }

    /// Latest measurement with the calibration offset applied.
    fn current_measured(&self) -> f32 {
        let reading = self.ctx.reading_cell.get_latest();
        let offset = self
            .ctx
            .settings
            .lock()
            .expect("settings lock poisoned")
            .tc_offset_c;
        reading.temperature_c + offset
    }

    /// One 1 Hz control step.
    pub fn tick(&mut self) {
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            self.handle_command(cmd);
        }

        let now_us = self.ctx.clock.monotonic_us();
        let dt_s = ((now_us - self.last_tick_us) as f64 / 1e6) as f32;
        self.last_tick_us = now_us;

        let temp = self.current_measured();

        // Delayed start reached its wall-clock deadline.
        if let Some(deadline) = self.delay_deadline_epoch_s {
            if self.ctx.clock.wallclock_epoch_s() >= deadline {
                self.delay_deadline_epoch_s = None;
                self.begin_firing(temp);
            }
        }

        if self.ctx.supervisor.is_emergency() {
            let (active, status) = self.with_progress(|p| (p.is_active, p.status));
            if active {
                let code = match self.ctx.events.last_error() {
                    FiringErrorCode::None => FiringErrorCode::EmergencyStop,
                    code => code,
                };
                self.ctx.events.set_error(code);
                if status == FiringStatus::Autotune {
                    self.autotune.cancel();
                }
                self.finish_with_error(code);
            }
            self.ctx.supervisor.set_ssr(0.0);
            return;
        }

        let (active, status, seg_idx) = self.with_progress(|p| {
            p.current_temp_c = temp;
            (p.is_active, p.status, p.current_segment as usize)
        });

        if !active
            || matches!(
                status,
                FiringStatus::Paused
                    | FiringStatus::Idle
                    | FiringStatus::Complete
                    | FiringStatus::Error
            )
        {
            // Paused already holds duty 0 and must remain untouched.
            if status != FiringStatus::Paused {
                self.ctx.supervisor.set_ssr(0.0);
            }
            return;
        }

        if status == FiringStatus::Autotune {
            self.tick_autotune(temp, now_us, dt_s);
            return;
        }

        self.tick_segment(temp, status, seg_idx, dt_s);
    }

    fn tick_autotune(&mut self, temp: f32, now_us: i64, dt_s: f32) {
        let step = self.autotune.update(temp, now_us);
        self.ctx.supervisor.set_ssr(step.duty);

        self.elapsed_accum_s += dt_s as f64;
        let elapsed = self.elapsed_accum_s as u32;
        let setpoint = self.autotune.setpoint_c();
        self.with_progress(|p| {
            p.elapsed_s = elapsed;
            p.target_temp_c = setpoint;
        });

        if step.finished {
            if self.autotune.phase() == AutotunePhase::Complete {
                if let Some(gains) = self.autotune.result() {
                    if let Err(e) = state::save_gains(self.ctx.kv.as_ref(), gains) {
                        tracing::warn!("tuned gain save failed: {}", e);
                    }
                    self.pid.set_gains(gains);
                    self.ctx.events.publish(KilnEvent::AutotuneComplete { gains });
                    tracing::info!("auto-tune gains applied");
                }
            } else {
                self.ctx.events.set_error(FiringErrorCode::AutotuneFailed);
                self.ctx.events.publish(KilnEvent::AutotuneFailed);
            }
            self.stop_to_idle();
        }
    }

    fn tick_segment(&mut self, temp: f32, status: FiringStatus, seg_idx: usize, dt_s: f32) {
        let Some(profile_ref) = self.active_profile.as_ref() else {
            tracing::warn!("active firing with no profile, stopping");
            self.stop_to_idle();
            return;
        };
        if seg_idx >= profile_ref.segments.len() {
            tracing::warn!(seg_idx, "segment index out of range, stopping");
            self.stop_to_idle();
            return;
        }
        let seg = profile_ref.segments[seg_idx].clone();
        let est_total_s = profile_ref.estimated_duration_minutes.saturating_mul(60);
        let dt_us = (dt_s as f64 * 1e6) as i64;

        if !self.holding {
            self.segment_elapsed_us += dt_us;

            // Both guards apply only while actively heating.
            if status == FiringStatus::Heating && seg.ramp_rate_c_per_h > 0.0 {
                self.rise_window_elapsed_us += dt_us;
                if self.rise_window_elapsed_us as f32 / 1e6 >= RISE_CHECK_WINDOW_S {
                    let rise = temp - self.rise_window_start_temp;
                    if rise < RISE_CHECK_MIN_DELTA_C {
                        tracing::error!(rise, "kiln not rising over check window");
                        self.ctx
                            .supervisor
                            .emergency_stop(FiringErrorCode::NotRising);
                        return;
                    }
                    self.rise_window_elapsed_us = 0;
                    self.rise_window_start_temp = temp;
                }

                let seg_elapsed_s = self.segment_elapsed_us as f32 / 1e6;
                if seg_elapsed_s > RUNAWAY_GRACE_S && seg.ramp_rate_c_per_h.abs() > 0.1 {
                    let observed_c_per_h =
                        (temp - self.segment_start_temp) / (seg_elapsed_s / 3600.0);
                    if observed_c_per_h > RUNAWAY_MULTIPLE * seg.ramp_rate_c_per_h
                        && observed_c_per_h > RUNAWAY_MIN_RATE_C_PER_H
                    {
                        tracing::error!(
                            observed_c_per_h,
                            programmed = seg.ramp_rate_c_per_h,
                            "runaway heating"
                        );
                        self.ctx.supervisor.emergency_stop(FiringErrorCode::Runaway);
                        return;
                    }
                }
            }
        }

        // Dynamic setpoint rides the ramp and never overshoots the target.
        let setpoint = if self.holding {
            seg.target_temp_c
        } else {
            let ramp_per_s = seg.ramp_rate_c_per_h / 3600.0;
            let sp = self.segment_start_temp + ramp_per_s * (self.segment_elapsed_us as f32 / 1e6);
            if seg.ramp_rate_c_per_h >= 0.0 {
                sp.min(seg.target_temp_c)
            } else {
                sp.max(seg.target_temp_c)
            }
        };

        let duty = self.pid.compute(setpoint, temp, dt_s);
        self.ctx.supervisor.set_ssr(duty);

        if duty > 0.0 {
            self.element_unflushed_s += dt_s as f64;
        }
        if (self.last_tick_us - self.last_element_flush_us) as f32 / 1e6 >= ELEMENT_FLUSH_PERIOD_S {
            self.flush_element_seconds();
        }
        self.publish_element_total();

        self.trace_accum_s += dt_s;
        if self.trace_accum_s >= TRACE_SAMPLE_PERIOD_S {
            self.trace_accum_s -= TRACE_SAMPLE_PERIOD_S;
            self.ctx.history.record_temp(temp);
        }

        if temp > self.peak_temp_c {
            self.peak_temp_c = temp;
        }

        if !self.holding
            && (temp - seg.target_temp_c).abs() < HOLD_TEMP_BAND_C
            && (setpoint - seg.target_temp_c).abs() < HOLD_SETPOINT_BAND_C
        {
            self.holding = true;
            self.hold_elapsed_us = 0;
            self.with_progress(|p| p.status = FiringStatus::Holding);
            tracing::info!(
                segment = seg_idx,
                target = seg.target_temp_c,
                hold_min = seg.hold_minutes,
                "segment at target, holding"
            );
        }

        if self.holding {
            self.hold_elapsed_us += dt_us;
            let hold_needed_us = seg.hold_minutes as i64 * 60 * 1_000_000;
            // hold_minutes 0 holds until SkipSegment or Stop.
            if seg.hold_minutes > 0 && self.hold_elapsed_us >= hold_needed_us {
                self.advance(temp);
                return;
            }
        }

        self.elapsed_accum_s += dt_s as f64;
        let elapsed = self.elapsed_accum_s as u32;
        self.with_progress(|p| {
            p.elapsed_s = elapsed;
            p.target_temp_c = setpoint;
            p.estimated_remaining_s = est_total_s.saturating_sub(elapsed);
        });
    }

    fn start_segment(&mut self, seg_idx: usize, temp: f32) {
        self.segment_elapsed_us = 0;
        self.segment_start_temp = temp;
        self.holding = false;
        self.hold_elapsed_us = 0;
        self.rise_window_elapsed_us = 0;
        self.rise_window_start_temp = temp;

        if let Some(profile) = self.active_profile.as_ref() {
            let seg = &profile.segments[seg_idx];
            tracing::info!(
                segment = seg_idx,
                name = %seg.name,
                ramp = seg.ramp_rate_c_per_h,
                target = seg.target_temp_c,
                hold_min = seg.hold_minutes,
                "starting segment"
            );
        }
    }

    fn advance(&mut self, temp: f32) {
        let Some(profile) = self.active_profile.as_ref() else {
            return;
        };
        let total = profile.segments.len();
        let next = self.with_progress(|p| p.current_segment as usize) + 1;
        if next >= total {
            self.finalize_complete();
            return;
        }

        let next_ramp = profile.segments[next].ramp_rate_c_per_h;
        self.start_segment(next, temp);
        self.with_progress(|p| {
            p.current_segment = next as u8;
            p.status = if next_ramp >= 0.0 {
                FiringStatus::Heating
            } else {
                FiringStatus::Cooling
            };
        });
        self.ctx.events.publish(KilnEvent::SegmentAdvanced {
            segment: next as u8,
            total: total as u8,
        });
    }

    fn finalize_complete(&mut self) {
        self.ctx.supervisor.set_ssr(0.0);
        self.flush_element_seconds();

        let elapsed = self.elapsed_accum_s as u32;
        let peak = self.peak_temp_c;
        self.ctx
            .history
            .firing_end(FiringOutcome::Complete, peak, elapsed, 0);

        let profile_name = self
            .active_profile
            .as_ref()
            .map(|p| p.name.clone())
            .unwrap_or_default();
        self.with_progress(|p| {
            p.is_active = false;
            p.status = FiringStatus::Complete;
        });
        self.ctx.events.set_bits(EVT_FIRING_COMPLETE);
        self.ctx.events.publish(KilnEvent::FiringComplete {
            profile_name,
            peak_temp_c: peak,
            duration_s: elapsed,
        });
        self.ctx.supervisor.set_firing_active(false);
        self.pid.reset();
        self.active_profile = None;
        tracing::info!(peak, duration_s = elapsed, "firing complete");
    }

    fn finish_with_error(&mut self, code: FiringErrorCode) {
        self.ctx.history.firing_end(
            FiringOutcome::Error,
            self.peak_temp_c,
            self.elapsed_accum_s as u32,
            code.code(),
        );
        self.flush_element_seconds();
        self.with_progress(|p| {
            p.is_active = false;
            p.status = FiringStatus::Error;
        });
        self.ctx.supervisor.set_firing_active(false);
        self.ctx.events.publish(KilnEvent::FiringError { code });
        self.active_profile = None;
        self.delay_deadline_epoch_s = None;
        self.pid.reset();
        tracing::error!(?code, "firing ended in error");
    }

    fn stop_to_idle(&mut self) {
        self.ctx.supervisor.set_ssr(0.0);
        self.flush_element_seconds();
        self.pid.reset();
        self.active_profile = None;
        self.delay_deadline_epoch_s = None;
        self.with_progress(|p| {
            p.is_active = false;
            p.status = FiringStatus::Idle;
        });
        self.ctx.supervisor.set_firing_active(false);
        tracing::info!("firing stopped");
    }

    fn flush_element_seconds(&mut self) {
        let whole = self.element_unflushed_s.floor();
        if whole >= 1.0 {
            self.element_total_s = self.element_total_s.saturating_add(whole as u32);
            self.element_unflushed_s -= whole;
            if let Err(e) = state::save_element_seconds(self.ctx.kv.as_ref(), self.element_total_s)
            {
                tracing::warn!("element-hours flush failed: {}", e);
            }
        }
        self.last_element_flush_us = self.last_tick_us;
        self.publish_element_total();
    }

    fn publish_element_total(&self) {
        let live = self.element_total_s.saturating_add(self.element_unflushed_s as u32);
        self.ctx.element_seconds.store(live, Ordering::Relaxed);
    }

    // ── Commands ────────────────────────────────────────────────

    fn handle_command(&mut self, cmd: FiringCommand) {
        match cmd {
            FiringCommand::Start {
                profile,
                delay_minutes,
            } => self.cmd_start(profile, delay_minutes),
            FiringCommand::Stop => self.cmd_stop(),
            FiringCommand::Pause => self.cmd_pause(),
            FiringCommand::Resume => self.cmd_resume(),
            FiringCommand::SkipSegment => self.cmd_skip_segment(),
            FiringCommand::AutotuneStart {
                setpoint_c,
                hysteresis_c,
            } => self.cmd_autotune_start(setpoint_c, hysteresis_c),
            FiringCommand::AutotuneStop => self.cmd_autotune_stop(),
        }
    }

    fn cmd_start(&mut self, new_profile: FiringProfile, delay_minutes: u32) {
        if self.ctx.supervisor.is_emergency() {
            tracing::warn!("start refused: emergency latch is set");
            return;
        }
        if self.with_progress(|p| p.is_active) {
            tracing::warn!("start ignored: firing already active");
            return;
        }
        if let Err(e) = profile::validate(&new_profile) {
            tracing::warn!("start refused: {}", e);
            return;
        }

        self.ctx.events.set_error(FiringErrorCode::None);
        self.active_profile = Some(new_profile);

        if delay_minutes > 0 {
            let deadline = self.ctx.clock.wallclock_epoch_s() + delay_minutes as i64 * 60;
            self.delay_deadline_epoch_s = Some(deadline);
            let (id, total) = self
                .active_profile
                .as_ref()
                .map(|p| (p.id.clone(), p.segments.len() as u8))
                .unwrap_or_default();
            // Exposed as Idle with the active flag until the delay lapses.
            self.with_progress(|p| {
                p.is_active = true;
                p.status = FiringStatus::Idle;
                p.profile_id = id;
                p.current_segment = 0;
                p.total_segments = total;
                p.elapsed_s = 0;
            });
            tracing::info!(delay_minutes, "firing scheduled");
        } else {
            let temp = self.current_measured();
            self.begin_firing(temp);
        }
    }

    fn begin_firing(&mut self, temp: f32) {
        let Some((id, name, total, seg0_ramp)) = self.active_profile.as_ref().map(|p| {
            (
                p.id.clone(),
                p.name.clone(),
                p.segments.len() as u8,
                p.segments[0].ramp_rate_c_per_h,
            )
        }) else {
            return;
        };

        self.elapsed_accum_s = 0.0;
        self.peak_temp_c = temp;
        self.trace_accum_s = 0.0;
        self.element_unflushed_s = 0.0;
        self.last_element_flush_us = self.last_tick_us;

        self.start_segment(0, temp);
        self.pid.reset();

        self.with_progress(|p| {
            p.is_active = true;
            p.status = if seg0_ramp >= 0.0 {
                FiringStatus::Heating
            } else {
                FiringStatus::Cooling
            };
            p.profile_id = id.clone();
            p.current_segment = 0;
            p.total_segments = total;
            p.elapsed_s = 0;
            p.current_temp_c = temp;
        });

        self.ctx
            .history
            .firing_start(&id, &name, self.ctx.clock.wallclock_epoch_s());
        self.ctx.history.record_temp(temp);

        self.ctx.events.clear_bits(EVT_FIRING_COMPLETE);
        self.ctx.events.publish(KilnEvent::FiringStarted {
            profile_id: id,
            profile_name: name.clone(),
        });
        self.ctx.supervisor.set_firing_active(true);
        tracing::info!(profile = %name, "firing started");
    }

    fn cmd_stop(&mut self) {
        let (active, status) = self.with_progress(|p| (p.is_active, p.status));
        if !active {
            return;
        }
        if status == FiringStatus::Autotune {
            self.autotune.cancel();
        } else {
            self.ctx.history.firing_end(
                FiringOutcome::Aborted,
                self.peak_temp_c,
                self.elapsed_accum_s as u32,
                FiringErrorCode::None.code(),
            );
        }
        self.stop_to_idle();
    }

    fn cmd_pause(&mut self) {
        let paused = self.with_progress(|p| {
            if p.is_active
                && matches!(
                    p.status,
                    FiringStatus::Heating | FiringStatus::Cooling | FiringStatus::Holding
                )
            {
                p.status = FiringStatus::Paused;
                true
            } else {
                false
            }
        });
        if paused {
            self.ctx.supervisor.set_ssr(0.0);
            tracing::info!("firing paused");
        }
    }

    fn cmd_resume(&mut self) {
        let holding = self.holding;
        let ramp = self
            .active_profile
            .as_ref()
            .zip(self.with_progress(|p| Some(p.current_segment as usize)))
            .and_then(|(profile, idx)| profile.segments.get(idx))
            .map(|seg| seg.ramp_rate_c_per_h)
            .unwrap_or(0.0);
        let resumed = self.with_progress(|p| {
            if p.status == FiringStatus::Paused {
                p.status = if holding {
                    FiringStatus::Holding
                } else if ramp >= 0.0 {
                    FiringStatus::Heating
                } else {
                    FiringStatus::Cooling
                };
                true
            } else {
                false
            }
        });
        if resumed {
            tracing::info!("firing resumed");
        }
    }

    fn cmd_skip_segment(&mut self) {
        let (active, status) = self.with_progress(|p| (p.is_active, p.status));
        if !active
            || !matches!(
                status,
                FiringStatus::Heating | FiringStatus::Cooling | FiringStatus::Holding
            )
        {
            tracing::warn!("skip-segment ignored in current state");
            return;
        }
        let temp = self.current_measured();
        tracing::info!("segment skipped");
        self.advance(temp);
    }

    fn cmd_autotune_start(&mut self, setpoint_c: f32, hysteresis_c: f32) {
        if self.ctx.supervisor.is_emergency() {
            tracing::warn!("auto-tune refused: emergency latch is set");
            return;
        }
        if self.with_progress(|p| p.is_active) {
            tracing::warn!("auto-tune refused: firing active");
            return;
        }
        let max_safe = self
            .ctx
            .settings
            .lock()
            .expect("settings lock poisoned")
            .max_safe_temp_c;
        if setpoint_c > max_safe {
            tracing::warn!(setpoint_c, max_safe, "auto-tune refused: setpoint above ceiling");
            return;
        }

        match self
            .autotune
            .start(setpoint_c, hysteresis_c, self.ctx.clock.monotonic_us())
        {
            Ok(()) => {
                self.ctx.events.set_error(FiringErrorCode::None);
                self.elapsed_accum_s = 0.0;
                self.with_progress(|p| {
                    p.is_active = true;
                    p.status = FiringStatus::Autotune;
                    p.profile_id = String::new();
                    p.target_temp_c = setpoint_c;
                    p.elapsed_s = 0;
                });
                self.ctx.supervisor.set_firing_active(true);
            }
            Err(e) => tracing::warn!("auto-tune refused: {}", e),
        }
    }

    fn cmd_autotune_stop(&mut self) {
        if self.with_progress(|p| p.status) == FiringStatus::Autotune {
            self.autotune.cancel();
            self.stop_to_idle();
        }
    }
}
