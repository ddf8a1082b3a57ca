//! The effect controller: turns events into timed frames on the driver.
//!
//! The controller is a plain state machine driven by two calls, [`on_event`]
//! and [`tick`], both taking the current time. It never sleeps or spawns;
//! [`run_controller`] is the task that owns it and supplies the clock.
//!
//! [`on_event`]: EffectController::on_event
//! [`tick`]: EffectController::tick

use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

use crate::driver::LedDriver;
use crate::effect::{Completion, Effect, EffectId, EffectTable, Pattern};
use crate::event::EventKind;
use crate::frame::Frame;

/// Longest the run loop waits without an event or a step deadline.
pub const IDLE_POLL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// No effect is bound to the event.
    Ignored,
    /// The effect is already running or already queued.
    Duplicate,
    Started(EffectId),
    /// Waiting for the current effect to finish.
    Queued(EffectId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Running {
        effect: EffectId,
        step: usize,
        /// All steps done, last frame held until the next effect.
        holding: bool,
    },
}

struct ActiveEffect {
    effect: Effect,
    started: Instant,
    step: usize,
    deadline: Instant,
    holding: bool,
}

impl ActiveEffect {
    fn preemptible(&self) -> bool {
        self.holding || self.effect.completion == Completion::Replaceable
    }
}

pub struct EffectController {
    driver: LedDriver,
    table: EffectTable,
    active: Option<ActiveEffect>,
    pending: Option<Effect>,
    dirty: bool,
}

impl EffectController {
    /// Takes ownership of the driver and blanks the strip.
    pub fn new(mut driver: LedDriver, table: EffectTable) -> Self {
        driver.clear();
        let mut controller = Self {
            driver,
            table,
            active: None,
            pending: None,
            dirty: true,
        };
        controller.flush();
        controller
    }

    pub fn state(&self) -> ControllerState {
        match &self.active {
            None => ControllerState::Idle,
            Some(active) => ControllerState::Running {
                effect: active.effect.id,
                step: active.step,
                holding: active.holding,
            },
        }
    }

    pub fn pending(&self) -> Option<EffectId> {
        self.pending.as_ref().map(|e| e.id)
    }

    pub fn frame(&self) -> &Frame {
        self.driver.frame()
    }

    pub fn driver(&self) -> &LedDriver {
        &self.driver
    }

    /// When the running effect's current step ends. `None` when idle or
    /// holding, since nothing will change until the next event.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.active
            .as_ref()
            .filter(|a| !a.holding)
            .map(|a| a.deadline)
    }

    pub fn active_since(&self) -> Option<Instant> {
        self.active.as_ref().map(|a| a.started)
    }

    pub fn on_event(&mut self, kind: EventKind, now: Instant) -> EventOutcome {
        self.advance(now);
        self.flush();

        let Some(effect) = self.table.lookup(kind) else {
            debug!("no effect bound to {}", kind.as_type());
            return EventOutcome::Ignored;
        };
        let id = effect.id;
        let active_id = self.active.as_ref().map(|a| a.effect.id);
        if active_id == Some(id) || self.pending() == Some(id) {
            debug!("{} ignored, {id:?} already running", kind.as_type());
            return EventOutcome::Duplicate;
        }

        let effect = effect.clone();
        let in_progress = self.active.as_ref().is_some_and(|a| !a.preemptible());
        let outcome = if in_progress {
            debug!("queueing {id:?} behind {active_id:?}");
            if let Some(dropped) = self.pending.replace(effect) {
                debug!("dropping queued {:?}", dropped.id);
            }
            EventOutcome::Queued(id)
        } else {
            if let Some(current) = active_id {
                debug!("{id:?} preempts {current:?}");
            }
            self.start(effect, now);
            self.advance(now);
            EventOutcome::Started(id)
        };
        self.flush();
        outcome
    }

    /// Advance the running effect to `now`, render if the frame changed, and
    /// return the next step deadline.
    pub fn tick(&mut self, now: Instant) -> Option<Instant> {
        self.advance(now);
        self.flush();
        self.next_deadline()
    }

    /// Blank the strip and release the hardware.
    pub fn shutdown(&mut self) {
        self.active = None;
        self.pending = None;
        self.driver.shutdown();
        self.dirty = false;
    }

    fn start(&mut self, effect: Effect, at: Instant) {
        debug!("starting {:?}", effect.id);
        if let Some(first) = effect.steps.first() {
            self.show(&first.pattern);
        }
        let deadline = at + effect.steps.first().map_or(Duration::ZERO, |s| s.duration);
        self.active = Some(ActiveEffect {
            effect,
            started: at,
            step: 0,
            deadline,
            holding: false,
        });
    }

    /// Step through everything that has come due. Step deadlines accumulate
    /// from the previous deadline rather than from `now`, so a late tick does
    /// not stretch the effect.
    fn advance(&mut self, now: Instant) {
        while let Some(active) = &mut self.active {
            if active.holding || now < active.deadline {
                return;
            }
            let next = active.step + 1;
            if let Some(step) = active.effect.steps.get(next) {
                active.step = next;
                active.deadline += step.duration;
                let pattern = step.pattern.clone();
                self.show(&pattern);
            } else {
                let finished_at = active.deadline;
                self.complete(finished_at);
            }
        }
    }

    fn complete(&mut self, at: Instant) {
        let Some(mut active) = self.active.take() else {
            return;
        };
        if let Some(next) = self.pending.take() {
            self.start(next, at);
            return;
        }
        match active.effect.completion {
            Completion::Hold => {
                debug!("{:?} holding", active.effect.id);
                active.holding = true;
                self.active = Some(active);
            }
            Completion::RevertToIdle | Completion::Replaceable => {
                debug!("{:?} done, idle", active.effect.id);
                self.driver.clear();
                self.dirty = true;
            }
        }
    }

    fn show(&mut self, pattern: &Pattern) {
        match pattern {
            Pattern::Solid(color) => self.driver.set_all(*color),
            Pattern::Pixels(colors) => {
                self.driver.clear();
                let len = self.driver.len();
                for (index, color) in colors.iter().take(len).enumerate() {
                    if let Err(e) = self.driver.set_pixel(index, *color) {
                        warn!("{e}");
                    }
                }
            }
        }
        self.dirty = true;
    }

    /// Render if the frame changed since the last successful render. A
    /// failure leaves the frame dirty so the next tick tries again.
    fn flush(&mut self) {
        if !self.dirty {
            return;
        }
        match self.driver.render() {
            Ok(()) => self.dirty = false,
            Err(e) => warn!("render failed, retrying on next tick: {e}"),
        }
    }
}

/// Own the controller until `token` is cancelled, feeding it events from
/// `events` and waking for step deadlines. Blanks the LEDs on the way out.
pub async fn run_controller(
    mut controller: EffectController,
    mut events: mpsc::Receiver<EventKind>,
    token: CancellationToken,
) {
    info!("effect controller running");
    let mut events_open = true;
    loop {
        let now = Instant::now();
        let idle_wake = now + IDLE_POLL;
        let wake = controller
            .next_deadline()
            .map_or(idle_wake, |deadline| deadline.min(idle_wake));

        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            event = events.recv(), if events_open => match event {
                Some(kind) => {
                    let outcome = controller.on_event(kind, Instant::now());
                    debug!("{} -> {outcome:?}", kind.as_type());
                }
                None => {
                    debug!("event channel closed");
                    events_open = false;
                }
            },
            _ = sleep_until(wake) => {
                controller.tick(Instant::now());
            }
        }
    }
    info!("effect controller shutting down");
    controller.shutdown();
}
