// ── Refresh coalescing ──
//
// Collapses bursts of refresh triggers into single executions. Each target
// gets its own actor task running an explicit `Idle | Pending | InFlight`
// state machine; the machine itself is pure and driven by the actor. An
// actor that stays idle past `IDLE_GRACE` (and past its throttle window)
// unregisters itself, so per-item targets do not pile up over a session.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::store::RefreshTarget;

/// How long an idle actor waits for another trigger before retiring.
const IDLE_GRACE: Duration = Duration::from_secs(30);

type Registry = DashMap<RefreshTarget, mpsc::UnboundedSender<Policy>>;

/// How triggers for one target are coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Fire `d` after the last trigger; every trigger pushes the deadline back.
    Debounce(Duration),
    /// Fire at most once per `d`; triggers inside a window fire at its end.
    Throttle(Duration),
}

impl Policy {
    /// Fire on the next turn of the actor loop.
    pub const IMMEDIATE: Self = Self::Debounce(Duration::ZERO);
}

/// One execution handed to a [`JobRunner`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshJob {
    pub target: RefreshTarget,
    /// Time of the last trigger folded into this job.
    pub triggered_at: Instant,
    pub policy: Policy,
    /// Session generation the job was scheduled under.
    pub generation: u64,
}

/// Executes refresh jobs. Implementations report failures themselves;
/// the coalescer only cares that the job finished.
#[async_trait]
pub trait JobRunner: Send + Sync + 'static {
    async fn run(&self, job: RefreshJob);
}

// ── State machine ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Pending { deadline: Instant },
    InFlight { follow_up: bool },
}

/// Whether the actor should launch a job now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use]
enum Step {
    Fire,
    Wait,
}

#[derive(Debug)]
struct Machine {
    phase: Phase,
    policy: Policy,
    last_trigger: Instant,
    last_fired: Option<Instant>,
    idle_since: Instant,
}

impl Machine {
    fn new(now: Instant) -> Self {
        Self {
            phase: Phase::Idle,
            policy: Policy::IMMEDIATE,
            last_trigger: now,
            last_fired: None,
            idle_since: now,
        }
    }

    /// When an idle actor may retire. A fresh actor has no throttle history,
    /// so the current window must have closed first.
    fn retire_at(&self) -> Option<Instant> {
        if self.phase != Phase::Idle {
            return None;
        }
        let window = match self.policy {
            Policy::Debounce(d) | Policy::Throttle(d) => d,
        };
        let quiet = self.idle_since + IDLE_GRACE;
        Some(self.last_fired.map_or(quiet, |fired| quiet.max(fired + window)))
    }

    fn deadline(&self) -> Option<Instant> {
        match self.phase {
            Phase::Pending { deadline } => Some(deadline),
            Phase::Idle | Phase::InFlight { .. } => None,
        }
    }

    fn on_trigger(&mut self, now: Instant, policy: Policy) -> Step {
        self.policy = policy;
        self.last_trigger = now;

        match (self.phase, policy) {
            (Phase::InFlight { .. }, _) => {
                self.phase = Phase::InFlight { follow_up: true };
                Step::Wait
            }
            (Phase::Idle | Phase::Pending { .. }, Policy::Debounce(d)) => {
                self.phase = Phase::Pending { deadline: now + d };
                Step::Wait
            }
            // Throttle absorbs triggers while a window boundary is pending.
            (Phase::Pending { .. }, Policy::Throttle(_)) => Step::Wait,
            (Phase::Idle, Policy::Throttle(d)) => match self.window_end(d) {
                Some(end) if end > now => {
                    self.phase = Phase::Pending { deadline: end };
                    Step::Wait
                }
                _ => self.fire(now),
            },
        }
    }

    fn on_deadline(&mut self, now: Instant) -> Step {
        match self.phase {
            Phase::Pending { deadline } if deadline <= now => self.fire(now),
            _ => Step::Wait,
        }
    }

    /// The running job completed. A queued follow-up re-enters the policy:
    /// debounce measures from the last trigger, throttle from the last fire.
    fn on_finished(&mut self, now: Instant) -> Step {
        let Phase::InFlight { follow_up } = self.phase else {
            return Step::Wait;
        };
        if !follow_up {
            self.phase = Phase::Idle;
            self.idle_since = now;
            return Step::Wait;
        }

        let deadline = match self.policy {
            Policy::Debounce(d) => self.last_trigger + d,
            Policy::Throttle(d) => self.window_end(d).unwrap_or(now),
        };
        if deadline <= now {
            self.fire(now)
        } else {
            self.phase = Phase::Pending { deadline };
            Step::Wait
        }
    }

    fn window_end(&self, d: Duration) -> Option<Instant> {
        self.last_fired.map(|fired| fired + d)
    }

    fn fire(&mut self, now: Instant) -> Step {
        self.phase = Phase::InFlight { follow_up: false };
        self.last_fired = Some(now);
        Step::Fire
    }
}

// ── Coalescer ────────────────────────────────────────────────────────

/// Per-session registry of target actors.
///
/// Actors are spawned lazily on the first trigger for a target and live
/// until they have been idle for a while or the session's cancellation
/// token fires. Cancelling stops pending
/// timers; jobs already running are left to finish and are expected to
/// discard their own results via the generation check.
pub struct Coalescer {
    generation: u64,
    runner: Arc<dyn JobRunner>,
    actors: Arc<Registry>,
    cancel: CancellationToken,
}

impl Coalescer {
    pub fn new(generation: u64, runner: Arc<dyn JobRunner>, cancel: CancellationToken) -> Self {
        Self {
            generation,
            runner,
            actors: Arc::new(DashMap::new()),
            cancel,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Request a refresh of `target`, coalesced according to `policy`.
    ///
    /// Never blocks. Ignored once the coalescer has been cancelled.
    pub fn schedule(&self, target: RefreshTarget, policy: Policy) {
        if self.cancel.is_cancelled() {
            trace!(%target, "coalescer cancelled, dropping trigger");
            return;
        }

        // Sent under the entry lock: a retiring actor checks its queue under
        // the same lock, so a trigger is never left on an unregistered channel.
        let tx = self
            .actors
            .entry(target)
            .or_insert_with(|| self.spawn_actor(target));

        if tx.send(policy).is_err() {
            trace!(%target, "target actor gone, dropping trigger");
        }
    }

    /// Number of targets that have an actor.
    pub fn active_targets(&self) -> usize {
        self.actors.len()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    fn spawn_actor(&self, target: RefreshTarget) -> mpsc::UnboundedSender<Policy> {
        let (tx, rx) = mpsc::unbounded_channel();
        debug!(%target, generation = self.generation, "spawning refresh actor");
        tokio::spawn(run_actor(
            Actor {
                target,
                generation: self.generation,
                runner: Arc::clone(&self.runner),
                registry: Arc::clone(&self.actors),
                own: tx.clone(),
            },
            rx,
            self.cancel.clone(),
        ));
        tx
    }
}

impl Drop for Coalescer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Actor {
    target: RefreshTarget,
    generation: u64,
    runner: Arc<dyn JobRunner>,
    registry: Arc<Registry>,
    /// Identifies this actor's registry entry.
    own: mpsc::UnboundedSender<Policy>,
}

impl Actor {
    /// Unregister if nothing is queued. Runs under the entry's lock, which
    /// `Coalescer::schedule` also holds while sending.
    fn retire(&self, triggers: &mpsc::UnboundedReceiver<Policy>) -> bool {
        self.registry
            .remove_if(&self.target, |_, tx| {
                tx.same_channel(&self.own) && triggers.is_empty()
            })
            .is_some()
    }
}

async fn run_actor(
    actor: Actor,
    mut triggers: mpsc::UnboundedReceiver<Policy>,
    cancel: CancellationToken,
) {
    let target = actor.target;
    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<()>();
    let mut machine = Machine::new(Instant::now());

    loop {
        let deadline = machine.deadline();
        let retire_at = machine.retire_at();
        let step = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            Some(()) = done_rx.recv() => Some(machine.on_finished(Instant::now())),
            policy = triggers.recv() => match policy {
                Some(policy) => Some(machine.on_trigger(Instant::now(), policy)),
                None => break,
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                Some(machine.on_deadline(Instant::now()))
            }
            () = tokio::time::sleep_until(retire_at.unwrap_or_else(Instant::now)), if retire_at.is_some() => None,
        };

        let Some(step) = step else {
            if actor.retire(&triggers) {
                break;
            }
            // A trigger raced in; the next turn picks it up.
            machine.idle_since = Instant::now();
            continue;
        };

        if step == Step::Fire {
            let job = RefreshJob {
                target,
                triggered_at: machine.last_trigger,
                policy: machine.policy,
                generation: actor.generation,
            };
            trace!(%target, ?job.policy, "firing refresh job");
            let runner = Arc::clone(&actor.runner);
            let done = done_tx.clone();
            tokio::spawn(async move {
                runner.run(job).await;
                let _ = done.send(());
            });
        }
    }

    trace!(%target, "refresh actor exiting");
}
