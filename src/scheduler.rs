//! Scheduler context tracking
//!
//! Tracks whether code is running inside a recurring-timer, one-shot-timer
//! or animation-frame callback. A flag is set only for the dynamic extent of
//! the wrapped callback and is cleared by a drop guard, so it is reset even
//! when the callback panics; the panic itself propagates unchanged.
//!
//! The context is an explicit value threaded into every wrapped callback
//! rather than hidden global state. Clones share the same flags.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// The three wrapped scheduling entry points
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerKind {
    Interval,
    Timeout,
    #[serde(rename = "raf", alias = "animation_frame")]
    AnimationFrame,
}

impl SchedulerKind {
    /// Precedence used when several flags are active at once
    pub const PRECEDENCE: [SchedulerKind; 3] = [
        SchedulerKind::Interval,
        SchedulerKind::AnimationFrame,
        SchedulerKind::Timeout,
    ];

    fn index(self) -> usize {
        match self {
            SchedulerKind::Interval => 0,
            SchedulerKind::Timeout => 1,
            SchedulerKind::AnimationFrame => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SchedulerKind::Interval => "interval",
            SchedulerKind::Timeout => "timeout",
            SchedulerKind::AnimationFrame => "raf",
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time copy of the scheduler flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerSnapshot {
    pub in_interval: bool,
    pub in_timeout: bool,
    pub in_animation_frame: bool,
}

impl SchedulerSnapshot {
    pub fn is_active(&self, kind: SchedulerKind) -> bool {
        match kind {
            SchedulerKind::Interval => self.in_interval,
            SchedulerKind::Timeout => self.in_timeout,
            SchedulerKind::AnimationFrame => self.in_animation_frame,
        }
    }

    pub fn any(&self) -> bool {
        self.in_interval || self.in_timeout || self.in_animation_frame
    }

    /// Flags active in either snapshot
    pub fn union(self, other: SchedulerSnapshot) -> Self {
        Self {
            in_interval: self.in_interval || other.in_interval,
            in_timeout: self.in_timeout || other.in_timeout,
            in_animation_frame: self.in_animation_frame || other.in_animation_frame,
        }
    }

    pub fn with(mut self, kind: SchedulerKind) -> Self {
        match kind {
            SchedulerKind::Interval => self.in_interval = true,
            SchedulerKind::Timeout => self.in_timeout = true,
            SchedulerKind::AnimationFrame => self.in_animation_frame = true,
        }
        self
    }
}

/// Shared scheduler flags
#[derive(Debug, Clone, Default)]
pub struct SchedulerContext {
    flags: Arc<[AtomicBool; 3]>,
}

impl SchedulerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> SchedulerSnapshot {
        SchedulerSnapshot {
            in_interval: self.is_active(SchedulerKind::Interval),
            in_timeout: self.is_active(SchedulerKind::Timeout),
            in_animation_frame: self.is_active(SchedulerKind::AnimationFrame),
        }
    }

    pub fn is_active(&self, kind: SchedulerKind) -> bool {
        self.flags[kind.index()].load(Ordering::SeqCst)
    }

    /// Set the flag for `kind` until the returned guard is dropped
    #[must_use = "the flag is cleared as soon as the guard is dropped"]
    pub fn enter(&self, kind: SchedulerKind) -> CallbackGuard {
        self.flags[kind.index()].store(true, Ordering::SeqCst);
        CallbackGuard {
            context: self.clone(),
            kind,
        }
    }

    /// Run `f` with the flag for `kind` set
    pub fn run<R>(&self, kind: SchedulerKind, f: impl FnOnce() -> R) -> R {
        let _guard = self.enter(kind);
        f()
    }

    /// Wrap a callback so every invocation runs inside `kind`
    pub fn wrap<F>(&self, kind: SchedulerKind, mut callback: F) -> impl FnMut()
    where
        F: FnMut(),
    {
        let context = self.clone();
        move || context.run(kind, &mut callback)
    }
}

/// Clears its scheduler flag on drop, including during unwinding
#[derive(Debug)]
pub struct CallbackGuard {
    context: SchedulerContext,
    kind: SchedulerKind,
}

impl CallbackGuard {
    pub fn kind(&self) -> SchedulerKind {
        self.kind
    }
}

impl Drop for CallbackGuard {
    fn drop(&mut self) {
        self.context.flags[self.kind.index()].store(false, Ordering::SeqCst);
    }
}

/// Handle returned by scheduling calls
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

pub type Callback = Box<dyn FnMut() + Send>;
pub type FrameCallback = Box<dyn FnMut(f64) + Send>;

/// Host scheduling primitives
pub trait Scheduler {
    fn set_interval(&mut self, callback: Callback, delay_ms: u64) -> TimerId;
    fn set_timeout(&mut self, callback: Callback, delay_ms: u64) -> TimerId;
    fn request_animation_frame(&mut self, callback: FrameCallback) -> TimerId;

    /// Marker for idempotent instrumentation
    fn is_instrumented(&self) -> bool {
        false
    }
}

impl<S: Scheduler + ?Sized> Scheduler for Box<S> {
    fn set_interval(&mut self, callback: Callback, delay_ms: u64) -> TimerId {
        (**self).set_interval(callback, delay_ms)
    }

    fn set_timeout(&mut self, callback: Callback, delay_ms: u64) -> TimerId {
        (**self).set_timeout(callback, delay_ms)
    }

    fn request_animation_frame(&mut self, callback: FrameCallback) -> TimerId {
        (**self).request_animation_frame(callback)
    }

    fn is_instrumented(&self) -> bool {
        (**self).is_instrumented()
    }
}

/// Scheduler whose callbacks run inside the matching scheduler context
pub struct InstrumentedScheduler<S> {
    inner: S,
    context: SchedulerContext,
}

impl<S: Scheduler> InstrumentedScheduler<S> {
    pub fn new(inner: S, context: SchedulerContext) -> Self {
        Self { inner, context }
    }

    pub fn context(&self) -> &SchedulerContext {
        &self.context
    }

    pub fn inner_mut(&mut self) -> &mut S {
        &mut self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    fn wrap_callback(&self, kind: SchedulerKind, mut callback: Callback) -> Callback {
        let context = self.context.clone();
        Box::new(move || context.run(kind, &mut callback))
    }
}

impl<S: Scheduler> Scheduler for InstrumentedScheduler<S> {
    fn set_interval(&mut self, callback: Callback, delay_ms: u64) -> TimerId {
        let wrapped = self.wrap_callback(SchedulerKind::Interval, callback);
        self.inner.set_interval(wrapped, delay_ms)
    }

    fn set_timeout(&mut self, callback: Callback, delay_ms: u64) -> TimerId {
        let wrapped = self.wrap_callback(SchedulerKind::Timeout, callback);
        self.inner.set_timeout(wrapped, delay_ms)
    }

    fn request_animation_frame(&mut self, mut callback: FrameCallback) -> TimerId {
        let context = self.context.clone();
        self.inner.request_animation_frame(Box::new(move |ts| {
            context.run(SchedulerKind::AnimationFrame, || callback(ts))
        }))
    }

    fn is_instrumented(&self) -> bool {
        true
    }
}

/// Instrument a scheduler unless it already is
///
/// Safe to call repeatedly on the same scheduler.
pub fn instrument(scheduler: Box<dyn Scheduler>, context: &SchedulerContext) -> Box<dyn Scheduler> {
    if scheduler.is_instrumented() {
        tracing::debug!("scheduler already instrumented");
        return scheduler;
    }
    Box::new(InstrumentedScheduler::new(scheduler, context.clone()))
}

enum TaskKind {
    Once,
    Repeat(u64),
    Frame,
}

struct Task {
    id: TimerId,
    due_ms: u64,
    kind: TaskKind,
    callback: Option<Callback>,
    frame_callback: Option<FrameCallback>,
}

/// Deterministic in-process scheduler driven by explicit time
///
/// Timers fire from [`ManualScheduler::advance_to`]; animation frames fire
/// from [`ManualScheduler::frame`].
#[derive(Default)]
pub struct ManualScheduler {
    now_ms: u64,
    next_id: u64,
    tasks: Vec<Task>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now_ms(&self) -> u64 {
        self.now_ms
    }

    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.id != id);
        self.tasks.len() != before
    }

    fn push(
        &mut self,
        due_ms: u64,
        kind: TaskKind,
        callback: Option<Callback>,
        frame: Option<FrameCallback>,
    ) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        self.tasks.push(Task {
            id,
            due_ms,
            kind,
            callback,
            frame_callback: frame,
        });
        id
    }

    /// Fire every timer due at or before `target_ms`, in due order
    pub fn advance_to(&mut self, target_ms: u64) {
        loop {
            let next = self
                .tasks
                .iter()
                .enumerate()
                .filter(|(_, t)| !matches!(t.kind, TaskKind::Frame) && t.due_ms <= target_ms)
                .min_by_key(|(_, t)| (t.due_ms, t.id))
                .map(|(i, _)| i);
            let Some(index) = next else { break };

            let mut task = self.tasks.remove(index);
            self.now_ms = self.now_ms.max(task.due_ms);
            if let Some(callback) = task.callback.as_mut() {
                callback();
            }
            if let TaskKind::Repeat(period) = task.kind {
                task.due_ms += period.max(1);
                self.tasks.push(task);
            }
        }
        self.now_ms = self.now_ms.max(target_ms);
    }

    /// Run all queued animation-frame callbacks once
    pub fn frame(&mut self, timestamp_ms: f64) {
        let (frames, rest): (Vec<Task>, Vec<Task>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|t| matches!(t.kind, TaskKind::Frame));
        self.tasks = rest;
        for mut task in frames {
            if let Some(callback) = task.frame_callback.as_mut() {
                callback(timestamp_ms);
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn set_interval(&mut self, callback: Callback, delay_ms: u64) -> TimerId {
        let due = self.now_ms + delay_ms.max(1);
        self.push(due, TaskKind::Repeat(delay_ms.max(1)), Some(callback), None)
    }

    fn set_timeout(&mut self, callback: Callback, delay_ms: u64) -> TimerId {
        let due = self.now_ms + delay_ms;
        self.push(due, TaskKind::Once, Some(callback), None)
    }

    fn request_animation_frame(&mut self, callback: FrameCallback) -> TimerId {
        let due = self.now_ms;
        self.push(due, TaskKind::Frame, None, Some(callback))
    }
}
