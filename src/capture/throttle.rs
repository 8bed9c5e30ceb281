//! Capture Throttle Loop
//!
//! Owns the recurring capture timer and the single in-flight capture cycle.
//! A timer exists if and only if the loop is streaming, and at most one cycle
//! is outstanding at a time: a tick that fires while a cycle is still running
//! is reported as busy and the caller skips it.

use futures_util::future::BoxFuture;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::debug;

/// Whether the loop is producing capture ticks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StreamingState {
    #[default]
    Idle,
    Streaming,
}

/// What woke the capture loop
#[derive(Debug, PartialEq, Eq)]
pub enum LoopEvent<T> {
    /// The throttle timer fired
    Tick,
    /// The outstanding cycle finished with this output
    Completed(T),
}

/// Timer-driven capture loop with an in-flight guard
pub struct CaptureLoop<T> {
    period: Duration,
    timer: Option<Interval>,
    in_flight: Option<BoxFuture<'static, T>>,
}

impl<T> CaptureLoop<T> {
    /// Create an idle loop that will tick every `period` once started
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            timer: None,
            in_flight: None,
        }
    }

    /// Current streaming state, derived from the timer handle
    pub fn state(&self) -> StreamingState {
        if self.timer.is_some() {
            StreamingState::Streaming
        } else {
            StreamingState::Idle
        }
    }

    /// Interval between ticks
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Start ticking. Returns false if the loop was already streaming.
    ///
    /// The first tick fires one full period after this call.
    pub fn start(&mut self) -> bool {
        if self.timer.is_some() {
            return false;
        }
        let mut timer = time::interval_at(Instant::now() + self.period, self.period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timer = Some(timer);
        debug!("Capture loop started ({:?} period)", self.period);
        true
    }

    /// Stop ticking and release the timer. Returns false if already idle.
    ///
    /// An in-flight cycle is left to finish.
    pub fn stop(&mut self) -> bool {
        if self.timer.take().is_none() {
            return false;
        }
        debug!("Capture loop stopped");
        true
    }

    /// Wait for whichever comes first: the next tick or the outstanding
    /// cycle's completion. Never resolves while idle with nothing in flight.
    ///
    /// Cancel-safe: a cycle's progress is kept across calls and a dropped
    /// tick wait loses no tick.
    pub async fn next(&mut self) -> LoopEvent<T> {
        let Self {
            timer, in_flight, ..
        } = self;
        tokio::select! {
            biased;
            output = next_completion(in_flight) => LoopEvent::Completed(output),
            _ = next_tick(timer) => LoopEvent::Tick,
        }
    }

    /// Whether a cycle is currently outstanding
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Hand a cycle to the loop. Returns false, dropping nothing, if one is
    /// already outstanding.
    pub fn begin(&mut self, cycle: BoxFuture<'static, T>) -> bool {
        if self.in_flight.is_some() {
            return false;
        }
        self.in_flight = Some(cycle);
        true
    }

    /// Drop the outstanding cycle, if any
    pub fn cancel_in_flight(&mut self) -> bool {
        self.in_flight.take().is_some()
    }
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer.as_mut() {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

async fn next_completion<T>(in_flight: &mut Option<BoxFuture<'static, T>>) -> T {
    let Some(cycle) = in_flight.as_mut() else {
        return std::future::pending().await;
    };
    let output = cycle.await;
    *in_flight = None;
    output
}
