//! Broadcast of rebuilt navigation tiles
//!
//! The navigation layer reports tile ids as it rebuilds them. Listeners pick
//! a cadence: every report, a buffered batch on a fixed interval, or
//! everything dirtied since the last "generation finished" event.

use std::collections::BTreeSet;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use log::{debug, warn};

use crate::config::TileChannelConfig;
use crate::navigation::TileId;

/// Set of tile ids, ordered so batches are processed deterministically
pub type TileSet = BTreeSet<TileId>;

/// Callback receiving a batch of tile ids
pub type TileListener = Arc<dyn Fn(&TileSet) + Send + Sync>;

/// When a listener is called
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cadence {
    /// On every report, with exactly the reported ids
    Immediate,
    /// On each interval flush, with the ids buffered since the previous one
    Interval,
    /// On each finished event, with the ids buffered since the previous one
    GenerationFinished,
}

#[derive(Default)]
struct ChannelState {
    interval_buffer: TileSet,
    finished_buffer: TileSet,
    immediate: Vec<TileListener>,
    interval: Vec<TileListener>,
    finished: Vec<TileListener>,
}

/// Tile update publisher with three delivery cadences
///
/// Listeners are called outside the channel lock, so a listener may report
/// tiles or subscribe again without deadlocking.
///
/// # Example
///
/// ```
/// use cover_points::{Cadence, TileUpdateChannel};
/// use std::sync::{Arc, Mutex};
///
/// let channel = TileUpdateChannel::new();
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let sink = seen.clone();
/// channel.subscribe(Cadence::Interval, move |tiles| sink.lock().unwrap().extend(tiles.iter().copied()));
///
/// channel.notify_tiles_updated([3, 1]);
/// channel.notify_tiles_updated([3]);
/// assert!(channel.flush_interval());
/// assert_eq!(*seen.lock().unwrap(), vec![1, 3]);
/// ```
#[derive(Default)]
pub struct TileUpdateChannel {
    state: Mutex<ChannelState>,
}

impl TileUpdateChannel {
    /// Create a channel without listeners
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for one cadence
    pub fn subscribe<F>(&self, cadence: Cadence, listener: F)
    where
        F: Fn(&TileSet) + Send + Sync + 'static,
    {
        let listener: TileListener = Arc::new(listener);
        let mut state = self.lock();
        match cadence {
            Cadence::Immediate => state.immediate.push(listener),
            Cadence::Interval => state.interval.push(listener),
            Cadence::GenerationFinished => state.finished.push(listener),
        }
    }

    /// Number of listeners registered for a cadence
    pub fn listener_count(&self, cadence: Cadence) -> usize {
        let state = self.lock();
        match cadence {
            Cadence::Immediate => state.immediate.len(),
            Cadence::Interval => state.interval.len(),
            Cadence::GenerationFinished => state.finished.len(),
        }
    }

    /// Report rebuilt tiles
    ///
    /// The ids are buffered for both the interval and the finished cadence,
    /// and passed right away to immediate listeners.
    pub fn notify_tiles_updated<I>(&self, tiles: I)
    where
        I: IntoIterator<Item = TileId>,
    {
        let tiles: TileSet = tiles.into_iter().collect();
        if tiles.is_empty() {
            return;
        }
        let listeners = {
            let mut state = self.lock();
            state.interval_buffer.extend(tiles.iter().copied());
            state.finished_buffer.extend(tiles.iter().copied());
            state.immediate.clone()
        };
        broadcast(&listeners, &tiles);
    }

    /// Deliver and clear the interval buffer
    ///
    /// Returns `false` without calling anyone when nothing was buffered.
    pub fn flush_interval(&self) -> bool {
        let (listeners, tiles) = {
            let mut state = self.lock();
            if state.interval_buffer.is_empty() {
                return false;
            }
            (state.interval.clone(), std::mem::take(&mut state.interval_buffer))
        };
        debug!("flushing {} updated tiles", tiles.len());
        broadcast(&listeners, &tiles);
        true
    }

    /// Deliver and clear the finished buffer
    ///
    /// Listeners are called even when no tile changed since the last event.
    pub fn generation_finished(&self) {
        let (listeners, tiles) = {
            let mut state = self.lock();
            (state.finished.clone(), std::mem::take(&mut state.finished_buffer))
        };
        debug!("navigation generation finished, {} tiles changed", tiles.len());
        broadcast(&listeners, &tiles);
    }

    /// Ids waiting for the next interval flush
    pub fn pending_interval(&self) -> TileSet {
        self.lock().interval_buffer.clone()
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            warn!("tile channel lock poisoned, recovering");
            PoisonError::into_inner(poisoned)
        })
    }
}

impl std::fmt::Debug for TileUpdateChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TileUpdateChannel")
            .field("interval_buffer", &state.interval_buffer)
            .field("finished_buffer", &state.finished_buffer)
            .finish_non_exhaustive()
    }
}

fn broadcast(listeners: &[TileListener], tiles: &TileSet) {
    for listener in listeners {
        listener(tiles);
    }
}

/// Background thread flushing a channel's interval buffer
///
/// The thread stops when the timer is dropped.
pub struct IntervalTimer {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl IntervalTimer {
    /// Start flushing `channel` every `config.interval`
    pub fn start(channel: Arc<TileUpdateChannel>, config: TileChannelConfig) -> Self {
        let (stop, stopped) = mpsc::channel::<()>();
        let interval = config.interval;
        let thread = std::thread::spawn(move || loop {
            match stopped.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {
                    channel.flush_interval();
                }
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        });
        Self {
            stop: Some(stop),
            thread: Some(thread),
        }
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        // disconnecting wakes the thread
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("tile interval timer panicked");
            }
        }
    }
}

impl std::fmt::Debug for IntervalTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntervalTimer")
            .field("running", &self.thread.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn recorder(channel: &TileUpdateChannel, cadence: Cadence) -> Arc<Mutex<Vec<TileSet>>> {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let sink = batches.clone();
        channel.subscribe(cadence, move |tiles| sink.lock().unwrap().push(tiles.clone()));
        batches
    }

    #[test]
    fn test_immediate_listeners_get_each_report() {
        let channel = TileUpdateChannel::new();
        let batches = recorder(&channel, Cadence::Immediate);

        channel.notify_tiles_updated([1, 2]);
        channel.notify_tiles_updated([2]);
        channel.notify_tiles_updated([]);

        let batches = batches.lock().unwrap();
        assert_eq!(*batches, vec![TileSet::from([1, 2]), TileSet::from([2])]);
    }

    #[test]
    fn test_interval_flush_merges_and_clears() {
        let channel = TileUpdateChannel::new();
        let batches = recorder(&channel, Cadence::Interval);

        assert!(!channel.flush_interval());
        channel.notify_tiles_updated([4, 1]);
        channel.notify_tiles_updated([1, 9]);
        assert_eq!(channel.pending_interval(), TileSet::from([1, 4, 9]));

        assert!(channel.flush_interval());
        assert!(!channel.flush_interval());
        assert!(channel.pending_interval().is_empty());
        assert_eq!(*batches.lock().unwrap(), vec![TileSet::from([1, 4, 9])]);
    }

    #[test]
    fn test_finished_buffer_is_independent() {
        let channel = TileUpdateChannel::new();
        let interval = recorder(&channel, Cadence::Interval);
        let finished = recorder(&channel, Cadence::GenerationFinished);

        channel.notify_tiles_updated([1]);
        channel.flush_interval();
        channel.notify_tiles_updated([2]);
        channel.generation_finished();
        // fires even when nothing changed
        channel.generation_finished();

        assert_eq!(*interval.lock().unwrap(), vec![TileSet::from([1])]);
        assert_eq!(
            *finished.lock().unwrap(),
            vec![TileSet::from([1, 2]), TileSet::new()]
        );
        assert_eq!(channel.pending_interval(), TileSet::from([2]));
    }

    #[test]
    fn test_listener_may_report_again() {
        let channel = Arc::new(TileUpdateChannel::new());
        let inner = channel.clone();
        channel.subscribe(Cadence::Interval, move |tiles| {
            if tiles.contains(&1) {
                inner.notify_tiles_updated([2]);
            }
        });

        channel.notify_tiles_updated([1]);
        assert!(channel.flush_interval());
        assert_eq!(channel.pending_interval(), TileSet::from([2]));
        assert_eq!(channel.listener_count(Cadence::Interval), 1);
        assert_eq!(channel.listener_count(Cadence::Immediate), 0);
    }

    #[test]
    fn test_interval_timer_flushes_until_dropped() {
        let channel = Arc::new(TileUpdateChannel::new());
        let batches = recorder(&channel, Cadence::Interval);
        let timer = IntervalTimer::start(
            channel.clone(),
            TileChannelConfig {
                interval: Duration::from_millis(10),
            },
        );

        channel.notify_tiles_updated([5]);
        let deadline = Instant::now() + Duration::from_secs(5);
        while batches.lock().unwrap().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*batches.lock().unwrap(), vec![TileSet::from([5])]);

        drop(timer);
        channel.notify_tiles_updated([6]);
        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(channel.pending_interval(), TileSet::from([6]));
    }
}
