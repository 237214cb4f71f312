//! Progress aggregation across a chart tree
//!
//! Every chart operation owns a [`ProgressNode`]. A node combines its own
//! local progress with one slot per sub-chart:
//!
//! ```text
//! aggregate = (local + sum(children)) / (child_count + 1)
//! ```
//!
//! The aggregate is floored to a multiple of 5 and forwarded only when it
//! grows, so subscribers see a monotonic series without duplicates. Child
//! nodes forward into their slot in the parent instead of a subscriber.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

/// Share of the local range driven by executor matches; the rest is
/// reserved for the final completion step.
const MATCH_RANGE: usize = 90;
const QUANTUM: u8 = 5;

/// Receives aggregated progress of the root node
pub trait ProgressSubscriber: Send + Sync {
    fn on_progress(&self, percent: u8) -> std::io::Result<()>;
}

/// Discards progress
#[derive(Debug, Default, Clone, Copy)]
pub struct NullProgress;

impl ProgressSubscriber for NullProgress {
    fn on_progress(&self, _percent: u8) -> std::io::Result<()> {
        Ok(())
    }
}

/// Emits progress as tracing events
#[derive(Debug, Clone)]
pub struct LogProgress {
    operation: String,
}

impl LogProgress {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
        }
    }
}

impl ProgressSubscriber for LogProgress {
    fn on_progress(&self, percent: u8) -> std::io::Result<()> {
        tracing::info!(operation = %self.operation, percent, "progress");
        Ok(())
    }
}

/// Closure subscriber
pub struct FnProgress<F>(pub F);

impl<F> ProgressSubscriber for FnProgress<F>
where
    F: Fn(u8) + Send + Sync,
{
    fn on_progress(&self, percent: u8) -> std::io::Result<()> {
        (self.0)(percent);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct NodeState {
    local: u8,
    children: Vec<u8>,
    child_count: usize,
    last_reported: Option<u8>,
}

impl NodeState {
    fn aggregate(&self) -> u8 {
        let sum: usize =
            usize::from(self.local) + self.children.iter().map(|c| usize::from(*c)).sum::<usize>();
        let average = (sum / (self.child_count + 1)).min(100);
        let average = u8::try_from(average).unwrap_or(100);
        average / QUANTUM * QUANTUM
    }
}

#[derive(Clone)]
enum Sink {
    Subscriber(Arc<dyn ProgressSubscriber>),
    Parent { parent: Box<ProgressNode>, slot: usize },
}

/// One node of the progress tree
#[derive(Clone)]
pub struct ProgressNode {
    state: Arc<Mutex<NodeState>>,
    sink: Sink,
}

impl fmt::Debug for ProgressNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("ProgressNode")
            .field("local", &state.local)
            .field("children", &state.children)
            .field("child_count", &state.child_count)
            .finish()
    }
}

impl Default for ProgressNode {
    fn default() -> Self {
        Self::root(Arc::new(NullProgress))
    }
}

impl ProgressNode {
    /// Root node reporting to `subscriber`
    pub fn root(subscriber: Arc<dyn ProgressSubscriber>) -> Self {
        Self {
            state: Arc::new(Mutex::new(NodeState::default())),
            sink: Sink::Subscriber(subscriber),
        }
    }

    fn lock(&self) -> MutexGuard<'_, NodeState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next slot and return a node with `child_count` slots of
    /// its own that reports into it
    pub fn scoped(&self, child_count: usize) -> ProgressNode {
        let slot = {
            let mut state = self.lock();
            state.children.push(0);
            state.children.len() - 1
        };
        ProgressNode {
            state: Arc::new(Mutex::new(NodeState {
                child_count,
                ..Default::default()
            })),
            sink: Sink::Parent {
                parent: Box::new(self.clone()),
                slot,
            },
        }
    }

    /// Set local progress directly (clamped to 100)
    pub fn report_local(&self, percent: u8) {
        self.update(|state| state.local = percent.min(100));
    }

    /// Local progress from matched executor events, scaled into 0..=90
    ///
    /// Ignored when `count` is zero or `matched` exceeds it.
    pub fn report_matches(&self, matched: usize, count: usize) {
        if count == 0 || matched > count {
            return;
        }
        let scaled = u8::try_from(matched * MATCH_RANGE / count).unwrap_or(90);
        self.report_local(scaled);
    }

    /// Mark the local work as complete
    pub fn finish(&self) {
        self.report_local(100);
    }

    /// Current quantized aggregate
    pub fn aggregate(&self) -> u8 {
        self.lock().aggregate()
    }

    /// Last value forwarded to the sink
    pub fn last_reported(&self) -> Option<u8> {
        self.lock().last_reported
    }

    fn set_child(&self, slot: usize, percent: u8) {
        self.update(|state| {
            if let Some(value) = state.children.get_mut(slot) {
                *value = percent;
            }
        });
    }

    fn update(&self, mutate: impl FnOnce(&mut NodeState)) {
        let forward = {
            let mut state = self.lock();
            mutate(&mut state);
            let aggregate = state.aggregate();
            match state.last_reported {
                Some(last) if aggregate <= last => None,
                _ => {
                    state.last_reported = Some(aggregate);
                    Some(aggregate)
                }
            }
        };

        if let Some(percent) = forward {
            match &self.sink {
                Sink::Subscriber(subscriber) => {
                    if let Err(err) = subscriber.on_progress(percent) {
                        tracing::warn!(error = %err, percent, "progress subscriber failed");
                    }
                }
                Sink::Parent { parent, slot } => parent.set_child(*slot, percent),
            }
        }
    }
}
