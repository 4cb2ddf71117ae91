//! In-Memory Bridge
//!
//! A bridge with no device behind it. Used by the runner for configured
//! things and by tests to drive the push/pull protocol by hand.

use std::collections::VecDeque;
use std::sync::Arc;

use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tracing::debug;

use thing_types::{Value, ValueMap};

use super::{Bridge, DiscoverOptions, Discovery, PullSink, PushDone};
use crate::error::BridgeError;

/// How a [`MemoryBridge`] answers pushes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AckMode {
    /// Complete every push successfully straight away
    #[default]
    Auto,
    /// Hold completions until [`MemoryBridge::complete_next`]
    Manual,
    /// Fail every push
    Fail,
}

#[derive(Default)]
struct MemoryState {
    sink: Option<PullSink>,
    reachable: bool,
    meta: ValueMap,
    values: ValueMap,
    pushes: Vec<ValueMap>,
    pending: VecDeque<PushDone>,
    ack: AckMode,
    echo: bool,
    pulls: usize,
}

pub struct MemoryBridge {
    native_id: String,
    state: Mutex<MemoryState>,
}

impl MemoryBridge {
    pub fn new(native_id: impl Into<String>) -> Self {
        Self {
            native_id: native_id.into(),
            state: Mutex::new(MemoryState {
                reachable: true,
                ..Default::default()
            }),
        }
    }

    pub fn with_meta(self, key: &str, value: impl Into<Value>) -> Self {
        self.state.lock().meta.insert(key.to_string(), value.into());
        self
    }

    /// Device-side values reported on pull
    pub fn with_values(self, values: ValueMap) -> Self {
        self.state.lock().values.extend(values);
        self
    }

    pub fn with_ack(self, ack: AckMode) -> Self {
        self.state.lock().ack = ack;
        self
    }

    /// Report pushed values straight back as pulled input
    pub fn with_echo(self, echo: bool) -> Self {
        self.state.lock().echo = echo;
        self
    }

    pub fn into_arc(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Every payload received, oldest first
    pub fn pushes(&self) -> Vec<ValueMap> {
        self.state.lock().pushes.clone()
    }

    pub fn pull_count(&self) -> usize {
        self.state.lock().pulls
    }

    /// Completions held in manual mode
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Complete the oldest held push
    pub fn complete_next(&self, result: Result<(), BridgeError>) -> bool {
        let done = self.state.lock().pending.pop_front();
        match done {
            Some(done) => {
                done.complete(result);
                true
            }
            None => false,
        }
    }

    /// Simulate the device reporting new values
    pub fn report(&self, values: ValueMap) {
        let sink = {
            let mut state = self.state.lock();
            state.values.extend(values.clone());
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.pulled(Some(values));
        }
    }

    /// Toggle reachability and tell the thing to re-read it
    pub fn set_reachable(&self, reachable: bool) {
        let sink = {
            let mut state = self.state.lock();
            state.reachable = reachable;
            state.sink.clone()
        };
        if let Some(sink) = sink {
            sink.pulled(None);
        }
    }
}

impl Bridge for MemoryBridge {
    fn native_id(&self) -> String {
        self.native_id.clone()
    }

    fn connect(&self, sink: PullSink) -> Result<(), BridgeError> {
        self.state.lock().sink = Some(sink);
        Ok(())
    }

    fn push(&self, values: ValueMap, done: PushDone) -> Result<(), BridgeError> {
        let mut state = self.state.lock();
        if !state.reachable {
            return Err(BridgeError::Unreachable);
        }
        debug!(native_id = %self.native_id, "Memory push: {:?}", values);
        state.pushes.push(values.clone());
        state.values.extend(values.clone());

        let echo = state.echo.then(|| state.sink.clone()).flatten();
        match state.ack {
            AckMode::Auto => {
                drop(state);
                done.succeed();
            }
            AckMode::Manual => {
                state.pending.push_back(done);
                drop(state);
            }
            AckMode::Fail => {
                drop(state);
                done.fail(BridgeError::Failed("push rejected".into()));
            }
        }

        if let Some(sink) = echo {
            sink.pulled(Some(values));
        }
        Ok(())
    }

    fn pull(&self) -> Result<(), BridgeError> {
        let (sink, values) = {
            let mut state = self.state.lock();
            state.pulls += 1;
            (state.sink.clone(), state.values.clone())
        };
        match sink {
            Some(sink) => {
                sink.pulled(Some(values));
                Ok(())
            }
            None => Err(BridgeError::NotBound),
        }
    }

    fn reachable(&self) -> bool {
        self.state.lock().reachable
    }

    fn meta(&self) -> ValueMap {
        self.state.lock().meta.clone()
    }

    fn disconnect(&self) {
        let mut state = self.state.lock();
        state.sink = None;
        state.pending.clear();
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Discovery
// ─────────────────────────────────────────────────────────────────────────────

/// Discovery over a fixed set of bridges
#[derive(Default)]
pub struct MemoryDiscovery {
    bridges: Vec<Arc<MemoryBridge>>,
}

impl MemoryDiscovery {
    pub fn new(bridges: Vec<Arc<MemoryBridge>>) -> Self {
        Self { bridges }
    }
}

impl Discovery for MemoryDiscovery {
    fn discover(&self, options: &DiscoverOptions) -> BoxStream<'static, Arc<dyn Bridge>> {
        debug!(
            "Memory discovery for {}: {} bridges",
            options.model_code,
            self.bridges.len()
        );
        let bridges: Vec<Arc<dyn Bridge>> = self
            .bridges
            .iter()
            .map(|b| b.clone() as Arc<dyn Bridge>)
            .collect();
        futures::stream::iter(bridges).boxed()
    }
}
