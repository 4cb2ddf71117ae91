//! Push/Pull Protocol
//!
//! Output changes reach the bridge as one flat map per push. A push started
//! while the output band is idle bumps its in-flight counter; pushes started
//! while it is pending are sent uncounted. Every counted completion,
//! successful or not, lowers the counter. When it reaches zero the output
//! band is cleared: the device has had its chance and the input band
//! reports what it did.

use tracing::{debug, warn};

use thing_types::{Timestamp, ValueMap};

use super::Thing;
use crate::band::{Band, UpdateOptions};
use crate::bridge::PushDone;
use crate::error::BridgeError;
use crate::event::ThingEvent;

impl Thing {
    pub(super) fn post_push(&self) {
        let weak = self.weak.clone();
        self.dispatcher.post(move || {
            if let Some(thing) = weak.upgrade() {
                thing.dispatch_push();
            }
        });
    }

    /// Hand the queued output codes to the bridge
    fn dispatch_push(&self) {
        let (payload, binding, thing_id, counted) = {
            let mut state = self.state.lock();
            let codes = state.output.queued.take().unwrap_or_default();
            let counted = std::mem::take(&mut state.output.queued_counted);
            let payload: ValueMap = codes
                .iter()
                .filter_map(|code| {
                    state
                        .output
                        .band
                        .get(code)
                        .map(|value| (code.clone(), value.clone()))
                })
                .collect();
            (payload, state.binding.clone(), state.thing_id.clone(), counted)
        };

        let mut done = PushDone::new(self.weak.clone(), self.dispatcher.clone());
        if !counted {
            done = done.uncounted();
        }
        if payload.is_empty() {
            debug!(thing_id = %thing_id, "Nothing left to push");
            done.succeed();
            return;
        }
        let Some(binding) = binding else {
            warn!(thing_id = %thing_id, "Push with no bridge bound: {:?}", payload);
            done.fail(BridgeError::NotBound);
            return;
        };

        let payload = binding.remap.to_device(payload);
        debug!(thing_id = %thing_id, "Pushing {:?}", payload);
        if let Err(e) = binding.bridge.push(payload, done) {
            warn!(thing_id = %thing_id, "Bridge push failed: {}", e);
        }
    }

    /// One push finished; runs on the dispatcher
    ///
    /// Completions of uncounted pushes are only logged.
    pub(crate) fn push_completed(&self, result: Result<(), BridgeError>, counted: bool) {
        let (thing_id, cleared) = {
            let mut state = self.state.lock();
            if !counted {
                debug!(thing_id = %state.thing_id, "Uncounted push completed: {:?}", result);
                return;
            }
            state.output.pushes = state.output.pushes.saturating_sub(1);
            if state.output.pushes > 0 {
                debug!(
                    thing_id = %state.thing_id,
                    "Push completed, {} still in flight",
                    state.output.pushes
                );
                if let Err(e) = &result {
                    warn!(thing_id = %state.thing_id, "Push failed: {}", e);
                }
                return;
            }
            let cleared: Vec<String> = std::mem::take(&mut state.output.band.values)
                .into_keys()
                .collect();
            state.output.band.timestamp = Some(Timestamp::now());
            (state.thing_id.clone(), cleared)
        };

        if let Err(e) = &result {
            warn!(thing_id = %thing_id, "Push failed: {}", e);
        }
        debug!(thing_id = %thing_id, "Output settled, cleared {:?}", cleared);
        self.emit_all(&[ThingEvent::Band {
            band: Band::Output,
            changed: cleared,
        }]);
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Pull
    // ─────────────────────────────────────────────────────────────────────────

    /// Ask the bridge for fresh state; the answer arrives through the pull sink
    pub fn pull(&self) {
        let weak = self.weak.clone();
        self.dispatcher.post(move || {
            let Some(thing) = weak.upgrade() else {
                return;
            };
            let (binding, thing_id) = {
                let state = thing.state.lock();
                (state.binding.clone(), state.thing_id.clone())
            };
            match binding {
                Some(binding) => {
                    if let Err(e) = binding.bridge.pull() {
                        warn!(thing_id = %thing_id, "Bridge pull failed: {}", e);
                    }
                }
                None => debug!(thing_id = %thing_id, "pull: not bound"),
            }
        });
    }

    /// Values (or a reachability/metadata hint) reported by the bridge
    pub(crate) fn handle_pulled(&self, values: Option<ValueMap>) {
        match values {
            Some(values) => {
                let values = {
                    let state = self.state.lock();
                    match &state.binding {
                        Some(binding) => binding.remap.from_device(values),
                        None => values,
                    }
                };
                if let Err(e) = self.update(Band::Input, values, UpdateOptions::default()) {
                    warn!(thing_id = %self.thing_id(), "Pulled values rejected: {}", e);
                }
            }
            None => self.refresh_from_bridge(),
        }
    }

    /// Re-read reachability and metadata from the bound bridge
    pub(super) fn refresh_from_bridge(&self) {
        let binding = self.state.lock().binding.clone();
        let Some(binding) = binding else {
            return;
        };
        let reachable = binding.bridge.reachable();
        let meta = binding.bridge.meta();

        let mut events = Vec::new();
        {
            let mut state = self.state.lock();
            if state.connection.reachable != reachable || state.connection.timestamp.is_none() {
                state.connection.reachable = reachable;
                state.connection.timestamp = Some(Timestamp::now());
                events.push(ThingEvent::Band {
                    band: Band::Connection,
                    changed: vec!["iot:reachable".to_string()],
                });
            }
        }

        let changed = match self.update(Band::Meta, meta, UpdateOptions::none()) {
            Ok(changed) => changed,
            Err(e) => {
                warn!(thing_id = %self.thing_id(), "Bridge metadata rejected: {}", e);
                Vec::new()
            }
        };
        events.push(ThingEvent::Band {
            band: Band::Meta,
            changed,
        });
        self.schedule(events);
    }
}
