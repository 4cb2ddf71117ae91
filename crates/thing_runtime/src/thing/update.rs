//! Band Updates
//!
//! Merging a partial map into a band: timestamp check, per-key validation,
//! change detection, stamping, then one deferred notification round. Output
//! changes additionally queue a push unless a non-immediate transaction is
//! collecting them.

use tracing::{debug, warn};

use thing_types::{Timestamp, Value, ValueMap, ValueType, meta_key, should_apply, value_map_from_json};

use super::{Thing, ThingState, Transaction};
use crate::band::{Band, BandState, UpdateOptions};
use crate::error::{ThingError, ThingResult};
use crate::event::ThingEvent;

impl Thing {
    /// Merge `values` into `band`
    ///
    /// Returns the keys that changed. Unknown or invalid keys are logged and
    /// skipped; only updating the connection band is an error.
    pub fn update(
        &self,
        band: Band,
        values: ValueMap,
        options: UpdateOptions,
    ) -> ThingResult<Vec<String>> {
        let incoming = options.timestamp.clone().or_else(|| {
            values
                .get("@timestamp")
                .and_then(Value::as_str)
                .and_then(Timestamp::parse)
        });

        let mut guard = self.state.lock();
        let state = &mut *guard;
        let target = match band {
            Band::Input => &mut state.input,
            Band::Output => &mut state.output.band,
            Band::Meta => &mut state.meta,
            Band::Connection => return Err(ThingError::ReadOnlyBand(band)),
        };

        if options.check_timestamp && !should_apply(target.timestamp.as_ref(), incoming.as_ref()) {
            debug!(
                thing_id = %state.thing_id,
                band = %band,
                "Update rejected: stored {:?} is newer than incoming {:?}",
                target.timestamp,
                incoming
            );
            return Ok(Vec::new());
        }

        let changed = match band {
            Band::Meta => apply_meta(target, values),
            _ => self.apply_attributes(&state.thing_id, target, band, values, options.validate),
        };
        if changed.is_empty() {
            return Ok(changed);
        }
        if options.set_timestamp {
            target.timestamp = Some(incoming.unwrap_or_else(Timestamp::now));
        }

        if let Some(transaction) = state.transaction.as_mut().filter(|t| !t.immediate) {
            transaction.record(band, &changed, options.notify);
            return Ok(changed);
        }

        let events = if options.notify {
            change_events(state, band, &changed)
        } else {
            Vec::new()
        };
        let dispatch = band == Band::Output && queue_push(state, &changed);
        drop(guard);

        self.schedule(events);
        if dispatch {
            self.post_push();
        }
        Ok(changed)
    }

    /// [`Thing::update`] with a JSON object payload
    pub fn update_json(
        &self,
        band: Band,
        values: &serde_json::Value,
        options: UpdateOptions,
    ) -> ThingResult<Vec<String>> {
        let values = value_map_from_json(values).ok_or(ThingError::NotAnObject)?;
        self.update(band, values, options)
    }

    fn apply_attributes(
        &self,
        thing_id: &str,
        target: &mut BandState,
        band: Band,
        values: ValueMap,
        validate: bool,
    ) -> Vec<String> {
        let mut changed = Vec::new();
        for (code, raw) in values {
            if code.starts_with('@') {
                continue;
            }
            let Some(attribute) = self.model.attribute(&code) else {
                warn!(thing_id = %thing_id, band = %band, code = %code, "Unknown attribute, skipped");
                continue;
            };

            // a null desire on a non-null attribute withdraws it
            if band == Band::Output && raw.is_null() && !attribute.has_type(ValueType::Null) {
                if target.values.remove(&code).is_some() {
                    changed.push(code);
                }
                continue;
            }

            let value = if validate {
                match attribute.validate(Some(&raw)) {
                    Some(value) => value,
                    None => {
                        warn!(
                            thing_id = %thing_id,
                            band = %band,
                            code = %code,
                            "Value {} does not fit the attribute, skipped",
                            raw
                        );
                        continue;
                    }
                }
            } else {
                raw
            };

            if attribute.is_change(target.values.get(&code), &value) {
                target.values.insert(code.clone(), value);
                changed.push(code);
            }
        }
        changed
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transactions
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `f` as one transaction
    ///
    /// In a non-immediate transaction, notifications and pushes from every
    /// update inside `f` are collected and flushed once when `f` returns.
    /// Nested transactions join the outermost one.
    pub fn transaction<R>(&self, immediate: bool, f: impl FnOnce(&Thing) -> R) -> R {
        let opened = {
            let mut state = self.state.lock();
            if state.transaction.is_some() {
                false
            } else {
                state.transaction = Some(Transaction {
                    immediate,
                    pending: Default::default(),
                });
                true
            }
        };

        let result = f(self);
        if opened {
            self.end_transaction();
        }
        result
    }

    fn end_transaction(&self) {
        let mut guard = self.state.lock();
        let Some(transaction) = guard.transaction.take() else {
            return;
        };

        let mut events = Vec::new();
        let mut dispatch = false;
        for (band, pending) in transaction.pending {
            if pending.notify {
                events.extend(change_events(&guard, band, &pending.changed));
            }
            if band == Band::Output {
                dispatch |= queue_push(&mut guard, &pending.changed);
            }
        }
        drop(guard);

        self.schedule(events);
        if dispatch {
            self.post_push();
        }
    }
}

/// Merge metadata under normalised keys; null removes a key
fn apply_meta(target: &mut BandState, values: ValueMap) -> Vec<String> {
    let mut changed = Vec::new();
    for (key, value) in values {
        if key.starts_with('@') {
            continue;
        }
        let key = meta_key(&key);
        if value.is_null() {
            if target.values.remove(&key).is_some() {
                changed.push(key);
            }
            continue;
        }
        let same = target
            .values
            .get(&key)
            .is_some_and(|current| current.loosely_equals(&value));
        if !same {
            target.values.insert(key.clone(), value);
            changed.push(key);
        }
    }
    changed
}

/// Attribute events (input/output only) followed by the band event
fn change_events(state: &ThingState, band: Band, changed: &[String]) -> Vec<ThingEvent> {
    let source = match band {
        Band::Input => &state.input,
        Band::Output => &state.output.band,
        Band::Meta => &state.meta,
        Band::Connection => return Vec::new(),
    };

    let mut events: Vec<ThingEvent> = match band {
        Band::Input | Band::Output => changed
            .iter()
            .map(|code| ThingEvent::Attribute {
                band,
                code: code.clone(),
                value: source.get(code).cloned(),
            })
            .collect(),
        _ => Vec::new(),
    };
    events.push(ThingEvent::Band {
        band,
        changed: changed.to_vec(),
    });
    events
}

/// Queue changed output codes for push
///
/// Returns true when a new push must be posted. Codes changed while a push
/// is still queued join that push. While earlier pushes are in flight the
/// new values still go to the bridge, but the counter is left alone: the
/// next completion to bring it to zero clears the band, stale or not.
fn queue_push(state: &mut ThingState, changed: &[String]) -> bool {
    match state.output.queued.as_mut() {
        Some(queued) => {
            for code in changed {
                if !queued.contains(code) {
                    queued.push(code.clone());
                }
            }
            false
        }
        None => {
            state.output.queued = Some(changed.to_vec());
            state.output.queued_counted = state.output.pushes == 0;
            if state.output.queued_counted {
                state.output.pushes += 1;
            }
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::dispatcher::Dispatcher;
    use crate::testing::{lamp, record, values};

    fn ts(s: &str) -> Timestamp {
        Timestamp::parse(s).unwrap()
    }

    #[test]
    fn test_meta_timestamp_rejection_keeps_value() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);

        thing
            .update(
                Band::Meta,
                values([
                    ("name", Value::from("A")),
                    ("@timestamp", Value::from("2024-01-02T00:00:00Z")),
                ]),
                UpdateOptions::none().set_timestamp(true),
            )
            .unwrap();

        let changed = thing
            .update(
                Band::Meta,
                values([
                    ("name", Value::from("B")),
                    ("@timestamp", Value::from("2024-01-01T00:00:00Z")),
                ]),
                UpdateOptions::none().check_timestamp(true),
            )
            .unwrap();

        assert!(changed.is_empty());
        assert_eq!(thing.meta("name"), Some(Value::from("A")));
        assert_eq!(
            thing.band(Band::Meta).timestamp,
            Some(ts("2024-01-02T00:00:00Z"))
        );
    }

    #[test]
    fn test_meta_untimed_update_loses_to_stamped_value() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);

        let changed = thing
            .update(
                Band::Meta,
                values([("name", Value::from("A"))]),
                UpdateOptions::none().set_timestamp(true),
            )
            .unwrap();
        assert_eq!(changed, vec!["schema:name".to_string()]);
        assert!(thing.band(Band::Meta).timestamp.is_some());

        let changed = thing
            .update(
                Band::Meta,
                values([("name", Value::from("B"))]),
                UpdateOptions::none().check_timestamp(true),
            )
            .unwrap();

        assert!(changed.is_empty());
        assert_eq!(thing.get("name").unwrap(), Some(Value::from("A")));
    }

    #[test]
    fn test_newer_timestamp_applies() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let options = UpdateOptions::default().check_timestamp(true);

        thing
            .update(
                Band::Input,
                values([("on", Value::Bool(true))]),
                options.clone().timestamp(ts("2024-01-01T00:00:00Z")),
            )
            .unwrap();
        let changed = thing
            .update(
                Band::Input,
                values([("on", Value::Bool(false))]),
                options.clone().timestamp(ts("2024-01-01T00:00:00Z")),
            )
            .unwrap();
        assert_eq!(changed, vec!["on".to_string()]);

        // stored timestamp present, incoming absent
        let changed = thing
            .update(Band::Input, values([("on", Value::Bool(true))]), options)
            .unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn test_malformed_field_does_not_block_others() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);

        let changed = thing
            .update(
                Band::Input,
                values([
                    ("when", Value::from("not-a-date")),
                    ("on", Value::from("true")),
                    ("brightness", Value::Float(42.4)),
                ]),
                UpdateOptions::default(),
            )
            .unwrap();

        assert_eq!(changed, vec!["brightness".to_string(), "on".to_string()]);
        let input = thing.band(Band::Input);
        assert_eq!(input.get("on"), Some(&Value::Bool(true)));
        assert_eq!(input.get("brightness"), Some(&Value::Int(42)));
        assert_eq!(input.get("when"), None);
    }

    #[test]
    fn test_unknown_and_reserved_keys_skipped() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let changed = thing
            .update(
                Band::Input,
                values([
                    ("volume", Value::Int(3)),
                    ("@id", Value::from("x")),
                    ("mode", Value::from("heat")),
                ]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(changed, vec!["mode".to_string()]);
    }

    #[test]
    fn test_enumeration_rejects_unknown_value() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let changed = thing
            .update(
                Band::Input,
                values([("mode", Value::from("turbo"))]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert!(changed.is_empty());
    }

    #[test]
    fn test_connection_band_is_read_only() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let result = thing.update(
            Band::Connection,
            values([("reachable", Value::Bool(true))]),
            UpdateOptions::default(),
        );
        assert_eq!(result, Err(ThingError::ReadOnlyBand(Band::Connection)));
    }

    #[test]
    fn test_update_json_requires_object() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let result = thing.update_json(
            Band::Input,
            &serde_json::json!([1, 2]),
            UpdateOptions::default(),
        );
        assert_eq!(result, Err(ThingError::NotAnObject));

        let changed = thing
            .update_json(
                Band::Input,
                &serde_json::json!({ "on": true }),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(changed, vec!["on".to_string()]);
    }

    #[test]
    fn test_output_null_clears_desire() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        thing.set("on", true).unwrap();
        assert!(thing.band(Band::Output).get("on").is_some());

        let changed = thing
            .update(
                Band::Output,
                values([("on", Value::Null)]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(changed, vec!["on".to_string()]);
        assert!(thing.band(Band::Output).get("on").is_none());
    }

    #[test]
    fn test_meta_keys_normalised_and_null_removes() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let changed = thing
            .update(
                Band::Meta,
                values([("zone", Value::from("Kitchen")), ("firmware", Value::from("1.2"))]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(changed, vec!["iot:firmware".to_string(), "iot:zone".to_string()]);

        let changed = thing
            .update(
                Band::Meta,
                values([("iot:zone", Value::Null)]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(changed, vec!["iot:zone".to_string()]);
        assert!(thing.zones().is_empty());
    }

    #[test]
    fn test_one_notification_round_per_update() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let events = record(&thing);

        thing
            .update(
                Band::Input,
                values([("on", Value::Bool(true)), ("brightness", Value::Int(10))]),
                UpdateOptions::default(),
            )
            .unwrap();
        assert_eq!(dispatcher.pending(), 1);
        assert!(events.lock().is_empty());
        dispatcher.run_until_idle();

        let events = events.lock();
        assert_eq!(events.len(), 3);
        assert_eq!(
            events[2],
            ThingEvent::Band {
                band: Band::Input,
                changed: vec!["brightness".to_string(), "on".to_string()],
            }
        );
    }

    #[test]
    fn test_without_notify_or_timestamp() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        thing
            .update(
                Band::Input,
                values([("on", Value::Bool(true))]),
                UpdateOptions::default().notify(false).set_timestamp(false),
            )
            .unwrap();
        assert_eq!(dispatcher.pending(), 0);
        assert_eq!(thing.band(Band::Input).timestamp, None);
    }

    #[test]
    fn test_unvalidated_update_stores_raw() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        thing
            .update(
                Band::Input,
                values([("brightness", Value::Int(500))]),
                UpdateOptions::default().validate(false),
            )
            .unwrap();
        assert_eq!(thing.band(Band::Input).get("brightness"), Some(&Value::Int(500)));
    }

    #[test]
    fn test_transaction_batches_notifications() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        let bands = Arc::new(Mutex::new(Vec::new()));
        let sink = bands.clone();
        thing.on_band(Band::Input, move |_, event| sink.lock().push(event.clone()));

        thing.transaction(false, |thing| {
            thing
                .update(Band::Input, values([("on", Value::Bool(true))]), UpdateOptions::default())
                .unwrap();
            thing
                .update(Band::Input, values([("brightness", Value::Int(5))]), UpdateOptions::default())
                .unwrap();
            assert_eq!(thing.dispatcher().pending(), 0);
        });
        dispatcher.run_until_idle();

        assert_eq!(
            *bands.lock(),
            vec![ThingEvent::Band {
                band: Band::Input,
                changed: vec!["on".to_string(), "brightness".to_string()],
            }]
        );
    }

    #[test]
    fn test_immediate_transaction_is_passthrough() {
        let dispatcher = Dispatcher::new();
        let thing = lamp(&dispatcher);
        thing.transaction(true, |thing| {
            thing
                .update(Band::Input, values([("on", Value::Bool(true))]), UpdateOptions::default())
                .unwrap();
            assert_eq!(thing.dispatcher().pending(), 1);
        });
    }
}
