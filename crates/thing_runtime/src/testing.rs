//! Shared fixtures for the runtime's unit tests

use std::sync::Arc;

use parking_lot::Mutex;

use thing_types::{AttributeSchema, Format, ThingModel, Value, ValueMap};

use crate::bridge::{AckMode, Binding, MemoryBridge};
use crate::dispatcher::Dispatcher;
use crate::event::ThingEvent;
use crate::thing::Thing;

/// A dimmable lamp with a schedule and a heating mode
pub fn lamp_model() -> Arc<ThingModel> {
    Arc::new(
        ThingModel::new(
            "lamp",
            vec![
                AttributeSchema::builder("on", "iot-purpose:on")
                    .boolean()
                    .build()
                    .unwrap(),
                AttributeSchema::builder("brightness", "iot-purpose:brightness")
                    .integer()
                    .minimum(0.0)
                    .maximum(100.0)
                    .build()
                    .unwrap(),
                AttributeSchema::builder("when", "iot-purpose:when")
                    .string()
                    .format(Format::DateTime)
                    .build()
                    .unwrap(),
                AttributeSchema::builder("mode", "iot-purpose:mode")
                    .string()
                    .enumeration(["heat", "cool", "off"])
                    .build()
                    .unwrap(),
                AttributeSchema::builder("sensor", "iot-purpose:temperature")
                    .number()
                    .writable(false)
                    .build()
                    .unwrap(),
            ],
        )
        .unwrap()
        .with_meta("name", "Lamp")
        .with_meta("facet", "iot-facet:lighting"),
    )
}

pub fn lamp(dispatcher: &Dispatcher) -> Arc<Thing> {
    Thing::new(lamp_model(), dispatcher.clone())
}

/// A lamp bound to a memory bridge with the given ack mode
pub fn bound_lamp(
    dispatcher: &Dispatcher,
    native_id: &str,
    ack: AckMode,
) -> (Arc<Thing>, Arc<MemoryBridge>) {
    let thing = lamp(dispatcher);
    let bridge = MemoryBridge::new(native_id).with_ack(ack).into_arc();
    thing
        .bind(format!("urn:test:{}", native_id), Binding::new(bridge.clone()))
        .unwrap();
    dispatcher.run_until_idle();
    (thing, bridge)
}

pub fn values<const N: usize>(pairs: [(&str, Value); N]) -> ValueMap {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

/// Record every event a thing emits
pub fn record(thing: &Arc<Thing>) -> Arc<Mutex<Vec<ThingEvent>>> {
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    thing.on_event(move |_, event| sink.lock().push(event.clone()));
    events
}
