//! Thing Runtime - live things, bridges and reactive collections
//!
//! Builds on the pure types in `thing_types`:
//!
//! - [`Thing`] - banded state with validated updates and the push/pull protocol
//! - [`Bridge`] / [`Discovery`] - the device boundary, with in-memory implementations
//! - [`ThingArray`] - collections with filtered and merged views and persisted commands
//! - [`Things`] - model registry, binding and the root collection
//! - [`Dispatcher`] - the deferred task queue every notification runs on

pub mod band;
pub mod bridge;
pub mod collection;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod key;
pub mod keystore;
pub mod thing;
pub mod things;

#[cfg(test)]
mod testing;

pub use band::{Band, BandState, UpdateOptions};
pub use bridge::{
    AckMode, Binding, Bridge, DiscoverOptions, Discovery, EnumRemap, MemoryBridge,
    MemoryDiscovery, PullSink, PushDone,
};
pub use collection::{Command, Delta, ThingArray, ThingFilter, reconcile};
pub use dispatcher::Dispatcher;
pub use error::{BridgeError, KeyError, ThingError, ThingResult};
pub use event::{ArrayEvent, ArrayEventKind, ListenerId, ThingEvent};
pub use key::{Key, Mode, find};
pub use keystore::{Keystore, MemoryKeystore};
pub use thing::Thing;
pub use things::{ThingRegistry, Things};
