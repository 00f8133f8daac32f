//! The core subsystem: schema expansion, monomorphization, deterministic
//! synthesis, and annotated response values.
//!
//! The pipeline a request goes through:
//! operation ref → [`expander::Expander`] → property tree →
//! [`monomorph::monomorphize`] → mono trees → [`synth::Synthesizer`] (with
//! a shared [`rnd::Rnd`]) → JSON candidates → one selected and returned to
//! the client → parsed back as a [`json_value::JsonValue`] for correlation.

pub mod expander;
pub mod expander_cache;
pub mod json_value;
pub mod jsonpos;
pub mod monomorph;
pub mod property;
pub mod property_addr;
pub mod refutil;
pub mod rnd;
pub mod schema;
pub mod synth;
pub mod variant_map;

pub use expander::{ExpandError, Expander, ExpanderOption};
pub use expander_cache::ExpanderCache;
pub use json_value::{value_map, JsonValue, RootModel, ValuePos};
pub use monomorph::monomorphize;
pub use property::Property;
pub use property_addr::{AddrParseError, AddrStep, PropertyAddr, StepKind};
pub use refutil::{JsonRef, ResolveError, SpecStore};
pub use rnd::Rnd;
pub use synth::{SynthDuplicateElement, SynthError, Synthesizer, SynthesizerOption};
pub use variant_map::VariantMap;
