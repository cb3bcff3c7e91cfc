//! Schema Synthesizer.
//!
//! `validate` → `compile` (descriptors + catalog) → `diff` against the live
//! catalog → migrate storage → activate a new [`SchemaGeneration`].

pub mod compile;
pub mod descriptor;
pub mod diff;
pub mod generation;
pub mod synthesizer;
pub mod validate;

pub use compile::{CompiledSchema, compile};
pub use descriptor::{Descriptor, FieldDescriptor, FieldOrigin, NavigationDescriptor, Record};
pub use diff::{SchemaChange, SchemaDiff};
pub use generation::SchemaGeneration;
pub use synthesizer::{PinnedGeneration, SchemaSynthesizer};
pub use validate::validate_declarations;
