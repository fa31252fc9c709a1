//! Export records: typed attributes, table routing and change envelopes.

pub mod attribute;
pub mod normalize;
pub mod tables;

pub use attribute::{AttributeValue, Item};
pub use normalize::{
    ChangeEnvelope, EventKind, Keys, Metadata, Normalized, Normalizer, NormalizerOptions,
    OmitReason, Outcome, envelope_schema,
};
pub use tables::classify;
