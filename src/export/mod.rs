//! Persistence formats

pub mod serializer;

pub use serializer::{decode, encode, fnv1a, write_atomic, ArtifactKind, SerializedArtifact};
