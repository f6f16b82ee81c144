//! Blockset core - exhaustive decomposition of targets into distinct weights
//!
//! A *target* is expressed as the sum of a set of distinct weights drawn from a
//! fixed [`Alphabet`] (the 81-piece gauge block set in the reference instance).
//! The best decomposition is the shortest one; among equally short ones, the
//! one using the largest denominations wins (see [`comparator`]).
//!
//! ## Modules
//!
//! - [`alphabet`]: the immutable weight set and its codec index order
//! - [`comparator`]: total preorder over optional decompositions
//! - [`enumerator`]: best decomposition per sum for one fixed length
//! - [`validator`]: sanity checks used by tooling against produced maps
//! - [`codec`]: range-indexed bitmap artifact and the dense reference layout
//! - [`stats`]: merge / compare / histogram helpers over best-known maps
//! - [`persist`]: atomic whole-file replacement
//!
//! Process orchestration and the checkpoint store live in
//! `blockset-orchestration`; this crate stays free of process state.

pub mod alphabet;
pub mod codec;
pub mod combinations;
pub mod comparator;
pub mod decomposition;
pub mod enumerator;
pub mod errors;
pub mod persist;
pub mod stats;
pub mod validator;

pub use alphabet::{Alphabet, Target, Weight};
pub use codec::{encode, Artifact, ArtifactReader, Compression, EncodeReport, Range};
pub use comparator::{compare, is_better};
pub use decomposition::{BestKnownMap, Decomposition};
pub use enumerator::{enumerate, ResolvedSet};
pub use errors::{CoreError, Result};
pub use validator::{sanity_check, validate, validate_map, ValidationError};
