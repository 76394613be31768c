//! Core data types for the TPM synchronization workbench.
//!
//! This crate provides the plain data shared by every other crate:
//!
//! - **Identifiers**: [`Token`] naming a trial group
//! - **Tensors**: [`Matrix`], [`WeightTensor`], [`TensorPair`], [`StimulusTensor`]
//! - **Outcomes**: [`SessionResult`], [`SessionStatus`], [`StateSnapshot`]
//!
//! # Design Philosophy
//!
//! This crate holds data only. Topology, learning and the synchronization
//! loop live in `tpmsync-core`; nothing here depends on another workspace
//! crate.

mod result;
mod tensor;
mod token;

pub use result::{SessionResult, SessionStatus, SnapshotKind, StateSnapshot};
pub use tensor::{Matrix, StimulusTensor, TensorPair, WeightTensor};
pub use token::{HexError, Token};
