//! Raw primitives and contracts of the strand task-execution core.
//!
//! This crate defines everything the runtime implementation and its
//! collaborators agree on: opaque identities ([`guid::Guid`]), the reified
//! policy-domain message protocol ([`message::PolicyMessage`]), task
//! primitives ([`task::EdtTask`]), the workpile contract
//! ([`workpile::Workpile`]) and the shared error type ([`error::Error`]).
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    rustdoc::broken_intra_doc_links
)]

pub mod error;
pub mod guid;
pub mod message;
pub mod task;
pub mod worker;
pub mod workpile;
