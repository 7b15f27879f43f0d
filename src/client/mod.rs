//! Client-side helpers: reconciling a local view from room broadcasts.

pub mod replica;

pub use replica::ClientReplica;
