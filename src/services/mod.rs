//! Command and read-model surface exposed to UI collaborators.

pub mod navigation;
pub mod routes;
pub mod sites;
