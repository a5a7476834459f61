//! Stagecraft: declarative stage-driven cloud deployment.
//!
//! A project lists ordered stages, each pointing at a file of resources of
//! one kind. Deploy reconciles those resources against the live account by
//! name; destroy tears them down honouring each resource's `onDelete`.

pub mod cli;
pub mod core;
pub mod provider;
pub mod resources;
pub mod transport;
