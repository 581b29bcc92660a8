pub mod client;
pub mod softap;

/// Result of one hierarchical dispatch step: either the state changed (or
/// stayed the same but the event was consumed), or the leaf/parent handler
/// declined it and it should bubble further up the parent chain.
#[derive(Debug)]
pub enum Outcome<S> {
    Transition(S),
    Handled,
    NotHandled,
}

pub use client::{ClientEvent, ClientPmsm, ClientState};
pub use softap::{SoftApEvent, SoftApPmsm, SoftApState};
