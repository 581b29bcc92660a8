use thiserror::Error;

/// Error kinds produced by the Warden and its PMSMs.
///
/// `escalated` errors propagate out to the Mode Warden's callback listeners
/// as a mode-change event; non-escalated kinds are handled locally by the
/// owning PMSM (typically by tearing itself down into the Graveyard)
/// without being surfaced further.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum WardenError {
    #[error("native interface setup failed for {interface}")]
    NativeSetupFailed { interface: String },

    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    #[error("no viable channel for {interface}")]
    NoChannel { interface: String },

    #[error("unsupported configuration: {reason}")]
    UnsupportedConfiguration { reason: String },

    #[error("native daemon died")]
    DaemonDied,

    #[error("interface {interface} went down unexpectedly")]
    InterfaceDownUnexpected { interface: String },

    #[error("interface {interface} was destroyed unexpectedly")]
    InterfaceDestroyedUnexpected { interface: String },

    #[error("generic start failure for {interface}: {reason}")]
    StartFailureGeneric { interface: String, reason: String },

    #[error("collaborator error: {0}")]
    Collaborator(String),
}

impl WardenError {
    /// Whether this error kind escalates to mode-change listeners rather
    /// than being absorbed locally by the owning PMSM.
    pub fn escalates(&self) -> bool {
        matches!(
            self,
            WardenError::DaemonDied
                | WardenError::InterfaceDestroyedUnexpected { .. }
                | WardenError::InterfaceDownUnexpected { .. }
        )
    }
}
