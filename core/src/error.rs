//! Configuration errors.
//!
//! Setup mistakes fail fast at registration time instead of being tolerated
//! and surfacing later as duplicated or missing emissions.

use thiserror::Error;

/// A setup call was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    /// A handler already exists for this type
    #[error("a handler is already registered for action type `{action_type}`")]
    DuplicateHandler {
        /// The conflicting type
        action_type: String,
    },

    /// The same type appears twice in one registration
    #[error("action type `{action_type}` is listed more than once")]
    RepeatedActionType {
        /// The repeated type
        action_type: String,
    },

    /// A registration named no action types
    #[error("no action types given")]
    NoActionTypes,

    /// An action type name is empty
    #[error("action type names must not be empty")]
    BlankActionType,

    /// Two lifecycle roles share one action type
    #[error("lifecycle action type `{action_type}` is used for more than one role")]
    AmbiguousLifecycleTypes {
        /// The shared type
        action_type: String,
    },

    /// A source composer was built without sources
    #[error("no sources provided to `{target}`")]
    NoSources {
        /// Name of the consumer being composed
        target: String,
    },

    /// A source produced something the merge cannot use
    #[error("source {index} (`{name}`) of `{target}` did not produce an object")]
    InvalidSource {
        /// Name of the consumer being composed
        target: String,
        /// Position of the source
        index: usize,
        /// Name of the source
        name: String,
    },
}
