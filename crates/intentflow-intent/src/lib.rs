//! Intent classification and workflow selection for intentflow.
//!
//! - **Classification**: [`classifier::IntentClassifier`] turns an event into
//!   an intent through a text generator, degrading to a fallback intent on
//!   any unusable reply.
//! - **Selection**: [`selector::WorkflowSelector`] maps an intent to a
//!   workflow id, enforcing permissions and auto-approval preferences.

pub mod classifier;
pub mod error;
pub mod selector;

pub use classifier::{
    IntentClassifier, build_classification_prompt, extract_json_object, fallback_approval_message,
    parse_intent_reply,
};
pub use error::{ClassificationError, IntentError, Result};
pub use selector::{SelectionDenied, WorkflowSelector};
