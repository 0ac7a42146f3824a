//! Status-mutation contract shared by the custom resources.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt::Debug;

/// A resource whose `status` subresource is owned by the controller.
///
/// The status publisher reads the current snapshot through `current_status`
/// and compares it with a freshly computed one before writing.
pub trait StatusOwner {
    /// Status payload stored under `.status`
    type Status: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Current status, if any has been published.
    fn current_status(&self) -> Option<&Self::Status>;

    /// Mutable access to the status slot.
    fn status_mut(&mut self) -> &mut Option<Self::Status>;
}
