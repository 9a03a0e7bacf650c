//! Exchange tasks
//!
//! A task drives one logical exchange of an IKE_SA. The scheduler owns the
//! task queue and calls exactly one operation at a time per SA, in message
//! order: `pre_process` validates an inbound response before `process`
//! consumes it; `post_build`/`post_process` run after the message has been
//! signed, which is where deferred key derivation happens.

use super::message::IkeMessage;
use super::sa::IkeSa;

pub mod ike_init;

/// Progress report of a task operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// The exchange needs another round trip
    NeedMore,
    /// The exchange completed
    Success,
    /// The exchange failed; the SA is torn down
    Failed,
}

/// Task discriminator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    /// The IKE_SA_INIT task
    IkeInit,
}

/// One exchange-driving task of an IKE_SA
pub trait Task {
    /// The task's type
    fn task_type(&self) -> TaskType;

    /// Populate an outbound message
    fn build(&mut self, sa: &mut IkeSa, message: &mut IkeMessage) -> TaskStatus;

    /// Consume an inbound message
    fn process(&mut self, sa: &mut IkeSa, message: &IkeMessage) -> TaskStatus;

    /// Validate an inbound response before regular processing
    fn pre_process(&mut self, _sa: &mut IkeSa, _message: &IkeMessage) -> TaskStatus {
        TaskStatus::Success
    }

    /// Hook invoked after the outbound message has been signed
    fn post_build(&mut self, _sa: &mut IkeSa, _message: &IkeMessage) -> TaskStatus {
        TaskStatus::Success
    }

    /// Hook invoked after the inbound message has been fully handled
    fn post_process(&mut self, _sa: &mut IkeSa, _message: &IkeMessage) -> TaskStatus {
        TaskStatus::Success
    }

    /// Rebind the task to a restarted SA, clearing volatile state
    fn migrate(&mut self);
}
