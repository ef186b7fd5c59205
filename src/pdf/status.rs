//! Stage status shared by every state machine

use super::error::InvariantViolation;

/// Lifecycle of one stage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Status {
    /// Nothing to do: inputs missing.
    #[default]
    Idle,
    Loading,
    Success,
    Error,
}

impl Status {
    #[must_use]
    pub fn is_idle(self) -> bool {
        self == Self::Idle
    }

    #[must_use]
    pub fn is_loading(self) -> bool {
        self == Self::Loading
    }

    #[must_use]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    /// Idle, success and error are all resting states.
    #[must_use]
    pub fn is_settled(self) -> bool {
        self != Self::Loading
    }
}

/// Point-in-time view of a stage: its status and, on success, its handle.
#[derive(Clone)]
pub struct StageView<H> {
    pub status: Status,
    pub handle: Option<H>,
}

impl<H: Clone> StageView<H> {
    /// Check the status/handle pairing. `success` without a handle is fatal.
    pub fn checked(
        stage: &'static str,
        status: Status,
        handle: Option<&H>,
    ) -> Result<Self, InvariantViolation> {
        match (status, handle) {
            (Status::Success, Some(handle)) => Ok(Self {
                status,
                handle: Some(handle.clone()),
            }),
            (Status::Success, None) => {
                log::error!("{stage} reports success without a handle");
                Err(InvariantViolation { stage })
            }
            (status, _) => Ok(Self {
                status,
                handle: None,
            }),
        }
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.status.is_idle()
    }

    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.status.is_loading()
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status.is_error()
    }
}
