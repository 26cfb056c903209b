//! Press-and-hold confirmation state machine.
//!
//! ```text
//! ┌──────┐ press ┌─────────┐ hold timer ┌───────────┐ release ┌────────┐
//! │ Home │──────>│ Pressed │───────────>│ Confirmed │────────>│ Commit │
//! └──────┘       └─────────┘            └───────────┘         └────────┘
//!                     │ release before timer
//!                     ↓
//!                ┌─────────┐
//!                │ Aborted │
//!                └─────────┘
//! ```
//!
//! The commit edge is the *release after* the hold timer has fired. The
//! review variant accepts a single click: any release commits.
//!
//! Pure state machine in the action style: time arrives as parameters,
//! never from a clock.

use std::time::Duration;

use coffer_proto::messages::device::ButtonRequestType;

/// How long the button must be held for a full confirmation.
pub const CONFIRM_HOLD: Duration = Duration::from_millis(1200);

/// What a button edge resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// Still waiting.
    Pending,
    /// Commit edge fired; the user consented.
    Committed,
    /// Released before the hold timer; the user declined.
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HoldState<I> {
    Home,
    Pressed { since: I },
    Confirmed,
}

/// One in-flight confirmation.
#[derive(Debug, Clone)]
pub struct ConfirmFlow<I> {
    kind: ButtonRequestType,
    /// Review flows commit on a single click.
    review: bool,
    /// Host acknowledged the `ButtonRequest`.
    acked: bool,
    state: HoldState<I>,
    title: String,
    body: String,
}

impl<I: crate::clock::DeviceInstant> ConfirmFlow<I> {
    /// Start a hold-to-confirm flow.
    #[must_use]
    pub fn confirm(kind: ButtonRequestType, title: &str, body: &str) -> Self {
        Self {
            kind,
            review: false,
            acked: false,
            state: HoldState::Home,
            title: title.to_owned(),
            body: body.to_owned(),
        }
    }

    /// Start a review flow (single click suffices).
    #[must_use]
    pub fn review(kind: ButtonRequestType, title: &str, body: &str) -> Self {
        Self { review: true, ..Self::confirm(kind, title, body) }
    }

    /// Why this confirmation is being asked.
    #[must_use]
    pub fn kind(&self) -> ButtonRequestType {
        self.kind
    }

    /// Displayed title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Displayed body.
    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Record the host's `ButtonAck`.
    pub fn ack(&mut self) {
        self.acked = true;
    }

    /// True once the host acknowledged.
    #[must_use]
    pub fn acked(&self) -> bool {
        self.acked
    }

    /// Button pressed.
    pub fn press(&mut self, now: I) {
        if matches!(self.state, HoldState::Home) {
            self.state = HoldState::Pressed { since: now };
        }
    }

    /// Clock tick; promotes a long-enough press to `Confirmed`.
    pub fn tick(&mut self, now: I) {
        if let HoldState::Pressed { since } = self.state {
            if !self.review && now - since >= CONFIRM_HOLD {
                self.state = HoldState::Confirmed;
            }
        }
    }

    /// Button released; resolves the flow.
    pub fn release(&mut self, now: I) -> ConfirmOutcome {
        match self.state {
            HoldState::Home => ConfirmOutcome::Pending,
            HoldState::Pressed { since } => {
                if self.review || now - since >= CONFIRM_HOLD {
                    ConfirmOutcome::Committed
                } else {
                    self.state = HoldState::Home;
                    ConfirmOutcome::Aborted
                }
            }
            HoldState::Confirmed => ConfirmOutcome::Committed,
        }
    }

    /// True once the hold timer has fired.
    #[must_use]
    pub fn held_long_enough(&self) -> bool {
        matches!(self.state, HoldState::Confirmed)
    }
}
