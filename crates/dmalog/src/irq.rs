//! Interrupt capabilities consumed by the device.
//!
//! The device owns exactly one [`Interrupt`]: either a message-signaled target or a legacy
//! level-triggered line. The notification controller only ever calls `raise`/`lower`; which
//! mechanism sits behind it is chosen by whoever builds the device (and may be switched later by
//! the host fabric, e.g. when the guest enables MSI).

use std::fmt;

/// A legacy level-triggered interrupt line (INTx-style).
pub trait IrqLine {
    fn set_level(&self, high: bool);
}

/// A message-signaled interrupt as programmed by the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MsiMessage {
    pub address: u64,
    pub data: u16,
}

impl MsiMessage {
    pub fn vector(self) -> u8 {
        (self.data & 0x00ff) as u8
    }
}

/// Sink for message-signaled interrupts.
pub trait MsiTrigger {
    fn trigger_msi(&mut self, message: MsiMessage);
}

pub enum Interrupt {
    /// Edge semantics: every raise sends one message; there is nothing to lower.
    Message {
        target: Box<dyn MsiTrigger + Send>,
        message: MsiMessage,
    },
    /// Held high until every direction that asserted it has been acknowledged.
    Level(Box<dyn IrqLine + Send>),
}

impl Interrupt {
    pub fn message(target: impl MsiTrigger + Send + 'static, message: MsiMessage) -> Self {
        Self::Message {
            target: Box::new(target),
            message,
        }
    }

    pub fn level(line: impl IrqLine + Send + 'static) -> Self {
        Self::Level(Box::new(line))
    }

    pub fn is_level(&self) -> bool {
        matches!(self, Self::Level(_))
    }

    pub(crate) fn raise(&mut self) {
        match self {
            Self::Message { target, message } => target.trigger_msi(*message),
            Self::Level(line) => line.set_level(true),
        }
    }

    pub(crate) fn lower(&mut self) {
        if let Self::Level(line) = self {
            line.set_level(false);
        }
    }
}

impl fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Message { message, .. } => f
                .debug_struct("Interrupt::Message")
                .field("message", message)
                .finish_non_exhaustive(),
            Self::Level(_) => f.debug_struct("Interrupt::Level").finish_non_exhaustive(),
        }
    }
}
