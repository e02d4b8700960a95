//! Completion interrupt coalescing and guest acknowledgment.

use bitflags::bitflags;

use crate::irq::Interrupt;

bitflags! {
    /// Bits of a write to the acknowledge register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AckBits: u64 {
        const OUTBOUND = 1 << 0;
        const INBOUND = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Guest → backend.
    Outbound,
    /// Backend → guest.
    Inbound,
}

/// Per-direction coalescing flags. Set when an interrupt is raised, cleared only by the guest.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PendingFlags {
    pub outbound: bool,
    pub inbound: bool,
}

impl PendingFlags {
    pub fn get(&self, direction: Direction) -> bool {
        match direction {
            Direction::Outbound => self.outbound,
            Direction::Inbound => self.inbound,
        }
    }

    fn set(&mut self, direction: Direction, value: bool) {
        match direction {
            Direction::Outbound => self.outbound = value,
            Direction::Inbound => self.inbound = value,
        }
    }

    fn any(&self) -> bool {
        self.outbound || self.inbound
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyOutcome {
    /// The descriptor did not ask for an interrupt.
    NotRequested,
    /// An interrupt was raised and the direction is now pending.
    Raised,
    /// The direction was already pending; no new interrupt.
    Coalesced,
}

#[derive(Debug)]
pub struct NotificationController {
    interrupt: Interrupt,
    pending: PendingFlags,
    /// Directions currently holding the level line high. Always clear in message mode.
    asserted: PendingFlags,
}

impl NotificationController {
    pub fn new(interrupt: Interrupt) -> Self {
        Self {
            interrupt,
            pending: PendingFlags::default(),
            asserted: PendingFlags::default(),
        }
    }

    pub fn pending(&self) -> PendingFlags {
        self.pending
    }

    /// Current level of the legacy line (always false in message mode).
    pub fn irq_level(&self) -> bool {
        self.asserted.any()
    }

    /// Signal completion of a transfer in `direction`.
    ///
    /// At most one interrupt is outstanding per direction: while the direction is pending,
    /// further completions are coalesced.
    pub fn notify(&mut self, direction: Direction, requested: bool) -> NotifyOutcome {
        if !requested {
            return NotifyOutcome::NotRequested;
        }
        if self.pending.get(direction) {
            tracing::trace!(?direction, "completion interrupt coalesced");
            return NotifyOutcome::Coalesced;
        }

        self.interrupt.raise();
        self.pending.set(direction, true);
        if self.interrupt.is_level() {
            self.asserted.set(direction, true);
        }
        tracing::trace!(?direction, "completion interrupt raised");
        NotifyOutcome::Raised
    }

    /// Process a guest write to the acknowledge register.
    ///
    /// Only the first matching bit is honored: bit 0 (outbound) takes priority over bit 1
    /// (inbound), so a write of `0b11` clears only the outbound flag. Returns the direction whose
    /// flag was cleared, or `None` if nothing changed.
    pub fn acknowledge(&mut self, value: u64) -> Option<Direction> {
        let bits = AckBits::from_bits_truncate(value);
        let direction = if bits.contains(AckBits::OUTBOUND) {
            Direction::Outbound
        } else if bits.contains(AckBits::INBOUND) {
            Direction::Inbound
        } else {
            return None;
        };

        if !self.pending.get(direction) {
            return None;
        }
        self.pending.set(direction, false);

        if self.asserted.get(direction) {
            self.asserted.set(direction, false);
            if !self.asserted.any() {
                self.interrupt.lower();
            }
        }
        Some(direction)
    }

    /// Swap the interrupt mechanism. A level line that is currently high is lowered first;
    /// pending flags survive so coalescing continues until the guest acknowledges.
    pub fn set_interrupt(&mut self, interrupt: Interrupt) {
        if self.asserted.any() {
            self.interrupt.lower();
        }
        self.asserted = PendingFlags::default();
        self.interrupt = interrupt;
    }

    pub fn reset(&mut self) {
        if self.asserted.any() {
            self.interrupt.lower();
        }
        self.asserted = PendingFlags::default();
        self.pending = PendingFlags::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::irq::{IrqLine, MsiMessage, MsiTrigger};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    /// Level line that records its level and how many times it was driven.
    #[derive(Clone, Default)]
    struct TestLine {
        level: Arc<AtomicBool>,
        writes: Arc<AtomicUsize>,
    }

    impl IrqLine for TestLine {
        fn set_level(&self, high: bool) {
            self.level.store(high, Ordering::SeqCst);
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Clone, Default)]
    struct TestMsi(Arc<Mutex<Vec<MsiMessage>>>);

    impl MsiTrigger for TestMsi {
        fn trigger_msi(&mut self, message: MsiMessage) {
            self.0.lock().unwrap().push(message);
        }
    }

    fn level_controller() -> (NotificationController, TestLine) {
        let line = TestLine::default();
        (
            NotificationController::new(Interrupt::level(line.clone())),
            line,
        )
    }

    #[test]
    fn notify_without_request_changes_nothing() {
        let (mut ctl, line) = level_controller();
        assert_eq!(
            ctl.notify(Direction::Outbound, false),
            NotifyOutcome::NotRequested
        );
        assert_eq!(ctl.pending(), PendingFlags::default());
        assert_eq!(line.writes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn second_notify_is_coalesced_until_acknowledged() {
        let (mut ctl, line) = level_controller();
        assert_eq!(ctl.notify(Direction::Outbound, true), NotifyOutcome::Raised);
        assert_eq!(ctl.notify(Direction::Outbound, true), NotifyOutcome::Coalesced);
        assert_eq!(line.writes.load(Ordering::SeqCst), 1);
        assert!(line.level.load(Ordering::SeqCst));

        assert_eq!(ctl.acknowledge(0b01), Some(Direction::Outbound));
        assert!(!line.level.load(Ordering::SeqCst));
        assert_eq!(ctl.notify(Direction::Outbound, true), NotifyOutcome::Raised);
    }

    #[test]
    fn acknowledge_bit0_takes_priority_over_bit1() {
        let (mut ctl, _line) = level_controller();
        ctl.notify(Direction::Outbound, true);
        ctl.notify(Direction::Inbound, true);

        assert_eq!(ctl.acknowledge(0b11), Some(Direction::Outbound));
        assert_eq!(
            ctl.pending(),
            PendingFlags {
                outbound: false,
                inbound: true
            }
        );
    }

    #[test]
    fn acknowledge_of_clear_flag_does_not_touch_the_line() {
        let (mut ctl, line) = level_controller();
        ctl.notify(Direction::Inbound, true);
        let writes = line.writes.load(Ordering::SeqCst);

        // bit0 matches first even though only inbound is pending.
        assert_eq!(ctl.acknowledge(0b11), None);
        assert_eq!(ctl.acknowledge(0b01), None);
        assert_eq!(ctl.acknowledge(0), None);
        assert_eq!(ctl.acknowledge(0b100), None);
        assert_eq!(line.writes.load(Ordering::SeqCst), writes);
        assert!(ctl.pending().inbound);
    }

    #[test]
    fn shared_level_line_stays_high_until_both_directions_are_acknowledged() {
        let (mut ctl, line) = level_controller();
        ctl.notify(Direction::Outbound, true);
        ctl.notify(Direction::Inbound, true);

        ctl.acknowledge(0b01);
        assert!(line.level.load(Ordering::SeqCst));
        assert!(ctl.irq_level());

        ctl.acknowledge(0b10);
        assert!(!line.level.load(Ordering::SeqCst));
        assert!(!ctl.irq_level());
    }

    #[test]
    fn message_mode_sends_one_message_per_raise() {
        let msi = TestMsi::default();
        let message = MsiMessage {
            address: 0xFEE0_0000,
            data: 0x41,
        };
        let mut ctl = NotificationController::new(Interrupt::message(msi.clone(), message));

        ctl.notify(Direction::Outbound, true);
        ctl.notify(Direction::Outbound, true);
        ctl.notify(Direction::Inbound, true);
        assert!(!ctl.irq_level());
        assert_eq!(msi.0.lock().unwrap().as_slice(), &[message, message]);
        assert_eq!(message.vector(), 0x41);
    }

    #[test]
    fn switching_interrupt_lowers_asserted_line_and_keeps_pending() {
        let (mut ctl, line) = level_controller();
        ctl.notify(Direction::Inbound, true);
        assert!(line.level.load(Ordering::SeqCst));

        let msi = TestMsi::default();
        ctl.set_interrupt(Interrupt::message(msi.clone(), MsiMessage::default()));
        assert!(!line.level.load(Ordering::SeqCst));
        assert!(ctl.pending().inbound);

        // Still coalesced until the guest acknowledges.
        assert_eq!(ctl.notify(Direction::Inbound, true), NotifyOutcome::Coalesced);
        assert!(msi.0.lock().unwrap().is_empty());
    }

    #[test]
    fn reset_clears_pending_and_lowers_line() {
        let (mut ctl, line) = level_controller();
        ctl.notify(Direction::Outbound, true);
        ctl.reset();
        assert_eq!(ctl.pending(), PendingFlags::default());
        assert!(!line.level.load(Ordering::SeqCst));
    }
}
