//! Packet-level classification and completion
//!
//! Tracks both directions' accumulated packet types between transaction
//! boundaries. A packet closes when both directions have signaled since the
//! last boundary, or immediately when the host direction signals a cancel.
//! Also owns the budget for excess-clocking diagnostics.

use crate::decoder::frame::PacketSummary;
use crate::protocol::{Direction, PacketType};

/// Result of feeding one direction signal into the classifier.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SignalOutcome {
    /// Waiting for the other direction.
    Pending,
    /// The packet closed; state has been reset for the next one.
    Completed(PacketSummary),
}

#[derive(Debug)]
pub(crate) struct PacketClassifier {
    mosi_ready: bool,
    miso_ready: bool,
    mosi_type: PacketType,
    miso_type: PacketType,
    alerts_remaining: i32,
}

impl PacketClassifier {
    /// `alert_limit` bounds excess-clocking diagnostics; negative means
    /// unlimited.
    pub(crate) fn new(alert_limit: i32) -> Self {
        Self {
            mosi_ready: false,
            miso_ready: false,
            mosi_type: PacketType::Empty,
            miso_type: PacketType::Empty,
            alerts_remaining: alert_limit,
        }
    }

    /// Feed a direction's packet-type signal.
    pub(crate) fn signal(
        &mut self,
        direction: Direction,
        ptype: PacketType,
        end_sample: u64,
    ) -> SignalOutcome {
        match direction {
            Direction::Mosi => {
                self.mosi_ready = true;
                self.mosi_type = self.mosi_type.merge(ptype);
            }
            Direction::Miso => {
                self.miso_ready = true;
                self.miso_type = self.miso_type.merge(ptype);
            }
        }

        let cancelled = direction == Direction::Mosi && ptype == PacketType::Cancel;
        if cancelled || (self.mosi_ready && self.miso_ready) {
            let summary = PacketSummary {
                end: end_sample,
                mosi: self.mosi_type,
                miso: self.miso_type,
                marker: PacketType::combined(self.mosi_type, self.miso_type),
                cancelled,
            };
            self.reset_packet();
            SignalOutcome::Completed(summary)
        } else {
            SignalOutcome::Pending
        }
    }

    /// Whether an excess-clocking diagnostic may still be reported. Each
    /// `true` consumes one unit of the budget.
    pub(crate) fn take_clocking_alert(&mut self) -> bool {
        if self.alerts_remaining < 0 {
            return true;
        }
        if self.alerts_remaining == 0 {
            return false;
        }
        self.alerts_remaining -= 1;
        true
    }

    fn reset_packet(&mut self) {
        self.mosi_ready = false;
        self.miso_ready = false;
        self.mosi_type = PacketType::Empty;
        self.miso_type = PacketType::Empty;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_completes_only_when_both_directions_signal() {
        let mut classifier = PacketClassifier::new(-1);

        assert_eq!(
            classifier.signal(Direction::Mosi, PacketType::Command, 100),
            SignalOutcome::Pending
        );
        let outcome = classifier.signal(Direction::Miso, PacketType::Empty, 110);
        match outcome {
            SignalOutcome::Completed(summary) => {
                assert_eq!(summary.mosi, PacketType::Command);
                assert_eq!(summary.miso, PacketType::Empty);
                assert_eq!(summary.marker, PacketType::Command);
                assert!(!summary.cancelled);
                assert_eq!(summary.end, 110);
            }
            SignalOutcome::Pending => panic!("expected completion"),
        }
    }

    #[test]
    fn host_cancel_force_completes() {
        let mut classifier = PacketClassifier::new(-1);
        let outcome = classifier.signal(Direction::Mosi, PacketType::Cancel, 42);
        match outcome {
            SignalOutcome::Completed(summary) => {
                assert!(summary.cancelled);
                assert_eq!(summary.marker, PacketType::Cancel);
            }
            SignalOutcome::Pending => panic!("cancel must force-complete"),
        }
    }

    #[test]
    fn module_cancel_does_not_force_complete() {
        let mut classifier = PacketClassifier::new(-1);
        assert_eq!(
            classifier.signal(Direction::Miso, PacketType::Cancel, 42),
            SignalOutcome::Pending
        );
    }

    #[test]
    fn repeat_signals_merge_within_a_packet() {
        let mut classifier = PacketClassifier::new(-1);
        // A direction may signal more than once before the packet closes
        // (e.g. a cancelled attempt followed by a completed transaction).
        classifier.signal(Direction::Mosi, PacketType::Command, 10);
        classifier.signal(Direction::Mosi, PacketType::Response, 20);
        let outcome = classifier.signal(Direction::Miso, PacketType::Empty, 30);
        match outcome {
            SignalOutcome::Completed(summary) => {
                assert_eq!(summary.mosi, PacketType::MultiEvent);
            }
            SignalOutcome::Pending => panic!("expected completion"),
        }
    }

    #[test]
    fn state_resets_between_packets() {
        let mut classifier = PacketClassifier::new(-1);
        classifier.signal(Direction::Mosi, PacketType::ChecksumError, 10);
        classifier.signal(Direction::Miso, PacketType::Empty, 20);

        classifier.signal(Direction::Mosi, PacketType::Command, 30);
        let outcome = classifier.signal(Direction::Miso, PacketType::Empty, 40);
        match outcome {
            SignalOutcome::Completed(summary) => {
                assert_eq!(summary.mosi, PacketType::Command);
                assert_eq!(summary.marker, PacketType::Command);
            }
            SignalOutcome::Pending => panic!("expected completion"),
        }
    }

    #[test]
    fn clocking_alert_budget_is_consumed() {
        let mut classifier = PacketClassifier::new(2);
        assert!(classifier.take_clocking_alert());
        assert!(classifier.take_clocking_alert());
        assert!(!classifier.take_clocking_alert());

        let mut unlimited = PacketClassifier::new(-1);
        for _ in 0..100 {
            assert!(unlimited.take_clocking_alert());
        }
    }
}
