// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Timer scheduling (§4.3 Timer semantics): deadlines are a pure function
//! of `events`/`flags`; firing decides a pure [`TimerAction`] that the
//! engine then carries out.

use crate::constants::{ACK_INTERVAL, ACK_TIMEOUT, ACTIVITY_TIMEOUT, FIN_TIMEOUT, MAX_RETRANS, SYN_TIMEOUT};
use flow::{TcpEvents, TcpFlags};
use std::time::Duration;

/// The next deadline for a connection's timer, given its current
/// `events`/`flags` (§4.3 Timer semantics table, evaluated top to bottom).
#[must_use]
pub fn next_deadline(events: TcpEvents, flags: TcpFlags) -> Duration {
    if flags.contains(TcpFlags::ACK_TO_TAP_DUE) {
        ACK_INTERVAL
    } else if flags.contains(TcpFlags::ACK_FROM_TAP_DUE) && !events.contains(TcpEvents::ESTABLISHED) {
        SYN_TIMEOUT
    } else if flags.contains(TcpFlags::ACK_FROM_TAP_DUE) {
        ACK_TIMEOUT
    } else if events.contains(TcpEvents::SOCK_FIN_SENT) && events.contains(TcpEvents::TAP_FIN_ACKED) {
        FIN_TIMEOUT
    } else {
        ACTIVITY_TIMEOUT
    }
}

/// What the engine should do when a connection's timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerAction {
    /// Send an ACK if one is still owed, then reschedule.
    SendPendingAck,
    /// Roll `seq_to_tap` back to `seq_ack_from_tap` and retransmit.
    Retransmit,
    /// Give up: reset the connection.
    Reset,
    /// Deadline already passed (a reschedule raced the timer); ignore.
    Stale,
}

/// Decide the action for a timer firing at `now`, given the deadline it was
/// armed for (`armed_deadline`, relative to the same clock as `now`) and
/// the connection's current state.
#[must_use]
pub fn on_fire(
    now: Duration,
    armed_deadline: Duration,
    events: TcpEvents,
    flags: TcpFlags,
    retrans: u8,
) -> TimerAction {
    if now < armed_deadline {
        return TimerAction::Stale;
    }
    if flags.contains(TcpFlags::ACK_TO_TAP_DUE) {
        return TimerAction::SendPendingAck;
    }
    if flags.contains(TcpFlags::ACK_FROM_TAP_DUE) {
        let pre_established = !events.contains(TcpEvents::ESTABLISHED);
        let pre_fin_wait = !events.contains(TcpEvents::SOCK_FIN_SENT);
        if pre_established || pre_fin_wait || retrans >= MAX_RETRANS {
            return TimerAction::Reset;
        }
        return TimerAction::Retransmit;
    }
    TimerAction::Reset
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_to_tap_due_takes_priority() {
        let events = TcpEvents::ESTABLISHED;
        let flags = TcpFlags::ACK_TO_TAP_DUE | TcpFlags::ACK_FROM_TAP_DUE;
        assert_eq!(next_deadline(events, flags), ACK_INTERVAL);
    }

    #[test]
    fn pre_established_ack_wait_uses_syn_timeout() {
        let events = TcpEvents::TAP_SYN_RCVD;
        let flags = TcpFlags::ACK_FROM_TAP_DUE;
        assert_eq!(next_deadline(events, flags), SYN_TIMEOUT);
    }

    #[test]
    fn fin_sent_and_acked_uses_fin_timeout() {
        let events = TcpEvents::ESTABLISHED | TcpEvents::SOCK_FIN_SENT | TcpEvents::TAP_FIN_ACKED;
        assert_eq!(next_deadline(events, TcpFlags::empty()), FIN_TIMEOUT);
    }

    #[test]
    fn idle_established_uses_activity_timeout() {
        assert_eq!(
            next_deadline(TcpEvents::ESTABLISHED, TcpFlags::empty()),
            ACTIVITY_TIMEOUT
        );
    }

    #[test]
    fn stale_fire_before_deadline_is_ignored() {
        let action = on_fire(
            Duration::from_secs(1),
            Duration::from_secs(5),
            TcpEvents::ESTABLISHED,
            TcpFlags::ACK_TO_TAP_DUE,
            0,
        );
        assert_eq!(action, TimerAction::Stale);
    }

    #[test]
    fn ack_from_tap_due_pre_established_resets() {
        let action = on_fire(
            Duration::from_secs(10),
            Duration::from_secs(10),
            TcpEvents::TAP_SYN_RCVD,
            TcpFlags::ACK_FROM_TAP_DUE,
            0,
        );
        assert_eq!(action, TimerAction::Reset);
    }

    #[test]
    fn ack_from_tap_due_established_retransmits_until_max() {
        let events = TcpEvents::ESTABLISHED | TcpEvents::SOCK_FIN_SENT;
        let action = on_fire(
            Duration::from_secs(10),
            Duration::from_secs(10),
            events,
            TcpFlags::ACK_FROM_TAP_DUE,
            MAX_RETRANS - 1,
        );
        assert_eq!(action, TimerAction::Retransmit);

        let gives_up = on_fire(
            Duration::from_secs(10),
            Duration::from_secs(10),
            events,
            TcpFlags::ACK_FROM_TAP_DUE,
            MAX_RETRANS,
        );
        assert_eq!(gives_up, TimerAction::Reset);
    }
}
