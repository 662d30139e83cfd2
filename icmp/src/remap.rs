// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Identifier remapping between the tap-observed echo id and the
//! kernel-assigned id a ping socket actually uses.

use net::icmp::{Icmp4, Icmp6, IcmpError};

/// Rewrite an inbound echo reply's id from the kernel-assigned value back
/// to the tap-observed one before forwarding.
///
/// # Errors
///
/// Returns [`IcmpError::NotEcho`] if `reply` is not an echo reply.
pub fn rewrite_reply_id_v4(reply: &mut Icmp4, tap_id: u16) -> Result<(), IcmpError> {
    reply.set_echo_id(tap_id)
}

/// IPv6 counterpart of [`rewrite_reply_id_v4`].
///
/// # Errors
///
/// Returns [`IcmpError::NotEcho`] if `reply` is not an echo reply.
pub fn rewrite_reply_id_v6(reply: &mut Icmp6, tap_id: u16) -> Result<(), IcmpError> {
    reply.set_echo_id(tap_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_echo_reply_id() {
        let mut reply = Icmp4::echo_reply(0xbeef, 1);
        rewrite_reply_id_v4(&mut reply, 0x1234).unwrap();
        assert_eq!(reply.echo_id_seq().unwrap().0, 0x1234);
    }
}
