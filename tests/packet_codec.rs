//! Property tests for the DCC packet codec

use proptest::prelude::*;
use rs_dcc::packet::{
    AddressKind, Command, FunctionGroup, Packet, SvcInstruction, ADDRESS_MAX, ADDRESS_MIN,
    ADDRESS_SHORT_MAX, CV_NUM_MAX, CV_NUM_MIN, FUNCTION_MAX, MSG_MAX, SPEED_MAX, SPEED_MIN,
};

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

fn address() -> impl Strategy<Value = u16> {
    ADDRESS_MIN..=ADDRESS_MAX
}

fn cv_num() -> impl Strategy<Value = u16> {
    CV_NUM_MIN..=CV_NUM_MAX
}

// ============================================================================
// Builders
// ============================================================================

proptest! {
    #[test]
    fn speed_packets_are_well_formed(adrs in address(), speed in SPEED_MIN..=SPEED_MAX) {
        let pkt = Packet::speed128(adrs, speed);
        let bytes = pkt.as_bytes();

        prop_assert!(pkt.checksum_ok());
        prop_assert_eq!(xor(bytes), 0);
        prop_assert_eq!(pkt.command(), Command::Speed128);
        prop_assert_eq!(pkt.address(), Some(adrs));
        prop_assert_eq!(pkt.speed(), speed);

        let expected_kind = if adrs <= ADDRESS_SHORT_MAX {
            AddressKind::Short
        } else {
            AddressKind::Long
        };
        prop_assert_eq!(pkt.address_kind(), expected_kind);
        prop_assert_eq!(pkt.len(), pkt.address_size() + 3);
    }

    #[test]
    fn set_speed_matches_fresh_packet(adrs in address(), a in SPEED_MIN..=SPEED_MAX, b in SPEED_MIN..=SPEED_MAX) {
        let mut pkt = Packet::speed128(adrs, a);
        pkt.set_speed(b);
        prop_assert_eq!(pkt, Packet::speed128(adrs, b));
    }

    #[test]
    fn readdressing_matches_fresh_packet(from in address(), to in address(), speed in SPEED_MIN..=SPEED_MAX) {
        let mut pkt = Packet::speed128(from, speed);
        let size = pkt.set_address(to);
        prop_assert_eq!(size, if to <= ADDRESS_SHORT_MAX { 1 } else { 2 });
        prop_assert_eq!(pkt, Packet::speed128(to, speed));
    }

    #[test]
    fn functions_land_in_their_group(adrs in address(), num in 0..=FUNCTION_MAX, on in any::<bool>()) {
        let group = FunctionGroup::of(num);
        let mut pkt = Packet::function_group(adrs, group, 0);
        pkt.set_function(num, on);

        prop_assert!(pkt.checksum_ok());
        prop_assert_eq!(pkt.command(), group.command());
        prop_assert_eq!(pkt.function_group_kind(), Some(group));
        prop_assert_eq!(pkt.address(), Some(adrs));
        for other in group.first()..=group.last() {
            prop_assert_eq!(pkt.function(other), on && other == num);
        }
    }

    #[test]
    fn function_bits_round_trip(adrs in address(), group_idx in 0..5usize, raw in any::<u8>()) {
        let group = FunctionGroup::ALL[group_idx];
        let bits = raw & group.mask();
        let pkt = Packet::function_group(adrs, group, bits);
        prop_assert_eq!(pkt.function_bits(), bits);
    }

    #[test]
    fn ops_cv_packets(adrs in address(), cv in cv_num(), val in any::<u8>()) {
        let pkt = Packet::ops_write_cv(adrs, cv, val);
        prop_assert!(pkt.checksum_ok());
        prop_assert_eq!(pkt.address(), Some(adrs));
        prop_assert_eq!(pkt.cv_num(), cv);
        prop_assert_eq!(pkt.cv_val(), val);
        prop_assert_eq!(pkt.len(), pkt.address_size() + 4);
    }

    #[test]
    fn service_packets_decode(cv in cv_num(), val in any::<u8>(), bit in 0u8..8, bit_val in any::<bool>()) {
        let cases = [
            (Packet::svc_write_cv(cv, val), SvcInstruction::WriteCv { cv_num: cv, cv_val: val }),
            (Packet::svc_verify_cv(cv, val), SvcInstruction::VerifyCv { cv_num: cv, cv_val: val }),
            (
                Packet::svc_write_bit(cv, bit, bit_val),
                SvcInstruction::WriteBit { cv_num: cv, bit_num: bit, bit_val },
            ),
            (
                Packet::svc_verify_bit(cv, bit, bit_val),
                SvcInstruction::VerifyBit { cv_num: cv, bit_num: bit, bit_val },
            ),
        ];
        for (pkt, instr) in cases {
            prop_assert_eq!(pkt.len(), 4);
            prop_assert!(pkt.checksum_ok());
            prop_assert!(Packet::is_svc_direct(pkt.as_bytes()));
            prop_assert_eq!(pkt.svc_instruction(), Some(instr));
            prop_assert_eq!(pkt.cv_num(), cv);
        }
    }
}

// ============================================================================
// Raw bytes and rendering
// ============================================================================

proptest! {
    #[test]
    fn checksum_detects_single_byte_corruption(
        adrs in address(),
        speed in SPEED_MIN..=SPEED_MAX,
        idx in 0usize..4,
        flip in 1u8..=255,
    ) {
        let pkt = Packet::speed128(adrs, speed);
        let mut bytes = pkt.as_bytes().to_vec();
        let idx = idx % bytes.len();
        bytes[idx] ^= flip;
        let bad = Packet::from_bytes(&bytes).unwrap();
        prop_assert!(!bad.checksum_ok());
    }

    #[test]
    fn any_bytes_render_without_panic(bytes in prop::collection::vec(any::<u8>(), 0..=MSG_MAX)) {
        let pkt = Packet::from_bytes(&bytes).unwrap();
        let shown = pkt.show().to_string();
        let dumped = pkt.dump().to_string();
        prop_assert!(!shown.is_empty());
        prop_assert!(dumped.starts_with('{') && dumped.ends_with('}'), "dump {}", dumped);
    }

    #[test]
    fn show_into_never_overruns(bytes in prop::collection::vec(any::<u8>(), 0..=MSG_MAX), cap in 0usize..48) {
        let pkt = Packet::from_bytes(&bytes).unwrap();
        let full = pkt.show().to_string();
        let mut buf = vec![0xaa_u8; cap + 4];

        let written = pkt.show_into(&mut buf[..cap]).len();
        prop_assert!(written < cap.max(1));
        prop_assert!(full.starts_with(&String::from_utf8_lossy(&buf[..written]).into_owned()));
        if cap > 0 {
            prop_assert_eq!(buf[written], 0);
        }
        // bytes past the slice are untouched
        prop_assert!(buf[cap..].iter().all(|&b| b == 0xaa));
    }
}

#[test]
fn too_many_bytes_rejected() {
    assert!(Packet::from_bytes(&[0; MSG_MAX + 1]).is_none());
}

#[test]
fn show_examples() {
    assert_eq!(Packet::speed128(3, 64).show().to_string(), "   3: fwd 64/128");
    assert_eq!(Packet::speed128(1234, -5).show().to_string(), "1234: rev 5/128");
    assert_eq!(Packet::idle().show().to_string(), "      idle");
    assert_eq!(Packet::reset().show().to_string(), "   0: reset");
    assert_eq!(
        Packet::svc_write_cv(29, 0x06).show().to_string(),
        "svc: write cv29=0x06"
    );
}
