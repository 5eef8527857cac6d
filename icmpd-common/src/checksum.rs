//! One's-complement checksum helpers for the IPv4 header.

use crate::{IPV4_CHECK_OFF, IPV4_HLEN};

/// Fold a 32-bit one's-complement sum to 16 bits.
///
/// Two rounds of end-around carry are enough for any `u32`, which keeps the
/// loop bound static for the eBPF verifier.
#[inline(always)]
pub fn csum_fold(sum: u32) -> u16 {
    let sum = (sum & 0xffff) + (sum >> 16);
    let sum = (sum & 0xffff) + (sum >> 16);
    sum as u16
}

/// Update a header checksum after a 32-bit field changed from `from` to `to`
/// (RFC 1624, eqn. 3: `HC' = ~(~HC + ~m + m')`, applied per 16-bit word).
///
/// `check` and the result are the checksum as read from the wire (big endian).
#[inline(always)]
pub fn csum_replace4(check: u16, from: [u8; 4], to: [u8; 4]) -> u16 {
    let mut sum = u32::from(!check);
    sum += u32::from(!u16::from_be_bytes([from[0], from[1]]));
    sum += u32::from(!u16::from_be_bytes([from[2], from[3]]));
    sum += u32::from(u16::from_be_bytes([to[0], to[1]]));
    sum += u32::from(u16::from_be_bytes([to[2], to[3]]));
    !csum_fold(sum)
}

/// Compute the IPv4 header checksum from scratch.
///
/// The header length comes from the IHL field, bounded by the slice. The
/// checksum field itself is skipped.
pub fn ipv4_header_checksum(header: &[u8]) -> u16 {
    let ihl = header.first().map_or(IPV4_HLEN, |b| usize::from(b & 0x0f) * 4);
    let len = ihl.min(header.len());

    let mut sum: u32 = 0;
    let mut i = 0;
    while i + 1 < len {
        if i != IPV4_CHECK_OFF {
            sum += u32::from(u16::from_be_bytes([header[i], header[i + 1]]));
        }
        i += 2;
    }

    !csum_fold(sum)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20-byte header from RFC 1071 style examples: 45 00 00 73 00 00 40 00 40 11
    /// .. .. c0 a8 00 01 c0 a8 00 c7, checksum b8 61.
    const HEADER: [u8; 20] = [
        0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0xb8, 0x61, 0xc0, 0xa8,
        0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
    ];

    fn with_saddr(mut header: [u8; 20], saddr: [u8; 4]) -> [u8; 20] {
        header[12..16].copy_from_slice(&saddr);
        let check = ipv4_header_checksum(&header);
        header[10..12].copy_from_slice(&check.to_be_bytes());
        header
    }

    #[test]
    fn test_full_checksum_known_header() {
        assert_eq!(ipv4_header_checksum(&HEADER), 0xb861);
    }

    #[test]
    fn test_fold_handles_max_input() {
        assert_eq!(csum_fold(u32::MAX), 0xffff);
        assert_eq!(csum_fold(0x0001_fffe), 0xffff);
        assert_eq!(csum_fold(0x0001_0000), 0x0001);
        assert_eq!(csum_fold(0), 0);
    }

    #[test]
    fn test_replace4_matches_full_recompute() {
        let samples: [[u8; 4]; 8] = [
            [10, 0, 0, 5],
            [198, 51, 100, 7],
            [0, 0, 0, 0],
            [255, 255, 255, 255],
            [0, 0, 255, 255],
            [255, 255, 0, 0],
            [192, 168, 0, 1],
            [0x80, 0x01, 0x7f, 0xfe],
        ];

        for old in samples {
            for new in samples {
                let before = with_saddr(HEADER, old);
                let expected = with_saddr(HEADER, new);
                let check = u16::from_be_bytes([before[10], before[11]]);
                let updated = csum_replace4(check, old, new);
                assert_eq!(
                    updated.to_be_bytes(),
                    [expected[10], expected[11]],
                    "{:?} -> {:?}",
                    old,
                    new
                );
            }
        }
    }

    #[test]
    fn test_replace4_identity_keeps_checksum() {
        let check = csum_replace4(0xb861, [192, 168, 0, 1], [192, 168, 0, 1]);
        assert_eq!(check, 0xb861);
    }

    #[test]
    fn test_full_checksum_respects_ihl_and_slice() {
        // IHL says 24 bytes but only 20 are present.
        let mut header = HEADER;
        header[0] = 0x46;
        let short = ipv4_header_checksum(&header);

        let mut long = [0u8; 24];
        long[..20].copy_from_slice(&header);
        assert_eq!(ipv4_header_checksum(&long), short);
    }
}
