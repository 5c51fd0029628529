//! Wire format for the transfer protocol.
//!
//! ```text
//! [0..4]    seq_num (u32 BE)
//! [4..8]    ack_num (u32 BE)
//! [8..10]   flags (u16 BE): SYN=1, ACK=2, FIN=4
//! [10..12]  window_size (u16 BE)
//! [12..14]  data_len (u16 BE)
//! [14..16]  checksum (u16 BE)
//! [16..20]  reserved, always zero (receivers reject otherwise)
//! [20..]    payload (up to 1480 bytes)
//! ```
//!
//! 20-byte header + up to 1480 bytes payload = 1500 bytes max, one Ethernet
//! MTU. All multi-byte fields are big-endian; the layout never depends on
//! host struct packing.
//!
//! The checksum is the classic one's-complement fold: sum header and payload
//! as 16-bit big-endian words with the checksum field zeroed (an odd trailing
//! byte is padded on the right), fold carries out of bit 16 back in, then
//! store the complement. The sum is additive, not cryptographic; a pair of
//! bit flips that cancels in it goes undetected.

use std::fmt;

use thiserror::Error;

/// Largest datagram either side ever sends or expects.
pub const MAX_DATAGRAM: usize = 1500;

/// Bytes of header at the front of every datagram.
pub const HEADER_LEN: usize = 20;

/// Largest payload per packet.
pub const MAX_PAYLOAD: usize = MAX_DATAGRAM - HEADER_LEN;

/// Packet flag bits. Freely combinable; SYN|ACK and ACK|FIN appear during
/// connection setup and teardown.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u16);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const SYN: Flags = Flags(1);
    pub const ACK: Flags = Flags(1 << 1);
    pub const FIN: Flags = Flags(1 << 2);

    pub fn from_bits(bits: u16) -> Flags {
        Flags(bits)
    }

    pub fn bits(self) -> u16 {
        self.0
    }

    /// True when every bit of `other` is set in `self`.
    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

impl fmt::Debug for Flags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in [(Flags::SYN, "SYN"), (Flags::ACK, "ACK"), (Flags::FIN, "FIN")] {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        let unknown = self.0 & !(Flags::SYN.0 | Flags::ACK.0 | Flags::FIN.0);
        if unknown != 0 {
            if !first {
                f.write_str("|")?;
            }
            write!(f, "{unknown:#06x}")?;
        }
        Ok(())
    }
}

/// Why a datagram failed to decode.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("datagram of {0} bytes is shorter than the 20-byte header")]
    TooShort(usize),
    #[error("data_len {0} exceeds the 1480-byte payload limit")]
    PayloadTooLong(usize),
    #[error("datagram length {actual} does not match header + data_len = {expected}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("reserved header bytes are not zero")]
    ReservedNonzero,
}

/// One protocol packet. `data_len` on the wire is always `payload.len()`;
/// the stored `checksum` is whatever the wire carried (or zero for a packet
/// built locally that has not been through [`Packet::encode`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq_num: u32,
    pub ack_num: u32,
    pub flags: Flags,
    pub window_size: u16,
    pub checksum: u16,
    pub payload: Vec<u8>,
}

impl Packet {
    /// A payload-bearing packet. Data packets carry no flags; `ack_num` is
    /// unused and left zero.
    pub fn data(seq_num: u32, window_size: u16, payload: Vec<u8>) -> Packet {
        Packet {
            seq_num,
            ack_num: 0,
            flags: Flags::NONE,
            window_size,
            checksum: 0,
            payload,
        }
    }

    /// A payload-less control packet (SYN, ACK, FIN and their combinations).
    pub fn control(flags: Flags, seq_num: u32, ack_num: u32) -> Packet {
        Packet {
            seq_num,
            ack_num,
            flags,
            window_size: 0,
            checksum: 0,
            payload: Vec::new(),
        }
    }

    /// Compute the checksum over header and payload, with the checksum field
    /// treated as zero. Ignores the stored `checksum`.
    pub fn compute_checksum(&self) -> u16 {
        let mut header = [0u8; HEADER_LEN];
        self.write_header(&mut header, 0);
        let mut sum = sum_be_words(&header, 0);
        sum = sum_be_words(&self.payload, sum);
        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        !(sum as u16)
    }

    /// True when the stored checksum matches the packet contents.
    pub fn verify(&self) -> bool {
        self.compute_checksum() == self.checksum
    }

    /// Serialize for the wire. The checksum is always computed fresh, so a
    /// locally built packet needs no separate sealing step.
    ///
    /// # Panics
    /// Panics if the payload exceeds [`MAX_PAYLOAD`].
    pub fn encode(&self) -> Vec<u8> {
        assert!(self.payload.len() <= MAX_PAYLOAD);
        let checksum = self.compute_checksum();
        let mut header = [0u8; HEADER_LEN];
        self.write_header(&mut header, checksum);
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.extend_from_slice(&header);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// Parse a received datagram. Validates lengths only; checksum
    /// verification is a separate step so the handshake can skip it.
    pub fn decode(buf: &[u8]) -> Result<Packet, PacketError> {
        if buf.len() < HEADER_LEN {
            return Err(PacketError::TooShort(buf.len()));
        }
        let seq_num = u32::from_be_bytes(buf[0..4].try_into().unwrap());
        let ack_num = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let flags = Flags::from_bits(u16::from_be_bytes(buf[8..10].try_into().unwrap()));
        let window_size = u16::from_be_bytes(buf[10..12].try_into().unwrap());
        let data_len = u16::from_be_bytes(buf[12..14].try_into().unwrap()) as usize;
        let checksum = u16::from_be_bytes(buf[14..16].try_into().unwrap());

        if buf[16..HEADER_LEN].iter().any(|&b| b != 0) {
            return Err(PacketError::ReservedNonzero);
        }
        if data_len > MAX_PAYLOAD {
            return Err(PacketError::PayloadTooLong(data_len));
        }
        let expected = HEADER_LEN + data_len;
        if buf.len() != expected {
            return Err(PacketError::LengthMismatch {
                expected,
                actual: buf.len(),
            });
        }

        Ok(Packet {
            seq_num,
            ack_num,
            flags,
            window_size,
            checksum,
            payload: buf[HEADER_LEN..].to_vec(),
        })
    }

    fn write_header(&self, buf: &mut [u8; HEADER_LEN], checksum: u16) {
        buf[0..4].copy_from_slice(&self.seq_num.to_be_bytes());
        buf[4..8].copy_from_slice(&self.ack_num.to_be_bytes());
        buf[8..10].copy_from_slice(&self.flags.bits().to_be_bytes());
        buf[10..12].copy_from_slice(&self.window_size.to_be_bytes());
        buf[12..14].copy_from_slice(&(self.payload.len() as u16).to_be_bytes());
        buf[14..16].copy_from_slice(&checksum.to_be_bytes());
        // bytes 16..20 reserved, left zero
    }
}

/// Accumulate big-endian 16-bit words into `acc`. An odd trailing byte is
/// padded on the right. Safe to call per-section as long as every earlier
/// section had even length.
fn sum_be_words(bytes: &[u8], acc: u32) -> u32 {
    let mut sum = acc;
    let mut words = bytes.chunks_exact(2);
    for word in &mut words {
        sum += u32::from(u16::from_be_bytes([word[0], word[1]]));
    }
    if let [last] = words.remainder() {
        sum += u32::from(*last) << 8;
    }
    sum
}
