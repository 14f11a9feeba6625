//! DCC packet codec.
//!
//! A [`Packet`] is the flat byte image of one DCC packet: address, instruction
//! bytes, and a trailing XOR checksum, at most [`MSG_MAX`] bytes in total.
//! Every packet kind shares this representation; constructors build a kind,
//! accessors read its fields back, and setters rewrite a single field while
//! keeping the checksum valid.
//!
//! # Packet kinds
//!
//! | Kind | Bytes |
//! |------|-------|
//! | idle | `ff 00 ff` |
//! | reset | `00 00 00` |
//! | 128-step speed | `adrs 3f speed xor` |
//! | function group | `adrs instr [data] xor` |
//! | ops CV write | `adrs ec+cv_hi cv_lo val xor` |
//! | service direct | `7c+cv_hi cv_lo val xor` (no address) |
//!
//! Addresses 1-127 take one byte; 128-10239 take two (`0xC0 | hi`, `lo`).
//! CV numbers are 1-based in the API and 0-based on the wire.
//!
//! Out-of-range arguments are programming errors and panic. Decoding for
//! display never panics: malformed packets render a partial description and
//! a hex dump.
//!
//! # Example
//!
//! ```rust
//! use rs_dcc::packet::{Command, Packet};
//!
//! let mut pkt = Packet::speed128(3, 64);
//! assert_eq!(pkt.as_bytes(), &[0x03, 0x3f, 0xc0, 0xfc]);
//! assert_eq!(pkt.command(), Command::Speed128);
//!
//! pkt.set_speed(-10);
//! assert_eq!(pkt.speed(), -10);
//! assert!(pkt.checksum_ok());
//! ```

use core::fmt;

use crate::text;

/// Longest packet the codec can hold, checksum included.
pub const MSG_MAX: usize = 8;

/// Lowest constructible locomotive address.
pub const ADDRESS_MIN: u16 = 1;
/// Highest constructible locomotive address.
pub const ADDRESS_MAX: u16 = 10239;
/// Highest address that fits the one-byte short form.
pub const ADDRESS_SHORT_MAX: u16 = 127;

/// Full reverse on the 128-step scale.
pub const SPEED_MIN: i8 = -127;
/// Full forward on the 128-step scale.
pub const SPEED_MAX: i8 = 127;

/// Highest function number carried by the five function groups.
pub const FUNCTION_MAX: u8 = 28;

/// Lowest CV number.
pub const CV_NUM_MIN: u16 = 1;
/// Highest CV number.
pub const CV_NUM_MAX: u16 = 1024;

/// Preamble length in operations mode.
pub const OPS_PREAMBLE_BITS: u8 = 14;
/// Preamble length in service mode.
pub const SVC_PREAMBLE_BITS: u8 = 20;

const INSTR_RESET: u8 = 0x00;
const INSTR_SPEED_128: u8 = 0x3f;
const INSTR_F0: u8 = 0x80;
const INSTR_F5: u8 = 0xb0;
const INSTR_F9: u8 = 0xa0;
const INSTR_F13: u8 = 0xde;
const INSTR_F21: u8 = 0xdf;
const INSTR_OPS_WRITE_BIT: u8 = 0xe8;
const INSTR_OPS_WRITE_CV: u8 = 0xec;

const SVC_VERIFY_CV: u8 = 0x74;
const SVC_BIT: u8 = 0x78;
const SVC_WRITE_CV: u8 = 0x7c;

// bit manipulation data byte: 111K DBBB
const BIT_WRITE: u8 = 0xf0;
const BIT_VERIFY: u8 = 0xe0;

// ============================================================================
// Classification
// ============================================================================

/// What the first byte of a packet says about its address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressKind {
    /// `0`: every multi-function decoder.
    Broadcast,
    /// `1..=127`: one-byte multi-function address.
    Short,
    /// `128..=191`: accessory decoder, address spread over two bytes.
    Accessory,
    /// `192..=231`: two-byte multi-function address.
    Long,
    /// `232..=252`: reserved by the standard.
    Reserved,
    /// `253..=254`: advanced extended packet.
    Extended,
    /// `255`: idle packet.
    Idle,
}

impl AddressKind {
    /// Classifies the first byte of a packet.
    pub const fn of(b0: u8) -> Self {
        match b0 {
            0 => Self::Broadcast,
            1..=127 => Self::Short,
            128..=191 => Self::Accessory,
            192..=231 => Self::Long,
            232..=252 => Self::Reserved,
            253..=254 => Self::Extended,
            255 => Self::Idle,
        }
    }

    /// Whether a multi-function instruction can follow.
    pub const fn is_multi_function(self) -> bool {
        matches!(self, Self::Broadcast | Self::Short | Self::Long)
    }
}

/// Instruction carried by a multi-function packet.
///
/// Only the instructions a refresh list cares about are told apart; CV
/// access and anything else is [`Command::Unknown`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Command {
    /// Decoder reset (`0x00`).
    Reset,
    /// 128-step speed and direction.
    Speed128,
    /// Function group one: F0-F4.
    Func0to4,
    /// Function group two, upper half: F5-F8.
    Func5to8,
    /// Function group two, lower half: F9-F12.
    Func9to12,
    /// Feature expansion: F13-F20.
    Func13to20,
    /// Feature expansion: F21-F28.
    Func21to28,
    /// Anything else.
    Unknown,
}

/// The five function groups a locomotive refresh cycles through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum FunctionGroup {
    /// F0-F4.
    F0to4,
    /// F5-F8.
    F5to8,
    /// F9-F12.
    F9to12,
    /// F13-F20.
    F13to20,
    /// F21-F28.
    F21to28,
}

impl FunctionGroup {
    /// All groups in refresh order.
    pub const ALL: [FunctionGroup; 5] = [
        Self::F0to4,
        Self::F5to8,
        Self::F9to12,
        Self::F13to20,
        Self::F21to28,
    ];

    /// The group carrying function `num`.
    ///
    /// # Panics
    ///
    /// If `num > FUNCTION_MAX`.
    pub fn of(num: u8) -> Self {
        assert!(num <= FUNCTION_MAX, "function F{num} out of range");
        match num {
            0..=4 => Self::F0to4,
            5..=8 => Self::F5to8,
            9..=12 => Self::F9to12,
            13..=20 => Self::F13to20,
            _ => Self::F21to28,
        }
    }

    /// Position in [`FunctionGroup::ALL`].
    pub const fn index(self) -> usize {
        match self {
            Self::F0to4 => 0,
            Self::F5to8 => 1,
            Self::F9to12 => 2,
            Self::F13to20 => 3,
            Self::F21to28 => 4,
        }
    }

    /// Lowest function number in the group.
    pub const fn first(self) -> u8 {
        match self {
            Self::F0to4 => 0,
            Self::F5to8 => 5,
            Self::F9to12 => 9,
            Self::F13to20 => 13,
            Self::F21to28 => 21,
        }
    }

    /// Highest function number in the group.
    pub const fn last(self) -> u8 {
        match self {
            Self::F0to4 => 4,
            Self::F5to8 => 8,
            Self::F9to12 => 12,
            Self::F13to20 => 20,
            Self::F21to28 => 28,
        }
    }

    /// Bits of the group's data byte that carry function state.
    pub const fn mask(self) -> u8 {
        match self {
            Self::F0to4 => 0x1f,
            Self::F5to8 | Self::F9to12 => 0x0f,
            Self::F13to20 | Self::F21to28 => 0xff,
        }
    }

    /// The [`Command`] a packet of this group classifies as.
    pub const fn command(self) -> Command {
        match self {
            Self::F0to4 => Command::Func0to4,
            Self::F5to8 => Command::Func5to8,
            Self::F9to12 => Command::Func9to12,
            Self::F13to20 => Command::Func13to20,
            Self::F21to28 => Command::Func21to28,
        }
    }

    // F0 sits at bit 4 of group one, F1-F4 at bits 0-3
    const fn bit(self, num: u8) -> u8 {
        match self {
            Self::F0to4 if num == 0 => 0x10,
            Self::F0to4 => 1 << (num - 1),
            _ => 1 << (num - self.first()),
        }
    }

    // expansion groups carry their bits in a second byte
    const fn has_data_byte(self) -> bool {
        matches!(self, Self::F13to20 | Self::F21to28)
    }
}

/// Decoded direct-mode service instruction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SvcInstruction {
    /// Ask whether the CV holds `cv_val`.
    VerifyCv {
        /// 1-based CV number.
        cv_num: u16,
        /// Value to compare against.
        cv_val: u8,
    },
    /// Store `cv_val` in the CV.
    WriteCv {
        /// 1-based CV number.
        cv_num: u16,
        /// Value to store.
        cv_val: u8,
    },
    /// Ask whether one bit of the CV equals `bit_val`.
    VerifyBit {
        /// 1-based CV number.
        cv_num: u16,
        /// Bit position, 0-7.
        bit_num: u8,
        /// Expected bit value.
        bit_val: bool,
    },
    /// Store one bit of the CV.
    WriteBit {
        /// 1-based CV number.
        cv_num: u16,
        /// Bit position, 0-7.
        bit_num: u8,
        /// Value to store.
        bit_val: bool,
    },
}

impl fmt::Display for SvcInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::VerifyCv { cv_num, cv_val } => write!(f, "verify cv{cv_num}=0x{cv_val:02x}"),
            Self::WriteCv { cv_num, cv_val } => write!(f, "write cv{cv_num}=0x{cv_val:02x}"),
            Self::VerifyBit {
                cv_num,
                bit_num,
                bit_val,
            } => write!(f, "verify cv{cv_num} bit{bit_num}={}", u8::from(bit_val)),
            Self::WriteBit {
                cv_num,
                bit_num,
                bit_val,
            } => write!(f, "write cv{cv_num} bit{bit_num}={}", u8::from(bit_val)),
        }
    }
}

// ============================================================================
// Argument checks
// ============================================================================

fn assert_address(adrs: u16) {
    assert!(
        (ADDRESS_MIN..=ADDRESS_MAX).contains(&adrs),
        "locomotive address {adrs} out of range"
    );
}

fn assert_speed(speed: i8) {
    assert!(speed >= SPEED_MIN, "speed {speed} out of range");
}

fn assert_cv_num(cv_num: u16) {
    assert!(
        (CV_NUM_MIN..=CV_NUM_MAX).contains(&cv_num),
        "CV number {cv_num} out of range"
    );
}

fn assert_bit_num(bit_num: u8) {
    assert!(bit_num <= 7, "bit number {bit_num} out of range");
}

/// Encodes a signed speed as the 128-step speed byte.
pub const fn speed_to_dcc(speed: i8) -> u8 {
    if speed < 0 {
        (-(speed as i16)) as u8
    } else {
        speed as u8 | 0x80
    }
}

/// Decodes a 128-step speed byte to a signed speed.
pub const fn dcc_to_speed(dcc: u8) -> i8 {
    let magnitude = (dcc & 0x7f) as i8;
    if dcc & 0x80 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

const fn accessory_address(b0: u8, b1: u8) -> u16 {
    ((b0 & 0x3f) as u16) << 2 | ((!b1 & 0x70) as u16) << 4 | ((b1 & 0x06) as u16) >> 1
}

// ============================================================================
// Packet
// ============================================================================

/// One DCC packet: up to [`MSG_MAX`] bytes ending in an XOR checksum.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Packet {
    msg: [u8; MSG_MAX],
    len: u8,
}

impl Packet {
    const fn blank() -> Self {
        Self {
            msg: [0; MSG_MAX],
            len: 0,
        }
    }

    /// The idle packet `ff 00 ff`.
    pub fn idle() -> Self {
        let mut pkt = Self::blank();
        pkt.msg[0] = 0xff;
        pkt.msg[1] = 0x00;
        pkt.seal(2);
        pkt
    }

    /// The broadcast reset packet `00 00 00`.
    pub fn reset() -> Self {
        let mut pkt = Self::blank();
        pkt.msg[0] = 0x00;
        pkt.msg[1] = INSTR_RESET;
        pkt.seal(2);
        pkt
    }

    /// 128-step speed and direction. Negative speeds run in reverse.
    pub fn speed128(adrs: u16, speed: i8) -> Self {
        assert_speed(speed);
        let mut pkt = Self::blank();
        let idx = pkt.put_address(adrs);
        pkt.msg[idx] = INSTR_SPEED_128;
        pkt.msg[idx + 1] = speed_to_dcc(speed);
        pkt.seal(idx + 2);
        pkt
    }

    /// Function group packet with the group's state bits laid out as on the
    /// wire (see [`FunctionGroup::mask`]).
    pub fn function_group(adrs: u16, group: FunctionGroup, bits: u8) -> Self {
        assert!(
            bits & !group.mask() == 0,
            "function bits 0x{bits:02x} do not fit {group:?}"
        );
        let mut pkt = Self::blank();
        let mut idx = pkt.put_address(adrs);
        match group {
            FunctionGroup::F0to4 => pkt.msg[idx] = INSTR_F0 | bits,
            FunctionGroup::F5to8 => pkt.msg[idx] = INSTR_F5 | bits,
            FunctionGroup::F9to12 => pkt.msg[idx] = INSTR_F9 | bits,
            FunctionGroup::F13to20 | FunctionGroup::F21to28 => {
                pkt.msg[idx] = if group == FunctionGroup::F13to20 {
                    INSTR_F13
                } else {
                    INSTR_F21
                };
                idx += 1;
                pkt.msg[idx] = bits;
            }
        }
        pkt.seal(idx + 1);
        pkt
    }

    /// Operations-mode (programming on the main) CV write.
    pub fn ops_write_cv(adrs: u16, cv_num: u16, cv_val: u8) -> Self {
        let mut pkt = Self::blank();
        let idx = pkt.put_address(adrs);
        let idx = pkt.put_cv(idx, INSTR_OPS_WRITE_CV, cv_num, cv_val);
        pkt.seal(idx);
        pkt
    }

    /// Operations-mode single bit write.
    pub fn ops_write_bit(adrs: u16, cv_num: u16, bit_num: u8, bit_val: bool) -> Self {
        assert_bit_num(bit_num);
        let mut pkt = Self::blank();
        let idx = pkt.put_address(adrs);
        let data = BIT_WRITE | u8::from(bit_val) << 3 | bit_num;
        let idx = pkt.put_cv(idx, INSTR_OPS_WRITE_BIT, cv_num, data);
        pkt.seal(idx);
        pkt
    }

    /// Direct-mode service write of a whole CV.
    pub fn svc_write_cv(cv_num: u16, cv_val: u8) -> Self {
        Self::svc(SVC_WRITE_CV, cv_num, cv_val)
    }

    /// Direct-mode service write of one bit.
    pub fn svc_write_bit(cv_num: u16, bit_num: u8, bit_val: bool) -> Self {
        assert_bit_num(bit_num);
        Self::svc(SVC_BIT, cv_num, BIT_WRITE | u8::from(bit_val) << 3 | bit_num)
    }

    /// Direct-mode service verify of a whole CV.
    pub fn svc_verify_cv(cv_num: u16, cv_val: u8) -> Self {
        Self::svc(SVC_VERIFY_CV, cv_num, cv_val)
    }

    /// Direct-mode service verify of one bit.
    pub fn svc_verify_bit(cv_num: u16, bit_num: u8, bit_val: bool) -> Self {
        assert_bit_num(bit_num);
        Self::svc(SVC_BIT, cv_num, BIT_VERIFY | u8::from(bit_val) << 3 | bit_num)
    }

    fn svc(instr: u8, cv_num: u16, data: u8) -> Self {
        let mut pkt = Self::blank();
        let idx = pkt.put_cv(0, instr, cv_num, data);
        pkt.seal(idx);
        pkt
    }

    /// Wraps raw bytes, checksum included, without validating them.
    ///
    /// Returns `None` if `bytes` is longer than [`MSG_MAX`].
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() > MSG_MAX {
            return None;
        }
        let mut pkt = Self::blank();
        pkt.msg[..bytes.len()].copy_from_slice(bytes);
        pkt.len = bytes.len() as u8;
        Some(pkt)
    }

    // writes the address at the front, returns bytes used
    fn put_address(&mut self, adrs: u16) -> usize {
        assert_address(adrs);
        if adrs <= ADDRESS_SHORT_MAX {
            self.msg[0] = adrs as u8;
            1
        } else {
            self.msg[0] = 0xc0 | ((adrs >> 8) as u8 & 0x3f);
            self.msg[1] = adrs as u8;
            2
        }
    }

    // writes instr|cv_hi, cv_lo, data at idx, returns the index past them
    fn put_cv(&mut self, idx: usize, instr: u8, cv_num: u16, data: u8) -> usize {
        assert_cv_num(cv_num);
        let cv = cv_num - 1;
        self.msg[idx] = instr | (cv >> 8) as u8;
        self.msg[idx + 1] = cv as u8;
        self.msg[idx + 2] = data;
        idx + 3
    }

    // appends the checksum after `body_len` bytes
    fn seal(&mut self, body_len: usize) {
        assert!(body_len < MSG_MAX, "packet body of {body_len} bytes too long");
        self.len = (body_len + 1) as u8;
        self.msg[body_len + 1..].fill(0);
        self.set_xor();
    }

    fn set_xor(&mut self) {
        let n = self.len();
        if n == 0 {
            return;
        }
        self.msg[n - 1] = self.msg[..n - 1].iter().fold(0, |acc, b| acc ^ b);
    }

    // ------------------------------------------------------------------------
    // Raw access
    // ------------------------------------------------------------------------

    /// Packet length in bytes, checksum included.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Whether the packet holds no bytes at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The packet bytes, checksum included.
    pub fn as_bytes(&self) -> &[u8] {
        &self.msg[..self.len()]
    }

    /// Whether the XOR of all bytes, checksum included, is zero.
    pub fn checksum_ok(&self) -> bool {
        !self.is_empty() && self.as_bytes().iter().fold(0, |acc, b| acc ^ b) == 0
    }

    // ------------------------------------------------------------------------
    // Address
    // ------------------------------------------------------------------------

    /// Classification of the first byte.
    ///
    /// # Panics
    ///
    /// If the packet is empty.
    pub fn address_kind(&self) -> AddressKind {
        assert!(!self.is_empty(), "empty packet has no address");
        AddressKind::of(self.msg[0])
    }

    /// The decoded address, or `None` for reserved and extended packets.
    ///
    /// Broadcast reads as 0 and idle as 255.
    pub fn address(&self) -> Option<u16> {
        let b0 = self.msg[0];
        match self.address_kind() {
            AddressKind::Broadcast | AddressKind::Short | AddressKind::Idle => Some(b0 as u16),
            AddressKind::Accessory => {
                assert!(self.len() >= 2, "accessory address needs two bytes");
                Some(accessory_address(b0, self.msg[1]))
            }
            AddressKind::Long => {
                assert!(self.len() >= 2, "long address needs two bytes");
                Some(((b0 & 0x3f) as u16) << 8 | self.msg[1] as u16)
            }
            AddressKind::Reserved | AddressKind::Extended => None,
        }
    }

    /// Bytes the address occupies: 1 for short form, 2 otherwise.
    pub fn address_size(&self) -> usize {
        if self.msg[0] as u16 <= ADDRESS_SHORT_MAX {
            1
        } else {
            2
        }
    }

    /// Rewrites the address, moving the instruction bytes behind it.
    ///
    /// Returns the number of address bytes now in use.
    pub fn set_address(&mut self, adrs: u16) -> usize {
        assert_address(adrs);
        let old = self.address_size();
        let body_end = self.len().saturating_sub(1).max(old);
        let mut body = [0u8; MSG_MAX];
        let body_len = body_end - old;
        body[..body_len].copy_from_slice(&self.msg[old..body_end]);

        let idx = self.put_address(adrs);
        assert!(
            idx + body_len < MSG_MAX,
            "address {adrs} does not fit the packet"
        );
        self.msg[idx..idx + body_len].copy_from_slice(&body[..body_len]);
        self.seal(idx + body_len);
        idx
    }

    // ------------------------------------------------------------------------
    // Instruction
    // ------------------------------------------------------------------------

    /// Classifies the instruction byte of a multi-function packet.
    pub fn command(&self) -> Command {
        if self.is_empty() || !AddressKind::of(self.msg[0]).is_multi_function() {
            return Command::Unknown;
        }
        let idx = self.address_size();
        // instruction byte must come before the checksum
        if idx + 1 >= self.len() {
            return Command::Unknown;
        }
        match self.msg[idx] {
            INSTR_RESET => Command::Reset,
            INSTR_SPEED_128 => Command::Speed128,
            i if i & 0xe0 == INSTR_F0 => Command::Func0to4,
            i if i & 0xf0 == INSTR_F5 => Command::Func5to8,
            i if i & 0xf0 == INSTR_F9 => Command::Func9to12,
            INSTR_F13 => Command::Func13to20,
            INSTR_F21 => Command::Func21to28,
            _ => Command::Unknown,
        }
    }

    /// The function group this packet carries, if it is one.
    pub fn function_group_kind(&self) -> Option<FunctionGroup> {
        FunctionGroup::ALL
            .into_iter()
            .find(|group| group.command() == self.command())
    }

    /// Signed speed of a 128-step speed packet.
    pub fn speed(&self) -> i8 {
        dcc_to_speed(self.msg[self.speed_index()])
    }

    /// Rewrites the speed of a 128-step speed packet.
    pub fn set_speed(&mut self, speed: i8) {
        assert_speed(speed);
        let idx = self.speed_index();
        self.msg[idx] = speed_to_dcc(speed);
        self.set_xor();
    }

    fn speed_index(&self) -> usize {
        assert_eq!(
            self.command(),
            Command::Speed128,
            "not a 128-step speed packet"
        );
        self.address_size() + 1
    }

    /// State of function `num`.
    ///
    /// # Panics
    ///
    /// If this packet does not carry `num`'s group.
    pub fn function(&self, num: u8) -> bool {
        let group = FunctionGroup::of(num);
        self.msg[self.function_index(group)] & group.bit(num) != 0
    }

    /// Switches function `num` on or off.
    pub fn set_function(&mut self, num: u8, on: bool) {
        let group = FunctionGroup::of(num);
        let idx = self.function_index(group);
        if on {
            self.msg[idx] |= group.bit(num);
        } else {
            self.msg[idx] &= !group.bit(num);
        }
        self.set_xor();
    }

    /// Raw state bits of a function group packet, as on the wire.
    pub fn function_bits(&self) -> u8 {
        let Some(group) = self.function_group_kind() else {
            panic!("not a function group packet");
        };
        self.msg[self.function_index(group)] & group.mask()
    }

    fn function_index(&self, group: FunctionGroup) -> usize {
        assert_eq!(
            self.command(),
            group.command(),
            "packet does not carry {group:?}"
        );
        self.address_size() + usize::from(group.has_data_byte())
    }

    // ------------------------------------------------------------------------
    // CV access
    // ------------------------------------------------------------------------

    /// Shape test for a direct-mode service packet.
    ///
    /// Matches four-byte packets whose first byte is `0111 01vv` (verify
    /// byte), `0111 11vv` (write byte), or `0111 10vv` with a data byte of
    /// `111x xxxx` (bit manipulation). A decoder in operations mode would
    /// read the same bytes as a short-address packet; only the track state
    /// tells them apart.
    pub fn is_svc_direct(msg: &[u8]) -> bool {
        msg.len() == 4
            && match msg[0] & 0xfc {
                SVC_VERIFY_CV | SVC_WRITE_CV => true,
                SVC_BIT => msg[2] & BIT_VERIFY == BIT_VERIFY,
                _ => false,
            }
    }

    /// Decodes a direct-mode service packet.
    pub fn svc_instruction(&self) -> Option<SvcInstruction> {
        if !Self::is_svc_direct(self.as_bytes()) {
            return None;
        }
        let cv_num = self.cv_num();
        let data = self.msg[2];
        let bit_num = data & 0x07;
        let bit_val = data & 0x08 != 0;
        match self.msg[0] & 0xfc {
            SVC_VERIFY_CV => Some(SvcInstruction::VerifyCv {
                cv_num,
                cv_val: data,
            }),
            SVC_WRITE_CV => Some(SvcInstruction::WriteCv {
                cv_num,
                cv_val: data,
            }),
            _ if data & 0x10 != 0 => Some(SvcInstruction::WriteBit {
                cv_num,
                bit_num,
                bit_val,
            }),
            _ => Some(SvcInstruction::VerifyBit {
                cv_num,
                bit_num,
                bit_val,
            }),
        }
    }

    // service packets start with the instruction, ops packets after the address
    fn cv_index(&self) -> usize {
        let idx = if Self::is_svc_direct(self.as_bytes()) {
            0
        } else {
            self.address_size()
        };
        assert!(idx + 3 < self.len(), "packet too short for CV access");
        idx
    }

    /// 1-based CV number of a CV access packet.
    pub fn cv_num(&self) -> u16 {
        let idx = self.cv_index();
        (((self.msg[idx] & 0x03) as u16) << 8 | self.msg[idx + 1] as u16) + 1
    }

    /// Data byte of a CV access packet.
    pub fn cv_val(&self) -> u8 {
        self.msg[self.cv_index() + 2]
    }

    /// Bit position of a bit manipulation packet.
    pub fn bit_num(&self) -> u8 {
        self.cv_val() & 0x07
    }

    /// Bit value of a bit manipulation packet.
    pub fn bit_val(&self) -> bool {
        self.cv_val() & 0x08 != 0
    }

    // ------------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------------

    /// Human-readable description, e.g. `   3: fwd 64/128`.
    pub fn show(&self) -> PacketShow<'_> {
        PacketShow(self)
    }

    /// Hex dump, e.g. `{ 03 3f c0 fc }`.
    pub fn dump(&self) -> PacketDump<'_> {
        PacketDump(self)
    }

    /// Writes [`Packet::show`] into `buf`, truncated and NUL-terminated.
    pub fn show_into<'b>(&self, buf: &'b mut [u8]) -> &'b str {
        text::write_c_str(buf, format_args!("{}", self.show()))
    }

    /// Writes [`Packet::dump`] into `buf`, truncated and NUL-terminated.
    pub fn dump_into<'b>(&self, buf: &'b mut [u8]) -> &'b str {
        text::write_c_str(buf, format_args!("{}", self.dump()))
    }

    fn render(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = self.as_bytes();
        let len = msg.len();
        // byte `idx` must exist and must not be the checksum
        let have = |idx: usize| idx + 1 < len;

        if !have(0) {
            return self.out_of_data(f, 0);
        }
        let b0 = msg[0];
        match AddressKind::of(b0) {
            AddressKind::Broadcast | AddressKind::Short | AddressKind::Long => {
                if let Some(svc) = self.svc_instruction() {
                    return write!(f, "svc: {svc}");
                }
                let mut idx = 1;
                let mut adrs = b0 as u16;
                if b0 > 127 {
                    if !have(idx) {
                        return self.out_of_data(f, idx);
                    }
                    adrs = ((b0 & 0x3f) as u16) << 8 | msg[idx] as u16;
                    idx += 1;
                }
                write!(f, "{adrs:4}: ")?;
                if !have(idx) {
                    return self.out_of_data(f, idx);
                }
                let instr = msg[idx];
                idx += 1;
                match instr {
                    INSTR_RESET => f.write_str("reset")?,
                    INSTR_SPEED_128 => {
                        if !have(idx) {
                            return self.out_of_data(f, idx);
                        }
                        let speed = msg[idx];
                        idx += 1;
                        let dir = if speed & 0x80 != 0 { "fwd" } else { "rev" };
                        write!(f, "{dir} {}/128", speed & 0x7f)?;
                    }
                    i if i & 0xe0 == INSTR_F0 => {
                        // F0 is bit 4, F1-F4 bits 0-3
                        let bits = (i & 0x0f) << 1 | (i >> 4) & 0x01;
                        write_functions(f, 0, bits, 5)?;
                    }
                    i if i & 0xf0 == INSTR_F5 => write_functions(f, 5, i, 4)?,
                    i if i & 0xf0 == INSTR_F9 => write_functions(f, 9, i, 4)?,
                    INSTR_F13 | INSTR_F21 => {
                        if !have(idx) {
                            return self.out_of_data(f, idx);
                        }
                        let first = if instr == INSTR_F13 { 13 } else { 21 };
                        write_functions(f, first, msg[idx], 8)?;
                        idx += 1;
                    }
                    i if i & 0xf0 == 0xe0 => {
                        if !have(idx + 1) {
                            return self.out_of_data(f, idx + 1);
                        }
                        let cv_num = ((i & 0x03) as u16) << 8 | msg[idx] as u16;
                        let data = msg[idx + 1];
                        idx += 2;
                        match i & 0x0c {
                            0x0c => write!(f, "write cv{}=0x{data:02x}", cv_num + 1)?,
                            0x04 => write!(f, "verify cv{}=0x{data:02x}", cv_num + 1)?,
                            // 00 is reserved
                            0x00 => return write!(f, "{}", self.dump()),
                            _ => write!(
                                f,
                                "{} cv{} bit{}={}",
                                if data & 0x10 != 0 { "write" } else { "verify" },
                                cv_num + 1,
                                data & 0x07,
                                (data >> 3) & 0x01
                            )?,
                        }
                    }
                    _ => return write!(f, "{}", self.dump()),
                }
                if idx + 1 != len {
                    write!(f, " extra: {}", self.dump())?;
                }
                Ok(())
            }
            AddressKind::Accessory => {
                if !have(1) {
                    return self.out_of_data(f, 1);
                }
                let b1 = msg[1];
                write!(
                    f,
                    "{:4}: acc m={} d={} r={}: {}",
                    accessory_address(b0, b1),
                    (b1 >> 7) & 0x01,
                    (b1 >> 3) & 0x01,
                    b1 & 0x01,
                    self.dump()
                )
            }
            AddressKind::Idle => {
                f.write_str("      idle")?;
                if len != 3 {
                    write!(f, ": {}", self.dump())?;
                }
                Ok(())
            }
            AddressKind::Reserved | AddressKind::Extended => write!(f, "{}", self.dump()),
        }
    }

    fn out_of_data(&self, f: &mut fmt::Formatter<'_>, idx: usize) -> fmt::Result {
        write!(f, "out of data at byte {idx}: {}", self.dump())
    }
}

fn write_functions(f: &mut fmt::Formatter<'_>, first: u8, bits: u8, count: u8) -> fmt::Result {
    for i in 0..count {
        if i > 0 {
            f.write_str(" ")?;
        }
        let on = if bits & (1 << i) != 0 { '+' } else { '-' };
        write!(f, "f{}{on}", first + i)?;
    }
    Ok(())
}

impl fmt::Debug for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Packet{}", self.dump())
    }
}

/// [`Display`](fmt::Display) adapter returned by [`Packet::show`].
pub struct PacketShow<'a>(&'a Packet);

impl fmt::Display for PacketShow<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.render(f)
    }
}

/// [`Display`](fmt::Display) adapter returned by [`Packet::dump`].
pub struct PacketDump<'a>(&'a Packet);

impl fmt::Display for PacketDump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for b in self.0.as_bytes() {
            write!(f, " {b:02x}")?;
        }
        f.write_str(" }")
    }
}
