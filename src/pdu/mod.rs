//! AVTP Common Control Header
//!
//! ADP, AECP and ACMP PDUs all start with the same 12-byte header:
//!
//! ```text
//!  0                   1                   2                   3
//! +-+-------------+-+-----+-------+---------+---------------------+
//! |1|  subtype    |s| ver | msg   | status  | control_data_length |
//! +-+-------------+-+-----+-------+---------+---------------------+
//! |                stream_id / entity_id (64 bits)                |
//! +---------------------------------------------------------------+
//! ```
//!
//! `status` is the 5-bit valid_time field in ADP. `control_data_length`
//! counts the bytes following the header.

use std::fmt;
use std::str::FromStr;

use bytes::BufMut;

use crate::encoding::{ensure_len, read_u16, read_u64, read_u8};
use crate::error::FormatError;
use crate::util::{format_eui64, parse_eui64};

/// Length of the common control header
pub const COMMON_CONTROL_HEADER_LEN: usize = 12;

/// AVTP version carried by all AVDECC PDUs
pub const AVTP_VERSION: u8 = 0;

/// 64-bit EUI identifying an AVDECC entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EntityId(pub u64);

impl EntityId {
    /// The all-zero id, which never names a real entity
    pub const NULL: EntityId = EntityId(0);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(&self) -> u64 {
        self.0
    }

    pub fn is_null(&self) -> bool {
        self.0 == 0
    }
}

impl From<u64> for EntityId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<EntityId> for u64 {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&format_eui64(self.0))
    }
}

impl FromStr for EntityId {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_eui64(s)
            .map(EntityId)
            .ok_or_else(|| FormatError::MalformedPdu(format!("invalid entity id '{}'", s)))
    }
}

/// AVTP control subtypes used by AVDECC (cd bit included)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Subtype {
    Adp = 0xFA,
    Aecp = 0xFB,
    Acmp = 0xFC,
}

impl TryFrom<u8> for Subtype {
    type Error = FormatError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0xFA => Ok(Subtype::Adp),
            0xFB => Ok(Subtype::Aecp),
            0xFC => Ok(Subtype::Acmp),
            other => Err(FormatError::UnexpectedSubtype(other)),
        }
    }
}

/// Decoded common control header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommonControlHeader {
    pub subtype: Subtype,
    pub stream_valid: bool,
    pub version: u8,
    /// 4-bit protocol-specific message type
    pub message_type: u8,
    /// 5-bit status (valid_time for ADP)
    pub status: u8,
    /// 11-bit length of the data following this header
    pub control_data_length: u16,
    /// stream_id, entity_id or target_entity_id depending on the protocol
    pub stream_id: u64,
}

impl CommonControlHeader {
    pub fn new(subtype: Subtype, message_type: u8, status: u8, control_data_length: u16, stream_id: u64) -> Self {
        Self {
            subtype,
            stream_valid: false,
            version: AVTP_VERSION,
            message_type,
            status,
            control_data_length,
            stream_id,
        }
    }

    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.subtype as u8);
        buf.put_u8(
            (u8::from(self.stream_valid) << 7) | ((self.version & 0x07) << 4) | (self.message_type & 0x0F),
        );
        buf.put_u16((u16::from(self.status & 0x1F) << 11) | (self.control_data_length & 0x07FF));
        buf.put_u64(self.stream_id);
    }

    pub fn decode(data: &[u8]) -> Result<Self, FormatError> {
        ensure_len(data, COMMON_CONTROL_HEADER_LEN)?;
        let subtype = Subtype::try_from(read_u8(data, 0))?;
        let byte1 = read_u8(data, 1);
        let word = read_u16(data, 2);
        Ok(Self {
            subtype,
            stream_valid: byte1 & 0x80 != 0,
            version: (byte1 >> 4) & 0x07,
            message_type: byte1 & 0x0F,
            status: (word >> 11) as u8,
            control_data_length: word & 0x07FF,
            stream_id: read_u64(data, 4),
        })
    }

    /// Fail unless the declared control data fits in a payload of
    /// `payload_len` bytes (header included)
    pub fn check_control_data(&self, payload_len: usize) -> Result<(), FormatError> {
        let declared = COMMON_CONTROL_HEADER_LEN + self.control_data_length as usize;
        if declared > payload_len {
            return Err(FormatError::MalformedPdu(format!(
                "control_data_length {} exceeds payload of {} bytes",
                self.control_data_length,
                payload_len - COMMON_CONTROL_HEADER_LEN.min(payload_len)
            )));
        }
        Ok(())
    }
}

/// Read the subtype of an AVTPDU without decoding the rest
pub fn peek_subtype(payload: &[u8]) -> Result<Subtype, FormatError> {
    ensure_len(payload, 1)?;
    Subtype::try_from(payload[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_layout() {
        let header = CommonControlHeader::new(Subtype::Adp, 0, 31, 56, 0x0011_2233_4455_6677);
        let mut buf = Vec::new();
        header.encode(&mut buf);

        assert_eq!(buf.len(), COMMON_CONTROL_HEADER_LEN);
        assert_eq!(buf[0], 0xFA);
        assert_eq!(buf[1], 0x00);
        // valid_time 31 in the top five bits, length 56 in the low eleven
        assert_eq!(u16::from_be_bytes([buf[2], buf[3]]), (31 << 11) | 56);
        assert_eq!(&buf[4..12], &0x0011_2233_4455_6677u64.to_be_bytes());

        assert_eq!(CommonControlHeader::decode(&buf).unwrap(), header);
    }

    #[test]
    fn test_message_type_bits() {
        let mut header = CommonControlHeader::new(Subtype::Acmp, 13, 0, 44, 0);
        header.stream_valid = true;
        let mut buf = Vec::new();
        header.encode(&mut buf);
        assert_eq!(buf[1], 0x80 | 13);

        let decoded = CommonControlHeader::decode(&buf).unwrap();
        assert!(decoded.stream_valid);
        assert_eq!(decoded.message_type, 13);
    }

    #[test]
    fn test_unknown_subtype() {
        let mut buf = vec![0u8; COMMON_CONTROL_HEADER_LEN];
        buf[0] = 0x00;
        assert_eq!(
            CommonControlHeader::decode(&buf),
            Err(FormatError::UnexpectedSubtype(0x00))
        );
        assert!(peek_subtype(&[]).is_err());
        assert_eq!(peek_subtype(&[0xFB]), Ok(Subtype::Aecp));
    }

    #[test]
    fn test_check_control_data() {
        let header = CommonControlHeader::new(Subtype::Aecp, 0, 0, 20, 0);
        assert!(header.check_control_data(32).is_ok());
        assert!(matches!(
            header.check_control_data(31),
            Err(FormatError::MalformedPdu(_))
        ));
    }

    #[test]
    fn test_entity_id_text() {
        let id: EntityId = "0x001b92fffe010203".parse().unwrap();
        assert_eq!(id, EntityId(0x001b_92ff_fe01_0203));
        assert_eq!(id.to_string(), "0x001b92fffe010203");
        assert!("garbage".parse::<EntityId>().is_err());
        assert!(EntityId::NULL.is_null());
    }
}
