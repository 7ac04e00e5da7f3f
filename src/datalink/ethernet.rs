//! AVDECC Ethernet Framing
//!
//! All AVDECC protocols (ADP, AECP, ACMP) ride directly on IEEE 802.3 frames
//! with the AVTP ethertype. There is no LLC header; the AVTP common control
//! header starts immediately after the ethertype.
//!
//! # Frame Format
//!
//! - Destination MAC (6 bytes): unicast for AECP, the AVDECC multicast group
//!   for ADP and ACMP
//! - Source MAC (6 bytes)
//! - Ethertype (2 bytes): 0x22F0
//! - AVTPDU (common control header plus protocol data)
//! - FCS: handled by hardware

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use bytes::BufMut;

use crate::datalink::{DataLink, DataLinkError, MacAddress, Result};
use crate::encoding::{ensure_len, read_mac, read_u16};
use crate::error::FormatError;
use crate::util::lock;

/// AVTP ethertype carried by every AVDECC frame
pub const AVDECC_ETHERTYPE: u16 = 0x22F0;

/// Multicast group for ADP advertisements and ACMP messages
pub const AVDECC_MULTICAST_MAC: MacAddress = [0x91, 0xE0, 0xF0, 0x01, 0x00, 0x00];

/// Ethernet broadcast MAC address
pub const ETHERNET_BROADCAST_MAC: MacAddress = [0xFF; 6];

/// Ethernet header size (dest MAC + src MAC + type)
pub const ETHERNET_HEADER_SIZE: usize = 14;

/// Maximum Ethernet frame size (without FCS)
pub const MAX_ETHERNET_FRAME_SIZE: usize = 1514;

/// A decoded Ethernet frame carrying AVDECC traffic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EthernetFrame {
    pub dest_mac: MacAddress,
    pub src_mac: MacAddress,
    pub ether_type: u16,
    /// AVTPDU, including any padding the sender added
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    /// Create a new AVDECC frame
    pub fn new(dest_mac: MacAddress, src_mac: MacAddress, payload: Vec<u8>) -> Self {
        Self {
            dest_mac,
            src_mac,
            ether_type: AVDECC_ETHERTYPE,
            payload,
        }
    }

    /// Create a frame addressed to the AVDECC multicast group
    pub fn multicast(src_mac: MacAddress, payload: Vec<u8>) -> Self {
        Self::new(AVDECC_MULTICAST_MAC, src_mac, payload)
    }

    /// Encode the frame to bytes. No padding is added; the interface pads short
    /// frames to the Ethernet minimum.
    pub fn encode(&self) -> Vec<u8> {
        let mut frame = Vec::with_capacity(ETHERNET_HEADER_SIZE + self.payload.len());
        frame.put_slice(&self.dest_mac);
        frame.put_slice(&self.src_mac);
        frame.put_u16(self.ether_type);
        frame.put_slice(&self.payload);
        frame
    }

    /// Decode a frame from bytes.
    ///
    /// Fails with [`FormatError::TruncatedFrame`] when the header is incomplete
    /// and [`FormatError::UnsupportedEthertype`] for non-AVDECC traffic.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, FormatError> {
        ensure_len(data, ETHERNET_HEADER_SIZE)?;

        let ether_type = read_u16(data, 12);
        if ether_type != AVDECC_ETHERTYPE {
            return Err(FormatError::UnsupportedEthertype(ether_type));
        }

        Ok(Self {
            dest_mac: read_mac(data, 0),
            src_mac: read_mac(data, 6),
            ether_type,
            payload: data[ETHERNET_HEADER_SIZE..].to_vec(),
        })
    }

    pub fn is_broadcast(&self) -> bool {
        self.dest_mac == ETHERNET_BROADCAST_MAC
    }

    /// Group bit set in the destination address
    pub fn is_multicast(&self) -> bool {
        self.dest_mac[0] & 0x01 == 0x01
    }
}

/// In-memory data link.
///
/// Clones share the same queues, so a test can box one clone into a
/// controller and use another to inject received frames and inspect what the
/// controller transmitted. A real deployment supplies a raw-socket
/// implementation of [`DataLink`] instead.
#[derive(Debug, Clone)]
pub struct EthernetDataLink {
    local_mac: MacAddress,
    rx_queue: Arc<Mutex<VecDeque<Vec<u8>>>>,
    tx_log: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: Arc<Mutex<bool>>,
}

impl EthernetDataLink {
    pub fn new(local_mac: MacAddress) -> Self {
        Self {
            local_mac,
            rx_queue: Arc::new(Mutex::new(VecDeque::new())),
            tx_log: Arc::new(Mutex::new(Vec::new())),
            closed: Arc::new(Mutex::new(false)),
        }
    }

    /// Queue a frame as if it had arrived from the wire
    pub fn inject(&self, frame: Vec<u8>) {
        lock(&self.rx_queue).push_back(frame);
    }

    /// Drain and return every frame sent since the last call
    pub fn take_transmitted(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut *lock(&self.tx_log))
    }

    /// Number of frames sent and not yet taken
    pub fn transmitted_count(&self) -> usize {
        lock(&self.tx_log).len()
    }

    /// Make every subsequent send and receive fail with [`DataLinkError::Closed`]
    pub fn close(&self) {
        *lock(&self.closed) = true;
    }
}

impl DataLink for EthernetDataLink {
    fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        if *lock(&self.closed) {
            return Err(DataLinkError::Closed);
        }
        if frame.len() > MAX_ETHERNET_FRAME_SIZE {
            return Err(DataLinkError::FrameTooLarge(frame.len()));
        }
        if frame.len() < ETHERNET_HEADER_SIZE {
            return Err(DataLinkError::InvalidFrame(FormatError::TruncatedFrame {
                required: ETHERNET_HEADER_SIZE,
                actual: frame.len(),
            }));
        }
        lock(&self.tx_log).push(frame.to_vec());
        Ok(())
    }

    fn receive_frame(&mut self) -> Result<Option<Vec<u8>>> {
        if *lock(&self.closed) {
            return Err(DataLinkError::Closed);
        }
        Ok(lock(&self.rx_queue).pop_front())
    }

    fn local_address(&self) -> MacAddress {
        self.local_mac
    }
}

/// Parse MAC address from string
pub fn parse_mac_address(mac_str: &str) -> Result<MacAddress> {
    let parts: Vec<&str> = mac_str.split([':', '-']).collect();
    if parts.len() != 6 {
        return Err(DataLinkError::AddressError(
            "Invalid MAC address format".into(),
        ));
    }

    let mut mac = [0u8; 6];
    for (i, part) in parts.iter().enumerate() {
        mac[i] = u8::from_str_radix(part, 16)
            .map_err(|_| DataLinkError::AddressError("Invalid MAC address hex".into()))?;
    }

    Ok(mac)
}

/// Format MAC address as string
pub fn format_mac_address(mac: &MacAddress) -> String {
    format!(
        "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
        mac[0], mac[1], mac[2], mac[3], mac[4], mac[5]
    )
}
