//! AVDECC Data Link Boundary
//!
//! The controller never touches a network interface itself. Everything it sends
//! and receives passes through the [`DataLink`] trait as complete Ethernet
//! frames (destination MAC through the end of the AVTP payload, without FCS).
//!
//! # Overview
//!
//! This module provides:
//! - **Frame Assembly/Disassembly**: [`ethernet::EthernetFrame`] for the 14-byte
//!   Ethernet header and AVDECC ethertype check
//! - **Address Helpers**: MAC parsing and formatting, the AVDECC multicast group
//! - **Transport Abstraction**: the [`DataLink`] trait, implemented by raw socket
//!   or capture backends outside this crate
//! - **Loopback Transport**: [`EthernetDataLink`], an in-memory implementation
//!   used by tests and simulations
//!
//! # Examples
//!
//! ```
//! use avdecc_rs::datalink::{DataLink, EthernetDataLink};
//!
//! let local = [0x00, 0x1B, 0x92, 0x01, 0x02, 0x03];
//! let link = EthernetDataLink::new(local);
//!
//! // Hand a clone to the controller and keep one for driving the wire
//! let mut boxed: Box<dyn DataLink> = Box::new(link.clone());
//! boxed.send_frame(&[0u8; 60]).unwrap();
//! assert_eq!(link.take_transmitted().len(), 1);
//! ```

use std::error::Error;
use std::fmt;

use crate::error::FormatError;

pub mod ethernet;

pub use ethernet::{EthernetDataLink, EthernetFrame};

/// 48-bit IEEE 802 MAC address
pub type MacAddress = [u8; 6];

/// Result type for data link operations
pub type Result<T> = std::result::Result<T, DataLinkError>;

/// Errors raised by a [`DataLink`] implementation
#[derive(Debug)]
pub enum DataLinkError {
    /// Network I/O error from the underlying socket or capture handle.
    IoError(std::io::Error),

    /// The frame could not be handed to the link as given.
    InvalidFrame(FormatError),

    /// The frame exceeds the maximum Ethernet frame size.
    FrameTooLarge(usize),

    /// Address resolution or validation failed.
    AddressError(String),

    /// The link has been shut down.
    Closed,
}

impl fmt::Display for DataLinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataLinkError::IoError(e) => write!(f, "I/O error: {}", e),
            DataLinkError::InvalidFrame(e) => write!(f, "Invalid frame: {}", e),
            DataLinkError::FrameTooLarge(len) => write!(f, "Frame too large: {} bytes", len),
            DataLinkError::AddressError(msg) => write!(f, "Address error: {}", msg),
            DataLinkError::Closed => write!(f, "Data link closed"),
        }
    }
}

impl Error for DataLinkError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            DataLinkError::IoError(e) => Some(e),
            DataLinkError::InvalidFrame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for DataLinkError {
    fn from(e: std::io::Error) -> Self {
        DataLinkError::IoError(e)
    }
}

/// Raw Ethernet access used by the controller.
///
/// Implementations carry complete frames: the controller builds the Ethernet
/// header itself, so `send_frame` receives bytes starting at the destination
/// MAC and `receive_frame` must return them the same way. Frames that are not
/// AVDECC traffic may be returned; the controller filters them.
///
/// # Thread Safety
///
/// The controller keeps the link behind its own mutex and never holds that
/// mutex while touching controller state, so implementations only need to be
/// `Send`.
///
/// # Examples
///
/// ```
/// use avdecc_rs::datalink::{DataLink, MacAddress, Result};
///
/// struct NullLink;
///
/// impl DataLink for NullLink {
///     fn send_frame(&mut self, _frame: &[u8]) -> Result<()> {
///         Ok(())
///     }
///
///     fn receive_frame(&mut self) -> Result<Option<Vec<u8>>> {
///         Ok(None)
///     }
///
///     fn local_address(&self) -> MacAddress {
///         [0x02, 0, 0, 0, 0, 1]
///     }
/// }
/// ```
pub trait DataLink: Send {
    /// Transmit one complete Ethernet frame.
    ///
    /// # Errors
    ///
    /// Returns an error if the frame is too large for the medium or the
    /// underlying I/O fails.
    fn send_frame(&mut self, frame: &[u8]) -> Result<()>;

    /// Fetch the next received frame without blocking.
    ///
    /// Returns `Ok(None)` when nothing is queued.
    fn receive_frame(&mut self) -> Result<Option<Vec<u8>>>;

    /// MAC address of the local interface, used as the source of every frame.
    fn local_address(&self) -> MacAddress;
}
