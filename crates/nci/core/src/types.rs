//! RF and protocol vocabulary shared by commands, responses and notifications
//!
//! Values that only flow through the engine keep unknown codes as `Other(u8)`.
//! Values that drive a state machine (deactivation type, NFCEE status,
//! discovery notification type) decode strictly.

use bitflags::bitflags;
use bytes::Bytes;

use crate::codec::{WireReader, WireWriter};
use crate::constants::routing;
use crate::{Error, Result};

macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
            /// Value not defined by NCI 1.0
            Other(u8),
        }

        impl From<u8> for $name {
            fn from(value: u8) -> Self {
                match value {
                    $($value => Self::$variant,)+
                    other => Self::Other(other),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                match value {
                    $($name::$variant => $value,)+
                    $name::Other(other) => other,
                }
            }
        }
    };
}

macro_rules! strict_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident as $field:literal {
            $(
                $(#[$vmeta:meta])*
                $variant:ident = $value:literal,
            )+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $(
                $(#[$vmeta])*
                $variant = $value,
            )+
        }

        impl TryFrom<u8> for $name {
            type Error = Error;

            fn try_from(value: u8) -> Result<Self> {
                match value {
                    $($value => Ok(Self::$variant),)+
                    other => Err(Error::invalid($field, other)),
                }
            }
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                value as u8
            }
        }
    };
}

wire_enum! {
    /// Status code carried by responses and some notifications
    pub enum Status {
        /// STATUS_OK
        Ok = 0x00,
        /// STATUS_REJECTED
        Rejected = 0x01,
        /// STATUS_RF_FRAME_CORRUPTED
        RfFrameCorrupted = 0x02,
        /// STATUS_FAILED
        Failed = 0x03,
        /// STATUS_NOT_INITIALIZED
        NotInitialized = 0x04,
        /// STATUS_SYNTAX_ERROR
        SyntaxError = 0x05,
        /// STATUS_SEMANTIC_ERROR
        SemanticError = 0x06,
        /// STATUS_INVALID_PARAM
        InvalidParam = 0x09,
        /// STATUS_MESSAGE_SIZE_EXCEEDED
        MessageSizeExceeded = 0x0A,
        /// DISCOVERY_ALREADY_STARTED
        DiscoveryAlreadyStarted = 0xA0,
        /// DISCOVERY_TARGET_ACTIVATION_FAILED
        DiscoveryTargetActivationFailed = 0xA1,
        /// DISCOVERY_TEAR_DOWN
        DiscoveryTearDown = 0xA2,
        /// RF_TRANSMISSION_ERROR
        RfTransmissionError = 0xB0,
        /// RF_PROTOCOL_ERROR
        RfProtocolError = 0xB1,
        /// RF_TIMEOUT_ERROR
        RfTimeoutError = 0xB2,
        /// NFCEE_INTERFACE_ACTIVATION_FAILED
        NfceeInterfaceActivationFailed = 0xC0,
        /// NFCEE_TRANSMISSION_ERROR
        NfceeTransmissionError = 0xC1,
        /// NFCEE_PROTOCOL_ERROR
        NfceeProtocolError = 0xC2,
        /// NFCEE_TIMEOUT_ERROR
        NfceeTimeoutError = 0xC3,
    }
}

impl Status {
    /// Returns true for STATUS_OK
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(value) => write!(f, "status {value:#04x}"),
            known => write!(f, "{known:?}"),
        }
    }
}

wire_enum! {
    /// RF technology and mode
    pub enum RfTechMode {
        /// NFC-A passive poll
        NfcAPassivePoll = 0x00,
        /// NFC-B passive poll
        NfcBPassivePoll = 0x01,
        /// NFC-F passive poll
        NfcFPassivePoll = 0x02,
        /// NFC-A active poll
        NfcAActivePoll = 0x03,
        /// NFC-F active poll
        NfcFActivePoll = 0x05,
        /// ISO 15693 poll
        Iso15693Poll = 0x06,
        /// NFC-A passive listen
        NfcAPassiveListen = 0x80,
        /// NFC-B passive listen
        NfcBPassiveListen = 0x81,
        /// NFC-F passive listen
        NfcFPassiveListen = 0x82,
        /// NFC-A active listen
        NfcAActiveListen = 0x83,
        /// NFC-F active listen
        NfcFActiveListen = 0x85,
        /// ISO 15693 listen
        Iso15693Listen = 0x86,
    }
}

impl RfTechMode {
    /// Returns true for listen modes
    pub fn is_listen(self) -> bool {
        u8::from(self) & 0x80 != 0
    }

    /// The RF technology underlying this mode
    pub const fn technology(self) -> Option<Technology> {
        match self {
            Self::NfcAPassivePoll
            | Self::NfcAActivePoll
            | Self::NfcAPassiveListen
            | Self::NfcAActiveListen => Some(Technology::NfcA),
            Self::NfcBPassivePoll | Self::NfcBPassiveListen => Some(Technology::NfcB),
            Self::NfcFPassivePoll
            | Self::NfcFActivePoll
            | Self::NfcFPassiveListen
            | Self::NfcFActiveListen => Some(Technology::NfcF),
            Self::Iso15693Poll | Self::Iso15693Listen => Some(Technology::Iso15693),
            Self::Other(_) => None,
        }
    }
}

wire_enum! {
    /// RF protocol
    pub enum RfProtocol {
        /// Protocol not determined
        Undetermined = 0x00,
        /// Type 1 Tag
        T1t = 0x01,
        /// Type 2 Tag
        T2t = 0x02,
        /// Type 3 Tag
        T3t = 0x03,
        /// ISO-DEP
        IsoDep = 0x04,
        /// NFC-DEP
        NfcDep = 0x05,
    }
}

wire_enum! {
    /// RF interface
    pub enum RfInterface {
        /// NFCEE direct
        NfceeDirect = 0x00,
        /// Frame interface
        Frame = 0x01,
        /// ISO-DEP interface
        IsoDep = 0x02,
        /// NFC-DEP interface
        NfcDep = 0x03,
    }
}

wire_enum! {
    /// RF technology used by routing tables and NFCEE requests
    pub enum Technology {
        /// NFC-A
        NfcA = 0x00,
        /// NFC-B
        NfcB = 0x01,
        /// NFC-F
        NfcF = 0x02,
        /// ISO 15693
        Iso15693 = 0x03,
    }
}

wire_enum! {
    /// Reason carried by RF_DEACTIVATE_NTF
    pub enum DeactivationReason {
        /// Requested by the device host
        DhRequest = 0x00,
        /// Requested by the remote endpoint
        EndpointRequest = 0x01,
        /// RF link loss
        RfLinkLoss = 0x02,
        /// NFC-B bad AFI
        NfcBBadAfi = 0x03,
    }
}

wire_enum! {
    /// Destination type of a logical connection
    pub enum DestinationType {
        /// NFCC loopback
        NfccLoopback = 0x01,
        /// Remote NFC endpoint
        RemoteEndpoint = 0x02,
        /// NFC execution environment
        Nfcee = 0x03,
    }
}

wire_enum! {
    /// Configuration status reported by CORE_RESET
    pub enum ConfigStatus {
        /// Configuration kept
        Kept = 0x00,
        /// Configuration reset
        Reset = 0x01,
    }
}

strict_enum! {
    /// Deactivation type of RF_DEACTIVATE
    pub enum DeactivationType as "deactivation_type" {
        /// Back to idle
        Idle = 0x00,
        /// Sleep mode
        Sleep = 0x01,
        /// Sleep after field
        SleepAf = 0x02,
        /// Back to discovery
        Discovery = 0x03,
    }
}

strict_enum! {
    /// Status of an NFCEE reported by NFCEE_DISCOVER_NTF
    pub enum NfceeStatus as "nfcee_status" {
        /// Connected and enabled
        Enabled = 0x00,
        /// Connected and disabled
        Disabled = 0x01,
        /// Removed
        Removed = 0x02,
    }
}

strict_enum! {
    /// Notification type of RF_DISCOVER_NTF
    pub enum DiscoverNotificationType as "notification_type" {
        /// Last notification
        Last = 0x00,
        /// Last notification, limit of the NFCC reached
        LastLimit = 0x01,
        /// More notifications follow
        More = 0x02,
    }
}

bitflags! {
    /// Reader/writer protocols the caller wants to poll for
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct ReaderProtocols: u16 {
        /// Type 1 Tag over NFC-A
        const T1T = 1 << 0;
        /// Type 2 Tag over NFC-A
        const T2T = 1 << 1;
        /// Type 3 Tag over NFC-F
        const T3T = 1 << 2;
        /// ISO-DEP over NFC-A
        const ISO_DEP_A = 1 << 3;
        /// ISO-DEP over NFC-B
        const ISO_DEP_B = 1 << 4;
        /// NFC-DEP (peer to peer initiator)
        const NFC_DEP = 1 << 5;
        /// ISO 15693 vicinity cards
        const T5T = 1 << 6;
    }
}

impl ReaderProtocols {
    /// Poll modes needed to discover the requested protocols
    pub fn poll_modes(self) -> Vec<RfTechMode> {
        let mut modes = Vec::new();
        if self.intersects(Self::T1T | Self::T2T | Self::ISO_DEP_A | Self::NFC_DEP) {
            modes.push(RfTechMode::NfcAPassivePoll);
        }
        if self.contains(Self::ISO_DEP_B) {
            modes.push(RfTechMode::NfcBPassivePoll);
        }
        if self.intersects(Self::T3T | Self::NFC_DEP) {
            modes.push(RfTechMode::NfcFPassivePoll);
        }
        if self.contains(Self::T5T) {
            modes.push(RfTechMode::Iso15693Poll);
        }
        modes
    }
}

bitflags! {
    /// Card emulation protocols the device host wants to listen with
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct CardProtocols: u16 {
        /// ISO-DEP over NFC-A
        const ISO_DEP_A = 1 << 0;
        /// ISO-DEP over NFC-B
        const ISO_DEP_B = 1 << 1;
        /// NFC-DEP over NFC-A (peer to peer target)
        const NFC_DEP_A = 1 << 2;
        /// NFC-DEP over NFC-F (peer to peer target)
        const NFC_DEP_F = 1 << 3;
        /// Type 3 Tag emulation over NFC-F
        const T3T = 1 << 4;
    }
}

impl CardProtocols {
    /// Technologies the device host listens on for these protocols
    pub fn technologies(self) -> Technologies {
        let mut techs = Technologies::empty();
        if self.intersects(Self::ISO_DEP_A | Self::NFC_DEP_A) {
            techs |= Technologies::NFC_A;
        }
        if self.contains(Self::ISO_DEP_B) {
            techs |= Technologies::NFC_B;
        }
        if self.intersects(Self::NFC_DEP_F | Self::T3T) {
            techs |= Technologies::NFC_F;
        }
        techs
    }
}

bitflags! {
    /// Set of RF technologies
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct Technologies: u8 {
        /// NFC-A
        const NFC_A = 1 << 0;
        /// NFC-B
        const NFC_B = 1 << 1;
        /// NFC-F
        const NFC_F = 1 << 2;
        /// ISO 15693
        const ISO_15693 = 1 << 3;
    }
}

impl Technologies {
    /// Set containing the single technology
    pub const fn from_technology(tech: Technology) -> Self {
        match tech {
            Technology::NfcA => Self::NFC_A,
            Technology::NfcB => Self::NFC_B,
            Technology::NfcF => Self::NFC_F,
            Technology::Iso15693 => Self::ISO_15693,
            Technology::Other(_) => Self::empty(),
        }
    }

    /// Iterate the technologies in wire order
    pub fn technologies(self) -> impl Iterator<Item = Technology> {
        [
            (Self::NFC_A, Technology::NfcA),
            (Self::NFC_B, Technology::NfcB),
            (Self::NFC_F, Technology::NfcF),
            (Self::ISO_15693, Technology::Iso15693),
        ]
        .into_iter()
        .filter(move |(flag, _)| self.contains(*flag))
        .map(|(_, tech)| tech)
    }

    /// Passive listen modes for these technologies
    pub fn listen_modes(self) -> Vec<RfTechMode> {
        self.technologies()
            .filter_map(|tech| match tech {
                Technology::NfcA => Some(RfTechMode::NfcAPassiveListen),
                Technology::NfcB => Some(RfTechMode::NfcBPassiveListen),
                Technology::NfcF => Some(RfTechMode::NfcFPassiveListen),
                Technology::Iso15693 => Some(RfTechMode::Iso15693Listen),
                Technology::Other(_) => None,
            })
            .collect()
    }
}

/// Type-length-value parameter
///
/// Used for configuration parameters, connection-create parameters and
/// NFCEE information TLVs.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tlv {
    /// Type or parameter identifier
    pub tag: u8,
    /// Value bytes (at most 255)
    pub value: Bytes,
}

impl Tlv {
    /// Create a new TLV
    pub fn new(tag: u8, value: impl Into<Bytes>) -> Self {
        Self {
            tag,
            value: value.into(),
        }
    }

    pub(crate) fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        writer.tlv("tlv value", self.tag, &self.value)?;
        Ok(())
    }

    pub(crate) fn decode(reader: &mut WireReader) -> Result<Self> {
        let tag = reader.u8("tlv type")?;
        let value = reader.length_prefixed("tlv value")?;
        Ok(Self { tag, value })
    }

    pub(crate) fn decode_list(reader: &mut WireReader, count: u8) -> Result<Vec<Self>> {
        (0..count).map(|_| Self::decode(reader)).collect()
    }
}

bitflags! {
    /// RF discovery map mode
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    #[repr(transparent)]
    pub struct MappingMode: u8 {
        /// Map the interface in poll mode
        const POLL = 0x01;
        /// Map the interface in listen mode
        const LISTEN = 0x02;
    }
}

/// One entry of RF_DISCOVER_MAP_CMD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MappingConfig {
    /// RF protocol to map
    pub protocol: RfProtocol,
    /// Poll and/or listen
    pub mode: MappingMode,
    /// RF interface the protocol is mapped to
    pub interface: RfInterface,
}

impl MappingConfig {
    /// Create a new mapping entry
    pub const fn new(protocol: RfProtocol, mode: MappingMode, interface: RfInterface) -> Self {
        Self {
            protocol,
            mode,
            interface,
        }
    }

    /// Mapping for ISO-DEP and NFC-DEP to their dedicated interfaces in both directions
    pub fn default_map() -> Vec<Self> {
        let both = MappingMode::POLL | MappingMode::LISTEN;
        vec![
            Self::new(RfProtocol::IsoDep, both, RfInterface::IsoDep),
            Self::new(RfProtocol::NfcDep, both, RfInterface::NfcDep),
        ]
    }
}

/// One entry of RF_DISCOVER_CMD
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiscoverConfig {
    /// Technology and mode to discover
    pub tech_mode: RfTechMode,
    /// Discovery frequency, 0x01 means every period
    pub frequency: u8,
}

impl DiscoverConfig {
    /// Discover `tech_mode` in every discovery period
    pub const fn every_period(tech_mode: RfTechMode) -> Self {
        Self {
            tech_mode,
            frequency: 0x01,
        }
    }
}

/// Listen-mode routing table entry
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RoutingEntry {
    /// Route a technology to a host
    Technology {
        /// Destination host (NFCEE id or DH)
        route: u8,
        /// Power state bitmap
        power_state: u8,
        /// Routed technology
        technology: Technology,
    },
    /// Route a protocol to a host
    Protocol {
        /// Destination host (NFCEE id or DH)
        route: u8,
        /// Power state bitmap
        power_state: u8,
        /// Routed protocol
        protocol: RfProtocol,
    },
    /// Route an application identifier to a host
    Aid {
        /// Destination host (NFCEE id or DH)
        route: u8,
        /// Power state bitmap
        power_state: u8,
        /// Application identifier
        aid: Bytes,
    },
}

impl RoutingEntry {
    /// Destination host of the entry
    pub const fn route(&self) -> u8 {
        match self {
            Self::Technology { route, .. } | Self::Protocol { route, .. } | Self::Aid { route, .. } => {
                *route
            }
        }
    }

    pub(crate) fn encode(&self, writer: &mut WireWriter) -> Result<()> {
        match self {
            Self::Technology {
                route,
                power_state,
                technology,
            } => writer.tlv(
                "routing entry",
                routing::TECHNOLOGY,
                &[*route, *power_state, u8::from(*technology)],
            )?,
            Self::Protocol {
                route,
                power_state,
                protocol,
            } => writer.tlv(
                "routing entry",
                routing::PROTOCOL,
                &[*route, *power_state, u8::from(*protocol)],
            )?,
            Self::Aid {
                route,
                power_state,
                aid,
            } => {
                let mut value = Vec::with_capacity(aid.len() + 2);
                value.extend_from_slice(&[*route, *power_state]);
                value.extend_from_slice(aid);
                writer.tlv("routing entry", routing::AID, &value)?
            }
        };
        Ok(())
    }

    pub(crate) fn decode(reader: &mut WireReader) -> Result<Self> {
        let Tlv { tag, value } = Tlv::decode(reader)?;
        let mut value = WireReader::new(value);
        let route = value.u8("route")?;
        let power_state = value.u8("power_state")?;
        let entry = match tag {
            routing::TECHNOLOGY => Self::Technology {
                route,
                power_state,
                technology: Technology::from(value.u8("technology")?),
            },
            routing::PROTOCOL => Self::Protocol {
                route,
                power_state,
                protocol: RfProtocol::from(value.u8("protocol")?),
            },
            routing::AID => Self::Aid {
                route,
                power_state,
                aid: value.rest(),
            },
            other => return Err(Error::invalid("routing entry type", other)),
        };
        if !value.is_empty() {
            return Err(Error::invalid("routing entry length", tag));
        }
        Ok(entry)
    }
}
