//! Typed NCI commands
//!
//! Each command knows its opcode and how to serialize its payload. Encoding
//! validates every count and length prefix so an oversized parameter list
//! fails with [`Error::FieldTooLong`] instead of producing a corrupt frame.

use bytes::Bytes;

use crate::codec::WireWriter;
use crate::constants::{core_oid, gid, nfcee_oid, rf_oid};
use crate::types::{
    DeactivationType, DestinationType, DiscoverConfig, MappingConfig, RfInterface, RfProtocol,
    RoutingEntry, Tlv,
};
use crate::{Error, Opcode, Result};

/// A control command sent from the device host to the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// CORE_RESET_CMD
    CoreReset {
        /// Reset the configuration as well as the state
        reset_config: bool,
    },
    /// CORE_INIT_CMD
    CoreInit,
    /// CORE_SET_CONFIG_CMD
    CoreSetConfig {
        /// Parameters to set
        params: Vec<Tlv>,
    },
    /// CORE_GET_CONFIG_CMD
    CoreGetConfig {
        /// Parameter identifiers to read
        ids: Vec<u8>,
    },
    /// CORE_CONN_CREATE_CMD
    CoreConnCreate {
        /// Destination of the logical connection
        destination: DestinationType,
        /// Destination-specific parameters
        params: Vec<Tlv>,
    },
    /// CORE_CONN_CLOSE_CMD
    CoreConnClose {
        /// Connection to close
        conn_id: u8,
    },
    /// RF_DISCOVER_MAP_CMD
    RfDiscoverMap {
        /// Protocol to interface mappings
        mappings: Vec<MappingConfig>,
    },
    /// RF_SET_LISTEN_MODE_ROUTING_CMD
    RfSetListenModeRouting {
        /// More routing commands follow
        more: bool,
        /// Routing entries
        entries: Vec<RoutingEntry>,
    },
    /// RF_GET_LISTEN_MODE_ROUTING_CMD
    RfGetListenModeRouting,
    /// RF_DISCOVER_CMD
    RfDiscover {
        /// Technologies and modes to discover
        configs: Vec<DiscoverConfig>,
    },
    /// RF_DISCOVER_SELECT_CMD
    RfDiscoverSelect {
        /// Discovery id reported by RF_DISCOVER_NTF
        discovery_id: u8,
        /// Protocol to activate
        protocol: RfProtocol,
        /// Interface to activate
        interface: RfInterface,
    },
    /// RF_DEACTIVATE_CMD
    RfDeactivate {
        /// Target state
        kind: DeactivationType,
    },
    /// RF_T3T_POLLING_CMD
    RfT3tPolling {
        /// System code, as sent in SENSF_REQ
        system_code: [u8; 2],
        /// Request code
        request_code: u8,
        /// Time slot number
        time_slot: u8,
    },
    /// RF_PARAMETER_UPDATE_CMD
    RfParameterUpdate {
        /// RF communication parameters
        params: Vec<Tlv>,
    },
    /// NFCEE_DISCOVER_CMD
    NfceeDiscover {
        /// Enable or disable NFCEE discovery
        enable: bool,
    },
    /// NFCEE_MODE_SET_CMD
    NfceeModeSet {
        /// Target NFCEE
        nfcee_id: u8,
        /// Enable or disable the NFCEE
        enable: bool,
    },
    /// Opaque command, encoded verbatim
    Raw {
        /// Opcode of the command
        opcode: Opcode,
        /// Payload bytes
        payload: Bytes,
    },
}

impl Command {
    /// Opcode of the command
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::CoreReset { .. } => Opcode::new(gid::CORE, core_oid::RESET),
            Self::CoreInit => Opcode::new(gid::CORE, core_oid::INIT),
            Self::CoreSetConfig { .. } => Opcode::new(gid::CORE, core_oid::SET_CONFIG),
            Self::CoreGetConfig { .. } => Opcode::new(gid::CORE, core_oid::GET_CONFIG),
            Self::CoreConnCreate { .. } => Opcode::new(gid::CORE, core_oid::CONN_CREATE),
            Self::CoreConnClose { .. } => Opcode::new(gid::CORE, core_oid::CONN_CLOSE),
            Self::RfDiscoverMap { .. } => Opcode::new(gid::RF, rf_oid::DISCOVER_MAP),
            Self::RfSetListenModeRouting { .. } => {
                Opcode::new(gid::RF, rf_oid::SET_LISTEN_MODE_ROUTING)
            }
            Self::RfGetListenModeRouting => Opcode::new(gid::RF, rf_oid::GET_LISTEN_MODE_ROUTING),
            Self::RfDiscover { .. } => Opcode::new(gid::RF, rf_oid::DISCOVER),
            Self::RfDiscoverSelect { .. } => Opcode::new(gid::RF, rf_oid::DISCOVER_SELECT),
            Self::RfDeactivate { .. } => Opcode::new(gid::RF, rf_oid::DEACTIVATE),
            Self::RfT3tPolling { .. } => Opcode::new(gid::RF, rf_oid::T3T_POLLING),
            Self::RfParameterUpdate { .. } => Opcode::new(gid::RF, rf_oid::PARAMETER_UPDATE),
            Self::NfceeDiscover { .. } => Opcode::new(gid::NFCEE, nfcee_oid::DISCOVER),
            Self::NfceeModeSet { .. } => Opcode::new(gid::NFCEE, nfcee_oid::MODE_SET),
            Self::Raw { opcode, .. } => *opcode,
        }
    }

    /// Name of the command for logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::CoreReset { .. } => "CORE_RESET_CMD",
            Self::CoreInit => "CORE_INIT_CMD",
            Self::CoreSetConfig { .. } => "CORE_SET_CONFIG_CMD",
            Self::CoreGetConfig { .. } => "CORE_GET_CONFIG_CMD",
            Self::CoreConnCreate { .. } => "CORE_CONN_CREATE_CMD",
            Self::CoreConnClose { .. } => "CORE_CONN_CLOSE_CMD",
            Self::RfDiscoverMap { .. } => "RF_DISCOVER_MAP_CMD",
            Self::RfSetListenModeRouting { .. } => "RF_SET_LISTEN_MODE_ROUTING_CMD",
            Self::RfGetListenModeRouting => "RF_GET_LISTEN_MODE_ROUTING_CMD",
            Self::RfDiscover { .. } => "RF_DISCOVER_CMD",
            Self::RfDiscoverSelect { .. } => "RF_DISCOVER_SELECT_CMD",
            Self::RfDeactivate { .. } => "RF_DEACTIVATE_CMD",
            Self::RfT3tPolling { .. } => "RF_T3T_POLLING_CMD",
            Self::RfParameterUpdate { .. } => "RF_PARAMETER_UPDATE_CMD",
            Self::NfceeDiscover { .. } => "NFCEE_DISCOVER_CMD",
            Self::NfceeModeSet { .. } => "NFCEE_MODE_SET_CMD",
            Self::Raw { .. } => "RAW_CMD",
        }
    }

    /// Returns true for commands that bypass typed response decoding
    pub const fn is_raw(&self) -> bool {
        matches!(self, Self::Raw { .. })
    }

    /// Serialize the command payload (header not included)
    pub fn encode_payload(&self) -> Result<Bytes> {
        let mut w = WireWriter::with_capacity(16);
        match self {
            Self::CoreReset { reset_config } => {
                w.u8(u8::from(*reset_config));
            }
            Self::CoreInit | Self::RfGetListenModeRouting => {}
            Self::CoreSetConfig { params } | Self::RfParameterUpdate { params } => {
                w.count("parameter count", params.len())?;
                for param in params {
                    param.encode(&mut w)?;
                }
            }
            Self::CoreGetConfig { ids } => {
                w.count("parameter count", ids.len())?;
                w.bytes(ids);
            }
            Self::CoreConnCreate {
                destination,
                params,
            } => {
                w.u8(u8::from(*destination));
                w.count("parameter count", params.len())?;
                for param in params {
                    param.encode(&mut w)?;
                }
            }
            Self::CoreConnClose { conn_id } => {
                w.u8(*conn_id);
            }
            Self::RfDiscoverMap { mappings } => {
                w.count("mapping count", mappings.len())?;
                for mapping in mappings {
                    w.u8(u8::from(mapping.protocol))
                        .u8(mapping.mode.bits())
                        .u8(u8::from(mapping.interface));
                }
            }
            Self::RfSetListenModeRouting { more, entries } => {
                w.u8(u8::from(*more));
                w.count("routing entry count", entries.len())?;
                for entry in entries {
                    entry.encode(&mut w)?;
                }
            }
            Self::RfDiscover { configs } => {
                w.count("configuration count", configs.len())?;
                for config in configs {
                    w.u8(u8::from(config.tech_mode)).u8(config.frequency);
                }
            }
            Self::RfDiscoverSelect {
                discovery_id,
                protocol,
                interface,
            } => {
                w.u8(*discovery_id)
                    .u8(u8::from(*protocol))
                    .u8(u8::from(*interface));
            }
            Self::RfDeactivate { kind } => {
                w.u8(u8::from(*kind));
            }
            Self::RfT3tPolling {
                system_code,
                request_code,
                time_slot,
            } => {
                w.bytes(system_code).u8(*request_code).u8(*time_slot);
            }
            Self::NfceeDiscover { enable } => {
                w.u8(u8::from(*enable));
            }
            Self::NfceeModeSet { nfcee_id, enable } => {
                w.u8(*nfcee_id).u8(u8::from(*enable));
            }
            Self::Raw { payload, .. } => {
                w.bytes(payload);
            }
        }
        Ok(w.freeze())
    }

    /// Parse a complete command frame (header plus payload) into a raw command
    ///
    /// Used by scripted command sequences, which carry frames as hex text.
    pub fn from_frame(frame: &[u8]) -> Result<Self> {
        let packet = crate::packet::Packet::parse(frame)?;
        match packet.header {
            crate::PacketHeader::Control(header)
                if header.message_type == crate::MessageType::Command =>
            {
                Ok(Self::Raw {
                    opcode: header.opcode,
                    payload: packet.payload,
                })
            }
            _ => Err(Error::InvalidHeader("not a command packet")),
        }
    }
}
