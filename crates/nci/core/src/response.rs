//! Typed NCI responses
//!
//! Responses are decoded against the opcode of the command that produced
//! them. Every field is length-checked and trailing bytes are rejected. A
//! controller may answer a failed command with only the status byte, which
//! decodes to [`Response::Status`] whatever the opcode.

use bytes::Bytes;

use crate::codec::WireReader;
use crate::constants::{core_oid, gid, nfcee_oid, rf_oid};
use crate::types::{ConfigStatus, RfInterface, Status, Tlv};
use crate::{Error, Opcode, Result, ResultExt};

/// Contents of CORE_INIT_RSP
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitInfo {
    /// NFCC features bitmap
    pub features: [u8; 4],
    /// RF interfaces supported by the controller
    pub interfaces: Vec<RfInterface>,
    /// Maximum number of dynamic logical connections
    pub max_logical_connections: u8,
    /// Maximum routing table size in bytes
    pub max_routing_table_size: u16,
    /// Maximum control packet payload size
    pub max_control_packet_size: u8,
    /// Maximum size of large parameters
    pub max_large_parameter_size: u16,
    /// Manufacturer id
    pub manufacturer_id: u8,
    /// Manufacturer-specific information
    pub manufacturer_info: [u8; 4],
}

/// A control response from the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Response carrying only a status byte
    Status {
        /// Opcode of the response
        opcode: Opcode,
        /// Reported status
        status: Status,
    },
    /// CORE_RESET_RSP
    CoreReset {
        /// Reported status
        status: Status,
        /// NCI version implemented by the controller
        version: u8,
        /// Whether the configuration was kept
        config_status: ConfigStatus,
    },
    /// CORE_INIT_RSP with an OK status
    CoreInit(InitInfo),
    /// CORE_SET_CONFIG_RSP
    CoreSetConfig {
        /// Reported status
        status: Status,
        /// Parameters the controller rejected
        invalid_ids: Vec<u8>,
    },
    /// CORE_GET_CONFIG_RSP
    CoreGetConfig {
        /// Reported status
        status: Status,
        /// Returned parameters
        params: Vec<Tlv>,
    },
    /// CORE_CONN_CREATE_RSP with an OK status
    CoreConnCreate {
        /// Maximum data packet payload size
        max_payload: u8,
        /// Initial number of credits
        credits: u8,
        /// Assigned connection id
        conn_id: u8,
    },
    /// RF_PARAMETER_UPDATE_RSP
    RfParameterUpdate {
        /// Reported status
        status: Status,
        /// Parameters the controller rejected
        invalid_ids: Vec<u8>,
    },
    /// NFCEE_DISCOVER_RSP
    NfceeDiscover {
        /// Reported status
        status: Status,
        /// Number of NFCEEs that will be reported
        count: u8,
    },
    /// Response to a raw command, payload kept verbatim
    Raw {
        /// Opcode of the response
        opcode: Opcode,
        /// Payload bytes
        payload: Bytes,
    },
}

impl Response {
    /// Decode a response payload for the given opcode
    pub fn decode(opcode: Opcode, payload: Bytes) -> Result<Self> {
        Self::decode_inner(opcode, payload).context(format!("response {opcode}"))
    }

    fn decode_inner(opcode: Opcode, payload: Bytes) -> Result<Self> {
        let mut r = WireReader::new(payload);
        let status = Status::from(r.u8("status")?);
        if !status.is_ok() && r.is_empty() {
            return Ok(Self::Status { opcode, status });
        }

        let response = match (opcode.gid, opcode.oid) {
            (gid::CORE, core_oid::RESET) => Self::CoreReset {
                status,
                version: r.u8("version")?,
                config_status: ConfigStatus::from(r.u8("config_status")?),
            },
            (gid::CORE, core_oid::INIT) => {
                let features = r.array::<4>("features")?;
                let count = r.u8("interface count")?;
                let interfaces = r
                    .take("interfaces", usize::from(count))?
                    .iter()
                    .map(|b| RfInterface::from(*b))
                    .collect();
                let info = InitInfo {
                    features,
                    interfaces,
                    max_logical_connections: r.u8("max_logical_connections")?,
                    max_routing_table_size: r.u16_le("max_routing_table_size")?,
                    max_control_packet_size: r.u8("max_control_packet_size")?,
                    max_large_parameter_size: r.u16_le("max_large_parameter_size")?,
                    manufacturer_id: r.u8("manufacturer_id")?,
                    manufacturer_info: r.array::<4>("manufacturer_info")?,
                };
                if !status.is_ok() {
                    r.finish(opcode)?;
                    return Ok(Self::Status { opcode, status });
                }
                Self::CoreInit(info)
            }
            (gid::CORE, core_oid::SET_CONFIG) => {
                let count = r.u8("parameter count")?;
                Self::CoreSetConfig {
                    status,
                    invalid_ids: r.take("parameter ids", usize::from(count))?.to_vec(),
                }
            }
            (gid::RF, rf_oid::PARAMETER_UPDATE) => {
                let count = r.u8("parameter count")?;
                Self::RfParameterUpdate {
                    status,
                    invalid_ids: r.take("parameter ids", usize::from(count))?.to_vec(),
                }
            }
            (gid::CORE, core_oid::GET_CONFIG) => {
                let count = r.u8("parameter count")?;
                Self::CoreGetConfig {
                    status,
                    params: Tlv::decode_list(&mut r, count)?,
                }
            }
            (gid::CORE, core_oid::CONN_CREATE) => {
                let max_payload = r.u8("max_payload")?;
                let credits = r.u8("credits")?;
                let conn_id = r.u8("conn_id")?;
                if !status.is_ok() {
                    r.finish(opcode)?;
                    return Ok(Self::Status { opcode, status });
                }
                Self::CoreConnCreate {
                    max_payload,
                    credits,
                    conn_id,
                }
            }
            (gid::NFCEE, nfcee_oid::DISCOVER) => Self::NfceeDiscover {
                status,
                count: r.u8("nfcee count")?,
            },
            (gid::CORE, core_oid::CONN_CLOSE)
            | (
                gid::RF,
                rf_oid::DISCOVER_MAP
                | rf_oid::SET_LISTEN_MODE_ROUTING
                | rf_oid::GET_LISTEN_MODE_ROUTING
                | rf_oid::DISCOVER
                | rf_oid::DISCOVER_SELECT
                | rf_oid::DEACTIVATE
                | rf_oid::T3T_POLLING,
            )
            | (gid::NFCEE, nfcee_oid::MODE_SET) => Self::Status { opcode, status },
            (gid::CORE | gid::RF | gid::NFCEE, _) => return Err(Error::UnknownOpcode(opcode)),
            (other, _) => return Err(Error::UnknownGroup(other)),
        };
        r.finish(opcode)?;
        Ok(response)
    }

    /// Wrap a payload verbatim
    pub const fn raw(opcode: Opcode, payload: Bytes) -> Self {
        Self::Raw { opcode, payload }
    }

    /// Status reported by the controller
    ///
    /// A raw response reports its first payload byte.
    pub fn status(&self) -> Status {
        match self {
            Self::Status { status, .. }
            | Self::CoreReset { status, .. }
            | Self::CoreSetConfig { status, .. }
            | Self::CoreGetConfig { status, .. }
            | Self::RfParameterUpdate { status, .. }
            | Self::NfceeDiscover { status, .. } => *status,
            Self::CoreInit(_) | Self::CoreConnCreate { .. } => Status::Ok,
            Self::Raw { payload, .. } => payload.first().map_or(Status::Ok, |b| Status::from(*b)),
        }
    }
}
