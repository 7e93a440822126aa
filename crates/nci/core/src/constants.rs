//! Constants used in NCI operations
//!
//! This module contains the identifiers defined by NCI 1.0: group and opcode
//! identifiers, header sizes, configuration parameter identifiers and the
//! well-known host identifiers used by listen-mode routing.

/// Size of both the control and the data packet header
pub const HEADER_SIZE: usize = 3;

/// Largest payload a single packet can carry (one-byte length field)
pub const MAX_PACKET_PAYLOAD: usize = 255;

/// Identifier of the static RF logical connection
pub const RF_CONN_ID: u8 = 0x00;

/// Initial credit value meaning the connection is not flow controlled
pub const CREDITS_UNLIMITED: u8 = 0xFF;

/// Group identifiers (GID)
pub mod gid {
    /// Core group
    pub const CORE: u8 = 0x0;
    /// RF management group
    pub const RF: u8 = 0x1;
    /// NFCEE management group
    pub const NFCEE: u8 = 0x2;
    /// Proprietary group
    pub const PROPRIETARY: u8 = 0xF;
}

/// Opcode identifiers (OID) of the core group
pub mod core_oid {
    /// CORE_RESET command/response/notification
    pub const RESET: u8 = 0x00;
    /// CORE_INIT command/response
    pub const INIT: u8 = 0x01;
    /// CORE_SET_CONFIG command/response
    pub const SET_CONFIG: u8 = 0x02;
    /// CORE_GET_CONFIG command/response
    pub const GET_CONFIG: u8 = 0x03;
    /// CORE_CONN_CREATE command/response
    pub const CONN_CREATE: u8 = 0x04;
    /// CORE_CONN_CLOSE command/response
    pub const CONN_CLOSE: u8 = 0x05;
    /// CORE_CONN_CREDITS notification
    pub const CONN_CREDITS: u8 = 0x06;
    /// CORE_GENERIC_ERROR notification
    pub const GENERIC_ERROR: u8 = 0x07;
    /// CORE_INTERFACE_ERROR notification
    pub const INTERFACE_ERROR: u8 = 0x08;
}

/// Opcode identifiers (OID) of the RF management group
pub mod rf_oid {
    /// RF_DISCOVER_MAP command/response
    pub const DISCOVER_MAP: u8 = 0x00;
    /// RF_SET_LISTEN_MODE_ROUTING command/response
    pub const SET_LISTEN_MODE_ROUTING: u8 = 0x01;
    /// RF_GET_LISTEN_MODE_ROUTING command/response/notification
    pub const GET_LISTEN_MODE_ROUTING: u8 = 0x02;
    /// RF_DISCOVER command/response/notification
    pub const DISCOVER: u8 = 0x03;
    /// RF_DISCOVER_SELECT command/response
    pub const DISCOVER_SELECT: u8 = 0x04;
    /// RF_INTF_ACTIVATED notification
    pub const INTF_ACTIVATED: u8 = 0x05;
    /// RF_DEACTIVATE command/response/notification
    pub const DEACTIVATE: u8 = 0x06;
    /// RF_FIELD_INFO notification
    pub const FIELD_INFO: u8 = 0x07;
    /// RF_T3T_POLLING command/response/notification
    pub const T3T_POLLING: u8 = 0x08;
    /// RF_NFCEE_ACTION notification
    pub const NFCEE_ACTION: u8 = 0x09;
    /// RF_NFCEE_DISCOVERY_REQ notification
    pub const NFCEE_DISCOVERY_REQ: u8 = 0x0A;
    /// RF_PARAMETER_UPDATE command/response
    pub const PARAMETER_UPDATE: u8 = 0x0B;
}

/// Opcode identifiers (OID) of the NFCEE management group
pub mod nfcee_oid {
    /// NFCEE_DISCOVER command/response/notification
    pub const DISCOVER: u8 = 0x00;
    /// NFCEE_MODE_SET command/response
    pub const MODE_SET: u8 = 0x01;
}

/// Configuration parameter identifiers used by the engine
pub mod config {
    /// Total duration of a single discovery period (ms, little-endian u16)
    pub const TOTAL_DURATION: u8 = 0x00;
    /// NFC-A listen: SEL_RES protocol bits
    pub const LA_SEL_INFO: u8 = 0x32;
    /// NFC-B listen: SENSB_RES protocol info
    pub const LB_SENSB_INFO: u8 = 0x38;
    /// NFC-F listen: protocol type
    pub const LF_PROTOCOL_TYPE: u8 = 0x50;

    /// LA_SEL_INFO bit advertising ISO-DEP
    pub const LA_SEL_INFO_ISO_DEP: u8 = 0x20;
    /// LA_SEL_INFO bit advertising NFC-DEP
    pub const LA_SEL_INFO_NFC_DEP: u8 = 0x40;
    /// LB_SENSB_INFO bit advertising ISO-DEP
    pub const LB_SENSB_INFO_ISO_DEP: u8 = 0x01;
    /// LF_PROTOCOL_TYPE bit advertising NFC-DEP
    pub const LF_PROTOCOL_TYPE_NFC_DEP: u8 = 0x02;
}

/// Well-known host identifiers for listen-mode routing
pub mod host {
    /// The device host running this engine
    pub const DH: u8 = 0x00;
}

/// Listen-mode routing entry types
pub mod routing {
    /// Technology-based routing entry
    pub const TECHNOLOGY: u8 = 0x00;
    /// Protocol-based routing entry
    pub const PROTOCOL: u8 = 0x01;
    /// AID-based routing entry
    pub const AID: u8 = 0x02;

    /// Power state: switched on
    pub const POWER_SWITCHED_ON: u8 = 0x01;
}

/// CORE_CONN_CREATE destination-specific parameter types
pub mod conn_param {
    /// RF discovery id and protocol of a remote NFC endpoint
    pub const RF_DISCOVERY: u8 = 0x00;
    /// NFCEE id and interface protocol
    pub const NFCEE: u8 = 0x01;
}

/// RF_NFCEE_DISCOVERY_REQ TLV types
pub mod nfcee_discovery_req {
    /// Add a discovery request
    pub const ADD: u8 = 0x00;
    /// Remove a discovery request
    pub const REMOVE: u8 = 0x01;
}
