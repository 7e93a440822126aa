//! Typed NCI notifications
//!
//! Notifications are decoded by opcode with the same per-field length
//! discipline as responses. An unknown opcode inside a known group decodes to
//! [`Error::UnknownOpcode`], which the engine logs and drops; a group outside
//! NCI 1.0 is [`Error::UnknownGroup`]. The proprietary group is carried
//! opaquely.

use bytes::Bytes;

use crate::codec::WireReader;
use crate::constants::{core_oid, gid, nfcee_discovery_req, nfcee_oid, rf_oid};
use crate::types::{
    ConfigStatus, DeactivationReason, DeactivationType, DiscoverNotificationType, NfceeStatus,
    RfInterface, RfProtocol, RfTechMode, RoutingEntry, Status, Tlv,
};
use crate::{Error, Opcode, Result, ResultExt};

/// Credits returned for one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnCredit {
    /// Connection id
    pub conn_id: u8,
    /// Number of credits returned
    pub credits: u8,
}

/// A remote endpoint reported by RF_DISCOVER_NTF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredTarget {
    /// Id used to select the target
    pub discovery_id: u8,
    /// Protocol of the target
    pub protocol: RfProtocol,
    /// Technology and mode it was discovered with
    pub tech_mode: RfTechMode,
    /// Technology-specific parameters
    pub tech_params: Bytes,
    /// Whether more targets follow
    pub notification_type: DiscoverNotificationType,
}

/// Contents of RF_INTF_ACTIVATED_NTF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Activation {
    /// Id of the activated endpoint
    pub discovery_id: u8,
    /// Activated RF interface
    pub interface: RfInterface,
    /// Protocol of the endpoint
    pub protocol: RfProtocol,
    /// Technology and mode used for activation
    pub activation_tech_mode: RfTechMode,
    /// Maximum data packet payload size of the RF connection
    pub max_payload: u8,
    /// Initial credits of the RF connection
    pub credits: u8,
    /// Technology-specific parameters
    pub tech_params: Bytes,
    /// Technology and mode used for data exchange
    pub exchange_tech_mode: RfTechMode,
    /// Data exchange transmit bit rate
    pub tx_rate: u8,
    /// Data exchange receive bit rate
    pub rx_rate: u8,
    /// Interface activation parameters
    pub activation_params: Bytes,
}

impl Activation {
    /// Returns true if the device host was activated as a listener (card emulation)
    pub fn is_listen(&self) -> bool {
        self.activation_tech_mode.is_listen()
    }
}

/// Whether an NFCEE adds or withdraws a discovery request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiscoveryRequestAction {
    /// The NFCEE wants the technology/protocol discovered
    Add,
    /// The NFCEE no longer needs it
    Remove,
}

/// One entry of RF_NFCEE_DISCOVERY_REQ_NTF
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NfceeDiscoveryRequest {
    /// Add or remove
    pub action: DiscoveryRequestAction,
    /// Requesting NFCEE
    pub nfcee_id: u8,
    /// Requested technology and mode
    pub tech_mode: RfTechMode,
    /// Requested protocol
    pub protocol: RfProtocol,
}

/// Contents of NFCEE_DISCOVER_NTF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NfceeInfo {
    /// NFCEE id
    pub nfcee_id: u8,
    /// Enabled, disabled or removed
    pub status: NfceeStatus,
    /// NFCEE protocols supported
    pub protocols: Vec<u8>,
    /// NFCEE information TLVs
    pub info: Vec<Tlv>,
}

/// Notification kinds, used as subscription keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    /// CORE_RESET_NTF
    CoreReset,
    /// CORE_CONN_CREDITS_NTF
    CoreConnCredits,
    /// CORE_GENERIC_ERROR_NTF
    CoreGenericError,
    /// CORE_INTERFACE_ERROR_NTF
    CoreInterfaceError,
    /// RF_GET_LISTEN_MODE_ROUTING_NTF
    RfListenModeRouting,
    /// RF_DISCOVER_NTF
    RfDiscover,
    /// RF_INTF_ACTIVATED_NTF
    RfIntfActivated,
    /// RF_DEACTIVATE_NTF
    RfDeactivate,
    /// RF_FIELD_INFO_NTF
    RfFieldInfo,
    /// RF_T3T_POLLING_NTF
    RfT3tPolling,
    /// RF_NFCEE_ACTION_NTF
    RfNfceeAction,
    /// RF_NFCEE_DISCOVERY_REQ_NTF
    RfNfceeDiscoveryReq,
    /// NFCEE_DISCOVER_NTF
    NfceeDiscover,
    /// Proprietary group notification
    Proprietary,
    /// Pseudo-kind receiving every notification
    All,
}

/// A control notification from the controller
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// CORE_RESET_NTF
    CoreReset {
        /// Reset reason
        reason: u8,
        /// Whether the configuration was kept
        config_status: ConfigStatus,
    },
    /// CORE_CONN_CREDITS_NTF
    CoreConnCredits(Vec<ConnCredit>),
    /// CORE_GENERIC_ERROR_NTF
    CoreGenericError(Status),
    /// CORE_INTERFACE_ERROR_NTF
    CoreInterfaceError {
        /// Error status
        status: Status,
        /// Affected connection
        conn_id: u8,
    },
    /// RF_GET_LISTEN_MODE_ROUTING_NTF
    RfListenModeRouting {
        /// More notifications follow
        more: bool,
        /// Routing entries
        entries: Vec<RoutingEntry>,
    },
    /// RF_DISCOVER_NTF
    RfDiscover(DiscoveredTarget),
    /// RF_INTF_ACTIVATED_NTF
    RfIntfActivated(Activation),
    /// RF_DEACTIVATE_NTF
    RfDeactivate {
        /// Resulting state
        kind: DeactivationType,
        /// Deactivation reason
        reason: DeactivationReason,
    },
    /// RF_FIELD_INFO_NTF
    RfFieldInfo {
        /// Operating field detected
        field_on: bool,
    },
    /// RF_T3T_POLLING_NTF
    RfT3tPolling {
        /// Polling status
        status: Status,
        /// Number of responses
        count: u8,
        /// SENSF_RES responses, concatenated
        responses: Bytes,
    },
    /// RF_NFCEE_ACTION_NTF
    RfNfceeAction {
        /// NFCEE that acted
        nfcee_id: u8,
        /// What triggered the action
        trigger: u8,
        /// Supporting data
        data: Bytes,
    },
    /// RF_NFCEE_DISCOVERY_REQ_NTF
    RfNfceeDiscoveryReq(Vec<NfceeDiscoveryRequest>),
    /// NFCEE_DISCOVER_NTF
    NfceeDiscover(NfceeInfo),
    /// Proprietary group notification, payload kept verbatim
    Proprietary {
        /// Opcode of the notification
        opcode: Opcode,
        /// Payload bytes
        payload: Bytes,
    },
}

impl Notification {
    /// Decode a notification payload
    pub fn decode(opcode: Opcode, payload: Bytes) -> Result<Self> {
        Self::decode_inner(opcode, payload).context(format!("notification {opcode}"))
    }

    fn decode_inner(opcode: Opcode, payload: Bytes) -> Result<Self> {
        if opcode.gid == gid::PROPRIETARY {
            return Ok(Self::Proprietary { opcode, payload });
        }

        let mut r = WireReader::new(payload);
        let notification = match (opcode.gid, opcode.oid) {
            (gid::CORE, core_oid::RESET) => Self::CoreReset {
                reason: r.u8("reason")?,
                config_status: ConfigStatus::from(r.u8("config_status")?),
            },
            (gid::CORE, core_oid::CONN_CREDITS) => {
                let count = r.u8("entry count")?;
                let entries = (0..count)
                    .map(|_| -> Result<ConnCredit> {
                        Ok(ConnCredit {
                            conn_id: r.u8("conn_id")?,
                            credits: r.u8("credits")?,
                        })
                    })
                    .collect::<Result<_>>()?;
                Self::CoreConnCredits(entries)
            }
            (gid::CORE, core_oid::GENERIC_ERROR) => {
                Self::CoreGenericError(Status::from(r.u8("status")?))
            }
            (gid::CORE, core_oid::INTERFACE_ERROR) => Self::CoreInterfaceError {
                status: Status::from(r.u8("status")?),
                conn_id: r.u8("conn_id")?,
            },
            (gid::RF, rf_oid::GET_LISTEN_MODE_ROUTING) => {
                let more = r.u8("more")? != 0;
                let count = r.u8("entry count")?;
                let entries = (0..count)
                    .map(|_| RoutingEntry::decode(&mut r))
                    .collect::<Result<_>>()?;
                Self::RfListenModeRouting { more, entries }
            }
            (gid::RF, rf_oid::DISCOVER) => Self::RfDiscover(DiscoveredTarget {
                discovery_id: r.u8("discovery_id")?,
                protocol: RfProtocol::from(r.u8("protocol")?),
                tech_mode: RfTechMode::from(r.u8("tech_mode")?),
                tech_params: r.length_prefixed("tech_params")?,
                notification_type: DiscoverNotificationType::try_from(r.u8("notification_type")?)?,
            }),
            (gid::RF, rf_oid::INTF_ACTIVATED) => Self::RfIntfActivated(Activation {
                discovery_id: r.u8("discovery_id")?,
                interface: RfInterface::from(r.u8("interface")?),
                protocol: RfProtocol::from(r.u8("protocol")?),
                activation_tech_mode: RfTechMode::from(r.u8("activation_tech_mode")?),
                max_payload: r.u8("max_payload")?,
                credits: r.u8("credits")?,
                tech_params: r.length_prefixed("tech_params")?,
                exchange_tech_mode: RfTechMode::from(r.u8("exchange_tech_mode")?),
                tx_rate: r.u8("tx_rate")?,
                rx_rate: r.u8("rx_rate")?,
                activation_params: r.length_prefixed("activation_params")?,
            }),
            (gid::RF, rf_oid::DEACTIVATE) => Self::RfDeactivate {
                kind: DeactivationType::try_from(r.u8("deactivation_type")?)?,
                reason: DeactivationReason::from(r.u8("reason")?),
            },
            (gid::RF, rf_oid::FIELD_INFO) => Self::RfFieldInfo {
                field_on: r.u8("field_status")? != 0,
            },
            (gid::RF, rf_oid::T3T_POLLING) => Self::RfT3tPolling {
                status: Status::from(r.u8("status")?),
                count: r.u8("response count")?,
                responses: r.rest(),
            },
            (gid::RF, rf_oid::NFCEE_ACTION) => Self::RfNfceeAction {
                nfcee_id: r.u8("nfcee_id")?,
                trigger: r.u8("trigger")?,
                data: r.length_prefixed("data")?,
            },
            (gid::RF, rf_oid::NFCEE_DISCOVERY_REQ) => {
                let count = r.u8("entry count")?;
                let entries = (0..count)
                    .map(|_| decode_discovery_request(&mut r))
                    .collect::<Result<_>>()?;
                Self::RfNfceeDiscoveryReq(entries)
            }
            (gid::NFCEE, nfcee_oid::DISCOVER) => {
                let nfcee_id = r.u8("nfcee_id")?;
                let status = NfceeStatus::try_from(r.u8("nfcee_status")?)?;
                let (protocols, info) = if r.is_empty() {
                    (Vec::new(), Vec::new())
                } else {
                    let count = r.u8("protocol count")?;
                    let protocols = r.take("protocols", usize::from(count))?.to_vec();
                    let count = r.u8("tlv count")?;
                    (protocols, Tlv::decode_list(&mut r, count)?)
                };
                Self::NfceeDiscover(NfceeInfo {
                    nfcee_id,
                    status,
                    protocols,
                    info,
                })
            }
            (gid::CORE | gid::RF | gid::NFCEE, _) => return Err(Error::UnknownOpcode(opcode)),
            (other, _) => return Err(Error::UnknownGroup(other)),
        };
        r.finish(opcode)?;
        Ok(notification)
    }

    /// Subscription key of this notification
    pub const fn kind(&self) -> NotificationKind {
        match self {
            Self::CoreReset { .. } => NotificationKind::CoreReset,
            Self::CoreConnCredits(_) => NotificationKind::CoreConnCredits,
            Self::CoreGenericError(_) => NotificationKind::CoreGenericError,
            Self::CoreInterfaceError { .. } => NotificationKind::CoreInterfaceError,
            Self::RfListenModeRouting { .. } => NotificationKind::RfListenModeRouting,
            Self::RfDiscover(_) => NotificationKind::RfDiscover,
            Self::RfIntfActivated(_) => NotificationKind::RfIntfActivated,
            Self::RfDeactivate { .. } => NotificationKind::RfDeactivate,
            Self::RfFieldInfo { .. } => NotificationKind::RfFieldInfo,
            Self::RfT3tPolling { .. } => NotificationKind::RfT3tPolling,
            Self::RfNfceeAction { .. } => NotificationKind::RfNfceeAction,
            Self::RfNfceeDiscoveryReq(_) => NotificationKind::RfNfceeDiscoveryReq,
            Self::NfceeDiscover(_) => NotificationKind::NfceeDiscover,
            Self::Proprietary { .. } => NotificationKind::Proprietary,
        }
    }
}

fn decode_discovery_request(r: &mut WireReader) -> Result<NfceeDiscoveryRequest> {
    let action = match r.u8("request type")? {
        nfcee_discovery_req::ADD => DiscoveryRequestAction::Add,
        nfcee_discovery_req::REMOVE => DiscoveryRequestAction::Remove,
        other => return Err(Error::invalid("request type", other)),
    };
    let value = r.length_prefixed("request value")?;
    let len = value.len();
    let mut value = WireReader::new(value);
    let request = NfceeDiscoveryRequest {
        action,
        nfcee_id: value.u8("nfcee_id")?,
        tech_mode: RfTechMode::from(value.u8("tech_mode")?),
        protocol: RfProtocol::from(value.u8("protocol")?),
    };
    if !value.is_empty() {
        return Err(Error::invalid("request length", u8::try_from(len).unwrap_or(u8::MAX)));
    }
    Ok(request)
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    fn decode(gid: u8, oid: u8, payload: &'static [u8]) -> Result<Notification> {
        Notification::decode(Opcode::new(gid, oid), Bytes::from_static(payload))
    }

    #[test]
    fn test_conn_credits() {
        let ntf = decode(gid::CORE, core_oid::CONN_CREDITS, &hex!("02 01 03 02 01")).unwrap();
        assert_eq!(
            ntf,
            Notification::CoreConnCredits(vec![
                ConnCredit { conn_id: 1, credits: 3 },
                ConnCredit { conn_id: 2, credits: 1 },
            ])
        );
        assert_eq!(ntf.kind(), NotificationKind::CoreConnCredits);
    }

    #[test]
    fn test_conn_credits_truncated() {
        let err = decode(gid::CORE, core_oid::CONN_CREDITS, &hex!("02 01 03 02")).unwrap_err();
        assert!(err.root().is_length_violation());
    }

    #[test]
    fn test_intf_activated() {
        let ntf = decode(
            gid::RF,
            rf_oid::INTF_ACTIVATED,
            &hex!("01 02 04 00 FF 01 02 44 00 00 00 00 02 05 75"),
        )
        .unwrap();
        let Notification::RfIntfActivated(activation) = ntf else {
            panic!("expected activation");
        };
        assert_eq!(activation.interface, RfInterface::IsoDep);
        assert_eq!(activation.protocol, RfProtocol::IsoDep);
        assert_eq!(activation.max_payload, 0xFF);
        assert_eq!(activation.credits, 1);
        assert_eq!(activation.tech_params.as_ref(), &hex!("44 00"));
        assert_eq!(activation.activation_params.as_ref(), &hex!("05 75"));
        assert!(!activation.is_listen());
    }

    #[test]
    fn test_discover_multiple() {
        let ntf = decode(gid::RF, rf_oid::DISCOVER, &hex!("01 02 00 01 AA 02")).unwrap();
        assert_eq!(
            ntf,
            Notification::RfDiscover(DiscoveredTarget {
                discovery_id: 1,
                protocol: RfProtocol::T2t,
                tech_mode: RfTechMode::NfcAPassivePoll,
                tech_params: Bytes::from_static(&hex!("AA")),
                notification_type: DiscoverNotificationType::More,
            })
        );
    }

    #[test]
    fn test_deactivate_strict_type() {
        assert!(decode(gid::RF, rf_oid::DEACTIVATE, &hex!("07 00")).is_err());
        assert_eq!(
            decode(gid::RF, rf_oid::DEACTIVATE, &hex!("01 02")).unwrap(),
            Notification::RfDeactivate {
                kind: DeactivationType::Sleep,
                reason: DeactivationReason::RfLinkLoss,
            }
        );
    }

    #[test]
    fn test_nfcee_discovery_request() {
        let ntf = decode(
            gid::RF,
            rf_oid::NFCEE_DISCOVERY_REQ,
            &hex!("02 00 03 81 80 04 01 03 82 81 04"),
        )
        .unwrap();
        assert_eq!(
            ntf,
            Notification::RfNfceeDiscoveryReq(vec![
                NfceeDiscoveryRequest {
                    action: DiscoveryRequestAction::Add,
                    nfcee_id: 0x81,
                    tech_mode: RfTechMode::NfcAPassiveListen,
                    protocol: RfProtocol::IsoDep,
                },
                NfceeDiscoveryRequest {
                    action: DiscoveryRequestAction::Remove,
                    nfcee_id: 0x82,
                    tech_mode: RfTechMode::NfcBPassiveListen,
                    protocol: RfProtocol::IsoDep,
                },
            ])
        );
    }

    #[test]
    fn test_nfcee_discover() {
        let ntf = decode(gid::NFCEE, nfcee_oid::DISCOVER, &hex!("81 01 01 80 01 A0 01 11")).unwrap();
        assert_eq!(
            ntf,
            Notification::NfceeDiscover(NfceeInfo {
                nfcee_id: 0x81,
                status: NfceeStatus::Disabled,
                protocols: vec![0x80],
                info: vec![Tlv::new(0xA0, vec![0x11])],
            })
        );
        let removed = decode(gid::NFCEE, nfcee_oid::DISCOVER, &hex!("81 02")).unwrap();
        assert!(matches!(
            removed,
            Notification::NfceeDiscover(NfceeInfo { status: NfceeStatus::Removed, .. })
        ));
    }

    #[test]
    fn test_unknown_and_proprietary() {
        let err = decode(gid::RF, 0x30, &[]).unwrap_err();
        assert!(matches!(err.root(), Error::UnknownOpcode(_)));
        let err = decode(0x7, 0x00, &[]).unwrap_err();
        assert_eq!(err.root(), &Error::UnknownGroup(0x7));
        let ntf = decode(gid::PROPRIETARY, 0x01, &hex!("DE AD")).unwrap();
        assert_eq!(ntf.kind(), NotificationKind::Proprietary);
    }
}
