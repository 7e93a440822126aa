//! NFCEE table and mode switching
//!
//! Every NFCEE reported by the controller has a record holding its mode and
//! the discovery requests it raised. A mode switch is a short command
//! sequence run through the dispatcher:
//!
//! | from  | to    | commands                                   |
//! |-------|-------|--------------------------------------------|
//! | Off   | Rf    | NFCEE_MODE_SET(enable)                     |
//! | Off   | Host  | NFCEE_MODE_SET(enable), CORE_CONN_CREATE   |
//! | Rf    | Host  | CORE_CONN_CREATE                           |
//! | Host  | Rf    | CORE_CONN_CLOSE                            |
//! | Rf    | Off   | NFCEE_MODE_SET(disable)                    |
//! | Host  | Off   | CORE_CONN_CLOSE, NFCEE_MODE_SET(disable)   |
//!
//! A failure reverts the NFCEE to the last mode the controller confirmed. On
//! the way from Host to Off a confirmed CORE_CONN_CLOSE confirms RF mode, so a
//! rejected disable leaves the NFCEE in RF mode without a connection.
//!
//! Discovery requests only count towards the RF discovery plan while the
//! NFCEE is in RF mode. Only NFCEEs reported by NFCEE discovery can raise
//! them.

use std::collections::BTreeMap;

use nexum_nci_core::constants::conn_param;
use nexum_nci_core::notification::{DiscoveryRequestAction, NfceeInfo, NfceeDiscoveryRequest};
use nexum_nci_core::types::{DestinationType, NfceeStatus, Technologies, Tlv};
use nexum_nci_core::{Command, Notification, Response};
use tracing::{debug, info, warn};

use crate::rf::NfceeDemand;
use crate::{Error, Result};

/// Mode an NFCEE can be switched to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NfceeMode {
    /// Disabled
    Off,
    /// Enabled, reachable over RF only
    Rf,
    /// Enabled with a logical connection from the device host
    Host,
}

/// Mode switching state of one NFCEE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NfceeState {
    /// Disabled
    Off,
    /// Enabling for RF use
    ActivatingToRf,
    /// Enabling before opening a host connection
    ActivatingToHost,
    /// Enabled for RF use
    Rf,
    /// Opening the host connection
    Connecting,
    /// Host connection open
    Host,
    /// Closing the host connection
    Disconnecting,
    /// Disabling
    Deactivating,
}

impl NfceeState {
    /// Mode of a stable state, `None` while a switch is in progress
    pub const fn mode(self) -> Option<NfceeMode> {
        match self {
            Self::Off => Some(NfceeMode::Off),
            Self::Rf => Some(NfceeMode::Rf),
            Self::Host => Some(NfceeMode::Host),
            _ => None,
        }
    }

    const fn stable(mode: NfceeMode) -> Self {
        match mode {
            NfceeMode::Off => Self::Off,
            NfceeMode::Rf => Self::Rf,
            NfceeMode::Host => Self::Host,
        }
    }
}

/// One NFCEE known to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nfcee {
    id: u8,
    state: NfceeState,
    /// Last mode confirmed by the controller
    confirmed: NfceeMode,
    protocols: Vec<u8>,
    info: Vec<Tlv>,
    listen: Technologies,
    poll: Technologies,
    conn_id: Option<u8>,
}

impl Nfcee {
    fn new(id: u8) -> Self {
        Self {
            id,
            state: NfceeState::Off,
            confirmed: NfceeMode::Off,
            protocols: Vec::new(),
            info: Vec::new(),
            listen: Technologies::empty(),
            poll: Technologies::empty(),
            conn_id: None,
        }
    }

    /// NFCEE id
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Current mode switching state
    pub const fn state(&self) -> NfceeState {
        self.state
    }

    /// Interface protocols reported by NFCEE discovery
    pub fn protocols(&self) -> &[u8] {
        &self.protocols
    }

    /// Information TLVs reported by NFCEE discovery
    pub fn info(&self) -> &[Tlv] {
        &self.info
    }

    /// Listen technologies the NFCEE asked to be discovered
    pub const fn listen_requests(&self) -> Technologies {
        self.listen
    }

    /// Poll technologies the NFCEE asked to be discovered
    pub const fn poll_requests(&self) -> Technologies {
        self.poll
    }

    /// Host connection id while in host mode
    pub const fn conn_id(&self) -> Option<u8> {
        self.conn_id
    }

    fn conn_create(&self) -> Command {
        let protocol = self.protocols.first().copied().unwrap_or(0x00);
        Command::CoreConnCreate {
            destination: DestinationType::Nfcee,
            params: vec![Tlv::new(conn_param::NFCEE, vec![self.id, protocol])],
        }
    }

    fn revert(&mut self) {
        self.state = NfceeState::stable(self.confirmed);
        if self.confirmed != NfceeMode::Host {
            self.conn_id = None;
        }
    }
}

/// Side effects requested by the NFCEE table
#[derive(Debug)]
pub(crate) enum NfceeAction {
    /// Queue a command whose response is routed back to the NFCEE
    Send { nfcee_id: u8, command: Command },
    /// The mode switch in progress finished
    Complete(Result<()>),
}

/// Table of NFCEEs keyed by id
#[derive(Debug, Default)]
pub struct NfceeTable {
    nfcees: BTreeMap<u8, Nfcee>,
    /// NFCEE with a mode switch in progress
    switching: Option<u8>,
}

impl NfceeTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up an NFCEE by id
    pub fn get(&self, id: u8) -> Option<&Nfcee> {
        self.nfcees.get(&id)
    }

    /// Iterate NFCEEs in id order
    pub fn iter(&self) -> impl Iterator<Item = &Nfcee> {
        self.nfcees.values()
    }

    /// Number of known NFCEEs
    pub fn len(&self) -> usize {
        self.nfcees.len()
    }

    /// Returns true if no NFCEE is known
    pub fn is_empty(&self) -> bool {
        self.nfcees.is_empty()
    }

    /// Discovery requests of the NFCEEs currently in RF mode
    pub(crate) fn demand(&self) -> NfceeDemand {
        let mut demand = NfceeDemand::default();
        for nfcee in self.nfcees.values().filter(|n| n.state == NfceeState::Rf) {
            if !nfcee.listen.is_empty() {
                demand.listen.insert(nfcee.id, nfcee.listen);
            }
            demand.poll |= nfcee.poll;
        }
        demand
    }

    /// Forget every NFCEE, failing a switch in progress
    pub(crate) fn clear(&mut self) -> Vec<NfceeAction> {
        self.nfcees.clear();
        self.switching
            .take()
            .map(|_| NfceeAction::Complete(Err(Error::Rejected("NFCEE table reset"))))
            .into_iter()
            .collect()
    }

    /// Start switching `id` to `mode`
    pub(crate) fn switch_to(&mut self, id: u8, mode: NfceeMode) -> Vec<NfceeAction> {
        let Some(nfcee) = self.nfcees.get_mut(&id) else {
            return vec![NfceeAction::Complete(Err(Error::Rejected("unknown NFCEE")))];
        };
        let Some(current) = nfcee.state.mode() else {
            return vec![NfceeAction::Complete(Err(Error::Rejected(
                "NFCEE mode switch in progress",
            )))];
        };
        if current == mode {
            return vec![NfceeAction::Complete(Ok(()))];
        }
        let host_conn = nfcee.conn_id;
        if current == NfceeMode::Host && host_conn.is_none() {
            return vec![NfceeAction::Complete(Err(Error::Rejected(
                "NFCEE has no host connection",
            )))];
        }

        info!(nfcee_id = id, from = ?current, to = ?mode, "Switching NFCEE mode");
        let mode_set = |enable| Command::NfceeModeSet {
            nfcee_id: id,
            enable,
        };
        let mut actions = Vec::new();
        nfcee.state = match (current, mode) {
            (NfceeMode::Off, NfceeMode::Rf) => {
                actions.push(NfceeAction::Send {
                    nfcee_id: id,
                    command: mode_set(true),
                });
                NfceeState::ActivatingToRf
            }
            (NfceeMode::Off, NfceeMode::Host) => {
                actions.push(NfceeAction::Send {
                    nfcee_id: id,
                    command: mode_set(true),
                });
                NfceeState::ActivatingToHost
            }
            (NfceeMode::Rf, NfceeMode::Host) => {
                actions.push(NfceeAction::Send {
                    nfcee_id: id,
                    command: nfcee.conn_create(),
                });
                NfceeState::Connecting
            }
            (NfceeMode::Host, NfceeMode::Rf) => {
                if let Some(conn_id) = host_conn {
                    actions.push(NfceeAction::Send {
                        nfcee_id: id,
                        command: Command::CoreConnClose { conn_id },
                    });
                }
                NfceeState::Disconnecting
            }
            (NfceeMode::Rf, NfceeMode::Off) => {
                actions.push(NfceeAction::Send {
                    nfcee_id: id,
                    command: mode_set(false),
                });
                NfceeState::Deactivating
            }
            (NfceeMode::Host, NfceeMode::Off) => {
                if let Some(conn_id) = host_conn {
                    actions.push(NfceeAction::Send {
                        nfcee_id: id,
                        command: Command::CoreConnClose { conn_id },
                    });
                }
                actions.push(NfceeAction::Send {
                    nfcee_id: id,
                    command: mode_set(false),
                });
                NfceeState::Deactivating
            }
            (NfceeMode::Off, NfceeMode::Off)
            | (NfceeMode::Rf, NfceeMode::Rf)
            | (NfceeMode::Host, NfceeMode::Host) => nfcee.state,
        };
        self.switching = Some(id);
        actions
    }

    /// Conclude a command issued on behalf of NFCEE `id`
    pub(crate) fn on_response(
        &mut self,
        id: u8,
        command: &Command,
        outcome: Result<&Response>,
    ) -> Vec<NfceeAction> {
        let Some(nfcee) = self.nfcees.get_mut(&id) else {
            debug!(nfcee_id = id, "Response for a removed NFCEE");
            return Vec::new();
        };

        let response = match outcome {
            Ok(response) => response,
            Err(error)
                if nfcee.state == NfceeState::Deactivating
                    && matches!(command, Command::CoreConnClose { .. }) =>
            {
                // The disable already queued behind it decides the outcome
                warn!(nfcee_id = id, %error, "Host connection close failed");
                return Vec::new();
            }
            Err(error) => {
                warn!(nfcee_id = id, command = command.name(), %error, "NFCEE mode switch failed");
                nfcee.revert();
                self.switching = None;
                return vec![NfceeAction::Complete(Err(error))];
            }
        };

        let mut actions = Vec::new();
        match (nfcee.state, command) {
            (NfceeState::ActivatingToRf, Command::NfceeModeSet { .. }) => {
                nfcee.confirmed = NfceeMode::Rf;
                nfcee.state = NfceeState::Rf;
            }
            (NfceeState::ActivatingToHost, Command::NfceeModeSet { .. }) => {
                nfcee.confirmed = NfceeMode::Rf;
                nfcee.state = NfceeState::Connecting;
                actions.push(NfceeAction::Send {
                    nfcee_id: id,
                    command: nfcee.conn_create(),
                });
                return actions;
            }
            (NfceeState::Connecting, Command::CoreConnCreate { .. }) => {
                let Response::CoreConnCreate { conn_id, .. } = response else {
                    nfcee.revert();
                    self.switching = None;
                    return vec![NfceeAction::Complete(Err(Error::Rejected(
                        "unexpected connection response",
                    )))];
                };
                nfcee.conn_id = Some(*conn_id);
                nfcee.confirmed = NfceeMode::Host;
                nfcee.state = NfceeState::Host;
            }
            (NfceeState::Disconnecting, Command::CoreConnClose { .. }) => {
                nfcee.conn_id = None;
                nfcee.confirmed = NfceeMode::Rf;
                nfcee.state = NfceeState::Rf;
            }
            (NfceeState::Deactivating, Command::CoreConnClose { .. }) => {
                nfcee.conn_id = None;
                nfcee.confirmed = NfceeMode::Rf;
                return actions;
            }
            (NfceeState::Deactivating, Command::NfceeModeSet { .. }) => {
                nfcee.conn_id = None;
                nfcee.confirmed = NfceeMode::Off;
                nfcee.state = NfceeState::Off;
            }
            (state, _) => {
                warn!(nfcee_id = id, ?state, command = command.name(), "Unexpected NFCEE response");
                return actions;
            }
        }
        debug!(nfcee_id = id, state = ?nfcee.state, "NFCEE mode switch complete");
        self.switching = None;
        actions.push(NfceeAction::Complete(Ok(())));
        actions
    }

    /// Apply NFCEE_DISCOVER_NTF and RF_NFCEE_DISCOVERY_REQ_NTF
    pub(crate) fn on_notification(&mut self, notification: &Notification) -> Vec<NfceeAction> {
        match notification {
            Notification::NfceeDiscover(info) => self.discovered(info),
            Notification::RfNfceeDiscoveryReq(requests) => {
                for request in requests {
                    self.discovery_request(request);
                }
                Vec::new()
            }
            _ => Vec::new(),
        }
    }

    fn discovered(&mut self, info: &NfceeInfo) -> Vec<NfceeAction> {
        let id = info.nfcee_id;
        if info.status == NfceeStatus::Removed {
            info!(nfcee_id = id, "NFCEE removed");
            self.nfcees.remove(&id);
            if self.switching == Some(id) {
                self.switching = None;
                return vec![NfceeAction::Complete(Err(Error::Rejected("NFCEE removed")))];
            }
            return Vec::new();
        }

        let nfcee = self.nfcees.entry(id).or_insert_with(|| Nfcee::new(id));
        nfcee.protocols.clone_from(&info.protocols);
        nfcee.info.clone_from(&info.info);
        if nfcee.state.mode().is_some() {
            let mode = if info.status == NfceeStatus::Enabled {
                NfceeMode::Rf
            } else {
                NfceeMode::Off
            };
            nfcee.confirmed = mode;
            nfcee.state = NfceeState::stable(mode);
            nfcee.conn_id = None;
        }
        info!(nfcee_id = id, status = ?info.status, "NFCEE discovered");
        Vec::new()
    }

    fn discovery_request(&mut self, request: &NfceeDiscoveryRequest) {
        let Some(tech) = request.tech_mode.technology() else {
            warn!(tech_mode = ?request.tech_mode, "NFCEE requested an unknown technology");
            return;
        };
        let techs = Technologies::from_technology(tech);
        let Some(nfcee) = self.nfcees.get_mut(&request.nfcee_id) else {
            warn!(nfcee_id = request.nfcee_id, "Discovery request from an unknown NFCEE");
            return;
        };
        let set = if request.tech_mode.is_listen() {
            &mut nfcee.listen
        } else {
            &mut nfcee.poll
        };
        match request.action {
            DiscoveryRequestAction::Add => set.insert(techs),
            DiscoveryRequestAction::Remove => set.remove(techs),
        }
        debug!(
            nfcee_id = request.nfcee_id,
            action = ?request.action,
            tech_mode = ?request.tech_mode,
            "NFCEE discovery request"
        );
    }
}

#[cfg(test)]
mod tests {
    use nexum_nci_core::types::{RfProtocol, RfTechMode, Status};

    use super::*;

    fn enabled(id: u8) -> Notification {
        Notification::NfceeDiscover(NfceeInfo {
            nfcee_id: id,
            status: NfceeStatus::Enabled,
            protocols: vec![0x80],
            info: Vec::new(),
        })
    }

    fn disabled_table(id: u8) -> NfceeTable {
        let mut table = NfceeTable::new();
        table.on_notification(&Notification::NfceeDiscover(NfceeInfo {
            nfcee_id: id,
            status: NfceeStatus::Disabled,
            protocols: vec![0x80],
            info: Vec::new(),
        }));
        table
    }

    fn ok_status(command: &Command) -> Response {
        Response::Status {
            opcode: command.opcode(),
            status: Status::Ok,
        }
    }

    fn conn_created(conn_id: u8) -> Response {
        Response::CoreConnCreate {
            max_payload: 0xFF,
            credits: 1,
            conn_id,
        }
    }

    fn sent(actions: &[NfceeAction]) -> Vec<Command> {
        actions
            .iter()
            .filter_map(|action| match action {
                NfceeAction::Send { command, .. } => Some(command.clone()),
                _ => None,
            })
            .collect()
    }

    fn completed(actions: &[NfceeAction]) -> Option<bool> {
        actions.iter().find_map(|action| match action {
            NfceeAction::Complete(result) => Some(result.is_ok()),
            _ => None,
        })
    }

    #[test]
    fn test_off_to_host_enables_then_connects() {
        let mut table = disabled_table(0x81);
        let actions = table.switch_to(0x81, NfceeMode::Host);
        let mode_set = sent(&actions).remove(0);
        assert_eq!(
            mode_set,
            Command::NfceeModeSet {
                nfcee_id: 0x81,
                enable: true
            }
        );
        assert_eq!(table.get(0x81).map(Nfcee::state), Some(NfceeState::ActivatingToHost));

        let actions = table.on_response(0x81, &mode_set, Ok(&ok_status(&mode_set)));
        let create = sent(&actions).remove(0);
        assert_eq!(
            create,
            Command::CoreConnCreate {
                destination: DestinationType::Nfcee,
                params: vec![Tlv::new(conn_param::NFCEE, vec![0x81, 0x80])],
            }
        );
        assert_eq!(completed(&actions), None);

        let actions = table.on_response(0x81, &create, Ok(&conn_created(2)));
        assert_eq!(completed(&actions), Some(true));
        let nfcee = table.get(0x81).unwrap();
        assert_eq!(nfcee.state(), NfceeState::Host);
        assert_eq!(nfcee.conn_id(), Some(2));
    }

    #[test]
    fn test_host_to_off_closes_connection_first() {
        let mut table = disabled_table(0x81);
        let create_actions = table.switch_to(0x81, NfceeMode::Host);
        let mode_set = sent(&create_actions).remove(0);
        let create = sent(&table.on_response(0x81, &mode_set, Ok(&ok_status(&mode_set)))).remove(0);
        table.on_response(0x81, &create, Ok(&conn_created(3)));

        let mut commands = sent(&table.switch_to(0x81, NfceeMode::Off));
        assert_eq!(commands.len(), 2);
        let close = commands.remove(0);
        assert_eq!(close, Command::CoreConnClose { conn_id: 3 });
        assert_eq!(table.get(0x81).map(Nfcee::state), Some(NfceeState::Deactivating));
        assert_eq!(table.get(0x81).and_then(Nfcee::conn_id), Some(3));

        let actions = table.on_response(0x81, &close, Ok(&ok_status(&close)));
        assert!(actions.is_empty());
        assert_eq!(table.get(0x81).and_then(Nfcee::conn_id), None);
        let disable = commands.remove(0);
        assert_eq!(
            disable,
            Command::NfceeModeSet {
                nfcee_id: 0x81,
                enable: false
            }
        );
        let actions = table.on_response(0x81, &disable, Ok(&ok_status(&disable)));
        assert_eq!(completed(&actions), Some(true));
        assert_eq!(table.get(0x81).map(Nfcee::state), Some(NfceeState::Off));
    }

    #[test]
    fn test_disable_failure_after_close_reverts_to_rf() {
        let mut table = NfceeTable::new();
        table.on_notification(&enabled(0x81));
        let create = sent(&table.switch_to(0x81, NfceeMode::Host)).remove(0);
        table.on_response(0x81, &create, Ok(&conn_created(3)));

        let mut commands = sent(&table.switch_to(0x81, NfceeMode::Off));
        let (close, disable) = (commands.remove(0), commands.remove(0));
        table.on_response(0x81, &close, Ok(&ok_status(&close)));
        let actions = table.on_response(
            0x81,
            &disable,
            Err(Error::failed(disable.opcode(), Status::Rejected)),
        );
        assert_eq!(completed(&actions), Some(false));
        let nfcee = table.get(0x81).unwrap();
        assert_eq!(nfcee.state(), NfceeState::Rf);
        assert_eq!(nfcee.conn_id(), None);

        // Back in RF mode there is no connection left to close
        let actions = table.switch_to(0x81, NfceeMode::Rf);
        assert_eq!(completed(&actions), Some(true));
        assert!(sent(&actions).is_empty());
    }

    #[test]
    fn test_close_failure_keeps_host_connection() {
        let mut table = NfceeTable::new();
        table.on_notification(&enabled(0x81));
        let create = sent(&table.switch_to(0x81, NfceeMode::Host)).remove(0);
        table.on_response(0x81, &create, Ok(&conn_created(3)));

        let mut commands = sent(&table.switch_to(0x81, NfceeMode::Off));
        let (close, disable) = (commands.remove(0), commands.remove(0));
        let actions =
            table.on_response(0x81, &close, Err(Error::failed(close.opcode(), Status::Rejected)));
        assert!(actions.is_empty());
        let actions = table.on_response(
            0x81,
            &disable,
            Err(Error::failed(disable.opcode(), Status::Rejected)),
        );
        assert_eq!(completed(&actions), Some(false));
        assert_eq!(table.get(0x81).map(Nfcee::state), Some(NfceeState::Host));
        assert_eq!(table.get(0x81).and_then(Nfcee::conn_id), Some(3));

        let actions = table.switch_to(0x81, NfceeMode::Rf);
        assert_eq!(sent(&actions), vec![Command::CoreConnClose { conn_id: 3 }]);
    }

    #[test]
    fn test_discovery_request_from_unknown_nfcee_ignored() {
        let mut table = NfceeTable::new();
        table.on_notification(&Notification::RfNfceeDiscoveryReq(vec![NfceeDiscoveryRequest {
            action: DiscoveryRequestAction::Add,
            nfcee_id: 0x85,
            tech_mode: RfTechMode::NfcAPassiveListen,
            protocol: RfProtocol::IsoDep,
        }]));
        assert!(table.is_empty());
        assert_eq!(table.demand(), NfceeDemand::default());
    }

    #[test]
    fn test_failure_reverts_to_confirmed_mode() {
        let mut table = NfceeTable::new();
        table.on_notification(&enabled(0x82));
        let actions = table.switch_to(0x82, NfceeMode::Host);
        let create = sent(&actions).remove(0);
        assert_eq!(table.get(0x82).map(Nfcee::state), Some(NfceeState::Connecting));

        let actions = table.on_response(
            0x82,
            &create,
            Err(Error::failed(create.opcode(), Status::Rejected)),
        );
        assert_eq!(completed(&actions), Some(false));
        assert_eq!(table.get(0x82).map(Nfcee::state), Some(NfceeState::Rf));
    }

    #[test]
    fn test_switch_rejections() {
        let mut table = disabled_table(0x81);
        assert_eq!(completed(&table.switch_to(0x90, NfceeMode::Rf)), Some(false));
        assert_eq!(completed(&table.switch_to(0x81, NfceeMode::Off)), Some(true));

        table.switch_to(0x81, NfceeMode::Rf);
        assert_eq!(completed(&table.switch_to(0x81, NfceeMode::Host)), Some(false));
    }

    #[test]
    fn test_removed_fails_pending_switch() {
        let mut table = disabled_table(0x81);
        table.switch_to(0x81, NfceeMode::Rf);
        let actions = table.on_notification(&Notification::NfceeDiscover(NfceeInfo {
            nfcee_id: 0x81,
            status: NfceeStatus::Removed,
            protocols: Vec::new(),
            info: Vec::new(),
        }));
        assert_eq!(completed(&actions), Some(false));
        assert!(table.is_empty());
    }

    #[test]
    fn test_demand_counts_only_rf_mode() {
        let mut table = disabled_table(0x81);
        let request = |action| {
            Notification::RfNfceeDiscoveryReq(vec![
                NfceeDiscoveryRequest {
                    action,
                    nfcee_id: 0x81,
                    tech_mode: RfTechMode::NfcAPassiveListen,
                    protocol: RfProtocol::IsoDep,
                },
                NfceeDiscoveryRequest {
                    action,
                    nfcee_id: 0x81,
                    tech_mode: RfTechMode::NfcFPassivePoll,
                    protocol: RfProtocol::T3t,
                },
            ])
        };
        table.on_notification(&request(DiscoveryRequestAction::Add));
        assert_eq!(table.demand(), NfceeDemand::default());

        table.on_notification(&enabled(0x81));
        let demand = table.demand();
        assert_eq!(demand.listen.get(&0x81), Some(&Technologies::NFC_A));
        assert_eq!(demand.poll, Technologies::NFC_F);

        table.on_notification(&request(DiscoveryRequestAction::Remove));
        assert_eq!(table.demand(), NfceeDemand::default());
    }
}
