//! RF discovery state machine
//!
//! Tracks the controller's RF state from the commands the engine transmits
//! and the responses and notifications it receives, and drives discovery on
//! behalf of the caller and of the NFCEEs.
//!
//! Discovery parameters are never patched incrementally. Every time the
//! machine settles in [`RfState::Idle`] it recomputes the full plan (listen
//! configuration, listen-mode routing, discover configuration) from the
//! caller's reader and card protocol masks plus the current NFCEE requests,
//! and issues the commands from scratch. A mask change while discovery or an
//! activation is running first deactivates to idle.
//!
//! Each event is offered to the handler of the current state first; only if
//! that handler declines it does the generic event handler run. A state
//! handler therefore overrides the generic behaviour for the events it
//! claims.

use std::collections::{BTreeMap, VecDeque};

use nexum_nci_core::constants::{config, host};
use nexum_nci_core::notification::{Activation, DiscoveredTarget};
use nexum_nci_core::types::{
    CardProtocols, DeactivationType, DiscoverConfig, DiscoverNotificationType, ReaderProtocols,
    RfTechMode, RoutingEntry, Status, Technologies, Technology, Tlv,
};
use nexum_nci_core::{Command, Notification};
use tracing::{debug, trace, warn};

use crate::routing;
use crate::{Error, Result};

/// RF state as seen by the device host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfState {
    /// Controller not reset and initialized
    Uninitialized,
    /// RF idle, no discovery running
    Idle,
    /// Waiting for CORE_SET_CONFIG_RSP
    WaitSetConfigRsp,
    /// Waiting for RF_SET_LISTEN_MODE_ROUTING_RSP
    WaitRoutingRsp,
    /// Waiting for RF_DISCOVER_RSP
    WaitDiscovery,
    /// Polling and/or listening
    Discovery,
    /// Collecting RF_DISCOVER_NTFs for multiple remote endpoints
    WaitAllDiscoveries,
    /// Waiting for the host to select one of the discovered endpoints
    WaitHostSelect,
    /// Interface activated in poll mode
    PollActive,
    /// Interface activated in listen mode
    ListenActive,
    /// Listen-mode endpoint put to sleep
    ListenSleep,
    /// Poll-mode endpoint put to sleep
    PollSleep,
    /// Waiting for the outcome of RF_DEACTIVATE_CMD
    Deactivating {
        /// Requested deactivation type
        target: DeactivationType,
    },
}

impl RfState {
    /// Returns true while an RF interface is activated or asleep
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::PollActive | Self::ListenActive | Self::ListenSleep | Self::PollSleep
        )
    }

    /// Returns true if CORE_SET_CONFIG may be sent in this state
    pub const fn accepts_config(self) -> bool {
        matches!(self, Self::Idle | Self::Discovery)
    }
}

/// Protocols the NFCEEs currently want discovered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct NfceeDemand {
    /// Listen technologies per NFCEE
    pub(crate) listen: BTreeMap<u8, Technologies>,
    /// Poll technologies requested by any NFCEE
    pub(crate) poll: Technologies,
}

/// Inputs owned elsewhere in the engine
#[derive(Debug)]
pub(crate) struct RfContext<'a> {
    pub(crate) demand: NfceeDemand,
    pub(crate) host_priority: &'a [u8],
    pub(crate) power_state: u8,
}

/// Events fed to the state machine
#[derive(Debug)]
pub(crate) enum RfEvent<'a> {
    /// CORE_INIT completed
    Start,
    /// Controller reset or engine stopped
    Stop,
    /// Caller changed the requested protocols
    Configure {
        reader: ReaderProtocols,
        card: CardProtocols,
    },
    /// Inputs of the discovery plan changed (debounce expired)
    Refresh,
    /// An NFCEE added or withdrew a discovery request
    NfceeRequest,
    /// A command left the dispatcher
    CommandSent(&'a Command),
    /// A command concluded
    Response {
        command: &'a Command,
        outcome: Result<()>,
        internal: bool,
    },
    /// A notification arrived
    Notification(&'a Notification),
}

/// Side effects requested by the state machine
#[derive(Debug)]
pub(crate) enum RfAction {
    /// Queue a command owned by the state machine
    Send(Command),
    /// (Re)arm the NFCEE debounce timer
    ArmDebounce,
    /// Open and activate the RF data connection
    OpenRf { credits: u8, max_payload: u8 },
    /// Stop traffic on the RF data connection
    CloseRf,
    /// The requested configuration has been reached (or failed)
    Settled(Result<()>),
}

/// Discovery parameters derived from the requested protocols
#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct DiscoveryPlan {
    config: Vec<Tlv>,
    routing: Vec<RoutingEntry>,
    discover: Vec<DiscoverConfig>,
}

/// RF discovery state machine
#[derive(Debug)]
pub struct RfDiscovery {
    state: RfState,
    /// State to return to after a configuration command
    resume: RfState,
    /// State the current deactivation started from
    deactivating_from: RfState,
    reader: ReaderProtocols,
    card: CardProtocols,
    routing_override: Option<Vec<RoutingEntry>>,
    /// Plan the running discovery was started with
    active: Option<DiscoveryPlan>,
    /// Plan being applied by `steps`
    pending: Option<DiscoveryPlan>,
    steps: VecDeque<Command>,
    /// An internal command is queued or on the wire
    outstanding: bool,
    /// Inputs changed while the machine could not act on them
    dirty: bool,
    settle_pending: bool,
    targets: Vec<DiscoveredTarget>,
    activation: Option<Activation>,
}

impl Default for RfDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl RfDiscovery {
    /// Create a state machine in [`RfState::Uninitialized`]
    pub fn new() -> Self {
        Self {
            state: RfState::Uninitialized,
            resume: RfState::Idle,
            deactivating_from: RfState::Idle,
            reader: ReaderProtocols::empty(),
            card: CardProtocols::empty(),
            routing_override: None,
            active: None,
            pending: None,
            steps: VecDeque::new(),
            outstanding: false,
            dirty: false,
            settle_pending: false,
            targets: Vec::new(),
            activation: None,
        }
    }

    /// Current state
    pub const fn state(&self) -> RfState {
        self.state
    }

    /// Reader protocols requested by the caller
    pub const fn reader_protocols(&self) -> ReaderProtocols {
        self.reader
    }

    /// Card protocols requested by the caller
    pub const fn card_protocols(&self) -> CardProtocols {
        self.card
    }

    /// Endpoints reported during the last multiple-target discovery
    pub fn discovered_targets(&self) -> &[DiscoveredTarget] {
        &self.targets
    }

    /// Last RF interface activation
    pub const fn activation(&self) -> Option<&Activation> {
        self.activation.as_ref()
    }

    /// Replace the computed routing table; `None` or an empty table clears it
    pub(crate) fn set_routing_override(&mut self, table: Option<Vec<RoutingEntry>>) {
        self.routing_override = table.filter(|entries| !entries.is_empty());
    }

    /// Feed an event and collect the resulting actions
    pub(crate) fn handle(&mut self, event: RfEvent<'_>, ctx: &RfContext<'_>) -> Vec<RfAction> {
        let mut actions = Vec::new();
        let before = self.state;
        match (self.state, &event) {
            (
                RfState::WaitSetConfigRsp | RfState::WaitRoutingRsp,
                RfEvent::Notification(_),
            ) => {
                // The RF side keeps moving while a configuration response is
                // outstanding; track it in the state the response restores
                self.state = self.resume;
                self.dispatch(event, ctx, &mut actions);
                if self.state != self.resume {
                    debug!(from = ?self.resume, to = ?self.state, "RF state transition while waiting");
                }
                self.resume = self.state;
                self.state = before;
            }
            _ => {
                self.dispatch(event, ctx, &mut actions);
                if before != self.state {
                    debug!(from = ?before, to = ?self.state, "RF state transition");
                }
            }
        }
        actions
    }

    fn dispatch(&mut self, event: RfEvent<'_>, ctx: &RfContext<'_>, actions: &mut Vec<RfAction>) {
        if !self.handle_in_state(&event, ctx, actions) {
            self.handle_event(event, ctx, actions);
        }
    }

    /// State-specific handlers; returns true if the event was consumed
    fn handle_in_state(
        &mut self,
        event: &RfEvent<'_>,
        ctx: &RfContext<'_>,
        actions: &mut Vec<RfAction>,
    ) -> bool {
        match (self.state, event) {
            (RfState::Uninitialized, RfEvent::Start) => {
                self.enter_idle(ctx, actions);
                true
            }
            (RfState::Uninitialized, RfEvent::Configure { reader, card }) => {
                self.reader = *reader;
                self.card = *card;
                self.settle_pending = true;
                self.settle(Err(Error::Rejected("RF not initialized")), actions);
                true
            }
            (RfState::Uninitialized, RfEvent::Stop | RfEvent::Response { .. }) => false,
            (RfState::Uninitialized, _) => {
                trace!("Ignoring RF event before initialization");
                true
            }
            (RfState::Discovery, RfEvent::Notification(Notification::RfDiscover(target))) => {
                self.targets = vec![target.clone()];
                self.state = match target.notification_type {
                    DiscoverNotificationType::More => RfState::WaitAllDiscoveries,
                    _ => RfState::WaitHostSelect,
                };
                true
            }
            (
                RfState::WaitAllDiscoveries,
                RfEvent::Notification(Notification::RfDiscover(target)),
            ) => {
                self.targets.push(target.clone());
                if target.notification_type != DiscoverNotificationType::More {
                    self.state = RfState::WaitHostSelect;
                }
                true
            }
            (
                RfState::Deactivating { target },
                RfEvent::Notification(Notification::RfDeactivate { kind, .. }),
            ) => {
                // Some controllers notify before responding
                if *kind == target {
                    self.land(deactivation_target(self.deactivating_from, *kind), ctx, actions);
                } else {
                    warn!(?kind, ?target, "Deactivation notification does not match request");
                }
                true
            }
            _ => false,
        }
    }

    fn handle_event(&mut self, event: RfEvent<'_>, ctx: &RfContext<'_>, actions: &mut Vec<RfAction>) {
        match event {
            RfEvent::Start => debug!("RF already initialized"),
            RfEvent::Stop => self.stop(actions),
            RfEvent::Configure { reader, card } => {
                self.reader = reader;
                self.card = card;
                self.settle_pending = true;
                self.dirty = true;
                self.resume_pending_work(ctx, actions);
            }
            RfEvent::Refresh => {
                self.dirty = true;
                self.resume_pending_work(ctx, actions);
            }
            RfEvent::NfceeRequest => {
                if matches!(self.state, RfState::Idle | RfState::Discovery) {
                    actions.push(RfAction::ArmDebounce);
                } else {
                    self.dirty = true;
                }
            }
            RfEvent::CommandSent(command) => self.on_command_sent(command),
            RfEvent::Response {
                command,
                outcome,
                internal,
            } => self.on_response(command, outcome, internal, ctx, actions),
            RfEvent::Notification(notification) => {
                self.on_notification(notification, ctx, actions)
            }
        }
    }

    fn on_command_sent(&mut self, command: &Command) {
        match (command, self.state) {
            (Command::CoreSetConfig { .. }, RfState::Idle | RfState::Discovery) => {
                self.resume = self.state;
                self.state = RfState::WaitSetConfigRsp;
            }
            (Command::RfSetListenModeRouting { .. }, RfState::Idle | RfState::Discovery) => {
                self.resume = self.state;
                self.state = RfState::WaitRoutingRsp;
            }
            (Command::RfDiscover { .. }, RfState::Idle) => {
                self.state = RfState::WaitDiscovery;
            }
            (Command::RfDeactivate { kind }, from)
                if !matches!(from, RfState::Idle | RfState::Uninitialized) =>
            {
                self.deactivating_from = from;
                self.state = RfState::Deactivating { target: *kind };
            }
            (Command::RfDiscoverSelect { discovery_id, .. }, _) => {
                trace!(discovery_id, "Selecting discovered endpoint");
            }
            _ => {}
        }
    }

    fn on_response(
        &mut self,
        command: &Command,
        outcome: Result<()>,
        internal: bool,
        ctx: &RfContext<'_>,
        actions: &mut Vec<RfAction>,
    ) {
        let ok = outcome.is_ok();
        match (self.state, command) {
            (RfState::WaitSetConfigRsp, Command::CoreSetConfig { .. })
            | (RfState::WaitRoutingRsp, Command::RfSetListenModeRouting { .. }) => {
                self.state = self.resume;
            }
            (RfState::WaitDiscovery, Command::RfDiscover { .. }) => {
                self.state = if ok { RfState::Discovery } else { RfState::Idle };
            }
            (RfState::Deactivating { target }, Command::RfDeactivate { .. }) => {
                if ok {
                    let landing = deactivation_target(self.deactivating_from, target);
                    self.state = landing;
                    self.close_rf(actions);
                } else {
                    self.state = self.deactivating_from;
                }
            }
            _ => {}
        }

        if !internal {
            if ok && self.state == RfState::Idle && matches!(command, Command::RfDeactivate { .. }) {
                self.enter_idle(ctx, actions);
            }
            return;
        }

        self.outstanding = false;
        if let Err(error) = outcome {
            warn!(command = command.name(), %error, "RF command failed");
            self.steps.clear();
            self.pending = None;
            self.dirty = false;
            self.settle(Err(error), actions);
            return;
        }

        match command {
            Command::RfDiscover { .. } => {
                self.active = self.pending.take();
                if self.dirty {
                    self.resume_pending_work(ctx, actions);
                } else {
                    self.settle(Ok(()), actions);
                }
            }
            Command::RfDeactivate { .. } if self.state == RfState::Idle => {
                self.enter_idle(ctx, actions);
            }
            Command::RfDeactivate { .. } => self.resume_pending_work(ctx, actions),
            _ => self.send_next(actions),
        }
    }

    fn on_notification(
        &mut self,
        notification: &Notification,
        ctx: &RfContext<'_>,
        actions: &mut Vec<RfAction>,
    ) {
        match notification {
            Notification::RfIntfActivated(activation) => match self.state {
                RfState::Discovery
                | RfState::WaitAllDiscoveries
                | RfState::WaitHostSelect
                | RfState::PollSleep
                | RfState::ListenSleep => {
                    self.state = if activation.is_listen() {
                        RfState::ListenActive
                    } else {
                        RfState::PollActive
                    };
                    self.activation = Some(activation.clone());
                    actions.push(RfAction::OpenRf {
                        credits: activation.credits,
                        max_payload: activation.max_payload,
                    });
                }
                state => warn!(?state, "Unexpected interface activation"),
            },
            Notification::RfDeactivate { kind, reason } => match self.state {
                from @ (RfState::PollActive
                | RfState::ListenActive
                | RfState::ListenSleep
                | RfState::PollSleep
                | RfState::WaitHostSelect
                | RfState::WaitAllDiscoveries) => {
                    debug!(?kind, ?reason, "Remote deactivation");
                    self.land(deactivation_target(from, *kind), ctx, actions);
                }
                state => trace!(?state, ?kind, "Deactivation notification already accounted for"),
            },
            Notification::CoreGenericError(Status::DiscoveryTargetActivationFailed) => {
                if matches!(
                    self.state,
                    RfState::WaitHostSelect | RfState::PollSleep | RfState::Discovery
                ) {
                    self.state = RfState::Discovery;
                }
            }
            Notification::CoreGenericError(Status::DiscoveryTearDown) => {
                if self.state != RfState::Idle {
                    self.land(RfState::Idle, ctx, actions);
                }
            }
            Notification::CoreInterfaceError { status, conn_id } => {
                warn!(%status, conn_id, state = ?self.state, "Interface error");
            }
            Notification::RfNfceeAction {
                nfcee_id, trigger, ..
            } => {
                debug!(nfcee_id, trigger, "NFCEE action");
            }
            _ => {}
        }
    }

    /// Settle in a state reached by deactivation
    fn land(&mut self, state: RfState, ctx: &RfContext<'_>, actions: &mut Vec<RfAction>) {
        self.close_rf(actions);
        if state == RfState::Idle {
            self.enter_idle(ctx, actions);
        } else {
            self.state = state;
            self.resume_pending_work(ctx, actions);
        }
    }

    fn close_rf(&mut self, actions: &mut Vec<RfAction>) {
        self.activation = None;
        actions.push(RfAction::CloseRf);
    }

    fn enter_idle(&mut self, ctx: &RfContext<'_>, actions: &mut Vec<RfAction>) {
        self.state = RfState::Idle;
        self.targets.clear();
        self.active = None;
        if self.outstanding {
            self.dirty = true;
        } else {
            self.reconcile(ctx, actions);
        }
    }

    /// Act on changed inputs once no internal command is outstanding
    fn resume_pending_work(&mut self, ctx: &RfContext<'_>, actions: &mut Vec<RfAction>) {
        if self.outstanding || !self.dirty {
            return;
        }
        match self.state {
            RfState::Idle => self.reconcile(ctx, actions),
            RfState::Discovery
            | RfState::WaitAllDiscoveries
            | RfState::WaitHostSelect
            | RfState::PollActive
            | RfState::ListenActive
            | RfState::ListenSleep
            | RfState::PollSleep => self.check_active(ctx, actions),
            _ => {}
        }
    }

    /// Issue the commands that start discovery from idle
    fn reconcile(&mut self, ctx: &RfContext<'_>, actions: &mut Vec<RfAction>) {
        self.dirty = false;
        let plan = self.plan(ctx);
        if plan.discover.is_empty() {
            debug!("Nothing to discover, RF stays idle");
            self.settle(Ok(()), actions);
            return;
        }

        self.steps.clear();
        if !plan.config.is_empty() {
            self.steps.push_back(Command::CoreSetConfig {
                params: plan.config.clone(),
            });
        }
        if !plan.routing.is_empty() {
            self.steps.push_back(Command::RfSetListenModeRouting {
                more: false,
                entries: plan.routing.clone(),
            });
        }
        self.steps.push_back(Command::RfDiscover {
            configs: plan.discover.clone(),
        });
        debug!(steps = self.steps.len(), "Starting discovery");
        self.pending = Some(plan);
        self.send_next(actions);
    }

    /// Restart discovery if the running one no longer matches the inputs
    fn check_active(&mut self, ctx: &RfContext<'_>, actions: &mut Vec<RfAction>) {
        self.dirty = false;
        let plan = self.plan(ctx);
        if self.active.as_ref() == Some(&plan) {
            self.settle(Ok(()), actions);
            return;
        }
        debug!(state = ?self.state, "Discovery parameters changed, deactivating");
        self.steps.clear();
        self.steps.push_back(Command::RfDeactivate {
            kind: DeactivationType::Idle,
        });
        self.send_next(actions);
    }

    fn send_next(&mut self, actions: &mut Vec<RfAction>) {
        if let Some(command) = self.steps.pop_front() {
            self.outstanding = true;
            actions.push(RfAction::Send(command));
        }
    }

    fn settle(&mut self, result: Result<()>, actions: &mut Vec<RfAction>) {
        if std::mem::take(&mut self.settle_pending) {
            actions.push(RfAction::Settled(result));
        }
    }

    fn stop(&mut self, actions: &mut Vec<RfAction>) {
        if self.state != RfState::Uninitialized {
            self.close_rf(actions);
        }
        self.state = RfState::Uninitialized;
        self.steps.clear();
        self.outstanding = false;
        self.dirty = false;
        self.active = None;
        self.pending = None;
        self.targets.clear();
        self.settle(Err(Error::Rejected("RF stopped")), actions);
    }

    fn plan(&self, ctx: &RfContext<'_>) -> DiscoveryPlan {
        let mut poll = self.reader.poll_modes();
        for mode in poll_modes(ctx.demand.poll) {
            if !poll.contains(&mode) {
                poll.push(mode);
            }
        }

        let dh_listen = self.card.technologies();
        let listen = ctx
            .demand
            .listen
            .values()
            .fold(dh_listen, |acc, techs| acc | *techs);

        let discover = poll
            .into_iter()
            .chain(listen.listen_modes())
            .map(DiscoverConfig::every_period)
            .collect();

        let routing = if listen.is_empty() {
            Vec::new()
        } else if let Some(table) = &self.routing_override {
            table.clone()
        } else {
            let mut requests = ctx.demand.listen.clone();
            if !dh_listen.is_empty() {
                *requests.entry(host::DH).or_default() |= dh_listen;
            }
            routing::merge(ctx.host_priority, &requests, ctx.power_state)
        };

        DiscoveryPlan {
            config: listen_config(self.card),
            routing,
            discover,
        }
    }
}

/// Listen parameters advertising the card protocols the device host emulates
fn listen_config(card: CardProtocols) -> Vec<Tlv> {
    let mut params = Vec::new();
    if card.intersects(CardProtocols::ISO_DEP_A | CardProtocols::NFC_DEP_A) {
        let mut sel_info = 0;
        if card.contains(CardProtocols::ISO_DEP_A) {
            sel_info |= config::LA_SEL_INFO_ISO_DEP;
        }
        if card.contains(CardProtocols::NFC_DEP_A) {
            sel_info |= config::LA_SEL_INFO_NFC_DEP;
        }
        params.push(Tlv::new(config::LA_SEL_INFO, vec![sel_info]));
    }
    if card.contains(CardProtocols::ISO_DEP_B) {
        params.push(Tlv::new(
            config::LB_SENSB_INFO,
            vec![config::LB_SENSB_INFO_ISO_DEP],
        ));
    }
    if card.intersects(CardProtocols::NFC_DEP_F | CardProtocols::T3T) {
        let protocol_type = if card.contains(CardProtocols::NFC_DEP_F) {
            config::LF_PROTOCOL_TYPE_NFC_DEP
        } else {
            0x00
        };
        params.push(Tlv::new(config::LF_PROTOCOL_TYPE, vec![protocol_type]));
    }
    params
}

fn poll_modes(techs: Technologies) -> Vec<RfTechMode> {
    techs
        .technologies()
        .filter_map(|tech| match tech {
            Technology::NfcA => Some(RfTechMode::NfcAPassivePoll),
            Technology::NfcB => Some(RfTechMode::NfcBPassivePoll),
            Technology::NfcF => Some(RfTechMode::NfcFPassivePoll),
            Technology::Iso15693 => Some(RfTechMode::Iso15693Poll),
            Technology::Other(_) => None,
        })
        .collect()
}

/// State reached when `kind` deactivation completes from `from`
const fn deactivation_target(from: RfState, kind: DeactivationType) -> RfState {
    match (kind, from) {
        (DeactivationType::Idle, _) => RfState::Idle,
        (DeactivationType::Discovery, _) => RfState::Discovery,
        (
            DeactivationType::Sleep | DeactivationType::SleepAf,
            RfState::ListenActive | RfState::ListenSleep,
        ) => RfState::ListenSleep,
        (DeactivationType::Sleep | DeactivationType::SleepAf, _) => RfState::PollSleep,
    }
}
