//! The NCI protocol engine
//!
//! [`Nci`] is a sans-IO state machine. The owner of the link feeds received
//! packets to [`Nci::receive`], drives time through [`Nci::poll_timeout`] and
//! [`Nci::handle_timeout`], and every outbound packet is written through the
//! [`NciTransport`] the engine owns. All callbacks run synchronously on the
//! caller's thread and never get access to the engine, so every state change
//! they could trigger goes through the internal queues and is picked up by the
//! next pump.

use std::fmt;
use std::time::Instant;

use bytes::Bytes;
use nexum_nci_core::constants::RF_CONN_ID;
use nexum_nci_core::packet::{encode_control, encode_data};
use nexum_nci_core::response::InitInfo;
use nexum_nci_core::{
    Command, MessageType, NciTransport, Notification, NotificationKind, Opcode, Packet,
    PacketHeader, Reassembled, Reassembler, Response, Status,
};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::NciConfig;
use crate::data::{DataManager, LogicalConnection, SendCallback};
use crate::dispatcher::{Completion, Dispatcher, Owner, PendingCommand, ResponseCallback};
use crate::nfcee::{Nfcee, NfceeAction, NfceeTable};
use crate::operation::{Operation, OperationCallback, RfSnapshot, Sequencer, Step, Waiting};
use crate::registry::{NotificationCallback, Registry, SubscriptionId};
use crate::rf::{RfAction, RfContext, RfDiscovery, RfEvent, RfState};
use crate::timer::{Timer, TimerTable};
use crate::{Error, Result};

/// Callback receiving each reassembled inbound data message with its connection id
pub type DataCallback = Box<dyn FnMut(u8, Bytes)>;

/// Upper bound on pump rounds per entry point
const MAX_PUMP_ROUNDS: usize = 1024;

/// Control message being reassembled: message type and opcode
type ControlKey = (u8, u16);

/// NCI protocol engine bound to a transport
pub struct Nci<T: NciTransport> {
    transport: T,
    config: NciConfig,
    device_id: Option<u32>,
    /// Negotiated control packet payload limit
    max_control_packet_size: usize,
    init_info: Option<InitInfo>,
    dispatcher: Dispatcher,
    control: Reassembler<ControlKey>,
    control_pending: Option<ControlKey>,
    data: DataManager,
    data_callback: Option<DataCallback>,
    registry: Registry,
    rf: RfDiscovery,
    nfcees: NfceeTable,
    sequencer: Sequencer,
    timers: TimerTable,
}

impl<T: NciTransport> fmt::Debug for Nci<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Nci")
            .field("transport", &self.transport)
            .field("device_id", &self.device_id)
            .field("max_control_packet_size", &self.max_control_packet_size)
            .field("dispatcher", &self.dispatcher)
            .field("data", &self.data)
            .field("rf", &self.rf.state())
            .field("nfcees", &self.nfcees)
            .field("sequencer", &self.sequencer)
            .finish_non_exhaustive()
    }
}

impl<T: NciTransport> Nci<T> {
    /// Create an engine over `transport`
    ///
    /// The configuration is validated here; the transport is not opened.
    pub fn new(transport: T, config: NciConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            transport,
            max_control_packet_size: config.max_control_packet_size,
            device_id: None,
            init_info: None,
            dispatcher: Dispatcher::default(),
            control: Reassembler::new(config.max_message_size),
            control_pending: None,
            data: DataManager::new(config.max_message_size),
            data_callback: None,
            registry: Registry::new(),
            rf: RfDiscovery::new(),
            nfcees: NfceeTable::new(),
            sequencer: Sequencer::default(),
            timers: TimerTable::default(),
            config,
        })
    }

    /// Open the transport to `device_id` and start transmitting queued work
    #[instrument(level = "debug", skip(self))]
    pub fn open(&mut self, device_id: u32) -> Result<()> {
        self.transport
            .open(device_id)
            .map_err(|e| Error::Transport(e.into()))?;
        self.device_id = Some(device_id);
        info!(device_id, "Transport opened");
        self.pump(Instant::now());
        Ok(())
    }

    /// Close the transport
    ///
    /// Every queued or in-flight command and every running or queued
    /// operation completes with [`Error::Closed`]. Connection state is
    /// dropped, so pending sends complete with [`Error::Flushed`].
    #[instrument(level = "debug", skip(self))]
    pub fn close(&mut self, device_id: u32) -> Result<()> {
        let result = self
            .transport
            .close(device_id)
            .map_err(|e| Error::Transport(e.into()));
        self.device_id = None;
        info!(device_id, "Transport closed");
        self.shutdown();
        result
    }

    /// Returns true while the transport is open
    pub fn is_open(&self) -> bool {
        self.device_id.is_some() && self.transport.is_open()
    }

    /// Queue a command
    ///
    /// The payload is encoded immediately, so an unencodable command fails
    /// here. The callback receives the decoded response, or the error that
    /// prevented one.
    #[instrument(level = "trace", skip(self, callback), fields(command = command.name()))]
    pub fn send_command(&mut self, command: Command, callback: Option<ResponseCallback>) -> Result<()> {
        self.accept(&command)?;
        let completion = callback.map_or(Completion::None, Completion::Caller);
        self.dispatcher.enqueue(command, completion)?;
        self.pump(Instant::now());
        Ok(())
    }

    /// Queue data on a logical connection
    ///
    /// The callback fires once after the last packet is written, or with the
    /// first failure.
    #[instrument(level = "trace", skip(self, payload, callback), fields(len = payload.len()))]
    pub fn send_data(
        &mut self,
        conn_id: u8,
        payload: Bytes,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.data.prepare_to_send(conn_id, payload, callback)?;
        self.pump(Instant::now());
        Ok(())
    }

    /// Install the handler for inbound data messages
    pub fn on_data(&mut self, callback: DataCallback) {
        self.data_callback = Some(callback);
    }

    /// Subscribe to notifications of `kind`
    pub fn subscribe(
        &mut self,
        kind: NotificationKind,
        callback: NotificationCallback,
    ) -> SubscriptionId {
        self.registry.subscribe(kind, callback)
    }

    /// Remove a subscription, returning whether it existed
    pub fn unsubscribe(&mut self, kind: NotificationKind, id: SubscriptionId) -> bool {
        self.registry.unsubscribe(kind, id)
    }

    /// Queue a high-level operation
    #[instrument(level = "trace", skip(self, callback), fields(operation = operation.name()))]
    pub fn start_operation(
        &mut self,
        operation: Operation,
        callback: Option<OperationCallback>,
    ) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        self.sequencer.submit(operation, callback);
        self.pump(Instant::now());
        Ok(())
    }

    /// Process one packet received from the controller
    ///
    /// Malformed input is dropped and reported as an error; the engine stays
    /// usable.
    #[instrument(level = "trace", skip_all, fields(len = packet.len()))]
    pub fn receive(&mut self, packet: &[u8]) -> Result<()> {
        let result = self.receive_packet(packet);
        if let Err(error) = &result {
            error!(%error, packet = %hex::encode(packet), "Dropping received packet");
        }
        self.pump(Instant::now());
        result
    }

    /// Earliest instant at which [`Nci::handle_timeout`] must be called
    pub fn poll_timeout(&self) -> Option<Instant> {
        self.timers.next_timeout()
    }

    /// Fire every timer due at `now`
    pub fn handle_timeout(&mut self, now: Instant) {
        for timer in self.timers.expire(now) {
            match timer {
                Timer::Command => {
                    if let Some(pending) = self.dispatcher.take_in_flight() {
                        let opcode = pending.opcode();
                        warn!(%opcode, command = pending.command.name(), "Command timed out");
                        self.complete(pending, Err(Error::CommandTimeout { opcode }));
                    }
                }
                Timer::NfceeDebounce => {
                    debug!("NFCEE requests settled, refreshing discovery");
                    self.rf_event(RfEvent::Refresh);
                }
            }
        }
        self.pump(now);
    }

    /// Current RF state
    pub const fn rf_state(&self) -> RfState {
        self.rf.state()
    }

    /// RF discovery state machine, for discovered targets and activation details
    pub const fn rf(&self) -> &RfDiscovery {
        &self.rf
    }

    /// Look up an NFCEE
    pub fn nfcee(&self, id: u8) -> Option<&Nfcee> {
        self.nfcees.get(id)
    }

    /// All known NFCEEs
    pub const fn nfcees(&self) -> &NfceeTable {
        &self.nfcees
    }

    /// Look up a logical connection
    pub fn connection(&self, id: u8) -> Option<&LogicalConnection> {
        self.data.connection(id)
    }

    /// Control packet payload limit in effect
    pub const fn max_control_packet_size(&self) -> usize {
        self.max_control_packet_size
    }

    /// Returns true while a command awaits its response
    pub const fn is_command_pending(&self) -> bool {
        self.dispatcher.is_pending()
    }

    /// Number of accepted commands not yet transmitted
    pub fn queued_commands(&self) -> usize {
        self.dispatcher.backlog_len()
    }

    /// Controller capabilities reported by the last CORE_INIT
    pub const fn init_info(&self) -> Option<&InitInfo> {
        self.init_info.as_ref()
    }

    /// Engine configuration
    pub const fn config(&self) -> &NciConfig {
        &self.config
    }

    /// Shared access to the transport
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Exclusive access to the transport
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    fn accept(&self, command: &Command) -> Result<()> {
        if !self.is_open() {
            return Err(Error::Closed);
        }
        if matches!(command, Command::CoreSetConfig { .. }) && !self.rf.state().accepts_config() {
            return Err(Error::Rejected(
                "CORE_SET_CONFIG is only allowed while RF is idle or discovering",
            ));
        }
        Ok(())
    }

    fn receive_packet(&mut self, bytes: &[u8]) -> Result<()> {
        let packet = Packet::parse(bytes)?;
        match packet.header {
            PacketHeader::Data(header) => {
                let message = self
                    .data
                    .receive(header.conn_id, header.boundary, &packet.payload)?;
                if let Some(message) = message {
                    trace!(conn_id = header.conn_id, len = message.len(), "Data received");
                    match self.data_callback.as_mut() {
                        Some(callback) => callback(header.conn_id, message),
                        None => debug!(conn_id = header.conn_id, "No data handler installed"),
                    }
                }
                Ok(())
            }
            PacketHeader::Control(header) => {
                let key = (header.message_type as u8, header.opcode.as_u16());
                if let Some(stale) = self.control_pending.filter(|pending| *pending != key) {
                    warn!(opcode = %header.opcode, "Control message interrupted a partial one");
                    self.control.reset(&stale);
                }
                let message = match self.control.push(key, header.boundary, &packet.payload) {
                    Ok(Reassembled::Pending) => {
                        self.control_pending = Some(key);
                        return Ok(());
                    }
                    Ok(Reassembled::Complete(message)) => message,
                    Err(error) => {
                        self.control_pending = None;
                        return Err(error.into());
                    }
                };
                self.control_pending = None;
                match header.message_type {
                    MessageType::Response => self.on_response(header.opcode, message),
                    MessageType::Notification => self.on_notification(header.opcode, message),
                    MessageType::Command | MessageType::Data => Err(Error::Malformed(
                        nexum_nci_core::Error::InvalidHeader("command packet from the controller"),
                    )),
                }
            }
        }
    }

    fn on_response(&mut self, opcode: Opcode, payload: Bytes) -> Result<()> {
        let Some(in_flight) = self.dispatcher.in_flight() else {
            warn!(%opcode, "Response without a command in flight");
            return Ok(());
        };
        if in_flight.opcode() != opcode {
            warn!(%opcode, expected = %in_flight.opcode(), "Response does not match the command in flight");
            return Ok(());
        }
        let decoded = if in_flight.command.is_raw() {
            Ok(Response::raw(opcode, payload))
        } else {
            Response::decode(opcode, payload)
        };

        self.timers.stop(Timer::Command);
        let Some(pending) = self.dispatcher.take_in_flight() else {
            return Ok(());
        };
        match decoded {
            Ok(response) => {
                trace!(%opcode, status = %response.status(), "Response received");
                self.response_hooks(&pending.command, &response);
                self.complete(pending, Ok(response));
                Ok(())
            }
            Err(error) => {
                self.complete(pending, Err(Error::from(error.clone())));
                Err(error.into())
            }
        }
    }

    /// Engine bookkeeping driven by responses, before the owner sees them
    fn response_hooks(&mut self, command: &Command, response: &Response) {
        if let Command::CoreReset { .. } = command {
            self.reset_state();
            return;
        }
        if !response.status().is_ok() {
            return;
        }
        match (command, response) {
            (Command::CoreInit, Response::CoreInit(info)) => {
                let negotiated = usize::from(info.max_control_packet_size);
                if negotiated != 0 {
                    self.max_control_packet_size =
                        self.config.max_control_packet_size.min(negotiated);
                }
                self.data.init(info.max_logical_connections);
                info!(
                    max_control_packet_size = self.max_control_packet_size,
                    max_logical_connections = info.max_logical_connections,
                    manufacturer_id = info.manufacturer_id,
                    "Controller initialized"
                );
                self.init_info = Some(info.clone());
            }
            (
                Command::CoreConnCreate { .. },
                Response::CoreConnCreate {
                    max_payload,
                    credits,
                    conn_id,
                },
            ) => {
                if let Err(error) = self.data.open(*conn_id, *credits, *max_payload) {
                    warn!(conn_id, %error, "Could not open logical connection");
                }
            }
            (Command::CoreConnClose { conn_id }, _) => {
                self.data.close(*conn_id);
            }
            _ => {}
        }
    }

    /// Deliver the outcome of a command to whoever is waiting for it
    fn complete(&mut self, pending: PendingCommand, outcome: Result<Response>) {
        let PendingCommand {
            command,
            completion,
            ..
        } = pending;

        if observed_by_rf(&command) && !matches!(completion, Completion::Internal(Owner::Rf)) {
            let rf_outcome = match &outcome {
                Ok(response) if response.status().is_ok() => Ok(()),
                Ok(response) => Err(Error::failed(command.opcode(), response.status())),
                Err(_) => Err(Error::Rejected("no usable response")),
            };
            self.rf_event(RfEvent::Response {
                command: &command,
                outcome: rf_outcome,
                internal: false,
            });
        }

        match completion {
            Completion::Caller(callback) => callback(outcome),
            Completion::None => {
                if let Err(error) = outcome {
                    debug!(command = command.name(), %error, "Detached command failed");
                }
            }
            Completion::Internal(Owner::Rf) => {
                let outcome = require_ok(&command, outcome).map(drop);
                self.rf_event(RfEvent::Response {
                    command: &command,
                    outcome,
                    internal: true,
                });
            }
            Completion::Internal(Owner::Nfcee(id)) => {
                let outcome = require_ok(&command, outcome);
                self.with_nfcees(|nfcees| match outcome {
                    Ok(response) => nfcees.on_response(id, &command, Ok(&response)),
                    Err(error) => nfcees.on_response(id, &command, Err(error)),
                });
            }
            Completion::Internal(Owner::Sequencer) => {
                let outcome = require_ok(&command, outcome).map(drop);
                if !self.sequencer.resume(Waiting::Command, outcome) {
                    debug!(command = command.name(), "Operation no longer waiting for command");
                }
            }
        }
    }

    fn on_notification(&mut self, opcode: Opcode, payload: Bytes) -> Result<()> {
        let notification = match Notification::decode(opcode, payload) {
            Ok(notification) => notification,
            Err(error) if matches!(error.root(), nexum_nci_core::Error::UnknownOpcode(_)) => {
                warn!(%opcode, "Unknown notification dropped");
                return Ok(());
            }
            Err(error) => return Err(error.into()),
        };
        debug!(kind = ?notification.kind(), "Notification received");

        match &notification {
            Notification::CoreReset {
                reason,
                config_status,
            } => {
                warn!(reason, ?config_status, "Controller reset");
                self.controller_reset();
            }
            Notification::CoreConnCredits(entries) => {
                for entry in entries {
                    self.data.add_credits(entry.conn_id, entry.credits);
                }
                self.rf_event(RfEvent::Notification(&notification));
            }
            _ => {
                self.rf_event(RfEvent::Notification(&notification));
                self.with_nfcees(|nfcees| nfcees.on_notification(&notification));
            }
        }

        self.registry.dispatch(&notification);
        Ok(())
    }

    /// Unsolicited CORE_RESET_NTF: the controller lost all state
    fn controller_reset(&mut self) {
        let abort = self
            .dispatcher
            .in_flight()
            .is_some_and(|pending| !matches!(pending.command, Command::CoreReset { .. }));
        if abort {
            self.timers.stop(Timer::Command);
            if let Some(pending) = self.dispatcher.take_in_flight() {
                let opcode = pending.opcode();
                self.complete(pending, Err(Error::failed(opcode, Status::Failed)));
            }
        }
        self.reset_state();
    }

    /// Forget everything negotiated with the controller
    fn reset_state(&mut self) {
        self.timers.stop(Timer::NfceeDebounce);
        self.data.reset();
        self.init_info = None;
        self.max_control_packet_size = self.config.max_control_packet_size;
        self.rf_event(RfEvent::Stop);
        let actions = self.nfcees.clear();
        self.apply_nfcee_actions(actions);
    }

    fn shutdown(&mut self) {
        self.timers.stop_all();
        self.control.clear();
        self.control_pending = None;
        loop {
            let pending = self.dispatcher.drain();
            if pending.is_empty() {
                break;
            }
            for command in pending {
                self.complete(command, Err(Error::Closed));
            }
        }
        self.reset_state();
        self.sequencer.abort();
        // State machine resets may have queued follow-ups
        for command in self.dispatcher.drain() {
            self.complete(command, Err(Error::Closed));
        }
    }

    fn rf_event(&mut self, event: RfEvent<'_>) {
        let ctx = RfContext {
            demand: self.nfcees.demand(),
            host_priority: &self.config.host_priority,
            power_state: self.config.listen_power_state,
        };
        let actions = self.rf.handle(event, &ctx);
        self.apply_rf_actions(actions);
    }

    fn apply_rf_actions(&mut self, actions: Vec<RfAction>) {
        for action in actions {
            match action {
                RfAction::Send(command) => {
                    let completion = Completion::Internal(Owner::Rf);
                    if let Err(error) = self.dispatcher.enqueue(command.clone(), completion) {
                        self.rf_event(RfEvent::Response {
                            command: &command,
                            outcome: Err(error),
                            internal: true,
                        });
                    }
                }
                RfAction::ArmDebounce => {
                    self.timers
                        .set(Timer::NfceeDebounce, Instant::now() + self.config.nfcee_debounce);
                }
                RfAction::OpenRf {
                    credits,
                    max_payload,
                } => match self.data.open(RF_CONN_ID, credits, max_payload) {
                    Ok(()) => self.data.activate_rf(),
                    Err(error) => warn!(%error, "Could not open the RF connection"),
                },
                RfAction::CloseRf => self.data.deactivate_rf(),
                RfAction::Settled(result) => {
                    if !self.sequencer.resume(Waiting::RfSettle, result) {
                        trace!("RF settled outside an operation");
                    }
                }
            }
        }
    }

    /// Run `f` on the NFCEE table and tell the RF state machine if the
    /// NFCEEs' discovery demand changed
    fn with_nfcees<F>(&mut self, f: F)
    where
        F: FnOnce(&mut NfceeTable) -> Vec<NfceeAction>,
    {
        let before = self.nfcees.demand();
        let actions = f(&mut self.nfcees);
        self.apply_nfcee_actions(actions);
        if self.nfcees.demand() != before {
            self.rf_event(RfEvent::NfceeRequest);
        }
    }

    fn apply_nfcee_actions(&mut self, actions: Vec<NfceeAction>) {
        for action in actions {
            match action {
                NfceeAction::Send { nfcee_id, command } => {
                    let completion = Completion::Internal(Owner::Nfcee(nfcee_id));
                    if let Err(error) = self.dispatcher.enqueue(command.clone(), completion) {
                        let follow_up = self.nfcees.on_response(nfcee_id, &command, Err(error));
                        self.apply_nfcee_actions(follow_up);
                    }
                }
                NfceeAction::Complete(result) => {
                    if !self.sequencer.resume(Waiting::Nfcee, result) {
                        trace!("NFCEE switch finished outside an operation");
                    }
                }
            }
        }
    }

    /// Make progress on operations, commands and data until nothing moves
    fn pump(&mut self, now: Instant) {
        if !self.is_open() {
            return;
        }
        for _ in 0..MAX_PUMP_ROUNDS {
            let mut progress = self.step_operation();
            progress |= self.dispatch_next_command(now);
            progress |= self.flush_data();
            if !progress {
                return;
            }
        }
        warn!("Pump round limit reached");
    }

    fn step_operation(&mut self) -> bool {
        if !self.sequencer.is_running() {
            let Some((operation, callback)) = self.sequencer.pop() else {
                return false;
            };
            let name = operation.name();
            let snapshot = RfSnapshot {
                initialized: self.rf.state() != RfState::Uninitialized,
                reader: self.rf.reader_protocols(),
                card: self.rf.card_protocols(),
            };
            match operation.steps(&self.config, snapshot) {
                Ok(steps) => self.sequencer.begin(name, steps, callback),
                Err(error) => {
                    warn!(operation = name, %error, "Operation could not start");
                    if let Some(callback) = callback {
                        callback(Err(error));
                    }
                }
            }
            return true;
        }

        match self.sequencer.next_step() {
            Some(step) => {
                self.run_step(step);
                true
            }
            None => !self.sequencer.is_running(),
        }
    }

    fn run_step(&mut self, step: Step) {
        trace!(?step, "Running operation step");
        match step {
            Step::Command(command) => {
                let queued = self.accept(&command).and_then(|()| {
                    self.dispatcher
                        .enqueue(command, Completion::Internal(Owner::Sequencer))
                });
                match queued {
                    Ok(()) => self.sequencer.wait(Waiting::Command),
                    Err(error) => self.sequencer.finish(Err(error)),
                }
            }
            Step::RfStart => self.rf_event(RfEvent::Start),
            Step::RfConfigure { reader, card } => {
                self.sequencer.wait(Waiting::RfSettle);
                self.rf_event(RfEvent::Configure { reader, card });
            }
            Step::RfStop => self.reset_state(),
            Step::NfceeSwitch { nfcee_id, mode } => {
                self.sequencer.wait(Waiting::Nfcee);
                self.with_nfcees(|nfcees| nfcees.switch_to(nfcee_id, mode));
            }
            Step::SetRoutingOverride(table) => self.rf.set_routing_override(Some(table)),
        }
    }

    fn dispatch_next_command(&mut self, now: Instant) -> bool {
        let Some(pending) = self.dispatcher.start_next() else {
            return false;
        };
        let command = pending.command.clone();
        let written = encode_control(
            MessageType::Command,
            pending.opcode(),
            &pending.payload,
            self.max_control_packet_size,
        )
        .map_err(Error::from)
        .and_then(|packets| {
            for packet in &packets {
                self.transport
                    .write(packet)
                    .map_err(|e| Error::Transport(e.into()))?;
            }
            Ok(packets.len())
        });

        match written {
            Ok(packets) => {
                debug!(command = command.name(), opcode = %command.opcode(), packets, "Command sent");
                self.timers
                    .set(Timer::Command, now + self.config.command_timeout);
                self.rf_event(RfEvent::CommandSent(&command));
            }
            Err(error) => {
                warn!(command = command.name(), %error, "Command could not be written");
                if let Some(pending) = self.dispatcher.take_in_flight() {
                    self.complete(pending, Err(error));
                }
            }
        }
        true
    }

    fn flush_data(&mut self) -> bool {
        let mut progress = false;
        while let Some(outgoing) = self.data.next_packet() {
            progress = true;
            let result = encode_data(outgoing.conn_id, outgoing.boundary, &outgoing.payload)
                .map_err(Error::from)
                .and_then(|frame| {
                    self.transport
                        .write(&frame)
                        .map_err(|e| Error::Transport(e.into()))
                });
            if let Err(error) = &result {
                warn!(conn_id = outgoing.conn_id, %error, "Data packet could not be written");
            }
            self.data.sent(outgoing.group, result);
        }
        progress
    }
}

/// Commands whose outcome moves the RF state machine
const fn observed_by_rf(command: &Command) -> bool {
    matches!(
        command,
        Command::CoreSetConfig { .. }
            | Command::RfSetListenModeRouting { .. }
            | Command::RfDiscover { .. }
            | Command::RfDeactivate { .. }
    )
}

/// Turn a non-OK status into [`Error::Failed`]
fn require_ok(command: &Command, outcome: Result<Response>) -> Result<Response> {
    outcome.and_then(|response| {
        let status = response.status();
        if status.is_ok() {
            Ok(response)
        } else {
            Err(Error::failed(command.opcode(), status))
        }
    })
}
