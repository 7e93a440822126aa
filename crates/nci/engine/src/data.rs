//! Logical data connections and credit-based flow control
//!
//! Each connection owns its credit counter, negotiated payload size, send
//! queue and reassembly buffer. Sends are split into one unit per data
//! packet; every unit consumes a credit and a connection with no credit left
//! keeps its queue until `CORE_CONN_CREDITS_NTF` replenishes it.
//!
//! Every open and close, and every deactivation of the RF connection, bumps
//! the connection's generation. Units queued
//! against an older generation are never transmitted: their send completes
//! with [`Error::Flushed`].

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;

use bytes::Bytes;
use nexum_nci_core::constants::{CREDITS_UNLIMITED, RF_CONN_ID};
use nexum_nci_core::{PacketBoundary, Reassembled, Reassembly, fragment};
use tracing::{debug, trace, warn};

use crate::{Error, Result};

/// Callback invoked once per send, after its last packet
pub type SendCallback = Box<dyn FnOnce(Result<()>)>;

/// Highest connection id expressible in a data header
const MAX_CONN_ID: u8 = 0x0F;

/// Lifecycle state of a logical connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not usable
    Closed,
    /// Created and usable while active
    Open,
    /// RF connection whose RF interface was deactivated
    Deactivated,
}

#[derive(Debug)]
struct SendUnit {
    group: u64,
    generation: u32,
    boundary: PacketBoundary,
    payload: Bytes,
}

struct SendGroup {
    conn_id: u8,
    remaining: usize,
    error: Option<Error>,
    callback: Option<SendCallback>,
}

/// A logical data connection
#[derive(Debug)]
pub struct LogicalConnection {
    id: u8,
    state: ConnectionState,
    active: bool,
    max_payload: u8,
    initial_credit: u8,
    credit: u8,
    generation: u32,
    reassembly: Reassembly,
    queue: VecDeque<SendUnit>,
}

impl LogicalConnection {
    fn new(id: u8, max_message_size: usize) -> Self {
        Self {
            id,
            state: ConnectionState::Closed,
            active: false,
            max_payload: 0,
            initial_credit: 0,
            credit: 0,
            generation: 0,
            reassembly: Reassembly::new(max_message_size),
            queue: VecDeque::new(),
        }
    }

    /// Connection id
    pub const fn id(&self) -> u8 {
        self.id
    }

    /// Lifecycle state
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether sends are accepted
    pub const fn is_active(&self) -> bool {
        self.active
    }

    /// Negotiated maximum data packet payload
    pub const fn max_payload(&self) -> u8 {
        self.max_payload
    }

    /// Credits granted when the connection was opened
    pub const fn initial_credit(&self) -> u8 {
        self.initial_credit
    }

    /// Credits currently available
    pub const fn credit(&self) -> u8 {
        self.credit
    }

    /// Current generation
    pub const fn generation(&self) -> u32 {
        self.generation
    }

    /// Whether the controller flow-controls this connection
    pub const fn is_flow_controlled(&self) -> bool {
        self.initial_credit != CREDITS_UNLIMITED
    }

    /// Number of packets waiting to be sent
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    fn can_send(&self) -> bool {
        self.state == ConnectionState::Open
            && self.active
            && (!self.is_flow_controlled() || self.credit > 0)
    }
}

/// A data packet released for transmission
#[derive(Debug)]
pub(crate) struct Outgoing {
    pub(crate) conn_id: u8,
    pub(crate) group: u64,
    pub(crate) boundary: PacketBoundary,
    pub(crate) payload: Bytes,
}

/// Table of logical data connections
pub struct DataManager {
    connections: BTreeMap<u8, LogicalConnection>,
    groups: HashMap<u64, SendGroup>,
    next_group: u64,
    max_message_size: usize,
    max_logical_connections: u8,
}

impl fmt::Debug for DataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataManager")
            .field("connections", &self.connections)
            .field("pending_sends", &self.groups.len())
            .field("max_logical_connections", &self.max_logical_connections)
            .finish()
    }
}

impl DataManager {
    /// Create a table holding only the (closed) RF connection
    pub fn new(max_message_size: usize) -> Self {
        let mut connections = BTreeMap::new();
        connections.insert(RF_CONN_ID, LogicalConnection::new(RF_CONN_ID, max_message_size));
        Self {
            connections,
            groups: HashMap::new(),
            next_group: 0,
            max_message_size,
            max_logical_connections: 0,
        }
    }

    /// Reset the table after CORE_INIT
    pub fn init(&mut self, max_logical_connections: u8) {
        self.reset();
        self.max_logical_connections = max_logical_connections;
        debug!(max_logical_connections, "Data connection table initialized");
    }

    /// Close every connection and flush every pending send
    pub fn reset(&mut self) {
        let ids: Vec<u8> = self.connections.keys().copied().collect();
        for id in ids {
            self.close(id);
        }
        self.connections.retain(|id, _| *id == RF_CONN_ID);
    }

    /// Look up a connection
    pub fn connection(&self, id: u8) -> Option<&LogicalConnection> {
        self.connections.get(&id)
    }

    /// Open a connection with its initial credits and payload size
    ///
    /// Dynamic connections can send immediately; the RF connection waits for
    /// [`DataManager::activate_rf`].
    pub fn open(&mut self, id: u8, initial_credit: u8, max_payload: u8) -> Result<()> {
        if id > MAX_CONN_ID {
            return Err(Error::Rejected("connection id out of range"));
        }
        let limit = self.max_message_size;
        let conn = self
            .connections
            .entry(id)
            .or_insert_with(|| LogicalConnection::new(id, limit));
        conn.state = ConnectionState::Open;
        conn.initial_credit = initial_credit;
        conn.credit = initial_credit;
        conn.max_payload = max_payload;
        conn.generation = conn.generation.wrapping_add(1);
        conn.reassembly.clear();
        conn.active = id != RF_CONN_ID;
        debug!(
            conn_id = id,
            initial_credit,
            max_payload,
            generation = conn.generation,
            "Opened logical connection"
        );
        Ok(())
    }

    /// Close a connection, flushing its queued sends
    ///
    /// Returns whether the connection existed.
    pub fn close(&mut self, id: u8) -> bool {
        let Some(conn) = self.connections.get_mut(&id) else {
            return false;
        };
        conn.state = ConnectionState::Closed;
        conn.active = false;
        conn.max_payload = 0;
        conn.credit = 0;
        conn.generation = conn.generation.wrapping_add(1);
        conn.reassembly.clear();
        let groups: Vec<u64> = conn.queue.drain(..).map(|unit| unit.group).collect();
        debug!(conn_id = id, generation = conn.generation, "Closed logical connection");

        for group in groups {
            self.fail_group(group, Error::Flushed);
        }
        if id != RF_CONN_ID {
            self.connections.remove(&id);
        }
        true
    }

    /// Allow traffic on the RF connection
    pub fn activate_rf(&mut self) {
        if let Some(conn) = self.connections.get_mut(&RF_CONN_ID) {
            if conn.state != ConnectionState::Closed {
                conn.state = ConnectionState::Open;
                conn.active = true;
                debug!("RF connection active");
            }
        }
    }

    /// Stop traffic on the RF connection, flushing its queued sends
    pub fn deactivate_rf(&mut self) {
        let Some(conn) = self.connections.get_mut(&RF_CONN_ID) else {
            return;
        };
        conn.active = false;
        conn.reassembly.clear();
        if conn.state == ConnectionState::Open {
            conn.state = ConnectionState::Deactivated;
        }
        conn.generation = conn.generation.wrapping_add(1);
        let groups: Vec<u64> = conn.queue.drain(..).map(|unit| unit.group).collect();
        debug!(generation = conn.generation, flushed = groups.len(), "RF connection deactivated");

        for group in groups {
            self.fail_group(group, Error::Flushed);
        }
    }

    /// Queue `payload` for transmission on connection `id`
    ///
    /// The payload is split at the connection's payload size. The callback
    /// fires once, after the last packet, with the first failure of any
    /// packet of this send.
    pub fn prepare_to_send(
        &mut self,
        id: u8,
        payload: Bytes,
        callback: Option<SendCallback>,
    ) -> Result<()> {
        let conn = self
            .connections
            .get_mut(&id)
            .filter(|conn| conn.active)
            .ok_or(Error::Rejected("connection not active"))?;
        if conn.max_payload == 0 {
            return Err(Error::Rejected("connection has no payload size"));
        }

        let segments = fragment(&payload, usize::from(conn.max_payload))?;
        let group = self.next_group;
        self.next_group += 1;
        let generation = conn.generation;
        let count = segments.len();
        conn.queue.extend(segments.into_iter().map(|segment| SendUnit {
            group,
            generation,
            boundary: segment.boundary,
            payload: segment.bytes,
        }));
        trace!(conn_id = id, len = payload.len(), packets = count, "Queued data");

        self.groups.insert(
            group,
            SendGroup {
                conn_id: id,
                remaining: count,
                error: None,
                callback,
            },
        );
        Ok(())
    }

    /// Return credits to a connection
    pub fn add_credits(&mut self, id: u8, credits: u8) {
        match self.connections.get_mut(&id) {
            Some(conn) if conn.is_flow_controlled() => {
                conn.credit = conn.credit.saturating_add(credits);
                trace!(conn_id = id, credits, credit = conn.credit, "Credits returned");
            }
            Some(_) => trace!(conn_id = id, "Credits ignored on unlimited connection"),
            None => warn!(conn_id = id, "Credits for unknown connection"),
        }
    }

    /// Release the next packet allowed by flow control
    ///
    /// Units left over from an earlier generation are dropped on the way and
    /// their sends complete with [`Error::Flushed`].
    pub(crate) fn next_packet(&mut self) -> Option<Outgoing> {
        let ids: Vec<u8> = self.connections.keys().copied().collect();
        for id in ids {
            loop {
                let Some(conn) = self.connections.get_mut(&id) else {
                    break;
                };
                let Some(front) = conn.queue.front() else {
                    break;
                };
                if front.generation != conn.generation {
                    let group = front.group;
                    conn.queue.pop_front();
                    self.fail_group(group, Error::Flushed);
                    continue;
                }
                if !conn.can_send() {
                    break;
                }
                let Some(unit) = conn.queue.pop_front() else {
                    break;
                };
                if conn.is_flow_controlled() {
                    conn.credit -= 1;
                }
                return Some(Outgoing {
                    conn_id: id,
                    group: unit.group,
                    boundary: unit.boundary,
                    payload: unit.payload,
                });
            }
        }
        None
    }

    /// Record the transport outcome of a released packet
    pub(crate) fn sent(&mut self, group: u64, result: Result<()>) {
        match result {
            Ok(()) => {
                let Some(entry) = self.groups.get_mut(&group) else {
                    return;
                };
                entry.remaining = entry.remaining.saturating_sub(1);
                if entry.remaining == 0 {
                    self.complete_group(group);
                }
            }
            Err(error) => self.fail_group(group, error),
        }
    }

    /// Feed one received data packet; returns the message once complete
    pub fn receive(&mut self, id: u8, boundary: PacketBoundary, payload: &[u8]) -> Result<Option<Bytes>> {
        let conn = self
            .connections
            .get_mut(&id)
            .filter(|conn| conn.state == ConnectionState::Open)
            .ok_or(Error::Rejected("data on a connection that is not open"))?;
        match conn.reassembly.push(boundary, payload)? {
            Reassembled::Complete(message) => Ok(Some(message)),
            Reassembled::Pending => Ok(None),
        }
    }

    /// Abort a send: drop its remaining units and complete it with `error`
    /// unless an earlier failure is already recorded
    fn fail_group(&mut self, group: u64, error: Error) {
        let Some(entry) = self.groups.get_mut(&group) else {
            return;
        };
        entry.error.get_or_insert(error);
        let conn_id = entry.conn_id;
        if let Some(conn) = self.connections.get_mut(&conn_id) {
            conn.queue.retain(|unit| unit.group != group);
        }
        self.complete_group(group);
    }

    fn complete_group(&mut self, group: u64) {
        let Some(entry) = self.groups.remove(&group) else {
            return;
        };
        let result = entry.error.map_or(Ok(()), Err);
        if let Err(e) = &result {
            debug!(conn_id = entry.conn_id, error = %e, "Send failed");
        }
        if let Some(callback) = entry.callback {
            callback(result);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use nexum_nci_core::TransportError;
    use proptest::prelude::*;

    use super::*;

    type Outcomes = Rc<RefCell<Vec<std::result::Result<(), String>>>>;

    fn recorder(outcomes: &Outcomes) -> Option<SendCallback> {
        let outcomes = Rc::clone(outcomes);
        Some(Box::new(move |result: Result<()>| {
            outcomes.borrow_mut().push(result.map_err(|e| e.to_string()));
        }))
    }

    fn drain(data: &mut DataManager) -> Vec<Outgoing> {
        let mut out = Vec::new();
        while let Some(packet) = data.next_packet() {
            data.sent(packet.group, Ok(()));
            out.push(packet);
        }
        out
    }

    #[test]
    fn test_second_send_waits_for_credit() {
        let outcomes = Outcomes::default();
        let mut data = DataManager::new(1024);
        data.open(2, 1, 255).unwrap();
        data.prepare_to_send(2, Bytes::from_static(b"one"), recorder(&outcomes)).unwrap();
        data.prepare_to_send(2, Bytes::from_static(b"two"), recorder(&outcomes)).unwrap();

        let sent = drain(&mut data);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.as_ref(), b"one");
        assert_eq!(data.connection(2).unwrap().credit(), 0);
        assert_eq!(data.connection(2).unwrap().queued(), 1);

        data.add_credits(2, 1);
        let sent = drain(&mut data);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].payload.as_ref(), b"two");
        assert_eq!(*outcomes.borrow(), vec![Ok(()), Ok(())]);
    }

    #[test]
    fn test_unlimited_credits() {
        let mut data = DataManager::new(1024);
        data.open(1, CREDITS_UNLIMITED, 255).unwrap();
        for _ in 0..3 {
            data.prepare_to_send(1, Bytes::from_static(b"x"), None).unwrap();
        }
        assert_eq!(drain(&mut data).len(), 3);
        assert_eq!(data.connection(1).unwrap().credit(), CREDITS_UNLIMITED);
    }

    #[test]
    fn test_rf_connection_needs_activation() {
        let mut data = DataManager::new(1024);
        assert!(matches!(
            data.prepare_to_send(RF_CONN_ID, Bytes::from_static(b"x"), None),
            Err(Error::Rejected(_))
        ));
        data.open(RF_CONN_ID, 1, 255).unwrap();
        assert!(data.prepare_to_send(RF_CONN_ID, Bytes::from_static(b"x"), None).is_err());
        data.activate_rf();
        assert!(data.prepare_to_send(RF_CONN_ID, Bytes::from_static(b"x"), None).is_ok());

        data.deactivate_rf();
        assert_eq!(
            data.connection(RF_CONN_ID).unwrap().state(),
            ConnectionState::Deactivated
        );
        assert!(data.next_packet().is_none());
    }

    #[test]
    fn test_close_flushes_queued_sends() {
        let outcomes = Outcomes::default();
        let mut data = DataManager::new(1024);
        data.open(3, 0, 255).unwrap();
        data.prepare_to_send(3, Bytes::from_static(b"stuck"), recorder(&outcomes)).unwrap();
        assert!(data.close(3));
        data.open(3, 1, 255).unwrap();
        assert!(drain(&mut data).is_empty());
        assert_eq!(outcomes.borrow().len(), 1);
        assert!(outcomes.borrow()[0].as_ref().unwrap_err().contains("generation"));
    }

    #[test]
    fn test_rf_deactivation_flushes_queued_sends() {
        let outcomes = Outcomes::default();
        let mut data = DataManager::new(1024);
        data.open(RF_CONN_ID, 0, 255).unwrap();
        data.activate_rf();
        data.prepare_to_send(RF_CONN_ID, Bytes::from_static(b"old"), recorder(&outcomes)).unwrap();
        data.deactivate_rf();
        assert_eq!(outcomes.borrow().len(), 1);
        assert!(outcomes.borrow()[0].is_err());
        assert_eq!(data.connection(RF_CONN_ID).unwrap().queued(), 0);

        data.open(RF_CONN_ID, 1, 255).unwrap();
        data.activate_rf();
        assert!(drain(&mut data).is_empty());
        assert_eq!(outcomes.borrow().len(), 1);
    }

    #[test]
    fn test_fragmented_send_completes_once() {
        let outcomes = Outcomes::default();
        let mut data = DataManager::new(1024);
        data.open(1, CREDITS_UNLIMITED, 4).unwrap();
        data.prepare_to_send(1, Bytes::from_static(b"0123456789"), recorder(&outcomes)).unwrap();

        let sent = drain(&mut data);
        let lens: Vec<_> = sent.iter().map(|p| p.payload.len()).collect();
        assert_eq!(lens, vec![4, 4, 2]);
        assert!(sent[2].boundary.is_last());
        assert!(!sent[0].boundary.is_last());
        assert_eq!(*outcomes.borrow(), vec![Ok(())]);
    }

    #[test]
    fn test_first_failure_aborts_send() {
        let outcomes = Outcomes::default();
        let mut data = DataManager::new(1024);
        data.open(1, CREDITS_UNLIMITED, 4).unwrap();
        data.prepare_to_send(1, Bytes::from_static(b"0123456789"), recorder(&outcomes)).unwrap();

        let first = data.next_packet().unwrap();
        data.sent(first.group, Err(Error::Transport(TransportError::Transmission)));
        assert!(data.next_packet().is_none());
        assert_eq!(outcomes.borrow().len(), 1);
        assert!(outcomes.borrow()[0].is_err());
    }

    #[test]
    fn test_receive_reassembly() {
        let mut data = DataManager::new(8);
        data.open(1, 1, 255).unwrap();
        assert_eq!(data.receive(1, PacketBoundary::Incomplete, b"ab").unwrap(), None);
        assert_eq!(
            data.receive(1, PacketBoundary::Complete, b"cd").unwrap(),
            Some(Bytes::from_static(b"abcd"))
        );
        assert!(matches!(
            data.receive(1, PacketBoundary::Complete, b"0123456789"),
            Err(Error::MemoryExhausted { limit: 8 })
        ));
        assert!(data.receive(5, PacketBoundary::Complete, b"x").is_err());
    }

    #[test]
    fn test_init_resets_dynamic_connections() {
        let mut data = DataManager::new(64);
        data.open(1, 1, 255).unwrap();
        data.init(4);
        assert!(data.connection(1).is_none());
        assert_eq!(
            data.connection(RF_CONN_ID).unwrap().state(),
            ConnectionState::Closed
        );
        assert!(data.open(0x10, 1, 255).is_err());
    }

    #[derive(Debug, Clone)]
    enum Event {
        Send(usize),
        Credits(u8),
        Flush,
        Close,
        Open(u8),
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            (1usize..12).prop_map(Event::Send),
            (1u8..4).prop_map(Event::Credits),
            Just(Event::Flush),
            Just(Event::Close),
            (0u8..3).prop_map(Event::Open),
        ]
    }

    proptest! {
        #[test]
        fn prop_credits_bound_released_packets(events in prop::collection::vec(event(), 1..64)) {
            let completions = Rc::new(RefCell::new(Vec::<u32>::new()));
            let mut data = DataManager::new(1024);
            data.open(2, 1, 4).unwrap();
            // Credits granted and packets released since the last open
            let mut granted = 1usize;
            let mut released = 0usize;

            for event in events {
                match event {
                    Event::Send(len) => {
                        let index = completions.borrow().len();
                        completions.borrow_mut().push(0);
                        let counter = Rc::clone(&completions);
                        let callback: SendCallback =
                            Box::new(move |_| counter.borrow_mut()[index] += 1);
                        if data.prepare_to_send(2, Bytes::from(vec![0u8; len]), Some(callback)).is_err() {
                            // Rejected sends never report; count them as done
                            completions.borrow_mut()[index] = 1;
                        }
                    }
                    Event::Credits(credits) => {
                        if data.connection(2).is_some() {
                            granted += usize::from(credits);
                        }
                        data.add_credits(2, credits);
                    }
                    Event::Flush => {
                        while let Some(packet) = data.next_packet() {
                            prop_assert_eq!(packet.conn_id, 2);
                            released += 1;
                            data.sent(packet.group, Ok(()));
                        }
                    }
                    Event::Close => {
                        data.close(2);
                    }
                    Event::Open(credits) => {
                        data.open(2, credits, 4).unwrap();
                        granted = usize::from(credits);
                        released = 0;
                    }
                }

                prop_assert!(released <= granted);
                if let Some(conn) = data.connection(2) {
                    prop_assert_eq!(usize::from(conn.credit()), granted - released);
                }
                prop_assert!(completions.borrow().iter().all(|count| *count <= 1));
            }

            data.close(2);
            prop_assert!(completions.borrow().iter().all(|count| *count == 1));
        }
    }
}
