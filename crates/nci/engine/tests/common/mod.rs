//! Shared fixtures for the engine integration tests

#![allow(dead_code, unreachable_pub)]

use std::cell::RefCell;
use std::rc::Rc;

use hex_literal::hex;
use nexum_nci_core::{Bytes, NciTransport, TransportError};
use nexum_nci_engine::{Nci, NciConfig, Operation, Result};
use tracing_subscriber::EnvFilter;

/// CORE_RESET_RSP, NCI 1.0, configuration reset
pub const CORE_RESET_RSP: [u8; 6] = hex!("40 00 03 00 10 01");
/// NFCEE_DISCOVER_RSP reporting no NFCEE
pub const NFCEE_DISCOVER_RSP: [u8; 5] = hex!("42 00 02 00 00");
/// RF_DISCOVER_MAP_RSP OK
pub const RF_DISCOVER_MAP_RSP: [u8; 4] = hex!("41 00 01 00");
/// RF_DISCOVER_RSP OK
pub const RF_DISCOVER_RSP: [u8; 4] = hex!("41 03 01 00");
/// RF_DEACTIVATE_RSP OK
pub const RF_DEACTIVATE_RSP: [u8; 4] = hex!("41 06 01 00");

/// In-memory transport recording every written packet
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Packets written since the last `take_written`
    pub written: Vec<Bytes>,
    /// Whether the link is open
    pub open: bool,
    /// Number of upcoming writes that fail
    pub fail_writes: usize,
}

impl NciTransport for MockTransport {
    type Error = TransportError;

    fn do_write(&mut self, packet: &[u8]) -> Result<(), Self::Error> {
        if !self.open {
            return Err(TransportError::NotOpen);
        }
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(TransportError::Transmission);
        }
        self.written.push(Bytes::copy_from_slice(packet));
        Ok(())
    }

    fn open(&mut self, _device_id: u32) -> Result<(), Self::Error> {
        self.open = true;
        Ok(())
    }

    fn close(&mut self, _device_id: u32) -> Result<(), Self::Error> {
        self.open = false;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}

/// Route engine logs to the test output, filtered by `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// An engine over an open mock transport
pub fn open_engine(config: NciConfig) -> Nci<MockTransport> {
    init_tracing();
    let mut nci = Nci::new(MockTransport::default(), config).unwrap();
    nci.open(0).unwrap();
    nci
}

/// Drain the packets written so far, as hex strings
pub fn written(nci: &mut Nci<MockTransport>) -> Vec<String> {
    std::mem::take(&mut nci.transport_mut().written)
        .iter()
        .map(hex::encode)
        .collect()
}

/// CORE_INIT_RSP advertising the given control packet limit and connection count
pub fn core_init_rsp(max_control_packet_size: u8, max_logical_connections: u8) -> Vec<u8> {
    let mut packet = hex!("40 01 13 00 00000000 02 0102").to_vec();
    packet.push(max_logical_connections);
    packet.extend_from_slice(&hex!("0004"));
    packet.push(max_control_packet_size);
    packet.extend_from_slice(&hex!("ff00 01 00000000"));
    packet
}

/// Collects operation and command outcomes for later assertions
pub struct Outcomes<T>(Rc<RefCell<Vec<T>>>);

impl<T: 'static> Outcomes<T> {
    pub fn new() -> Self {
        Self(Rc::new(RefCell::new(Vec::new())))
    }

    /// Callback recording the mapped result
    pub fn recorder<R: 'static>(&self, map: impl Fn(R) -> T + 'static) -> Box<dyn FnOnce(R)> {
        let sink = Rc::clone(&self.0);
        Box::new(move |value| sink.borrow_mut().push(map(value)))
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.0.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }
}

/// Run START against the mock controller and check the command sequence
pub fn start(nci: &mut Nci<MockTransport>, init_rsp: &[u8]) {
    let outcomes = Outcomes::new();
    nci.start_operation(Operation::Start, Some(outcomes.recorder(|r: Result<()>| r.is_ok())))
        .unwrap();

    assert_eq!(written(nci), vec!["20000101"]);
    nci.receive(&CORE_RESET_RSP).unwrap();
    assert_eq!(written(nci), vec!["200100"]);
    nci.receive(init_rsp).unwrap();
    assert_eq!(written(nci), vec!["22000101"]);
    nci.receive(&NFCEE_DISCOVER_RSP).unwrap();
    assert_eq!(written(nci), vec!["21000702040302050303"]);
    nci.receive(&RF_DISCOVER_MAP_RSP).unwrap();
    assert_eq!(outcomes.take(), vec![true]);
}
