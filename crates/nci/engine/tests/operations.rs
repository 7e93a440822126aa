//! High-level operations run by the sequencer

mod common;

use std::io::Write;

use common::{
    CORE_RESET_RSP, MockTransport, Outcomes, RF_DISCOVER_RSP, core_init_rsp, open_engine, start,
    written,
};
use hex_literal::hex;
use nexum_nci_core::types::{CardProtocols, ReaderProtocols, RoutingEntry, Technology, Tlv};
use nexum_nci_engine::{Error, Nci, NciConfig, NfceeMode, NfceeState, Operation, Result, RfState};

fn started() -> Nci<MockTransport> {
    let mut nci = open_engine(NciConfig::default());
    start(&mut nci, &core_init_rsp(0xFF, 3));
    nci
}

fn run(nci: &mut Nci<MockTransport>, operation: Operation) -> Outcomes<Result<()>> {
    let outcomes = Outcomes::new();
    nci.start_operation(operation, Some(outcomes.recorder(|r: Result<()>| r)))
        .unwrap();
    outcomes
}

/// Started engine that knows NFCEE 0x81 in the given NFCEE_DISCOVER status
fn with_nfcee(status: u8) -> Nci<MockTransport> {
    let mut nci = started();
    nci.receive(&[0x62, 0x00, 0x05, 0x81, status, 0x01, 0x80, 0x00])
        .unwrap();
    nci
}

#[test]
fn test_start_without_nfcee_discovery() {
    let mut nci = open_engine(
        NciConfig::default()
            .with_reset_config(false)
            .with_nfcee_discovery(false),
    );
    let outcomes = run(&mut nci, Operation::Start);

    assert_eq!(written(&mut nci), vec!["20000100"]);
    nci.receive(&CORE_RESET_RSP).unwrap();
    nci.receive(&core_init_rsp(0xFF, 2)).unwrap();
    assert_eq!(written(&mut nci), vec!["200100", "21000702040302050303"]);
    assert_eq!(nci.rf_state(), RfState::Uninitialized);
    nci.receive(&common::RF_DISCOVER_MAP_RSP).unwrap();

    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
    assert_eq!(nci.rf_state(), RfState::Idle);
}

#[test]
fn test_start_fails_on_rejected_init() {
    let mut nci = open_engine(NciConfig::default());
    let outcomes = run(&mut nci, Operation::Start);
    written(&mut nci);
    nci.receive(&CORE_RESET_RSP).unwrap();
    written(&mut nci);
    nci.receive(&hex!("40 01 01 01")).unwrap();

    let results = outcomes.take();
    let err = results[0].as_ref().unwrap_err();
    assert_eq!(err.status(), Some(nexum_nci_core::Status::Rejected));
    assert!(err.to_string().starts_with("START"));
    assert!(written(&mut nci).is_empty());
    assert_eq!(nci.rf_state(), RfState::Uninitialized);
}

#[test]
fn test_operations_run_one_at_a_time() {
    let mut nci = open_engine(NciConfig::default().with_nfcee_discovery(false));
    let first = run(&mut nci, Operation::Start);
    let second = run(
        &mut nci,
        Operation::RfEnable {
            card: CardProtocols::empty(),
            reader: ReaderProtocols::T2T,
        },
    );
    assert_eq!(written(&mut nci), vec!["20000101"]);
    nci.receive(&CORE_RESET_RSP).unwrap();
    nci.receive(&core_init_rsp(0xFF, 2)).unwrap();
    nci.receive(&common::RF_DISCOVER_MAP_RSP).unwrap();
    assert_eq!(first.len(), 1);
    assert_eq!(second.len(), 0);

    assert_eq!(written(&mut nci), vec!["200100", "21000702040302050303", "210303010001"]);
    nci.receive(&RF_DISCOVER_RSP).unwrap();
    assert!(matches!(second.take().as_slice(), [Ok(())]));
}

#[test]
fn test_stop_deactivates_and_resets() {
    let mut nci = started();
    run(
        &mut nci,
        Operation::RfEnable {
            card: CardProtocols::empty(),
            reader: ReaderProtocols::ISO_DEP_A,
        },
    );
    written(&mut nci);
    nci.receive(&RF_DISCOVER_RSP).unwrap();

    let outcomes = run(&mut nci, Operation::Stop);
    assert_eq!(written(&mut nci), vec!["21060100"]);
    nci.receive(&common::RF_DEACTIVATE_RSP).unwrap();
    assert_eq!(written(&mut nci), vec!["20000101"]);
    nci.receive(&CORE_RESET_RSP).unwrap();

    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
    assert_eq!(nci.rf_state(), RfState::Uninitialized);
    assert!(nci.init_info().is_none());
}

#[test]
fn test_rf_enable_before_start_fails() {
    let mut nci = open_engine(NciConfig::default());
    let outcomes = run(
        &mut nci,
        Operation::RfEnable {
            card: CardProtocols::empty(),
            reader: ReaderProtocols::T2T,
        },
    );
    let results = outcomes.take();
    assert!(matches!(results[0].as_ref().map_err(Error::root), Err(Error::Rejected(_))));
    assert!(written(&mut nci).is_empty());
}

#[test]
fn test_rf_config_gated_on_rf_state() {
    let mut nci = open_engine(NciConfig::default());
    let params = vec![Tlv::new(0x00, vec![0x01])];
    let outcomes = run(&mut nci, Operation::RfConfig(params.clone()));
    let results = outcomes.take();
    assert!(matches!(results[0].as_ref().map_err(Error::root), Err(Error::Rejected(_))));

    start(&mut nci, &core_init_rsp(0xFF, 2));
    let outcomes = run(&mut nci, Operation::RfConfig(params));
    assert_eq!(written(&mut nci), vec!["20020401000101"]);
    assert_eq!(nci.rf_state(), RfState::WaitSetConfigRsp);
    nci.receive(&hex!("40 02 02 00 00")).unwrap();
    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
    assert_eq!(nci.rf_state(), RfState::Idle);
}

#[test]
fn test_routing_override_replaces_computed_table() {
    let mut nci = started();
    let table = vec![RoutingEntry::Technology {
        route: 0x82,
        power_state: 0x01,
        technology: Technology::NfcA,
    }];
    let outcomes = run(&mut nci, Operation::RfConfigListenRouting(table));
    // Nothing to discover yet, so the override is only stored
    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
    assert!(written(&mut nci).is_empty());

    run(
        &mut nci,
        Operation::RfEnable {
            card: CardProtocols::ISO_DEP_A,
            reader: ReaderProtocols::empty(),
        },
    );
    written(&mut nci);
    nci.receive(&hex!("40 02 02 00 00")).unwrap();
    assert_eq!(written(&mut nci), vec!["21010700010003820100"]);
}

#[test]
fn test_nfcee_off_to_host() {
    let mut nci = with_nfcee(0x01);
    assert_eq!(nci.nfcee(0x81).map(|n| n.state()), Some(NfceeState::Off));

    let outcomes = run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x81,
            mode: NfceeMode::Host,
        },
    );
    assert_eq!(written(&mut nci), vec!["2201028101"]);
    assert_eq!(nci.nfcee(0x81).map(|n| n.state()), Some(NfceeState::ActivatingToHost));

    nci.receive(&hex!("42 01 01 00")).unwrap();
    assert_eq!(written(&mut nci), vec!["200406030101028180"]);
    assert_eq!(nci.nfcee(0x81).map(|n| n.state()), Some(NfceeState::Connecting));

    nci.receive(&hex!("40 04 04 00 FF 01 03")).unwrap();
    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
    let nfcee = nci.nfcee(0x81).unwrap();
    assert_eq!(nfcee.state(), NfceeState::Host);
    assert_eq!(nfcee.conn_id(), Some(3));
    assert!(nci.connection(3).is_some_and(|c| c.is_active()));
}

#[test]
fn test_nfcee_host_to_off_closes_connection_first() {
    let mut nci = with_nfcee(0x00);
    run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x81,
            mode: NfceeMode::Host,
        },
    );
    written(&mut nci);
    nci.receive(&hex!("40 04 04 00 FF 01 03")).unwrap();

    let outcomes = run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x81,
            mode: NfceeMode::Off,
        },
    );
    assert_eq!(written(&mut nci), vec!["20050103"]);
    nci.receive(&hex!("40 05 01 00")).unwrap();
    assert!(nci.connection(3).is_none());
    assert_eq!(written(&mut nci), vec!["2201028100"]);
    nci.receive(&hex!("42 01 01 00")).unwrap();

    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
    assert_eq!(nci.nfcee(0x81).map(|n| n.state()), Some(NfceeState::Off));
}

#[test]
fn test_nfcee_disable_failure_after_close_lands_in_rf() {
    let mut nci = with_nfcee(0x00);
    run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x81,
            mode: NfceeMode::Host,
        },
    );
    written(&mut nci);
    nci.receive(&hex!("40 04 04 00 FF 01 03")).unwrap();

    let outcomes = run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x81,
            mode: NfceeMode::Off,
        },
    );
    assert_eq!(written(&mut nci), vec!["20050103"]);
    nci.receive(&hex!("40 05 01 00")).unwrap();
    assert_eq!(written(&mut nci), vec!["2201028100"]);
    nci.receive(&hex!("42 01 01 03")).unwrap();

    assert!(outcomes.take()[0].is_err());
    let nfcee = nci.nfcee(0x81).unwrap();
    assert_eq!(nfcee.state(), NfceeState::Rf);
    assert_eq!(nfcee.conn_id(), None);

    // The host connection is gone, so nothing is closed again
    let outcomes = run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x81,
            mode: NfceeMode::Rf,
        },
    );
    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
    assert!(written(&mut nci).is_empty());
}

#[test]
fn test_nfcee_failure_reverts_to_confirmed_mode() {
    let mut nci = with_nfcee(0x01);
    let outcomes = run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x81,
            mode: NfceeMode::Host,
        },
    );
    written(&mut nci);
    nci.receive(&hex!("42 01 01 00")).unwrap();
    written(&mut nci);
    // CORE_CONN_CREATE rejected after the NFCEE was enabled
    nci.receive(&hex!("40 04 04 03 00 00 00")).unwrap();

    let results = outcomes.take();
    assert_eq!(
        results[0].as_ref().unwrap_err().status(),
        Some(nexum_nci_core::Status::from(0x03))
    );
    assert_eq!(nci.nfcee(0x81).map(|n| n.state()), Some(NfceeState::Rf));
}

#[test]
fn test_nfcee_unknown_id_rejected() {
    let mut nci = started();
    let outcomes = run(
        &mut nci,
        Operation::NfceeSwitchMode {
            nfcee_id: 0x90,
            mode: NfceeMode::Rf,
        },
    );
    let results = outcomes.take();
    assert!(matches!(results[0].as_ref().map_err(Error::root), Err(Error::Rejected(_))));
    assert!(written(&mut nci).is_empty());
}

#[test]
fn test_script_runs_each_frame() {
    let mut script = tempfile::NamedTempFile::new().unwrap();
    writeln!(script, "# vendor init").unwrap();
    writeln!(script, "2F 15 01 AA").unwrap();
    writeln!(script, "20 02 04 01 00 01 01  # set a parameter").unwrap();
    script.flush().unwrap();

    let mut nci = open_engine(NciConfig::default());
    let outcomes = run(&mut nci, Operation::Script(script.path().to_path_buf()));
    assert_eq!(written(&mut nci), vec!["2f1501aa"]);
    nci.receive(&hex!("4F 15 01 00")).unwrap();
    assert_eq!(written(&mut nci), vec!["20020401000101"]);
    nci.receive(&hex!("40 02 02 00 00")).unwrap();
    assert!(matches!(outcomes.take().as_slice(), [Ok(())]));
}

#[test]
fn test_script_stops_at_first_failure() {
    let mut script = tempfile::NamedTempFile::new().unwrap();
    writeln!(script, "2F 15 00\n2F 16 00").unwrap();
    script.flush().unwrap();

    let mut nci = open_engine(NciConfig::default());
    let outcomes = run(&mut nci, Operation::Script(script.path().to_path_buf()));
    written(&mut nci);
    nci.receive(&hex!("4F 15 01 03")).unwrap();

    let results = outcomes.take();
    assert!(results[0].as_ref().unwrap_err().status().is_some());
    assert!(written(&mut nci).is_empty());
}

#[test]
fn test_invalid_script_fails_operation() {
    let mut script = tempfile::NamedTempFile::new().unwrap();
    writeln!(script, "2F 15 00\nnot hex").unwrap();
    script.flush().unwrap();

    let mut nci = open_engine(NciConfig::default());
    let outcomes = run(&mut nci, Operation::Script(script.path().to_path_buf()));
    let results = outcomes.take();
    assert!(matches!(
        results[0].as_ref().map_err(Error::root),
        Err(Error::InvalidScript { line: 2, .. })
    ));
    assert!(written(&mut nci).is_empty());
}

#[test]
fn test_close_fails_running_and_queued_operations() {
    let mut nci = open_engine(NciConfig::default());
    let running = run(&mut nci, Operation::Start);
    let queued = run(&mut nci, Operation::RfDisable);
    written(&mut nci);

    nci.close(0).unwrap();
    for outcomes in [running, queued] {
        let results = outcomes.take();
        assert!(matches!(results[0].as_ref().map_err(Error::root), Err(Error::Closed)));
    }
    assert!(matches!(
        nci.start_operation(Operation::Start, None),
        Err(Error::Closed)
    ));
}
