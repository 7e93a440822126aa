//! High-level operations and their sequencer
//!
//! An operation expands into a list of steps when it reaches the head of the
//! queue. The sequencer runs one operation at a time and one step at a time.
//! A step either finishes immediately or leaves the sequencer waiting for a
//! command response, for the RF state machine to settle, or for an NFCEE mode
//! switch. The first failing step ends the operation with that error.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use nexum_nci_core::types::{CardProtocols, ReaderProtocols, RoutingEntry, Tlv};
use nexum_nci_core::Command;
use tracing::{debug, warn};

use crate::config::NciConfig;
use crate::nfcee::NfceeMode;
use crate::{Error, Result, ResultExt};

/// Callback invoked once when an operation finishes
pub type OperationCallback = Box<dyn FnOnce(Result<()>)>;

/// A high-level request to the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Reset and initialize the controller, then enable RF management
    Start,
    /// Stop discovery and reset the controller
    Stop,
    /// Discover with the given reader and card emulation protocols
    RfEnable {
        /// Card emulation protocols of the device host
        card: CardProtocols,
        /// Reader protocols
        reader: ReaderProtocols,
    },
    /// Stop discovery
    RfDisable,
    /// Switch an NFCEE to the given mode
    NfceeSwitchMode {
        /// NFCEE to switch
        nfcee_id: u8,
        /// Target mode
        mode: NfceeMode,
    },
    /// Set configuration parameters
    RfConfig(Vec<Tlv>),
    /// Replace the computed listen-mode routing table, an empty table restores it
    RfConfigListenRouting(Vec<RoutingEntry>),
    /// Send the command frames listed in a hex script file
    Script(PathBuf),
}

impl Operation {
    /// Short name used in logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::RfEnable { .. } => "RF_ENABLE",
            Self::RfDisable => "RF_DISABLE",
            Self::NfceeSwitchMode { .. } => "NFCEE_SWITCH_MODE",
            Self::RfConfig(_) => "RF_CONFIG",
            Self::RfConfigListenRouting(_) => "RF_CONFIG_LISTEN_ROUTING",
            Self::Script(_) => "SCRIPT",
        }
    }

    /// Expand into steps against the engine state at the time it starts
    pub(crate) fn steps(self, config: &NciConfig, rf: RfSnapshot) -> Result<VecDeque<Step>> {
        let mut steps = VecDeque::new();
        match self {
            Self::Start => {
                steps.push_back(Step::Command(Command::CoreReset {
                    reset_config: config.reset_config,
                }));
                steps.push_back(Step::Command(Command::CoreInit));
                if config.nfcee_discovery {
                    steps.push_back(Step::Command(Command::NfceeDiscover { enable: true }));
                }
                if !config.discover_map.is_empty() {
                    steps.push_back(Step::Command(Command::RfDiscoverMap {
                        mappings: config.discover_map.clone(),
                    }));
                }
                steps.push_back(Step::RfStart);
            }
            Self::Stop => {
                if rf.initialized {
                    steps.push_back(Step::RfConfigure {
                        reader: ReaderProtocols::empty(),
                        card: CardProtocols::empty(),
                    });
                }
                steps.push_back(Step::Command(Command::CoreReset {
                    reset_config: config.reset_config,
                }));
                steps.push_back(Step::RfStop);
            }
            Self::RfEnable { card, reader } => {
                steps.push_back(Step::RfConfigure { reader, card });
            }
            Self::RfDisable => steps.push_back(Step::RfConfigure {
                reader: ReaderProtocols::empty(),
                card: CardProtocols::empty(),
            }),
            Self::NfceeSwitchMode { nfcee_id, mode } => {
                steps.push_back(Step::NfceeSwitch { nfcee_id, mode });
            }
            Self::RfConfig(params) => {
                steps.push_back(Step::Command(Command::CoreSetConfig { params }));
            }
            Self::RfConfigListenRouting(table) => {
                steps.push_back(Step::SetRoutingOverride(table));
                if rf.initialized {
                    steps.push_back(Step::RfConfigure {
                        reader: rf.reader,
                        card: rf.card,
                    });
                }
            }
            Self::Script(path) => {
                steps.extend(load_script(&path)?.into_iter().map(Step::Command));
            }
        }
        Ok(steps)
    }
}

/// RF inputs an operation is expanded against
#[derive(Debug, Clone, Copy)]
pub(crate) struct RfSnapshot {
    pub(crate) initialized: bool,
    pub(crate) reader: ReaderProtocols,
    pub(crate) card: CardProtocols,
}

/// One unit of work of an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Step {
    /// Send a command and wait for an OK response
    Command(Command),
    /// Bring the RF state machine up
    RfStart,
    /// Request new discovery protocols and wait for discovery to settle
    RfConfigure {
        reader: ReaderProtocols,
        card: CardProtocols,
    },
    /// Drop RF, connection and NFCEE state after a reset
    RfStop,
    /// Switch an NFCEE and wait for the switch to finish
    NfceeSwitch { nfcee_id: u8, mode: NfceeMode },
    /// Install or clear the routing table override
    SetRoutingOverride(Vec<RoutingEntry>),
}

/// What the running operation is blocked on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Waiting {
    None,
    Command,
    RfSettle,
    Nfcee,
}

struct Running {
    name: &'static str,
    steps: VecDeque<Step>,
    waiting: Waiting,
    callback: Option<OperationCallback>,
}

/// Runs queued operations one at a time
#[derive(Default)]
pub(crate) struct Sequencer {
    queue: VecDeque<(Operation, Option<OperationCallback>)>,
    running: Option<Running>,
}

impl fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sequencer")
            .field("queued", &self.queue.len())
            .field("running", &self.running.as_ref().map(|r| r.name))
            .field("waiting", &self.waiting())
            .finish()
    }
}

impl Sequencer {
    pub(crate) fn submit(&mut self, operation: Operation, callback: Option<OperationCallback>) {
        debug!(operation = operation.name(), queued = self.queue.len(), "Operation queued");
        self.queue.push_back((operation, callback));
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub(crate) fn waiting(&self) -> Waiting {
        self.running.as_ref().map_or(Waiting::None, |r| r.waiting)
    }

    /// Take the next queued operation if none is running
    pub(crate) fn pop(&mut self) -> Option<(Operation, Option<OperationCallback>)> {
        if self.running.is_some() {
            return None;
        }
        self.queue.pop_front()
    }

    pub(crate) fn begin(
        &mut self,
        name: &'static str,
        steps: VecDeque<Step>,
        callback: Option<OperationCallback>,
    ) {
        debug!(operation = name, steps = steps.len(), "Operation started");
        self.running = Some(Running {
            name,
            steps,
            waiting: Waiting::None,
            callback,
        });
    }

    /// Next step of the running operation, unless it is blocked
    ///
    /// Returns `None` both when blocked and when the steps are exhausted; the
    /// latter finishes the operation successfully.
    pub(crate) fn next_step(&mut self) -> Option<Step> {
        let running = self.running.as_mut()?;
        if running.waiting != Waiting::None {
            return None;
        }
        match running.steps.pop_front() {
            Some(step) => Some(step),
            None => {
                self.finish(Ok(()));
                None
            }
        }
    }

    pub(crate) fn wait(&mut self, waiting: Waiting) {
        if let Some(running) = self.running.as_mut() {
            running.waiting = waiting;
        }
    }

    /// Unblock the running operation if it waits for `waiting`
    ///
    /// Returns false if the outcome was not expected.
    pub(crate) fn resume(&mut self, waiting: Waiting, outcome: Result<()>) -> bool {
        match self.running.as_mut() {
            Some(running) if running.waiting == waiting => {
                running.waiting = Waiting::None;
                if let Err(error) = outcome {
                    self.finish(Err(error));
                }
                true
            }
            _ => false,
        }
    }

    /// End the running operation and invoke its callback
    pub(crate) fn finish(&mut self, result: Result<()>) {
        let Some(running) = self.running.take() else {
            return;
        };
        let result = result.context(running.name);
        match &result {
            Ok(()) => debug!(operation = running.name, "Operation finished"),
            Err(error) => warn!(operation = running.name, %error, "Operation failed"),
        }
        if let Some(callback) = running.callback {
            callback(result);
        }
    }

    /// Fail the running operation and every queued one with [`Error::Closed`]
    pub(crate) fn abort(&mut self) {
        self.finish(Err(Error::Closed));
        for (operation, callback) in self.queue.drain(..) {
            debug!(operation = operation.name(), "Dropping queued operation");
            if let Some(callback) = callback {
                callback(Err(Error::Closed));
            }
        }
    }
}

/// Parse a command script
///
/// Each non-empty line holds one complete command frame as hex, header
/// included. Whitespace inside a line is ignored and `#` starts a comment.
pub(crate) fn parse_script(content: &str) -> Result<Vec<Command>> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let text = line.split('#').next().unwrap_or_default();
            let hex_text: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            (!hex_text.is_empty()).then_some((index + 1, hex_text))
        })
        .map(|(line, hex_text)| {
            let frame = hex::decode(&hex_text).map_err(|e| Error::InvalidScript {
                line,
                reason: e.to_string(),
            })?;
            Command::from_frame(&frame).map_err(|e| Error::InvalidScript {
                line,
                reason: e.to_string(),
            })
        })
        .collect()
}

fn load_script(path: &Path) -> Result<Vec<Command>> {
    let content =
        std::fs::read_to_string(path).context(format!("reading script {}", path.display()))?;
    parse_script(&content)
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use nexum_nci_core::Opcode;
    use nexum_nci_core::types::MappingConfig;

    use super::*;

    fn snapshot(initialized: bool) -> RfSnapshot {
        RfSnapshot {
            initialized,
            reader: ReaderProtocols::T2T,
            card: CardProtocols::ISO_DEP_A,
        }
    }

    #[test]
    fn test_start_steps() {
        let config = NciConfig::default().with_reset_config(false);
        let steps: Vec<_> = Operation::Start.steps(&config, snapshot(false)).unwrap().into();
        assert_eq!(
            steps,
            vec![
                Step::Command(Command::CoreReset {
                    reset_config: false
                }),
                Step::Command(Command::CoreInit),
                Step::Command(Command::NfceeDiscover { enable: true }),
                Step::Command(Command::RfDiscoverMap {
                    mappings: MappingConfig::default_map()
                }),
                Step::RfStart,
            ]
        );
    }

    #[test]
    fn test_stop_skips_rf_when_uninitialized() {
        let config = NciConfig::default();
        let steps = Operation::Stop.steps(&config, snapshot(false)).unwrap();
        assert!(matches!(steps.front(), Some(Step::Command(Command::CoreReset { .. }))));

        let steps = Operation::Stop.steps(&config, snapshot(true)).unwrap();
        assert!(matches!(steps.front(), Some(Step::RfConfigure { .. })));
    }

    #[test]
    fn test_routing_override_reconfigures_current_masks() {
        let steps: Vec<_> = Operation::RfConfigListenRouting(Vec::new())
            .steps(&NciConfig::default(), snapshot(true))
            .unwrap()
            .into();
        assert_eq!(
            steps,
            vec![
                Step::SetRoutingOverride(Vec::new()),
                Step::RfConfigure {
                    reader: ReaderProtocols::T2T,
                    card: CardProtocols::ISO_DEP_A,
                },
            ]
        );
    }

    #[test]
    fn test_parse_script() {
        let script = "\
# reset then init
20 00 01 01
20 01 00   # CORE_INIT

2F 15 02 AB CD
";
        let commands = parse_script(script).unwrap();
        assert_eq!(commands.len(), 3);
        assert_eq!(commands[0].opcode(), Opcode::new(0x0, 0x00));
        assert_eq!(
            commands[2],
            Command::Raw {
                opcode: Opcode::new(0xF, 0x15),
                payload: vec![0xAB, 0xCD].into(),
            }
        );
    }

    #[test]
    fn test_parse_script_reports_line() {
        let err = parse_script("20 01 00\n20 0G 00\n").unwrap_err();
        assert!(matches!(err, Error::InvalidScript { line: 2, .. }));

        // Declared length does not match the frame
        let err = parse_script("20 01 05 00\n").unwrap_err();
        assert!(matches!(err, Error::InvalidScript { line: 1, .. }));

        // Response frames are not commands
        let err = parse_script("40 01 00\n").unwrap_err();
        assert!(matches!(err, Error::InvalidScript { line: 1, .. }));
    }

    #[test]
    fn test_missing_script_is_io_error() {
        let err = Operation::Script(PathBuf::from("/nonexistent/nci.script"))
            .steps(&NciConfig::default(), snapshot(false))
            .unwrap_err();
        assert!(matches!(err.root(), Error::Io(_)));
    }

    #[test]
    fn test_sequencer_runs_steps_and_reports_once() {
        let outcome = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&outcome);
        let mut sequencer = Sequencer::default();
        sequencer.submit(
            Operation::RfDisable,
            Some(Box::new(move |result: Result<()>| sink.borrow_mut().push(result.is_ok()))),
        );

        let (operation, callback) = sequencer.pop().unwrap();
        let name = operation.name();
        let steps = operation.steps(&NciConfig::default(), snapshot(true)).unwrap();
        sequencer.begin(name, steps, callback);
        assert!(sequencer.pop().is_none());

        assert!(matches!(sequencer.next_step(), Some(Step::RfConfigure { .. })));
        sequencer.wait(Waiting::RfSettle);
        assert!(sequencer.next_step().is_none());
        assert!(!sequencer.resume(Waiting::Command, Ok(())));
        assert!(sequencer.resume(Waiting::RfSettle, Ok(())));

        assert!(sequencer.next_step().is_none());
        assert!(!sequencer.is_running());
        assert_eq!(*outcome.borrow(), vec![true]);
    }

    #[test]
    fn test_failed_step_ends_operation() {
        let outcome = Rc::new(RefCell::new(None));
        let sink = Rc::clone(&outcome);
        let mut sequencer = Sequencer::default();
        let steps = VecDeque::from([Step::Command(Command::CoreInit), Step::RfStart]);
        sequencer.begin(
            "START",
            steps,
            Some(Box::new(move |result: Result<()>| {
                *sink.borrow_mut() = Some(result.unwrap_err().status());
            })),
        );
        sequencer.next_step();
        sequencer.wait(Waiting::Command);
        sequencer.resume(
            Waiting::Command,
            Err(Error::failed(Opcode::new(0, 1), nexum_nci_core::Status::Failed)),
        );
        assert!(!sequencer.is_running());
        assert_eq!(*outcome.borrow(), Some(Some(nexum_nci_core::Status::Failed)));
    }
}
