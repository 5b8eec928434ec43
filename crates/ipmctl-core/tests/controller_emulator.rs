//! Controller against emulator over an in-memory link

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use ipmctl_core::prelude::*;
use ipmctl_core::protocol::table::{standard_commands, standard_frames};
use pretty_assertions::assert_eq;

const SHORT: Duration = Duration::from_millis(50);

/// Show library logs when a test fails (`RUST_LOG=debug cargo test`)
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn policy() -> ReadPolicy {
    ReadPolicy {
        timeout_ms: 200,
        retries: 1,
        ack_timeout_ms: 50,
    }
}

fn addresses(values: &[i64]) -> Vec<Address> {
    values.iter().map(|v| Address::new(*v).unwrap()).collect()
}

/// A hand-driven device: `script` may override the reply to a token,
/// everything else gets the standard table's reply.
fn spawn_peer<F>(mut script: F) -> (Transport, JoinHandle<()>)
where
    F: FnMut(&str, Option<Address>) -> Option<Vec<u8>> + Send + 'static,
{
    let (user_end, mut device_end) = Transport::memory_pair();
    let handle = thread::spawn(move || {
        let table = ProtocolTable::standard().unwrap();
        let mut selected = None;
        loop {
            let line = match device_end.read_line(SHORT) {
                Ok(Some(line)) => line,
                Ok(None) => continue,
                Err(ProtocolError::Disconnected) => return,
                Err(e) => panic!("peer read failed: {e}"),
            };
            let token = line.trim_end();
            let (message, argument) = token.split_once(' ').unwrap_or((token, ""));
            if message == "ADR" {
                selected = argument.parse::<Address>().ok();
            }

            let reply = script(token, selected).unwrap_or_else(|| {
                table
                    .command(message)
                    .map(|spec| spec.reply_bytes())
                    .unwrap_or_default()
            });
            if !reply.is_empty() && device_end.write_bytes(&reply).is_err() {
                return;
            }
        }
    });
    (user_end, handle)
}

fn spawn_emulator(
    table: Arc<ProtocolTable>,
    absent: Vec<Address>,
) -> (Transport, JoinHandle<u64>) {
    let (user_end, device_end) = Transport::memory_pair();
    let handle = thread::spawn(move || {
        DeviceEmulator::new(device_end, table)
            .with_absent(absent)
            .listen()
            .unwrap()
    });
    (user_end, handle)
}

#[test]
fn test_emulator_replies_exactly_as_declared() {
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let (mut user, emulator) = spawn_emulator(Arc::clone(&table), Vec::new());

    for spec in table.commands() {
        let line = if spec.takes_argument {
            format!("{} 0\n", spec.message)
        } else {
            format!("{}\n", spec.message)
        };
        user.write_bytes(line.as_bytes()).unwrap();

        let expected = spec.reply_bytes();
        if expected.is_empty() {
            assert_eq!(user.read_line(SHORT * 4).unwrap(), None, "{}", spec.message);
            continue;
        }
        let reply = user.read_exact(expected.len(), Duration::from_secs(2)).unwrap();
        assert_eq!(reply, expected, "{}", spec.message);
        // nothing trails the declared reply
        assert_eq!(user.read_line(SHORT).unwrap(), None, "{}", spec.message);
    }

    user.write_bytes(b"x\n").unwrap();
    assert_eq!(emulator.join().unwrap(), table.commands().len() as u64);
}

#[test]
fn test_initialize_all_addresses_answer() {
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let (link, emulator) = spawn_emulator(Arc::clone(&table), Vec::new());
    let mut controller = DeviceController::new(link, table, policy());

    let verified = controller.initialize(&addresses(&[0, 1, 2])).unwrap();
    assert_eq!(verified, addresses(&[0, 1, 2]));

    drop(controller);
    emulator.join().unwrap();
}

#[test]
fn test_initialize_drops_silent_address() {
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let (link, emulator) = spawn_emulator(Arc::clone(&table), addresses(&[1]));
    let mut controller = DeviceController::new(link, table, policy());

    let verified = controller.initialize(&addresses(&[0, 1, 2])).unwrap();
    assert_eq!(verified, addresses(&[0, 2]));

    drop(controller);
    emulator.join().unwrap();
}

#[test]
fn test_off_mismatch_is_fatal() {
    let frames = standard_frames();
    let commands = standard_commands(&frames, Endianness::Little)
        .unwrap()
        .into_iter()
        .map(|spec| {
            if spec.message == "OFF" {
                CommandSpec::new("OFF", "ERR\n").with_severity(Severity::Fatal)
            } else {
                spec
            }
        })
        .collect();
    let faulty = Arc::new(ProtocolTable::new(commands, frames, Endianness::Little).unwrap());

    let (link, emulator) = spawn_emulator(faulty, Vec::new());
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let mut controller = DeviceController::new(link, table, policy());

    let err = controller.initialize(&addresses(&[0])).unwrap_err();
    match err {
        ProtocolError::ResponseMismatch {
            command,
            expected,
            actual,
        } => {
            assert_eq!(command, "OFF");
            assert_eq!(expected, "OK\n");
            assert_eq!(actual, "ERR\n");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(controller.state(), ControllerState::Failed);

    drop(controller);
    emulator.join().unwrap();
}

#[test]
fn test_version_mismatch_is_not_fatal() {
    let frames = standard_frames();
    let commands = standard_commands(&frames, Endianness::Little)
        .unwrap()
        .into_iter()
        .map(|spec| {
            if spec.message == "VER?" {
                CommandSpec::new("VER?", "garbage\n")
            } else {
                spec
            }
        })
        .collect();
    let odd_firmware = Arc::new(ProtocolTable::new(commands, frames, Endianness::Little).unwrap());

    let (link, emulator) = spawn_emulator(odd_firmware, Vec::new());
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let mut controller = DeviceController::new(link, table, policy());

    let verified = controller.initialize(&addresses(&[0, 1])).unwrap();
    assert_eq!(verified, addresses(&[0, 1]));

    drop(controller);
    emulator.join().unwrap();
}

#[test]
fn test_end_to_end_measure() {
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let (link, emulator) = spawn_emulator(Arc::clone(&table), Vec::new());
    let mut controller = DeviceController::new(link, table, policy());

    let verified = controller.initialize(&addresses(&[0])).unwrap();
    let samples = controller.sample(&verified).unwrap();
    assert_eq!(samples.len(), 1);

    let freq = samples[0].frame.value("FREQ").unwrap();
    assert!(freq.is_finite() && freq >= 0.0);
    assert_eq!(freq, 60.0);

    // repeated passes keep working and keep the verified list intact
    for _ in 0..3 {
        assert_eq!(controller.sample(&verified).unwrap().len(), 1);
    }
    assert_eq!(verified, addresses(&[0]));

    drop(controller);
    emulator.join().unwrap();
}

#[test]
fn test_stop_emulator() {
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let (link, emulator) = spawn_emulator(Arc::clone(&table), Vec::new());
    let mut controller = DeviceController::new(link, table, policy());

    controller.execute(&Command::Off).unwrap();
    controller.stop_emulator().unwrap();
    // the controller is still alive, so only the sentinel can end the loop
    assert_eq!(emulator.join().unwrap(), 1);
}

#[test]
fn test_lines_to_sink() {
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let (link, emulator) = spawn_emulator(Arc::clone(&table), Vec::new());
    let mut controller = DeviceController::new(link, table, policy());
    let mut sink = MemorySink::default();

    let address = Address::new(3).unwrap();
    for kind in QuerySet::ALL.kinds() {
        let frame = controller.poll(address, kind).unwrap().unwrap();
        let line = format_line(&frame, chrono::Utc::now(), ValueFormat::Scaled);
        sink.send_line(address, &line).unwrap();
    }

    let labels: Vec<&str> = sink
        .lines
        .iter()
        .map(|(_, line)| line.split(',').next().unwrap())
        .collect();
    assert_eq!(labels, vec!["STATUS", "MEASURE", "RECORD"]);

    drop(controller);
    emulator.join().unwrap();
}

#[test]
fn test_non_empty_address_ack_is_fatal() {
    init_tracing();
    let (link, peer) = spawn_peer(|token, _| (token == "ADR 0").then(|| b"ERR\n".to_vec()));
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let patient = ReadPolicy {
        ack_timeout_ms: 300,
        ..policy()
    };
    let mut controller = DeviceController::new(link, table, patient);

    let err = controller.initialize(&addresses(&[0, 1])).unwrap_err();
    match err {
        ProtocolError::ResponseMismatch {
            command,
            expected,
            actual,
        } => {
            assert_eq!(command, "ADR 0");
            assert_eq!(expected, "");
            assert_eq!(actual, "ERR\n");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(controller.state(), ControllerState::Failed);
    assert_eq!(controller.selected(), None);

    drop(controller);
    peer.join().unwrap();
}

#[test]
fn test_short_measure_skips_address_for_one_pass() {
    init_tracing();
    let mut measures = 0;
    let (link, peer) = spawn_peer(move |token, _| {
        if token != "MEASURE?" {
            return None;
        }
        measures += 1;
        // first frame is cut short, later ones are whole
        (measures == 1).then(|| {
            let mut reply = b"34\n".to_vec();
            reply.extend_from_slice(&[0u8; 10]);
            reply
        })
    });
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let mut controller = DeviceController::new(link, table, policy());
    let verified = addresses(&[0]);

    assert_eq!(controller.sample(&verified).unwrap().len(), 0);
    assert_eq!(controller.state(), ControllerState::Sampling);

    let samples = controller.sample(&verified).unwrap();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].frame.value("FREQ"), Some(60.0));
    assert_eq!(verified, addresses(&[0]));

    drop(controller);
    peer.join().unwrap();
}

#[test]
fn test_wrong_serial_number_drops_address() {
    init_tracing();
    let one = Address::new(1).unwrap();
    let (link, peer) = spawn_peer(move |token, selected| {
        (token == "SERNO?" && selected == Some(one)).then(|| b"ERR\n".to_vec())
    });
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let mut controller = DeviceController::new(link, table, policy());

    let verified = controller.initialize(&addresses(&[0, 1, 2])).unwrap();
    assert_eq!(verified, addresses(&[0, 2]));
    assert_eq!(controller.state(), ControllerState::Verifying);

    drop(controller);
    peer.join().unwrap();
}

#[test]
fn test_poll_selects_each_address_once() {
    init_tracing();
    let selections = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&selections);
    let (link, peer) = spawn_peer(move |token, _| {
        if token.starts_with("ADR ") {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        None
    });
    let table = Arc::new(ProtocolTable::standard().unwrap());
    let mut controller = DeviceController::new(link, table, policy());

    let two = Address::new(2).unwrap();
    for kind in QuerySet::ALL.kinds() {
        assert!(controller.poll(two, kind).unwrap().is_some());
    }
    assert_eq!(selections.load(Ordering::SeqCst), 1);

    let five = Address::new(5).unwrap();
    assert!(controller.poll(five, FrameKind::Measure).unwrap().is_some());
    assert!(controller.poll(two, FrameKind::Measure).unwrap().is_some());
    assert_eq!(selections.load(Ordering::SeqCst), 3);
    assert_eq!(controller.selected(), Some(two));

    drop(controller);
    peer.join().unwrap();
}
