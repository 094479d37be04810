//! End-to-end session flow: choose, connect, loop, close.

mod common;

use common::{device, output, MockCatalog, MockInstrument, Op, ScriptedLines};
use std::time::Duration;
use tmcsh::session::chooser::SELECT_PROMPT;
use tmcsh::session::{Session, SessionOptions, SessionOutcome, SessionState};
use tmcsh::shell::PROMPT;
use tmcsh::shutdown::InterruptHandle;
use tmcsh::transport::{ErrorScope, TransportError, UsbId};

const LISTING_TAIL: &str = "Enter the index of the device you want to communicate with.\n\
                            Type 'r' to reload, ^C or ^D to abort.\n";

fn two_devices() -> Vec<tmcsh::transport::DeviceHandle> {
    vec![
        device(1, 4, "DS1054Z", 0x1ab1, 0x04ce),
        device(1, 7, "DP832", 0x1ab1, 0x0e11),
    ]
}

fn listing() -> String {
    format!(
        "Connected USB-TMC devices:\n  [0] DS1054Z (1AB1:04CE)\n  [1] DP832 (1AB1:0E11)\n{}",
        LISTING_TAIL
    )
}

struct Outcome {
    outcome: SessionOutcome,
    state: SessionState,
    out: String,
    prompts: Vec<String>,
}

fn run_session(catalog: &mut MockCatalog, lines: &[&str], options: SessionOptions) -> Outcome {
    let mut input = ScriptedLines::new(lines);
    let mut out = Vec::new();
    let mut session = Session::new(
        catalog,
        &mut input,
        &mut out,
        options,
        InterruptHandle::new(),
    );
    let outcome = session.run().unwrap();
    let state = session.state();
    Outcome {
        outcome,
        state,
        out: output(&out),
        prompts: input.prompts().to_vec(),
    }
}

#[test]
fn test_invalid_index_relists_then_connects() {
    let instrument = MockInstrument::new().respond(b"RIGOL TECHNOLOGIES,DS1054Z\n");
    let log = instrument.log();
    let mut catalog = MockCatalog::new(two_devices()).with_instrument(instrument);

    let result = run_session(
        &mut catalog,
        &["5", "0", "*IDN?"],
        SessionOptions::default(),
    );

    let expected = format!(
        "{listing}Invalid index\n{listing}Establish connection...\n\
         RIGOL TECHNOLOGIES,DS1054Z\nabort\nClosing...\n",
        listing = listing()
    );
    assert_eq!(result.out, expected);
    assert_eq!(result.outcome, SessionOutcome::Closed);
    assert_eq!(result.outcome.exit_code(), 0);
    assert_eq!(result.state, SessionState::Closed);
    assert_eq!(catalog.listings, 2);
    assert_eq!(catalog.opened[0].0, two_devices()[0]);

    let ops = log.lock().clone();
    assert_eq!(ops.first(), Some(&Op::SetTimeout(Duration::from_secs(5))));
    assert_eq!(ops.last(), Some(&Op::Close));
    assert_eq!(
        result.prompts,
        vec![SELECT_PROMPT, SELECT_PROMPT, PROMPT, PROMPT]
    );
}

#[test]
fn test_reload_lists_again() {
    let mut catalog = MockCatalog::new(two_devices()).with_instrument(MockInstrument::new());
    let result = run_session(&mut catalog, &["r", "1"], SessionOptions::default());

    assert!(result
        .out
        .starts_with(&format!("{}Reloading..\n{}", listing(), listing())));
    assert_eq!(catalog.opened[0].0, two_devices()[1]);
    assert_eq!(result.outcome, SessionOutcome::Closed);
}

#[test]
fn test_non_numeric_answer_relists_silently() {
    let mut catalog = MockCatalog::new(two_devices()).with_instrument(MockInstrument::new());
    let result = run_session(&mut catalog, &["scope", "", "0"], SessionOptions::default());

    assert!(result
        .out
        .starts_with(&format!("{}{}Establish connection...\n", listing(), listing())));
    assert_eq!(catalog.listings, 2);
}

#[test]
fn test_abort_in_chooser_never_opens() {
    let mut catalog = MockCatalog::new(two_devices());
    let result = run_session(&mut catalog, &[], SessionOptions::default());

    assert_eq!(result.out, format!("{}abort\n", listing()));
    assert_eq!(result.outcome, SessionOutcome::Aborted);
    assert_eq!(result.outcome.exit_code(), 1);
    assert_eq!(result.state, SessionState::Aborted);
    assert!(catalog.opened.is_empty());
}

#[test]
fn test_empty_bus_lists_nothing() {
    let mut catalog = MockCatalog::new(Vec::new());
    let result = run_session(&mut catalog, &["0"], SessionOptions::default());

    assert_eq!(
        result.out,
        format!(
            "Connected USB-TMC devices:\n{tail}Invalid index\nConnected USB-TMC devices:\n{tail}abort\n",
            tail = LISTING_TAIL
        )
    );
}

#[test]
fn test_enumeration_failure_is_reported() {
    let mut catalog = MockCatalog::new(two_devices())
        .failing_enumeration(TransportError::usb("Access denied", ErrorScope::Connection));
    let result = run_session(&mut catalog, &["r"], SessionOptions::default());

    assert!(result
        .out
        .starts_with("Connected USB-TMC devices:\nFailed to enumerate USB-TMC devices: Access denied\n"));
    assert!(result.out.contains("  [1] DP832 (1AB1:0E11)\n"));
}

#[test]
fn test_open_failure_exits_with_error() {
    let mut catalog = MockCatalog::new(two_devices()).failing_open(TransportError::usb(
        "Access denied (insufficient permissions)",
        ErrorScope::Connection,
    ));
    let result = run_session(&mut catalog, &["0", "*IDN?"], SessionOptions::default());

    assert!(result.out.ends_with(
        "Establish connection...\n\
         Failed to establish connection with TMC device: Access denied (insufficient permissions)\n"
    ));
    assert_eq!(result.outcome, SessionOutcome::Aborted);
    assert_eq!(result.outcome.exit_code(), 1);
    assert!(!result.prompts.iter().any(|p| p == PROMPT));
}

#[test]
fn test_fatal_loop_error_closes_and_exits_with_error() {
    let instrument = MockInstrument::new()
        .fail_read(TransportError::usb("No such device", ErrorScope::Connection));
    let log = instrument.log();
    let mut catalog = MockCatalog::new(two_devices()).with_instrument(instrument);

    let result = run_session(&mut catalog, &["0", "*IDN?", "*RST"], SessionOptions::default());

    assert!(result
        .out
        .ends_with("Unexpected USB error: No such device\nClosing...\n"));
    assert_eq!(result.outcome, SessionOutcome::ClosedAfterFault);
    assert_eq!(result.outcome.exit_code(), 1);
    assert_eq!(log.lock().last(), Some(&Op::Close));
}

#[test]
fn test_close_failure_is_reported() {
    let instrument = MockInstrument::new()
        .fail_close(TransportError::usb("No such device", ErrorScope::Connection));
    let mut catalog = MockCatalog::new(two_devices()).with_instrument(instrument);

    let result = run_session(&mut catalog, &["0"], SessionOptions::default());

    assert!(result
        .out
        .ends_with("Closing...\nFailed to close connection: No such device\n"));
    assert_eq!(result.outcome, SessionOutcome::ClosedAfterFault);
    assert_eq!(result.state, SessionState::Closed);
}

#[test]
fn test_preselected_device_skips_chooser() {
    let instrument = MockInstrument::new();
    let log = instrument.log();
    let mut catalog = MockCatalog::new(two_devices()).with_instrument(instrument);
    let options = SessionOptions {
        device: Some(UsbId {
            vendor: 0x1ab1,
            product: 0x0e11,
        }),
        timeout: Duration::from_secs(2),
        ..SessionOptions::default()
    };

    let result = run_session(&mut catalog, &["OUTP ON"], options);

    assert_eq!(
        result.out,
        "Establish connection...\n\nabort\nClosing...\n"
    );
    assert_eq!(catalog.opened[0], (two_devices()[1].clone(), Duration::from_secs(2)));
    assert!(log.lock().contains(&Op::Write("OUTP ON".to_string())));
}

#[test]
fn test_preselected_device_missing() {
    let mut catalog = MockCatalog::new(two_devices());
    let options = SessionOptions {
        device: Some(UsbId {
            vendor: 0x0957,
            product: 0x1796,
        }),
        ..SessionOptions::default()
    };

    let result = run_session(&mut catalog, &[], options);

    assert_eq!(result.out, "No USB-TMC device matches 0957:1796\n");
    assert_eq!(result.outcome, SessionOutcome::Aborted);
    assert!(catalog.opened.is_empty());
}
