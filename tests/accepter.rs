//! Accepter lifecycle and client-side candidate fallthrough (§8 scenarios
//! 2, 3, 5, 6, and the `nodelay` inheritance open-question resolution).

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use mio::{Events, Poll};
use tcpio::{
    Accepter, AccepterHandler, AddressList, Arg, ClientOps, Connector, OpenOutcome, ServerEndpoint,
    SocketOps, TcpConfig, TcpError,
};

struct NullHandler;

impl AccepterHandler for NullHandler {
    fn new_connection(&self, _endpoint: ServerEndpoint) {}
}

fn unused_local_addr() -> SocketAddr {
    // Nothing listens on port 1 in a test sandbox; connecting there refuses
    // immediately instead of timing out.
    "127.0.0.1:1".parse().unwrap()
}

#[test]
fn address_fallthrough_reaches_listening_candidate() {
    let config = TcpConfig::default();
    let mut poll = Poll::new().unwrap();
    let mut events = Events::with_capacity(16);

    let accepter = Accepter::new(
        AddressList::single("127.0.0.1:0".parse().unwrap()),
        &[],
        &config,
        Box::new(NullHandler),
    )
    .unwrap();
    accepter.startup(poll.registry()).unwrap();
    let good_addr = accepter.local_addrs().unwrap()[0];

    let addrs = AddressList::new(vec![unused_local_addr(), good_addr]);
    let mut client = Connector::new(addrs, &[], &config).unwrap();

    let mut outcome = client.sub_open().unwrap();
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let connected = loop {
        match outcome {
            OpenOutcome::Ready => break true,
            OpenOutcome::InProgress => {
                poll.poll(&mut events, Some(Duration::from_millis(100)))
                    .unwrap();
                match client.check_open() {
                    Ok(tcpio::CheckOutcome::Connected) => break true,
                    Ok(tcpio::CheckOutcome::Pending(_)) => {
                        outcome = client.retry_open().unwrap();
                    }
                    Err(_) => break false,
                }
            }
        }
        if std::time::Instant::now() > deadline {
            break false;
        }
    };

    assert!(connected, "client never reached the listening candidate");
    assert_eq!(SocketOps::get_raddr(&client).unwrap(), good_addr);
}

#[test]
fn total_failure_surfaces_last_os_error() {
    let config = TcpConfig::default();
    let addrs = AddressList::new(vec![
        "127.0.0.1:1".parse().unwrap(),
        "127.0.0.1:2".parse().unwrap(),
    ]);
    let mut client = Connector::new(addrs, &[], &config).unwrap();

    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    let mut outcome = client.sub_open();
    loop {
        match outcome {
            Ok(OpenOutcome::Ready) => panic!("unexpectedly connected"),
            Ok(OpenOutcome::InProgress) => {
                std::thread::sleep(Duration::from_millis(20));
                match client.check_open() {
                    Ok(tcpio::CheckOutcome::Connected) => panic!("unexpectedly connected"),
                    Ok(tcpio::CheckOutcome::Pending(_)) => {
                        outcome = client.retry_open();
                    }
                    Err(err) => {
                        assert!(matches!(err, TcpError::Io(_)));
                        return;
                    }
                }
            }
            Err(err) => {
                assert!(matches!(err, TcpError::Io(_)));
                return;
            }
        }
        assert!(std::time::Instant::now() < deadline, "timed out");
    }
}

#[test]
fn shutdown_before_startup_and_double_startup_are_busy() {
    let config = TcpConfig::default();
    let accepter = Accepter::new(
        AddressList::single("127.0.0.1:0".parse().unwrap()),
        &[],
        &config,
        Box::new(NullHandler),
    )
    .unwrap();
    let poll = Poll::new().unwrap();

    let err = accepter.shutdown(poll.registry(), || {}).unwrap_err();
    assert!(matches!(err, TcpError::Busy));

    accepter.startup(poll.registry()).unwrap();
    let err = accepter.startup(poll.registry()).unwrap_err();
    assert!(matches!(err, TcpError::Busy));
}

#[test]
fn shutdown_completes_and_allows_restart() {
    let config = TcpConfig::default();
    let accepter = Accepter::new(
        AddressList::single("127.0.0.1:0".parse().unwrap()),
        &[],
        &config,
        Box::new(NullHandler),
    )
    .unwrap();
    let poll = Poll::new().unwrap();
    accepter.startup(poll.registry()).unwrap();

    let done = Arc::new(AtomicBool::new(false));
    let done_clone = done.clone();
    accepter
        .shutdown(poll.registry(), move || {
            done_clone.store(true, Ordering::SeqCst);
        })
        .unwrap();

    assert!(done.load(Ordering::SeqCst), "shutdown callback did not fire");
    accepter.startup(poll.registry()).unwrap();
}

#[test]
fn force_disable_never_calls_shutdown_done() {
    let config = TcpConfig::default();
    let accepter = Accepter::new(
        AddressList::single("127.0.0.1:0".parse().unwrap()),
        &[],
        &config,
        Box::new(NullHandler),
    )
    .unwrap();
    let poll = Poll::new().unwrap();
    accepter.startup(poll.registry()).unwrap();

    accepter.disable(poll.registry());

    accepter.startup(poll.registry()).unwrap();
}

#[test]
fn str_to_connector_inherits_nodelay_unless_overridden() {
    let config = TcpConfig::default();
    let accepter = Accepter::new(
        AddressList::single("127.0.0.1:0".parse().unwrap()),
        &[Arg::new("nodelay")],
        &config,
        Box::new(NullHandler),
    )
    .unwrap();

    let inherited = accepter.str_to_connector("127.0.0.1:0", &config).unwrap();
    assert!(inherited.nodelay());

    let overridden = accepter
        .str_to_connector("127.0.0.1:0,nodelay=false", &config)
        .unwrap();
    assert!(!overridden.nodelay());
}
