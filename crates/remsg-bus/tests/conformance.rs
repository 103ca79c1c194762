//! End-to-end scenarios against the simulated remote processor.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use remsg_bus::{
    ns, Channel, Driver, Error, NsMessage, Registry, Transport, ADDR_ANY, NS_ADDR,
    RESERVED_ADDRESSES,
};
use remsg_testkit::{SimPlatform, SimRemote};

/// What a test driver saw happen.
#[derive(Clone, Debug, PartialEq, Eq)]
enum Event {
    Probe(String),
    Remove(String),
    /// `(payload, src)` seen by the receive callback.
    Rx(Vec<u8>, u32),
}

struct RecordingDriver {
    names: Vec<&'static str>,
    events: Mutex<Vec<Event>>,
    /// Set when `remove` ran while the primary endpoint still existed.
    endpoint_alive_in_remove: AtomicUsize,
}

impl RecordingDriver {
    fn new(names: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            names: names.to_vec(),
            events: Mutex::new(Vec::new()),
            endpoint_alive_in_remove: AtomicUsize::new(0),
        })
    }

    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn received(&self) -> Vec<(Vec<u8>, u32)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Rx(payload, src) => Some((payload, src)),
                _ => None,
            })
            .collect()
    }
}

impl Driver for RecordingDriver {
    fn id_table(&self) -> &[&str] {
        &self.names
    }

    fn probe(&self, channel: &Arc<Channel>) -> Result<(), Error> {
        self.events
            .lock()
            .push(Event::Probe(channel.name().to_owned()));
        Ok(())
    }

    fn remove(&self, channel: &Arc<Channel>) {
        if channel.endpoint().is_some() {
            self.endpoint_alive_in_remove.fetch_add(1, Ordering::Relaxed);
        }
        self.events
            .lock()
            .push(Event::Remove(channel.name().to_owned()));
    }

    fn callback(&self, _channel: &Arc<Channel>, payload: &[u8], src: u32) {
        self.events.lock().push(Event::Rx(payload.to_vec(), src));
    }
}

/// Attach over a fresh simulated platform and clear the name-service
/// bring-up traffic so scenarios start from a quiet link.
fn setup(
    num_bufs: u32,
    buf_size: u32,
) -> (Arc<Transport>, SimRemote, Arc<Registry>, SimPlatform) {
    let sim = SimPlatform::new(num_bufs, buf_size);
    let remote = sim.remote();
    let registry = Registry::new();
    let transport = Transport::attach(&sim, registry.clone()).unwrap();

    // The name service says hello at attach; the remote processes it.
    let up = remote.drain_all();
    assert_eq!(up.len(), 1);
    assert_eq!(up[0].payload, b"UP!");
    assert_eq!(up[0].hdr.src, NS_ADDR);
    assert_eq!(up[0].hdr.dst, NS_ADDR);

    (transport, remote, registry, sim)
}

#[test]
fn attach_posts_the_receive_half_and_quiesces_the_send_side() {
    let (transport, remote, _registry, _sim) = setup(8, 256);

    assert_eq!(remote.posted_rx(), 4);
    assert!(remote.recv_kicks() >= 1);
    assert!(remote.send_notify_suppressed());

    // The name service owns its well-known address.
    assert_eq!(transport.endpoint_count(), 1);

    // A completion notification the remote was told not to send is a
    // protocol violation: logged, never fatal.
    transport.send_done();

    transport.detach();
}

#[test]
fn loopback_ping() {
    let (transport, remote, registry, _sim) = setup(4, 512);
    let driver = RecordingDriver::new(&["echo"]);
    registry.register_driver(driver.clone()).unwrap();

    // Remote announces the echo service at address 60.
    assert!(remote.announce(&NsMessage::create("echo", 60)));
    transport.recv_done();

    let chan = transport
        .channels()
        .into_iter()
        .find(|c| c.name() == "echo")
        .expect("echo channel created");
    assert_eq!(driver.events(), vec![Event::Probe("echo".into())]);
    let src = chan.src();
    assert!(src >= RESERVED_ADDRESSES);
    assert_eq!(chan.dst(), 60);

    chan.send(b"ping").unwrap();

    // The remote sees exactly one datagram with the submitted header.
    let seen = remote.drain_all();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].hdr.src, src);
    assert_eq!(seen[0].hdr.dst, 60);
    assert_eq!(seen[0].hdr.len, 4);
    assert_eq!(seen[0].payload, b"ping");

    // ... and the echoed reply lands in the channel's callback.
    assert!(remote.deliver(60, src, b"ping"));
    transport.recv_done();
    assert_eq!(driver.received(), vec![(b"ping".to_vec(), 60)]);

    transport.detach();
}

#[test]
fn reserved_range_collision() {
    let (transport, _remote, _registry, _sim) = setup(4, 512);
    let chan = transport.create_channel("aux", ADDR_ANY, 90).unwrap();
    let noop: remsg_bus::RxCallback = Arc::new(|_, _, _| {});

    // An explicit reserved-range address is honoured exactly once.
    let e = transport.create_endpoint(&chan, noop.clone(), 500).unwrap();
    assert_eq!(e.addr(), 500);
    assert!(matches!(
        transport.create_endpoint(&chan, noop.clone(), 500),
        Err(Error::AddressInUse { addr: 500 })
    ));

    // The name service already holds its well-known address.
    assert!(matches!(
        transport.create_endpoint(&chan, noop.clone(), NS_ADDR),
        Err(Error::AddressInUse { .. })
    ));

    // Dynamic allocation is unaffected by reserved-range occupants.
    let dynamic = transport.create_endpoint(&chan, noop, ADDR_ANY).unwrap();
    assert_eq!(dynamic.addr(), RESERVED_ADDRESSES);

    transport.detach();
}

#[test]
fn name_service_create_then_destroy() {
    let (transport, remote, registry, _sim) = setup(4, 512);
    let driver = RecordingDriver::new(&["foo"]);
    registry.register_driver(driver.clone()).unwrap();

    assert!(remote.announce(&NsMessage::create("foo", 42)));
    transport.recv_done();

    let chan = transport
        .channels()
        .into_iter()
        .find(|c| c.name() == "foo")
        .expect("foo channel created");
    assert_eq!(chan.dst(), 42);
    assert!(chan.src() >= RESERVED_ADDRESSES);

    assert!(remote.announce(&NsMessage::destroy("foo", 42)));
    transport.recv_done();

    assert!(!transport.channels().iter().any(|c| c.name() == "foo"));
    assert_eq!(
        driver.events(),
        vec![Event::Probe("foo".into()), Event::Remove("foo".into())]
    );
    // Create followed by destroy leaves the endpoint table as it started.
    assert_eq!(transport.endpoint_count(), 1);

    transport.detach();
}

#[test]
fn destroy_for_unknown_channel_is_ignored() {
    let (transport, remote, _registry, _sim) = setup(4, 512);

    assert!(remote.announce(&NsMessage::destroy("ghost", 7)));
    transport.recv_done();

    // Logged and dropped; the link keeps working.
    assert_eq!(transport.channels().len(), 1);
    assert_eq!(remote.posted_rx(), 2);
    transport.detach();
}

#[test]
fn oversize_send_is_rejected_at_the_boundary() {
    let (transport, remote, _registry, _sim) = setup(4, 512);

    let big = vec![0u8; 497];
    assert!(matches!(
        transport.send_off_channel(1024, 60, &big),
        Err(Error::TooLarge { len: 497 })
    ));

    let fits = vec![0xabu8; 496];
    transport.send_off_channel(1024, 60, &fits).unwrap();
    let seen = remote.drain_all();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].hdr.len, 496);
    assert_eq!(seen[0].payload, fits);

    transport.detach();
}

#[test]
fn send_rejects_unbound_addresses() {
    let (transport, _remote, _registry, _sim) = setup(4, 512);

    assert!(matches!(
        transport.send_off_channel(ADDR_ANY, 60, b"x"),
        Err(Error::InvalidAddress { .. })
    ));
    assert!(matches!(
        transport.send_off_channel(1024, ADDR_ANY, b"x"),
        Err(Error::InvalidAddress { .. })
    ));
    transport.detach();
}

#[test]
fn send_pool_wraps_through_completed_buffers() {
    // N = 4: two send buffers. The bring-up message already consumed and
    // released one slot, so the pool exercises both the never-used path
    // and the reclaim path.
    let (transport, remote, _registry, _sim) = setup(4, 512);

    transport.send_off_channel(1024, 60, b"one").unwrap();
    transport.send_off_channel(1024, 60, b"two").unwrap();
    assert_eq!(remote.pending_tx(), 2);
    assert!(remote.send_kicks() >= 3, "every enqueue rings the doorbell");

    // Remote withholds completion: the pool is dry.
    assert!(matches!(
        transport.send_off_channel(1024, 60, b"three"),
        Err(Error::NoBuffer)
    ));

    // One completion frees one slot, in FIFO order.
    let first = remote.drain_one().unwrap();
    assert_eq!(first.payload, b"one");
    transport.send_off_channel(1024, 60, b"three").unwrap();

    let rest = remote.drain_all();
    assert_eq!(rest.len(), 2);
    assert_eq!(rest[0].payload, b"two");
    assert_eq!(rest[1].payload, b"three");

    transport.detach();
}

#[test]
fn receive_buffers_are_reposted_after_dispatch() {
    let (transport, remote, registry, _sim) = setup(4, 512);
    let driver = RecordingDriver::new(&["echo"]);
    registry.register_driver(driver.clone()).unwrap();
    assert!(remote.announce(&NsMessage::create("echo", 60)));
    transport.recv_done();
    let chan = transport
        .channels()
        .into_iter()
        .find(|c| c.name() == "echo")
        .unwrap();

    // Every buffer is back on the queue once its callback has run.
    for i in 0..8u8 {
        assert!(remote.deliver(60, chan.src(), &[i]));
        transport.recv_done();
        assert_eq!(remote.posted_rx(), 2);
    }
    assert_eq!(driver.received().len(), 8);

    // A datagram for nobody is dropped but its buffer still comes back.
    assert!(remote.deliver(60, 0x7777, b"lost"));
    transport.recv_done();
    assert_eq!(remote.posted_rx(), 2);

    // Spurious wakeups are tolerated.
    transport.recv_done();
    assert_eq!(remote.posted_rx(), 2);

    transport.detach();
}

#[test]
fn teardown_destroys_channels_before_the_endpoint_table() {
    let (transport, remote, registry, _sim) = setup(8, 256);
    let driver = RecordingDriver::new(&["alpha", "beta"]);
    registry.register_driver(driver.clone()).unwrap();

    assert!(remote.announce(&NsMessage::create("alpha", 71)));
    transport.recv_done();
    assert!(remote.announce(&NsMessage::create("beta", 72)));
    transport.recv_done();
    assert_eq!(transport.endpoint_count(), 3);

    transport.detach();

    let events = driver.events();
    assert!(events.contains(&Event::Remove("alpha".into())));
    assert!(events.contains(&Event::Remove("beta".into())));
    // Endpoints were unmapped before each driver's remove ran.
    assert_eq!(driver.endpoint_alive_in_remove.load(Ordering::Relaxed), 0);
    assert_eq!(transport.endpoint_count(), 0);
    assert!(transport.channels().is_empty());

    // Detach is idempotent, and the link is dead afterwards.
    transport.detach();
    assert!(matches!(
        transport.send_off_channel(1024, 60, b"x"),
        Err(Error::Detached)
    ));
}

#[test]
fn channels_outliving_the_transport_report_detached() {
    let sim = SimPlatform::new(4, 512);
    let registry = Registry::new();
    let chan = {
        let transport = Transport::attach(&sim, registry).unwrap();
        let chan = transport.create_channel("late", 1024, 60).unwrap();
        transport.detach();
        chan
    };
    assert!(matches!(chan.send(b"x"), Err(Error::Detached)));
}

#[test]
fn driver_registered_after_the_channel_still_binds() {
    let (transport, remote, registry, _sim) = setup(4, 512);

    assert!(remote.announce(&NsMessage::create("tardy", 42)));
    transport.recv_done();
    let chan = transport
        .channels()
        .into_iter()
        .find(|c| c.name() == "tardy")
        .unwrap();
    assert_eq!(chan.src(), ADDR_ANY, "unbound until a driver matches");

    let driver = RecordingDriver::new(&["tardy"]);
    registry.register_driver(driver.clone()).unwrap();
    assert_eq!(driver.events(), vec![Event::Probe("tardy".into())]);
    assert!(chan.src() >= RESERVED_ADDRESSES);

    // Unregistering unbinds symmetrically.
    let as_dyn: Arc<dyn Driver> = driver.clone();
    registry.unregister_driver(&as_dyn);
    assert!(driver.events().contains(&Event::Remove("tardy".into())));
    assert_eq!(transport.endpoint_count(), 1);

    transport.detach();
}

#[test]
fn publish_announces_a_local_service() {
    let (transport, remote, registry, _sim) = setup(4, 512);
    let driver = RecordingDriver::new(&["sensor"]);
    registry.register_driver(driver).unwrap();

    let chan = transport.create_channel("sensor", ADDR_ANY, 90).unwrap();
    ns::publish(&chan).unwrap();

    let seen = remote.drain_all();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].hdr.dst, NS_ADDR);
    let msg = NsMessage::from_bytes(&seen[0].payload).unwrap();
    assert_eq!(msg.name_str(), "sensor");
    assert_eq!(msg.addr, chan.src());
    assert!(!msg.is_destroy());

    ns::publish_destroy(&chan).unwrap();
    let seen = remote.drain_all();
    let msg = NsMessage::from_bytes(&seen[0].payload).unwrap();
    assert!(msg.is_destroy());

    transport.detach();
}

#[test]
fn malformed_name_service_traffic_is_dropped() {
    let (transport, remote, _registry, _sim) = setup(4, 512);

    // Wrong length: logged and ignored.
    assert!(remote.deliver(NS_ADDR, NS_ADDR, b"short"));
    transport.recv_done();
    assert_eq!(transport.channels().len(), 1);

    // Unterminated name: truncated, not trusted.
    let mut raw = [0x42u8; 40];
    raw[32..36].copy_from_slice(&9u32.to_le_bytes());
    raw[36..40].copy_from_slice(&0u32.to_le_bytes());
    assert!(remote.deliver(NS_ADDR, NS_ADDR, &raw));
    transport.recv_done();
    let chan = transport
        .channels()
        .into_iter()
        .find(|c| c.name().starts_with('B'))
        .expect("truncated channel created");
    assert_eq!(chan.name().len(), 31);

    transport.detach();
}

#[test]
fn concurrent_senders_keep_per_thread_order() {
    let (transport, remote, registry, _sim) = setup(16, 128);
    let driver = RecordingDriver::new(&["echo"]);
    registry.register_driver(driver.clone()).unwrap();
    assert!(remote.announce(&NsMessage::create("echo", 60)));
    transport.recv_done();
    let chan = transport
        .channels()
        .into_iter()
        .find(|c| c.name() == "echo")
        .unwrap();

    let echo = {
        let transport = transport.clone();
        remote.spawn_echo(move || transport.recv_done())
    };

    const PER_THREAD: u8 = 50;
    let senders: Vec<_> = (0u8..2)
        .map(|tag| {
            let chan = chan.clone();
            std::thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    loop {
                        match chan.send(&[tag, seq]) {
                            Ok(()) => break,
                            Err(Error::NoBuffer) => std::thread::yield_now(),
                            Err(e) => panic!("send failed: {e}"),
                        }
                    }
                }
            })
        })
        .collect();
    for s in senders {
        s.join().unwrap();
    }

    // Wait for the echo loop to bounce everything back.
    let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
    while driver.received().len() < 2 * PER_THREAD as usize {
        assert!(std::time::Instant::now() < deadline, "echo stalled");
        std::thread::yield_now();
    }
    echo.stop();

    // Per-sender order survives; interleaving across senders is free.
    let received = driver.received();
    for tag in 0u8..2 {
        let seqs: Vec<u8> = received
            .iter()
            .filter(|(p, _)| p[0] == tag)
            .map(|(p, _)| p[1])
            .collect();
        let expected: Vec<u8> = (0..PER_THREAD).collect();
        assert_eq!(seqs, expected, "sender {tag} was reordered");
    }

    transport.detach();
}

#[test]
fn destination_can_be_learned_late() {
    let (transport, remote, registry, _sim) = setup(4, 512);
    let driver = RecordingDriver::new(&["probe-first"]);
    registry.register_driver(driver).unwrap();

    // A locally created channel may start with no remote address.
    let chan = transport
        .create_channel("probe-first", ADDR_ANY, ADDR_ANY)
        .unwrap();
    assert!(matches!(
        chan.send(b"hello"),
        Err(Error::InvalidAddress { .. })
    ));

    chan.set_dst(91);
    chan.send(b"hello").unwrap();
    let seen = remote.drain_all();
    assert_eq!(seen[0].hdr.dst, 91);
    assert_eq!(seen[0].hdr.src, chan.src());

    transport.detach();
}

#[test]
fn fixed_channels_are_created_at_attach() {
    let driver = RecordingDriver::new(&["console"]);
    let registry = Registry::new();
    registry.register_driver(driver.clone()).unwrap();

    let sim = SimPlatform::new(4, 512).with_fixed_channels(vec![remsg_bus::StaticChannel {
        name: "console".into(),
        src: ADDR_ANY,
        dst: 80,
    }]);
    let transport = Transport::attach(&sim, registry).unwrap();

    assert_eq!(driver.events(), vec![Event::Probe("console".into())]);
    let chan = transport
        .channels()
        .into_iter()
        .find(|c| c.name() == "console")
        .unwrap();
    assert_eq!(chan.dst(), 80);
    assert!(chan.src() >= RESERVED_ADDRESSES);

    transport.detach();
}
