use bytes::Bytes;
use std::cell::RefCell;
use std::fs;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;
use std::rc::Rc;
use tcpchain_abstract::{
    Application, Lifecycle, OutputConfig, ScenarioFile, Segment, SimConfig, SimTime, SinkError,
    TelemetryRecord, TraceObserver,
};
use tcpchain_simulator::scenario_runner::{build_chain, run_scenario};
use tcpchain_simulator::{DeviceId, NodeId};

/// Records into a buffer the test keeps a handle to.
#[derive(Clone, Default)]
struct SharedRecorder(Rc<RefCell<Vec<TelemetryRecord>>>);

impl TraceObserver for SharedRecorder {
    fn on_congestion_window_change(
        &mut self,
        time: SimTime,
        old: u32,
        new: u32,
    ) -> Result<(), SinkError> {
        self.0
            .borrow_mut()
            .push(TelemetryRecord::CongestionSample { time, old, new });
        Ok(())
    }

    fn on_receive_drop(&mut self, time: SimTime, frame: &[u8]) -> Result<(), SinkError> {
        self.0.borrow_mut().push(TelemetryRecord::LinkDrop {
            time,
            frame: Bytes::copy_from_slice(frame),
        });
        Ok(())
    }
}

/// Fails every write, like a full disk.
struct BrokenDisk;

impl TraceObserver for BrokenDisk {
    fn on_congestion_window_change(&mut self, _: SimTime, _: u32, _: u32) -> Result<(), SinkError> {
        Err(SinkError::Io(std::io::Error::other("disk full")))
    }
}

fn lossless() -> SimConfig {
    let mut config = SimConfig::default();
    config.loss.rate = 0.0;
    config
}

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("tcpchain-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn lossless_chain_delivers_every_byte() {
    let mut chain = build_chain(&lossless()).unwrap();
    chain.sim.run_until(SimTime::from_secs(20)).unwrap();
    let report = chain.sim.export_report();

    assert_eq!(report.packets_sent(), 1000);
    assert_eq!(report.bytes_delivered(), 1_040_000);
    assert_eq!(report.link_drops, 0);
    assert_eq!(report.duration, SimTime::from_secs(20));
    assert_eq!(report.applications[0].lifecycle, Lifecycle::Stopped);
    assert!(report.sink_errors.is_empty());
}

#[test]
fn simulator_views_follow_the_run() {
    let mut chain = build_chain(&lossless()).unwrap();
    let app = chain.app;
    let sim = &mut chain.sim;
    assert_eq!(sim.topology().node_count(), 4);
    assert_eq!(sim.current_time(), SimTime::ZERO);
    // Only the generator's start and stop are queued.
    assert_eq!(sim.remaining_events(), 2);
    assert_eq!(sim.peek_next_event_time(), Some(SimTime::ZERO));
    assert_eq!(sim.app(app).map(|a| a.lifecycle()), Some(Lifecycle::Idle));

    sim.run_until(SimTime::from_millis(100)).unwrap();
    assert_eq!(sim.current_time(), SimTime::from_millis(100));
    assert_eq!(sim.app(app).map(|a| a.lifecycle()), Some(Lifecycle::Running));
    assert!(sim.peek_next_event_time() > Some(SimTime::from_millis(100)));

    let socket = sim.socket(chain.socket).unwrap();
    assert_eq!(
        socket.local().map(|addr| *addr.ip()),
        sim.topology().node_address(NodeId(0))
    );
    assert!(socket.segments_sent() > 0);
    assert_eq!(sim.sinks()[0].port(), 1090);
    assert!(sim.sinks()[0].bytes_received() > 0);
}

#[test]
fn congestion_samples_arrive_in_time_order() {
    let recorder = SharedRecorder::default();
    let mut chain = build_chain(&lossless()).unwrap();
    chain
        .sim
        .trace_congestion_window(chain.socket, Box::new(recorder.clone()))
        .unwrap();
    chain.sim.run_until(SimTime::from_secs(20)).unwrap();

    let records = recorder.0.borrow();
    assert!(!records.is_empty());
    assert!(records.windows(2).all(|w| w[0].time() <= w[1].time()));
    // The first sample is the window opening on connect.
    assert_eq!(
        records[0],
        TelemetryRecord::CongestionSample {
            time: SimTime::ZERO,
            old: 0,
            new: 536
        }
    );
    assert_eq!(
        chain.sim.export_report().congestion_samples,
        records.len() as u64
    );
}

#[test]
fn drop_before_generator_start_is_still_captured() {
    let mut config = SimConfig::default();
    config.loss.rate = 1.0;
    config.generator.start = SimTime::from_secs(1);

    let recorder = SharedRecorder::default();
    let mut chain = build_chain(&config).unwrap();
    let device = chain.lossy_device();
    assert_eq!(device, DeviceId { link: 0, node: NodeId(1) });
    chain
        .sim
        .trace_rx_drop(device, Box::new(recorder.clone()))
        .unwrap();

    let src = SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 7);
    let dst = SocketAddrV4::new(Ipv4Addr::new(10, 0, 2, 2), 1090);
    chain.sim.schedule_segment(
        SimTime::ZERO,
        NodeId(0),
        Segment::data(src, dst, 1, Bytes::from_static(b"early")),
    );
    chain.sim.run_until(SimTime::from_millis(500)).unwrap();

    let records = recorder.0.borrow();
    assert_eq!(records.len(), 1);
    match &records[0] {
        TelemetryRecord::LinkDrop { time, frame } => {
            assert!(*time < SimTime::from_secs(1));
            assert_eq!(&frame[..2], &[0x00, 0x21]);
            assert_eq!(frame.len(), 2 + 20 + 20 + 5);
        }
        other => panic!("expected a drop, got {other:?}"),
    }
    assert_eq!(chain.sim.export_report().packets_sent(), 0);
}

#[test]
fn stop_time_ends_generation_early() {
    let mut config = lossless();
    config.generator.packets = 1_000_000;
    config.generator.stop = SimTime::from_secs(2);

    let mut chain = build_chain(&config).unwrap();
    chain.sim.run_until(SimTime::from_secs(20)).unwrap();
    let report = chain.sim.export_report();

    // Sends at k * 8.32 ms for every k with k * 8.32 ms < 2 s.
    assert_eq!(report.packets_sent(), 241);
    assert_eq!(report.applications[0].lifecycle, Lifecycle::Stopped);
    assert_eq!(chain.sim.app_states(), vec![Lifecycle::Stopped]);
}

#[test]
fn failing_trace_writer_does_not_disturb_pacing() {
    let mut chain = build_chain(&lossless()).unwrap();
    chain
        .sim
        .trace_congestion_window(chain.socket, Box::new(BrokenDisk))
        .unwrap();
    chain.sim.run_until(SimTime::from_secs(20)).unwrap();
    let report = chain.sim.export_report();

    assert_eq!(report.packets_sent(), 1000);
    assert_eq!(report.bytes_delivered(), 1_040_000);
    assert!(!report.sink_errors.is_empty());
}

#[test]
fn scenario_writes_both_trace_files() {
    let dir = scratch_dir("files");
    let cwnd = dir.join("sixth.cwnd");
    let pcap = dir.join("sixth.pcap");

    let mut scenario = ScenarioFile {
        output: OutputConfig {
            cwnd: Some(cwnd.clone()),
            pcap: Some(pcap.clone()),
        },
        ..Default::default()
    };
    // Every frame entering node 1 is lost, so only the first segment ever leaves.
    scenario.config.loss.rate = 1.0;
    scenario.config.stop_time = SimTime::from_secs(1);

    let report = run_scenario(&scenario).unwrap();
    assert_eq!(report.link_drops, 1);

    let lines = fs::read_to_string(&cwnd).unwrap();
    assert_eq!(lines, "0\t0\t536\n");

    let capture = fs::read(&pcap).unwrap();
    // Global header, one record header, one 578-byte PPP frame.
    assert_eq!(capture.len(), 24 + 16 + 578);
    assert_eq!(u32::from_ne_bytes(capture[0..4].try_into().unwrap()), 0xa1b2_c3d4);
    assert_eq!(u32::from_ne_bytes(capture[20..24].try_into().unwrap()), 9);
    assert_eq!(u32::from_ne_bytes(capture[32..36].try_into().unwrap()), 578);

    fs::remove_dir_all(&dir).ok();
}
