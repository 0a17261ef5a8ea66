//! Telemetry capture: a tab-separated congestion window trace and a pcap
//! capture of frames dropped by the link layer.
//!
//! Each record is assembled in memory and handed to the writer with a single
//! `write_all`, so a record is either entirely present in the output or not at
//! all. Writers are append-only and reject records older than the last one.

use bytes::{BufMut, Bytes, BytesMut};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tcpchain_abstract::{SimTime, SinkError, TelemetryRecord, TraceObserver};
use tracing::info;

/// pcap magic for microsecond timestamps, written in native byte order.
const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const PCAP_VERSION_MAJOR: u16 = 2;
const PCAP_VERSION_MINOR: u16 = 4;
const PCAP_SNAPLEN: u32 = 65_535;
/// Datalink type for PPP framing.
pub const LINKTYPE_PPP: u32 = 9;

fn check_order(last: &mut Option<SimTime>, time: SimTime) -> Result<(), SinkError> {
    if let Some(prev) = *last
        && time < prev
    {
        return Err(SinkError::OutOfOrder {
            last: prev,
            got: time,
        });
    }
    *last = Some(time);
    Ok(())
}

/// Writes `<time>\t<old>\t<new>` lines, time in floating point seconds.
pub struct CongestionTraceWriter<W: Write> {
    out: W,
    last: Option<SimTime>,
    records: u64,
}

impl CongestionTraceWriter<File> {
    pub fn create(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        Ok(Self::new(File::create(path)?))
    }
}

impl<W: Write> CongestionTraceWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            last: None,
            records: 0,
        }
    }

    pub fn record(&mut self, time: SimTime, old: u32, new: u32) -> Result<(), SinkError> {
        check_order(&mut self.last, time)?;
        info!("{}\t{}", time.as_secs_f64(), new);
        let line = format!("{}\t{}\t{}\n", time.as_secs_f64(), old, new);
        self.out.write_all(line.as_bytes())?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TraceObserver for CongestionTraceWriter<W> {
    fn on_congestion_window_change(
        &mut self,
        time: SimTime,
        old: u32,
        new: u32,
    ) -> Result<(), SinkError> {
        self.record(time, old, new)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Writes a pcap capture: one global header, then one record per frame.
pub struct PcapWriter<W: Write> {
    out: W,
    last: Option<SimTime>,
    records: u64,
}

impl PcapWriter<File> {
    pub fn create(path: impl AsRef<Path>, linktype: u32) -> Result<Self, SinkError> {
        Self::new(File::create(path)?, linktype)
    }
}

impl<W: Write> PcapWriter<W> {
    /// Write the global header immediately, so an empty capture is still a valid file.
    pub fn new(mut out: W, linktype: u32) -> Result<Self, SinkError> {
        let mut header = BytesMut::with_capacity(24);
        header.put_u32_ne(PCAP_MAGIC);
        header.put_u16_ne(PCAP_VERSION_MAJOR);
        header.put_u16_ne(PCAP_VERSION_MINOR);
        header.put_i32_ne(0); // thiszone
        header.put_u32_ne(0); // sigfigs
        header.put_u32_ne(PCAP_SNAPLEN);
        header.put_u32_ne(linktype);
        out.write_all(&header)?;
        out.flush()?;
        Ok(Self {
            out,
            last: None,
            records: 0,
        })
    }

    pub fn write(&mut self, time: SimTime, frame: &[u8]) -> Result<(), SinkError> {
        let orig_len =
            u32::try_from(frame.len()).map_err(|_| SinkError::FrameTooLarge(frame.len()))?;
        let (secs, micros) = time.secs_and_micros();
        let secs = u32::try_from(secs).map_err(|_| SinkError::TimestampOutOfRange(time))?;
        check_order(&mut self.last, time)?;
        info!("RxDrop at {}", time.as_secs_f64());

        let captured = frame.len().min(PCAP_SNAPLEN as usize);
        let mut record = BytesMut::with_capacity(16 + captured);
        record.put_u32_ne(secs);
        record.put_u32_ne(micros);
        record.put_u32_ne(captured as u32);
        record.put_u32_ne(orig_len);
        record.put_slice(&frame[..captured]);
        self.out.write_all(&record)?;
        self.out.flush()?;
        self.records += 1;
        Ok(())
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> TraceObserver for PcapWriter<W> {
    fn on_receive_drop(&mut self, time: SimTime, frame: &[u8]) -> Result<(), SinkError> {
        self.write(time, frame)
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        self.out.flush()?;
        Ok(())
    }
}

/// Keeps every record in memory, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    pub records: Vec<TelemetryRecord>,
}

impl TraceObserver for RecordingObserver {
    fn on_congestion_window_change(
        &mut self,
        time: SimTime,
        old: u32,
        new: u32,
    ) -> Result<(), SinkError> {
        self.records
            .push(TelemetryRecord::CongestionSample { time, old, new });
        Ok(())
    }

    fn on_receive_drop(&mut self, time: SimTime, frame: &[u8]) -> Result<(), SinkError> {
        self.records.push(TelemetryRecord::LinkDrop {
            time,
            frame: Bytes::copy_from_slice(frame),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn congestion_lines_are_time_old_new() {
        let mut writer = CongestionTraceWriter::new(Vec::new());
        writer.record(SimTime::from_millis(1009), 0, 536).unwrap();
        writer.record(SimTime::from_nanos(1_012_345_000), 536, 1072).unwrap();
        writer.record(SimTime::from_nanos(1_012_345_000), 1072, 1608).unwrap();
        assert_eq!(writer.records(), 3);
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(
            text,
            "1.009\t0\t536\n1.012345\t536\t1072\n1.012345\t1072\t1608\n"
        );
    }

    #[test]
    fn every_sample_is_kept_even_repeats() {
        let mut writer = CongestionTraceWriter::new(Vec::new());
        for _ in 0..3 {
            writer.record(SimTime::from_secs(2), 536, 536).unwrap();
        }
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn older_record_is_rejected_and_not_written() {
        let mut writer = CongestionTraceWriter::new(Vec::new());
        writer.record(SimTime::from_secs(2), 0, 536).unwrap();
        let err = writer.record(SimTime::from_secs(1), 536, 1072).unwrap_err();
        assert!(matches!(err, SinkError::OutOfOrder { .. }));
        let text = String::from_utf8(writer.into_inner()).unwrap();
        assert_eq!(text, "2\t0\t536\n");
    }

    #[test]
    fn pcap_global_header() {
        let writer = PcapWriter::new(Vec::new(), LINKTYPE_PPP).unwrap();
        let bytes = writer.into_inner();
        assert_eq!(bytes.len(), 24);
        assert_eq!(u32::from_ne_bytes(bytes[0..4].try_into().unwrap()), PCAP_MAGIC);
        assert_eq!(u16::from_ne_bytes(bytes[4..6].try_into().unwrap()), 2);
        assert_eq!(u16::from_ne_bytes(bytes[6..8].try_into().unwrap()), 4);
        assert_eq!(u32::from_ne_bytes(bytes[16..20].try_into().unwrap()), 65_535);
        assert_eq!(u32::from_ne_bytes(bytes[20..24].try_into().unwrap()), LINKTYPE_PPP);
    }

    #[test]
    fn pcap_record_carries_timestamp_and_exact_bytes() {
        let mut writer = PcapWriter::new(Vec::new(), LINKTYPE_PPP).unwrap();
        let frame = [0x00, 0x21, 0x45, 0x00, 0xde, 0xad];
        writer
            .write(SimTime::from_nanos(1_500_250_000), &frame)
            .unwrap();
        assert_eq!(writer.records(), 1);
        let bytes = writer.into_inner();
        let rec = &bytes[24..];
        assert_eq!(u32::from_ne_bytes(rec[0..4].try_into().unwrap()), 1);
        assert_eq!(u32::from_ne_bytes(rec[4..8].try_into().unwrap()), 500_250);
        assert_eq!(u32::from_ne_bytes(rec[8..12].try_into().unwrap()), 6);
        assert_eq!(u32::from_ne_bytes(rec[12..16].try_into().unwrap()), 6);
        assert_eq!(&rec[16..], &frame);
    }

    #[test]
    fn timestamp_beyond_pcap_seconds_is_rejected() {
        let mut writer = PcapWriter::new(Vec::new(), LINKTYPE_PPP).unwrap();
        let late = SimTime::from_secs(u64::from(u32::MAX) + 1);
        let err = writer.write(late, &[0x00, 0x21]).unwrap_err();
        assert!(matches!(err, SinkError::TimestampOutOfRange(t) if t == late));
        assert_eq!(writer.records(), 0);

        // Nothing was written, and the last accepted time is unchanged.
        writer.write(SimTime::from_secs(3), &[0x00, 0x21]).unwrap();
        assert_eq!(writer.into_inner().len(), 24 + 16 + 2);
    }

    struct BrokenDisk;

    impl Write for BrokenDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("disk full"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn write_failures_become_sink_errors() {
        let mut writer = CongestionTraceWriter::new(BrokenDisk);
        let err = writer.record(SimTime::ZERO, 0, 536).unwrap_err();
        assert!(matches!(err, SinkError::Io(_)));
        assert!(matches!(
            PcapWriter::new(BrokenDisk, LINKTYPE_PPP),
            Err(SinkError::Io(_))
        ));
    }

    #[test]
    fn recording_observer_routes_by_variant() {
        let mut observer = RecordingObserver::default();
        let drop = TelemetryRecord::LinkDrop {
            time: SimTime::from_secs(1),
            frame: Bytes::from_static(&[1, 2, 3]),
        };
        observer.observe(&drop).unwrap();
        observer
            .on_congestion_window_change(SimTime::from_secs(2), 536, 1072)
            .unwrap();
        assert_eq!(observer.records.len(), 2);
        assert_eq!(observer.records[0], drop);
    }
}
