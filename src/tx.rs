//! Transmit worker: stream per-channel files out of the radio as a single burst

use crate::files::{channel_filename, ReadStatus, SampleReader};
use crate::frame::Frame;
use crate::metadata::{AsyncEventCode, BurstMetadata};
use crate::signals::StreamSignals;
use crate::TxStreamer;
use log::{debug, error, info, warn};
use std::io::Read;
use std::path::Path;
use std::time::{Duration, Instant};

/// Timeout handed to each send call, in seconds
const SEND_TIMEOUT: f64 = 0.1;

/// What the TX worker did, for logging and tests
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TxReport {
    /// Number of send calls issued
    pub num_sends: usize,
    /// Sum of the per-channel lengths of all send calls
    pub num_samps_sent: usize,
    pub underflows: usize,
    pub elapsed: Duration,
}

/// Read `<file>NN.<ext>` for each of `num_channels` channels and send them as one burst framed by
/// `md`, `samps_per_buff` samples per channel at a time.
///
/// The burst ends as soon as any channel's file is exhausted or fails to read, or when a stop is
/// requested through `signals`. Underflows reported by the hardware set `signals.underflow`.
/// Files that cannot be opened are logged and end the burst on the first read.
///
/// Each send uses the sample count read from the *last* channel, so channels of unequal length
/// send stale samples for the shorter ones in the final frame.
// TODO: decide whether the final frame should use the minimum count over all channels; the
// current behaviour is what existing captures were recorded with
pub fn send_from_file<T: TxStreamer + ?Sized>(
    tx_stream: &mut T,
    file: &Path,
    samps_per_buff: usize,
    num_channels: usize,
    md: BurstMetadata,
    signals: &StreamSignals,
) -> TxReport {
    let infiles: Vec<_> = (0..num_channels)
        .map(|ch| {
            let this_filename = channel_filename(file, num_channels, ch);
            info!("Opening tx data: {}", this_filename.display());
            SampleReader::open(&this_filename)
        })
        .collect();
    send_from_readers(tx_stream, infiles, samps_per_buff, md, signals)
}

/// Burst loop of `send_from_file`, one reader per channel
pub(crate) fn send_from_readers<T: TxStreamer + ?Sized, R: Read>(
    tx_stream: &mut T,
    mut infiles: Vec<SampleReader<R>>,
    samps_per_buff: usize,
    mut md: BurstMetadata,
    signals: &StreamSignals,
) -> TxReport {
    let mut frame = Frame::new(infiles.len(), samps_per_buff);

    let mut report = TxReport::default();
    let start = Instant::now();
    while !md.end_of_burst && !signals.stop_requested() {
        // Fill all tx buffers
        let mut num_tx_samps = 0;
        for (ch, infile) in infiles.iter_mut().enumerate() {
            let read = infile.read(frame.channel_mut(ch));
            num_tx_samps = read.num_samps;
            match read.status {
                ReadStatus::Full => {}
                ReadStatus::EndOfFile => md.end_of_burst = true,
                ReadStatus::Failed(e) => {
                    error!("tx read failed on channel {}: {}", ch, e);
                    md.end_of_burst = true;
                }
            }
        }

        match tx_stream.send(&frame, num_tx_samps, &md, SEND_TIMEOUT) {
            Ok(sent) => {
                if sent < num_tx_samps {
                    warn!("Sent only {} of {} samples", sent, num_tx_samps);
                }
                report.num_sends += 1;
                report.num_samps_sent += sent;
            }
            Err(e) => {
                error!("tx send failed: {}", e);
                md.end_of_burst = true;
            }
        }

        // Check for async messages (underflow)
        if let Some(async_msg) = tx_stream.recv_async_msg(0.) {
            match async_msg.event_code {
                AsyncEventCode::SeqError | AsyncEventCode::TimeError => {
                    warn!("Sequence or time error");
                }
                code if code.is_underflow() => {
                    if code == AsyncEventCode::UnderflowInPacket {
                        warn!("Underflow in packet");
                    }
                    report.underflows += 1;
                    signals.underflow.set();
                }
                other => debug!("Ignoring async event {:?}", other),
            }
        }

        md.clear_start();
    }
    report.elapsed = start.elapsed();
    info!("Elapsed time for tx: {:.6} s", report.elapsed.as_secs_f64());

    if report.underflows > 0 {
        warn!("{} underflows!", report.underflows);
        signals.underflow.set();
    }

    // Close files
    drop(infiles);
    report
}
