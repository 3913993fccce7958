//! Receive worker: record a timed multi-channel stream into per-channel files

use crate::error::UsrpError;
use crate::files::{channel_filename, SampleWriter};
use crate::frame::Frame;
use crate::metadata::{RxErrorCode, StreamCommand};
use crate::signals::StreamSignals;
use crate::{RxStreamer, Sample};
use failure::Error;
use log::{info, warn};
use std::fs::File;
use std::path::Path;

/// Padding added to the settling time for the first receive, and the timeout of every later
/// receive, in seconds
const RECV_TIMEOUT: f64 = 0.1;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RxSettings {
    /// Capacity of each channel buffer per receive call
    pub samps_per_buff: usize,
    /// Stop once this many samples per channel have been received. 0 receives until a timeout
    /// or a stop request
    pub num_requested_samples: usize,
    /// Expected delay before the first samples arrive, in seconds
    pub settling_time: f64,
    /// Receive sample rate, used to tell the user how fast the disk must be on overflow
    pub rx_rate: f64,
}

/// What the RX worker did, for logging and tests
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RxReport {
    /// Samples per channel written to disk
    pub num_total_samps: usize,
    pub num_recv_calls: usize,
    /// Receive calls that reported an overflow. Their samples were dropped
    pub overflows: usize,
    /// The loop ended on a receive timeout
    pub timed_out: bool,
}

/// Receive into `<file>NN.<ext>`, one file per entry of `rx_channel_nums`.
///
/// The stream must already have been started with a stream command. A timeout ends the
/// recording normally, overflows are reported once and their samples dropped, and any other
/// error code fails with `UsrpError::Receiver`. However the loop ends, the stream is stopped and
/// the files are closed; every frame received before that is on disk in full.
pub fn recv_to_file<R: RxStreamer + ?Sized>(
    rx_stream: &mut R,
    file: &Path,
    settings: &RxSettings,
    rx_channel_nums: &[usize],
    signals: &StreamSignals,
) -> Result<RxReport, Error> {
    let result = create_outfiles(file, rx_channel_nums.len())
        .and_then(|mut outfiles| stream_to_files(rx_stream, &mut outfiles, settings, signals));

    // Shut down receiver
    if let Err(e) = rx_stream.issue_stream_cmd(&StreamCommand::stop()) {
        warn!("Failed to stop rx stream: {}", e);
    }
    result
}

fn create_outfiles(file: &Path, num_channels: usize) -> Result<Vec<SampleWriter<File>>, Error> {
    let mut outfiles = Vec::with_capacity(num_channels);
    for ch in 0..num_channels {
        let this_filename = channel_filename(file, num_channels, ch);
        info!("Writing rx data: {}", this_filename.display());
        outfiles.push(SampleWriter::create(&this_filename)?);
    }
    Ok(outfiles)
}

fn stream_to_files<R: RxStreamer + ?Sized>(
    rx_stream: &mut R,
    outfiles: &mut [SampleWriter<File>],
    settings: &RxSettings,
    signals: &StreamSignals,
) -> Result<RxReport, Error> {
    let mut frame = Frame::new(outfiles.len(), settings.samps_per_buff);
    let mut report = RxReport::default();
    let mut overflow_message = true;
    // Expected settling time + padding for first recv
    let mut timeout = settings.settling_time + RECV_TIMEOUT;

    while !signals.stop_requested()
        && (settings.num_requested_samples == 0
            || report.num_total_samps < settings.num_requested_samples)
    {
        let (num_rx_samps, md) = rx_stream.recv(&mut frame, timeout)?;
        report.num_recv_calls += 1;
        timeout = RECV_TIMEOUT;

        match md.error_code {
            RxErrorCode::None => {}
            RxErrorCode::Timeout => {
                info!("Timeout while streaming");
                report.timed_out = true;
                break;
            }
            RxErrorCode::Overflow => {
                report.overflows += 1;
                if overflow_message {
                    overflow_message = false;
                    warn!(
                        "Got an overflow indication. Your write medium must sustain a rate of \
                         {:.3}MB/s. Dropped samples will not be written to the file. \
                         This message will not appear again.",
                        settings.rx_rate * std::mem::size_of::<Sample>() as f64 / 1e6
                    );
                }
                continue;
            }
            _ => return Err(UsrpError::Receiver(md.strerror()).into()),
        }

        let num_rx_samps = num_rx_samps.min(frame.samps_per_buff());
        report.num_total_samps += num_rx_samps;
        for (outfile, buf) in outfiles.iter_mut().zip(frame.channels()) {
            outfile.write(&buf[..num_rx_samps])?;
        }
    }
    Ok(report)
}
