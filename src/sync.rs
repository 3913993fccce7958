//! Run the TX and RX workers together on a common start time

use crate::error::UsrpError;
use crate::metadata::{BurstMetadata, Direction, StreamCommand, TimeSpec};
use crate::rx::{recv_to_file, RxSettings};
use crate::sched::ThreadPriority;
use crate::signals::StreamSignals;
use crate::tx::send_from_file;
use crate::{RxStreamer, TxStreamer, UsrpDevice};
use failure::Error;
use log::{debug, info, warn};
use std::io;
use std::path::Path;
use std::thread;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TxRxOptions {
    /// Samples per channel read from the TX files for each send
    pub tx_samps_per_buff: usize,
    /// Samples per channel per receive. `None` uses ten packets' worth of the TX stream
    pub rx_samps_per_buff: Option<usize>,
    /// Delay between resetting the device clocks and the start of both streams, in seconds.
    /// Must leave the TX worker enough time to fill its first buffer. Also used as the RX
    /// settling time
    pub start_offset: f64,
    /// Scheduling hint for the TX thread
    pub tx_priority: ThreadPriority,
}

impl Default for TxRxOptions {
    fn default() -> Self {
        TxRxOptions {
            tx_samps_per_buff: 1000,
            rx_samps_per_buff: None,
            start_offset: 0.005,
            tx_priority: ThreadPriority::RealTime,
        }
    }
}

/// Transmit `<tx_path>NN.<ext>` while recording `num_samps` samples per channel (0 records until
/// the stream times out) into `<rx_path>NN.<ext>`, one file per entry of `channels`.
///
/// Both device clocks are reset to zero and both directions start at `options.start_offset`.
/// The TX worker runs on its own thread; RX runs on the calling thread. Returns whether any
/// underflow happened during transmission. If RX fails the TX worker is stopped and joined
/// before the error is returned.
#[allow(clippy::too_many_arguments)]
pub fn run_txrx<D: UsrpDevice>(
    device: &mut D,
    tx_stream: &mut D::Tx,
    rx_stream: &mut D::Rx,
    tx_path: &Path,
    rx_path: &Path,
    num_samps: usize,
    channels: &[usize],
    options: &TxRxOptions,
    signals: &StreamSignals,
) -> Result<bool, Error> {
    if channels.is_empty() {
        return Err(UsrpError::config("at least one channel is required").into());
    }
    if options.tx_samps_per_buff == 0 || options.rx_samps_per_buff == Some(0) {
        return Err(UsrpError::config("buffer sizes must be positive").into());
    }

    let rx_samps_per_buff = options
        .rx_samps_per_buff
        .unwrap_or_else(|| tx_stream.max_num_samps() * 10);
    if rx_samps_per_buff == 0 {
        return Err(UsrpError::config("tx stream reports a packet size of 0").into());
    }

    device.set_time_now(Direction::Rx, TimeSpec::default())?;
    device.set_time_now(Direction::Tx, TimeSpec::default())?;
    let start_time = TimeSpec::from_secs(options.start_offset);
    rx_stream.issue_stream_cmd(&StreamCommand::rx_start(num_samps, start_time))?;

    let md = BurstMetadata::timed_start(start_time);
    let settings = RxSettings {
        samps_per_buff: rx_samps_per_buff,
        num_requested_samples: num_samps,
        settling_time: options.start_offset,
        rx_rate: device.rate(Direction::Rx),
    };
    debug!(
        "Starting txrx at {} with {} channels, rx buffers of {} samples",
        start_time,
        channels.len(),
        settings.samps_per_buff
    );

    let tx_priority = options.tx_priority;
    let tx_samps_per_buff = options.tx_samps_per_buff;
    let num_channels = channels.len();
    let scope_result = thread::scope(|s| -> Result<_, Error> {
        // Keep transmit off the calling thread so that a priority change stays with it
        let transmit_thread = thread::Builder::new()
            .name("tx-worker".to_string())
            .spawn_scoped(s, move || {
                tx_priority.apply();
                send_from_file(tx_stream, tx_path, tx_samps_per_buff, num_channels, md, signals)
            });
        let transmit_thread = disarm_on_err(rx_stream, transmit_thread)?;

        let rx_result = recv_to_file(rx_stream, rx_path, &settings, channels, signals);
        if rx_result.is_err() {
            signals.stop.stop();
        }
        let tx_result = transmit_thread.join();
        Ok((tx_result, rx_result))
    });

    let underflowed = signals.underflow.check_clear();
    signals.stop.reset();

    let (tx_result, rx_result) = scope_result?;
    let rx_report = rx_result?;
    let tx_report = tx_result.map_err(|_| UsrpError::WorkerPanicked("TX"))?;
    info!(
        "txrx done: sent {} samples in {} sends, received {} samples in {} calls",
        tx_report.num_samps_sent,
        tx_report.num_sends,
        rx_report.num_total_samps,
        rx_report.num_recv_calls
    );
    Ok(underflowed)
}

/// Pass `result` through, stopping the already armed `rx_stream` if it is an error
fn disarm_on_err<R: RxStreamer + ?Sized, T>(
    rx_stream: &mut R,
    result: io::Result<T>,
) -> Result<T, Error> {
    result.map_err(|e| {
        if let Err(stop_err) = rx_stream.issue_stream_cmd(&StreamCommand::stop()) {
            warn!("Failed to stop rx stream: {}", stop_err);
        }
        e.into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::metadata::{AsyncEventCode, AsyncMetadata, ClockSource, RxErrorCode, StreamMode};
    use crate::simulator::{
        create_simulator, RadioSimulatorConfig, SimulatedDevice, SimulatedRxStream,
    };
    use crate::{channel_filename, Sample, SampleWriter};

    fn options() -> TxRxOptions {
        TxRxOptions {
            rx_samps_per_buff: Some(64),
            tx_priority: ThreadPriority::Default,
            ..Default::default()
        }
    }

    fn write_tx(base: &Path, num_channels: usize, len: usize) {
        for ch in 0..num_channels {
            let samps = vec![Sample::new(1., 0.); len];
            let path = channel_filename(base, num_channels, ch);
            SampleWriter::create(&path).unwrap().write(&samps).unwrap();
        }
    }

    #[test]
    fn aligns_start_and_reports_no_underflow() {
        let dir = tempfile::tempdir().unwrap();
        let (tx_path, rx_path) = (dir.path().join("tx.dat"), dir.path().join("rx.dat"));
        write_tx(&tx_path, 2, 2500);

        let mut dev = create_simulator(&RadioSimulatorConfig::default());
        let probe = dev.probe();
        let mut tx = dev.tx_stream(&[0, 1]).unwrap();
        let mut rx = dev.rx_stream(&[0, 1]).unwrap();
        let signals = StreamSignals::new();

        let underflow = run_txrx(
            &mut dev, &mut tx, &mut rx, &tx_path, &rx_path, 100, &[0, 1], &options(), &signals,
        )
        .unwrap();
        assert!(!underflow);

        let resets = probe.time_resets();
        assert_eq!(resets.len(), 2);
        assert!(resets.iter().all(|(_, t)| *t == TimeSpec::default()));

        let cmds = probe.stream_commands();
        assert_eq!(cmds[0].mode, StreamMode::NumSampsAndDone);
        assert_eq!(cmds[0].num_samps, 100);
        assert_eq!(cmds[0].time_spec, TimeSpec::from_secs(0.005));
        assert!(!cmds[0].stream_now);
        assert_eq!(cmds.last().unwrap().mode, StreamMode::StopContinuous);

        let sent = probe.sent();
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[0].md.time_spec, TimeSpec::from_secs(0.005));
        assert!(sent[0].md.start_of_burst && sent[0].md.has_time_spec);
        assert!(sent[2].md.end_of_burst);
    }

    #[test]
    fn underflow_is_reported_once() {
        let dir = tempfile::tempdir().unwrap();
        let (tx_path, rx_path) = (dir.path().join("tx.dat"), dir.path().join("rx.dat"));
        write_tx(&tx_path, 1, 2500);

        let config = RadioSimulatorConfig {
            num_channels: 1,
            tx_events: vec![(2, AsyncEventCode::Underflow)],
            ..Default::default()
        };
        let mut dev = create_simulator(&config);
        let mut tx = dev.tx_stream(&[0]).unwrap();
        let mut rx = dev.rx_stream(&[0]).unwrap();
        let signals = StreamSignals::new();

        assert!(run_txrx(
            &mut dev, &mut tx, &mut rx, &tx_path, &rx_path, 100, &[0], &options(), &signals,
        )
        .unwrap());
        assert!(!signals.underflow.is_set());
    }

    #[test]
    fn receiver_error_still_joins_tx() {
        let dir = tempfile::tempdir().unwrap();
        let (tx_path, rx_path) = (dir.path().join("tx.dat"), dir.path().join("rx.dat"));
        write_tx(&tx_path, 1, 2500);

        let config = RadioSimulatorConfig {
            num_channels: 1,
            rx_faults: vec![(1, RxErrorCode::LateCommand)],
            ..Default::default()
        };
        let mut dev = create_simulator(&config);
        let mut tx = dev.tx_stream(&[0]).unwrap();
        let mut rx = dev.rx_stream(&[0]).unwrap();
        let signals = StreamSignals::new();

        let err = run_txrx(
            &mut dev, &mut tx, &mut rx, &tx_path, &rx_path, 1000, &[0], &options(), &signals,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsrpError>(),
            Some(UsrpError::Receiver(_))
        ));
        // Stop is cleared so the next run can proceed
        assert!(!signals.stop_requested());
    }

    #[test]
    fn rejects_empty_channel_set() {
        let mut dev = create_simulator(&RadioSimulatorConfig::default());
        let mut tx = dev.tx_stream(&[0]).unwrap();
        let mut rx = dev.rx_stream(&[0]).unwrap();
        let err = run_txrx(
            &mut dev,
            &mut tx,
            &mut rx,
            Path::new("tx.dat"),
            Path::new("rx.dat"),
            10,
            &[],
            &options(),
            &StreamSignals::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsrpError>(),
            Some(UsrpError::Config(_))
        ));
    }

    /// Transmit stream whose first send panics
    struct PanickingTx;

    impl TxStreamer for PanickingTx {
        fn max_num_samps(&self) -> usize {
            100
        }

        fn send(
            &mut self,
            _frame: &Frame,
            _nsamps: usize,
            _md: &BurstMetadata,
            _timeout: f64,
        ) -> Result<usize, Error> {
            panic!("transmit hardware vanished");
        }

        fn recv_async_msg(&mut self, _timeout: f64) -> Option<AsyncMetadata> {
            None
        }
    }

    /// The simulator with its transmit side replaced by `PanickingTx`
    struct PanickingTxDevice(SimulatedDevice);

    impl UsrpDevice for PanickingTxDevice {
        type Tx = PanickingTx;
        type Rx = SimulatedRxStream;

        fn pp_string(&self) -> String {
            self.0.pp_string()
        }
        fn set_clock_source(&mut self, dir: Direction, src: ClockSource) -> Result<(), Error> {
            self.0.set_clock_source(dir, src)
        }
        fn set_rate(&mut self, dir: Direction, rate: f64) -> Result<(), Error> {
            self.0.set_rate(dir, rate)
        }
        fn rate(&self, dir: Direction) -> f64 {
            self.0.rate(dir)
        }
        fn set_freq(&mut self, dir: Direction, freq: f64, ch: usize) -> Result<(), Error> {
            self.0.set_freq(dir, freq, ch)
        }
        fn freq(&self, dir: Direction, ch: usize) -> f64 {
            self.0.freq(dir, ch)
        }
        fn set_gain(&mut self, dir: Direction, gain: f64, ch: usize) -> Result<(), Error> {
            self.0.set_gain(dir, gain, ch)
        }
        fn gain(&self, dir: Direction, ch: usize) -> f64 {
            self.0.gain(dir, ch)
        }
        fn set_rx_agc(&mut self, enable: bool, ch: usize) -> Result<(), Error> {
            self.0.set_rx_agc(enable, ch)
        }
        fn num_channels(&self, dir: Direction) -> usize {
            self.0.num_channels(dir)
        }
        fn set_time_now(&mut self, dir: Direction, now: TimeSpec) -> Result<(), Error> {
            self.0.set_time_now(dir, now)
        }
        fn lo_locked(&self, dir: Direction, ch: usize) -> Result<Option<bool>, Error> {
            self.0.lo_locked(dir, ch)
        }
        fn tx_stream(&mut self, _channels: &[usize]) -> Result<PanickingTx, Error> {
            Ok(PanickingTx)
        }
        fn rx_stream(&mut self, channels: &[usize]) -> Result<SimulatedRxStream, Error> {
            self.0.rx_stream(channels)
        }
        fn set_gpio_attr(
            &mut self,
            bank: &str,
            attr: &str,
            value: u32,
            mask: u32,
        ) -> Result<(), Error> {
            self.0.set_gpio_attr(bank, attr, value, mask)
        }
    }

    fn panicking_device(config: &RadioSimulatorConfig) -> PanickingTxDevice {
        PanickingTxDevice(create_simulator(config))
    }

    #[test]
    fn receiver_error_wins_over_tx_panic() {
        let dir = tempfile::tempdir().unwrap();
        let (tx_path, rx_path) = (dir.path().join("tx.dat"), dir.path().join("rx.dat"));
        write_tx(&tx_path, 1, 2500);

        let config = RadioSimulatorConfig {
            num_channels: 1,
            rx_faults: vec![(1, RxErrorCode::BadPacket)],
            ..Default::default()
        };
        let mut dev = panicking_device(&config);
        let mut tx = dev.tx_stream(&[0]).unwrap();
        let mut rx = dev.rx_stream(&[0]).unwrap();
        let signals = StreamSignals::new();

        let err = run_txrx(
            &mut dev, &mut tx, &mut rx, &tx_path, &rx_path, 100, &[0], &options(), &signals,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsrpError>(),
            Some(UsrpError::Receiver(_))
        ));
        // The stop raised for the receiver error does not outlive the run
        assert!(!signals.stop_requested());
    }

    #[test]
    fn tx_panic_is_reported_and_signals_reset() {
        let dir = tempfile::tempdir().unwrap();
        let (tx_path, rx_path) = (dir.path().join("tx.dat"), dir.path().join("rx.dat"));
        write_tx(&tx_path, 1, 2500);

        let config = RadioSimulatorConfig {
            num_channels: 1,
            ..Default::default()
        };
        let mut dev = panicking_device(&config);
        let mut tx = dev.tx_stream(&[0]).unwrap();
        let mut rx = dev.rx_stream(&[0]).unwrap();
        let signals = StreamSignals::new();
        signals.underflow.set();

        let err = run_txrx(
            &mut dev, &mut tx, &mut rx, &tx_path, &rx_path, 100, &[0], &options(), &signals,
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsrpError>(),
            Some(UsrpError::WorkerPanicked(_))
        ));
        assert!(!signals.stop_requested());
        assert!(!signals.underflow.is_set());
    }

    #[test]
    fn zero_packet_size_is_rejected_before_arming() {
        let config = RadioSimulatorConfig {
            num_channels: 1,
            max_num_samps: 0,
            ..Default::default()
        };
        let mut dev = create_simulator(&config);
        let probe = dev.probe();
        let mut tx = dev.tx_stream(&[0]).unwrap();
        let mut rx = dev.rx_stream(&[0]).unwrap();
        let options = TxRxOptions {
            rx_samps_per_buff: None,
            ..options()
        };

        let err = run_txrx(
            &mut dev,
            &mut tx,
            &mut rx,
            Path::new("tx.dat"),
            Path::new("rx.dat"),
            100,
            &[0],
            &options,
            &StreamSignals::new(),
        )
        .unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UsrpError>(),
            Some(UsrpError::Config(_))
        ));
        assert!(probe.stream_commands().is_empty());
        assert!(probe.time_resets().is_empty());
    }

    #[test]
    fn failed_spawn_disarms_receiver() {
        let mut dev = create_simulator(&RadioSimulatorConfig::default());
        let probe = dev.probe();
        let mut rx = dev.rx_stream(&[0]).unwrap();
        rx.issue_stream_cmd(&StreamCommand::rx_start(100, TimeSpec::from_secs(0.005)))
            .unwrap();

        assert_eq!(disarm_on_err(&mut rx, Ok(7)).unwrap(), 7);
        assert_eq!(probe.stream_commands().len(), 1);

        let failed: io::Result<()> = Err(io::Error::new(io::ErrorKind::Other, "no threads"));
        assert!(disarm_on_err(&mut rx, failed).is_err());
        let cmds = probe.stream_commands();
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[1].mode, StreamMode::StopContinuous);
    }
}
