//! Test on a simulation of a USRP rather than a real device. `create_simulator` builds a
//! `SimulatedDevice` from a `RadioSimulatorConfig`; its TX stream is looped back into its RX
//! stream. Faults can be scripted so that error paths can be exercised deterministically, and a
//! `SimulatorProbe` shows what the device was asked to do.

use crate::frame::Frame;
use crate::metadata::{
    AsyncEventCode, AsyncMetadata, BurstMetadata, ClockSource, Direction, RxErrorCode,
    RxMetadata, StreamCommand, StreamMode, TimeSpec,
};
use crate::{RxStreamer, Sample, TxStreamer, UsrpDevice};
use failure::{ensure, Error};
use num::Zero;
use rand::distributions::Distribution;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Normal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

/// Gains are coerced into this range (in dB), as a real front end would
const GAIN_RANGE: (f64, f64) = (0., 90.);

#[derive(Clone, Debug)]
pub struct RadioSimulatorConfig {
    /// Number of channels in each direction
    pub num_channels: usize,
    /// Samples per channel that fit in one packet
    pub max_num_samps: usize,
    /// Standard deviation of the gaussian noise added to every received sample
    pub noise: f32,
    /// State of the `lo_locked` sensor. `None` simulates a board without one
    pub lo_locked: Option<bool>,
    /// Seed for the noise generator
    pub seed: u64,
    /// Receive calls (counted from 1 over the life of the RX stream) that report the given error
    /// instead of samples. An overflow consumes the samples it replaces
    pub rx_faults: Vec<(usize, RxErrorCode)>,
    /// Send calls (counted from 1) after which the TX stream reports the given event
    pub tx_events: Vec<(usize, AsyncEventCode)>,
}

impl Default for RadioSimulatorConfig {
    fn default() -> Self {
        RadioSimulatorConfig {
            num_channels: 2,
            max_num_samps: 2000,
            noise: 0.,
            lo_locked: Some(true),
            seed: 0,
            rx_faults: Vec::new(),
            tx_events: Vec::new(),
        }
    }
}

/// One call to `TxStreamer::send` as seen by the simulator
#[derive(Clone, Debug, PartialEq)]
pub struct SentBurst {
    pub nsamps: usize,
    pub md: BurstMetadata,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum RxState {
    Idle,
    /// Streaming until stopped
    Continuous,
    /// This many samples left before the stream finishes
    Remaining(usize),
}

struct SimState {
    rate: HashMap<Direction, f64>,
    freq: HashMap<(Direction, usize), f64>,
    gain: HashMap<(Direction, usize), f64>,
    agc: HashMap<usize, bool>,
    clock_source: HashMap<Direction, ClockSource>,
    time_resets: Vec<(Direction, TimeSpec)>,
    gpio_writes: Vec<(String, String, u32, u32)>,
    sent: Vec<SentBurst>,
    stream_cmds: Vec<StreamCommand>,
    rx_calls: usize,
    /// Samples sent but not yet received, per channel
    loopback: Vec<VecDeque<Sample>>,
}

type Shared = Arc<Mutex<SimState>>;

fn lock(state: &Shared) -> MutexGuard<SimState> {
    state.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct SimulatedDevice {
    config: RadioSimulatorConfig,
    state: Shared,
}

pub struct SimulatedTxStream {
    state: Shared,
    channels: Vec<usize>,
    max_num_samps: usize,
    num_sends: usize,
    scripted_events: HashMap<usize, AsyncEventCode>,
    pending_events: VecDeque<AsyncMetadata>,
}

pub struct SimulatedRxStream {
    state: Shared,
    channels: Vec<usize>,
    rng: StdRng,
    noise: Normal<f32>,
    num_calls: usize,
    faults: HashMap<usize, RxErrorCode>,
    rx_state: RxState,
    /// Device time of the next sample to be returned
    next_time: TimeSpec,
    rate: f64,
}

/// Read-only view of what the simulated device was asked to do
#[derive(Clone)]
pub struct SimulatorProbe {
    state: Shared,
}

pub fn create_simulator(config: &RadioSimulatorConfig) -> SimulatedDevice {
    let state = SimState {
        rate: HashMap::new(),
        freq: HashMap::new(),
        gain: HashMap::new(),
        agc: HashMap::new(),
        clock_source: HashMap::new(),
        time_resets: Vec::new(),
        gpio_writes: Vec::new(),
        sent: Vec::new(),
        stream_cmds: Vec::new(),
        rx_calls: 0,
        loopback: vec![VecDeque::new(); config.num_channels],
    };
    SimulatedDevice {
        config: config.clone(),
        state: Arc::new(Mutex::new(state)),
    }
}

impl SimulatedDevice {
    pub fn probe(&self) -> SimulatorProbe {
        SimulatorProbe {
            state: self.state.clone(),
        }
    }

    fn check_channel(&self, ch: usize) -> Result<(), Error> {
        ensure!(
            ch < self.config.num_channels,
            "Channel {} out of range, device has {} channels",
            ch,
            self.config.num_channels
        );
        Ok(())
    }

    fn check_channels(&self, channels: &[usize]) -> Result<(), Error> {
        ensure!(!channels.is_empty(), "A stream needs at least one channel");
        for &ch in channels {
            self.check_channel(ch)?;
        }
        Ok(())
    }
}

impl UsrpDevice for SimulatedDevice {
    type Tx = SimulatedTxStream;
    type Rx = SimulatedRxStream;

    fn pp_string(&self) -> String {
        format!(
            "Simulated USRP ({} TX / {} RX channels)",
            self.config.num_channels, self.config.num_channels
        )
    }

    fn set_clock_source(&mut self, dir: Direction, src: ClockSource) -> Result<(), Error> {
        lock(&self.state).clock_source.insert(dir, src);
        Ok(())
    }

    fn set_rate(&mut self, dir: Direction, rate: f64) -> Result<(), Error> {
        ensure!(rate > 0., "Invalid sample rate {}", rate);
        lock(&self.state).rate.insert(dir, rate);
        Ok(())
    }

    fn rate(&self, dir: Direction) -> f64 {
        lock(&self.state).rate.get(&dir).copied().unwrap_or(1e6)
    }

    fn set_freq(&mut self, dir: Direction, freq: f64, ch: usize) -> Result<(), Error> {
        self.check_channel(ch)?;
        lock(&self.state).freq.insert((dir, ch), freq);
        Ok(())
    }

    fn freq(&self, dir: Direction, ch: usize) -> f64 {
        lock(&self.state).freq.get(&(dir, ch)).copied().unwrap_or(0.)
    }

    fn set_gain(&mut self, dir: Direction, gain: f64, ch: usize) -> Result<(), Error> {
        self.check_channel(ch)?;
        let gain = gain.max(GAIN_RANGE.0).min(GAIN_RANGE.1);
        lock(&self.state).gain.insert((dir, ch), gain);
        Ok(())
    }

    fn gain(&self, dir: Direction, ch: usize) -> f64 {
        lock(&self.state).gain.get(&(dir, ch)).copied().unwrap_or(0.)
    }

    fn set_rx_agc(&mut self, enable: bool, ch: usize) -> Result<(), Error> {
        self.check_channel(ch)?;
        lock(&self.state).agc.insert(ch, enable);
        Ok(())
    }

    fn num_channels(&self, _dir: Direction) -> usize {
        self.config.num_channels
    }

    fn set_time_now(&mut self, dir: Direction, now: TimeSpec) -> Result<(), Error> {
        lock(&self.state).time_resets.push((dir, now));
        Ok(())
    }

    fn lo_locked(&self, _dir: Direction, ch: usize) -> Result<Option<bool>, Error> {
        self.check_channel(ch)?;
        Ok(self.config.lo_locked)
    }

    fn tx_stream(&mut self, channels: &[usize]) -> Result<SimulatedTxStream, Error> {
        self.check_channels(channels)?;
        Ok(SimulatedTxStream {
            state: self.state.clone(),
            channels: channels.to_vec(),
            max_num_samps: self.config.max_num_samps,
            num_sends: 0,
            scripted_events: self.config.tx_events.iter().copied().collect(),
            pending_events: VecDeque::new(),
        })
    }

    fn rx_stream(&mut self, channels: &[usize]) -> Result<SimulatedRxStream, Error> {
        self.check_channels(channels)?;
        Ok(SimulatedRxStream {
            state: self.state.clone(),
            channels: channels.to_vec(),
            rng: StdRng::seed_from_u64(self.config.seed),
            noise: Normal::new(0., self.config.noise)?,
            num_calls: 0,
            faults: self.config.rx_faults.iter().copied().collect(),
            rx_state: RxState::Idle,
            next_time: TimeSpec::default(),
            rate: self.rate(Direction::Rx),
        })
    }

    fn set_gpio_attr(
        &mut self,
        bank: &str,
        attr: &str,
        value: u32,
        mask: u32,
    ) -> Result<(), Error> {
        lock(&self.state)
            .gpio_writes
            .push((bank.to_string(), attr.to_string(), value, mask));
        Ok(())
    }
}

impl TxStreamer for SimulatedTxStream {
    fn max_num_samps(&self) -> usize {
        self.max_num_samps
    }

    fn send(
        &mut self,
        frame: &Frame,
        nsamps: usize,
        md: &BurstMetadata,
        _timeout: f64,
    ) -> Result<usize, Error> {
        ensure!(
            frame.num_channels() == self.channels.len(),
            "Frame has {} channels, stream has {}",
            frame.num_channels(),
            self.channels.len()
        );
        ensure!(
            nsamps <= frame.samps_per_buff(),
            "Asked to send {} samples from buffers of {}",
            nsamps,
            frame.samps_per_buff()
        );

        self.num_sends += 1;
        {
            let mut state = lock(&self.state);
            for (&ch, buf) in self.channels.iter().zip(frame.channels()) {
                state.loopback[ch].extend(&buf[..nsamps]);
            }
            state.sent.push(SentBurst { nsamps, md: *md });
        }

        if let Some(&event_code) = self.scripted_events.get(&self.num_sends) {
            self.pending_events.push_back(AsyncMetadata {
                channel: self.channels[0],
                event_code,
                time_spec: None,
            });
        }
        Ok(nsamps)
    }

    fn recv_async_msg(&mut self, _timeout: f64) -> Option<AsyncMetadata> {
        self.pending_events.pop_front()
    }
}

impl SimulatedRxStream {
    /// Samples the current stream state allows in one call of capacity `samps_per_buff`
    fn deliverable(&self, samps_per_buff: usize) -> usize {
        match self.rx_state {
            RxState::Idle => 0,
            RxState::Continuous => samps_per_buff,
            RxState::Remaining(n) => n.min(samps_per_buff),
        }
    }

    fn consume(&mut self, n: usize) {
        if let RxState::Remaining(left) = self.rx_state {
            self.rx_state = if left > n {
                RxState::Remaining(left - n)
            } else {
                RxState::Idle
            };
        }
        self.next_time = TimeSpec::from_secs(self.next_time.secs() + n as f64 / self.rate);
    }
}

impl RxStreamer for SimulatedRxStream {
    fn recv(&mut self, frame: &mut Frame, _timeout: f64) -> Result<(usize, RxMetadata), Error> {
        ensure!(
            frame.num_channels() == self.channels.len(),
            "Frame has {} channels, stream has {}",
            frame.num_channels(),
            self.channels.len()
        );
        self.num_calls += 1;
        lock(&self.state).rx_calls += 1;

        let n = self.deliverable(frame.samps_per_buff());
        if let Some(&code) = self.faults.get(&self.num_calls) {
            if code == RxErrorCode::Overflow {
                self.consume(n);
            }
            return Ok((0, RxMetadata::error(code)));
        }
        if n == 0 {
            return Ok((0, RxMetadata::error(RxErrorCode::Timeout)));
        }

        let time_spec = self.next_time;
        {
            let mut state = lock(&self.state);
            for (&ch, buf) in self.channels.iter().zip(frame.channels_mut()) {
                let queue = &mut state.loopback[ch];
                for s in buf[..n].iter_mut() {
                    let noise = Sample::new(
                        self.noise.sample(&mut self.rng),
                        self.noise.sample(&mut self.rng),
                    );
                    *s = queue.pop_front().unwrap_or_else(Sample::zero) + noise;
                }
            }
        }
        self.consume(n);
        Ok((n, RxMetadata::ok(Some(time_spec))))
    }

    fn issue_stream_cmd(&mut self, cmd: &StreamCommand) -> Result<(), Error> {
        lock(&self.state).stream_cmds.push(*cmd);
        match cmd.mode {
            StreamMode::StartContinuous => self.rx_state = RxState::Continuous,
            StreamMode::StopContinuous => self.rx_state = RxState::Idle,
            StreamMode::NumSampsAndDone | StreamMode::NumSampsAndMore => {
                self.rx_state = RxState::Remaining(cmd.num_samps)
            }
        }
        if !cmd.stream_now {
            self.next_time = cmd.time_spec;
        }
        Ok(())
    }
}

impl SimulatorProbe {
    pub fn sent(&self) -> Vec<SentBurst> {
        lock(&self.state).sent.clone()
    }

    /// Number of receive calls over all RX streams of the device
    pub fn rx_calls(&self) -> usize {
        lock(&self.state).rx_calls
    }

    pub fn stream_commands(&self) -> Vec<StreamCommand> {
        lock(&self.state).stream_cmds.clone()
    }

    pub fn time_resets(&self) -> Vec<(Direction, TimeSpec)> {
        lock(&self.state).time_resets.clone()
    }

    /// `(bank, attr, value, mask)` for every GPIO write, in order
    pub fn gpio_writes(&self) -> Vec<(String, String, u32, u32)> {
        lock(&self.state).gpio_writes.clone()
    }

    pub fn clock_source(&self, dir: Direction) -> Option<ClockSource> {
        lock(&self.state).clock_source.get(&dir).copied()
    }

    pub fn agc(&self, ch: usize) -> Option<bool> {
        lock(&self.state).agc.get(&ch).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_returns_sent_samples() {
        let mut dev = create_simulator(&RadioSimulatorConfig::default());
        let mut tx = dev.tx_stream(&[0, 1]).unwrap();
        let mut rx = dev.rx_stream(&[0, 1]).unwrap();

        let mut frame = Frame::new(2, 4);
        for (ch, buf) in frame.channels_mut().enumerate() {
            for (i, s) in buf.iter_mut().enumerate() {
                *s = Sample::new(ch as f32, i as f32);
            }
        }
        let md = BurstMetadata::timed_start(TimeSpec::from_secs(0.));
        assert_eq!(tx.send(&frame, 3, &md, 0.1).unwrap(), 3);

        rx.issue_stream_cmd(&StreamCommand::rx_start(4, TimeSpec::from_secs(0.)))
            .unwrap();
        let mut out = Frame::new(2, 4);
        let (n, md) = rx.recv(&mut out, 0.1).unwrap();
        assert_eq!(n, 4);
        assert_eq!(md.error_code, RxErrorCode::None);
        assert_eq!(out.channel(1)[2], Sample::new(1., 2.));
        // Nothing left in the loopback queue
        assert_eq!(out.channel(1)[3], Sample::zero());

        let (n, md) = rx.recv(&mut out, 0.1).unwrap();
        assert_eq!(n, 0);
        assert_eq!(md.error_code, RxErrorCode::Timeout);
    }

    #[test]
    fn idle_stream_times_out() {
        let mut dev = create_simulator(&RadioSimulatorConfig::default());
        let mut rx = dev.rx_stream(&[0]).unwrap();
        let mut frame = Frame::new(1, 8);
        let (_, md) = rx.recv(&mut frame, 0.1).unwrap();
        assert_eq!(md.error_code, RxErrorCode::Timeout);
    }

    #[test]
    fn scripted_overflow_consumes_buffer() {
        let config = RadioSimulatorConfig {
            rx_faults: vec![(1, RxErrorCode::Overflow)],
            ..Default::default()
        };
        let mut dev = create_simulator(&config);
        let mut rx = dev.rx_stream(&[0]).unwrap();
        rx.issue_stream_cmd(&StreamCommand::rx_start(10, TimeSpec::from_secs(0.)))
            .unwrap();

        let mut frame = Frame::new(1, 8);
        let (n, md) = rx.recv(&mut frame, 0.1).unwrap();
        assert_eq!((n, md.error_code), (0, RxErrorCode::Overflow));
        let (n, _) = rx.recv(&mut frame, 0.1).unwrap();
        assert_eq!(n, 2);
        assert_eq!(dev.probe().rx_calls(), 2);
    }

    #[test]
    fn scripted_tx_events_follow_sends() {
        let config = RadioSimulatorConfig {
            tx_events: vec![(2, AsyncEventCode::Underflow)],
            ..Default::default()
        };
        let mut dev = create_simulator(&config);
        let mut tx = dev.tx_stream(&[0]).unwrap();
        let frame = Frame::new(1, 4);
        let md = BurstMetadata::default();

        tx.send(&frame, 4, &md, 0.1).unwrap();
        assert!(tx.recv_async_msg(0.).is_none());
        tx.send(&frame, 4, &md, 0.1).unwrap();
        assert_eq!(
            tx.recv_async_msg(0.).map(|m| m.event_code),
            Some(AsyncEventCode::Underflow)
        );
        assert_eq!(dev.probe().sent().len(), 2);
    }

    #[test]
    fn gains_are_coerced_and_channels_checked() {
        let mut dev = create_simulator(&RadioSimulatorConfig::default());
        dev.set_gain(Direction::Rx, 120., 1).unwrap();
        assert_eq!(dev.gain(Direction::Rx, 1), 90.);
        assert!(dev.set_gain(Direction::Tx, 10., 5).is_err());
        assert!(dev.rx_stream(&[]).is_err());
    }
}
