//! Sessions: a configured device with its TX and RX streams, and the table that hands out
//! opaque handles to them.

use crate::error::UsrpError;
use crate::gpio::{self, SpiTiming};
use crate::metadata::{ClockSource, Direction};
use crate::signals::{StopHandle, StreamSignals};
use crate::sync::{run_txrx, TxRxOptions};
use crate::UsrpDevice;
use failure::Error;
use log::{debug, info};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Parameters for opening a session
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    /// Channels `0..num_channels` are used in both directions
    pub num_channels: usize,
    /// Sample rate (in samples/sec) in both directions
    pub sample_rate: f64,
    /// Center frequency (in Hz) of every channel
    pub center_freq: f64,
    /// Gain in (uncalibrated) dB
    pub tx_gain: f64,
    pub rx_gain: f64,
    /// Device address, e.g. `addr=192.168.10.2`. Empty picks the first device found
    pub address: String,
    pub clock_source: ClockSource,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            num_channels: 1,
            sample_rate: 1e6,
            center_freq: 2.4e9,
            tx_gain: 0.,
            rx_gain: 0.,
            address: String::new(),
            clock_source: ClockSource::Internal,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), UsrpError> {
        if self.num_channels == 0 {
            return Err(UsrpError::config("num_channels must be at least 1"));
        }
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.) {
            return Err(UsrpError::config(format!(
                "sample rate must be positive, got {}",
                self.sample_rate
            )));
        }
        if !(self.center_freq.is_finite() && self.center_freq > 0.) {
            return Err(UsrpError::config(format!(
                "center frequency must be positive, got {}",
                self.center_freq
            )));
        }
        if !self.tx_gain.is_finite() || !self.rx_gain.is_finite() {
            return Err(UsrpError::config("gains must be finite"));
        }
        Ok(())
    }
}

/// A configured device and its streams over channels `0..num_channels`
pub struct Session<D: UsrpDevice> {
    device: D,
    tx_stream: D::Tx,
    rx_stream: D::Rx,
    channels: Vec<usize>,
    signals: StreamSignals,
    options: TxRxOptions,
    spi_timing: SpiTiming,
}

impl<D: UsrpDevice> Session<D> {
    /// Configure `device` according to `config` and create its streams. Fails if the
    /// configuration is invalid or the TX LO does not lock
    pub fn start(mut device: D, config: &SessionConfig) -> Result<Self, Error> {
        config.validate()?;
        for &dir in &[Direction::Tx, Direction::Rx] {
            let available = device.num_channels(dir);
            if config.num_channels > available {
                return Err(UsrpError::config(format!(
                    "{} channels requested but the device has {} {} channels",
                    config.num_channels, available, dir
                ))
                .into());
            }
        }
        let channels: Vec<usize> = (0..config.num_channels).collect();

        device.set_clock_source(Direction::Tx, config.clock_source)?;
        device.set_clock_source(Direction::Rx, config.clock_source)?;
        info!("Using Device: {}", device.pp_string());

        device.set_rate(Direction::Tx, config.sample_rate)?;
        device.set_rate(Direction::Rx, config.sample_rate)?;
        info!("Actual TX Rate: {} Msps", device.rate(Direction::Tx) / 1e6);
        info!("Actual RX Rate: {} Msps", device.rate(Direction::Rx) / 1e6);

        for &ch in &channels {
            device.set_freq(Direction::Tx, config.center_freq, ch)?;
            info!("Actual TX Freq: {} MHz", device.freq(Direction::Tx, ch) / 1e6);
            device.set_gain(Direction::Tx, config.tx_gain, ch)?;
        }
        for &ch in &channels {
            device.set_freq(Direction::Rx, config.center_freq, ch)?;
            info!("Actual RX Freq: {} MHz", device.freq(Direction::Rx, ch) / 1e6);
            device.set_gain(Direction::Rx, config.rx_gain, ch)?;
            info!("Actual RX Gain: {} dB", device.gain(Direction::Rx, ch));
        }

        let tx_stream = device.tx_stream(&channels)?;
        let rx_stream = device.rx_stream(&channels)?;

        // Ensure LO is locked
        if device.lo_locked(Direction::Tx, 0)? == Some(false) {
            return Err(UsrpError::LoUnlocked {
                direction: Direction::Tx,
                channel: 0,
            }
            .into());
        }

        Ok(Session {
            device,
            tx_stream,
            rx_stream,
            channels,
            signals: StreamSignals::new(),
            options: TxRxOptions::default(),
            spi_timing: SpiTiming::default(),
        })
    }

    pub fn with_options(mut self, options: TxRxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_spi_timing(mut self, spi_timing: SpiTiming) -> Self {
        self.spi_timing = spi_timing;
        self
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    /// Handle that stops an in-flight `run_txrx` at the next loop iteration of each worker
    pub fn stop_handle(&self) -> StopHandle {
        self.signals.stop.clone()
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Transmit from `tx_path` while recording `num_samples` samples per channel to `rx_path`.
    /// Returns whether the transmitter underflowed
    pub fn run_txrx(
        &mut self,
        tx_path: &Path,
        rx_path: &Path,
        num_samples: usize,
        num_channels: usize,
    ) -> Result<bool, Error> {
        if num_channels != self.channels.len() {
            return Err(UsrpError::config(format!(
                "run asked for {} channels but the session streams {}",
                num_channels,
                self.channels.len()
            ))
            .into());
        }
        run_txrx(
            &mut self.device,
            &mut self.tx_stream,
            &mut self.rx_stream,
            tx_path,
            rx_path,
            num_samples,
            &self.channels,
            &self.options,
            &self.signals,
        )
    }

    /// Set the gain of every channel in `dir`. `agc_enabled` only applies to RX
    pub fn set_gain(&mut self, dir: Direction, gain: f64, agc_enabled: bool) -> Result<(), Error> {
        if !gain.is_finite() {
            return Err(UsrpError::config(format!("invalid gain {}", gain)).into());
        }
        for ch in 0..self.device.num_channels(dir) {
            self.device.set_gain(dir, gain, ch)?;
            if dir == Direction::Rx {
                self.device.set_rx_agc(agc_enabled, ch)?;
            }
        }
        debug!("{} gain set to {} dB (agc {})", dir, gain, agc_enabled);
        Ok(())
    }

    /// Current gain of every channel in `dir`
    pub fn gain(&self, dir: Direction) -> Vec<f64> {
        (0..self.device.num_channels(dir))
            .map(|ch| self.device.gain(dir, ch))
            .collect()
    }

    pub fn arm_trigger(&mut self) -> Result<(), Error> {
        gpio::arm_trigger(&mut self.device)
    }

    pub fn disarm_trigger(&mut self) -> Result<(), Error> {
        gpio::disarm_trigger(&mut self.device)
    }

    pub fn spi_transfer(&mut self, bytes: &[u8]) -> Result<(), Error> {
        gpio::spi_transfer(&mut self.device, bytes, &self.spi_timing)
    }
}

/// Opaque identifier of a session in a `SessionTable`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionHandle(u64);

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

type Connector<D> = Box<dyn Fn(&str) -> Result<D, Error> + Send>;

/// Owns every open session. Handles are never reused, and a session is dropped (closing its
/// streams) only by `teardown`
pub struct SessionTable<D: UsrpDevice> {
    connect: Connector<D>,
    sessions: HashMap<SessionHandle, Session<D>>,
    next_handle: u64,
    options: TxRxOptions,
}

impl<D: UsrpDevice> SessionTable<D> {
    /// `connect` opens the device at the given address
    pub fn new<F>(connect: F) -> Self
    where
        F: Fn(&str) -> Result<D, Error> + Send + 'static,
    {
        SessionTable {
            connect: Box::new(connect),
            sessions: HashMap::new(),
            next_handle: 1,
            options: TxRxOptions::default(),
        }
    }

    /// Options given to every session started from now on
    pub fn with_options(mut self, options: TxRxOptions) -> Self {
        self.options = options;
        self
    }

    pub fn start_session(
        &mut self,
        num_channels: usize,
        sample_rate: f64,
        center_freq: f64,
        tx_gain: f64,
        rx_gain: f64,
        address: &str,
    ) -> Result<SessionHandle, Error> {
        let config = SessionConfig {
            num_channels,
            sample_rate,
            center_freq,
            tx_gain,
            rx_gain,
            address: address.to_string(),
            ..Default::default()
        };
        self.start_session_with(&config)
    }

    pub fn start_session_with(&mut self, config: &SessionConfig) -> Result<SessionHandle, Error> {
        config.validate()?;
        let device = (self.connect)(&config.address)?;
        let session = Session::start(device, config)?.with_options(self.options);

        let handle = SessionHandle(self.next_handle);
        self.next_handle += 1;
        self.sessions.insert(handle, session);
        info!("Started session {}", handle);
        Ok(handle)
    }

    pub fn session(&self, handle: SessionHandle) -> Result<&Session<D>, Error> {
        self.sessions
            .get(&handle)
            .ok_or_else(|| UsrpError::InvalidHandle(handle).into())
    }

    pub fn session_mut(&mut self, handle: SessionHandle) -> Result<&mut Session<D>, Error> {
        self.sessions
            .get_mut(&handle)
            .ok_or_else(|| UsrpError::InvalidHandle(handle).into())
    }

    pub fn run_txrx(
        &mut self,
        handle: SessionHandle,
        tx_path: &Path,
        rx_path: &Path,
        num_samples: usize,
        num_channels: usize,
    ) -> Result<bool, Error> {
        self.session_mut(handle)?
            .run_txrx(tx_path, rx_path, num_samples, num_channels)
    }

    pub fn set_gain(
        &mut self,
        handle: SessionHandle,
        dir: Direction,
        gain: f64,
        agc_enabled: bool,
    ) -> Result<(), Error> {
        self.session_mut(handle)?.set_gain(dir, gain, agc_enabled)
    }

    pub fn get_gain(&self, handle: SessionHandle, dir: Direction) -> Result<Vec<f64>, Error> {
        Ok(self.session(handle)?.gain(dir))
    }

    pub fn stop_handle(&self, handle: SessionHandle) -> Result<StopHandle, Error> {
        Ok(self.session(handle)?.stop_handle())
    }

    pub fn arm_trigger(&mut self, handle: SessionHandle) -> Result<(), Error> {
        self.session_mut(handle)?.arm_trigger()
    }

    pub fn disarm_trigger(&mut self, handle: SessionHandle) -> Result<(), Error> {
        self.session_mut(handle)?.disarm_trigger()
    }

    pub fn spi_transfer(&mut self, handle: SessionHandle, bytes: &[u8]) -> Result<(), Error> {
        self.session_mut(handle)?.spi_transfer(bytes)
    }

    pub fn teardown(&mut self, handle: SessionHandle) -> Result<(), Error> {
        self.sessions
            .remove(&handle)
            .ok_or(UsrpError::InvalidHandle(handle))?;
        info!("Tore down session {}", handle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
