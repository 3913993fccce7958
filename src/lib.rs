//! Time-aligned multi-channel transmit and receive between a USRP and per-channel sample files.
//!
//! A TX worker streams `<base>NN.<ext>` files out of the radio in one burst while the calling
//! thread records the receive side into the same naming scheme. Both sides start on a common
//! future timestamp. See `Session` and `SessionTable` for the entry points.

mod error;
mod files;
mod frame;
pub mod gpio;
mod metadata;
mod rx;
mod sched;
mod session;
mod signals;
mod simulator;
mod sync;
mod tx;
#[cfg(feature = "uhd")]
mod usrp;

pub use error::UsrpError;
pub use files::{channel_filename, ChannelRead, ReadStatus, SampleReader, SampleWriter};
pub use frame::Frame;
pub use metadata::{
    AsyncEventCode, AsyncMetadata, BurstMetadata, ClockSource, Direction, RxErrorCode,
    RxMetadata, StreamCommand, StreamMode, TimeSpec,
};
pub use rx::{recv_to_file, RxReport, RxSettings};
pub use sched::ThreadPriority;
pub use session::{Session, SessionConfig, SessionHandle, SessionTable};
pub use signals::{StopHandle, StreamSignals, UnderflowFlag};
pub use simulator::{
    create_simulator, RadioSimulatorConfig, SentBurst, SimulatedDevice, SimulatedRxStream,
    SimulatedTxStream, SimulatorProbe,
};
pub use sync::{run_txrx, TxRxOptions};
pub use tx::{send_from_file, TxReport};
#[cfg(feature = "uhd")]
pub use usrp::{Usrp, UsrpRxStream, UsrpTxStream};

use failure::Error;
use num::complex::Complex;

/// Baseband samples are fc32 on the host side
pub type Sample = Complex<f32>;

/// Transmit half of a multi-channel stream
pub trait TxStreamer: Send {
    /// Largest number of samples per channel that fits in one packet
    fn max_num_samps(&self) -> usize;
    /// Send the first `nsamps` samples of every channel in `frame` as one transfer, framed by
    /// `md`. Returns the number of samples per channel accepted by the hardware
    fn send(
        &mut self,
        frame: &Frame,
        nsamps: usize,
        md: &BurstMetadata,
        timeout: f64,
    ) -> Result<usize, Error>;
    /// Wait up to `timeout` seconds for an asynchronous event such as an underflow. A timeout of
    /// 0 polls
    fn recv_async_msg(&mut self, timeout: f64) -> Option<AsyncMetadata>;
}

/// Receive half of a multi-channel stream
pub trait RxStreamer {
    /// Fill up to `frame.samps_per_buff()` samples of every channel. Returns how many samples per
    /// channel are valid, and the status of the call. `Err` means the transport itself failed
    fn recv(&mut self, frame: &mut Frame, timeout: f64) -> Result<(usize, RxMetadata), Error>;
    fn issue_stream_cmd(&mut self, cmd: &StreamCommand) -> Result<(), Error>;
}

/// A connected radio (real or simulated). Channel arguments index the device's channels
pub trait UsrpDevice {
    type Tx: TxStreamer;
    type Rx: RxStreamer;

    /// Description of the device for logging
    fn pp_string(&self) -> String;
    fn set_clock_source(&mut self, dir: Direction, src: ClockSource) -> Result<(), Error>;
    /// Set the sample rate (in samples/sec)
    fn set_rate(&mut self, dir: Direction, rate: f64) -> Result<(), Error>;
    /// Actual sample rate after coercion by the hardware
    fn rate(&self, dir: Direction) -> f64;
    /// Tune channel `ch` to the center frequency `freq` (in Hz)
    fn set_freq(&mut self, dir: Direction, freq: f64, ch: usize) -> Result<(), Error>;
    fn freq(&self, dir: Direction, ch: usize) -> f64;
    /// Set the gain in (uncalibrated) dB
    fn set_gain(&mut self, dir: Direction, gain: f64, ch: usize) -> Result<(), Error>;
    fn gain(&self, dir: Direction, ch: usize) -> f64;
    fn set_rx_agc(&mut self, enable: bool, ch: usize) -> Result<(), Error>;
    fn num_channels(&self, dir: Direction) -> usize;
    fn set_time_now(&mut self, dir: Direction, now: TimeSpec) -> Result<(), Error>;
    /// State of the `lo_locked` sensor, `None` if the board has no such sensor
    fn lo_locked(&self, dir: Direction, ch: usize) -> Result<Option<bool>, Error>;
    fn tx_stream(&mut self, channels: &[usize]) -> Result<Self::Tx, Error>;
    fn rx_stream(&mut self, channels: &[usize]) -> Result<Self::Rx, Error>;
    /// Write `value` to the bits of GPIO attribute `attr` selected by `mask`
    fn set_gpio_attr(&mut self, bank: &str, attr: &str, value: u32, mask: u32)
        -> Result<(), Error>;
}
