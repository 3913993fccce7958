//! Metadata that travels alongside sample buffers across the hardware boundary. Numeric codes
//! follow UHD so that backends can pass them through unchanged.

use std::fmt;

/// Which half of the radio a setting applies to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    Tx,
    Rx,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Direction::Tx => write!(f, "TX"),
            Direction::Rx => write!(f, "RX"),
        }
    }
}

/// Various ways the usrp can take its clock
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClockSource {
    Internal,
    /// Make this one's clock a slave to the one it is connected to, via a MIMO cable (if
    /// available)
    Mimo,
    /// From an external (10MHz) clock source
    External,
    /// A GPS disciplined clock (if available)
    Gpsdo,
}

impl ClockSource {
    pub fn as_raw(self) -> i32 {
        match self {
            ClockSource::Internal => 0,
            ClockSource::Mimo => 1,
            ClockSource::External => 2,
            ClockSource::Gpsdo => 3,
        }
    }
}

impl Default for ClockSource {
    fn default() -> Self {
        ClockSource::Internal
    }
}

/// A point on the device time base, in seconds since the last `set_time_now`
#[derive(Clone, Copy, Debug, Default, PartialEq, PartialOrd)]
pub struct TimeSpec(f64);

impl TimeSpec {
    pub fn from_secs(secs: f64) -> Self {
        TimeSpec(secs)
    }

    pub fn secs(self) -> f64 {
        self.0
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:.6}s", self.0)
    }
}

/// Framing flags attached to every transmitted buffer.
///
/// A burst starts with `start_of_burst` and a time spec so that the hardware holds the first
/// samples until the device clock reaches `time_spec`. Once the first buffer has been handed to
/// the hardware both flags are cleared for good. `end_of_burst` is terminal.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BurstMetadata {
    pub start_of_burst: bool,
    pub end_of_burst: bool,
    pub has_time_spec: bool,
    pub time_spec: TimeSpec,
}

impl BurstMetadata {
    /// Metadata for the first buffer of a burst that should go out at `start_time`
    pub fn timed_start(start_time: TimeSpec) -> Self {
        BurstMetadata {
            start_of_burst: true,
            end_of_burst: false,
            has_time_spec: true,
            time_spec: start_time,
        }
    }

    /// Called after every send. Idempotent after the first call
    pub fn clear_start(&mut self) {
        self.start_of_burst = false;
        self.has_time_spec = false;
    }
}

/// Asynchronous event reported by the transmit side of the hardware
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AsyncEventCode {
    BurstAck,
    Underflow,
    SeqError,
    TimeError,
    UnderflowInPacket,
    SeqErrorInBurst,
    UserPayload,
    Unknown(i32),
}

impl AsyncEventCode {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0x1 => AsyncEventCode::BurstAck,
            0x2 => AsyncEventCode::Underflow,
            0x4 => AsyncEventCode::SeqError,
            0x8 => AsyncEventCode::TimeError,
            0x10 => AsyncEventCode::UnderflowInPacket,
            0x20 => AsyncEventCode::SeqErrorInBurst,
            0x40 => AsyncEventCode::UserPayload,
            other => AsyncEventCode::Unknown(other),
        }
    }

    /// True for the events that mean the hardware ran out of samples to send
    pub fn is_underflow(self) -> bool {
        matches!(
            self,
            AsyncEventCode::Underflow | AsyncEventCode::UnderflowInPacket
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AsyncMetadata {
    pub channel: usize,
    pub event_code: AsyncEventCode,
    pub time_spec: Option<TimeSpec>,
}

/// Per-call status of a receive
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RxErrorCode {
    None,
    Timeout,
    LateCommand,
    BrokenChain,
    Overflow,
    Alignment,
    BadPacket,
    Unknown(i32),
}

impl RxErrorCode {
    pub fn from_raw(code: i32) -> Self {
        match code {
            0x0 => RxErrorCode::None,
            0x1 => RxErrorCode::Timeout,
            0x2 => RxErrorCode::LateCommand,
            0x4 => RxErrorCode::BrokenChain,
            0x8 => RxErrorCode::Overflow,
            0xc => RxErrorCode::Alignment,
            0xf => RxErrorCode::BadPacket,
            other => RxErrorCode::Unknown(other),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RxMetadata {
    pub error_code: RxErrorCode,
    pub time_spec: Option<TimeSpec>,
}

impl RxMetadata {
    pub fn ok(time_spec: Option<TimeSpec>) -> Self {
        RxMetadata {
            error_code: RxErrorCode::None,
            time_spec,
        }
    }

    pub fn error(error_code: RxErrorCode) -> Self {
        RxMetadata {
            error_code,
            time_spec: None,
        }
    }

    /// Human readable description of `error_code`
    pub fn strerror(&self) -> String {
        match self.error_code {
            RxErrorCode::None => "ERROR_CODE_NONE".to_string(),
            RxErrorCode::Timeout => "ERROR_CODE_TIMEOUT: No packet received".to_string(),
            RxErrorCode::LateCommand => {
                "ERROR_CODE_LATE_COMMAND: Stream command arrived after its time spec".to_string()
            }
            RxErrorCode::BrokenChain => {
                "ERROR_CODE_BROKEN_CHAIN: Expected another stream command".to_string()
            }
            RxErrorCode::Overflow => {
                "ERROR_CODE_OVERFLOW: Internal receive buffer filled".to_string()
            }
            RxErrorCode::Alignment => {
                "ERROR_CODE_ALIGNMENT: Multi-channel alignment failed".to_string()
            }
            RxErrorCode::BadPacket => "ERROR_CODE_BAD_PACKET: Packet could not be parsed".to_string(),
            RxErrorCode::Unknown(code) => format!("ERROR_CODE_UNKNOWN: 0x{:x}", code),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StreamMode {
    StartContinuous,
    StopContinuous,
    NumSampsAndDone,
    NumSampsAndMore,
}

impl StreamMode {
    pub fn as_raw(self) -> i32 {
        let c = match self {
            StreamMode::StartContinuous => 'a',
            StreamMode::StopContinuous => 'o',
            StreamMode::NumSampsAndDone => 'd',
            StreamMode::NumSampsAndMore => 'm',
        };
        c as i32
    }
}

/// Command telling the receive side of the hardware when and how much to stream
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamCommand {
    pub mode: StreamMode,
    pub num_samps: usize,
    pub stream_now: bool,
    pub time_spec: TimeSpec,
}

impl StreamCommand {
    /// Start receiving `num_samps` samples (0 means until stopped) once the device clock reaches
    /// `at`. The hardware waits for the timestamp rather than starting immediately
    pub fn rx_start(num_samps: usize, at: TimeSpec) -> Self {
        let mode = if num_samps == 0 {
            StreamMode::StartContinuous
        } else {
            StreamMode::NumSampsAndDone
        };
        StreamCommand {
            mode,
            num_samps,
            stream_now: false,
            time_spec: at,
        }
    }

    pub fn stop() -> Self {
        StreamCommand {
            mode: StreamMode::StopContinuous,
            num_samps: 0,
            stream_now: true,
            time_spec: TimeSpec::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn burst_metadata_lifecycle() {
        let mut md = BurstMetadata::timed_start(TimeSpec::from_secs(0.005));
        assert!(md.start_of_burst && md.has_time_spec && !md.end_of_burst);
        md.clear_start();
        md.clear_start();
        assert!(!md.start_of_burst && !md.has_time_spec);
        assert_eq!(md.time_spec, TimeSpec::from_secs(0.005));
    }

    #[test]
    fn event_codes_match_uhd() {
        assert_eq!(AsyncEventCode::from_raw(0x2), AsyncEventCode::Underflow);
        assert_eq!(AsyncEventCode::from_raw(0x10), AsyncEventCode::UnderflowInPacket);
        assert_eq!(AsyncEventCode::from_raw(0x3), AsyncEventCode::Unknown(3));
        assert!(AsyncEventCode::UnderflowInPacket.is_underflow());
        assert!(!AsyncEventCode::SeqError.is_underflow());

        assert_eq!(RxErrorCode::from_raw(0x8), RxErrorCode::Overflow);
        assert_eq!(RxErrorCode::from_raw(0xc), RxErrorCode::Alignment);
    }

    #[test]
    fn rx_start_waits_for_timestamp() {
        let cmd = StreamCommand::rx_start(100, TimeSpec::from_secs(0.005));
        assert_eq!(cmd.mode, StreamMode::NumSampsAndDone);
        assert!(!cmd.stream_now);

        let cmd = StreamCommand::rx_start(0, TimeSpec::from_secs(0.005));
        assert_eq!(cmd.mode, StreamMode::StartContinuous);
        assert_eq!(StreamMode::StopContinuous.as_raw(), 'o' as i32);
    }
}
