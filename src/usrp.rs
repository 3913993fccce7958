//! Real hardware through libuhd. The C shim in `wrapper.cpp` catches every UHD exception and
//! reports it through `usrp_last_error`.

#[allow(dead_code, non_camel_case_types, non_snake_case, non_upper_case_globals)]
mod ffi {
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
}

use crate::frame::Frame;
use crate::metadata::{
    AsyncEventCode, AsyncMetadata, BurstMetadata, ClockSource, Direction, RxErrorCode,
    RxMetadata, StreamCommand, TimeSpec,
};
use crate::{RxStreamer, TxStreamer, UsrpDevice};
use failure::{format_err, Error};
use std::ffi::{c_void, CStr, CString};
use std::os::raw::c_char;

/// Message of the last failed shim call on this thread
fn last_error() -> String {
    unsafe {
        let msg = ffi::usrp_last_error();
        if msg.is_null() {
            return "unknown error".to_string();
        }
        CStr::from_ptr(msg).to_string_lossy().into_owned()
    }
}

fn check(ret: i32, what: &str) -> Result<(), Error> {
    if ret < 0 {
        return Err(format_err!("Error in {}: {}", what, last_error()));
    }
    Ok(())
}

fn is_tx(dir: Direction) -> bool {
    dir == Direction::Tx
}

/// A multi_usrp device, used for both directions
pub struct Usrp {
    usrp: *mut ffi::UsrpHandle,
}

/// Multi-channel transmit streamer
pub struct UsrpTxStream {
    stream: *mut ffi::TxStreamHandle,
    ptrs: Vec<*const c_void>,
}

/// Multi-channel receive streamer
pub struct UsrpRxStream {
    stream: *mut ffi::RxStreamHandle,
    ptrs: Vec<*mut c_void>,
}

// The handles are owned exclusively and UHD streamers may be used from any one thread at a time
unsafe impl Send for Usrp {}
unsafe impl Send for UsrpTxStream {}
unsafe impl Send for UsrpRxStream {}

impl Usrp {
    /// Connect to the USRP at `args`, e.g. `addr=192.168.10.2`. Empty args finds the first device
    pub fn open(args: &str) -> Result<Self, Error> {
        let args = CString::new(args)?;
        let usrp = unsafe { ffi::usrp_make(args.as_ptr()) };
        if usrp.is_null() {
            return Err(format_err!("Failed to open USRP: {}", last_error()));
        }
        Ok(Usrp { usrp })
    }
}

impl UsrpDevice for Usrp {
    type Tx = UsrpTxStream;
    type Rx = UsrpRxStream;

    fn pp_string(&self) -> String {
        let mut buf = vec![0 as c_char; 4096];
        let ret = unsafe { ffi::usrp_pp_string(self.usrp, buf.as_mut_ptr(), buf.len()) };
        if ret < 0 {
            return format!("<unknown device: {}>", last_error());
        }
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned()
    }

    /// There is one clock per motherboard, so both directions share it
    fn set_clock_source(&mut self, _dir: Direction, src: ClockSource) -> Result<(), Error> {
        check(
            unsafe { ffi::usrp_set_clock_source(self.usrp, src.as_raw(), 0) },
            "setting clock source",
        )
    }

    fn set_rate(&mut self, dir: Direction, rate: f64) -> Result<(), Error> {
        check(
            unsafe { ffi::usrp_set_rate(self.usrp, is_tx(dir), rate) },
            "setting sample rate",
        )
    }

    fn rate(&self, dir: Direction) -> f64 {
        unsafe { ffi::usrp_get_rate(self.usrp, is_tx(dir)) }
    }

    fn set_freq(&mut self, dir: Direction, freq: f64, ch: usize) -> Result<(), Error> {
        check(
            unsafe { ffi::usrp_set_freq(self.usrp, is_tx(dir), freq, ch) },
            "tuning",
        )
    }

    fn freq(&self, dir: Direction, ch: usize) -> f64 {
        unsafe { ffi::usrp_get_freq(self.usrp, is_tx(dir), ch) }
    }

    fn set_gain(&mut self, dir: Direction, gain: f64, ch: usize) -> Result<(), Error> {
        check(
            unsafe { ffi::usrp_set_gain(self.usrp, is_tx(dir), gain, ch) },
            "setting gain",
        )
    }

    fn gain(&self, dir: Direction, ch: usize) -> f64 {
        unsafe { ffi::usrp_get_gain(self.usrp, is_tx(dir), ch) }
    }

    fn set_rx_agc(&mut self, enable: bool, ch: usize) -> Result<(), Error> {
        check(
            unsafe { ffi::usrp_set_rx_agc(self.usrp, enable, ch) },
            "setting rx agc",
        )
    }

    fn num_channels(&self, dir: Direction) -> usize {
        unsafe { ffi::usrp_num_channels(self.usrp, is_tx(dir)) }
    }

    /// There is one time base per motherboard, so both directions share it
    fn set_time_now(&mut self, _dir: Direction, now: TimeSpec) -> Result<(), Error> {
        check(
            unsafe { ffi::usrp_set_time_now(self.usrp, now.secs()) },
            "setting device time",
        )
    }

    fn lo_locked(&self, dir: Direction, ch: usize) -> Result<Option<bool>, Error> {
        match unsafe { ffi::usrp_lo_locked(self.usrp, is_tx(dir), ch) } {
            1 => Ok(Some(true)),
            0 => Ok(Some(false)),
            -1 => Ok(None),
            _ => Err(format_err!("Error reading lo_locked sensor: {}", last_error())),
        }
    }

    fn tx_stream(&mut self, channels: &[usize]) -> Result<UsrpTxStream, Error> {
        let stream =
            unsafe { ffi::usrp_get_tx_stream(self.usrp, channels.as_ptr(), channels.len()) };
        if stream.is_null() {
            return Err(format_err!("Failed to create tx stream: {}", last_error()));
        }
        Ok(UsrpTxStream {
            stream,
            ptrs: Vec::with_capacity(channels.len()),
        })
    }

    fn rx_stream(&mut self, channels: &[usize]) -> Result<UsrpRxStream, Error> {
        let stream =
            unsafe { ffi::usrp_get_rx_stream(self.usrp, channels.as_ptr(), channels.len()) };
        if stream.is_null() {
            return Err(format_err!("Failed to create rx stream: {}", last_error()));
        }
        Ok(UsrpRxStream {
            stream,
            ptrs: Vec::with_capacity(channels.len()),
        })
    }

    fn set_gpio_attr(
        &mut self,
        bank: &str,
        attr: &str,
        value: u32,
        mask: u32,
    ) -> Result<(), Error> {
        let bank = CString::new(bank)?;
        let attr = CString::new(attr)?;
        check(
            unsafe {
                ffi::usrp_set_gpio_attr(self.usrp, bank.as_ptr(), attr.as_ptr(), value, mask)
            },
            "setting gpio attribute",
        )
    }
}

impl TxStreamer for UsrpTxStream {
    fn max_num_samps(&self) -> usize {
        unsafe { ffi::tx_stream_max_num_samps(self.stream) }
    }

    /// `Complex<f32>` has the same layout as UHD's fc32, so the buffers are handed over as is
    fn send(
        &mut self,
        frame: &Frame,
        nsamps: usize,
        md: &BurstMetadata,
        timeout: f64,
    ) -> Result<usize, Error> {
        let nsamps = nsamps.min(frame.samps_per_buff());
        self.ptrs.clear();
        self.ptrs
            .extend(frame.channels().map(|c| c.as_ptr() as *const c_void));
        let sent = unsafe {
            ffi::tx_stream_send(
                self.stream,
                self.ptrs.as_ptr(),
                nsamps,
                md.start_of_burst,
                md.end_of_burst,
                md.has_time_spec,
                md.time_spec.secs(),
                timeout,
            )
        };
        if sent < 0 {
            return Err(format_err!("Error in transmission: {}", last_error()));
        }
        Ok(sent as usize)
    }

    fn recv_async_msg(&mut self, timeout: f64) -> Option<AsyncMetadata> {
        let mut event_code = 0;
        let ret = unsafe { ffi::tx_stream_recv_async_msg(self.stream, timeout, &mut event_code) };
        if ret == 1 {
            Some(AsyncMetadata {
                channel: 0,
                event_code: AsyncEventCode::from_raw(event_code),
                time_spec: None,
            })
        } else {
            None
        }
    }
}

impl RxStreamer for UsrpRxStream {
    fn recv(&mut self, frame: &mut Frame, timeout: f64) -> Result<(usize, RxMetadata), Error> {
        let nsamps = frame.samps_per_buff();
        self.ptrs.clear();
        self.ptrs
            .extend(frame.channels_mut().map(|c| c.as_mut_ptr() as *mut c_void));

        let mut error_code = 0;
        let mut has_time_spec = false;
        let mut time_spec = 0.;
        let received = unsafe {
            ffi::rx_stream_recv(
                self.stream,
                self.ptrs.as_ptr(),
                nsamps,
                timeout,
                &mut error_code,
                &mut has_time_spec,
                &mut time_spec,
            )
        };
        if received < 0 {
            return Err(format_err!("Error in receiving: {}", last_error()));
        }
        let md = RxMetadata {
            error_code: RxErrorCode::from_raw(error_code),
            time_spec: if has_time_spec {
                Some(TimeSpec::from_secs(time_spec))
            } else {
                None
            },
        };
        Ok((received as usize, md))
    }

    fn issue_stream_cmd(&mut self, cmd: &StreamCommand) -> Result<(), Error> {
        check(
            unsafe {
                ffi::rx_stream_issue_stream_cmd(
                    self.stream,
                    cmd.mode.as_raw(),
                    cmd.num_samps,
                    cmd.stream_now,
                    cmd.time_spec.secs(),
                )
            },
            "issuing stream command",
        )
    }
}

impl Drop for Usrp {
    fn drop(&mut self) {
        unsafe { ffi::usrp_free(self.usrp) }
    }
}

impl Drop for UsrpTxStream {
    fn drop(&mut self) {
        unsafe { ffi::tx_stream_free(self.stream) }
    }
}

impl Drop for UsrpRxStream {
    fn drop(&mut self) {
        unsafe { ffi::rx_stream_free(self.stream) }
    }
}
