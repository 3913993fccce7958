//! Scheduling hints for worker threads

use log::{debug, warn};
use std::io;

/// Requested scheduling class for a worker thread. Applied by the thread to itself
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ThreadPriority {
    /// Leave the inherited scheduling alone
    Default,
    /// Real-time round robin at the middle of the priority range. Needs privileges; without them
    /// a warning is logged and the thread keeps its default priority
    RealTime,
}

impl Default for ThreadPriority {
    fn default() -> Self {
        ThreadPriority::Default
    }
}

impl ThreadPriority {
    /// Apply to the calling thread. Returns whether the request was honoured
    pub fn apply(self) -> bool {
        match self {
            ThreadPriority::Default => true,
            ThreadPriority::RealTime => match set_realtime(0.5) {
                Ok(()) => {
                    debug!("Thread running with real-time priority");
                    true
                }
                Err(e) => {
                    warn!("Unable to set the thread priority: {}", e);
                    false
                }
            },
        }
    }
}

/// `priority` is a fraction of the range between the lowest and highest real-time priority
#[cfg(target_os = "linux")]
fn set_realtime(priority: f32) -> io::Result<()> {
    let policy = libc::SCHED_RR;
    let (min, max) = unsafe {
        (
            libc::sched_get_priority_min(policy),
            libc::sched_get_priority_max(policy),
        )
    };
    if min < 0 || max < 0 {
        return Err(io::Error::last_os_error());
    }
    let param = libc::sched_param {
        sched_priority: min + ((max - min) as f32 * priority) as libc::c_int,
    };
    let ret = unsafe { libc::pthread_setschedparam(libc::pthread_self(), policy, &param) };
    if ret != 0 {
        return Err(io::Error::from_raw_os_error(ret));
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_realtime(_priority: f32) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Other,
        "real-time scheduling is not supported on this platform",
    ))
}
