//! Host identity read from `/proc/sys/kernel` and `/proc/stat`, plus the
//! kernel clock synchronisation state.

use std::path::Path;

use super::parser::parse_global_stat;
use crate::collector::probe::read_string;
use crate::collector::traits::FileSystem;

/// Hostname from `/proc/sys/kernel/hostname`, `"unknown"` if unreadable.
pub fn hostname<F: FileSystem + ?Sized>(fs: &F, proc_path: &Path) -> String {
    let (name, _) = read_string(fs, &proc_path.join("sys/kernel/hostname"));
    let name = name.trim();
    if name.is_empty() {
        "unknown".to_string()
    } else {
        name.to_string()
    }
}

/// `sysname nodename release version machine`, in the order `uname -a` prints them.
pub fn kernel_info<F: FileSystem + ?Sized>(fs: &F, proc_path: &Path) -> String {
    let read = |name: &str| {
        let (s, _) = read_string(fs, &proc_path.join("sys/kernel").join(name));
        s.trim().to_string()
    };
    let sysname = read("ostype");
    if sysname.is_empty() {
        return "unknown".to_string();
    }
    format!(
        "{} {} {} {} {}",
        sysname,
        hostname(fs, proc_path),
        read("osrelease"),
        read("version"),
        std::env::consts::ARCH
    )
}

/// Boot time in Unix seconds (`btime` of `/proc/stat`), 0 if unknown.
pub fn boot_time<F: FileSystem + ?Sized>(fs: &F, proc_path: &Path) -> i64 {
    let (content, _) = read_string(fs, &proc_path.join("stat"));
    parse_global_stat(&content).map(|s| s.btime).unwrap_or(0)
}

/// `adjtimex` return value for an unsynchronised clock.
const TIME_ERROR: i32 = 5;
const STA_UNSYNC: i32 = 0x0040;
/// `offset` is in nanoseconds instead of microseconds.
const STA_NANO: i32 = 0x2000;

/// Kernel clock discipline as reported by `adjtimex(2)`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSync {
    pub synced: bool,
    pub offset_seconds: f64,
    pub max_error_seconds: f64,
}

impl ClockSync {
    /// Interprets a read-only `adjtimex` call. Negative `state` is a failed call.
    pub fn from_timex(state: i32, status: i32, offset: i64, max_error_us: i64) -> Option<Self> {
        if state < 0 {
            return None;
        }
        let offset_seconds = if status & STA_NANO != 0 {
            offset as f64 / 1e9
        } else {
            offset as f64 / 1e6
        };
        Some(Self {
            synced: state != TIME_ERROR && status & STA_UNSYNC == 0,
            offset_seconds,
            max_error_seconds: max_error_us as f64 / 1e6,
        })
    }
}

/// Reads the kernel clock state; `None` where `adjtimex` is unavailable.
pub fn kernel_clock_sync() -> Option<ClockSync> {
    timex::read()
}

#[cfg(all(target_os = "linux", target_pointer_width = "64"))]
mod timex {
    use std::ffi::c_int;

    use super::ClockSync;

    /// `struct timex` of the 64-bit Linux ABI.
    #[repr(C)]
    #[derive(Default)]
    struct Timex {
        modes: u32,
        offset: i64,
        freq: i64,
        maxerror: i64,
        esterror: i64,
        status: i32,
        constant: i64,
        precision: i64,
        tolerance: i64,
        time_sec: i64,
        time_usec: i64,
        tick: i64,
        ppsfreq: i64,
        jitter: i64,
        shift: i32,
        stabil: i64,
        jitcnt: i64,
        calcnt: i64,
        errcnt: i64,
        stbcnt: i64,
        tai: i32,
        reserved: [i32; 11],
    }

    unsafe extern "C" {
        fn adjtimex(buf: *mut Timex) -> c_int;
    }

    pub fn read() -> Option<ClockSync> {
        // modes = 0: query only, nothing is adjusted
        let mut tx = Timex::default();
        // SAFETY: `tx` is a properly laid out, writable `struct timex`.
        let state = unsafe { adjtimex(&mut tx) };
        ClockSync::from_timex(state, tx.status, tx.offset, tx.maxerror)
    }
}

#[cfg(not(all(target_os = "linux", target_pointer_width = "64")))]
mod timex {
    use super::ClockSync;

    pub fn read() -> Option<ClockSync> {
        None
    }
}
