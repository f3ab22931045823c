//! FFI boundary to the DekTec ASI wrapper library (`libdektec`)

use std::ffi::{c_char, c_int, c_void, CStr};

use contracts::OutputError;
use parking_lot::Mutex;
use tracing::{error, info};

use super::asi::{AsiDriver, AsiDriverStats};

#[repr(C)]
#[derive(Default)]
struct DektecAsiStats {
    fifo_bytes: c_int,
    bytes_written: usize,
    bytes_since_last_call: usize,
}

type LogCallback = extern "C" fn(cookie: *mut c_void, is_error: bool, message: *const c_char);

#[link(name = "dektec")]
extern "C" {
    fn setup_dektec_asi_output(
        device_port_no: c_int,
        bitrate: c_int,
        log_cb: LogCallback,
        log_cb_cookie: *mut c_void,
    ) -> *mut c_void;
    fn dektec_asi_destroy(ctx: *mut c_void);
    fn dektec_asi_write(ctx: *mut c_void, buf: *const c_char, count: usize) -> isize;
    fn dektec_asi_get_stats(ctx: *mut c_void, stats: *mut DektecAsiStats);
}

/// Cookie carries the port number, no allocation behind it
extern "C" fn log_callback(cookie: *mut c_void, is_error: bool, message: *const c_char) {
    if message.is_null() {
        return;
    }
    let port = cookie as usize;
    // SAFETY: the library passes a NUL-terminated message valid for the call
    let message = unsafe { CStr::from_ptr(message) }.to_string_lossy();
    let message = message.trim_end();
    if is_error {
        error!(module = "dektec-asi-output", port, "{message}");
    } else {
        info!(module = "dektec-asi-output", port, "{message}");
    }
}

struct RawContext(*mut c_void);

// SAFETY: the context is only touched under the driver mutex
unsafe impl Send for RawContext {}

pub(crate) struct DektecDriver {
    ctx: Mutex<RawContext>,
}

impl DektecDriver {
    pub(crate) fn open(port: u16, bitrate: u64) -> Option<Self> {
        let bitrate = c_int::try_from(bitrate).ok()?;
        // SAFETY: plain FFI call; the callback is a static function
        let ctx = unsafe {
            setup_dektec_asi_output(
                c_int::from(port),
                bitrate,
                log_callback,
                usize::from(port) as *mut c_void,
            )
        };
        if ctx.is_null() {
            return None;
        }
        Some(Self {
            ctx: Mutex::new(RawContext(ctx)),
        })
    }
}

impl AsiDriver for DektecDriver {
    fn write(&self, data: &[u8]) -> Result<usize, OutputError> {
        let ctx = self.ctx.lock();
        if ctx.0.is_null() {
            return Err(OutputError::Closed);
        }
        // SAFETY: ctx is live while the lock is held; data outlives the call
        let written = unsafe { dektec_asi_write(ctx.0, data.as_ptr() as *const c_char, data.len()) };
        usize::try_from(written)
            .map_err(|_| OutputError::Driver(format!("dektec_asi_write returned {written}")))
    }

    fn stats(&self) -> AsiDriverStats {
        let ctx = self.ctx.lock();
        if ctx.0.is_null() {
            return AsiDriverStats::default();
        }
        let mut raw = DektecAsiStats::default();
        // SAFETY: ctx is live and raw is a valid out-pointer
        unsafe { dektec_asi_get_stats(ctx.0, &mut raw) };
        AsiDriverStats {
            fifo_bytes: i64::from(raw.fifo_bytes),
            bytes_written_total: raw.bytes_written as u64,
            bytes_written: raw.bytes_since_last_call as u64,
        }
    }

    fn close(&self) {
        let mut ctx = self.ctx.lock();
        if !ctx.0.is_null() {
            // SAFETY: ctx came from setup_dektec_asi_output and is nulled after
            unsafe { dektec_asi_destroy(ctx.0) };
            ctx.0 = std::ptr::null_mut();
        }
    }
}

impl Drop for DektecDriver {
    fn drop(&mut self) {
        self.close();
    }
}
