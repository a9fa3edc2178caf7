use std::ffi::CString;
use std::os::raw::c_void;
use std::sync::Arc;

use la_sampler::SampleOutput;
use log::warn;

use crate::error::{AddonError, Result};
use crate::process::{LogCallback, LogLevel};
use crate::types::{
    LaDecodeCallback, LaLogCallback, LaSampleCallback, LaStatus, LaTokenProbability,
};

/// Host pointer passed back untouched to a completion callback.
#[derive(Debug, Clone, Copy)]
pub struct UserData(pub *mut c_void);

// SAFETY: the pointer is never dereferenced on the Rust side; the host that
// registers a callback agrees to receive it on a worker thread.
unsafe impl Send for UserData {}
unsafe impl Sync for UserData {}

impl UserData {
    /// The raw host pointer.
    pub fn as_ptr(self) -> *mut c_void {
        self.0
    }
}

fn failure_status(operation: &str, err: &AddonError) -> LaStatus {
    // the last-error slot is thread-local, so a worker-side message would
    // never reach the host
    warn!("{} failed: {}", operation, err);
    err.status()
}

/// Report a finished sample to the host. Probabilities are only valid
/// during the call.
pub fn invoke_sample_callback(
    callback: LaSampleCallback,
    user_data: UserData,
    result: Result<SampleOutput>,
) {
    let Some(cb) = callback else {
        return;
    };
    match result {
        Ok(output) => {
            let probabilities: Vec<LaTokenProbability> = output
                .probabilities
                .unwrap_or_default()
                .into_iter()
                .map(|(token, probability)| LaTokenProbability { token, probability })
                .collect();
            let token = output.token.map_or(-1, |t| t as i32);
            let confidence = output.confidence.unwrap_or(f32::NAN);
            cb(
                LaStatus::Ok,
                token,
                probabilities.as_ptr(),
                probabilities.len(),
                confidence,
                user_data.0,
            );
        }
        Err(err) => {
            let status = failure_status("sample", &err);
            cb(status, -1, std::ptr::null(), 0, f32::NAN, user_data.0);
        }
    }
}

/// Report a finished decode to the host.
pub fn invoke_decode_callback(callback: LaDecodeCallback, user_data: UserData, result: Result<()>) {
    let Some(cb) = callback else {
        return;
    };
    let status = match result {
        Ok(()) => LaStatus::Ok,
        Err(err) => failure_status("decode", &err),
    };
    cb(status, user_data.0);
}

/// Wrap a host log function so the process context can call it.
pub fn log_forwarder(callback: LaLogCallback, user_data: UserData) -> Option<LogCallback> {
    let cb = callback?;
    Some(Arc::new(move |level: LogLevel, text: &str| {
        if let Ok(text) = CString::new(text.replace('\0', " ")) {
            cb(i32::from(level.number()), text.as_ptr(), user_data.as_ptr());
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CStr;
    use std::os::raw::c_char;
    use std::sync::Mutex;

    static SAMPLES: Mutex<Vec<(LaStatus, i32, Vec<LaTokenProbability>)>> = Mutex::new(Vec::new());
    static LINES: Mutex<Vec<(i32, String)>> = Mutex::new(Vec::new());

    extern "C" fn on_sample(
        status: LaStatus,
        token: i32,
        probabilities: *const LaTokenProbability,
        n: usize,
        _confidence: f32,
        _user_data: *mut c_void,
    ) {
        let probabilities = if probabilities.is_null() {
            Vec::new()
        } else {
            unsafe { std::slice::from_raw_parts(probabilities, n) }.to_vec()
        };
        SAMPLES.lock().unwrap().push((status, token, probabilities));
    }

    extern "C" fn on_log(level: i32, text: *const c_char, _user_data: *mut c_void) {
        let text = unsafe { CStr::from_ptr(text) }.to_string_lossy().into_owned();
        LINES.lock().unwrap().push((level, text));
    }

    #[test]
    fn test_sample_callback_outcomes() {
        let output = SampleOutput {
            token: Some(4),
            probabilities: Some(vec![(4, 0.75), (1, 0.25)]),
            confidence: Some(0.75),
        };
        invoke_sample_callback(Some(on_sample), UserData(std::ptr::null_mut()), Ok(output));
        invoke_sample_callback(
            Some(on_sample),
            UserData(std::ptr::null_mut()),
            Ok(SampleOutput::default()),
        );
        invoke_sample_callback(
            Some(on_sample),
            UserData(std::ptr::null_mut()),
            Err(AddonError::NeedsLargerContext),
        );

        let samples = SAMPLES.lock().unwrap();
        assert_eq!(samples[0].0, LaStatus::Ok);
        assert_eq!(samples[0].1, 4);
        assert_eq!(samples[0].2[1], LaTokenProbability { token: 1, probability: 0.25 });
        assert_eq!((samples[1].0, samples[1].1), (LaStatus::Ok, -1));
        assert_eq!(samples[2].0, LaStatus::ErrorNeedsLargerContext);
    }

    #[test]
    fn test_log_forwarder_passes_level_number() {
        let forward = log_forwarder(Some(on_log), UserData(std::ptr::null_mut())).unwrap();
        forward(LogLevel::Warn, "careful\0now");
        assert_eq!(LINES.lock().unwrap()[0], (3, "careful now".to_string()));
        assert!(log_forwarder(None, UserData(std::ptr::null_mut())).is_none());
    }
}
