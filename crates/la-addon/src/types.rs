use std::os::raw::{c_char, c_void};

/// Status codes returned by all FFI functions.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaStatus {
    Ok = 0,
    ErrorInvalidArgument = 1,
    ErrorDisposed = 2,
    ErrorInUse = 3,
    ErrorUnsupported = 4,
    ErrorInvalidConfiguration = 5,
    ErrorNeedsLargerContext = 6,
    ErrorDecode = 7,
    ErrorInternal = 8,
}

/// One entry of a ranked probability list.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LaTokenProbability {
    pub token: u32,
    pub probability: f32,
}

/// Engine-side model, implemented by the host.
///
/// Every callback may be invoked from a worker thread.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LaModelVTable {
    pub user_data: *mut c_void,
    pub n_vocab: extern "C" fn(user_data: *mut c_void) -> i32,
    pub token_is_eog: extern "C" fn(user_data: *mut c_void, token: i32) -> bool,
    pub token_attributes: extern "C" fn(user_data: *mut c_void, token: i32) -> u32,
    /// Writes at most `len` bytes of the token's text to `buf` and returns the
    /// full length, or a negative value on failure.
    pub token_piece:
        extern "C" fn(user_data: *mut c_void, token: i32, buf: *mut c_char, len: i32) -> i32,
    /// Called once when the runtime is done with `user_data`, including
    /// when registration fails.
    pub free: Option<extern "C" fn(user_data: *mut c_void)>,
}

/// Engine-side inference context, implemented by the host.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct LaContextVTable {
    pub user_data: *mut c_void,
    /// Returns 0 on success, 1 when the batch needs a larger context, any
    /// other value on failure.
    pub decode: extern "C" fn(
        user_data: *mut c_void,
        tokens: *const u32,
        positions: *const i32,
        seq_ids: *const i32,
        logits: *const bool,
        n_tokens: i32,
    ) -> i32,
    /// Logits of the `index`-th output of the last decode, `n_vocab` floats,
    /// or null when the model produces none.
    pub get_logits_ith: extern "C" fn(user_data: *mut c_void, index: i32) -> *const f32,
    pub free: Option<extern "C" fn(user_data: *mut c_void)>,
}

/// Receives engine and runtime log lines. `level` uses the engine numbering
/// (2 error, 3 warn, 4 info, 5 log, 6 debug).
pub type LaLogCallback =
    Option<extern "C" fn(level: i32, text: *const c_char, user_data: *mut c_void)>;

/// Completion of `la_sample`. `token` is -1 when nothing could be sampled.
/// `probabilities` is only valid during the call.
pub type LaSampleCallback = Option<
    extern "C" fn(
        status: LaStatus,
        token: i32,
        probabilities: *const LaTokenProbability,
        n_probabilities: usize,
        confidence: f32,
        user_data: *mut c_void,
    ),
>;

/// Completion of `la_decode`.
pub type LaDecodeCallback = Option<extern "C" fn(status: LaStatus, user_data: *mut c_void)>;
