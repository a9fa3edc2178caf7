//! Host-facing runtime for the llama-addon sampler.
//!
//! Owns models, contexts, samplers, grammars and grammar evaluation states
//! behind generational handles, runs decode and sample operations on a
//! worker pool, and exposes everything through a C ABI (`la_*` functions).
//! Engine functionality is reached through the [`ModelBackend`] and
//! [`ContextBackend`] traits; C hosts implement them with function tables.

pub mod arena;
pub mod batch;
pub mod callbacks;
pub mod config;
pub mod engine;
pub mod error;
pub mod host;
pub mod process;
pub mod runtime;
pub mod token_attributes;
pub mod types;
pub mod worker;

pub use arena::{Arena, Handle};
pub use batch::{Batch, BatchItem};
pub use config::RuntimeConfig;
pub use engine::{ContextBackend, DecodeStatus, EngineVocab, ModelBackend};
pub use error::{AddonError, ResourceKind, Result};
pub use host::{CContext, CModel};
pub use process::{EngineLogLevel, LogCallback, LogLevel, ProcessContext};
pub use runtime::{
    ContextHandle, GrammarHandle, GrammarStateHandle, ModelHandle, Runtime, SamplerHandle,
};
pub use token_attributes::TokenAttributes;
pub use types::*;
pub use worker::{Pending, WorkerPool};

use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use la_sampler::SampleRequest;

use crate::callbacks::UserData;
use crate::error::{report, set_last_error};

/// Run an FFI body, turning errors into a status plus a last-error message
/// and panics into `LaStatus::ErrorInternal`.
fn catch_panic<F: FnOnce() -> Result<()>>(f: F) -> LaStatus {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => LaStatus::Ok,
        Ok(Err(e)) => report(&e),
        Err(_) => {
            set_last_error("internal panic".to_string());
            LaStatus::ErrorInternal
        }
    }
}

unsafe fn runtime_ref<'a>(runtime: *const Runtime) -> Result<&'a Runtime> {
    runtime
        .as_ref()
        .ok_or_else(|| AddonError::InvalidArgument("runtime is null".to_string()))
}

unsafe fn str_arg<'a>(ptr: *const c_char, name: &str) -> Result<&'a str> {
    if ptr.is_null() {
        return Err(AddonError::InvalidArgument(format!("{} is null", name)));
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|e| AddonError::InvalidArgument(format!("invalid {}: {}", name, e)))
}

unsafe fn write_out<T>(out: *mut T, value: T) -> Result<()> {
    if out.is_null() {
        return Err(AddonError::InvalidArgument("output pointer is null".to_string()));
    }
    *out = value;
    Ok(())
}

// ---- runtime & process ----

/// Create a runtime. `config_toml` may be null for the defaults.
///
/// On success writes the runtime into `*out`; free it with
/// `la_runtime_destroy`.
#[no_mangle]
pub unsafe extern "C" fn la_runtime_create(
    config_toml: *const c_char,
    out: *mut *mut Runtime,
) -> LaStatus {
    catch_panic(|| {
        if out.is_null() {
            return Err(AddonError::InvalidArgument("out is null".to_string()));
        }
        let config = if config_toml.is_null() {
            RuntimeConfig::default()
        } else {
            RuntimeConfig::from_toml_str(str_arg(config_toml, "config")?)?
        };
        let runtime = Runtime::new(config)?;
        runtime.process().install_logger();
        *out = Box::into_raw(Box::new(runtime));
        Ok(())
    })
}

/// Dispose every remaining resource, wait for queued work and free the
/// runtime. Null is a no-op.
#[no_mangle]
pub unsafe extern "C" fn la_runtime_destroy(runtime: *mut Runtime) -> LaStatus {
    if runtime.is_null() {
        return LaStatus::Ok;
    }
    catch_panic(|| {
        drop(Box::from_raw(runtime));
        Ok(())
    })
}

/// Set the log threshold, using the engine level numbers (2 error … 6 debug).
#[no_mangle]
pub unsafe extern "C" fn la_set_log_level(runtime: *const Runtime, level: i32) -> LaStatus {
    catch_panic(|| {
        let level = LogLevel::from_number(level)
            .ok_or_else(|| AddonError::InvalidArgument(format!("unknown log level {}", level)))?;
        runtime_ref(runtime)?.process().set_log_level(level);
        Ok(())
    })
}

/// Route log lines to `callback`, or back to stderr when it is null.
#[no_mangle]
pub unsafe extern "C" fn la_set_log_callback(
    runtime: *const Runtime,
    callback: LaLogCallback,
    user_data: *mut c_void,
) -> LaStatus {
    catch_panic(|| {
        let forward = callbacks::log_forwarder(callback, UserData(user_data));
        runtime_ref(runtime)?.process().set_log_callback(forward);
        Ok(())
    })
}

/// Pass one engine log line through the runtime's filter. `level` 0 marks a
/// continuation of the previous line.
#[no_mangle]
pub unsafe extern "C" fn la_engine_log(
    runtime: *const Runtime,
    level: i32,
    text: *const c_char,
) -> LaStatus {
    catch_panic(|| {
        let level = match level {
            0 => EngineLogLevel::Cont,
            n => EngineLogLevel::Level(
                LogLevel::from_number(n)
                    .ok_or_else(|| AddonError::InvalidArgument(format!("unknown log level {}", n)))?,
            ),
        };
        if text.is_null() {
            return Err(AddonError::InvalidArgument("text is null".to_string()));
        }
        let text = CStr::from_ptr(text).to_string_lossy();
        runtime_ref(runtime)?.process().forward_engine_log(level, &text);
        Ok(())
    })
}

// ---- models ----

/// Register a host model. The runtime owns `vtable.user_data` from here on
/// and frees it if the call fails.
#[no_mangle]
pub unsafe extern "C" fn la_model_register(
    runtime: *const Runtime,
    vtable: LaModelVTable,
    out: *mut u64,
) -> LaStatus {
    catch_panic(|| {
        let model = CModel::new(vtable)?;
        let runtime = runtime_ref(runtime)?;
        if out.is_null() {
            return Err(AddonError::InvalidArgument("out is null".to_string()));
        }
        let handle = runtime.register_model(Arc::new(model));
        write_out(out, handle.to_raw())
    })
}

/// Dispose a model. Fails while contexts, samplers or grammar states
/// still use it.
#[no_mangle]
pub unsafe extern "C" fn la_model_dispose(runtime: *const Runtime, model: u64) -> LaStatus {
    catch_panic(|| runtime_ref(runtime)?.dispose_model(ModelHandle::from_raw(model)))
}

/// Write the attribute bits of `token` into `*out`.
#[no_mangle]
pub unsafe extern "C" fn la_model_token_attributes(
    runtime: *const Runtime,
    model: u64,
    token: u32,
    out: *mut u32,
) -> LaStatus {
    catch_panic(|| {
        let attributes =
            runtime_ref(runtime)?.token_attributes(ModelHandle::from_raw(model), token)?;
        write_out(out, attributes.bits())
    })
}

// ---- contexts ----

/// Create a context on `model`. The runtime owns `vtable.user_data` from
/// here on and frees it if the call fails.
#[no_mangle]
pub unsafe extern "C" fn la_context_create(
    runtime: *const Runtime,
    model: u64,
    vtable: LaContextVTable,
    out: *mut u64,
) -> LaStatus {
    catch_panic(|| {
        let mut context = CContext::new(vtable, 0);
        let runtime = runtime_ref(runtime)?;
        if out.is_null() {
            return Err(AddonError::InvalidArgument("out is null".to_string()));
        }
        let model = ModelHandle::from_raw(model);
        context.set_vocab_size(runtime.model_vocab_size(model)?);
        let handle = runtime.create_context(model, Box::new(context))?;
        write_out(out, handle.to_raw())
    })
}

/// Dispose a context. Queued work on it still completes.
#[no_mangle]
pub unsafe extern "C" fn la_context_dispose(runtime: *const Runtime, context: u64) -> LaStatus {
    catch_panic(|| runtime_ref(runtime)?.dispose_context(ContextHandle::from_raw(context)))
}

/// Queue a decode of `tokens` at positions `start_pos..` in sequence
/// `seq_id`, with logits requested for the last token.
///
/// A non-Ok return means the decode was not queued and `callback` will not
/// be called. Otherwise `callback` runs once on a worker thread.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn la_decode(
    runtime: *const Runtime,
    context: u64,
    tokens: *const u32,
    n_tokens: usize,
    start_pos: i32,
    seq_id: i32,
    callback: LaDecodeCallback,
    user_data: *mut c_void,
) -> LaStatus {
    catch_panic(|| {
        let runtime = runtime_ref(runtime)?;
        if tokens.is_null() || n_tokens == 0 {
            return Err(AddonError::InvalidArgument("no tokens to decode".to_string()));
        }
        let tokens = std::slice::from_raw_parts(tokens, n_tokens);
        let mut batch = Batch::new(n_tokens);
        batch.add_sequence(tokens, start_pos, seq_id)?;
        let user_data = UserData(user_data);
        runtime.decode_then(ContextHandle::from_raw(context), batch, move |result| {
            callbacks::invoke_decode_callback(callback, user_data, result)
        })
    })
}

// ---- grammars ----

/// Compile a grammar. `root` may be null for the `root` rule.
#[no_mangle]
pub unsafe extern "C" fn la_grammar_create(
    runtime: *const Runtime,
    text: *const c_char,
    root: *const c_char,
    out: *mut u64,
) -> LaStatus {
    catch_panic(|| {
        let runtime = runtime_ref(runtime)?;
        let text = str_arg(text, "grammar text")?;
        let root = if root.is_null() {
            None
        } else {
            Some(str_arg(root, "root rule")?)
        };
        let handle = runtime.create_grammar(text, root)?;
        write_out(out, handle.to_raw())
    })
}

/// Write into `*out` whether the grammar accepts the whole of `text`.
#[no_mangle]
pub unsafe extern "C" fn la_grammar_is_text_compatible(
    runtime: *const Runtime,
    grammar: u64,
    text: *const c_char,
    out: *mut bool,
) -> LaStatus {
    catch_panic(|| {
        let runtime = runtime_ref(runtime)?;
        let text = str_arg(text, "text")?;
        let compatible =
            runtime.grammar_is_text_compatible(GrammarHandle::from_raw(grammar), text)?;
        write_out(out, compatible)
    })
}

/// Dispose a grammar. States created from it stay usable.
#[no_mangle]
pub unsafe extern "C" fn la_grammar_dispose(runtime: *const Runtime, grammar: u64) -> LaStatus {
    catch_panic(|| runtime_ref(runtime)?.dispose_grammar(GrammarHandle::from_raw(grammar)))
}

// ---- grammar evaluation states ----

/// Create a fresh evaluation state of `grammar` for `model`.
#[no_mangle]
pub unsafe extern "C" fn la_grammar_state_create(
    runtime: *const Runtime,
    model: u64,
    grammar: u64,
    out: *mut u64,
) -> LaStatus {
    catch_panic(|| {
        let handle = runtime_ref(runtime)?.create_grammar_state(
            ModelHandle::from_raw(model),
            GrammarHandle::from_raw(grammar),
        )?;
        write_out(out, handle.to_raw())
    })
}

/// Copy an evaluation state. The copy advances independently.
#[no_mangle]
pub unsafe extern "C" fn la_grammar_state_clone(
    runtime: *const Runtime,
    state: u64,
    out: *mut u64,
) -> LaStatus {
    catch_panic(|| {
        let handle =
            runtime_ref(runtime)?.clone_grammar_state(GrammarStateHandle::from_raw(state))?;
        write_out(out, handle.to_raw())
    })
}

/// Write into `*out` whether `token` may come next. The state is not
/// changed.
#[no_mangle]
pub unsafe extern "C" fn la_grammar_state_can_be_next_token(
    runtime: *const Runtime,
    state: u64,
    token: u32,
    out: *mut bool,
) -> LaStatus {
    catch_panic(|| {
        let allowed = runtime_ref(runtime)?
            .grammar_state_can_be_next_token(GrammarStateHandle::from_raw(state), token)?;
        write_out(out, allowed)
    })
}

/// Advance the state past `token`. End-of-generation tokens leave it
/// as it is.
#[no_mangle]
pub unsafe extern "C" fn la_grammar_state_accept_token(
    runtime: *const Runtime,
    state: u64,
    token: u32,
) -> LaStatus {
    catch_panic(|| {
        runtime_ref(runtime)?
            .grammar_state_accept_token(GrammarStateHandle::from_raw(state), token)
    })
}

#[no_mangle]
pub unsafe extern "C" fn la_grammar_state_dispose(runtime: *const Runtime, state: u64) -> LaStatus {
    catch_panic(|| {
        runtime_ref(runtime)?.dispose_grammar_state(GrammarStateHandle::from_raw(state))
    })
}

// ---- samplers ----

/// Create a sampler for `model` and write its handle into `*out`.
#[no_mangle]
pub unsafe extern "C" fn la_sampler_create(
    runtime: *const Runtime,
    model: u64,
    out: *mut u64,
) -> LaStatus {
    catch_panic(|| {
        let handle = runtime_ref(runtime)?.create_sampler(ModelHandle::from_raw(model))?;
        write_out(out, handle.to_raw())
    })
}

/// Apply a JSON options bag. Nothing changes when it is rejected.
#[no_mangle]
pub unsafe extern "C" fn la_sampler_apply_config(
    runtime: *const Runtime,
    sampler: u64,
    config_json: *const c_char,
) -> LaStatus {
    catch_panic(|| {
        let runtime = runtime_ref(runtime)?;
        let json = str_arg(config_json, "config")?;
        runtime.apply_sampler_config_json(SamplerHandle::from_raw(sampler), json)
    })
}

/// Queue sampling of the `logit_index`-th output of the context's last
/// decode.
///
/// A non-Ok return means nothing was queued and `callback` will not be
/// called. Otherwise `callback` runs once on a worker thread, with token -1
/// when no candidate was left.
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn la_sample(
    runtime: *const Runtime,
    context: u64,
    sampler: u64,
    logit_index: i32,
    want_probabilities: bool,
    want_confidence: bool,
    callback: LaSampleCallback,
    user_data: *mut c_void,
) -> LaStatus {
    catch_panic(|| {
        let runtime = runtime_ref(runtime)?;
        let request = SampleRequest {
            probabilities: want_probabilities,
            confidence: want_confidence,
        };
        let user_data = UserData(user_data);
        runtime.sample_then(
            ContextHandle::from_raw(context),
            SamplerHandle::from_raw(sampler),
            logit_index,
            request,
            move |result| callbacks::invoke_sample_callback(callback, user_data, result),
        )
    })
}

/// Record a token chosen outside `la_sample` in the sampler's history
/// and grammar state.
#[no_mangle]
pub unsafe extern "C" fn la_sampler_accept_token(
    runtime: *const Runtime,
    sampler: u64,
    token: u32,
) -> LaStatus {
    catch_panic(|| runtime_ref(runtime)?.accept_sampler_token(SamplerHandle::from_raw(sampler), token))
}

/// Dispose a sampler. A sample already queued on it still completes.
#[no_mangle]
pub unsafe extern "C" fn la_sampler_dispose(runtime: *const Runtime, sampler: u64) -> LaStatus {
    catch_panic(|| runtime_ref(runtime)?.dispose_sampler(SamplerHandle::from_raw(sampler)))
}

// ---- errors ----

/// Retrieve the last error message of the calling thread.
///
/// Returns null if no error has occurred. The caller must free the returned
/// string with `la_free_string`.
#[no_mangle]
pub extern "C" fn la_last_error() -> *const c_char {
    match error::take_last_error() {
        Some(e) => e.into_raw(),
        None => std::ptr::null(),
    }
}

/// Free a string previously returned by `la_last_error`.
#[no_mangle]
pub unsafe extern "C" fn la_free_string(s: *mut c_char) {
    if !s.is_null() {
        drop(CString::from_raw(s));
    }
}
