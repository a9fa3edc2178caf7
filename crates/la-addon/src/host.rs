//! Engine backends implemented by the host through C function tables.

use std::os::raw::c_char;
use std::slice;

use log::debug;

use crate::batch::Batch;
use crate::engine::{ContextBackend, DecodeStatus, ModelBackend};
use crate::error::{AddonError, Result};
use crate::token_attributes::TokenAttributes;
use crate::types::{LaContextVTable, LaModelVTable};

const INITIAL_PIECE_CAPACITY: usize = 32;

/// A host model. Token pieces are read once up front, since the sampler
/// borrows them on every grammar check.
#[derive(Debug)]
pub struct CModel {
    vtable: LaModelVTable,
    pieces: Vec<Vec<u8>>,
}

// SAFETY: `CModel::new` requires the host callbacks to be callable from any
// thread; the cached pieces are immutable.
unsafe impl Send for CModel {}
unsafe impl Sync for CModel {}

fn read_piece(vtable: &LaModelVTable, token: i32) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; INITIAL_PIECE_CAPACITY];
    // a second call with the reported length must fit
    for _ in 0..2 {
        let len = (vtable.token_piece)(
            vtable.user_data,
            token,
            buf.as_mut_ptr() as *mut c_char,
            buf.len() as i32,
        );
        if len < 0 {
            break;
        }
        let len = len as usize;
        if len <= buf.len() {
            buf.truncate(len);
            return Ok(buf);
        }
        buf.resize(len, 0);
    }
    Err(AddonError::InvalidArgument(format!(
        "could not read the text of token {}",
        token
    )))
}

impl CModel {
    /// Wrap a host model table. The model owns `user_data` and calls `free`
    /// when dropped, including when reading the vocabulary fails.
    ///
    /// # Safety
    ///
    /// Every callback in `vtable` must stay valid until `free` is called and
    /// must be safe to call from any thread.
    pub unsafe fn new(vtable: LaModelVTable) -> Result<Self> {
        let mut model = Self {
            vtable,
            pieces: Vec::new(),
        };
        let n_vocab = (vtable.n_vocab)(vtable.user_data);
        if n_vocab <= 0 {
            return Err(AddonError::InvalidArgument(format!(
                "model reports a vocabulary of {} tokens",
                n_vocab
            )));
        }
        model.pieces = (0..n_vocab)
            .map(|token| read_piece(&vtable, token))
            .collect::<Result<Vec<_>>>()?;
        debug!("read {} token pieces from the host model", model.pieces.len());
        Ok(model)
    }
}

impl ModelBackend for CModel {
    fn vocab_size(&self) -> usize {
        self.pieces.len()
    }

    fn is_end_of_generation(&self, token: u32) -> bool {
        (self.vtable.token_is_eog)(self.vtable.user_data, token as i32)
    }

    fn token_attributes(&self, token: u32) -> TokenAttributes {
        TokenAttributes::from_bits((self.vtable.token_attributes)(
            self.vtable.user_data,
            token as i32,
        ))
    }

    fn token_piece(&self, token: u32) -> &[u8] {
        self.pieces
            .get(token as usize)
            .map_or(&[][..], Vec::as_slice)
    }
}

impl Drop for CModel {
    fn drop(&mut self) {
        if let Some(free) = self.vtable.free {
            free(self.vtable.user_data);
        }
    }
}

/// A host inference context.
#[derive(Debug)]
pub struct CContext {
    vtable: LaContextVTable,
    n_vocab: usize,
}

// SAFETY: the runtime serializes calls on a context behind a mutex, and
// `CContext::new` requires the callbacks to tolerate being called from a
// worker thread.
unsafe impl Send for CContext {}

impl CContext {
    /// Wrap a host context table. `n_vocab` is the length of every logits
    /// row the host returns. The context owns `user_data` from here on.
    ///
    /// # Safety
    ///
    /// Every callback in `vtable` must stay valid until `free` is called and
    /// must be callable from a thread other than the one that created it.
    /// A non-null logits pointer must stay readable for `n_vocab` floats
    /// until the next decode.
    pub unsafe fn new(vtable: LaContextVTable, n_vocab: usize) -> Self {
        Self { vtable, n_vocab }
    }

    /// Set the length of the logits rows read from the host.
    pub fn set_vocab_size(&mut self, n_vocab: usize) {
        self.n_vocab = n_vocab;
    }
}

impl ContextBackend for CContext {
    fn decode(&mut self, batch: &Batch) -> DecodeStatus {
        let Ok(n_tokens) = i32::try_from(batch.len()) else {
            return DecodeStatus::Failed(-1);
        };
        let items = batch.items();
        let tokens: Vec<u32> = items.iter().map(|item| item.token).collect();
        let positions: Vec<i32> = items.iter().map(|item| item.pos).collect();
        let seq_ids: Vec<i32> = items.iter().map(|item| item.seq_id).collect();
        let logits: Vec<bool> = items.iter().map(|item| item.logits).collect();
        let code = (self.vtable.decode)(
            self.vtable.user_data,
            tokens.as_ptr(),
            positions.as_ptr(),
            seq_ids.as_ptr(),
            logits.as_ptr(),
            n_tokens,
        );
        DecodeStatus::from_code(code)
    }

    fn logits_ith(&self, index: i32) -> Option<&[f32]> {
        let ptr = (self.vtable.get_logits_ith)(self.vtable.user_data, index);
        if ptr.is_null() {
            return None;
        }
        // SAFETY: guaranteed by the contract of `CContext::new`.
        Some(unsafe { slice::from_raw_parts(ptr, self.n_vocab) })
    }
}

impl Drop for CContext {
    fn drop(&mut self) {
        if let Some(free) = self.vtable.free {
            free(self.vtable.user_data);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::raw::c_void;
    use std::ptr;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const PIECES: [&str; 3] = ["a", "a much longer piece than thirty-two bytes", "<eos>"];
    static FREED: AtomicUsize = AtomicUsize::new(0);
    static LOGITS: [f32; 3] = [0.5, 1.5, -1.0];

    extern "C" fn n_vocab(_: *mut c_void) -> i32 {
        PIECES.len() as i32
    }

    extern "C" fn is_eog(_: *mut c_void, token: i32) -> bool {
        token == 2
    }

    extern "C" fn attributes(_: *mut c_void, token: i32) -> u32 {
        if token == 2 {
            TokenAttributes::CONTROL.bits()
        } else {
            TokenAttributes::NORMAL.bits()
        }
    }

    extern "C" fn piece(_: *mut c_void, token: i32, buf: *mut c_char, len: i32) -> i32 {
        let text = PIECES[token as usize].as_bytes();
        let n = text.len().min(len as usize);
        unsafe { ptr::copy_nonoverlapping(text.as_ptr(), buf as *mut u8, n) };
        text.len() as i32
    }

    extern "C" fn free(_: *mut c_void) {
        FREED.fetch_add(1, Ordering::SeqCst);
    }

    extern "C" fn decode(
        _: *mut c_void,
        tokens: *const u32,
        _: *const i32,
        _: *const i32,
        _: *const bool,
        n_tokens: i32,
    ) -> i32 {
        let tokens = unsafe { slice::from_raw_parts(tokens, n_tokens as usize) };
        if tokens.contains(&2) {
            7
        } else {
            0
        }
    }

    extern "C" fn logits_ith(_: *mut c_void, index: i32) -> *const f32 {
        if index == 0 {
            LOGITS.as_ptr()
        } else {
            ptr::null()
        }
    }

    fn model_vtable() -> LaModelVTable {
        LaModelVTable {
            user_data: ptr::null_mut(),
            n_vocab,
            token_is_eog: is_eog,
            token_attributes: attributes,
            token_piece: piece,
            free: Some(free),
        }
    }

    #[test]
    fn test_model_reads_pieces() {
        let model = unsafe { CModel::new(model_vtable()) }.unwrap();
        assert_eq!(model.vocab_size(), 3);
        assert_eq!(model.token_piece(1), PIECES[1].as_bytes());
        assert!(model.is_end_of_generation(2));
        assert!(model.token_attributes(2).is_special());
        assert!(model.token_piece(9).is_empty());
        let before = FREED.load(Ordering::SeqCst);
        drop(model);
        assert!(FREED.load(Ordering::SeqCst) > before);
    }

    #[test]
    fn test_context_decode_and_logits() {
        let vtable = LaContextVTable {
            user_data: ptr::null_mut(),
            decode,
            get_logits_ith: logits_ith,
            free: None,
        };
        let mut context = unsafe { CContext::new(vtable, 3) };
        let mut batch = Batch::new(4);
        batch.add_sequence(&[0, 1], 0, 0).unwrap();
        assert_eq!(context.decode(&batch), DecodeStatus::Ok);
        batch.add(2, 2, 0, true).unwrap();
        assert_eq!(context.decode(&batch), DecodeStatus::Failed(7));
        assert_eq!(context.logits_ith(0), Some(&LOGITS[..]));
        assert_eq!(context.logits_ith(1), None);
    }
}
