/// The slice of a model's vocabulary the sampling stages need.
pub trait Vocabulary {
    fn n_vocab(&self) -> usize;

    /// End-of-generation tokens (EOS, EOT, ...).
    fn is_eog(&self, token: u32) -> bool;

    /// Raw bytes the token detokenizes to. May be an incomplete UTF-8 sequence.
    fn token_piece(&self, token: u32) -> &[u8];
}
