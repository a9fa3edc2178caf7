use crate::error::{AddonError, Result};

/// One token queued for decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchItem {
    pub token: u32,
    pub pos: i32,
    pub seq_id: i32,
    /// Whether the engine should produce logits for this position.
    pub logits: bool,
}

/// Tokens submitted to one `decode` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Batch {
    items: Vec<BatchItem>,
    capacity: usize,
}

impl Batch {
    /// An empty batch that holds at most `capacity` tokens.
    pub fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of tokens queued.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Queued tokens in the order they were added.
    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    /// Queue a token. Returns the index of its logits among this batch's
    /// outputs when `logits` is set.
    pub fn add(&mut self, token: u32, pos: i32, seq_id: i32, logits: bool) -> Result<Option<i32>> {
        if self.items.len() >= self.capacity {
            return Err(AddonError::InvalidArgument(format!(
                "batch is full ({} tokens)",
                self.capacity
            )));
        }
        let output_index = logits.then(|| self.n_outputs() as i32);
        self.items.push(BatchItem {
            token,
            pos,
            seq_id,
            logits,
        });
        Ok(output_index)
    }

    /// Queue a run of tokens for one sequence starting at `start_pos`,
    /// requesting logits for the last one only.
    pub fn add_sequence(&mut self, tokens: &[u32], start_pos: i32, seq_id: i32) -> Result<Option<i32>> {
        if self.items.len() + tokens.len() > self.capacity {
            return Err(AddonError::InvalidArgument(format!(
                "{} tokens do not fit in a batch of {} with {} queued",
                tokens.len(),
                self.capacity,
                self.items.len()
            )));
        }
        let mut output = None;
        for (i, &token) in tokens.iter().enumerate() {
            let last = i + 1 == tokens.len();
            output = self.add(token, start_pos + i as i32, seq_id, last)?;
        }
        Ok(output)
    }

    /// Number of tokens that request logits.
    pub fn n_outputs(&self) -> usize {
        self.items.iter().filter(|item| item.logits).count()
    }

    /// Drop every token, keeping the capacity.
    pub fn clear(&mut self) {
        self.items.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_indices() {
        let mut batch = Batch::new(4);
        assert_eq!(batch.add(10, 0, 0, false).unwrap(), None);
        assert_eq!(batch.add(11, 1, 0, true).unwrap(), Some(0));
        assert_eq!(batch.add(20, 0, 1, true).unwrap(), Some(1));
        assert_eq!(batch.n_outputs(), 2);
    }

    #[test]
    fn test_capacity() {
        let mut batch = Batch::new(2);
        assert_eq!(batch.add_sequence(&[1, 2], 5, 0).unwrap(), Some(0));
        assert_eq!(batch.items()[1].pos, 6);
        assert!(batch.add(3, 7, 0, true).is_err());
        batch.clear();
        assert!(batch.add_sequence(&[1, 2, 3], 0, 0).is_err());
        assert!(batch.is_empty());
    }
}
