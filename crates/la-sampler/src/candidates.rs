use std::cmp::Ordering;

/// A token id with its logit and, after normalization, its probability.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenData {
    pub id: u32,
    pub logit: f32,
    pub p: f32,
}

/// The candidate set every sampling stage mutates.
///
/// When `sorted` is set the entries are non-increasing by logit. `selected`,
/// when set, indexes a valid entry.
#[derive(Debug, Clone, Default)]
pub struct Candidates {
    data: Vec<TokenData>,
    selected: Option<usize>,
    sorted: bool,
}

fn by_logit_desc(a: &TokenData, b: &TokenData) -> Ordering {
    b.logit.partial_cmp(&a.logit).unwrap_or(Ordering::Equal)
}

impl Candidates {
    /// One unsorted candidate per logit, ids in index order.
    pub fn from_logits(logits: &[f32]) -> Self {
        let mut candidates = Self::default();
        candidates.fill(logits);
        candidates
    }

    /// Reset to one entry per vocabulary token, reusing the allocation.
    pub fn fill(&mut self, logits: &[f32]) {
        self.data.clear();
        self.data.extend(logits.iter().enumerate().map(|(i, &logit)| TokenData {
            id: i as u32,
            logit,
            p: 0.0,
        }));
        self.selected = None;
        self.sorted = false;
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True while entries are known to be in descending logit order.
    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn as_slice(&self) -> &[TokenData] {
        &self.data
    }

    pub fn iter(&self) -> impl Iterator<Item = &TokenData> {
        self.data.iter()
    }

    /// Mutable access to the entries. Clears the sort and selection markers
    /// since logits may change.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut TokenData> {
        self.sorted = false;
        self.selected = None;
        self.data.iter_mut()
    }

    /// The chosen candidate, once a final stage picked one.
    pub fn selected(&self) -> Option<&TokenData> {
        self.selected.map(|i| &self.data[i])
    }

    /// Mark the entry at `index` as chosen.
    pub fn select(&mut self, index: usize) {
        if index < self.data.len() {
            self.selected = Some(index);
        }
    }

    /// Stable sort by descending logit; equal logits keep their order.
    pub fn sort_by_logit(&mut self) {
        if self.sorted {
            return;
        }
        let selected_id = self.selected().map(|t| t.id);
        self.data.sort_by(by_logit_desc);
        self.sorted = true;
        self.selected = selected_id.and_then(|id| self.data.iter().position(|t| t.id == id));
    }

    /// Sort, then set `p` to the normalized probabilities. Entries with a
    /// non-finite logit get zero probability.
    pub fn softmax(&mut self) {
        self.sort_by_logit();
        let Some(max) = self.data.iter().map(|t| t.logit).find(|l| l.is_finite()) else {
            for t in &mut self.data {
                t.p = 0.0;
            }
            return;
        };

        let mut sum = 0.0f32;
        for t in &mut self.data {
            t.p = if t.logit.is_finite() {
                (t.logit - max).exp()
            } else {
                0.0
            };
            sum += t.p;
        }
        for t in &mut self.data {
            t.p /= sum;
        }
    }

    /// Keep the first `n` entries, never fewer than one.
    pub fn truncate(&mut self, n: usize) {
        self.data.truncate(n.max(1));
        if self.selected.is_some_and(|i| i >= self.data.len()) {
            self.selected = None;
        }
    }

    /// Keep the entries matching `keep`. Falls back to the first entry when
    /// nothing would be left.
    pub fn retain(&mut self, mut keep: impl FnMut(&TokenData) -> bool) {
        let kept = self.data.iter().filter(|t| keep(t)).count();
        if kept == 0 {
            self.truncate(1);
            return;
        }
        self.data.retain(|t| keep(t));
        self.selected = None;
    }

    /// True when some candidate can still be selected.
    pub fn any_finite(&self) -> bool {
        self.data.iter().any(|t| t.logit.is_finite())
    }

    /// Index of the highest finite logit, ties broken towards the lowest id.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<usize> = None;
        for (i, t) in self.data.iter().enumerate() {
            if !t.logit.is_finite() {
                continue;
            }
            let better = match best {
                None => true,
                Some(b) => {
                    let b = &self.data[b];
                    t.logit > b.logit || (t.logit == b.logit && t.id < b.id)
                }
            };
            if better {
                best = Some(i);
            }
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fill_covers_vocabulary() {
        let c = Candidates::from_logits(&[0.5, -1.0, 2.0]);
        assert_eq!(c.len(), 3);
        assert!(!c.is_sorted());
        assert!(c.selected().is_none());
        assert_eq!(c.as_slice()[1], TokenData { id: 1, logit: -1.0, p: 0.0 });
    }

    #[test]
    fn test_sort_is_stable() {
        let mut c = Candidates::from_logits(&[1.0, 5.0, 2.0, 5.0, 0.0]);
        c.sort_by_logit();
        let ids: Vec<u32> = c.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3, 2, 0, 4]);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let mut c = Candidates::from_logits(&[1.0, 2.0, f32::NEG_INFINITY, 3.0]);
        c.softmax();
        let sum: f32 = c.iter().map(|t| t.p).sum();
        assert_relative_eq!(sum, 1.0, epsilon = 1e-6);
        assert_eq!(c.as_slice()[3].id, 2);
        assert_eq!(c.as_slice()[3].p, 0.0);
        assert!(c.as_slice()[0].p > c.as_slice()[1].p);
    }

    #[test]
    fn test_softmax_all_excluded() {
        let mut c = Candidates::from_logits(&[f32::NEG_INFINITY; 3]);
        c.softmax();
        assert!(c.iter().all(|t| t.p == 0.0));
        assert!(!c.any_finite());
        assert!(c.argmax().is_none());
    }

    #[test]
    fn test_argmax_ties_to_lowest_id() {
        let c = Candidates::from_logits(&[1.0, 5.0, 2.0, 5.0, 0.0]);
        assert_eq!(c.argmax(), Some(1));
    }

    #[test]
    fn test_truncate_and_retain_keep_one() {
        let mut c = Candidates::from_logits(&[1.0, 2.0, 3.0]);
        c.sort_by_logit();
        c.retain(|t| t.logit > 10.0);
        assert_eq!(c.len(), 1);
        assert_eq!(c.as_slice()[0].id, 2);
        c.truncate(0);
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn test_selection_follows_sort() {
        let mut c = Candidates::from_logits(&[1.0, 3.0, 2.0]);
        c.select(0);
        c.sort_by_logit();
        assert_eq!(c.selected().map(|t| t.id), Some(0));
    }
}
