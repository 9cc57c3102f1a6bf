use crate::error::{OrchestraErr, Result};

/// A token stream cut into fixed-length training windows.
///
/// Every window holds `seq_len + 1` ids: the first `seq_len` are the inputs and the last
/// `seq_len` are the labels. Consecutive windows overlap by one id so every token of the
/// stream is predicted once.
#[derive(Debug, Clone)]
pub struct TokenWindows {
    seq_len: usize,
    ids: Vec<u32>,
    len: usize,
}

impl TokenWindows {
    /// Creates a new `TokenWindows` over `ids`. Trailing ids that don't fill a window are
    /// dropped.
    ///
    /// # Errors
    /// Returns `InvalidConfig` if `seq_len` is zero.
    pub fn new(ids: Vec<u32>, seq_len: usize) -> Result<Self> {
        if seq_len == 0 {
            return Err(OrchestraErr::InvalidConfig(
                "window length must be greater than 0".into(),
            ));
        }

        let len = ids.len().saturating_sub(1) / seq_len;
        Ok(Self { seq_len, ids, len })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Returns the `(inputs, labels)` of window `index`.
    pub fn get(&self, index: usize) -> Option<(&[u32], &[u32])> {
        if index >= self.len {
            return None;
        }

        let start = index * self.seq_len;
        let window = &self.ids[start..start + self.seq_len + 1];
        Some((&window[..self.seq_len], &window[1..]))
    }

    /// The id at `offset` (up to `seq_len`) of window `index`, which must be in range.
    pub(super) fn id(&self, index: usize, offset: usize) -> u32 {
        self.ids[index * self.seq_len + offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_overlap_by_one_token() {
        let windows = TokenWindows::new((0..10).collect(), 3).unwrap();

        assert_eq!(windows.len(), 3);
        assert_eq!(windows.get(0), Some((&[0, 1, 2][..], &[1, 2, 3][..])));
        assert_eq!(windows.get(1), Some((&[3, 4, 5][..], &[4, 5, 6][..])));
        assert_eq!(windows.get(2), Some((&[6, 7, 8][..], &[7, 8, 9][..])));
        assert_eq!(windows.get(3), None);
    }

    #[test]
    fn short_streams_have_no_windows() {
        let windows = TokenWindows::new(vec![1, 2, 3], 4).unwrap();
        assert!(windows.is_empty());
        assert!(TokenWindows::new(vec![], 4).unwrap().is_empty());
    }

    #[test]
    fn zero_length_windows_are_rejected() {
        assert!(TokenWindows::new(vec![1, 2, 3], 0).is_err());
    }
}
