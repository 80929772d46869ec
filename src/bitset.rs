use std::hash::{Hash, Hasher};

/// Fixed-width set of snapshot indices.
///
/// Teams and games refer to match units by their position in the solve
/// snapshot, so membership and overlap tests are word operations.
#[derive(Clone, Debug, Default)]
pub struct UnitSet {
    words: Vec<u64>,
}

const WORD_BITS: usize = 64;

impl UnitSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(bits: usize) -> Self {
        Self {
            words: vec![0; (bits + WORD_BITS - 1) / WORD_BITS],
        }
    }

    pub fn insert(&mut self, index: usize) {
        let word = index / WORD_BITS;
        if word >= self.words.len() {
            self.words.resize(word + 1, 0);
        }
        self.words[word] |= 1 << (index % WORD_BITS);
    }

    pub fn contains(&self, index: usize) -> bool {
        self.words
            .get(index / WORD_BITS)
            .map(|w| w & (1 << (index % WORD_BITS)) != 0)
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&w| w == 0)
    }

    pub fn len(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }

    /// Highest index plus one, or zero for an empty set
    pub fn upper_bound(&self) -> usize {
        self.words
            .iter()
            .enumerate()
            .rev()
            .find(|(_, &w)| w != 0)
            .map(|(i, &w)| i * WORD_BITS + (WORD_BITS - w.leading_zeros() as usize))
            .unwrap_or(0)
    }

    pub fn intersects(&self, other: &UnitSet) -> bool {
        self.words
            .iter()
            .zip(other.words.iter())
            .any(|(a, b)| a & b != 0)
    }

    pub fn union_with(&mut self, other: &UnitSet) {
        if other.words.len() > self.words.len() {
            self.words.resize(other.words.len(), 0);
        }
        for (a, b) in self.words.iter_mut().zip(other.words.iter()) {
            *a |= b;
        }
    }

    /// Indices in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(i, &word)| {
            let mut rest = word;
            std::iter::from_fn(move || {
                if rest == 0 {
                    return None;
                }
                let bit = rest.trailing_zeros() as usize;
                rest &= rest - 1;
                Some(i * WORD_BITS + bit)
            })
        })
    }
}

impl UnitSet {
    /// Words up to the last non-zero one
    fn significant_words(&self) -> &[u64] {
        let len = self.words.iter().rposition(|&w| w != 0).map_or(0, |i| i + 1);
        &self.words[..len]
    }
}

// Capacity is not part of the value
impl PartialEq for UnitSet {
    fn eq(&self, other: &Self) -> bool {
        self.significant_words() == other.significant_words()
    }
}

impl Eq for UnitSet {}

impl Hash for UnitSet {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.significant_words().hash(state);
    }
}

impl FromIterator<usize> for UnitSet {
    fn from_iter<I: IntoIterator<Item = usize>>(iter: I) -> Self {
        let mut set = UnitSet::new();
        for index in iter {
            set.insert(index);
        }
        set
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_iterate_across_words() {
        let set: UnitSet = [130, 3, 64, 0].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec![0, 3, 64, 130]);
        assert_eq!(set.len(), 4);
        assert_eq!(set.upper_bound(), 131);
        assert!(set.contains(64));
        assert!(!set.contains(65));
        assert!(!set.contains(10_000));
    }

    #[test]
    fn test_intersects_and_union() {
        let mut a: UnitSet = [1, 2].into_iter().collect();
        let b: UnitSet = [2, 70].into_iter().collect();
        let c: UnitSet = [3].into_iter().collect();
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c));

        a.union_with(&b);
        assert_eq!(a.iter().collect::<Vec<_>>(), vec![1, 2, 70]);
    }

    #[test]
    fn test_equality_ignores_capacity() {
        let mut wide = UnitSet::with_capacity(300);
        wide.insert(5);
        let narrow: UnitSet = [5].into_iter().collect();
        assert_eq!(wide, narrow);
        assert_eq!(UnitSet::with_capacity(128), UnitSet::new());
    }

    #[test]
    fn test_empty_set() {
        let set = UnitSet::with_capacity(200);
        assert!(set.is_empty());
        assert_eq!(set.upper_bound(), 0);
        assert_eq!(set.iter().count(), 0);
    }
}
