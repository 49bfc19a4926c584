//! Enumeration of model subsets.
//!
//! Subsets are produced size by size (2, 3, ..., n) and, within one size, in
//! lexicographic order of their increasing index positions. Result tables rely
//! on this order being stable across runs.

/// Iterator over every `r`-subset of `0..n` as increasing index vectors
#[derive(Clone, Debug)]
pub struct Combinations {
    n: usize,
    indices: Vec<usize>,
    started: bool,
    done: bool,
}

impl Combinations {
    pub fn new(n: usize, r: usize) -> Combinations {
        Combinations {
            n,
            indices: (0..r).collect(),
            started: false,
            done: r > n,
        }
    }
}

impl Iterator for Combinations {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            return Some(self.indices.clone());
        }

        let r = self.indices.len();
        // rightmost position that can still move right
        let pivot = (0..r).rev().find(|&i| self.indices[i] < self.n - r + i);
        match pivot {
            Some(i) => {
                self.indices[i] += 1;
                for j in i + 1..r {
                    self.indices[j] = self.indices[j - 1] + 1;
                }
                Some(self.indices.clone())
            }
            None => {
                self.done = true;
                None
            }
        }
    }
}

/// Iterator over every subset of `0..n` of size `min_size` or more, size ascending
#[derive(Clone, Debug)]
pub struct Subsets {
    n: usize,
    size: usize,
    current: Combinations,
}

impl Subsets {
    pub fn new(n: usize, min_size: usize) -> Subsets {
        Subsets {
            n,
            size: min_size,
            current: Combinations::new(n, min_size),
        }
    }
}

impl Iterator for Subsets {
    type Item = Vec<usize>;

    fn next(&mut self) -> Option<Vec<usize>> {
        while self.size <= self.n {
            if let Some(subset) = self.current.next() {
                return Some(subset);
            }
            self.size += 1;
            self.current = Combinations::new(self.n, self.size);
        }
        None
    }
}

/// Number of subsets of size two or more among `n` models: 2^n - n - 1
pub fn combination_count(n: usize) -> u128 {
    if n >= 128 {
        return u128::MAX;
    }
    (1u128 << n) - n as u128 - 1
}

/// Enumerates the model subsets (size >= 2) of an ordered list of model names
#[derive(Clone, Debug)]
pub struct CombinationEnumerator {
    names: Vec<String>,
}

impl CombinationEnumerator {
    pub fn new<S: AsRef<str>>(names: &[S]) -> CombinationEnumerator {
        CombinationEnumerator {
            names: names.iter().map(|n| n.as_ref().to_string()).collect(),
        }
    }

    /// A fresh pass over every subset, as index positions into the names.
    /// Empty when fewer than two names were given.
    pub fn iter(&self) -> Subsets {
        Subsets::new(self.names.len(), 2)
    }

    /// Same order as `iter`, yielding model names
    pub fn iter_names(&self) -> impl Iterator<Item = Vec<&str>> + '_ {
        self.iter()
            .map(move |subset| subset.iter().map(|&i| self.names[i].as_str()).collect())
    }

    pub fn count(&self) -> u128 {
        combination_count(self.names.len())
    }
}
