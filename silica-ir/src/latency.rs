//! Clock-cycle latency intervals and the partial order over them.
use std::collections::HashSet;
use std::fmt;
use std::hash::Hash;

/// The number of clock cycles between a component receiving its go and
/// producing a result, as a closed interval `[min, max]`. A latency with no
/// upper bound is *open*: the operation takes at least `min` cycles but may
/// take arbitrarily many (data-dependent stalls, unbounded loops).
///
/// Latencies form a partial order. `[2, 2]` is definitely greater than
/// `[0, 1]`, but `[0, 4]` and `[2, 3]` are incomparable, and nothing is ever
/// definitely greater than an open latency.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Latency {
    min: u32,
    max: Option<u32>,
}

impl Latency {
    /// Exactly zero cycles: combinational.
    pub const ZERO: Latency = Latency {
        min: 0,
        max: Some(0),
    };

    /// Exactly one cycle: a registered result.
    pub const ONE: Latency = Latency {
        min: 1,
        max: Some(1),
    };

    /// A latency of exactly `clocks` cycles.
    pub fn fixed(clocks: u32) -> Self {
        Latency {
            min: clocks,
            max: Some(clocks),
        }
    }

    /// A bounded latency between `min` and `max` cycles inclusive.
    ///
    /// # Panics
    /// Panics if `max < min`.
    pub fn range(min: u32, max: u32) -> Self {
        assert!(min <= max, "latency range [{min}, {max}] is inverted");
        Latency {
            min,
            max: Some(max),
        }
    }

    /// A latency of at least `min` cycles with no upper bound.
    pub fn open(min: u32) -> Self {
        Latency { min, max: None }
    }

    pub fn min_clocks(&self) -> u32 {
        self.min
    }

    /// The upper bound, or `None` for an open latency.
    pub fn max_clocks(&self) -> Option<u32> {
        self.max
    }

    pub fn is_open(&self) -> bool {
        self.max.is_none()
    }

    /// True when the interval is a single point.
    pub fn is_fixed(&self) -> bool {
        self.max == Some(self.min)
    }

    /// Sequential composition. Openness is contagious: once either side is
    /// open the sum has no upper bound, only the summed minimum.
    pub fn add(&self, other: &Latency) -> Latency {
        let min = self.min + other.min;
        match (self.max, other.max) {
            (Some(a), Some(b)) => Latency {
                min,
                max: Some(a + b),
            },
            _ => Latency { min, max: None },
        }
    }

    /// True when every execution of `self` finishes strictly after every
    /// execution of `other`. False whenever `other` is open, or the
    /// intervals overlap.
    pub fn definitely_gt(&self, other: &Latency) -> bool {
        match other.max {
            Some(max) => self.min > max,
            None => false,
        }
    }

    /// Like [`definitely_gt`](Self::definitely_gt) but allowing equality of
    /// the bounds.
    pub fn definitely_ge(&self, other: &Latency) -> bool {
        match other.max {
            Some(max) => self.min >= max,
            None => false,
        }
    }

    /// Reduce `entries` to the set of maximal latencies under
    /// [`definitely_gt`](Self::definitely_gt). Anything provably earlier
    /// than another entry is dropped; incomparable entries are all kept, so
    /// the result may have more than one element.
    ///
    /// Two entries with the same fixed latency collapse to one. The survivor
    /// is the first one drawn from `preferred`, falling back to the earlier
    /// entry, which keeps the choice deterministic. Equal *open* latencies
    /// are not collapsed: two open intervals with the same minimum still
    /// describe unrelated completion times.
    pub fn latest_of<K>(
        entries: &[(K, Latency)],
        preferred: &HashSet<K>,
    ) -> Vec<(K, Latency)>
    where
        K: Copy + Eq + Hash,
    {
        let mut latest: Vec<(K, Latency)> = Vec::new();
        'entries: for &(key, lat) in entries {
            let mut keep = Vec::with_capacity(latest.len() + 1);
            for &(held_key, held) in latest.iter() {
                let tie = held == lat && lat.is_fixed();
                if held.definitely_gt(&lat)
                    || (tie
                        && (preferred.contains(&held_key)
                            || !preferred.contains(&key)))
                {
                    // A held entry covers the new one; the set is unchanged.
                    continue 'entries;
                }
                if !lat.definitely_gt(&held) && !tie {
                    keep.push((held_key, held));
                }
            }
            keep.push((key, lat));
            latest = keep;
        }
        latest
    }
}

impl fmt::Debug for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "[{}]", self.min),
            Some(max) => write!(f, "[{}, {}]", self.min, max),
            None => write!(f, "[{}, open]", self.min),
        }
    }
}

impl fmt::Display for Latency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::Latency;
    use std::collections::HashSet;

    #[test]
    fn add_propagates_openness() {
        let a = Latency::fixed(2);
        let b = Latency::range(1, 3);
        assert_eq!(a.add(&b), Latency::range(3, 5));

        let open = Latency::open(4);
        let sum = a.add(&open);
        assert!(sum.is_open());
        assert_eq!(sum.min_clocks(), 6);
        assert_eq!(open.add(&open).min_clocks(), 8);
    }

    #[test]
    fn definitely_gt_is_a_partial_order() {
        assert!(Latency::fixed(2).definitely_gt(&Latency::range(0, 1)));
        assert!(!Latency::range(0, 4).definitely_gt(&Latency::range(2, 3)));
        assert!(!Latency::range(2, 3).definitely_gt(&Latency::range(0, 4)));
        // Nothing beats an open latency.
        assert!(!Latency::fixed(100).definitely_gt(&Latency::open(0)));
        // But an open latency can beat a bounded one.
        assert!(Latency::open(5).definitely_gt(&Latency::fixed(3)));
        assert!(Latency::fixed(2).definitely_ge(&Latency::fixed(2)));
        assert!(!Latency::fixed(2).definitely_gt(&Latency::fixed(2)));
    }

    #[test]
    fn latest_of_keeps_maximal_entries() {
        let entries = [
            ("a", Latency::fixed(1)),
            ("b", Latency::fixed(4)),
            ("c", Latency::range(2, 6)),
        ];
        let latest = Latency::latest_of(&entries, &HashSet::new());
        // `b` and `c` are incomparable; `a` is dominated by both.
        let keys: Vec<_> = latest.iter().map(|(k, _)| *k).collect();
        assert_eq!(keys, vec!["b", "c"]);
    }

    #[test]
    fn latest_of_breaks_fixed_ties_by_preference() {
        let entries = [
            ("a", Latency::fixed(3)),
            ("b", Latency::fixed(3)),
            ("c", Latency::fixed(3)),
        ];
        let preferred: HashSet<_> = ["b"].into_iter().collect();
        let latest = Latency::latest_of(&entries, &preferred);
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].0, "b");

        // Without a preference the earliest entry survives.
        let latest = Latency::latest_of(&entries, &HashSet::new());
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].0, "a");
    }

    #[test]
    fn latest_of_never_collapses_open_latencies() {
        let entries = [("a", Latency::open(2)), ("b", Latency::open(2))];
        let latest = Latency::latest_of(&entries, &HashSet::new());
        assert_eq!(latest.len(), 2);
    }
}
