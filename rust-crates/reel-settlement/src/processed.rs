use std::collections::BTreeSet;

/// Bounded record of settled sequence numbers.
///
/// Once more than `high_water` sequences are held, only the newest `retain`
/// are kept. The highest trimmed sequence becomes a floor: anything at or
/// below it still counts as processed, so trimming can never let an old
/// result through a second time.
#[derive(Clone, Debug)]
pub struct ProcessedSequenceSet {
    seen: BTreeSet<u64>,
    floor: Option<u64>,
    high_water: usize,
    retain: usize,
}

impl ProcessedSequenceSet {
    pub fn new(high_water: usize, retain: usize) -> Self {
        Self {
            seen: BTreeSet::new(),
            floor: None,
            high_water,
            retain: retain.min(high_water),
        }
    }

    pub fn contains(&self, sequence: u64) -> bool {
        self.floor.is_some_and(|floor| sequence <= floor) || self.seen.contains(&sequence)
    }

    /// Records `sequence`; `false` if it was already processed.
    pub fn insert(&mut self, sequence: u64) -> bool {
        if self.contains(sequence) {
            return false;
        }
        self.seen.insert(sequence);
        if self.seen.len() > self.high_water {
            self.trim();
        }
        true
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.floor = None;
    }

    fn trim(&mut self) {
        let drop_count = self.seen.len() - self.retain;
        let Some(&cutoff) = self.seen.iter().nth(drop_count) else {
            return;
        };
        let kept = self.seen.split_off(&cutoff);
        self.floor = self.seen.last().copied().max(self.floor);
        self.seen = kept;
        tracing::trace!(
            floor = ?self.floor,
            retained = self.seen.len(),
            "trimmed processed sequence set"
        );
    }
}
