//! Cache Eviction Policy
//!
//! Simplified two-queue replacement over store slots.
//!
//! - **Recent**: blocks loaded by a miss and not hit since.
//! - **Frequent**: blocks hit at least once while resident.
//!
//! A miss admits the block at the MRU end of Recent. A hit moves the block to
//! the MRU end of Frequent, whichever segment it was in; blocks never move
//! back to Recent. Victims come from the LRU end of Recent, and from the LRU
//! end of Frequent only once Recent is empty. There is no adaptive balancing
//! of segment sizes.
//!
//! Both segments are doubly-linked lists threaded through a `Vec` indexed by
//! slot id, so every operation is O(1).

use serde::Serialize;

use super::entry::SlotId;

/// Segment a resident block belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Segment {
    /// Loaded once, not hit since
    Recent,
    /// Hit while resident
    Frequent,
}

impl std::fmt::Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Segment::Recent => write!(f, "recent"),
            Segment::Frequent => write!(f, "frequent"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Link {
    prev: Option<usize>,
    next: Option<usize>,
    segment: Option<Segment>,
}

/// Head (LRU) and tail (MRU) of one segment
#[derive(Debug, Clone, Copy, Default)]
struct Ends {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

/// Two-segment recency/frequency eviction policy
#[derive(Debug, Default)]
pub struct EvictionPolicy {
    links: Vec<Link>,
    recent: Ends,
    frequent: Ends,
}

impl EvictionPolicy {
    /// Create a policy sized for `capacity` slots
    pub fn new(capacity: usize) -> Self {
        Self {
            links: vec![Link::default(); capacity],
            ..Self::default()
        }
    }

    /// Record a freshly loaded block at the MRU end of Recent
    pub fn admit(&mut self, slot: SlotId) {
        self.ensure_slot(slot.0);
        self.unlink(slot.0);
        self.push_mru(slot.0, Segment::Recent);
    }

    /// Record a hit: move the block to the MRU end of Frequent.
    ///
    /// Returns the segment the block was in before the hit, or `None` if the
    /// slot was not tracked (in which case it is admitted to Frequent).
    pub fn touch(&mut self, slot: SlotId) -> Option<Segment> {
        self.ensure_slot(slot.0);
        let previous = self.unlink(slot.0);
        self.push_mru(slot.0, Segment::Frequent);
        previous
    }

    /// Stop tracking a slot
    pub fn remove(&mut self, slot: SlotId) -> Option<Segment> {
        if slot.0 >= self.links.len() {
            return None;
        }
        self.unlink(slot.0)
    }

    /// Next eviction candidate: Recent LRU, else Frequent LRU
    pub fn victim(&self) -> Option<SlotId> {
        self.recent.head.or(self.frequent.head).map(SlotId)
    }

    /// Segment currently holding a slot
    pub fn segment_of(&self, slot: SlotId) -> Option<Segment> {
        self.links.get(slot.0).and_then(|l| l.segment)
    }

    /// Slots of a segment ordered LRU → MRU
    pub fn order(&self, segment: Segment) -> Vec<SlotId> {
        let mut out = Vec::with_capacity(self.ends(segment).len);
        let mut cursor = self.ends(segment).head;
        while let Some(idx) = cursor {
            out.push(SlotId(idx));
            cursor = self.links[idx].next;
        }
        out
    }

    pub fn recent_len(&self) -> usize {
        self.recent.len
    }

    pub fn frequent_len(&self) -> usize {
        self.frequent.len
    }

    /// Total tracked slots
    pub fn len(&self) -> usize {
        self.recent.len + self.frequent.len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -- Internal helpers --

    fn ensure_slot(&mut self, idx: usize) {
        if idx >= self.links.len() {
            self.links.resize(idx + 1, Link::default());
        }
    }

    fn ends(&self, segment: Segment) -> &Ends {
        match segment {
            Segment::Recent => &self.recent,
            Segment::Frequent => &self.frequent,
        }
    }

    fn ends_mut(&mut self, segment: Segment) -> &mut Ends {
        match segment {
            Segment::Recent => &mut self.recent,
            Segment::Frequent => &mut self.frequent,
        }
    }

    fn unlink(&mut self, idx: usize) -> Option<Segment> {
        let Link {
            prev,
            next,
            segment,
        } = self.links[idx];
        let segment = segment?;

        match prev {
            Some(p) => self.links[p].next = next,
            None => self.ends_mut(segment).head = next,
        }
        match next {
            Some(n) => self.links[n].prev = prev,
            None => self.ends_mut(segment).tail = prev,
        }

        self.ends_mut(segment).len -= 1;
        self.links[idx] = Link::default();
        Some(segment)
    }

    fn push_mru(&mut self, idx: usize, segment: Segment) {
        let tail = self.ends(segment).tail;
        self.links[idx] = Link {
            prev: tail,
            next: None,
            segment: Some(segment),
        };

        match tail {
            Some(t) => self.links[t].next = Some(idx),
            None => self.ends_mut(segment).head = Some(idx),
        }

        let ends = self.ends_mut(segment);
        ends.tail = Some(idx);
        ends.len += 1;
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn slots(ids: &[usize]) -> Vec<SlotId> {
        ids.iter().copied().map(SlotId).collect()
    }

    #[test]
    fn test_policy_admit_orders_recent() {
        let mut policy = EvictionPolicy::new(4);
        for i in 0..3 {
            policy.admit(SlotId(i));
        }

        assert_eq!(policy.order(Segment::Recent), slots(&[0, 1, 2]));
        assert_eq!(policy.recent_len(), 3);
        assert_eq!(policy.frequent_len(), 0);
        assert_eq!(policy.victim(), Some(SlotId(0)));
    }

    #[test]
    fn test_policy_hit_promotes_to_frequent() {
        let mut policy = EvictionPolicy::new(4);
        for i in 0..3 {
            policy.admit(SlotId(i));
        }

        assert_eq!(policy.touch(SlotId(0)), Some(Segment::Recent));
        assert_eq!(policy.segment_of(SlotId(0)), Some(Segment::Frequent));
        assert_eq!(policy.order(Segment::Recent), slots(&[1, 2]));
        assert_eq!(policy.victim(), Some(SlotId(1)));
    }

    #[test]
    fn test_policy_frequent_hit_moves_to_mru() {
        let mut policy = EvictionPolicy::new(4);
        for i in 0..3 {
            policy.admit(SlotId(i));
            policy.touch(SlotId(i));
        }
        assert_eq!(policy.order(Segment::Frequent), slots(&[0, 1, 2]));

        assert_eq!(policy.touch(SlotId(0)), Some(Segment::Frequent));
        assert_eq!(policy.order(Segment::Frequent), slots(&[1, 2, 0]));
    }

    #[test]
    fn test_policy_never_demotes() {
        let mut policy = EvictionPolicy::new(2);
        policy.admit(SlotId(0));
        policy.touch(SlotId(0));

        for _ in 0..5 {
            policy.touch(SlotId(0));
            assert_eq!(policy.segment_of(SlotId(0)), Some(Segment::Frequent));
        }
        assert_eq!(policy.recent_len(), 0);
    }

    #[test]
    fn test_policy_victim_falls_back_to_frequent() {
        let mut policy = EvictionPolicy::new(3);
        policy.admit(SlotId(0));
        policy.admit(SlotId(1));
        policy.touch(SlotId(1));
        policy.touch(SlotId(0));

        // Recent is empty; Frequent LRU is slot 1
        assert_eq!(policy.recent_len(), 0);
        assert_eq!(policy.victim(), Some(SlotId(1)));
    }

    #[test]
    fn test_policy_remove_middle_and_ends() {
        let mut policy = EvictionPolicy::new(5);
        for i in 0..5 {
            policy.admit(SlotId(i));
        }

        assert_eq!(policy.remove(SlotId(2)), Some(Segment::Recent));
        assert_eq!(policy.remove(SlotId(0)), Some(Segment::Recent));
        assert_eq!(policy.remove(SlotId(4)), Some(Segment::Recent));
        assert_eq!(policy.order(Segment::Recent), slots(&[1, 3]));

        assert_eq!(policy.remove(SlotId(2)), None);
        assert_eq!(policy.remove(SlotId(99)), None);
        assert_eq!(policy.len(), 2);
    }

    #[test]
    fn test_policy_empty_has_no_victim() {
        let mut policy = EvictionPolicy::new(1);
        assert!(policy.is_empty());
        assert_eq!(policy.victim(), None);

        policy.admit(SlotId(0));
        policy.remove(SlotId(0));
        assert_eq!(policy.victim(), None);
    }

    #[test]
    fn test_policy_readmit_resets_to_recent() {
        let mut policy = EvictionPolicy::new(2);
        policy.admit(SlotId(0));
        policy.touch(SlotId(0));

        // Slot reused for a different block after eviction
        policy.remove(SlotId(0));
        policy.admit(SlotId(0));
        assert_eq!(policy.segment_of(SlotId(0)), Some(Segment::Recent));
    }

    #[test]
    fn test_policy_grows_for_unknown_slots() {
        let mut policy = EvictionPolicy::new(0);
        policy.admit(SlotId(7));
        assert_eq!(policy.victim(), Some(SlotId(7)));
    }
}
