//! Area-of-interest cache.
//!
//! Visibility queries dominate the snapshot phase, and most players stand
//! still most of the time. Each player keeps the result of their last
//! spatial query together with when and where it was taken; the query is
//! only re-run once enough ticks have passed or the player has moved far
//! enough that the cached set could be wrong in a way the client would
//! notice.

use std::collections::HashMap;

use meridian_protocol::Vec2;

pub struct AoiEntry {
    pub visible: Vec<u64>,
    pub last_update_tick: u64,
    pub last_position: Vec2,
}

pub struct AoiCache {
    entries: HashMap<u64, AoiEntry>,
    update_interval_ticks: u64,
    position_threshold: f32,
    hits: u64,
    executed: u64,
}

impl AoiCache {
    pub fn new(update_interval_ticks: u64, position_threshold: f32) -> Self {
        Self {
            entries: HashMap::new(),
            update_interval_ticks,
            position_threshold,
            hits: 0,
            executed: 0,
        }
    }

    /// True when the cached set (if any) can no longer be trusted:
    /// no entry, the tick budget elapsed, or the player moved past the
    /// distance threshold.
    pub fn should_update(&self, player_id: u64, position: Vec2, tick: u64) -> bool {
        match self.entries.get(&player_id) {
            None => true,
            Some(entry) => {
                tick.saturating_sub(entry.last_update_tick) >= self.update_interval_ticks
                    || position.distance_squared(entry.last_position)
                        >= self.position_threshold * self.position_threshold
            }
        }
    }

    /// Store a freshly queried visible set and count the execution.
    pub fn refresh(&mut self, player_id: u64, position: Vec2, tick: u64, visible: Vec<u64>) -> &[u64] {
        self.executed += 1;
        let entry = self.entries.entry(player_id).or_insert_with(|| AoiEntry {
            visible: Vec::new(),
            last_update_tick: 0,
            last_position: Vec2::default(),
        });
        entry.visible = visible;
        entry.last_update_tick = tick;
        entry.last_position = position;
        &entry.visible
    }

    /// Reuse the cached set and count the hit. Callers must have checked
    /// `should_update` first; a missing entry yields the empty set.
    pub fn cached(&mut self, player_id: u64) -> &[u64] {
        self.hits += 1;
        self.entries.get(&player_id).map(|e| e.visible.as_slice()).unwrap_or(&[])
    }

    pub fn remove(&mut self, player_id: u64) {
        self.entries.remove(&player_id);
    }

    /// `(hits, executed)` since the last reset.
    pub fn stats(&self) -> (u64, u64) {
        (self.hits, self.executed)
    }

    pub fn reset_stats(&mut self) {
        self.hits = 0;
        self.executed = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entry_forces_update() {
        let cache = AoiCache::new(3, 10.0);
        assert!(cache.should_update(1, Vec2::default(), 0));
    }

    #[test]
    fn fresh_entry_is_reused() {
        let mut cache = AoiCache::new(3, 10.0);
        let pos = Vec2::new(50.0, 50.0);
        cache.refresh(1, pos, 10, vec![1, 2]);
        // One tick later, barely moved: still fresh.
        assert!(!cache.should_update(1, Vec2::new(51.0, 50.0), 11));
        assert_eq!(cache.cached(1), &[1, 2]);
        assert_eq!(cache.stats(), (1, 1));
    }

    #[test]
    fn tick_interval_invalidates() {
        let mut cache = AoiCache::new(3, 10.0);
        let pos = Vec2::new(50.0, 50.0);
        cache.refresh(1, pos, 10, vec![1]);
        assert!(!cache.should_update(1, pos, 12));
        assert!(cache.should_update(1, pos, 13));
    }

    #[test]
    fn movement_threshold_invalidates() {
        let mut cache = AoiCache::new(100, 10.0);
        cache.refresh(1, Vec2::new(50.0, 50.0), 10, vec![1]);
        assert!(!cache.should_update(1, Vec2::new(59.0, 50.0), 11));
        assert!(cache.should_update(1, Vec2::new(60.0, 50.0), 11));
    }

    #[test]
    fn remove_forgets_the_entry() {
        let mut cache = AoiCache::new(3, 10.0);
        cache.refresh(1, Vec2::default(), 0, vec![1]);
        cache.remove(1);
        assert!(cache.should_update(1, Vec2::default(), 0));
    }
}
