//! Ordered show plan with weight maintenance

use super::item::PlanItem;
use serde::{Serialize, Serializer};
use serde_json::Value;

/// Plan-local handle for one entry
///
/// Stays attached to the entry through weight renumbering, so a holder can
/// find "the same logical entry" after other items move around it. Handles
/// are never reused within one plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryKey(u64);

#[derive(Debug, Clone)]
struct PlanEntry {
    key: EntryKey,
    item: PlanItem,
}

/// Ordered collection of plan items for one channel
///
/// Weights are kept contiguous (`0..len`) after every insert and remove.
#[derive(Debug, Clone, Default)]
pub struct ShowPlan {
    entries: Vec<PlanEntry>,
    next_key: u64,
}

impl ShowPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a plan from items in their stored order
    pub fn from_items(items: impl IntoIterator<Item = PlanItem>) -> Self {
        let mut plan = Self::new();
        for item in items {
            plan.push_entry(item);
        }
        plan.fix_and_update_weights();
        plan
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PlanItem> {
        self.entries.iter().map(|e| &e.item)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut PlanItem> {
        self.entries.iter_mut().map(|e| &mut e.item)
    }

    pub fn get(&self, weight: i64) -> Option<&PlanItem> {
        self.entries.iter().find(|e| e.item.weight == weight).map(|e| &e.item)
    }

    pub fn get_mut(&mut self, weight: i64) -> Option<&mut PlanItem> {
        self.entries
            .iter_mut()
            .find(|e| e.item.weight == weight)
            .map(|e| &mut e.item)
    }

    pub fn key_at(&self, weight: i64) -> Option<EntryKey> {
        self.entries.iter().find(|e| e.item.weight == weight).map(|e| e.key)
    }

    pub fn entry(&self, key: EntryKey) -> Option<&PlanItem> {
        self.entries.iter().find(|e| e.key == key).map(|e| &e.item)
    }

    pub fn entry_mut(&mut self, key: EntryKey) -> Option<&mut PlanItem> {
        self.entries.iter_mut().find(|e| e.key == key).map(|e| &mut e.item)
    }

    /// Every entry carrying `id`
    pub fn items_with_id_mut<'a>(&'a mut self, id: &'a str) -> impl Iterator<Item = &'a mut PlanItem> + 'a {
        self.entries
            .iter_mut()
            .filter(move |e| e.item.id == id)
            .map(|e| &mut e.item)
    }

    /// Insert an item at its requested weight
    ///
    /// Every entry at or after that weight moves up by one. A negative or
    /// out-of-range weight appends.
    pub fn insert(&mut self, mut item: PlanItem) -> EntryKey {
        let len = self.entries.len() as i64;
        if item.weight < 0 || item.weight > len {
            item.weight = len;
        }
        for entry in &mut self.entries {
            if entry.item.weight >= item.weight {
                entry.item.weight += 1;
            }
        }
        let key = self.push_entry(item);
        self.fix_and_update_weights();
        key
    }

    /// Remove the entry at `weight` and close the gap
    pub fn remove(&mut self, weight: i64) -> Option<(EntryKey, PlanItem)> {
        let index = self.entries.iter().position(|e| e.item.weight == weight)?;
        let entry = self.entries.remove(index);
        self.fix_and_update_weights();
        Some((entry.key, entry.item))
    }

    /// Remove every entry, returning them in plan order
    pub fn clear(&mut self) -> Vec<(EntryKey, PlanItem)> {
        self.entries.drain(..).map(|e| (e.key, e.item)).collect()
    }

    /// Stable-sort by weight, then renumber to positional indices
    ///
    /// Repairs gaps and collisions; entries with equal weights keep their
    /// relative order.
    pub fn fix_and_update_weights(&mut self) {
        self.entries.sort_by_key(|e| e.item.weight);
        for (index, entry) in self.entries.iter_mut().enumerate() {
            entry.item.weight = index as i64;
        }
    }

    /// Plan as a JSON array of item records
    pub fn to_value(&self) -> Value {
        Value::Array(self.iter().map(PlanItem::to_value).collect())
    }

    fn push_entry(&mut self, item: PlanItem) -> EntryKey {
        let key = EntryKey(self.next_key);
        self.next_key += 1;
        self.entries.push(PlanEntry { key, item });
        key
    }
}

impl Serialize for ShowPlan {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::ContentRef;

    fn item(id: &str, weight: i64) -> PlanItem {
        PlanItem::new(id, weight, id.to_uppercase(), ContentRef::File(format!("{}.mp3", id)))
    }

    fn ids(plan: &ShowPlan) -> Vec<&str> {
        plan.iter().map(|i| i.id.as_str()).collect()
    }

    fn assert_contiguous(plan: &ShowPlan) {
        let weights: Vec<i64> = plan.iter().map(|i| i.weight).collect();
        let expected: Vec<i64> = (0..plan.len() as i64).collect();
        assert_eq!(weights, expected);
    }

    #[test]
    fn test_insert_shifts_later_items() {
        let mut plan = ShowPlan::from_items([item("a", 0), item("b", 1), item("c", 2)]);
        plan.insert(item("x", 1));

        assert_eq!(ids(&plan), ["a", "x", "b", "c"]);
        assert_contiguous(&plan);
    }

    #[test]
    fn test_insert_out_of_range_appends() {
        let mut plan = ShowPlan::from_items([item("a", 0)]);
        plan.insert(item("x", 40));
        plan.insert(item("y", -1));

        assert_eq!(ids(&plan), ["a", "x", "y"]);
        assert_contiguous(&plan);
    }

    #[test]
    fn test_remove_renumbers() {
        let mut plan = ShowPlan::from_items([item("a", 0), item("b", 1), item("c", 2)]);
        let (_, removed) = plan.remove(1).unwrap();

        assert_eq!(removed.id, "b");
        assert_eq!(ids(&plan), ["a", "c"]);
        assert_contiguous(&plan);
        assert!(plan.remove(7).is_none());
    }

    #[test]
    fn test_fix_weights_repairs_gaps_and_collisions() {
        let plan = ShowPlan::from_items([item("a", 5), item("b", 2), item("c", 5), item("d", 0)]);
        assert_eq!(ids(&plan), ["d", "b", "a", "c"]);
        assert_contiguous(&plan);
    }

    #[test]
    fn test_entry_key_follows_item_through_renumbering() {
        let mut plan = ShowPlan::from_items([item("a", 0), item("b", 1)]);
        let key = plan.key_at(1).unwrap();

        plan.insert(item("x", 0));
        assert_eq!(plan.entry(key).unwrap().id, "b");
        assert_eq!(plan.entry(key).unwrap().weight, 2);

        plan.remove(0);
        assert_eq!(plan.entry(key).unwrap().weight, 1);
    }

    #[test]
    fn test_random_edit_sequences_keep_weights_contiguous() {
        // Deterministic pseudo-random sequence of inserts and removes
        let mut plan = ShowPlan::new();
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for step in 0..500 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let len = plan.len() as i64;
            if seed % 3 == 0 && len > 0 {
                let weight = ((seed / 3) % len as u64) as i64;
                assert!(plan.remove(weight).is_some());
            } else {
                let weight = ((seed / 3) % (len as u64 + 2)) as i64 - 1;
                plan.insert(item(&format!("i{}", step), weight));
            }
            assert_contiguous(&plan);
        }
    }

    #[test]
    fn test_insert_at_weight_grows_by_one() {
        for w in 0..=3 {
            let mut plan = ShowPlan::from_items([item("a", 0), item("b", 1), item("c", 2)]);
            let before: Vec<(String, i64)> = plan.iter().map(|i| (i.id.clone(), i.weight)).collect();
            plan.insert(item("new", w));

            assert_eq!(plan.len(), 4);
            assert_eq!(plan.get(w).unwrap().id, "new");
            for (id, old_weight) in before {
                let now = plan.iter().find(|i| i.id == id).unwrap().weight;
                let expected = if old_weight >= w { old_weight + 1 } else { old_weight };
                assert_eq!(now, expected, "item {} inserted at {}", id, w);
            }
        }
    }

    #[test]
    fn test_clear_returns_entries_in_order() {
        let mut plan = ShowPlan::from_items([item("a", 0), item("b", 1)]);
        let cleared = plan.clear();
        assert!(plan.is_empty());
        assert_eq!(cleared.len(), 2);
        assert_eq!(cleared[0].1.id, "a");
    }
}
