//! Generational handle table.
//!
//! handle = (generation << 32) | slot, generation >= 1.
//! - 0 никогда не бывает валидным хэндлом;
//! - освобождённый слот при повторном использовании получает новое поколение,
//!   так что устаревший хэндл не попадает в чужую запись.

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug)]
pub struct HandleTable<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    limit: usize,
}

#[inline]
fn pack(generation: u32, slot: u32) -> u64 {
    ((generation as u64) << 32) | slot as u64
}

#[inline]
fn unpack(handle: u64) -> (u32, u32) {
    ((handle >> 32) as u32, handle as u32)
}

impl<T> HandleTable<T> {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// None — таблица заполнена до лимита.
    pub fn insert(&mut self, value: T) -> Option<u64> {
        if self.len >= self.limit {
            return None;
        }
        let slot = match self.free.pop() {
            Some(i) => i,
            None => {
                if self.slots.len() >= u32::MAX as usize {
                    return None;
                }
                self.slots.push(Slot {
                    generation: 1,
                    value: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let s = &mut self.slots[slot as usize];
        s.value = Some(value);
        self.len += 1;
        Some(pack(s.generation, slot))
    }

    pub fn get(&self, handle: u64) -> Option<&T> {
        let (generation, slot) = unpack(handle);
        let s = self.slots.get(slot as usize)?;
        if generation == 0 || s.generation != generation {
            return None;
        }
        s.value.as_ref()
    }

    pub fn remove(&mut self, handle: u64) -> Option<T> {
        let (generation, slot) = unpack(handle);
        let s = self.slots.get_mut(slot as usize)?;
        if generation == 0 || s.generation != generation {
            return None;
        }
        let v = s.value.take()?;
        s.generation = s.generation.wrapping_add(1).max(1);
        self.free.push(slot);
        self.len -= 1;
        Some(v)
    }

    /// Удалить все записи, для которых keep вернул false; вернуть удалённые.
    pub fn extract_if<F: FnMut(u64, &T) -> bool>(&mut self, mut keep: F) -> Vec<T> {
        let doomed: Vec<u64> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| {
                let h = pack(s.generation, i as u32);
                match &s.value {
                    Some(v) if !keep(h, v) => Some(h),
                    _ => None,
                }
            })
            .collect();
        doomed.into_iter().filter_map(|h| self.remove(h)).collect()
    }

    pub fn drain(&mut self) -> Vec<T> {
        self.extract_if(|_, _| false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_handle_does_not_alias_reused_slot() {
        let mut t = HandleTable::with_limit(4);
        let a = t.insert("a").unwrap();
        assert_eq!(t.remove(a), Some("a"));
        let b = t.insert("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a as u32, b as u32); // тот же слот
        assert_eq!(t.get(a), None);
        assert_eq!(t.remove(a), None);
        assert_eq!(t.get(b), Some(&"b"));
    }

    #[test]
    fn zero_and_garbage_handles_are_unknown() {
        let mut t = HandleTable::with_limit(4);
        let h = t.insert(1).unwrap();
        assert!(h >> 32 >= 1);
        assert_eq!(t.get(0), None);
        assert_eq!(t.get(h as u32 as u64), None); // поколение 0
        assert_eq!(t.get(h + 1), None);
    }

    #[test]
    fn limit_is_enforced_and_frees_on_remove() {
        let mut t = HandleTable::with_limit(2);
        let a = t.insert(1).unwrap();
        t.insert(2).unwrap();
        assert_eq!(t.insert(3), None);
        t.remove(a);
        assert!(t.insert(3).is_some());
        assert_eq!(t.len(), 2);
    }

    #[test]
    fn extract_if_removes_matching() {
        let mut t = HandleTable::with_limit(8);
        for i in 0..6 {
            t.insert(i).unwrap();
        }
        let mut gone = t.extract_if(|_, v| v % 2 == 0);
        gone.sort();
        assert_eq!(gone, vec![1, 3, 5]);
        assert_eq!(t.len(), 3);
        assert_eq!(t.drain().len(), 3);
        assert!(t.is_empty());
    }
}
