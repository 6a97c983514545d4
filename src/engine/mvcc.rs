//! engine/mvcc — многоверсионная карта ключей.
//!
//! Модель:
//! - tables: table -> (key -> VersionChain), BTreeMap даёт возрастающий байтовый порядок ключей.
//! - VersionChain: версии (seq, Some(value) | None=tombstone) по возрастанию seq.
//! - Чтение "на seq": новейшая версия с v.seq <= seq; tombstone скрывает более старые.
//! - pins: refcount закреплённых seq (открытые снапшоты).
//!
//! GC:
//! - при записи в цепочку — локальная обрезка до версий, нужных голове и пинам;
//! - при снятии самого старого пина — полный проход (release_pin возвращает число удалённых версий).

use std::collections::BTreeMap;

use super::{KeyRange, Seq, WriteOp};

#[derive(Debug, Default, Clone)]
pub(crate) struct VersionChain {
    versions: Vec<(Seq, Option<Vec<u8>>)>,
}

impl VersionChain {
    fn visible_at(&self, seq: Seq) -> Option<&Option<Vec<u8>>> {
        self.versions
            .iter()
            .rev()
            .find(|(s, _)| *s <= seq)
            .map(|(_, v)| v)
    }

    fn push(&mut self, seq: Seq, value: Option<Vec<u8>>) {
        // Внутри одного коммита несколько операций над ключом: побеждает последняя.
        if let Some(last) = self.versions.last_mut() {
            if last.0 == seq {
                last.1 = value;
                return;
            }
        }
        self.versions.push((seq, value));
    }

    /// Оставить только версии, видимые голове или хотя бы одному пину. Возвращает
    /// число удалённых версий.
    fn prune(&mut self, pins: &BTreeMap<Seq, usize>) -> usize {
        let before = self.versions.len();
        if before <= 1 && !self.is_lone_tombstone() {
            return 0;
        }
        let n = self.versions.len();
        let mut keep = vec![false; n];
        keep[n - 1] = true;
        for &pin in pins.keys() {
            if let Some(idx) = self.versions.iter().rposition(|(s, _)| *s <= pin) {
                keep[idx] = true;
            }
        }
        let mut i = 0;
        self.versions.retain(|_| {
            let k = keep[i];
            i += 1;
            k
        });
        // Самая старая уцелевшая версия — tombstone: под ней ничего нет, её можно убрать.
        while matches!(self.versions.first(), Some((_, None))) {
            self.versions.remove(0);
        }
        before - self.versions.len()
    }

    fn is_lone_tombstone(&self) -> bool {
        self.versions.len() == 1 && self.versions[0].1.is_none()
    }

    fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    fn len(&self) -> usize {
        self.versions.len()
    }
}

#[derive(Debug, Default)]
pub(crate) struct Versions {
    tables: BTreeMap<Vec<u8>, BTreeMap<Vec<u8>, VersionChain>>,
    pins: BTreeMap<Seq, usize>,
    seq: Seq,
}

impl Versions {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn seq(&self) -> Seq {
        self.seq
    }

    pub(crate) fn pin(&mut self) -> Seq {
        *self.pins.entry(self.seq).or_insert(0) += 1;
        self.seq
    }

    /// Снять пин. Если исчез самый старый пин — полный GC. Возвращает число удалённых версий.
    pub(crate) fn release_pin(&mut self, seq: Seq) -> usize {
        let oldest_before = self.pins.keys().next().copied();
        match self.pins.get_mut(&seq) {
            Some(cnt) if *cnt > 1 => {
                *cnt -= 1;
                return 0;
            }
            Some(_) => {
                self.pins.remove(&seq);
            }
            None => return 0,
        }
        if oldest_before == Some(seq) && self.pins.keys().next() != Some(&seq) {
            self.prune_all()
        } else {
            0
        }
    }

    pub(crate) fn pinned_count(&self) -> usize {
        self.pins.values().sum()
    }

    pub(crate) fn get(&self, table: &[u8], key: &[u8], at: Seq) -> Option<Vec<u8>> {
        self.tables
            .get(table)
            .and_then(|t| t.get(key))
            .and_then(|c| c.visible_at(at))
            .and_then(|v| v.clone())
    }

    pub(crate) fn seek(
        &self,
        table: &[u8],
        range: &KeyRange,
        after: Option<&[u8]>,
        at: Seq,
    ) -> Option<(Vec<u8>, Vec<u8>)> {
        let t = self.tables.get(table)?;
        let bounds = range.bounds_after(after)?;
        for (k, chain) in t.range::<[u8], _>(bounds) {
            if let Some(Some(v)) = chain.visible_at(at) {
                return Some((k.clone(), v.clone()));
            }
        }
        None
    }

    /// Применить операции одним коммитом с номером seq (seq должен быть > текущего).
    /// Возвращает число версий, удалённых локальным GC.
    pub(crate) fn apply_at(&mut self, seq: Seq, ops: &[WriteOp]) -> usize {
        debug_assert!(seq > self.seq);
        let mut pruned = 0usize;
        for op in ops {
            let (table, key, value) = match op {
                WriteOp::Put { table, key, value } => (table, key, Some(value.clone())),
                WriteOp::Delete { table, key } => (table, key, None),
            };
            if value.is_none() && self.pins.is_empty() {
                // Никто не держит старые версии — удаление физическое.
                if let Some(t) = self.tables.get_mut(table.as_slice()) {
                    if let Some(chain) = t.remove(key.as_slice()) {
                        pruned += chain.len();
                    }
                    if t.is_empty() {
                        self.tables.remove(table.as_slice());
                    }
                }
                continue;
            }
            let chain = self
                .tables
                .entry(table.clone())
                .or_default()
                .entry(key.clone())
                .or_default();
            chain.push(seq, value);
            pruned += chain.prune(&self.pins);
            if chain.is_empty() {
                if let Some(t) = self.tables.get_mut(table.as_slice()) {
                    t.remove(key.as_slice());
                    if t.is_empty() {
                        self.tables.remove(table.as_slice());
                    }
                }
            }
        }
        self.seq = seq;
        pruned
    }

    fn prune_all(&mut self) -> usize {
        let pins = &self.pins;
        let mut pruned = 0usize;
        for t in self.tables.values_mut() {
            t.retain(|_, chain| {
                pruned += chain.prune(pins);
                !chain.is_empty()
            });
        }
        self.tables.retain(|_, t| !t.is_empty());
        pruned
    }

    /// Живые пары таблицы на seq (для офлайн-дампа и компактации лога).
    pub(crate) fn table_entries(&self, table: &[u8], at: Seq) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut out = Vec::new();
        if let Some(t) = self.tables.get(table) {
            for (k, chain) in t {
                if let Some(Some(v)) = chain.visible_at(at) {
                    out.push((k.clone(), v.clone()));
                }
            }
        }
        out
    }

    pub(crate) fn table_ids(&self) -> Vec<Vec<u8>> {
        self.tables.keys().cloned().collect()
    }

    /// (keys, versions) по всем таблицам.
    pub(crate) fn counts(&self) -> (usize, usize) {
        let mut keys = 0usize;
        let mut versions = 0usize;
        for t in self.tables.values() {
            keys += t.len();
            versions += t.values().map(|c| c.len()).sum::<usize>();
        }
        (keys, versions)
    }
}
