/// Stable handle into a [`Slab`]. The generation makes a handle to a freed
/// slot miss even after the index is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotKey {
    index: u32,
    generation: u32,
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

pub(crate) struct Slab<T> {
    entries: Vec<Entry<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Slab<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }
}

impl<T> Slab<T> {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn insert(&mut self, value: T) -> SlotKey {
        self.len += 1;
        while let Some(index) = self.free.pop() {
            let Some(entry) = self.entries.get_mut(index as usize) else {
                continue;
            };
            let Entry::Vacant { generation } = *entry else {
                continue;
            };
            let generation = generation.wrapping_add(1);
            *entry = Entry::Occupied { generation, value };
            return SlotKey { index, generation };
        }
        let index = self.entries.len() as u32;
        self.entries.push(Entry::Occupied {
            generation: 0,
            value,
        });
        SlotKey {
            index,
            generation: 0,
        }
    }

    pub(crate) fn remove(&mut self, key: SlotKey) -> Option<T> {
        let entry = self.entries.get_mut(key.index as usize)?;
        match entry {
            Entry::Occupied { generation, .. } if *generation == key.generation => {}
            _ => return None,
        }
        let vacant = Entry::Vacant {
            generation: key.generation,
        };
        match std::mem::replace(entry, vacant) {
            Entry::Occupied { value, .. } => {
                self.free.push(key.index);
                self.len -= 1;
                Some(value)
            }
            Entry::Vacant { .. } => None,
        }
    }

    pub(crate) fn contains(&self, key: SlotKey) -> bool {
        matches!(
            self.entries.get(key.index as usize),
            Some(Entry::Occupied { generation, .. }) if *generation == key.generation
        )
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (SlotKey, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    SlotKey {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }

    /// Removes and returns every value matching `pred`.
    pub(crate) fn extract_if(&mut self, mut pred: impl FnMut(&T) -> bool) -> Vec<T> {
        let keys: Vec<SlotKey> = self
            .iter()
            .filter(|(_, value)| pred(value))
            .map(|(key, _)| key)
            .collect();
        keys.into_iter().filter_map(|key| self.remove(key)).collect()
    }
}
