//! Fixed-capacity pools of GPU texture ids.
//!
//! Two independent tables, one for 1-D textures and one for 2-D. Slots are
//! allocated in batches of 20 up to a hard ceiling; when full, the slot with
//! the smallest access stamp is stolen. The steal is *returned* to the
//! caller rather than delivered through a callback: the paint loop owns the
//! renderer table and dispatches [`Stolen`] to the renderer that cached the
//! id. That is the only path by which a texture id goes stale, so renderers
//! that hold ids must handle `on_steal` and otherwise re-look-up per frame.

use tracing::debug;

use super::Mode;
use super::gpu::{Gpu, TextureId};
use crate::waveform::WaveformId;

pub const ALLOCATION_INCREMENT: usize = 20;
pub const TEXTURE_MAX: usize = 1024;

/// Mode tag carried in the high bits of the block number so one table
/// serves every mode.
const MASK_V_LOW: u32 = 1 << 28;
const MASK_LOW: u32 = 1 << 29;
const MASK_HI: u32 = 1 << 30;
const MODE_MASK: u32 = MASK_V_LOW | MASK_LOW | MASK_HI;

/// Encode a mode + block number into a table key block value.
pub fn block_key(mode: Mode, block: usize) -> u32 {
    let block = block as u32;
    match mode {
        Mode::VLow => block | MASK_V_LOW,
        Mode::Low => block | MASK_LOW,
        Mode::Hi => block | MASK_HI,
        Mode::Med | Mode::VHi => block,
    }
}

/// Recover the mode a key was created under (MED and V_HI share the
/// untagged space; V_HI never uploads textures).
pub fn mode_of_key(block: u32) -> Mode {
    match block & MODE_MASK {
        MASK_V_LOW => Mode::VLow,
        MASK_LOW => Mode::Low,
        MASK_HI => Mode::Hi,
        _ => Mode::Med,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureKey {
    pub waveform: WaveformId,
    pub block: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureType {
    OneD,
    TwoD,
}

/// An entry evicted to make room; the owning renderer must forget the id.
#[derive(Debug, Clone, Copy)]
pub struct Stolen {
    pub key: TextureKey,
    pub id: TextureId,
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    id: TextureId,
    key: Option<TextureKey>,
    stamp: u64,
}

#[derive(Default)]
struct Table {
    slots: Vec<Slot>,
}

impl Table {
    fn find(&self, key: TextureKey) -> Option<usize> {
        self.slots.iter().position(|slot| slot.key == Some(key))
    }

    fn find_empty(&self) -> Option<usize> {
        self.slots.iter().position(|slot| slot.key.is_none())
    }

    fn steal(&mut self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.key.is_some())
            .min_by_key(|(_, slot)| slot.stamp)
            .map(|(idx, _)| idx)
    }

    fn used(&self) -> usize {
        self.slots.iter().filter(|slot| slot.key.is_some()).count()
    }
}

pub struct TextureCache {
    one_d: Table,
    two_d: Table,
    stamp: u64,
    max: usize,
    pending_sweep: bool,
}

impl TextureCache {
    pub fn new(max: usize) -> Self {
        Self {
            one_d: Table::default(),
            two_d: Table::default(),
            stamp: 0,
            max: max.clamp(ALLOCATION_INCREMENT, TEXTURE_MAX),
            pending_sweep: false,
        }
    }

    fn table(&mut self, which: TextureType) -> &mut Table {
        match which {
            TextureType::OneD => &mut self.one_d,
            TextureType::TwoD => &mut self.two_d,
        }
    }

    /// The texture currently assigned to a key.
    pub fn lookup(&self, which: TextureType, key: TextureKey) -> Option<TextureId> {
        let table = match which {
            TextureType::OneD => &self.one_d,
            TextureType::TwoD => &self.two_d,
        };
        table.find(key).map(|idx| table.slots[idx].id)
    }

    /// Bump the access stamp of a key that is about to be drawn.
    pub fn freshen(&mut self, which: TextureType, key: TextureKey) {
        self.stamp += 1;
        let stamp = self.stamp;
        let table = self.table(which);
        if let Some(idx) = table.find(key) {
            table.slots[idx].stamp = stamp;
        }
    }

    /// Assign a texture id to a key: reuse an empty slot, else grow the
    /// pool by a batch, else steal the least-recently-used slot. The stolen
    /// entry, if any, must be dispatched to its renderer.
    pub fn assign_new(
        &mut self,
        gpu: &mut dyn Gpu,
        which: TextureType,
        key: TextureKey,
    ) -> (TextureId, Option<Stolen>) {
        self.stamp += 1;
        let stamp = self.stamp;
        let max = self.max;
        let table = self.table(which);

        let mut stolen = None;
        let idx = match table.find_empty() {
            Some(idx) => idx,
            None => {
                if table.slots.len() + ALLOCATION_INCREMENT <= max {
                    let ids = gpu.gen_textures(ALLOCATION_INCREMENT);
                    let first_new = table.slots.len();
                    for id in ids {
                        table.slots.push(Slot {
                            id,
                            key: None,
                            stamp: 0,
                        });
                    }
                    first_new
                } else {
                    debug!("texture pool full ({} slots); stealing", table.slots.len());
                    let idx = table.steal().expect("non-empty table to steal from");
                    let slot = table.slots[idx];
                    stolen = slot.key.map(|key| Stolen { key, id: slot.id });
                    idx
                }
            }
        };

        let slot = &mut table.slots[idx];
        slot.key = Some(key);
        slot.stamp = stamp;
        (slot.id, stolen)
    }

    /// Release the slot for one (waveform, block).
    pub fn remove(&mut self, which: TextureType, key: TextureKey) {
        let table = self.table(which);
        while let Some(idx) = table.find(key) {
            table.slots[idx].key = None;
            table.slots[idx].stamp = 0;
        }
        self.pending_sweep = true;
    }

    /// Release every slot belonging to a waveform, in both tables.
    pub fn remove_waveform(&mut self, waveform: WaveformId) {
        let mut removed = 0;
        for table in [&mut self.one_d, &mut self.two_d] {
            for slot in &mut table.slots {
                if slot.key.map(|key| key.waveform) == Some(waveform) {
                    slot.key = None;
                    slot.stamp = 0;
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!("{waveform}: released {removed} textures");
            self.pending_sweep = true;
        }
    }

    /// Delete trailing all-empty allocation batches, keeping at least one.
    /// Cheap when nothing was removed since the last call.
    pub fn sweep(&mut self, gpu: &mut dyn Gpu) {
        if !self.pending_sweep {
            return;
        }
        self.pending_sweep = false;
        for table in [&mut self.one_d, &mut self.two_d] {
            while table.slots.len() > ALLOCATION_INCREMENT {
                let tail = &table.slots[table.slots.len() - ALLOCATION_INCREMENT..];
                if tail.iter().any(|slot| slot.key.is_some()) {
                    break;
                }
                let ids: Vec<TextureId> = tail.iter().map(|slot| slot.id).collect();
                gpu.delete_textures(&ids);
                let new_len = table.slots.len() - ALLOCATION_INCREMENT;
                table.slots.truncate(new_len);
            }
        }
    }

    pub fn used(&self) -> usize {
        self.one_d.used() + self.two_d.used()
    }

    pub fn pool_size(&self, which: TextureType) -> usize {
        match which {
            TextureType::OneD => self.one_d.slots.len(),
            TextureType::TwoD => self.two_d.slots.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::gpu::RecordingGpu;
    use std::path::Path;

    fn test_id() -> WaveformId {
        crate::waveform::Waveform::new(Path::new("tex.wav")).id()
    }

    fn key(w: WaveformId, block: usize) -> TextureKey {
        TextureKey {
            waveform: w,
            block: block_key(Mode::Med, block),
        }
    }

    #[test]
    fn assign_then_lookup_round_trips() {
        let mut gpu = RecordingGpu::new();
        let mut cache = TextureCache::new(TEXTURE_MAX);
        let w = test_id();

        let (id, stolen) = cache.assign_new(&mut gpu, TextureType::TwoD, key(w, 0));
        assert!(stolen.is_none());
        assert_eq!(cache.lookup(TextureType::TwoD, key(w, 0)), Some(id));
        assert_eq!(cache.lookup(TextureType::OneD, key(w, 0)), None);
        assert_eq!(cache.pool_size(TextureType::TwoD), ALLOCATION_INCREMENT);
    }

    #[test]
    fn pool_grows_in_batches_then_steals_lru() {
        let mut gpu = RecordingGpu::new();
        let mut cache = TextureCache::new(ALLOCATION_INCREMENT); // one batch only
        let w = test_id();

        for block in 0..ALLOCATION_INCREMENT {
            cache.assign_new(&mut gpu, TextureType::OneD, key(w, block));
        }
        // freshen block 0 so block 1 is the LRU victim
        cache.freshen(TextureType::OneD, key(w, 0));

        let (_, stolen) = cache.assign_new(&mut gpu, TextureType::OneD, key(w, 100));
        let stolen = stolen.expect("steal on a full pool");
        assert_eq!(stolen.key, key(w, 1));
        assert_eq!(cache.lookup(TextureType::OneD, key(w, 1)), None);
        assert!(cache.lookup(TextureType::OneD, key(w, 100)).is_some());
    }

    #[test]
    fn texture_ids_never_alias_between_entries() {
        let mut gpu = RecordingGpu::new();
        let mut cache = TextureCache::new(TEXTURE_MAX);
        let w = test_id();
        for block in 0..50 {
            cache.assign_new(&mut gpu, TextureType::TwoD, key(w, block));
            cache.assign_new(&mut gpu, TextureType::OneD, key(w, block));
        }
        let mut seen = std::collections::HashSet::new();
        for which in [TextureType::OneD, TextureType::TwoD] {
            for block in 0..50 {
                let id = cache.lookup(which, key(w, block)).unwrap();
                assert!(seen.insert((which, id)), "duplicate id {id:?}");
            }
        }
    }

    #[test]
    fn remove_waveform_clears_both_tables_and_sweep_shrinks() {
        let mut gpu = RecordingGpu::new();
        let mut cache = TextureCache::new(TEXTURE_MAX);
        let w = test_id();
        for block in 0..(2 * ALLOCATION_INCREMENT) {
            cache.assign_new(&mut gpu, TextureType::TwoD, key(w, block));
        }
        assert_eq!(cache.pool_size(TextureType::TwoD), 2 * ALLOCATION_INCREMENT);

        cache.remove_waveform(w);
        assert_eq!(cache.used(), 0);
        cache.sweep(&mut gpu);
        // one batch is retained
        assert_eq!(cache.pool_size(TextureType::TwoD), ALLOCATION_INCREMENT);
        assert!(!gpu.live.is_empty());
    }

    #[test]
    fn mode_masks_round_trip() {
        for mode in [Mode::VLow, Mode::Low, Mode::Med, Mode::Hi] {
            assert_eq!(mode_of_key(block_key(mode, 42)), mode);
            assert_eq!(block_key(mode, 42) & !MODE_MASK, 42);
        }
    }
}
