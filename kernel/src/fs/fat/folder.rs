// SPDX-License-Identifier: MPL-2.0

//! Folders on a FAT volume.
//!
//! A folder is a basic file whose contents are an array of 32-byte directory
//! entries. On creation the whole directory is scanned once into two
//! name maps (canonical names plus short-name aliases); reopening a
//! still-live child reuses the existing object through a weak reference.

use super::file::FatFile;
use super::structs::{
    is_valid_filename_char, short_name_from, FileAttributes, LongDirEntry, ShortDirEntry,
    DIR_ENTRY_SIZE, ENTRY_END, ENTRY_FREE, LAST_LONG_ENTRY, LONG_NAME_ATTR,
};
use super::volume::FatVolume;
use crate::block::FileWrapper;
use crate::fs::BasicFile;
use crate::prelude::*;
use crate::sync::Mutex;
use crate::tree::{split_name, validate_component, Branch, Leaf};
use zerocopy::{FromBytes, IntoBytes};

#[derive(Clone)]
pub(crate) struct FileInfo {
    pub canonical_name: String,
    #[allow(dead_code)]
    pub short_name: String,
    #[allow(dead_code)]
    pub long_name: String,
    pub start_cluster: u32,
    pub file_size: u64,
    pub is_folder: bool,
    /// Index of the short-name entry within the directory.
    pub fde_index: u32,
    /// Long-name entries chained in front of the short entry.
    pub lfn_count: u8,
    /// The object handed out by `get_child`, while alive.
    pub stored_obj: Option<Weak<dyn Leaf>>,
    /// The underlying data file, while alive (same as `stored_obj` for plain
    /// files).
    pub stored_file: Option<Weak<FatFile>>,
}

struct FolderCache {
    /// Canonical name to record, ordered for enumeration.
    entries: BTreeMap<String, FileInfo>,
    /// Short display name to canonical name, where the two differ.
    aliases: BTreeMap<String, String>,
}

/// A directory on a FAT volume, exposed as a System Tree branch.
pub struct Folder {
    underlying: Arc<dyn BasicFile>,
    wrapper: Arc<FileWrapper>,
    volume: Arc<FatVolume>,
    cache: SpinLock<FolderCache>,
    /// Serializes structural changes and child instantiation.
    dir_lock: Mutex,
    self_weak: Weak<Folder>,
}

crate::impl_handled_object!(Folder);

impl Folder {
    /// Builds the folder object and scans the directory into the name maps.
    ///
    /// Runs synchronously, so only legitimate on non-worker threads.
    pub(crate) fn create(
        underlying: Arc<dyn BasicFile>,
        volume: Arc<FatVolume>,
    ) -> Result<Arc<Folder>> {
        assert!(!crate::task::current_thread().is_worker_thread());

        let wrapper = FileWrapper::create(underlying.clone());
        let folder = Arc::new_cyclic(|weak| Folder {
            underlying,
            wrapper,
            volume,
            cache: SpinLock::new(FolderCache {
                entries: BTreeMap::new(),
                aliases: BTreeMap::new(),
            }),
            dir_lock: Mutex::new(false),
            self_weak: weak.clone(),
        });
        folder.rescan()?;
        Ok(folder)
    }

    fn with_dir_lock<R>(&self, f: impl FnOnce() -> R) -> R {
        self.dir_lock.lock();
        let result = f();
        self.dir_lock.unlock();
        result
    }

    fn load_image(&self) -> Result<Vec<u8>> {
        let size = self.underlying.file_size()?;
        let mut image = vec![0u8; size as usize];
        if size > 0 {
            self.wrapper.read_bytes(0, size, &mut image)?;
        }
        Ok(image)
    }

    fn store_image(&self, image: &[u8]) -> Result {
        self.wrapper
            .write_bytes(0, image.len() as u64, image)
            .map(|_| ())
    }

    /// Re-parses the directory, carrying live child objects over.
    fn rescan(&self) -> Result {
        let image = self.load_image()?;
        let (mut entries, aliases) = parse_directory(&image);

        let mut cache = self.cache.lock();
        for info in entries.values_mut() {
            let old = cache.entries.values().find(|old| {
                old.start_cluster == info.start_cluster
                    && old.canonical_name == info.canonical_name
            });
            if let Some(old) = old {
                info.stored_obj = old.stored_obj.clone();
                info.stored_file = old.stored_file.clone();
            }
        }
        *cache = FolderCache { entries, aliases };
        Ok(())
    }

    fn resolve_canonical(&self, name: &str) -> Result<String> {
        let cache = self.cache.lock();
        if cache.entries.contains_key(name) {
            return Ok(name.to_string());
        }
        cache.aliases.get(name).cloned().ok_or(Error::NotFound)
    }

    /// Opens (instantiating if necessary) the direct child `name`.
    fn open_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        self.with_dir_lock(|| self.open_child_locked(name))
    }

    fn open_child_locked(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        let canonical = self.resolve_canonical(name)?;

        if let Some(live) = {
            let cache = self.cache.lock();
            cache.entries[&canonical]
                .stored_obj
                .as_ref()
                .and_then(|weak| weak.upgrade())
        } {
            return Ok(live);
        }

        let info = self.cache.lock().entries[&canonical].clone();
        let size = if info.is_folder {
            let clusters = self.volume.chain_length(info.start_cluster)?;
            clusters as u64 * self.volume.geometry.cluster_bytes()
        } else {
            info.file_size
        };
        let file = FatFile::create(
            self.volume.clone(),
            Some(self.self_weak.clone()),
            info.start_cluster,
            size,
            info.is_folder,
        );

        let obj: Arc<dyn Leaf> = if info.is_folder {
            let sub = Folder::create(file.clone(), self.volume.clone())?;
            self.record_stored(&canonical, Arc::downgrade(&sub) as Weak<dyn Leaf>, &file);
            sub
        } else {
            self.record_stored(&canonical, Arc::downgrade(&file) as Weak<dyn Leaf>, &file);
            file
        };
        Ok(obj)
    }

    fn record_stored(&self, canonical: &str, obj: Weak<dyn Leaf>, file: &Arc<FatFile>) {
        let mut cache = self.cache.lock();
        if let Some(info) = cache.entries.get_mut(canonical) {
            info.stored_obj = Some(obj);
            info.stored_file = Some(Arc::downgrade(file));
        }
    }

    /// Updates the on-disk entry after a child file changed size or moved to
    /// a different starting cluster.
    pub(crate) fn update_child_entry(
        &self,
        child: &Arc<FatFile>,
        new_start: u32,
        new_size: u64,
    ) -> Result {
        self.with_dir_lock(|| {
            let canonical = {
                let cache = self.cache.lock();
                cache
                    .entries
                    .iter()
                    .find(|(_, info)| {
                        info.stored_file
                            .as_ref()
                            .is_some_and(|weak| weak.as_ptr() == Arc::as_ptr(child))
                    })
                    .map(|(name, _)| name.clone())
                    .ok_or(Error::NotFound)?
            };

            let (fde_index, is_folder) = {
                let cache = self.cache.lock();
                let info = &cache.entries[&canonical];
                (info.fde_index as usize, info.is_folder)
            };

            let mut image = self.load_image()?;
            let offset = fde_index * DIR_ENTRY_SIZE;
            let mut entry =
                ShortDirEntry::read_from_bytes(&image[offset..offset + DIR_ENTRY_SIZE])
                    .map_err(|_| Error::StorageError)?;
            entry.set_first_cluster(new_start);
            if !is_folder {
                entry.file_size = new_size as u32;
            }
            image[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(entry.as_bytes());
            self.store_image(&image)?;

            let mut cache = self.cache.lock();
            if let Some(info) = cache.entries.get_mut(&canonical) {
                info.start_cluster = new_start;
                if !is_folder {
                    info.file_size = new_size;
                }
            }
            Ok(())
        })
    }

    fn create_child_locked(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        if self.resolve_canonical(name).is_ok() {
            return Err(Error::AlreadyExists);
        }

        let mut image = self.load_image()?;
        let short_name = self.pick_short_name(name)?;
        let needs_long_name = {
            let probe = ShortDirEntry::new(short_name, FileAttributes::ARCHIVE);
            probe.display_name() != name
        };
        if needs_long_name {
            for ch in name.chars() {
                if !is_valid_filename_char(ch as u16, true) {
                    return Err(Error::InvalidName);
                }
            }
        }

        let entries = build_entries(name, short_name, needs_long_name, 0, 0, false);
        let at = self.find_free_run(&mut image, entries.len())?;
        write_entries(&mut image, at, &entries);
        self.store_image(&image)?;
        self.rescan()?;
        self.open_child_locked(name)
    }

    fn delete_child_locked(&self, name: &str) -> Result {
        let canonical = self.resolve_canonical(name)?;
        let info = self.cache.lock().entries[&canonical].clone();

        let mut image = self.load_image()?;
        free_entries(&mut image, info.fde_index, info.lfn_count);
        self.store_image(&image)?;

        if info.start_cluster != 0 {
            self.volume.resize_chain(info.start_cluster, 0)?;
        }
        self.rescan()
    }

    fn rename_child_locked(&self, old_name: &str, new_name: &str) -> Result {
        let canonical = self.resolve_canonical(old_name)?;
        if self.resolve_canonical(new_name).is_ok() {
            return Err(Error::AlreadyExists);
        }
        validate_component(new_name)?;
        let info = self.cache.lock().entries[&canonical].clone();

        let mut image = self.load_image()?;
        free_entries(&mut image, info.fde_index, info.lfn_count);

        let short_name = self.pick_short_name(new_name)?;
        let needs_long_name = {
            let probe = ShortDirEntry::new(short_name, FileAttributes::ARCHIVE);
            probe.display_name() != new_name
        };
        if needs_long_name {
            for ch in new_name.chars() {
                if !is_valid_filename_char(ch as u16, true) {
                    return Err(Error::InvalidName);
                }
            }
        }
        let entries = build_entries(
            new_name,
            short_name,
            needs_long_name,
            info.start_cluster,
            info.file_size as u32,
            info.is_folder,
        );
        let at = self.find_free_run(&mut image, entries.len())?;
        write_entries(&mut image, at, &entries);
        self.store_image(&image)?;
        self.rescan()?;

        // The live object, if any, keeps its identity under the new name.
        if info.stored_obj.is_some() {
            let mut cache = self.cache.lock();
            let new_canonical = if cache.entries.contains_key(new_name) {
                new_name.to_string()
            } else {
                cache.aliases.get(new_name).cloned().unwrap_or_default()
            };
            if let Some(target) = cache.entries.get_mut(&new_canonical) {
                target.stored_obj = info.stored_obj.clone();
                target.stored_file = info.stored_file.clone();
            }
        }
        Ok(())
    }

    /// An 8.3 name for `name`: the name itself when it fits, otherwise a
    /// `STEM~N` alias unique within this directory.
    fn pick_short_name(&self, name: &str) -> Result<[u8; 11]> {
        if let Ok(packed) = short_name_from(name) {
            return Ok(packed);
        }

        let mut stem: Vec<u8> = name
            .bytes()
            .filter(|&b| is_valid_filename_char(b as u16, false))
            .map(|b| b.to_ascii_uppercase())
            .collect();
        stem.truncate(6);
        if stem.is_empty() {
            stem.extend_from_slice(b"FILE");
        }
        let ext: Vec<u8> = match name.rfind('.') {
            Some(pos) => name[pos + 1..]
                .bytes()
                .filter(|&b| is_valid_filename_char(b as u16, false))
                .map(|b| b.to_ascii_uppercase())
                .take(3)
                .collect(),
            None => Vec::new(),
        };

        for tail in 1..100u32 {
            let mut packed = [b' '; 11];
            let suffix = format!("~{tail}");
            let stem_len = stem.len().min(8 - suffix.len());
            packed[..stem_len].copy_from_slice(&stem[..stem_len]);
            packed[stem_len..stem_len + suffix.len()].copy_from_slice(suffix.as_bytes());
            packed[8..8 + ext.len()].copy_from_slice(&ext);

            let display = ShortDirEntry::new(packed, FileAttributes::ARCHIVE).display_name();
            let cache = self.cache.lock();
            if !cache.entries.contains_key(&display) && !cache.aliases.contains_key(&display) {
                return Ok(packed);
            }
        }
        Err(Error::StorageError)
    }

    /// Finds `needed` consecutive writable entry slots, growing the
    /// directory by a cluster when possible.
    fn find_free_run(&self, image: &mut Vec<u8>, needed: usize) -> Result<usize> {
        loop {
            let total = image.len() / DIR_ENTRY_SIZE;
            let mut run_start = 0usize;
            let mut run_len = 0usize;
            for index in 0..total {
                let first = image[index * DIR_ENTRY_SIZE];
                if first == ENTRY_FREE || first == ENTRY_END {
                    if run_len == 0 {
                        run_start = index;
                    }
                    run_len += 1;
                    if run_len == needed {
                        return Ok(run_start);
                    }
                } else {
                    run_len = 0;
                }
            }

            // Directory full: grow it by one cluster if the underlying file
            // allows (the fixed FAT12/16 root does not).
            let cluster_bytes = self.volume.geometry.cluster_bytes() as usize;
            let new_size = image.len() + cluster_bytes;
            self.underlying
                .set_file_size(new_size as u64)
                .map_err(|_| Error::StorageError)?;
            image.resize(new_size, 0);
        }
    }
}

impl Leaf for Folder {
    fn as_branch(self: Arc<Self>) -> Option<Arc<dyn Branch>> {
        Some(self)
    }

    fn as_file(self: Arc<Self>) -> Option<Arc<dyn BasicFile>> {
        Some(self.underlying.clone())
    }
}

impl Branch for Folder {
    fn get_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        let (first, rest) = split_name(name);
        validate_component(first)?;
        let child = self.open_child(first)?;
        match rest {
            None => Ok(child),
            Some(rest) => child.as_branch().ok_or(Error::NotFound)?.get_child(rest),
        }
    }

    fn add_child(&self, _name: &str, _child: Arc<dyn Leaf>) -> Result {
        // Foreign objects cannot be grafted into an on-disk directory.
        Err(Error::InvalidOp)
    }

    fn create_child(&self, name: &str) -> Result<Arc<dyn Leaf>> {
        let (first, rest) = split_name(name);
        validate_component(first)?;
        match rest {
            None => self.with_dir_lock(|| self.create_child_locked(first)),
            Some(rest) => self
                .open_child(first)?
                .as_branch()
                .ok_or(Error::NotFound)?
                .create_child(rest),
        }
    }

    fn rename_child(&self, old_name: &str, new_name: &str) -> Result {
        let (old_first, old_rest) = split_name(old_name);
        let (new_first, new_rest) = split_name(new_name);
        validate_component(old_first)?;
        validate_component(new_first)?;
        match (old_rest, new_rest) {
            (None, None) => {
                self.with_dir_lock(|| self.rename_child_locked(old_first, new_first))
            }
            (Some(old_rest), Some(new_rest)) if old_first == new_first => self
                .open_child(old_first)?
                .as_branch()
                .ok_or(Error::NotFound)?
                .rename_child(old_rest, new_rest),
            _ => Err(Error::InvalidOp),
        }
    }

    fn delete_child(&self, name: &str) -> Result {
        let (first, rest) = split_name(name);
        validate_component(first)?;
        match rest {
            None => self.with_dir_lock(|| self.delete_child_locked(first)),
            Some(rest) => self
                .open_child(first)?
                .as_branch()
                .ok_or(Error::NotFound)?
                .delete_child(rest),
        }
    }

    fn num_children(&self) -> Result<u64> {
        Ok(self.cache.lock().entries.len() as u64)
    }

    fn enum_children(&self, start_from: &str, max_count: u64) -> Result<Vec<String>> {
        let cache = self.cache.lock();
        let iter = cache
            .entries
            .range(start_from.to_string()..)
            .map(|(k, _)| k.clone());
        Ok(match max_count {
            0 => iter.collect(),
            n => iter.take(n as usize).collect(),
        })
    }
}

/// The directory enumeration state machine.
fn parse_directory(image: &[u8]) -> (BTreeMap<String, FileInfo>, BTreeMap<String, String>) {
    let mut entries = BTreeMap::new();
    let mut aliases = BTreeMap::new();

    let mut long_name = String::new();
    let mut lfn_checksum = 0u8;
    let mut lfn_active = false;
    let mut lfn_valid = true;
    let mut lfn_count = 0u8;

    let total = image.len() / DIR_ENTRY_SIZE;
    for index in 0..total {
        let bytes = &image[index * DIR_ENTRY_SIZE..(index + 1) * DIR_ENTRY_SIZE];
        let first = bytes[0];

        if first == ENTRY_END {
            break;
        }
        if first == ENTRY_FREE {
            long_name.clear();
            lfn_active = false;
            lfn_valid = true;
            lfn_count = 0;
            continue;
        }

        if bytes[11] == LONG_NAME_ATTR {
            let lfn = LongDirEntry::read_from_bytes(bytes).expect("entry is 32 bytes");
            // A checksum change mid-chain poisons the whole accumulation;
            // the following short entry then falls back to its 8.3 name.
            if lfn_active && lfn.checksum != lfn_checksum {
                lfn_valid = false;
                long_name.clear();
                lfn_count = 0;
            }
            lfn_active = true;
            lfn_checksum = lfn.checksum;

            if lfn_valid {
                lfn_count += 1;
                // This entry's 13 characters go in front of what we have.
                let mut part = String::new();
                for i in 0..LongDirEntry::CHARS_PER_ENTRY {
                    let ch = lfn.char_at(i);
                    if is_valid_filename_char(ch, true) && ch < 256 {
                        part.push(ch as u8 as char);
                    }
                }
                part.push_str(&long_name);
                long_name = part;
            }
            continue;
        }

        let short = ShortDirEntry::read_from_bytes(bytes).expect("entry is 32 bytes");
        let attrs = FileAttributes::from_bits_truncate(short.attributes);
        let short_display = short.display_name();

        if attrs.contains(FileAttributes::VOLUME_ID)
            || short_display == "."
            || short_display == ".."
        {
            long_name.clear();
            lfn_active = false;
            lfn_valid = true;
            lfn_count = 0;
            continue;
        }

        let matched_long = lfn_valid
            && lfn_active
            && !long_name.is_empty()
            && lfn_checksum == short.checksum();
        let canonical = if matched_long {
            long_name.clone()
        } else {
            short_display.clone()
        };

        let info = FileInfo {
            canonical_name: canonical.clone(),
            short_name: short_display.clone(),
            long_name: if matched_long { long_name.clone() } else { String::new() },
            start_cluster: short.first_cluster(),
            file_size: short.file_size as u64,
            is_folder: short.is_directory(),
            fde_index: index as u32,
            lfn_count: if matched_long { lfn_count } else { 0 },
            stored_obj: None,
            stored_file: None,
        };
        if matched_long && short_display != canonical {
            aliases.insert(short_display, canonical.clone());
        }
        entries.insert(canonical, info);

        long_name.clear();
        lfn_active = false;
        lfn_valid = true;
        lfn_count = 0;
    }

    (entries, aliases)
}

/// Builds the on-disk entries for one directory record: the long-name chain
/// (last part first) followed by the short entry.
fn build_entries(
    name: &str,
    short_name: [u8; 11],
    needs_long_name: bool,
    start_cluster: u32,
    file_size: u32,
    is_folder: bool,
) -> Vec<[u8; DIR_ENTRY_SIZE]> {
    let mut result: Vec<[u8; DIR_ENTRY_SIZE]> = Vec::new();

    let mut short = ShortDirEntry::new(
        short_name,
        if is_folder {
            FileAttributes::DIRECTORY
        } else {
            FileAttributes::ARCHIVE
        },
    );
    short.set_first_cluster(start_cluster);
    short.file_size = file_size;

    if needs_long_name {
        let checksum = short.checksum();
        let chars: Vec<u16> = name.chars().map(|c| c as u16).collect();
        let pieces = chars.len().div_ceil(LongDirEntry::CHARS_PER_ENTRY);

        for piece in (0..pieces).rev() {
            let mut sequence = (piece + 1) as u8;
            if piece == pieces - 1 {
                sequence |= LAST_LONG_ENTRY;
            }
            let mut entry = LongDirEntry::empty(sequence, checksum);
            for slot in 0..LongDirEntry::CHARS_PER_ENTRY {
                let char_index = piece * LongDirEntry::CHARS_PER_ENTRY + slot;
                match char_index.cmp(&chars.len()) {
                    core::cmp::Ordering::Less => entry.set_char_at(slot, chars[char_index]),
                    core::cmp::Ordering::Equal => entry.set_char_at(slot, 0),
                    core::cmp::Ordering::Greater => (), // keep 0xFFFF padding
                }
            }
            let mut bytes = [0u8; DIR_ENTRY_SIZE];
            bytes.copy_from_slice(entry.as_bytes());
            result.push(bytes);
        }
    }

    let mut bytes = [0u8; DIR_ENTRY_SIZE];
    bytes.copy_from_slice(short.as_bytes());
    result.push(bytes);
    result
}

fn write_entries(image: &mut [u8], at: usize, entries: &[[u8; DIR_ENTRY_SIZE]]) {
    for (i, entry) in entries.iter().enumerate() {
        let offset = (at + i) * DIR_ENTRY_SIZE;
        image[offset..offset + DIR_ENTRY_SIZE].copy_from_slice(entry);
    }
}

/// Marks a record's entries (long-name chain plus short entry) free.
fn free_entries(image: &mut [u8], short_index: u32, lfn_count: u8) {
    let first = short_index.saturating_sub(lfn_count as u32);
    for index in first..=short_index {
        image[index as usize * DIR_ENTRY_SIZE] = ENTRY_FREE;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image_with(entries: &[[u8; DIR_ENTRY_SIZE]]) -> Vec<u8> {
        let mut image = vec![0u8; 2048];
        write_entries(&mut image, 0, entries);
        image
    }

    #[test]
    fn parses_short_names() {
        let entries = build_entries("HELLO.TXT", short_name_from("HELLO.TXT").unwrap(), false, 7, 42, false);
        let image = image_with(&entries);
        let (parsed, aliases) = parse_directory(&image);

        assert_eq!(parsed.len(), 1);
        let info = &parsed["HELLO.TXT"];
        assert_eq!(info.start_cluster, 7);
        assert_eq!(info.file_size, 42);
        assert!(!info.is_folder);
        assert!(aliases.is_empty());
    }

    #[test]
    fn long_names_reassemble_across_entries() {
        // 20 characters: two long-name entries in front of the short one.
        let name = "a-rather-long-name.x";
        let short = [b'A', b'R', b'A', b'T', b'H', b'E', b'~', b'1', b'X', b' ', b' '];
        let entries = build_entries(name, short, true, 9, 0, false);
        assert_eq!(entries.len(), 3);

        let image = image_with(&entries);
        let (parsed, aliases) = parse_directory(&image);
        let info = &parsed[name];
        assert_eq!(info.start_cluster, 9);
        assert_eq!(info.lfn_count, 2);
        assert_eq!(aliases.get("ARATHE~1.X").map(String::as_str), Some(name));
    }

    #[test]
    fn bad_checksum_falls_back_to_short_name() {
        let name = "another-long-name.bin";
        let short = short_name_from("ANOTHE~1.BIN".replace('~', "_").as_str());
        let short = short.unwrap_or([b'A'; 11]);
        let mut entries = build_entries(name, short, true, 3, 0, false);
        // Corrupt the long-name checksum.
        entries[0][13] ^= 0xFF;

        let image = image_with(&entries);
        let (parsed, _) = parse_directory(&image);
        let short_display = ShortDirEntry::read_from_bytes(&entries.last().unwrap()[..])
            .unwrap()
            .display_name();
        assert!(parsed.contains_key(&short_display));
        assert!(!parsed.contains_key(name));
    }

    #[test]
    fn free_and_end_entries_break_accumulation() {
        let name = "interrupted-name.dat";
        let short = [b'I'; 11];
        let mut entries = build_entries(name, short, true, 3, 0, false);
        // Mark the long-name chain free; only the short entry survives.
        entries[0][0] = ENTRY_FREE;
        entries[1][0] = ENTRY_FREE;

        let image = image_with(&entries);
        let (parsed, _) = parse_directory(&image);
        assert_eq!(parsed.len(), 1);
        assert!(!parsed.contains_key(name));
    }

    #[test]
    fn dot_entries_are_skipped() {
        let dot = ShortDirEntry::new(*b".          ", FileAttributes::DIRECTORY);
        let dotdot = ShortDirEntry::new(*b"..         ", FileAttributes::DIRECTORY);
        let mut entries: Vec<[u8; DIR_ENTRY_SIZE]> = Vec::new();
        for e in [dot, dotdot] {
            let mut b = [0u8; DIR_ENTRY_SIZE];
            b.copy_from_slice(e.as_bytes());
            entries.push(b);
        }
        let image = image_with(&entries);
        let (parsed, _) = parse_directory(&image);
        assert!(parsed.is_empty());
    }

    #[test]
    fn freeing_removes_the_whole_record() {
        let name = "delete-me-please.txt";
        let short = [b'D'; 11];
        let entries = build_entries(name, short, true, 3, 0, false);
        let mut image = image_with(&entries);

        let (parsed, _) = parse_directory(&image);
        let info = parsed.values().next().unwrap();
        free_entries(&mut image, info.fde_index, info.lfn_count);

        let (parsed, _) = parse_directory(&image);
        assert!(parsed.is_empty());
    }
}
