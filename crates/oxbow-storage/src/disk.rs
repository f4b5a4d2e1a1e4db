//! Disk manager for page-level file I/O.

use oxbow_common::config::StorageConfig;
use oxbow_common::page::{FileId, PageId, PageNo, PAGE_SIZE};
use oxbow_common::{OxbowError, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

/// The first allocatable page number. Slot 0 of every file is reserved and
/// zeroed at creation so that page number 0 can serve as the null sentinel.
pub const FIRST_PAGE_NO: PageNo = 1;

/// Manages reading and writing pages of named files under a data directory.
///
/// Files are registered by name on create/open and addressed by `FileId`
/// afterwards; the index file naming contract (`"<relation>.<offset>"`)
/// makes names part of the public surface.
pub struct DiskManager {
    /// Base directory for data files.
    data_dir: PathBuf,
    /// Enable fsync after writes.
    fsync_enabled: bool,
    /// Open file handles and the name registry.
    state: Mutex<DiskState>,
}

struct DiskState {
    files: HashMap<FileId, FileHandle>,
    by_name: HashMap<String, FileId>,
    next_file_id: FileId,
}

/// Handle for an open data file.
struct FileHandle {
    file: File,
    #[allow(dead_code)]
    path: PathBuf,
    /// Total page slots, including the reserved slot 0.
    num_pages: u32,
}

impl DiskManager {
    /// Creates a new disk manager rooted at the configured data directory.
    pub fn new(config: &StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self {
            data_dir: config.data_dir.clone(),
            fsync_enabled: config.fsync_enabled,
            state: Mutex::new(DiskState {
                files: HashMap::new(),
                by_name: HashMap::new(),
                next_file_id: 0,
            }),
        })
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn file_path(&self, name: &str) -> PathBuf {
        self.data_dir.join(name)
    }

    /// Creates a new paged file. Fails with `FileExists` if the name is
    /// already registered or present on disk.
    pub fn create_file(&self, name: &str) -> Result<FileId> {
        let mut state = self.state.lock();

        let path = self.file_path(name);
        if state.by_name.contains_key(name) || path.exists() {
            return Err(OxbowError::FileExists(name.to_string()));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        // Reserve page slot 0 so real page numbers start at 1.
        file.write_all(&[0u8; PAGE_SIZE])?;
        if self.fsync_enabled {
            file.sync_all()?;
        }

        Ok(state.register(name, file, path, 1))
    }

    /// Opens an existing paged file. Fails with `FileNotFound` if absent.
    pub fn open_file(&self, name: &str) -> Result<FileId> {
        let mut state = self.state.lock();

        if let Some(&file_id) = state.by_name.get(name) {
            return Ok(file_id);
        }

        let path = self.file_path(name);
        if !path.exists() {
            return Err(OxbowError::FileNotFound(name.to_string()));
        }

        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let num_pages = (file.metadata()?.len() / PAGE_SIZE as u64).max(1) as u32;

        Ok(state.register(name, file, path, num_pages))
    }

    /// Returns the registered id for a file name, if it is open.
    pub fn file_id(&self, name: &str) -> Option<FileId> {
        self.state.lock().by_name.get(name).copied()
    }

    /// Returns the first allocated page number of a file.
    pub fn first_page_no(&self, file_id: FileId) -> Result<PageNo> {
        let state = self.state.lock();
        if !state.files.contains_key(&file_id) {
            return Err(OxbowError::Internal(format!("file {} not open", file_id)));
        }
        Ok(FIRST_PAGE_NO)
    }

    /// Reads a page from disk.
    pub fn read_page(&self, page_id: PageId) -> Result<[u8; PAGE_SIZE]> {
        let mut state = self.state.lock();
        let handle = state.handle_mut(page_id.file_id)?;

        if page_id.page_no == 0 || page_id.page_no >= handle.num_pages {
            return Err(OxbowError::InvalidPage {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }

        let offset = (page_id.page_no as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;

        let mut buffer = [0u8; PAGE_SIZE];
        handle.file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Writes a page to disk.
    pub fn write_page(&self, page_id: PageId, data: &[u8; PAGE_SIZE]) -> Result<()> {
        let mut state = self.state.lock();
        let fsync = self.fsync_enabled;
        let handle = state.handle_mut(page_id.file_id)?;

        if page_id.page_no == 0 || page_id.page_no >= handle.num_pages {
            return Err(OxbowError::InvalidPage {
                file_id: page_id.file_id,
                page_no: page_id.page_no,
            });
        }

        let offset = (page_id.page_no as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(data)?;

        if fsync {
            handle.file.sync_all()?;
        }
        Ok(())
    }

    /// Allocates a new zeroed page at the end of the file.
    pub fn allocate_page(&self, file_id: FileId) -> Result<PageId> {
        let mut state = self.state.lock();
        let fsync = self.fsync_enabled;
        let handle = state.handle_mut(file_id)?;

        let page_no = handle.num_pages;
        let offset = (page_no as u64) * (PAGE_SIZE as u64);
        handle.file.seek(SeekFrom::Start(offset))?;
        handle.file.write_all(&[0u8; PAGE_SIZE])?;

        if fsync {
            handle.file.sync_all()?;
        }

        handle.num_pages = page_no + 1;
        Ok(PageId::new(file_id, page_no))
    }

    /// Returns the number of page slots in a file (reserved slot included).
    pub fn num_pages(&self, file_id: FileId) -> Result<u32> {
        let mut state = self.state.lock();
        Ok(state.handle_mut(file_id)?.num_pages)
    }

    /// Syncs a file's contents to stable storage.
    pub fn sync_file(&self, file_id: FileId) -> Result<()> {
        let mut state = self.state.lock();
        state.handle_mut(file_id)?.file.sync_all()?;
        Ok(())
    }

    /// Closes a file and removes it from disk. Returns the retired id, if
    /// the file was open.
    pub fn delete_file(&self, name: &str) -> Result<Option<FileId>> {
        let mut state = self.state.lock();

        let retired = state.by_name.remove(name);
        if let Some(file_id) = retired {
            state.files.remove(&file_id);
        }

        let path = self.file_path(name);
        if path.exists() {
            std::fs::remove_file(path)?;
        } else if retired.is_none() {
            return Err(OxbowError::FileNotFound(name.to_string()));
        }
        Ok(retired)
    }

    /// Closes all open files, syncing them first.
    pub fn close_all(&self) -> Result<()> {
        let mut state = self.state.lock();
        for (_, handle) in state.files.drain() {
            handle.file.sync_all()?;
        }
        state.by_name.clear();
        Ok(())
    }
}

impl DiskState {
    fn register(&mut self, name: &str, file: File, path: PathBuf, num_pages: u32) -> FileId {
        let file_id = self.next_file_id;
        self.next_file_id += 1;
        self.files.insert(
            file_id,
            FileHandle {
                file,
                path,
                num_pages,
            },
        );
        self.by_name.insert(name.to_string(), file_id);
        file_id
    }

    fn handle_mut(&mut self, file_id: FileId) -> Result<&mut FileHandle> {
        self.files
            .get_mut(&file_id)
            .ok_or_else(|| OxbowError::Internal(format!("file {} not open", file_id)))
    }
}

impl Drop for DiskManager {
    fn drop(&mut self) {
        let _ = self.close_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn create_test_disk_manager() -> (DiskManager, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: false,
            ..Default::default()
        };
        let dm = DiskManager::new(&config).unwrap();
        (dm, dir)
    }

    #[test]
    fn test_create_and_open() {
        let (dm, _dir) = create_test_disk_manager();

        let file_id = dm.create_file("relA").unwrap();
        assert_eq!(dm.file_id("relA"), Some(file_id));

        // Creating again fails, opening succeeds.
        assert!(matches!(
            dm.create_file("relA"),
            Err(OxbowError::FileExists(_))
        ));
        assert_eq!(dm.open_file("relA").unwrap(), file_id);
    }

    #[test]
    fn test_open_missing_file() {
        let (dm, _dir) = create_test_disk_manager();
        assert!(matches!(
            dm.open_file("nope"),
            Err(OxbowError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_page_zero_is_reserved() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create_file("relA").unwrap();

        // Fresh file has only the reserved slot.
        assert_eq!(dm.num_pages(file_id).unwrap(), 1);

        let page = dm.allocate_page(file_id).unwrap();
        assert_eq!(page.page_no, FIRST_PAGE_NO);
        assert_eq!(dm.first_page_no(file_id).unwrap(), FIRST_PAGE_NO);

        // Page 0 is never readable or writable.
        assert!(matches!(
            dm.read_page(PageId::new(file_id, 0)),
            Err(OxbowError::InvalidPage { .. })
        ));
        assert!(matches!(
            dm.write_page(PageId::new(file_id, 0), &[0u8; PAGE_SIZE]),
            Err(OxbowError::InvalidPage { .. })
        ));
    }

    #[test]
    fn test_allocate_sequential() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create_file("relA").unwrap();

        let p1 = dm.allocate_page(file_id).unwrap();
        let p2 = dm.allocate_page(file_id).unwrap();
        assert_eq!(p1.page_no, 1);
        assert_eq!(p2.page_no, 2);
        assert_eq!(dm.num_pages(file_id).unwrap(), 3);
    }

    #[test]
    fn test_write_read_roundtrip() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create_file("relA").unwrap();
        let page_id = dm.allocate_page(file_id).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0xAB;
        data[PAGE_SIZE - 1] = 0xEF;
        dm.write_page(page_id, &data).unwrap();

        let read_back = dm.read_page(page_id).unwrap();
        assert_eq!(read_back[0], 0xAB);
        assert_eq!(read_back[PAGE_SIZE - 1], 0xEF);
    }

    #[test]
    fn test_read_out_of_range() {
        let (dm, _dir) = create_test_disk_manager();
        let file_id = dm.create_file("relA").unwrap();
        dm.allocate_page(file_id).unwrap();

        assert!(matches!(
            dm.read_page(PageId::new(file_id, 99)),
            Err(OxbowError::InvalidPage { .. })
        ));
    }

    #[test]
    fn test_multiple_files() {
        let (dm, _dir) = create_test_disk_manager();
        let f0 = dm.create_file("relA").unwrap();
        let f1 = dm.create_file("relA.0").unwrap();

        let p0 = dm.allocate_page(f0).unwrap();
        let p1 = dm.allocate_page(f1).unwrap();

        let mut data = [0u8; PAGE_SIZE];
        data[0] = 0x11;
        dm.write_page(p0, &data).unwrap();
        data[0] = 0x22;
        dm.write_page(p1, &data).unwrap();

        assert_eq!(dm.read_page(p0).unwrap()[0], 0x11);
        assert_eq!(dm.read_page(p1).unwrap()[0], 0x22);
    }

    #[test]
    fn test_persistence_across_reopen() {
        let dir = tempdir().unwrap();
        let config = StorageConfig {
            data_dir: dir.path().to_path_buf(),
            fsync_enabled: true,
            ..Default::default()
        };
        let page_no;

        {
            let dm = DiskManager::new(&config).unwrap();
            let file_id = dm.create_file("relA").unwrap();
            let page_id = dm.allocate_page(file_id).unwrap();
            page_no = page_id.page_no;

            let mut data = [0u8; PAGE_SIZE];
            data[0] = 0xFF;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let dm = DiskManager::new(&config).unwrap();
            let file_id = dm.open_file("relA").unwrap();
            assert_eq!(dm.num_pages(file_id).unwrap(), 2);

            let data = dm.read_page(PageId::new(file_id, page_no)).unwrap();
            assert_eq!(data[0], 0xFF);
        }
    }

    #[test]
    fn test_delete_file() {
        let (dm, dir) = create_test_disk_manager();
        let file_id = dm.create_file("relA").unwrap();

        let path = dir.path().join("relA");
        assert!(path.exists());

        assert_eq!(dm.delete_file("relA").unwrap(), Some(file_id));
        assert!(!path.exists());
        assert_eq!(dm.file_id("relA"), None);

        assert!(matches!(
            dm.delete_file("relA"),
            Err(OxbowError::FileNotFound(_))
        ));
    }
}
