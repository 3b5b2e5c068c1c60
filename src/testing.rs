//! 主机测试替身
//!
//! - `RamFlash`: 内存 NorFlash, 擦除值 0xFF
//! - `RamVolume`: 内存文件系统卷, 记录 IO 事件并支持故障注入

use std::collections::{BTreeMap, BTreeSet};
use std::string::{String, ToString};
use std::vec::Vec;

use embedded_storage::nor_flash::{
    check_erase, check_read, check_write, ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash,
};

use crate::fs::volume::{
    DirEnd, DirEntry, FileOps, FileType, FsError, OpenOptions, Volume, VolumeStats,
};

// ===================================================================
// RamFlash
// ===================================================================

pub struct RamFlash {
    bytes: Vec<u8>,
    calls: usize,
    fail_writes: bool,
}

impl RamFlash {
    pub fn new(capacity: usize) -> Self {
        Self {
            bytes: vec![0xFF; capacity],
            calls: 0,
            fail_writes: false,
        }
    }

    /// 驱动调用次数
    pub fn calls(&self) -> usize {
        self.calls
    }

    pub fn fail_writes(&mut self, fail: bool) {
        self.fail_writes = fail;
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl ErrorType for RamFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        self.calls += 1;
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.bytes[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = 4096;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.calls += 1;
        check_erase(self, from, to)?;
        self.bytes[from as usize..to as usize].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.calls += 1;
        check_write(self, offset, bytes.len())?;
        if self.fail_writes {
            return Err(NorFlashErrorKind::Other);
        }
        let start = offset as usize;
        for (slot, &value) in self.bytes[start..start + bytes.len()].iter_mut().zip(bytes) {
            // NOR 编程只能把 1 变成 0
            *slot &= value;
        }
        Ok(())
    }
}

// ===================================================================
// RamVolume
// ===================================================================

/// 可注入故障的调用点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Mount,
    Wipe,
    Stats,
    Open,
    Read,
    Write,
    Seek,
    SetLen,
    Sync,
    Close,
    OpenDir,
    ReadDir,
    Remove,
}

/// IO 事件日志
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Open(String),
    Read(usize),
    Write(usize),
    Seek(u32),
    SetLen(u32),
    Sync,
    Close(String),
    Remove(String),
}

struct Fault {
    op: Op,
    error: FsError,
    /// 在第几次命中时触发 (0 = 下一次)
    skip: usize,
    persistent: bool,
}

#[derive(Default)]
struct Faults {
    pending: Vec<Fault>,
}

impl Faults {
    fn check(&mut self, op: Op) -> Result<(), FsError> {
        let Some(index) = self.pending.iter().position(|f| f.op == op) else {
            return Ok(());
        };
        let fault = &mut self.pending[index];
        if fault.skip > 0 {
            fault.skip -= 1;
            return Ok(());
        }
        let error = fault.error;
        if !fault.persistent {
            self.pending.remove(index);
        }
        Err(error)
    }
}

pub struct RamVolume {
    mount_point: String,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    mounted: bool,
    faults: Faults,
    /// 读写上限, 用于模拟短读/短写
    transfer_cap: Option<usize>,
    pub events: Vec<Event>,
    /// 所有到达卷的调用次数
    pub io_calls: usize,
    pub mounts: usize,
    pub wipes: usize,
}

impl RamVolume {
    pub fn new(mount_point: &str) -> Self {
        Self {
            mount_point: mount_point.to_string(),
            files: BTreeMap::new(),
            dirs: BTreeSet::new(),
            mounted: false,
            faults: Faults::default(),
            transfer_cap: None,
            events: Vec::new(),
            io_calls: 0,
            mounts: 0,
            wipes: 0,
        }
    }

    /// 创建并挂载
    pub fn mounted(mount_point: &str) -> Self {
        let mut volume = Self::new(mount_point);
        volume.mounted = true;
        volume
    }

    /// 下一次调用 `op` 时失败
    pub fn fail_next(&mut self, op: Op, error: FsError) {
        self.fail_nth(op, 0, error);
    }

    /// 跳过 `skip` 次后, 第一次调用 `op` 时失败
    pub fn fail_nth(&mut self, op: Op, skip: usize, error: FsError) {
        self.faults.pending.push(Fault { op, error, skip, persistent: false });
    }

    /// 每次调用 `op` 都失败
    pub fn fail_always(&mut self, op: Op, error: FsError) {
        self.faults.pending.push(Fault { op, error, skip: 0, persistent: true });
    }

    pub fn clear_faults(&mut self) {
        self.faults.pending.clear();
    }

    pub fn cap_transfers(&mut self, cap: Option<usize>) {
        self.transfer_cap = cap;
    }

    /// 直接放入文件内容 (不计入 IO)
    pub fn insert(&mut self, path: &str, data: &[u8]) {
        self.files.insert(path.to_string(), data.to_vec());
    }

    pub fn insert_dir(&mut self, path: &str) {
        self.dirs.insert(path.to_string());
    }

    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(path).map(Vec::as_slice)
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    fn enter(&mut self, op: Op) -> Result<(), FsError> {
        self.io_calls += 1;
        if !self.mounted {
            return Err(FsError::NotMounted);
        }
        self.faults.check(op)
    }

    fn is_dir(&self, path: &str) -> bool {
        path == self.mount_point || self.dirs.contains(path)
    }

    fn children(&self, dir: &str) -> Vec<DirEntry> {
        let prefix = format!("{}/", dir);
        let direct = |path: &String| -> Option<String> {
            let rest = path.strip_prefix(&prefix)?;
            (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
        };

        let mut entries = Vec::new();
        for path in &self.dirs {
            if let Some(name) = direct(path) {
                entries.push(entry(&name, FileType::Directory, 0));
            }
        }
        for (path, data) in &self.files {
            if let Some(name) = direct(path) {
                entries.push(entry(&name, FileType::File, data.len() as u32));
            }
        }
        entries
    }
}

fn entry(name: &str, file_type: FileType, size: u32) -> DirEntry {
    let mut owned = heapless::String::new();
    owned.push_str(name).unwrap();
    DirEntry { file_type, size, name: owned }
}

struct RamFile<'a> {
    data: &'a mut Vec<u8>,
    options: OpenOptions,
    position: usize,
    cap: Option<usize>,
    faults: &'a mut Faults,
    events: &'a mut Vec<Event>,
    io_calls: &'a mut usize,
}

impl RamFile<'_> {
    fn enter(&mut self, op: Op) -> Result<(), FsError> {
        *self.io_calls += 1;
        self.faults.check(op)
    }
}

impl FileOps for RamFile<'_> {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FsError> {
        self.enter(Op::Read)?;
        if !self.options.read {
            return Err(FsError::InvalidParam);
        }
        let available = self.data.len().saturating_sub(self.position);
        let mut n = buffer.len().min(available);
        if let Some(cap) = self.cap {
            n = n.min(cap);
        }
        buffer[..n].copy_from_slice(&self.data[self.position..self.position + n]);
        self.position += n;
        self.events.push(Event::Read(n));
        Ok(n)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        self.enter(Op::Write)?;
        if !self.options.write {
            return Err(FsError::InvalidParam);
        }
        if self.options.append {
            self.position = self.data.len();
        }
        let n = self.cap.map_or(data.len(), |cap| data.len().min(cap));
        let end = self.position + n;
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[self.position..end].copy_from_slice(&data[..n]);
        self.position = end;
        self.events.push(Event::Write(n));
        Ok(n)
    }

    fn seek(&mut self, offset: u32) -> Result<u32, FsError> {
        self.enter(Op::Seek)?;
        self.position = offset as usize;
        self.events.push(Event::Seek(offset));
        Ok(offset)
    }

    fn set_len(&mut self, len: u32) -> Result<(), FsError> {
        self.enter(Op::SetLen)?;
        if !self.options.write {
            return Err(FsError::InvalidParam);
        }
        self.data.resize(len as usize, 0);
        self.events.push(Event::SetLen(len));
        Ok(())
    }

    fn sync(&mut self) -> Result<(), FsError> {
        self.enter(Op::Sync)?;
        self.events.push(Event::Sync);
        Ok(())
    }

    fn len(&mut self) -> Result<u32, FsError> {
        Ok(self.data.len() as u32)
    }
}

impl Volume for RamVolume {
    fn mount(&mut self) -> Result<(), FsError> {
        self.io_calls += 1;
        self.faults.check(Op::Mount)?;
        self.mounted = true;
        self.mounts += 1;
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), FsError> {
        self.io_calls += 1;
        self.mounted = false;
        Ok(())
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn mount_point(&self) -> &str {
        &self.mount_point
    }

    fn wipe(&mut self) -> Result<(), FsError> {
        self.io_calls += 1;
        self.faults.check(Op::Wipe)?;
        self.files.clear();
        self.dirs.clear();
        self.mounted = false;
        self.wipes += 1;
        Ok(())
    }

    fn stats(&mut self) -> Result<VolumeStats, FsError> {
        self.enter(Op::Stats)?;
        let used: usize = self.files.values().map(|d| d.len().div_ceil(256).max(1)).sum();
        Ok(VolumeStats {
            block_size: 256,
            total_blocks: 1024,
            free_blocks: 1024u32.saturating_sub(used as u32),
        })
    }

    fn open_and_then<R>(
        &mut self,
        path: &str,
        options: OpenOptions,
        f: impl FnOnce(&mut dyn FileOps) -> R,
    ) -> Result<R, FsError> {
        self.enter(Op::Open)?;
        if self.is_dir(path) {
            return Err(FsError::IsADirectory);
        }
        if !self.files.contains_key(path) {
            if !options.create {
                return Err(FsError::NotFound);
            }
            self.files.insert(path.to_string(), Vec::new());
        }
        self.events.push(Event::Open(path.to_string()));

        let result = {
            let Self { files, faults, events, io_calls, transfer_cap, .. } = &mut *self;
            let data = files.get_mut(path).ok_or(FsError::Io)?;
            if options.truncate {
                data.clear();
            }
            let mut file = RamFile {
                data,
                options,
                position: 0,
                cap: *transfer_cap,
                faults,
                events,
                io_calls,
            };
            f(&mut file)
        };

        // 关闭失败不影响闭包结果
        let _ = self.faults.check(Op::Close);
        self.events.push(Event::Close(path.to_string()));
        Ok(result)
    }

    fn read_dir(
        &mut self,
        path: &str,
        visit: &mut dyn FnMut(&DirEntry),
    ) -> Result<DirEnd, FsError> {
        self.enter(Op::OpenDir)?;
        if !self.is_dir(path) {
            return Err(if self.files.contains_key(path) {
                FsError::NotADirectory
            } else {
                FsError::NotFound
            });
        }

        // 先快照, 遍历过程中允许删除
        for child in self.children(path) {
            if let Err(e) = self.faults.check(Op::ReadDir) {
                return Ok(DirEnd::Interrupted(e));
            }
            visit(&child);
        }
        Ok(DirEnd::Complete)
    }

    fn remove(&mut self, path: &str) -> Result<(), FsError> {
        self.enter(Op::Remove)?;
        if self.files.remove(path).is_some() {
            self.events.push(Event::Remove(path.to_string()));
            return Ok(());
        }
        if self.dirs.contains(path) {
            if !self.children(path).is_empty() {
                return Err(FsError::DirectoryNotEmpty);
            }
            self.dirs.remove(path);
            self.events.push(Event::Remove(path.to_string()));
            return Ok(());
        }
        Err(FsError::NotFound)
    }
}

mod tests {
    use super::*;

    #[test]
    fn test_ram_volume_extend_fills_zero() {
        let mut volume = RamVolume::mounted("/lfs1");
        volume
            .open_and_then("/lfs1/a", OpenOptions::read_write_create(), |file| {
                file.set_len(8).unwrap();
            })
            .unwrap();
        assert_eq!(volume.contents("/lfs1/a"), Some(&[0u8; 8][..]));
    }

    #[test]
    fn test_ram_volume_requires_mount() {
        let mut volume = RamVolume::new("/lfs1");
        let result = volume.open_and_then("/lfs1/a", OpenOptions::read_only(), |_| ());
        assert_eq!(result, Err(FsError::NotMounted));
    }
}
