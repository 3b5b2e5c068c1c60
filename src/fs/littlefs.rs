//! LittleFS 卷
//!
//! 基于 littlefs2 的 [`Volume`] 实现:
//! - `PartitionStorage`: 把 Flash 上的一个分区适配为 littlefs2 的块设备
//! - `LittleFsVolume`: 挂载点路径转换、错误映射、自动格式化
//!
//! littlefs2 的文件系统对象借用块设备, 每次调用都在
//! `mount_and_then` 内完成, 卷本身只记录挂载状态。

use embedded_storage::nor_flash::NorFlash;
use littlefs2::consts;
use littlefs2::driver::Storage;
use littlefs2::fs::{File, Filesystem};
use littlefs2::io::{self, Read as _, Seek as _, SeekFrom, Write as _};
use littlefs2::path::PathBuf;

use super::volume::{
    DirEnd, DirEntry, FileOps, FileType, FsError, OpenOptions, Volume, VolumeStats, NAME_MAX,
};
use crate::config::{FS_PARTITION_SIZE, SECTOR_SIZE};
use crate::util::log::*;

/// littlefs 块大小 (等于 Flash 扇区)
pub const FS_BLOCK_SIZE: usize = SECTOR_SIZE as usize;

/// 分区块数
pub const FS_BLOCK_COUNT: usize = (FS_PARTITION_SIZE / SECTOR_SIZE) as usize;

/// 把 littlefs2 错误映射为卷错误
fn map_lfs_error(e: io::Error) -> FsError {
    match e {
        io::Error::NoSuchEntry => FsError::NotFound,
        io::Error::EntryAlreadyExisted => FsError::AlreadyExists,
        io::Error::PathNotDir => FsError::NotADirectory,
        io::Error::PathIsDir => FsError::IsADirectory,
        io::Error::DirNotEmpty => FsError::DirectoryNotEmpty,
        io::Error::FilenameTooLong => FsError::NameTooLong,
        io::Error::NoSpace => FsError::NoSpace,
        io::Error::Corruption => FsError::Corrupt,
        io::Error::Invalid => FsError::InvalidParam,
        _ => FsError::Io,
    }
}

// ===================================================================
// 分区块设备
// ===================================================================

/// Flash 分区块设备
///
/// 偏移量都相对分区起点, 分区大小固定为 [`FS_PARTITION_SIZE`]。
pub struct PartitionStorage<F> {
    flash: F,
    /// 分区在 Flash 中的起始偏移
    offset: u32,
}

impl<F: NorFlash> PartitionStorage<F> {
    pub const fn new(flash: F, offset: u32) -> Self {
        Self { flash, offset }
    }

    /// 分区起始偏移
    pub fn offset(&self) -> u32 {
        self.offset
    }

    fn absolute(&self, off: usize, len: usize) -> io::Result<u32> {
        let end = off.checked_add(len).ok_or(io::Error::Invalid)?;
        if end > FS_PARTITION_SIZE as usize {
            return Err(io::Error::Invalid);
        }
        Ok(self.offset + off as u32)
    }

    /// 擦除整个分区
    fn erase_all(&mut self) -> Result<(), FsError> {
        let end = self.offset + FS_PARTITION_SIZE;
        self.flash.erase(self.offset, end).map_err(|_| {
            log_error!("lfs: erase 0x{:x}..0x{:x} failed", self.offset, end);
            FsError::Io
        })
    }
}

impl<F: NorFlash> Storage for PartitionStorage<F> {
    const READ_SIZE: usize = 16;
    const WRITE_SIZE: usize = 256;
    const BLOCK_SIZE: usize = FS_BLOCK_SIZE;
    const BLOCK_COUNT: usize = FS_BLOCK_COUNT;
    const BLOCK_CYCLES: isize = 500;
    type CACHE_SIZE = consts::U256;
    type LOOKAHEAD_SIZE = consts::U16;

    fn read(&mut self, off: usize, buf: &mut [u8]) -> io::Result<usize> {
        let addr = self.absolute(off, buf.len())?;
        self.flash.read(addr, buf).map_err(|_| io::Error::Io)?;
        Ok(buf.len())
    }

    fn write(&mut self, off: usize, data: &[u8]) -> io::Result<usize> {
        let addr = self.absolute(off, data.len())?;
        self.flash.write(addr, data).map_err(|_| io::Error::Io)?;
        Ok(data.len())
    }

    fn erase(&mut self, off: usize, len: usize) -> io::Result<usize> {
        let addr = self.absolute(off, len)?;
        self.flash
            .erase(addr, addr + len as u32)
            .map_err(|_| io::Error::Io)?;
        Ok(len)
    }
}

// ===================================================================
// 卷
// ===================================================================

/// 挂载在固定分区上的 littlefs 卷
pub struct LittleFsVolume<F> {
    storage: PartitionStorage<F>,
    mount_point: &'static str,
    mounted: bool,
}

impl<F: NorFlash> LittleFsVolume<F> {
    pub const fn new(storage: PartitionStorage<F>, mount_point: &'static str) -> Self {
        Self {
            storage,
            mount_point,
            mounted: false,
        }
    }

    /// 把含挂载点的完整路径转换为卷内路径
    fn local_path(&self, path: &str) -> Result<PathBuf, FsError> {
        let rest = path.strip_prefix(self.mount_point).ok_or(FsError::NotFound)?;
        let rest = match rest {
            "" => "/",
            r if r.starts_with('/') => r,
            _ => return Err(FsError::NotFound),
        };
        if rest.contains('\0') {
            return Err(FsError::InvalidParam);
        }
        if rest.len() > NAME_MAX {
            return Err(FsError::NameTooLong);
        }
        Ok(PathBuf::from(rest))
    }

    fn ensure_mounted(&self) -> Result<(), FsError> {
        if !self.mounted {
            return Err(FsError::NotMounted);
        }
        Ok(())
    }

    fn with_fs<R>(
        &mut self,
        f: impl FnOnce(&Filesystem<'_, PartitionStorage<F>>) -> io::Result<R>,
    ) -> Result<R, FsError> {
        self.ensure_mounted()?;
        Filesystem::mount_and_then(&mut self.storage, f).map_err(map_lfs_error)
    }
}

impl<F: NorFlash> Volume for LittleFsVolume<F> {
    fn mount(&mut self) -> Result<(), FsError> {
        if !Filesystem::is_mountable(&mut self.storage) {
            log_warn!("{}: not mountable, formatting", self.mount_point);
            Filesystem::format(&mut self.storage).map_err(|e| {
                let err = map_lfs_error(e);
                log_error!("{}: format failed: {}", self.mount_point, err);
                err
            })?;
            if !Filesystem::is_mountable(&mut self.storage) {
                log_error!("{}: still not mountable after format", self.mount_point);
                return Err(FsError::Corrupt);
            }
        }

        self.mounted = true;
        log_info!("{} mount: ok", self.mount_point);
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), FsError> {
        self.ensure_mounted()?;
        self.mounted = false;
        log_info!("{} unmount: ok", self.mount_point);
        Ok(())
    }

    fn mount_point(&self) -> &str {
        self.mount_point
    }

    fn is_mounted(&self) -> bool {
        self.mounted
    }

    fn wipe(&mut self) -> Result<(), FsError> {
        self.mounted = false;
        log_warn!("{}: erasing partition at 0x{:x}", self.mount_point, self.storage.offset);
        self.storage.erase_all()
    }

    fn stats(&mut self) -> Result<VolumeStats, FsError> {
        let (total, free) = self.with_fs(|fs| Ok((fs.total_blocks(), fs.available_blocks()?)))?;
        Ok(VolumeStats {
            block_size: FS_BLOCK_SIZE as u32,
            total_blocks: total as u32,
            free_blocks: free as u32,
        })
    }

    fn open_and_then<R>(
        &mut self,
        path: &str,
        options: OpenOptions,
        f: impl FnOnce(&mut dyn FileOps) -> R,
    ) -> Result<R, FsError> {
        let local = self.local_path(path)?;

        // 闭包只会被调用一次, 结果放在外面以区分打开失败和关闭失败
        let mut output = None;
        let status = self.with_fs(|fs| {
            fs.open_file_with_options_and_then(
                |o| {
                    o.read(options.read)
                        .write(options.write)
                        .create(options.create)
                        .append(options.append)
                        .truncate(options.truncate)
                },
                &local,
                |file| {
                    output = Some(f(&mut LfsFile { file }));
                    Ok(())
                },
            )
        });

        match (output, status) {
            (Some(result), Ok(())) => Ok(result),
            (Some(result), Err(e)) => {
                log_error!("close {} failed: {}", path, e);
                Ok(result)
            }
            (None, Err(e)) => Err(e),
            (None, Ok(())) => Err(FsError::Io),
        }
    }

    fn read_dir(
        &mut self,
        path: &str,
        visit: &mut dyn FnMut(&DirEntry),
    ) -> Result<DirEnd, FsError> {
        let local = self.local_path(path)?;

        self.with_fs(|fs| {
            fs.read_dir_and_then(&local, |dir| {
                for entry in dir {
                    let entry = match entry {
                        Ok(entry) => entry,
                        Err(e) => return Ok(DirEnd::Interrupted(map_lfs_error(e))),
                    };

                    let name = entry.file_name().as_str();
                    if name == "." || name == ".." {
                        continue;
                    }

                    let mut owned = heapless::String::new();
                    if owned.push_str(name).is_err() {
                        return Ok(DirEnd::Interrupted(FsError::NameTooLong));
                    }
                    let metadata = entry.metadata();
                    let converted = if metadata.is_dir() {
                        DirEntry { file_type: FileType::Directory, size: 0, name: owned }
                    } else {
                        DirEntry { file_type: FileType::File, size: metadata.len() as u32, name: owned }
                    };
                    visit(&converted);
                }
                Ok(DirEnd::Complete)
            })
        })
    }

    fn remove(&mut self, path: &str) -> Result<(), FsError> {
        let local = self.local_path(path)?;
        self.with_fs(|fs| fs.remove(&local))
    }
}

/// 打开中的 littlefs 文件
struct LfsFile<'f, 'a, 'b, F: NorFlash> {
    file: &'f File<'a, 'b, PartitionStorage<F>>,
}

impl<F: NorFlash> FileOps for LfsFile<'_, '_, '_, F> {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FsError> {
        self.file.read(buffer).map_err(map_lfs_error)
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, FsError> {
        self.file.write(data).map_err(map_lfs_error)
    }

    fn seek(&mut self, offset: u32) -> Result<u32, FsError> {
        self.file
            .seek(SeekFrom::Start(offset))
            .map(|pos| pos as u32)
            .map_err(map_lfs_error)
    }

    fn set_len(&mut self, len: u32) -> Result<(), FsError> {
        self.file.set_len(len as usize).map_err(map_lfs_error)
    }

    fn sync(&mut self) -> Result<(), FsError> {
        self.file.sync().map_err(map_lfs_error)
    }

    fn len(&mut self) -> Result<u32, FsError> {
        self.file.len().map(|n| n as u32).map_err(map_lfs_error)
    }
}
