//! 单次文件操作
//!
//! 每个函数对应一次 打开 -> 操作 -> 关闭 的完整流程, 直接作用于卷,
//! 不加锁。网关在持锁状态下调用它们; 启动策略和自检在并发访问
//! 开始之前直接调用。

use core::fmt::Write as _;

use super::volume::{
    DirEnd, DirEntry, FileOps, FsError, OpenOptions, Volume, VolumeStats, NAME_MAX,
};
use crate::config::MAX_PATH_LEN;
use crate::error::{Error, FileOp};
use crate::util::log::*;

/// 检查路径长度, 在任何 IO 之前调用
pub fn check_path(path: &str) -> Result<(), Error> {
    if path.len() > MAX_PATH_LEN {
        log_error!("FS: path too long ({} > {})", path.len(), MAX_PATH_LEN);
        return Err(Error::PathTooLong {
            len: path.len(),
            max: MAX_PATH_LEN,
        });
    }
    Ok(())
}

fn open<V: Volume, R>(
    volume: &mut V,
    path: &str,
    options: OpenOptions,
    f: impl FnOnce(&mut dyn FileOps) -> Result<R, Error>,
) -> Result<R, Error> {
    volume
        .open_and_then(path, options, f)
        .map_err(|e| {
            log_error!("Failed to open file {} err {}", path, e);
            Error::io(FileOp::Open, e)
        })?
}

/// 创建文件并设置为固定大小
///
/// 已存在的文件先截断为 0 再扩展, 内容全部变为 0。
/// 不做回滚: 扩展失败时会留下长度为 0 的文件。
pub fn create_file<V: Volume>(volume: &mut V, path: &str, size: u32) -> Result<(), Error> {
    check_path(path)?;
    log_info!("Create file {}", path);

    open(volume, path, OpenOptions::read_write_create(), |file| {
        file.set_len(0).map_err(|e| {
            log_error!("Failed to shrink file {}: {}", path, e);
            Error::io(FileOp::Truncate, e)
        })?;

        file.set_len(size).map_err(|e| {
            log_error!("Failed to extend file to: {} bytes: {}", size, e);
            Error::io(FileOp::Truncate, e)
        })?;

        if let Err(e) = file.sync() {
            log_warn!("sync {} failed: {}", path, e);
        }
        Ok(())
    })
}

/// 检查文件是否存在
///
/// 打开失败且原因为不存在时返回 `Ok(false)`, 其他失败一律返回错误。
pub fn file_exists<V: Volume>(volume: &mut V, path: &str) -> Result<bool, Error> {
    check_path(path)?;

    match volume.open_and_then(path, OpenOptions::read_only(), |_| ()) {
        Ok(()) => Ok(true),
        Err(FsError::NotFound) => Ok(false),
        Err(e) => {
            log_error!("exists {}: {}", path, e);
            Err(Error::io(FileOp::Open, e))
        }
    }
}

/// 从 `offset` (None 表示文件开头) 读取恰好 `buffer.len()` 字节
///
/// 短读视为失败, 不报告实际读到的字节数。
pub fn read_file<V: Volume>(
    volume: &mut V,
    path: &str,
    buffer: &mut [u8],
    offset: Option<u32>,
) -> Result<usize, Error> {
    check_path(path)?;
    let expected = buffer.len();

    open(volume, path, OpenOptions::read_only(), |file| {
        if let Some(offset) = offset {
            file.seek(offset).map_err(|e| {
                log_error!("Failed to seek file {}: {}", path, e);
                Error::io(FileOp::Seek, e)
            })?;
        }

        let actual = file.read(buffer).map_err(|e| {
            log_error!("Error read file {}: {}", path, e);
            Error::io(FileOp::Read, e)
        })?;

        if actual != expected {
            log_error!("Error len file {}: requested {} bytes, read {} bytes", path, expected, actual);
            return Err(Error::LengthMismatch { expected, actual });
        }
        Ok(actual)
    })
}

fn write_all_or_fail(file: &mut dyn FileOps, path: &str, data: &[u8]) -> Result<usize, Error> {
    let actual = file.write(data).map_err(|e| {
        log_error!("Error write file {}: {}", path, e);
        Error::io(FileOp::Write, e)
    })?;

    if actual != data.len() {
        log_error!("Error write file {}, ret: {}", path, actual);
        return Err(Error::LengthMismatch {
            expected: data.len(),
            actual,
        });
    }
    Ok(actual)
}

/// 追加写入, 文件必须已存在
pub fn append_file<V: Volume>(volume: &mut V, path: &str, data: &[u8]) -> Result<usize, Error> {
    check_path(path)?;

    open(volume, path, OpenOptions::append_mode(), |file| {
        write_all_or_fail(file, path, data)
    })
}

/// 在 `offset` 处写入, 文件必须已存在
pub fn write_file_at<V: Volume>(
    volume: &mut V,
    path: &str,
    data: &[u8],
    offset: u32,
) -> Result<usize, Error> {
    check_path(path)?;

    open(volume, path, OpenOptions::write_only(), |file| {
        file.seek(offset).map_err(|e| {
            log_error!("Failed to seek file {}: {}", path, e);
            Error::io(FileOp::Seek, e)
        })?;
        write_all_or_fail(file, path, data)
    })
}

/// 拼接 `dir/name`
fn join(dir: &str, name: &str) -> Result<heapless::String<{ MAX_PATH_LEN + NAME_MAX + 1 }>, Error> {
    let mut full = heapless::String::new();
    write!(full, "{}/{}", dir.trim_end_matches('/'), name).map_err(|_| Error::PathTooLong {
        len: dir.len() + name.len() + 1,
        max: MAX_PATH_LEN,
    })?;
    Ok(full)
}

/// 目录项名称缓存上限 (每一轮最多处理的条目数)
pub const MAX_DIR_ENTRIES: usize = 32;

type NameBatch = heapless::Vec<heapless::String<NAME_MAX>, MAX_DIR_ENTRIES>;

/// 删除目录下的所有条目 (不递归)
///
/// 每轮读取最多 [`MAX_DIR_ENTRIES`] 个名称并逐个 unlink, 然后重新读取目录,
/// 直到某一轮读完整个目录或读取出错。
/// 子目录同样直接 unlink, 非空子目录会删除失败并记录日志, 之后的轮次跳过它。
/// 返回处理过的条目数; 目录读取中途失败时仍返回已处理的数量,
/// 此时该值只是尽力而为的计数。
pub fn remove_all_in<V: Volume>(volume: &mut V, dir: &str) -> Result<usize, Error> {
    check_path(dir)?;

    let mut failed = NameBatch::new();
    let mut count = 0;
    loop {
        let mut names = NameBatch::new();
        let mut overflow = false;
        let end = volume
            .read_dir(dir, &mut |entry: &DirEntry| {
                if failed.contains(&entry.name) {
                    return;
                }
                log_debug!("unlink queue: {}", entry.name.as_str());
                if names.push(entry.name.clone()).is_err() {
                    overflow = true;
                }
            })
            .map_err(|e| {
                log_error!("Error opening dir {} [{}]", dir, e);
                Error::io(FileOp::OpenDir, e)
            })?;

        for name in &names {
            let full = join(dir, name)?;
            count += 1;
            if let Err(e) = volume.remove(&full) {
                log_error!("unlink {} failed: {}", full.as_str(), e);
                if failed.push(name.clone()).is_err() {
                    log_warn!("{}: too many entries failed to unlink", dir);
                    return Ok(count);
                }
            }
        }

        if let DirEnd::Interrupted(e) = end {
            log_error!("Error reading dir {} [{}]", dir, e);
            return Ok(count);
        }
        if !overflow {
            return Ok(count);
        }
        log_debug!("{}: {} entries removed, rereading", dir, count);
    }
}

/// 列出目录内容到日志, 返回条目数
pub fn list_dir<V: Volume>(volume: &mut V, path: &str) -> Result<usize, Error> {
    check_path(path)?;
    log_info!("Listing dir {} ...", path);

    let mut count = 0;
    let end = volume
        .read_dir(path, &mut |entry: &DirEntry| {
            if entry.is_dir() {
                log_info!("[DIR ] {}", entry.name.as_str());
            } else {
                log_info!("[FILE] {} (size = {})", entry.name.as_str(), entry.size);
            }
            count += 1;
        })
        .map_err(|e| {
            log_error!("Error opening dir {} [{}]", path, e);
            Error::io(FileOp::OpenDir, e)
        })?;

    match end {
        DirEnd::Complete => Ok(count),
        DirEnd::Interrupted(e) => {
            log_error!("Error reading dir [{}]", e);
            Err(Error::io(FileOp::Read, e))
        }
    }
}

/// 读取卷统计信息并写入日志
pub fn volume_stats<V: Volume>(volume: &mut V) -> Result<VolumeStats, Error> {
    let stats = volume.stats().map_err(|e| {
        log_error!("FAIL: statvfs: {}", e);
        Error::io(FileOp::Stat, e)
    })?;

    log_info!(
        "{}: bsize = {} ; blocks = {} ; bfree = {}",
        volume.mount_point(),
        stats.block_size,
        stats.total_blocks,
        stats.free_blocks
    );
    Ok(stats)
}
