//! 文件系统自检 (仅用于板级调试)
//!
//! 挂载卷、列出根目录、累加启动计数文件、改写测试图案文件,
//! 通过日志中的十六进制转储观察掉电前后的读写是否一致。
//! `wipe` 为 true 时会先擦除整个分区。

use core::fmt::Write as _;

use super::ops;
use super::volume::{FileOps, OpenOptions, Volume, VolumeStats};
use crate::config::MAX_PATH_LEN;
use crate::error::{Error, FileOp};
use crate::util::log::*;

/// 测试图案文件大小
pub const PATTERN_FILE_SIZE: usize = 547;

/// 启动计数文件名
pub const COUNTER_FILE: &str = "boot_count";

/// 测试图案文件名
pub const PATTERN_FILE: &str = "pattern.bin";

/// 自检结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelfTestReport {
    /// 累加后的启动计数
    pub boot_count: u8,
    /// 图案文件是否为本次新建
    pub pattern_created: bool,
    pub stats: VolumeStats,
    /// 根目录条目数 (累加之前)
    pub entries: usize,
}

/// 初始图案: 全部 0x55, 每 8 字节放一个从 1 开始的序号, 末字节 0xAA
pub fn init_pattern(pattern: &mut [u8]) {
    let Some(last) = pattern.len().checked_sub(1) else {
        return;
    };

    pattern.fill(0x55);
    let mut value = 1u8;
    for byte in pattern.iter_mut().step_by(8) {
        *byte = value;
        value = value.wrapping_add(1);
    }
    pattern[last] = 0xAA;
}

/// 改写图案
///
/// 首字节为偶数时填充 0xAA, 否则 0x55; 每 8 字节的位置和末字节加 `inc`。
pub fn incr_pattern(pattern: &mut [u8], inc: u8) {
    let Some(last) = pattern.len().checked_sub(1) else {
        return;
    };

    let fill = if pattern[0] % 2 == 0 { 0xAA } else { 0x55 };
    for (i, byte) in pattern[..last].iter_mut().enumerate() {
        if i % 8 == 0 {
            *byte = byte.wrapping_add(inc);
        } else {
            *byte = fill;
        }
    }
    pattern[last] = pattern[last].wrapping_add(inc);
}

/// 十六进制转储, 每行 16 字节, 每 512 字节空一行
pub fn dump_pattern(pattern: &[u8]) {
    let mut chunks = pattern.chunks_exact(16);
    for (k, chunk) in chunks.by_ref().enumerate() {
        log_info!("{}", hex_line(chunk).as_str());
        if (k + 1) % 32 == 0 {
            log_info!("");
        }
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        log_info!("{}", hex_line(rest).as_str());
    }
}

fn hex_line(bytes: &[u8]) -> heapless::String<64> {
    let mut line = heapless::String::new();
    for (i, byte) in bytes.iter().enumerate() {
        let sep = if i == 7 { "  " } else { " " };
        // 最多 16 字节, 不会溢出
        let _ = write!(line, "{:02x}{}", byte, sep);
    }
    line
}

fn join(mount_point: &str, name: &str) -> Result<heapless::String<MAX_PATH_LEN>, Error> {
    let mut path = heapless::String::new();
    write!(path, "{}/{}", mount_point, name).map_err(|_| Error::PathTooLong {
        len: mount_point.len() + name.len() + 1,
        max: MAX_PATH_LEN,
    })?;
    Ok(path)
}

/// 运行自检
///
/// 无论中间哪一步失败, 最后都会卸载卷。
pub fn run_self_test<V: Volume>(
    volume: &mut V,
    mount_point: &str,
    wipe: bool,
) -> Result<SelfTestReport, Error> {
    log_info!("Sample program to r/w files on littlefs");

    if wipe {
        log_warn!("Erasing flash area ...");
        volume.wipe().map_err(|e| {
            log_error!("FAIL: wipe {}", e);
            Error::io(FileOp::Format, e)
        })?;
    }

    volume.mount().map_err(|e| {
        log_error!("FAIL: mount {}: {}", mount_point, e);
        Error::io(FileOp::Mount, e)
    })?;
    log_info!("{} mount: ok", mount_point);

    let result = exercise(volume, mount_point);

    match volume.unmount() {
        Ok(()) => log_info!("{} unmount: ok", mount_point),
        Err(e) => log_error!("{} unmount: {}", mount_point, e),
    }
    result
}

fn exercise<V: Volume>(volume: &mut V, mount_point: &str) -> Result<SelfTestReport, Error> {
    let counter = join(mount_point, COUNTER_FILE)?;
    let pattern = join(mount_point, PATTERN_FILE)?;

    let stats = ops::volume_stats(volume)?;
    let entries = ops::list_dir(volume, mount_point)?;
    let boot_count = increase_counter(volume, &counter)?;
    let pattern_created = adjust_pattern(volume, &pattern)?;

    Ok(SelfTestReport {
        boot_count,
        pattern_created,
        stats,
        entries,
    })
}

fn open_rw<V: Volume, R>(
    volume: &mut V,
    path: &str,
    f: impl FnOnce(&mut dyn FileOps) -> Result<R, Error>,
) -> Result<R, Error> {
    volume
        .open_and_then(path, OpenOptions::read_write_create(), f)
        .map_err(|e| {
            log_error!("FAIL: open {}: {}", path, e);
            Error::io(FileOp::Open, e)
        })?
}

/// 读取单字节计数并加一写回, 256 时回绕为 0
fn increase_counter<V: Volume>(volume: &mut V, path: &str) -> Result<u8, Error> {
    open_rw(volume, path, |file| {
        let mut count = [0u8; 1];
        let read = file.read(&mut count).map_err(|e| {
            log_error!("FAIL: read {}: {}", path, e);
            Error::io(FileOp::Read, e)
        })?;
        log_info!("{} read count:{} (bytes: {})", path, count[0], read);

        file.seek(0).map_err(|e| {
            log_error!("FAIL: seek {}: {}", path, e);
            Error::io(FileOp::Seek, e)
        })?;

        count[0] = count[0].wrapping_add(1);
        let written = file.write(&count).map_err(|e| {
            log_error!("FAIL: write {}: {}", path, e);
            Error::io(FileOp::Write, e)
        })?;
        log_info!("{} write new boot count {}: [wr:{}]", path, count[0], written);
        Ok(count[0])
    })
}

/// 新文件写入初始图案, 已有文件读出后改写; 返回是否新建
fn adjust_pattern<V: Volume>(volume: &mut V, path: &str) -> Result<bool, Error> {
    open_rw(volume, path, |file| {
        let mut pattern = [0u8; PATTERN_FILE_SIZE];

        let len = file.len().map_err(|e| {
            log_error!("FAIL: stat {}: {}", path, e);
            Error::io(FileOp::Stat, e)
        })?;

        let created = len == 0;
        if created {
            log_info!("Test file: {} not found, create one!", path);
            init_pattern(&mut pattern);
        } else {
            file.read(&mut pattern).map_err(|e| {
                log_error!("FAIL: read {}: {}", path, e);
                Error::io(FileOp::Read, e)
            })?;
            incr_pattern(&mut pattern, 1);
        }

        log_info!("------ FILE: {} ------", path);
        dump_pattern(&pattern);

        file.seek(0).map_err(|e| {
            log_error!("FAIL: seek {}: {}", path, e);
            Error::io(FileOp::Seek, e)
        })?;
        file.write(&pattern).map_err(|e| {
            log_error!("FAIL: write {}: {}", path, e);
            Error::io(FileOp::Write, e)
        })?;
        Ok(created)
    })
}
