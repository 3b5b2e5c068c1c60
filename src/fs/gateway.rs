//! 串行化文件操作网关
//!
//! 卷被放在一把全局互斥锁内, 每个操作从打开到关闭全程持锁,
//! 任意时刻最多只有一个文件操作在进行。锁通过 guard 释放,
//! 任何返回路径 (包括错误) 都会释放。等待锁没有超时。

use super::ops;
use super::records::RecordTable;
use super::volume::{Volume, VolumeStats};
use crate::error::Error;
use crate::sync::CriticalMutex;
use crate::util::log::*;

/// 文件操作网关
///
/// # Example
/// ```ignore
/// static GATEWAY: StaticCell<Gateway<LittleFsVolume<..>>> = StaticCell::new();
/// let gateway = GATEWAY.init(Gateway::new(volume, RecordTable::standard()));
///
/// let mut buf = [0u8; 24];
/// gateway.read_at("/lfs1/schedule_cur", &mut buf, 48).await?;
/// ```
pub struct Gateway<V> {
    volume: CriticalMutex<V>,
    records: RecordTable,
}

impl<V: Volume> Gateway<V> {
    /// 接管已挂载的卷
    pub const fn new(volume: V, records: RecordTable) -> Self {
        Self {
            volume: CriticalMutex::new(volume),
            records,
        }
    }

    /// 固定记录文件表
    pub fn records(&self) -> &RecordTable {
        &self.records
    }

    /// 创建文件并设置为 `size` 字节 (内容全 0)
    pub async fn create(&self, path: &str, size: u32) -> Result<(), Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::create_file(&mut *volume, path, size)
    }

    /// 从文件开头读取恰好 `buffer.len()` 字节
    pub async fn read(&self, path: &str, buffer: &mut [u8]) -> Result<usize, Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::read_file(&mut *volume, path, buffer, None)
    }

    /// 从 `offset` 处读取恰好 `buffer.len()` 字节
    pub async fn read_at(&self, path: &str, buffer: &mut [u8], offset: u32) -> Result<usize, Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::read_file(&mut *volume, path, buffer, Some(offset))
    }

    /// 追加写入
    pub async fn write_append(&self, path: &str, data: &[u8]) -> Result<usize, Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::append_file(&mut *volume, path, data)
    }

    /// 在 `offset` 处覆盖写入
    pub async fn write_at(&self, path: &str, data: &[u8], offset: u32) -> Result<usize, Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::write_file_at(&mut *volume, path, data, offset)
    }

    /// 重置固定记录文件
    ///
    /// 并不真正删除: 路径与记录表中某一项完全相同时, 以其固定大小
    /// 重新创建 (内容清零)。其他路径返回 [`Error::PolicyViolation`],
    /// 不产生任何 IO。
    pub async fn delete(&self, path: &str) -> Result<(), Error> {
        ops::check_path(path)?;

        let Some(record) = self.records.find(path) else {
            log_error!("delete {}: not a record file", path);
            return Err(Error::PolicyViolation);
        };

        let mut volume = self.volume.lock().await;
        log_info!("Reset record file {} ({} bytes)", record.path, record.size);
        ops::create_file(&mut *volume, record.path, record.size)
    }

    /// 删除目录下的所有条目 (不递归), 返回处理过的条目数
    ///
    /// 遍历中途失败时返回的计数只是尽力而为的结果。
    pub async fn delete_all_in_directory(&self, path: &str) -> Result<usize, Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::remove_all_in(&mut *volume, path)
    }

    /// 文件是否存在, 打开失败且原因不是 "不存在" 时返回错误
    pub async fn exists(&self, path: &str) -> Result<bool, Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::file_exists(&mut *volume, path)
    }

    /// 列出目录内容到日志
    pub async fn list_dir(&self, path: &str) -> Result<usize, Error> {
        ops::check_path(path)?;
        let mut volume = self.volume.lock().await;
        ops::list_dir(&mut *volume, path)
    }

    /// 卷统计信息
    pub async fn stats(&self) -> Result<VolumeStats, Error> {
        let mut volume = self.volume.lock().await;
        ops::volume_stats(&mut *volume)
    }

    /// 独占访问卷, 不经过锁
    pub fn get_mut(&mut self) -> &mut V {
        self.volume.get_mut()
    }

    /// 取回卷
    pub fn into_inner(self) -> V {
        self.volume.into_inner()
    }
}
