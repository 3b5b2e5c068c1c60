//! 原始 Flash 访问层
//!
//! 按绝对偏移对 Flash 设备进行擦除/读/写，不做缓冲和重试。
//! 设备驱动通过 embedded-storage 的 `NorFlash` 接口注入。

use core::fmt;

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind};

use crate::util::log::*;

/// 存储操作错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum StorageError {
    /// 设备未初始化
    NotReady,
    /// 地址越界
    OutOfBounds,
    /// 对齐错误
    NotAligned,
    /// 读取失败
    Read,
    /// 写入失败
    Write,
    /// 擦除失败
    Erase,
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "Device not ready"),
            Self::OutOfBounds => write!(f, "Address out of bounds"),
            Self::NotAligned => write!(f, "Address alignment error"),
            Self::Read => write!(f, "Flash read error"),
            Self::Write => write!(f, "Flash write error"),
            Self::Erase => write!(f, "Flash erase error"),
        }
    }
}

/// 把驱动错误归类, `fallback` 为该操作的通用失败
fn map_flash_error<E: NorFlashError>(error: E, fallback: StorageError) -> StorageError {
    match error.kind() {
        NorFlashErrorKind::NotAligned => StorageError::NotAligned,
        NorFlashErrorKind::OutOfBounds => StorageError::OutOfBounds,
        _ => fallback,
    }
}

/// 原始 Flash 设备
///
/// 每个操作先检查设备是否已初始化，再直接调用驱动。
/// 任何驱动错误都视为整体失败，不报告部分成功。
pub struct RawFlash<F> {
    /// 底层驱动
    flash: F,
    /// 是否已初始化
    initialized: bool,
}

impl<F: NorFlash> RawFlash<F> {
    /// 创建实例 (尚未就绪)
    pub const fn new(flash: F) -> Self {
        Self {
            flash,
            initialized: false,
        }
    }

    /// 初始化设备
    ///
    /// 校验驱动参数，通过后设备进入就绪状态
    pub fn init(&mut self) -> Result<(), StorageError> {
        let capacity = self.flash.capacity();
        if capacity == 0 {
            log_error!("flash: device reports zero capacity");
            return Err(StorageError::NotReady);
        }

        if capacity % F::ERASE_SIZE != 0 {
            log_error!("flash: capacity {} not a multiple of erase size {}", capacity, F::ERASE_SIZE);
            return Err(StorageError::NotAligned);
        }

        self.initialized = true;
        Ok(())
    }

    /// 检查是否已初始化
    pub fn is_ready(&self) -> bool {
        self.initialized
    }

    /// 设备容量 (字节)
    pub fn capacity(&self) -> usize {
        self.flash.capacity()
    }

    /// 擦除单位
    pub fn erase_size(&self) -> usize {
        F::ERASE_SIZE
    }

    fn ensure_ready(&self) -> Result<(), StorageError> {
        if !self.initialized {
            log_error!("flash: device not ready");
            return Err(StorageError::NotReady);
        }
        Ok(())
    }

    /// 擦除 `[offset, offset + size)` 区域
    pub fn erase(&mut self, offset: u32, size: u32) -> Result<(), StorageError> {
        self.ensure_ready()?;

        let end = offset.checked_add(size).ok_or(StorageError::OutOfBounds)?;
        match self.flash.erase(offset, end) {
            Ok(()) => {
                log_info!("Flash erase succeeded at 0x{:x} ({} bytes)", offset, size);
                Ok(())
            }
            Err(e) => {
                let err = map_flash_error(e, StorageError::Erase);
                log_error!("Flash erase failed! {}", err);
                Err(err)
            }
        }
    }

    /// 在 `offset` 处写入数据
    ///
    /// # 注意
    /// 目标区域需要先擦除
    pub fn write(&mut self, offset: u32, data: &[u8]) -> Result<(), StorageError> {
        self.ensure_ready()?;

        self.flash.write(offset, data).map_err(|e| {
            let err = map_flash_error(e, StorageError::Write);
            log_error!("Flash write failed! {}", err);
            err
        })
    }

    /// 从 `offset` 处读取 `buffer.len()` 字节
    pub fn read(&mut self, offset: u32, buffer: &mut [u8]) -> Result<(), StorageError> {
        self.ensure_ready()?;

        self.flash.read(offset, buffer).map_err(|e| {
            let err = map_flash_error(e, StorageError::Read);
            log_error!("Flash read failed! {}", err);
            err
        })
    }

    /// 获取底层驱动可变引用
    pub fn inner_mut(&mut self) -> &mut F {
        &mut self.flash
    }

    /// 取回底层驱动
    pub fn release(self) -> F {
        self.flash
    }
}
