//! ESP32 分区表支持
//!
//! 按标签在 ESP-IDF 分区表中定位文件系统分区。

use core::fmt;

use embedded_storage::nor_flash::NorFlash;

use super::flash::RawFlash;
use crate::config::{BUILD_STAMP_OFFSET, FS_PARTITION_SIZE, SECTOR_SIZE};
use crate::error::Error;
use crate::util::log::*;

/// 分区表魔数 (ESP-IDF 格式)
const PARTITION_TABLE_MAGIC: u16 = 0xAA50;

/// 分区表最大条目数 (0xC00 字节)
const MAX_PARTITION_ENTRIES: usize = 95;

/// 分区表在 Flash 中的偏移量 (默认 0x8000)
pub const PARTITION_TABLE_OFFSET: u32 = 0x8000;

/// 单个分区条目大小
const PARTITION_ENTRY_SIZE: usize = 32;

/// LittleFS 数据分区子类型 (用户自定义, 常用 0x83)
pub const SUBTYPE_LITTLEFS: u8 = 0x83;

/// 分区类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionType {
    /// 应用程序分区
    App,
    /// 数据分区
    Data,
    /// 未知类型
    Unknown(u8),
}

impl From<u8> for PartitionType {
    fn from(value: u8) -> Self {
        match value {
            0x00 => Self::App,
            0x01 => Self::Data,
            other => Self::Unknown(other),
        }
    }
}

/// 单个分区描述
#[derive(Clone)]
pub struct Partition {
    /// 分区标签 (最长 16 字节, 不足时 null 结尾)
    pub label: heapless::String<16>,
    pub partition_type: PartitionType,
    /// 子类型 (原始值)
    pub subtype: u8,
    /// 分区在 Flash 中的偏移量
    pub offset: u32,
    /// 分区大小 (字节)
    pub size: u32,
    /// 分区已加密
    pub encrypted: bool,
}

impl Partition {
    /// 从原始字节解析分区条目, 魔数不符时返回 None
    pub fn from_bytes(data: &[u8; PARTITION_ENTRY_SIZE]) -> Option<Self> {
        let magic = u16::from_le_bytes([data[0], data[1]]);
        if magic != PARTITION_TABLE_MAGIC {
            return None;
        }

        let offset = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        let size = u32::from_le_bytes([data[8], data[9], data[10], data[11]]);

        // 12-27 字节为标签
        let label_bytes = &data[12..28];
        let label_len = label_bytes.iter().position(|&b| b == 0).unwrap_or(16);
        let label_str = core::str::from_utf8(&label_bytes[..label_len]).ok()?;
        let mut label = heapless::String::new();
        label.push_str(label_str).ok()?;

        let flags = u32::from_le_bytes([data[28], data[29], data[30], data[31]]);

        Some(Self {
            label,
            partition_type: PartitionType::from(data[2]),
            subtype: data[3],
            offset,
            size,
            encrypted: flags & 0x01 != 0,
        })
    }

    /// 是否为 LittleFS 数据分区
    pub fn is_littlefs(&self) -> bool {
        self.partition_type == PartitionType::Data && self.subtype == SUBTYPE_LITTLEFS
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("label", &self.label.as_str())
            .field("type", &self.partition_type)
            .field("subtype", &self.subtype)
            .field("offset", &format_args!("0x{:08X}", self.offset))
            .field("size", &format_args!("0x{:08X} ({}KB)", self.size, self.size / 1024))
            .finish()
    }
}

/// 按标签扫描分区表
///
/// 逐条读取, 遇到第一个魔数不符的条目 (空白或 MD5 校验条目) 结束。
pub fn find_by_label<F: NorFlash>(
    flash: &mut RawFlash<F>,
    table_offset: u32,
    label: &str,
) -> Result<Option<Partition>, Error> {
    let mut entry = [0u8; PARTITION_ENTRY_SIZE];

    for index in 0..MAX_PARTITION_ENTRIES {
        let offset = table_offset + (index * PARTITION_ENTRY_SIZE) as u32;
        flash.read(offset, &mut entry)?;

        let Some(partition) = Partition::from_bytes(&entry) else {
            break;
        };
        log_debug!(
            "partition {}: offset 0x{:x} size 0x{:x}",
            partition.label.as_str(),
            partition.offset,
            partition.size
        );
        if partition.label.as_str() == label {
            return Ok(Some(partition));
        }
    }
    Ok(None)
}

/// 文件系统区域 `[offset, offset + FS_PARTITION_SIZE)` 是否与时间戳扇区重叠
fn overlaps_stamp_sector(offset: u32) -> bool {
    let fs_end = offset.saturating_add(FS_PARTITION_SIZE);
    let stamp_end = BUILD_STAMP_OFFSET + SECTOR_SIZE;
    offset < stamp_end && BUILD_STAMP_OFFSET < fs_end
}

/// 定位文件系统分区, 返回其起始偏移
///
/// 分区必须能容纳固定大小的文件系统, 且不能覆盖构建时间戳扇区;
/// 比需要的大时只使用前面部分。
pub fn locate_fs_partition<F: NorFlash>(
    flash: &mut RawFlash<F>,
    label: &str,
) -> Result<Option<u32>, Error> {
    let Some(partition) = find_by_label(flash, PARTITION_TABLE_OFFSET, label)? else {
        log_warn!("partition {} not found", label);
        return Ok(None);
    };

    if partition.size < FS_PARTITION_SIZE {
        log_error!(
            "partition {} too small: 0x{:x} < 0x{:x}",
            label,
            partition.size,
            FS_PARTITION_SIZE
        );
        return Ok(None);
    }
    if overlaps_stamp_sector(partition.offset) {
        log_error!(
            "partition {} at 0x{:x} covers stamp sector 0x{:x}",
            label,
            partition.offset,
            BUILD_STAMP_OFFSET
        );
        return Ok(None);
    }
    if !partition.is_littlefs() {
        log_warn!("partition {} subtype 0x{:x} is not littlefs", label, partition.subtype);
    }

    log_info!("Area {} at 0x{:x} for {} bytes", label, partition.offset, partition.size);
    Ok(Some(partition.offset))
}
