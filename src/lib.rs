//! doorstore - ESP32-S3 门锁固件的记录存储层
//!
//! 本库提供以下核心功能:
//! - 原始 Flash 区域的擦除/读/写 (基于 embedded-storage)
//! - 挂载的 littlefs 卷访问 (基于 littlefs2)
//! - 全局互斥串行化的文件操作网关 (基于 embassy-sync)
//! - 启动时的存储初始化策略 (构建时间戳比对)
//! - 板级调试用的文件系统自检
//! - 条件编译日志系统

#![cfg_attr(not(test), no_std)]

pub mod error;
pub mod fs;
pub mod sync;
pub mod util;

#[cfg(test)]
pub(crate) mod testing;

// ===== 重导出常用类型 =====
pub use error::{Error, FileOp};
pub use fs::{
    bootstrap, BootBranch, BootConfig, BootReport, BuildStamp, FsError, Gateway, InitFlags,
    InitMode, RawFlash, RecordFile, RecordKind, RecordTable, StorageError, Volume,
};
pub use sync::CriticalMutex;

// ===== 版本信息 =====
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// 存储布局配置常量
pub mod config {
    /// 文件系统挂载点
    pub const MOUNT_POINT: &str = "/lfs1";

    /// 最大路径长度 (与 littlefs 的 LFS_NAME_MAX 一致)
    pub const MAX_PATH_LEN: usize = 255;

    /// Flash 扇区大小 (擦除单位)
    pub const SECTOR_SIZE: u32 = 4096;

    /// 构建时间戳在 Flash 中的偏移量
    pub const BUILD_STAMP_OFFSET: u32 = 0x3F_F000;

    /// 构建时间戳长度 (字节, 不足部分补 0)
    pub const BUILD_STAMP_LEN: usize = 32;

    /// 文件系统分区在 Flash 中的偏移量
    pub const FS_PARTITION_OFFSET: u32 = 0x40_0000;

    /// 文件系统分区大小
    pub const FS_PARTITION_SIZE: u32 = 0x10_0000;

    /// 文件系统分区标签 (分区表中查找用)
    pub const FS_PARTITION_LABEL: &str = "littlefs_storage";

    /// 用户信息表路径
    pub const USER_INFO_PATH: &str = "/lfs1/user_info";

    /// 当前日程表路径
    pub const SCHEDULE_CURRENT_PATH: &str = "/lfs1/schedule_cur";

    /// 备份日程表路径
    pub const SCHEDULE_BACKUP_PATH: &str = "/lfs1/schedule_bak";

    /// 家庭配置路径
    pub const HOME_CFG_PATH: &str = "/lfs1/home_cfg";

    /// 最大支持用户数
    pub const MAX_USERS: u32 = 10;

    /// 日程条目数
    pub const SCHEDULE_NUM: u32 = 16;

    /// 单条日程记录大小 (字节)
    pub const SCHEDULE_RECORD_SIZE: u32 = 24;

    /// 家庭配置文件大小 (字节)
    pub const HOME_CFG_FILE_SIZE: u32 = 1024;
}
