//! 文件系统模块
//!
//! 门锁记录存储的分层结构:
//! - `flash`: 原始 Flash 区域的擦除/读/写
//! - `volume`: 挂载卷的访问接口 (`littlefs` feature 提供 littlefs2 实现)
//! - `gateway`: 全局锁串行化的文件操作
//! - `bootstrap`: 启动时按构建时间戳决定 保留/重建/格式化
//! - `selftest`: 板级调试用的破坏性自检
//! - `partition`: 按标签定位文件系统分区

pub mod bootstrap;
pub mod flash;
pub mod gateway;
#[cfg(feature = "littlefs")]
pub mod littlefs;
pub mod ops;
pub mod partition;
pub mod records;
pub mod selftest;
pub mod volume;

pub use bootstrap::{bootstrap, BootBranch, BootConfig, BootReport, BuildStamp, InitFlags, InitMode};
pub use flash::{RawFlash, StorageError};
pub use gateway::Gateway;
#[cfg(feature = "littlefs")]
pub use littlefs::{LittleFsVolume, PartitionStorage};
pub use records::{RecordFile, RecordKind, RecordTable};
pub use selftest::{run_self_test, SelfTestReport};
pub use volume::{DirEntry, FileOps, FsError, OpenOptions, Volume, VolumeStats};
