//! 固定记录文件表
//!
//! 启动策略保证存在的四个文件, 路径与大小由配置给出,
//! 文件内容的格式由上层 (用户表/日程表/家庭配置) 定义。

use crate::config;

// ===== 用户记录布局 =====

/// 用户名哈希长度 (sha256)
pub const USER_NAME_LEN: u32 = 32;
/// ECDH 公钥长度 (未压缩 P-256)
pub const USER_PUBLIC_KEY_LEN: u32 = 65;
/// 用户附加信息长度
pub const USER_INFO_LEN: u32 = 64;
/// 每个用户的临时钥匙数
pub const USER_TEMP_KEY_COUNT: u32 = 4;
/// 单个临时钥匙长度
pub const USER_TEMP_KEY_LEN: u32 = 16;

/// 单条用户记录大小: 用户名 + 公钥 + 角色 + 状态 + 信息 + 临时钥匙
pub const USER_RECORD_SIZE: u32 = USER_NAME_LEN
    + USER_PUBLIC_KEY_LEN
    + 1
    + 1
    + USER_INFO_LEN
    + USER_TEMP_KEY_COUNT * USER_TEMP_KEY_LEN;

/// 记录文件种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum RecordKind {
    /// 用户信息表
    UserInfo,
    /// 当前日程表
    ScheduleCurrent,
    /// 备份日程表
    ScheduleBackup,
    /// 家庭配置
    HomeConfig,
}

/// 一行记录文件配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFile {
    pub kind: RecordKind,
    /// 含挂载点的完整路径
    pub path: &'static str,
    /// 创建时的固定大小 (字节)
    pub size: u32,
}

impl RecordFile {
    pub const fn new(kind: RecordKind, path: &'static str, size: u32) -> Self {
        Self { kind, path, size }
    }
}

/// 四个固定记录文件 (路径 -> 大小)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTable {
    files: [RecordFile; 4],
}

impl RecordTable {
    /// 按 用户表/当前日程/备份日程/家庭配置 的顺序创建
    pub const fn new(
        user_info: RecordFile,
        schedule_current: RecordFile,
        schedule_backup: RecordFile,
        home_config: RecordFile,
    ) -> Self {
        Self {
            files: [user_info, schedule_current, schedule_backup, home_config],
        }
    }

    /// 默认布局
    pub const fn standard() -> Self {
        let schedule_size = config::SCHEDULE_NUM * config::SCHEDULE_RECORD_SIZE;
        Self::new(
            RecordFile::new(
                RecordKind::UserInfo,
                config::USER_INFO_PATH,
                config::MAX_USERS * USER_RECORD_SIZE,
            ),
            RecordFile::new(RecordKind::ScheduleCurrent, config::SCHEDULE_CURRENT_PATH, schedule_size),
            RecordFile::new(RecordKind::ScheduleBackup, config::SCHEDULE_BACKUP_PATH, schedule_size),
            RecordFile::new(RecordKind::HomeConfig, config::HOME_CFG_PATH, config::HOME_CFG_FILE_SIZE),
        )
    }

    /// 按完整路径精确匹配
    pub fn find(&self, path: &str) -> Option<&RecordFile> {
        self.files.iter().find(|f| f.path == path)
    }

    pub fn get(&self, kind: RecordKind) -> Option<&RecordFile> {
        self.files.iter().find(|f| f.kind == kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RecordFile> {
        self.files.iter()
    }
}

impl Default for RecordTable {
    fn default() -> Self {
        Self::standard()
    }
}
