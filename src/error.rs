//! 错误类型
//!
//! 网关和启动策略对外报告的错误。所有错误均为可恢复的返回值,
//! 内部不做任何重试。

use core::fmt;

use crate::fs::{FsError, StorageError};

/// 出错时正在执行的文件操作步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FileOp {
    Open,
    Read,
    Write,
    Seek,
    Truncate,
    OpenDir,
    Unlink,
    Mount,
    Unmount,
    Format,
    Stat,
}

impl fmt::Display for FileOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Open => "open",
            Self::Read => "read",
            Self::Write => "write",
            Self::Seek => "seek",
            Self::Truncate => "truncate",
            Self::OpenDir => "opendir",
            Self::Unlink => "unlink",
            Self::Mount => "mount",
            Self::Unmount => "unmount",
            Self::Format => "format",
            Self::Stat => "stat",
        };
        f.write_str(name)
    }
}

/// 存储层错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum Error {
    /// 底层设备或卷未就绪
    NotReady,
    /// 文件/目录不存在
    NotFound,
    /// 驱动调用失败
    Io { op: FileOp, source: FsError },
    /// 实际传输字节数与请求不一致
    LengthMismatch { expected: usize, actual: usize },
    /// 路径超过最大长度 (未进行任何 IO)
    PathTooLong { len: usize, max: usize },
    /// 删除了非固定记录文件的路径
    PolicyViolation,
    /// 原始 Flash 访问失败
    Flash(StorageError),
    /// 启动补全阶段有文件未能创建
    Incomplete { failed: usize },
}

impl Error {
    /// 把卷错误归类: 不存在和未挂载单独分出, 其余归为 IO 失败
    pub fn io(op: FileOp, source: FsError) -> Self {
        match source {
            FsError::NotFound => Self::NotFound,
            FsError::NotMounted => Self::NotReady,
            source => Self::Io { op, source },
        }
    }
}

impl From<StorageError> for Error {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotReady => Self::NotReady,
            e => Self::Flash(e),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotReady => write!(f, "Device not ready"),
            Self::NotFound => write!(f, "No such entry"),
            Self::Io { op, source } => write!(f, "{} failed: {}", op, source),
            Self::LengthMismatch { expected, actual } => {
                write!(f, "Length mismatch: expected {} bytes, got {}", expected, actual)
            }
            Self::PathTooLong { len, max } => write!(f, "Path too long: {} > {}", len, max),
            Self::PolicyViolation => write!(f, "Path is not a resettable record file"),
            Self::Flash(e) => write!(f, "Flash error: {}", e),
            Self::Incomplete { failed } => write!(f, "{} record file(s) could not be created", failed),
        }
    }
}
