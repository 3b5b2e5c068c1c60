//! 挂载卷访问接口
//!
//! 描述网关和启动策略所需的文件系统调用。具体实现由
//! littlefs2 卷 (`littlefs` feature) 或测试用内存卷提供。

use core::fmt;

use super::flash::StorageError;

/// 单个文件名的最大长度 (LFS_NAME_MAX)
pub const NAME_MAX: usize = 255;

/// 文件系统错误
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FsError {
    /// 存储层错误
    Storage(StorageError),
    /// 文件系统未挂载
    NotMounted,
    /// 文件/目录不存在
    NotFound,
    /// 文件/目录已存在
    AlreadyExists,
    /// 不是目录
    NotADirectory,
    /// 是目录
    IsADirectory,
    /// 目录非空
    DirectoryNotEmpty,
    /// 文件名过长
    NameTooLong,
    /// 空间不足
    NoSpace,
    /// 文件系统损坏
    Corrupt,
    /// 无效参数
    InvalidParam,
    /// IO 错误
    Io,
}

impl From<StorageError> for FsError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl fmt::Display for FsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "Storage error: {}", e),
            Self::NotMounted => write!(f, "Not mounted"),
            Self::NotFound => write!(f, "Not found"),
            Self::AlreadyExists => write!(f, "Already exists"),
            Self::NotADirectory => write!(f, "Not a directory"),
            Self::IsADirectory => write!(f, "Is a directory"),
            Self::DirectoryNotEmpty => write!(f, "Directory not empty"),
            Self::NameTooLong => write!(f, "Name too long"),
            Self::NoSpace => write!(f, "No space"),
            Self::Corrupt => write!(f, "Filesystem corrupt"),
            Self::InvalidParam => write!(f, "Invalid parameter"),
            Self::Io => write!(f, "IO error"),
        }
    }
}

/// 文件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum FileType {
    /// 普通文件
    File,
    /// 目录
    Directory,
}

/// 目录项
#[derive(Debug, Clone)]
pub struct DirEntry {
    /// 文件类型
    pub file_type: FileType,
    /// 文件大小 (目录为 0)
    pub size: u32,
    /// 文件名 (不含父路径)
    pub name: heapless::String<NAME_MAX>,
}

impl DirEntry {
    /// 是否为文件
    pub fn is_file(&self) -> bool {
        matches!(self.file_type, FileType::File)
    }

    /// 是否为目录
    pub fn is_dir(&self) -> bool {
        matches!(self.file_type, FileType::Directory)
    }
}

/// 目录遍历的结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirEnd {
    /// 读到目录末尾
    Complete,
    /// 中途读取目录失败
    Interrupted(FsError),
}

/// 卷统计信息 (statvfs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub struct VolumeStats {
    /// 块大小
    pub block_size: u32,
    /// 总块数
    pub total_blocks: u32,
    /// 空闲块数
    pub free_blocks: u32,
}

/// 文件打开选项
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// 读取权限
    pub read: bool,
    /// 写入权限
    pub write: bool,
    /// 如果不存在则创建
    pub create: bool,
    /// 追加模式
    pub append: bool,
    /// 截断文件
    pub truncate: bool,
}

impl OpenOptions {
    /// 创建新的打开选项
    pub const fn new() -> Self {
        Self {
            read: false,
            write: false,
            create: false,
            append: false,
            truncate: false,
        }
    }

    /// 设置读取权限
    pub const fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    /// 设置写入权限
    pub const fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    /// 设置创建标志
    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    /// 设置追加模式
    pub const fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    /// 设置截断标志
    pub const fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// 只读打开
    pub const fn read_only() -> Self {
        Self::new().read(true)
    }

    /// 只写打开 (文件必须存在)
    pub const fn write_only() -> Self {
        Self::new().write(true)
    }

    /// 读写打开, 不存在则创建
    pub const fn read_write_create() -> Self {
        Self::new().read(true).write(true).create(true)
    }

    /// 追加模式打开 (文件必须存在)
    pub const fn append_mode() -> Self {
        Self::new().write(true).append(true)
    }
}

/// 已打开文件上的操作
///
/// 文件句柄只在 [`Volume::open_and_then`] 的闭包内有效,
/// 闭包返回后由卷负责关闭。
pub trait FileOps {
    /// 从当前位置读取, 返回实际读取的字节数
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FsError>;

    /// 在当前位置写入, 返回实际写入的字节数
    fn write(&mut self, data: &[u8]) -> Result<usize, FsError>;

    /// 移动到距文件开头 `offset` 的位置
    fn seek(&mut self, offset: u32) -> Result<u32, FsError>;

    /// 截断或以 0 填充扩展到 `len`
    fn set_len(&mut self, len: u32) -> Result<(), FsError>;

    /// 同步文件到存储
    fn sync(&mut self) -> Result<(), FsError>;

    /// 当前文件大小
    fn len(&mut self) -> Result<u32, FsError>;
}

/// 挂载在固定分区上的单个文件系统卷
///
/// 所有路径都是包含挂载点的完整路径。
pub trait Volume {
    /// 挂载卷; 分区未格式化或损坏时先格式化再挂载
    fn mount(&mut self) -> Result<(), FsError>;

    /// 卸载卷
    fn unmount(&mut self) -> Result<(), FsError>;

    /// 是否已挂载
    fn is_mounted(&self) -> bool;

    /// 挂载点, 即所有完整路径的前缀
    fn mount_point(&self) -> &str;

    /// 擦除整个后备分区, 之后卷处于未挂载状态
    fn wipe(&mut self) -> Result<(), FsError>;

    /// 卷统计信息
    fn stats(&mut self) -> Result<VolumeStats, FsError>;

    /// 打开文件并在闭包中操作
    ///
    /// `Err` 仅表示打开失败。闭包的结果原样返回; 关闭总会执行,
    /// 关闭失败只记录日志, 不覆盖闭包结果。
    fn open_and_then<R>(
        &mut self,
        path: &str,
        options: OpenOptions,
        f: impl FnOnce(&mut dyn FileOps) -> R,
    ) -> Result<R, FsError>;

    /// 遍历目录, 对每个目录项调用 `visit` (不含 `.` 和 `..`)
    ///
    /// `Err` 表示打开目录失败; 中途读取失败以 [`DirEnd::Interrupted`] 返回。
    fn read_dir(
        &mut self,
        path: &str,
        visit: &mut dyn FnMut(&DirEntry),
    ) -> Result<DirEnd, FsError>;

    /// 删除文件或空目录
    fn remove(&mut self, path: &str) -> Result<(), FsError>;
}
