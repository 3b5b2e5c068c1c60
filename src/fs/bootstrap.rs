//! 启动存储初始化策略
//!
//! 比较 Flash 中保存的构建时间戳与当前固件的时间戳:
//! - 相同: 保留存储内容, 只补全缺失的记录文件
//! - 不同: 写入新时间戳, 按初始化模式 保留/选择性重建/整体格式化
//!
//! 只在启动阶段、网关接管卷之前调用, 直接操作卷不加锁。

use core::fmt;

use bitflags::bitflags;
use embedded_storage::nor_flash::NorFlash;

use super::flash::RawFlash;
use super::ops;
use super::records::{RecordKind, RecordTable};
use super::volume::Volume;
use crate::config::{BUILD_STAMP_LEN, BUILD_STAMP_OFFSET, SECTOR_SIZE};
use crate::error::{Error, FileOp};
use crate::util::log::*;

bitflags! {
    /// 选择性初始化的子系统
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct InitFlags: u8 {
        /// 日志文件 (保留, 尚未实现)
        const LOG_FILE = 0x01;
        /// 用户信息表
        const USER_INFO = 0x02;
        /// 当前与备份日程表
        const SCHEDULE = 0x04;
        /// 家庭配置
        const HOME_CFG = 0x08;
    }
}

/// 时间戳不一致时的初始化模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitMode {
    /// 只挂载, 然后补全缺失文件
    NoChange,
    /// 重建选中的文件, 然后补全其余缺失文件
    Selective(InitFlags),
    /// 擦除整个分区, 重建全部四个文件
    Format,
}

/// 构建时间戳 (定长, 不足部分补 0)
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct BuildStamp([u8; BUILD_STAMP_LEN]);

impl BuildStamp {
    /// 从文本构造, 超出长度的部分被截掉
    pub const fn from_text(text: &str) -> Self {
        let src = text.as_bytes();
        let mut bytes = [0u8; BUILD_STAMP_LEN];
        let mut i = 0;
        while i < src.len() && i < BUILD_STAMP_LEN {
            bytes[i] = src[i];
            i += 1;
        }
        Self(bytes)
    }

    pub const fn from_bytes(bytes: [u8; BUILD_STAMP_LEN]) -> Self {
        Self(bytes)
    }

    /// 当前固件的构建时间戳 (由 build.rs 生成)
    pub const fn current() -> Self {
        Self::from_text(env!("DOORSTORE_BUILD_STAMP"))
    }

    pub fn as_bytes(&self) -> &[u8; BUILD_STAMP_LEN] {
        &self.0
    }

    fn text(&self) -> &str {
        let end = self.0.iter().position(|&b| b == 0).unwrap_or(BUILD_STAMP_LEN);
        core::str::from_utf8(&self.0[..end]).unwrap_or("<binary>")
    }
}

impl fmt::Debug for BuildStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BuildStamp({:?})", self.text())
    }
}

impl fmt::Display for BuildStamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// 启动策略配置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// 时间戳在 Flash 中的偏移
    pub stamp_offset: u32,
    /// 写入新时间戳前擦除的区域大小
    pub stamp_erase_size: u32,
    /// 时间戳不一致时的初始化模式
    pub mode: InitMode,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            stamp_offset: BUILD_STAMP_OFFSET,
            stamp_erase_size: SECTOR_SIZE,
            mode: InitMode::NoChange,
        }
    }
}

/// 实际走过的分支
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "log-defmt", derive(defmt::Format))]
pub enum BootBranch {
    /// 时间戳一致, 保留存储
    Preserved,
    /// 时间戳不一致, NoChange 模式
    Unchanged,
    /// 时间戳不一致, 选择性重建
    Selective,
    /// 时间戳不一致, 整体格式化
    Formatted,
}

/// 启动策略结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootReport {
    pub branch: BootBranch,
    /// 无条件重建的文件
    pub recreated: heapless::Vec<RecordKind, 4>,
    /// 补全阶段新建的文件
    pub filled: heapless::Vec<RecordKind, 4>,
}

impl BootReport {
    fn new(branch: BootBranch) -> Self {
        Self {
            branch,
            recreated: heapless::Vec::new(),
            filled: heapless::Vec::new(),
        }
    }
}

/// 运行启动策略
///
/// 挂载失败或格式化模式下任一文件创建失败立即返回错误。
/// 选择性重建和补全阶段的失败会累计, 所有文件都尝试过后以
/// [`Error::Incomplete`] 返回失败数。
pub fn bootstrap<V: Volume, F: NorFlash>(
    volume: &mut V,
    flash: &mut RawFlash<F>,
    records: &RecordTable,
    config: &BootConfig,
    stamp: &BuildStamp,
) -> Result<BootReport, Error> {
    log_info!("Build time {}", stamp.text());

    let mut stored = [0u8; BUILD_STAMP_LEN];
    if let Err(e) = flash.read(config.stamp_offset, &mut stored) {
        log_warn!("FS-INIT: read build stamp failed: {}", e);
    }
    let stored = BuildStamp::from_bytes(stored);
    log_info!("build save {}", stored.text());

    if stored == *stamp {
        log_info!("FILE NOT RESET");
        mount(volume)?;
        let mut report = BootReport::new(BootBranch::Preserved);
        let failed = fill_missing(volume, records, &mut report);
        return finish(report, failed);
    }

    persist_stamp(flash, config, stamp);

    match config.mode {
        InitMode::Format => {
            log_info!("FS-INIT: format");
            volume.wipe().map_err(|e| {
                log_error!("FS-INIT:Error format flash {}", e);
                Error::io(FileOp::Format, e)
            })?;
            mount(volume)?;

            let mut report = BootReport::new(BootBranch::Formatted);
            for record in records.iter() {
                ops::create_file(volume, record.path, record.size)?;
                let _ = report.recreated.push(record.kind);
            }
            Ok(report)
        }
        InitMode::NoChange => {
            mount(volume)?;
            let mut report = BootReport::new(BootBranch::Unchanged);
            let failed = fill_missing(volume, records, &mut report);
            finish(report, failed)
        }
        InitMode::Selective(flags) => {
            log_info!("FS-INIT: selective 0x{:x}", flags.bits());
            mount(volume)?;

            let mut report = BootReport::new(BootBranch::Selective);
            let mut failed = 0;
            if flags.contains(InitFlags::LOG_FILE) {
                log_warn!("FS-INIT: log file init not supported");
            }

            let selected = [
                (InitFlags::USER_INFO, RecordKind::UserInfo),
                (InitFlags::SCHEDULE, RecordKind::ScheduleCurrent),
                (InitFlags::SCHEDULE, RecordKind::ScheduleBackup),
                (InitFlags::HOME_CFG, RecordKind::HomeConfig),
            ];
            for (flag, kind) in selected {
                if !flags.contains(flag) {
                    continue;
                }
                let Some(record) = records.get(kind) else {
                    continue;
                };
                match ops::create_file(volume, record.path, record.size) {
                    Ok(()) => {
                        let _ = report.recreated.push(kind);
                    }
                    Err(_) => failed += 1,
                }
            }

            failed += fill_missing(volume, records, &mut report);
            finish(report, failed)
        }
    }
}

fn mount<V: Volume>(volume: &mut V) -> Result<(), Error> {
    volume.mount().map_err(|e| {
        log_error!("FS-INIT: disk {}", e);
        Error::io(FileOp::Mount, e)
    })
}

/// 擦除并写入新时间戳, 失败只记录日志
fn persist_stamp<F: NorFlash>(flash: &mut RawFlash<F>, config: &BootConfig, stamp: &BuildStamp) {
    if let Err(e) = flash.erase(config.stamp_offset, config.stamp_erase_size) {
        log_error!("FS-INIT: erase build stamp failed: {}", e);
        return;
    }
    if let Err(e) = flash.write(config.stamp_offset, stamp.as_bytes()) {
        log_error!("FS-INIT: write build stamp failed: {}", e);
    }
}

/// 补全缺失的记录文件, 返回失败数
///
/// 已存在的文件不动。无法判断是否存在的文件也计为失败。
fn fill_missing<V: Volume>(volume: &mut V, records: &RecordTable, report: &mut BootReport) -> usize {
    let mut failed = 0;
    for record in records.iter() {
        match ops::file_exists(volume, record.path) {
            Ok(true) => {}
            Ok(false) => match ops::create_file(volume, record.path, record.size) {
                Ok(()) => {
                    let _ = report.filled.push(record.kind);
                }
                Err(_) => failed += 1,
            },
            Err(e) => {
                log_error!("FS-INIT: check {} failed: {}", record.path, e);
                failed += 1;
            }
        }
    }
    failed
}

fn finish(report: BootReport, failed: usize) -> Result<BootReport, Error> {
    if failed > 0 {
        log_error!("FS-INIT: {} record file(s) not ready", failed);
        return Err(Error::Incomplete { failed });
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::FsError;
    use crate::testing::{Op, RamFlash, RamVolume};

    const STAMP: BuildStamp = BuildStamp::from_text("2026-10-18 08:00:00");

    fn config(mode: InitMode) -> BootConfig {
        BootConfig {
            stamp_offset: 4096,
            stamp_erase_size: 4096,
            mode,
        }
    }

    fn flash() -> RawFlash<RamFlash> {
        let mut flash = RawFlash::new(RamFlash::new(2 * 4096));
        flash.init().unwrap();
        flash
    }

    fn run(volume: &mut RamVolume, flash: &mut RawFlash<RamFlash>, mode: InitMode) -> Result<BootReport, Error> {
        bootstrap(volume, flash, &RecordTable::standard(), &config(mode), &STAMP)
    }

    fn assert_records_sized(volume: &RamVolume) {
        for record in RecordTable::standard().iter() {
            assert_eq!(
                volume.contents(record.path).map(<[u8]>::len),
                Some(record.size as usize),
                "{}",
                record.path
            );
        }
    }

    #[test]
    fn test_stamp_padding_and_truncation() {
        let stamp = BuildStamp::from_text("1760774400");
        assert_eq!(&stamp.as_bytes()[..10], b"1760774400");
        assert!(stamp.as_bytes()[10..].iter().all(|&b| b == 0));
        assert_eq!(stamp.to_string(), "1760774400");

        let long = "x".repeat(BUILD_STAMP_LEN + 8);
        assert_eq!(BuildStamp::from_text(&long).as_bytes(), &[b'x'; BUILD_STAMP_LEN]);
    }

    #[test]
    fn test_current_stamp_is_not_blank() {
        assert_ne!(BuildStamp::current().as_bytes(), &[0u8; BUILD_STAMP_LEN]);
    }

    #[test]
    fn test_mismatch_persists_new_stamp() {
        let mut volume = RamVolume::new("/lfs1");
        let mut flash = flash();

        let report = run(&mut volume, &mut flash, InitMode::NoChange).unwrap();
        assert_eq!(report.branch, BootBranch::Unchanged);
        assert_eq!(&flash.inner_mut().bytes()[4096..4096 + BUILD_STAMP_LEN], STAMP.as_bytes());
    }

    #[test]
    fn test_no_change_is_idempotent() {
        let mut volume = RamVolume::new("/lfs1");
        let mut flash = flash();

        let first = run(&mut volume, &mut flash, InitMode::NoChange).unwrap();
        assert_eq!(first.filled.len(), 4);
        assert_records_sized(&volume);

        volume.events.clear();
        let flash_calls = flash.inner_mut().calls();
        let second = run(&mut volume, &mut flash, InitMode::NoChange).unwrap();

        assert_eq!(second.branch, BootBranch::Preserved);
        assert!(second.filled.is_empty());
        assert!(second.recreated.is_empty());
        // 只读取了时间戳
        assert_eq!(flash.inner_mut().calls(), flash_calls + 1);
        assert!(volume
            .events
            .iter()
            .all(|e| matches!(e, crate::testing::Event::Open(_) | crate::testing::Event::Close(_))));
    }

    #[test]
    fn test_preserved_branch_keeps_contents_and_fills_gaps() {
        let mut volume = RamVolume::new("/lfs1");
        let mut flash = flash();
        run(&mut volume, &mut flash, InitMode::NoChange).unwrap();

        volume.insert("/lfs1/home_cfg", b"custom");
        volume.remove("/lfs1/schedule_bak").unwrap();

        // 时间戳一致时忽略模式
        let report = run(&mut volume, &mut flash, InitMode::Format).unwrap();
        assert_eq!(report.branch, BootBranch::Preserved);
        assert_eq!(report.filled.as_slice(), &[RecordKind::ScheduleBackup]);
        assert_eq!(volume.contents("/lfs1/home_cfg"), Some(&b"custom"[..]));
        assert_eq!(volume.wipes, 0);
    }

    #[test]
    fn test_format_produces_exactly_four_files() {
        let mut volume = RamVolume::new("/lfs1");
        volume.insert("/lfs1/stale", b"old");
        volume.insert("/lfs1/user_info", b"old");
        let mut flash = flash();

        let report = run(&mut volume, &mut flash, InitMode::Format).unwrap();
        assert_eq!(report.branch, BootBranch::Formatted);
        assert_eq!(report.recreated.len(), 4);
        assert_eq!(volume.wipes, 1);
        assert_eq!(volume.mounts, 1);
        assert_eq!(volume.file_count(), 4);
        assert_records_sized(&volume);
        assert!(volume.contents("/lfs1/user_info").unwrap().iter().all(|&b| b == 0));

        // 下次启动走时间戳一致分支
        let next = run(&mut volume, &mut flash, InitMode::Format).unwrap();
        assert_eq!(next.branch, BootBranch::Preserved);
        assert_eq!(volume.wipes, 1);
        assert_eq!(volume.mounts, 2);
    }

    #[test]
    fn test_format_aborts_on_first_create_failure() {
        let mut volume = RamVolume::new("/lfs1");
        volume.fail_nth(Op::SetLen, 3, FsError::NoSpace);
        let mut flash = flash();

        let err = run(&mut volume, &mut flash, InitMode::Format).unwrap_err();
        assert_eq!(err, Error::Io { op: FileOp::Truncate, source: FsError::NoSpace });
        assert_eq!(volume.file_count(), 2);
        assert_eq!(volume.contents("/lfs1/home_cfg"), None);
    }

    #[test]
    fn test_mount_failure_aborts() {
        let mut volume = RamVolume::new("/lfs1");
        volume.fail_next(Op::Mount, FsError::Corrupt);
        let mut flash = flash();

        assert_eq!(
            run(&mut volume, &mut flash, InitMode::NoChange),
            Err(Error::Io { op: FileOp::Mount, source: FsError::Corrupt })
        );
        assert_eq!(volume.file_count(), 0);
    }

    #[test]
    fn test_selective_recreates_selected_and_fills_rest() {
        let mut volume = RamVolume::mounted("/lfs1");
        volume.insert("/lfs1/user_info", b"users");
        volume.insert("/lfs1/home_cfg", b"home");
        let mut flash = flash();

        let report = run(&mut volume, &mut flash, InitMode::Selective(InitFlags::USER_INFO)).unwrap();
        assert_eq!(report.branch, BootBranch::Selective);
        assert_eq!(report.recreated.as_slice(), &[RecordKind::UserInfo]);
        assert_eq!(
            report.filled.as_slice(),
            &[RecordKind::ScheduleCurrent, RecordKind::ScheduleBackup]
        );
        assert_eq!(volume.contents("/lfs1/home_cfg"), Some(&b"home"[..]));
        assert_records_sized_except(&volume, "/lfs1/home_cfg");
    }

    fn assert_records_sized_except(volume: &RamVolume, skip: &str) {
        for record in RecordTable::standard().iter().filter(|r| r.path != skip) {
            assert_eq!(volume.contents(record.path).map(<[u8]>::len), Some(record.size as usize));
        }
    }

    #[test]
    fn test_selective_schedule_resets_both_copies() {
        let mut volume = RamVolume::mounted("/lfs1");
        for record in RecordTable::standard().iter() {
            volume.insert(record.path, b"data");
        }
        let mut flash = flash();

        let flags = InitFlags::SCHEDULE | InitFlags::LOG_FILE;
        let report = run(&mut volume, &mut flash, InitMode::Selective(flags)).unwrap();
        assert_eq!(
            report.recreated.as_slice(),
            &[RecordKind::ScheduleCurrent, RecordKind::ScheduleBackup]
        );
        assert!(report.filled.is_empty());
        assert_eq!(volume.contents("/lfs1/user_info"), Some(&b"data"[..]));
    }

    #[test]
    fn test_log_file_flag_alone_changes_nothing() {
        let mut volume = RamVolume::mounted("/lfs1");
        for record in RecordTable::standard().iter() {
            volume.insert(record.path, b"data");
        }
        let mut flash = flash();

        let report = run(&mut volume, &mut flash, InitMode::Selective(InitFlags::LOG_FILE)).unwrap();
        assert!(report.recreated.is_empty());
        assert!(report.filled.is_empty());
    }

    #[test]
    fn test_gap_fill_failures_are_aggregated() {
        let mut volume = RamVolume::new("/lfs1");
        volume.fail_nth(Op::SetLen, 1, FsError::NoSpace);
        let mut flash = flash();

        // 第一个文件失败, 其余三个仍然会尝试
        assert_eq!(
            run(&mut volume, &mut flash, InitMode::NoChange),
            Err(Error::Incomplete { failed: 1 })
        );
        assert_eq!(volume.contents("/lfs1/user_info"), Some(&[][..]));
        for path in ["/lfs1/schedule_cur", "/lfs1/schedule_bak", "/lfs1/home_cfg"] {
            assert!(volume.contents(path).is_some());
        }
    }

    #[test]
    fn test_exists_error_counts_as_failure() {
        let mut volume = RamVolume::new("/lfs1");
        volume.fail_next(Op::Open, FsError::Corrupt);
        let mut flash = flash();

        assert_eq!(
            run(&mut volume, &mut flash, InitMode::NoChange),
            Err(Error::Incomplete { failed: 1 })
        );
        assert_eq!(volume.file_count(), 3);
    }

    #[test]
    fn test_stamp_write_failure_does_not_stop_boot() {
        let mut volume = RamVolume::new("/lfs1");
        let mut flash = flash();
        flash.inner_mut().fail_writes(true);

        let report = run(&mut volume, &mut flash, InitMode::NoChange).unwrap();
        assert_eq!(report.filled.len(), 4);
        // 时间戳没写进去, 下次仍然走不一致分支
        flash.inner_mut().fail_writes(false);
        let next = run(&mut volume, &mut flash, InitMode::NoChange).unwrap();
        assert_eq!(next.branch, BootBranch::Unchanged);
    }
}
