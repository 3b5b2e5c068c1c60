//! doorstore 固件入口 - ESP32-S3 门锁记录存储
//!
//! 启动顺序:
//! 1. 初始化 Flash, 按标签定位 littlefs 分区
//! 2. (可选) 运行破坏性自检
//! 3. 运行启动存储策略, 保证四个记录文件存在
//! 4. 把卷交给网关, 之后所有文件访问都经过网关的锁
//!
//! 硬件目标: ESP32-S3-N16R8 (16MB Flash)

#![no_std]
#![no_main]

use doorstore::config::{FS_PARTITION_LABEL, FS_PARTITION_OFFSET, MOUNT_POINT};
use doorstore::fs::{partition, LittleFsVolume, PartitionStorage};
use doorstore::{
    bootstrap, log_error, log_info, log_warn, BootConfig, BuildStamp, Gateway, RawFlash,
    RecordKind, RecordTable,
};
use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_hal::timer::timg::TimerGroup;
use esp_storage::FlashStorage;
use static_cell::StaticCell;

esp_bootloader_esp_idf::esp_app_desc!();

// ===== Panic Handler =====
#[cfg(feature = "dev")]
use esp_backtrace as _;

#[cfg(feature = "log-defmt")]
use defmt_rtt as _;

#[cfg(not(feature = "dev"))]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {
        core::hint::spin_loop();
    }
}

type FsVolume = LittleFsVolume<FlashStorage<'static>>;

// ===== 静态分配 =====
/// 文件操作网关, 启动策略完成后初始化
static GATEWAY: StaticCell<Gateway<FsVolume>> = StaticCell::new();

/// 启动失败后停在这里, 不再接受文件访问
async fn halt() -> ! {
    loop {
        Timer::after(Duration::from_secs(10)).await;
    }
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    let peripherals = esp_hal::init(esp_hal::Config::default());

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    log_info!("{} v{} starting on ESP32-S3", doorstore::NAME, doorstore::VERSION);

    // SAFETY: 两个句柄分别只访问时间戳扇区/分区表 与 文件系统分区,
    // 区域不重叠, 且启动阶段的访问都在本任务内顺序进行
    let fs_flash = FlashStorage::new(unsafe { esp_hal::peripherals::FLASH::steal() });
    let mut raw = RawFlash::new(FlashStorage::new(peripherals.FLASH));
    if let Err(e) = raw.init() {
        log_error!("flash init failed: {}", e);
        halt().await;
    }

    let offset = match partition::locate_fs_partition(&mut raw, FS_PARTITION_LABEL) {
        Ok(Some(offset)) => offset,
        Ok(None) => {
            log_warn!("using default fs offset 0x{:x}", FS_PARTITION_OFFSET);
            FS_PARTITION_OFFSET
        }
        Err(e) => {
            log_error!("partition table read failed: {}", e);
            FS_PARTITION_OFFSET
        }
    };

    let mut volume: FsVolume =
        LittleFsVolume::new(PartitionStorage::new(fs_flash, offset), MOUNT_POINT);

    #[cfg(feature = "selftest")]
    match doorstore::fs::run_self_test(&mut volume, MOUNT_POINT, true) {
        Ok(report) => log_info!("selftest: boot count {}", report.boot_count),
        Err(e) => log_error!("selftest failed: {}", e),
    }

    let records = RecordTable::standard();
    match bootstrap(
        &mut volume,
        &mut raw,
        &records,
        &BootConfig::default(),
        &BuildStamp::current(),
    ) {
        Ok(report) => log_info!(
            "FS-INIT: ok, {} recreated, {} filled",
            report.recreated.len(),
            report.filled.len()
        ),
        Err(e) => {
            log_error!("FS-INIT failed: {}", e);
            // 挂载失败时没有可用的卷
            if !doorstore::Volume::is_mounted(&volume) {
                halt().await;
            }
        }
    }

    let gateway = GATEWAY.init(Gateway::new(volume, records));
    spawner.must_spawn(storage_report_task(gateway));

    log_info!("storage ready, entering main loop");

    let mut tick_count: u64 = 0;
    loop {
        tick_count += 1;
        if tick_count % 60 == 0 {
            log_info!("System heartbeat: {} ticks", tick_count);
        }
        Timer::after(Duration::from_secs(1)).await;
    }
}

/// 周期性报告卷使用情况和家庭配置头部
#[embassy_executor::task]
async fn storage_report_task(gateway: &'static Gateway<FsVolume>) {
    let Some(home_cfg) = gateway.records().get(RecordKind::HomeConfig).copied() else {
        return;
    };

    loop {
        if let Err(e) = gateway.stats().await {
            log_error!("stats failed: {}", e);
        }

        let mut header = [0u8; 16];
        match gateway.read(home_cfg.path, &mut header).await {
            Ok(_) => log_info!("{}: header {:x}", home_cfg.path, header[0]),
            Err(e) => log_error!("{}: {}", home_cfg.path, e),
        }

        Timer::after(Duration::from_secs(300)).await;
    }
}
