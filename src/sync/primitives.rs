//! 同步原语封装
//!
//! 文件访问网关使用的全局互斥锁类型

use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, mutex::Mutex};

/// 临界区互斥锁 - 异步互斥访问
///
/// 保护共享资源的异步访问。等待锁没有超时, 持锁任务卡住时
/// 其他所有等待者都会一直挂起。
///
/// # Example
/// ```ignore
/// static SHARED: CriticalMutex<Volume> = CriticalMutex::new(volume);
///
/// {
///     let mut guard = SHARED.lock().await;
///     guard.mount()?;
/// } // 自动释放锁
/// ```
pub type CriticalMutex<T> = Mutex<CriticalSectionRawMutex, T>;

/// 创建新的互斥锁
#[inline]
pub const fn new_mutex<T>(value: T) -> CriticalMutex<T> {
    Mutex::new(value)
}
