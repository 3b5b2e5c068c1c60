//! 同步原语模块
//!
//! 基于 embassy-sync 封装，统一使用 CriticalSectionRawMutex
//! 以确保在 ESP32-S3 单核/双核环境下的正确性

pub mod primitives;

pub use primitives::CriticalMutex;
