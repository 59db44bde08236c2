// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 配置模块
///
/// 处理语言模型、结构发现、抓取节奏和浏览器后端的配置设置
pub mod settings;

pub use settings::{BackendSettings, Settings};
