// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 领域层模块
///
/// - 领域模型（models）：页面类型、分页、卡片、字段和抓取配置
/// - 服务（services）：语言模型边界、检测器和DOM提取
pub mod models;
pub mod services;
