// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

/// 应用程序模块
///
/// 把领域服务和浏览器会话组合成两个用例：
/// 结构发现（产出 `ScraperConfig`）和按配置抓取（产出记录）
pub mod use_cases;
