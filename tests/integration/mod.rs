// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod discover_test;
pub mod helpers;
pub mod http_scrape_test;
pub mod scrape_test;
pub mod session_pool_test;
