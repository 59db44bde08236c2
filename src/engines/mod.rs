// Copyright (c) 2025 Kirky.X
//
// Licensed under the MIT License
// See LICENSE file in the project root for full license information.

pub mod chrome_engine;
pub mod page_switcher;
pub mod reqwest_engine;
pub mod session_pool;
pub mod traits;

pub use page_switcher::{PageSwitcher, SwitchDelays};
pub use session_pool::{BrowserSessionPool, PoolError, SessionLease};
pub use traits::{DriverError, PageDriver};
