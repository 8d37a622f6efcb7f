// SPDX-FileCopyrightText: 2025 Caspar Water Company
//
// SPDX-License-Identifier: Apache-2.0

pub mod commands;
pub mod config;
pub mod loader;

pub use commands::{QueryArgs, plan_command, query_command, schema_command};
pub use config::{CliConfig, load_config};
pub use loader::{open_store, read_csv};
