// SPDX-License-Identifier: MPL-2.0

//! Device drivers layered on the message core.

pub mod ata;
