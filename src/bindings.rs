// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
/*! Describing resources and what is known about their contents */

pub mod coordinates;
pub mod dirty_tracking;
pub mod resource_tracking;
pub mod texture_builder;
pub mod visible_to;
