// UI module - interface-side state and the worker-to-interface bridge
//
// This module contains:
// - UpdateBridge / UpdateDispatcher: coalesced callbacks from the worker thread
// - Paginator: the windowed view shared by the job list and the file list
// - QueueView: cached rendering state for the job list
//
// Widget layout is left to the host; nothing here draws.

pub mod bridge;
pub mod pagination;
pub mod view;

pub use bridge::{UpdateBridge, UpdateDispatcher, update_bridge};
pub use pagination::{PageInfo, Paginator};
pub use view::{QueueView, RenderStats, RowModel};
