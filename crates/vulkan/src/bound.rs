// Copyright 2026 The Lantern Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! # Engine-Bound Resources
//!
//! Every GPU resource borrows the `Engine` it was created against.  The borrow checker enforces
//! that engines outlive their resources, so the remaining contract is termination: native
//! handles are released exactly once, either by an explicit `terminate` that lets the caller
//! control ordering, or by `Drop` as a fallback.

use crate::VulkanError;

/// Resources that release native handles.
pub trait Terminable {
    /// Release every native handle.  Calling this again is a no-op.
    fn terminate(&mut self);

    fn is_terminated(&self) -> bool;

    /// Fail fast when a terminated resource is used again.
    fn ensure_live(&self, what: &'static str) -> Result<(), VulkanError> {
        if self.is_terminated() {
            Err(VulkanError::Terminated(what))
        } else {
            Ok(())
        }
    }
}
