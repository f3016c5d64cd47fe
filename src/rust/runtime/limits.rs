// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

/// Number of slots a freshly opened scheduler starts with. The slot table doubles whenever it runs full.
pub const DEFAULT_CAPACITY: usize = 16;

/// Stack size of every coroutine (1 MiB). Stacks are allocated once, at creation, and never resized.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Largest number of slots the table may hold. Slot indexes must fit in the low half of a coroutine id.
pub const MAX_CAPACITY: usize = u32::MAX as usize;
