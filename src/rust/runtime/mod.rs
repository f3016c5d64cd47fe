// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//======================================================================================================================
// Exports
//======================================================================================================================

pub mod config;
pub mod continuation;
pub mod fail;
pub mod limits;
pub mod logging;
pub mod scheduler;
