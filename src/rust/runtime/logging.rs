// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//==============================================================================
// Imports
//==============================================================================

use ::flexi_logger::{
    Logger,
    LoggerHandle,
};
use ::std::sync::OnceLock;

//==============================================================================
// Static Variables
//==============================================================================

/// Guardian to the logging initialize function. Holds the handle so that the backend stays alive.
static INIT_LOG: OnceLock<Option<LoggerHandle>> = OnceLock::new();

//==============================================================================
// Standalone Functions
//==============================================================================

/// Initializes logging features. The log specification is read from `RUST_LOG`; when unset, only errors are shown.
pub fn initialize() {
    INIT_LOG.get_or_init(|| match Logger::try_with_env_or_str("error").and_then(|logger| logger.start()) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("initialize(): failed to start logger ({})", e);
            None
        },
    });
}
