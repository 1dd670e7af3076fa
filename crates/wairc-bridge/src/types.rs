//! Sidecar wire types.

use serde::{Deserialize, Serialize};

/// Envelope around every sidecar reply.
#[derive(Debug, Deserialize)]
pub(crate) struct BridgeResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct NewSession {
    pub headless: bool,
}
