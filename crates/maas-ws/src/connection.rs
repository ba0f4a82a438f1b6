//! Obtaining an open transport.

use tracing::debug;

use crate::error::{ClientError, Result};
use crate::transport::{ReadyState, Transport};

/// Resolve once `transport` is open.
///
/// Returns immediately if it already is. From `Idle`, `Closed` or
/// `Closing` a new connection attempt is started first; while `Connecting`
/// this simply waits. Network failures never surface here because the
/// transport keeps retrying; only a failure to build the URL is returned.
pub async fn establish(transport: &dyn Transport) -> Result<()> {
    let mut state = transport.ready_state();
    let current = *state.borrow_and_update();
    match current {
        ReadyState::Open => return Ok(()),
        ReadyState::Connecting => {}
        ReadyState::Idle | ReadyState::Closed | ReadyState::Closing => {
            let url = transport.build_url()?;
            debug!(%url, "opening websocket");
            transport.connect();
        }
    }
    if state.wait_for(|s| *s == ReadyState::Open).await.is_err() {
        return Err(ClientError::ChannelClosed);
    }
    Ok(())
}
