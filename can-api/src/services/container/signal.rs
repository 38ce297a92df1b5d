//! Signal Dispatcher.

use crate::error::{Error, Result};
use crate::runtime::RuntimeClient;
use crate::validation::{check_id, check_name};
use log::info;
use nix::sys::signal::Signal;

/// Forward `signal` to one container. Provider errors are returned unchanged.
pub async fn dispatch(
    runtime: &dyn RuntimeClient,
    namespace: &str,
    container_id: &str,
    signal: i32,
) -> Result<()> {
    check_name("namespace", namespace)?;
    check_id("container_id", container_id)?;
    let parsed = Signal::try_from(signal).map_err(|_| Error::InvalidSignal(signal))?;

    info!(
        "Signal: Sending {} to {} in {}",
        parsed, container_id, namespace
    );
    runtime.signal(namespace, container_id, parsed).await?;
    Ok(())
}
