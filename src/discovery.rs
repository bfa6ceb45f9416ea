//! Finding instruments that can be attached
//!
//! Nothing here is kept between calls, and drivers never depend on it.

use std::{sync::Arc, time::Duration};

use log::{debug, warn};

use crate::{
    bus::{Connector, SystemConnector},
    connection::{ConnectionManager, ConnectionSpec},
    error::{Error, Result},
    model::ModelInfo,
    protocol::ScpiProtocol,
    resource::Resource,
};

/// Serial ports known to the operating system, plus every `INSTR` resource a VISA library
/// reports when built with the `visa` feature.
pub async fn list_resources() -> Result<Vec<Resource>> {
    #[cfg_attr(not(feature = "visa"), allow(unused_mut))]
    let mut found: Vec<Resource> = tokio_serial::available_ports()
        .map_err(|e| Error::Connection(format!("Could not list serial ports: {e}")))?
        .into_iter()
        .map(|port| Resource::Serial {
            port: port.port_name,
        })
        .collect();

    #[cfg(feature = "visa")]
    match crate::bus::visa::find_resources().await {
        Ok(names) => {
            for name in names {
                match name.parse::<Resource>() {
                    Ok(res) if !found.contains(&res) => found.push(res),
                    Ok(_) => {}
                    Err(e) => debug!("Skipping VISA resource {name}: {e}"),
                }
            }
        }
        Err(e) => warn!("VISA resource search failed: {e}"),
    }

    debug!("Found {} resources", found.len());
    Ok(found)
}

/// Ask `resource` who it is.
pub async fn probe(resource: &Resource, timeout: Duration) -> Result<ModelInfo> {
    probe_with(resource, timeout, Arc::new(SystemConnector)).await
}

pub async fn probe_with(
    resource: &Resource,
    timeout: Duration,
    connector: Arc<dyn Connector>,
) -> Result<ModelInfo> {
    let spec = ConnectionSpec::from_resource(resource.clone()).with_timeout(timeout);
    let mut proto = ScpiProtocol::new(ConnectionManager::with_connector(spec, connector));

    proto.connect().await?;
    let info = proto.identify().await;
    if let Err(e) = proto.disconnect().await {
        warn!("Closing {resource} after probe: {e}");
    }
    info
}
