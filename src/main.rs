use color_eyre::eyre::{eyre, Result, WrapErr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use upnp_device_security::crypto::DeviceKeyPair;
use upnp_device_security::device::OwnershipAware;
use upnp_device_security::logging::init_logging;
use upnp_device_security::storage::{FileStateStore, MemoryStateStore, SecurityStateStore};
use upnp_device_security::{DeviceSecurity, DeviceSecurityConfig};

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = DeviceSecurityConfig::load(config_path.as_deref()).map_err(|err| eyre!("{:#}", err))?;
    let _log_guard = init_logging(&config.logging).map_err(|err| eyre!("{:#}", err))?;
    info!("Starting UPnP device security");

    let key_pair = match &config.device_key_file {
        Some(path) => DeviceKeyPair::load_or_generate(path, config.rsa_key_bits).map_err(|err| eyre!("{:#}", err))?,
        None => DeviceKeyPair::generate(config.rsa_key_bits).wrap_err("Failed to generate device key")?,
    };

    let store: Arc<dyn SecurityStateStore> = match config.resolved_state_dir() {
        Some(directory) => Arc::new(FileStateStore::new(&directory).map_err(|err| eyre!("{:#}", err))?),
        None => Arc::new(MemoryStateStore::default()),
    };
    let device =
        DeviceSecurity::with_store(key_pair, config.clone(), store).wrap_err("Failed to start device security")?;

    info!(security_id = %device.security_id(), "Device identity");
    if !device.is_owned() {
        // shown once so the owner can type it into a control point
        info!(secret = %device.device_secret_display()?, "Device is unowned; ownership secret");
    }
    let shown = DeviceSecurityConfig {
        device_secret: None,
        ..config.clone()
    };
    debug!(configuration = %shown.to_toml().map_err(|err| eyre!("{:#}", err))?, "Effective configuration");

    tokio::signal::ctrl_c().await.wrap_err("Failed to wait for Ctrl-C")?;
    info!("Shutting down");
    Ok(())
}
