//! NVS-backed vault region
//!
//! The configuration vault needs a byte-addressable region; NVS is key-value,
//! so the region lives as one blob cached in RAM and pushed back on commit.

use esp_idf_svc::nvs::{EspNvs, EspNvsPartition, NvsDefault};
use log::{error, info, warn};

use crate::config::CONFIG_IMAGE_LEN;
use crate::error::{Error, Result};
use crate::nvm::{NvmRegion, VAULT_OVERHEAD};

/// Vault region size: one configuration image plus the vault bookkeeping.
pub const REGION_LEN: usize = CONFIG_IMAGE_LEN + VAULT_OVERHEAD;

const NAMESPACE: &str = "bridge_cfg";
const BLOB_KEY: &str = "vault";

pub struct NvsRegion {
    nvs: EspNvs<NvsDefault>,
    cache: [u8; REGION_LEN],
}

impl NvsRegion {
    pub fn new(partition: EspNvsPartition<NvsDefault>) -> Result<Self> {
        let nvs = EspNvs::new(partition, NAMESPACE, true)
            .map_err(|e| Error::Storage(format!("failed to open NVS namespace: {}", e)))?;
        // A missing blob reads as a blank (all-0xff) region.
        let mut cache = [0xff; REGION_LEN];
        match nvs.get_blob(BLOB_KEY, &mut cache) {
            Ok(Some(_)) => info!("configuration image loaded from flash"),
            Ok(None) => info!("no configuration image in flash yet"),
            Err(err) => warn!("failed to read configuration blob: {}", err),
        }
        Ok(Self { nvs, cache })
    }
}

impl NvmRegion for NvsRegion {
    fn len(&self) -> usize {
        REGION_LEN
    }

    fn read(&self, at: usize) -> u8 {
        self.cache[at]
    }

    fn write(&mut self, at: usize, value: u8) {
        self.cache[at] = value;
    }

    fn commit(&mut self) -> bool {
        match self.nvs.set_blob(BLOB_KEY, &self.cache) {
            Ok(()) => true,
            Err(err) => {
                error!("failed to write configuration blob: {}", err);
                false
            }
        }
    }
}
