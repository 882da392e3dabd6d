// ── ADN loading and caching ──
//
// ADN-format files (ADN, FDN, MSISDN, MBDN, CPHS mailbox) with their
// extension-record chains, plus a per-application cache of whole files.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use secrecy::SecretString;
use tracing::{debug, warn};
use uicc_ril::AppType;
use uicc_ril::ef::{EF_EXT1, EF_EXT2, EF_EXT5, EF_EXT6, EF_FDN, EF_MBDN, EF_MSISDN};

use crate::codec::adn::AdnRecord;
use crate::error::UiccError;
use crate::file_handler::IccFileHandler;

/// Extension records followed per entry before giving up on a chain.
const MAX_EXTENSION_CHAIN: usize = 10;

/// Extension file paired with an ADN-format file.
pub fn extension_ef(ef: u16, app_type: AppType) -> u16 {
    match ef {
        EF_MBDN => EF_EXT6,
        EF_MSISDN if app_type == AppType::Usim => EF_EXT5,
        EF_FDN => EF_EXT2,
        _ => EF_EXT1,
    }
}

async fn follow_extensions(
    fh: &IccFileHandler,
    ext_ef: Option<u16>,
    adn: &mut AdnRecord,
) {
    let Some(ext_ef) = ext_ef else { return };
    let mut next = adn.extension_record;
    for _ in 0..MAX_EXTENSION_CHAIN {
        let Some(record) = next else { return };
        match fh.load_linear_record(ext_ef, record).await {
            Ok(ext) => next = adn.append_extension(&ext),
            Err(e) => {
                warn!(ef = format_args!("{ext_ef:04X}"), record, error = %e, "extension record unreadable");
                return;
            }
        }
    }
}

/// Load one ADN-format record and its extension chain.
pub async fn load_adn(
    fh: &IccFileHandler,
    ef: u16,
    ext_ef: Option<u16>,
    record: u8,
) -> Result<AdnRecord, UiccError> {
    let data = fh.load_linear_record(ef, record).await?;
    let mut adn = AdnRecord::decode(ef, u32::from(record), &data)?;
    follow_extensions(fh, ext_ef, &mut adn).await;
    Ok(adn)
}

/// Load every record of an ADN-format file.
pub async fn load_all_adn(
    fh: &IccFileHandler,
    ef: u16,
    ext_ef: Option<u16>,
) -> Result<Vec<AdnRecord>, UiccError> {
    let raw = fh.load_all_linear(ef).await?;
    let mut out = Vec::with_capacity(raw.len());
    for (record_number, data) in (1u32..).zip(raw) {
        match AdnRecord::decode(ef, record_number, &data) {
            Ok(mut adn) => {
                follow_extensions(fh, ext_ef, &mut adn).await;
                out.push(adn);
            }
            Err(e) => {
                warn!(ef = format_args!("{ef:04X}"), record_number, error = %e, "skipping malformed ADN");
                out.push(AdnRecord {
                    ef,
                    record_number,
                    ..AdnRecord::default()
                });
            }
        }
    }
    Ok(out)
}

/// Encode `adn` to the file's record size and write it.
pub async fn update_adn(
    fh: &IccFileHandler,
    adn: &AdnRecord,
    ef: u16,
    record: u8,
    pin2: Option<&SecretString>,
) -> Result<(), UiccError> {
    let info = fh.linear_record_size(ef).await?;
    let data = adn.encode(info.record_len)?;
    fh.update_linear_record(ef, record, data, pin2).await
}

/// Whole-file ADN cache for one application.
#[derive(Debug)]
pub struct AdnCache {
    fh: IccFileHandler,
    app_type: AppType,
    files: Mutex<HashMap<u16, Arc<Vec<AdnRecord>>>>,
}

impl AdnCache {
    pub fn new(fh: IccFileHandler, app_type: AppType) -> Self {
        Self {
            fh,
            app_type,
            files: Mutex::new(HashMap::new()),
        }
    }

    fn files(&self) -> std::sync::MutexGuard<'_, HashMap<u16, Arc<Vec<AdnRecord>>>> {
        self.files.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn cached(&self, ef: u16) -> Option<Arc<Vec<AdnRecord>>> {
        self.files().get(&ef).cloned()
    }

    /// Load (or return the cached copy of) every record of `ef`.
    pub async fn load_all(&self, ef: u16) -> Result<Arc<Vec<AdnRecord>>, UiccError> {
        if let Some(hit) = self.cached(ef) {
            return Ok(hit);
        }
        let records = Arc::new(load_all_adn(&self.fh, ef, Some(extension_ef(ef, self.app_type))).await?);
        debug!(ef = format_args!("{ef:04X}"), count = records.len(), "ADN file cached");
        self.files().insert(ef, Arc::clone(&records));
        Ok(records)
    }

    /// Write one record and patch the cached copy.
    pub async fn update(
        &self,
        ef: u16,
        record: u8,
        adn: AdnRecord,
        pin2: Option<&SecretString>,
    ) -> Result<(), UiccError> {
        update_adn(&self.fh, &adn, ef, record, pin2).await?;
        let mut files = self.files();
        if let Some(cached) = files.get_mut(&ef) {
            let mut updated = cached.as_ref().clone();
            if let Some(slot) = updated
                .iter_mut()
                .find(|a| a.record_number == u32::from(record))
            {
                *slot = AdnRecord {
                    ef,
                    record_number: u32::from(record),
                    ..adn
                };
            }
            *cached = Arc::new(updated);
        }
        Ok(())
    }

    pub fn reset(&self) {
        self.files().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uicc_ril::sim::AppImage;
    use uicc_ril::{CardImage, SimulatedModem};

    fn fdn_record(name: &str, number: &str) -> Vec<u8> {
        AdnRecord::new(name, number).encode(20).unwrap()
    }

    fn setup() -> (SimulatedModem, AdnCache) {
        let first = fdn_record("Police", "112");
        let second = fdn_record("Home", "5551234");
        let image = CardImage::new("8901410321111851072").with_app(
            AppImage::new(AppType::Sim).linear(EF_FDN, &[&first, &second]),
        );
        let modem = SimulatedModem::new(1).with_card(0, &image).unwrap();
        let fh = IccFileHandler::new(modem.ril(0), AppType::Sim, None);
        (modem, AdnCache::new(fh, AppType::Sim))
    }

    #[tokio::test]
    async fn caches_until_reset() {
        let (modem, cache) = setup();
        let first = cache.load_all(EF_FDN).await.unwrap();
        assert_eq!(first[0].alpha_tag, "Police");
        assert_eq!(first[1].number, "5551234");

        modem.write_records(0, None, EF_FDN, vec![fdn_record("Other", "999")]);
        assert_eq!(cache.load_all(EF_FDN).await.unwrap()[0].alpha_tag, "Police");

        cache.reset();
        let reloaded = cache.load_all(EF_FDN).await.unwrap();
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded[0].alpha_tag, "Other");
    }

    #[tokio::test]
    async fn update_patches_cache() {
        let (_modem, cache) = setup();
        cache.load_all(EF_FDN).await.unwrap();
        cache
            .update(EF_FDN, 2, AdnRecord::new("Work", "5559999"), None)
            .await
            .unwrap();
        assert_eq!(cache.cached(EF_FDN).unwrap()[1].alpha_tag, "Work");
        cache.reset();
        assert_eq!(cache.load_all(EF_FDN).await.unwrap()[1].number, "5559999");
    }
}
