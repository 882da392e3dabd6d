// ── Cached PIN storage ──
//
// PINs remembered per ICCID so a profile can unlock silently after a
// modem restart. Core ships an in-memory store; `uicc-config` provides a
// keyring-backed one.

use dashmap::DashMap;
use secrecy::SecretString;

use crate::error::UiccError;

/// Where verified PINs are kept between unlocks.
pub trait PinStorage: Send + Sync + 'static {
    fn get(&self, iccid: &str) -> Result<Option<SecretString>, UiccError>;

    fn store(&self, iccid: &str, pin: &SecretString) -> Result<(), UiccError>;

    fn clear(&self, iccid: &str) -> Result<(), UiccError>;
}

/// Process-lifetime PIN cache.
#[derive(Debug, Default)]
pub struct MemoryPinStorage {
    pins: DashMap<String, SecretString>,
}

impl MemoryPinStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PinStorage for MemoryPinStorage {
    fn get(&self, iccid: &str) -> Result<Option<SecretString>, UiccError> {
        Ok(self.pins.get(iccid).map(|p| p.value().clone()))
    }

    fn store(&self, iccid: &str, pin: &SecretString) -> Result<(), UiccError> {
        self.pins.insert(iccid.to_owned(), pin.clone());
        Ok(())
    }

    fn clear(&self, iccid: &str) -> Result<(), UiccError> {
        self.pins.remove(iccid);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn memory_round_trip() {
        let storage = MemoryPinStorage::new();
        assert!(storage.get("8901").unwrap().is_none());
        storage.store("8901", &SecretString::from("1234")).unwrap();
        assert_eq!(storage.get("8901").unwrap().unwrap().expose_secret(), "1234");
        storage.clear("8901").unwrap();
        assert!(storage.get("8901").unwrap().is_none());
    }
}
