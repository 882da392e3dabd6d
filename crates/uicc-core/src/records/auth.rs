// ── SIM authentication ──
//
// Challenge/response through the application's AID. The async form is
// bounded by `auth_timeout`; the blocking form is for callers outside
// the runtime and waits on a condition variable with the same bound.

use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::Duration;

use tracing::{debug, warn};

use super::IccRecords;
use crate::error::UiccError;

fn timeout_ms(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl IccRecords {
    /// Run a SIM authentication exchange. `auth_context` is the P2 value
    /// (GSM or 3G security context); `data` is the challenge.
    pub async fn icc_sim_challenge_response(
        &self,
        auth_context: u8,
        data: &[u8],
    ) -> Result<Vec<u8>, UiccError> {
        let timeout = self.inner.config.auth_timeout;
        let request = self.inner.ci.request_icc_sim_authentication(
            auth_context,
            data.to_vec(),
            self.inner.aid.clone(),
        );
        let result = tokio::time::timeout(timeout, request)
            .await
            .map_err(|_| UiccError::Timeout {
                timeout_ms: timeout_ms(timeout),
            })??;
        Ok(result.into_payload()?)
    }

    /// Blocking variant for threads that are not runtime workers. Returns
    /// `None` when the card rejects the challenge or does not answer within
    /// `auth_timeout`.
    pub fn icc_sim_challenge_response_blocking(
        &self,
        auth_context: u8,
        data: &[u8],
    ) -> Option<Vec<u8>> {
        let timeout = self.inner.config.auth_timeout;
        let shared: Arc<(Mutex<Option<Option<Vec<u8>>>>, Condvar)> =
            Arc::new((Mutex::new(None), Condvar::new()));

        let request = self.inner.ci.request_icc_sim_authentication(
            auth_context,
            data.to_vec(),
            self.inner.aid.clone(),
        );
        let completion = Arc::clone(&shared);
        let phone_id = self.inner.phone_id;
        self.inner.runtime.spawn(async move {
            let response = match request.await {
                Ok(result) => result.into_payload().map_err(UiccError::from),
                Err(e) => Err(UiccError::from(e)),
            };
            let response = match response {
                Ok(bytes) => Some(bytes),
                Err(e) => {
                    warn!(phone_id, error = %e, "SIM authentication failed");
                    None
                }
            };
            let (lock, cvar) = &*completion;
            *lock.lock().unwrap_or_else(PoisonError::into_inner) = Some(response);
            cvar.notify_all();
        });

        let (lock, cvar) = &*shared;
        let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut guard, wait) = cvar
            .wait_timeout_while(guard, timeout, |done| done.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        if wait.timed_out() {
            debug!(phone_id, timeout_ms = timeout_ms(timeout), "SIM authentication timed out");
            return None;
        }
        guard.take().flatten()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;
    use uicc_ril::sim::AppImage;
    use uicc_ril::{AppType, CardImage, SimulatedModem};

    use crate::config::UiccConfig;
    use crate::error::UiccError;
    use crate::file_handler::IccFileHandler;
    use crate::records::{IccRecords, RecordsContext};

    fn records(modem: &SimulatedModem, auth_timeout: Duration) -> IccRecords {
        let ci = modem.ril(0);
        let config = UiccConfig {
            auth_timeout,
            ..UiccConfig::default()
        };
        IccRecords::spawn(
            RecordsContext {
                ci: ci.clone(),
                fh: IccFileHandler::new(ci, AppType::Usim, Some("A0000000871002".into())),
                app_type: AppType::Usim,
                config: Arc::new(config),
                phone_id: 0,
            },
            CancellationToken::new(),
        )
        .unwrap()
    }

    fn modem() -> SimulatedModem {
        let image = CardImage::new("8901410321111851072")
            .with_app(AppImage::new(AppType::Usim).aid("A0000000871002"));
        SimulatedModem::new(1).with_card(0, &image).unwrap()
    }

    #[tokio::test]
    async fn async_challenge_answers() {
        let modem = modem();
        let records = records(&modem, Duration::from_secs(1));
        let response = records
            .icc_sim_challenge_response(0x81, &[0x10, 0x01, 0x02])
            .await
            .unwrap();
        assert!(!response.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn async_challenge_times_out() {
        let modem = modem();
        modem.silence_authentication(true);
        let records = records(&modem, Duration::from_millis(50));
        let err = records
            .icc_sim_challenge_response(0x81, &[0x10])
            .await
            .unwrap_err();
        assert!(matches!(err, UiccError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_challenge_times_out_with_none() {
        let modem = modem();
        modem.silence_authentication(true);
        let records = records(&modem, Duration::from_millis(100));
        let result = tokio::task::spawn_blocking(move || {
            records.icc_sim_challenge_response_blocking(0x81, &[0x10])
        })
        .await
        .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_challenge_answers() {
        let modem = modem();
        let records = records(&modem, Duration::from_secs(2));
        let result = tokio::task::spawn_blocking(move || {
            records.icc_sim_challenge_response_blocking(0x81, &[0x10, 0x01])
        })
        .await
        .unwrap();
        assert!(result.is_some_and(|r| !r.is_empty()));
    }
}
