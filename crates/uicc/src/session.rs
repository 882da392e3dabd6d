//! Boots a controller against the card images named on the command line
//! (or in the config file) and waits for profiles to settle.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::time::{Instant, timeout_at};
use tracing::{debug, info};

use uicc_config::Config;
use uicc_core::{ProfileSnapshot, ProfileState, UiccController, UiccEvent, UiccProfile};
use uicc_ril::{CardImage, CardState, SimulatedModem};

use crate::cli::GlobalOpts;
use crate::error::CliError;

pub struct Session {
    pub controller: UiccController,
    events: broadcast::Receiver<UiccEvent>,
    timeout: Duration,
}

impl Session {
    pub fn boot(global: &GlobalOpts, cfg: &Config) -> Result<Self, CliError> {
        let paths: &[PathBuf] = if global.image.is_empty() {
            &cfg.images
        } else {
            &global.image
        };
        if paths.is_empty() {
            return Err(CliError::NoImages {
                path: uicc_config::config_path().display().to_string(),
            });
        }

        let mut modem = SimulatedModem::new(paths.len());
        for (slot, path) in paths.iter().enumerate() {
            let image = load_image(path)?;
            modem = modem.with_card(slot, &image).map_err(|e| image_error(path, e))?;
            debug!(slot, path = %path.display(), "card image loaded");
        }

        let mut cfg = cfg.clone();
        cfg.uicc.num_phones = paths.len();
        let core_cfg = uicc_config::to_uicc_config(&cfg)?;
        let pin_storage = uicc_config::pin_storage(&cfg)?;

        let controller = UiccController::new(core_cfg, modem.rils(), pin_storage);
        let events = controller.events();
        controller.start();
        info!(phones = paths.len(), "controller started");

        Ok(Self {
            controller,
            events,
            timeout: Duration::from_secs(global.timeout),
        })
    }

    /// Wait until the profile of `phone` leaves its transient states.
    /// `None` means the slot holds no card.
    pub async fn settle(&mut self, phone: usize) -> Result<Option<UiccProfile>, CliError> {
        if phone >= self.controller.num_phones() {
            return Err(CliError::Validation {
                field: "phone".into(),
                reason: format!("only {} phone(s) configured", self.controller.num_phones()),
            });
        }
        let deadline = Instant::now() + self.timeout;
        let seconds = self.timeout.as_secs();
        let timed_out = move || CliError::Timeout { seconds };

        loop {
            let absent = self
                .controller
                .slot_for_phone(phone)
                .is_some_and(|slot| slot.card_state() == Some(CardState::Absent));
            if absent {
                return Ok(None);
            }

            if let Some(profile) = self.controller.profile(phone) {
                let mut stream = profile.subscribe();
                let settled = timeout_at(deadline, stream.wait_for(|s| is_settled(s.state)))
                    .await
                    .map_err(|_| timed_out())?;
                if settled.is_some() {
                    return Ok(Some(profile));
                }
                // Profile disposed underneath us; wait for its replacement.
            }

            match timeout_at(deadline, self.events.recv()).await {
                Err(_) => return Err(timed_out()),
                Ok(Ok(_) | Err(RecvError::Lagged(_))) => {}
                Ok(Err(RecvError::Closed)) => return Ok(None),
            }
        }
    }

    /// Like [`Session::settle`], but a missing card is an error.
    pub async fn require_profile(&mut self, phone: usize) -> Result<UiccProfile, CliError> {
        self.settle(phone).await?.ok_or(CliError::NoCard { phone })
    }

    /// Wait for `profile` to reach a state matching `pred`.
    pub async fn wait_until(
        &self,
        profile: &UiccProfile,
        mut pred: impl FnMut(ProfileState) -> bool,
    ) -> Result<Arc<ProfileSnapshot>, CliError> {
        let mut stream = profile.subscribe();
        tokio::time::timeout(self.timeout, stream.wait_for(|s| pred(s.state)))
            .await
            .map_err(|_| CliError::Timeout {
                seconds: self.timeout.as_secs(),
            })?
            .ok_or(CliError::NotReady {
                what: "profile".into(),
            })
    }

    pub async fn shutdown(self) {
        self.controller.shutdown().await;
    }
}

pub fn is_settled(state: ProfileState) -> bool {
    !matches!(
        state,
        ProfileState::Unknown | ProfileState::NotReady | ProfileState::Ready
    )
}

fn load_image(path: &Path) -> Result<CardImage, CliError> {
    let text = std::fs::read_to_string(path).map_err(|e| image_error(path, e))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let parsed = if is_json {
        CardImage::from_json(&text)
    } else {
        CardImage::from_toml(&text)
    };
    parsed.map_err(|e| image_error(path, e))
}

fn image_error(path: &Path, source: impl std::error::Error + Send + Sync + 'static) -> CliError {
    CliError::Image {
        path: path.display().to_string(),
        source: Box::new(source),
    }
}
