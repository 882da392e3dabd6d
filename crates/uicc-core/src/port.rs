// ── Port ──
//
// One logical access point on a card. Owns the profile selected on it
// and forwards logical-channel and APDU traffic to the transport.
// Channels are handed out as guards; a guard dropped without `close()`
// closes its channel in the background.

use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uicc_ril::{Apdu, CardStatus, CommandsInterface, IccIoRequest, IccIoResult};

use crate::config::UiccConfig;
use crate::error::UiccError;
use crate::pii::pii;
use crate::pin_storage::PinStorage;
use crate::profile::UiccProfile;

/// Channels opened through one port, keyed by channel number.
struct ChannelRegistry {
    ci: Arc<dyn CommandsInterface>,
    phone_id: usize,
    open: DashMap<i32, String>,
}

impl ChannelRegistry {
    /// Close `channel` without waiting. Used when a guard is dropped.
    fn close_detached(self: &Arc<Self>, channel: i32) {
        if self.open.remove(&channel).is_none() {
            return;
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(phone_id = self.phone_id, channel, "no runtime to close abandoned channel");
            return;
        };
        let close = self.ci.close_logical_channel(channel);
        let phone_id = self.phone_id;
        runtime.spawn(async move {
            match close.await {
                Ok(()) => debug!(phone_id, channel, "abandoned channel closed"),
                Err(e) => warn!(phone_id, channel, error = %e, "closing abandoned channel failed"),
            }
        });
    }
}

/// An open logical channel. Dropping it closes the channel.
pub struct LogicalChannel {
    channel: i32,
    select_response: Vec<u8>,
    registry: Arc<ChannelRegistry>,
    closed: bool,
}

impl std::fmt::Debug for LogicalChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicalChannel")
            .field("channel", &self.channel)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

impl LogicalChannel {
    pub fn channel(&self) -> i32 {
        self.channel
    }

    /// SELECT response, status words included.
    pub fn select_response(&self) -> &[u8] {
        &self.select_response
    }

    pub async fn transmit(&self, apdu: Apdu) -> Result<IccIoResult, UiccError> {
        Ok(self
            .registry
            .ci
            .transmit_apdu_logical_channel(self.channel, apdu)
            .await?)
    }

    /// Close the channel and wait for the transport to confirm.
    pub async fn close(mut self) -> Result<(), UiccError> {
        self.closed = true;
        self.registry.open.remove(&self.channel);
        self.registry
            .ci
            .close_logical_channel(self.channel)
            .await?;
        Ok(())
    }
}

impl Drop for LogicalChannel {
    fn drop(&mut self) {
        if !self.closed {
            self.registry.close_detached(self.channel);
        }
    }
}

/// Handle onto one port. Cheap to clone.
#[derive(Clone)]
pub struct UiccPort {
    inner: Arc<Inner>,
}

struct Inner {
    phone_id: usize,
    port_index: usize,
    physical_slot: usize,
    iccid: ArcSwapOption<String>,
    profile: UiccProfile,
    channels: Arc<ChannelRegistry>,
    cancel: CancellationToken,
}

impl std::fmt::Debug for UiccPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UiccPort")
            .field("phone_id", &self.inner.phone_id)
            .field("port_index", &self.inner.port_index)
            .field("physical_slot", &self.inner.physical_slot)
            .finish_non_exhaustive()
    }
}

/// What a port is created from.
pub(crate) struct PortContext {
    pub ci: Arc<dyn CommandsInterface>,
    pub config: Arc<UiccConfig>,
    pub pin_storage: Arc<dyn PinStorage>,
    pub phone_id: usize,
    pub physical_slot: usize,
}

impl UiccPort {
    pub(crate) fn new(
        ctx: PortContext,
        status: &CardStatus,
        euicc: bool,
        cancel: CancellationToken,
    ) -> Self {
        let port_index = status.slot_port_mapping.port_index;
        let profile = UiccProfile::spawn(
            Arc::clone(&ctx.ci),
            ctx.config,
            ctx.pin_storage,
            ctx.phone_id,
            cancel.child_token(),
        );
        info!(
            phone_id = ctx.phone_id,
            slot = ctx.physical_slot,
            port = port_index,
            "port created"
        );
        let port = Self {
            inner: Arc::new(Inner {
                phone_id: ctx.phone_id,
                port_index,
                physical_slot: ctx.physical_slot,
                iccid: ArcSwapOption::empty(),
                profile,
                channels: Arc::new(ChannelRegistry {
                    ci: ctx.ci,
                    phone_id: ctx.phone_id,
                    open: DashMap::new(),
                }),
                cancel,
            }),
        };
        port.update(status, euicc);
        port
    }

    pub(crate) fn update(&self, status: &CardStatus, euicc: bool) {
        if self.is_disposed() {
            return;
        }
        let iccid = status.iccid.clone().filter(|s| !s.is_empty());
        let previous = self.inner.iccid.swap(iccid.clone().map(Arc::new));
        if previous.as_deref() != iccid.as_ref() {
            debug!(
                phone_id = self.inner.phone_id,
                port = self.inner.port_index,
                iccid = %pii(iccid.as_deref().unwrap_or("")),
                "port ICCID changed"
            );
        }
        self.inner.profile.update(status.clone(), euicc);
    }

    // ── Identity ─────────────────────────────────────────────────────

    pub fn phone_id(&self) -> usize {
        self.inner.phone_id
    }

    pub fn port_index(&self) -> usize {
        self.inner.port_index
    }

    pub fn physical_slot(&self) -> usize {
        self.inner.physical_slot
    }

    pub fn iccid(&self) -> Option<String> {
        self.inner.iccid.load_full().map(|s| s.as_ref().clone())
    }

    pub fn profile(&self) -> &UiccProfile {
        &self.inner.profile
    }

    // ── Channels and APDUs ───────────────────────────────────────────

    /// Open a logical channel to `aid`. The returned guard closes the
    /// channel when dropped.
    pub async fn open_logical_channel(&self, aid: &str, p2: u8) -> Result<LogicalChannel, UiccError> {
        if self.is_disposed() {
            return Err(UiccError::actor_gone("port"));
        }
        let registry = &self.inner.channels;
        let response = registry.ci.open_logical_channel(aid.to_owned(), p2).await?;
        registry.open.insert(response.channel, aid.to_owned());
        debug!(phone_id = self.inner.phone_id, channel = response.channel, aid, "logical channel opened");
        Ok(LogicalChannel {
            channel: response.channel,
            select_response: response.select_response,
            registry: Arc::clone(registry),
            closed: false,
        })
    }

    /// Channel numbers currently held open through this port.
    pub fn open_channels(&self) -> Vec<i32> {
        let mut channels: Vec<i32> = self.inner.channels.open.iter().map(|e| *e.key()).collect();
        channels.sort_unstable();
        channels
    }

    pub async fn transmit_apdu_logical_channel(
        &self,
        channel: i32,
        apdu: Apdu,
    ) -> Result<IccIoResult, UiccError> {
        Ok(self
            .inner
            .channels
            .ci
            .transmit_apdu_logical_channel(channel, apdu)
            .await?)
    }

    pub async fn transmit_apdu_basic_channel(&self, apdu: Apdu) -> Result<IccIoResult, UiccError> {
        Ok(self.inner.channels.ci.transmit_apdu_basic_channel(apdu).await?)
    }

    pub async fn icc_exchange_simio(&self, request: IccIoRequest) -> Result<IccIoResult, UiccError> {
        Ok(self.inner.channels.ci.icc_io_for_app(request).await?)
    }

    pub async fn send_envelope(&self, contents: Vec<u8>) -> Result<Vec<u8>, UiccError> {
        Ok(self.inner.channels.ci.send_envelope(contents).await?)
    }

    /// Run AUTHENTICATE against `aid` and return the response payload.
    pub async fn authenticate(
        &self,
        auth_context: u8,
        data: Vec<u8>,
        aid: Option<String>,
    ) -> Result<Vec<u8>, UiccError> {
        let result = self
            .inner
            .channels
            .ci
            .request_icc_sim_authentication(auth_context, data, aid)
            .await?;
        Ok(result.into_payload()?)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Dispose the profile and close every channel still open. Idempotent.
    pub fn dispose(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        info!(
            phone_id = self.inner.phone_id,
            slot = self.inner.physical_slot,
            port = self.inner.port_index,
            "port disposed"
        );
        self.inner.profile.dispose();
        self.inner.cancel.cancel();
        for channel in self.open_channels() {
            self.inner.channels.close_detached(channel);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::pin_storage::MemoryPinStorage;
    use uicc_ril::sim::AppImage;
    use uicc_ril::{AppType, CardImage, SimulatedModem};

    async fn port() -> (SimulatedModem, UiccPort) {
        let image = CardImage::new("8901260321111851072")
            .with_app(AppImage::new(AppType::Usim).aid("A0000000871002"));
        let modem = SimulatedModem::new(1).with_card(0, &image).unwrap();
        let ci = modem.ril(0);
        let status = ci.get_icc_card_status().await.unwrap();
        let port = UiccPort::new(
            PortContext {
                ci,
                config: Arc::new(UiccConfig::default()),
                pin_storage: Arc::new(MemoryPinStorage::new()),
                phone_id: 0,
                physical_slot: 0,
            },
            &status,
            false,
            CancellationToken::new(),
        );
        (modem, port)
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn dropped_channel_is_closed() {
        let (modem, port) = port().await;
        let channel = port.open_logical_channel("A000000151000000", 0).await.unwrap();
        assert_eq!(port.open_channels(), vec![channel.channel()]);
        assert_eq!(modem.open_channels().len(), 1);

        drop(channel);
        settle().await;
        assert!(port.open_channels().is_empty());
        assert!(modem.open_channels().is_empty());
    }

    #[tokio::test]
    async fn explicit_close_waits_for_transport() {
        let (modem, port) = port().await;
        let channel = port.open_logical_channel("A000000151000000", 0).await.unwrap();
        let echoed = channel
            .transmit(Apdu {
                cla: 0x81,
                ins: 0xCA,
                data: vec![0x01, 0x02],
                ..Apdu::default()
            })
            .await
            .unwrap();
        assert_eq!(echoed.payload, vec![0x01, 0x02]);
        channel.close().await.unwrap();
        assert!(modem.open_channels().is_empty());
    }

    #[tokio::test]
    async fn dispose_closes_open_channels() {
        let (modem, port) = port().await;
        let channel = port.open_logical_channel("A000000151000000", 0).await.unwrap();
        port.dispose();
        settle().await;
        assert!(modem.open_channels().is_empty());
        assert!(port.profile().is_disposed());
        // The guard no longer owns anything.
        drop(channel);
        assert!(matches!(
            port.open_logical_channel("A000000151000000", 0).await,
            Err(UiccError::Disposed { .. })
        ));
    }

    #[tokio::test]
    async fn port_tracks_iccid() {
        let (_modem, port) = port().await;
        assert_eq!(port.iccid().as_deref(), Some("8901260321111851072"));
        assert_eq!(port.port_index(), 0);
    }

    #[tokio::test]
    async fn envelope_passes_through() {
        let (_modem, port) = port().await;
        assert_eq!(port.send_envelope(vec![0xD3, 0x00]).await.unwrap(), vec![0x90, 0x00]);
        assert!(port.send_envelope(Vec::new()).await.is_err());
    }
}
