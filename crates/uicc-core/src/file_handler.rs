// ── Elementary-file access ──
//
// Builds READ/UPDATE BINARY and READ/UPDATE RECORD exchanges on top of the
// transport's SIM I/O primitive. Every operation starts with GET RESPONSE
// so sizes and structure come from the card rather than from assumptions.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use uicc_ril::ef::ef_path;
use uicc_ril::io::{
    COMMAND_GET_RESPONSE, COMMAND_READ_BINARY, COMMAND_READ_RECORD, COMMAND_UPDATE_BINARY,
    COMMAND_UPDATE_RECORD, EF_TYPE_CYCLIC, EF_TYPE_LINEAR_FIXED, EF_TYPE_TRANSPARENT,
    GET_RESPONSE_EF_SIZE_BYTES, READ_RECORD_MODE_ABSOLUTE, RESPONSE_DATA_FILE_SIZE_1,
    RESPONSE_DATA_FILE_SIZE_2, RESPONSE_DATA_FILE_TYPE, RESPONSE_DATA_RECORD_LENGTH,
    RESPONSE_DATA_STRUCTURE, TYPE_EF,
};
use uicc_ril::{AppType, CommandsInterface, IccIoRequest};

use crate::error::UiccError;

/// Largest payload moved by one READ/UPDATE BINARY.
const MAX_BINARY_CHUNK: usize = 0xFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EfStructure {
    Transparent,
    LinearFixed,
    Cyclic,
}

/// Parsed GET RESPONSE header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EfInfo {
    pub size: usize,
    pub structure: EfStructure,
    pub record_len: usize,
}

impl EfInfo {
    fn parse(ef: u16, header: &[u8]) -> Result<Self, UiccError> {
        let malformed = |reason: String| UiccError::MalformedResponse { ef, reason };
        if header.len() < usize::from(GET_RESPONSE_EF_SIZE_BYTES) {
            return Err(malformed(format!("GET RESPONSE of {} bytes", header.len())));
        }
        if header[RESPONSE_DATA_FILE_TYPE] != TYPE_EF {
            return Err(malformed("not an elementary file".into()));
        }
        let structure = match header[RESPONSE_DATA_STRUCTURE] {
            EF_TYPE_TRANSPARENT => EfStructure::Transparent,
            EF_TYPE_LINEAR_FIXED => EfStructure::LinearFixed,
            EF_TYPE_CYCLIC => EfStructure::Cyclic,
            other => return Err(malformed(format!("unknown structure {other}"))),
        };
        Ok(Self {
            size: usize::from(u16::from_be_bytes([
                header[RESPONSE_DATA_FILE_SIZE_1],
                header[RESPONSE_DATA_FILE_SIZE_2],
            ])),
            structure,
            record_len: usize::from(header[RESPONSE_DATA_RECORD_LENGTH]),
        })
    }

    pub fn record_count(&self) -> usize {
        if self.record_len == 0 {
            0
        } else {
            self.size / self.record_len
        }
    }

    fn is_record_based(&self) -> bool {
        matches!(
            self.structure,
            EfStructure::LinearFixed | EfStructure::Cyclic
        )
    }
}

/// File access for one application. Cheap to clone into spawned loads.
#[derive(Clone)]
pub struct IccFileHandler {
    ci: Arc<dyn CommandsInterface>,
    app_type: AppType,
    aid: Option<String>,
}

impl std::fmt::Debug for IccFileHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IccFileHandler")
            .field("app_type", &self.app_type)
            .field("aid", &self.aid)
            .finish_non_exhaustive()
    }
}

struct Exchange {
    command: u8,
    p1: u8,
    p2: u8,
    p3: u8,
    data: Option<Vec<u8>>,
    pin2: Option<String>,
}

impl IccFileHandler {
    pub fn new(ci: Arc<dyn CommandsInterface>, app_type: AppType, aid: Option<String>) -> Self {
        Self { ci, app_type, aid }
    }

    pub fn aid(&self) -> Option<&str> {
        self.aid.as_deref()
    }

    async fn exchange(&self, ef: u16, x: Exchange) -> Result<Vec<u8>, UiccError> {
        let request = IccIoRequest {
            command: x.command,
            file_id: ef,
            path: ef_path(ef, self.app_type).unwrap_or_default(),
            p1: x.p1,
            p2: x.p2,
            p3: x.p3,
            data: x.data,
            pin2: x.pin2,
            aid: self.aid.clone(),
        };
        let result = self.ci.icc_io_for_app(request).await?;
        Ok(result.into_payload()?)
    }

    pub async fn ef_info(&self, ef: u16) -> Result<EfInfo, UiccError> {
        let header = self
            .exchange(
                ef,
                Exchange {
                    command: COMMAND_GET_RESPONSE,
                    p1: 0,
                    p2: 0,
                    p3: GET_RESPONSE_EF_SIZE_BYTES,
                    data: None,
                    pin2: None,
                },
            )
            .await?;
        EfInfo::parse(ef, &header)
    }

    async fn record_info(&self, ef: u16) -> Result<EfInfo, UiccError> {
        let info = self.ef_info(ef).await?;
        if !info.is_record_based() || info.record_len == 0 {
            return Err(UiccError::MalformedResponse {
                ef,
                reason: "expected a record-based file".into(),
            });
        }
        Ok(info)
    }

    /// Size of a transparent file in bytes.
    pub async fn transparent_size(&self, ef: u16) -> Result<usize, UiccError> {
        let info = self.ef_info(ef).await?;
        if info.structure != EfStructure::Transparent {
            return Err(UiccError::MalformedResponse {
                ef,
                reason: "expected a transparent file".into(),
            });
        }
        Ok(info.size)
    }

    /// Record length, total size and record count of a linear file.
    pub async fn linear_record_size(&self, ef: u16) -> Result<EfInfo, UiccError> {
        self.record_info(ef).await
    }

    pub async fn load_transparent(&self, ef: u16) -> Result<Vec<u8>, UiccError> {
        let size = self.transparent_size(ef).await?;
        let mut out = Vec::with_capacity(size);
        while out.len() < size {
            let chunk = (size - out.len()).min(MAX_BINARY_CHUNK);
            let [p1, p2] = offset_bytes(ef, out.len())?;
            let data = self
                .exchange(
                    ef,
                    Exchange {
                        command: COMMAND_READ_BINARY,
                        p1,
                        p2,
                        p3: u8::try_from(chunk).unwrap_or(u8::MAX),
                        data: None,
                        pin2: None,
                    },
                )
                .await?;
            if data.is_empty() {
                break;
            }
            out.extend_from_slice(&data);
        }
        Ok(out)
    }

    pub async fn load_linear_record(&self, ef: u16, record: u8) -> Result<Vec<u8>, UiccError> {
        let info = self.record_info(ef).await?;
        self.read_record(ef, record, info.record_len).await
    }

    pub async fn load_all_linear(&self, ef: u16) -> Result<Vec<Vec<u8>>, UiccError> {
        let info = self.record_info(ef).await?;
        let count = info.record_count().min(usize::from(u8::MAX));
        let mut records = Vec::with_capacity(count);
        for record in 1..=count {
            let record = u8::try_from(record).unwrap_or(u8::MAX);
            records.push(self.read_record(ef, record, info.record_len).await?);
        }
        Ok(records)
    }

    async fn read_record(&self, ef: u16, record: u8, len: usize) -> Result<Vec<u8>, UiccError> {
        self.exchange(
            ef,
            Exchange {
                command: COMMAND_READ_RECORD,
                p1: record,
                p2: READ_RECORD_MODE_ABSOLUTE,
                p3: u8::try_from(len).unwrap_or(u8::MAX),
                data: None,
                pin2: None,
            },
        )
        .await
    }

    pub async fn update_transparent(&self, ef: u16, data: &[u8]) -> Result<(), UiccError> {
        for (i, chunk) in data.chunks(MAX_BINARY_CHUNK).enumerate() {
            let [p1, p2] = offset_bytes(ef, i * MAX_BINARY_CHUNK)?;
            self.exchange(
                ef,
                Exchange {
                    command: COMMAND_UPDATE_BINARY,
                    p1,
                    p2,
                    p3: u8::try_from(chunk.len()).unwrap_or(u8::MAX),
                    data: Some(chunk.to_vec()),
                    pin2: None,
                },
            )
            .await?;
        }
        Ok(())
    }

    pub async fn update_linear_record(
        &self,
        ef: u16,
        record: u8,
        data: Vec<u8>,
        pin2: Option<&SecretString>,
    ) -> Result<(), UiccError> {
        let p3 = u8::try_from(data.len()).map_err(|_| UiccError::InvalidArgument {
            message: format!("record of {} bytes", data.len()),
        })?;
        self.exchange(
            ef,
            Exchange {
                command: COMMAND_UPDATE_RECORD,
                p1: record,
                p2: READ_RECORD_MODE_ABSOLUTE,
                p3,
                data: Some(data),
                pin2: pin2.map(|p| p.expose_secret().to_owned()),
            },
        )
        .await?;
        Ok(())
    }
}

fn offset_bytes(ef: u16, offset: usize) -> Result<[u8; 2], UiccError> {
    u16::try_from(offset)
        .ok()
        .filter(|o| *o <= 0x7FFF)
        .map(u16::to_be_bytes)
        .ok_or_else(|| UiccError::MalformedResponse {
            ef,
            reason: format!("offset {offset} beyond READ BINARY range"),
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use uicc_ril::ef::{EF_GID1, EF_OPL, EF_SPN};
    use uicc_ril::sim::AppImage;
    use uicc_ril::{CardImage, RilError, SimulatedModem};

    const AID: &str = "A0000000871002";

    fn handler(modem: &SimulatedModem) -> IccFileHandler {
        IccFileHandler::new(modem.ril(0), AppType::Usim, Some(AID.into()))
    }

    fn modem() -> SimulatedModem {
        let long: Vec<u8> = (0..=255u8).chain(0..44).collect();
        let image = CardImage::new("8901410321111851072").with_app(
            AppImage::new(AppType::Usim)
                .aid(AID)
                .transparent(EF_SPN, &[0x00, b'X', 0xFF])
                .transparent(EF_GID1, &long)
                .linear(EF_OPL, &[&[1, 2, 3], &[4, 5, 6]]),
        );
        SimulatedModem::new(1).with_card(0, &image).unwrap()
    }

    #[tokio::test]
    async fn reads_transparent_in_chunks() {
        let modem = modem();
        let fh = handler(&modem);
        assert_eq!(fh.load_transparent(EF_SPN).await.unwrap(), vec![0x00, b'X', 0xFF]);
        let long = fh.load_transparent(EF_GID1).await.unwrap();
        assert_eq!(long.len(), 300);
        assert_eq!(long[299], 43);
    }

    #[tokio::test]
    async fn reads_linear_records() {
        let modem = modem();
        let fh = handler(&modem);
        let info = fh.linear_record_size(EF_OPL).await.unwrap();
        assert_eq!((info.record_len, info.record_count()), (3, 2));
        assert_eq!(fh.load_linear_record(EF_OPL, 2).await.unwrap(), vec![4, 5, 6]);
        assert_eq!(fh.load_all_linear(EF_OPL).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn structure_mismatch_is_an_error() {
        let modem = modem();
        let fh = handler(&modem);
        assert!(matches!(
            fh.load_transparent(EF_OPL).await,
            Err(UiccError::MalformedResponse { ef: EF_OPL, .. })
        ));
    }

    #[tokio::test]
    async fn missing_file_surfaces_status_words() {
        let modem = modem();
        let fh = handler(&modem);
        let err = fh.load_transparent(0x6F99).await.unwrap_err();
        assert!(matches!(err, UiccError::Ril(ref e @ RilError::SimIo { .. }) if e.is_file_not_found()));
    }

    #[tokio::test]
    async fn updates_round_trip() {
        let modem = modem();
        let fh = handler(&modem);
        fh.update_transparent(EF_SPN, &[0x01, b'Y']).await.unwrap();
        assert_eq!(modem.read_transparent(0, Some(AID), EF_SPN).unwrap(), vec![0x01, b'Y', 0xFF]);
        fh.update_linear_record(EF_OPL, 1, vec![9, 9, 9], None).await.unwrap();
        assert_eq!(fh.load_linear_record(EF_OPL, 1).await.unwrap(), vec![9, 9, 9]);
    }
}
