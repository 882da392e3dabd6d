#![allow(clippy::unwrap_used)]
// Integration tests for the simulated modem transport.

use pretty_assertions::assert_eq;

use uicc_ril::ef::{EF_GID1, EF_SPN};
use uicc_ril::io::{COMMAND_READ_BINARY, COMMAND_UPDATE_BINARY};
use uicc_ril::sim::{AppImage, PhonebookImage};
use uicc_ril::{
    AppState, AppType, CardImage, CardState, CommandsInterface, IccIoRequest,
    PhonebookReceivedStatus, RilError, RilIndication, SimPhonebookRecord, SimulatedModem,
};

// ── Helpers ─────────────────────────────────────────────────────────

const USIM_AID: &str = "A0000000871002";

fn image() -> CardImage {
    CardImage::new("8901410321111851072")
        .with_pin("1234", "87654321")
        .with_app(
            AppImage::new(AppType::Usim)
                .aid(USIM_AID)
                .transparent(EF_SPN, &[0x01, b'A', b'C', b'M', b'E', 0xFF]),
        )
        .with_phonebook(PhonebookImage {
            capacity: 5,
            entries: vec![
                SimPhonebookRecord {
                    record_id: 1,
                    alpha_tag: "Alice".into(),
                    number: "5551234".into(),
                    ..SimPhonebookRecord::default()
                },
                SimPhonebookRecord {
                    record_id: 3,
                    alpha_tag: "Bob".into(),
                    number: "5555678".into(),
                    ..SimPhonebookRecord::default()
                },
                SimPhonebookRecord {
                    record_id: 4,
                    alpha_tag: "Carol".into(),
                    number: "5550000".into(),
                    ..SimPhonebookRecord::default()
                },
            ],
        })
}

fn read(file_id: u16) -> IccIoRequest {
    IccIoRequest {
        command: COMMAND_READ_BINARY,
        file_id,
        aid: Some(USIM_AID.into()),
        ..IccIoRequest::default()
    }
}

// ── Status ──────────────────────────────────────────────────────────

#[test]
fn test_status_readable_from_sync_code() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let status = tokio_test::block_on(modem.ril(0).get_icc_card_status()).unwrap();
    assert_eq!(status.card_state, CardState::Present);
    assert_eq!(status.applications[0].app_state, AppState::Pin);
}

#[tokio::test]
async fn test_empty_slot_reports_absent() {
    let modem = SimulatedModem::new(1);
    let status = modem.ril(0).get_icc_card_status().await.unwrap();
    assert_eq!(status.card_state, CardState::Absent);
    assert_eq!(status.slot_port_mapping.physical_slot_index, Some(0));
}

#[tokio::test]
async fn test_pin_locked_card_status() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let status = modem.ril(0).get_icc_card_status().await.unwrap();
    assert_eq!(status.card_state, CardState::Present);
    assert_eq!(status.applications[0].app_state, AppState::Pin);
    assert_eq!(status.gsm_umts_subscription_app_index, Some(0));
    assert_eq!(status.cdma_subscription_app_index, None);
}

#[tokio::test]
async fn test_supply_pin_unlocks_and_notifies() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let ril = modem.ril(0);
    let mut indications = ril.indications();

    ril.supply_icc_pin("1234".into(), None).await.unwrap();

    assert_eq!(indications.recv().await.unwrap(), RilIndication::IccStatusChanged);
    let status = ril.get_icc_card_status().await.unwrap();
    assert_eq!(status.applications[0].app_state, AppState::Ready);
}

#[tokio::test]
async fn test_wrong_pin_counts_down() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let err = modem
        .ril(0)
        .supply_icc_pin("0000".into(), None)
        .await
        .unwrap_err();
    assert_eq!(
        err,
        RilError::PasswordIncorrect {
            attempts_remaining: Some(2)
        }
    );
}

// ── File I/O ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_read_and_update_binary() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let ril = modem.ril(0);

    let spn = ril.icc_io_for_app(read(EF_SPN)).await.unwrap();
    assert!(spn.success());
    assert_eq!(spn.payload[1..5], *b"ACME");

    let write = IccIoRequest {
        command: COMMAND_UPDATE_BINARY,
        p3: 2,
        data: Some(vec![0x00, b'Z']),
        ..read(EF_SPN)
    };
    assert!(ril.icc_io_for_app(write).await.unwrap().success());
    assert_eq!(
        modem.read_transparent(0, Some(USIM_AID), EF_SPN).unwrap()[..2],
        [0x00, b'Z']
    );
}

#[tokio::test]
async fn test_injected_failure() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    modem.fail_ef(EF_GID1);
    let res = modem.ril(0).icc_io_for_app(read(EF_GID1)).await.unwrap();
    assert!(!res.success());
    assert!(res.into_payload().unwrap_err().is_file_not_found());
}

// ── Removal ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_remove_card_emits_status_change() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let ril = modem.ril(0);
    let mut indications = ril.indications();

    modem.remove_card(0);

    assert_eq!(indications.recv().await.unwrap(), RilIndication::IccStatusChanged);
    assert!(matches!(
        indications.recv().await.unwrap(),
        RilIndication::IccSlotStatusChanged(slots) if slots[0].card_state == CardState::Absent
    ));
    let status = ril.get_icc_card_status().await.unwrap();
    assert_eq!(status.card_state, CardState::Absent);
}

// ── Phonebook ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_phonebook_streams_in_batches() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let ril = modem.ril(0);
    let mut indications = ril.indications();

    let capacity = ril.get_sim_phonebook_capacity().await.unwrap();
    assert_eq!(capacity.max_adn_records, 5);
    assert_eq!(capacity.used_adn_records, 3);

    ril.get_sim_phonebook_records().await.unwrap();

    let mut seen = Vec::new();
    loop {
        match indications.recv().await.unwrap() {
            RilIndication::SimPhonebookRecords { status, records } => {
                seen.extend(records.into_iter().map(|r| r.record_id));
                if status == PhonebookReceivedStatus::Complete {
                    break;
                }
                assert_eq!(status, PhonebookReceivedStatus::Ok);
            }
            other => panic!("unexpected indication {other:?}"),
        }
    }
    assert_eq!(seen, vec![1, 3, 4]);
}

#[tokio::test]
async fn test_phonebook_update_allocates_free_index() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let id = modem
        .ril(0)
        .update_sim_phonebook_record(SimPhonebookRecord {
            record_id: 0,
            alpha_tag: "Dave".into(),
            number: "5551111".into(),
            ..SimPhonebookRecord::default()
        })
        .await
        .unwrap();
    assert_eq!(id, 2);
    assert_eq!(modem.phonebook_entries(0).len(), 4);
}

// ── Channels ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_logical_channels_are_tracked() {
    let modem = SimulatedModem::new(1).with_card(0, &image()).unwrap();
    let ril = modem.ril(0);

    let opened = ril.open_logical_channel(USIM_AID.into(), 0).await.unwrap();
    assert_eq!(modem.open_channels(), vec![opened.channel]);

    ril.close_logical_channel(opened.channel).await.unwrap();
    assert!(modem.open_channels().is_empty());
    assert!(ril.close_logical_channel(opened.channel).await.is_err());
}
