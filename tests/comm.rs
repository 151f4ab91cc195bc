mod common;

use common::*;
use wlc_charger::board::Notification;
use wlc_charger::irq::bits;
use wlc_charger::schedule::TaskKind;
use wlc_charger::transport::ChipVariant;
use wlc_charger::{ChargerConfig, ChargerError};

#[test]
fn send_needs_a_session() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, ChargerConfig::default(), ms(0));

    assert_eq!(charger.send_data(&[1, 2, 3], ms(0)), Err(ChargerError::NotOnline));
    assert_eq!(charger.peek(0x0000, &mut [0u8; 2]), Err(ChargerError::NotOnline));
}

#[test]
fn one_send_in_flight() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, ChargerConfig::default(), ms(0));
    let t = bring_online(&mut charger, &bus, ms(0));

    assert_eq!(charger.send_data(&[], t), Err(ChargerError::InvalidArgument));
    charger.send_data(&[1, 2, 3], t).unwrap();
    assert_eq!(charger.send_data(&[4], t), Err(ChargerError::Busy));
    assert!(charger.tasks().is_pending(TaskKind::TxTimeout));

    raise(&mut charger, &bus, bits::CC_SEND_BUSY, after(t, 10));
    assert!(!charger.tasks().is_pending(TaskKind::TxTimeout));
    assert_eq!(charger.board().notifications.last(), Some(&Notification::DataSent));

    charger.send_data(&[4], after(t, 20)).unwrap();
    assert_eq!(bus.lock(|c| c.sent_data.clone()), vec![vec![1, 2, 3], vec![4]]);
}

#[test]
fn send_times_out() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, ChargerConfig::default(), ms(0));
    let t = bring_online(&mut charger, &bus, ms(0));

    charger.send_data(&[1], t).unwrap();
    charger.poll(after(t, 1000));

    assert!(!charger.comm().tx_busy());
    charger.send_data(&[2], after(t, 1001)).unwrap();
}

#[test]
fn received_data_is_buffered() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, ChargerConfig::default(), ms(0));
    let t = bring_online(&mut charger, &bus, ms(0));

    assert_eq!(charger.received_data(), None);
    bus.lock(|c| c.rx_data = vec![0xAA, 0xBB]);
    raise(&mut charger, &bus, bits::CC_DATA_RECEIVED, t);

    assert_eq!(charger.received_data(), Some(&[0xAA, 0xBB][..]));
    assert_eq!(charger.board().notifications.last(), Some(&Notification::DataReceived));
}

#[test]
fn comm_reset_aborts_pending_send() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, ChargerConfig::default(), ms(0));
    let t = bring_online(&mut charger, &bus, ms(0));

    charger.send_data(&[1], t).unwrap();
    charger.cc_reset().unwrap();

    assert_eq!(bus.lock(|c| c.cc_resets), 1);
    assert!(!charger.comm().tx_busy());
    assert!(!charger.tasks().is_pending(TaskKind::TxTimeout));
}

#[test]
fn peek_and_poke_while_online() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, ChargerConfig::default(), ms(0));
    bring_online(&mut charger, &bus, ms(0));

    charger.poke(0x0080, &[0x12, 0x34]).unwrap();
    let mut buf = [0u8; 2];
    charger.peek(0x0080, &mut buf).unwrap();
    assert_eq!(buf, [0x12, 0x34]);
}
