mod common;

use common::*;
use wlc_charger::charger::{ChargerPhase, RtxError, RtxFault, RtxState};
use wlc_charger::event::{ChargerEvent, EventQueue, VotableId};
use wlc_charger::irq::{bits, ProprietaryPacket};
use wlc_charger::schedule::TaskKind;
use wlc_charger::transport::ChipVariant;
use wlc_charger::votable::{VoteRegistry, VoteRule, DC_ICL, DC_SUSPEND, THERMAL_DAEMON_VOTER, TX_ICL};
use wlc_charger::ChargerConfig;

fn rtx_config() -> ChargerConfig {
    ChargerConfig {
        rtx_supported: true,
        ..ChargerConfig::default()
    }
}

#[test]
fn refused_while_receiving() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    let t = bring_online(&mut charger, &bus, ms(0));
    journal.clear();

    assert_eq!(charger.set_rtx(true, t), Err(RtxError::ReceiveSessionOnline));
    assert_eq!(charger.rtx_state(), RtxState::Disabled);
    assert!(!charger.board().rtx_outputs);
    assert_eq!(votes.effective(DC_SUSPEND), Ok(None));
    assert!(journal.entries().is_empty());
}

#[test]
fn dc_input_claimed_before_outputs() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));
    journal.clear();

    charger.set_rtx(true, ms(10)).unwrap();
    assert_eq!(charger.rtx_state(), RtxState::Active);
    assert!(bus.lock(|c| c.tx_mode));
    assert_eq!(bus.lock(|c| c.enabled_irqs), bits::RTX_MASK);
    assert!(!charger.online_status());

    let suspend = journal.position("DC_SUSPEND Some(1)").unwrap();
    let outputs = journal.position("rtx_outputs true").unwrap();
    assert!(suspend < outputs);

    journal.clear();
    charger.set_rtx(false, ms(20)).unwrap();
    assert_eq!(charger.rtx_state(), RtxState::Disabled);
    assert!(!bus.lock(|c| c.tx_mode));

    let outputs = journal.position("rtx_outputs false").unwrap();
    let released = journal.position("DC_SUSPEND None").unwrap();
    assert!(outputs < released);
}

#[test]
fn transmit_mode_failure_unwinds() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    bus.lock(|c| c.tx_mode_fails = true);
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    assert!(matches!(charger.set_rtx(true, ms(10)), Err(RtxError::TransmitMode(_))));
    assert_eq!(charger.rtx_state(), RtxState::Disabled);
    assert!(!charger.board().rtx_outputs);
    assert_eq!(votes.effective(DC_SUSPEND), Ok(None));
}

#[test]
fn conflict_tears_down() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    charger.set_rtx(true, ms(10)).unwrap();
    raise(&mut charger, &bus, bits::TX_CONFLICT, ms(20));

    assert_eq!(charger.rtx_state(), RtxState::Disabled);
    assert_eq!(charger.rtx_fault(), RtxFault::TxConflict);
    assert!(!charger.board().rtx_outputs);
    assert_eq!(votes.effective(DC_SUSPEND), Ok(None));
}

#[test]
fn receiver_id_broadcast_is_debounced() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    charger.set_rtx(true, ms(0)).unwrap();
    bus.lock(|c| c.status |= bits::RX_CONNECTED);

    raise(&mut charger, &bus, bits::RX_CONNECTED, ms(100));
    assert!(charger.rtx_rx_connected());
    raise(&mut charger, &bus, bits::RX_CONNECTED, ms(600));

    charger.poll(ms(1200));
    assert!(bus.lock(|c| c.sent_pp.is_empty()));

    charger.poll(ms(1600));
    let sent = bus.lock(|c| c.sent_pp.clone());
    assert_eq!(sent, vec![ProprietaryPacket::encode_tx_id(0x12_1212).to_vec()]);
    assert!(!charger.tasks().is_pending(TaskKind::TxIdBroadcast));
}

#[test]
fn disconnect_resets_level() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    charger.set_rtx(true, ms(0)).unwrap();
    bus.lock(|c| {
        c.status |= bits::RX_CONNECTED;
        c.rtx_csp_level = 42;
    });
    raise(&mut charger, &bus, bits::RX_CONNECTED | bits::CSP, ms(100));
    assert_eq!(charger.rtx_level(), 42);

    bus.lock(|c| c.status &= !bits::RX_CONNECTED);
    raise(&mut charger, &bus, bits::RX_CONNECTED, ms(200));
    assert_eq!(charger.rtx_level(), 0);
    assert!(!charger.rtx_rx_connected());
    assert!(!charger.tasks().is_pending(TaskKind::TxIdBroadcast));
}

#[test]
fn thermal_zero_limit_disables_with_fault() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    charger.set_rtx(true, ms(0)).unwrap();

    votes.vote(TX_ICL, THERMAL_DAEMON_VOTER, true, 800).unwrap();
    vote_changed(&mut charger, VotableId::TxIcl, votes.effective(TX_ICL).unwrap(), ms(10));
    assert_eq!(bus.lock(|c| c.tx_ilim_ma), Some(800));

    votes.vote(TX_ICL, THERMAL_DAEMON_VOTER, true, 0).unwrap();
    vote_changed(&mut charger, VotableId::TxIcl, Some(0), ms(20));

    assert_eq!(charger.rtx_state(), RtxState::Disabled);
    assert_eq!(charger.rtx_fault(), RtxFault::OverTemp);
    assert_eq!(charger.set_rtx(true, ms(30)), Err(RtxError::AdministrativelyDisabled));
    assert_eq!(charger.rtx_state(), RtxState::Disabled);
}

#[test]
fn receive_ignored_while_transmitting() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    charger.set_rtx(true, ms(0)).unwrap();
    bus.lock(|c| c.status |= bits::VRECT | bits::VOUT);
    raise(&mut charger, &bus, bits::VRECT, ms(10));
    charger.poll(ms(500));

    assert_eq!(charger.phase(), ChargerPhase::Idle);
    assert_eq!(charger.rtx_state(), RtxState::Active);
}

#[test]
fn unsupported_variant_refuses() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9221));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    assert_eq!(charger.set_rtx(true, ms(0)), Err(RtxError::NotSupported));
}

#[test]
fn pending_dc_check_dropped_when_transmitting() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    charger.board_mut().dc_present = true;
    charger.handle_event(ChargerEvent::DcPresenceChanged, ms(0));
    assert!(charger.tasks().is_pending(TaskKind::NotifierCheck));

    charger.set_rtx(true, ms(50)).unwrap();
    assert!(!charger.tasks().is_pending(TaskKind::NotifierCheck));

    charger.poll(ms(100));
    charger.poll(ms(2000));
    assert_eq!(charger.phase(), ChargerPhase::Idle);
    assert_eq!(charger.rtx_state(), RtxState::Active);
}

#[test]
fn detect_in_progress_is_dropped_and_recovers() {
    let journal = Journal::default();
    let votes = registry(&journal);
    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));

    bus.lock(|c| c.status = bits::VRECT | bits::VOUT);
    raise(&mut charger, &bus, bits::VRECT, ms(0));
    assert_eq!(charger.phase(), ChargerPhase::Detecting);

    charger.set_rtx(true, ms(50)).unwrap();
    assert_eq!(charger.phase(), ChargerPhase::Idle);

    charger.poll(ms(100));
    assert_eq!(charger.phase(), ChargerPhase::Idle);
    assert_eq!(charger.rtx_state(), RtxState::Active);

    // once reverse power stops a new detect goes all the way
    charger.set_rtx(false, ms(200)).unwrap();
    raise(&mut charger, &bus, bits::VRECT, ms(300));
    assert_eq!(charger.phase(), ChargerPhase::Detecting);

    charger.poll(ms(400));
    assert_eq!(charger.phase(), ChargerPhase::Online);
}

#[test]
fn zero_limit_survives_full_event_queue() {
    let journal = Journal::default();
    let queue: EventQueue<Raw> = EventQueue::new();
    let mut votes = VoteRegistry::new();
    votes.create(DC_ICL, VoteRule::Min, Some(&journal)).unwrap();
    votes.create(TX_ICL, VoteRule::Min, Some(&queue)).unwrap();
    votes.create(DC_SUSPEND, VoteRule::Max, Some(&journal)).unwrap();

    let bus = Bus::new(MockChip::new(ChipVariant::P9412));
    let mut charger = charger(&bus, &votes, &journal, rtx_config(), ms(0));
    charger.set_rtx(true, ms(0)).unwrap();
    while let Some(event) = queue.try_receive() {
        charger.handle_event(event, ms(0));
    }

    // interrupts pile up faster than the runner drains them
    while queue.try_send(ChargerEvent::Interrupt).is_ok() {}
    votes.vote(TX_ICL, THERMAL_DAEMON_VOTER, true, 0).unwrap();

    while let Some(event) = queue.try_receive() {
        charger.handle_event(event, ms(10));
    }

    assert_eq!(charger.rtx_state(), RtxState::Disabled);
    assert_eq!(charger.rtx_fault(), RtxFault::OverTemp);
    assert!(!charger.board().rtx_outputs);
}
