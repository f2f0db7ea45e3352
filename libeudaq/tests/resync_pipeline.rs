use std::path::Path;
use std::sync::mpsc::channel;

use libeudaq::constants::*;
use libeudaq::error::ResyncError;
use libeudaq::event::{Event, EventSp};
use libeudaq::io::FileBackends;
use libeudaq::resync::{process, Mode, ResyncConfig};
use libeudaq::worker_status::Stage;

const N: u32 = 60;
/// Packet from which the DUT module is one event ahead of the DAQ.
const SLIP: u32 = 20;

/// 3 bit BCIDs of triggers 0..=N.
fn bcids() -> Vec<u32> {
    let mut x: u32 = 7;
    (0..=N)
        .map(|_| {
            x = x.wrapping_mul(1103515245).wrapping_add(12345) & 0x7fff_ffff;
            (x >> 16) & 7
        })
        .collect()
}

fn sub(description: &str, trigger: u32, bcid: Option<u32>) -> Event {
    let mut ev = Event::raw(description);
    ev.set_trigger_n(trigger);
    ev.set_tag("SRC.TRIGGER", trigger);
    if let Some(bcid) = bcid {
        ev.add_block(0, bcid.to_le_bytes().to_vec()).unwrap();
    }
    ev
}

fn write_input(path: &Path) {
    let bcid = bcids();
    let backends = FileBackends::with_defaults().unwrap();
    let mut writer = backends.open_writer(path).unwrap();
    for i in 0..N {
        let module = if i < SLIP { i } else { i + 1 };
        let mut ev = Event::base("syncEvent");
        ev.set_run_n(42);
        ev.set_event_n(i);
        ev.add_sub_event(sub(DSP_ABC_TIMING, i, Some(bcid[i as usize])));
        ev.add_sub_event(sub(DSP_TTC_TIMING, i, Some(bcid[i as usize])));
        ev.add_sub_event(sub(DSP_ABC_DUT, module, Some(bcid[module as usize])));
        ev.add_sub_event(sub(DSP_TTC_DUT, i, Some(bcid[i as usize])));
        ev.add_sub_event(sub(DSP_TELESCOPE, i, None));
        ev.add_sub_event(sub(DSP_TLU, i, None));
        ev.add_sub_event(sub(DSP_REFERENCE, i, None));
        ev.set_flag_packet().unwrap();
        writer.write(&ev).unwrap();
    }
    writer.flush().unwrap();
}

fn read_all(path: &Path) -> Vec<EventSp> {
    let backends = FileBackends::with_defaults().unwrap();
    let mut reader = backends.open_reader(path).unwrap();
    let mut events = Vec::new();
    while let Some(ev) = reader.read().unwrap() {
        events.push(ev);
    }
    events
}

fn source_trigger(packet: &Event, description: &str) -> Option<u32> {
    packet
        .sub_events()
        .iter()
        .find(|s| s.description() == description)
        .map(|s| s.tag("SRC.TRIGGER", u32::MAX))
}

#[test]
fn combined_resync_realigns_dut() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("run000042.raw");
    let output = dir.path().join("sync000042.raw");
    write_input(&input);

    let config = ResyncConfig {
        input_path: input,
        output_path: Some(output.clone()),
        ..Default::default()
    };
    let (tx, rx) = channel();
    let summary = process(config, tx, 3).unwrap();

    let dut = summary.dut.as_ref().unwrap();
    assert_eq!(dut.n_resyncs, 1);
    assert_eq!(dut.n_synced, (N - 1) as usize);
    assert_eq!(summary.timing.as_ref().unwrap().n_synced, N as usize);
    assert_eq!(summary.events, N as usize);
    assert_eq!(summary.lost_events, 0);
    assert_eq!(summary.total_sync, (N - 1) as usize);
    assert_eq!(summary.original_sync, SLIP as usize);
    assert_eq!(summary.written, (N - 1) as usize);

    let packets = read_all(&output);
    assert_eq!(packets.len(), (N - 1) as usize);
    for (n, packet) in packets.iter().enumerate() {
        assert_eq!(packet.event_n(), n as u32);
        assert_eq!(packet.run_n(), 42);
        assert!(packet.is_flag_packet());
        let tlu = source_trigger(packet, DSP_TLU).unwrap();
        assert_eq!(packet.trigger_n(), tlu);
        for description in [DSP_ABC_DUT, DSP_TTC_DUT, DSP_ABC_TIMING, DSP_TELESCOPE] {
            assert_eq!(source_trigger(packet, description), Some(tlu));
        }
        assert!(packet.sub_events().iter().all(|s| s.trigger_n() == tlu));
    }
    // trigger 20 lost its module data
    assert!(packets
        .iter()
        .all(|p| source_trigger(p, DSP_TLU) != Some(SLIP)));

    let statuses: Vec<_> = rx.try_iter().collect();
    assert!(statuses.iter().all(|s| s.worker_id == 3));
    let last = statuses.last().unwrap();
    assert_eq!(last.stage, Stage::Write);
    assert_eq!(last.progress, 1.0);
    assert_eq!(last.run_number, 42);
}

#[test]
fn timing_only_ignores_dut() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("run000042.raw");
    write_input(&input);
    let config = ResyncConfig {
        input_path: input,
        output_path: None,
        mode: Mode::TimingOnly,
        ..Default::default()
    };
    let (tx, _rx) = channel();
    let summary = process(config, tx, 0).unwrap();
    assert!(summary.dut.is_none());
    assert_eq!(summary.total_sync, N as usize);
    assert_eq!(summary.original_sync, N as usize);
    assert_eq!(summary.written, 0);
}

#[test]
fn empty_input_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("empty.raw");
    let backends = FileBackends::with_defaults().unwrap();
    let mut writer = backends.open_writer(&input).unwrap();
    writer.flush().unwrap();
    drop(writer);

    let config = ResyncConfig {
        input_path: input,
        ..Default::default()
    };
    let (tx, _rx) = channel();
    assert!(matches!(process(config, tx, 0), Err(ResyncError::NoEvents)));
}
