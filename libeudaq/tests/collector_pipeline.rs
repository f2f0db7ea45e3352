use std::sync::Arc;

use libeudaq::collector::{builtin_builders, DataCollector};
use libeudaq::config::Configuration;
use libeudaq::converter::StdEventDispatcher;
use libeudaq::converters::builtin_registry;
use libeudaq::event::{Event, EventSp};
use libeudaq::io::FileBackends;

/// A 4x2 Ex0 frame in block `block` with a single hit at (x, 1).
fn ex0_event(block: u32, trigger: u32, x: u8, bore: bool) -> EventSp {
    let mut ev = Event::raw("Ex0Raw");
    ev.set_trigger_n(trigger);
    ev.set_timestamp(trigger as u64 * 100, trigger as u64 * 100 + 25);
    let mut frame = vec![4u8, 2];
    frame.extend(std::iter::repeat(0).take(8));
    frame[2 + 4 + x as usize] = 9;
    ev.add_block(block, frame).unwrap();
    if bore {
        ev.set_bore();
    }
    Arc::new(ev)
}

#[test]
fn collect_write_and_convert() {
    let dir = tempfile::tempdir().unwrap();
    let backends = Arc::new(FileBackends::with_defaults().unwrap());
    let dc = DataCollector::new("dc1", Arc::new(builtin_builders().unwrap()))
        .with_file_backends(backends.clone());

    let mut conf = Configuration::new();
    conf.set("EventBuilder", "TriggerN");
    conf.set(
        "FilePattern",
        dir.path().join("run$6R$X").to_string_lossy(),
    );
    dc.configure(Arc::new(conf)).unwrap();
    let telescope = dc.connect("telescope").unwrap();
    let dut = dc.connect("dut").unwrap();
    let rx = dc.start_run(12).unwrap();

    for tg in 0..10 {
        dc.receive(telescope, ex0_event(0, tg, (tg % 4) as u8, tg == 0))
            .unwrap();
        // the DUT misses trigger 5
        if tg != 5 {
            dc.receive(dut, ex0_event(1, tg, 3, tg == 0)).unwrap();
        }
    }
    let status = dc.stop_run().unwrap();
    assert_eq!(status.events_built, 9);
    assert_eq!(status.events_dropped, 1);
    assert_eq!(status.tags.get("RUN", 0u32), 12);
    assert!(status.tags.get("FILEBYTES", 0u64) > 0);

    let built: Vec<EventSp> = rx.iter().collect();
    assert_eq!(built.len(), 9);
    let event_ns: Vec<u32> = built.iter().map(|e| e.event_n()).collect();
    assert_eq!(event_ns, (0..9).collect::<Vec<_>>());
    assert_eq!(built[5].trigger_n(), 6);
    assert_eq!(built[5].timestamp_begin(), 600);

    let dispatcher = StdEventDispatcher::new(Arc::new(builtin_registry().unwrap()), None);
    for ev in &built {
        let std = dispatcher.to_standard(ev).unwrap();
        assert_eq!(std.num_planes(), 2);
        assert_eq!(std.trigger_n(), ev.trigger_n());
        assert!(!std.is_flag_packet());
        let telescope_plane = std.plane_by_id(0).unwrap();
        assert_eq!(telescope_plane.hit_pixels(0), 1);
        let hit = &telescope_plane.hits(0).unwrap()[0];
        assert_eq!((hit.x, hit.y), (ev.trigger_n() % 4, 1));
    }

    let path = dir.path().join("run000012.raw");
    let mut reader = backends.open_reader(&path).unwrap();
    let mut from_file = Vec::new();
    while let Some(ev) = reader.read().unwrap() {
        from_file.push(ev);
    }
    assert_eq!(from_file.len(), built.len());
    for (a, b) in from_file.iter().zip(built.iter()) {
        assert_eq!(a.as_ref(), b.as_ref());
    }
    assert!((reader.progress() - 1.0).abs() < 1e-6);
}

#[test]
fn timestamp_builder_from_config_file() {
    let dir = tempfile::tempdir().unwrap();
    let ini = dir.path().join("beam.conf");
    std::fs::write(
        &ini,
        "Name = beam\n[DataCollector.dc2]\nEventBuilder = Timestamp ; merge by time\n",
    )
    .unwrap();
    let conf = Configuration::read_file(&ini)
        .unwrap()
        .with_section("DataCollector.dc2");
    let dc = DataCollector::new("dc2", Arc::new(builtin_builders().unwrap()));
    dc.configure(Arc::new(conf)).unwrap();
    let a = dc.connect("a").unwrap();
    let b = dc.connect("b").unwrap();
    let rx = dc.start_run(1).unwrap();
    for (id, block) in [(a, 0), (b, 1)] {
        dc.receive(id, ex0_event(block, 0, 0, true)).unwrap();
        dc.receive(id, ex0_event(block, 1, 0, false)).unwrap();
    }
    dc.stop_run().unwrap();
    let built: Vec<EventSp> = rx.iter().collect();
    assert_eq!(built.len(), 2);
    assert_eq!(built[1].timestamp_end(), 125);
}
