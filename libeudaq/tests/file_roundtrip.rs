use std::path::Path;

use libeudaq::error::FileIOError;
use libeudaq::event::Event;
use libeudaq::io::{expand_file_pattern, FileBackends};
use libeudaq::selection::{read_to_end, EventSelection, ReaderStats};

fn packet(event_n: u32) -> Event {
    let mut ev = Event::base("syncEvent");
    ev.set_event_n(event_n);
    ev.set_run_n(7);
    let mut sub = Event::raw("Ex0Raw");
    sub.set_trigger_n(event_n + 100);
    sub.set_tag("TEMP", 21.5);
    sub.add_block(0, vec![2, 1, 0, 1]).unwrap();
    ev.add_sub_event(sub);
    ev.add_sub_event(Event::raw_data("TluRawDataEvent"));
    ev.set_flag_packet().unwrap();
    ev
}

fn write_file(backends: &FileBackends, path: &Path, n: u32) -> u64 {
    let mut writer = backends.open_writer(path).unwrap();
    for i in 0..n {
        writer.write(&packet(i)).unwrap();
    }
    writer.flush().unwrap();
    writer.file_bytes()
}

#[test]
fn native_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let backends = FileBackends::with_defaults().unwrap();
    let path = dir.path().join(expand_file_pattern("run$6R$X", 7));
    let bytes = write_file(&backends, &path, 20);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), bytes);

    let mut reader = backends.open_reader(&path).unwrap();
    for i in 0..20 {
        let ev = reader.read().unwrap().unwrap();
        assert_eq!(*ev, packet(i));
        assert_eq!(ev.sub_event(0).unwrap().tag("TEMP", 0.0), 21.5);
        assert_eq!(ev.sub_event(1).unwrap().sub_type(), Some("TluRawDataEvent"));
    }
    assert!(reader.read().unwrap().is_none());
}

#[test]
fn truncated_file_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let backends = FileBackends::with_defaults().unwrap();
    let path = dir.path().join("cut.raw");
    let bytes = write_file(&backends, &path, 3);
    let mut data = std::fs::read(&path).unwrap();
    data.truncate(bytes as usize - 5);
    std::fs::write(&path, data).unwrap();

    let mut reader = backends.open_reader(&path).unwrap();
    assert!(reader.read().unwrap().is_some());
    assert!(reader.read().unwrap().is_some());
    assert!(matches!(reader.read(), Err(FileIOError::BadRecord(_))));
}

#[test]
fn bad_magic_and_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let backends = FileBackends::with_defaults().unwrap();
    let path = dir.path().join("junk.raw");
    std::fs::write(&path, b"NOPE\x01\x00\x00\x00").unwrap();
    let mut reader = backends.open_reader(&path).unwrap();
    assert!(matches!(reader.read(), Err(FileIOError::BadMagic(m)) if &m == b"NOPE"));

    let mut reader = backends
        .open_reader(&dir.path().join("absent.raw"))
        .unwrap();
    assert!(matches!(reader.read(), Err(FileIOError::BadFilePath(_))));
}

#[test]
fn lower_bound_alone_reads_whole_file() {
    let dir = tempfile::tempdir().unwrap();
    let backends = FileBackends::with_defaults().unwrap();
    let path = dir.path().join("run000007.raw");
    write_file(&backends, &path, 12);

    let selection = EventSelection::from_bounds((5, 0), (0, 0), (0, 0));
    let mut reader = backends.open_reader(&path).unwrap();
    let mut stats = ReaderStats::default();
    let mut selected = Vec::new();
    let mut last_progress = 0.0;
    let count = read_to_end(reader.as_mut(), &mut stats, |ev, progress| {
        if selection.accepts(ev) {
            selected.push(ev.event_n());
        }
        last_progress = progress;
        Ok::<(), FileIOError>(())
    })
    .unwrap();
    assert_eq!(count, 12);
    assert_eq!(stats.events, 12);
    assert_eq!(selected, (5..12).collect::<Vec<_>>());
    // the TLU sub-event carries no trigger number
    assert_eq!(stats.trigger_low, Some(0));
    assert_eq!(stats.trigger_high, Some(111));
    assert!((last_progress - 1.0).abs() < 1e-6);
}
