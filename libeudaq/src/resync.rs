//! Offline re-synchronisation of strip module runs by BCID.
//!
//! The input is a file of merged packets whose sub-events are the strip modules' raw data
//! (`ITS_ABC_DUT`, `ITS_ABC_Timing`), the matching DAQ records (`ITS_TTC_DUT`,
//! `ITS_TTC_Timing`), the telescope, the TLU and a reference plane. Module readout can
//! slip by whole events, so the packets as written may pair the wrong module data with the
//! trigger.
//!
//! The first pass converts every packet and collects the four BCID streams. The module
//! streams are aligned against their DAQ streams with [`find_sync`], and in combined mode
//! the two alignments are intersected. The second pass re-reads the file, keeps only
//! sub-events lying in aligned blocks and re-packs them into `syncEvent` packets numbered
//! densely and carrying the TLU trigger number.
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::config::Configuration;
use super::constants::*;
use super::converter::StdEventDispatcher;
use super::converters::builtin_registry;
use super::correlator::{
    find_sync, in_global_sync, in_sync, is_valid, overlap_matcher, total_event_number,
    MatchBlock, Side, SyncParams, SyncReport,
};
use super::error::{ConfigError, CorrelatorError, ResyncError};
use super::event::{Event, EventSp};
use super::io::{FileBackends, FileReader};
use super::standard_event::StandardEvent;
use super::worker_status::{Stage, WorkerStatus};

/// Which module planes take part.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Mode {
    #[default]
    Combined,
    DutOnly,
    TimingOnly,
}

impl Mode {
    pub fn uses_dut(&self) -> bool {
        !matches!(self, Mode::TimingOnly)
    }

    pub fn uses_timing(&self) -> bool {
        !matches!(self, Mode::DutOnly)
    }
}

/// Re-synchroniser settings. Serialisable to YAML using serde and serde_yaml
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResyncConfig {
    pub input_path: PathBuf,
    pub output_path: Option<PathBuf>,
    pub mode: Mode,
    pub search_range: usize,
    pub min_run: usize,
    pub bcid_modulus: u32,
    /// Bits of the raw BCID kept by the converters
    pub bcid_width: u32,
    /// Converter configuration file (INI or YAML)
    pub converter_config: Option<PathBuf>,
    pub converter_section: Option<String>,
}

impl Default for ResyncConfig {
    fn default() -> Self {
        Self {
            input_path: PathBuf::from("None"),
            output_path: None,
            mode: Mode::Combined,
            search_range: DEFAULT_SEARCH_RANGE,
            min_run: MIN_MATCH_RUN,
            bcid_modulus: DEFAULT_ID_MODULUS,
            bcid_width: 3,
            converter_config: None,
            converter_section: None,
        }
    }
}

impl ResyncConfig {
    /// Read the configuration in a YAML file
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(config_path)?;
        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn sync_params(&self) -> SyncParams {
        SyncParams {
            modulus: self.bcid_modulus,
            range: self.search_range,
            min_run: self.min_run,
        }
    }

    /// The configuration handed to the converters. `BcidWidth` falls back to
    /// [`ResyncConfig::bcid_width`].
    pub fn converter_configuration(&self) -> Result<Configuration, ConfigError> {
        let mut conf = match &self.converter_config {
            Some(path) => Configuration::read_file(path)?,
            None => Configuration::new(),
        };
        if let Some(section) = &self.converter_section {
            conf = conf.with_section(section);
        }
        if !conf.has("BcidWidth") {
            conf.set("BcidWidth", self.bcid_width);
        }
        Ok(conf)
    }
}

pub const LOST_DUT: u8 = 0x8;
pub const LOST_DUT_DAQ: u8 = 0x4;
pub const LOST_TIMING: u8 = 0x2;
pub const LOST_TIMING_DAQ: u8 = 0x1;

/// The BCID streams of a file, one sample per packet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BcidStreams {
    pub dut: Vec<Option<u32>>,
    pub dut_daq: Vec<Option<u32>>,
    pub timing: Vec<Option<u32>>,
    pub timing_daq: Vec<Option<u32>>,
    /// Packet index to a mask of `LOST_*` bits for the samples it is missing.
    pub lost_markers: BTreeMap<usize, u8>,
    pub run_n: u32,
}

impl BcidStreams {
    pub fn push(&mut self, std: &StandardEvent, mode: Mode) {
        let tag = |key: &str| std.tags().try_get::<u32>(key);
        let samples = [
            (tag(TAG_DUT_BCID), LOST_DUT, mode.uses_dut()),
            (tag(TAG_DUT_DAQ_BCID), LOST_DUT_DAQ, mode.uses_dut()),
            (tag(TAG_TIMING_BCID), LOST_TIMING, mode.uses_timing()),
            (tag(TAG_TIMING_DAQ_BCID), LOST_TIMING_DAQ, mode.uses_timing()),
        ];
        let marker = samples
            .iter()
            .filter(|(sample, _, used)| *used && sample.is_none())
            .fold(0, |acc, (_, bit, _)| acc | bit);
        if marker != 0 {
            self.lost_markers.insert(self.dut.len(), marker);
        }
        self.dut.push(samples[0].0);
        self.dut_daq.push(samples[1].0);
        self.timing.push(samples[2].0);
        self.timing_daq.push(samples[3].0);
    }

    pub fn len(&self) -> usize {
        self.dut.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dut.is_empty()
    }
}

/// First pass: convert every packet of `reader` and collect its BCID samples. Sub-events
/// are converted one by one so a detector without a converter does not hide the others.
pub fn scan<F>(
    reader: &mut dyn FileReader,
    dispatcher: &StdEventDispatcher,
    mode: Mode,
    mut on_progress: F,
) -> Result<BcidStreams, ResyncError>
where
    F: FnMut(f32) -> Result<(), ResyncError>,
{
    let mut streams = BcidStreams::default();
    while let Some(event) = reader.read()? {
        if streams.is_empty() {
            streams.run_n = event.run_n();
        }
        let mut std = StandardEvent::new();
        let leaves: Vec<&Event> = if event.is_container() {
            event.sub_events().iter().map(|sub| sub.as_ref()).collect()
        } else {
            vec![event.as_ref()]
        };
        for leaf in leaves {
            if let Err(e) = dispatcher.convert(leaf, &mut std) {
                spdlog::trace!("Event {}: {}", event.event_n(), e);
            }
        }
        streams.push(&std, mode);
        on_progress(reader.progress())?;
    }
    Ok(streams)
}

/// Which parts of a packet lie inside aligned blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Validity {
    pub daq: bool,
    pub dut: bool,
    pub timing: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Correlation {
    pub mode: Mode,
    pub dut: Option<SyncReport>,
    pub timing: Option<SyncReport>,
    /// DUT blocks restricted to DAQ indices also aligned for the timing plane
    pub overlaps_dut: Vec<MatchBlock>,
    pub overlaps_timing: Vec<MatchBlock>,
}

fn blocks(report: &Option<SyncReport>) -> &[MatchBlock] {
    report.as_ref().map(|r| r.blocks.as_slice()).unwrap_or(&[])
}

impl Correlation {
    pub fn compute(
        streams: &BcidStreams,
        mode: Mode,
        params: &SyncParams,
    ) -> Result<Self, CorrelatorError> {
        let dut = mode
            .uses_dut()
            .then(|| find_sync(&streams.dut, &streams.dut_daq, params))
            .transpose()?;
        let timing = mode
            .uses_timing()
            .then(|| find_sync(&streams.timing, &streams.timing_daq, params))
            .transpose()?;
        let (overlaps_dut, overlaps_timing) = match mode {
            Mode::Combined => (
                overlap_matcher(blocks(&dut), blocks(&timing)),
                overlap_matcher(blocks(&timing), blocks(&dut)),
            ),
            _ => (Vec::new(), Vec::new()),
        };
        Ok(Self {
            mode,
            dut,
            timing,
            overlaps_dut,
            overlaps_timing,
        })
    }

    /// Validity of packet `n`.
    pub fn validity(&self, n: usize) -> Validity {
        match self.mode {
            Mode::Combined => Validity {
                daq: is_valid(&self.overlaps_dut, Side::Reference, n),
                dut: is_valid(&self.overlaps_dut, Side::Stream, n),
                timing: is_valid(&self.overlaps_timing, Side::Stream, n),
            },
            Mode::DutOnly => Validity {
                daq: is_valid(blocks(&self.dut), Side::Reference, n),
                dut: is_valid(blocks(&self.dut), Side::Stream, n),
                timing: false,
            },
            Mode::TimingOnly => Validity {
                daq: is_valid(blocks(&self.timing), Side::Reference, n),
                dut: false,
                timing: is_valid(blocks(&self.timing), Side::Stream, n),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    AbcTiming,
    TtcTiming,
    AbcDut,
    TtcDut,
    Telescope,
    Tlu,
    Reference,
}

impl Slot {
    fn for_description(description: &str) -> Option<Self> {
        match description {
            DSP_ABC_TIMING => Some(Slot::AbcTiming),
            DSP_TTC_TIMING => Some(Slot::TtcTiming),
            DSP_ABC_DUT => Some(Slot::AbcDut),
            DSP_TTC_DUT => Some(Slot::TtcDut),
            DSP_TELESCOPE => Some(Slot::Telescope),
            DSP_TLU => Some(Slot::Tlu),
            DSP_REFERENCE => Some(Slot::Reference),
            _ => None,
        }
    }

    fn accepts(&self, valid: Validity) -> bool {
        match self {
            Slot::AbcDut => valid.dut,
            Slot::AbcTiming => valid.timing,
            _ => valid.daq,
        }
    }
}

/// Second pass state: per-detector queues of sub-events waiting to be re-packed.
#[derive(Debug)]
pub struct Router {
    mode: Mode,
    run_n: u32,
    queues: [VecDeque<EventSp>; 7],
    event_count: u32,
}

impl Router {
    pub fn new(mode: Mode, run_n: u32) -> Self {
        Self {
            mode,
            run_n,
            queues: Default::default(),
            event_count: 0,
        }
    }

    fn queue(&mut self, slot: Slot) -> &mut VecDeque<EventSp> {
        &mut self.queues[slot as usize]
    }

    /// Queue the sub-events of `event` that are valid.
    pub fn route(&mut self, event: &Event, valid: Validity) {
        for sub in event.sub_events() {
            match Slot::for_description(sub.description()) {
                Some(slot) if slot.accepts(valid) => self.queue(slot).push_back(sub.clone()),
                Some(_) => (),
                None => spdlog::trace!("Ignoring sub-event {}", sub.description()),
            }
        }
    }

    /// The next re-synchronised packet, once module data and a TLU record are queued.
    pub fn next_packet(&mut self) -> Option<Event> {
        let dut_ready = !self.mode.uses_dut() || !self.queue(Slot::AbcDut).is_empty();
        let timing_ready = !self.mode.uses_timing() || !self.queue(Slot::AbcTiming).is_empty();
        if !dut_ready || !timing_ready {
            return None;
        }
        let tlu = self.queue(Slot::Tlu).pop_front()?;
        let trigger = tlu.trigger_n();

        let mut order = Vec::with_capacity(7);
        if self.mode.uses_timing() {
            order.extend([Slot::AbcTiming, Slot::TtcTiming]);
        }
        if self.mode.uses_dut() {
            order.extend([Slot::AbcDut, Slot::TtcDut]);
        }
        order.extend([Slot::Telescope, Slot::Tlu, Slot::Reference]);

        let mut packet = Event::packet("syncEvent");
        for slot in order {
            let sub = match slot {
                Slot::Tlu => Some(tlu.clone()),
                _ => self.queue(slot).pop_front(),
            };
            if let Some(sub) = sub {
                let mut sub = Event::clone(&sub);
                sub.set_trigger_n(trigger);
                packet.add_sub_event(sub);
            }
        }
        packet.set_run_n(self.run_n);
        packet.set_trigger_n(trigger);
        packet.set_event_n(self.event_count);
        self.event_count += 1;
        Some(packet)
    }

    /// Sub-events still queued.
    pub fn leftover(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }
}

/// Statistics of a re-synchronisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncSummary {
    pub mode: Mode,
    pub events: usize,
    pub lost_events: usize,
    pub dut: Option<SyncReport>,
    pub timing: Option<SyncReport>,
    /// Shorter length of each stream pair
    pub dut_pair_len: usize,
    pub timing_pair_len: usize,
    /// Events that can be synchronised
    pub total_sync: usize,
    /// Events that were in sync without any shift
    pub original_sync: usize,
    pub dut_sync: usize,
    pub timing_sync: usize,
    pub overlaps_dut: usize,
    pub overlaps_timing: usize,
    pub written: usize,
    pub leftover: usize,
}

fn percent(num: usize, denom: usize) -> f64 {
    match denom {
        0 => 0.0,
        _ => num as f64 / denom as f64 * 100.0,
    }
}

impl ResyncSummary {
    pub fn new(streams: &BcidStreams, correlation: &Correlation) -> Self {
        let mut summary = Self {
            mode: correlation.mode,
            events: streams.len(),
            lost_events: streams.lost_markers.len(),
            dut: correlation.dut.clone(),
            timing: correlation.timing.clone(),
            dut_pair_len: streams.dut.len().min(streams.dut_daq.len()),
            timing_pair_len: streams.timing.len().min(streams.timing_daq.len()),
            overlaps_dut: correlation.overlaps_dut.len(),
            overlaps_timing: correlation.overlaps_timing.len(),
            ..Default::default()
        };
        let dut = blocks(&correlation.dut);
        let timing = blocks(&correlation.timing);
        match correlation.mode {
            Mode::Combined => {
                summary.total_sync = total_event_number(&correlation.overlaps_dut);
                summary.original_sync =
                    in_global_sync(&correlation.overlaps_dut, &correlation.overlaps_timing);
                summary.dut_sync = in_sync(dut);
                summary.timing_sync = in_sync(timing);
            }
            Mode::DutOnly => {
                summary.total_sync = total_event_number(dut);
                summary.original_sync = in_sync(dut);
                summary.dut_sync = summary.original_sync;
            }
            Mode::TimingOnly => {
                summary.total_sync = total_event_number(timing);
                summary.original_sync = in_sync(timing);
                summary.timing_sync = summary.original_sync;
            }
        }
        summary
    }
}

impl fmt::Display for ResyncSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let planes = [
            ("DUT", &self.dut, self.dut_pair_len, self.dut_sync),
            ("Timing", &self.timing, self.timing_pair_len, self.timing_sync),
        ];
        for (name, report, pair_len, start_sync) in planes {
            if let Some(report) = report {
                writeln!(
                    f,
                    "{name}: {} events in sync, efficiency {:.3}% -- in sync to start with: {} events, efficiency {:.3}% -- {} resyncs, {} phase losses, dropped {}/{}",
                    report.n_synced,
                    percent(report.n_synced, pair_len),
                    start_sync,
                    percent(start_sync, pair_len),
                    report.n_resyncs,
                    report.n_phase_loss,
                    report.n_dropped1,
                    report.n_dropped2
                )?;
            }
        }
        writeln!(
            f,
            "Total events: {} lost: {}, efficiency {:.3}% -- synchronisable: {}, efficiency {:.3}% -- in sync originally: {}, efficiency {:.3}%",
            self.events,
            self.lost_events,
            percent(self.events - self.lost_events, self.events),
            self.total_sync,
            percent(self.total_sync, self.events),
            self.original_sync,
            percent(self.original_sync, self.events)
        )?;
        if self.mode == Mode::Combined {
            writeln!(
                f,
                "Overlapping blocks, DUT: {} Timing: {}",
                self.overlaps_dut, self.overlaps_timing
            )?;
        }
        write!(f, "Written: {} events, {} sub-events left unmatched", self.written, self.leftover)
    }
}

/// Rate limited progress reporting to the front end.
struct Progress<'a> {
    tx: &'a Sender<WorkerStatus>,
    worker_id: usize,
    run_number: u32,
    stage: Stage,
    last: f32,
}

impl<'a> Progress<'a> {
    const STEP: f32 = 0.01;

    fn new(tx: &'a Sender<WorkerStatus>, worker_id: usize, run_number: u32, stage: Stage) -> Self {
        Self {
            tx,
            worker_id,
            run_number,
            stage,
            last: 0.0,
        }
    }

    fn send(&self, progress: f32) -> Result<(), ResyncError> {
        self.tx.send(WorkerStatus::new(
            progress,
            self.run_number,
            self.worker_id,
            self.stage,
        ))?;
        Ok(())
    }

    fn update(&mut self, progress: f32) -> Result<(), ResyncError> {
        if progress - self.last >= Self::STEP {
            self.last = progress;
            self.send(progress)?;
        }
        Ok(())
    }
}

/// Second pass: write the re-synchronised packets. Returns packets written and sub-events
/// left queued.
fn write_synced(
    config: &ResyncConfig,
    backends: &FileBackends,
    correlation: &Correlation,
    run_n: u32,
    output: &Path,
    progress: &mut Progress,
) -> Result<(usize, usize), ResyncError> {
    let mut reader = backends.open_reader(&config.input_path)?;
    let mut writer = backends.open_writer(output)?;
    let mut router = Router::new(config.mode, run_n);
    let mut index = 0;
    let mut written = 0;
    while let Some(event) = reader.read()? {
        router.route(&event, correlation.validity(index));
        index += 1;
        while let Some(packet) = router.next_packet() {
            writer.write(&packet)?;
            written += 1;
        }
        progress.update(reader.progress())?;
    }
    writer.flush()?;
    spdlog::info!(
        "Wrote {} events ({}) to {}",
        written,
        human_bytes::human_bytes(writer.file_bytes() as f64),
        output.display()
    );
    Ok((written, router.leftover()))
}

/// Re-synchronise one file.
pub fn resync(
    config: &ResyncConfig,
    backends: &FileBackends,
    dispatcher: &StdEventDispatcher,
    tx: &Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<ResyncSummary, ResyncError> {
    let params = config.sync_params();
    params.validate()?;

    spdlog::info!("Scanning {} for BCIDs...", config.input_path.display());
    let mut reader = backends.open_reader(&config.input_path)?;
    let mut progress = Progress::new(tx, worker_id, 0, Stage::Scan);
    progress.send(0.0)?;
    let streams = scan(reader.as_mut(), dispatcher, config.mode, |p| progress.update(p))?;
    progress.send(1.0)?;
    if streams.is_empty() {
        return Err(ResyncError::NoEvents);
    }
    spdlog::info!(
        "Found {} events in run {}, {} with missing BCIDs",
        streams.len(),
        streams.run_n,
        streams.lost_markers.len()
    );

    let correlation = Correlation::compute(&streams, config.mode, &params)?;
    let mut summary = ResyncSummary::new(&streams, &correlation);

    if let Some(output) = &config.output_path {
        spdlog::info!("Writing re-synchronised events...");
        let mut progress = Progress::new(tx, worker_id, streams.run_n, Stage::Write);
        progress.send(0.0)?;
        let (written, leftover) = write_synced(
            config,
            backends,
            &correlation,
            streams.run_n,
            output,
            &mut progress,
        )?;
        progress.send(1.0)?;
        summary.written = written;
        summary.leftover = leftover;
    }
    Ok(summary)
}

/// The function to be called by a worker thread: builds the default backends and converters
/// and runs [`resync`].
pub fn process(
    config: ResyncConfig,
    tx: Sender<WorkerStatus>,
    worker_id: usize,
) -> Result<ResyncSummary, ResyncError> {
    let backends = FileBackends::with_defaults()?;
    let converter_config = config.converter_configuration()?;
    let dispatcher =
        StdEventDispatcher::new(Arc::new(builtin_registry()?), Some(Arc::new(converter_config)));
    resync(&config, &backends, &dispatcher, &tx, worker_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(description: &str, trigger: u32) -> Event {
        let mut ev = Event::raw(description);
        ev.set_trigger_n(trigger);
        ev
    }

    fn packet(subs: &[&str], trigger: u32) -> Event {
        let mut ev = Event::base("syncEvent");
        ev.set_flag_packet().unwrap();
        for description in subs {
            ev.add_sub_event(sub(description, trigger));
        }
        ev
    }

    const ALL: [&str; 7] = [
        DSP_ABC_TIMING,
        DSP_TTC_TIMING,
        DSP_ABC_DUT,
        DSP_TTC_DUT,
        DSP_TELESCOPE,
        DSP_TLU,
        DSP_REFERENCE,
    ];

    #[test]
    fn test_router_repacks_in_order() {
        let mut router = Router::new(Mode::Combined, 3);
        let valid = Validity {
            daq: true,
            dut: true,
            timing: true,
        };
        router.route(&packet(&ALL, 10), valid);
        let out = router.next_packet().unwrap();
        assert_eq!(out.event_n(), 0);
        assert_eq!(out.run_n(), 3);
        assert_eq!(out.trigger_n(), 10);
        let names: Vec<&str> = out.sub_events().iter().map(|s| s.description()).collect();
        assert_eq!(names, ALL.to_vec());
        assert!(router.next_packet().is_none());
        assert_eq!(router.leftover(), 0);
    }

    #[test]
    fn test_router_shifts_module_data() {
        let mut router = Router::new(Mode::DutOnly, 1);
        let daq_only = Validity {
            daq: true,
            dut: false,
            timing: false,
        };
        let dut_only = Validity {
            daq: false,
            dut: true,
            timing: false,
        };
        // DAQ side of packet 0 pairs with module data of packet 1
        router.route(&packet(&ALL, 100), daq_only);
        assert!(router.next_packet().is_none());
        router.route(&packet(&ALL, 101), dut_only);
        let out = router.next_packet().unwrap();
        assert_eq!(out.trigger_n(), 100);
        let abc = out
            .sub_events()
            .iter()
            .find(|s| s.description() == DSP_ABC_DUT)
            .unwrap();
        assert_eq!(abc.trigger_n(), 100);
        assert!(!out
            .sub_events()
            .iter()
            .any(|s| s.description() == DSP_ABC_TIMING));
    }

    #[test]
    fn test_lost_markers() {
        let mut streams = BcidStreams::default();
        let mut std = StandardEvent::new();
        std.set_tag(TAG_DUT_BCID, 1);
        std.set_tag(TAG_DUT_DAQ_BCID, 1);
        streams.push(&std, Mode::DutOnly);
        streams.push(&std, Mode::Combined);
        streams.push(&StandardEvent::new(), Mode::TimingOnly);
        assert_eq!(streams.len(), 3);
        assert_eq!(streams.dut[0], Some(1));
        assert_eq!(streams.timing[1], None);
        assert_eq!(streams.lost_markers.get(&0), None);
        assert_eq!(streams.lost_markers.get(&1), Some(&(LOST_TIMING | LOST_TIMING_DAQ)));
        assert_eq!(streams.lost_markers.get(&2), Some(&(LOST_TIMING | LOST_TIMING_DAQ)));
    }

    #[test]
    fn test_correlation_combined() {
        let ids: Vec<Option<u32>> = [1, 5, 2, 7, 3, 3, 0, 6]
            .iter()
            .map(|v| Some(*v))
            .collect();
        let streams = BcidStreams {
            dut: ids.clone(),
            dut_daq: ids.clone(),
            timing: ids.clone(),
            timing_daq: ids,
            ..Default::default()
        };
        let corr = Correlation::compute(&streams, Mode::Combined, &SyncParams::default()).unwrap();
        assert_eq!(corr.overlaps_dut, vec![MatchBlock::new(0, 0, 8)]);
        assert!(corr.validity(7).dut && corr.validity(7).timing && corr.validity(7).daq);
        assert!(!corr.validity(8).daq);
        let summary = ResyncSummary::new(&streams, &corr);
        assert_eq!(summary.total_sync, 8);
        assert_eq!(summary.original_sync, 8);
    }

    #[test]
    fn test_config_defaults() {
        let config = ResyncConfig::default();
        assert_eq!(config.sync_params(), SyncParams::default());
        let conf = config.converter_configuration().unwrap();
        assert_eq!(conf.get("BcidWidth", 0u32), 3);
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: ResyncConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back, config);
    }
}
