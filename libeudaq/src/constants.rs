// Event flag bits. These values are part of the persisted event layout.
pub const FLAG_BORE: u32 = 0x1;
pub const FLAG_EORE: u32 = 0x2;
pub const FLAG_HITS: u32 = 0x4;
pub const FLAG_FAKE: u32 = 0x8;
pub const FLAG_SIMU: u32 = 0x10;
pub const FLAG_EUDAQ2: u32 = 0x20;
pub const FLAG_PACK: u32 = 0x40;
pub const FLAG_BROKEN: u32 = 0x80;
pub const FLAG_STATUS: u32 = 0x100;
pub const FLAG_TIME: u32 = 0x200;
pub const FLAG_TRIG: u32 = 0x400;

pub const EVENT_VERSION: u32 = 2;

// StandardPlane flag bits
pub const PLANE_FLAG_ZS: u32 = 0x1;
pub const PLANE_FLAG_NEEDCDS: u32 = 0x2;
pub const PLANE_FLAG_NEGATIVE: u32 = 0x4;
pub const PLANE_FLAG_ACCUMULATE: u32 = 0x8;
pub const PLANE_FLAG_WITHPIVOT: u32 = 0x10000;
pub const PLANE_FLAG_WITHSUBMAT: u32 = 0x20000;
pub const PLANE_FLAG_DIFFCOORDS: u32 = 0x40000;

// Correlator defaults, as used by the strip re-synchroniser
pub const DEFAULT_ID_MODULUS: u32 = 8;
pub const DEFAULT_SEARCH_RANGE: usize = 50;
pub const MIN_MATCH_RUN: usize = 4;

// Online BCID builder
pub const DEFAULT_BCID_TAG: &str = "BCID";
pub const DEFAULT_BCID_WINDOW: usize = 256;

// Native file format
pub const NATIVE_MAGIC: [u8; 4] = *b"EUDQ";
pub const NATIVE_FORMAT_VERSION: u32 = 1;
pub const NATIVE_EXTENSION: &str = "raw";
pub const NATIVE_BACKEND: &str = "native";
pub const DEFAULT_FILE_PATTERN: &str = "run$6R$X";

// Sub-event descriptions routed by the re-synchroniser
pub const DSP_ABC_TIMING: &str = "ITS_ABC_Timing";
pub const DSP_ABC_DUT: &str = "ITS_ABC_DUT";
pub const DSP_TTC_TIMING: &str = "ITS_TTC_Timing";
pub const DSP_TTC_DUT: &str = "ITS_TTC_DUT";
pub const DSP_TELESCOPE: &str = "NiRawDataEvent";
pub const DSP_TLU: &str = "TluRawDataEvent";
pub const DSP_REFERENCE: &str = "USBPIXI4";

// StandardEvent tags carrying the BCIDs
pub const TAG_DUT_BCID: &str = "DUT.RAWBCID";
pub const TAG_TIMING_BCID: &str = "TIMING.RAWBCID";
pub const TAG_DUT_DAQ_BCID: &str = "TTC_DUT.BCID";
pub const TAG_TIMING_DAQ_BCID: &str = "TTC_TIMING.BCID";
