//! Argument and result structures of the driver interface.

use serde::Deserialize;
use tvtuner_protocol::FrontendType;

/// Status kinds a frontend can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrontendStatusType {
    DemodLock = 0,
    Snr = 1,
    Ber = 2,
    Per = 3,
    PreBer = 4,
    SignalQuality = 5,
    SignalStrength = 6,
    SymbolRate = 7,
    Fec = 8,
    Modulation = 9,
    Spectral = 10,
    LnbVoltage = 11,
    PlpId = 12,
    Ews = 13,
    Agc = 14,
    Lna = 15,
    LayerError = 16,
    Mer = 17,
    FreqOffset = 18,
    Hierarchy = 19,
    RfLock = 20,
    Atsc3PlpInfo = 21,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendAnalogCapabilities {
    pub type_cap: u32,
    pub sif_standard_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendAtscCapabilities {
    pub modulation_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendAtsc3Capabilities {
    pub bandwidth_cap: u32,
    pub modulation_cap: u32,
    pub time_interleave_mode_cap: u32,
    pub code_rate_cap: u32,
    pub fec_cap: u32,
    pub demod_output_format_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendDvbcCapabilities {
    pub modulation_cap: u32,
    pub fec_cap: u64,
    pub annex_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendDvbsCapabilities {
    pub modulation_cap: u32,
    pub inner_fec_cap: u64,
    pub standard: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendDvbtCapabilities {
    pub transmission_mode_cap: u32,
    pub bandwidth_cap: u32,
    pub constellation_cap: u32,
    pub coderate_cap: u32,
    pub hierarchy_cap: u32,
    pub guard_interval_cap: u32,
    pub is_t2_supported: bool,
    pub is_miso_supported: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendIsdbsCapabilities {
    pub modulation_cap: u32,
    pub coderate_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendIsdbs3Capabilities {
    pub modulation_cap: u32,
    pub coderate_cap: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrontendIsdbtCapabilities {
    pub mode_cap: u32,
    pub bandwidth_cap: u32,
    pub modulation_cap: u32,
    pub coderate_cap: u32,
    pub guard_interval_cap: u32,
}

/// Per delivery system capabilities. Only the arm matching the
/// frontend's type is meaningful.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FrontendInfoFrontendCaps {
    #[default]
    None,
    Analog(FrontendAnalogCapabilities),
    Atsc(FrontendAtscCapabilities),
    Atsc3(FrontendAtsc3Capabilities),
    Dvbc(FrontendDvbcCapabilities),
    Dvbs(FrontendDvbsCapabilities),
    Dvbt(FrontendDvbtCapabilities),
    Isdbs(FrontendIsdbsCapabilities),
    Isdbs3(FrontendIsdbs3Capabilities),
    Isdbt(FrontendIsdbtCapabilities),
}

impl FrontendInfoFrontendCaps {
    /// Typical capabilities of a frontend of `frontend_type`.
    pub fn typical(frontend_type: FrontendType) -> Self {
        match frontend_type {
            FrontendType::Undefined => Self::None,
            FrontendType::Analog => Self::Analog(FrontendAnalogCapabilities {
                type_cap: 0x3E,
                sif_standard_cap: 0x3FFF,
            }),
            FrontendType::Atsc => Self::Atsc(FrontendAtscCapabilities {
                modulation_cap: 0x0C,
            }),
            FrontendType::Atsc3 => Self::Atsc3(FrontendAtsc3Capabilities {
                bandwidth_cap: 0x0E,
                modulation_cap: 0x3E,
                time_interleave_mode_cap: 0x06,
                code_rate_cap: 0xFFE,
                fec_cap: 0x7E,
                demod_output_format_cap: 0x06,
            }),
            FrontendType::Dvbc => Self::Dvbc(FrontendDvbcCapabilities {
                modulation_cap: 0x3E,
                fec_cap: 0x7FFF_FFFE,
                annex_cap: 0x07,
            }),
            FrontendType::Dvbs => Self::Dvbs(FrontendDvbsCapabilities {
                modulation_cap: 0x7FE,
                inner_fec_cap: 0x7FFF_FFFE,
                standard: 0x0E,
            }),
            FrontendType::Dvbt => Self::Dvbt(FrontendDvbtCapabilities {
                transmission_mode_cap: 0x7E,
                bandwidth_cap: 0x7E,
                constellation_cap: 0x1E,
                coderate_cap: 0xFE,
                hierarchy_cap: 0x1E,
                guard_interval_cap: 0xFE,
                is_t2_supported: true,
                is_miso_supported: false,
            }),
            FrontendType::Isdbs => Self::Isdbs(FrontendIsdbsCapabilities {
                modulation_cap: 0x1E,
                coderate_cap: 0x7E,
            }),
            FrontendType::Isdbs3 => Self::Isdbs3(FrontendIsdbs3Capabilities {
                modulation_cap: 0x3E,
                coderate_cap: 0x3FFE,
            }),
            FrontendType::Isdbt => Self::Isdbt(FrontendIsdbtCapabilities {
                mode_cap: 0x0E,
                bandwidth_cap: 0x0E,
                modulation_cap: 0x1E,
                coderate_cap: 0x3E,
                guard_interval_cap: 0x1E,
            }),
        }
    }
}

/// Frontend description as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontendInfo {
    pub frontend_type: FrontendType,
    pub min_frequency: u32,
    pub max_frequency: u32,
    pub min_symbol_rate: u32,
    pub max_symbol_rate: u32,
    pub acquire_range: u32,
    pub exclusive_group_id: u32,
    pub status_caps: Vec<FrontendStatusType>,
    pub frontend_caps: FrontendInfoFrontendCaps,
}

/// Parameters for a tune request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontendSettings {
    pub frontend_type: FrontendType,
    /// Center frequency in Hz.
    pub frequency: u32,
    pub symbol_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LnbInfo {
    pub id: u32,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LnbVoltage {
    None,
    Voltage5V,
    Voltage11V,
    Voltage12V,
    Voltage13V,
    Voltage14V,
    Voltage15V,
    Voltage18V,
    Voltage19V,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LnbTone {
    None,
    Continuous,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxFilterMainType {
    Ts,
    Mmtp,
    Ip,
    Tlv,
    Alp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxTsFilterType {
    Undefined,
    Section,
    Pes,
    Ts,
    Audio,
    Video,
    Pcr,
    Record,
    Temi,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxFilterType {
    pub main_type: DemuxFilterMainType,
    pub sub_type: DemuxTsFilterType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxFilterAvSettings {
    pub is_passthrough: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxTsFilterSettingsFilterSettings {
    Noinit,
    Av(DemuxFilterAvSettings),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemuxTsFilterSettings {
    pub tpid: u16,
    pub filter_settings: DemuxTsFilterSettingsFilterSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxFilterSettings {
    Ts(DemuxTsFilterSettings),
}

/// Events a filter delivers to its callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DemuxFilterEvent {
    Media { pts: u64, data_length: u64 },
    Section { table_id: u16, data_length: u64 },
    TsRecord { pid: u16, byte_number: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DemuxFilterStatus {
    DataReady,
    LowWater,
    HighWater,
    Overflow,
}
