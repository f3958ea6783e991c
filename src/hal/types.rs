use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Kind of acquisition or generation a task performs.
///
/// Doubles as the capability vocabulary for drivers and devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TaskType {
    #[serde(alias = "AI", alias = "AnalogInput")]
    AnalogIn,
    #[serde(alias = "AO", alias = "AnalogOutput")]
    AnalogOut,
    #[serde(alias = "DI", alias = "DigitalInput")]
    DigitalIn,
    #[serde(alias = "DO", alias = "DigitalOutput")]
    DigitalOut,
}

impl TaskType {
    pub const ALL: [TaskType; 4] = [
        TaskType::AnalogIn,
        TaskType::AnalogOut,
        TaskType::DigitalIn,
        TaskType::DigitalOut,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::AnalogIn => "AnalogIn",
            Self::AnalogOut => "AnalogOut",
            Self::DigitalIn => "DigitalIn",
            Self::DigitalOut => "DigitalOut",
        }
    }

    pub fn is_digital(&self) -> bool {
        matches!(self, Self::DigitalIn | Self::DigitalOut)
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for TaskType {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "analogin" | "analoginput" | "ai" => Ok(Self::AnalogIn),
            "analogout" | "analogoutput" | "ao" => Ok(Self::AnalogOut),
            "digitalin" | "digitalinput" | "di" => Ok(Self::DigitalIn),
            "digitalout" | "digitaloutput" | "do" => Ok(Self::DigitalOut),
            _ => anyhow::bail!("Unknown task type: {}", s),
        }
    }
}

pub type CapabilitySet = BTreeSet<TaskType>;

/// Closed interval used for sample-rate and voltage limits
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

impl fmt::Display for Range {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// Driver load state as tracked by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadState {
    Unloaded,
    Loaded,
    Error,
}

/// Catalog entry for a driver adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriverDescriptor {
    pub name: String,
    pub version: String,
    pub capabilities: CapabilitySet,
    /// Boards addressable through this driver are `0..board_count`
    pub board_count: u32,
    pub state: LoadState,
    pub last_error: Option<String>,
}

/// A connected device as reported by a loaded driver.
///
/// Never stored by the registry; tasks keep a private copy taken at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    pub name: String,
    pub model: String,
    pub driver_name: String,
    pub channel_count: u32,
    pub sample_rate_range: Range,
    pub voltage_range: Range,
    pub capabilities: CapabilitySet,
}

impl DeviceDescriptor {
    pub fn supports(&self, task_type: TaskType) -> bool {
        self.capabilities.contains(&task_type)
    }
}

/// Requested task configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParameters {
    #[serde(default, alias = "BoardIndex")]
    pub board_index: u32,
    #[serde(alias = "ChannelCount")]
    pub channel_count: u32,
    #[serde(alias = "SampleRate")]
    pub sample_rate: f64,
    #[serde(alias = "MinRange")]
    pub min_range: f64,
    #[serde(alias = "MaxRange")]
    pub max_range: f64,
}

/// One read from a device session, interleaved by channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleBlock {
    pub sequence: u64,
    /// Microseconds since the session started
    pub timestamp_us: u64,
    pub channel_count: usize,
    pub samples_per_channel: usize,
    pub data: Vec<f64>,
}

impl SampleBlock {
    pub fn new(sequence: u64, channel_count: usize, data: Vec<f64>, sample_rate: f64) -> Self {
        let samples_per_channel = if channel_count == 0 {
            0
        } else {
            data.len() / channel_count
        };

        Self {
            sequence,
            timestamp_us: Self::derive_timestamp(sequence, samples_per_channel, sample_rate),
            channel_count,
            samples_per_channel,
            data,
        }
    }

    /// Derive a timestamp from the block index when the driver gives none
    pub fn derive_timestamp(sequence: u64, samples_per_channel: usize, sample_rate: f64) -> u64 {
        if sample_rate <= 0.0 {
            return 0;
        }
        let samples_elapsed = sequence * samples_per_channel as u64;
        (samples_elapsed as f64 * 1_000_000.0 / sample_rate) as u64
    }

    /// Samples of one channel, de-interleaved
    pub fn channel(&self, index: usize) -> impl Iterator<Item = f64> + '_ {
        let stride = self.channel_count.max(1);
        self.data.iter().skip(index).step_by(stride).copied()
    }
}
