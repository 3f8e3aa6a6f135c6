use cd11_rs_protocol::payload::{ChannelSubframe, DataPayload};
use cd11_rs_protocol::{Frame, FrameType};
use tracing::warn;

use crate::config::StationConfig;

/// One channel's samples from a data frame.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelRecord {
    /// Configured channel name, or `SITE.CHAN.LOC` if the station config has none.
    pub channel_name: String,
    /// Start of the samples in milliseconds since the Unix epoch.
    pub start_millis: i64,
    pub time_length_ms: i32,
    pub samples: i32,
    pub data_format: String,
    pub calibration_factor: f32,
    pub calibration_period: f32,
    pub status: Vec<u8>,
    pub data: Vec<u8>,
}

/// Parsed contents of one DATA or CD-1 encapsulation frame, ready for storage.
#[derive(Clone, Debug, PartialEq)]
pub struct StationRecord {
    pub station: String,
    pub frame_type: FrameType,
    pub sequence_number: u64,
    pub nominal_millis: i64,
    pub frame_time_length_ms: i32,
    pub channels: Vec<ChannelRecord>,
}

impl StationRecord {
    /// Convert a data-bearing frame. Returns `None` for any other payload.
    pub fn from_frame(frame: &Frame, station: &StationConfig) -> Option<Self> {
        let data = frame.payload().as_data()?;
        Some(Self::from_data(
            data,
            frame.frame_type(),
            frame.sequence_number(),
            station,
        ))
    }

    fn from_data(
        data: &DataPayload,
        frame_type: FrameType,
        sequence_number: u64,
        station: &StationConfig,
    ) -> Self {
        Self {
            station: station.name.clone(),
            frame_type,
            sequence_number,
            nominal_millis: data.header.nominal_time.unix_millis(),
            frame_time_length_ms: data.header.frame_time_length,
            channels: data
                .subframes
                .iter()
                .map(|sub| channel_record(sub, station))
                .collect(),
        }
    }
}

fn channel_record(sub: &ChannelSubframe, station: &StationConfig) -> ChannelRecord {
    let id = sub.description.id.to_string();
    let channel_name = match station.channel_name(&id) {
        Some(name) => name.to_owned(),
        None => {
            warn!(station = %station.name, channel = %id, "no configured name for channel");
            id
        }
    };
    ChannelRecord {
        channel_name,
        start_millis: sub.timestamp.unix_millis(),
        time_length_ms: sub.time_length,
        samples: sub.samples,
        data_format: sub.description.data_format.clone(),
        calibration_factor: sub.description.calibration_factor,
        calibration_period: sub.description.calibration_period,
        status: sub.status.clone(),
        data: sub.data.clone(),
    }
}
