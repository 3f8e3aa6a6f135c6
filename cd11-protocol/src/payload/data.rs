//! DATA and CD-1 encapsulation bodies: a channel subframe header followed by one
//! channel subframe per channel.

use bytes::BufMut;

use crate::error::{Cd11Error, Result};
use crate::time::{JULIAN_TIME_LEN, JulianTime};
use crate::wire::{WireReader, ascii, padded_len, put_fixed_str, put_padded};

/// Bytes per channel in the channel string.
pub const CHANNEL_ID_LEN: usize = 10;
pub const CHANNEL_DESCRIPTION_LEN: usize = 24;

/// Site, channel and location as they appear in the channel string.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ChannelId {
    pub site: String,
    pub channel: String,
    pub location: String,
}

impl ChannelId {
    pub fn new(site: &str, channel: &str, location: &str) -> Self {
        Self {
            site: site.to_owned(),
            channel: channel.to_owned(),
            location: location.to_owned(),
        }
    }

    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        Ok(Self {
            site: r.string(5, "site")?,
            channel: r.string(3, "channel")?,
            location: r.string(2, "location")?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        put_fixed_str(out, &self.site, 5);
        put_fixed_str(out, &self.channel, 3);
        put_fixed_str(out, &self.location, 2);
    }
}

impl std::fmt::Display for ChannelId {
    /// `SITE.CHAN.LOC`, the key used when resolving channel names.
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.site, self.channel, self.location)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelSubframeHeader {
    /// Milliseconds of data the frame covers.
    pub frame_time_length: i32,
    pub nominal_time: JulianTime,
    pub channels: Vec<ChannelId>,
}

impl ChannelSubframeHeader {
    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let channel_count = r.i32("channel count")?;
        if channel_count <= 0 {
            return Err(Cd11Error::invalid(
                "channel count",
                format!("must be positive, got {channel_count}"),
            ));
        }
        let frame_time_length = r.i32("frame time length")?;
        if frame_time_length <= 0 {
            return Err(Cd11Error::invalid(
                "frame time length",
                format!("must be positive, got {frame_time_length}"),
            ));
        }
        let nominal_time = JulianTime::parse(&r.string(JULIAN_TIME_LEN, "nominal time")?)?;

        let string_count = r.size("channel string count")?;
        let needed = channel_count as usize * CHANNEL_ID_LEN;
        if string_count < needed {
            return Err(Cd11Error::invalid(
                "channel string count",
                format!("{string_count} bytes cannot describe {channel_count} channels"),
            ));
        }
        let channel_string = r.bytes(string_count, "channel string")?;
        let mut ids = WireReader::new(channel_string);
        let channels = (0..channel_count)
            .map(|_| ChannelId::read(&mut ids))
            .collect::<Result<Vec<_>>>()?;

        // Some stations omit the word padding after the channel string. Padding followed by
        // the high half of the next channel length reads as zero; anything else means the
        // padding is missing and the next field starts right here.
        let padding = padded_len(string_count) - string_count;
        if padding > 0 {
            let next_word = r.rest().get(..4);
            if next_word == Some(&[0, 0, 0, 0]) {
                r.skip(padding, "channel string padding")?;
            }
        }

        Ok(Self {
            frame_time_length,
            nominal_time,
            channels,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        out.put_i32(self.channels.len() as i32);
        out.put_i32(self.frame_time_length);
        put_fixed_str(out, &self.nominal_time.to_string(), JULIAN_TIME_LEN);
        let string_count = self.channels.len() * CHANNEL_ID_LEN;
        out.put_i32(string_count as i32);
        for id in &self.channels {
            id.write(out);
        }
        out.put_bytes(0, padded_len(string_count) - string_count);
    }
}

/// The 24-byte channel description inside each channel subframe.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChannelDescription {
    pub authentication: u8,
    pub transformation: u8,
    pub sensor_type: u8,
    pub option_flag: u8,
    pub id: ChannelId,
    /// Two-character sample format, e.g. `s4` or `cm`.
    pub data_format: String,
    pub calibration_factor: f32,
    pub calibration_period: f32,
}

impl ChannelDescription {
    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let flags = r.bytes(4, "channel description flags")?;
        Ok(Self {
            authentication: flags[0],
            transformation: flags[1],
            sensor_type: flags[2],
            option_flag: flags[3],
            id: ChannelId::read(r)?,
            data_format: r.string(2, "data format")?,
            calibration_factor: r.f32("calibration factor")?,
            calibration_period: r.f32("calibration period")?,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        out.put_slice(&[
            self.authentication,
            self.transformation,
            self.sensor_type,
            self.option_flag,
        ]);
        self.id.write(out);
        put_fixed_str(out, &self.data_format, 2);
        out.put_f32(self.calibration_factor);
        out.put_f32(self.calibration_period);
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChannelSubframe {
    pub authentication_offset: i32,
    pub description: ChannelDescription,
    pub timestamp: JulianTime,
    /// Milliseconds of data in this subframe.
    pub time_length: i32,
    pub samples: i32,
    pub status: Vec<u8>,
    pub data: Vec<u8>,
    pub subframe_count: i32,
    pub auth_key_id: i32,
    pub authentication: Vec<u8>,
}

impl ChannelSubframe {
    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let channel_length = r.size("channel length")?;
        let mut r = WireReader::new(r.bytes(channel_length, "channel subframe")?);

        let authentication_offset = r.i32("authentication offset")?;
        let description = ChannelDescription::read(&mut r)?;
        let timestamp = JulianTime::parse(&r.string(JULIAN_TIME_LEN, "subframe timestamp")?)?;
        let time_length = r.i32("subframe time length")?;
        let samples = r.i32("samples")?;

        let status_size = r.size("status size")?;
        let status = r.padded(status_size, "channel status")?.to_vec();
        let data_size = r.size("data size")?;
        let data = r.padded(data_size, "channel data")?.to_vec();

        let subframe_count = r.i32("subframe count")?;
        let auth_key_id = r.i32("authentication key identifier")?;
        let auth_size = r.size("authentication size")?;
        let authentication = r.padded(auth_size, "authentication value")?.to_vec();

        Ok(Self {
            authentication_offset,
            description,
            timestamp,
            time_length,
            samples,
            status,
            data,
            subframe_count,
            auth_key_id,
            authentication,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        let mut body = Vec::new();
        body.put_i32(self.authentication_offset);
        self.description.write(&mut body);
        put_fixed_str(&mut body, &self.timestamp.to_string(), JULIAN_TIME_LEN);
        body.put_i32(self.time_length);
        body.put_i32(self.samples);
        body.put_i32(self.status.len() as i32);
        put_padded(&mut body, &self.status);
        body.put_i32(self.data.len() as i32);
        put_padded(&mut body, &self.data);
        body.put_i32(self.subframe_count);
        body.put_i32(self.auth_key_id);
        body.put_i32(self.authentication.len() as i32);
        put_padded(&mut body, &self.authentication);

        out.put_i32(body.len() as i32);
        out.put_slice(&body);
    }

    /// Status bytes read as text, with NUL padding removed.
    pub fn status_text(&self) -> String {
        ascii(&self.status)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataPayload {
    pub header: ChannelSubframeHeader,
    pub subframes: Vec<ChannelSubframe>,
}

impl DataPayload {
    pub fn read(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let header = ChannelSubframeHeader::read(&mut r)?;
        let subframes = (0..header.channels.len())
            .map(|_| ChannelSubframe::read(&mut r))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { header, subframes })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        self.header.write(out);
        for subframe in &self.subframes {
            subframe.write(out);
        }
    }
}
