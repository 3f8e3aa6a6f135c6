use bytes::BufMut;

use crate::error::Result;
use crate::time::{JULIAN_TIME_LEN, JulianTime};
use crate::wire::{WireReader, ascii, put_fixed_str};

/// Station/site/channel/location block that opens both command bodies.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandTarget {
    pub station: String,
    pub site: String,
    pub channel: String,
    pub location: String,
    pub timestamp: JulianTime,
}

impl CommandTarget {
    fn read(r: &mut WireReader<'_>) -> Result<Self> {
        let station = r.string(8, "station")?;
        let site = r.string(5, "site")?;
        let channel = r.string(3, "channel")?;
        let location = r.string(2, "location")?;
        r.skip(2, "padding")?;
        let timestamp = JulianTime::parse(&r.string(JULIAN_TIME_LEN, "timestamp")?)?;
        Ok(Self {
            station,
            site,
            channel,
            location,
            timestamp,
        })
    }

    fn write(&self, out: &mut impl BufMut) {
        put_fixed_str(out, &self.station, 8);
        put_fixed_str(out, &self.site, 5);
        put_fixed_str(out, &self.channel, 3);
        put_fixed_str(out, &self.location, 2);
        out.put_bytes(0, 2);
        put_fixed_str(out, &self.timestamp.to_string(), JULIAN_TIME_LEN);
    }
}

fn read_message(
    r: &mut WireReader<'_>,
    size_field: &'static str,
    field: &'static str,
) -> Result<String> {
    let size = r.size(size_field)?;
    Ok(ascii(r.bytes(size, field)?))
}

fn put_message(out: &mut impl BufMut, message: &str) {
    out.put_i32(message.len() as i32);
    out.put_slice(message.as_bytes());
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandRequest {
    pub target: CommandTarget,
    pub message: String,
}

impl CommandRequest {
    pub fn read(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let target = CommandTarget::read(&mut r)?;
        let message = read_message(&mut r, "command size", "command message")?;
        Ok(Self { target, message })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        self.target.write(out);
        put_message(out, &self.message);
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommandResponse {
    /// `target.station` is the responder.
    pub target: CommandTarget,
    pub request: String,
    pub response: String,
}

impl CommandResponse {
    pub fn read(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        let target = CommandTarget::read(&mut r)?;
        let request = read_message(&mut r, "command request size", "command request")?;
        let response = read_message(&mut r, "response size", "response message")?;
        Ok(Self {
            target,
            request,
            response,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        self.target.write(out);
        put_message(out, &self.request);
        put_message(out, &self.response);
    }
}
