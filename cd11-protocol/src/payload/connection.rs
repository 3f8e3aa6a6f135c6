use std::net::Ipv4Addr;

use bytes::BufMut;

use crate::error::Result;
use crate::wire::{WireReader, put_fixed_str};

pub const NAME_LEN: usize = 8;
pub const TYPE_LEN: usize = 4;
pub const SERVICE_LEN: usize = 4;

/// Body shared by connection requests and connection responses.
///
/// In a request `name` is the station; in a response it is the responder.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionExchange {
    pub major_version: i16,
    pub minor_version: i16,
    pub name: String,
    pub station_type: String,
    pub service_type: String,
    pub ip_address: Ipv4Addr,
    pub port: u16,
    pub second_ip_address: Ipv4Addr,
    pub second_port: u16,
}

impl ConnectionExchange {
    pub fn read(body: &[u8]) -> Result<Self> {
        let mut r = WireReader::new(body);
        Ok(Self {
            major_version: r.i16("major version")?,
            minor_version: r.i16("minor version")?,
            name: r.string(NAME_LEN, "station or responder name")?,
            station_type: r.string(TYPE_LEN, "station or responder type")?,
            service_type: r.string(SERVICE_LEN, "service type")?,
            ip_address: Ipv4Addr::from(r.u32("ip address")?),
            port: r.u16("port")?,
            second_ip_address: Ipv4Addr::from(r.u32("second ip address")?),
            second_port: r.u16("second port")?,
        })
    }

    pub fn write(&self, out: &mut impl BufMut) {
        out.put_i16(self.major_version);
        out.put_i16(self.minor_version);
        put_fixed_str(out, &self.name, NAME_LEN);
        put_fixed_str(out, &self.station_type, TYPE_LEN);
        put_fixed_str(out, &self.service_type, SERVICE_LEN);
        out.put_u32(self.ip_address.into());
        out.put_u16(self.port);
        out.put_u32(self.second_ip_address.into());
        out.put_u16(self.second_port);
    }
}
