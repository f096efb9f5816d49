pub mod geoip;

pub use geoip::{GeoInfo, GeoIpLookup, GeoIpProvider};
