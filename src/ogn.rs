//! Parser for OGN-flavoured APRS position reports.
//!
//! A typical report:
//!
//! ```text
//! FLRDDA5BA>APRS,qAS,LFNM:/074548h4821.86N/00531.07E'086/007/A=000607 !W52! id06DDA5BA -019fpm +0.0rot 5.5dB 3e -4.3kHz
//! ```
//!
//! The APRS part carries time, position, course/speed and altitude; the
//! comment carries the OGN extension: tracker id flags, climb, turn rate
//! and signal quality.

use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::str::FromStr;
use thiserror::Error;

use crate::aircraft::{AddressType, AircraftType};

#[derive(Debug, Error, PartialEq)]
pub enum OgnParseError {
    #[error("not a position report")]
    NotAPosition,
    #[error("missing packet body")]
    MissingBody,
    #[error("malformed timestamp")]
    BadTimestamp,
    #[error("malformed latitude")]
    BadLatitude,
    #[error("malformed longitude")]
    BadLongitude,
    #[error("malformed altitude")]
    BadAltitude,
    #[error("missing id field in OGN comment")]
    MissingIdField,
    #[error("malformed id field in OGN comment")]
    BadIdField,
}

/// OGN extension parsed from the comment portion of a position report
#[derive(Debug, Clone, PartialEq)]
pub struct OgnParameters {
    /// 24-bit sender address as parsed from the id field
    pub address: u32,
    pub address_type: AddressType,
    pub aircraft_type: AircraftType,
    /// Tracker requested not to be tracked/identified
    pub stealth: bool,
    pub no_tracking: bool,

    pub climb_fpm: Option<i32>,
    /// rot = half-turns per minute
    pub turn_rate_rot: Option<f32>,
    pub snr_db: Option<f32>,
    pub bit_errors_corrected: Option<u32>,
    pub freq_offset_khz: Option<f32>,
}

impl FromStr for OgnParameters {
    type Err = OgnParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tokens: Vec<&str> = s.split_whitespace().collect();

        // Find the "idXXYYYYYY" token: 2 hex flag chars + 6 hex address chars
        let id_token = tokens
            .iter()
            .copied()
            .find(|t| t.starts_with("id"))
            .ok_or(OgnParseError::MissingIdField)?;
        let rest = id_token.strip_prefix("id").ok_or(OgnParseError::BadIdField)?;
        if rest.len() < 8 {
            return Err(OgnParseError::BadIdField);
        }
        let flags =
            u8::from_str_radix(&rest[..2], 16).map_err(|_| OgnParseError::BadIdField)?;
        let address =
            u32::from_str_radix(&rest[2..8], 16).map_err(|_| OgnParseError::BadIdField)?;

        // Flag byte layout: STtt ttaa
        let stealth = flags & 0x80 != 0;
        let no_tracking = flags & 0x40 != 0;
        let aircraft_type = AircraftType::from((flags >> 2) & 0x0F);
        let address_type = AddressType::from(flags & 0x03);

        let mut params = OgnParameters {
            address,
            address_type,
            aircraft_type,
            stealth,
            no_tracking,
            climb_fpm: None,
            turn_rate_rot: None,
            snr_db: None,
            bit_errors_corrected: None,
            freq_offset_khz: None,
        };

        for token in tokens {
            if let Some(value) = token.strip_suffix("fpm") {
                params.climb_fpm = value.parse::<i32>().ok();
            } else if let Some(value) = token.strip_suffix("rot") {
                params.turn_rate_rot = value.parse::<f32>().ok();
            } else if let Some(value) = token.strip_suffix("dB") {
                params.snr_db = value.parse::<f32>().ok();
            } else if let Some(value) = token.strip_suffix("kHz") {
                params.freq_offset_khz = value.parse::<f32>().ok();
            } else if let Some(value) = token.strip_suffix('e')
                && !value.is_empty()
                && value.chars().all(|c| c.is_ascii_digit())
            {
                params.bit_errors_corrected = value.parse::<u32>().ok();
            }
        }

        Ok(params)
    }
}

/// A fully parsed OGN position report
#[derive(Debug, Clone, PartialEq)]
pub struct OgnPosition {
    /// APRS source callsign (e.g. "FLRDDA5BA")
    pub source: String,
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_msl_ft: Option<i32>,
    pub track_degrees: Option<f32>,
    pub ground_speed_knots: Option<f32>,
    pub params: OgnParameters,
}

/// Parse one APRS line into a position report.
///
/// Returns `NotAPosition` for the many non-position packet kinds on an OGN
/// feed (receiver status, server comments); callers skip those silently.
pub fn parse_position(line: &str, received_at: DateTime<Utc>) -> Result<OgnPosition, OgnParseError> {
    if line.starts_with('#') {
        // Server comment line
        return Err(OgnParseError::NotAPosition);
    }

    let (header, body) = line.split_once(':').ok_or(OgnParseError::MissingBody)?;
    let source = header
        .split_once('>')
        .map(|(src, _)| src)
        .unwrap_or(header)
        .to_string();

    // Timestamped position reports start with "/HHMMSSh"
    let body = body.strip_prefix('/').ok_or(OgnParseError::NotAPosition)?;
    if body.len() < 7 || !body.is_char_boundary(7) {
        return Err(OgnParseError::BadTimestamp);
    }
    let (time_str, rest) = body.split_at(7);
    if !time_str.ends_with('h') {
        return Err(OgnParseError::NotAPosition);
    }
    let timestamp = resolve_packet_time(&time_str[..6], received_at)?;

    // Latitude: "4821.86N" + symbol table char. All slicing is checked:
    // a report with stray multi-byte characters is malformed, not a panic.
    let lat_str = rest.get(..8).ok_or(OgnParseError::BadLatitude)?;
    let lat_digits = lat_str.get(..7).ok_or(OgnParseError::BadLatitude)?;
    let mut latitude = parse_coordinate(lat_digits, 2).ok_or(OgnParseError::BadLatitude)?;
    match lat_str.get(7..8) {
        Some("N") => {}
        Some("S") => latitude = -latitude,
        _ => return Err(OgnParseError::BadLatitude),
    }
    let rest = rest.get(9..).ok_or(OgnParseError::BadLatitude)?; // skip symbol table character

    // Longitude: "00531.07E" + symbol code char
    let lon_str = rest.get(..9).ok_or(OgnParseError::BadLongitude)?;
    let lon_digits = lon_str.get(..8).ok_or(OgnParseError::BadLongitude)?;
    let mut longitude = parse_coordinate(lon_digits, 3).ok_or(OgnParseError::BadLongitude)?;
    match lon_str.get(8..9) {
        Some("E") => {}
        Some("W") => longitude = -longitude,
        _ => return Err(OgnParseError::BadLongitude),
    }
    let mut rest = rest.get(10..).ok_or(OgnParseError::BadLongitude)?; // skip symbol code character

    // Optional course/speed: "086/007"
    let mut track_degrees = None;
    let mut ground_speed_knots = None;
    if let (Some(course), Some(slash), Some(speed)) =
        (rest.get(..3), rest.get(3..4), rest.get(4..7))
        && slash == "/"
        && let (Ok(course), Ok(speed)) = (course.parse::<u16>(), speed.parse::<u16>())
    {
        // 0 means "unknown" for the course field; 360 wraps to north
        if course > 0 {
            track_degrees = Some((course % 360) as f32);
        }
        ground_speed_knots = Some(speed as f32);
        rest = &rest[7..];
    }

    // Optional altitude: "/A=000607" in feet
    let mut altitude_msl_ft = None;
    if let Some(idx) = rest.find("/A=") {
        let digits = rest
            .get(idx + 3..idx + 9)
            .ok_or(OgnParseError::BadAltitude)?;
        altitude_msl_ft = Some(digits.parse::<i32>().map_err(|_| OgnParseError::BadAltitude)?);
        rest = &rest[idx + 9..];
    }

    // APRS precision enhancement: "!W52!" adds a third decimal minute digit
    if let Some(idx) = rest.find("!W")
        && let Some(digits) = rest.get(idx + 2..idx + 4)
        && rest.get(idx + 4..idx + 5) == Some("!")
    {
        let mut chars = digits.chars();
        if let (Some(lat_digit), Some(lon_digit)) = (chars.next(), chars.next())
            && let (Some(lat_extra), Some(lon_extra)) =
                (lat_digit.to_digit(10), lon_digit.to_digit(10))
        {
            latitude += latitude.signum() * lat_extra as f64 * 0.001 / 60.0;
            longitude += longitude.signum() * lon_extra as f64 * 0.001 / 60.0;
        }
    }

    let params = OgnParameters::from_str(rest)?;

    Ok(OgnPosition {
        source,
        timestamp,
        latitude,
        longitude,
        altitude_msl_ft,
        track_degrees,
        ground_speed_knots,
        params,
    })
}

/// Parse "ddmm.mm" (or "dddmm.mm" for longitude) into decimal degrees
fn parse_coordinate(s: &str, degree_digits: usize) -> Option<f64> {
    let degrees = s.get(..degree_digits)?.parse::<f64>().ok()?;
    let minutes = s.get(degree_digits..)?.parse::<f64>().ok()?;
    if minutes >= 60.0 {
        return None;
    }
    Some(degrees + minutes / 60.0)
}

/// Combine the packet's HHMMSS with the received date. Packets cannot come
/// from the future, so a wall-clock earlier than the packet time by more
/// than an hour means the packet is from the previous UTC day.
fn resolve_packet_time(
    hhmmss: &str,
    received_at: DateTime<Utc>,
) -> Result<DateTime<Utc>, OgnParseError> {
    if hhmmss.len() != 6 || !hhmmss.chars().all(|c| c.is_ascii_digit()) {
        return Err(OgnParseError::BadTimestamp);
    }
    let hour: u32 = hhmmss[..2].parse().map_err(|_| OgnParseError::BadTimestamp)?;
    let minute: u32 = hhmmss[2..4].parse().map_err(|_| OgnParseError::BadTimestamp)?;
    let second: u32 = hhmmss[4..6].parse().map_err(|_| OgnParseError::BadTimestamp)?;
    let time =
        NaiveTime::from_hms_opt(hour, minute, second).ok_or(OgnParseError::BadTimestamp)?;

    let candidate = received_at
        .date_naive()
        .and_time(time)
        .and_utc();
    if candidate - received_at > Duration::hours(1) {
        Ok(candidate - Duration::days(1))
    } else {
        Ok(candidate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "FLRDDA5BA>APRS,qAS,LFNM:/074548h4821.86N/00531.07E'086/007/A=000607 !W52! id06DDA5BA -019fpm +0.0rot 5.5dB 3e -4.3kHz";

    fn received_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 7, 46, 0).unwrap()
    }

    #[test]
    fn test_parse_full_position_report() {
        let position = parse_position(SAMPLE, received_at()).unwrap();

        assert_eq!(position.source, "FLRDDA5BA");
        assert_eq!(
            position.timestamp,
            Utc.with_ymd_and_hms(2025, 6, 1, 7, 45, 48).unwrap()
        );
        assert!((position.latitude - (48.0 + 21.865 / 60.0)).abs() < 1e-9);
        assert!((position.longitude - (5.0 + 31.072 / 60.0)).abs() < 1e-9);
        assert_eq!(position.altitude_msl_ft, Some(607));
        assert_eq!(position.track_degrees, Some(86.0));
        assert_eq!(position.ground_speed_knots, Some(7.0));

        let params = &position.params;
        assert_eq!(params.address, 0xDDA5BA);
        assert_eq!(params.address_type, AddressType::Flarm);
        assert_eq!(params.aircraft_type, AircraftType::Glider);
        assert!(!params.stealth);
        assert!(!params.no_tracking);
        assert_eq!(params.climb_fpm, Some(-19));
        assert_eq!(params.turn_rate_rot, Some(0.0));
        assert_eq!(params.snr_db, Some(5.5));
        assert_eq!(params.bit_errors_corrected, Some(3));
        assert_eq!(params.freq_offset_khz, Some(-4.3));
    }

    #[test]
    fn test_parse_southern_western_hemisphere() {
        let line = "OGN123456>APRS,qAS,XYZ:/120000h3354.50S/07030.25W'000/000/A=001710 id07123456";
        let position = parse_position(line, received_at()).unwrap();
        assert!(position.latitude < 0.0);
        assert!(position.longitude < 0.0);
        assert_eq!(position.params.address, 0x123456);
        assert_eq!(position.params.address_type, AddressType::Ogn);
        // Course 000 means unknown
        assert_eq!(position.track_degrees, None);
    }

    #[test]
    fn test_non_position_packets_are_skipped() {
        assert_eq!(
            parse_position("# aprsc 2.1.15-gc67551b", received_at()),
            Err(OgnParseError::NotAPosition)
        );
        assert_eq!(
            parse_position("LFNM>APRS,TCPIP*:>074555h v0.2.6", received_at()),
            Err(OgnParseError::NotAPosition)
        );
    }

    #[test]
    fn test_missing_id_field_is_an_error() {
        let line = "FLRDDA5BA>APRS,qAS,LFNM:/074548h4821.86N/00531.07E'086/007/A=000607";
        assert_eq!(
            parse_position(line, received_at()),
            Err(OgnParseError::MissingIdField)
        );
    }

    #[test]
    fn test_midnight_rollover() {
        // Packet stamped 23:59:50, received at 00:00:05 the next day
        let received = Utc.with_ymd_and_hms(2025, 6, 2, 0, 0, 5).unwrap();
        let line = "FLRDDA5BA>APRS,qAS,LFNM:/235950h4821.86N/00531.07E'086/007/A=000607 id06DDA5BA";
        let position = parse_position(line, received).unwrap();
        assert_eq!(
            position.timestamp,
            Utc.with_ymd_and_hms(2025, 6, 1, 23, 59, 50).unwrap()
        );
    }

    #[test]
    fn test_stealth_flag_decoding() {
        // Flags 0xC6: stealth + no-tracking + glider + flarm address
        let line = "FLRDDA5BA>APRS,qAS,LFNM:/074548h4821.86N/00531.07E'086/007/A=000607 idC6DDA5BA";
        let position = parse_position(line, received_at()).unwrap();
        assert!(position.params.stealth);
        assert!(position.params.no_tracking);
    }
}
