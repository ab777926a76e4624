//! NMEA ingestion helpers.
//!
//! The chain cares about exactly one sentence family: RMC, and only
//! when the receiver marks it valid/active. Everything else in the
//! stream is skipped without comment.

use chrono::{DateTime, TimeZone, Utc};
use nmea0183::RMC;

/// Extract (latitude, longitude, UTC timestamp) from an RMC sentence.
/// The parser hands over void-status sentences too (status V comes
/// through as `Mode::NotValid`), so the receiver's own validity flag is
/// checked here: anything it does not mark autonomous/differential is
/// rejected, as are date fields that do not form a real calendar
/// instant.
pub(crate) fn fix_from_rmc(rmc: &RMC) -> Option<(f64, f64, DateTime<Utc>)> {
    if !rmc.mode.is_valid() {
        return None;
    }
    let date = &rmc.datetime.date;
    let time = &rmc.datetime.time;
    let timestamp = Utc
        .with_ymd_and_hms(
            date.year as i32,
            date.month as u32,
            date.day as u32,
            time.hours as u32,
            time.minutes as u32,
            time.seconds as u32,
        )
        .single()?;
    Some((rmc.latitude.as_f64(), rmc.longitude.as_f64(), timestamp))
}

/// XOR checksum over a sentence body (the bytes between `$` and `*`).
pub fn sentence_checksum(body: &str) -> u8 {
    body.bytes().fold(0u8, |acc, b| acc ^ b)
}

/// Wrap a sentence body into a complete framed sentence with checksum
/// and CRLF, e.g. `GPRMC,...` -> `$GPRMC,...*6A\r\n`. Used by the
/// simulated receiver and by tests that script the byte stream.
pub fn frame_sentence(body: &str) -> String {
    format!("${}*{:02X}\r\n", body, sentence_checksum(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use nmea0183::{ParseResult, Parser};

    fn parse_rmc(body: &str) -> Option<RMC> {
        let mut parser = Parser::new();
        for byte in frame_sentence(body).bytes() {
            if let Some(Ok(ParseResult::RMC(rmc))) = parser.parse_from_byte(byte) {
                return rmc;
            }
        }
        None
    }

    #[test]
    fn active_rmc_yields_fix() {
        let rmc = parse_rmc("GPRMC,030000.00,A,3506.000,N,12900.000,E,0.0,0.0,010624,,,A")
            .expect("active sentence should parse");
        let (lat, lon, at) = fix_from_rmc(&rmc).unwrap();
        assert!((lat - 35.10).abs() < 1e-6);
        assert!((lon - 129.00).abs() < 1e-6);
        assert_eq!(at, Utc.with_ymd_and_hms(2024, 6, 1, 3, 0, 0).unwrap());
    }

    #[test]
    fn void_rmc_yields_nothing() {
        // Status V: the sentence still parses (mode NotValid), but the
        // receiver has no fix and the coordinates must not be used.
        let rmc = parse_rmc("GPRMC,030000.00,V,3506.000,N,12900.000,E,0.0,0.0,010624,,,N")
            .expect("void sentences still parse");
        assert!(fix_from_rmc(&rmc).is_none());
    }

    #[test]
    fn estimated_mode_is_not_a_fix() {
        // Mode E: dead-reckoned position, not a usable fix.
        let rmc =
            parse_rmc("GPRMC,030000.00,A,3506.000,N,12900.000,E,0.0,0.0,010624,,,E").unwrap();
        assert!(fix_from_rmc(&rmc).is_none());
    }

    #[test]
    fn southern_western_hemispheres_are_negative() {
        let rmc = parse_rmc("GPRMC,120000.00,A,3345.000,S,07030.000,W,0.0,0.0,150324,,,A").unwrap();
        let (lat, lon, _) = fix_from_rmc(&rmc).unwrap();
        assert!((lat - (-33.75)).abs() < 1e-6);
        assert!((lon - (-70.50)).abs() < 1e-6);
    }

    #[test]
    fn checksum_matches_reference_sentence() {
        // Classic reference sentence, checksum 6A.
        assert_eq!(
            sentence_checksum("GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W"),
            0x6A
        );
    }
}
