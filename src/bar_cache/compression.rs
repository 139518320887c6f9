// =============================================================================
// Bar compression — gzip + base64 envelope for cache payloads
// =============================================================================
//
// Stored cache values are base64 text wrapping a gzip-compressed JSON array
// of `CompactBar` tuples, matching §4.1's "decode gzipped base64" cache-hit
// step. Text, not raw bytes, because the `BarCacheStore` trait speaks plain
// strings — the one interface both `MemoryStore` and a Redis string value
// share without extra binary-safety ceremony.
// =============================================================================

use std::io::{Read, Write};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::{Bar, CompactBar};

pub fn encode(bars: &[CompactBar]) -> anyhow::Result<String> {
    let json = serde_json::to_vec(bars)?;
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json)?;
    let gzipped = encoder.finish()?;
    Ok(BASE64.encode(gzipped))
}

pub fn decode(payload: &str) -> anyhow::Result<Vec<Bar>> {
    let gzipped = BASE64.decode(payload)?;
    let mut decoder = GzDecoder::new(&gzipped[..]);
    let mut json = Vec::new();
    decoder.read_to_end(&mut json)?;
    let compact: Vec<CompactBar> = serde_json::from_slice(&json)?;
    Ok(compact.into_iter().map(Bar::from).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn sample_bars() -> Vec<Bar> {
        (0..50)
            .map(|i| Bar {
                ts: Utc.timestamp_opt(1_700_000_000 + i * 300, 0).unwrap(),
                open: dec!(4500) + Decimal::from(i),
                high: dec!(4505) + Decimal::from(i),
                low: dec!(4495) + Decimal::from(i),
                close: dec!(4502) + Decimal::from(i),
                volume: dec!(1000) + Decimal::from(i * 10),
            })
            .collect()
    }

    use rust_decimal::Decimal;

    #[test]
    fn round_trip_preserves_bar_count_and_order() {
        let bars = sample_bars();
        let compact: Vec<CompactBar> = bars.iter().map(CompactBar::from).collect();
        let encoded = encode(&compact).unwrap();
        let decoded = decode(&encoded).unwrap();

        assert_eq!(decoded.len(), bars.len());
        for (original, round_tripped) in bars.iter().zip(decoded.iter()) {
            assert_eq!(original.ts, round_tripped.ts);
            assert_eq!(original.close, round_tripped.close);
        }
    }

    #[test]
    fn corrupt_payload_fails_to_decode() {
        assert!(decode("not-valid-base64!!!").is_err());
    }
}
