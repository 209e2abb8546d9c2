// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io::Write;

use flate2::write::GzEncoder;
use serde::Deserialize;

/// Content encoding applied to batch payloads.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    /// Value of the `Content-Encoding` header for this encoding.
    #[must_use]
    pub fn content_encoding(self) -> &'static str {
        match self {
            Compression::Gzip => "gzip",
            Compression::Zstd => "zstd",
        }
    }
}

/// Compression algorithm plus level.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Codec {
    pub compression: Compression,
    /// Algorithm default when unset. Gzip levels are clamped to 0..=9.
    pub level: Option<i32>,
}

impl Codec {
    /// # Errors
    ///
    /// Returns an error if the encoder fails.
    pub fn encode(&self, data: &[u8]) -> std::io::Result<Vec<u8>> {
        match self.compression {
            Compression::Gzip => {
                let level = self
                    .level
                    .map_or(flate2::Compression::default(), |level| {
                        flate2::Compression::new(level.clamp(0, 9).unsigned_abs())
                    });
                let mut encoder = GzEncoder::new(Vec::new(), level);
                encoder.write_all(data)?;
                encoder.finish()
            }
            Compression::Zstd => {
                let mut encoder =
                    zstd::stream::write::Encoder::new(Vec::new(), self.level.unwrap_or(0))?;
                encoder.write_all(data)?;
                encoder.finish()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::io::Read;

    fn sample() -> Vec<u8> {
        (0..200)
            .map(|i| format!("{{\"n\":{i},\"msg\":\"hello world\"}}\n"))
            .collect::<String>()
            .into_bytes()
    }

    #[test]
    fn test_gzip_decodes_to_original() {
        let data = sample();
        let codec = Codec {
            compression: Compression::Gzip,
            level: None,
        };
        let compressed = codec.encode(&data).unwrap();
        assert!(compressed.len() < data.len());

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_gzip_level_is_clamped() {
        let data = sample();
        let codec = Codec {
            compression: Compression::Gzip,
            level: Some(42),
        };
        let compressed = codec.encode(&data).unwrap();

        let mut decoded = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut decoded)
            .unwrap();
        assert_eq!(decoded, data);
    }

    #[test]
    fn test_zstd_decodes_to_original() {
        let data = sample();
        let codec = Codec {
            compression: Compression::Zstd,
            level: Some(3),
        };
        let compressed = codec.encode(&data).unwrap();
        assert_eq!(zstd::decode_all(compressed.as_slice()).unwrap(), data);
    }

    #[test]
    fn test_content_encoding() {
        assert_eq!(Compression::Gzip.content_encoding(), "gzip");
        assert_eq!(Compression::Zstd.content_encoding(), "zstd");
    }
}
