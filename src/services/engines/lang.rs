// Canonical language identifiers and per-provider vocabulary mapping
//
// Providers disagree on language naming: Google APIs take two-letter ISO
// 639-1 codes while Tesseract wants three-letter traineddata names. The
// canonical form here is the two-letter code; each provider mapping is a
// total function over the closed set.

use serde::{Deserialize, Serialize};

/// Canonical language identifier. Closed set covering the source corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    /// Sanskrit
    Sa,
    /// English
    En,
    /// Hindi
    Hi,
    /// Telugu
    Te,
    /// Marathi
    Mr,
    /// Bengali
    Bn,
    /// Gujarati
    Gu,
    /// Kannada
    Kn,
    /// Malayalam
    Ml,
    /// Tamil
    Ta,
    /// Punjabi
    Pa,
    /// Odia
    Or,
    /// Urdu
    Ur,
}

impl Lang {
    pub const ALL: [Lang; 13] = [
        Lang::Sa,
        Lang::En,
        Lang::Hi,
        Lang::Te,
        Lang::Mr,
        Lang::Bn,
        Lang::Gu,
        Lang::Kn,
        Lang::Ml,
        Lang::Ta,
        Lang::Pa,
        Lang::Or,
        Lang::Ur,
    ];

    /// Two-letter ISO 639-1 code, the canonical spelling.
    pub fn code(&self) -> &'static str {
        match self {
            Lang::Sa => "sa",
            Lang::En => "en",
            Lang::Hi => "hi",
            Lang::Te => "te",
            Lang::Mr => "mr",
            Lang::Bn => "bn",
            Lang::Gu => "gu",
            Lang::Kn => "kn",
            Lang::Ml => "ml",
            Lang::Ta => "ta",
            Lang::Pa => "pa",
            Lang::Or => "or",
            Lang::Ur => "ur",
        }
    }

    /// Tesseract traineddata name for this language.
    pub fn tesseract_code(&self) -> &'static str {
        match self {
            Lang::Sa => "san",
            Lang::En => "eng",
            Lang::Hi => "hin",
            Lang::Te => "tel",
            Lang::Mr => "mar",
            Lang::Bn => "ben",
            Lang::Gu => "guj",
            Lang::Kn => "kan",
            Lang::Ml => "mal",
            Lang::Ta => "tam",
            Lang::Pa => "pan",
            Lang::Or => "ori",
            Lang::Ur => "urd",
        }
    }

    /// Whether the language is written in Devanagari. The local recognition
    /// model only covers this script (plus Latin).
    pub fn is_devanagari(&self) -> bool {
        matches!(self, Lang::Sa | Lang::Hi | Lang::Mr)
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

impl std::str::FromStr for Lang {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Lang::ALL
            .iter()
            .copied()
            .find(|l| l.code() == s)
            .ok_or_else(|| format!("unknown language code '{s}'"))
    }
}
