//! Maps a wire-carried `CodePage` integer to a text [`encoding_rs::Encoding`].
//!
//! The frame format (§6.1) carries an `int32 text encoding id` rather than
//! an encoding name, matching the historical .NET `Encoding.CodePage`
//! convention this protocol traces back to. Only the handful of code pages
//! a peer is realistically configured with are recognized; anything else
//! decodes as UTF-8 rather than failing the whole frame, since a codepage
//! mismatch on a String/TypeName field is not itself a framing violation.

use encoding_rs::Encoding;

/// A wire codepage identifier (§6.1's `CodePage` field).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodePage(pub i32);

impl CodePage {
    pub const UTF8: CodePage = CodePage(65001);
    pub const UTF16_LE: CodePage = CodePage(1200);
    pub const UTF16_BE: CodePage = CodePage(1201);
    pub const WINDOWS_1252: CodePage = CodePage(1252);
    pub const ISO_8859_1: CodePage = CodePage(28591);
    pub const ASCII: CodePage = CodePage(20127);

    pub fn encoding(self) -> &'static Encoding {
        match self.0 {
            65001 => encoding_rs::UTF_8,
            1200 => encoding_rs::UTF_16LE,
            1201 => encoding_rs::UTF_16BE,
            1252 => encoding_rs::WINDOWS_1252,
            28591 => encoding_rs::WINDOWS_1252, // closest available to Latin-1
            20127 => encoding_rs::UTF_8,        // ASCII is a UTF-8 subset
            _ => encoding_rs::UTF_8,
        }
    }
}

impl Default for CodePage {
    fn default() -> Self {
        Self::UTF8
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_codepage_falls_back_to_utf8() {
        assert_eq!(CodePage(999999).encoding(), encoding_rs::UTF_8);
    }

    #[test]
    fn known_codepages_resolve() {
        assert_eq!(CodePage::UTF16_LE.encoding(), encoding_rs::UTF_16LE);
    }
}
