//! Owner identifiers used for reference accounting

use std::fmt;

use serde::{Deserialize, Serialize};

/// Accounting tag naming the subsystem that holds a reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OwnerId(pub u32);

impl OwnerId {
    /// "Don't care which owner"
    pub const UNSPECIFIED: OwnerId = OwnerId(u32::MAX);

    pub const COLLATOR: OwnerId = OwnerId(0x0001);
    pub const FRAME_PARSER: OwnerId = OwnerId(0x0002);
    pub const CODEC: OwnerId = OwnerId(0x0003);
    pub const MANIFESTOR: OwnerId = OwnerId(0x0004);
    pub const OUTPUT_TIMER: OwnerId = OwnerId(0x0005);
    pub const OUTPUT_COORDINATOR: OwnerId = OwnerId(0x0006);
    pub const PROCESS_COLLATE_TO_PARSE: OwnerId = OwnerId(0x0101);
    pub const PROCESS_PARSE_TO_DECODE: OwnerId = OwnerId(0x0102);
    pub const PROCESS_DECODE_TO_MANIFEST: OwnerId = OwnerId(0x0103);
    pub const PROCESS_POST_MANIFEST: OwnerId = OwnerId(0x0104);
    pub const EXTERNAL: OwnerId = OwnerId(0x0200);
    /// Reference held on behalf of a linked buffer
    pub const ATTACHED_TO_OTHER_BUFFER: OwnerId = OwnerId(0x0201);

    pub fn is_unspecified(&self) -> bool {
        *self == Self::UNSPECIFIED
    }

    /// Well-known name, if any
    pub fn well_known_name(&self) -> Option<&'static str> {
        Some(match *self {
            Self::UNSPECIFIED => "unspecified",
            Self::COLLATOR => "collator",
            Self::FRAME_PARSER => "frame-parser",
            Self::CODEC => "codec",
            Self::MANIFESTOR => "manifestor",
            Self::OUTPUT_TIMER => "output-timer",
            Self::OUTPUT_COORDINATOR => "output-coordinator",
            Self::PROCESS_COLLATE_TO_PARSE => "process-collate-to-parse",
            Self::PROCESS_PARSE_TO_DECODE => "process-parse-to-decode",
            Self::PROCESS_DECODE_TO_MANIFEST => "process-decode-to-manifest",
            Self::PROCESS_POST_MANIFEST => "process-post-manifest",
            Self::EXTERNAL => "external",
            Self::ATTACHED_TO_OTHER_BUFFER => "attached-to-other-buffer",
            _ => return None,
        })
    }
}

impl Default for OwnerId {
    fn default() -> Self {
        Self::UNSPECIFIED
    }
}

impl From<u32> for OwnerId {
    fn from(raw: u32) -> Self {
        OwnerId(raw)
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.well_known_name() {
            Some(name) => f.write_str(name),
            None => write!(f, "owner-{:#06x}", self.0),
        }
    }
}
