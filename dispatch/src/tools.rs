//! Tool Classification
//!
//! Maps a tool identifier to the backend category that processes it.
//!
//! # Routing Table
//!
//! ```text
//! "pdf-*"          → Pdf          (prefix match)
//! "bg-remover"     → Image        (exact match)
//! "gif-maker"      → Media
//! "pan-validator"  → Government
//! "json-formatter" → Developer
//! anything else    → not found
//! ```
//!
//! The table is static. Adding a tool means adding its name to the one slice
//! below that belongs to its category.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend category a tool is routed to
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCategory {
    Pdf,
    Image,
    Media,
    Government,
    Developer,
}

impl ToolCategory {
    pub const ALL: [ToolCategory; 5] = [
        ToolCategory::Pdf,
        ToolCategory::Image,
        ToolCategory::Media,
        ToolCategory::Government,
        ToolCategory::Developer,
    ];

    pub const fn as_str(&self) -> &'static str {
        match self {
            ToolCategory::Pdf => "pdf",
            ToolCategory::Image => "image",
            ToolCategory::Media => "media",
            ToolCategory::Government => "government",
            ToolCategory::Developer => "developer",
        }
    }

    /// Position of the category in [`ToolCategory::ALL`]
    pub(crate) const fn index(&self) -> usize {
        *self as usize
    }
}

impl fmt::Display for ToolCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a category recognizes its tools
#[derive(Clone, Copy, Debug)]
pub enum Membership {
    /// Any tool whose name is the prefix followed by a non-empty slug of
    /// ASCII alphanumerics and dashes
    Prefix(&'static str),
    /// Exactly the listed tool names
    Names(&'static [&'static str]),
}

impl Membership {
    fn contains(&self, tool_name: &str) -> bool {
        match self {
            Membership::Prefix(prefix) => tool_name
                .strip_prefix(prefix)
                .is_some_and(|rest| {
                    !rest.is_empty()
                        && rest.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
                }),
            Membership::Names(names) => names.contains(&tool_name),
        }
    }
}

const IMAGE_TOOLS: &[&str] = &[
    "bg-remover",
    "image-resizer",
    "image-compressor",
    "image-converter",
    "image-flipper",
    "image-rotator",
    "image-cropper",
    "image-filter",
    "image-blur",
    "image-sharpen",
    "image-brightness",
    "image-contrast",
    "image-saturation",
    "image-watermark",
    "image-border",
    "image-frames",
    "meme-generator",
    "image-collage",
    "image-metadata-extractor",
    "image-optimizer",
];

const MEDIA_TOOLS: &[&str] = &[
    "audio-converter",
    "video-converter",
    "audio-trimmer",
    "video-trimmer",
    "audio-extractor",
    "video-extractor",
    "audio-merger",
    "video-merger",
    "volume-changer",
    "speed-changer",
    "pitch-changer",
    "audio-reverser",
    "video-reverser",
    "noise-reducer",
    "echo-remover",
    "audio-normalizer",
    "video-resizer",
    "video-cropper",
    "subtitle-extractor",
    "gif-maker",
];

const GOVERNMENT_TOOLS: &[&str] = &[
    "pan-validator",
    "gst-validator",
    "aadhaar-validator",
    "aadhaar-masker",
    "pan-masker",
    "bank-validator",
    "ifsc-validator",
    "pincode-validator",
    "voter-id-validator",
    "passport-validator",
    "driving-license-validator",
    "income-certificate",
    "caste-certificate",
    "domicile-certificate",
    "character-certificate",
];

const DEVELOPER_TOOLS: &[&str] = &[
    "json-formatter",
    "base64-encoder",
    "hash-generator",
    "password-generator",
    "qr-generator",
    "color-picker",
    "lorem-ipsum",
    "url-encoder",
    "timestamp-converter",
    "regex-tester",
    "markdown-to-html",
    "css-minifier",
    "js-minifier",
];

/// The routing table, keyed by category
pub const ROUTING_TABLE: &[(ToolCategory, Membership)] = &[
    (ToolCategory::Pdf, Membership::Prefix("pdf-")),
    (ToolCategory::Image, Membership::Names(IMAGE_TOOLS)),
    (ToolCategory::Media, Membership::Names(MEDIA_TOOLS)),
    (ToolCategory::Government, Membership::Names(GOVERNMENT_TOOLS)),
    (ToolCategory::Developer, Membership::Names(DEVELOPER_TOOLS)),
];

/// Returns the category of `tool_name`, or `None` if no category claims it.
pub fn classify(tool_name: &str) -> Option<ToolCategory> {
    ROUTING_TABLE
        .iter()
        .find(|(_, membership)| membership.contains(tool_name))
        .map(|(category, _)| *category)
}

/// Renders the routing table, one category per line.
pub fn describe_routing_table() -> String {
    let mut out = String::new();
    for (category, membership) in ROUTING_TABLE {
        let members = match membership {
            Membership::Prefix(prefix) => format!("{prefix}*"),
            Membership::Names(names) => names.join(", "),
        };
        out.push_str(&format!("{category}: {members}\n"));
    }
    out
}
