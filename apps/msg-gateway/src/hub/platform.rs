//! Device classes a session can connect from, and the pure eligibility
//! rules computed over them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumerated device class of a session. The discriminant is the wire ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Platform {
    Ios = 1,
    Android = 2,
    Windows = 3,
    Osx = 4,
    Web = 5,
    MiniWeb = 6,
    Linux = 7,
    AndroidPad = 8,
    IPad = 9,
    Admin = 10,
}

/// Coarse grouping used by the login conflict policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlatformClass {
    Mobile,
    Pad,
    Pc,
    Web,
}

impl Platform {
    pub const ALL: [Platform; 10] = [
        Platform::Ios,
        Platform::Android,
        Platform::Windows,
        Platform::Osx,
        Platform::Web,
        Platform::MiniWeb,
        Platform::Linux,
        Platform::AndroidPad,
        Platform::IPad,
        Platform::Admin,
    ];

    pub fn from_id(id: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.id() == id)
    }

    pub fn id(self) -> i32 {
        self as i32
    }

    /// Human-readable label reported by presence queries.
    pub fn label(self) -> &'static str {
        match self {
            Platform::Ios => "IOS",
            Platform::Android => "Android",
            Platform::Windows => "Windows",
            Platform::Osx => "OSX",
            Platform::Web => "Web",
            Platform::MiniWeb => "MiniWebApp",
            Platform::Linux => "Linux",
            Platform::AndroidPad => "AndroidPad",
            Platform::IPad => "IPad",
            Platform::Admin => "Admin",
        }
    }

    pub fn class(self) -> PlatformClass {
        match self {
            Platform::Ios | Platform::Android => PlatformClass::Mobile,
            Platform::AndroidPad | Platform::IPad => PlatformClass::Pad,
            Platform::Web | Platform::MiniWeb => PlatformClass::Web,
            Platform::Windows | Platform::Osx | Platform::Linux | Platform::Admin => {
                PlatformClass::Pc
            }
        }
    }

    /// Parse either a numeric ID (`"1"`) or a label (`"IOS"`, case-insensitive).
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if let Ok(id) = raw.parse::<i32>() {
            return Self::from_id(id);
        }
        Self::ALL
            .into_iter()
            .find(|p| p.label().eq_ignore_ascii_case(raw))
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl From<Platform> for i32 {
    fn from(p: Platform) -> Self {
        p.id()
    }
}

impl TryFrom<i32> for Platform {
    type Error = String;

    fn try_from(id: i32) -> Result<Self, Self::Error> {
        Platform::from_id(id).ok_or_else(|| format!("unknown platform id {id}"))
    }
}

/// The set of platforms for which a successful in-session delivery also
/// satisfies the "needs external push" requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushTerminals(Vec<Platform>);

impl PushTerminals {
    pub fn new(platforms: impl IntoIterator<Item = Platform>) -> Self {
        let mut v: Vec<Platform> = platforms.into_iter().collect();
        v.sort();
        v.dedup();
        Self(v)
    }

    pub fn contains(&self, platform: Platform) -> bool {
        self.0.contains(&platform)
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.0
    }
}

impl Default for PushTerminals {
    fn default() -> Self {
        Self::new([Platform::Ios, Platform::Android])
    }
}

/// What the fanout engine may do with one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Client is backgrounded; no attempt is made.
    Suppress,
    /// Attempt delivery; `counts_as_push` marks a push-eligible terminal.
    Attempt { counts_as_push: bool },
}

/// Decide delivery for a session from its platform and background flag.
pub fn delivery_for(platform: Platform, is_background: bool, terminals: &PushTerminals) -> Delivery {
    if is_background {
        Delivery::Suppress
    } else {
        Delivery::Attempt {
            counts_as_push: terminals.contains(platform),
        }
    }
}
