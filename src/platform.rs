//! Platform types and host detection

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Known IDE distribution flavors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlatformType {
    /// IntelliJ IDEA Community
    IC,
    /// IntelliJ IDEA Ultimate
    IU,
    /// PyCharm Community
    PC,
    /// PyCharm Professional
    PY,
    /// GoLand
    GO,
    /// CLion
    CL,
    /// Rider
    RD,
    /// PhpStorm
    PS,
    /// WebStorm
    WS,
    /// Gateway
    GW,
    /// Android Studio
    AI,
}

/// Unrecognized platform type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown platform type '{value}' (expected one of: {})", PlatformType::codes().join(", "))]
pub struct UnknownPlatformType {
    pub value: String,
}

impl PlatformType {
    pub const ALL: [PlatformType; 11] = [
        PlatformType::IC,
        PlatformType::IU,
        PlatformType::PC,
        PlatformType::PY,
        PlatformType::GO,
        PlatformType::CL,
        PlatformType::RD,
        PlatformType::PS,
        PlatformType::WS,
        PlatformType::GW,
        PlatformType::AI,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            PlatformType::IC => "IC",
            PlatformType::IU => "IU",
            PlatformType::PC => "PC",
            PlatformType::PY => "PY",
            PlatformType::GO => "GO",
            PlatformType::CL => "CL",
            PlatformType::RD => "RD",
            PlatformType::PS => "PS",
            PlatformType::WS => "WS",
            PlatformType::GW => "GW",
            PlatformType::AI => "AI",
        }
    }

    /// Long name accepted in configuration.
    pub fn name(&self) -> &'static str {
        match self {
            PlatformType::IC => "IntellijIdeaCommunity",
            PlatformType::IU => "IntellijIdeaUltimate",
            PlatformType::PC => "PyCharmCommunity",
            PlatformType::PY => "PyCharmProfessional",
            PlatformType::GO => "GoLand",
            PlatformType::CL => "CLion",
            PlatformType::RD => "Rider",
            PlatformType::PS => "PhpStorm",
            PlatformType::WS => "WebStorm",
            PlatformType::GW => "Gateway",
            PlatformType::AI => "AndroidStudio",
        }
    }

    fn codes() -> Vec<&'static str> {
        Self::ALL.iter().map(|t| t.code()).collect()
    }

    /// Maven group path and artifact id in the IntelliJ repository.
    ///
    /// `None` for Android Studio, which is distributed from its own host.
    pub fn maven_artifact(&self) -> Option<(&'static str, &'static str)> {
        match self {
            PlatformType::IC => Some(("com/jetbrains/intellij/idea", "ideaIC")),
            PlatformType::IU => Some(("com/jetbrains/intellij/idea", "ideaIU")),
            PlatformType::PC => Some(("com/jetbrains/intellij/pycharm", "pycharmPC")),
            PlatformType::PY => Some(("com/jetbrains/intellij/pycharm", "pycharmPY")),
            PlatformType::GO => Some(("com/jetbrains/intellij/goland", "goland")),
            PlatformType::CL => Some(("com/jetbrains/intellij/clion", "clion")),
            PlatformType::RD => Some(("com/jetbrains/intellij/rider", "riderRD")),
            PlatformType::PS => Some(("com/jetbrains/intellij/phpstorm", "phpstorm")),
            PlatformType::WS => Some(("com/jetbrains/intellij/webstorm", "webstorm")),
            PlatformType::GW => Some(("com/jetbrains/intellij/gateway", "gateway")),
            PlatformType::AI => None,
        }
    }

    /// Code used by the JetBrains product-releases service.
    pub fn release_code(&self) -> Option<&'static str> {
        match self {
            PlatformType::IC => Some("IIC"),
            PlatformType::IU => Some("IIU"),
            PlatformType::PC => Some("PCC"),
            PlatformType::PY => Some("PCP"),
            PlatformType::GO => Some("GO"),
            PlatformType::CL => Some("CL"),
            PlatformType::RD => Some("RD"),
            PlatformType::PS => Some("PS"),
            PlatformType::WS => Some("WS"),
            PlatformType::GW => Some("GW"),
            PlatformType::AI => None,
        }
    }

    /// Whether a sources jar is published next to the distribution.
    pub fn publishes_sources(&self) -> bool {
        matches!(self, PlatformType::IC | PlatformType::IU)
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for PlatformType {
    type Err = UnknownPlatformType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value = s.trim();
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.code().eq_ignore_ascii_case(value) || t.name().eq_ignore_ascii_case(value))
            .ok_or_else(|| UnknownPlatformType {
                value: s.to_string(),
            })
    }
}

/// Operating system and architecture names as used in download URLs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPlatform {
    /// `linux`, `osx` or `windows`
    pub os: String,
    /// `x64` or `aarch64`
    pub arch: String,
}

impl HostPlatform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The machine this process runs on.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "osx",
            "windows" => "windows",
            _ => "linux",
        };
        let arch = match std::env::consts::ARCH {
            "aarch64" => "aarch64",
            _ => "x64",
        };
        Self::new(os, arch)
    }
}
