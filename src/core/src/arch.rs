//! Target architecture vocabulary.
//!
//! Models the architecture slugs found in compositions and maps them to the
//! platform strings the container daemon understands.

/// Target CPU architecture of a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// 64-bit x86 (`amd64`, `x86_64`).
    Amd64,
    /// 32-bit x86 (`i386`, `x86`).
    I386,
    /// 32-bit ARM with hardware float (`armv7hf`, `armhf`).
    Armv7hf,
    /// 64-bit ARM (`aarch64`, `arm64`).
    Aarch64,
    /// ARMv6, as on early Raspberry Pi models (`rpi`, `armv6`).
    Rpi,
}

impl Arch {
    /// Docker platform string for this architecture, e.g.
    /// `Armv7hf` -> `linux/arm/v7`.
    pub fn docker_platform(&self) -> &'static str {
        match self {
            Self::Amd64 => "linux/amd64",
            Self::I386 => "linux/386",
            Self::Armv7hf => "linux/arm/v7",
            Self::Aarch64 => "linux/arm64",
            Self::Rpi => "linux/arm/v6",
        }
    }
}

impl std::fmt::Display for Arch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::I386 => write!(f, "i386"),
            Self::Armv7hf => write!(f, "armv7hf"),
            Self::Aarch64 => write!(f, "aarch64"),
            Self::Rpi => write!(f, "rpi"),
        }
    }
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "x86_64" | "amd64" => Ok(Self::Amd64),
            "i386" | "x86" => Ok(Self::I386),
            "armv7hf" | "armhf" => Ok(Self::Armv7hf),
            "aarch64" | "arm64" => Ok(Self::Aarch64),
            "rpi" | "armv6" => Ok(Self::Rpi),
            _ => Err(format!(
                "unknown architecture: '{}' (supported: amd64, i386, armv7hf, aarch64, rpi)",
                s
            )),
        }
    }
}

/// Docker platform string for a target architecture slug. Returns `None` for
/// unknown architectures, in which case no `--platform` is passed to the
/// daemon.
pub fn docker_platform(arch: &str) -> Option<&'static str> {
    arch.parse::<Arch>().ok().map(|a| a.docker_platform())
}
