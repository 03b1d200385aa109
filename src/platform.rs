//! Host platform detection.
//!
//! Supplies the Docker-convention architecture and OS strings recorded in
//! synthesized image configs when a source tarball carries no metadata.

/// Host operating system, in Docker naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Os {
    Linux,
    Darwin,
    Windows,
    Other,
}

/// Host CPU architecture, in Docker naming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Arch {
    Amd64,
    Arm64,
    Arm,
    Other,
}

impl Os {
    /// Detects the host operating system.
    pub fn detect() -> Self {
        match std::env::consts::OS {
            "linux" => Os::Linux,
            "macos" => Os::Darwin,
            "windows" => Os::Windows,
            _ => Os::Other,
        }
    }

    /// Returns the Docker-convention OS string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Linux => "linux",
            Os::Darwin => "darwin",
            Os::Windows => "windows",
            Os::Other => std::env::consts::OS,
        }
    }
}

impl Arch {
    /// Detects the host CPU architecture.
    pub fn detect() -> Self {
        match std::env::consts::ARCH {
            "x86_64" => Arch::Amd64,
            "aarch64" => Arch::Arm64,
            "arm" => Arch::Arm,
            _ => Arch::Other,
        }
    }

    /// Returns the Docker-convention architecture string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Arch::Amd64 => "amd64",
            Arch::Arm64 => "arm64",
            Arch::Arm => "arm",
            Arch::Other => std::env::consts::ARCH,
        }
    }
}

/// Returns the host OS string for synthesized configs.
pub fn host_os() -> &'static str {
    Os::detect().as_str()
}

/// Returns the host architecture string for synthesized configs.
pub fn host_arch() -> &'static str {
    Arch::detect().as_str()
}
