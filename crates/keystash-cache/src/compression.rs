//! Compression method negotiation.
//!
//! The method is chosen once per save from a [`ProbeResult`] describing the
//! host, then travels with the archive as object metadata. The restore side
//! never probes to decide how to decompress.

use async_trait::async_trait;
use keystash_core::CompressionMethod;
use regex::Regex;
use semver::Version;
use std::sync::LazyLock;
use tokio::process::Command;
use tracing::{debug, info};

/// Oldest zstd release that understands `--long`.
pub const ZSTD_LONG_MIN_VERSION: Version = Version::new(1, 3, 2);

// Banner wording changed across zstd releases.
const ZSTD_BANNERS: [&str; 2] = ["zstd command line interface", "zstandard cli"];

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"v(\d+(?:\.\d+)*)").expect("valid version regex"));

/// Operating system family of the host creating an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(windows) {
            Platform::Windows
        } else {
            Platform::Unix
        }
    }
}

/// What running `zstd --version` revealed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZstdProbe {
    /// The binary could not be started.
    Missing,
    /// Something answered, but not a zstd CLI we recognise.
    Unrecognized,
    /// A zstd CLI, with its version when one could be parsed.
    Available { version: Option<Version> },
}

impl ZstdProbe {
    /// Classify the output of `zstd --version`.
    pub fn from_version_output(output: &str) -> Self {
        let lowered = output.to_lowercase();
        if !ZSTD_BANNERS.iter().any(|banner| lowered.contains(banner)) {
            return ZstdProbe::Unrecognized;
        }

        let version = VERSION_RE
            .captures(output)
            .and_then(|caps| caps.get(1))
            .and_then(|m| parse_loose_version(m.as_str()));

        ZstdProbe::Available { version }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, ZstdProbe::Available { .. })
    }

    /// The binary starts, whatever its banner says.
    pub fn is_runnable(&self) -> bool {
        !matches!(self, ZstdProbe::Missing)
    }
}

/// Parse `1`, `1.5` or `1.5.6.1` style versions, padding or truncating to
/// three components.
fn parse_loose_version(raw: &str) -> Option<Version> {
    let mut parts = raw.split('.').map(|p| p.parse::<u64>());
    let major = parts.next()?.ok()?;
    let minor = parts.next().transpose().ok()?.unwrap_or(0);
    let patch = parts.next().transpose().ok()?.unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

/// Snapshot of the capabilities that decide the compression method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub platform: Platform,
    pub zstd: ZstdProbe,
}

/// Pick the compression method for a new archive.
pub fn choose_method(probe: &ProbeResult) -> CompressionMethod {
    if probe.platform == Platform::Windows {
        return CompressionMethod::Gzip;
    }

    match &probe.zstd {
        ZstdProbe::Missing | ZstdProbe::Unrecognized => CompressionMethod::Gzip,
        ZstdProbe::Available { version: None } => CompressionMethod::ZstdWithoutLong,
        ZstdProbe::Available {
            version: Some(version),
        } if *version < ZSTD_LONG_MIN_VERSION => CompressionMethod::ZstdWithoutLong,
        ZstdProbe::Available { .. } => CompressionMethod::Zstd,
    }
}

/// Inspects the host for compression tooling.
#[async_trait]
pub trait Prober: Send + Sync {
    /// Full probe used when creating an archive.
    async fn probe(&self) -> ProbeResult;

    /// Only check for a zstd binary; used before extracting zstd archives.
    async fn probe_zstd(&self) -> ZstdProbe;
}

/// Prober that runs the `zstd` executable.
pub struct ZstdProber {
    program: String,
    platform: Platform,
}

impl ZstdProber {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            platform: Platform::current(),
        }
    }
}

impl Default for ZstdProber {
    fn default() -> Self {
        Self::new("zstd")
    }
}

#[async_trait]
impl Prober for ZstdProber {
    async fn probe(&self) -> ProbeResult {
        let zstd = if self.platform == Platform::Windows {
            ZstdProbe::Unrecognized
        } else {
            self.probe_zstd().await
        };

        ProbeResult {
            platform: self.platform,
            zstd,
        }
    }

    async fn probe_zstd(&self) -> ZstdProbe {
        // Exit status is ignored; some builds print the banner and exit 1.
        match Command::new(&self.program).arg("--version").output().await {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                let probe = ZstdProbe::from_version_output(stdout.trim());
                debug!(program = %self.program, output = %stdout.trim(), ?probe, "Probed zstd");
                probe
            }
            Err(e) => {
                debug!(program = %self.program, error = %e, "zstd not runnable");
                ZstdProbe::Missing
            }
        }
    }
}

/// Chooses compression methods for new archives.
#[derive(Clone)]
pub struct Negotiator {
    prober: std::sync::Arc<dyn Prober>,
}

impl Negotiator {
    pub fn new(prober: std::sync::Arc<dyn Prober>) -> Self {
        Self { prober }
    }

    pub fn prober(&self) -> &dyn Prober {
        self.prober.as_ref()
    }

    /// Probe the host and decide. Save phase only.
    pub async fn choose_method_for_create(&self) -> CompressionMethod {
        let probe = self.prober.probe().await;
        let method = choose_method(&probe);
        info!(method = %method, ?probe, "Using compression method");
        method
    }
}

impl Default for Negotiator {
    fn default() -> Self {
        Self::new(std::sync::Arc::new(ZstdProber::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn probe(platform: Platform, zstd: ZstdProbe) -> ProbeResult {
        ProbeResult { platform, zstd }
    }

    fn available(major: u64, minor: u64, patch: u64) -> ZstdProbe {
        ZstdProbe::Available {
            version: Some(Version::new(major, minor, patch)),
        }
    }

    #[test]
    fn test_windows_always_gzip() {
        let result = choose_method(&probe(Platform::Windows, available(1, 5, 6)));
        assert_eq!(result, CompressionMethod::Gzip);
    }

    #[test]
    fn test_missing_or_unknown_zstd_is_gzip() {
        assert_eq!(
            choose_method(&probe(Platform::Unix, ZstdProbe::Missing)),
            CompressionMethod::Gzip
        );
        assert_eq!(
            choose_method(&probe(Platform::Unix, ZstdProbe::Unrecognized)),
            CompressionMethod::Gzip
        );
    }

    #[test]
    fn test_old_zstd_without_long() {
        assert_eq!(
            choose_method(&probe(Platform::Unix, available(1, 3, 1))),
            CompressionMethod::ZstdWithoutLong
        );
        assert_eq!(
            choose_method(&probe(Platform::Unix, ZstdProbe::Available { version: None })),
            CompressionMethod::ZstdWithoutLong
        );
    }

    #[test]
    fn test_modern_zstd_uses_long() {
        assert_eq!(
            choose_method(&probe(Platform::Unix, available(1, 3, 2))),
            CompressionMethod::Zstd
        );
        assert_eq!(
            choose_method(&probe(Platform::Unix, available(1, 5, 6))),
            CompressionMethod::Zstd
        );
    }

    #[test]
    fn test_parse_legacy_banner() {
        let out = "*** zstd command line interface 64-bits v1.4.4, by Yann Collet ***";
        assert_eq!(ZstdProbe::from_version_output(out), available(1, 4, 4));
    }

    #[test]
    fn test_parse_current_banner() {
        let out = "*** Zstandard CLI (64-bit) v1.5.6, by Yann Collet ***";
        assert_eq!(ZstdProbe::from_version_output(out), available(1, 5, 6));
    }

    #[test]
    fn test_parse_short_version() {
        let out = "*** zstd command line interface 32-bits v1.3, by Yann Collet ***";
        assert_eq!(ZstdProbe::from_version_output(out), available(1, 3, 0));
    }

    #[test]
    fn test_unrelated_output_is_unrecognized() {
        assert_eq!(
            ZstdProbe::from_version_output("gzip 1.12"),
            ZstdProbe::Unrecognized
        );
        assert_eq!(ZstdProbe::from_version_output(""), ZstdProbe::Unrecognized);
    }

    #[test]
    fn test_runnable_is_anything_but_missing() {
        assert!(!ZstdProbe::Missing.is_runnable());
        assert!(ZstdProbe::Unrecognized.is_runnable());
        assert!(!ZstdProbe::Unrecognized.is_available());
        assert!(available(1, 5, 6).is_runnable());
    }

    #[tokio::test]
    async fn test_missing_binary_probes_as_missing() {
        let prober = ZstdProber::new("keystash-no-such-zstd-binary");
        assert_eq!(prober.probe_zstd().await, ZstdProbe::Missing);
    }

    #[tokio::test]
    async fn test_negotiation_is_stable() {
        let negotiator = Negotiator::default();
        let first = negotiator.choose_method_for_create().await;
        let second = negotiator.choose_method_for_create().await;
        assert_eq!(first, second);
    }
}
