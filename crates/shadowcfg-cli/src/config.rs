use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use shadowcfg::writemask::{BarProbe, BarProbes};
use shadowcfg::DonorIdentity;
use shadowcfg_abi::{KernelRelease, ResolverConfig};

#[derive(Debug, Clone, Parser)]
#[command(name = "shadowcfg", version, about)]
struct Args {
    /// Log filter (tracing-subscriber EnvFilter syntax). Overrides `RUST_LOG`.
    ///
    /// Environment variable: `SHADOWCFG_LOG_LEVEL`.
    #[arg(long, global = true, env = "SHADOWCFG_LOG_LEVEL")]
    log_level: Option<String>,

    /// Emit logs as JSON lines on stderr.
    ///
    /// Environment variable: `SHADOWCFG_LOG_JSON`.
    #[arg(long, global = true, env = "SHADOWCFG_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: CommandArgs,
}

#[derive(Debug, Clone, Subcommand)]
enum CommandArgs {
    /// Build the configuration-space and write-mask COE artifacts from a donor capture.
    Overlay(OverlayArgs),
    /// Resolve VFIO ioctl numbers for a kernel release, reusing the per-release cache.
    Abi(AbiArgs),
}

#[derive(Debug, Clone, clap::Args)]
struct OverlayArgs {
    /// Donor configuration-space capture: raw bytes or a hex dump.
    ///
    /// Environment variable: `SHADOWCFG_CONFIG_SPACE`.
    #[arg(long, value_name = "PATH", env = "SHADOWCFG_CONFIG_SPACE")]
    config_space: PathBuf,

    #[arg(long, value_enum, default_value_t = InputFormat::Auto)]
    format: InputFormat,

    /// Directory the two COE files are written to.
    ///
    /// Environment variable: `SHADOWCFG_OUT_DIR`.
    #[arg(long, value_name = "DIR", env = "SHADOWCFG_OUT_DIR")]
    out_dir: Option<PathBuf>,

    /// Expected vendor id (hex), checked against the capture.
    #[arg(long, value_parser = parse_hex_u16)]
    vendor_id: Option<u16>,

    #[arg(long, value_parser = parse_hex_u16)]
    device_id: Option<u16>,

    #[arg(long, value_parser = parse_hex_u8)]
    revision_id: Option<u8>,

    /// Expected 24-bit class code (hex), e.g. `040300`.
    #[arg(long, value_parser = parse_class_code)]
    class_code: Option<u32>,

    #[arg(long, value_parser = parse_hex_u16)]
    subsystem_vendor_id: Option<u16>,

    #[arg(long, value_parser = parse_hex_u16)]
    subsystem_device_id: Option<u16>,

    /// BAR sizing readback as `INDEX=VALUE` (the value read back after writing all-ones).
    /// Repeatable.
    #[arg(long = "bar-probe", value_name = "INDEX=VALUE")]
    bar_probes: Vec<BarProbe>,

    #[arg(long, value_name = "N", default_value_t = 4)]
    words_per_line: usize,

    /// Fail instead of warning when the capability walk is truncated.
    #[arg(long)]
    strict_capabilities: bool,
}

#[derive(Debug, Clone, clap::Args)]
struct AbiArgs {
    /// Directory holding one `<release>.json` per kernel release.
    ///
    /// Environment variable: `SHADOWCFG_ABI_CACHE_DIR`.
    #[arg(long, value_name = "DIR", env = "SHADOWCFG_ABI_CACHE_DIR")]
    cache_dir: Option<PathBuf>,

    /// Kernel release to resolve for. Defaults to the running kernel.
    ///
    /// Environment variable: `SHADOWCFG_KERNEL_RELEASE`.
    #[arg(long, env = "SHADOWCFG_KERNEL_RELEASE")]
    kernel_release: Option<String>,

    /// Extra header search directory. Repeatable.
    ///
    /// Environment variable: `SHADOWCFG_INCLUDE_DIRS` (colon separated).
    #[arg(
        long = "include-dir",
        value_name = "DIR",
        env = "SHADOWCFG_INCLUDE_DIRS",
        value_delimiter = ':'
    )]
    include_dirs: Vec<PathBuf>,

    /// Constant to resolve instead of the default VFIO set. Repeatable.
    #[arg(long = "constant", value_name = "NAME")]
    constants: Vec<String>,

    /// Budget for compiling and running the probe.
    ///
    /// Environment variable: `SHADOWCFG_ABI_TIMEOUT_SECS`.
    #[arg(long, value_name = "SECS", env = "SHADOWCFG_ABI_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// C compiler. Defaults to `$CC`, then `cc`.
    #[arg(long, value_name = "PATH")]
    cc: Option<OsString>,

    /// Drop any cached entry for the release before resolving.
    #[arg(long)]
    refresh: bool,

    /// Print the resolved table as JSON instead of `NAME=VALUE` lines.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// Hex dump if the file is nothing but hex digits and whitespace, raw bytes otherwise.
    Auto,
    Binary,
    Hex,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Explicit filter; `None` falls back to `RUST_LOG`, then `info`.
    pub log_level: Option<String>,
    pub log_json: bool,
    pub command: Command,
}

#[derive(Debug, Clone)]
pub enum Command {
    Overlay(OverlayConfig),
    Abi(AbiConfig),
}

#[derive(Debug, Clone)]
pub struct OverlayConfig {
    pub config_space: PathBuf,
    pub format: InputFormat,
    pub out_dir: PathBuf,
    pub identity: DonorIdentity,
    pub bar_probes: BarProbes,
    pub words_per_line: usize,
    pub strict_capabilities: bool,
}

#[derive(Debug, Clone)]
pub struct AbiConfig {
    pub cache_dir: PathBuf,
    pub kernel_release: Option<KernelRelease>,
    pub resolver: ResolverConfig,
    pub compiler: Option<OsString>,
    pub refresh: bool,
    pub json: bool,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_args(Args::parse())
    }

    #[cfg(test)]
    fn parse_from<I, T>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::from_args(Args::try_parse_from(args)?)
    }

    fn from_args(args: Args) -> anyhow::Result<Self> {
        let command = match args.command {
            CommandArgs::Overlay(overlay) => Command::Overlay(OverlayConfig::from_args(overlay)?),
            CommandArgs::Abi(abi) => Command::Abi(AbiConfig::from_args(abi)?),
        };
        let log_level = args.log_level.and_then(|v| {
            let v = v.trim().to_string();
            (!v.is_empty()).then_some(v)
        });
        Ok(Self {
            log_level,
            log_json: args.log_json,
            command,
        })
    }
}

impl OverlayConfig {
    fn from_args(args: OverlayArgs) -> anyhow::Result<Self> {
        let bar_probes =
            BarProbes::from_assignments(args.bar_probes).context("invalid --bar-probe")?;
        if args.words_per_line == 0 {
            anyhow::bail!("--words-per-line must be at least 1");
        }
        Ok(Self {
            config_space: args.config_space,
            format: args.format,
            out_dir: args.out_dir.unwrap_or_else(|| PathBuf::from(".")),
            identity: DonorIdentity {
                vendor_id: args.vendor_id,
                device_id: args.device_id,
                revision_id: args.revision_id,
                class_code: args.class_code,
                subsystem_vendor_id: args.subsystem_vendor_id,
                subsystem_device_id: args.subsystem_device_id,
            },
            bar_probes,
            words_per_line: args.words_per_line,
            strict_capabilities: args.strict_capabilities,
        })
    }
}

impl AbiConfig {
    fn from_args(args: AbiArgs) -> anyhow::Result<Self> {
        let kernel_release = args
            .kernel_release
            .map(|release| KernelRelease::new(release.trim()))
            .transpose()
            .context("invalid --kernel-release")?;

        let mut resolver = ResolverConfig {
            include_dirs: args.include_dirs,
            ..ResolverConfig::default()
        };
        if !args.constants.is_empty() {
            resolver.constants = args.constants;
        }
        if let Some(secs) = args.timeout_secs {
            if secs == 0 {
                anyhow::bail!("--timeout-secs must be at least 1");
            }
            resolver.timeout = Duration::from_secs(secs);
        }

        Ok(Self {
            cache_dir: args.cache_dir.unwrap_or_else(default_cache_dir),
            kernel_release,
            resolver,
            compiler: args.cc,
            refresh: args.refresh,
            json: args.json,
        })
    }
}

fn default_cache_dir() -> PathBuf {
    env::var_os("XDG_CACHE_HOME")
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .or_else(|| env::var_os("HOME").map(|home| PathBuf::from(home).join(".cache")))
        .map(|base| base.join("shadowcfg").join("abi"))
        .unwrap_or_else(|| PathBuf::from(".shadowcfg-abi"))
}

fn parse_hex(s: &str) -> Result<u32, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(digits, 16).map_err(|err| format!("invalid hex value {s:?}: {err}"))
}

fn parse_hex_u16(s: &str) -> Result<u16, String> {
    u16::try_from(parse_hex(s)?).map_err(|_| format!("{s:?} does not fit in 16 bits"))
}

fn parse_hex_u8(s: &str) -> Result<u8, String> {
    u8::try_from(parse_hex(s)?).map_err(|_| format!("{s:?} does not fit in 8 bits"))
}

fn parse_class_code(s: &str) -> Result<u32, String> {
    let value = parse_hex(s)?;
    if value > 0x00FF_FFFF {
        return Err(format!("{s:?} does not fit in 24 bits"));
    }
    Ok(value)
}

/// Whether a capture file looks like a hex dump rather than raw bytes.
pub fn looks_like_hex(bytes: &[u8]) -> bool {
    let mut digits = 0usize;
    for &b in bytes {
        if b.is_ascii_hexdigit() {
            digits += 1;
        } else if !b.is_ascii_whitespace() {
            return false;
        }
    }
    digits > 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overlay_args_resolve_into_config() {
        let config = Config::parse_from([
            "shadowcfg",
            "--log-level",
            "debug",
            "overlay",
            "--config-space",
            "donor.bin",
            "--vendor-id",
            "0x8086",
            "--class-code",
            "040300",
            "--bar-probe",
            "0=0xfffff000",
            "--bar-probe",
            "2=0xffffc00c",
            "--out-dir",
            "out",
        ])
        .unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        let Command::Overlay(overlay) = config.command else {
            panic!("expected overlay");
        };
        assert_eq!(overlay.config_space, PathBuf::from("donor.bin"));
        assert_eq!(overlay.out_dir, PathBuf::from("out"));
        assert_eq!(overlay.identity.vendor_id, Some(0x8086));
        assert_eq!(overlay.identity.class_code, Some(0x040300));
        assert_eq!(overlay.identity.device_id, None);
        assert_eq!(overlay.bar_probes.get(0), Some(0xFFFF_F000));
        assert_eq!(overlay.bar_probes.get(2), Some(0xFFFF_C00C));
        assert_eq!(overlay.bar_probes.get(1), None);
        assert_eq!(overlay.words_per_line, 4);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for args in [
            &["shadowcfg", "overlay", "--config-space", "x", "--vendor-id", "12345"][..],
            &["shadowcfg", "overlay", "--config-space", "x", "--class-code", "1000000"],
            &["shadowcfg", "overlay", "--config-space", "x", "--bar-probe", "6=0"],
            &["shadowcfg", "overlay", "--config-space", "x", "--words-per-line", "0"],
            &["shadowcfg", "abi", "--kernel-release", "../etc"],
            &["shadowcfg", "abi", "--timeout-secs", "0"],
        ] {
            assert!(Config::parse_from(args).is_err(), "{args:?}");
        }
    }

    #[test]
    fn abi_args_resolve_into_config() {
        let config = Config::parse_from([
            "shadowcfg",
            "abi",
            "--cache-dir",
            "/var/cache/shadowcfg",
            "--kernel-release",
            "6.8.0-45-generic",
            "--include-dir",
            "/opt/kernel/include",
            "--constant",
            "VFIO_GET_API_VERSION",
            "--timeout-secs",
            "5",
        ])
        .unwrap();
        let Command::Abi(abi) = config.command else {
            panic!("expected abi");
        };
        assert_eq!(abi.cache_dir, PathBuf::from("/var/cache/shadowcfg"));
        assert_eq!(
            abi.kernel_release.as_ref().map(KernelRelease::as_str),
            Some("6.8.0-45-generic")
        );
        assert_eq!(
            abi.resolver.include_dirs,
            vec![PathBuf::from("/opt/kernel/include")]
        );
        assert_eq!(abi.resolver.constants, vec!["VFIO_GET_API_VERSION"]);
        assert_eq!(abi.resolver.timeout, Duration::from_secs(5));
        assert_eq!(abi.resolver.headers, ResolverConfig::default().headers);
    }

    #[test]
    fn hex_detection() {
        assert!(looks_like_hex(b"86 80 0c 0a\n06 04 10 00\n"));
        assert!(!looks_like_hex(b""));
        assert!(!looks_like_hex(&[0x86, 0x80, 0x0C, 0x0A]));
    }
}
