use anyhow::Context;
use shadowcfg_abi::ioctl::IoctlFields;
use shadowcfg_abi::{AbiResolver, CcProbe, JsonFileAbiStore, KernelRelease};

use crate::config::AbiConfig;

pub fn run(config: &AbiConfig) -> anyhow::Result<()> {
    let release = match &config.kernel_release {
        Some(release) => release.clone(),
        None => KernelRelease::current().context("determine running kernel release")?,
    };
    let store = JsonFileAbiStore::open(&config.cache_dir)
        .with_context(|| format!("open ABI cache {}", config.cache_dir.display()))?;
    let probe = match &config.compiler {
        Some(cc) => CcProbe::with_compiler(cc.clone()),
        None => CcProbe::new(),
    };
    let resolver = AbiResolver::new(probe, store, config.resolver.clone());

    if config.refresh && resolver.invalidate(&release)? {
        tracing::info!(%release, "dropped cached ABI constants");
    }
    let resolved = resolver
        .resolve(&release)
        .with_context(|| format!("resolve ABI constants for kernel {release}"))?;

    if config.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
        return Ok(());
    }
    for (name, value) in resolved.constants.iter() {
        match IoctlFields::decode(value) {
            Some(fields) => println!("{name}={value:#x}  # {fields}"),
            None => println!("{name}={value:#x}"),
        }
    }
    Ok(())
}
