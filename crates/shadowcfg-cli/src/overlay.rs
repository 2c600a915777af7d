use std::fs;

use anyhow::Context;
use shadowcfg::coe::EncodeOptions;
use shadowcfg::pci::RawConfigSpace;
use shadowcfg::{clone_overlay, CloneOptions};

use crate::config::{looks_like_hex, InputFormat, OverlayConfig};

pub fn run(config: &OverlayConfig) -> anyhow::Result<()> {
    let bytes = fs::read(&config.config_space)
        .with_context(|| format!("read {}", config.config_space.display()))?;
    let hex = match config.format {
        InputFormat::Auto => looks_like_hex(&bytes),
        InputFormat::Binary => false,
        InputFormat::Hex => true,
    };
    let raw = if hex {
        let text = String::from_utf8(bytes).context("hex dump is not UTF-8")?;
        RawConfigSpace::from_hex(&text)
    } else {
        RawConfigSpace::new(bytes)
    }
    .with_context(|| format!("load {}", config.config_space.display()))?;

    let options = CloneOptions {
        bar_probes: config.bar_probes,
        encode: EncodeOptions {
            words_per_line: config.words_per_line,
        },
        require_complete_chain: config.strict_capabilities,
    };
    let artifacts = clone_overlay(raw, &config.identity, &options)?;
    artifacts
        .write_to(&config.out_dir)
        .with_context(|| format!("write artifacts to {}", config.out_dir.display()))?;

    let header = artifacts.header();
    println!(
        "{:04x}:{:04x} rev {:02x} class {:06x} subsystem {:04x}:{:04x}",
        header.vendor_id(),
        header.device_id(),
        header.revision_id(),
        header.class_code(),
        header.subsystem_vendor_id(),
        header.subsystem_device_id(),
    );
    for cap in artifacts.capabilities() {
        println!("  {:#05x} {}", cap.offset, cap.name());
    }
    if let Some(anomaly) = artifacts.chain_anomaly() {
        println!("  capability walk truncated: {anomaly}");
    }
    println!(
        "{} bytes, {} writable bits -> {}",
        artifacts.mask.len(),
        artifacts.mask.writable_bits(),
        config.out_dir.display()
    );
    Ok(())
}
