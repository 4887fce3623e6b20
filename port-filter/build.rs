fn main() -> anyhow::Result<()> {
    println!("cargo:rerun-if-changed=build.rs");

    #[cfg(feature = "embedded-ebpf")]
    embedded::build()?;

    Ok(())
}

#[cfg(feature = "embedded-ebpf")]
mod embedded {
    use anyhow::{Context as _, Result, anyhow};
    use aya_build::{Package, Toolchain};

    const EBPF_PACKAGE: &str = "port-filter-ebpf";

    /// Compiles the cgroup_skb program for the bpf target; the object lands in
    /// `OUT_DIR/port-filter`, named after the package's bin target.
    pub fn build() -> Result<()> {
        let cargo_metadata::Metadata { packages, .. } = cargo_metadata::MetadataCommand::new()
            .no_deps()
            .exec()
            .context("MetadataCommand::exec")?;
        let ebpf_package = packages
            .into_iter()
            .find(|cargo_metadata::Package { name, .. }| name.as_str() == EBPF_PACKAGE)
            .ok_or_else(|| anyhow!("{EBPF_PACKAGE} package not found"))?;
        let root_dir = ebpf_package
            .manifest_path
            .parent()
            .ok_or_else(|| anyhow!("no parent for {}", ebpf_package.manifest_path))?;

        let package = Package {
            name: EBPF_PACKAGE,
            root_dir: root_dir.as_str(),
            ..Default::default()
        };
        aya_build::build_ebpf([package], Toolchain::default())
    }
}
