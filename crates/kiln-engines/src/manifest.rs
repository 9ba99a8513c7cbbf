//! The built-in manifest of known engines and their release variants.

use kiln_types::{Accelerator, EngineVariant, HostInfo};

/// One engine the daemon knows how to obtain.
#[derive(Debug)]
pub struct EngineSpec {
    /// Canonical name, e.g. `cortex.llamacpp`.
    pub name: &'static str,
    /// Short form accepted from descriptors, e.g. `llamacpp`.
    pub short_name: &'static str,
    /// Release version the daemon installs.
    pub version: &'static str,
    /// GitHub `owner/repo` hosting the release archives.
    pub release_repo: &'static str,
    pub variants: &'static [VariantSpec],
}

/// One published build of an engine.
#[derive(Debug)]
pub struct VariantSpec {
    pub os: &'static str,
    pub arch: &'static str,
    pub accelerator: Accelerator,
}

impl VariantSpec {
    pub fn to_variant(&self) -> EngineVariant {
        EngineVariant::new(self.os, self.arch, self.accelerator)
    }
}

const CUDA_11_7: Accelerator = Accelerator::Cuda {
    major: 11,
    minor: 7,
};
const CUDA_12_0: Accelerator = Accelerator::Cuda {
    major: 12,
    minor: 0,
};
const CUDA_12_4: Accelerator = Accelerator::Cuda {
    major: 12,
    minor: 4,
};

/// Every engine kiln can install, one entry per backend family.
pub const MANIFEST: &[EngineSpec] = &[
    EngineSpec {
        name: "cortex.llamacpp",
        short_name: "llamacpp",
        version: "0.1.25",
        release_repo: "janhq/cortex.llamacpp",
        variants: &[
            VariantSpec {
                os: "linux",
                arch: "x86_64",
                accelerator: Accelerator::Cpu,
            },
            VariantSpec {
                os: "linux",
                arch: "x86_64",
                accelerator: CUDA_11_7,
            },
            VariantSpec {
                os: "linux",
                arch: "x86_64",
                accelerator: CUDA_12_0,
            },
            VariantSpec {
                os: "linux",
                arch: "x86_64",
                accelerator: CUDA_12_4,
            },
            VariantSpec {
                os: "linux",
                arch: "arm64",
                accelerator: Accelerator::Cpu,
            },
            VariantSpec {
                os: "macos",
                arch: "arm64",
                accelerator: Accelerator::Metal,
            },
            VariantSpec {
                os: "macos",
                arch: "x86_64",
                accelerator: Accelerator::Cpu,
            },
            VariantSpec {
                os: "windows",
                arch: "x86_64",
                accelerator: Accelerator::Cpu,
            },
            VariantSpec {
                os: "windows",
                arch: "x86_64",
                accelerator: CUDA_12_0,
            },
        ],
    },
    EngineSpec {
        name: "cortex.onnx",
        short_name: "onnx",
        version: "0.1.7",
        release_repo: "janhq/cortex.onnx",
        variants: &[VariantSpec {
            os: "windows",
            arch: "x86_64",
            accelerator: Accelerator::Cpu,
        }],
    },
    EngineSpec {
        name: "cortex.tensorrt-llm",
        short_name: "tensorrt-llm",
        version: "0.0.9",
        release_repo: "janhq/cortex.tensorrt-llm",
        variants: &[
            VariantSpec {
                os: "linux",
                arch: "x86_64",
                accelerator: CUDA_12_4,
            },
            VariantSpec {
                os: "windows",
                arch: "x86_64",
                accelerator: CUDA_12_4,
            },
        ],
    },
    EngineSpec {
        name: "cortex.python",
        short_name: "python",
        version: "0.1.3",
        release_repo: "janhq/cortex.python",
        variants: &[
            VariantSpec {
                os: "linux",
                arch: "x86_64",
                accelerator: Accelerator::Cpu,
            },
            VariantSpec {
                os: "macos",
                arch: "arm64",
                accelerator: Accelerator::Cpu,
            },
            VariantSpec {
                os: "windows",
                arch: "x86_64",
                accelerator: Accelerator::Cpu,
            },
        ],
    },
];

/// Look an engine up by canonical or short name.
pub fn find(name: &str) -> Option<&'static EngineSpec> {
    MANIFEST
        .iter()
        .find(|spec| spec.name == name || spec.short_name == name)
}

/// Pick the best-matching variant for `host`.
///
/// A variant matches when os and arch agree and its accelerator can run on
/// the host's. Ties break toward GPU over CPU, then the highest version.
pub fn select_variant(spec: &'static EngineSpec, host: &HostInfo) -> Option<&'static VariantSpec> {
    spec.variants
        .iter()
        .filter(|v| v.os == host.os && v.arch == host.arch)
        .filter(|v| v.accelerator.runs_on(&host.accelerator))
        .max_by_key(|v| v.accelerator.rank())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(os: &str, arch: &str, accelerator: Accelerator) -> HostInfo {
        HostInfo {
            os: os.into(),
            arch: arch.into(),
            accelerator,
        }
    }

    #[test]
    fn short_and_canonical_names_resolve_to_the_same_spec() {
        let a = find("cortex.llamacpp").unwrap();
        let b = find("llamacpp").unwrap();
        assert_eq!(a.name, b.name);
        assert!(find("exllama").is_none());
    }

    #[test]
    fn cuda_host_prefers_gpu_build_with_highest_version() {
        let spec = find("llamacpp").unwrap();
        let v = select_variant(spec, &host("linux", "x86_64", CUDA_12_4)).unwrap();
        assert_eq!(v.accelerator, CUDA_12_4);

        // A cuda-12.2 host can run the 12.0 build but not the 12.4 one.
        let v = select_variant(
            spec,
            &host(
                "linux",
                "x86_64",
                Accelerator::Cuda {
                    major: 12,
                    minor: 2,
                },
            ),
        )
        .unwrap();
        assert_eq!(v.accelerator, CUDA_12_0);
    }

    #[test]
    fn cpu_host_falls_back_to_cpu_build() {
        let spec = find("llamacpp").unwrap();
        let v = select_variant(spec, &host("linux", "x86_64", Accelerator::Cpu)).unwrap();
        assert_eq!(v.accelerator, Accelerator::Cpu);
    }

    #[test]
    fn incompatible_host_gets_nothing() {
        let spec = find("onnx").unwrap();
        assert!(select_variant(spec, &host("linux", "x86_64", Accelerator::Cpu)).is_none());

        let trt = find("tensorrt-llm").unwrap();
        assert!(select_variant(trt, &host("macos", "arm64", Accelerator::Metal)).is_none());
    }
}
