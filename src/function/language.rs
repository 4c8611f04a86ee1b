//! Language detection from the primary script's extension.

use crate::worker::WorkerConfig;
use std::path::Path;

/// Language of precompiled .NET assemblies.
pub const DOTNET_ASSEMBLY_LANGUAGE: &str = "DotNetAssembly";

/// Language of C# scripts.
pub const CSHARP_LANGUAGE: &str = "CSharp";

/// Determine the language for `script_file`.
///
/// A worker claiming the extension wins, preferring the one named by
/// `worker_runtime`. `.dll` maps to [`DOTNET_ASSEMBLY_LANGUAGE`] unless the
/// hinted worker claims it. Unclaimed `.cs`/`.csx` map to [`CSHARP_LANGUAGE`],
/// and anything else is unknown.
pub fn parse_language(
    script_file: Option<&Path>,
    worker_configs: &[WorkerConfig],
    worker_runtime: Option<&str>,
) -> Option<String> {
    let extension = script_file?.extension()?.to_str()?.to_ascii_lowercase();

    let claimants: Vec<&WorkerConfig> = worker_configs
        .iter()
        .filter(|config| config.claims_extension(&extension))
        .collect();
    let preferred = worker_runtime.and_then(|runtime| {
        claimants
            .iter()
            .find(|config| config.language.eq_ignore_ascii_case(runtime))
    });

    if extension == "dll" {
        return Some(
            preferred
                .map(|config| config.language.clone())
                .unwrap_or_else(|| DOTNET_ASSEMBLY_LANGUAGE.to_string()),
        );
    }

    if let Some(config) = preferred.or(claimants.first()) {
        return Some(config.language.clone());
    }

    match extension.as_str() {
        "cs" | "csx" => Some(CSHARP_LANGUAGE.to_string()),
        "dll" => Some(DOTNET_ASSEMBLY_LANGUAGE.to_string()),
        _ => None,
    }
}
