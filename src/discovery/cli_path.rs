//! CLI path discovery fallback chain (spec §4.8), used to populate the
//! `cliPath` TXT record so a peer that discovers this gateway can also
//! invoke its CLI directly.

pub const ENV_CLI_PATH: &str = "EPILOOP_CLI_PATH";

/// Resolve the CLI entrypoint path by, in order: `EPILOOP_CLI_PATH`,
/// a `dist/index.js` sibling of the current executable, `argv[1]` if it
/// names an existing file, `./dist/index.js`, `./bin/epiloop.js`.
pub fn resolve_cli_path(
    env: &std::collections::HashMap<String, String>,
    current_exe: Option<&std::path::Path>,
    argv1: Option<&str>,
) -> Option<String> {
    if let Some(path) = env.get(ENV_CLI_PATH) {
        return Some(path.clone());
    }

    if let Some(exe) = current_exe {
        if let Some(dir) = exe.parent() {
            let sibling = dir.join("dist").join("index.js");
            if sibling.exists() {
                return Some(sibling.to_string_lossy().to_string());
            }
        }
    }

    if let Some(arg) = argv1 {
        if std::path::Path::new(arg).is_file() {
            return Some(arg.to_string());
        }
    }

    for candidate in ["./dist/index.js", "./bin/epiloop.js"] {
        if std::path::Path::new(candidate).exists() {
            return Some(candidate.to_string());
        }
    }

    None
}
