//! Shell completion scripts for `hrml`.
//!
//! The script is rendered in memory first, so a failed write never leaves a
//! truncated script in the shell's completion directory.

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::CommandFactory;
use clap_complete::{Generator, Shell as CompletionShell, generate};
use tracing::info;

use crate::cli::{AppContext, Cli, CompletionsArgs, Shell};
use crate::infra::io::write_atomic;

const BIN_NAME: &str = "hrml";

impl From<Shell> for CompletionShell {
    fn from(shell: Shell) -> Self {
        match shell {
            Shell::Bash => CompletionShell::Bash,
            Shell::Zsh => CompletionShell::Zsh,
            Shell::Fish => CompletionShell::Fish,
            Shell::PowerShell => CompletionShell::PowerShell,
            Shell::Elvish => CompletionShell::Elvish,
        }
    }
}

/// Completion script for `shell`, as the shell expects to source it.
pub fn render(shell: Shell) -> Vec<u8> {
    let mut cmd = Cli::command();
    let mut script = Vec::new();
    generate(CompletionShell::from(shell), &mut cmd, BIN_NAME, &mut script);
    script
}

/// Write the script for `shell` into `dir` under the shell's conventional
/// file name (`hrml.bash`, `_hrml`, ...).
pub fn write_script(shell: Shell, dir: &Path) -> Result<PathBuf> {
    let path = dir.join(CompletionShell::from(shell.clone()).file_name(BIN_NAME));
    write_atomic(&path, &render(shell))
        .with_context(|| format!("write completion script {}", path.display()))?;
    Ok(path)
}

pub fn run(args: CompletionsArgs, ctx: &AppContext) -> Result<()> {
    let Some(dir) = args.out_dir else {
        io::stdout()
            .write_all(&render(args.shell))
            .context("print completion script")?;
        return Ok(());
    };

    let path = write_script(args.shell, &dir)?;
    if !ctx.quiet {
        eprintln!("Wrote completion to {}", path.display());
    }
    info!(path = %path.display(), "completion written");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_script_names_every_subcommand() {
        let script = String::from_utf8(render(Shell::Bash)).unwrap();

        for sub in ["send", "retrieve", "discover", "init", "completions"] {
            assert!(script.contains(sub), "missing {sub}");
        }
    }

    #[test]
    fn test_write_script_uses_shell_file_name() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("completions");

        let bash = write_script(Shell::Bash, &dir).unwrap();
        let zsh = write_script(Shell::Zsh, &dir).unwrap();

        assert_eq!(bash, dir.join("hrml.bash"));
        assert_eq!(zsh, dir.join("_hrml"));
        assert_eq!(std::fs::read(&bash).unwrap(), render(Shell::Bash));
    }
}
