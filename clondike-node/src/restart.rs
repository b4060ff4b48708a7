//! Restart binary handler (spec. §4.1 read-path entry point, §3 "Checkpoint
//! file naming & the restart binary handler"): recognizes the checkpoint
//! magic during `execve` and re-hydrates the process, or re-execs the
//! recorded binary for a non-preemptive migration.

use std::ffi::CString;

use clondike_ckpt::restart::RestartAction;
use clondike_wire::Result;

/// Attempts to recognize `path` as a checkpoint file and restore from it.
/// Returns `Ok(true)` if the image was fully restored in place, `Ok(false)`
/// if the caller must now `execve` the recorded NPM binary (see
/// [`reexec_argv_envp`]), and an error on a real I/O or format failure.
pub fn try_restart(path: &str) -> Result<RestartHandled> {
    match clondike_ckpt::restart::run_restart(path)? {
        RestartAction::Restored => Ok(RestartHandled::Restored),
        RestartAction::Reexec(params) => Ok(RestartHandled::Reexec {
            filename: params.filename,
            argv: params.argv,
            envp: params.envp,
        }),
    }
}

pub enum RestartHandled {
    Restored,
    Reexec { filename: String, argv: Vec<String>, envp: Vec<String> },
}

/// Converts a re-exec request's argv/envp into the NUL-terminated
/// `CString` vectors `nix::unistd::execve` requires.
pub fn reexec_argv_envp(argv: &[String], envp: &[String]) -> std::result::Result<(Vec<CString>, Vec<CString>), std::ffi::NulError> {
    let argv = argv.iter().map(|s| CString::new(s.as_bytes())).collect::<std::result::Result<Vec<_>, _>>()?;
    let envp = envp.iter().map(|s| CString::new(s.as_bytes())).collect::<std::result::Result<Vec<_>, _>>()?;
    Ok((argv, envp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexec_conversion_rejects_embedded_nul() {
        let bad = vec!["a\0b".to_string()];
        assert!(reexec_argv_envp(&bad, &[]).is_err());
    }

    #[test]
    fn reexec_conversion_round_trips_plain_strings() {
        let argv = vec!["/bin/sh".to_string(), "-c".to_string()];
        let (cargv, cenvp) = reexec_argv_envp(&argv, &["PATH=/usr/bin".to_string()]).unwrap();
        assert_eq!(cargv.len(), 2);
        assert_eq!(cenvp.len(), 1);
    }
}
