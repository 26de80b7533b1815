use std::path::Path;

use crate::error::SessionError;

/// Run a git command in `working_dir`, returning stdout on success.
pub async fn run_git(working_dir: &Path, args: &[&str]) -> Result<String, SessionError> {
    let output = tokio::process::Command::new("git")
        .args(args)
        .current_dir(working_dir)
        .output()
        .await
        .map_err(|e| SessionError::Git(format!("failed to run git: {}", e)))?;
    if !output.status.success() {
        return Err(SessionError::Git(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
