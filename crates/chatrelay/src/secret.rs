use rand::rngs::OsRng;
use rand::Rng;
use std::path::Path;
use tracing::{info, warn};

/// Secrets shorter than this are refused.
pub const MIN_SECRET_LEN: usize = 16;

/// Read the token signing secret from `path`.
///
/// Trailing whitespace is stripped so `echo secret > file` works. On Unix the
/// file must not be readable by group or others.
///
/// # Errors
///
/// Returns an error if the file is too permissive, unreadable, or too short.
pub fn load_secret_file(path: &Path) -> anyhow::Result<Vec<u8>> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(path)?;
        let mode = metadata.permissions().mode();
        if mode & 0o077 != 0 {
            anyhow::bail!(
                "secret file permissions too open: {:o}. Expected 0600",
                mode & 0o777
            );
        }
    }

    let mut data = std::fs::read(path)?;
    while data.last().is_some_and(u8::is_ascii_whitespace) {
        data.pop();
    }
    if data.len() < MIN_SECRET_LEN {
        anyhow::bail!("secret file too short, expected at least {MIN_SECRET_LEN} bytes");
    }
    info!("loaded token secret from {}", path.display());
    Ok(data)
}

/// Resolve the secret from an inline value, a file, or a fresh random one.
///
/// # Errors
///
/// Returns an error if the inline secret is too short or the file cannot be
/// loaded.
pub fn resolve_secret(inline: Option<&str>, file: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    if let Some(secret) = inline {
        if secret.len() < MIN_SECRET_LEN {
            anyhow::bail!("secret too short, expected at least {MIN_SECRET_LEN} bytes");
        }
        return Ok(secret.as_bytes().to_vec());
    }
    if let Some(path) = file {
        return load_secret_file(path);
    }
    Ok(generate_secret())
}

/// Random 32-byte secret. Tokens signed with it die with the process.
#[must_use]
pub fn generate_secret() -> Vec<u8> {
    let mut secret = [0u8; 32];
    OsRng.fill(&mut secret);
    warn!("using ephemeral token secret (not persisted)");
    secret.to_vec()
}
