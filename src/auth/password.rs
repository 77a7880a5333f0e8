use anyhow::Context;
use lazy_static::lazy_static;
use tracing::error;

/// bcrypt work factor for new hashes.
pub const HASH_COST: u32 = 10;

/// bcrypt only looks at the first 72 bytes of its input.
pub const MAX_PASSWORD_BYTES: usize = 72;

lazy_static! {
    /// Checked against when no account matches, so a miss costs one bcrypt verify too.
    static ref ABSENT_ACCOUNT_HASH: Option<String> =
        hash_password("absent-account-placeholder").ok();
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    bcrypt::hash(plain, HASH_COST).map_err(|e| {
        error!(error = %e, "bcrypt hash error");
        anyhow::anyhow!(e.to_string())
    })
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    bcrypt::verify(plain, hash).map_err(|e| {
        error!(error = %e, "bcrypt verify error");
        anyhow::anyhow!(e.to_string())
    })
}

/// Hashes on the blocking pool so slow bcrypt rounds don't stall the runtime.
pub async fn hash_password_async(plain: String) -> anyhow::Result<String> {
    tokio::task::spawn_blocking(move || hash_password(&plain))
        .await
        .context("hash task panicked")?
}

pub async fn verify_password_async(plain: String, hash: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || verify_password(&plain, &hash))
        .await
        .context("verify task panicked")?
}

/// Spends the same bcrypt work as a real verify; the result is always a mismatch.
pub async fn verify_absent_account(plain: String) -> anyhow::Result<bool> {
    tokio::task::spawn_blocking(move || match ABSENT_ACCOUNT_HASH.as_deref() {
        Some(hash) => verify_password(&plain, hash).map(|_| false),
        None => hash_password(&plain).map(|_| false),
    })
    .await
    .context("verify task panicked")?
}
